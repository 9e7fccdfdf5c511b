//! CNI spec versions: constants, comparison, and negotiation.

use std::{io::Write, str::FromStr};

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CniError;

/// The CNI spec version this library implements.
pub const CURRENT: &str = "1.1.0";

/// Every CNI spec version this library can decode results for.
pub const SUPPORTED: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

/// Extract the `cniVersion` field from arbitrary CNI JSON.
///
/// Configurations and results predating 0.2.0 may not carry the field at
/// all; an absent or empty version means `"0.1.0"`.
pub fn decode_version(json_bytes: &[u8]) -> Result<String, CniError> {
	#[derive(Deserialize)]
	struct VersionOnly {
		#[serde(default, rename = "cniVersion")]
		cni_version: String,
	}

	let conf: VersionOnly = serde_json::from_slice(json_bytes).map_err(|err| {
		CniError::Decoding(format!("decoding version from network config: {}", err))
	})?;

	if conf.cni_version.is_empty() {
		Ok("0.1.0".into())
	} else {
		Ok(conf.cni_version)
	}
}

/// Whether version `a` is greater than or equal to version `b`.
///
/// Comparison is dotted-numeric (major.minor.patch) and total over valid
/// versions; an unparseable version is a decoding error.
pub fn greater_than_or_equal_to(a: &str, b: &str) -> Result<bool, CniError> {
	Ok(parse(a)? >= parse(b)?)
}

pub(crate) fn parse(version: &str) -> Result<Version, CniError> {
	Version::parse(version)
		.map_err(|err| CniError::Decoding(format!("invalid version {:?}: {}", version, err)))
}

/// The version document a plugin emits for the `VERSION` command.
///
/// On the wire this is `{"cniVersion": ..., "supportedVersions": [...]}`.
/// The runtime parses it to negotiate before invoking a plugin; plugin
/// binaries construct one to advertise what they speak.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
	/// The plugin's preferred (usually most recent) spec version.
	pub cni_version: String,

	/// Every spec version the plugin supports.
	pub supported_versions: Vec<String>,
}

impl PluginInfo {
	/// Plugin info advertising every version this library supports.
	pub fn all() -> Self {
		Self {
			cni_version: CURRENT.into(),
			supported_versions: SUPPORTED.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	/// Plugin info advertising an explicit version set.
	pub fn only(versions: &[&str]) -> Self {
		Self {
			cni_version: versions.last().map_or_else(|| CURRENT.into(), |v| (*v).to_string()),
			supported_versions: versions.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	/// Whether the given config version is in the supported set.
	///
	/// Membership is by exact version string, as the reference implementation
	/// reconciles it.
	pub fn supports(&self, version: &str) -> bool {
		self.supported_versions.iter().any(|v| v == version)
	}

	/// Error out unless the given config version is supported.
	pub fn require(&self, version: &str) -> Result<(), CniError> {
		if self.supports(version) {
			Ok(())
		} else {
			Err(CniError::Incompatible {
				config: version.into(),
				supported: self.supported_versions.clone(),
			})
		}
	}

	/// Write the version document to a stream.
	pub fn encode(&self, writer: &mut dyn Write) -> Result<(), CniError> {
		serde_json::to_writer(writer, self)?;
		Ok(())
	}
}

pub(crate) fn serialize_version<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	version.to_string().serialize(serializer)
}

pub(crate) fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
	D: Deserializer<'de>,
{
	use serde::de::Error;
	let j = String::deserialize(deserializer)?;
	Version::from_str(&j).map_err(Error::custom)
}

/// Like [`deserialize_version`], but an absent or empty string means 0.1.0,
/// matching [`decode_version`]. For the `cniVersion` field of configs.
pub(crate) fn deserialize_config_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
	D: Deserializer<'de>,
{
	use serde::de::Error;
	let j = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
	if j.is_empty() {
		Ok(Version::new(0, 1, 0))
	} else {
		Version::from_str(&j).map_err(Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decode_defaults_to_010() {
		assert_eq!(decode_version(b"{}").unwrap(), "0.1.0");
		assert_eq!(decode_version(br#"{"cniVersion": ""}"#).unwrap(), "0.1.0");
	}

	#[test]
	fn decode_explicit() {
		assert_eq!(
			decode_version(br#"{"cniVersion": "0.4.0", "name": "net"}"#).unwrap(),
			"0.4.0"
		);
	}

	#[test]
	fn decode_garbage() {
		assert!(decode_version(b"not json").is_err());
	}

	#[test]
	fn comparison() {
		assert!(greater_than_or_equal_to("1.0.0", "0.4.0").unwrap());
		assert!(greater_than_or_equal_to("0.4.0", "0.4.0").unwrap());
		assert!(!greater_than_or_equal_to("0.3.1", "0.4.0").unwrap());
		assert!(greater_than_or_equal_to("1.1.0", "1.0.0").unwrap());
		assert!(greater_than_or_equal_to("bogus", "1.0.0").is_err());
	}

	#[test]
	fn plugin_info_membership() {
		let info = PluginInfo::only(&["0.4.0", "1.0.0"]);
		assert!(info.supports("0.4.0"));
		assert!(!info.supports("0.3.1"));
		assert!(info.require("1.0.0").is_ok());

		match info.require("0.3.1") {
			Err(CniError::Incompatible { config, supported }) => {
				assert_eq!(config, "0.3.1");
				assert_eq!(supported, vec!["0.4.0".to_string(), "1.0.0".to_string()]);
			}
			other => panic!("unexpected: {:?}", other),
		}
	}

	#[test]
	fn plugin_info_wire_shape() {
		let mut out = Vec::new();
		PluginInfo::only(&["1.0.0"]).encode(&mut out).unwrap();
		let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
		assert_eq!(value["cniVersion"], "1.0.0");
		assert_eq!(value["supportedVersions"][0], "1.0.0");
	}
}
