//! Reply types and helpers for plugin binaries.
//!
//! Plugins answer the runtime on STDOUT: a success document, a version
//! document, or an [`ErrorReply`]. The [`reply`] function writes one out and
//! exits with the appropriate status.
//!
//! The runtime side never uses these success types; it decodes plugin output
//! through the versioned [`result`][crate::result] registry instead.

use std::{collections::HashMap, fmt, io::stdout, process::exit};

use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::dns::Dns;
pub use crate::result::{Interface, Ip, MacAddr, Route};
pub use crate::version::PluginInfo;

/// Trait for a reply type to be handled by the [`reply()`] function.
///
/// This is mostly internal, but may be used if you want to output your own
/// reply types for some reason.
pub trait ReplyPayload<'de>: std::fmt::Debug + Serialize + Deserialize<'de> {
	/// The [`exit`] code to be set when replying with this type.
	///
	/// Defaults to 0 (success).
	fn code(&self) -> i32 {
		0
	}
}

/// The on-wire error shape: what a plugin writes to STDOUT before exiting
/// non-zero.
///
/// Codes 1-99 are reserved by the spec, codes 100+ may be used for plugins'
/// own error codes. Code 0 is not to be used, as it is for successful exit.
///
/// This is both what the skeleton emits and what the executor parses back
/// out of a failed plugin's STDOUT, so all fields are owned and the version
/// is optional (early spec versions did not carry it).
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
	/// The CNI version of the plugin input config, when known.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cni_version: Option<String>,

	/// A code for the error.
	///
	/// Must match the exit code.
	pub code: u32,

	/// A short message characterising the error.
	pub msg: String,

	/// A longer message describing the error.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub details: String,
}

impl fmt::Display for ErrorReply {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.details.is_empty() {
			write!(f, "{} (code {})", self.msg, self.code)
		} else {
			write!(f, "{}: {} (code {})", self.msg, self.details, self.code)
		}
	}
}

impl std::error::Error for ErrorReply {}

impl<'de> ReplyPayload<'de> for ErrorReply {
	/// Sets the exit status of the process to the code of the error reply.
	fn code(&self) -> i32 {
		self.code as i32
	}
}

impl<'de> ReplyPayload<'de> for PluginInfo {}

/// The reply structure used when returning a success.
///
/// This is the current-version (1.x) shape. A plugin provided a
/// `prev_result` must carry its interfaces, IPs, and routes through into
/// this, with its own modifications applied.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessReply {
	/// The CNI version of the plugin input config.
	#[serde(deserialize_with = "crate::version::deserialize_version")]
	#[serde(serialize_with = "crate::version::serialize_version")]
	pub cni_version: Version,

	/// The list of all interfaces created by this plugin and its
	/// predecessors in the chain.
	#[serde(default)]
	pub interfaces: Vec<Interface>,

	/// The list of all IPs assigned by this plugin and its predecessors.
	#[serde(default)]
	pub ips: Vec<Ip>,

	/// The list of all routes created by this plugin and its predecessors.
	#[serde(default)]
	pub routes: Vec<Route>,

	/// Final DNS configuration for the namespace.
	#[serde(default)]
	pub dns: Dns,

	/// Custom reply fields.
	///
	/// Note that these are off-spec and may be discarded by the runtime.
	#[serde(flatten)]
	pub specific: HashMap<String, Value>,
}

impl<'de> ReplyPayload<'de> for SuccessReply {}

impl SuccessReply {
	/// Cast into an abbreviated success reply if the interface list is empty.
	pub fn into_ipam(self) -> Option<IpamSuccessReply> {
		if self.interfaces.is_empty() {
			Some(IpamSuccessReply {
				cni_version: self.cni_version,
				ips: self.ips,
				routes: self.routes,
				dns: self.dns,
				specific: self.specific,
			})
		} else {
			None
		}
	}
}

/// The reply structure used when returning an abbreviated IPAM success.
///
/// It is identical to [`SuccessReply`] except for the lack of the
/// `interfaces` field.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamSuccessReply {
	/// The CNI version of the plugin input config.
	#[serde(deserialize_with = "crate::version::deserialize_version")]
	#[serde(serialize_with = "crate::version::serialize_version")]
	pub cni_version: Version,

	/// The list of all IPs assigned by this plugin.
	#[serde(default)]
	pub ips: Vec<Ip>,

	/// The list of all routes created by this plugin.
	#[serde(default)]
	pub routes: Vec<Route>,

	/// Final DNS configuration for the namespace.
	#[serde(default)]
	pub dns: Dns,

	/// Custom reply fields.
	#[serde(flatten)]
	pub specific: HashMap<String, Value>,
}

impl<'de> ReplyPayload<'de> for IpamSuccessReply {}

/// Output the reply as JSON on STDOUT and exit.
pub fn reply<'de, T>(result: T) -> !
where
	T: ReplyPayload<'de>,
{
	debug!("replying with {:#?}", result);
	serde_json::to_writer(stdout(), &result)
		.expect("Error writing result to stdout... chances are you won't get this either");

	exit(result.code());
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_reply_parses_plugin_output() {
		let wire = br#"{"cniVersion":"1.0.0","code":7,"msg":"bad"}"#;
		let err: ErrorReply = serde_json::from_slice(wire).unwrap();
		assert_eq!(err.code, 7);
		assert_eq!(err.msg, "bad");
		assert_eq!(err.details, "");
		assert_eq!(err.cni_version.as_deref(), Some("1.0.0"));
	}

	#[test]
	fn error_reply_rejects_success_output() {
		// classification depends on this: a result document must not parse
		// as an error
		let wire = br#"{"cniVersion":"1.0.0","ips":[{"address":"10.0.0.2/24"}]}"#;
		assert!(serde_json::from_slice::<ErrorReply>(wire).is_err());
	}

	#[test]
	fn success_reply_roundtrip() {
		let wire = br#"{"cniVersion":"1.0.0","ips":[{"address":"10.0.0.2/24"}],"dns":{},"myExtra":true}"#;
		let reply: SuccessReply = serde_json::from_slice(wire).unwrap();
		assert_eq!(reply.cni_version.to_string(), "1.0.0");
		assert_eq!(reply.ips.len(), 1);
		assert_eq!(reply.specific["myExtra"], Value::Bool(true));
	}
}
