//! Network configuration: the byte-preserving model and the on-disk loader.
//!
//! Plugin configuration is opaque to the runtime: whatever an administrator
//! wrote for a plugin must reach that plugin unaltered. The model therefore
//! keeps the raw JSON bytes as the authoritative representation and parses
//! out only the handful of fields the runtime itself needs. Mutation happens
//! exclusively through [`inject_conf`], which round-trips through a JSON
//! object so nothing but the injected keys changes, and always produces a
//! fresh [`NetworkConfig`].

use std::{
	collections::HashMap,
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};

use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::CniError;

/// The parsed header of a plugin configuration.
///
/// Only what the runtime needs: everything else stays in the raw bytes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
	/// The CNI spec version this configuration conforms to.
	///
	/// May be empty, which means 0.1.0.
	#[serde(default)]
	pub cni_version: String,

	/// The network name. For plugins inside a list this is usually absent;
	/// the list's name is injected at invocation time.
	#[serde(default)]
	pub name: String,

	/// The name of the plugin executable. Required.
	#[serde(default, rename = "type")]
	pub plugin_type: String,

	/// The capabilities the plugin declares, mapping capability name to
	/// whether it is enabled. Gates what `capabilityArgs` reach the plugin
	/// as `runtimeConfig`.
	#[serde(default)]
	pub capabilities: HashMap<String, bool>,
}

/// A single plugin configuration: raw bytes plus the parsed header.
///
/// The bytes are authoritative and never modified in place.
#[derive(Clone, Debug, Default)]
pub struct NetworkConfig {
	/// The parsed header view.
	pub network: NetConf,

	/// The verbatim JSON this configuration was parsed from.
	pub bytes: Vec<u8>,
}

/// An ordered chain of plugin configurations sharing a network name.
///
/// Insertion order is invocation order for ADD and CHECK, and the reverse
/// order for DEL.
#[derive(Clone, Debug, Default)]
pub struct NetworkConfigList {
	/// The network name. Propagates into each plugin's effective `name` at
	/// invocation time.
	pub name: String,

	/// The CNI spec version of the list. May be empty, which means 0.1.0.
	pub cni_version: String,

	/// Whether CHECK is administratively disabled for this network.
	pub disable_check: bool,

	/// The plugin chain. Never empty.
	pub plugins: Vec<NetworkConfig>,

	/// The verbatim JSON this list was parsed from.
	pub bytes: Vec<u8>,
}

/// Parse a single plugin configuration, preserving its bytes.
pub fn conf_from_bytes(bytes: &[u8]) -> Result<NetworkConfig, CniError> {
	let network: NetConf = serde_json::from_slice(bytes)
		.map_err(|err| CniError::Decoding(format!("error parsing configuration: {}", err)))?;

	if network.plugin_type.is_empty() {
		return Err(CniError::InvalidConfig(
			"error parsing configuration: missing 'type'".into(),
		));
	}

	Ok(NetworkConfig {
		network,
		bytes: bytes.to_vec(),
	})
}

/// Read and parse a single plugin configuration file.
pub fn conf_from_file(filename: impl AsRef<Path>) -> Result<NetworkConfig, CniError> {
	let bytes = fs::read(filename.as_ref())?;
	conf_from_bytes(&bytes)
}

/// Parse a configuration list, preserving its bytes.
///
/// Requires a string `name` and a non-empty `plugins` array; `cniVersion`
/// and `disableCheck` are optional. Each plugin entry is re-serialized on
/// its own and run through [`conf_from_bytes`], so every entry keeps an
/// independent byte representation.
pub fn conflist_from_bytes(bytes: &[u8]) -> Result<NetworkConfigList, CniError> {
	let raw_list: Map<String, Value> = serde_json::from_slice(bytes)
		.map_err(|err| CniError::Decoding(format!("error parsing configuration list: {}", err)))?;

	let name = match raw_list.get("name") {
		Some(Value::String(name)) => name.clone(),
		Some(other) => {
			return Err(CniError::InvalidConfig(format!(
				"error parsing configuration list: invalid name type {:?}",
				other
			)));
		}
		None => {
			return Err(CniError::InvalidConfig(
				"error parsing configuration list: no name".into(),
			));
		}
	};

	let cni_version = match raw_list.get("cniVersion") {
		Some(Value::String(version)) => version.clone(),
		Some(other) => {
			return Err(CniError::InvalidConfig(format!(
				"error parsing configuration list: invalid cniVersion type {:?}",
				other
			)));
		}
		None => String::new(),
	};

	let disable_check = match raw_list.get("disableCheck") {
		Some(Value::Bool(disable)) => *disable,
		Some(other) => {
			return Err(CniError::InvalidConfig(format!(
				"error parsing configuration list: invalid disableCheck type {:?}",
				other
			)));
		}
		None => false,
	};

	let raw_plugins = match raw_list.get("plugins") {
		Some(Value::Array(plugins)) => plugins,
		Some(other) => {
			return Err(CniError::InvalidConfig(format!(
				"error parsing configuration list: invalid 'plugins' type {:?}",
				other
			)));
		}
		None => {
			return Err(CniError::InvalidConfig(
				"error parsing configuration list: no 'plugins' key".into(),
			));
		}
	};

	if raw_plugins.is_empty() {
		return Err(CniError::InvalidConfig(
			"error parsing configuration list: no plugins in list".into(),
		));
	}

	let mut plugins = Vec::with_capacity(raw_plugins.len());
	for (i, raw_plugin) in raw_plugins.iter().enumerate() {
		let plugin_bytes = serde_json::to_vec(raw_plugin)?;
		let plugin = conf_from_bytes(&plugin_bytes).map_err(|err| {
			CniError::InvalidConfig(format!("failed to parse plugin config {}: {}", i, err))
		})?;
		plugins.push(plugin);
	}

	Ok(NetworkConfigList {
		name,
		cni_version,
		disable_check,
		plugins,
		bytes: bytes.to_vec(),
	})
}

/// Read and parse a configuration list file.
pub fn conflist_from_file(filename: impl AsRef<Path>) -> Result<NetworkConfigList, CniError> {
	let bytes = fs::read(filename.as_ref())?;
	conflist_from_bytes(&bytes)
}

/// "Upconvert" a single network config into a list, with the single network
/// as the only entry.
///
/// The config's JSON is re-deserialized into a raw map before being wrapped,
/// and the wrapper is serialized and parsed again, so the resulting `bytes`
/// describe the wrapper itself rather than some language-default rendering.
pub fn conflist_from_conf(original: &NetworkConfig) -> Result<NetworkConfigList, CniError> {
	let raw_config: Map<String, Value> = serde_json::from_slice(&original.bytes)?;

	let mut raw_list = Map::new();
	raw_list.insert("name".into(), Value::String(original.network.name.clone()));
	raw_list.insert(
		"cniVersion".into(),
		Value::String(original.network.cni_version.clone()),
	);
	raw_list.insert(
		"plugins".into(),
		Value::Array(vec![Value::Object(raw_config)]),
	);

	conflist_from_bytes(&serde_json::to_vec(&raw_list)?)
}

/// List the regular files in `dir` whose extension is one of `extensions`
/// (given without the leading dot).
///
/// A missing directory yields an empty list, not an error. The result is
/// unsorted; callers sort as needed.
pub fn conf_files(dir: impl AsRef<Path>, extensions: &[&str]) -> Result<Vec<PathBuf>, CniError> {
	let entries = match fs::read_dir(dir.as_ref()) {
		Ok(entries) => entries,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
		Err(err) => return Err(err.into()),
	};

	let mut files = Vec::new();
	for entry in entries {
		let entry = entry?;
		if !entry.file_type()?.is_file() {
			continue;
		}

		let path = entry.path();
		let ext = path.extension().map(|e| e.to_string_lossy().to_string());
		if let Some(ext) = ext {
			if extensions.iter().any(|e| **e == ext) {
				files.push(path);
			}
		}
	}

	Ok(files)
}

/// Load the first `.conf`/`.json` file in `dir` (lexicographic order) whose
/// network name matches.
pub fn load_conf(dir: impl AsRef<Path>, name: &str) -> Result<NetworkConfig, CniError> {
	let dir = dir.as_ref();
	let mut files = conf_files(dir, &["conf", "json"])?;
	if files.is_empty() {
		return Err(CniError::NoConfigsFound { dir: dir.into() });
	}
	files.sort();

	for file in files {
		let conf = conf_from_file(&file)?;
		if conf.network.name == name {
			debug!("loaded config for network {} from {:?}", name, file);
			return Ok(conf);
		}
	}

	Err(CniError::NotFound {
		name: name.into(),
		dir: dir.into(),
	})
}

/// Load the first `.conflist` file in `dir` (lexicographic order) whose name
/// matches, falling back to upconverting a matching single `.conf`/`.json`.
pub fn load_conflist(dir: impl AsRef<Path>, name: &str) -> Result<NetworkConfigList, CniError> {
	let dir = dir.as_ref();
	let mut files = conf_files(dir, &["conflist"])?;
	files.sort();

	for file in &files {
		let list = conflist_from_file(file)?;
		if list.name == name {
			debug!("loaded config list for network {} from {:?}", name, file);
			return Ok(list);
		}
	}

	match load_conf(dir, name) {
		Ok(conf) => conflist_from_conf(&conf),
		// Config lists were found, they just didn't match: "nothing found"
		// would be misleading.
		Err(CniError::NoConfigsFound { .. }) if !files.is_empty() => Err(CniError::NotFound {
			name: name.into(),
			dir: dir.into(),
		}),
		Err(err) => Err(err),
	}
}

/// Merge top-level keys into a config's raw JSON object, producing a new
/// [`NetworkConfig`].
///
/// Empty keys and null values are rejected. The merge round-trips through
/// parse, mutate, re-serialize, re-parse, so the original is untouched and
/// the new bytes contain exactly the original fields plus the overrides.
pub fn inject_conf(
	original: &NetworkConfig,
	new_values: &Map<String, Value>,
) -> Result<NetworkConfig, CniError> {
	let mut config: Map<String, Value> = serde_json::from_slice(&original.bytes)
		.map_err(|err| CniError::Decoding(format!("unmarshal existing network bytes: {}", err)))?;

	for (key, value) in new_values {
		if key.is_empty() {
			return Err(CniError::InvalidConfig("keys cannot be empty".into()));
		}

		if value.is_null() {
			return Err(CniError::InvalidConfig(format!(
				"key '{}' value must not be nil",
				key
			)));
		}

		config.insert(key.clone(), value.clone());
	}

	conf_from_bytes(&serde_json::to_vec(&config)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::fs;
	use tempfile::tempdir;

	const CONF: &str = r#"{
		"cniVersion": "1.0.0",
		"name": "mynet",
		"type": "bridge",
		"bridge": "cni0",
		"capabilities": {"portMappings": true}
	}"#;

	const CONFLIST: &str = r#"{
		"cniVersion": "1.0.0",
		"name": "mynet",
		"plugins": [
			{"type": "bridge", "bridge": "cni0"},
			{"type": "portmap", "capabilities": {"portMappings": true}}
		]
	}"#;

	#[test]
	fn conf_preserves_bytes() {
		let conf = conf_from_bytes(CONF.as_bytes()).unwrap();
		assert_eq!(conf.bytes, CONF.as_bytes());
		assert_eq!(conf.network.plugin_type, "bridge");
		assert_eq!(conf.network.name, "mynet");
		assert_eq!(conf.network.cni_version, "1.0.0");
		assert_eq!(conf.network.capabilities.get("portMappings"), Some(&true));
	}

	#[test]
	fn conf_requires_type() {
		let err = conf_from_bytes(br#"{"name": "mynet"}"#).unwrap_err();
		assert!(err.to_string().contains("missing 'type'"));
	}

	#[test]
	fn conflist_preserves_bytes() {
		let list = conflist_from_bytes(CONFLIST.as_bytes()).unwrap();
		assert_eq!(list.bytes, CONFLIST.as_bytes());
		assert_eq!(list.name, "mynet");
		assert_eq!(list.cni_version, "1.0.0");
		assert!(!list.disable_check);
		assert_eq!(list.plugins.len(), 2);
		assert_eq!(list.plugins[1].network.plugin_type, "portmap");

		// each entry keeps its own parseable byte representation
		let second: Value = serde_json::from_slice(&list.plugins[1].bytes).unwrap();
		assert_eq!(second["type"], "portmap");
	}

	#[test]
	fn conflist_requires_name_and_plugins() {
		let err = conflist_from_bytes(br#"{"plugins": [{"type": "a"}]}"#).unwrap_err();
		assert!(err.to_string().contains("no name"));

		let err = conflist_from_bytes(br#"{"name": "x"}"#).unwrap_err();
		assert!(err.to_string().contains("no 'plugins' key"));

		let err = conflist_from_bytes(br#"{"name": "x", "plugins": []}"#).unwrap_err();
		assert!(err.to_string().contains("no plugins in list"));

		let err = conflist_from_bytes(br#"{"name": 42, "plugins": [{"type": "a"}]}"#).unwrap_err();
		assert!(err.to_string().contains("invalid name type"));
	}

	#[test]
	fn inject_roundtrip_is_identity() {
		let conf = conf_from_bytes(CONF.as_bytes()).unwrap();
		let same = inject_conf(&conf, &Map::new()).unwrap();
		assert_eq!(same.network.name, conf.network.name);
		assert_eq!(same.network.plugin_type, conf.network.plugin_type);
		assert_eq!(same.network.cni_version, conf.network.cni_version);

		let before: Value = serde_json::from_slice(&conf.bytes).unwrap();
		let after: Value = serde_json::from_slice(&same.bytes).unwrap();
		assert_eq!(before, after);
	}

	#[test]
	fn inject_overrides_and_leaves_original_alone() {
		let conf = conf_from_bytes(CONF.as_bytes()).unwrap();
		let mut overrides = Map::new();
		overrides.insert("name".into(), json!("othernet"));
		overrides.insert("extra".into(), json!({"a": 1}));

		let injected = inject_conf(&conf, &overrides).unwrap();
		assert_eq!(injected.network.name, "othernet");

		let value: Value = serde_json::from_slice(&injected.bytes).unwrap();
		assert_eq!(value["extra"]["a"], 1);
		assert_eq!(value["bridge"], "cni0");

		// original untouched
		assert_eq!(conf.bytes, CONF.as_bytes());
		assert_eq!(conf.network.name, "mynet");
	}

	#[test]
	fn inject_rejects_empty_key_and_null() {
		let conf = conf_from_bytes(CONF.as_bytes()).unwrap();

		let mut empty_key = Map::new();
		empty_key.insert("".into(), json!(1));
		assert!(inject_conf(&conf, &empty_key).is_err());

		let mut null_value = Map::new();
		null_value.insert("key".into(), Value::Null);
		assert!(inject_conf(&conf, &null_value).is_err());
	}

	#[test]
	fn conf_files_missing_dir_is_empty() {
		let found = conf_files("/does/not/exist/anywhere", &["conf"]).unwrap();
		assert!(found.is_empty());
	}

	#[test]
	fn load_conflist_matches_by_name() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("10-other.conflist"), br#"{"name": "other", "plugins": [{"type": "a"}]}"#).unwrap();
		fs::write(dir.path().join("20-mynet.conflist"), CONFLIST.as_bytes()).unwrap();

		let list = load_conflist(dir.path(), "mynet").unwrap();
		assert_eq!(list.name, "mynet");
		assert_eq!(list.plugins.len(), 2);
	}

	#[test]
	fn load_conflist_upconverts_single_conf() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("mynet.conf"), CONF.as_bytes()).unwrap();

		let list = load_conflist(dir.path(), "mynet").unwrap();
		assert_eq!(list.name, "mynet");
		assert_eq!(list.cni_version, "1.0.0");
		assert_eq!(list.plugins.len(), 1);
		assert_eq!(list.plugins[0].network.plugin_type, "bridge");

		// the list bytes describe the wrapper, and parse back to it
		let reparsed = conflist_from_bytes(&list.bytes).unwrap();
		assert_eq!(reparsed.name, "mynet");
		assert_eq!(reparsed.plugins.len(), 1);
	}

	#[test]
	fn load_conflist_not_found_vs_no_configs() {
		let dir = tempdir().unwrap();

		// nothing at all in the directory
		match load_conflist(dir.path(), "mynet") {
			Err(CniError::NoConfigsFound { .. }) => {}
			other => panic!("unexpected: {:?}", other),
		}

		// a conflist exists but doesn't match, and no single confs exist:
		// this is "not found", not "no configs found"
		fs::write(dir.path().join("10-other.conflist"), br#"{"name": "other", "plugins": [{"type": "a"}]}"#).unwrap();
		match load_conflist(dir.path(), "mynet") {
			Err(CniError::NotFound { name, .. }) => assert_eq!(name, "mynet"),
			other => panic!("unexpected: {:?}", other),
		}
	}

	#[test]
	fn load_conf_sorted_first_match_wins() {
		let dir = tempdir().unwrap();
		fs::write(
			dir.path().join("20-b.conf"),
			br#"{"name": "mynet", "type": "second"}"#,
		)
		.unwrap();
		fs::write(
			dir.path().join("10-a.conf"),
			br#"{"name": "mynet", "type": "first"}"#,
		)
		.unwrap();

		let conf = load_conf(dir.path(), "mynet").unwrap();
		assert_eq!(conf.network.plugin_type, "first");
	}
}
