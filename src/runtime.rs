//! The orchestrator: driving plugin chains over a network configuration.
//!
//! [`CniConfig`] implements the runtime half of the CNI contract. Every
//! operation is a fresh traversal of the configured plugin list: per plugin
//! it synthesizes the stdin document (injecting the effective name, version,
//! capability-gated `runtimeConfig`, and the chained `prevResult`), builds
//! the `CNI_*` environment, executes the plugin through an [`Exec`], and
//! decodes what comes back. No state survives between operations.
//!
//! Operations are sequential within a chain and block until the chain
//! completes or fails. Dropping the future cancels the running plugin and
//! abandons the chain; callers wanting deadlines wrap calls in
//! [`tokio::time::timeout`]. Concurrent operations on the same container
//! and interface are the caller's to serialize.

use std::{collections::HashMap, fs, path::PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::args::{Args, CniArgs};
use crate::config::{inject_conf, NetworkConfig, NetworkConfigList};
use crate::error::CniError;
use crate::exec::{Exec, RawExec};
use crate::result::{self, CniResult};
use crate::utils;
use crate::version::{self, PluginInfo};

/// Per-invocation inputs: which container, which namespace, which interface.
#[derive(Clone, Debug, Default)]
pub struct RuntimeConf {
	/// The container ID. Alphanumeric plus `_`, `.` and `-`; no slashes.
	pub container_id: String,

	/// The network namespace path. May be empty for some DEL cases.
	pub netns: String,

	/// The interface name inside the container.
	pub ifname: String,

	/// Extra key/value arguments, passed to plugins via `CNI_ARGS`.
	/// Duplicates are allowed; later entries win with most consumers.
	pub args: Vec<(String, String)>,

	/// Capability payloads. Each entry reaches a plugin as `runtimeConfig`
	/// only if that plugin declares the capability in its configuration.
	pub capability_args: HashMap<String, Value>,
}

/// One attachment the runtime still considers valid, for GC.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct GcAttachment {
	/// The container ID of the attachment.
	#[serde(rename = "containerID")]
	pub container_id: String,

	/// The interface name of the attachment.
	pub ifname: String,
}

/// Arguments to [`CniConfig::gc_network_list`].
#[derive(Clone, Debug, Default)]
pub struct GcArgs {
	/// Every attachment that must survive collection.
	pub valid_attachments: Vec<GcAttachment>,
}

/// The CNI runtime: plugin search paths, an executor, and optionally a
/// directory to cache attachment results under.
pub struct CniConfig<E = RawExec> {
	/// Directories searched for plugin executables, in order.
	pub paths: Vec<PathBuf>,

	exec: E,
	cache_dir: Option<PathBuf>,
}

impl CniConfig<RawExec> {
	/// A runtime over the given plugin search paths, executing plugins as
	/// child processes.
	pub fn new(paths: Vec<PathBuf>) -> Self {
		Self::with_exec(paths, RawExec::default())
	}
}

impl<E: Exec> CniConfig<E> {
	/// A runtime with a custom executor.
	pub fn with_exec(paths: Vec<PathBuf>, exec: E) -> Self {
		Self {
			paths,
			exec,
			cache_dir: None,
		}
	}

	/// Cache attachment results under `dir`.
	///
	/// Only [`CniConfig::get_network_list_cached_result`] reads the cache;
	/// chain operations never depend on it.
	pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.cache_dir = Some(dir.into());
		self
	}

	/// Add the container to the network, invoking every plugin in list
	/// order and threading each result into the next plugin's stdin.
	///
	/// Returns the final plugin's result. A failure anywhere aborts the
	/// chain; plugins that already succeeded are not rolled back (that is
	/// the caller's concern, typically via DEL).
	pub async fn add_network_list(
		&self,
		list: &NetworkConfigList,
		rt: &RuntimeConf,
	) -> Result<CniResult, CniError> {
		validate_runtime_conf(rt)?;
		if list.plugins.is_empty() {
			return Err(CniError::InvalidConfig("no plugins in list".into()));
		}

		debug!("adding network list {}", list.name);
		let mut prev: Option<CniResult> = None;
		for net in &list.plugins {
			let result = self
				.add_plugin(&list.name, &list.cni_version, net, prev.as_ref(), rt)
				.await?;
			prev = Some(result);
		}

		// UNWRAP: the list was checked non-empty above
		let result = prev.unwrap();

		if let Err(err) = self.cache_result(&list.name, rt, &result) {
			warn!("failed to cache result for network {}: {}", list.name, err);
		}

		Ok(result)
	}

	/// Check the container's networking, invoking every plugin in list
	/// order. No result is propagated; success is empty.
	///
	/// Refused for configurations older than spec 0.4.0, which did not have
	/// CHECK. A list with `disableCheck` succeeds without invoking anything.
	pub async fn check_network_list(
		&self,
		list: &NetworkConfigList,
		rt: &RuntimeConf,
	) -> Result<(), CniError> {
		validate_runtime_conf(rt)?;

		if list.disable_check {
			debug!("check disabled for network list {}", list.name);
			return Ok(());
		}

		let config_version = effective_version(&list.cni_version);
		if !version::greater_than_or_equal_to(config_version, "0.4.0")? {
			return Err(CniError::Incompatible {
				config: config_version.into(),
				supported: vec!["0.4.0".into(), "1.0.0".into(), "1.1.0".into()],
			});
		}

		debug!("checking network list {}", list.name);
		for net in &list.plugins {
			self.run_plugin("CHECK", &list.name, &list.cni_version, net, rt)
				.await?;
		}

		Ok(())
	}

	/// Remove the container from the network, invoking plugins in reverse
	/// list order.
	///
	/// A failing plugin does not stop teardown of the rest of the chain;
	/// the first failure is reported once every plugin has been offered the
	/// DEL.
	pub async fn del_network_list(
		&self,
		list: &NetworkConfigList,
		rt: &RuntimeConf,
	) -> Result<(), CniError> {
		validate_runtime_conf(rt)?;

		debug!("deleting network list {}", list.name);
		let mut first_error = None;
		for net in list.plugins.iter().rev() {
			if let Err(err) = self
				.run_plugin("DEL", &list.name, &list.cni_version, net, rt)
				.await
			{
				warn!(
					"error deleting {} from network {}: {}",
					net.network.plugin_type, list.name, err
				);
				if first_error.is_none() {
					first_error = Some(err);
				}
			}
		}

		if let Some(err) = first_error {
			return Err(err);
		}

		if let Err(err) = self.drop_cached_result(&list.name, rt) {
			warn!(
				"failed to drop cached result for network {}: {}",
				list.name, err
			);
		}

		Ok(())
	}

	/// Garbage-collect the network, telling each plugin which attachments
	/// are still valid.
	///
	/// Requires spec 1.1.0. Only plugins whose advertised versions admit
	/// the config version are invoked; failures are collected rather than
	/// short-circuiting, so every plugin gets its chance to collect.
	pub async fn gc_network_list(
		&self,
		list: &NetworkConfigList,
		gc_args: &GcArgs,
	) -> Result<(), CniError> {
		let config_version = effective_version(&list.cni_version);
		if !version::greater_than_or_equal_to(config_version, "1.1.0")? {
			return Err(CniError::Incompatible {
				config: config_version.into(),
				supported: vec!["1.1.0".into()],
			});
		}

		let attachments = serde_json::to_value(&gc_args.valid_attachments)?;

		let mut failures = Vec::new();
		for net in &list.plugins {
			match self.plugin_supports(&net.network.plugin_type, config_version).await {
				Ok(true) => {}
				Ok(false) => {
					debug!(
						"skipping {} for GC: does not support {}",
						net.network.plugin_type, config_version
					);
					continue;
				}
				Err(err) => {
					failures.push(err.to_string());
					continue;
				}
			}

			let mut inject = Map::new();
			inject.insert("name".into(), Value::String(list.name.clone()));
			inject.insert(
				"cniVersion".into(),
				Value::String(list.cni_version.clone()),
			);
			inject.insert("cni.dev/valid-attachments".into(), attachments.clone());

			let run = match inject_conf(net, &inject) {
				Ok(conf) => self.invoke(&conf, "GC", &RuntimeConf::default()).await,
				Err(err) => Err(err),
			};
			if let Err(err) = run {
				failures.push(format!("{}: {}", net.network.plugin_type, err));
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			Err(CniError::Gc(failures))
		}
	}

	/// Query plugin readiness for the network.
	///
	/// Requires spec 1.1.0. Plugins that do not advertise support for the
	/// config version are skipped; any other plugin failing the STATUS
	/// probe fails the call.
	pub async fn get_status_network_list(
		&self,
		list: &NetworkConfigList,
	) -> Result<(), CniError> {
		let config_version = effective_version(&list.cni_version);
		if !version::greater_than_or_equal_to(config_version, "1.1.0")? {
			return Err(CniError::Incompatible {
				config: config_version.into(),
				supported: vec!["1.1.0".into()],
			});
		}

		for net in &list.plugins {
			if !self
				.plugin_supports(&net.network.plugin_type, config_version)
				.await?
			{
				debug!(
					"skipping {} for STATUS: does not support {}",
					net.network.plugin_type, config_version
				);
				continue;
			}

			let mut inject = Map::new();
			inject.insert("name".into(), Value::String(list.name.clone()));
			inject.insert(
				"cniVersion".into(),
				Value::String(list.cni_version.clone()),
			);
			let conf = inject_conf(net, &inject)?;
			self.invoke(&conf, "STATUS", &RuntimeConf::default()).await?;
		}

		Ok(())
	}

	/// Add the container to a single network, outside of any list.
	pub async fn add_network(
		&self,
		net: &NetworkConfig,
		rt: &RuntimeConf,
	) -> Result<CniResult, CniError> {
		validate_runtime_conf(rt)?;
		self.add_plugin(&net.network.name, &net.network.cni_version, net, None, rt)
			.await
	}

	/// Check the container against a single network.
	pub async fn check_network(
		&self,
		net: &NetworkConfig,
		rt: &RuntimeConf,
	) -> Result<(), CniError> {
		validate_runtime_conf(rt)?;

		let config_version = effective_version(&net.network.cni_version);
		if !version::greater_than_or_equal_to(config_version, "0.4.0")? {
			return Err(CniError::Incompatible {
				config: config_version.into(),
				supported: vec!["0.4.0".into(), "1.0.0".into(), "1.1.0".into()],
			});
		}

		self.run_plugin("CHECK", &net.network.name, &net.network.cni_version, net, rt)
			.await
	}

	/// Remove the container from a single network.
	pub async fn del_network(&self, net: &NetworkConfig, rt: &RuntimeConf) -> Result<(), CniError> {
		validate_runtime_conf(rt)?;
		self.run_plugin("DEL", &net.network.name, &net.network.cni_version, net, rt)
			.await
	}

	/// Validate a network configuration list without side effects: names,
	/// version, and that every plugin binary exists and supports the
	/// version. Returns the plugin types in chain order.
	pub async fn validate_network_list(
		&self,
		list: &NetworkConfigList,
	) -> Result<Vec<String>, CniError> {
		utils::validate_network_name(&list.name)?;
		if list.plugins.is_empty() {
			return Err(CniError::InvalidConfig("no plugins in list".into()));
		}

		let config_version = effective_version(&list.cni_version);
		version::parse(config_version)?;

		let mut plugin_types = Vec::with_capacity(list.plugins.len());
		for net in &list.plugins {
			if net.network.plugin_type.is_empty() {
				return Err(CniError::InvalidConfig("missing plugin type".into()));
			}
			self.check_plugin_version(&net.network.plugin_type, config_version)
				.await?;
			plugin_types.push(net.network.plugin_type.clone());
		}

		Ok(plugin_types)
	}

	/// Probe a plugin for the spec versions it supports.
	///
	/// This is one `CNI_COMMAND=VERSION` invocation with an empty config
	/// document under this library's version on stdin.
	pub async fn version_info(&self, plugin_type: &str) -> Result<PluginInfo, CniError> {
		let plugin_path = self.exec.find_in_path(plugin_type, &self.paths)?;

		let stdin = serde_json::to_vec(&serde_json::json!({ "cniVersion": version::CURRENT }))?;
		let args = self.args("VERSION", &RuntimeConf::default());

		let stdout = self
			.exec
			.exec_plugin(&plugin_path, &stdin, args.as_env())
			.await?;

		serde_json::from_slice(&stdout).map_err(|err| {
			CniError::Decoding(format!(
				"cannot decode version info from plugin {}: {}",
				plugin_type, err
			))
		})
	}

	/// Read back the result cached by the last successful
	/// [`add_network_list`][CniConfig::add_network_list] for this network
	/// and attachment, if any.
	pub fn get_network_list_cached_result(
		&self,
		list: &NetworkConfigList,
		rt: &RuntimeConf,
	) -> Result<Option<CniResult>, CniError> {
		let path = match self.cache_file(&list.name, rt) {
			Some(path) => path,
			None => return Ok(None),
		};

		match fs::read(&path) {
			Ok(bytes) => result::create_from_bytes(&bytes).map(Some),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err.into()),
		}
	}

	async fn add_plugin(
		&self,
		name: &str,
		cni_version: &str,
		net: &NetworkConfig,
		prev: Option<&CniResult>,
		rt: &RuntimeConf,
	) -> Result<CniResult, CniError> {
		self.check_plugin_version(&net.network.plugin_type, effective_version(cni_version))
			.await?;

		let conf = self.build_one_config(name, cni_version, net, prev, rt)?;
		let stdout = self.invoke(&conf, "ADD", rt).await?;
		result::create_from_bytes(&stdout)
	}

	async fn run_plugin(
		&self,
		command: &str,
		name: &str,
		cni_version: &str,
		net: &NetworkConfig,
		rt: &RuntimeConf,
	) -> Result<(), CniError> {
		self.check_plugin_version(&net.network.plugin_type, effective_version(cni_version))
			.await?;

		let conf = self.build_one_config(name, cni_version, net, None, rt)?;
		self.invoke(&conf, command, rt).await?;
		Ok(())
	}

	async fn invoke(
		&self,
		conf: &NetworkConfig,
		command: &str,
		rt: &RuntimeConf,
	) -> Result<Vec<u8>, CniError> {
		let plugin_path = self
			.exec
			.find_in_path(&conf.network.plugin_type, &self.paths)?;
		let args = self.args(command, rt);

		debug!(
			"invoking {} at {} for command={}",
			conf.network.plugin_type,
			plugin_path.display(),
			command
		);
		self.exec
			.exec_plugin(&plugin_path, &conf.bytes, args.as_env())
			.await
	}

	/// Compute the stdin document for one plugin invocation.
	///
	/// The plugin's own bytes are merged (never edited in place) with the
	/// list-effective name and version, the capability-selected
	/// `runtimeConfig`, and the previous result re-encoded under the list's
	/// version.
	fn build_one_config(
		&self,
		name: &str,
		cni_version: &str,
		net: &NetworkConfig,
		prev: Option<&CniResult>,
		rt: &RuntimeConf,
	) -> Result<NetworkConfig, CniError> {
		let mut inject = Map::new();
		inject.insert("name".into(), Value::String(name.into()));
		inject.insert("cniVersion".into(), Value::String(cni_version.into()));

		if let Some(prev) = prev {
			let reversioned = prev.as_version(effective_version(cni_version))?;
			inject.insert("prevResult".into(), reversioned.to_value()?);
		}

		let mut runtime_config = Map::new();
		for (capability, enabled) in &net.network.capabilities {
			if !enabled {
				continue;
			}
			if let Some(payload) = rt.capability_args.get(capability) {
				runtime_config.insert(capability.clone(), payload.clone());
			}
		}
		if !runtime_config.is_empty() {
			inject.insert("runtimeConfig".into(), Value::Object(runtime_config));
		}

		inject_conf(net, &inject)
	}

	async fn check_plugin_version(
		&self,
		plugin_type: &str,
		config_version: &str,
	) -> Result<(), CniError> {
		self.version_info(plugin_type).await?.require(config_version)
	}

	async fn plugin_supports(
		&self,
		plugin_type: &str,
		config_version: &str,
	) -> Result<bool, CniError> {
		Ok(self.version_info(plugin_type).await?.supports(config_version))
	}

	fn args(&self, command: &str, rt: &RuntimeConf) -> Args {
		Args {
			command: command.into(),
			container_id: rt.container_id.clone(),
			netns: rt.netns.clone(),
			plugin_args: rt.args.clone(),
			plugin_args_str: String::new(),
			ifname: rt.ifname.clone(),
			path: self.path_string(),
		}
	}

	fn path_string(&self) -> String {
		std::env::join_paths(&self.paths)
			.map(|joined| joined.to_string_lossy().into_owned())
			.unwrap_or_else(|_| {
				self.paths
					.iter()
					.map(|p| p.to_string_lossy().into_owned())
					.collect::<Vec<_>>()
					.join(":")
			})
	}

	fn cache_file(&self, netname: &str, rt: &RuntimeConf) -> Option<PathBuf> {
		self.cache_dir.as_ref().map(|dir| {
			let id_part = if rt.container_id.len() > 12 {
				&rt.container_id[..12]
			} else {
				&rt.container_id
			};
			dir.join(netname)
				.join(format!("{}-{}.result", id_part, rt.ifname))
		})
	}

	fn cache_result(
		&self,
		netname: &str,
		rt: &RuntimeConf,
		result: &CniResult,
	) -> Result<(), CniError> {
		let path = match self.cache_file(netname, rt) {
			Some(path) => path,
			None => return Ok(()),
		};

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&path, serde_json::to_vec(&result.to_value()?)?)?;
		debug!("cached result at {}", path.display());
		Ok(())
	}

	fn drop_cached_result(&self, netname: &str, rt: &RuntimeConf) -> Result<(), CniError> {
		if let Some(path) = self.cache_file(netname, rt) {
			match fs::remove_file(&path) {
				Ok(()) => {}
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
				Err(err) => return Err(err.into()),
			}
		}
		Ok(())
	}
}

fn validate_runtime_conf(rt: &RuntimeConf) -> Result<(), CniError> {
	utils::validate_container_id(&rt.container_id)?;
	utils::validate_interface_name(&rt.ifname)?;
	Ok(())
}

fn effective_version(cni_version: &str) -> &str {
	if cni_version.is_empty() {
		"0.1.0"
	} else {
		cni_version
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::conflist_from_bytes;
	use async_trait::async_trait;
	use std::path::Path;
	use std::sync::Mutex;

	const LIST: &str = r#"{
		"cniVersion": "1.0.0",
		"name": "testnet",
		"plugins": [
			{"type": "first"},
			{"type": "second", "capabilities": {"portMappings": true, "bandwidth": false}}
		]
	}"#;

	const FIRST_REPLY: &str =
		r#"{"cniVersion":"1.0.0","ips":[{"address":"10.0.0.2/24"}],"interfaces":[{"name":"eth0"}]}"#;
	const SECOND_REPLY: &str =
		r#"{"cniVersion":"1.0.0","ips":[{"address":"10.0.0.2/24"},{"address":"10.0.0.3/24"}]}"#;

	#[derive(Clone, Debug)]
	struct Call {
		command: String,
		plugin: String,
		stdin: Vec<u8>,
		env: Vec<String>,
	}

	struct MockExec {
		calls: Mutex<Vec<Call>>,
		supported: Vec<String>,
		// plugin type → scripted ADD/CHECK/DEL/GC/STATUS behaviour
		replies: HashMap<String, Result<Vec<u8>, crate::reply::ErrorReply>>,
	}

	impl MockExec {
		fn new(supported: &[&str]) -> Self {
			Self {
				calls: Mutex::new(Vec::new()),
				supported: supported.iter().map(|v| (*v).to_string()).collect(),
				replies: HashMap::new(),
			}
		}

		fn reply(mut self, plugin: &str, stdout: &str) -> Self {
			self.replies
				.insert(plugin.into(), Ok(stdout.as_bytes().to_vec()));
			self
		}

		fn fail(mut self, plugin: &str, code: u32, msg: &str) -> Self {
			self.replies.insert(
				plugin.into(),
				Err(crate::reply::ErrorReply {
					cni_version: Some("1.0.0".into()),
					code,
					msg: msg.into(),
					details: String::new(),
				}),
			);
			self
		}

		fn calls(&self) -> Vec<Call> {
			self.calls.lock().unwrap().clone()
		}

		fn commands(&self) -> Vec<(String, String)> {
			self.calls()
				.into_iter()
				.map(|c| (c.command, c.plugin))
				.collect()
		}
	}

	fn env_value(env: &[String], key: &str) -> Option<String> {
		let prefix = format!("{}=", key);
		env.iter()
			.find(|e| e.starts_with(&prefix))
			.map(|e| e[prefix.len()..].to_string())
	}

	#[async_trait]
	impl Exec for MockExec {
		async fn exec_plugin(
			&self,
			plugin_path: &Path,
			stdin_data: &[u8],
			environ: Vec<String>,
		) -> Result<Vec<u8>, CniError> {
			let plugin = plugin_path
				.file_name()
				.unwrap()
				.to_string_lossy()
				.into_owned();
			let command = env_value(&environ, "CNI_COMMAND").unwrap_or_default();
			self.calls.lock().unwrap().push(Call {
				command: command.clone(),
				plugin: plugin.clone(),
				stdin: stdin_data.to_vec(),
				env: environ,
			});

			if command == "VERSION" {
				let supported: Vec<&str> = self.supported.iter().map(|s| s.as_str()).collect();
				return Ok(serde_json::to_vec(&PluginInfo::only(&supported)).unwrap());
			}

			match self.replies.get(&plugin) {
				Some(Ok(stdout)) => Ok(stdout.clone()),
				Some(Err(reply)) => Err(CniError::Plugin(reply.clone())),
				None => Ok(Vec::new()),
			}
		}

		fn find_in_path(&self, plugin: &str, _paths: &[PathBuf]) -> Result<PathBuf, CniError> {
			Ok(PathBuf::from("/opt/cni/bin").join(plugin))
		}
	}

	fn runtime_conf() -> RuntimeConf {
		RuntimeConf {
			container_id: "ctr-1".into(),
			netns: "/var/run/netns/blue".into(),
			ifname: "eth0".into(),
			args: vec![("K8S_POD_NAME".into(), "pod".into())],
			capability_args: HashMap::new(),
		}
	}

	fn cni(exec: MockExec) -> CniConfig<MockExec> {
		CniConfig::with_exec(vec![PathBuf::from("/opt/cni/bin")], exec)
	}

	#[tokio::test]
	async fn add_runs_forward_and_threads_prev_result() {
		let exec = MockExec::new(&["0.4.0", "1.0.0", "1.1.0"])
			.reply("first", FIRST_REPLY)
			.reply("second", SECOND_REPLY);
		let cni = cni(exec);
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let result = cni.add_network_list(&list, &runtime_conf()).await.unwrap();
		assert_eq!(
			result.to_value().unwrap(),
			serde_json::from_str::<Value>(SECOND_REPLY).unwrap()
		);

		let commands = cni.exec.commands();
		assert_eq!(
			commands,
			vec![
				("VERSION".to_string(), "first".to_string()),
				("ADD".to_string(), "first".to_string()),
				("VERSION".to_string(), "second".to_string()),
				("ADD".to_string(), "second".to_string()),
			]
		);

		let calls = cni.exec.calls();
		let first_add = &calls[1];
		let first_stdin: Value = serde_json::from_slice(&first_add.stdin).unwrap();
		assert_eq!(first_stdin["name"], "testnet");
		assert_eq!(first_stdin["cniVersion"], "1.0.0");
		assert!(first_stdin.get("prevResult").is_none());
		assert_eq!(env_value(&first_add.env, "CNI_COMMAND").unwrap(), "ADD");
		assert_eq!(env_value(&first_add.env, "CNI_IFNAME").unwrap(), "eth0");
		assert_eq!(env_value(&first_add.env, "CNI_CONTAINERID").unwrap(), "ctr-1");
		assert_eq!(
			env_value(&first_add.env, "CNI_ARGS").unwrap(),
			"K8S_POD_NAME=pod"
		);

		let second_add = &calls[3];
		let second_stdin: Value = serde_json::from_slice(&second_add.stdin).unwrap();
		assert_eq!(
			second_stdin["prevResult"],
			serde_json::from_str::<Value>(FIRST_REPLY).unwrap()
		);
	}

	#[tokio::test]
	async fn prev_result_is_reversioned_to_list_version() {
		let list_json = r#"{
			"cniVersion": "0.4.0",
			"name": "testnet",
			"plugins": [{"type": "first"}, {"type": "second"}]
		}"#;
		// the first plugin replies with a 1.0.0 result even though the list
		// is 0.4.0; the chain re-encodes it before handing it on
		let exec = MockExec::new(&["0.4.0", "1.0.0"])
			.reply("first", FIRST_REPLY)
			.reply("second", r#"{"cniVersion":"0.4.0"}"#);
		let cni = cni(exec);
		let list = conflist_from_bytes(list_json.as_bytes()).unwrap();

		cni.add_network_list(&list, &runtime_conf()).await.unwrap();

		let calls = cni.exec.calls();
		let second_stdin: Value = serde_json::from_slice(&calls[3].stdin).unwrap();
		assert_eq!(second_stdin["prevResult"]["cniVersion"], "0.4.0");
		// the 0.4.0 schema tags every address with its family
		assert_eq!(second_stdin["prevResult"]["ips"][0]["version"], "4");
	}

	#[tokio::test]
	async fn capability_args_are_filtered_by_declared_capabilities() {
		let exec = MockExec::new(&["1.0.0"])
			.reply("first", FIRST_REPLY)
			.reply("second", SECOND_REPLY);
		let cni = cni(exec);
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let mut rt = runtime_conf();
		rt.capability_args.insert(
			"portMappings".into(),
			serde_json::json!([{"hostPort": 8080, "containerPort": 80}]),
		);
		rt.capability_args
			.insert("bandwidth".into(), serde_json::json!({"ingressRate": 1}));
		rt.capability_args
			.insert("ipRanges".into(), serde_json::json!([]));

		cni.add_network_list(&list, &rt).await.unwrap();

		let calls = cni.exec.calls();
		// "first" declares no capabilities at all
		let first_stdin: Value = serde_json::from_slice(&calls[1].stdin).unwrap();
		assert!(first_stdin.get("runtimeConfig").is_none());

		// "second" declares portMappings enabled and bandwidth disabled
		let second_stdin: Value = serde_json::from_slice(&calls[3].stdin).unwrap();
		let runtime_config = &second_stdin["runtimeConfig"];
		assert!(runtime_config.get("portMappings").is_some());
		assert!(runtime_config.get("bandwidth").is_none());
		assert!(runtime_config.get("ipRanges").is_none());
	}

	#[tokio::test]
	async fn del_runs_in_reverse_and_reports_failure_after_finishing() {
		let exec = MockExec::new(&["1.0.0"])
			.reply("first", "")
			.fail("second", 3, "unknown container");
		let cni = cni(exec);
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let err = cni
			.del_network_list(&list, &runtime_conf())
			.await
			.unwrap_err();
		assert_eq!(err.code(), 3);

		let commands = cni.exec.commands();
		assert_eq!(
			commands,
			vec![
				("VERSION".to_string(), "second".to_string()),
				("DEL".to_string(), "second".to_string()),
				("VERSION".to_string(), "first".to_string()),
				("DEL".to_string(), "first".to_string()),
			]
		);
	}

	#[tokio::test]
	async fn check_is_refused_below_040_without_invoking_plugins() {
		let list_json = r#"{
			"cniVersion": "0.3.0",
			"name": "testnet",
			"plugins": [{"type": "first"}]
		}"#;
		let cni = cni(MockExec::new(&["0.3.0", "0.4.0"]));
		let list = conflist_from_bytes(list_json.as_bytes()).unwrap();

		let err = cni
			.check_network_list(&list, &runtime_conf())
			.await
			.unwrap_err();
		assert!(matches!(err, CniError::Incompatible { .. }));
		assert_eq!(err.code(), 1);
		assert!(cni.exec.calls().is_empty());
	}

	#[tokio::test]
	async fn check_respects_disable_check() {
		let list_json = r#"{
			"cniVersion": "1.0.0",
			"name": "testnet",
			"disableCheck": true,
			"plugins": [{"type": "first"}]
		}"#;
		let cni = cni(MockExec::new(&["1.0.0"]));
		let list = conflist_from_bytes(list_json.as_bytes()).unwrap();

		cni.check_network_list(&list, &runtime_conf())
			.await
			.unwrap();
		assert!(cni.exec.calls().is_empty());
	}

	#[tokio::test]
	async fn version_mismatch_stops_before_the_command() {
		let exec = MockExec::new(&["0.4.0"]).reply("first", FIRST_REPLY);
		let cni = cni(exec);
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let err = cni
			.add_network_list(&list, &runtime_conf())
			.await
			.unwrap_err();
		match err {
			CniError::Incompatible { config, supported } => {
				assert_eq!(config, "1.0.0");
				assert_eq!(supported, vec!["0.4.0".to_string()]);
			}
			other => panic!("unexpected: {:?}", other),
		}

		let commands = cni.exec.commands();
		assert_eq!(commands, vec![("VERSION".to_string(), "first".to_string())]);
	}

	#[tokio::test]
	async fn gc_requires_110_and_delivers_attachments() {
		let list_json = r#"{
			"cniVersion": "1.1.0",
			"name": "testnet",
			"plugins": [{"type": "first"}]
		}"#;
		let exec = MockExec::new(&["1.0.0", "1.1.0"]).reply("first", "");
		let cni = cni(exec);
		let list = conflist_from_bytes(list_json.as_bytes()).unwrap();

		let gc_args = GcArgs {
			valid_attachments: vec![GcAttachment {
				container_id: "ctr-1".into(),
				ifname: "eth0".into(),
			}],
		};
		cni.gc_network_list(&list, &gc_args).await.unwrap();

		let calls = cni.exec.calls();
		let gc_call = calls.iter().find(|c| c.command == "GC").unwrap();
		let stdin: Value = serde_json::from_slice(&gc_call.stdin).unwrap();
		assert_eq!(
			stdin["cni.dev/valid-attachments"][0]["containerID"],
			"ctr-1"
		);

		// too old a config is refused outright
		let old = conflist_from_bytes(LIST.as_bytes()).unwrap();
		let err = cni.gc_network_list(&old, &gc_args).await.unwrap_err();
		assert_eq!(err.code(), 1);
	}

	#[tokio::test]
	async fn status_skips_plugins_without_support() {
		let list_json = r#"{
			"cniVersion": "1.1.0",
			"name": "testnet",
			"plugins": [{"type": "first"}]
		}"#;
		// plugin only talks 1.0.0, so STATUS must skip it and succeed
		let cni = cni(MockExec::new(&["1.0.0"]));
		let list = conflist_from_bytes(list_json.as_bytes()).unwrap();

		cni.get_status_network_list(&list).await.unwrap();
		let commands = cni.exec.commands();
		assert!(commands.iter().all(|(cmd, _)| cmd != "STATUS"));
	}

	#[tokio::test]
	async fn invalid_runtime_conf_is_rejected_up_front() {
		let cni = cni(MockExec::new(&["1.0.0"]));
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let mut rt = runtime_conf();
		rt.ifname = "eth/0".into();
		assert!(cni.add_network_list(&list, &rt).await.is_err());

		let mut rt = runtime_conf();
		rt.container_id = "bad id".into();
		assert!(cni.del_network_list(&list, &rt).await.is_err());

		assert!(cni.exec.calls().is_empty());
	}

	#[tokio::test]
	async fn cached_result_lifecycle() {
		let cache = tempfile::tempdir().unwrap();
		let exec = MockExec::new(&["1.0.0"])
			.reply("first", FIRST_REPLY)
			.reply("second", SECOND_REPLY);
		let cni = CniConfig::with_exec(vec![PathBuf::from("/opt/cni/bin")], exec)
			.with_cache_dir(cache.path());
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();
		let rt = runtime_conf();

		assert!(cni
			.get_network_list_cached_result(&list, &rt)
			.unwrap()
			.is_none());

		cni.add_network_list(&list, &rt).await.unwrap();
		let cached = cni
			.get_network_list_cached_result(&list, &rt)
			.unwrap()
			.expect("cached result");
		assert_eq!(
			cached.to_value().unwrap(),
			serde_json::from_str::<Value>(SECOND_REPLY).unwrap()
		);

		cni.del_network_list(&list, &rt).await.unwrap();
		assert!(cni
			.get_network_list_cached_result(&list, &rt)
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn validate_network_list_returns_types() {
		let exec = MockExec::new(&["1.0.0"]);
		let cni = cni(exec);
		let list = conflist_from_bytes(LIST.as_bytes()).unwrap();

		let types = cni.validate_network_list(&list).await.unwrap();
		assert_eq!(types, vec!["first".to_string(), "second".to_string()]);
	}
}
