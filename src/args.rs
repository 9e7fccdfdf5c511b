//! Assembly of the `CNI_*` environment a plugin is invoked with.

use std::env;

use log::trace;

use crate::error::CniError;

/// Something that can render itself as a plugin process environment.
pub trait CniArgs {
	/// The full environment vector for the child process, as `key=value`
	/// entries with duplicates already resolved.
	fn as_env(&self) -> Vec<String>;
}

/// The full argument set for one plugin invocation.
///
/// [`as_env`][CniArgs::as_env] starts from the inherited process
/// environment; the `CNI_*` entries are appended after it and win on
/// conflict.
#[derive(Clone, Debug, Default)]
pub struct Args {
	/// The operation, e.g. `ADD`.
	pub command: String,

	/// The container ID.
	pub container_id: String,

	/// The network namespace path.
	pub netns: String,

	/// Extra key/value arguments. Duplicate keys are allowed; the serialized
	/// form keeps them all, later entries winning with most consumers.
	pub plugin_args: Vec<(String, String)>,

	/// Pre-serialized form of `plugin_args`; wins over it when non-empty.
	pub plugin_args_str: String,

	/// The interface name inside the container.
	pub ifname: String,

	/// The plugin search path list, separator-joined.
	pub path: String,
}

impl CniArgs for Args {
	fn as_env(&self) -> Vec<String> {
		let plugin_args_str = if self.plugin_args_str.is_empty() {
			stringify(&self.plugin_args)
		} else {
			self.plugin_args_str.clone()
		};

		let mut env = process_environ();
		env.push(format!("CNI_COMMAND={}", self.command));
		env.push(format!("CNI_CONTAINERID={}", self.container_id));
		env.push(format!("CNI_NETNS={}", self.netns));
		env.push(format!("CNI_ARGS={}", plugin_args_str));
		env.push(format!("CNI_IFNAME={}", self.ifname));
		env.push(format!("CNI_PATH={}", self.path));

		let env = dedup_env(env);
		trace!("plugin environment prepared, {} entries", env.len());
		env
	}
}

/// The argument set for recursive plugin invocation.
///
/// A delegating plugin already carries the right `CNI_*` environment; only
/// the command is overridden.
#[derive(Clone, Debug)]
pub struct DelegateArgs {
	/// The operation to delegate, e.g. `ADD`.
	pub command: String,
}

impl CniArgs for DelegateArgs {
	fn as_env(&self) -> Vec<String> {
		let mut env = process_environ();
		env.push(format!("CNI_COMMAND={}", self.command));
		dedup_env(env)
	}
}

fn process_environ() -> Vec<String> {
	env::vars_os()
		.filter_map(|(key, value)| {
			// skip entries that aren't valid UTF-8; they cannot carry CNI
			// semantics and would poison the key=value form
			match (key.into_string(), value.into_string()) {
				(Ok(key), Ok(value)) => Some(format!("{}={}", key, value)),
				_ => None,
			}
		})
		.collect()
}

/// Serialize key/value pairs into `CNI_ARGS` form: `k1=v1;k2=v2`.
pub fn stringify(plugin_args: &[(String, String)]) -> String {
	plugin_args
		.iter()
		.map(|(key, value)| format!("{}={}", key, value))
		.collect::<Vec<_>>()
		.join(";")
}

/// Parse a `CNI_ARGS` string back into ordered key/value pairs.
///
/// Every pair must be exactly `key=value` with both sides non-empty.
pub fn parse_args(args: &str) -> Result<Vec<(String, String)>, CniError> {
	let mut pairs = Vec::new();

	for pair in args.split(';') {
		let mut kv = pair.splitn(2, '=');
		match (kv.next(), kv.next()) {
			(Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
				pairs.push((key.to_string(), value.to_string()));
			}
			_ => {
				return Err(CniError::InvalidConfig(format!(
					"invalid CNI_ARGS pair {:?}",
					pair
				)));
			}
		}
	}

	Ok(pairs)
}

/// Remove duplicate keys from an environment vector, in favor of later
/// values.
///
/// Entries not of the normal `key=value` form are preserved unchanged. The
/// output keeps each key at the position it first appeared, which makes the
/// result deterministic.
fn dedup_env(env: Vec<String>) -> Vec<String> {
	let mut out: Vec<String> = Vec::with_capacity(env.len());
	let mut seen: Vec<(String, usize)> = Vec::new();

	for entry in env {
		match entry.find('=') {
			None => out.push(entry),
			Some(eq) => {
				let key = &entry[..eq];
				if let Some((_, index)) = seen.iter().find(|(k, _)| k == key) {
					out[*index] = entry.clone();
				} else {
					seen.push((key.to_string(), out.len()));
					out.push(entry);
				}
			}
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn args_roundtrip() {
		let pairs = parse_args("a=1;b=2").unwrap();
		assert_eq!(
			pairs,
			vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
		);
		assert_eq!(stringify(&pairs), "a=1;b=2");
	}

	#[test]
	fn args_reject_malformed() {
		assert!(parse_args("a=1;b").is_err());
		assert!(parse_args("=1").is_err());
		assert!(parse_args("a=").is_err());
	}

	#[test]
	fn args_value_may_contain_equals() {
		let pairs = parse_args("K8S_POD_NAME=x=y").unwrap();
		assert_eq!(pairs, vec![("K8S_POD_NAME".to_string(), "x=y".to_string())]);
	}

	#[test]
	fn dedup_keeps_last_value_once() {
		let out = dedup_env(vec!["X=1".into(), "X=2".into(), "Y=3".into()]);
		assert_eq!(out.iter().filter(|e| e.starts_with("X=")).count(), 1);
		assert!(out.contains(&"X=2".to_string()));
		assert!(out.contains(&"Y=3".to_string()));
	}

	#[test]
	fn dedup_passes_odd_entries_through() {
		let out = dedup_env(vec!["plain".into(), "A=1".into(), "plain".into()]);
		assert_eq!(out.iter().filter(|e| *e == "plain").count(), 2);
	}

	#[test]
	fn env_contains_exact_cni_set() {
		let args = Args {
			command: "ADD".into(),
			container_id: "ctr-1".into(),
			netns: "/var/run/netns/blue".into(),
			plugin_args: vec![("a".into(), "1".into())],
			plugin_args_str: String::new(),
			ifname: "eth0".into(),
			path: "/opt/cni/bin".into(),
		};
		let env = args.as_env();

		for expected in &[
			"CNI_COMMAND=ADD",
			"CNI_CONTAINERID=ctr-1",
			"CNI_NETNS=/var/run/netns/blue",
			"CNI_ARGS=a=1",
			"CNI_IFNAME=eth0",
			"CNI_PATH=/opt/cni/bin",
		] {
			assert_eq!(
				env.iter().filter(|e| e == expected).count(),
				1,
				"expected exactly one {:?}",
				expected
			);
		}
	}

	#[test]
	fn delegate_env_overrides_command_only() {
		std::env::set_var("CNI_COMMAND", "ADD");
		let env = DelegateArgs {
			command: "DEL".into(),
		}
		.as_env();
		assert_eq!(
			env.iter().filter(|e| e.starts_with("CNI_COMMAND=")).count(),
			1
		);
		assert!(env.contains(&"CNI_COMMAND=DEL".to_string()));
		std::env::remove_var("CNI_COMMAND");
	}
}
