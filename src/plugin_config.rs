//! The typed view of a plugin's STDIN configuration.
//!
//! This is the structure the dispatcher hands to plugin handlers, not the
//! byte-preserving model the runtime assembles stdin from (that is
//! [`config`][crate::config]). It covers all fields described by the spec,
//! plus a `specific` map which catches any custom fields present at the top
//! level of the configuration.

use std::collections::HashMap;

use ipnetwork::IpNetwork;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::dns::Dns;
use crate::result::MacAddr;
use crate::runtime::GcAttachment;

/// Top-level network configuration, as a plugin receives it.
///
/// By the time this reaches a plugin, the runtime has already merged in the
/// effective `name`, `cniVersion`, `runtimeConfig` and (in a chain)
/// `prevResult`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
	/// Version of the CNI spec to which this configuration conforms.
	///
	/// An absent or empty version on the wire reads as 0.1.0.
	#[serde(deserialize_with = "crate::version::deserialize_config_version")]
	#[serde(serialize_with = "crate::version::serialize_version")]
	#[serde(default = "default_version")]
	pub cni_version: Version,

	/// Name of the network configuration, unique across configurations on a
	/// host.
	pub name: String,

	/// Name of the plugin binary on disk.
	///
	/// This is called `type` in the JSON. A delegated sub-plugin receives
	/// the full configuration of its parent, so this field doesn't
	/// necessarily match the running binary's own name.
	#[serde(rename = "type")]
	pub plugin_type: String,

	/// Arbitrary arguments passed by the runtime.
	///
	/// Plugins are free to ignore these. This replaces the older `CNI_ARGS`
	/// environment variable.
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub args: HashMap<String, Value>,

	/// Set up an IP masquerade on the host for this network, if the plugin
	/// supports it.
	#[serde(default)]
	pub ip_masq: bool,

	/// IP Address Management sub-config.
	///
	/// If present, and if the plugin supports it, the IPAM plugin named by
	/// its `type` must be invoked via delegation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ipam: Option<IpamConfig>,

	/// DNS settings sourced from the administrative configuration.
	///
	/// Runtime-provided DNS settings arrive in [`RuntimeConfig`] instead.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dns: Option<Dns>,

	/// Dynamic information provided by the runtime, gated by the
	/// capabilities the plugin declared in the administrative config.
	///
	/// Unlike `args`, plugins are expected to act on this data.
	#[serde(
		default,
		rename = "runtimeConfig",
		skip_serializing_if = "Option::is_none"
	)]
	pub runtime: Option<RuntimeConfig>,

	/// The result of the previous plugin in a chain.
	///
	/// Most likely a [`SuccessReply`][crate::reply::SuccessReply]; use
	/// [`serde_json::from_value`] to reinterpret it. A plugin given a
	/// `prev_result` must output it as its own result, with its
	/// modifications applied.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prev_result: Option<Value>,

	/// The attachments still valid, for `GC` (CNI 1.1).
	#[serde(
		default,
		rename = "cni.dev/valid-attachments",
		skip_serializing_if = "Option::is_none"
	)]
	pub valid_attachments: Option<Vec<GcAttachment>>,

	/// Custom top-level fields, aggregated by serde's `flatten`.
	#[serde(flatten)]
	pub specific: HashMap<String, Value>,
}

fn default_version() -> Version {
	Version::new(0, 1, 0)
}

/// IP Address Management configuration.
///
/// IPAM plugins are invoked with the full [`PluginConfig`] as input, but
/// should take their configuration from this section only.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfig {
	/// Name of the IPAM plugin binary on disk.
	///
	/// This is called `type` in the JSON.
	#[serde(rename = "type")]
	pub plugin_type: String,

	/// All other IPAM fields; the spec leaves their interpretation entirely
	/// to the plugin.
	#[serde(flatten)]
	pub specific: HashMap<String, Value>,
}

/// Dynamic information provided by the runtime.
///
/// All fields except `specific` are "well-known" capability payloads; not
/// every runtime implements all of them, and unknown ones land in the
/// `specific` map. Non-exhaustive as new well-known configs may be hoisted
/// out of `specific`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RuntimeConfig {
	/// List of port mappings from host to namespace to set up.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub port_mappings: Vec<PortMapping>,

	/// Bandwidth limits to set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bandwidth: Option<BandwidthLimits>,

	/// DNS configuration provided by the runtime.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dns: Option<Dns>,

	/// List of static IPs to use for IPAM.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ips: Vec<IpNetwork>,

	/// MAC address to use for the interface.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mac: Option<MacAddr>,

	/// List of names mapped to the IPs assigned to this interface.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub aliases: Vec<String>,

	/// Custom runtime fields.
	#[serde(flatten)]
	pub specific: HashMap<String, Value>,
}

/// Port mapping entry: a single forwarding of a port from the host to the
/// container namespace.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
	/// Port on the host.
	pub host_port: u16,

	/// Port in the namespace.
	pub container_port: u16,

	/// Protocol to forward; what to do when unset is up to the plugin.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub protocol: Option<PortProtocol>,
}

/// Protocol for a port.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PortProtocol {
	/// The TCP protocol.
	Tcp,

	/// The UDP protocol.
	Udp,
}

/// Bandwidth limits to set on the interface.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthLimits {
	/// Rate limit for incoming traffic in bits per second.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ingress_rate: Option<usize>,

	/// Burst limit for incoming traffic in bits.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ingress_burst: Option<usize>,

	/// Rate limit for outgoing traffic in bits per second.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub egress_rate: Option<usize>,

	/// Burst limit for outgoing traffic in bits.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub egress_burst: Option<usize>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn full_config_parses() {
		let stdin = br#"{
			"cniVersion": "1.0.0",
			"name": "mynet",
			"type": "portmap",
			"runtimeConfig": {
				"portMappings": [{"hostPort": 8080, "containerPort": 80, "protocol": "tcp"}]
			},
			"prevResult": {"cniVersion": "1.0.0", "ips": []},
			"customKnob": 3
		}"#;

		let config: PluginConfig = serde_json::from_slice(stdin).unwrap();
		assert_eq!(config.name, "mynet");
		assert_eq!(config.plugin_type, "portmap");
		assert_eq!(config.cni_version, Version::new(1, 0, 0));
		let runtime = config.runtime.unwrap();
		assert_eq!(runtime.port_mappings[0].host_port, 8080);
		assert!(config.prev_result.is_some());
		assert_eq!(config.specific["customKnob"], Value::from(3));
	}

	#[test]
	fn absent_version_reads_as_010() {
		let config: PluginConfig =
			serde_json::from_slice(br#"{"name": "n", "type": "t"}"#).unwrap();
		assert_eq!(config.cni_version, Version::new(0, 1, 0));

		let config: PluginConfig =
			serde_json::from_slice(br#"{"cniVersion": "", "name": "n", "type": "t"}"#).unwrap();
		assert_eq!(config.cni_version, Version::new(0, 1, 0));
	}

	#[test]
	fn gc_attachments_parse() {
		let stdin = br#"{
			"cniVersion": "1.1.0",
			"name": "mynet",
			"type": "bridge",
			"cni.dev/valid-attachments": [{"containerID": "ctr-1", "ifname": "eth0"}]
		}"#;

		let config: PluginConfig = serde_json::from_slice(stdin).unwrap();
		let attachments = config.valid_attachments.unwrap();
		assert_eq!(attachments[0].container_id, "ctr-1");
	}
}
