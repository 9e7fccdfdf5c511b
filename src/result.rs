//! Versioned plugin results and the decoder registry.
//!
//! Plugins answer `ADD` with a JSON result document whose `cniVersion` field
//! identifies its schema. Three schema families cover the spec versions this
//! library knows: [`Result020`] (0.1.0, 0.2.0), [`Result040`] (0.3.0, 0.3.1,
//! 0.4.0) and [`Result100`] (1.0.0, 1.1.0). [`CniResult`] tags them into one
//! value that can be re-encoded or converted across versions, which is how
//! `prevResult` is re-versioned when threading a chain.

use std::{fmt, io::Write, net::IpAddr, str::FromStr};

use ipnetwork::IpNetwork;
use macaddr::{MacAddr6, ParseError};
use once_cell::sync::Lazy;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub use crate::dns::Dns;
use crate::error::CniError;
use crate::version;

const VERSIONS_020: &[&str] = &["0.1.0", "0.2.0"];
const VERSIONS_040: &[&str] = &["0.3.0", "0.3.1", "0.4.0"];
const VERSIONS_100: &[&str] = &["1.0.0", "1.1.0"];

/// A plugin result, tagged by schema family.
#[derive(Clone, Debug)]
pub enum CniResult {
	/// The 0.1.0 / 0.2.0 schema.
	V020(Result020),

	/// The 0.3.0 / 0.3.1 / 0.4.0 schema.
	V040(Result040),

	/// The 1.0.0 / 1.1.0 schema.
	V100(Result100),
}

enum Family {
	V020,
	V040,
	V100,
}

fn family_of(version: &str) -> Result<Family, CniError> {
	if VERSIONS_020.contains(&version) {
		Ok(Family::V020)
	} else if VERSIONS_040.contains(&version) {
		Ok(Family::V040)
	} else if VERSIONS_100.contains(&version) {
		Ok(Family::V100)
	} else {
		Err(CniError::UnsupportedResultVersion(version.into()))
	}
}

impl CniResult {
	/// The spec version of the schema this result carries.
	pub fn cni_version(&self) -> &str {
		match self {
			Self::V020(r) => &r.cni_version,
			Self::V040(r) => &r.cni_version,
			Self::V100(r) => &r.cni_version,
		}
	}

	/// Convert the result to another spec version.
	///
	/// Converting within a family only rewrites the version field. Converting
	/// across families translates the schema: downconversion is lossy exactly
	/// where the older schema cannot express the newer one (e.g. 0.2.0 keeps
	/// one address per family and no interfaces).
	pub fn as_version(&self, target: &str) -> Result<CniResult, CniError> {
		Ok(match (self, family_of(target)?) {
			(Self::V020(r), Family::V020) => Self::V020(Result020 {
				cni_version: target.into(),
				..r.clone()
			}),
			(Self::V020(r), Family::V040) => Self::V040(r.to_040(target)),
			(Self::V020(r), Family::V100) => Self::V100(r.to_040("0.4.0").to_100(target)),
			(Self::V040(r), Family::V020) => Self::V020(r.to_020(target)),
			(Self::V040(r), Family::V040) => Self::V040(Result040 {
				cni_version: target.into(),
				..r.clone()
			}),
			(Self::V040(r), Family::V100) => Self::V100(r.to_100(target)),
			(Self::V100(r), Family::V020) => Self::V020(r.to_040("0.4.0").to_020(target)),
			(Self::V100(r), Family::V040) => Self::V040(r.to_040(target)),
			(Self::V100(r), Family::V100) => Self::V100(Result100 {
				cni_version: target.into(),
				..r.clone()
			}),
		})
	}

	/// The canonical JSON value of this result.
	pub fn to_value(&self) -> Result<Value, CniError> {
		Ok(match self {
			Self::V020(r) => serde_json::to_value(r)?,
			Self::V040(r) => serde_json::to_value(r)?,
			Self::V100(r) => serde_json::to_value(r)?,
		})
	}

	/// Write the result as human-readable JSON to a stream.
	pub fn encode(&self, writer: &mut dyn Write) -> Result<(), CniError> {
		match self {
			Self::V020(r) => serde_json::to_writer_pretty(writer, r)?,
			Self::V040(r) => serde_json::to_writer_pretty(writer, r)?,
			Self::V100(r) => serde_json::to_writer_pretty(writer, r)?,
		}
		Ok(())
	}
}

type ResultFactory = fn(&str, &[u8]) -> Result<CniResult, CniError>;

struct Creator {
	versions: &'static [&'static str],
	create: ResultFactory,
}

/// The process-wide decoder registry: version string to result factory.
///
/// Populated exactly once, on first use; nothing can mutate it afterwards.
static CREATORS: Lazy<Vec<Creator>> = Lazy::new(|| {
	let mut creators = Vec::new();
	register(&mut creators, VERSIONS_020, create_020);
	register(&mut creators, VERSIONS_040, create_040);
	register(&mut creators, VERSIONS_100, create_100);
	creators
});

fn register(creators: &mut Vec<Creator>, versions: &'static [&'static str], create: ResultFactory) {
	for version in versions {
		if creators.iter().any(|c| c.versions.contains(version)) {
			// Duplicate registration is a bug in this library, not an input
			// error.
			panic!("result creator already registered for {}", version);
		}
	}
	creators.push(Creator { versions, create });
}

fn create_020(version: &str, bytes: &[u8]) -> Result<CniResult, CniError> {
	let mut result: Result020 = serde_json::from_slice(bytes)?;
	if result.cni_version.is_empty() {
		result.cni_version = version.into();
	}
	Ok(CniResult::V020(result))
}

fn create_040(version: &str, bytes: &[u8]) -> Result<CniResult, CniError> {
	let mut result: Result040 = serde_json::from_slice(bytes)?;
	if result.cni_version.is_empty() {
		result.cni_version = version.into();
	}
	Ok(CniResult::V040(result))
}

fn create_100(version: &str, bytes: &[u8]) -> Result<CniResult, CniError> {
	let mut result: Result100 = serde_json::from_slice(bytes)?;
	if result.cni_version.is_empty() {
		result.cni_version = version.into();
	}
	Ok(CniResult::V100(result))
}

/// Parse a result JSON under an explicitly requested version.
pub fn create(cni_version: &str, bytes: &[u8]) -> Result<CniResult, CniError> {
	let creator = CREATORS
		.iter()
		.find(|c| c.versions.contains(&cni_version))
		.ok_or_else(|| CniError::UnsupportedResultVersion(cni_version.into()))?;
	(creator.create)(cni_version, bytes)
}

/// Parse a result JSON, detecting the version from its `cniVersion` field.
pub fn create_from_bytes(bytes: &[u8]) -> Result<CniResult, CniError> {
	let cni_version = version::decode_version(bytes)?;
	create(&cni_version, bytes)
}

/// A hardware address, as results and runtime config carry it.
///
/// The wire form is a string. Parsing accepts every notation
/// [`MacAddr6`] understands (`aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff`,
/// Cisco-style `aabb.ccdd.eeff`, any case); output is always the lowercase
/// colon-separated form, which is what the kernel reports and what plugins
/// put in their results.
#[derive(Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub struct MacAddr(pub MacAddr6);

impl From<MacAddr6> for MacAddr {
	fn from(mac: MacAddr6) -> Self {
		Self(mac)
	}
}

impl From<MacAddr> for MacAddr6 {
	fn from(mac: MacAddr) -> Self {
		mac.0
	}
}

impl From<[u8; 6]> for MacAddr {
	fn from(octets: [u8; 6]) -> Self {
		Self(MacAddr6::from(octets))
	}
}

impl fmt::Display for MacAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let octets = self.0.as_bytes();
		write!(
			f,
			"{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
			octets[0], octets[1], octets[2], octets[3], octets[4], octets[5]
		)
	}
}

impl FromStr for MacAddr {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		MacAddr6::from_str(s).map(Self)
	}
}

impl Serialize for MacAddr {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		self.to_string().serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for MacAddr {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let j = String::deserialize(deserializer)?;
		Self::from_str(&j).map_err(de::Error::custom)
	}
}

/// Interface entry of a result.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
	/// The name of the interface.
	pub name: String,

	/// The hardware address of the interface (if applicable).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mac: Option<MacAddr>,

	/// The path to the network namespace the interface is in.
	///
	/// Empty or absent for host interfaces.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sandbox: Option<String>,

	/// Unix socket path for interfaces not represented in the kernel network
	/// stack (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub socket_path: Option<String>,

	/// PCI address of the underlying device (CNI 1.1).
	#[serde(default, rename = "pciID", skip_serializing_if = "Option::is_none")]
	pub pci_id: Option<String>,
}

/// IP entry of a 1.x result.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ip {
	/// The assigned address, with prefix.
	pub address: IpNetwork,

	/// The default gateway for this subnet, if one exists.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gateway: Option<IpAddr>,

	/// Index into the `interfaces` list of the parent result.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub interface: Option<usize>,
}

/// Route entry of a result.
///
/// The attribute fields past `gw` only exist from CNI 1.1; converting a
/// result down strips them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
	/// The destination of the route.
	pub dst: IpNetwork,

	/// The next hop address.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gw: Option<IpAddr>,

	/// MTU for this route (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mtu: Option<u32>,

	/// Advertised maximum segment size (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub advmss: Option<u32>,

	/// Route priority (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub priority: Option<u32>,

	/// Routing table (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub table: Option<u32>,

	/// Route scope (CNI 1.1).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<u32>,
}

impl Route {
	/// A plain destination/gateway route, attributes unset.
	pub fn basic(dst: IpNetwork, gw: Option<IpAddr>) -> Self {
		Self {
			dst,
			gw,
			mtu: None,
			advmss: None,
			priority: None,
			table: None,
			scope: None,
		}
	}
}

/// Result schema for CNI 0.1.0 and 0.2.0.
///
/// The oldest schema: one address per family, no interface list.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Result020 {
	/// The version of this result schema.
	#[serde(default)]
	pub cni_version: String,

	/// The assigned IPv4 address, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip4: Option<IpConfig020>,

	/// The assigned IPv6 address, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip6: Option<IpConfig020>,

	/// DNS settings for the namespace.
	#[serde(default, skip_serializing_if = "Dns::is_empty")]
	pub dns: Dns,
}

/// Per-family address block of a [`Result020`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfig020 {
	/// The assigned address, with prefix.
	pub ip: IpNetwork,

	/// The default gateway, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gateway: Option<IpAddr>,

	/// Routes to set up for this family.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub routes: Vec<Route>,
}

impl Result020 {
	fn to_040(&self, version: &str) -> Result040 {
		let mut ips = Vec::new();
		let mut routes = Vec::new();

		if let Some(ip4) = &self.ip4 {
			ips.push(Ip040 {
				version: "4".into(),
				interface: None,
				address: ip4.ip,
				gateway: ip4.gateway,
			});
			routes.extend(ip4.routes.iter().cloned());
		}
		if let Some(ip6) = &self.ip6 {
			ips.push(Ip040 {
				version: "6".into(),
				interface: None,
				address: ip6.ip,
				gateway: ip6.gateway,
			});
			routes.extend(ip6.routes.iter().cloned());
		}

		Result040 {
			cni_version: version.into(),
			interfaces: Vec::new(),
			ips,
			routes,
			dns: self.dns.clone(),
		}
	}
}

/// Result schema for CNI 0.3.0, 0.3.1 and 0.4.0.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Result040 {
	/// The version of this result schema.
	#[serde(default)]
	pub cni_version: String,

	/// All interfaces created so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub interfaces: Vec<Interface>,

	/// All addresses assigned so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ips: Vec<Ip040>,

	/// All routes created so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub routes: Vec<Route>,

	/// DNS settings for the namespace.
	#[serde(default, skip_serializing_if = "Dns::is_empty")]
	pub dns: Dns,
}

/// IP entry of a 0.3.x/0.4.0 result: like [`Ip`], plus the explicit address
/// family discriminator that 1.0.0 dropped.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ip040 {
	/// The address family: `"4"` or `"6"`.
	pub version: String,

	/// Index into the `interfaces` list of the parent result.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub interface: Option<usize>,

	/// The assigned address, with prefix.
	pub address: IpNetwork,

	/// The default gateway for this subnet, if one exists.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gateway: Option<IpAddr>,
}

impl Result040 {
	fn to_020(&self, version: &str) -> Result020 {
		let mut result = Result020 {
			cni_version: version.into(),
			ip4: None,
			ip6: None,
			dns: self.dns.clone(),
		};

		// 0.2.0 and earlier cannot express more than one address per family,
		// so only the first of each is kept.
		for ip in &self.ips {
			match ip.version.as_str() {
				"4" if result.ip4.is_none() => {
					result.ip4 = Some(IpConfig020 {
						ip: ip.address,
						gateway: ip.gateway,
						routes: Vec::new(),
					});
				}
				"6" if result.ip6.is_none() => {
					result.ip6 = Some(IpConfig020 {
						ip: ip.address,
						gateway: ip.gateway,
						routes: Vec::new(),
					});
				}
				_ => {}
			}
		}

		for route in &self.routes {
			let slot = if route.dst.is_ipv4() {
				result.ip4.as_mut()
			} else {
				result.ip6.as_mut()
			};
			if let Some(ip) = slot {
				ip.routes.push(Route::basic(route.dst, route.gw));
			}
		}

		result
	}

	fn to_100(&self, version: &str) -> Result100 {
		Result100 {
			cni_version: version.into(),
			interfaces: self.interfaces.clone(),
			ips: self
				.ips
				.iter()
				.map(|ip| Ip {
					address: ip.address,
					gateway: ip.gateway,
					interface: ip.interface,
				})
				.collect(),
			routes: self.routes.clone(),
			dns: self.dns.clone(),
		}
	}
}

/// Result schema for CNI 1.0.0 and 1.1.0.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Result100 {
	/// The version of this result schema.
	#[serde(default)]
	pub cni_version: String,

	/// All interfaces created so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub interfaces: Vec<Interface>,

	/// All addresses assigned so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ips: Vec<Ip>,

	/// All routes created so far along the chain.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub routes: Vec<Route>,

	/// DNS settings for the namespace.
	#[serde(default, skip_serializing_if = "Dns::is_empty")]
	pub dns: Dns,
}

impl Result100 {
	fn to_040(&self, version: &str) -> Result040 {
		Result040 {
			cni_version: version.into(),
			interfaces: self
				.interfaces
				.iter()
				.map(|i| Interface {
					socket_path: None,
					pci_id: None,
					..i.clone()
				})
				.collect(),
			ips: self
				.ips
				.iter()
				.map(|ip| Ip040 {
					version: (if ip.address.is_ipv4() { "4" } else { "6" }).into(),
					interface: ip.interface,
					address: ip.address,
					gateway: ip.gateway,
				})
				.collect(),
			routes: self
				.routes
				.iter()
				.map(|r| Route::basic(r.dst, r.gw))
				.collect(),
			dns: self.dns.clone(),
		}
	}
}
