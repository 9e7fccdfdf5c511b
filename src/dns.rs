use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// DNS configuration or settings.
///
/// Carried both in network configuration and in results. The schema is set,
/// but plugins and runtimes are only required to respect the semantics if
/// they care about DNS at all.
///
/// All fields are optional ([`Vec`]s will default to empty).
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
	/// List of DNS nameservers this network is aware of.
	///
	/// The list is priority-ordered.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub nameservers: Vec<IpAddr>,

	/// The local domain used for short hostname lookups.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,

	/// List of search domains for short hostname lookups.
	///
	/// Preferred over `domain` by most resolvers.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub search: Vec<String>,

	/// List of options to be passed to the resolver.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub options: Vec<String>,
}

impl Dns {
	/// Whether no DNS information is present at all.
	pub fn is_empty(&self) -> bool {
		self.nameservers.is_empty()
			&& self.domain.is_none()
			&& self.search.is_empty()
			&& self.options.is_empty()
	}
}
