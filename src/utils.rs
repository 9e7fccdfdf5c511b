//! Input validation shared by the runtime and the plugin dispatcher.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CniError, EmptyValueError, InvalidValueError, RegexValueError};

// One pattern covers container IDs and network names.
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap());

/// Validate a container ID: non-empty, alphanumeric start, then
/// alphanumerics, `_`, `.` and `-`.
pub fn validate_container_id(container_id: &str) -> Result<(), CniError> {
	if container_id.is_empty() {
		return Err(CniError::InvalidEnv {
			var: "CNI_CONTAINERID",
			err: Box::new(EmptyValueError),
		});
	}

	if !NAME_RE.is_match(container_id) {
		return Err(CniError::InvalidEnv {
			var: "CNI_CONTAINERID",
			err: Box::new(RegexValueError(NAME_RE.clone())),
		});
	}

	Ok(())
}

/// Validate a network name against the same pattern as container IDs.
pub fn validate_network_name(name: &str) -> Result<(), CniError> {
	if name.is_empty() {
		return Err(CniError::InvalidConfig("missing network name".into()));
	}

	if !NAME_RE.is_match(name) {
		return Err(CniError::InvalidConfig(format!(
			"invalid characters found in network name {:?}",
			name
		)));
	}

	Ok(())
}

/// Validate a Linux interface name: non-empty, at most 15 bytes, not `.` or
/// `..`, and free of `/`, `:` and whitespace.
pub fn validate_interface_name(ifname: &str) -> Result<(), CniError> {
	fn invalid(reason: &'static str) -> CniError {
		CniError::InvalidEnv {
			var: "CNI_IFNAME",
			err: Box::new(InvalidValueError(reason)),
		}
	}

	if ifname.is_empty() {
		return Err(CniError::InvalidEnv {
			var: "CNI_IFNAME",
			err: Box::new(EmptyValueError),
		});
	}

	// IFNAMSIZ is 16 with the trailing NUL
	if ifname.len() > 15 {
		return Err(invalid(
			"interface name is too long: must be 15 characters or less",
		));
	}

	if ifname == "." || ifname == ".." {
		return Err(invalid("interface name must not be . or .."));
	}

	if ifname
		.chars()
		.any(|c| c == '/' || c == ':' || c.is_whitespace())
	{
		return Err(invalid(
			"interface name must not contain / or : or whitespace",
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interface_names() {
		assert!(validate_interface_name("eth0").is_ok());
		assert!(validate_interface_name("veth-blue.42").is_ok());

		assert!(validate_interface_name("").is_err());
		assert!(validate_interface_name("eth/0").is_err());
		assert!(validate_interface_name("eth:0").is_err());
		assert!(validate_interface_name("eth 0").is_err());
		assert!(validate_interface_name(".").is_err());
		assert!(validate_interface_name("..").is_err());
		assert!(validate_interface_name("abcdefghijklmnop").is_err()); // 16 bytes
		assert!(validate_interface_name("abcdefghijklmno").is_ok()); // 15 bytes
	}

	#[test]
	fn container_ids() {
		assert!(validate_container_id("ctr-001").is_ok());
		assert!(validate_container_id("A.b_c-d").is_ok());

		assert!(validate_container_id("").is_err());
		assert!(validate_container_id("-leading-dash").is_err());
		assert!(validate_container_id("has/slash").is_err());
		assert!(validate_container_id("has space").is_err());
	}

	#[test]
	fn network_names() {
		assert!(validate_network_name("mynet").is_ok());
		assert!(validate_network_name("").is_err());
		assert!(validate_network_name("bad name").is_err());

		match validate_network_name("") {
			Err(err) => assert_eq!(err.code(), 7),
			ok => panic!("unexpected: {:?}", ok),
		}
	}
}
