use std::{fmt, str::FromStr};

use crate::error::InvalidCommandError;

/// The CNI operations, as they appear in `CNI_COMMAND`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
	/// Add a container to a network, or apply modifications.
	Add,

	/// Remove a container from a network, or un-apply modifications.
	Del,

	/// Check that a container's networking is as expected.
	Check,

	/// Garbage-collect stale resources, given the attachments still valid.
	///
	/// Introduced in CNI spec v1.1.0.
	Gc,

	/// Probe plugin readiness.
	///
	/// Introduced in CNI spec v1.1.0.
	Status,

	/// Probe plugin version support.
	Version,
}

impl FromStr for Command {
	type Err = InvalidCommandError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ADD" => Ok(Self::Add),
			"DEL" => Ok(Self::Del),
			"CHECK" => Ok(Self::Check),
			"GC" => Ok(Self::Gc),
			"STATUS" => Ok(Self::Status),
			"VERSION" => Ok(Self::Version),
			_ => Err(InvalidCommandError),
		}
	}
}

impl AsRef<str> for Command {
	fn as_ref(&self) -> &'static str {
		match self {
			Command::Add => "ADD",
			Command::Del => "DEL",
			Command::Check => "CHECK",
			Command::Gc => "GC",
			Command::Status => "STATUS",
			Command::Version => "VERSION",
		}
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::Command;
	use std::str::FromStr;

	#[test]
	fn roundtrip() {
		for name in &["ADD", "DEL", "CHECK", "GC", "STATUS", "VERSION"] {
			let cmd = Command::from_str(name).unwrap();
			assert_eq!(cmd.as_ref(), *name);
		}
	}

	#[test]
	fn unknown() {
		assert!(Command::from_str("FROBNICATE").is_err());
		assert!(Command::from_str("add").is_err());
	}
}
