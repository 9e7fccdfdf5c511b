//! When CNI goes bad.

use std::{env::VarError, path::PathBuf};

use regex::Regex;
use thiserror::Error;

use crate::reply::ErrorReply;

/// Incompatible CNI version (code 1).
pub const ERR_INCOMPATIBLE_CNI_VERSION: u32 = 1;

/// Unsupported field in network configuration (code 2).
pub const ERR_UNSUPPORTED_FIELD: u32 = 2;

/// Container unknown or does not exist (code 3).
pub const ERR_UNKNOWN_CONTAINER: u32 = 3;

/// Invalid necessary environment variables (code 4).
pub const ERR_INVALID_ENVIRONMENT_VARIABLES: u32 = 4;

/// I/O failure, e.g. failed to read or spawn (code 5).
pub const ERR_IO_FAILURE: u32 = 5;

/// Failed to decode content, e.g. JSON parse errors (code 6).
pub const ERR_DECODING_FAILURE: u32 = 6;

/// Invalid network config (code 7).
pub const ERR_INVALID_NETWORK_CONFIG: u32 = 7;

/// Transient failure, the runtime should try again later (code 11).
pub const ERR_TRY_AGAIN_LATER: u32 = 11;

/// Unclassified plugin-internal failure (code 999).
///
/// The spec reserves 1-99 and leaves 100+ to plugins; 999 is what the
/// reference implementation wraps opaque handler errors with.
pub const ERR_INTERNAL: u32 = 999;

/// All errors emitted by this library, plus a few others.
#[derive(Debug, Error)]
pub enum CniError {
	/// Catch-all wrapper for I/O errors.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// Catch-all wrapper for JSON serialization and deserialization.
	#[error(transparent)]
	Json(#[from] serde_json::Error),

	/// When content decodes as JSON but not as what it should be.
	#[error("{0}")]
	Decoding(String),

	/// When the CNI version of a config is not in a plugin's supported set.
	#[error("incompatible CNI versions: config is {config:?}, plugin supports {supported:?}")]
	Incompatible {
		/// the version the configuration asked for
		config: String,

		/// the versions the plugin advertised
		supported: Vec<String>,
	},

	/// When a result document carries a version this library has no decoder
	/// for.
	#[error("unsupported CNI result version {0:?}")]
	UnsupportedResultVersion(String),

	/// When nothing is provided on STDIN.
	#[error("missing input network config")]
	MissingInput,

	/// When an invoked plugin doesn't output anything on STDOUT.
	#[error("missing plugin output")]
	MissingOutput,

	/// When a required environment variable is missing.
	#[error("missing environment variable: {var}: {err}")]
	MissingEnv {
		/// the variable name
		var: &'static str,

		/// the underlying error
		#[source]
		err: VarError,
	},

	/// When one or more required environment variables are missing.
	///
	/// This is the plugin dispatcher's version of [`CniError::MissingEnv`]:
	/// every missing name for the current command is reported at once.
	#[error("required env variables [{}] missing", .vars.join(","))]
	MissingEnvironment {
		/// all variable names that were required and absent
		vars: Vec<&'static str>,
	},

	/// When an environment variable couldn't be parsed or is invalid.
	#[error("environment variable has invalid format: {var}: {err}")]
	InvalidEnv {
		/// the variable name
		var: &'static str,

		/// the underlying error
		#[source]
		err: Box<dyn std::error::Error + Send + Sync>,
	},

	/// When a network configuration is semantically invalid.
	#[error("invalid network config: {0}")]
	InvalidConfig(String),

	/// When no configuration matched the requested network name.
	#[error("no net configuration with name {name:?} in {}", .dir.display())]
	NotFound {
		/// the network name that was looked for
		name: String,

		/// the directory that was searched
		dir: PathBuf,
	},

	/// When a configuration directory held nothing loadable at all.
	#[error("no net configurations found in {}", .dir.display())]
	NoConfigsFound {
		/// the directory that was searched
		dir: PathBuf,
	},

	/// When a plugin executable is in none of the search paths.
	#[error("failed to find plugin {name:?} in path {paths:?}")]
	FailedToFindPlugin {
		/// the name of the plugin binary
		name: String,

		/// the paths that were searched
		paths: Vec<PathBuf>,
	},

	/// When the current working directory cannot be obtained (for delegation).
	#[error("cannot obtain current working directory")]
	NoCwd,

	/// When a delegated plugin cannot be found on `CNI_PATH`.
	#[error("missing (or not on CNI_PATH) plugin {name}: {err}")]
	MissingPlugin {
		/// the name of the plugin binary
		name: String,

		/// the underlying error
		#[source]
		err: which::Error,
	},

	/// Wrapper for errors in relation to a delegated plugin.
	#[error("with plugin {plugin}: {err}")]
	Delegated {
		/// the name of the plugin binary
		plugin: String,

		/// the underlying error
		err: Box<Self>,
	},

	/// A structured error a plugin wrote to its STDOUT.
	///
	/// This is propagated verbatim: the code the plugin chose is the code the
	/// caller sees.
	#[error(transparent)]
	Plugin(#[from] ErrorReply),

	/// When garbage collection partially failed.
	///
	/// GC keeps invoking the remaining plugins after a failure; everything
	/// that went wrong is collected here.
	#[error("garbage collection: {}", .0.join("; "))]
	Gc(Vec<String>),

	/// When an optional command has no handler in a plugin.
	#[error("the {0} command is not supported by this plugin")]
	NotSupported(&'static str),

	/// An opaque plugin-internal failure.
	#[error("{0}")]
	Internal(String),

	/// A generic error as a string.
	///
	/// This error variant is not used in the library, but is provided for
	/// plugin implementations to make use of without needing to make their
	/// own error type.
	///
	/// # Example
	///
	/// ```
	/// # use cni_runtime::error::CniError;
	/// CniError::Generic("a total catastrophe".into());
	/// ```
	#[error("{0}")]
	Generic(String),

	/// When a field in configuration is missing.
	///
	/// Provided for plugin implementations, like [`CniError::Generic`].
	#[error("can't proceed without {0} field")]
	MissingField(&'static str),

	/// When a field in configuration is invalid.
	///
	/// Provided for plugin implementations, like [`CniError::Generic`].
	#[error("{field}: expected {expected}, got: {value:?}")]
	InvalidField {
		/// the name or path of the invalid field
		field: &'static str,

		/// the value or type the field was expected to be
		expected: &'static str,

		/// the actual value or a facsimile thereof
		value: serde_json::Value,
	},
}

impl CniError {
	/// The CNI error code this error maps to on the wire.
	pub fn code(&self) -> u32 {
		match self {
			Self::Incompatible { .. } => ERR_INCOMPATIBLE_CNI_VERSION,
			Self::MissingEnv { .. }
			| Self::MissingEnvironment { .. }
			| Self::InvalidEnv { .. }
			| Self::NotSupported(_) => ERR_INVALID_ENVIRONMENT_VARIABLES,
			Self::Io(_)
			| Self::MissingOutput
			| Self::NoCwd
			| Self::FailedToFindPlugin { .. }
			| Self::MissingPlugin { .. } => ERR_IO_FAILURE,
			Self::Json(_) | Self::Decoding(_) | Self::UnsupportedResultVersion(_) => {
				ERR_DECODING_FAILURE
			}
			Self::MissingInput
			| Self::InvalidConfig(_)
			| Self::NotFound { .. }
			| Self::NoConfigsFound { .. } => ERR_INVALID_NETWORK_CONFIG,
			Self::Plugin(e) => e.code,
			Self::Delegated { err, .. } => err.code(),
			Self::Gc(_) | Self::Internal(_) => ERR_INTERNAL,
			Self::Generic(_) => 100,
			Self::MissingField(_) => 104,
			Self::InvalidField { .. } => 107,
		}
	}

	/// Convert a CniError into an ErrorReply.
	///
	/// [`ErrorReply`]s are the on-wire error shape; they can be emitted with
	/// [`reply`][crate::reply::reply]. A structured error received from a
	/// plugin passes through unchanged, everything else is mapped to its
	/// code with the error text as details.
	pub fn into_reply(self, cni_version: Option<String>) -> ErrorReply {
		if let Self::Plugin(e) = self {
			return e;
		}

		let msg = match self.code() {
			ERR_INCOMPATIBLE_CNI_VERSION => "incompatible CNI version",
			ERR_INVALID_ENVIRONMENT_VARIABLES => "invalid environment variables",
			ERR_IO_FAILURE => "I/O failure",
			ERR_DECODING_FAILURE => "failed to decode JSON payload",
			ERR_INVALID_NETWORK_CONFIG => "invalid network config",
			ERR_INTERNAL => "internal error",
			_ => "ERROR",
		};

		ErrorReply {
			cni_version,
			code: self.code(),
			msg: msg.into(),
			details: self.to_string(),
		}
	}
}

/// Underlying error used for an empty value that shouldn't be.
///
/// Used with [`CniError::InvalidEnv`].
#[derive(Clone, Copy, Debug, Error)]
#[error("must not be empty")]
pub struct EmptyValueError;

/// Underlying error used for an invalid `CNI_COMMAND`.
///
/// Used with [`CniError::InvalidEnv`].
#[derive(Clone, Copy, Debug, Error)]
#[error("must be one of ADD, DEL, CHECK, GC, STATUS, VERSION")]
pub struct InvalidCommandError;

/// Underlying error used for a value that should match a regex but doesn't.
///
/// Used with [`CniError::InvalidEnv`].
#[derive(Clone, Debug, Error)]
#[error("must match regex: {0}")]
pub struct RegexValueError(pub Regex);

/// Underlying error carrying a fixed description of what is wrong.
///
/// Used with [`CniError::InvalidEnv`].
#[derive(Clone, Copy, Debug, Error)]
#[error("{0}")]
pub struct InvalidValueError(pub &'static str);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes() {
		assert_eq!(
			CniError::Incompatible {
				config: "0.3.0".into(),
				supported: vec!["1.0.0".into()],
			}
			.code(),
			1
		);
		assert_eq!(
			CniError::MissingEnvironment {
				vars: vec!["CNI_COMMAND"],
			}
			.code(),
			4
		);
		assert_eq!(CniError::MissingInput.code(), 7);
		assert_eq!(CniError::Internal("boom".into()).code(), 999);
	}

	#[test]
	fn plugin_error_is_preserved() {
		let wire = ErrorReply {
			cni_version: Some("1.0.0".into()),
			code: 107,
			msg: "bad".into(),
			details: "very bad".into(),
		};
		let err = CniError::Plugin(wire.clone());
		assert_eq!(err.code(), 107);

		let reply = err.into_reply(Some("1.1.0".into()));
		assert_eq!(reply.code, wire.code);
		assert_eq!(reply.msg, wire.msg);
		assert_eq!(reply.cni_version.as_deref(), Some("1.0.0"));
	}

	#[test]
	fn delegated_keeps_inner_code() {
		let err = CniError::Delegated {
			plugin: "ipam".into(),
			err: Box::new(CniError::MissingInput),
		};
		assert_eq!(err.code(), 7);
	}

	#[test]
	fn missing_environment_lists_all() {
		let err = CniError::MissingEnvironment {
			vars: vec!["CNI_CONTAINERID", "CNI_IFNAME"],
		};
		assert_eq!(
			err.to_string(),
			"required env variables [CNI_CONTAINERID,CNI_IFNAME] missing"
		);
	}
}
