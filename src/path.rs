//! Resolution of plugin type names to executable paths.

use std::{convert::Infallible, env::split_paths, fs, path::PathBuf, str::FromStr};

use crate::error::CniError;

/// The extensions tried when probing for a plugin executable.
#[cfg(windows)]
const EXECUTABLE_FILE_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat", ""];
#[cfg(not(windows))]
const EXECUTABLE_FILE_EXTENSIONS: &[&str] = &[""];

/// Resolve a plugin type name to the full path of its executable by probing
/// each search path in order.
///
/// The name must be non-empty and must not contain the platform path
/// separator; the search path list must be non-empty. The first existing
/// regular file wins.
pub fn find_in_path(plugin: &str, paths: &[PathBuf]) -> Result<PathBuf, CniError> {
	if plugin.is_empty() {
		return Err(CniError::InvalidConfig("no plugin name provided".into()));
	}

	if plugin.contains(std::path::MAIN_SEPARATOR) {
		return Err(CniError::InvalidConfig(format!(
			"invalid plugin name: {}",
			plugin
		)));
	}

	if paths.is_empty() {
		return Err(CniError::InvalidConfig("no paths provided".into()));
	}

	for path in paths {
		for ext in EXECUTABLE_FILE_EXTENSIONS {
			let fullpath = path.join(format!("{}{}", plugin, ext));
			if fs::metadata(&fullpath)
				.map(|meta| meta.is_file())
				.unwrap_or(false)
			{
				return Ok(fullpath);
			}
		}
	}

	Err(CniError::FailedToFindPlugin {
		name: plugin.into(),
		paths: paths.to_vec(),
	})
}

/// A `CNI_PATH`-style search path list.
#[derive(Clone, Debug, Default)]
pub struct CniPath(pub Vec<PathBuf>);

impl FromStr for CniPath {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(split_paths(s).map(PathBuf::from).collect()))
	}
}
