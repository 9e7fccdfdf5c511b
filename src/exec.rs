//! Execution of plugin binaries.

use std::{
	io::Write,
	path::{Path, PathBuf},
	process::Stdio,
	sync::Mutex,
	time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::error::{CniError, ERR_DECODING_FAILURE, ERR_IO_FAILURE};
use crate::path::find_in_path;
use crate::reply::ErrorReply;

const TEXT_FILE_BUSY_ATTEMPTS: u32 = 6;

/// The seam the orchestrator invokes plugins through.
///
/// The default implementation is [`RawExec`]; tests substitute their own to
/// script plugin behaviour without spawning processes.
#[async_trait]
pub trait Exec: Send + Sync {
	/// Run a plugin executable: pipe `stdin_data` to it, hand it exactly
	/// `environ` as its environment, and return its STDOUT on success.
	async fn exec_plugin(
		&self,
		plugin_path: &Path,
		stdin_data: &[u8],
		environ: Vec<String>,
	) -> Result<Vec<u8>, CniError>;

	/// Resolve a plugin type name against the search paths.
	fn find_in_path(&self, plugin: &str, paths: &[PathBuf]) -> Result<PathBuf, CniError> {
		find_in_path(plugin, paths)
	}
}

/// Plugin execution via child processes.
///
/// The child's environment is fully replaced by the provided vector, STDIN
/// is piped in, and STDOUT/STDERR are drained concurrently with waiting so
/// the child can never deadlock on a full pipe. The child is killed if the
/// future is dropped, which is how cancellation and caller-side timeouts
/// propagate.
#[derive(Default)]
pub struct RawExec {
	/// Where to mirror the plugin's STDERR, if anywhere.
	pub stderr: Option<Mutex<Box<dyn Write + Send>>>,
}

#[async_trait]
impl Exec for RawExec {
	async fn exec_plugin(
		&self,
		plugin_path: &Path,
		stdin_data: &[u8],
		environ: Vec<String>,
	) -> Result<Vec<u8>, CniError> {
		debug!("executing plugin at {}", plugin_path.display());

		let mut attempt = 0;
		loop {
			attempt += 1;

			let output = match run_once(plugin_path, stdin_data, &environ).await {
				Ok(output) => output,
				Err(err) => {
					// A plugin binary being rewritten in place spawns with
					// ETXTBSY; give the writer a moment and try again, up
					// to the attempt budget.
					if is_text_file_busy(&err) && attempt < TEXT_FILE_BUSY_ATTEMPTS {
						warn!(
							"plugin at {} busy (attempt {}), retrying",
							plugin_path.display(),
							attempt
						);
						tokio::time::sleep(Duration::from_secs(1)).await;
						continue;
					}

					return Err(plugin_err(&err.to_string(), &[], &[]));
				}
			};

			self.mirror_stderr(&output.stderr);

			if output.status.success() {
				debug!(
					"plugin at {} succeeded, stdout bytes={}",
					plugin_path.display(),
					output.stdout.len()
				);
				return Ok(output.stdout);
			}

			return Err(plugin_err(
				&output.status.to_string(),
				&output.stdout,
				&output.stderr,
			));
		}
	}
}

impl RawExec {
	fn mirror_stderr(&self, stderr: &[u8]) {
		if stderr.is_empty() {
			return;
		}

		if let Some(writer) = &self.stderr {
			if let Ok(mut writer) = writer.lock() {
				// stderr is only informational, failures to mirror it are
				// not failures of the invocation
				let _ = writer.write_all(stderr);
			}
		}
	}
}

async fn run_once(
	plugin_path: &Path,
	stdin_data: &[u8],
	environ: &[String],
) -> std::io::Result<std::process::Output> {
	let mut command = Command::new(plugin_path);
	command.env_clear();
	for entry in environ {
		if let Some(eq) = entry.find('=') {
			command.env(&entry[..eq], &entry[eq + 1..]);
		}
	}

	let mut child = command
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()?;

	{
		let mut stdin = child.stdin.take().unwrap();
		// UNWRAP: stdin configured above

		debug!("copying bytes={} to stdin", stdin_data.len());
		stdin.write_all(stdin_data).await?;
		// dropping the handle closes the pipe
	}

	child.wait_with_output().await
}

/// Whether an error is the transient "text file busy" spawn failure.
///
/// Matched on the OS error code where the platform exposes it, with a
/// substring check as fallback for wrapped errors.
fn is_text_file_busy(err: &std::io::Error) -> bool {
	#[cfg(unix)]
	{
		if err.raw_os_error() == Some(libc::ETXTBSY) {
			return true;
		}
	}

	err.to_string().contains("text file busy")
}

/// Classify a failed invocation into the structured error the caller sees.
///
/// A structured error on the plugin's STDOUT is propagated verbatim; failing
/// that, one is synthesized from STDERR, and failing that too, from the
/// underlying OS error text.
fn plugin_err(err: &str, stdout: &[u8], stderr: &[u8]) -> CniError {
	let reply = if stdout.is_empty() {
		if stderr.is_empty() {
			ErrorReply {
				cni_version: None,
				code: ERR_IO_FAILURE,
				msg: "netplugin failed with no error message".into(),
				details: err.into(),
			}
		} else {
			ErrorReply {
				cni_version: None,
				code: ERR_IO_FAILURE,
				msg: "netplugin failed".into(),
				details: String::from_utf8_lossy(stderr).into_owned(),
			}
		}
	} else {
		match serde_json::from_slice::<ErrorReply>(stdout) {
			Ok(reply) => reply,
			Err(parse_err) => ErrorReply {
				cni_version: None,
				code: ERR_DECODING_FAILURE,
				msg: "netplugin failed but error parsing its diagnostic message".into(),
				details: format!("{:?}: {}", String::from_utf8_lossy(stdout), parse_err),
			},
		}
	};

	CniError::Plugin(reply)
}
