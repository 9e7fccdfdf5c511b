//! Plugin delegation.
//!
//! A plugin may hand part of its job to another plugin (most commonly IPAM),
//! invoking it over the same wire contract it was itself invoked with: the
//! full configuration on STDIN, the inherited environment with only
//! `CNI_COMMAND` overridden.

use std::{env, path::Path};

use log::{error, info};
use which::which_in;

use crate::args::{CniArgs, DelegateArgs};
use crate::command::Command;
use crate::error::CniError;
use crate::exec::{Exec, RawExec};
use crate::plugin_config::PluginConfig;
use crate::reply::ReplyPayload;

/// Run a plugin as delegate.
///
/// The return type is to be the expected success reply type, so either
/// [`SuccessReply`][crate::reply::SuccessReply] or
/// [`IpamSuccessReply`][crate::reply::IpamSuccessReply].
///
/// STDIN and STDOUT are handled as per spec; STDERR is captured with the
/// delegate's other output. If an `ADD` fails partway, a best-effort `DEL`
/// is sent to the delegate so it can release what it had acquired.
///
/// # Errors
///
/// This method errors if:
/// - the current directory can't be obtained
/// - the `CNI_PATH` variable is missing
/// - the `CNI_PATH` doesn't contain the `sub_plugin` (as per `PATH` logic)
/// - the delegate plugin errors
pub async fn delegate<S>(
	sub_plugin: &str,
	command: Command,
	config: &PluginConfig,
) -> Result<S, CniError>
where
	S: for<'de> ReplyPayload<'de>,
{
	let cwd = env::current_dir().map_err(|_| CniError::NoCwd)?;
	let plugin = which_in(
		sub_plugin,
		Some(env::var("CNI_PATH").map_err(|err| CniError::MissingEnv {
			var: "CNI_PATH",
			err,
		})?),
		cwd,
	)
	.map_err(|err| CniError::MissingPlugin {
		name: sub_plugin.into(),
		err,
	})?;

	let config_bytes =
		serde_json::to_vec(config).map_err(|err| delegated(sub_plugin, err.into()))?;

	match delegate_command(&plugin, command, &config_bytes).await {
		Ok(stdout) => {
			if stdout.is_empty() {
				if matches!(command, Command::Add) {
					delegate_command(&plugin, Command::Del, &config_bytes)
						.await
						.map_err(|err| delegated(sub_plugin, err))?;
				}

				return Err(delegated(sub_plugin, CniError::MissingOutput));
			}

			serde_json::from_slice(&stdout).map_err(|err| delegated(sub_plugin, err.into()))
		}
		Err(err) => {
			error!("error running delegate: {}", err);
			if matches!(command, Command::Add) {
				// We're already failing pretty badly so this is a Just In
				// Case, but in all likelihood won't work either. So we
				// ignore any failure.
				delegate_command(&plugin, Command::Del, &config_bytes)
					.await
					.ok();
			}

			Err(delegated(sub_plugin, err))
		}
	}
}

async fn delegate_command(
	plugin: &Path,
	command: Command,
	stdin_bytes: &[u8],
) -> Result<Vec<u8>, CniError> {
	info!(
		"delegating to plugin at {} for command={}",
		plugin.display(),
		command
	);

	let environ = DelegateArgs {
		command: command.as_ref().into(),
	}
	.as_env();

	RawExec::default()
		.exec_plugin(plugin, stdin_bytes, environ)
		.await
}

fn delegated(plugin: &str, err: CniError) -> CniError {
	CniError::Delegated {
		plugin: plugin.into(),
		err: Box::new(err),
	}
}
