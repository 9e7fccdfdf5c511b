//! Skeleton for CNI plugin binaries.
//!
//! The inverse of the [`runtime`][crate::runtime] side: parse the `CNI_*`
//! environment and STDIN, validate them per command, and route to one of the
//! plugin's handlers. [`Plugin::run`] wires this to the real process
//! environment and turns errors into the on-wire JSON error reply plus a
//! non-zero exit.
//!
//! ```no_run
//! use cni_runtime::error::CniError;
//! use cni_runtime::skel::{CmdArgs, Plugin};
//! use cni_runtime::version::PluginInfo;
//!
//! fn cmd_add(args: CmdArgs) -> Result<(), CniError> {
//! 	// create the interface, reply with a result...
//! 	Ok(())
//! }
//!
//! fn cmd_del(_args: CmdArgs) -> Result<(), CniError> {
//! 	Ok(())
//! }
//!
//! Plugin {
//! 	add: cmd_add,
//! 	del: cmd_del,
//! 	check: None,
//! 	gc: None,
//! 	status: None,
//! 	info: PluginInfo::all(),
//! 	about: "my-plugin v0.1.0",
//! }
//! .run();
//! ```

use std::{
	env,
	io::{self, Read, Write},
	path::PathBuf,
	process::exit,
};

use log::{debug, error};

use crate::command::Command;
use crate::error::{CniError, InvalidValueError};
use crate::path::CniPath;
use crate::plugin_config::PluginConfig;
use crate::utils;
use crate::version::{self, PluginInfo};

/// Everything a handler receives for one invocation.
#[derive(Clone, Debug)]
pub struct CmdArgs {
	/// The container ID. Empty for GC and STATUS.
	pub container_id: String,

	/// The network namespace path. Optional for DEL; absent for GC and
	/// STATUS.
	pub netns: Option<String>,

	/// The interface name. Empty for GC and STATUS.
	pub ifname: String,

	/// The raw `CNI_ARGS` string, if any. Deprecated by the spec in favour
	/// of the `args` config field; parse with
	/// [`parse_args`][crate::args::parse_args] if needed.
	pub args: Option<String>,

	/// The plugin search path list, from `CNI_PATH`.
	pub path: Vec<PathBuf>,

	/// The raw bytes read from STDIN.
	pub stdin_data: Vec<u8>,

	/// The typed view of the STDIN configuration.
	pub config: PluginConfig,
}

/// A command handler: act on the inputs, reply on STDOUT, or error.
///
/// Handlers are responsible for their own success output (usually via
/// [`reply`][crate::reply::reply] with the result re-encoded under
/// `config.cni_version`).
pub type CmdHandler = fn(CmdArgs) -> Result<(), CniError>;

/// A plugin: its handlers, the versions it speaks, and a line about itself.
///
/// ADD and DEL are mandatory for any plugin; CHECK, GC and STATUS are
/// optional and report "not supported" when absent.
pub struct Plugin {
	/// Handler for ADD.
	pub add: CmdHandler,

	/// Handler for DEL.
	pub del: CmdHandler,

	/// Handler for CHECK, if supported.
	pub check: Option<CmdHandler>,

	/// Handler for GC, if supported.
	pub gc: Option<CmdHandler>,

	/// Handler for STATUS, if supported.
	pub status: Option<CmdHandler>,

	/// The spec versions this plugin supports.
	pub info: PluginInfo,

	/// One line printed to STDERR when the plugin is run without any
	/// `CNI_COMMAND`, e.g. `"my-plugin v1.2.0"`. May be empty.
	pub about: &'static str,
}

impl Plugin {
	/// Read the environment and STDIN, dispatch, and exit.
	///
	/// On error, the JSON error reply is printed to STDOUT and the process
	/// exits 1, as the spec requires of plugins.
	pub fn run(self) -> ! {
		debug!(
			"CNI plugin built with {} crate version {}",
			env!("CARGO_PKG_NAME"),
			env!("CARGO_PKG_VERSION")
		);

		let code = match self.dispatch(
			|var| env::var(var).ok(),
			&mut io::stdin(),
			&mut io::stdout(),
			&mut io::stderr(),
		) {
			Ok(()) => 0,
			Err(err) => {
				error!("{}", err);
				let reply = err.into_reply(None);
				if serde_json::to_writer(io::stdout(), &reply).is_err() {
					error!("error writing error JSON to stdout");
				}
				1
			}
		};

		exit(code);
	}

	/// The full parse-validate-route cycle against injected environment and
	/// streams.
	///
	/// [`Plugin::run`] is this over the real process; tests (and exotic
	/// embeddings) provide their own.
	pub fn dispatch<G>(
		&self,
		getenv: G,
		stdin: &mut dyn Read,
		stdout: &mut dyn Write,
		stderr: &mut dyn Write,
	) -> Result<(), CniError>
	where
		G: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| getenv(name).filter(|value| !value.is_empty());

		let command = match var("CNI_COMMAND") {
			Some(raw) => raw.parse::<Command>().map_err(|err| CniError::InvalidEnv {
				var: "CNI_COMMAND",
				err: Box::new(err),
			})?,
			None => {
				// Someone ran the binary by hand: introduce ourselves on
				// STDERR instead of failing cryptically.
				if !self.about.is_empty() {
					writeln!(stderr, "{}", self.about)?;
					writeln!(
						stderr,
						"CNI protocol versions supported: {}",
						self.info.supported_versions.join(", ")
					)?;
					return Ok(());
				}

				return Err(CniError::MissingEnvironment {
					vars: vec!["CNI_COMMAND"],
				});
			}
		};

		let container_id = var("CNI_CONTAINERID");
		let netns = var("CNI_NETNS");
		let ifname = var("CNI_IFNAME");
		let args = var("CNI_ARGS");
		let path = var("CNI_PATH");

		let requirements: &[(&'static str, &Option<String>, &[Command])] = &[
			(
				"CNI_CONTAINERID",
				&container_id,
				&[Command::Add, Command::Check, Command::Del],
			),
			("CNI_NETNS", &netns, &[Command::Add, Command::Check]),
			(
				"CNI_IFNAME",
				&ifname,
				&[Command::Add, Command::Check, Command::Del],
			),
			(
				"CNI_PATH",
				&path,
				&[
					Command::Add,
					Command::Check,
					Command::Del,
					Command::Gc,
					Command::Status,
				],
			),
		];

		let missing: Vec<&'static str> = requirements
			.iter()
			.filter(|(_, value, commands)| value.is_none() && commands.contains(&command))
			.map(|(name, _, _)| *name)
			.collect();
		if !missing.is_empty() {
			return Err(CniError::MissingEnvironment { vars: missing });
		}

		let stdin_data = if command == Command::Version {
			Vec::new()
		} else {
			let mut payload = Vec::with_capacity(1024);
			debug!("reading stdin til EOF...");
			stdin.read_to_end(&mut payload)?;
			debug!("read payload bytes={}", payload.len());
			if payload.is_empty() {
				return Err(CniError::MissingInput);
			}
			payload
		};

		if command == Command::Version {
			self.info.encode(stdout)?;
			return Ok(());
		}

		check_network_name(&stdin_data)?;

		if matches!(command, Command::Add | Command::Check | Command::Del) {
			// UNWRAP: requirement table above guarantees presence
			utils::validate_container_id(container_id.as_deref().unwrap())?;
			utils::validate_interface_name(ifname.as_deref().unwrap())?;
		}

		if matches!(command, Command::Add | Command::Del) {
			if let Some(netns) = netns.as_deref() {
				check_not_own_netns(netns, &getenv)?;
			}
		}

		let config: PluginConfig = serde_json::from_slice(&stdin_data)?;
		let config_version = version::decode_version(&stdin_data)?;

		let cmd_args = CmdArgs {
			container_id: container_id.unwrap_or_default(),
			netns,
			ifname: ifname.unwrap_or_default(),
			args,
			path: path
				.as_deref()
				.map(|p| p.parse::<CniPath>().unwrap().0)
				.unwrap_or_default(),
			stdin_data,
			config,
		};

		match command {
			Command::Add => self.check_version_and_call(self.add, &config_version, cmd_args),
			Command::Del => self.check_version_and_call(self.del, &config_version, cmd_args),
			Command::Check => {
				if !version::greater_than_or_equal_to(&config_version, "0.4.0")? {
					// CHECK only exists from 0.4.0
					return Err(CniError::Incompatible {
						config: config_version,
						supported: vec!["0.4.0".into(), "1.0.0".into(), "1.1.0".into()],
					});
				}

				let check = self
					.check
					.ok_or(CniError::NotSupported("CHECK"))?;
				self.check_version_and_call(check, &config_version, cmd_args)
			}
			Command::Gc => {
				require_110(&config_version)?;
				let gc = self.gc.ok_or(CniError::NotSupported("GC"))?;
				self.check_version_and_call(gc, &config_version, cmd_args)
			}
			Command::Status => {
				require_110(&config_version)?;
				let status = self.status.ok_or(CniError::NotSupported("STATUS"))?;
				self.check_version_and_call(status, &config_version, cmd_args)
			}
			Command::Version => unreachable!("handled above"),
		}
	}

	fn check_version_and_call(
		&self,
		handler: CmdHandler,
		config_version: &str,
		cmd_args: CmdArgs,
	) -> Result<(), CniError> {
		self.info.require(config_version)?;
		handler(cmd_args)
	}
}

fn require_110(config_version: &str) -> Result<(), CniError> {
	if version::greater_than_or_equal_to(config_version, "1.1.0")? {
		Ok(())
	} else {
		Err(CniError::Incompatible {
			config: config_version.into(),
			supported: vec!["1.1.0".into()],
		})
	}
}

fn check_network_name(stdin_data: &[u8]) -> Result<(), CniError> {
	#[derive(serde::Deserialize)]
	struct NameOnly {
		#[serde(default)]
		name: String,
	}

	let conf: NameOnly = serde_json::from_slice(stdin_data)
		.map_err(|err| CniError::Decoding(format!("error unmarshalling network config: {}", err)))?;
	utils::validate_network_name(&conf.name)
}

/// The target namespace must not be the plugin's own, which would mean the
/// runtime is confused and about to configure the host.
///
/// `CNI_NETNS_OVERRIDE` set to `1` or `true` (any case) disables the guard,
/// for the rare setups that really do mean it.
fn check_not_own_netns<G>(netns: &str, getenv: &G) -> Result<(), CniError>
where
	G: Fn(&str) -> Option<String>,
{
	if let Some(value) = getenv("CNI_NETNS_OVERRIDE") {
		if value == "1" || value.eq_ignore_ascii_case("true") {
			debug!("netns self-check overridden");
			return Ok(());
		}
	}

	#[cfg(target_os = "linux")]
	{
		use std::os::unix::fs::MetadataExt;

		let own = std::fs::metadata("/proc/self/ns/net")?;
		let target = std::fs::metadata(netns)?;
		if own.dev() == target.dev() && own.ino() == target.ino() {
			return Err(CniError::InvalidEnv {
				var: "CNI_NETNS",
				err: Box::new(InvalidValueError(
					"plugin cannot operate within its own netns",
				)),
			});
		}
	}
	#[cfg(not(target_os = "linux"))]
	let _ = netns;

	Ok(())
}
