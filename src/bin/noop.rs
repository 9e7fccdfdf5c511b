//! A no-op CNI plugin.
//!
//! It does everything a plugin must do except touch the network: the
//! dispatcher validates all inputs, ADD replies with the `prevResult` it was
//! given (or an empty result), and DEL/CHECK succeed silently. Useful at the
//! end of a chain to verify a runtime's wiring, and used by this crate's
//! end-to-end dispatcher tests.

use cni_runtime::error::CniError;
use cni_runtime::reply::{reply, SuccessReply};
use cni_runtime::skel::{CmdArgs, Plugin};
use cni_runtime::version::PluginInfo;

fn cmd_add(args: CmdArgs) -> Result<(), CniError> {
	let echo = match args.config.prev_result {
		Some(prev) => {
			let mut echo: SuccessReply = serde_json::from_value(prev)?;
			echo.cni_version = args.config.cni_version;
			echo
		}
		None => SuccessReply {
			cni_version: args.config.cni_version,
			interfaces: Vec::new(),
			ips: Vec::new(),
			routes: Vec::new(),
			dns: Default::default(),
			specific: Default::default(),
		},
	};

	reply(echo)
}

fn cmd_del(_args: CmdArgs) -> Result<(), CniError> {
	Ok(())
}

fn cmd_check(_args: CmdArgs) -> Result<(), CniError> {
	Ok(())
}

fn main() {
	Plugin {
		add: cmd_add,
		del: cmd_del,
		check: Some(cmd_check),
		gc: None,
		status: None,
		info: PluginInfo::all(),
		about: "noop (does nothing, correctly)",
	}
	.run();
}
