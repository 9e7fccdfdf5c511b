//! Add, check, or remove network interfaces from a network namespace.
//!
//! ```text
//! cnitool add   <net> <netns>
//! cnitool check <net> <netns>
//! cnitool del   <net> <netns>
//! ```
//!
//! Network configuration is read from the directory named by `NETCONFPATH`
//! (default `/etc/cni/net.d`), plugins are found via `CNI_PATH`, capability
//! args come JSON-encoded from `CAP_ARGS`, and extra plugin arguments from
//! `CNI_ARGS`.

use std::{
	collections::HashMap,
	env,
	io::{stdout, Write},
	path::{Path, PathBuf},
	process::exit,
};

use sha2::{Digest, Sha512};

use cni_runtime::args::parse_args;
use cni_runtime::error::CniError;
use cni_runtime::{config, logger, CniConfig, RuntimeConf};

const ENV_CNI_PATH: &str = "CNI_PATH";
const ENV_NET_DIR: &str = "NETCONFPATH";
const ENV_CAPABILITY_ARGS: &str = "CAP_ARGS";
const ENV_CNI_ARGS: &str = "CNI_ARGS";
const ENV_CNI_IFNAME: &str = "CNI_IFNAME";

const DEFAULT_NET_DIR: &str = "/etc/cni/net.d";

#[tokio::main(flavor = "current_thread")]
async fn main() {
	logger::install("cnitool");

	let argv: Vec<String> = env::args().collect();
	if argv.len() < 4 {
		usage(&argv);
	}

	match run(&argv[1], &argv[2], &argv[3]).await {
		Ok(()) => exit(0),
		Err(err) => {
			eprintln!("{}", err);
			exit(1);
		}
	}
}

async fn run(command: &str, netname: &str, netns: &str) -> Result<(), CniError> {
	let netdir = env::var(ENV_NET_DIR).unwrap_or_else(|_| DEFAULT_NET_DIR.into());
	let netconf = config::load_conflist(&netdir, netname)?;

	let mut capability_args: HashMap<String, serde_json::Value> = HashMap::new();
	if let Ok(raw) = env::var(ENV_CAPABILITY_ARGS) {
		if !raw.is_empty() {
			capability_args = serde_json::from_str(&raw)?;
		}
	}

	let mut cni_args = Vec::new();
	if let Ok(raw) = env::var(ENV_CNI_ARGS) {
		if !raw.is_empty() {
			cni_args = parse_args(&raw)?;
		}
	}

	let ifname = env::var(ENV_CNI_IFNAME).unwrap_or_else(|_| "eth0".into());

	let netns = absolute(Path::new(netns))?;

	// The container ID is derived from the netns path, so repeated calls
	// against the same namespace address the same attachment.
	let digest = Sha512::digest(netns.to_string_lossy().as_bytes());
	let container_id = format!("cnitool-{}", hex(&digest[..10]));

	let paths: Vec<PathBuf> = env::var(ENV_CNI_PATH)
		.map(|raw| env::split_paths(&raw).collect())
		.unwrap_or_default();
	let cninet = CniConfig::new(paths);

	let rt = RuntimeConf {
		container_id,
		netns: netns.to_string_lossy().into_owned(),
		ifname,
		args: cni_args,
		capability_args,
	};

	match command {
		"add" => {
			let result = cninet.add_network_list(&netconf, &rt).await?;
			let mut out = stdout();
			result.encode(&mut out)?;
			writeln!(out)?;
			Ok(())
		}
		"check" => cninet.check_network_list(&netconf, &rt).await,
		"del" => cninet.del_network_list(&netconf, &rt).await,
		_ => {
			usage(&env::args().collect::<Vec<_>>());
		}
	}
}

fn absolute(path: &Path) -> Result<PathBuf, CniError> {
	if path.is_absolute() {
		Ok(path.into())
	} else {
		Ok(env::current_dir()?.join(path))
	}
}

fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn usage(argv: &[String]) -> ! {
	let exe = argv
		.first()
		.map(|arg| {
			Path::new(arg)
				.file_name()
				.map(|name| name.to_string_lossy().into_owned())
				.unwrap_or_else(|| arg.clone())
		})
		.unwrap_or_else(|| "cnitool".into());

	eprintln!(
		"{}: Add, check, or remove network interfaces from a network namespace",
		exe
	);
	eprintln!("  {} add   <net> <netns>", exe);
	eprintln!("  {} check <net> <netns>", exe);
	eprintln!("  {} del   <net> <netns>", exe);
	exit(1);
}
