#![warn(missing_docs)]

//! Runtime library for CNI (container networking).
//!
//! This crate implements both halves of the CNI wire contract:
//!
//! - the **runtime** side, used by container runtimes: load network
//!   configuration from disk ([`config`]), resolve it to an ordered plugin
//!   chain, and drive add/check/del/gc/status over external plugin binaries
//!   ([`runtime`], [`exec`]);
//! - the **plugin** side, used by plugin binaries: parse and validate the
//!   environment and STDIN, route to handlers, and reply on STDOUT
//!   ([`skel`], [`reply`], [`delegation`]).
//!
//! # Quick start, runtime side
//!
//! ```no_run
//! use cni_runtime::{config, CniConfig, RuntimeConf};
//!
//! # async fn demo() -> Result<(), cni_runtime::error::CniError> {
//! let list = config::load_conflist("/etc/cni/net.d", "mynet")?;
//! let cni = CniConfig::new(vec!["/opt/cni/bin".into()]);
//! let rt = RuntimeConf {
//! 	container_id: "ctr-1".into(),
//! 	netns: "/var/run/netns/blue".into(),
//! 	ifname: "eth0".into(),
//! 	..Default::default()
//! };
//! let result = cni.add_network_list(&list, &rt).await?;
//! result.encode(&mut std::io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! # Quick start, plugin side
//!
//! See [`skel::Plugin`].

pub use command::Command;
pub use error::CniError;
pub use runtime::{CniConfig, GcArgs, GcAttachment, RuntimeConf};

pub mod args;
pub mod config;
pub mod delegation;
pub mod error;
pub mod exec;
pub mod logger;
pub mod path;
pub mod plugin_config;
pub mod reply;
pub mod result;
pub mod runtime;
pub mod skel;
pub mod utils;
pub mod version;

mod command;
mod dns;
