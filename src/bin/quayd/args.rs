use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub(crate) listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 7419)]
    pub(crate) port: u16,
    /// Path of the backing database. Defaults to a file named after the
    /// listen address in the working directory.
    #[arg(short, long)]
    pub(crate) storage: Option<PathBuf>,
    /// Require this password in every client handshake.
    #[arg(long)]
    pub(crate) password: Option<String>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}
