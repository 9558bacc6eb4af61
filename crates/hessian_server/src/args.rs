//! CLI args

use std::net::Ipv4Addr;

use clap::Parser;

/// Hessian demo service arguments
#[derive(Parser)]
pub(crate) struct ServerArgs {
    /// The IPv4 address for the server to bind to.
    #[clap(short, long)]
    #[clap(default_value_t = Ipv4Addr::LOCALHOST)]
    pub address: Ipv4Addr,

    /// The port number for the server to listen on.
    #[clap(short, long)]
    #[clap(default_value_t = hessian::defaults::DEFAULT_PORT)]
    pub port: u16,

    /// Close connections that stay idle for this long
    #[clap(short, long)]
    #[clap(default_value = hessian::defaults::DEFAULT_IDLE_TIMEOUT)]
    pub idle_timeout: humantime::Duration,

    /// Serve connections one at a time instead of in parallel.
    #[clap(long)]
    pub sequential: bool,
}
