//! Command-line args for client

use std::fmt::Display;
use std::net::Ipv4Addr;

use clap::Parser;
use hessian::envelope::Version;

#[derive(Parser)]
pub struct ClientArgs {
    /// The IPv4 address of the server.
    #[clap(short, long)]
    #[clap(default_value_t = Ipv4Addr::LOCALHOST)]
    pub target: Ipv4Addr,

    /// The server port to connect to.
    #[clap(short, long)]
    #[clap(default_value_t = hessian::defaults::DEFAULT_PORT)]
    pub port: u16,

    /// The timeout duration
    #[clap(short, long)]
    #[clap(default_value = hessian::defaults::DEFAULT_TIMEOUT)]
    pub request_timeout: humantime::Duration,

    /// The number of connection attempts before returning an error
    #[clap(short, long)]
    #[clap(default_value_t = hessian::defaults::DEFAULT_RETRIES)]
    pub num_retries: u8,

    /// Protocol version used for calls
    #[clap(short = 'v', long)]
    #[clap(default_value_t = ProtocolVersion::Hessian2)]
    pub protocol: ProtocolVersion,

    /// Send `name__argc` method names
    #[clap(long)]
    pub mangle_overloads: bool,

    /// Message passed to the failing method
    #[clap(long)]
    #[clap(default_value = "something went wrong")]
    pub fail_message: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ProtocolVersion {
    Hessian1,
    Hessian2,
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hessian1 => write!(f, "hessian1"),
            Self::Hessian2 => write!(f, "hessian2"),
        }
    }
}

impl From<ProtocolVersion> for Version {
    fn from(v: ProtocolVersion) -> Self {
        match v {
            ProtocolVersion::Hessian1 => Version::Hessian1,
            ProtocolVersion::Hessian2 => Version::Hessian2,
        }
    }
}
