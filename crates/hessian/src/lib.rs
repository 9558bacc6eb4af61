//! Remote methods, data structures between server and client are defined here.

pub mod interfaces;

pub use hessian_core::{
    envelope, fsm, middleware, registry, ser_de, service_handler, state_transitions, value, Error,
    SerDeResult, TypeRegistry, Value,
};

/// Default constants used between a client and the remote.
pub mod defaults {

    /// The default port used by the remote
    pub const DEFAULT_PORT: u16 = 4013;
    /// Default timeout duration for request-responses
    pub const DEFAULT_TIMEOUT: &str = "250ms";
    /// Default number of connection attempts
    pub const DEFAULT_RETRIES: u8 = 3;
    /// Connections idle for longer than this are closed by the server
    pub const DEFAULT_IDLE_TIMEOUT: &str = "30s";
}
