//! Hessian 1 and 2 binary serialization, and the call/reply envelope
//! that carries it between a client and a remote service.
//!
//! - [value]: the wire value model
//! - [ser_de]: byte-level readers and writers, and the serde bridge
//! - [registry]: per-type field lists and the built-in type codecs
//! - [envelope]: call and reply framing
//! - [middleware]: TCP dispatcher and client context manager

pub mod envelope;
pub mod fsm;
pub mod middleware;
pub mod registry;
pub mod ser_de;
pub mod value;

pub use registry::TypeRegistry;
pub use ser_de::{deserialize, from_value, serialize, to_value, Error, Fault, SerDeResult};
pub use value::Value;

// used by exported macros
#[doc(hidden)]
pub use async_trait::async_trait;
#[doc(hidden)]
pub use log;
