//! Reader capability shared by both protocol versions.

use std::sync::Arc;

use super::err::SerDeResult;
use crate::registry::TypeRegistry;
use crate::value::Value;

/// A class definition read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDefinition {
    pub type_name: String,
    pub field_names: Vec<String>,
}

pub trait HessianInput {
    /// Registry used to find codecs for typed values.
    fn registry(&self) -> Arc<TypeRegistry>;

    /// Consume a null.
    fn read_null(&mut self) -> SerDeResult<()>;

    fn read_bool(&mut self) -> SerDeResult<bool>;

    fn read_int(&mut self) -> SerDeResult<i32>;

    fn read_long(&mut self) -> SerDeResult<i64>;

    fn read_double(&mut self) -> SerDeResult<f64>;

    /// Milliseconds since the unix epoch.
    fn read_utc_date(&mut self) -> SerDeResult<i64>;

    /// A string, or `None` for null.
    fn read_string(&mut self) -> SerDeResult<Option<String>>;

    /// A binary blob, or `None` for null.
    fn read_bytes(&mut self) -> SerDeResult<Option<Vec<u8>>>;

    /// Read any value.
    fn read_object(&mut self) -> SerDeResult<Value>;

    /// Read a list/map type name, `None` when the stream carries none.
    fn read_type(&mut self) -> SerDeResult<Option<String>>;

    /// Consume a map header, returning its type.
    fn read_map_start(&mut self) -> SerDeResult<Option<String>>;

    /// True if the next byte ends the current aggregate. Never consumes.
    fn is_end(&mut self) -> SerDeResult<bool>;

    /// Consume the end marker.
    fn read_end(&mut self) -> SerDeResult<()>;

    /// Register a composite and return its index.
    fn add_ref(&mut self, value: Value) -> usize;

    /// Replace a registered composite.
    fn set_ref(&mut self, index: usize, value: Value) -> SerDeResult<()>;

    fn get_ref(&self, index: usize) -> SerDeResult<Value>;

    /// Consume the call tag following the version header.
    fn read_call(&mut self) -> SerDeResult<()>;

    fn read_method(&mut self) -> SerDeResult<String>;

    /// Declared argument count, `None` if the protocol does not carry one.
    fn read_method_arg_length(&mut self) -> SerDeResult<Option<usize>>;

    /// Consume whatever terminates a call.
    fn complete_call(&mut self) -> SerDeResult<()>;

    /// Read a complete reply. Fault replies come back as [super::Error::RemoteFault].
    fn read_reply(&mut self) -> SerDeResult<Value>;

    /// Clear the reference, class and type tables.
    fn reset(&mut self);

    /// Clear only the reference table.
    fn reset_references(&mut self);
}
