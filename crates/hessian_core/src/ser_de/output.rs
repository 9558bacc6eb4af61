//! Writer capability shared by both protocol versions.
//!
//! Registry codecs are written against `&mut dyn HessianOutput`, so the same
//! codec serves Hessian 1 and Hessian 2 streams.

use std::sync::Arc;

use super::err::SerDeResult;
use crate::registry::TypeRegistry;
use crate::value::Value;

/// Outcome of [HessianOutput::write_object_begin].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectBegin {
    /// The shape is already defined; the instance header for definition `n` was written.
    Defined(usize),
    /// A definition header was just written; field names must follow, then the
    /// caller begins the object again to emit the instance header.
    NewDefinition,
    /// No class definitions on this stream: write name/value pairs, then a map end.
    LegacyMap,
}

pub trait HessianOutput {
    /// Registry used to find codecs for composite values.
    fn registry(&self) -> Arc<TypeRegistry>;

    fn write_null(&mut self) -> SerDeResult<()>;

    fn write_bool(&mut self, value: bool) -> SerDeResult<()>;

    fn write_int(&mut self, value: i32) -> SerDeResult<()>;

    fn write_long(&mut self, value: i64) -> SerDeResult<()>;

    fn write_double(&mut self, value: f64) -> SerDeResult<()>;

    /// Milliseconds since the unix epoch.
    fn write_utc_date(&mut self, millis: i64) -> SerDeResult<()>;

    fn write_string(&mut self, value: &str) -> SerDeResult<()>;

    fn write_bytes(&mut self, value: &[u8]) -> SerDeResult<()>;

    /// Begin a list. `None` length starts a streaming list.
    ///
    /// Returns true when the caller must finish with [HessianOutput::write_list_end].
    fn write_list_begin(&mut self, length: Option<usize>, type_name: Option<&str>) -> SerDeResult<bool>;

    fn write_list_end(&mut self) -> SerDeResult<()>;

    fn write_map_begin(&mut self, type_name: Option<&str>) -> SerDeResult<()>;

    fn write_map_end(&mut self) -> SerDeResult<()>;

    fn write_object_begin(&mut self, type_name: &str) -> SerDeResult<ObjectBegin>;

    /// Write the field names of the definition just begun, and remember them.
    fn write_class_fields(&mut self, fields: &[String]) -> SerDeResult<()>;

    /// Field names of definition `index`, as written by [HessianOutput::write_class_fields].
    fn class_fields(&self, index: usize) -> Option<Vec<String>>;

    fn write_ref(&mut self, index: usize) -> SerDeResult<()>;

    /// Writes a back-reference and returns true if `value` was already written.
    /// Otherwise registers it at the next index and returns false.
    ///
    /// The table holds a clone of every registered composite until
    /// [HessianOutput::reset], so no identity is reused within a message.
    fn add_ref(&mut self, value: &Value) -> SerDeResult<bool>;

    /// Take the next reference index for a value that can never be referenced again.
    fn reserve_ref(&mut self);

    /// Write any value, dispatching composites through the registry.
    fn write_object(&mut self, value: &Value) -> SerDeResult<()>;

    /// Call header: version, method name and argument count.
    fn start_call(&mut self, method: &str, arg_count: usize) -> SerDeResult<()>;

    fn complete_call(&mut self) -> SerDeResult<()>;

    fn start_reply(&mut self) -> SerDeResult<()>;

    fn complete_reply(&mut self) -> SerDeResult<()>;

    /// A complete fault reply.
    fn write_fault(&mut self, code: &str, message: &str, detail: Option<&Value>) -> SerDeResult<()>;

    /// Clear the reference, class and type tables before a new message.
    fn reset(&mut self);

    fn flush(&mut self) -> SerDeResult<()>;
}

/// Write one value. Scalars go straight to the output; composites go to the
/// serializer the registry picks for them.
pub(crate) fn write_value(out: &mut dyn HessianOutput, value: &Value) -> SerDeResult<()> {
    match value {
        Value::Null => out.write_null(),
        Value::Bool(v) => out.write_bool(*v),
        Value::Int(v) => out.write_int(*v),
        Value::Long(v) => out.write_long(*v),
        Value::Double(v) => out.write_double(*v),
        Value::Date(v) => out.write_utc_date(*v),
        Value::String(v) => out.write_string(v),
        Value::Binary(v) => out.write_bytes(v),
        composite => {
            let registry = out.registry();
            let serializer = registry.serializer_for(composite)?;
            serializer.write_object(composite, out)
        }
    }
}
