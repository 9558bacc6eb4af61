//! Hessian 2 reader.

use std::io::Read;
use std::sync::Arc;

use super::consts::*;
use super::err::{Error, Fault, SerDeResult};
use super::input::{HessianInput, ObjectDefinition};
use super::stream::ByteViewer;
use super::text;
use crate::registry::{codecs, TypeRegistry};
use crate::value::Value;

/// Progress through a possibly chunked string or binary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ChunkState {
    #[default]
    Idle,
    Reading { remaining: usize, last: bool },
}

/// Numeric and boolean tags, decoded before coercion.
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
}

/// Decodes a Hessian 2 byte stream.
///
/// Tables grow for the lifetime of the reader; call [HessianInput::reset]
/// between independent messages.
pub struct Hessian2Input<R: Read> {
    viewer: ByteViewer<R>,
    registry: Arc<TypeRegistry>,
    chunk: ChunkState,

    refs: Vec<Value>,
    class_defs: Vec<ObjectDefinition>,
    types: Vec<String>,

    /// Method being decoded, prefixed to errors.
    method: Option<String>,

    /// Composites currently open.
    depth: usize,
}

impl<R: Read> Hessian2Input<R> {
    pub fn new(source: R) -> Self {
        Self::with_registry(source, TypeRegistry::global())
    }

    pub fn with_registry(source: R, registry: Arc<TypeRegistry>) -> Self {
        Self {
            viewer: ByteViewer::new(source),
            registry,
            chunk: ChunkState::Idle,
            refs: vec![],
            class_defs: vec![],
            types: vec![],
            method: None,
            depth: 0,
        }
    }

    /// Next raw byte, `None` at end of stream.
    pub fn read_byte(&mut self) -> SerDeResult<Option<u8>> {
        self.viewer.read_byte()
    }

    /// Read a string one character at a time. Returns `None` once the value is consumed.
    pub fn read_char(&mut self) -> SerDeResult<Option<char>> {
        if self.chunk == ChunkState::Idle {
            let tag = self.viewer.next_byte()?;
            match classify(tag) {
                WireTag::Null => return Ok(None),
                t if t.is_string() => self.start_string(tag)?,
                _ => return Err(self.expect("char", tag)),
            }
        }

        let Some(unit) = self.next_unit()? else {
            return Ok(None);
        };
        let units = if text::is_high_surrogate(unit) {
            let low = self
                .next_unit()?
                .ok_or_else(|| Error::protocol("string ends inside a surrogate pair"))?;
            vec![unit, low]
        } else {
            vec![unit]
        };

        char::decode_utf16(units)
            .next()
            .and_then(Result::ok)
            .map(Some)
            .ok_or_else(|| Error::protocol("bad utf-16 surrogate"))
    }

    /// Read part of a binary value into `buf`.
    ///
    /// Returns the number of bytes copied, or `None` once the value is consumed.
    pub fn read_bytes_into(&mut self, buf: &mut [u8]) -> SerDeResult<Option<usize>> {
        if self.chunk == ChunkState::Idle {
            let tag = self.viewer.next_byte()?;
            match classify(tag) {
                WireTag::Null => return Ok(None),
                t if t.is_binary() => self.start_binary(tag)?,
                _ => return Err(self.expect("binary", tag)),
            }
        }

        loop {
            match self.chunk {
                ChunkState::Idle => return Ok(None),
                ChunkState::Reading {
                    remaining: 0,
                    last: true,
                } => {
                    self.chunk = ChunkState::Idle;
                    return Ok(None);
                }
                ChunkState::Reading {
                    remaining: 0,
                    last: false,
                } => {
                    let tag = self.viewer.next_byte()?;
                    self.start_binary(tag)?;
                }
                ChunkState::Reading { remaining, last } => {
                    let n = remaining.min(buf.len());
                    self.viewer.read_into(&mut buf[..n])?;
                    self.chunk = ChunkState::Reading {
                        remaining: remaining - n,
                        last,
                    };
                    return Ok(Some(n));
                }
            }
        }
    }

    fn start_string(&mut self, tag: u8) -> SerDeResult<()> {
        let (remaining, last) = match classify(tag) {
            WireTag::StringDirect => ((tag - BC_STRING_DIRECT) as usize, true),
            WireTag::StringShort => {
                let low = self.viewer.next_byte()? as usize;
                ((((tag - BC_STRING_SHORT) as usize) << 8) + low, true)
            }
            WireTag::String => (self.viewer.next_u16()?, true),
            WireTag::StringChunk => (self.viewer.next_u16()?, false),
            _ => return Err(self.expect("string chunk", tag)),
        };
        self.chunk = ChunkState::Reading { remaining, last };
        Ok(())
    }

    fn start_binary(&mut self, tag: u8) -> SerDeResult<()> {
        let (remaining, last) = match classify(tag) {
            WireTag::BinaryDirect => ((tag - BC_BINARY_DIRECT) as usize, true),
            WireTag::BinaryShort => {
                let low = self.viewer.next_byte()? as usize;
                ((((tag - BC_BINARY_SHORT) as usize) << 8) + low, true)
            }
            WireTag::Binary => (self.viewer.next_u16()?, true),
            WireTag::BinaryChunk => (self.viewer.next_u16()?, false),
            _ => return Err(self.expect("binary chunk", tag)),
        };
        self.chunk = ChunkState::Reading { remaining, last };
        Ok(())
    }

    /// Next UTF-16 unit of the current string, crossing chunk boundaries.
    fn next_unit(&mut self) -> SerDeResult<Option<u16>> {
        loop {
            match self.chunk {
                ChunkState::Idle => return Ok(None),
                ChunkState::Reading {
                    remaining: 0,
                    last: true,
                } => {
                    self.chunk = ChunkState::Idle;
                    return Ok(None);
                }
                ChunkState::Reading {
                    remaining: 0,
                    last: false,
                } => {
                    let tag = self.viewer.next_byte()?;
                    self.start_string(tag)?;
                }
                ChunkState::Reading { remaining, last } => {
                    self.chunk = ChunkState::Reading {
                        remaining: remaining - 1,
                        last,
                    };
                    let first = self.viewer.next_byte()?;
                    let viewer = &mut self.viewer;
                    return text::decode_unit(first, || viewer.next_byte()).map(Some);
                }
            }
        }
    }

    fn read_string_body(&mut self, tag: u8) -> SerDeResult<String> {
        self.start_string(tag)?;
        let mut units = vec![];
        while let Some(unit) = self.next_unit()? {
            units.push(unit);
        }
        text::units_to_string(&units)
    }

    fn read_binary_body(&mut self, tag: u8) -> SerDeResult<Vec<u8>> {
        self.start_binary(tag)?;
        let mut data = vec![];
        loop {
            match self.chunk {
                ChunkState::Idle
                | ChunkState::Reading {
                    remaining: 0,
                    last: true,
                } => {
                    self.chunk = ChunkState::Idle;
                    return Ok(data);
                }
                ChunkState::Reading {
                    remaining: 0,
                    last: false,
                } => {
                    let tag = self.viewer.next_byte()?;
                    self.start_binary(tag)?;
                }
                ChunkState::Reading { remaining, last } => {
                    let start = data.len();
                    data.resize(start + remaining, 0);
                    self.viewer.read_into(&mut data[start..])?;
                    self.chunk = ChunkState::Reading { remaining: 0, last };
                }
            }
        }
    }

    /// Decode a numeric or boolean tag. `None` if `tag` is neither.
    fn read_scalar(&mut self, tag: u8) -> SerDeResult<Option<Scalar>> {
        let scalar = match classify(tag) {
            WireTag::Null => Scalar::Null,
            WireTag::True => Scalar::Bool(true),
            WireTag::False => Scalar::Bool(false),

            WireTag::IntDirect => Scalar::Int(tag as i32 - BC_INT_ZERO as i32),
            WireTag::IntByte => {
                let b = self.viewer.next_byte()? as i32;
                Scalar::Int(((tag as i32 - BC_INT_BYTE_ZERO as i32) << 8) + b)
            }
            WireTag::IntShort => {
                let [b1, b2] = self.viewer.next_bytes_fixed()?;
                Scalar::Int(
                    ((tag as i32 - BC_INT_SHORT_ZERO as i32) << 16) + ((b1 as i32) << 8) + b2 as i32,
                )
            }
            WireTag::Int => Scalar::Int(i32::from_be_bytes(self.viewer.next_bytes_fixed()?)),

            WireTag::LongDirect => Scalar::Long(tag as i64 - BC_LONG_ZERO as i64),
            WireTag::LongByte => {
                let b = self.viewer.next_byte()? as i64;
                Scalar::Long(((tag as i64 - BC_LONG_BYTE_ZERO as i64) << 8) + b)
            }
            WireTag::LongShort => {
                let [b1, b2] = self.viewer.next_bytes_fixed()?;
                Scalar::Long(
                    ((tag as i64 - BC_LONG_SHORT_ZERO as i64) << 16)
                        + ((b1 as i64) << 8)
                        + b2 as i64,
                )
            }
            WireTag::LongInt => {
                Scalar::Long(i32::from_be_bytes(self.viewer.next_bytes_fixed()?) as i64)
            }
            WireTag::Long => Scalar::Long(i64::from_be_bytes(self.viewer.next_bytes_fixed()?)),

            WireTag::DoubleZero => Scalar::Double(0.0),
            WireTag::DoubleOne => Scalar::Double(1.0),
            WireTag::DoubleByte => Scalar::Double(self.viewer.next_byte()? as i8 as f64),
            WireTag::DoubleShort => {
                Scalar::Double(i16::from_be_bytes(self.viewer.next_bytes_fixed()?) as f64)
            }
            WireTag::DoubleMill => {
                let mills = i32::from_be_bytes(self.viewer.next_bytes_fixed()?);
                Scalar::Double(0.001 * mills as f64)
            }
            WireTag::Double => Scalar::Double(f64::from_bits(u64::from_be_bytes(
                self.viewer.next_bytes_fixed()?,
            ))),

            _ => return Ok(None),
        };
        Ok(Some(scalar))
    }

    fn read_length(&mut self) -> SerDeResult<usize> {
        let length = self.read_int()?;
        usize::try_from(length)
            .map_err(|_| self.protocol_error(format!("negative length {}", length)))
    }

    fn read_object_definition(&mut self) -> SerDeResult<()> {
        let type_name = self
            .read_string()?
            .ok_or_else(|| self.protocol_error("class definition without a type name"))?;
        let count = self.read_length()?;

        let mut field_names = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = self
                .read_string()?
                .ok_or_else(|| self.protocol_error("null field name in class definition"))?;
            field_names.push(name);
        }

        self.class_defs.push(ObjectDefinition {
            type_name,
            field_names,
        });
        Ok(())
    }

    fn read_instance(&mut self, index: usize) -> SerDeResult<Value> {
        let Some(definition) = self.class_defs.get(index).cloned() else {
            return Err(self.protocol_error(format!(
                "object definition index {} out of range, {} defined",
                index,
                self.class_defs.len()
            )));
        };

        let registry = self.registry.clone();
        registry.deserializer_for(&definition.type_name).read_object(
            self,
            &definition.type_name,
            &definition.field_names,
        )
    }

    fn read_object_tagged(&mut self, tag: u8) -> SerDeResult<Value> {
        let kind = classify(tag);

        if let Some(scalar) = self.read_scalar(tag)? {
            return Ok(match scalar {
                Scalar::Null => Value::Null,
                Scalar::Bool(v) => Value::Bool(v),
                Scalar::Int(v) => Value::Int(v),
                Scalar::Long(v) => Value::Long(v),
                Scalar::Double(v) => Value::Double(v),
            });
        }

        match kind {
            WireTag::Date => Ok(Value::Date(i64::from_be_bytes(
                self.viewer.next_bytes_fixed()?,
            ))),
            WireTag::DateMinute => {
                let minutes = i32::from_be_bytes(self.viewer.next_bytes_fixed()?);
                Ok(Value::Date(minutes as i64 * 60_000))
            }

            t if t.is_string() => Ok(Value::String(self.read_string_body(tag)?)),
            t if t.is_binary() => Ok(Value::Binary(self.read_binary_body(tag)?)),

            WireTag::ListVariable => {
                let type_name = self.read_type()?;
                codecs::read_list(self, type_name, None)
            }
            WireTag::ListFixed => {
                let type_name = self.read_type()?;
                let length = self.read_length()?;
                codecs::read_list(self, type_name, Some(length))
            }
            WireTag::ListDirect => {
                let type_name = self.read_type()?;
                codecs::read_list(self, type_name, Some((tag - BC_LIST_DIRECT) as usize))
            }
            WireTag::ListVariableUntyped => codecs::read_list(self, None, None),
            WireTag::ListFixedUntyped => {
                let length = self.read_length()?;
                codecs::read_list(self, None, Some(length))
            }
            WireTag::ListDirectUntyped => {
                codecs::read_list(self, None, Some((tag - BC_LIST_DIRECT_UNTYPED) as usize))
            }

            WireTag::MapUntyped => codecs::read_map(self, None),
            WireTag::Map => {
                let type_name = self.read_type()?.unwrap_or_default();
                let registry = self.registry.clone();
                registry
                    .deserializer_for(&type_name)
                    .read_map(self, &type_name)
            }

            WireTag::ClassDef => {
                self.read_object_definition()?;
                self.read_object()
            }
            WireTag::ObjectDirect => self.read_instance((tag - BC_OBJECT_DIRECT) as usize),
            WireTag::Object => {
                let index = self.read_length()?;
                self.read_instance(index)
            }

            WireTag::Ref => {
                let index = self.read_length()?;
                self.get_ref(index)
            }

            _ => Err(self.protocol_error(format!("unknown code 0x{:02x} ({})", tag, kind.kind()))),
        }
    }

    /// Error with the buffered context around the cursor.
    fn protocol_error<S: AsRef<str>>(&self, message: S) -> Error {
        let message = match &self.method {
            Some(method) => format!("{}: {}", method, message.as_ref()),
            None => message.as_ref().to_string(),
        };
        Error::Protocol(format!("{}\n  {}", message, self.viewer.context()))
    }

    /// Error for an unexpected tag. Re-reads the offending value when it is
    /// still buffered so the message can show it.
    fn expect(&mut self, expected: &str, tag: u8) -> Error {
        let context = self.viewer.context();
        let kind = classify(tag);
        let mut message = format!("expected {} at 0x{:02x} {}", expected, tag, kind.kind());

        if !matches!(kind, WireTag::End | WireTag::Reserved) && self.viewer.unread(tag) {
            self.chunk = ChunkState::Idle;
            if let Ok(value) = self.read_object() {
                message.push_str(&format!(" ({})", value));
            }
        }

        if let Some(method) = &self.method {
            message = format!("{}: {}", method, message);
        }
        Error::Protocol(format!("{}\n  {}", message, context))
    }
}

impl<R: Read> HessianInput for Hessian2Input<R> {
    fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    fn read_null(&mut self) -> SerDeResult<()> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_NULL => Ok(()),
            _ => Err(self.expect("null", tag)),
        }
    }

    fn read_bool(&mut self) -> SerDeResult<bool> {
        let tag = self.viewer.next_byte()?;
        match self.read_scalar(tag)? {
            Some(Scalar::Null) => Ok(false),
            Some(Scalar::Bool(v)) => Ok(v),
            Some(Scalar::Int(v)) => Ok(v != 0),
            Some(Scalar::Long(v)) => Ok(v != 0),
            Some(Scalar::Double(v)) => Ok(v != 0.0),
            None => Err(self.expect("boolean", tag)),
        }
    }

    fn read_int(&mut self) -> SerDeResult<i32> {
        let tag = self.viewer.next_byte()?;
        match self.read_scalar(tag)? {
            Some(Scalar::Null) => Ok(0),
            Some(Scalar::Bool(v)) => Ok(v as i32),
            Some(Scalar::Int(v)) => Ok(v),
            Some(Scalar::Long(v)) => Ok(v as i32),
            Some(Scalar::Double(v)) => Ok(v as i32),
            None => Err(self.expect("integer", tag)),
        }
    }

    fn read_long(&mut self) -> SerDeResult<i64> {
        let tag = self.viewer.next_byte()?;
        match self.read_scalar(tag)? {
            Some(Scalar::Null) => Ok(0),
            Some(Scalar::Bool(v)) => Ok(v as i64),
            Some(Scalar::Int(v)) => Ok(v as i64),
            Some(Scalar::Long(v)) => Ok(v),
            Some(Scalar::Double(v)) => Ok(v as i64),
            None => Err(self.expect("long", tag)),
        }
    }

    fn read_double(&mut self) -> SerDeResult<f64> {
        let tag = self.viewer.next_byte()?;
        match self.read_scalar(tag)? {
            Some(Scalar::Null) => Ok(0.0),
            Some(Scalar::Bool(v)) => Ok(if v { 1.0 } else { 0.0 }),
            Some(Scalar::Int(v)) => Ok(v as f64),
            Some(Scalar::Long(v)) => Ok(v as f64),
            Some(Scalar::Double(v)) => Ok(v),
            None => Err(self.expect("double", tag)),
        }
    }

    fn read_utc_date(&mut self) -> SerDeResult<i64> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_DATE => Ok(i64::from_be_bytes(self.viewer.next_bytes_fixed()?)),
            BC_DATE_MINUTE => {
                let minutes = i32::from_be_bytes(self.viewer.next_bytes_fixed()?);
                Ok(minutes as i64 * 60_000)
            }
            _ => Err(self.expect("date", tag)),
        }
    }

    fn read_string(&mut self) -> SerDeResult<Option<String>> {
        let tag = self.viewer.next_byte()?;

        if classify(tag).is_string() {
            return self.read_string_body(tag).map(Some);
        }

        match self.read_scalar(tag)? {
            Some(Scalar::Null) => Ok(None),
            Some(Scalar::Bool(v)) => Ok(Some(v.to_string())),
            Some(Scalar::Int(v)) => Ok(Some(v.to_string())),
            Some(Scalar::Long(v)) => Ok(Some(v.to_string())),
            Some(Scalar::Double(v)) => Ok(Some(v.to_string())),
            None => Err(self.expect("string", tag)),
        }
    }

    fn read_bytes(&mut self) -> SerDeResult<Option<Vec<u8>>> {
        let tag = self.viewer.next_byte()?;
        match classify(tag) {
            WireTag::Null => Ok(None),
            t if t.is_binary() => self.read_binary_body(tag).map(Some),
            _ => Err(self.expect("bytes", tag)),
        }
    }

    fn read_object(&mut self) -> SerDeResult<Value> {
        if self.depth >= MAX_NESTING {
            return Err(self.protocol_error(format!(
                "values nested deeper than {} levels",
                MAX_NESTING
            )));
        }

        self.depth += 1;
        let value = match self.viewer.next_byte() {
            Ok(tag) => self.read_object_tagged(tag),
            Err(e) => Err(e),
        };
        self.depth -= 1;

        value
    }

    fn read_type(&mut self) -> SerDeResult<Option<String>> {
        let tag = self.viewer.peek()?.ok_or_else(Error::unexpected_eof)?;

        if classify(tag).is_string() {
            let type_name = self.read_string()?.unwrap_or_default();
            self.types.push(type_name.clone());
            return Ok(Some(type_name));
        }

        let index = self.read_length()?;
        match self.types.get(index) {
            Some(type_name) => Ok(Some(type_name.clone())),
            None => Err(self.protocol_error(format!(
                "type ref #{} is greater than the number of valid types ({})",
                index,
                self.types.len()
            ))),
        }
    }

    fn read_map_start(&mut self) -> SerDeResult<Option<String>> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_MAP => self.read_type(),
            BC_MAP_UNTYPED => Ok(None),
            _ => Err(self.expect("map", tag)),
        }
    }

    fn is_end(&mut self) -> SerDeResult<bool> {
        Ok(matches!(self.viewer.peek()?, Some(BC_END) | None))
    }

    fn read_end(&mut self) -> SerDeResult<()> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_END => Ok(()),
            _ => Err(self.expect("end of map", tag)),
        }
    }

    fn add_ref(&mut self, value: Value) -> usize {
        self.refs.push(value);
        self.refs.len() - 1
    }

    fn set_ref(&mut self, index: usize, value: Value) -> SerDeResult<()> {
        match self.refs.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::protocol(format!("ref #{} is not registered", index))),
        }
    }

    fn get_ref(&self, index: usize) -> SerDeResult<Value> {
        self.refs.get(index).cloned().ok_or_else(|| {
            self.protocol_error(format!(
                "ref #{} is out of range, {} registered",
                index,
                self.refs.len()
            ))
        })
    }

    fn read_call(&mut self) -> SerDeResult<()> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_CALL => Ok(()),
            _ => Err(self.expect("hessian call ('C')", tag)),
        }
    }

    fn read_method(&mut self) -> SerDeResult<String> {
        let method = self
            .read_string()?
            .ok_or_else(|| self.protocol_error("null method name"))?;
        self.method = Some(method.clone());
        Ok(method)
    }

    fn read_method_arg_length(&mut self) -> SerDeResult<Option<usize>> {
        self.read_length().map(Some)
    }

    fn complete_call(&mut self) -> SerDeResult<()> {
        Ok(())
    }

    fn read_reply(&mut self) -> SerDeResult<Value> {
        let mut tag = self.viewer.next_byte()?;

        if tag == BC_VERSION {
            let major = self.viewer.next_byte()?;
            let minor = self.viewer.next_byte()?;
            log::trace!("reply version {}.{}", major, minor);
            tag = self.viewer.next_byte()?;
        }

        match tag {
            BC_REPLY => self.read_object(),
            BC_FAULT => {
                let fault = self.read_object()?;
                Err(Error::RemoteFault(Fault::from_value(&fault)?))
            }
            _ => Err(self.expect("hessian reply", tag)),
        }
    }

    fn reset(&mut self) {
        self.reset_references();
        self.class_defs.clear();
        self.types.clear();
        self.chunk = ChunkState::Idle;
        self.method = None;
    }

    fn reset_references(&mut self) {
        self.refs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser_de::{Hessian2Output, HessianOutput};

    fn input(bytes: &[u8]) -> Hessian2Input<&[u8]> {
        Hessian2Input::new(bytes)
    }

    fn written<F>(write: F) -> Vec<u8>
    where
        F: FnOnce(&mut Hessian2Output<&mut Vec<u8>>) -> SerDeResult<()>,
    {
        let mut bytes = vec![];
        let mut out = Hessian2Output::new(&mut bytes);
        write(&mut out).unwrap();
        out.flush().unwrap();
        drop(out);
        bytes
    }

    #[test]
    fn test_int_boundaries() {
        for value in [
            0,
            -16,
            47,
            48,
            -17,
            2047,
            -2048,
            2048,
            -2049,
            262143,
            -262144,
            262144,
            i32::MIN,
            i32::MAX,
        ] {
            let bytes = written(|o| o.write_int(value));
            assert_eq!(input(&bytes).read_int().unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_long_boundaries() {
        for value in [
            0,
            -8,
            15,
            16,
            -9,
            2047,
            -2048,
            2048,
            -2049,
            262143,
            -262144,
            262144,
            i32::MAX as i64,
            i32::MIN as i64,
            i32::MAX as i64 + 1,
            i32::MIN as i64 - 1,
            i64::MIN,
            i64::MAX,
        ] {
            let bytes = written(|o| o.write_long(value));
            assert_eq!(input(&bytes).read_long().unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_double_boundaries() {
        for value in [
            0.0,
            1.0,
            -1.0,
            127.0,
            -128.0,
            32767.0,
            -32768.0,
            0.001,
            123.456,
            -0.5,
            f64::MIN_POSITIVE,
            f64::MAX,
            f64::MIN,
            f64::INFINITY,
        ] {
            let bytes = written(|o| o.write_double(value));
            assert_eq!(input(&bytes).read_double().unwrap(), value, "value {}", value);
        }

        let bytes = written(|o| o.write_double(f64::NAN));
        assert!(input(&bytes).read_double().unwrap().is_nan());

        let bytes = written(|o| o.write_double(-0.0));
        let negative_zero = input(&bytes).read_double().unwrap();
        assert_eq!(negative_zero, 0.0);
        assert!(negative_zero.is_sign_negative());
    }

    #[test]
    fn test_coercion_matrix() {
        // booleans and nulls are valid numeric sources
        assert_eq!(input(b"T").read_int().unwrap(), 1);
        assert_eq!(input(b"F").read_long().unwrap(), 0);
        assert_eq!(input(b"N").read_double().unwrap(), 0.0);
        assert_eq!(input(b"T").read_double().unwrap(), 1.0);

        // doubles truncate into integers
        let bytes = written(|o| o.write_double(2.75));
        assert_eq!(input(&bytes).read_int().unwrap(), 2);
        assert_eq!(input(&bytes).read_long().unwrap(), 2);

        // mill-scaled doubles coerce too
        let bytes = written(|o| o.write_double(3.5));
        assert_eq!(input(&bytes).read_int().unwrap(), 3);

        // longs and ints cross over
        let bytes = written(|o| o.write_long(300));
        assert_eq!(input(&bytes).read_int().unwrap(), 300);
        let bytes = written(|o| o.write_int(-5));
        assert_eq!(input(&bytes).read_double().unwrap(), -5.0);

        // numbers are truthy when non-zero
        let bytes = written(|o| o.write_int(7));
        assert!(input(&bytes).read_bool().unwrap());
        assert!(!input(b"\x90").read_bool().unwrap());

        // numbers read as strings
        assert_eq!(input(b"\x9a").read_string().unwrap().as_deref(), Some("10"));
    }

    #[test]
    fn test_coercion_rejects_strings() {
        let err = input(b"\x01a").read_int().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("expected integer at 0x01 string (a)"), "{}", message);
    }

    #[test]
    fn test_dates() {
        for millis in [0, 1, 60_000, -60_000, 1_700_000_000_123, 1_700_000_040_000] {
            let bytes = written(|o| o.write_utc_date(millis));
            assert_eq!(input(&bytes).read_utc_date().unwrap(), millis);
            assert_eq!(input(&bytes).read_object().unwrap(), Value::Date(millis));
        }
    }

    #[test]
    fn test_strings() {
        let long = "long ".repeat(300);
        let chunked = "已发".repeat(STRING_CHUNK_MAX);
        for s in ["", "a", "未发送", "how about that 👏👏👏", long.as_str(), chunked.as_str()] {
            let bytes = written(|o| o.write_string(s));
            assert_eq!(input(&bytes).read_string().unwrap().as_deref(), Some(s));
        }

        assert_eq!(input(b"N").read_string().unwrap(), None);
    }

    #[test]
    fn test_chunked_string_reassembles() {
        let s: String = (0..STRING_CHUNK_MAX * 2 + 7)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let bytes = written(|o| o.write_string(&s));

        let chunk_headers = bytes.iter().filter(|b| **b == BC_STRING_CHUNK).count();
        assert_eq!(chunk_headers, 2);
        assert_eq!(input(&bytes).read_string().unwrap().unwrap(), s);
    }

    #[test]
    fn test_read_char_walks_chunks() {
        let mut s = "x".repeat(STRING_CHUNK_MAX - 1);
        s.push('👏');
        s.push('é');
        let bytes = written(|o| o.write_string(&s));

        let mut reader = input(&bytes);
        let mut out = String::new();
        while let Some(c) = reader.read_char().unwrap() {
            out.push(c);
        }
        assert_eq!(out, s);
    }

    #[test]
    fn test_binary() {
        let big: Vec<u8> = (0..BINARY_CHUNK_MAX * 2 + 3).map(|i| i as u8).collect();
        for data in [vec![], vec![1, 2, 3], vec![0xff; 1023], vec![7; 1024], big] {
            let bytes = written(|o| o.write_bytes(&data));
            assert_eq!(input(&bytes).read_bytes().unwrap(), Some(data.clone()));
        }
        assert_eq!(input(b"N").read_bytes().unwrap(), None);
    }

    #[test]
    fn test_read_bytes_into_streams_chunks() {
        let data: Vec<u8> = (0..BINARY_CHUNK_MAX + 100).map(|i| (i * 7) as u8).collect();
        let bytes = written(|o| o.write_bytes(&data));

        let mut reader = input(&bytes);
        let mut buf = [0u8; 1000];
        let mut out = vec![];
        while let Some(n) = reader.read_bytes_into(&mut buf).unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_null_and_end() {
        input(b"N").read_null().unwrap();
        assert!(input(b"T").read_null().is_err());

        let mut reader = input(b"Z\x90");
        assert!(reader.is_end().unwrap());
        // is_end never consumes
        assert!(reader.is_end().unwrap());
        reader.read_end().unwrap();
        assert!(!reader.is_end().unwrap());
        assert_eq!(reader.read_int().unwrap(), 0);
    }

    #[test]
    fn test_unknown_code() {
        let err = input(b"E").read_object().unwrap_err();
        assert!(err.to_string().contains("unknown code 0x45"));

        // a stray end marker is not a value
        assert!(input(b"Z").read_object().is_err());
    }

    #[test]
    fn test_out_of_range_refs() {
        let err = input(&[BC_REF, 0x92]).read_object().unwrap_err();
        assert!(err.to_string().contains("ref #2 is out of range"));

        let err = input(&[0x61]).read_object().unwrap_err();
        assert!(err.to_string().contains("object definition index 1 out of range"));

        let err = input(&[BC_LIST_DIRECT + 1, 0x93, 0x90]).read_object().unwrap_err();
        assert!(err.to_string().contains("type ref #3"));
    }

    #[test]
    fn test_truncated_stream() {
        let err = input(&[BC_INT, 0x00]).read_int().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = input(&[0x05, b'a', b'b']).read_string().unwrap_err();
        assert!(err.to_string().contains("unexpected end of file"));
    }

    #[test]
    fn test_streaming_lists() {
        // empty and non-empty variable-length lists, untyped and typed
        let value = input(&[BC_LIST_VARIABLE_UNTYPED, BC_END]).read_object().unwrap();
        assert!(value.as_list().unwrap().read().items.is_empty());

        let bytes = written(|o| {
            o.write_list_begin(None, Some("[string"))?;
            o.write_string("a")?;
            o.write_string("b")?;
            o.write_list_end()
        });
        let value = input(&bytes).read_object().unwrap();
        let list = value.as_list().unwrap().read();
        assert_eq!(list.type_name.as_deref(), Some("[string"));
        assert_eq!(list.items, vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_type_refs_resolve() {
        let bytes = written(|o| {
            o.write_list_begin(Some(1), Some("[int"))?;
            o.write_int(1)?;
            o.write_list_begin(Some(1), Some("[int"))?;
            o.write_int(2)
        });

        let mut reader = input(&bytes);
        for expected in [1, 2] {
            let value = reader.read_object().unwrap();
            let list = value.as_list().unwrap().read();
            assert_eq!(list.type_name.as_deref(), Some("[int"));
            assert_eq!(list.items, vec![Value::Int(expected)]);
        }
    }

    #[test]
    fn test_reply_and_fault() {
        let bytes = written(|o| o.reply(&Value::from("ok")));
        assert_eq!(input(&bytes).read_reply().unwrap(), Value::from("ok"));

        let bytes = written(|o| o.write_fault("ServiceException", "boom", None));
        match input(&bytes).read_reply() {
            Err(Error::RemoteFault(fault)) => {
                assert_eq!(fault.code, "ServiceException");
                assert_eq!(fault.message, "boom");
            }
            other => panic!("expected fault, got {:?}", other),
        }

        let err = input(b"H\x02\x00X").read_reply().unwrap_err();
        assert!(err.to_string().contains("expected hessian reply"));
    }

    #[test]
    fn test_call_header() {
        let bytes = written(|o| o.call("hello", &[Value::Int(1)]));
        let mut reader = input(&bytes[3..]);
        reader.read_call().unwrap();
        assert_eq!(reader.read_method().unwrap(), "hello");
        assert_eq!(reader.read_method_arg_length().unwrap(), Some(1));
        assert_eq!(reader.read_object().unwrap(), Value::Int(1));
    }

    #[test]
    fn test_errors_name_the_method() {
        let bytes = written(|o| o.start_call("add", 1));
        let mut bytes = bytes[3..].to_vec();
        bytes.push(b'E');

        let mut reader = input(&bytes);
        reader.read_call().unwrap();
        reader.read_method().unwrap();
        reader.read_method_arg_length().unwrap();
        let err = reader.read_object().unwrap_err();
        assert!(err.to_string().contains("add: unknown code"));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |depth: usize| {
            let mut bytes = vec![BC_LIST_VARIABLE_UNTYPED; depth];
            bytes.push(BC_NULL);
            bytes.extend(vec![BC_END; depth]);
            bytes
        };

        let value = input(&nested(MAX_NESTING - 1)).read_object().unwrap();
        assert_eq!(value.as_list().unwrap().read().items.len(), 1);

        let err = input(&nested(MAX_NESTING)).read_object().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{:?}", err);

        // unterminated nesting far past the bound fails the same way
        let err = input(&vec![BC_LIST_VARIABLE_UNTYPED; 200_000]).read_object().unwrap_err();
        assert!(err.to_string().contains("nested deeper than"));
    }
}
