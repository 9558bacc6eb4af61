//! Hessian 1 reader.

use std::io::Read;
use std::sync::Arc;

use super::consts::*;
use super::err::{Error, Fault, SerDeResult};
use super::input::HessianInput;
use super::stream::ByteViewer;
use super::text;
use crate::registry::{codecs, TypeRegistry};
use crate::value::{Map, Shared, Value};

pub struct Hessian1Input<R: Read> {
    viewer: ByteViewer<R>,
    registry: Arc<TypeRegistry>,
    refs: Vec<Value>,
    method: Option<String>,
    depth: usize,
}

impl<R: Read> Hessian1Input<R> {
    pub fn new(source: R) -> Self {
        Self::with_registry(source, TypeRegistry::global())
    }

    pub fn with_registry(source: R, registry: Arc<TypeRegistry>) -> Self {
        Self {
            viewer: ByteViewer::new(source),
            registry,
            refs: vec![],
            method: None,
            depth: 0,
        }
    }

    /// Read a `H name value` call header, `None` once the method follows.
    pub fn read_header(&mut self) -> SerDeResult<Option<(String, Value)>> {
        if self.viewer.peek()? != Some(H1_HEADER) {
            return Ok(None);
        }
        self.viewer.next_byte()?;
        let name = self.read_short_string()?;
        let value = self.read_object()?;
        Ok(Some((name, value)))
    }

    fn skip_headers(&mut self) -> SerDeResult<()> {
        while let Some((name, value)) = self.read_header()? {
            log::debug!("skipping header {} = {}", name, value);
        }
        Ok(())
    }

    fn read_object_nested(&mut self) -> SerDeResult<Value> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_NULL => Ok(Value::Null),
            BC_TRUE => Ok(Value::Bool(true)),
            BC_FALSE => Ok(Value::Bool(false)),
            BC_INT => Ok(Value::Int(i32::from_be_bytes(self.viewer.next_bytes_fixed()?))),
            BC_LONG => Ok(Value::Long(i64::from_be_bytes(self.viewer.next_bytes_fixed()?))),
            BC_DOUBLE => Ok(Value::Double(f64::from_bits(u64::from_be_bytes(
                self.viewer.next_bytes_fixed()?,
            )))),
            H1_DATE => Ok(Value::Date(i64::from_be_bytes(self.viewer.next_bytes_fixed()?))),
            H1_STRING | H1_STRING_CHUNK => Ok(Value::String(self.read_string_body(tag)?)),
            H1_BINARY | H1_BINARY_CHUNK => Ok(Value::Binary(self.read_binary_body(tag)?)),

            H1_LIST => {
                // the length is advisory; lists always end with `z`
                let (type_name, _length) = self.read_list_prefix()?;
                codecs::read_list(self, type_name, None)
            }
            H1_MAP => match self.read_type()? {
                Some(type_name) => {
                    let registry = self.registry.clone();
                    registry
                        .deserializer_for(&type_name)
                        .read_map(self, &type_name)
                }
                None => codecs::read_map(self, None),
            },
            H1_REF => {
                let index = i32::from_be_bytes(self.viewer.next_bytes_fixed()?);
                let index = usize::try_from(index)
                    .map_err(|_| self.protocol_error(format!("negative ref #{}", index)))?;
                self.get_ref(index)
            }

            _ => Err(self.protocol_error(format!("unknown code 0x{:02x}", tag))),
        }
    }

    /// `len16 utf8` without a leading tag.
    fn read_short_string(&mut self) -> SerDeResult<String> {
        let length = self.viewer.next_u16()?;
        let mut units = Vec::with_capacity(length);
        for _ in 0..length {
            units.push(self.next_unit()?);
        }
        text::units_to_string(&units)
    }

    fn next_unit(&mut self) -> SerDeResult<u16> {
        let first = self.viewer.next_byte()?;
        let viewer = &mut self.viewer;
        text::decode_unit(first, || viewer.next_byte())
    }

    fn read_string_body(&mut self, mut tag: u8) -> SerDeResult<String> {
        let mut units = vec![];
        loop {
            let length = self.viewer.next_u16()?;
            for _ in 0..length {
                units.push(self.next_unit()?);
            }

            if tag == H1_STRING {
                return text::units_to_string(&units);
            }
            tag = self.viewer.next_byte()?;
            if tag != H1_STRING && tag != H1_STRING_CHUNK {
                return Err(self.expect("string chunk", tag));
            }
        }
    }

    fn read_binary_body(&mut self, mut tag: u8) -> SerDeResult<Vec<u8>> {
        let mut data = vec![];
        loop {
            let length = self.viewer.next_u16()?;
            let start = data.len();
            data.resize(start + length, 0);
            self.viewer.read_into(&mut data[start..])?;

            if tag == H1_BINARY {
                return Ok(data);
            }
            tag = self.viewer.next_byte()?;
            if tag != H1_BINARY && tag != H1_BINARY_CHUNK {
                return Err(self.expect("binary chunk", tag));
            }
        }
    }

    /// Decode a numeric or boolean tag, `None` if it is neither.
    fn read_number(&mut self, tag: u8) -> SerDeResult<Option<Number>> {
        Ok(Some(match tag {
            BC_NULL => Number::Int(0),
            BC_TRUE => Number::Int(1),
            BC_FALSE => Number::Int(0),
            BC_INT => Number::Int(i32::from_be_bytes(self.viewer.next_bytes_fixed()?) as i64),
            BC_LONG => Number::Int(i64::from_be_bytes(self.viewer.next_bytes_fixed()?)),
            BC_DOUBLE => Number::Double(f64::from_bits(u64::from_be_bytes(
                self.viewer.next_bytes_fixed()?,
            ))),
            _ => return Ok(None),
        }))
    }

    /// Optional `t len16 type` and `l b32` list prefixes.
    fn read_list_prefix(&mut self) -> SerDeResult<(Option<String>, Option<usize>)> {
        let type_name = self.read_type()?;
        let length = if self.viewer.peek()? == Some(H1_LENGTH) {
            self.viewer.next_byte()?;
            let length = i32::from_be_bytes(self.viewer.next_bytes_fixed()?);
            usize::try_from(length).ok()
        } else {
            None
        };
        Ok((type_name, length))
    }

    fn protocol_error<S: AsRef<str>>(&self, message: S) -> Error {
        let message = match &self.method {
            Some(method) => format!("{}: {}", method, message.as_ref()),
            None => message.as_ref().to_string(),
        };
        Error::Protocol(format!("{}\n  {}", message, self.viewer.context()))
    }

    fn expect(&mut self, expected: &str, tag: u8) -> Error {
        let context = self.viewer.context();
        let mut message = format!("expected {} at 0x{:02x}", expected, tag);

        if tag != H1_END && self.viewer.unread(tag) {
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

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Double(f64),
}

impl<R: Read> HessianInput for Hessian1Input<R> {
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
        match self.read_number(tag)? {
            Some(Number::Int(v)) => Ok(v != 0),
            Some(Number::Double(v)) => Ok(v != 0.0),
            None => Err(self.expect("boolean", tag)),
        }
    }

    fn read_int(&mut self) -> SerDeResult<i32> {
        let tag = self.viewer.next_byte()?;
        match self.read_number(tag)? {
            Some(Number::Int(v)) => Ok(v as i32),
            Some(Number::Double(v)) => Ok(v as i32),
            None => Err(self.expect("integer", tag)),
        }
    }

    fn read_long(&mut self) -> SerDeResult<i64> {
        let tag = self.viewer.next_byte()?;
        match self.read_number(tag)? {
            Some(Number::Int(v)) => Ok(v),
            Some(Number::Double(v)) => Ok(v as i64),
            None => Err(self.expect("long", tag)),
        }
    }

    fn read_double(&mut self) -> SerDeResult<f64> {
        let tag = self.viewer.next_byte()?;
        match self.read_number(tag)? {
            Some(Number::Int(v)) => Ok(v as f64),
            Some(Number::Double(v)) => Ok(v),
            None => Err(self.expect("double", tag)),
        }
    }

    fn read_utc_date(&mut self) -> SerDeResult<i64> {
        let tag = self.viewer.next_byte()?;
        match tag {
            H1_DATE => Ok(i64::from_be_bytes(self.viewer.next_bytes_fixed()?)),
            _ => Err(self.expect("date", tag)),
        }
    }

    fn read_string(&mut self) -> SerDeResult<Option<String>> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_NULL => Ok(None),
            H1_STRING | H1_STRING_CHUNK => self.read_string_body(tag).map(Some),
            BC_TRUE => Ok(Some("true".to_string())),
            BC_FALSE => Ok(Some("false".to_string())),
            BC_INT | BC_LONG => match self.read_number(tag)? {
                Some(Number::Int(v)) => Ok(Some(v.to_string())),
                _ => Err(self.expect("string", tag)),
            },
            BC_DOUBLE => match self.read_number(tag)? {
                Some(Number::Double(v)) => Ok(Some(v.to_string())),
                _ => Err(self.expect("string", tag)),
            },
            _ => Err(self.expect("string", tag)),
        }
    }

    fn read_bytes(&mut self) -> SerDeResult<Option<Vec<u8>>> {
        let tag = self.viewer.next_byte()?;
        match tag {
            BC_NULL => Ok(None),
            H1_BINARY | H1_BINARY_CHUNK => self.read_binary_body(tag).map(Some),
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
        let value = self.read_object_nested();
        self.depth -= 1;

        value
    }

    fn read_type(&mut self) -> SerDeResult<Option<String>> {
        if self.viewer.peek()? != Some(H1_TYPE) {
            return Ok(None);
        }
        self.viewer.next_byte()?;
        let type_name = self.read_short_string()?;
        Ok(Some(type_name).filter(|t| !t.is_empty()))
    }

    fn read_map_start(&mut self) -> SerDeResult<Option<String>> {
        let tag = self.viewer.next_byte()?;
        match tag {
            H1_MAP => self.read_type(),
            _ => Err(self.expect("map", tag)),
        }
    }

    fn is_end(&mut self) -> SerDeResult<bool> {
        Ok(matches!(self.viewer.peek()?, Some(H1_END) | None))
    }

    fn read_end(&mut self) -> SerDeResult<()> {
        let tag = self.viewer.next_byte()?;
        match tag {
            H1_END => Ok(()),
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

    /// Accepts the stream with or without its `c 1 0` header, then skips headers.
    fn read_call(&mut self) -> SerDeResult<()> {
        if self.viewer.peek()? == Some(H1_CALL) {
            self.viewer.next_byte()?;
            let _version: [u8; 2] = self.viewer.next_bytes_fixed()?;
        }
        self.skip_headers()
    }

    fn read_method(&mut self) -> SerDeResult<String> {
        self.skip_headers()?;
        let tag = self.viewer.next_byte()?;
        if tag != H1_METHOD {
            return Err(self.expect("method ('m')", tag));
        }
        let method = self.read_short_string()?;
        self.method = Some(method.clone());
        Ok(method)
    }

    fn read_method_arg_length(&mut self) -> SerDeResult<Option<usize>> {
        Ok(None)
    }

    fn complete_call(&mut self) -> SerDeResult<()> {
        self.read_end()
    }

    fn read_reply(&mut self) -> SerDeResult<Value> {
        if self.viewer.peek()? == Some(H1_REPLY) {
            self.viewer.next_byte()?;
            let _version: [u8; 2] = self.viewer.next_bytes_fixed()?;
        }
        self.skip_headers()?;

        if self.viewer.peek()? == Some(H1_FAULT) {
            self.viewer.next_byte()?;

            // fault entries are never referenced, so no ref slot is taken
            let mut map = Map::default();
            while !self.is_end()? {
                let key = self.read_object()?;
                let value = self.read_object()?;
                map.entries.push((key, value));
            }
            self.read_end()?;

            let fault = Fault::from_value(&Value::Map(Shared::new(map)))?;
            return Err(Error::RemoteFault(fault));
        }

        let value = self.read_object()?;
        self.read_end()?;
        Ok(value)
    }

    fn reset(&mut self) {
        self.reset_references();
        self.method = None;
    }

    fn reset_references(&mut self) {
        self.refs.clear();
    }
}
