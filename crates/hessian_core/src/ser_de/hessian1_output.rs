//! Hessian 1 writer.
//!
//! Fixed-width scalars, `z`-terminated lists and maps, and no class
//! definitions: objects travel as typed maps.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use super::consts::*;
use super::err::{Error, SerDeResult};
use super::output::{self, HessianOutput, ObjectBegin};
use super::stream::ByteSink;
use super::text;
use crate::registry::TypeRegistry;
use crate::value::Value;

pub struct Hessian1Output<W: Write> {
    sink: ByteSink<W>,
    registry: Arc<TypeRegistry>,
    /// value identity -> reference index, and the value itself to pin the identity
    refs: HashMap<usize, (usize, Value)>,
    ref_count: usize,
    depth: usize,
}

impl<W: Write> Hessian1Output<W> {
    pub fn new(sink: W) -> Self {
        Self::with_registry(sink, TypeRegistry::global())
    }

    pub fn with_registry(sink: W, registry: Arc<TypeRegistry>) -> Self {
        Self {
            sink: ByteSink::new(sink),
            registry,
            refs: HashMap::new(),
            ref_count: 0,
            depth: 0,
        }
    }

    pub fn into_inner(self) -> SerDeResult<W> {
        self.sink.into_inner()
    }

    /// Write a complete call. Hessian 1 carries no argument count.
    pub fn call(&mut self, method: &str, args: &[Value]) -> SerDeResult<()> {
        self.start_call(method, args.len())?;
        for arg in args {
            self.write_object(arg)?;
        }
        self.complete_call()
    }

    pub fn reply(&mut self, value: &Value) -> SerDeResult<()> {
        self.start_reply()?;
        self.write_object(value)?;
        self.complete_reply()
    }

    /// `H name value`, only valid between the call header and the method.
    pub fn write_header(&mut self, name: &str, value: &Value) -> SerDeResult<()> {
        self.write_short_string(H1_HEADER, name)?;
        self.write_object(value)
    }

    /// `tag len16 utf8`, used by types, methods and headers.
    pub(crate) fn write_short_string(&mut self, tag: u8, value: &str) -> SerDeResult<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let length = u16::try_from(units.len())
            .map_err(|_| Error::protocol(format!("name too long: {} units", units.len())))?;

        self.sink.reserve(3)?;
        self.sink.push(tag);
        self.sink.extend(&length.to_be_bytes());
        self.write_utf16(&units)
    }

    fn write_utf16(&mut self, units: &[u16]) -> SerDeResult<()> {
        for &unit in units {
            self.sink.reserve(3)?;
            text::push_unit(self.sink.buffer(), unit);
        }
        Ok(())
    }

    pub(crate) fn write_tagged(&mut self, tag: u8, payload: &[u8]) -> SerDeResult<()> {
        self.sink.reserve(1 + payload.len())?;
        self.sink.push(tag);
        self.sink.extend(payload);
        Ok(())
    }
}

impl<W: Write> HessianOutput for Hessian1Output<W> {
    fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    fn write_null(&mut self) -> SerDeResult<()> {
        self.write_tagged(BC_NULL, &[])
    }

    fn write_bool(&mut self, value: bool) -> SerDeResult<()> {
        self.write_tagged(if value { BC_TRUE } else { BC_FALSE }, &[])
    }

    fn write_int(&mut self, value: i32) -> SerDeResult<()> {
        self.write_tagged(BC_INT, &value.to_be_bytes())
    }

    fn write_long(&mut self, value: i64) -> SerDeResult<()> {
        self.write_tagged(BC_LONG, &value.to_be_bytes())
    }

    fn write_double(&mut self, value: f64) -> SerDeResult<()> {
        self.write_tagged(BC_DOUBLE, &value.to_bits().to_be_bytes())
    }

    fn write_utc_date(&mut self, millis: i64) -> SerDeResult<()> {
        self.write_tagged(H1_DATE, &millis.to_be_bytes())
    }

    fn write_string(&mut self, value: &str) -> SerDeResult<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut rest = &units[..];

        while rest.len() > STRING_CHUNK_MAX {
            let mut length = STRING_CHUNK_MAX;
            if text::is_high_surrogate(rest[length - 1]) {
                length -= 1;
            }
            self.write_tagged(H1_STRING_CHUNK, &(length as u16).to_be_bytes())?;
            self.write_utf16(&rest[..length])?;
            rest = &rest[length..];
        }

        self.write_tagged(H1_STRING, &(rest.len() as u16).to_be_bytes())?;
        self.write_utf16(rest)
    }

    fn write_bytes(&mut self, value: &[u8]) -> SerDeResult<()> {
        let mut rest = value;

        while rest.len() > BINARY_CHUNK_MAX {
            let (chunk, tail) = rest.split_at(BINARY_CHUNK_MAX);
            self.write_tagged(H1_BINARY_CHUNK, &(chunk.len() as u16).to_be_bytes())?;
            self.sink.write_raw(chunk)?;
            rest = tail;
        }

        self.write_tagged(H1_BINARY, &(rest.len() as u16).to_be_bytes())?;
        self.sink.write_raw(rest)
    }

    fn write_list_begin(&mut self, length: Option<usize>, type_name: Option<&str>) -> SerDeResult<bool> {
        self.write_tagged(H1_LIST, &[])?;

        if let Some(type_name) = type_name.filter(|t| !t.is_empty()) {
            self.write_short_string(H1_TYPE, type_name)?;
        }
        if let Some(length) = length {
            let length = i32::try_from(length)
                .map_err(|_| Error::protocol(format!("list length {} exceeds int range", length)))?;
            self.write_tagged(H1_LENGTH, &length.to_be_bytes())?;
        }

        // every Hessian 1 list is terminated
        Ok(true)
    }

    fn write_list_end(&mut self) -> SerDeResult<()> {
        self.write_tagged(H1_END, &[])
    }

    fn write_map_begin(&mut self, type_name: Option<&str>) -> SerDeResult<()> {
        self.write_tagged(H1_MAP, &[])?;
        match type_name.filter(|t| !t.is_empty()) {
            Some(type_name) => self.write_short_string(H1_TYPE, type_name),
            None => Ok(()),
        }
    }

    fn write_map_end(&mut self) -> SerDeResult<()> {
        self.write_tagged(H1_END, &[])
    }

    fn write_object_begin(&mut self, type_name: &str) -> SerDeResult<ObjectBegin> {
        self.write_map_begin(Some(type_name))?;
        Ok(ObjectBegin::LegacyMap)
    }

    fn write_class_fields(&mut self, _fields: &[String]) -> SerDeResult<()> {
        Err(Error::protocol("hessian 1 has no class definitions"))
    }

    fn class_fields(&self, _index: usize) -> Option<Vec<String>> {
        None
    }

    fn write_ref(&mut self, index: usize) -> SerDeResult<()> {
        let index = i32::try_from(index)
            .map_err(|_| Error::protocol(format!("ref {} exceeds int range", index)))?;
        self.write_tagged(H1_REF, &index.to_be_bytes())
    }

    fn add_ref(&mut self, value: &Value) -> SerDeResult<bool> {
        let Some(identity) = value.identity() else {
            self.reserve_ref();
            return Ok(false);
        };

        match self.refs.get(&identity) {
            Some(&(index, _)) => {
                self.write_ref(index)?;
                Ok(true)
            }
            None => {
                self.refs.insert(identity, (self.ref_count, value.clone()));
                self.ref_count += 1;
                Ok(false)
            }
        }
    }

    fn reserve_ref(&mut self) {
        self.ref_count += 1;
    }

    fn write_object(&mut self, value: &Value) -> SerDeResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(Error::protocol(format!(
                "values nested deeper than {} levels",
                MAX_NESTING
            )));
        }

        self.depth += 1;
        let written = output::write_value(self, value);
        self.depth -= 1;

        written
    }

    fn start_call(&mut self, method: &str, _arg_count: usize) -> SerDeResult<()> {
        self.write_tagged(H1_CALL, &[H1_VERSION_MAJOR, H1_VERSION_MINOR])?;
        self.write_short_string(H1_METHOD, method)
    }

    fn complete_call(&mut self) -> SerDeResult<()> {
        self.write_tagged(H1_END, &[])
    }

    fn start_reply(&mut self) -> SerDeResult<()> {
        self.write_tagged(H1_REPLY, &[H1_VERSION_MAJOR, H1_VERSION_MINOR])
    }

    fn complete_reply(&mut self) -> SerDeResult<()> {
        self.write_tagged(H1_END, &[])
    }

    fn write_fault(&mut self, code: &str, message: &str, detail: Option<&Value>) -> SerDeResult<()> {
        self.start_reply()?;
        self.write_tagged(H1_FAULT, &[])?;

        self.write_string("code")?;
        self.write_string(code)?;
        self.write_string("message")?;
        self.write_string(message)?;

        if let Some(detail) = detail {
            self.write_string("detail")?;
            self.write_object(detail)?;
        }

        self.complete_reply()
    }

    fn reset(&mut self) {
        self.refs.clear();
        self.ref_count = 0;
    }

    fn flush(&mut self) -> SerDeResult<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser_de::{Hessian1Input, HessianInput};

    fn encoded<F>(write: F) -> Vec<u8>
    where
        F: FnOnce(&mut Hessian1Output<&mut Vec<u8>>) -> SerDeResult<()>,
    {
        let mut bytes = vec![];
        let mut out = Hessian1Output::new(&mut bytes);
        write(&mut out).unwrap();
        out.flush().unwrap();
        drop(out);
        bytes
    }

    #[test]
    fn test_fixed_width_scalars() {
        assert_eq!(encoded(|o| o.write_int(5)), [b'I', 0, 0, 0, 5]);
        assert_eq!(encoded(|o| o.write_long(-1)), [b'L', 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(encoded(|o| o.write_double(0.0)).len(), 9);
        assert_eq!(encoded(|o| o.write_utc_date(60_000))[0], b'd');
        assert_eq!(encoded(|o| o.write_bool(true)), [b'T']);
    }

    #[test]
    fn test_strings_and_binary() {
        assert_eq!(encoded(|o| o.write_string("hi")), [b'S', 0, 2, b'h', b'i']);
        assert_eq!(encoded(|o| o.write_bytes(&[1, 2])), [b'B', 0, 2, 1, 2]);

        let long = "y".repeat(STRING_CHUNK_MAX + 1);
        let bytes = encoded(|o| o.write_string(&long));
        assert_eq!(&bytes[..3], &[b's', 0x80, 0x00]);
        assert_eq!(&bytes[3 + STRING_CHUNK_MAX..3 + STRING_CHUNK_MAX + 3], &[b'S', 0, 1]);
    }

    #[test]
    fn test_list_and_map_framing() {
        let bytes = encoded(|o| {
            assert!(o.write_list_begin(Some(1), Some("[int"))?);
            o.write_int(1)?;
            o.write_list_end()
        });
        assert_eq!(
            bytes,
            [b'V', b't', 0, 4, b'[', b'i', b'n', b't', b'l', 0, 0, 0, 1, b'I', 0, 0, 0, 1, b'z']
        );

        let bytes = encoded(|o| {
            o.write_map_begin(None)?;
            o.write_map_end()
        });
        assert_eq!(bytes, [b'M', b'z']);
    }

    #[test]
    fn test_objects_are_typed_maps() {
        let mut begin = None;
        let bytes = encoded(|o| {
            begin = Some(o.write_object_begin("Point")?);
            Ok(())
        });
        assert_eq!(begin, Some(ObjectBegin::LegacyMap));
        assert_eq!(bytes, [b'M', b't', 0, 5, b'P', b'o', b'i', b'n', b't']);
    }

    #[test]
    fn test_call_and_reply_framing() {
        let bytes = encoded(|o| o.call("add", &[Value::Int(1)]));
        assert_eq!(
            bytes,
            [b'c', 1, 0, b'm', 0, 3, b'a', b'd', b'd', b'I', 0, 0, 0, 1, b'z']
        );

        let bytes = encoded(|o| o.reply(&Value::Null));
        assert_eq!(bytes, [b'r', 1, 0, b'N', b'z']);

        let bytes = encoded(|o| o.write_fault("E", "m", None));
        assert_eq!(&bytes[..4], &[b'r', 1, 0, b'f']);
        assert_eq!(bytes.last(), Some(&b'z'));
    }

    #[test]
    fn test_refs_are_fixed_width() {
        let map = Value::map(vec![]);
        let bytes = encoded(|o| {
            o.add_ref(&map)?;
            o.add_ref(&map).map(|_| ())
        });
        assert_eq!(bytes, [b'R', 0, 0, 0, 0]);
    }

    #[test]
    fn test_temporaries_are_not_back_references() {
        let bytes = encoded(|o| {
            for i in 0..4 {
                o.write_object(&Value::list(vec![Value::Int(i)]))?;
            }
            Ok(())
        });
        assert!(!bytes.contains(&H1_REF));

        let mut input = Hessian1Input::new(&bytes[..]);
        for i in 0..4 {
            let list = input.read_object().unwrap();
            assert_eq!(list, Value::list(vec![Value::Int(i)]), "item {}", i);
        }
    }
}
