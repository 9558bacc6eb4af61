//! Hessian 2 writer.

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

/// Emits the most compact Hessian 2 encoding of each value.
///
/// The reference, class-definition and type tables live as long as the writer;
/// call [HessianOutput::reset] between independent messages.
pub struct Hessian2Output<W: Write> {
    sink: ByteSink<W>,
    registry: Arc<TypeRegistry>,

    /// value identity -> reference index, and the value itself to pin the identity
    refs: HashMap<usize, (usize, Value)>,
    ref_count: usize,
    depth: usize,

    /// type name -> definition index
    class_refs: HashMap<String, usize>,
    class_fields: Vec<Vec<String>>,

    /// list/map type name -> type index
    type_refs: HashMap<String, usize>,
}

impl<W: Write> Hessian2Output<W> {
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
            class_refs: HashMap::new(),
            class_fields: vec![],
            type_refs: HashMap::new(),
        }
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> SerDeResult<W> {
        self.sink.into_inner()
    }

    /// `H 2 0`
    pub fn write_version(&mut self) -> SerDeResult<()> {
        self.sink.reserve(3)?;
        self.sink.extend(&[BC_VERSION, VERSION_MAJOR, VERSION_MINOR]);
        Ok(())
    }

    /// Write a complete call: version, header and arguments.
    pub fn call(&mut self, method: &str, args: &[Value]) -> SerDeResult<()> {
        self.start_call(method, args.len())?;
        for arg in args {
            self.write_object(arg)?;
        }
        self.complete_call()
    }

    /// Write a complete reply carrying `value`.
    pub fn reply(&mut self, value: &Value) -> SerDeResult<()> {
        self.start_reply()?;
        self.write_object(value)?;
        self.complete_reply()
    }

    /// Write a list/map type, as a string the first time and as an index after.
    fn write_type(&mut self, type_name: &str) -> SerDeResult<()> {
        match self.type_refs.get(type_name) {
            Some(&index) => self.write_int(to_i32(index)?),
            None => {
                self.type_refs.insert(type_name.to_string(), self.type_refs.len());
                self.write_string(type_name)
            }
        }
    }

    fn write_utf16(&mut self, units: &[u16]) -> SerDeResult<()> {
        for &unit in units {
            self.sink.reserve(3)?;
            text::push_unit(self.sink.buffer(), unit);
        }
        Ok(())
    }

    /// Chunk or final-chunk header with a 16-bit length.
    fn write_chunk_header(&mut self, tag: u8, length: usize) -> SerDeResult<()> {
        self.sink.reserve(3)?;
        self.sink.extend(&[tag, (length >> 8) as u8, length as u8]);
        Ok(())
    }
}

fn to_i32(value: usize) -> SerDeResult<i32> {
    i32::try_from(value).map_err(|_| Error::protocol(format!("length {} exceeds int range", value)))
}

fn non_empty(type_name: Option<&str>) -> Option<&str> {
    type_name.filter(|t| !t.is_empty())
}

impl<W: Write> HessianOutput for Hessian2Output<W> {
    fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    fn write_null(&mut self) -> SerDeResult<()> {
        self.sink.reserve(1)?;
        self.sink.push(BC_NULL);
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> SerDeResult<()> {
        self.sink.reserve(1)?;
        self.sink.push(if value { BC_TRUE } else { BC_FALSE });
        Ok(())
    }

    fn write_int(&mut self, value: i32) -> SerDeResult<()> {
        self.sink.reserve(5)?;

        if (INT_DIRECT_MIN..=INT_DIRECT_MAX).contains(&value) {
            self.sink.push((value + BC_INT_ZERO as i32) as u8);
        } else if (INT_BYTE_MIN..=INT_BYTE_MAX).contains(&value) {
            self.sink.push((BC_INT_BYTE_ZERO as i32 + (value >> 8)) as u8);
            self.sink.push(value as u8);
        } else if (INT_SHORT_MIN..=INT_SHORT_MAX).contains(&value) {
            self.sink.push((BC_INT_SHORT_ZERO as i32 + (value >> 16)) as u8);
            self.sink.push((value >> 8) as u8);
            self.sink.push(value as u8);
        } else {
            self.sink.push(BC_INT);
            self.sink.extend(&value.to_be_bytes());
        }

        Ok(())
    }

    fn write_long(&mut self, value: i64) -> SerDeResult<()> {
        self.sink.reserve(9)?;

        if (LONG_DIRECT_MIN..=LONG_DIRECT_MAX).contains(&value) {
            self.sink.push((value + BC_LONG_ZERO as i64) as u8);
        } else if (LONG_BYTE_MIN..=LONG_BYTE_MAX).contains(&value) {
            self.sink.push((BC_LONG_BYTE_ZERO as i64 + (value >> 8)) as u8);
            self.sink.push(value as u8);
        } else if (LONG_SHORT_MIN..=LONG_SHORT_MAX).contains(&value) {
            self.sink.push((BC_LONG_SHORT_ZERO as i64 + (value >> 16)) as u8);
            self.sink.push((value >> 8) as u8);
            self.sink.push(value as u8);
        } else if let Ok(value) = i32::try_from(value) {
            self.sink.push(BC_LONG_INT);
            self.sink.extend(&value.to_be_bytes());
        } else {
            self.sink.push(BC_LONG);
            self.sink.extend(&value.to_be_bytes());
        }

        Ok(())
    }

    fn write_double(&mut self, value: f64) -> SerDeResult<()> {
        self.sink.reserve(9)?;

        // -0.0 keeps its sign only in the full form
        let compactable = !(value == 0.0 && value.is_sign_negative());

        let int_value = value as i32;
        if compactable && int_value as f64 == value {
            if int_value == 0 {
                self.sink.push(BC_DOUBLE_ZERO);
                return Ok(());
            } else if int_value == 1 {
                self.sink.push(BC_DOUBLE_ONE);
                return Ok(());
            } else if (-0x80..0x80).contains(&int_value) {
                self.sink.push(BC_DOUBLE_BYTE);
                self.sink.push(int_value as u8);
                return Ok(());
            } else if (-0x8000..0x8000).contains(&int_value) {
                self.sink.push(BC_DOUBLE_SHORT);
                self.sink.extend(&(int_value as i16).to_be_bytes());
                return Ok(());
            }
        }

        let mills = (value * 1000.0) as i32;
        if compactable && 0.001 * mills as f64 == value {
            self.sink.push(BC_DOUBLE_MILL);
            self.sink.extend(&mills.to_be_bytes());
            return Ok(());
        }

        self.sink.push(BC_DOUBLE);
        self.sink.extend(&value.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_utc_date(&mut self, millis: i64) -> SerDeResult<()> {
        self.sink.reserve(9)?;

        if millis % 60_000 == 0 {
            if let Ok(minutes) = i32::try_from(millis / 60_000) {
                self.sink.push(BC_DATE_MINUTE);
                self.sink.extend(&minutes.to_be_bytes());
                return Ok(());
            }
        }

        self.sink.push(BC_DATE);
        self.sink.extend(&millis.to_be_bytes());
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> SerDeResult<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut rest = &units[..];

        while rest.len() > STRING_CHUNK_MAX {
            let mut length = STRING_CHUNK_MAX;
            // never end a chunk between the halves of a surrogate pair
            if text::is_high_surrogate(rest[length - 1]) {
                length -= 1;
            }

            self.write_chunk_header(BC_STRING_CHUNK, length)?;
            self.write_utf16(&rest[..length])?;
            rest = &rest[length..];
        }

        let length = rest.len();
        self.sink.reserve(3)?;
        if length <= STRING_DIRECT_MAX {
            self.sink.push(BC_STRING_DIRECT + length as u8);
        } else if length <= STRING_SHORT_MAX {
            self.sink.push(BC_STRING_SHORT + (length >> 8) as u8);
            self.sink.push(length as u8);
        } else {
            self.write_chunk_header(BC_STRING, length)?;
        }

        self.write_utf16(rest)
    }

    fn write_bytes(&mut self, value: &[u8]) -> SerDeResult<()> {
        let mut rest = value;

        while rest.len() > BINARY_CHUNK_MAX {
            let (chunk, tail) = rest.split_at(BINARY_CHUNK_MAX);
            self.write_chunk_header(BC_BINARY_CHUNK, chunk.len())?;
            self.sink.write_raw(chunk)?;
            rest = tail;
        }

        let length = rest.len();
        self.sink.reserve(3)?;
        if length <= BINARY_DIRECT_MAX {
            self.sink.push(BC_BINARY_DIRECT + length as u8);
        } else if length <= BINARY_SHORT_MAX {
            self.sink.push(BC_BINARY_SHORT + (length >> 8) as u8);
            self.sink.push(length as u8);
        } else {
            self.write_chunk_header(BC_BINARY, length)?;
        }

        self.sink.write_raw(rest)
    }

    fn write_list_begin(&mut self, length: Option<usize>, type_name: Option<&str>) -> SerDeResult<bool> {
        self.sink.reserve(16)?;
        let type_name = non_empty(type_name);

        match (length, type_name) {
            (None, Some(t)) => {
                self.sink.push(BC_LIST_VARIABLE);
                self.write_type(t)?;
                Ok(true)
            }
            (None, None) => {
                self.sink.push(BC_LIST_VARIABLE_UNTYPED);
                Ok(true)
            }
            (Some(len), Some(t)) if len <= LIST_DIRECT_MAX => {
                self.sink.push(BC_LIST_DIRECT + len as u8);
                self.write_type(t)?;
                Ok(false)
            }
            (Some(len), None) if len <= LIST_DIRECT_MAX => {
                self.sink.push(BC_LIST_DIRECT_UNTYPED + len as u8);
                Ok(false)
            }
            (Some(len), Some(t)) => {
                self.sink.push(BC_LIST_FIXED);
                self.write_type(t)?;
                self.write_int(to_i32(len)?)?;
                Ok(false)
            }
            (Some(len), None) => {
                self.sink.push(BC_LIST_FIXED_UNTYPED);
                self.write_int(to_i32(len)?)?;
                Ok(false)
            }
        }
    }

    fn write_list_end(&mut self) -> SerDeResult<()> {
        self.sink.reserve(1)?;
        self.sink.push(BC_END);
        Ok(())
    }

    fn write_map_begin(&mut self, type_name: Option<&str>) -> SerDeResult<()> {
        self.sink.reserve(16)?;
        match non_empty(type_name) {
            Some(t) => {
                self.sink.push(BC_MAP);
                self.write_type(t)
            }
            None => {
                self.sink.push(BC_MAP_UNTYPED);
                Ok(())
            }
        }
    }

    fn write_map_end(&mut self) -> SerDeResult<()> {
        self.sink.reserve(1)?;
        self.sink.push(BC_END);
        Ok(())
    }

    fn write_object_begin(&mut self, type_name: &str) -> SerDeResult<ObjectBegin> {
        self.sink.reserve(16)?;

        match self.class_refs.get(type_name) {
            Some(&index) => {
                if index <= OBJECT_DIRECT_MAX {
                    self.sink.push(BC_OBJECT_DIRECT + index as u8);
                } else {
                    self.sink.push(BC_OBJECT);
                    self.write_int(to_i32(index)?)?;
                }
                Ok(ObjectBegin::Defined(index))
            }
            None => {
                self.class_refs
                    .insert(type_name.to_string(), self.class_refs.len());
                self.sink.push(BC_CLASS_DEF);
                self.write_string(type_name)?;
                Ok(ObjectBegin::NewDefinition)
            }
        }
    }

    fn write_class_fields(&mut self, fields: &[String]) -> SerDeResult<()> {
        self.write_int(to_i32(fields.len())?)?;
        for field in fields {
            self.write_string(field)?;
        }
        self.class_fields.push(fields.to_vec());
        Ok(())
    }

    fn class_fields(&self, index: usize) -> Option<Vec<String>> {
        self.class_fields.get(index).cloned()
    }

    fn write_ref(&mut self, index: usize) -> SerDeResult<()> {
        self.sink.reserve(6)?;
        self.sink.push(BC_REF);
        self.write_int(to_i32(index)?)
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

    fn start_call(&mut self, method: &str, arg_count: usize) -> SerDeResult<()> {
        self.write_version()?;
        self.sink.reserve(1)?;
        self.sink.push(BC_CALL);
        self.write_string(method)?;
        self.write_int(to_i32(arg_count)?)
    }

    fn complete_call(&mut self) -> SerDeResult<()> {
        Ok(())
    }

    fn start_reply(&mut self) -> SerDeResult<()> {
        self.write_version()?;
        self.sink.reserve(1)?;
        self.sink.push(BC_REPLY);
        Ok(())
    }

    fn complete_reply(&mut self) -> SerDeResult<()> {
        Ok(())
    }

    fn write_fault(&mut self, code: &str, message: &str, detail: Option<&Value>) -> SerDeResult<()> {
        self.write_version()?;
        self.sink.reserve(2)?;
        self.sink.push(BC_FAULT);
        self.sink.push(BC_MAP_UNTYPED);

        // the reader registers the fault map itself
        self.reserve_ref();

        self.write_string("code")?;
        self.write_string(code)?;
        self.write_string("message")?;
        self.write_string(message)?;

        if let Some(detail) = detail {
            self.write_string("detail")?;
            self.write_object(detail)?;
        }

        self.write_map_end()
    }

    fn reset(&mut self) {
        self.refs.clear();
        self.ref_count = 0;
        self.class_refs.clear();
        self.class_fields.clear();
        self.type_refs.clear();
    }

    fn flush(&mut self) -> SerDeResult<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser_de::{Hessian2Input, HessianInput};

    fn encoded<F>(write: F) -> Vec<u8>
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

    fn int_len(value: i32) -> usize {
        encoded(|o| o.write_int(value)).len()
    }

    fn long_len(value: i64) -> usize {
        encoded(|o| o.write_long(value)).len()
    }

    fn double_len(value: f64) -> usize {
        encoded(|o| o.write_double(value)).len()
    }

    #[test]
    fn test_int_compactness() {
        assert_eq!(int_len(5), 1);
        assert_eq!(int_len(1000), 2);
        assert_eq!(int_len(100000), 3);

        for (value, len) in [
            (-16, 1),
            (47, 1),
            (48, 2),
            (-17, 2),
            (2047, 2),
            (-2048, 2),
            (2048, 3),
            (-2049, 3),
            (262143, 3),
            (-262144, 3),
            (262144, 5),
            (i32::MIN, 5),
            (i32::MAX, 5),
        ] {
            assert_eq!(int_len(value), len, "value {}", value);
        }
    }

    #[test]
    fn test_int_bytes() {
        assert_eq!(encoded(|o| o.write_int(0)), [0x90]);
        assert_eq!(encoded(|o| o.write_int(-16)), [0x80]);
        assert_eq!(encoded(|o| o.write_int(47)), [0xbf]);
        assert_eq!(encoded(|o| o.write_int(-2048)), [0xc0, 0x00]);
        assert_eq!(encoded(|o| o.write_int(2047)), [0xcf, 0xff]);
        assert_eq!(encoded(|o| o.write_int(-262144)), [0xd0, 0x00, 0x00]);
        assert_eq!(encoded(|o| o.write_int(262143)), [0xd7, 0xff, 0xff]);
        assert_eq!(encoded(|o| o.write_int(262144)), [b'I', 0x00, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_long_compactness() {
        for (value, len) in [
            (-8, 1),
            (15, 1),
            (16, 2),
            (-9, 2),
            (2047, 2),
            (-2048, 2),
            (2048, 3),
            (262143, 3),
            (-262144, 3),
            (262144, 5),
            (i32::MAX as i64, 5),
            (i32::MIN as i64, 5),
            (i32::MAX as i64 + 1, 9),
            (i64::MIN, 9),
            (i64::MAX, 9),
        ] {
            assert_eq!(long_len(value), len, "value {}", value);
        }

        assert_eq!(encoded(|o| o.write_long(0)), [0xe0]);
        assert_eq!(encoded(|o| o.write_long(-8)), [0xd8]);
        assert_eq!(encoded(|o| o.write_long(-2048)), [0xf0, 0x00]);
        assert_eq!(encoded(|o| o.write_long(-262144)), [0x38, 0x00, 0x00]);
        assert_eq!(
            encoded(|o| o.write_long(262144)),
            [BC_LONG_INT, 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_double_compactness() {
        assert_eq!(encoded(|o| o.write_double(0.0)), [BC_DOUBLE_ZERO]);
        assert_eq!(encoded(|o| o.write_double(1.0)), [BC_DOUBLE_ONE]);
        assert_eq!(encoded(|o| o.write_double(-1.0)), [BC_DOUBLE_BYTE, 0xff]);
        assert_eq!(double_len(127.0), 2);
        assert_eq!(double_len(-128.0), 2);
        assert_eq!(double_len(128.0), 3);
        assert_eq!(double_len(32767.0), 3);
        assert_eq!(double_len(-32768.0), 3);
        assert_eq!(encoded(|o| o.write_double(0.001)), [BC_DOUBLE_MILL, 0, 0, 0, 1]);
        assert_eq!(double_len(f64::MAX), 9);
        assert_eq!(double_len(f64::NAN), 9);
        assert_eq!(double_len(-0.0), 9);
    }

    #[test]
    fn test_date_forms() {
        // whole minutes use the 4-byte form
        assert_eq!(
            encoded(|o| o.write_utc_date(60_000)),
            [BC_DATE_MINUTE, 0, 0, 0, 1]
        );
        assert_eq!(encoded(|o| o.write_utc_date(1)).len(), 9);
        assert_eq!(encoded(|o| o.write_utc_date(1)), [BC_DATE, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_string_forms() {
        assert_eq!(encoded(|o| o.write_string("")), [0x00]);
        assert_eq!(encoded(|o| o.write_string("hi")), [0x02, b'h', b'i']);

        let short = "a".repeat(32);
        let bytes = encoded(|o| o.write_string(&short));
        assert_eq!(&bytes[..2], &[0x30, 32]);

        let long = "a".repeat(1024);
        let bytes = encoded(|o| o.write_string(&long));
        assert_eq!(&bytes[..3], &[b'S', 0x04, 0x00]);

        // non-ascii length counts characters, not bytes
        let bytes = encoded(|o| o.write_string("已发"));
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes.len(), 7);
    }

    #[test]
    fn test_string_chunking() {
        let long = "x".repeat(STRING_CHUNK_MAX + 10);
        let bytes = encoded(|o| o.write_string(&long));

        assert_eq!(&bytes[..3], &[BC_STRING_CHUNK, 0x80, 0x00]);
        let tail = 3 + STRING_CHUNK_MAX;
        assert_eq!(bytes[tail], 10);
        assert_eq!(bytes.len(), tail + 1 + 10);

        // exactly one chunk worth stays in a single final chunk
        let exact = "x".repeat(STRING_CHUNK_MAX);
        let bytes = encoded(|o| o.write_string(&exact));
        assert_eq!(&bytes[..3], &[BC_STRING, 0x80, 0x00]);
    }

    #[test]
    fn test_chunk_keeps_surrogates_together() {
        let mut s = "x".repeat(STRING_CHUNK_MAX - 1);
        s.push('👏');
        s.push_str("tail");
        let bytes = encoded(|o| o.write_string(&s));

        // first chunk shrinks by one unit so the pair lands in the final chunk
        assert_eq!(&bytes[..3], &[BC_STRING_CHUNK, 0x7f, 0xff]);
    }

    #[test]
    fn test_binary_forms() {
        assert_eq!(encoded(|o| o.write_bytes(&[])), [0x20]);
        assert_eq!(encoded(|o| o.write_bytes(&[1, 2, 3])), [0x23, 1, 2, 3]);

        let bytes = encoded(|o| o.write_bytes(&[0; 16]));
        assert_eq!(&bytes[..2], &[0x34, 16]);

        let bytes = encoded(|o| o.write_bytes(&[0; 1024]));
        assert_eq!(&bytes[..3], &[b'B', 0x04, 0x00]);

        let bytes = encoded(|o| o.write_bytes(&vec![9; BINARY_CHUNK_MAX + 1]));
        assert_eq!(&bytes[..3], &[BC_BINARY_CHUNK, 0x80, 0x00]);
        assert_eq!(bytes[3 + BINARY_CHUNK_MAX], 0x21);
    }

    #[test]
    fn test_list_begin_forms() {
        let mut streaming = false;
        let bytes = encoded(|o| {
            streaming = o.write_list_begin(None, None)?;
            o.write_list_end()
        });
        assert!(streaming);
        assert_eq!(bytes, [BC_LIST_VARIABLE_UNTYPED, BC_END]);

        let bytes = encoded(|o| o.write_list_begin(Some(3), None).map(|_| ()));
        assert_eq!(bytes, [0x7b]);

        let bytes = encoded(|o| o.write_list_begin(Some(2), Some("[int")).map(|_| ()));
        assert_eq!(bytes, [0x72, 0x04, b'[', b'i', b'n', b't']);

        let bytes = encoded(|o| o.write_list_begin(Some(8), None).map(|_| ()));
        assert_eq!(bytes, [BC_LIST_FIXED_UNTYPED, 0x98]);
    }

    #[test]
    fn test_type_refs_compact_repeats() {
        let bytes = encoded(|o| {
            o.write_map_begin(Some("Point"))?;
            o.write_map_end()?;
            o.write_map_begin(Some("Point"))?;
            o.write_map_end()
        });
        assert_eq!(
            bytes,
            [b'M', 0x05, b'P', b'o', b'i', b'n', b't', b'Z', b'M', 0x90, b'Z']
        );
    }

    #[test]
    fn test_object_begin_contract() {
        let mut results = vec![];
        let bytes = encoded(|o| {
            results.push(o.write_object_begin("Point")?);
            o.write_class_fields(&["x".to_string()])?;
            results.push(o.write_object_begin("Point")?);
            results.push(o.write_object_begin("Point")?);
            Ok(())
        });

        assert_eq!(
            results,
            [
                ObjectBegin::NewDefinition,
                ObjectBegin::Defined(0),
                ObjectBegin::Defined(0)
            ]
        );
        assert_eq!(
            bytes,
            [b'C', 0x05, b'P', b'o', b'i', b'n', b't', 0x91, 0x01, b'x', 0x60, 0x60]
        );
    }

    #[test]
    fn test_add_ref() {
        let list = Value::list(vec![]);
        let mut first = None;
        let mut second = None;
        let bytes = encoded(|o| {
            first = Some(o.add_ref(&list)?);
            second = Some(o.add_ref(&list)?);
            Ok(())
        });
        assert_eq!(first, Some(false));
        assert_eq!(second, Some(true));
        assert_eq!(bytes, [BC_REF, 0x90]);
    }

    #[test]
    fn test_temporaries_are_not_back_references() {
        // each list is dropped right after it is written
        let bytes = encoded(|o| {
            for i in 0..4 {
                o.write_object(&Value::list(vec![Value::Int(i)]))?;
            }
            Ok(())
        });
        assert!(!bytes.contains(&BC_REF));

        let mut input = Hessian2Input::new(&bytes[..]);
        for i in 0..4 {
            let list = input.read_object().unwrap();
            assert_eq!(list, Value::list(vec![Value::Int(i)]), "item {}", i);
        }
    }

    #[test]
    fn test_reset_releases_pinned_values() {
        let list = Value::list(vec![]);
        let shared = list.as_list().unwrap().clone();

        let mut out = Hessian2Output::new(vec![]);
        out.write_object(&list).unwrap();
        assert_eq!(shared.strong_count(), 3);

        out.reset();
        assert_eq!(shared.strong_count(), 2);
    }

    #[test]
    fn test_call_and_fault_framing() {
        let bytes = encoded(|o| o.call("add", &[Value::Int(1), Value::Int(2)]));
        assert_eq!(bytes, [b'H', 2, 0, b'C', 0x03, b'a', b'd', b'd', 0x92, 0x91, 0x92]);

        let bytes = encoded(|o| o.write_fault("E", "m", None));
        assert_eq!(
            bytes,
            [
                b'H', 2, 0, b'F', b'H', 0x04, b'c', b'o', b'd', b'e', 0x01, b'E', 0x07, b'm',
                b'e', b's', b's', b'a', b'g', b'e', 0x01, b'm', b'Z'
            ]
        );
    }

    #[test]
    fn test_large_output_flushes_transparently() {
        let values: Vec<i32> = (0..10_000).map(|i| i * 1000).collect();
        let bytes = encoded(|o| {
            for v in &values {
                o.write_int(*v)?;
            }
            Ok(())
        });
        let expected: usize = values.iter().map(|v| int_len(*v)).sum();
        assert_eq!(bytes.len(), expected);
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |depth: usize| (0..depth).fold(Value::Null, |v, _| Value::list(vec![v]));

        let mut out = Hessian2Output::new(vec![]);
        assert!(out.write_object(&nested(MAX_NESTING - 1)).is_ok());

        let mut out = Hessian2Output::new(vec![]);
        let err = out.write_object(&nested(MAX_NESTING)).unwrap_err();
        assert!(err.to_string().contains("nested deeper than"));
    }
}
