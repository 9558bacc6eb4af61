//! Implementation of [serde::de::Deserializer] for [ValueDeserializer]
//!
//! Targets are filled with the same lenient coercions the wire readers apply:
//! null reads as zero/false, booleans as 0/1, numeric kinds cast into one another
//! and scalars read as their text when a string is wanted.

use std::collections::VecDeque;

use serde::de::{self, EnumAccess, IntoDeserializer, MapAccess, SeqAccess, VariantAccess};

use super::err::Error;
use crate::value::{DataTable, Value};

/// Nesting depth at which deserialization gives up. Cyclic graphs would otherwise never end.
const MAX_DEPTH: usize = 128;

/// Feeds a decoded [Value] into any [serde::Deserialize] type.
pub struct ValueDeserializer {
    value: Value,
    depth: usize,
}

impl ValueDeserializer {
    pub fn new(value: Value) -> Self {
        Self { value, depth: 0 }
    }

    fn nested(&self, value: Value) -> Result<Self, Error> {
        match self.depth < MAX_DEPTH {
            true => Ok(Self {
                value,
                depth: self.depth + 1,
            }),
            false => Err(Error::Custom(format!(
                "value nested deeper than {} levels, the graph may be cyclic",
                MAX_DEPTH
            ))),
        }
    }
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::Custom(format!("expected {}, found {}", expected, value.kind_name()))
}

/// Flatten any map-like value into key/value pairs.
fn map_entries(value: &Value) -> Option<Vec<(Value, Value)>> {
    let named = |fields: &[(String, Value)]| -> Vec<(Value, Value)> {
        fields
            .iter()
            .map(|(name, value)| (Value::String(name.clone()), value.clone()))
            .collect()
    };

    match value {
        Value::Map(map) => Some(map.read().entries.clone()),
        Value::Object(object) => Some(named(&object.read().fields)),
        Value::Exception(exception) => {
            let exception = exception.read();
            let mut entries = vec![(Value::from("message"), Value::from(exception.message.clone()))];
            entries.extend(named(&exception.fields));
            Some(entries)
        }
        Value::Table(table) => Some(table_entries(&table.read())),
        Value::DataSet(data_set) => {
            let tables = data_set
                .read()
                .tables
                .iter()
                .map(|table| Value::map(table_entries(table)))
                .collect();
            Some(vec![(Value::from("tables"), Value::list(tables))])
        }
        _ => None,
    }
}

/// `{name, columns: [{name, type}], rows: [[cell]]}`
fn table_entries(table: &DataTable) -> Vec<(Value, Value)> {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            Value::map(vec![
                (Value::from("name"), Value::from(c.name.as_str())),
                (Value::from("type"), Value::from(c.type_name.as_str())),
            ])
        })
        .collect();
    let rows = table.rows.iter().map(|row| Value::list(row.clone())).collect();

    vec![
        (Value::from("name"), Value::from(table.name.as_str())),
        (Value::from("columns"), Value::list(columns)),
        (Value::from("rows"), Value::list(rows)),
    ]
}

/// Impl deserialize for numeric primitives, applying the coercion matrix.
macro_rules! deserialize_numeric {
    ($fn_name: ident: $data_type: ty => $visitor_fn: ident) => {
        fn $fn_name<V>(self, visitor: V) -> Result<V::Value, Self::Error>
        where
            V: de::Visitor<'de>,
        {
            let n = match self.value {
                Value::Null => 0 as $data_type,
                Value::Bool(b) => b as u8 as $data_type,
                Value::Int(v) => v as $data_type,
                Value::Long(v) => v as $data_type,
                Value::Double(v) => v as $data_type,
                Value::Date(v) => v as $data_type,
                other => return Err(mismatch("a number", &other)),
            };
            visitor.$visitor_fn(n)
        }
    };
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::Int(v) => visitor.visit_i32(v),
            Value::Long(v) | Value::Date(v) => visitor.visit_i64(v),
            Value::Double(v) => visitor.visit_f64(v),
            Value::String(v) => visitor.visit_string(v),
            Value::Binary(v) => visitor.visit_byte_buf(v),
            Value::Enum(e) => visitor.visit_string(e.name),
            Value::Guid(v) => visitor.visit_string(v.to_string()),
            Value::Decimal(v) => visitor.visit_string(v.to_string()),
            Value::List(ref list) => {
                let items = list.read().items.clone();
                visitor.visit_seq(CollectionsAccessor::seq(&self, items))
            }
            ref other => match map_entries(other) {
                Some(entries) => visitor.visit_map(CollectionsAccessor::map(&self, entries)),
                None => Err(mismatch("a value", other)),
            },
        }
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        let b = match self.value {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Int(v) => v != 0,
            Value::Long(v) => v != 0,
            Value::Double(v) => v != 0.0,
            other => return Err(mismatch("a boolean", &other)),
        };
        visitor.visit_bool(b)
    }

    deserialize_numeric! {deserialize_i8: i8 => visit_i8}
    deserialize_numeric! {deserialize_i16: i16 => visit_i16}
    deserialize_numeric! {deserialize_i32: i32 => visit_i32}
    deserialize_numeric! {deserialize_i64: i64 => visit_i64}

    deserialize_numeric! {deserialize_u8: u8 => visit_u8}
    deserialize_numeric! {deserialize_u16: u16 => visit_u16}
    deserialize_numeric! {deserialize_u32: u32 => visit_u32}
    deserialize_numeric! {deserialize_u64: u64 => visit_u64}

    deserialize_numeric! {deserialize_f32: f32 => visit_f32}
    deserialize_numeric! {deserialize_f64: f64 => visit_f64}

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::String(s) => visitor.visit_string(s),
            Value::Bool(v) => visitor.visit_string(v.to_string()),
            Value::Int(v) => visitor.visit_string(v.to_string()),
            Value::Long(v) => visitor.visit_string(v.to_string()),
            Value::Double(v) => visitor.visit_string(v.to_string()),
            other => self_any(other, self.depth, visitor),
        }
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::Binary(v) => visitor.visit_byte_buf(v),
            Value::String(s) => visitor.visit_byte_buf(s.into_bytes()),
            other => self_any(other, self.depth, visitor),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_unit(),
            other => Err(mismatch("null", &other)),
        }
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_unit(visitor)
    }

    // the helper newtypes read their inner value through deserialize_any
    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match &self.value {
            Value::List(list) => {
                let items = list.read().items.clone();
                visitor.visit_seq(CollectionsAccessor::seq(&self, items))
            }
            // a blob read as a sequence of octets
            Value::Binary(bytes) => {
                let items = bytes.iter().map(|b| Value::Int(*b as i32)).collect();
                visitor.visit_seq(CollectionsAccessor::seq(&self, items))
            }
            Value::Null => visitor.visit_seq(CollectionsAccessor::seq(&self, vec![])),
            other => Err(mismatch("a list", other)),
        }
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.value.is_null() {
            return visitor.visit_map(CollectionsAccessor::map(&self, vec![]));
        }
        match map_entries(&self.value) {
            Some(entries) => visitor.visit_map(CollectionsAccessor::map(&self, entries)),
            None => Err(mismatch("a map", &self.value)),
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        let (variant, content) = match &self.value {
            Value::Enum(e) => (e.name.clone(), None),
            Value::String(s) => (s.clone(), None),
            // ordinal
            Value::Int(i) => match usize::try_from(*i).ok().and_then(|i| variants.get(i)) {
                Some(variant) => (variant.to_string(), None),
                None => return Err(Error::Custom(format!("{} has no variant #{}", name, i))),
            },
            // an enum whose type was not registered arrives as a plain {name} object
            Value::Object(object) if object.read().fields.len() == 1 => {
                match object.read().get("name") {
                    Some(Value::String(s)) => (s.clone(), None),
                    _ => return Err(mismatch("an enum", &self.value)),
                }
            }
            Value::Map(map) if map.read().len() == 1 => {
                let map = map.read();
                match &map.entries[0] {
                    (Value::String(key), content) => (key.clone(), Some(content.clone())),
                    _ => return Err(mismatch("an enum", &self.value)),
                }
            }
            other => return Err(mismatch("an enum", other)),
        };

        let content = match content {
            Some(content) => Some(self.nested(content)?),
            None => None,
        };
        visitor.visit_enum(VariantAccessor { variant, content })
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_any(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }
}

/// Fall back to [de::Deserializer::deserialize_any] for a value already moved out.
fn self_any<'de, V: de::Visitor<'de>>(value: Value, depth: usize, visitor: V) -> Result<V::Value, Error> {
    de::Deserializer::deserialize_any(ValueDeserializer { value, depth }, visitor)
}

/// This wrapper contains implementations for accessing collections.
///
/// Maps are stored flattened as key, value, key, value.
struct CollectionsAccessor {
    pending: VecDeque<Value>,
    depth: usize,
}

impl CollectionsAccessor {
    fn seq(parent: &ValueDeserializer, items: Vec<Value>) -> Self {
        Self {
            pending: items.into(),
            depth: parent.depth,
        }
    }

    fn map(parent: &ValueDeserializer, entries: Vec<(Value, Value)>) -> Self {
        Self {
            pending: entries.into_iter().flat_map(|(k, v)| [k, v]).collect(),
            depth: parent.depth,
        }
    }

    fn next_deserializer(&mut self) -> Result<Option<ValueDeserializer>, Error> {
        let Some(value) = self.pending.pop_front() else {
            return Ok(None);
        };
        let parent = ValueDeserializer {
            value: Value::Null,
            depth: self.depth,
        };
        parent.nested(value).map(Some)
    }
}

impl<'de> SeqAccess<'de> for CollectionsAccessor {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error>
    where
        T: de::DeserializeSeed<'de>,
    {
        match self.next_deserializer()? {
            Some(des) => seed.deserialize(des).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.pending.len())
    }
}

impl<'de> MapAccess<'de> for CollectionsAccessor {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error>
    where
        K: de::DeserializeSeed<'de>,
    {
        match self.next_deserializer()? {
            Some(des) => seed.deserialize(des).map(Some),
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Self::Error>
    where
        V: de::DeserializeSeed<'de>,
    {
        match self.next_deserializer()? {
            Some(des) => seed.deserialize(des),
            None => Err(Error::Custom("map key without a value".to_string())),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.pending.len() / 2)
    }
}

/// An enum variant name, with the variant's content when it has one.
struct VariantAccessor {
    variant: String,
    content: Option<ValueDeserializer>,
}

impl<'de> EnumAccess<'de> for VariantAccessor {
    type Error = Error;

    type Variant = Self;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant), Self::Error>
    where
        V: de::DeserializeSeed<'de>,
    {
        let variant: de::value::StringDeserializer<Error> = self.variant.clone().into_deserializer();
        let val = seed.deserialize(variant)?;
        Ok((val, self))
    }
}

impl<'de> VariantAccess<'de> for VariantAccessor {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Self::Error> {
        match self.content {
            None => Ok(()),
            Some(content) if content.value.is_null() => Ok(()),
            Some(_) => Err(Error::Custom(format!(
                "unit variant {} carries content",
                self.variant
            ))),
        }
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value, Self::Error>
    where
        T: de::DeserializeSeed<'de>,
    {
        match self.content {
            Some(content) => seed.deserialize(content),
            None => Err(Error::Custom(format!("variant {} has no content", self.variant))),
        }
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.content {
            Some(content) => de::Deserializer::deserialize_seq(content, visitor),
            None => Err(Error::Custom(format!("variant {} has no content", self.variant))),
        }
    }

    fn struct_variant<V>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match self.content {
            Some(content) => de::Deserializer::deserialize_map(content, visitor),
            None => Err(Error::Custom(format!("variant {} has no content", self.variant))),
        }
    }
}
