//! Implementation of [serde::ser::Serializer] for [ValueSerializer]

use rust_decimal::Decimal;
use serde::{ser, Serialize};
use uuid::Uuid;

use super::err::Error;
use crate::value::{Object, Value, DATE_TOKEN, DECIMAL_TOKEN, GUID_TOKEN};

/// Turns any [serde::Serialize] data structure into a [Value].
///
/// Structs become typed objects named after the struct (or its `#[serde(rename)]`),
/// unit variants become enum values, and other variants become a single-entry
/// map keyed by the variant name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSerializer;

/// Impl serialize for primitives
macro_rules! serialize_numeric_primitive {
    ($fn_name: ident, $num_type: ty => $variant: ident) => {
        fn $fn_name(self, v: $num_type) -> Result<Self::Ok, Self::Error> {
            Ok(Value::$variant(v.into()))
        }
    };
}

impl ser::Serializer for ValueSerializer {
    type Ok = Value;

    type Error = Error;

    type SerializeSeq = SeqBuilder;

    type SerializeTuple = SeqBuilder;

    type SerializeTupleStruct = SeqBuilder;

    type SerializeTupleVariant = SeqBuilder;

    type SerializeMap = MapBuilder;

    type SerializeStruct = StructBuilder;

    type SerializeStructVariant = StructBuilder;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Bool(v))
    }

    serialize_numeric_primitive! {serialize_i8, i8 => Int}
    serialize_numeric_primitive! {serialize_i16, i16 => Int}
    serialize_numeric_primitive! {serialize_i32, i32 => Int}
    serialize_numeric_primitive! {serialize_i64, i64 => Long}

    serialize_numeric_primitive! {serialize_u8, u8 => Int}
    serialize_numeric_primitive! {serialize_u16, u16 => Int}
    serialize_numeric_primitive! {serialize_u32, u32 => Long}

    serialize_numeric_primitive! {serialize_f32, f32 => Double}
    serialize_numeric_primitive! {serialize_f64, f64 => Double}

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        i64::try_from(v)
            .map(Value::Long)
            .map_err(|_| Error::UnsupportedType(format!("{} does not fit in a long", v)))
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Binary(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: serde::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Enum(crate::value::EnumValue::new(name, variant)))
    }

    // the helper newtypes in crate::value pick their wire form here
    fn serialize_newtype_struct<T: ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: serde::Serialize,
    {
        let inner = value.serialize(self)?;

        match (name, inner) {
            (DATE_TOKEN, Value::Long(millis)) => Ok(Value::Date(millis)),
            (GUID_TOKEN, Value::String(s)) => Uuid::parse_str(&s)
                .map(Value::Guid)
                .map_err(|e| Error::Custom(format!("bad guid {:?}: {}", s, e))),
            (DECIMAL_TOKEN, Value::String(s)) => s
                .parse::<Decimal>()
                .map(Value::Decimal)
                .map_err(|e| Error::Custom(format!("bad decimal {:?}: {}", s, e))),
            (_, inner) => Ok(inner),
        }
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: serde::Serialize,
    {
        let inner = value.serialize(self)?;
        Ok(Value::map(vec![(Value::from(variant), inner)]))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqBuilder::new(len.unwrap_or_default(), None))
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Ok(SeqBuilder::new(len, None))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_tuple(len)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _len: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(SeqBuilder::new(len, Some(variant)))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapBuilder::default())
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(StructBuilder::new(name, len, None))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _len: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(StructBuilder::new(name, len, Some(variant)))
    }
}

/// Wrap `inner` as `{variant: inner}` when building an enum variant.
fn wrap_variant(variant: Option<&'static str>, inner: Value) -> Value {
    match variant {
        Some(variant) => Value::map(vec![(Value::from(variant), inner)]),
        None => inner,
    }
}

/// Collects sequence and tuple elements.
pub struct SeqBuilder {
    items: Vec<Value>,
    variant: Option<&'static str>,
}

impl SeqBuilder {
    fn new(len: usize, variant: Option<&'static str>) -> Self {
        Self {
            items: Vec::with_capacity(len.min(1024)),
            variant,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn finish(self) -> Value {
        wrap_variant(self.variant, Value::list(self.items))
    }
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleVariant for SeqBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}

/// Collects map entries in insertion order.
#[derive(Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
    key: Option<Value>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_key<T: ?Sized>(&mut self, key: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.key = Some(key.serialize(ValueSerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| Error::Custom("map value serialized before its key".to_string()))?;
        self.entries.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::map(self.entries))
    }
}

/// Collects struct fields into a typed object, or a plain map for struct variants.
pub struct StructBuilder {
    object: Object,
    variant: Option<&'static str>,
}

impl StructBuilder {
    fn new(name: &'static str, len: usize, variant: Option<&'static str>) -> Self {
        let mut object = Object::new(name);
        object.fields.reserve(len.min(1024));
        Self { object, variant }
    }

    fn push<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<(), Error> {
        let value = value.serialize(ValueSerializer)?;
        self.object.fields.push((key.to_string(), value));
        Ok(())
    }

    fn finish(self) -> Value {
        match self.variant {
            Some(variant) => {
                let fields = self
                    .object
                    .fields
                    .into_iter()
                    .map(|(name, value)| (Value::String(name), value))
                    .collect();
                wrap_variant(Some(variant), Value::map(fields))
            }
            None => Value::object(self.object),
        }
    }
}

impl ser::SerializeStruct for StructBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(key, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for StructBuilder {
    type Ok = Value;

    type Error = Error;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: serde::Serialize,
    {
        self.push(key, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.finish())
    }
}
