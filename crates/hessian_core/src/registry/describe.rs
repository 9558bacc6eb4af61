//! Recovers struct field and enum variant names from a serde `Deserialize` impl.
//!
//! The recording deserializer records the names derive(Deserialize) hands to
//! `deserialize_struct` / `deserialize_enum`, then aborts.

use serde::de::{self, DeserializeOwned, Visitor};

use crate::ser_de::Error;

#[derive(Debug, Clone, Copy)]
enum Shape {
    Struct(&'static [&'static str]),
    Enum(&'static [&'static str]),
}

struct Recorder<'a> {
    shape: &'a mut Option<Shape>,
}

fn record_shape<T: DeserializeOwned>() -> Option<Shape> {
    let mut shape = None;
    // always fails once the names are recorded
    let _ = T::deserialize(Recorder { shape: &mut shape });
    shape
}

pub(crate) fn struct_fields<T: DeserializeOwned>() -> Option<&'static [&'static str]> {
    match record_shape::<T>()? {
        Shape::Struct(fields) => Some(fields),
        Shape::Enum(_) => None,
    }
}

pub(crate) fn enum_variants<T: DeserializeOwned>() -> Option<&'static [&'static str]> {
    match record_shape::<T>()? {
        Shape::Enum(variants) => Some(variants),
        Shape::Struct(_) => None,
    }
}

impl<'de, 'a> de::Deserializer<'de> for Recorder<'a> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(Error::Custom("not a struct or enum".to_string()))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.shape = Some(Shape::Struct(fields));
        Err(Error::Custom("shape recorded".to_string()))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.shape = Some(Shape::Enum(variants));
        Err(Error::Custom("shape recorded".to_string()))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_record_struct_shape() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        #[serde(rename_all = "camelCase")]
        struct Row {
            row_id: i64,
            display_name: String,
        }

        assert_eq!(struct_fields::<Row>(), Some(&["rowId", "displayName"][..]));
        assert_eq!(enum_variants::<Row>(), None);
    }

    #[test]
    fn test_record_enum_shape() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        enum Level {
            Low,
            High,
        }

        assert_eq!(enum_variants::<Level>(), Some(&["Low", "High"][..]));
        assert_eq!(struct_fields::<String>(), None);
    }
}
