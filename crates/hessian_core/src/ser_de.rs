//! Serialization and deserialization module
//!
//! Byte-level readers and writers for Hessian 1 and 2, plus a serde bridge
//! between Rust types and the [Value] model.

use serde::{de::DeserializeOwned, Serialize};

use crate::value::Value;

pub mod consts;
mod de;
mod err;
mod hessian1_input;
mod hessian1_output;
mod hessian2_input;
mod hessian2_output;
mod input;
mod output;
mod ser;
mod stream;
pub(crate) mod text;

pub use de::ValueDeserializer;
pub use err::{
    Error, Fault, FaultKind, SerDeResult, FAULT_NO_SUCH_METHOD, FAULT_NO_SUCH_METHOD_EXCEPTION,
    FAULT_PROTOCOL_EXCEPTION, FAULT_SERVICE_EXCEPTION,
};
pub use hessian1_input::Hessian1Input;
pub use hessian1_output::Hessian1Output;
pub use hessian2_input::Hessian2Input;
pub use hessian2_output::Hessian2Output;
pub use input::{HessianInput, ObjectDefinition};
pub use output::{HessianOutput, ObjectBegin};
pub use ser::ValueSerializer;

/// Convert a data structure into a [Value]
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> SerDeResult<Value> {
    value.serialize(ValueSerializer)
}

/// Fill a data structure from a [Value], coercing scalars as the readers do
pub fn from_value<T: DeserializeOwned>(value: Value) -> SerDeResult<T> {
    T::deserialize(ValueDeserializer::new(value))
}

/// Conversion from a decoded [Value], used for call arguments.
///
/// Anything deserializable converts through [from_value]; a [Value] passes
/// through untouched, keeping shared references and type names.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> SerDeResult<Self>;
}

impl<T: DeserializeOwned> FromValue for T {
    fn from_value(value: Value) -> SerDeResult<Self> {
        from_value(value)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> SerDeResult<Self> {
        Ok(value)
    }
}

/// Conversion into a [Value], used for reply values.
pub trait IntoValue {
    fn into_value(self) -> SerDeResult<Value>;
}

impl<T: Serialize> IntoValue for T {
    fn into_value(self) -> SerDeResult<Value> {
        to_value(&self)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> SerDeResult<Value> {
        Ok(self)
    }
}

/// Read the next value from `input` as `T`
pub fn read_value_as<T: DeserializeOwned>(input: &mut dyn HessianInput) -> SerDeResult<T> {
    from_value(input.read_object()?)
}

/// Serialize a data structure to a single Hessian 2 value
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> SerDeResult<Vec<u8>> {
    let value = to_value(value)?;

    let mut output = Hessian2Output::new(vec![]);
    output.write_object(&value)?;
    output.into_inner()
}

/// Deserialize a data structure from a single Hessian 2 value
pub fn deserialize<T>(bytes: &[u8]) -> SerDeResult<T>
where
    T: DeserializeOwned,
{
    let mut input = Hessian2Input::new(bytes);
    read_value_as(&mut input)
}

/// Serializing and deserializing tests
#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fmt::Debug};

    use super::*;
    use crate::value::{Guid, HessianDecimal, UtcMillis};
    use rust_decimal::Decimal;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct S {
        item: bool,
        number: i32,
        s: String,
    }

    /// Performs a ser-de process
    fn ser_de_loop<T: Debug + PartialEq + Serialize + DeserializeOwned>(input: T) {
        let ser = serialize(&input).unwrap();

        println!("bytes: {} - {:?}", ser.len(), ser);
        let des: T = deserialize(&ser).unwrap();

        println!("{:?}", des);
        assert_eq!(input, des);
    }

    #[test]
    fn test_ser_de_map() {
        let map: HashMap<String, i32> = HashMap::from([
            ("asd".to_string(), 10_000),
            ("how about that 👏👏👏".to_string(), 69),
        ]);

        ser_de_loop(map);
    }

    /// Testing ser_de of sequences, like vectors and tuples
    #[test]
    fn test_ser_de_seq() {
        let seq = vec![100, 200, 300, 400];
        ser_de_loop(seq);

        let tup = (12, 100_000_000_000i64, "x".to_string());
        ser_de_loop(tup);
    }

    /// Testing ser_de of structs
    #[test]
    fn test_ser_de_struct() {
        let s = S {
            item: false,
            number: 10000,
            s: "asd".to_string(),
        };
        ser_de_loop(s);
    }

    #[test]
    fn test_ser_de_enum() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        enum E {
            This,
            That(bool),
            WhatEver((i32, bool)),
            IDontCare { a: bool, b: i8, c: String },
        }

        ser_de_loop(E::This);
        ser_de_loop(E::That(false));
        ser_de_loop(E::WhatEver((10, true)));
        ser_de_loop(E::IDontCare {
            a: true,
            b: i8::MAX,
            c: "Hello How are You".to_string(),
        });
    }

    #[test]
    fn test_ser_de_well_known() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Record {
            id: Guid,
            price: HessianDecimal,
            at: UtcMillis,
            #[serde(with = "serde_bytes")]
            blob: Vec<u8>,
            ratio: f32,
            missing: Option<i64>,
        }

        ser_de_loop(Record {
            id: Guid(Uuid::new_v4()),
            price: HessianDecimal(Decimal::new(-1999, 2)),
            at: UtcMillis(1_700_000_000_123),
            blob: vec![0, 1, 2, 255],
            ratio: 0.5,
            missing: None,
        });
    }

    #[test]
    fn test_struct_reuses_class_definition() {
        let rows = vec![
            S {
                item: true,
                number: 1,
                s: "a".to_string(),
            },
            S::default(),
        ];

        let bytes = serialize(&rows).unwrap();
        // one definition, two instances
        assert_eq!(bytes.iter().filter(|b| **b == b'C').count(), 1);
        assert_eq!(bytes.iter().filter(|b| **b == 0x60).count(), 2);

        let des: Vec<S> = deserialize(&bytes).unwrap();
        assert_eq!(des, rows);
    }

    #[test]
    fn test_value_passes_through() {
        let obj = Value::object(crate::value::Object::new("com.example.Point").with("x", Value::Int(1)));

        let same = <Value as FromValue>::from_value(obj.clone()).unwrap();
        assert_eq!(same.identity(), obj.identity());
        assert_eq!(obj.clone().into_value().unwrap().type_name().as_deref(), Some("com.example.Point"));

        let n = <i64 as FromValue>::from_value(Value::Int(7)).unwrap();
        assert_eq!(n, 7);
        assert_eq!(vec![1, 2].into_value().unwrap(), Value::list(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_deserialize_coerces() {
        let bytes = serialize(&3.75f64).unwrap();
        assert_eq!(deserialize::<i32>(&bytes).unwrap(), 3);

        let bytes = serialize(&Option::<i32>::None).unwrap();
        assert_eq!(bytes, vec![b'N']);
        assert_eq!(deserialize::<i64>(&bytes).unwrap(), 0);
        assert!(!deserialize::<bool>(&bytes).unwrap());
    }
}
