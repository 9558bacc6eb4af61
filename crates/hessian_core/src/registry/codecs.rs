//! Built-in codecs.

use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    ExceptionShape, ObjectDeserializer, ObjectSerializer, DATA_SET_TYPE, DECIMAL_TYPE, GUID_TYPE, TABLE_TYPE,
};
use crate::ser_de::{Error, HessianInput, HessianOutput, ObjectBegin, SerDeResult};
use crate::value::{Column, DataSet, DataTable, EnumValue, List, Map, Object, RemoteException, Shared, Value};

/// Read list items into a freshly registered list.
///
/// `None` length reads until the end marker.
pub(crate) fn read_list(
    input: &mut dyn HessianInput,
    type_name: Option<String>,
    length: Option<usize>,
) -> SerDeResult<Value> {
    let list = Shared::new(List {
        type_name,
        items: Vec::with_capacity(length.unwrap_or_default().min(1024)),
    });
    input.add_ref(Value::List(list.clone()));

    match length {
        Some(length) => {
            for _ in 0..length {
                let item = input.read_object()?;
                list.write().items.push(item);
            }
        }
        None => {
            while !input.is_end()? {
                let item = input.read_object()?;
                list.write().items.push(item);
            }
            input.read_end()?;
        }
    }

    Ok(Value::List(list))
}

/// Read map entries up to the end marker into a freshly registered map.
pub(crate) fn read_map(input: &mut dyn HessianInput, type_name: Option<String>) -> SerDeResult<Value> {
    let map = Shared::new(Map {
        type_name,
        entries: vec![],
    });
    input.add_ref(Value::Map(map.clone()));

    while !input.is_end()? {
        let key = input.read_object()?;
        let value = input.read_object()?;
        map.write().entries.push((key, value));
    }
    input.read_end()?;

    Ok(Value::Map(map))
}

/// Field name from a map key.
fn key_name(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Name/value pairs of a map body, consuming the end marker.
fn read_map_fields(input: &mut dyn HessianInput) -> SerDeResult<Vec<(String, Value)>> {
    let mut fields = vec![];
    while !input.is_end()? {
        let name = key_name(input.read_object()?);
        let value = input.read_object()?;
        fields.push((name, value));
    }
    input.read_end()?;
    Ok(fields)
}

/// Values of an instance, paired with its definition's field names.
fn read_instance_fields(input: &mut dyn HessianInput, names: &[String]) -> SerDeResult<Vec<(String, Value)>> {
    names
        .iter()
        .map(|name| Ok((name.clone(), input.read_object()?)))
        .collect()
}

fn take_field(fields: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let index = fields.iter().position(|(n, _)| n == name)?;
    Some(fields.remove(index).1)
}

/// Write an object body after its reference slot is settled.
///
/// Emits a class definition the first time `type_name` is seen on the stream,
/// then values in definition order. Missing fields are written as null.
pub(crate) fn write_fields(
    out: &mut dyn HessianOutput,
    type_name: &str,
    fields: &[(String, Value)],
) -> SerDeResult<()> {
    match out.write_object_begin(type_name)? {
        ObjectBegin::LegacyMap => {
            for (name, value) in fields {
                out.write_string(name)?;
                out.write_object(value)?;
            }
            out.write_map_end()
        }
        ObjectBegin::NewDefinition => {
            let names: Vec<String> = fields.iter().map(|(n, _)| n.clone()).collect();
            out.write_class_fields(&names)?;
            match out.write_object_begin(type_name)? {
                ObjectBegin::Defined(_) => write_in_order(out, fields, &names),
                other => Err(Error::protocol(format!(
                    "class definition for {} was not retained, got {:?}",
                    type_name, other
                ))),
            }
        }
        ObjectBegin::Defined(index) => {
            let names = out.class_fields(index).ok_or_else(|| {
                Error::protocol(format!("class definition #{} has no field list", index))
            })?;
            write_in_order(out, fields, &names)
        }
    }
}

fn write_in_order(out: &mut dyn HessianOutput, fields: &[(String, Value)], order: &[String]) -> SerDeResult<()> {
    for (name, _) in fields.iter().filter(|(n, _)| !order.contains(n)) {
        log::warn!("field {} is not in the class definition and is dropped", name);
    }

    for name in order {
        match fields.iter().find(|(n, _)| n == name) {
            Some((_, value)) => out.write_object(value)?,
            None => out.write_null()?,
        }
    }
    Ok(())
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::UnsupportedType(format!(
        "expected {} value, found {}",
        expected,
        value.kind_name()
    ))
}

/// Plain objects: class definitions on Hessian 2, typed maps on Hessian 1.
///
/// Registered types are written and read with their declared field list;
/// unregistered ones keep whatever fields they carry.
pub struct ObjectCodec;

impl ObjectSerializer for ObjectCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Object(shared) = value else {
            return Err(mismatch("object", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        // snapshot, so nested writes never hold the lock
        let object = shared.read().clone();
        let fields = match out.registry().field_list(&object.type_name) {
            Some(names) => names
                .iter()
                .map(|name| {
                    let value = object.get(name).cloned().unwrap_or_default();
                    (name.clone(), value)
                })
                .collect(),
            None => object.fields,
        };

        write_fields(out, &object.type_name, &fields)
    }
}

impl ObjectCodec {
    fn populate(
        input: &mut dyn HessianInput,
        type_name: &str,
        mut read_next: impl FnMut(&mut dyn HessianInput) -> SerDeResult<Option<(String, Value)>>,
    ) -> SerDeResult<Value> {
        let object = Shared::new(Object::new(type_name));
        input.add_ref(Value::Object(object.clone()));

        let known = input.registry().field_list(type_name);
        while let Some((name, value)) = read_next(&mut *input)? {
            match &known {
                Some(known) if !known.contains(&name) => {
                    log::debug!("{} has no field {}, value discarded", type_name, name);
                }
                _ => object.write().set(name, value),
            }
        }

        Ok(Value::Object(object))
    }
}

impl ObjectDeserializer for ObjectCodec {
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value> {
        // typed maps of unknown types stay maps
        if type_name.is_empty() || !input.registry().is_registered(type_name) {
            return read_map(input, Some(type_name.to_string()).filter(|t| !t.is_empty()));
        }

        let value = Self::populate(input, type_name, |input| {
            if input.is_end()? {
                return Ok(None);
            }
            let name = key_name(input.read_object()?);
            Ok(Some((name, input.read_object()?)))
        })?;
        input.read_end()?;
        Ok(value)
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, fields: &[String]) -> SerDeResult<Value> {
        let mut names = fields.iter();
        Self::populate(input, type_name, |input| match names.next() {
            Some(name) => Ok(Some((name.clone(), input.read_object()?))),
            None => Ok(None),
        })
    }
}

pub struct ListCodec;

impl ObjectSerializer for ListCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::List(shared) = value else {
            return Err(mismatch("list", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        let list = shared.read().clone();
        let terminated = out.write_list_begin(Some(list.items.len()), list.type_name.as_deref())?;
        for item in &list.items {
            out.write_object(item)?;
        }
        if terminated {
            out.write_list_end()?;
        }
        Ok(())
    }
}

pub struct MapCodec;

impl ObjectSerializer for MapCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Map(shared) = value else {
            return Err(mismatch("map", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        let map = shared.read().clone();
        out.write_map_begin(map.type_name.as_deref())?;
        for (key, value) in &map.entries {
            out.write_object(key)?;
            out.write_object(value)?;
        }
        out.write_map_end()
    }
}

/// Enumerations travel as `{name}` objects.
pub struct EnumCodec;

impl EnumCodec {
    fn resolve(input: &mut dyn HessianInput, type_name: &str, mut fields: Vec<(String, Value)>) -> SerDeResult<Value> {
        let name = match take_field(&mut fields, "name") {
            Some(Value::String(name)) => name,
            other => {
                return Err(Error::protocol(format!(
                    "enum {} without a name, found {:?}",
                    type_name, other
                )))
            }
        };

        if let Some(members) = input.registry().enum_members(type_name) {
            if !members.contains(&name) {
                return Err(Error::protocol(format!(
                    "{} is not a member of enum {}",
                    name, type_name
                )));
            }
        }

        let value = Value::Enum(EnumValue::new(type_name, name));
        input.add_ref(value.clone());
        Ok(value)
    }
}

impl ObjectSerializer for EnumCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Enum(e) = value else {
            return Err(mismatch("enum", value));
        };

        if let Some(members) = out.registry().enum_members(&e.type_name) {
            if !members.contains(&e.name) {
                return Err(Error::UnsupportedType(format!(
                    "{} is not a member of enum {}",
                    e.name, e.type_name
                )));
            }
        }

        out.reserve_ref();
        write_fields(out, &e.type_name, &[("name".to_string(), Value::from(e.name.as_str()))])
    }
}

impl ObjectDeserializer for EnumCodec {
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value> {
        let fields = read_map_fields(input)?;
        Self::resolve(input, type_name, fields)
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, fields: &[String]) -> SerDeResult<Value> {
        let fields = read_instance_fields(input, fields)?;
        Self::resolve(input, type_name, fields)
    }
}

/// Pull the string `value` field of a single-field wrapper object.
fn value_field(type_name: &str, mut fields: Vec<(String, Value)>) -> SerDeResult<Option<String>> {
    match take_field(&mut fields, "value") {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(Error::protocol(format!(
            "{} value must be a string, found {}",
            type_name,
            other.kind_name()
        ))),
    }
}

/// GUIDs travel as `guid { value: "<hyphenated>" }`.
pub struct GuidCodec;

impl GuidCodec {
    fn resolve(input: &mut dyn HessianInput, type_name: &str, fields: Vec<(String, Value)>) -> SerDeResult<Value> {
        let Some(text) = value_field(type_name, fields)? else {
            return Ok(Value::Null);
        };
        let guid = Uuid::parse_str(&text)
            .map_err(|e| Error::protocol(format!("bad guid {:?}: {}", text, e)))?;

        let value = Value::Guid(guid);
        input.add_ref(value.clone());
        Ok(value)
    }
}

impl ObjectSerializer for GuidCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Guid(guid) = value else {
            return Err(mismatch("guid", value));
        };
        out.reserve_ref();
        write_fields(out, GUID_TYPE, &[("value".to_string(), Value::String(guid.to_string()))])
    }
}

impl ObjectDeserializer for GuidCodec {
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value> {
        let fields = read_map_fields(input)?;
        Self::resolve(input, type_name, fields)
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, fields: &[String]) -> SerDeResult<Value> {
        let fields = read_instance_fields(input, fields)?;
        Self::resolve(input, type_name, fields)
    }
}

/// Decimals travel as their string form in a `value` field.
pub struct DecimalCodec;

impl DecimalCodec {
    fn resolve(input: &mut dyn HessianInput, type_name: &str, fields: Vec<(String, Value)>) -> SerDeResult<Value> {
        let Some(text) = value_field(type_name, fields)? else {
            return Ok(Value::Null);
        };
        let decimal = text
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| Error::protocol(format!("bad decimal {:?}: {}", text, e)))?;

        let value = Value::Decimal(decimal);
        input.add_ref(value.clone());
        Ok(value)
    }
}

impl ObjectSerializer for DecimalCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Decimal(decimal) = value else {
            return Err(mismatch("decimal", value));
        };
        out.reserve_ref();
        write_fields(out, DECIMAL_TYPE, &[("value".to_string(), Value::String(decimal.to_string()))])
    }
}

impl ObjectDeserializer for DecimalCodec {
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value> {
        let fields = read_map_fields(input)?;
        Self::resolve(input, type_name, fields)
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, fields: &[String]) -> SerDeResult<Value> {
        let fields = read_instance_fields(input, fields)?;
        Self::resolve(input, type_name, fields)
    }
}

/// Table header and rows, after the map that opens the table:
/// `name (column type)* Z H (H cell* Z)* Z`.
fn write_table_body(out: &mut dyn HessianOutput, table: &DataTable) -> SerDeResult<()> {
    out.write_string(&table.name)?;
    for column in &table.columns {
        out.write_string(&column.name)?;
        out.write_string(&column.type_name)?;
    }
    out.write_map_end()?;

    out.write_map_begin(None)?;
    for row in &table.rows {
        out.write_map_begin(None)?;
        for cell in row {
            out.write_object(cell)?;
        }
        out.write_map_end()?;
    }
    out.write_map_end()
}

/// Read the header and rows into `table`, in place so cells may refer back to it.
fn read_table_body(input: &mut dyn HessianInput, table: &Shared<DataTable>) -> SerDeResult<()> {
    let name = input.read_string()?.unwrap_or_default();
    let mut columns = vec![];
    while !input.is_end()? {
        let name = input.read_string()?.unwrap_or_default();
        let type_name = input.read_string()?.unwrap_or_default();
        columns.push(Column { name, type_name });
    }
    input.read_end()?;

    {
        let mut table = table.write();
        table.name = name;
        table.columns = columns;
    }

    input.read_map_start()?;
    while !input.is_end()? {
        input.read_map_start()?;
        let mut row = vec![];
        while !input.is_end()? {
            row.push(input.read_object()?);
        }
        input.read_end()?;
        table.write().rows.push(row);
    }
    input.read_end()
}

fn map_only(type_name: &str) -> Error {
    Error::protocol(format!(
        "{} must be sent as a map, not a class instance",
        type_name
    ))
}

/// Data tables: `M <type> name (column type)* Z H (H cell* Z)* Z`.
pub struct TableCodec;

impl ObjectSerializer for TableCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Table(shared) = value else {
            return Err(mismatch("table", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        let table = shared.read().clone();
        out.write_map_begin(Some(TABLE_TYPE))?;
        write_table_body(out, &table)
    }
}

impl ObjectDeserializer for TableCodec {
    fn read_map(&self, input: &mut dyn HessianInput, _type_name: &str) -> SerDeResult<Value> {
        let table = Shared::new(DataTable::default());
        input.add_ref(Value::Table(table.clone()));

        read_table_body(input, &table)?;
        Ok(Value::Table(table))
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, _fields: &[String]) -> SerDeResult<Value> {
        Err(map_only(type_name))
    }
}

/// Data sets: `M <type> (H <table body>)* Z`, one untyped map per table.
pub struct DataSetCodec;

impl ObjectSerializer for DataSetCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::DataSet(shared) = value else {
            return Err(mismatch("dataset", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        let data_set = shared.read().clone();
        out.write_map_begin(Some(DATA_SET_TYPE))?;
        for table in &data_set.tables {
            out.write_map_begin(None)?;
            write_table_body(out, table)?;
        }
        out.write_map_end()
    }
}

impl ObjectDeserializer for DataSetCodec {
    fn read_map(&self, input: &mut dyn HessianInput, _type_name: &str) -> SerDeResult<Value> {
        let data_set = Shared::new(DataSet::default());
        input.add_ref(Value::DataSet(data_set.clone()));

        while !input.is_end()? {
            input.read_map_start()?;
            // tables of a set take no reference slot
            let table = Shared::new(DataTable::default());
            read_table_body(input, &table)?;
            let table = table.read().clone();
            data_set.write().tables.push(table);
        }
        input.read_end()?;

        Ok(Value::DataSet(data_set))
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, _fields: &[String]) -> SerDeResult<Value> {
        Err(map_only(type_name))
    }
}

/// Database nulls read as [Value::Null].
///
/// The instance form carries no field values even when its definition
/// names one; the map form carries bare keys.
pub struct DbNullCodec;

impl ObjectDeserializer for DbNullCodec {
    fn read_map(&self, input: &mut dyn HessianInput, _type_name: &str) -> SerDeResult<Value> {
        while !input.is_end()? {
            input.read_string()?;
        }
        input.read_end()?;

        input.add_ref(Value::Null);
        Ok(Value::Null)
    }

    fn read_object(&self, input: &mut dyn HessianInput, _type_name: &str, _fields: &[String]) -> SerDeResult<Value> {
        input.add_ref(Value::Null);
        Ok(Value::Null)
    }
}

/// Remote exceptions, with message and cause mapped through an [ExceptionShape].
pub struct ExceptionCodec;

impl ExceptionCodec {
    fn shape(registry: &super::TypeRegistry, type_name: &str) -> ExceptionShape {
        registry.exception_shape(type_name).unwrap_or_else(ExceptionShape::java)
    }

    fn populate(
        input: &mut dyn HessianInput,
        type_name: &str,
        mut read_next: impl FnMut(&mut dyn HessianInput) -> SerDeResult<Option<(String, Value)>>,
    ) -> SerDeResult<Value> {
        let shape = Self::shape(&input.registry(), type_name);

        // registered first: a cause may point back at this exception
        let exception = Shared::new(RemoteException::new(type_name));
        input.add_ref(Value::Exception(exception.clone()));

        while let Some((name, value)) = read_next(&mut *input)? {
            let mut e = exception.write();
            if let Some(value) = Self::absorb(&mut e, &shape, &name, value) {
                e.fields.push((name, value));
            }
        }

        Ok(Value::Exception(exception))
    }

    /// Take `value` as the message or cause when it fits an empty slot.
    /// Anything else is handed back to be kept as a plain field.
    fn absorb(e: &mut RemoteException, shape: &ExceptionShape, name: &str, value: Value) -> Option<Value> {
        if shape.is_message(name) && e.message.is_none() {
            match value {
                Value::String(message) => {
                    e.message = Some(message);
                    return None;
                }
                Value::Null => return None,
                other => return Some(other),
            }
        }

        if shape.is_cause(name) && e.cause.is_none() {
            if !value.is_null() {
                e.cause = Some(value);
            }
            return None;
        }

        Some(value)
    }

    /// First of the names not already carried as a plain field.
    fn free_name(exception: &RemoteException, names: [&str; 2]) -> Option<String> {
        names
            .into_iter()
            .find(|name| !exception.fields.iter().any(|(n, _)| n == name))
            .map(str::to_string)
    }
}

impl ObjectSerializer for ExceptionCodec {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()> {
        let Value::Exception(shared) = value else {
            return Err(mismatch("exception", value));
        };
        if out.add_ref(value)? {
            return Ok(());
        }

        let exception = shared.read().clone();
        let shape = Self::shape(&out.registry(), &exception.type_name);

        let mut fields = vec![];
        match Self::free_name(&exception, [shape.message_field.as_str(), "message"]) {
            Some(name) => fields.push((name, Value::from(exception.message.clone()))),
            None => log::warn!("{} carries message fields of its own", exception.type_name),
        }
        match Self::free_name(&exception, [shape.cause_field.as_str(), "cause"]) {
            Some(name) => fields.push((name, exception.cause.clone().unwrap_or_default())),
            None => log::warn!("{} carries cause fields of its own", exception.type_name),
        }
        fields.extend(exception.fields);

        write_fields(out, &exception.type_name, &fields)
    }
}

impl ObjectDeserializer for ExceptionCodec {
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value> {
        let value = Self::populate(input, type_name, |input| {
            if input.is_end()? {
                return Ok(None);
            }
            let name = key_name(input.read_object()?);
            Ok(Some((name, input.read_object()?)))
        })?;
        input.read_end()?;
        Ok(value)
    }

    fn read_object(&self, input: &mut dyn HessianInput, type_name: &str, fields: &[String]) -> SerDeResult<Value> {
        let mut names = fields.iter();
        Self::populate(input, type_name, |input| match names.next() {
            Some(name) => Ok(Some((name.clone(), input.read_object()?))),
            None => Ok(None),
        })
    }
}
