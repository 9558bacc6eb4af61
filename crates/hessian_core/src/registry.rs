//! Type registry: field lists for object shapes and codecs for well-known types.
//!
//! The codec itself only knows [Value]. The registry decides which fields an
//! object carries on the wire and which codec reads or writes a typed value.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::de::DeserializeOwned;

use crate::middleware::SERVICE_ERROR_TYPE;
use crate::ser_de::{Error, HessianInput, HessianOutput, SerDeResult};
use crate::value::Value;

pub mod codecs;
mod describe;

/// Wire type name of GUIDs.
pub const GUID_TYPE: &str = "guid";
/// Wire type name written for decimals.
pub const DECIMAL_TYPE: &str = "java.math.BigDecimal";
/// Other decimal type names accepted when reading.
pub const DECIMAL_ALIASES: [&str; 2] = ["decimal", "System.Decimal"];
/// Wire type name of data tables.
pub const TABLE_TYPE: &str = "System.Data.DataTable";
/// Wire type name of data sets.
pub const DATA_SET_TYPE: &str = "System.Data.DataSet";
/// Type names of database nulls, which read as [Value::Null].
pub const DB_NULL_TYPES: [&str; 2] = ["dbnull", "System.DBNull"];

/// A single serializable member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Transient fields never travel on the wire.
    pub transient: bool,
}

/// Field layout of one object type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDescriptor {
    pub type_name: String,
    /// Type whose fields are inherited, if any.
    pub base: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Derive the field list from a serde struct.
    ///
    /// Field names follow serde renames; `#[serde(skip)]` fields are left out.
    pub fn of<T: DeserializeOwned>(type_name: &str) -> SerDeResult<Self> {
        let fields = describe::struct_fields::<T>().ok_or_else(|| {
            Error::UnsupportedType(format!(
                "{} is not a struct",
                std::any::type_name::<T>()
            ))
        })?;

        Ok(Self {
            type_name: type_name.to_string(),
            base: None,
            fields: fields
                .iter()
                .map(|name| FieldDescriptor {
                    name: name.to_string(),
                    transient: false,
                })
                .collect(),
        })
    }

    pub fn extends<S: Into<String>>(mut self, base: S) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn field<S: Into<String>>(mut self, name: S) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            transient: false,
        });
        self
    }

    pub fn transient_field<S: Into<String>>(mut self, name: S) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            transient: true,
        });
        self
    }
}

/// How an exception type names its message and cause fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionShape {
    pub message_field: String,
    pub cause_field: String,
}

impl ExceptionShape {
    /// `java.lang.Throwable`
    pub fn java() -> Self {
        Self {
            message_field: "detailMessage".to_string(),
            cause_field: "cause".to_string(),
        }
    }

    /// `System.Exception`
    pub fn dotnet() -> Self {
        Self {
            message_field: "_message".to_string(),
            cause_field: "_innerException".to_string(),
        }
    }

    pub fn is_message(&self, field: &str) -> bool {
        field == self.message_field || field == "message"
    }

    pub fn is_cause(&self, field: &str) -> bool {
        field == self.cause_field || field == "cause"
    }
}

/// Writes one kind of composite value.
pub trait ObjectSerializer: Send + Sync {
    fn write_object(&self, value: &Value, out: &mut dyn HessianOutput) -> SerDeResult<()>;
}

/// Reads one kind of typed value.
///
/// Implementations register the value with [HessianInput::add_ref] before
/// reading anything that could refer back to it.
pub trait ObjectDeserializer: Send + Sync {
    /// Read the entries of a typed map whose header was already consumed.
    fn read_map(&self, input: &mut dyn HessianInput, type_name: &str) -> SerDeResult<Value>;

    /// Read an instance whose class definition lists `fields`.
    fn read_object(
        &self,
        input: &mut dyn HessianInput,
        type_name: &str,
        fields: &[String],
    ) -> SerDeResult<Value>;
}

/// Registered types and codecs, safe to share between connections.
pub struct TypeRegistry {
    descriptors: RwLock<HashMap<String, TypeDescriptor>>,
    enums: RwLock<HashMap<String, Vec<String>>>,
    exceptions: RwLock<HashMap<String, ExceptionShape>>,
    serializers: RwLock<HashMap<String, Arc<dyn ObjectSerializer>>>,
    deserializers: RwLock<HashMap<String, Arc<dyn ObjectDeserializer>>>,

    /// type name -> wire field names, filled on first use
    field_cache: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// An empty registry with the built-in codecs.
    pub fn new() -> Self {
        let registry = Self {
            descriptors: Default::default(),
            enums: Default::default(),
            exceptions: Default::default(),
            serializers: Default::default(),
            deserializers: Default::default(),
            field_cache: Default::default(),
        };

        registry.register_deserializer(GUID_TYPE, Arc::new(codecs::GuidCodec));
        registry.register_deserializer("System.Guid", Arc::new(codecs::GuidCodec));
        registry.register_deserializer(DECIMAL_TYPE, Arc::new(codecs::DecimalCodec));
        for alias in DECIMAL_ALIASES {
            registry.register_deserializer(alias, Arc::new(codecs::DecimalCodec));
        }
        registry.register_deserializer(TABLE_TYPE, Arc::new(codecs::TableCodec));
        registry.register_deserializer(DATA_SET_TYPE, Arc::new(codecs::DataSetCodec));
        for db_null in DB_NULL_TYPES {
            registry.register_deserializer(db_null, Arc::new(codecs::DbNullCodec));
        }
        registry.register_exception(SERVICE_ERROR_TYPE, ExceptionShape::java());

        registry
    }

    /// Process-wide registry used by readers and writers built without one.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub fn register(&self, descriptor: TypeDescriptor) {
        log::trace!("registering type {}", descriptor.type_name);
        write_lock(&self.descriptors).insert(descriptor.type_name.clone(), descriptor);
        // a base change can alter any derived list
        write_lock(&self.field_cache).clear();
    }

    /// Register a serde struct under `type_name`.
    pub fn register_type<T: DeserializeOwned>(&self, type_name: &str) -> SerDeResult<()> {
        self.register(TypeDescriptor::of::<T>(type_name)?);
        Ok(())
    }

    /// Register an enumeration and its member names.
    pub fn register_enum<S: Into<String>>(&self, type_name: S, members: &[&str]) {
        let members = members.iter().map(|m| m.to_string()).collect();
        write_lock(&self.enums).insert(type_name.into(), members);
    }

    /// Register a serde enum of unit variants under `type_name`.
    pub fn register_enum_type<T: DeserializeOwned>(&self, type_name: &str) -> SerDeResult<()> {
        let variants = describe::enum_variants::<T>().ok_or_else(|| {
            Error::UnsupportedType(format!("{} is not an enum", std::any::type_name::<T>()))
        })?;
        self.register_enum(type_name, variants);
        Ok(())
    }

    pub fn register_exception<S: Into<String>>(&self, type_name: S, shape: ExceptionShape) {
        write_lock(&self.exceptions).insert(type_name.into(), shape);
    }

    /// Use a custom writer for objects of `type_name`.
    pub fn register_serializer<S: Into<String>>(&self, type_name: S, serializer: Arc<dyn ObjectSerializer>) {
        write_lock(&self.serializers).insert(type_name.into(), serializer);
    }

    /// Use a custom reader for values of `type_name`.
    pub fn register_deserializer<S: Into<String>>(
        &self,
        type_name: S,
        deserializer: Arc<dyn ObjectDeserializer>,
    ) {
        write_lock(&self.deserializers).insert(type_name.into(), deserializer);
    }

    pub fn descriptor(&self, type_name: &str) -> Option<TypeDescriptor> {
        read_lock(&self.descriptors).get(type_name).cloned()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        read_lock(&self.descriptors).contains_key(type_name)
    }

    /// Wire field names of a registered type, most derived first.
    ///
    /// Transient fields are skipped, and a name seen in a derived type hides
    /// the base field of the same name.
    pub fn field_list(&self, type_name: &str) -> Option<Arc<Vec<String>>> {
        if let Some(fields) = read_lock(&self.field_cache).get(type_name) {
            return Some(fields.clone());
        }

        let fields = {
            let descriptors = read_lock(&self.descriptors);
            let mut current = descriptors.get(type_name)?;

            let mut seen = vec![];
            let mut fields = vec![];
            let mut visited = vec![type_name];
            loop {
                for field in &current.fields {
                    if seen.contains(&field.name) {
                        continue;
                    }
                    seen.push(field.name.clone());
                    if !field.transient {
                        fields.push(field.name.clone());
                    }
                }

                match current.base.as_deref().and_then(|b| descriptors.get(b)) {
                    Some(base) if !visited.contains(&base.type_name.as_str()) => {
                        visited.push(base.type_name.as_str());
                        current = base;
                    }
                    _ => break,
                }
            }
            Arc::new(fields)
        };

        // concurrent fills compute the same list, so either insert wins
        write_lock(&self.field_cache)
            .entry(type_name.to_string())
            .or_insert_with(|| fields.clone());
        Some(fields)
    }

    pub fn enum_members(&self, type_name: &str) -> Option<Vec<String>> {
        read_lock(&self.enums).get(type_name).cloned()
    }

    /// Registered shape, or the platform shape for exceptions of the JDK and .NET
    /// class libraries. Any other type is an exception only once registered.
    pub fn exception_shape(&self, type_name: &str) -> Option<ExceptionShape> {
        if let Some(shape) = read_lock(&self.exceptions).get(type_name) {
            return Some(shape.clone());
        }

        let short = type_name.rsplit('.').next().unwrap_or(type_name);
        let throwable = short.ends_with("Exception") || short.ends_with("Error");

        if throwable && (type_name.starts_with("java.") || type_name.starts_with("javax.")) {
            Some(ExceptionShape::java())
        } else if short.ends_with("Exception") && type_name.starts_with("System.") {
            Some(ExceptionShape::dotnet())
        } else {
            None
        }
    }

    /// Codec that writes `value`.
    pub fn serializer_for(&self, value: &Value) -> SerDeResult<Arc<dyn ObjectSerializer>> {
        let serializer: Arc<dyn ObjectSerializer> = match value {
            Value::List(_) => Arc::new(codecs::ListCodec),
            Value::Map(_) => Arc::new(codecs::MapCodec),
            Value::Object(object) => {
                let type_name = object.read().type_name.clone();
                match read_lock(&self.serializers).get(&type_name) {
                    Some(custom) => custom.clone(),
                    None => Arc::new(codecs::ObjectCodec),
                }
            }
            Value::Enum(_) => Arc::new(codecs::EnumCodec),
            Value::Guid(_) => Arc::new(codecs::GuidCodec),
            Value::Decimal(_) => Arc::new(codecs::DecimalCodec),
            Value::Table(_) => Arc::new(codecs::TableCodec),
            Value::DataSet(_) => Arc::new(codecs::DataSetCodec),
            Value::Exception(_) => Arc::new(codecs::ExceptionCodec),
            scalar => {
                return Err(Error::UnsupportedType(format!(
                    "no object serializer for {}",
                    scalar.kind_name()
                )))
            }
        };
        Ok(serializer)
    }

    /// Codec that reads values of `type_name`.
    ///
    /// Unknown names fall back to the generic object codec, which yields a
    /// [Value::Object] or a typed [Value::Map].
    pub fn deserializer_for(&self, type_name: &str) -> Arc<dyn ObjectDeserializer> {
        if let Some(custom) = read_lock(&self.deserializers).get(type_name) {
            return custom.clone();
        }
        if read_lock(&self.enums).contains_key(type_name) {
            return Arc::new(codecs::EnumCodec);
        }
        if self.exception_shape(type_name).is_some() {
            return Arc::new(codecs::ExceptionCodec);
        }
        Arc::new(codecs::ObjectCodec)
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_field_list_shadows_base() {
        let registry = TypeRegistry::new();
        registry.register(
            TypeDescriptor::new("Base")
                .field("id")
                .field("name")
                .transient_field("cache"),
        );
        registry.register(
            TypeDescriptor::new("Derived")
                .extends("Base")
                .field("name")
                .field("extra"),
        );

        let fields = registry.field_list("Derived").unwrap();
        assert_eq!(*fields, ["name", "extra", "id"]);

        let fields = registry.field_list("Base").unwrap();
        assert_eq!(*fields, ["id", "name"]);

        assert!(registry.field_list("Missing").is_none());
    }

    #[test]
    fn test_transient_derived_field_hides_base() {
        let registry = TypeRegistry::new();
        registry.register(TypeDescriptor::new("Base").field("secret").field("id"));
        registry.register(
            TypeDescriptor::new("Derived")
                .extends("Base")
                .transient_field("secret"),
        );

        assert_eq!(*registry.field_list("Derived").unwrap(), ["id"]);
    }

    #[test]
    fn test_field_list_survives_base_cycles() {
        let registry = TypeRegistry::new();
        registry.register(TypeDescriptor::new("A").extends("B").field("a"));
        registry.register(TypeDescriptor::new("B").extends("A").field("b"));

        assert_eq!(*registry.field_list("A").unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_register_refreshes_cached_lists() {
        let registry = TypeRegistry::new();
        registry.register(TypeDescriptor::new("Base").field("id"));
        registry.register(TypeDescriptor::new("Derived").extends("Base"));
        assert_eq!(*registry.field_list("Derived").unwrap(), ["id"]);

        registry.register(TypeDescriptor::new("Base").field("id").field("version"));
        assert_eq!(*registry.field_list("Derived").unwrap(), ["id", "version"]);
    }

    #[test]
    fn test_descriptor_from_serde() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Point {
            x: i32,
            #[serde(rename = "Y")]
            y: i32,
            #[serde(skip)]
            cached: Option<i32>,
        }

        let descriptor = TypeDescriptor::of::<Point>("geo.Point").unwrap();
        let names: Vec<_> = descriptor.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["x", "Y"]);

        assert!(TypeDescriptor::of::<i32>("int").is_err());
    }

    #[test]
    fn test_enum_from_serde() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        enum Status {
            #[serde(rename = "未发送")]
            NotSent,
            #[serde(rename = "已发")]
            Sent,
        }

        let registry = TypeRegistry::new();
        registry.register_enum_type::<Status>("Status").unwrap();
        assert_eq!(
            registry.enum_members("Status").unwrap(),
            ["未发送", "已发"]
        );
    }

    #[test]
    fn test_exception_shapes() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.exception_shape("java.lang.IllegalStateException"),
            Some(ExceptionShape::java())
        );
        assert_eq!(
            registry.exception_shape("System.InvalidOperationException"),
            Some(ExceptionShape::dotnet())
        );
        assert_eq!(
            registry.exception_shape("java.lang.OutOfMemoryError"),
            Some(ExceptionShape::java())
        );
        assert_eq!(
            registry.exception_shape(SERVICE_ERROR_TYPE),
            Some(ExceptionShape::java())
        );
        assert_eq!(registry.exception_shape("com.example.Point"), None);

        // user types are only exceptions once registered
        assert_eq!(registry.exception_shape("ValidationError"), None);
        assert_eq!(registry.exception_shape("com.example.QuotaException"), None);
        assert_eq!(registry.exception_shape("System.Data.DataException.Row"), None);

        registry.register_exception("com.example.Fault", ExceptionShape::dotnet());
        assert_eq!(
            registry.exception_shape("com.example.Fault"),
            Some(ExceptionShape::dotnet())
        );
    }

    #[test]
    fn test_error_named_struct_round_trips() {
        #[derive(Debug, PartialEq, serde::Serialize, Deserialize)]
        struct ValidationError {
            field: String,
            cause: String,
        }

        let error = ValidationError {
            field: "email".to_string(),
            cause: "missing @".to_string(),
        };
        let bytes = crate::serialize(&error).unwrap();
        let back: ValidationError = crate::deserialize(&bytes).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn test_serializer_for_scalars_is_unsupported() {
        let registry = TypeRegistry::new();
        assert!(matches!(
            registry.serializer_for(&Value::Int(1)),
            Err(Error::UnsupportedType(_))
        ));
        assert!(registry.serializer_for(&Value::list(vec![])).is_ok());
    }
}
