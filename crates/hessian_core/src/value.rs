//! Language-neutral values carried by the Hessian wire format.
//!
//! Composite values live behind a [Shared] handle. Its allocation address is the
//! identity used by the writer's reference table, and the reader hands the same
//! handle to back-references so cyclic and shared graphs survive a round trip.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Newtype name that routes [UtcMillis] through the serde bridge as a date.
pub(crate) const DATE_TOKEN: &str = "$hessian::private::UtcMillis";
/// Newtype name that routes [Guid] through the serde bridge.
pub(crate) const GUID_TOKEN: &str = "$hessian::private::Guid";
/// Newtype name that routes [HessianDecimal] through the serde bridge.
pub(crate) const DECIMAL_TOKEN: &str = "$hessian::private::Decimal";

/// Reference-counted, lockable handle to a composite value.
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity key for the lifetime of the allocation.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Number of handles to this allocation.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

// shallow, so cyclic graphs can be printed
impl<T> Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Shared<{}>@{:#x}", short, self.identity())
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A decoded or to-be-encoded Hessian value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Milliseconds since the unix epoch, UTC.
    Date(i64),
    String(String),
    Binary(Vec<u8>),
    List(Shared<List>),
    Map(Shared<Map>),
    Object(Shared<Object>),
    Enum(EnumValue),
    Guid(Uuid),
    Decimal(Decimal),
    Table(Shared<DataTable>),
    DataSet(Shared<DataSet>),
    Exception(Shared<RemoteException>),
}

/// Ordered sequence, optionally typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List {
    pub type_name: Option<String>,
    pub items: Vec<Value>,
}

/// Key/value pairs in wire order, optionally typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    pub type_name: Option<String>,
    pub entries: Vec<(Value, Value)>,
}

impl Map {
    pub fn typed<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: Some(type_name.into()),
            entries: vec![],
        }
    }

    /// Look up an entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::String(s) if s == key))
            .map(|(_, v)| v)
    }

    pub fn insert<K: Into<Value>>(&mut self, key: K, value: Value) {
        self.entries.push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed object with named fields in definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl Object {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            fields: vec![],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Replace a field in place, or append it.
    pub fn set<S: Into<String>>(&mut self, name: S, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with<S: Into<String>>(mut self, name: S, value: Value) -> Self {
        self.set(name, value);
        self
    }
}

/// A member of a registered enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_name: String,
    pub name: String,
}

impl EnumValue {
    pub fn new<T: Into<String>, N: Into<String>>(type_name: T, name: N) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
}

/// A named table of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

/// An ordered set of tables travelling as one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

/// An error object received from, or sent to, a remote peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteException {
    pub type_name: String,
    pub message: Option<String>,
    /// Java peers commonly set the cause to the exception itself.
    pub cause: Option<Value>,
    /// Remaining fields, in wire order.
    pub fields: Vec<(String, Value)>,
}

impl RemoteException {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Shared::new(List {
            type_name: None,
            items,
        }))
    }

    pub fn typed_list<S: Into<String>>(type_name: S, items: Vec<Value>) -> Self {
        Self::List(Shared::new(List {
            type_name: Some(type_name.into()),
            items,
        }))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Self::Map(Shared::new(Map {
            type_name: None,
            entries,
        }))
    }

    pub fn object(object: Object) -> Self {
        Self::Object(Shared::new(object))
    }

    pub fn exception(exception: RemoteException) -> Self {
        Self::Exception(Shared::new(exception))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) | Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Shared<List>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Shared<Map>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Shared<Object>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Identity of composite values; `None` for scalars.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::List(v) => Some(v.identity()),
            Self::Map(v) => Some(v.identity()),
            Self::Object(v) => Some(v.identity()),
            Self::Table(v) => Some(v.identity()),
            Self::DataSet(v) => Some(v.identity()),
            Self::Exception(v) => Some(v.identity()),
            _ => None,
        }
    }

    /// The wire type name of typed values.
    pub fn type_name(&self) -> Option<String> {
        match self {
            Self::List(v) => v.read().type_name.clone(),
            Self::Map(v) => v.read().type_name.clone(),
            Self::Object(v) => Some(v.read().type_name.clone()),
            Self::Enum(e) => Some(e.type_name.clone()),
            Self::Exception(v) => Some(v.read().type_name.clone()),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Enum(_) => "enum",
            Self::Guid(_) => "guid",
            Self::Decimal(_) => "decimal",
            Self::Table(_) => "table",
            Self::DataSet(_) => "dataset",
            Self::Exception(_) => "exception",
        }
    }
}

impl Value {
    fn strong_count(&self) -> usize {
        match self {
            Self::List(v) => v.strong_count(),
            Self::Map(v) => v.strong_count(),
            Self::Object(v) => v.strong_count(),
            Self::Table(v) => v.strong_count(),
            Self::DataSet(v) => v.strong_count(),
            Self::Exception(v) => v.strong_count(),
            _ => 0,
        }
    }

    /// Composite values held directly by this one.
    fn children(&self) -> Vec<Value> {
        fn composites<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
            values.filter(|v| v.identity().is_some()).cloned().collect()
        }

        match self {
            Self::List(v) => composites(v.read().items.iter()),
            Self::Map(v) => composites(v.read().entries.iter().flat_map(|(k, v)| [k, v])),
            Self::Object(v) => composites(v.read().fields.iter().map(|(_, v)| v)),
            Self::Table(v) => composites(v.read().rows.iter().flatten()),
            Self::DataSet(v) => composites(v.read().tables.iter().flat_map(|t| t.rows.iter().flatten())),
            Self::Exception(v) => {
                let e = v.read();
                composites(e.cause.iter().chain(e.fields.iter().map(|(_, v)| v)))
            }
            _ => vec![],
        }
    }

    /// Drop the contents of a composite, outside its lock.
    fn clear(&self) {
        let contents: Vec<Value> = match self {
            Self::List(v) => std::mem::take(&mut v.write().items),
            Self::Map(v) => std::mem::take(&mut v.write().entries)
                .into_iter()
                .flat_map(|(k, v)| [k, v])
                .collect(),
            Self::Object(v) => std::mem::take(&mut v.write().fields)
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
            Self::Table(v) => std::mem::take(&mut v.write().rows).into_iter().flatten().collect(),
            Self::DataSet(v) => std::mem::take(&mut v.write().tables)
                .into_iter()
                .flat_map(|t| t.rows.into_iter().flatten())
                .collect(),
            Self::Exception(v) => {
                let mut e = v.write();
                let cause = e.cause.take();
                let fields = std::mem::take(&mut e.fields);
                cause.into_iter().chain(fields.into_iter().map(|(_, v)| v)).collect()
            }
            _ => vec![],
        };
        drop(contents);
    }
}

/// Free the graphs reachable from `roots` that nothing else holds on to.
///
/// Back-references decode into strong handles, so a cyclic graph keeps itself
/// alive after its last outside handle is dropped. Every composite whose handles
/// all come from inside the graph or from `roots` has its contents cleared.
/// Composites still held elsewhere, and everything they reach, are left intact.
pub fn release<I: IntoIterator<Item = Value>>(roots: I) {
    let roots: Vec<Value> = roots.into_iter().collect();

    // handles found inside the graph, roots included
    let mut internal: HashMap<usize, usize> = HashMap::new();
    // identity -> (one extra handle, child identities)
    let mut nodes: HashMap<usize, (Value, Vec<usize>)> = HashMap::new();

    let mut pending = vec![];
    for root in &roots {
        if let Some(id) = root.identity() {
            *internal.entry(id).or_default() += 1;
            pending.push(root.clone());
        }
    }

    while let Some(value) = pending.pop() {
        let Some(id) = value.identity() else { continue };
        if nodes.contains_key(&id) {
            continue;
        }

        let mut child_ids = vec![];
        for child in value.children() {
            if let Some(child_id) = child.identity() {
                *internal.entry(child_id).or_default() += 1;
                child_ids.push(child_id);
                pending.push(child);
            }
        }
        nodes.insert(id, (value, child_ids));
    }

    // held from outside: more handles than the graph and `nodes` account for
    let mut live: Vec<usize> = nodes
        .iter()
        .filter(|(id, (value, _))| value.strong_count() > 1 + internal.get(*id).copied().unwrap_or(0))
        .map(|(id, _)| *id)
        .collect();

    let mut kept = HashSet::new();
    while let Some(id) = live.pop() {
        if kept.insert(id) {
            if let Some((_, children)) = nodes.get(&id) {
                live.extend(children.iter().copied());
            }
        }
    }

    let mut released = 0;
    for (id, (value, _)) in &nodes {
        if !kept.contains(id) {
            value.clear();
            released += 1;
        }
    }
    log::trace!("released {} of {} composites", released, nodes.len());
}

/// Shallow rendering, used in diagnostics and fault texts.
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Date(v) => write!(f, "date({})", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Binary(v) => write!(f, "binary[{}]", v.len()),
            Self::List(v) => write!(f, "list[{}]", v.read().items.len()),
            Self::Map(v) => write!(f, "map{{{}}}", v.read().entries.len()),
            Self::Object(v) => write!(f, "{}", v.read().type_name),
            Self::Enum(v) => write!(f, "{}.{}", v.type_name, v.name),
            Self::Guid(v) => write!(f, "{}", v),
            Self::Decimal(v) => write!(f, "{}", v),
            Self::Table(v) => write!(f, "table {}", v.read().name),
            Self::DataSet(v) => write!(f, "dataset[{}]", v.read().tables.len()),
            Self::Exception(v) => {
                let e = v.read();
                match &e.message {
                    Some(m) => write!(f, "{}: {}", e.type_name, m),
                    None => write!(f, "{}", e.type_name),
                }
            }
        }
    }
}

/// Structural equality; shared handles short-circuit on identity.
///
/// Distinct cyclic graphs are not supported.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        fn shared_eq<T: PartialEq>(a: &Shared<T>, b: &Shared<T>) -> bool {
            a.ptr_eq(b) || *a.read() == *b.read()
        }

        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::List(a), Self::List(b)) => shared_eq(a, b),
            (Self::Map(a), Self::Map(b)) => shared_eq(a, b),
            (Self::Object(a), Self::Object(b)) => shared_eq(a, b),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => shared_eq(a, b),
            (Self::DataSet(a), Self::DataSet(b)) => shared_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => shared_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($from: ty => $variant: ident),+ $(,)?) => {
        $(impl From<$from> for Value {
            fn from(v: $from) -> Self {
                Self::$variant(v.into())
            }
        })+
    };
}

value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    u8 => Int,
    u16 => Int,
    i64 => Long,
    u32 => Long,
    f32 => Double,
    f64 => Double,
    String => String,
    &str => String,
    Vec<u8> => Binary,
    Uuid => Guid,
    Decimal => Decimal,
    EnumValue => Enum,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Milliseconds since the unix epoch, carried as a Hessian date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UtcMillis(pub i64);

impl UtcMillis {
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self(millis)
    }
}

impl From<UtcMillis> for Value {
    fn from(v: UtcMillis) -> Self {
        Self::Date(v.0)
    }
}

/// A GUID carried as the `guid` well-known type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub Uuid);

/// A fixed-point decimal carried as its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HessianDecimal(pub Decimal);

impl Serialize for UtcMillis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(DATE_TOKEN, &self.0)
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(GUID_TOKEN, &self.0.to_string())
    }
}

impl Serialize for HessianDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(DECIMAL_TOKEN, &self.0.to_string())
    }
}

/// Visitor for the helper newtypes.
///
/// Accepts the newtype form produced by the bridge, and the bare inner value
/// so the helpers also work with other serde formats.
struct TokenVisitor<T> {
    expecting: &'static str,
    parse: fn(TokenInput) -> Result<T, String>,
}

enum TokenInput {
    Int(i64),
    Text(String),
}

impl<'de, T> de::Visitor<'de> for TokenVisitor<T> {
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.expecting)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, deserializer: D) -> Result<T, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
        (self.parse)(TokenInput::Int(v)).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
        let v = i64::try_from(v).map_err(E::custom)?;
        self.visit_i64(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
        (self.parse)(TokenInput::Text(v.to_string())).map_err(E::custom)
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<T, E> {
        (self.parse)(TokenInput::Text(v)).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for UtcMillis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(
            DATE_TOKEN,
            TokenVisitor {
                expecting: "a date in milliseconds",
                parse: |input| match input {
                    TokenInput::Int(v) => Ok(UtcMillis(v)),
                    TokenInput::Text(s) => Err(format!("expected a date, found string {:?}", s)),
                },
            },
        )
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(
            GUID_TOKEN,
            TokenVisitor {
                expecting: "a guid",
                parse: |input| match input {
                    TokenInput::Text(s) => Uuid::parse_str(&s).map(Guid).map_err(|e| e.to_string()),
                    TokenInput::Int(v) => Err(format!("expected a guid, found integer {}", v)),
                },
            },
        )
    }
}

impl<'de> Deserialize<'de> for HessianDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(
            DECIMAL_TOKEN,
            TokenVisitor {
                expecting: "a decimal",
                parse: |input| match input {
                    TokenInput::Text(s) => s
                        .parse::<Decimal>()
                        .map(HessianDecimal)
                        .map_err(|e| e.to_string()),
                    TokenInput::Int(v) => Ok(HessianDecimal(Decimal::from(v))),
                },
            },
        )
    }
}
