//! Error implementations

use serde::{de, ser};

use crate::value::{RemoteException, Shared, Value};

/// Fault code sent when no method matches the requested name.
pub const FAULT_NO_SUCH_METHOD_EXCEPTION: &str = "NoSuchMethodException";
/// Fault code sent when the argument count does not match the resolved method.
pub const FAULT_NO_SUCH_METHOD: &str = "NoSuchMethod";
/// Fault code sent when the service handler raised an error.
pub const FAULT_SERVICE_EXCEPTION: &str = "ServiceException";
/// Fault code sent when the call frame itself could not be decoded.
pub const FAULT_PROTOCOL_EXCEPTION: &str = "ProtocolException";

/// Custom error object for this library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or unexpected byte sequence.
    ///
    /// Always fatal to the message being decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No codec can handle the value or type.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// The remote replied with a fault frame.
    #[error("remote fault: {0}")]
    RemoteFault(Fault),

    /// The call frame carried a different number of arguments than the method takes.
    #[error("method {method} argument length mismatch, expected length={expected}, received length={received}")]
    ArgumentMismatch {
        method: String,
        expected: usize,
        received: usize,
    },

    /// No method matches the requested name.
    #[error("the service has no method named: {0}")]
    MethodNotFound(String),

    /// The remote did not answer in time.
    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Raised from within serde impls.
    #[error("{0}")]
    Custom(String),
}

/// Shorthand result type for the codec
pub type SerDeResult<T> = Result<T, Error>;

impl Error {
    pub(crate) fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn unexpected_eof() -> Self {
        Self::Protocol("unexpected end of file".to_string())
    }
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Self::Custom(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Self::Custom(msg.to_string())
    }
}

/// Broad classification of a fault code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    MethodNotFound,
    ArgumentMismatch,
    Service,
    Protocol,
    Other,
}

/// A fault reply: `code`, `message` and an optional `detail` payload.
#[derive(Debug, Clone)]
pub struct Fault {
    pub code: String,
    pub message: String,
    pub detail: Option<Value>,
}

impl Fault {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M, detail: Option<Value>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail,
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self.code.as_str() {
            FAULT_NO_SUCH_METHOD_EXCEPTION => FaultKind::MethodNotFound,
            FAULT_NO_SUCH_METHOD => FaultKind::ArgumentMismatch,
            FAULT_SERVICE_EXCEPTION => FaultKind::Service,
            FAULT_PROTOCOL_EXCEPTION => FaultKind::Protocol,
            _ => FaultKind::Other,
        }
    }

    /// The reconstructed remote exception, if the detail was one.
    pub fn exception(&self) -> Option<Shared<RemoteException>> {
        match &self.detail {
            Some(Value::Exception(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Build a fault from the decoded fault map.
    ///
    /// A detail exception without a message inherits the fault message.
    pub fn from_value(value: &Value) -> SerDeResult<Self> {
        let Value::Map(map) = value else {
            return Err(Error::protocol(format!(
                "expected fault map, found {}",
                value.kind_name()
            )));
        };
        let map = map.read();

        let text = |key: &str| -> String {
            match map.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        };

        let code = text("code");
        let message = text("message");
        let detail = map.get("detail").filter(|d| !d.is_null()).cloned();

        if let Some(Value::Exception(e)) = &detail {
            let mut e = e.write();
            if e.message.is_none() && !message.is_empty() {
                e.message = Some(message.clone());
            }
        }

        Ok(Self {
            code,
            message,
            detail,
        })
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Map;

    #[test]
    fn test_error_display() {
        let err = Error::Protocol("expected end of map at 0x4e".to_string());
        assert_eq!(err.to_string(), "protocol error: expected end of map at 0x4e");

        let err = Error::MethodNotFound("hello".to_string());
        assert_eq!(err.to_string(), "the service has no method named: hello");

        let err = Error::ArgumentMismatch {
            method: "add".to_string(),
            expected: 2,
            received: 3,
        };
        assert!(err.to_string().contains("received length=3"));
    }

    #[test]
    fn test_fault_from_map() {
        let mut map = Map::default();
        map.insert("code", Value::from("ServiceException"));
        map.insert("message", Value::from("boom"));
        let value = Value::Map(Shared::new(map));

        let fault = Fault::from_value(&value).unwrap();
        assert_eq!(fault.code, "ServiceException");
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.kind(), FaultKind::Service);
        assert!(fault.detail.is_none());
        assert_eq!(fault.to_string(), "ServiceException: boom");
    }

    #[test]
    fn test_fault_fills_exception_message() {
        let exception = Shared::new(RemoteException::new("java.lang.IllegalStateException"));

        let mut map = Map::default();
        map.insert("code", Value::from("ServiceException"));
        map.insert("message", Value::from("state"));
        map.insert("detail", Value::Exception(exception.clone()));

        let fault = Fault::from_value(&Value::Map(Shared::new(map))).unwrap();
        let detail = fault.exception().unwrap();
        assert!(detail.ptr_eq(&exception));
        assert_eq!(detail.read().message.as_deref(), Some("state"));
    }

    #[test]
    fn test_fault_rejects_non_map() {
        assert!(matches!(
            Fault::from_value(&Value::Int(1)),
            Err(Error::Protocol(_))
        ));
    }
}
