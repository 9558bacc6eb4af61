//! This module contains the client and server side
//! objects that carry calls and replies over the network.
//!
//! Every Hessian message travels in its own length-delimited frame.

mod context_manager;
mod dispatch;
mod skeleton;

use std::error::Error as StdError;

use async_trait::async_trait;
use tokio_util::codec::LengthDelimitedCodec;

pub use context_manager::*;
pub use dispatch::*;
pub use skeleton::*;

use crate::ser_de::Error;
use crate::value::Value;

/// Max frame size, in either direction
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The frame codec shared by [Dispatcher] and [ContextManager].
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// A remotely callable method: its name and the Rust types of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub param_types: &'static [&'static str],
}

impl MethodDescriptor {
    pub const fn new(name: &'static str, param_types: &'static [&'static str]) -> Self {
        Self { name, param_types }
    }

    pub fn arg_count(&self) -> usize {
        self.param_types.len()
    }

    /// `name__argc`, the name clients send to pick an overload by arity.
    pub fn overload_name(&self) -> String {
        overload_name(self.name, self.arg_count())
    }

    /// The method name followed by the wire name of each parameter type,
    /// e.g. `add_int_int`.
    pub fn mangled_name(&self) -> String {
        let mut name = self.name.to_string();
        for ty in self.param_types {
            name.push('_');
            mangle_type(&mut name, ty);
        }

        name
    }
}

/// `name__argc`
pub fn overload_name(name: &str, arg_count: usize) -> String {
    format!("{}__{}", name, arg_count)
}

/// Append the wire name of a Rust type, as written by `stringify!`.
fn mangle_type(buf: &mut String, ty: &str) {
    let ty: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
    let ty = ty.trim_start_matches('&');

    let element = ty
        .strip_prefix("Vec<")
        .and_then(|s| s.strip_suffix('>'))
        .or_else(|| ty.strip_prefix('[').and_then(|s| s.strip_suffix(']')));

    if let Some(element) = element {
        match element {
            "u8" => buf.push_str("binary"),
            _ => {
                buf.push('[');
                mangle_type(buf, element);
            }
        }
        return;
    }

    // short name, generics dropped
    let base = ty.split('<').next().unwrap_or(ty);
    let short = base.rsplit("::").next().unwrap_or(base);

    match short {
        "bool" => buf.push_str("boolean"),
        "i8" | "u8" | "i16" | "u16" | "i32" => buf.push_str("int"),
        "i64" | "u32" | "u64" | "isize" | "usize" => buf.push_str("long"),
        "f32" | "f64" => buf.push_str("double"),
        "String" | "str" | "char" => buf.push_str("string"),
        "UtcMillis" => buf.push_str("date"),
        "Bytes" => buf.push_str("binary"),
        other => buf.push_str(other),
    }
}

/// Errors raised by a [ServiceHandler] method.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// An argument could not be converted to the parameter type.
    #[error("argument conversion failed: {0}")]
    Argument(#[source] Error),

    /// The return value could not be converted to a [Value].
    #[error("return value conversion failed: {0}")]
    ReturnValue(#[source] Error),

    /// The method itself failed.
    #[error("{0}")]
    Raised(Box<dyn StdError + Send + Sync>),
}

impl ServiceError {
    pub fn raise<E: Into<Box<dyn StdError + Send + Sync>>>(e: E) -> Self {
        Self::Raised(e.into())
    }

    /// Message of the innermost error in the chain.
    pub fn root_cause(&self) -> String {
        let mut current: &(dyn StdError + 'static) = match self {
            Self::Raised(e) => e.as_ref(),
            Self::Argument(e) => e,
            Self::ReturnValue(e) => e,
        };

        while let Some(next) = current.source() {
            current = next;
        }

        current.to_string()
    }
}

/// Route and run decoded calls.
///
/// Implementations list their methods in [ServiceHandler::methods];
/// the [Skeleton] resolves names against that table and only invokes a
/// method once the argument count matches.
///
/// Use the [service_handler!][crate::service_handler] macro to implement this trait.
#[async_trait]
pub trait ServiceHandler: Send {
    fn methods(&self) -> &'static [MethodDescriptor];

    async fn invoke(
        &mut self,
        method: &'static MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<Value, ServiceError>;
}

/// This macro implements [`ServiceHandler`] with a specified number of routes.
///
/// Each route names the wire method and the handler method it calls. Handler
/// methods take [FromValue][crate::ser_de::FromValue] arguments and return
/// `Result<impl IntoValue, impl Into<ServiceError>>`.
///
/// ```no
/// #[derive(Debug)]
/// pub struct Server;
///
/// impl Server {
///     async fn add(&mut self, a: i32, b: i32) -> Result<i32, ServiceError> {
///         Ok(a + b)
///     }
/// }
///
/// service_handler! {
///     Server,
///     "add" => add(a: i32, b: i32),
///     // an arbitrary number of routes can be added
/// }
/// ```
#[macro_export]
macro_rules! service_handler {
    ($server_ty: ty,
        $($name: literal => $method: ident ( $($arg: ident : $arg_ty: ty),* )),+ $(,)?
    ) => {
        #[$crate::async_trait]
        impl $crate::middleware::ServiceHandler for $server_ty {
            fn methods(&self) -> &'static [$crate::middleware::MethodDescriptor] {
                const METHODS: &[$crate::middleware::MethodDescriptor] = &[
                    $($crate::middleware::MethodDescriptor::new($name, &[$(stringify!($arg_ty)),*]),)+
                ];

                METHODS
            }

            #[allow(unused_mut, unused_variables)]
            async fn invoke(
                &mut self,
                method: &'static $crate::middleware::MethodDescriptor,
                args: Vec<$crate::value::Value>,
            ) -> Result<$crate::value::Value, $crate::middleware::ServiceError> {

                $({
                    let expected: &[&str] = &[$(stringify!($arg_ty)),*];

                    if method.name == $name && method.param_types == expected {
                        $crate::log::info!("invoking {}", $name);

                        let mut args = args.into_iter();
                        $(
                            let $arg = <$arg_ty as $crate::ser_de::FromValue>::from_value(args.next().unwrap_or_default())
                                .map_err($crate::middleware::ServiceError::Argument)?;
                        )*

                        let res = self.$method($($arg),*)
                            .await
                            .map_err(Into::<$crate::middleware::ServiceError>::into)?;

                        return $crate::ser_de::IntoValue::into_value(res)
                            .map_err($crate::middleware::ServiceError::ReturnValue);
                    }
                })+

                // descriptors come from the table above
                Err($crate::middleware::ServiceError::raise(format!("no route for {}", method.name)))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        let add = MethodDescriptor::new("add", &["i32", "i32"]);
        assert_eq!(add.overload_name(), "add__2");
        assert_eq!(add.mangled_name(), "add_int_int");

        let store = MethodDescriptor::new(
            "store",
            &["String", "Vec < u8 >", "Vec < TestClass >", "crate :: value :: UtcMillis", "bool"],
        );
        assert_eq!(store.mangled_name(), "store_string_binary_[TestClass_date_boolean");

        let hello = MethodDescriptor::new("hello", &[]);
        assert_eq!(hello.mangled_name(), "hello");
        assert_eq!(hello.overload_name(), "hello__0");
    }

    #[test]
    fn test_root_cause() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = ServiceError::raise(Outer(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        )));
        assert_eq!(err.to_string(), "outer");
        assert_eq!(err.root_cause(), "disk on fire");

        let err = ServiceError::raise("plain message");
        assert_eq!(err.root_cause(), "plain message");
    }
}
