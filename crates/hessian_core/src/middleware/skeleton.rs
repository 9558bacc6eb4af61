//! Server side call routing.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::lock::{Mutex, MutexGuard};
use futures::FutureExt;

use super::{overload_name, MethodDescriptor, ServiceHandler};
use crate::envelope::{self, Call, HeaderType, Reply, Version};
use crate::registry::TypeRegistry;
use crate::ser_de::text::escape_message;
use crate::ser_de::{
    Fault, SerDeResult, FAULT_NO_SUCH_METHOD, FAULT_NO_SUCH_METHOD_EXCEPTION,
    FAULT_PROTOCOL_EXCEPTION, FAULT_SERVICE_EXCEPTION,
};
use crate::value::{self, RemoteException, Value};

/// Type name of the exception sent as the detail of a service fault.
pub const SERVICE_ERROR_TYPE: &str = "hessian.ServiceError";

/// Decodes call frames, invokes the handler and encodes the reply.
///
/// Handler errors and panics never escape: they are answered with fault replies.
/// Only the handler call itself is serialized; frames are decoded, routed and
/// encoded concurrently.
pub struct Skeleton<H: ServiceHandler> {
    handler: Mutex<H>,
    routes: HashMap<String, &'static MethodDescriptor>,
    registry: Arc<TypeRegistry>,
}

impl<H: ServiceHandler> Skeleton<H> {
    pub fn new(handler: H) -> Self {
        Self::with_registry(handler, TypeRegistry::global())
    }

    /// Each method is reachable by its plain name, `name__argc` and its
    /// type-mangled name. The first method listed wins a plain name clash.
    pub fn with_registry(handler: H, registry: Arc<TypeRegistry>) -> Self {
        let mut routes = HashMap::new();

        for method in handler.methods() {
            routes.entry(method.name.to_string()).or_insert(method);
            routes.entry(method.overload_name()).or_insert(method);
            routes.entry(method.mangled_name()).or_insert(method);
        }
        log::debug!("skeleton routes: {:?}", routes.keys().collect::<Vec<_>>());

        Self {
            handler: Mutex::new(handler),
            routes,
            registry,
        }
    }

    /// Lock the handler, waiting for any call in progress.
    pub async fn handler(&self) -> MutexGuard<'_, H> {
        self.handler.lock().await
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.handler.get_mut()
    }

    /// Resolve a wire method name, preferring the overload with a matching arity.
    pub fn resolve(&self, name: &str, arg_count: usize) -> Option<&'static MethodDescriptor> {
        self.routes
            .get(&overload_name(name, arg_count))
            .or_else(|| self.routes.get(name))
            .copied()
    }

    /// Answer one call frame with one reply frame.
    ///
    /// Argument graphs are released once the reply is written, so cyclic
    /// arguments do not outlive the call unless the handler kept them.
    /// Only a reply that cannot be encoded at all is an error.
    pub async fn handle_frame(&self, frame: &[u8]) -> SerDeResult<Vec<u8>> {
        let (header, call) = match envelope::decode_call(frame, self.registry.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::error!("undecodable call: {}", e);

                let version = HeaderType::detect(frame)
                    .map(|(h, _)| h.reply_version())
                    .unwrap_or_default();
                let reply = fault(FAULT_PROTOCOL_EXCEPTION, &e.to_string(), None);

                return envelope::encode_reply(version, &reply, self.registry.clone());
            }
        };

        let version = header.reply_version();
        log::debug!("{:?} call to {} with {} arguments", header, call.method, call.args.len());

        let args = call.args.clone();
        let reply = self.handle_call(call).await;
        let encoded = self.encode(version, reply);

        value::release(args);
        encoded
    }

    /// Run a decoded call, turning every failure into a fault.
    pub async fn handle_call(&self, call: Call) -> Reply {
        let Some(method) = self.resolve(&call.method, call.args.len()) else {
            log::warn!("no method named {}", call.method);

            return fault(
                FAULT_NO_SUCH_METHOD_EXCEPTION,
                &format!("The service has no method named: {}", call.method),
                None,
            );
        };

        if method.arg_count() != call.args.len() {
            log::warn!(
                "{} takes {} arguments, received {}",
                method.name,
                method.arg_count(),
                call.args.len()
            );

            return fault(
                FAULT_NO_SUCH_METHOD,
                &format!(
                    "method {} argument length mismatch, received length={}",
                    method.name,
                    call.args.len()
                ),
                None,
            );
        }

        let outcome = {
            let mut handler = self.handler.lock().await;
            AssertUnwindSafe(handler.invoke(method, call.args))
                .catch_unwind()
                .await
        };

        match outcome {
            Ok(Ok(value)) => Reply::Value(value),
            Ok(Err(e)) => {
                log::warn!("{} failed: {}", method.name, e);
                service_fault(&e.root_cause())
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                log::error!("{} panicked: {}", method.name, message);
                service_fault(&message)
            }
        }
    }

    /// Encode the reply, falling back to a service fault when the value cannot be written.
    fn encode(&self, version: Version, reply: Reply) -> SerDeResult<Vec<u8>> {
        match envelope::encode_reply(version, &reply, self.registry.clone()) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                log::error!("reply encoding failed: {}", e);
                envelope::encode_reply(version, &service_fault(&e.to_string()), self.registry.clone())
            }
        }
    }
}

fn fault(code: &str, message: &str, detail: Option<Value>) -> Reply {
    Reply::Fault(Fault::new(code, escape_message(message), detail))
}

fn service_fault(message: &str) -> Reply {
    let detail = RemoteException::new(SERVICE_ERROR_TYPE).with_message(message);
    fault(FAULT_SERVICE_EXCEPTION, message, Some(Value::exception(detail)))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return s.to_string();
    }

    match panic.downcast_ref::<String>() {
        Some(s) => s.clone(),
        None => "service handler panicked".to_string(),
    }
}
