//! The client-side middleware module

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{frame_codec, overload_name};
use crate::envelope::{self, Call, Version};
use crate::registry::TypeRegistry;
use crate::ser_de::{self, Error, SerDeResult};
use crate::value::Value;

/// The context manager for the client.
///
/// The context manager handles the transmission of calls to its server-side counterpart,
/// the dispatcher. The connection is kept open between calls and re-established
/// after a transport error.
pub struct ContextManager {
    /// The server's address
    target: SocketAddr,

    /// Connect and reply timeout
    timeout: Duration,

    /// Number of connection attempts
    retries: u8,

    version: Version,

    /// Send `name__argc` instead of the plain method name
    mangle_overloads: bool,

    registry: Arc<TypeRegistry>,
    connection: Option<Framed<TcpStream, LengthDelimitedCodec>>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("version", &self.version)
            .field("mangle_overloads", &self.mangle_overloads)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl ContextManager {
    /// Create a new context manager for the target address.
    ///
    /// No connection is made until the first call, or [ContextManager::connect].
    pub fn new(target: SocketAddr, timeout: Duration, retries: u8, version: Version) -> Self {
        Self {
            target,
            timeout,
            retries,
            version,
            mangle_overloads: false,
            registry: TypeRegistry::global(),
            connection: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_overload_mangling(mut self, enabled: bool) -> Self {
        self.mangle_overloads = enabled;
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Establish the connection, retrying up to the configured number of times.
    pub async fn connect(&mut self) -> SerDeResult<()> {
        let mut last_err = Error::Timeout;

        for attempt in 1..=self.retries.max(1) {
            log::debug!("connecting to {} (attempt {})", self.target, attempt);

            match tokio::time::timeout(self.timeout, TcpStream::connect(self.target)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    self.connection = Some(Framed::new(stream, frame_codec()));
                    log::debug!("connected to {}", self.target);

                    return Ok(());
                }
                Ok(Err(e)) => {
                    log::debug!("connection failed: {}", e);
                    last_err = Error::Io(e);
                }
                Err(_) => {
                    log::debug!("connection timed out");
                    last_err = Error::Timeout;
                }
            }
        }

        Err(last_err)
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Send a call and wait for its reply.
    ///
    /// A fault reply becomes [Error::RemoteFault]. A reply graph with cycles
    /// is never freed on its own; pass it to [release][crate::value::release]
    /// once done with it.
    pub async fn invoke(&mut self, method: &str, args: Vec<Value>) -> SerDeResult<Value> {
        let method = match self.mangle_overloads {
            true => overload_name(method, args.len()),
            false => method.to_string(),
        };

        let call = Call::new(method, args);
        let frame = envelope::encode_call(self.version, &call, self.registry.clone())?;
        log::debug!("calling {} ({} bytes)", call.method, frame.len());

        let response = match self.exchange(frame).await {
            Ok(r) => r,
            Err(e) => {
                // the stream may hold half a message
                self.disconnect();
                return Err(e);
            }
        };
        log::debug!("reply to {}: {} bytes", call.method, response.len());

        envelope::decode_reply(self.version, &response, self.registry.clone())?.into_result()
    }

    /// Like [ContextManager::invoke], converting the reply to `T`.
    pub async fn call<T: DeserializeOwned>(&mut self, method: &str, args: Vec<Value>) -> SerDeResult<T> {
        ser_de::from_value(self.invoke(method, args).await?)
    }

    async fn exchange(&mut self, frame: Vec<u8>) -> SerDeResult<Vec<u8>> {
        if self.connection.is_none() {
            self.connect().await?;
        }
        let timeout = self.timeout;
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::NotConnected)))?;

        match tokio::time::timeout(timeout, conn.send(Bytes::from(frame))).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::Timeout),
        }

        match tokio::time::timeout(timeout, conn.next()).await {
            Ok(Some(res)) => Ok(res?.to_vec()),
            Ok(None) => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))),
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Dispatcher, ServiceError};
    use crate::ser_de::FaultKind;
    use crate::service_handler;
    use crate::value::RemoteException;

    #[derive(Debug)]
    struct Greeter;

    impl Greeter {
        async fn hello(&mut self) -> Result<String, ServiceError> {
            Ok("Hello, World".to_string())
        }

        async fn add(&mut self, a: i32, b: i32) -> Result<i32, ServiceError> {
            Ok(a + b)
        }

        async fn echo(&mut self, v: Value) -> Result<Value, ServiceError> {
            Ok(v)
        }

        async fn fail(&mut self, message: String) -> Result<(), ServiceError> {
            Err(ServiceError::raise(message))
        }
    }

    service_handler! {
        Greeter,
        "hello" => hello(),
        "add" => add(a: i32, b: i32),
        "echo" => echo(v: Value),
        "fail" => fail(message: String),
    }

    async fn spawn_server() -> SocketAddr {
        let mut dispatcher = Dispatcher::with_registry(
            "127.0.0.1:0",
            Greeter,
            Arc::new(TypeRegistry::new()),
            false,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let addr = dispatcher.local_addr().unwrap();

        tokio::spawn(async move { dispatcher.dispatch().await });
        addr
    }

    fn client(addr: SocketAddr, version: Version) -> ContextManager {
        ContextManager::new(addr, Duration::from_secs(2), 3, version)
            .with_registry(Arc::new(TypeRegistry::new()))
    }

    #[tokio::test]
    async fn test_loopback() {
        let addr = spawn_server().await;

        for version in [Version::Hessian1, Version::Hessian2] {
            let mut ctx = client(addr, version);

            let hello: String = ctx.call("hello", vec![]).await.unwrap();
            assert_eq!(hello, "Hello, World");

            let sum: i32 = ctx.call("add", vec![Value::Int(2), Value::Int(3)]).await.unwrap();
            assert_eq!(sum, 5);

            let list = Value::list(vec![Value::from("a"), Value::Long(1 << 40), Value::Null]);
            let echoed = ctx.invoke("echo", vec![list.clone()]).await.unwrap();
            assert_eq!(echoed, list);
        }
    }

    #[tokio::test]
    async fn test_loopback_faults() {
        let addr = spawn_server().await;
        let mut ctx = client(addr, Version::Hessian2);

        match ctx.invoke("missing", vec![]).await {
            Err(Error::RemoteFault(f)) => assert_eq!(f.kind(), FaultKind::MethodNotFound),
            other => panic!("expected fault, got {:?}", other),
        }

        match ctx.invoke("fail", vec![Value::from("bad things")]).await {
            Err(Error::RemoteFault(f)) => {
                assert_eq!(f.kind(), FaultKind::Service);
                assert_eq!(f.message, "bad things");

                let e: Option<RemoteException> = f.exception().map(|e| e.read().clone());
                assert_eq!(e.unwrap().message.as_deref(), Some("bad things"));
            }
            other => panic!("expected fault, got {:?}", other),
        }

        // connection survives the faults
        let sum: i32 = ctx.call("add", vec![Value::Int(1), Value::Int(1)]).await.unwrap();
        assert_eq!(sum, 2);
    }

    #[tokio::test]
    async fn test_overload_mangling() {
        let addr = spawn_server().await;
        let mut ctx = client(addr, Version::Hessian2).with_overload_mangling(true);

        let sum: i32 = ctx.call("add", vec![Value::Int(20), Value::Int(22)]).await.unwrap();
        assert_eq!(sum, 42);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to find a port nobody listens on
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let mut ctx = ContextManager::new(addr, Duration::from_millis(200), 2, Version::Hessian2);
        assert!(ctx.invoke("hello", vec![]).await.is_err());
    }
}
