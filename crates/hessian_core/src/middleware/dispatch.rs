//! Dispatcher side implementations.
//!
//! The dispatcher accepts TCP connections and answers every frame on a
//! connection until the peer hangs up or goes quiet.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use super::{frame_codec, ServiceHandler, Skeleton};
use crate::registry::TypeRegistry;

/// The dispatcher for remote invocations.
///
/// The dispatcher routes the contents of remote invocations to their
/// appropriate handlers.
pub struct Dispatcher<H>
where
    H: ServiceHandler,
{
    listener: TcpListener,
    /// Connections idle for longer than this are closed
    idle_timeout: Duration,
    sequential: bool,

    /// Inner data structure that implements logic for remote interfaces
    skeleton: Arc<Skeleton<H>>,
}

impl<H> Dispatcher<H>
where
    H: ServiceHandler + 'static,
{
    /// Create a new dispatcher from the handler and a listening address.
    ///
    /// In sequential mode, each connection is served to completion before
    /// the next one is accepted.
    pub async fn new<A: ToSocketAddrs>(
        addr: A,
        handler: H,
        sequential: bool,
        idle_timeout: Duration,
    ) -> io::Result<Self> {
        Self::with_registry(addr, handler, TypeRegistry::global(), sequential, idle_timeout).await
    }

    pub async fn with_registry<A: ToSocketAddrs>(
        addr: A,
        handler: H,
        registry: Arc<TypeRegistry>,
        sequential: bool,
        idle_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("dispatcher listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            idle_timeout,
            sequential,
            skeleton: Arc::new(Skeleton::with_registry(handler, registry)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the dispatcher indefinitely.
    pub async fn dispatch(&mut self) -> io::Result<()> {
        let mut conn_num: usize = 0;

        loop {
            log::info!("awaiting connection #{}", conn_num);

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("accept error: {}", e);
                    continue;
                }
            };
            log::info!("connection #{} from {}", conn_num, peer);

            let skeleton = self.skeleton.clone();
            let idle_timeout = self.idle_timeout;

            let handle = tokio::spawn(async move {
                Self::serve_connection(stream, peer, skeleton, idle_timeout).await
            });

            // if we are processing sequentially, we wait on each task every loop iter
            if self.sequential {
                if let Err(e) = handle.await {
                    log::error!("connection task failed: {}", e);
                }
            }

            conn_num += 1;
        }
    }

    /// Answer frames on one connection until it closes.
    async fn serve_connection(
        stream: TcpStream,
        peer: SocketAddr,
        skeleton: Arc<Skeleton<H>>,
        idle_timeout: Duration,
    ) {
        let mut framed = Framed::new(stream, frame_codec());
        let mut request_num: usize = 0;

        loop {
            let frame = match tokio::time::timeout(idle_timeout, framed.next()).await {
                Err(_) => {
                    log::info!("{} idle for {:?}, closing", peer, idle_timeout);
                    break;
                }
                Ok(None) => {
                    log::info!("{} closed the connection", peer);
                    break;
                }
                Ok(Some(Err(e))) => {
                    log::error!("receive error from {}: {}", peer, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            log::debug!("request #{} from {}: {} bytes", request_num, peer, frame.len());
            log::trace!("request contents: {:?}", frame);

            // the skeleton locks the handler only for the call itself
            let response = match skeleton.handle_frame(&frame).await {
                Ok(r) => r,
                Err(e) => {
                    log::error!("unable to encode a reply for {}: {}", peer, e);
                    break;
                }
            };

            log::debug!("sending {} bytes to {}", response.len(), peer);
            if let Err(e) = framed.send(Bytes::from(response)).await {
                log::error!("send error to {}: {}", peer, e);
                break;
            }

            request_num += 1;
        }
    }
}
