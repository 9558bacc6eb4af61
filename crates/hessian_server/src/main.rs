use std::net::SocketAddrV4;

use clap::Parser;
use hessian::interfaces::register_models;
use hessian::middleware::Dispatcher;
use hessian::TypeRegistry;

use crate::args::ServerArgs;
use crate::server::DemoServer;

mod args;
mod server;

#[tokio::main]
async fn main() {
    match std::env::var("RUST_LOG") {
        Ok(_) => (),
        Err(_) => std::env::set_var("RUST_LOG", "DEBUG"),
    }

    pretty_env_logger::formatted_timed_builder()
        .parse_env("RUST_LOG")
        .init();

    let args = ServerArgs::parse();

    if let Err(e) = register_models(&TypeRegistry::global()) {
        log::error!("unable to register the demo models: {}", e);
        return;
    }

    let addr = SocketAddrV4::new(args.address, args.port);
    let mut dispatcher = match Dispatcher::new(
        addr,
        DemoServer::default(),
        args.sequential,
        args.idle_timeout.into(),
    )
    .await
    {
        Ok(d) => d,
        Err(e) => {
            log::error!("failed to bind to {}: {}", addr, e);
            return;
        }
    };

    log::info!("server listening on {}", addr);

    if let Err(e) = dispatcher.dispatch().await {
        log::error!("dispatcher stopped: {}", e);
    }
}
