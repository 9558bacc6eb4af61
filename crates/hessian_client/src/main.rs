mod args;

use std::net::{SocketAddr, SocketAddrV4};

use args::ClientArgs;
use clap::Parser;
use hessian::interfaces::{register_models, DemoClient};
use hessian::middleware::ContextManager;
use hessian::value::Value;
use hessian::{Error, TypeRegistry};

#[tokio::main]
async fn main() -> Result<(), Error> {
    match std::env::var("RUST_LOG") {
        Ok(_) => (),
        Err(_) => std::env::set_var("RUST_LOG", "DEBUG"),
    }

    pretty_env_logger::formatted_timed_builder()
        .parse_env("RUST_LOG")
        .init();

    let args = ClientArgs::parse();
    register_models(&TypeRegistry::global())?;

    let target = SocketAddr::V4(SocketAddrV4::new(args.target, args.port));
    log::info!("calling {} over {}", target, args.protocol);

    let manager = ContextManager::new(
        target,
        args.request_timeout.into(),
        args.num_retries,
        args.protocol.into(),
    )
    .with_overload_mangling(args.mangle_overloads);
    let mut client = DemoClient::new(manager);

    log::info!("starting remote invocations");
    println!("hello: {}", client.hello().await?);

    for record in client.test2().await? {
        println!("test2: {:?}", record);
    }

    println!("add: {}", client.add(40, 2).await?);

    let sent = Value::list(vec![Value::from("echo"), Value::Long(1 << 40), Value::Null]);
    println!("echo: {}", client.echo(sent).await?);

    match client.fail(&args.fail_message).await {
        Ok(()) => log::warn!("fail() returned without an error"),
        Err(Error::RemoteFault(fault)) => println!("fail: {:?} {}", fault.kind(), fault),
        Err(e) => return Err(e),
    }

    Ok(())
}
