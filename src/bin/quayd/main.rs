mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use quayside::server::{Server, ServerOptions};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use crate::args::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    // Cancellation: ctrl-c begins a graceful shutdown.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            info!("shutting down");
            cancel.cancel();
        });
    }

    if let Err(error) = begin(args, cancel).await {
        error!(%error, "encountered runtime error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn begin(args: Args, cancel: CancellationToken) -> Result<()> {
    let opts = ServerOptions {
        binding: std::net::SocketAddr::new(args.listen, args.port).to_string(),
        storage_path: args.storage,
        password: args.password,
        ..ServerOptions::default()
    };

    let server = Server::new(opts)
        .bind()
        .await
        .context("opening storage and binding listener")?;

    server.serve(cancel).await.context("serving")?;

    Ok(())
}
