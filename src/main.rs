//! CLI entry point for the tunnel's two peers.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
#![forbid(unsafe_code)]

mod cli;
mod logging;
mod socks5;

use clap::Parser;
use muxtun_proto::{dupe::Dupe, AddressFormat};
use thiserror::Error;
use tracing::{error, info};

/// Top-level errors.
#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn run_server(args: cli::ServerArgs) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("listening on {}:{}", args.host, args.port);
    let mux = muxtun_proto::server::ServerMux::new(AddressFormat::Ascii);
    loop {
        let (tunnel, peer) = listener.accept().await?;
        tokio::spawn(async move {
            info!("tunnel from {peer} accepted");
            if let Err(e) = mux.run(tunnel).await {
                error!("tunnel from {peer} ended with error: {e}");
            }
        });
    }
}

async fn run_client(args: cli::ClientArgs) -> Result<(), Error> {
    let tunnel = tokio::net::TcpStream::connect((args.server_host.as_str(), args.server_port)).await?;
    let (tunnel_rx, tunnel_tx) = tokio::io::split(tunnel);
    let (mux, scheduler_handle, reader_handle) =
        muxtun_proto::client::connect(tunnel_rx, tunnel_tx, AddressFormat::Ascii);
    if let Some(bytes_per_tick) = args.bytes_per_tick {
        mux.egress().set_link_bandwidth(bytes_per_tick);
    }

    let socks_listener = tokio::net::TcpListener::bind((args.socks_host.as_str(), args.socks_port)).await?;
    info!("SOCKS5 listening on {}:{}", args.socks_host, args.socks_port);
    let socks_mux = mux.dupe();
    let socks_task = tokio::spawn(async move {
        loop {
            match socks_listener.accept().await {
                Ok((stream, peer)) => {
                    let mux = socks_mux.dupe();
                    tokio::spawn(async move {
                        if let Err(e) = socks5::handle_connection(stream, &mux).await {
                            tracing::debug!("SOCKS5 connection from {peer} ended: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("SOCKS5 accept error: {e}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        _ = scheduler_handle => {
            error!("egress scheduler exited unexpectedly");
        }
        _ = reader_handle => {
            error!("tunnel reader loop exited unexpectedly");
        }
    }
    mux.shutdown().await;
    socks_task.abort();
    Ok(())
}

async fn main_real() -> Result<(), Error> {
    let cli = cli::Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    tracing::trace!("cli_args = {cli:?}");
    match cli.command {
        cli::Command::Client(args) => run_client(args).await,
        cli::Command::Server(args) => run_server(args).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = main_real().await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
