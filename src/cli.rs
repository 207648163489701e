//! Command-line interface.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use clap::{Args, Parser, Subcommand};

/// A priority-scheduled, token-bucket-shaped stream multiplexing tunnel.
#[derive(Debug, Parser)]
#[command(name = "muxtun", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Decrease log verbosity (-q, -qq).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

/// The two peers this binary can run as.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the client peer: dial the server and expose a local SOCKS5 ingress.
    Client(ClientArgs),
    /// Run the server peer: accept tunnel connections and dial targets.
    Server(ServerArgs),
}

/// Arguments for `muxtun client`.
#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Server host to tunnel through.
    #[arg(long, default_value = "127.0.0.1")]
    pub server_host: String,
    /// Server port to tunnel through.
    #[arg(long, default_value_t = 9000)]
    pub server_port: u16,
    /// Local host to listen for SOCKS5 connections on.
    #[arg(long, default_value = "127.0.0.1")]
    pub socks_host: String,
    /// Local port to listen for SOCKS5 connections on.
    #[arg(long, default_value_t = 1080)]
    pub socks_port: u16,
    /// Egress budget in bytes per scheduling tick. Defaults to the library's
    /// built-in default if unset.
    #[arg(long)]
    pub bytes_per_tick: Option<u32>,
}

/// Arguments for `muxtun server`.
#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Host to listen for tunnel connections on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen for tunnel connections on.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,
}
