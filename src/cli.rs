use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the math server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a server and submit questions interactively.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8421")]
    pub listen: SocketAddr,

    /// Append connect/disconnect/error events to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username announced when joining the server.
    #[arg(long)]
    pub username: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:8421")]
    pub server: SocketAddr,
}
