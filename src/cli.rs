//! Command line interface for the `filewire` binary.
//!
//! Shared with `build.rs`, which renders the man page from it, so this file
//! depends on nothing but `clap` and `std`.

use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

/// Command line arguments for the `filewire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "filewire",
    version,
    about = "Peer-to-peer file storage over a framed TCP protocol"
)]
pub struct Cli {
    /// Role to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level roles.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the file server.
    Server(ServerArgs),
    /// Connect to a file server and run one request.
    Client(ClientArgs),
}

/// Options for `filewire server`.
#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Server configuration file.
    #[arg(short, long, default_value = "server.toml")]
    pub config: PathBuf,
    /// Listen address, overriding the configuration.
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,
    /// Storage directory, overriding the configuration.
    #[arg(long)]
    pub storage: Option<PathBuf>,
    /// Account records file, overriding the configuration.
    #[arg(long)]
    pub records: Option<PathBuf>,
    /// Username allowed to create an account; may be repeated.
    #[arg(long = "pending", value_name = "USERNAME")]
    pub pending: Vec<String>,
    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Options for `filewire client`.
#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Client configuration file.
    #[arg(short, long, default_value = "client.toml")]
    pub config: PathBuf,
    /// Server address, overriding the configuration.
    #[arg(short, long)]
    pub server: Option<SocketAddr>,
    /// Username, overriding the configuration.
    #[arg(short, long)]
    pub username: Option<String>,
    /// Password, overriding the configuration.
    #[arg(short, long, env = "FILEWIRE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Seconds to wait for server replies.
    #[arg(long, default_value_t = 10)]
    pub wait: u64,
    /// Request to run after logging in.
    #[command(subcommand)]
    pub request: Request,
}

/// Client requests.
#[derive(Debug, Subcommand)]
pub enum Request {
    /// Log in and print the server's replies.
    Login,
    /// Upload a file.
    Upload {
        /// File to upload.
        file: PathBuf,
        /// Name to store the file under.
        #[arg(long = "as", value_name = "NAME")]
        output_name: Option<String>,
        /// Accounts to share the file with, comma separated.
        #[arg(long, value_delimiter = ',', value_name = "USERNAMES")]
        share: Vec<String>,
        /// Stream from a throttled background task regardless of size.
        #[arg(long, conflicts_with = "inline")]
        background: bool,
        /// Send inline regardless of size.
        #[arg(long)]
        inline: bool,
        /// Fragment size in bytes.
        #[arg(long)]
        fragment_size: Option<usize>,
    },
    /// Download a stored file.
    Download {
        /// Stored file name.
        name: String,
    },
    /// List stored files.
    List,
    /// List files shared with this account.
    Shared,
}
