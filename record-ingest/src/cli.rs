use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept record submissions over TCP and persist them.
    Serve(ServeArgs),
    /// Send one record to a running server and print its reply.
    Submit(SubmitArgs),
    /// Print the records currently in the store.
    List(ListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5050")]
    pub listen: SocketAddr,

    /// Directory holding `alunos.json`.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// How long a connection may stay silent before it is dropped.
    #[arg(long, default_value_t = 30_000)]
    pub read_timeout_ms: u64,

    /// Pending-connection queue length passed to listen(2).
    #[arg(long, default_value_t = 128)]
    pub backlog: u32,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            data_dir: args.data_dir,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            backlog: args.backlog,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Address of the server.
    #[arg(long, default_value = "127.0.0.1:5050")]
    pub server: SocketAddr,

    /// Limit for connecting and for waiting on the reply.
    #[arg(long, default_value_t = 3_000)]
    pub timeout_ms: u64,

    pub name: String,

    #[arg(value_name = "CLASS")]
    pub class_label: String,

    /// Sent as typed; the server does the validation.
    #[arg(allow_hyphen_values = true)]
    pub score: String,
}

impl SubmitArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}
