use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use record_ingest::{
    cli::{Cli, Command, ListArgs, ServeArgs},
    client,
    server::{Server, ServerConfig},
    store::DurableStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Submit(args) => {
            let reply = client::submit(&args).await?;
            println!("{reply}");
        }
        Command::List(args) => list(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::from(args);
    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(err) => {
            error!(listen = %config.listen, "cannot start, is another instance already running? {err:#}");
            return Err(err);
        }
    };

    info!(store = %server.store_path().display(), "records will be appended to the store");
    info!("listening on {}", server.local_addr()?);
    server.run_until_signal().await
}

async fn list(args: ListArgs) -> Result<()> {
    let store = DurableStore::open(args.data_dir);
    for record in store.load_all().await? {
        println!("{}\t{}\t{}", record.name, record.class_label, record.score);
    }
    Ok(())
}
