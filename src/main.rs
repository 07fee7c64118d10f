//! `filewire` binary: runs a file server or a one-shot client request.

mod cli;

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use cli::{ClientArgs, Cli, Command, Request, ServerArgs};
use filewire::{
    ClientEvent,
    FileClient,
    FileServer,
    FileStore,
    UploadOptions,
    client::Upload,
    config::{self, ClientConfig, ServerConfig},
};
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long the client keeps printing replies after the last one arrived.
const QUIET_PERIOD: Duration = Duration::from_millis(750);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Server(args) => run_server(args).await,
        Command::Client(args) => run_client(args).await,
    }
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let mut config: ServerConfig = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(storage) = args.storage {
        config.storage_dir = storage;
    }
    if let Some(records) = args.records {
        config.records_file = records;
    }
    config.pending_accounts.extend(args.pending);

    if let Some(addr) = args.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let store = FileStore::open(&config.records_file)
        .with_context(|| format!("loading account records from {}", config.records_file.display()))?;
    let server = FileServer::new(config, Arc::new(store)).await?;
    info!(addr = %server.local_addr()?, "file server listening");
    server.run().await?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;
    info!(%addr, "serving metrics");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    warn!(%addr, "built without the metrics feature; exporter not started");
    Ok(())
}

async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let mut config: ClientConfig = load_config(&args.config)?;
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if let Some(username) = args.username {
        config.username = username;
    }
    if let Some(password) = args.password {
        config.password = password;
    }
    anyhow::ensure!(
        !config.username.is_empty(),
        "no username configured; pass --username or set it in {}",
        args.config.display()
    );

    let deadline = Instant::now() + Duration::from_secs(args.wait);
    let mut client = FileClient::connect(config).await?;
    let mut awaited = None;
    match args.request {
        Request::Login => {}
        Request::Upload {
            file,
            output_name,
            share,
            background,
            inline,
            fragment_size,
        } => {
            let options = UploadOptions {
                background: (background || inline).then_some(background),
                fragment_size,
                output_name,
                shared_with: share,
            };
            let summary = match client.upload(&file, &options).await? {
                Upload::Sent(summary) => summary,
                Upload::Background(handle) => handle.join().await?,
            };
            println!(
                "sent {} ({} bytes in {} fragments)",
                summary.name, summary.bytes, summary.fragments
            );
        }
        Request::Download { name } => {
            client.download(&name).await?;
            awaited = Some(name);
        }
        Request::List => client.list_files().await?,
        Request::Shared => client.view_shared_files().await?,
    }

    print_events(&mut client, deadline, awaited.as_deref()).await;
    client.close().await?;
    Ok(())
}

/// Print server events until the awaited download ends, the server goes
/// quiet, or `deadline` passes.
async fn print_events(client: &mut FileClient, deadline: Instant, download: Option<&str>) {
    loop {
        let wake = match download {
            Some(_) => deadline,
            None => deadline.min(Instant::now() + QUIET_PERIOD),
        };
        let Ok(event) = timeout_at(wake, client.next_event()).await else {
            if download.is_some() {
                warn!("timed out waiting for the download");
            }
            return;
        };
        let Some(event) = event else {
            warn!("server closed the connection");
            return;
        };
        match &event {
            ClientEvent::Info(message) => println!("{message}"),
            ClientEvent::AccountAssigned(id) => println!("assigned account id {id}"),
            ClientEvent::Downloaded { name, path, bytes } => {
                println!("downloaded {name} ({bytes} bytes) to {}", path.display());
            }
            ClientEvent::Aborted { name, .. } => println!("server aborted transfer of {name}"),
        }
        if let (
            Some(awaited),
            ClientEvent::Downloaded { name, .. } | ClientEvent::Aborted { name, .. },
        ) = (download, &event)
            && name == awaited
        {
            return;
        }
    }
}

fn load_config<T>(path: &Path) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    config::load(path).with_context(|| format!("loading {}", path.display()))
}
