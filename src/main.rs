use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docchat::{
    api,
    chat::ChatMessage,
    config::Config,
    logging,
    service::{DocChatApi, DocChatService},
};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "docchat", about = "Chat with your PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Upload a local PDF and ingest it.
    Ingest {
        /// PDF to upload.
        path: PathBuf,
    },
    /// Ask a question about an ingested document.
    Ask {
        /// Storage key printed by `ingest`.
        #[arg(long)]
        file_key: String,
        /// Question to answer.
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    logging::init_tracing();

    let service = Arc::new(
        DocChatService::from_config(&config)
            .await
            .context("failed to initialize document service")?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, &config).await,
        Command::Ingest { path } => ingest(service.as_ref(), path).await,
        Command::Ask { file_key, question } => ask(service.as_ref(), &file_key, question).await,
    }
}

async fn serve(service: Arc<DocChatService>, config: &Config) -> Result<()> {
    let app = api::create_router(service);
    let (listener, port) = bind_listener(config.server_port)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ingest(service: &DocChatService, path: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let receipt = service.upload_document(bytes, &name).await?;
    let cancel = cancel_on_ctrl_c();
    let report = service
        .ingest_document(&receipt.document.file_key, &cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn ask(service: &DocChatService, file_key: &str, question: String) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let mut answer = service
        .chat_stream(file_key, vec![ChatMessage::user(question)], cancel)
        .await?;
    let mut stdout = std::io::stdout();
    while let Some(piece) = answer.next().await {
        write!(stdout, "{}", piece?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
