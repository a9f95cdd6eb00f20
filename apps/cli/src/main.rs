//! Chunkferry command-line uploader.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkferry_protocol::DEFAULT_CHUNK_SIZE;
use chunkferry_uploader::{
    BinaryTransport, ChunkTransport, MultipartTransport, PumpConfig, RefreshBridge, ServerApi,
    SessionControl, TaskState, UploadEvent, UploadManager, UploadTask,
};

#[derive(Debug, Parser)]
#[command(name = "chunkferry", about = "Resumable chunked-upload client")]
struct Cli {
    /// Server base URL.
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a file, creating a new session.
    Upload {
        file: PathBuf,
        /// Session id; a random UUID when omitted.
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Concurrent chunk sends (1-5).
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        /// Send raw binary bodies instead of multipart forms.
        #[arg(long)]
        binary: bool,
    },
    /// Resume an interrupted session for a local file.
    Resume {
        session: String,
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        #[arg(long)]
        binary: bool,
    },
    /// Print the server-side status of one session.
    Status { session: String },
    /// List sessions known to the server.
    List {
        /// Only sessions that can be resumed.
        #[arg(long)]
        resumable: bool,
    },
    /// Cancel a session and discard its chunks.
    Cancel { session: String },
}

fn transport_for(server: &str, binary: bool) -> Arc<dyn ChunkTransport> {
    if binary {
        Arc::new(BinaryTransport::new(server))
    } else {
        Arc::new(MultipartTransport::new(server))
    }
}

fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

async fn run_transfer(
    server: &str,
    session: String,
    file: PathBuf,
    chunk_size: u64,
    concurrency: usize,
    binary: bool,
    reattach: bool,
) -> anyhow::Result<()> {
    let transport = transport_for(server, binary);
    let api = Arc::new(ServerApi::new(server));
    let config = PumpConfig {
        concurrency: concurrency.clamp(1, 5),
        ..PumpConfig::default()
    };
    let (manager, mut events) = UploadManager::new(transport, api, config);

    // Record the active session so a restarted client can pick it up.
    let bridge = RefreshBridge::new(std::env::temp_dir().join("chunkferry-sessions.json"));
    let _ = bridge.persist(&[session.clone()]);

    if reattach {
        manager
            .attach(&session, &file, chunk_size)
            .await
            .with_context(|| format!("resume handshake failed for {session}"))?;
    } else {
        let task = Arc::new(UploadTask::open(&session, &file, chunk_size)?);
        println!(
            "uploading {} ({} in {} chunks) as session {session}",
            file.display(),
            human_bytes(task.total_bytes() as f64),
            task.total_chunks(),
        );
        manager.start(task).await;
    }

    let printer = tokio::spawn(async move {
        while let Some((id, event)) = events.recv().await {
            match event {
                UploadEvent::Progress(p) => {
                    print!(
                        "\r[{:>5.1}%] {}/s   ",
                        p.percentage,
                        human_bytes(p.speed_bps)
                    );
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                UploadEvent::StateChanged(state) => {
                    tracing::debug!(session = %id, ?state, "state changed");
                }
                UploadEvent::TaskFailed { message } => {
                    eprintln!("\nupload failed: {message}");
                }
                UploadEvent::ChunkAccepted { .. } => {}
            }
        }
    });

    let state = manager.wait(&session).await?;
    printer.abort();
    bridge.clear();

    match state {
        TaskState::Completed => {
            println!("\ndone");
            Ok(())
        }
        other => anyhow::bail!("upload ended in state {other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "chunkferry=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let server = cli.server.clone();

    match cli.command {
        Command::Upload {
            file,
            session,
            chunk_size,
            concurrency,
            binary,
        } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_transfer(&server, session, file, chunk_size, concurrency, binary, false).await
        }
        Command::Resume {
            session,
            file,
            chunk_size,
            concurrency,
            binary,
        } => run_transfer(&server, session, file, chunk_size, concurrency, binary, true).await,
        Command::Status { session } => {
            let api = ServerApi::new(&server);
            match api.status(&session).await? {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => anyhow::bail!("session {session} not found"),
            }
            Ok(())
        }
        Command::List { resumable } => {
            let api = ServerApi::new(&server);
            let sessions = if resumable {
                api.resumable().await?
            } else {
                api.status_all().await?
            };
            if sessions.is_empty() {
                println!("no sessions");
            } else {
                for s in sessions {
                    println!(
                        "{}  {:>6.1}%  {}/{} chunks  {:?}",
                        s.session_id,
                        s.progress_percentage,
                        s.received_chunks.len(),
                        s.total_chunks,
                        s.state,
                    );
                }
            }
            Ok(())
        }
        Command::Cancel { session } => {
            let api = ServerApi::new(&server);
            api.cancel(&session).await?;
            println!("cancelled {session}");
            Ok(())
        }
    }
}
