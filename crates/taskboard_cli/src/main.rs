//! Command-line front end.
//!
//! # Responsibility
//! - Smoke-check `taskboard_core` linkage.
//! - Link lanes of JSON board files and run reconciliation passes over them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskboard_core::db::{open_db, share, SharedConnection};
use taskboard_core::repo::kv_repo::SqliteKeyValueStore;
use taskboard_core::repo::link_repo::SqliteLinkRegistryStore;
use taskboard_core::sync::links::link_lane;
use taskboard_core::sync::reconcile::Reconciler;
use taskboard_core::{
    init_logging, Board, BoardContext, Document, DocumentSet, GoogleTasksClient, LinkRegistry,
    Settings, SyncContext, TaskAdapter,
};

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "Kanban boards synchronized with a remote task service")]
#[command(version)]
struct Cli {
    /// SQLite database holding lane links and tokens
    #[arg(long, global = true, default_value = "taskboard.db")]
    db: PathBuf,

    /// Settings JSON file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Absolute directory for rotating log files
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[arg(long, global = true, default_value = taskboard_core::default_log_level())]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print core health and version
    Ping,

    /// List linked lanes per board file
    Links,

    /// Store the OAuth refresh token obtained from the consent flow
    Auth { refresh_token: String },

    /// Link a lane of a board file to a remote task list
    Link {
        /// Board JSON file
        board: PathBuf,

        /// Lane index
        #[arg(long)]
        lane: usize,

        /// Remote task list id
        #[arg(long)]
        list: String,
    },

    /// Reconcile every linked board file once
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(log_dir) = &cli.log_dir {
        init_logging(&cli.log_level, log_dir)?;
    }

    match &cli.command {
        Commands::Ping => {
            println!("taskboard_core ping={}", taskboard_core::ping());
            println!("taskboard_core version={}", taskboard_core::core_version());
        }
        Commands::Links => {
            let conn = share(open_db(&cli.db)?);
            let registry = open_registry(&conn)?;
            for entry in registry.entries() {
                println!("{}\t{}", entry.file_path, entry.lane_ids.join(","));
            }
        }
        Commands::Auth { refresh_token } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let conn = share(open_db(&cli.db)?);
            let client = open_client(&settings, &conn)?;
            client.tokens().store_refresh_token(refresh_token).await?;
            println!("refresh token stored");
        }
        Commands::Link { board, lane, list } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let conn = share(open_db(&cli.db)?);
            let ctx = sync_context(&settings, &conn)?;
            let document = Document::new(path_key(board), load_board(board)?);
            link_lane(&ctx, &document, &[*lane], list).await?;
            save_board(board, &*document.snapshot().await)?;
            println!("linked lane {lane} of {} to {list}", board.display());
        }
        Commands::Sync => {
            let settings = load_settings(cli.settings.as_deref())?;
            let conn = share(open_db(&cli.db)?);
            let ctx = Arc::new(sync_context(&settings, &conn)?);
            let documents = Arc::new(DocumentSet::new());
            for entry in ctx.registry.entries() {
                let path = Path::new(&entry.file_path);
                if path.exists() {
                    documents.insert(Arc::new(Document::new(
                        entry.file_path.clone(),
                        load_board(path)?,
                    )));
                }
            }

            let report = Reconciler::new(ctx.clone(), documents.clone())
                .sync_all()
                .await;
            for id in documents.ids() {
                if let Some(document) = documents.get(&id) {
                    save_board(Path::new(id.as_str()), &*document.snapshot().await)?;
                }
            }
            for document in &report.documents {
                match &document.result {
                    Ok(lanes) => {
                        for lane in lanes {
                            match &lane.result {
                                Ok(outcome) => {
                                    println!("{}\t{}\t{:?}", document.document, lane.list_id, outcome)
                                }
                                Err(err) => {
                                    println!("{}\t{}\terror: {err}", document.document, lane.list_id)
                                }
                            }
                        }
                    }
                    Err(err) => println!("{}\terror: {err}", document.document),
                }
            }
            info!(
                "event=cli_sync module=cli status=ok failures={}",
                report.failures()
            );
        }
    }
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings {}", path.display()))?;
    Ok(Settings::from_json_str(&raw)?)
}

fn load_board(path: &Path) -> Result<Board> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading board {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing board {}", path.display()))
}

fn save_board(path: &Path, board: &Board) -> Result<()> {
    let raw = serde_json::to_string_pretty(board)?;
    std::fs::write(path, raw).with_context(|| format!("writing board {}", path.display()))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn open_registry(conn: &SharedConnection) -> Result<LinkRegistry> {
    Ok(LinkRegistry::open(Arc::new(SqliteLinkRegistryStore::new(
        conn.clone(),
    )))?)
}

fn open_client(settings: &Settings, conn: &SharedConnection) -> Result<GoogleTasksClient> {
    Ok(GoogleTasksClient::new(
        &settings.sync,
        Arc::new(SqliteKeyValueStore::new(conn.clone())),
    )?)
}

fn sync_context(settings: &Settings, conn: &SharedConnection) -> Result<SyncContext> {
    Ok(SyncContext::new(
        BoardContext::new(settings.board.clone())?,
        open_registry(conn)?,
        Arc::new(open_client(settings, conn)?),
        TaskAdapter::from_settings(&settings.board, &settings.sync),
    ))
}
