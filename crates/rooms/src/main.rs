use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, info};

use huddle_rooms::config::AppConfig;
use huddle_rooms::database::connection::DbConnection;
use huddle_rooms::models::listing::DEFAULT_LIMIT;
use huddle_rooms::models::room::RoomView;
use huddle_rooms::DirectoryError;
use huddle_rooms::state::AppState;

#[derive(Debug, Parser)]
#[command(version, about = "Inspect and manage chat rooms")]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the documents table (postgres backend)
    InitSchema,
    /// Drop the documents table (postgres backend)
    DropSchema,
    /// Print the rooms of a user with their newest message and other participant
    List {
        #[arg(long)]
        user: String,
    },
    /// Create a room unless it already exists
    Ensure {
        #[arg(long)]
        room: String,
        #[arg(long = "participant", required = true)]
        participants: Vec<String>,
    },
    /// Append a text message to a room
    Post {
        #[arg(long)]
        room: String,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        text: String,
    },
    /// Print the newest messages of a room
    Recent {
        #[arg(long)]
        room: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Delete a room and all of its messages
    Delete {
        #[arg(long)]
        room: String,
    },
    /// Print the room list of a user on every change, until Ctrl-C
    Watch {
        #[arg(long)]
        user: String,
    },
}

fn schema_connection(state: &AppState) -> anyhow::Result<&DbConnection> {
    match &state.db_connection {
        Some(connection) => Ok(connection),
        None => bail!("schema management needs the postgres backend"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    write_json(&mut io::stdout().lock(), value)
}

fn write_json<T: Serialize>(out: &mut impl Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Writes every room list until the subscription ends. Failed updates are
/// logged and skipped. Returns how many lists were written.
async fn write_room_updates<S>(mut updates: S, out: &mut impl Write) -> anyhow::Result<usize>
where
    S: Stream<Item = Result<Vec<RoomView>, DirectoryError>> + Unpin,
{
    let mut written = 0;
    while let Some(update) = updates.next().await {
        match update {
            Ok(rooms) => {
                write_json(out, &rooms)?;
                written += 1;
            }
            Err(e) => error!("room subscription update failed: {e}"),
        }
    }
    Ok(written)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::from_yaml_file(&cli.config)?;
    let state = AppState::try_init(&config).await?;
    let directory = &state.directory;

    match cli.command {
        Command::InitSchema => schema_connection(&state)?.create_all().await?,
        Command::DropSchema => schema_connection(&state)?.drop_all().await?,
        Command::List { user } => print_json(&directory.list_rooms_for_user(&user).await?)?,
        Command::Ensure { room, participants } => {
            let created = directory.ensure_room_exists(&room, participants).await?;
            print_json(&serde_json::json!({ "roomId": room, "created": created }))?;
        }
        Command::Post { room, sender, text } => {
            let message = directory
                .open_message_feed(&room)?
                .append(&sender, &text)
                .await?;
            print_json(&message)?;
        }
        Command::Recent { room, limit } => {
            let messages = directory.open_message_feed(&room)?.recent(limit).await?;
            print_json(&messages)?;
        }
        Command::Delete { room } => {
            let deleted = directory.delete_room_and_messages(&room).await?;
            print_json(&serde_json::json!({ "roomId": room, "deletedMessages": deleted }))?;
        }
        Command::Watch { user } => {
            let mut subscription = directory.subscribe_to_rooms_for_user(&user).await?;
            let token = subscription.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, closing room subscription");
                    token.cancel();
                }
            });
            let written = write_room_updates(&mut subscription, &mut io::stdout()).await?;
            info!("room subscription ended after {written} update(s)");
        }
    }

    Ok(())
}
