//! CYPHER Control - CLI client for the CYPHER study assistant
//!
//! Talks to cypherd over HTTP.

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::CypherClient;
use cypher_common::api::ChatRequest;
use cypher_common::emotion::Emotion;
use cypher_common::wire::WireEvent;
use owo_colors::OwoColorize;
use std::io::Write;

#[derive(Parser)]
#[command(name = "cypherctl")]
#[command(about = "CYPHER - AI study assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "CYPHER_URL", default_value = "http://127.0.0.1:8000", global = true)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Chat {
        message: Vec<String>,

        /// Continue an existing thread
        #[arg(long)]
        thread: Option<String>,

        /// Temporary chat (not stored, not counted)
        #[arg(long)]
        temp: bool,

        /// Use the fast model tier
        #[arg(long)]
        fast: bool,
    },

    /// Manage conversation threads
    Threads {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Look up university information
    Info { query: Vec<String> },

    /// Show daemon health
    Status,
}

#[derive(Subcommand)]
enum ThreadAction {
    /// List threads, most recent first
    List,
    /// Print the messages of a thread
    Show { id: String },
    /// Rename a thread
    Rename { id: String, title: Vec<String> },
    /// Delete a thread and its messages
    Delete { id: String },
}

fn paint_emotion(emotion: Emotion) -> String {
    let label = format!("[{}]", emotion);
    match emotion {
        Emotion::Calm => label.cyan().to_string(),
        Emotion::Excited => label.yellow().bold().to_string(),
        Emotion::Sad => label.blue().to_string(),
        Emotion::Angry => label.red().bold().to_string(),
        Emotion::Normal => label.dimmed().to_string(),
    }
}

async fn chat(client: &CypherClient, message: &str, thread: Option<&str>, temp: bool, fast: bool) -> Result<()> {
    let body = ChatRequest {
        message: message.to_string(),
        thread_id: thread.map(str::to_string),
        is_temp: temp,
        complexity: if fast { "low" } else { "high" }.to_string(),
    };

    let mut stdout = std::io::stdout();
    let thread_id = client
        .chat_stream(&body, |event| {
            match event {
                WireEvent::Emotion(emotion) => print!("{} ", paint_emotion(emotion)),
                WireEvent::Text(text) => print!("{}", text),
            }
            let _ = stdout.flush();
        })
        .await?;
    println!();

    if let Some(id) = thread_id {
        println!("{}", format!("thread: {}", id).dimmed());
    }
    Ok(())
}

async fn threads(client: &CypherClient, action: ThreadAction) -> Result<()> {
    match action {
        ThreadAction::List => {
            let threads = client.threads().await?;
            if threads.is_empty() {
                println!("{}", "No threads yet.".dimmed());
            }
            for thread in threads {
                println!(
                    "{}  {}  {}",
                    thread.id.dimmed(),
                    thread.title.bold(),
                    thread.updated_at.dimmed()
                );
            }
        }
        ThreadAction::Show { id } => {
            for message in client.thread_messages(&id).await? {
                println!("{}", format!("{}:", message.role).bold());
                println!("{}\n", message.content);
            }
        }
        ThreadAction::Rename { id, title } => {
            client.rename_thread(&id, &title.join(" ")).await?;
            println!("{} renamed", id.green());
        }
        ThreadAction::Delete { id } => {
            client.delete_thread(&id).await?;
            println!("{} deleted", id.green());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = CypherClient::new(&cli.url)?;

    match cli.command {
        Commands::Chat {
            message,
            thread,
            temp,
            fast,
        } => {
            let message = message.join(" ");
            if message.trim().is_empty() {
                anyhow::bail!("Nothing to ask: pass a message");
            }
            chat(&client, &message, thread.as_deref(), temp, fast).await
        }
        Commands::Threads { action } => threads(&client, action).await,
        Commands::Info { query } => {
            println!("{}", client.info(&query.join(" ")).await?);
            Ok(())
        }
        Commands::Status => {
            let health = client.health().await?;
            println!(
                "{} cypherd v{} (up {}s)",
                health.status.green().bold(),
                health.version,
                health.uptime_seconds
            );
            Ok(())
        }
    }
}
