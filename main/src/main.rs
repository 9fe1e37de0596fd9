mod app;
mod render;

use std::io::Write as _;

use clap::{Parser, Subcommand};
use common::{error::AppError, utils::config::get_config};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

#[derive(Parser)]
#[command(name = "ragline", version, about = "Ask questions about a local document folder")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the document folder and update the index
    Ingest,
    /// Show corpus and ingestion status
    Status,
    /// Answer a single question
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Read questions from stdin, one per line. `/ingest` and `/status` run those commands
    Chat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;
    let app = App::from_config(config).await?;

    match cli.command {
        Command::Ingest => run_ingest(&app, cli.json).await?,
        Command::Status => run_status(&app, cli.json).await?,
        Command::Ask { question } => {
            let question = question.join(" ");
            if let Err(err) = run_ask(&app, &question, cli.json).await {
                println!("{}", err.user_message());
            }
        }
        Command::Chat => run_chat(&app, cli.json).await?,
    }

    Ok(())
}

async fn run_ingest(app: &App, json: bool) -> Result<(), AppError> {
    let report = app.ingest().await?;
    if json {
        print_json(&report);
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn run_status(app: &App, json: bool) -> Result<(), AppError> {
    let report = app.status().await?;
    if json {
        print_json(&report);
    } else {
        println!("{}", render::status(&report));
    }
    Ok(())
}

async fn run_ask(app: &App, question: &str, json: bool) -> Result<(), AppError> {
    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let result = app
        .orchestrator
        .answer_with_cancellation(question, &token)
        .await;
    watcher.abort();

    let answer = result?;
    if json {
        print_json(&answer);
    } else {
        println!("{}", render::answer(&answer));
    }
    Ok(())
}

async fn run_chat(app: &App, json: bool) -> Result<(), AppError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        let outcome = match input {
            "" => Ok(()),
            "/quit" | "/exit" => break,
            "/ingest" => run_ingest(app, json).await,
            "/status" => run_status(app, json).await,
            question => run_ask(app, question, json).await,
        };
        if let Err(err) = outcome {
            error!(error = %err, "chat command failed");
            println!("{}", err.user_message());
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => error!(error = %err, "failed to render json"),
    }
}
