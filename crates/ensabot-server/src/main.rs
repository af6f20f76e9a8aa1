//! ENSA Bot — retrieval-augmented question answering over ENSA documents.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ensabot_chat::{AnswerEvent, CancelSignal};
use ensabot_core::EnsaBotConfig;
use ensabot_resolve::validate_query;
use ensabot_server::{build_router, indexing, AppState};

fn print_help() {
    println!("ENSA Bot — question answering over ENSA documents");
    println!();
    println!("Usage: ensabot [command]");
    println!();
    println!("Commands:");
    println!("  serve                    Start the HTTP server (default)");
    println!("  index [data-root]        Rebuild the vector index");
    println!("  ask <question...>        Answer one question on stdout");
    println!("  help                     Show this help message");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    match command {
        "serve" => serve().await,
        "index" => {
            let mut config = EnsaBotConfig::from_env()?;
            if let Some(root) = args.get(2) {
                config.data_root = PathBuf::from(root);
            }
            let state = AppState::from_config(config)?;
            let report = indexing::rebuild(&state).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        "ask" => {
            let question = args[2..].join(" ");
            ask(&question).await
        }
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}. Use 'ensabot help' for usage.", other);
            std::process::exit(1);
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = EnsaBotConfig::from_env()?;
    let port = config.port;
    info!("Data root: {}", config.data_root.display());

    let state = Arc::new(AppState::from_config(config)?);
    indexing::start_initial_build(state.clone());

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("ENSA Bot server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask(question: &str) -> anyhow::Result<()> {
    let query = validate_query(question)?.to_string();
    let state = AppState::from_config(EnsaBotConfig::from_env()?)?;
    indexing::ensure_index(&state).await?;

    let context = state
        .retriever
        .search_with(&query, state.config.retrieval.top_k, state.config.retrieval.mode)
        .await?;
    let events = state
        .generator
        .generate(&query, &context, CancelSignal::never());
    tokio::pin!(events);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            AnswerEvent::Token { content } => {
                write!(stdout, "{}", content)?;
                stdout.flush()?;
            }
            AnswerEvent::Done => writeln!(stdout)?,
            AnswerEvent::Sources { sources } => {
                if !sources.is_empty() {
                    writeln!(stdout, "\nSources: {}", sources.join(", "))?;
                }
            }
            AnswerEvent::Error { content, .. } | AnswerEvent::NoContext { content, .. } => {
                writeln!(stdout, "{}", content)?;
            }
        }
    }
    Ok(())
}
