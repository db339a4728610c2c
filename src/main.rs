//! # DriveWise
//!
//! Dealer assistant that answers from sales data, warranty/contract documents
//! and owner's manuals.
//!
//! Usage:
//!   drivewise ask "How many Camry units were sold in Texas in 2023?"
//!   drivewise ask --details "What does my warranty cover for transmission repairs?"
//!   drivewise chat                         # interactive session
//!   drivewise serve --port 8080            # HTTP gateway
//!   drivewise schema                       # show the sales tables

use anyhow::Result;
use clap::{Parser, Subcommand};
use drivewise_agent::{Answer, Router};
use drivewise_core::config::DriveWiseConfig;
use drivewise_core::traits::{GenerateParams, SqlTool};
use drivewise_providers::retry::RetryPolicy;
use drivewise_tools::{ChromaRetriever, Engine, ModelSqlTool, SalesDb, UnavailableSqlTool};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "drivewise",
    version,
    about = "🚗 DriveWise: answers from sales data, contracts and owner's manuals"
)]
struct Cli {
    /// Config file (default: ~/.drivewise/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask {
        question: String,

        /// Also print the tool calls behind the answer
        #[arg(long)]
        details: bool,
    },
    /// Interactive session; `/quit` or EOF to leave
    Chat {
        #[arg(long)]
        details: bool,
    },
    /// Start the HTTP gateway
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,
    },
    /// Print the sales database schema
    Schema,
}

fn load_config(path: Option<&str>) -> Result<DriveWiseConfig> {
    let mut config = match path {
        Some(p) => DriveWiseConfig::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?,
        None => DriveWiseConfig::load()?,
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Wire the model, both tools and the router from configuration.
fn build_router(config: &DriveWiseConfig) -> Result<Router> {
    let provider = drivewise_providers::create_provider(&config.llm)?;
    let embedder = drivewise_providers::create_embedder(&config.llm)?;

    let db_path = config.sql.resolved_path();
    let opened = Engine::parse(&config.sql.engine).and_then(|engine| SalesDb::open(&db_path, engine));
    let sql: Arc<dyn SqlTool> = match opened {
        Ok(db) => {
            let params = GenerateParams {
                model: config.llm.model.clone(),
                temperature: config.sql.temperature,
                max_tokens: config.llm.max_tokens,
                stop: vec![],
            };
            Arc::new(
                ModelSqlTool::new(db, provider.clone(), params)
                    .with_max_rows(config.sql.max_rows)
                    .with_timeout(Duration::from_secs(config.sql.timeout_secs)),
            )
        }
        Err(e) => {
            tracing::warn!("⚠️ Sales database unavailable ({}): {}", db_path.display(), e);
            Arc::new(UnavailableSqlTool::new(format!(
                "sales database unavailable at {}",
                db_path.display()
            )))
        }
    };

    let retry = RetryPolicy::new(config.llm.max_retries, config.llm.retry_base_ms);
    let retriever = Arc::new(ChromaRetriever::new(&config.retrieval, embedder, retry)?);

    let router = Router::from_config(config, provider, sql, retriever);
    tracing::info!(
        "✅ Router ready (provider={}, model={}, classifier={})",
        config.llm.provider,
        config.llm.model,
        router.classifier_name()
    );
    Ok(router)
}

fn print_answer(answer: &Answer, details: bool) {
    println!("{}", answer.text);
    if details && let Some(tools) = answer.tool_details() {
        println!("\n{tools}");
    }
}

async fn chat_loop(router: &Router, details: bool) -> Result<()> {
    println!("🚗 DriveWise: ask about sales, warranties or owner's manuals. /quit to leave.\n");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" || question == "/exit" {
            break;
        }
        let answer = router.route(question).await;
        print_answer(&answer, details);
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "drivewise=debug,drivewise_agent=debug,drivewise_tools=debug,drivewise_providers=debug,tower_http=debug"
    } else {
        "drivewise=info,drivewise_agent=info,drivewise_tools=info,drivewise_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Ask { question, details } => {
            let router = build_router(&config)?;
            let answer = router.route(&question).await;
            print_answer(&answer, details);
        }
        Command::Chat { details } => {
            let router = build_router(&config)?;
            chat_loop(&router, details).await?;
        }
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            let router = Arc::new(build_router(&config)?);
            drivewise_gateway::start(&config.gateway, router).await?;
        }
        Command::Schema => {
            let router = build_router(&config)?;
            println!("{}", router.describe_sql().await?);
        }
    }
    Ok(())
}
