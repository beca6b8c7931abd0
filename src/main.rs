use clap::Parser;
use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campus_query_router::{
    cli::{self, Cli, Command},
    config::{Config, LogFormat},
    graph::RoutingGraph,
    langbase::LangbaseClient,
    oracle::LangbaseOracle,
    retrieval::LangbaseMemoryIndex,
    session::Session,
    storage::SqliteStorage,
    students::SqlStudentAgent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Campus query router starting..."
    );

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match args.command.unwrap_or(Command::Chat) {
        Command::ImportStudents { path } => exit_with(cli::import_students(&storage, &path).await),
        Command::Invocations { limit } => exit_with(cli::show_invocations(&storage, limit).await),
        Command::Chat => chat(config, storage).await,
    }
}

async fn chat(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    info!("Ensuring required Langbase pipes exist...");
    if let Err(e) = langbase.ensure_pipes(&config.pipes).await {
        error!(error = %e, "Failed to ensure pipes exist");
        return Err(e.into());
    }

    let students = storage.count_students().await?;
    if students == 0 {
        info!("Students table is empty; load records with `import-students <file>`");
    }

    let graph = RoutingGraph::new(
        Arc::new(LangbaseOracle::new(langbase.clone(), &config.pipes)),
        Arc::new(LangbaseMemoryIndex::new(
            langbase.clone(),
            config.retrieval.regulations_memory.clone(),
        )),
        Arc::new(LangbaseMemoryIndex::new(
            langbase.clone(),
            config.retrieval.calendar_memory.clone(),
        )),
        Arc::new(SqlStudentAgent::new(storage.clone(), langbase, &config.pipes)),
    )
    .with_audit(Arc::new(storage))
    .with_pipe_names(config.pipes.clone());

    let mut session = Session::new(Arc::new(graph));
    info!(session_id = %session.id(), students, "Session ready, reading questions from stdin...");

    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = cli::run_repl(&mut session, stdin, tokio::io::stdout()).await {
        error!(error = %e, "Chat loop failed");
        return Err(e);
    }

    info!(turns = session.history().len(), "Session closed");
    Ok(())
}

fn exit_with(result: cli::CliResult) -> ! {
    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
