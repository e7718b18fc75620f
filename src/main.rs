use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use querypilot::agent::SqlAgent;
use querypilot::assistant::SqlAssistant;
use querypilot::config::Settings;
use querypilot::db::SessionDb;
use querypilot::llm::LlmClient;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "querypilot")]
#[command(about = "Natural-language SQL assistant for MySQL with a safety-gated execution layer")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases available on the configured server
    Databases,
    /// Ask a single question against one database
    Ask {
        /// The question, in natural language
        question: String,

        /// Database to run against
        #[arg(short, long)]
        database: String,

        /// Permit INSERT/UPDATE/DELETE for this session
        #[arg(long)]
        allow_dml: bool,

        /// OpenAI-compatible API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Interactive chat session
    Chat {
        /// Database to run against (prompted interactively if omitted)
        #[arg(short, long)]
        database: Option<String>,

        /// Permit INSERT/UPDATE/DELETE for this session
        #[arg(long)]
        allow_dml: bool,

        /// OpenAI-compatible API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,
    },
}

fn load_settings(api_key: Option<String>, allow_dml: bool) -> Result<Settings> {
    if let Some(key) = api_key {
        std::env::set_var("OPENAI_API_KEY", key);
    }
    let mut settings = Settings::from_env().context("loading settings")?;
    if allow_dml {
        settings.allow_dml = true;
    }
    Ok(settings)
}

fn build_assistant(settings: &Settings) -> SqlAssistant<SessionDb> {
    let client = LlmClient::new(
        settings.llm.api_key.clone(),
        settings.llm.model.clone(),
        settings.llm.base_url.clone(),
    );
    let agent = SqlAgent::new(Arc::new(client));
    let db = SessionDb::new(settings.db.clone());
    SqlAssistant::new(agent, db, settings.allow_dml)
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn pick_database(db: &mut SessionDb) -> Result<String> {
    let databases = db.list_databases().await.context("listing databases")?;
    if databases.is_empty() {
        bail!("no databases visible to this user");
    }
    println!("Choose database:");
    for (i, name) in databases.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    loop {
        let choice = read_line("> ")?;
        match choice.parse::<usize>() {
            Ok(n) if n >= 1 && n <= databases.len() => return Ok(databases[n - 1].clone()),
            _ => println!("Enter a number between 1 and {}.", databases.len()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Databases => {
            let settings = load_settings(None, false)?;
            let mut db = SessionDb::new(settings.db);
            for name in db.list_databases().await.context("listing databases")? {
                println!("{}", name);
            }
            db.close().await?;
        }
        Commands::Ask {
            question,
            database,
            allow_dml,
            api_key,
        } => {
            let settings = load_settings(api_key, allow_dml)?;
            let mut assistant = build_assistant(&settings);
            assistant
                .executor_mut()
                .use_database(&database)
                .await
                .with_context(|| format!("connecting to database {}", database))?;
            let outcome = assistant.handle_request(&question).await;
            println!("{}", outcome.render_markdown());
            assistant.executor_mut().close().await?;
        }
        Commands::Chat {
            database,
            allow_dml,
            api_key,
        } => {
            let settings = load_settings(api_key, allow_dml)?;
            let mut assistant = build_assistant(&settings);

            let database = match database {
                Some(name) => name,
                None => pick_database(assistant.executor_mut()).await?,
            };
            assistant
                .executor_mut()
                .use_database(&database)
                .await
                .with_context(|| format!("connecting to database {}", database))?;
            println!(
                "Connected to database {}. Ask your SQL questions (\"quit\" to exit).",
                database
            );
            info!(%database, allow_dml = settings.allow_dml, "chat session ready");

            loop {
                let line = read_line("> ")?;
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                    break;
                }
                let outcome = assistant.handle_request(&line).await;
                println!("{}", outcome.render_markdown());
            }
            assistant.executor_mut().close().await?;
        }
    }

    Ok(())
}
