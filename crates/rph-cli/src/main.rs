mod config;
mod curriculum_cmd;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rph_core::generation::{GeminiClient, TextGenerator};
use rph_core::token;
use rph_db::pool;

use config::RphConfig;
use curriculum_cmd::CurriculumCommands;

#[derive(Parser)]
#[command(name = "rph", about = "Lesson plan and assessment generator for teachers")]
struct Cli {
    /// Database URL (overrides RPH_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an rph config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/rph")]
        db_url: String,
        /// Generative provider API key to store in the config file
        #[arg(long)]
        api_key: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the rph database
    DbInit,
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Bearer token management
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Curriculum reference data
    Curriculum {
        #[command(subcommand)]
        command: CurriculumCommands,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Issue a bearer token for a teacher (a new user ID if omitted)
    Issue {
        #[arg(long)]
        user_id: Option<String>,
    },
}

/// Execute `rph init`: write the config file.
fn cmd_init(db_url: &str, api_key: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();
    let has_api_key = api_key.is_some();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
            admin_ids: Vec::new(),
        },
        generation: config::GenerationSection {
            api_key,
            ..Default::default()
        },
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...{}", &token_secret[..8], &token_secret[56..]);
    if !has_api_key {
        println!(
            "  generation.api_key is not set; set {} before running `rph serve`.",
            config::API_KEY_VAR
        );
    }
    println!();
    println!("Next: run `rph db-init` to create and migrate the database.");

    Ok(())
}

/// Execute `rph db-init`: create the database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = RphConfig::resolve(cli_db_url)?;

    println!("Initializing rph database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("rph db-init complete.");
    Ok(())
}

fn cmd_token_issue(resolved: &RphConfig, user_id: Option<&str>) -> anyhow::Result<()> {
    let user_id = match user_id {
        Some(raw) => {
            uuid::Uuid::parse_str(raw).with_context(|| format!("invalid user ID: {raw}"))?
        }
        None => uuid::Uuid::new_v4(),
    };
    println!("user_id: {user_id}");
    println!("token:   {}", token::issue_token(&resolved.token_config, user_id));
    Ok(())
}

async fn cmd_serve(resolved: RphConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let gemini = resolved.generation.gemini_config()?;
    let timeout = Duration::from_secs(gemini.timeout_secs);
    let generator: Arc<dyn TextGenerator> =
        Arc::new(GeminiClient::new(gemini).context("failed to build generative client")?);

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    if resolved.admin_ids.is_empty() {
        tracing::warn!(
            "no admin user IDs configured; curriculum uploads over HTTP are disabled (set {})",
            config::ADMIN_IDS_VAR
        );
    }
    let state = serve_cmd::AppState::new(
        db_pool.clone(),
        resolved.token_config,
        generator,
        resolved.environment,
    )
    .with_timeout(timeout)
    .with_admins(resolved.admin_ids);
    let result = serve_cmd::run_serve(state, bind, port).await;
    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            api_key,
            force,
        } => {
            cmd_init(&db_url, api_key, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = RphConfig::resolve(cli.database_url.as_deref())?;
            cmd_serve(resolved, &bind, port).await?;
        }
        Commands::Token {
            command: TokenCommands::Issue { user_id },
        } => {
            let resolved = RphConfig::resolve(cli.database_url.as_deref())?;
            cmd_token_issue(&resolved, user_id.as_deref())?;
        }
        Commands::Curriculum { command } => {
            let resolved = RphConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = curriculum_cmd::run_curriculum_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
