mod config;
mod diagnose_cmd;
mod run_cmd;
mod runtime;
mod serve_cmd;
mod server_cmds;
mod status_cmd;
mod task_cmds;

use clap::{Parser, Subcommand};

use sluice_db::pool;

use config::SluiceConfig;

#[derive(Parser)]
#[command(name = "sluice", about = "Database-to-database transfer orchestrator")]
struct Cli {
    /// Database URL (overrides SLUICE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a sluice config file (no database required)
    Init {
        /// PostgreSQL connection URL for the Task Store
        #[arg(long, default_value = "postgresql://localhost:5432/sluice")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the Task Store database (create + migrate)
    DbInit,
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Data-plane server management
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Run one task manually
    Run {
        /// Task name or ID
        task: String,
        /// Print progress events while the task runs
        #[arg(long)]
        watch: bool,
    },
    /// Run every active task of a kind (batch mode)
    RunPending {
        /// Kind filter: auto, manual, or both
        #[arg(long, default_value = "auto")]
        kind: String,
    },
    /// Show task statuses
    Status,
    /// Run the full diagnostic pass against one server
    Diagnose {
        /// Server name (as registered with `sluice server upsert`)
        server: String,
    },
    /// Serve the task-control HTTP API
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List all tasks
    List,
    /// Show one task in detail
    Show {
        /// Task name or ID
        task: String,
    },
    /// Create or replace a task from a TOML definition file
    Upsert {
        /// Path to the task TOML file
        file: String,
    },
    /// Enable a task for execution
    Enable {
        /// Task name or ID
        task: String,
    },
    /// Disable a task
    Disable {
        /// Task name or ID
        task: String,
    },
}

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Register or replace a server configuration
    Upsert {
        /// Server name referenced by tasks
        name: String,
        /// Host name or IP address
        #[arg(long)]
        host: String,
        /// Port (default 5432)
        #[arg(long)]
        port: Option<i32>,
        /// Login user
        #[arg(long)]
        user: String,
        /// Login password
        #[arg(long)]
        password: String,
        /// Database name
        #[arg(long)]
        database: String,
        /// Force TLS on or off; omit to decide from the host
        #[arg(long)]
        encrypt: Option<bool>,
        /// Do not accept the server certificate blindly
        #[arg(long)]
        no_trust_cert: bool,
    },
    /// List registered servers
    List,
}

/// Execute the `sluice init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `sluice db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `sluice db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = SluiceConfig::resolve(cli_db_url)?;

    println!("Initializing sluice database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let summary = pool::store_summary(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &summary {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("sluice db-init complete.");
    Ok(())
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
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Task { command } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = match command {
                TaskCommands::List => task_cmds::run_list(&db_pool).await,
                TaskCommands::Show { task } => task_cmds::run_show(&db_pool, &task).await,
                TaskCommands::Upsert { file } => task_cmds::run_upsert(&db_pool, &file).await,
                TaskCommands::Enable { task } => {
                    task_cmds::run_set_active(&db_pool, &task, true).await
                }
                TaskCommands::Disable { task } => {
                    task_cmds::run_set_active(&db_pool, &task, false).await
                }
            };
            db_pool.close().await;
            result?;
        }
        Commands::Server { command } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = match command {
                ServerCommands::Upsert {
                    name,
                    host,
                    port,
                    user,
                    password,
                    database,
                    encrypt,
                    no_trust_cert,
                } => {
                    server_cmds::run_upsert(
                        &db_pool,
                        &name,
                        &host,
                        port,
                        &user,
                        &password,
                        &database,
                        encrypt,
                        !no_trust_cert,
                    )
                    .await
                }
                ServerCommands::List => server_cmds::run_list(&db_pool).await,
            };
            db_pool.close().await;
            result?;
        }
        Commands::Run { task, watch } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_cmd::run_task(&db_pool, &task, watch).await;
            db_pool.close().await;
            result?;
        }
        Commands::RunPending { kind } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_cmd::run_pending(&db_pool, &kind).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Diagnose { server } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = diagnose_cmd::run_diagnose(&db_pool, &server).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = SluiceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = serve_cmd::run_serve(db_pool.clone(), &bind, port).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
