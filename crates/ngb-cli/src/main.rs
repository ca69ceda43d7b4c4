use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ngb_channels::TelegramChannel;
use ngb_config::Config;
use ngb_core::ipc_handler::ChannelSender;
use ngb_core::Orchestrator;
use ngb_db::{Database, GroupRepository, MetricsRepository, TaskRepository};
use ngb_types::TaskStatus;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ngb", about = "NanoGridBot - Agent Runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and channel listeners
    Serve,
    /// Print container-execution stats for the last N days
    Status {
        /// Only include runs for this group folder
        #[arg(long)]
        group: Option<String>,
        /// Lookback window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// List registered groups
    Groups,
    /// Inspect and manage scheduled tasks
    #[command(subcommand)]
    Task(TaskCommands),
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List every scheduled task, optionally filtered by group folder
    List {
        #[arg(long)]
        group: Option<String>,
    },
    /// Pause a task so the scheduler skips it
    Pause { id: i64 },
    /// Resume a paused task
    Resume { id: i64 },
    /// Delete a task
    Cancel { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await?,
        Commands::Status { group, days } => status(group, days).await?,
        Commands::Groups => list_groups().await?,
        Commands::Task(cmd) => task_command(cmd).await?,
    }
    Ok(())
}

/// Open the database directly against `config.db_path`, without starting the
/// orchestrator, channel listeners, or any of the runtime's background loops.
async fn open_db() -> anyhow::Result<(Config, Arc<Database>)> {
    let config = Config::load().context("Failed to load configuration")?;
    std::fs::create_dir_all(config.db_path.parent().unwrap_or(&config.store_dir))
        .context("Failed to create database directory")?;
    let db = Arc::new(
        Database::new(&config.db_path)
            .await
            .context("Failed to connect to database")?,
    );
    db.initialize()
        .await
        .context("Failed to initialize database schema")?;
    Ok((config, db))
}

async fn status(group: Option<String>, days: i64) -> anyhow::Result<()> {
    let (_config, db) = open_db().await?;
    let metrics = MetricsRepository::new(&db);
    let stats = metrics
        .get_container_stats(group.as_deref(), days)
        .await
        .context("Failed to load container stats")?;

    println!("Container stats (last {days} day(s)){}", group.as_deref().map(|g| format!(" for {g}")).unwrap_or_default());
    println!("  total runs:      {}", stats.total_runs);
    println!("  successful:      {}", stats.successful_runs);
    println!("  failed:          {}", stats.failed_runs);
    println!("  timeouts:        {}", stats.timeouts);
    println!("  avg duration:    {:.2}s", stats.avg_duration);
    println!("  total tokens:    {}", stats.total_tokens);

    db.close().await;
    Ok(())
}

async fn list_groups() -> anyhow::Result<()> {
    let (_config, db) = open_db().await?;
    let groups = GroupRepository::new(&db)
        .get_all()
        .await
        .context("Failed to list groups")?;

    if groups.is_empty() {
        println!("No groups registered.");
    }
    for g in groups {
        println!(
            "{:<24} folder={:<16} main={:<5} requires_trigger={}",
            g.jid, g.folder, g.is_main, g.requires_trigger
        );
    }

    db.close().await;
    Ok(())
}

async fn task_command(cmd: TaskCommands) -> anyhow::Result<()> {
    let (_config, db) = open_db().await?;
    let repo = TaskRepository::new(&db);

    match cmd {
        TaskCommands::List { group } => {
            let tasks = match group {
                Some(ref folder) => repo.get_by_group(folder).await,
                None => repo.get_all().await,
            }
            .context("Failed to list tasks")?;

            if tasks.is_empty() {
                println!("No scheduled tasks.");
            }
            for t in tasks {
                println!(
                    "#{:<5} group={:<16} status={:?} schedule={} prompt={:?}",
                    t.id.unwrap_or(-1),
                    t.group_folder,
                    t.status,
                    t.schedule_value,
                    t.prompt
                );
            }
        }
        TaskCommands::Pause { id } => {
            set_task_status(&repo, id, TaskStatus::Paused).await?;
        }
        TaskCommands::Resume { id } => {
            set_task_status(&repo, id, TaskStatus::Active).await?;
        }
        TaskCommands::Cancel { id } => {
            let deleted = repo.delete_task(id).await.context("Failed to delete task")?;
            if deleted {
                println!("Task #{id} cancelled.");
            } else {
                println!("Task #{id} not found.");
            }
        }
    }

    db.close().await;
    Ok(())
}

async fn set_task_status(
    repo: &TaskRepository<'_>,
    id: i64,
    status: TaskStatus,
) -> anyhow::Result<()> {
    let updated = repo
        .update_status(id, status)
        .await
        .context("Failed to update task status")?;
    if updated {
        println!("Task #{id} set to {status:?}.");
    } else {
        println!("Task #{id} not found.");
    }
    Ok(())
}

async fn serve() -> anyhow::Result<()> {
    // 1. Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("NanoGridBot starting...");

    // 2. Load config
    let config = Config::load().context("Failed to load configuration")?;
    info!(
        project = %config.project_name,
        image = %config.container_image,
        "Configuration loaded"
    );

    // 3. Init database
    std::fs::create_dir_all(config.db_path.parent().unwrap_or(&config.store_dir))
        .context("Failed to create database directory")?;
    let db = Arc::new(
        Database::new(&config.db_path)
            .await
            .context("Failed to connect to database")?,
    );
    db.initialize()
        .await
        .context("Failed to initialize database schema")?;
    info!("Database initialized");

    // 4. Create channels
    let mut channels: Vec<Box<dyn ChannelSender>> = Vec::new();
    let mut listener_handles = Vec::new();

    if let Some(ref token) = config.telegram_bot_token {
        let tg = TelegramChannel::new(token, db.clone());
        let handle = tg.start();
        listener_handles.push(handle);
        channels.push(Box::new(tg));
        info!("Telegram channel enabled");
    } else {
        bail!("TELEGRAM_BOT_TOKEN is required for serve mode. Set it in .env or environment.");
    }

    // 5. Create and start orchestrator
    let orchestrator = Arc::new(Orchestrator::new(config, db.clone(), channels));
    orchestrator
        .start()
        .await
        .context("Failed to start orchestrator")?;
    info!("Orchestrator started");

    // 6. Run message loop + wait for shutdown
    let orch = orchestrator.clone();
    let message_loop = tokio::spawn(async move {
        if let Err(e) = orch.run_message_loop().await {
            error!(error = %e, "Message loop error");
        }
    });

    // Wait for Ctrl+C
    info!("NanoGridBot is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down...");
    let _ = orchestrator.stop().await;

    // Abort listener tasks
    for handle in listener_handles {
        handle.abort();
    }
    message_loop.abort();

    db.close().await;
    info!("NanoGridBot stopped.");
    Ok(())
}
