//! TinyClaw CLI — one-shot agent runs, the REPL, the gateway, and admin
//! commands for cron jobs and skills.

mod cron_cmd;
mod demo;
mod gateway;
mod helpers;
mod onboard;
mod repl;
mod skills_cmd;
mod status;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tinyclaw_agent::AgentLoop;
use tinyclaw_core::bus::MessageBus;
use tinyclaw_core::config::load_config;
use tinyclaw_core::session::SessionStore;
use tinyclaw_cron::Scheduler;

#[derive(Parser)]
#[command(name = "tinyclaw", version, about = "A personal AI agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config and seed the workspace
    Onboard,
    /// Talk to the agent directly (one-shot with -m, REPL otherwise)
    Agent {
        /// Send one message and print the reply
        #[arg(short, long)]
        message: Option<String>,
        /// Session key to use (default cli:repl / cli:direct)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Run the gateway: channels, scheduler, webhooks
    Gateway,
    /// Show configuration, sessions, and job status
    Status,
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// List or inspect workspace skills
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },
    /// Run a self-contained demo scenario (security, session, bus)
    Demo { scenario: String },
    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum CronAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        cron: Option<String>,
        #[arg(long)]
        every_ms: Option<i64>,
        #[arg(long)]
        at_ms: Option<i64>,
    },
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
}

#[derive(Subcommand)]
enum SkillsAction {
    List,
    Show { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tinyclaw=info,warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Onboard => onboard::run(),
        Command::Agent { message, session } => run_agent(message, session).await,
        Command::Gateway => gateway::run().await,
        Command::Status => status::run(),
        Command::Cron { action } => match action {
            CronAction::List => cron_cmd::list(),
            CronAction::Add {
                name,
                message,
                cron,
                every_ms,
                at_ms,
            } => cron_cmd::add(name, message, cron, every_ms, at_ms),
            CronAction::Remove { id } => cron_cmd::remove(&id),
            CronAction::Enable { id } => cron_cmd::set_enabled(&id, true),
            CronAction::Disable { id } => cron_cmd::set_enabled(&id, false),
        },
        Command::Skills { action } => match action {
            SkillsAction::List => skills_cmd::list(),
            SkillsAction::Show { name } => skills_cmd::show(&name),
        },
        Command::Demo { scenario } => demo::run(&scenario).await,
        Command::Version => {
            println!("tinyclaw {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Build the minimal direct-mode stack: no channels, but with the scheduler
/// so the `cron` tool works.
async fn run_agent(message: Option<String>, session: Option<String>) -> Result<()> {
    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    let guard = helpers::build_guard(&config, &workspace);
    let sessions = Arc::new(SessionStore::new(workspace.join("sessions"))?);
    let client = Arc::new(helpers::build_llm_client(&config)?);
    let bus = Arc::new(MessageBus::default());
    let scheduler = Arc::new(Scheduler::new(
        bus.clone(),
        workspace.join("cron").join("jobs.json"),
    ));
    scheduler.load().ok();

    let agent = Arc::new(AgentLoop::new(
        bus,
        client,
        guard,
        sessions.clone(),
        Some(scheduler),
        helpers::agent_settings(&config, &workspace),
    ));

    match message {
        Some(text) => {
            let key = session.unwrap_or_else(|| "cli:direct".to_string());
            let reply = agent.process_direct(&text, &key).await?;
            println!("{reply}");
            Ok(())
        }
        None => repl::run(agent, sessions).await,
    }
}
