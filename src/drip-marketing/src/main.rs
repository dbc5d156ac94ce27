//! Drip Marketing — command-line entry point for scheduled drip runs and
//! dispatch passes over a JSON state file.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use drip_channels::{ConsoleTransport, CssInliner, MailTransport, MemoryTransport, TemplateEngine};
use drip_core::config::{AppConfig, LoggingConfig, TransportKind};
use drip_engine::{Dispatcher, Drip, DripRunner, Snapshot};
use drip_segmentation::{EvaluationTime, Rule};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "drip-marketing")]
#[command(about = "Drip email campaigns: select audiences, enqueue, and dispatch")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables with DRIP_MARKETING__ still apply)
    #[arg(long, env = "DRIP_MARKETING_CONFIG")]
    config: Option<PathBuf>,

    /// State file holding users, drips, and sent records
    #[arg(long, env = "DRIP_MARKETING_DATA", default_value = "drip-state.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue emails for active drips (or one named drip)
    RunDrips {
        #[arg(long)]
        drip: Option<String>,
        /// Evaluation time, RFC 3339; defaults to the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Send every queued email
    SendDrips,
    /// Render a drip for one user without enqueueing
    Preview {
        #[arg(long)]
        drip: String,
        #[arg(long)]
        user: Uuid,
    },
    /// Create a drip
    AddDrip {
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        html: Option<String>,
        #[arg(long)]
        from_email: Option<String>,
        #[arg(long)]
        sender_name: Option<String>,
        #[arg(long, default_value_t = false)]
        active: bool,
    },
    /// Validate and attach an audience rule to a drip
    AddRule {
        #[arg(long)]
        drip: String,
        /// filter or exclude
        #[arg(long, default_value = "filter")]
        method: String,
        #[arg(long)]
        field: String,
        #[arg(long, default_value = "exact")]
        lookup: String,
        #[arg(long)]
        value: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.as_str().into());
    // Reports go to stdout; logs stay on stderr so the two never interleave.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_tracing(&config.logging);

    info!(
        data = %cli.data.display(),
        default_from = %config.drip.default_from_email,
        html_post_process = config.drip.html_post_process,
        "Drip marketing starting"
    );

    let (users, store) = Snapshot::load(&cli.data)
        .and_then(Snapshot::into_parts)
        .with_context(|| format!("failed to load state from {}", cli.data.display()))?;

    let engine = TemplateEngine::new();
    let inliner = CssInliner::new();
    let runner = DripRunner::new(&store, &users, &engine, &config.drip).with_html_transform(&inliner);

    let mut failed = false;
    let mut persist = true;
    match cli.command {
        Command::RunDrips { drip, now } => {
            let now = now.unwrap_or_else(Utc::now);
            let reports = match drip {
                Some(name) => {
                    let drip = store
                        .get_drip_by_name(&name)
                        .with_context(|| format!("no drip named '{name}'"))?;
                    vec![runner.run(&drip.id, now)?]
                }
                None => runner.run_active(now),
            };
            for report in &reports {
                failed |= !report.failures.is_empty();
                println!("{}", serde_json::to_string(report)?);
            }
        }
        Command::SendDrips => {
            let transport: Box<dyn MailTransport> = match config.transport.kind {
                TransportKind::Console => Box::new(ConsoleTransport::new()),
                TransportKind::Memory => Box::new(MemoryTransport::new()),
            };
            let report = Dispatcher::new(&store, transport.as_ref()).dispatch_queued();
            failed = !report.failures.is_empty();
            if !config.transport.kind.delivers() {
                warn!(
                    transport = ?config.transport.kind,
                    "Dry run: messages were not delivered, state file left unchanged"
                );
                persist = false;
            }
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Preview { drip, user } => {
            let drip = store
                .get_drip_by_name(&drip)
                .with_context(|| format!("no drip named '{drip}'"))?;
            let rendered = runner.preview(&drip.id, &user)?;
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Command::AddDrip {
            name,
            subject,
            text,
            html,
            from_email,
            sender_name,
            active,
        } => {
            let drip = Drip {
                subject_template: subject,
                text_template: text,
                html_template: html,
                from_email,
                sender_name,
                ..Drip::new(name)
            }
            .active(active);
            let drip = store.create_drip(drip)?;
            println!("{}", drip.id);
        }
        Command::AddRule {
            drip,
            method,
            field,
            lookup,
            value,
        } => {
            let existing = store
                .get_drip_by_name(&drip)
                .with_context(|| format!("no drip named '{drip}'"))?;
            let rule = Rule::parse(existing.id, &method, &field, &lookup, &value)?;
            let rule_id = rule.id;
            let at = EvaluationTime::utc(Utc::now()).with_offset(config.drip.time_zone());
            store
                .update_drip(&existing.id, |d| d.add_rule(rule, &users, &at))
                .with_context(|| format!("rule rejected for drip '{drip}'"))?;
            println!("{rule_id}");
        }
    }

    if persist {
        Snapshot::capture(&users, &store)
            .save(&cli.data)
            .with_context(|| format!("failed to save state to {}", cli.data.display()))?;
    }

    if failed {
        warn!("Completed with failures; queued records will be retried on the next pass");
        bail!("one or more drips could not be processed");
    }
    Ok(())
}
