//! Mailroom CLI tool.
//!
//! Operational helper around the engine:
//! - `send` - transmit (or dry-run) a single message
//! - `simulate` - drive a synthetic A/B experiment and print the analysis

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mailroom::types::{FrequencyPolicy, NewExperiment, Variant, VariantContent};
use mailroom::{DispatchOutcome, Engine, EngineConfig, Recipient, RenderedEmail};

#[derive(Parser)]
#[command(name = "mailroom")]
#[command(version, about = "Email delivery and experimentation engine", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message (dry-run unless MAILROOM_API_KEY is set)
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Subject line
        #[arg(long)]
        subject: String,

        /// Plain-text body (also used as a minimal HTML body)
        #[arg(long)]
        body: String,

        /// Email category tag
        #[arg(long, default_value = "GENERAL")]
        category: String,

        /// Skip the frequency gate
        #[arg(long)]
        force: bool,
    },
    /// Run a synthetic experiment and print the resulting analysis
    Simulate {
        /// Sends per variant
        #[arg(long, default_value_t = 500)]
        sends: u64,

        /// Open rate for variant A (0.0-1.0)
        #[arg(long, default_value_t = 0.40)]
        open_rate_a: f64,

        /// Open rate for variant B (0.0-1.0)
        #[arg(long, default_value_t = 0.52)]
        open_rate_b: f64,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mailroom={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_send(
    engine: &Engine,
    to: String,
    subject: String,
    body: String,
    category: String,
    force: bool,
) {
    let policy = if force {
        FrequencyPolicy {
            max_per_day: u32::MAX,
            max_per_week: u32::MAX,
            quiet_hours: None,
        }
    } else {
        FrequencyPolicy::default()
    };

    let recipient = Recipient::new(to);
    let outcome = engine
        .dispatch(&recipient, &category, &policy, |resolved| {
            let subject = if resolved.content.subject_line.is_empty() {
                subject.clone()
            } else {
                resolved.content.subject_line.clone()
            };
            RenderedEmail {
                subject,
                html: format!("<p>{body}</p>"),
                text: body.clone(),
            }
        })
        .await;

    match outcome {
        Ok(DispatchOutcome::Sent(result)) if result.success => {
            println!(
                "delivered (id {}{})",
                result.delivery_id.unwrap_or_default(),
                result
                    .provider_message_id
                    .map(|id| format!(", provider {id}"))
                    .unwrap_or_default()
            );
        }
        Ok(DispatchOutcome::Sent(result)) => {
            eprintln!(
                "failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            );
            std::process::exit(1);
        }
        Ok(DispatchOutcome::Skipped(reason)) => {
            println!("skipped: {reason:?}");
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_simulate(engine: &Engine, sends: u64, open_rate_a: f64, open_rate_b: f64) {
    let coordinator = engine.experiments();
    let experiment = coordinator
        .create_experiment(NewExperiment::new(
            "simulated subject test",
            "SIMULATION",
            VariantContent::subject("Variant A subject"),
            VariantContent::subject("Variant B subject"),
        ))
        .await
        .expect("in-memory store cannot fail");

    let opens_a = (sends as f64 * open_rate_a.clamp(0.0, 1.0)).round() as u64;
    let opens_b = (sends as f64 * open_rate_b.clamp(0.0, 1.0)).round() as u64;

    for variant in [Variant::A, Variant::B] {
        for _ in 0..sends {
            coordinator.record_sent(experiment.id, variant).await.unwrap();
        }
    }
    for _ in 0..opens_a {
        coordinator.record_open(experiment.id, Variant::A).await.unwrap();
    }
    for _ in 0..opens_b {
        coordinator.record_open(experiment.id, Variant::B).await.unwrap();
    }

    let analysis = coordinator.analyze(experiment.id).await.unwrap();
    println!(
        "variant A: {} sent, {} opens ({:.1}%)",
        analysis.stats_a.sent,
        analysis.stats_a.opens,
        analysis.stats_a.open_rate() * 100.0
    );
    println!(
        "variant B: {} sent, {} opens ({:.1}%)",
        analysis.stats_b.sent,
        analysis.stats_b.opens,
        analysis.stats_b.open_rate() * 100.0
    );
    println!(
        "winner {} at confidence {} (z = {:.2})",
        analysis.winner, analysis.confidence, analysis.z
    );

    let ended = engine.run_auto_end_sweep().await.unwrap();
    println!(
        "auto-end sweep ended {ended} experiment(s){}",
        if ended == 0 { " (not conclusive enough)" } else { "" }
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = EngineConfig::from_env();
    if config.is_dry_run() {
        info!("no transmission credential configured, running in dry-run mode");
    }
    let engine = Engine::in_memory(config);

    match cli.command {
        Commands::Send {
            to,
            subject,
            body,
            category,
            force,
        } => run_send(&engine, to, subject, body, category, force).await,
        Commands::Simulate {
            sends,
            open_rate_a,
            open_rate_b,
        } => run_simulate(&engine, sends, open_rate_a, open_rate_b).await,
    }
}
