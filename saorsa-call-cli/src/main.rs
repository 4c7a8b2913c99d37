//! Saorsa call state machine CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::ConsoleInteractor;
use rand::Rng;
use saorsa_call_core::prelude::*;
use scenario::{DemoStep, Scenario};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod console;
mod replay;
mod scenario;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Four-word identity (e.g., "alice-bob-charlie-david")
    #[arg(short, long, env = "SAORSA_IDENTITY")]
    identity: Option<String>,

    /// Engine configuration (JSON); missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines event script through the state machine
    Replay {
        /// Script to replay
        script: PathBuf,
    },

    /// Drive a built-in scenario through the async engine
    Demo {
        /// Scenario to run
        #[arg(value_enum, default_value = "call-link-reconnect")]
        scenario: Scenario,

        /// Remote party
        #[arg(long, default_value = "bob")]
        peer: String,
    },

    /// Show the effective configuration and available commands
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saorsa=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let identity = cli.identity.unwrap_or_else(generate_random_identity);
    println!("🔗 Using identity: {}", identity);

    let config = cli.config.as_deref().map(load_config).transpose()?;

    match cli.command {
        Commands::Replay { script } => {
            handle_replay(&script, config.unwrap_or_default())?;
        }
        Commands::Demo { scenario, peer } => {
            let config = config.unwrap_or_else(scenario::demo_config);
            handle_demo(&identity, scenario, &peer, config).await?;
        }
        Commands::Status => {
            handle_status(&config.unwrap_or_default())?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<CallEngineConfig> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

fn handle_replay(script: &Path, config: CallEngineConfig) -> Result<()> {
    println!("📜 Replaying {}", script.display());
    let file = File::open(script).with_context(|| format!("opening {}", script.display()))?;

    let mut stdout = std::io::stdout().lock();
    let summary = replay::replay(BufReader::new(file), &config, &mut stdout)?;

    println!(
        "\n📊 {} applied, {} ignored, {} rejected, {} forced terminations",
        summary.applied, summary.ignored, summary.rejected, summary.violations
    );
    Ok(())
}

async fn handle_demo(
    identity: &str,
    scenario: Scenario,
    peer: &str,
    config: CallEngineConfig,
) -> Result<()> {
    println!("🎬 Running {:?} with {}", scenario, peer);

    let roster = vec![
        ParticipantUpdate::joined(identity),
        ParticipantUpdate::joined(peer),
    ];
    let interactor = Arc::new(ConsoleInteractor::new(identity, roster));
    // Worst case for the last call to give up and be released
    let give_up_after = (1..=config.reconnect.max_attempts)
        .map(|attempt| config.reconnect.delay_for(attempt))
        .sum::<Duration>()
        + Duration::from_secs(2);

    let engine = CallEngine::builder(interactor).with_config(config).build()?;

    let mut updates = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            print_update(&update);
            if matches!(update, CallUpdate::Released { .. }) {
                break;
            }
        }
    });

    let call_id = CallId::new();
    for step in scenario.steps(call_id, peer) {
        match step {
            DemoStep::Deliver(event) => {
                if let Err(e) = engine.dispatch(event).await {
                    println!("❌ {}", e);
                }
            }
            DemoStep::Wait(duration) => tokio::time::sleep(duration).await,
        }
    }

    if tokio::time::timeout(give_up_after, printer).await.is_err() {
        println!("⏳ Call {} still active", console::short(call_id));
    }

    engine.shutdown().await;
    println!("👋 Demo finished");
    Ok(())
}

fn print_update(update: &CallUpdate) {
    let call = console::short(update.call_id());
    match update {
        CallUpdate::Transitioned {
            event, from, to, state, ..
        } => {
            let from = from.map_or_else(|| "-".to_string(), |p| p.to_string());
            println!(
                "✅ {} {}: {} -> {} ({:?}, {} participant(s))",
                call,
                event,
                from,
                to,
                state.connection_state(),
                state.participants().len()
            );
        }
        CallUpdate::Rejected { event, reason, .. } => {
            println!("❌ {} {}: {}", call, event, reason);
        }
        CallUpdate::InvariantViolated { reason, .. } => {
            println!("⚠️  {} terminated: {}", call, reason);
        }
        CallUpdate::Released { .. } => {
            println!("📴 {} released", call);
        }
    }
}

fn handle_status(config: &CallEngineConfig) -> Result<()> {
    println!("📊 Saorsa Call Status");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!("   Max concurrent calls: {}", config.max_concurrent_calls);
    let schedule: Vec<String> = (1..=config.reconnect.max_attempts)
        .map(|attempt| format!("{:?}", config.reconnect.delay_for(attempt)))
        .collect();
    println!("   Reconnect schedule: {}", schedule.join(", "));
    println!();
    println!("Available commands:");
    println!("   saorsa-call replay <script.jsonl>  - Replay an event script");
    println!("   saorsa-call demo [scenario]        - Run a built-in scenario");
    println!("   saorsa-call status                 - Show this status");
    println!();
    println!("Configuration (JSON):");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn generate_random_identity() -> String {
    const WORDS: &[&str] = &[
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
        "juliet", "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra",
        "tango", "uniform", "victor", "whiskey", "xray", "yankee", "zulu", "atlas", "beacon",
        "comet", "dragon", "eagle", "falcon", "galaxy", "harbor", "icarus", "jupiter", "knight",
        "lunar", "meteor", "nebula", "orbit", "phoenix", "quasar", "rocket", "stellar", "titan",
        "universe", "vortex",
    ];

    let mut rng = rand::thread_rng();
    let words: Vec<&str> = (0..4)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect();
    words.join("-")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_generate_random_identity() {
        let identity = generate_random_identity();
        assert_eq!(identity.split('-').count(), 4);
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"reconnect": {{"max_attempts": 2}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(
            config.reconnect.initial_delay_ms,
            ReconnectPolicy::default().initial_delay_ms
        );
        assert_eq!(
            config.max_concurrent_calls,
            CallEngineConfig::default().max_concurrent_calls
        );
    }

    #[test]
    fn test_load_config_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_attempts = 2").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("parsing"));
    }

    #[test]
    fn test_bundled_scripts_replay_cleanly() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        for name in ["call_link_reconnect.jsonl", "group_and_one_to_one.jsonl"] {
            let file = File::open(dir.join(name)).unwrap();
            let mut out = Vec::new();
            let summary =
                replay::replay(BufReader::new(file), &CallEngineConfig::default(), &mut out)
                    .unwrap();
            let report = String::from_utf8(out).unwrap();
            assert_eq!(summary.rejected, 0, "{name}:\n{report}");
            assert_eq!(summary.violations, 0, "{name}:\n{report}");
            assert!(summary.applied > 0, "{name}");
        }
    }

    #[test]
    fn test_cli_parses_demo() {
        let cli = Cli::try_parse_from(["saorsa-call", "demo", "group", "--peer", "carol"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Demo {
                scenario: Scenario::Group,
                ..
            }
        ));
    }
}
