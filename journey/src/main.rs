//! Member journey simulator.
//!
//! Plays the scripted eight-month journey against the Gemini API and writes
//! every message and decision to `journey_data.json`.
//!
//! ```bash
//! GEMINI_API_KEY=... cargo run -p journey
//! ```
//!
//! Without a usable key the run still completes with placeholder text.
//! Ctrl-C stops the run before the next step; the file keeps what was written.

use anyhow::Context;
use journey_core::{NarrativeDriver, PersonaRegistry, RunOutcome, Script, SimulationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimulationConfig::from_env().context("Invalid configuration")?;
    config.validate()?;

    if !config.has_credentials() {
        tracing::warn!("GEMINI_API_KEY is not set; running in placeholder mode");
    }

    let registry = PersonaRegistry::elyx();
    let script = Script::elyx_journey();
    script
        .validate(&registry)
        .context("Built-in script does not match the cast")?;

    let mut driver = NarrativeDriver::from_config(&config);

    let signal = driver.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current step");
            signal.cancel();
        }
    });

    match driver.run(&script).await? {
        RunOutcome::Completed { entries } => {
            tracing::info!(entries, output = %config.output_path.display(), "Done");
        }
        RunOutcome::Cancelled { entries } => {
            tracing::info!(entries, output = %config.output_path.display(), "Stopped early");
        }
    }

    Ok(())
}
