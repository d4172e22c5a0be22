//! Scripted multi-persona conversation simulator.
//!
//! This crate provides:
//! - An append-only [`Journal`] persisted as a JSON array after every append
//! - A [`ResponseGenerator`] with bounded retries and an offline placeholder mode
//! - A data-driven [`Script`] of phases and steps
//! - A [`NarrativeDriver`] that plays the script on a synthetic clock
//!
//! # Quick Start
//!
//! ```ignore
//! use journey_core::{NarrativeDriver, Script, SimulationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulationConfig::from_env()?;
//!     let mut driver = NarrativeDriver::from_config(&config);
//!
//!     let outcome = driver.run(&Script::elyx_journey()).await?;
//!     println!("{} entries written", outcome.entries());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod driver;
pub mod generator;
pub mod journal;
pub mod persona;
pub mod script;
pub mod testing;

// Primary public API
pub use backend::{BackendError, GeminiBackend, TextBackend};
pub use config::{ConfigError, SimulationConfig};
pub use driver::{CancelSignal, DriverError, NarrativeDriver, RunOutcome, SyntheticClock};
pub use generator::ResponseGenerator;
pub use journal::{EntryBody, EntryId, Journal, JournalEntry, JournalError, PersistError};
pub use persona::{Persona, PersonaRegistry};
pub use script::{DecisionStep, GenerationStep, Phase, Script, ScriptError, Step};
