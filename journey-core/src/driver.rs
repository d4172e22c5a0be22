//! The narrative driver.
//!
//! Walks a [`Script`] strictly in order: one step at a time, one generation
//! in flight at most. Each generation step advances the synthetic clock,
//! asks the generator for text, appends it to the journal and then pauses
//! for rate limiting. Cancellation is cooperative and checked between steps.

use crate::config::SimulationConfig;
use crate::generator::ResponseGenerator;
use crate::journal::{format_timestamp, EntryId, Journal, JournalError};
use crate::persona::PersonaRegistry;
use crate::script::{DecisionStep, GenerationStep, Script, Step};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Fatal failures while executing a step.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Journal rejected entry: {0}")]
    Journal(#[from] JournalError),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Decision '{title}' cites unknown label '{label}'")]
    UnknownLabel { title: String, label: String },

    #[error("Step '{step}' moves the synthetic clock out of range")]
    ClockOutOfRange { step: String },
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase finished.
    Completed { entries: usize },
    /// Stopped early on request; the journal holds everything appended so far.
    Cancelled { entries: usize },
}

impl RunOutcome {
    pub fn entries(&self) -> usize {
        match self {
            RunOutcome::Completed { entries } | RunOutcome::Cancelled { entries } => *entries,
        }
    }
}

/// Cloneable stop request shared between the driver and whoever may cancel it.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Narrative time. Only ever moves forward.
#[derive(Debug, Clone)]
pub struct SyntheticClock {
    now: DateTime<Utc>,
    rng: StdRng,
}

impl SyntheticClock {
    /// Largest day advance a single step may request.
    pub const MAX_STEP_DAYS: i64 = 3660;

    /// Largest jitter bound a single step may request.
    pub const MAX_JITTER_HOURS: f64 = 24.0 * 366.0;

    /// Start at `start`; a seed makes the jitter reproducible.
    pub fn new(start: DateTime<Utc>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { now: start, rng }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Advance by `days` plus a uniform jitter of 1 to `max_hours` hours.
    ///
    /// A bound of 1 hour or less is widened to 2 so the jitter range is
    /// never empty. Negative day counts are treated as zero. Returns `None`
    /// and leaves the clock untouched when the step is outside
    /// [`MAX_STEP_DAYS`](Self::MAX_STEP_DAYS) /
    /// [`MAX_JITTER_HOURS`](Self::MAX_JITTER_HOURS) or the date overflows.
    pub fn advance(&mut self, days: i64, max_hours: f64) -> Option<DateTime<Utc>> {
        if days > Self::MAX_STEP_DAYS
            || !max_hours.is_finite()
            || max_hours > Self::MAX_JITTER_HOURS
        {
            return None;
        }

        let upper = if max_hours > 1.0 { max_hours } else { 2.0 };
        let hours: f64 = self.rng.gen_range(1.0..=upper);
        let jitter = TimeDelta::try_seconds((hours * 3600.0).round() as i64)?;
        let step = TimeDelta::try_days(days.max(0))?.checked_add(&jitter)?;

        self.now = self.now.checked_add_signed(step)?;
        Some(self.now)
    }

    /// Advance by exactly `days` days.
    pub fn advance_days(&mut self, days: i64) -> Option<DateTime<Utc>> {
        if days > Self::MAX_STEP_DAYS {
            return None;
        }
        self.now = self
            .now
            .checked_add_signed(TimeDelta::try_days(days.max(0))?)?;
        Some(self.now)
    }
}

/// Executes a script against a generator and a journal.
pub struct NarrativeDriver {
    registry: PersonaRegistry,
    generator: ResponseGenerator,
    journal: Journal,
    clock: SyntheticClock,
    rate_limit_delay: Duration,
    save_interval: usize,
    cancel: CancelSignal,
    completed: usize,
    labels: HashMap<String, EntryId>,
}

impl NarrativeDriver {
    pub fn new(
        config: &SimulationConfig,
        registry: PersonaRegistry,
        generator: ResponseGenerator,
        journal: Journal,
    ) -> Self {
        Self {
            registry,
            generator,
            journal,
            clock: SyntheticClock::new(config.start_date, config.seed),
            rate_limit_delay: config.rate_limit_delay,
            save_interval: config.save_interval.max(1),
            cancel: CancelSignal::new(),
            completed: 0,
            labels: HashMap::new(),
        }
    }

    /// The standard cast, a generator chosen by credentials, and a journal
    /// at the configured output path.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config,
            PersonaRegistry::elyx(),
            ResponseGenerator::from_config(config),
            Journal::new(config.output_path.clone()),
        )
    }

    /// Use an externally owned cancel signal.
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// A handle that stops the run before its next step.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn into_journal(self) -> Journal {
        self.journal
    }

    pub fn generator(&self) -> &ResponseGenerator {
        &self.generator
    }

    /// Generation steps completed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run every phase of `script` in order.
    ///
    /// Step failures stop the run immediately; they are reported here and
    /// then returned. The journal keeps everything appended before the failure.
    ///
    /// Progress and labels start fresh on every call; the clock and the
    /// journal carry over, so a second script continues the same story.
    pub async fn run(&mut self, script: &Script) -> Result<RunOutcome, DriverError> {
        self.completed = 0;
        self.labels.clear();

        let total = script.generation_steps();
        tracing::info!(
            phases = script.phases.len(),
            total_messages = total,
            output = ?self.journal.path(),
            placeholder_mode = self.generator.is_placeholder(),
            rate_limit_secs = self.rate_limit_delay.as_secs_f64(),
            "Starting simulation"
        );

        match self.run_phases(script, total).await {
            Ok(outcome) => {
                self.report(outcome);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    entries = self.journal.len(),
                    output = ?self.journal.path(),
                    "Simulation failed"
                );
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, script: &Script, total: usize) -> Result<RunOutcome, DriverError> {
        for phase in &script.phases {
            tracing::info!("--- {} ---", phase.title);

            for step in &phase.steps {
                if self.cancel.is_cancelled() {
                    return Ok(RunOutcome::Cancelled {
                        entries: self.journal.len(),
                    });
                }

                match step {
                    Step::Generate(step) => self.run_generation(step, total).await?,
                    Step::Decide(step) => self.run_decision(step).await?,
                }
            }
        }

        Ok(RunOutcome::Completed {
            entries: self.journal.len(),
        })
    }

    async fn run_generation(&mut self, step: &GenerationStep, total: usize) -> Result<(), DriverError> {
        let persona = self
            .registry
            .get(&step.persona)
            .cloned()
            .ok_or_else(|| DriverError::UnknownPersona(step.persona.clone()))?;

        let at = self
            .clock
            .advance(step.days, step.max_hours)
            .ok_or_else(|| DriverError::ClockOutOfRange {
                step: format!("{}: {}", persona.name, step.instruction),
            })?;
        let context = self.journal.render_as_prompt_context();
        let text = self
            .generator
            .generate(&persona, &step.instruction, &context)
            .await;

        tracing::info!("[{}] {}: {}", at.format("%Y-%m-%d %H:%M"), persona.name, text);

        let id = self
            .journal
            .append_message(&persona.name, &persona.role, text, at)
            .await?
            .id
            .clone();
        if let Some(label) = &step.label {
            self.labels.insert(label.clone(), id);
        }

        self.completed += 1;
        let percent = self.completed as f64 / total.max(1) as f64 * 100.0;
        tracing::info!(
            "Progress: {}/{} ({:.1}%)",
            self.completed,
            total,
            percent
        );

        if self.completed % self.save_interval == 0 {
            tracing::info!(entries = self.journal.len(), "Auto-saving progress");
            self.journal.persist_or_report().await;
        }

        self.pause().await;
        Ok(())
    }

    async fn run_decision(&mut self, step: &DecisionStep) -> Result<(), DriverError> {
        let references = step
            .references
            .iter()
            .map(|label| {
                self.labels
                    .get(label)
                    .cloned()
                    .ok_or_else(|| DriverError::UnknownLabel {
                        title: step.title.clone(),
                        label: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let at = self
            .clock
            .advance_days(1)
            .ok_or_else(|| DriverError::ClockOutOfRange {
                step: step.title.clone(),
            })?;
        tracing::info!(
            at = %format_timestamp(&at),
            ">>> DECISION by {}: {}",
            step.author,
            step.title
        );

        let role = self.registry.role_of(&step.author).to_string();
        self.journal
            .append_decision(&step.author, &role, &step.title, &step.details, references, at)
            .await?;
        Ok(())
    }

    /// Rate-limit pause; a cancel request cuts it short.
    async fn pause(&self) {
        if self.rate_limit_delay.is_zero() {
            return;
        }
        tracing::info!(
            wait_secs = self.rate_limit_delay.as_secs_f64(),
            "Waiting for rate limiting"
        );
        tokio::select! {
            _ = tokio::time::sleep(self.rate_limit_delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    fn report(&self, outcome: RunOutcome) {
        let summary = self.journal.summary();
        match outcome {
            RunOutcome::Completed { .. } => tracing::info!("Simulation complete"),
            RunOutcome::Cancelled { .. } => tracing::warn!("Simulation interrupted"),
        }
        tracing::info!(
            entries = outcome.entries(),
            messages = summary.messages,
            decisions = summary.decisions,
            failed_messages = summary.failed_messages,
            placeholder_messages = summary.placeholder_messages,
            output = ?self.journal.path(),
            "Journal saved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_clock_jitter_bounds() {
        let mut clock = SyntheticClock::new(start(), Some(1));
        for _ in 0..50 {
            let before = clock.now();
            let after = clock.advance(0, 4.0).unwrap();
            let delta = after - before;
            assert!(delta >= TimeDelta::hours(1));
            assert!(delta <= TimeDelta::hours(4));
        }
    }

    #[test]
    fn test_clock_small_bound_widens_to_two_hours() {
        let mut clock = SyntheticClock::new(start(), Some(2));
        for _ in 0..50 {
            let before = clock.now();
            let delta = clock.advance(0, 0.0).unwrap() - before;
            assert!(delta >= TimeDelta::hours(1) && delta <= TimeDelta::hours(2));
        }
    }

    #[test]
    fn test_clock_days_and_never_backwards() {
        let mut clock = SyntheticClock::new(start(), Some(3));
        let at = clock.advance(25, 1.0).unwrap();
        assert!(at >= start() + TimeDelta::days(25) + TimeDelta::hours(1));

        let before = clock.now();
        assert!(clock.advance(-10, 1.0).unwrap() > before);
        let before = clock.now();
        assert_eq!(clock.advance_days(-3), Some(before));
        assert_eq!(clock.advance_days(1).unwrap() - before, TimeDelta::days(1));
    }

    #[test]
    fn test_clock_rejects_out_of_range_steps() {
        let mut clock = SyntheticClock::new(start(), Some(4));

        assert_eq!(clock.advance(i64::MAX / 2, 1.0), None);
        assert_eq!(clock.advance(0, 1e300), None);
        assert_eq!(clock.advance(0, f64::INFINITY), None);
        assert_eq!(clock.advance(0, f64::NAN), None);
        assert_eq!(clock.advance_days(i64::MAX), None);
        assert_eq!(clock.now(), start());

        // Inside the limits but past the end of representable time.
        let mut late = SyntheticClock::new(DateTime::<Utc>::MAX_UTC, Some(4));
        assert_eq!(late.advance(1, 1.0), None);
        assert_eq!(late.advance_days(1), None);
        assert_eq!(late.now(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_seeded_clocks_agree() {
        let mut a = SyntheticClock::new(start(), Some(42));
        let mut b = SyntheticClock::new(start(), Some(42));
        for _ in 0..5 {
            assert_eq!(a.advance(1, 3.0), b.advance(1, 3.0));
        }
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let signal = CancelSignal::new();
        let other = signal.clone();
        assert!(!signal.is_cancelled());

        other.cancel();
        assert!(signal.is_cancelled());
        // Already cancelled: resolves immediately.
        signal.cancelled().await;
    }

    #[test]
    fn test_outcome_entries() {
        assert_eq!(RunOutcome::Completed { entries: 3 }.entries(), 3);
        assert_eq!(RunOutcome::Cancelled { entries: 1 }.entries(), 1);
    }
}
