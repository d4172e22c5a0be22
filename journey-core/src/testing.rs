//! Testing utilities for the simulator.
//!
//! This module provides backends for deterministic tests without API calls:
//! - `ScriptedBackend` replays canned results in order
//! - `FailingBackend` fails every attempt
//! - `FnBackend` delegates to a closure
//!
//! plus helpers for building a driver with no delays.

use crate::backend::{BackendError, TextBackend};
use crate::config::SimulationConfig;
use crate::driver::{CancelSignal, NarrativeDriver};
use crate::generator::ResponseGenerator;
use crate::journal::Journal;
use crate::persona::PersonaRegistry;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Text returned once a [`ScriptedBackend`] runs out of responses.
pub const EXHAUSTED_RESPONSE: &str = "The backend has no more scripted responses.";

/// A backend that returns scripted results in order.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String, BackendError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    cancel_after: Option<(usize, CancelSignal)>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<String, BackendError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    /// Successful responses only.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    /// Raise `signal` while serving call number `calls`.
    pub fn cancel_after(mut self, calls: usize, signal: CancelSignal) -> Self {
        self.cancel_after = Some((calls, signal));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        if let Some((after, signal)) = &self.cancel_after {
            if call == *after {
                signal.cancel();
            }
        }

        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(EXHAUSTED_RESPONSE.to_string()))
    }

    fn name(&self) -> &str {
        "scripted backend"
    }
}

/// A backend whose every attempt fails with the same message.
pub struct FailingBackend {
    message: String,
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextBackend for FailingBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Failed(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing backend"
    }
}

/// A backend driven by a closure of `(call number, prompt)`, numbered from 1.
pub struct FnBackend<F> {
    f: F,
    calls: AtomicUsize,
}

impl<F> FnBackend<F>
where
    F: Fn(usize, &str) -> Result<String, BackendError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> TextBackend for FnBackend<F>
where
    F: Fn(usize, &str) -> Result<String, BackendError> + Send + Sync,
{
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.f)(call, prompt)
    }

    fn name(&self) -> &str {
        "fn backend"
    }
}

/// No pauses, a fixed seed and a fixed start date.
pub fn test_config(output_path: impl Into<PathBuf>) -> SimulationConfig {
    let start = Utc
        .with_ymd_and_hms(2025, 1, 15, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    SimulationConfig::new(output_path)
        .without_delays()
        .with_seed(7)
        .with_start_date(start)
}

/// A driver over the standard cast using `backend` and `journal`.
pub fn driver_with_backend(
    config: &SimulationConfig,
    backend: Arc<dyn TextBackend>,
    journal: Journal,
) -> NarrativeDriver {
    NarrativeDriver::new(
        config,
        PersonaRegistry::elyx(),
        ResponseGenerator::new(Some(backend), config),
        journal,
    )
}
