//! Test doubles for the collaborator ports.
//!
//! Shared by unit tests and the integration suite; compiled into the lib so
//! `tests/` can use them.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::traits::{ActionExecutor, ActionReport, ActionSpec, Notifier};

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Success,
    /// `Ok` report with `success: false` and this error text.
    Failure(String),
    /// Transport-level error (timeout, worker unreachable).
    TransportError(String),
}

/// Executor that replays a scripted sequence of responses and records every
/// action it was asked to perform. Once the script is exhausted it succeeds.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedResponse>>,
    performed: Mutex<Vec<ActionSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn push_successes(&self, count: usize) {
        for _ in 0..count {
            self.push(ScriptedResponse::Success);
        }
    }

    pub fn push_failure(&self, error: &str) {
        self.push(ScriptedResponse::Failure(error.to_string()));
    }

    /// Every action performed so far, in order.
    pub fn performed(&self) -> Vec<ActionSpec> {
        self.performed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn performed_count(&self) -> usize {
        self.performed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn perform(&self, action: &ActionSpec) -> Result<ActionReport> {
        self.performed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            None | Some(ScriptedResponse::Success) => Ok(ActionReport::ok()),
            Some(ScriptedResponse::Failure(error)) => Ok(ActionReport::failed(error)),
            Some(ScriptedResponse::TransportError(error)) => Err(anyhow::anyhow!(error)),
        }
    }
}

/// Notifier that records every message for later inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }
}
