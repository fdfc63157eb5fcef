mod awake;
mod classify;
mod sender;

use std::sync::Arc;
use std::time::Instant;

use g3studio_contracts::journal::{RunEvent, RunJournal};
use g3studio_contracts::request::RequestEnvelope;
use g3studio_contracts::response::{error_message, ResponseResult};
use g3studio_contracts::{ClientError, ClientResult};
use serde_json::{Map, Value};

pub use awake::{KeepAwake, NoopKeepAwake, ProcessKeepAwake, VisibilitySignal};
pub use classify::{FailureClassifier, NetworkFailureClassifier, DEFAULT_NETWORK_PATTERNS};
pub use sender::{HttpSender, RawResponse, ReqwestSender, SendFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Sending,
    Succeeded,
    Failed,
    RetryPending,
}

/// Sends one envelope, times it, and applies the single background retry.
///
/// Non-success statuses are terminal. A transport failure is retried once, and
/// only when the host was hidden during the attempt and the classifier calls the
/// failure network-related.
pub struct TransportPolicy {
    sender: Box<dyn HttpSender>,
    classifier: Box<dyn FailureClassifier>,
    visibility: VisibilitySignal,
    state: TransportState,
    transitions: Vec<TransportState>,
}

impl TransportPolicy {
    pub fn new(sender: Box<dyn HttpSender>, keep_awake: Arc<dyn KeepAwake>) -> Self {
        Self {
            sender,
            classifier: Box::new(NetworkFailureClassifier::default()),
            visibility: VisibilitySignal::new(keep_awake),
            state: TransportState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Handle for the host surface to report visibility changes.
    pub fn visibility(&self) -> VisibilitySignal {
        self.visibility.clone()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// States entered by the most recent `execute`, ending in `Idle`.
    pub fn last_transitions(&self) -> &[TransportState] {
        &self.transitions
    }

    pub fn execute(&mut self, envelope: &RequestEnvelope) -> ClientResult<ResponseResult> {
        self.execute_with_journal(envelope, None)
    }

    pub fn execute_with_journal(
        &mut self,
        envelope: &RequestEnvelope,
        journal: Option<&RunJournal>,
    ) -> ClientResult<ResponseResult> {
        self.transitions.clear();
        self.visibility.begin();
        self.visibility.acquire_keep_awake();
        let result = self.run_attempts(envelope, journal);
        self.visibility.finish();
        self.enter(TransportState::Idle);
        result
    }

    fn run_attempts(
        &mut self,
        envelope: &RequestEnvelope,
        journal: Option<&RunJournal>,
    ) -> ClientResult<ResponseResult> {
        let mut attempt: u32 = 1;
        let mut retried = false;
        loop {
            self.enter(TransportState::Sending);
            tracing::debug!(attempt, "issuing generateContent request");
            let started = Instant::now();
            let failure = match self.sender.send(envelope) {
                Ok(response) => {
                    let payload = parse_payload(&response.body);
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return self.finish_response(response, payload, latency_ms);
                }
                Err(failure) => failure,
            };

            let hidden = self.visibility.hidden_during_request();
            let network_related = self.classifier.is_network_related(&failure);
            tracing::warn!(
                attempt,
                category = failure.category.as_str(),
                hidden,
                network_related,
                "request attempt failed: {}",
                failure.message
            );
            if let Some(journal) = journal {
                journal.record(&RunEvent::AttemptFailed {
                    attempt,
                    kind: failure.category.as_str().to_string(),
                    message: failure.message.clone(),
                    hidden,
                });
            }

            if retried || !hidden || !network_related {
                self.enter(TransportState::Failed);
                return Err(failure.into_error());
            }
            retried = true;
            self.enter(TransportState::RetryPending);
            tracing::info!(attempt, "host went to background mid-request; retrying once");
            if let Some(journal) = journal {
                journal.record(&RunEvent::RetryScheduled { attempt });
            }
            self.visibility.acquire_keep_awake();
            attempt += 1;
        }
    }

    fn finish_response(
        &mut self,
        response: RawResponse,
        payload: Value,
        latency_ms: f64,
    ) -> ClientResult<ResponseResult> {
        if !response.is_success() {
            self.enter(TransportState::Failed);
            let message = error_message(&payload).unwrap_or_else(|| response.status_line());
            return Err(ClientError::Http {
                status: response.status,
                message,
            });
        }
        self.enter(TransportState::Succeeded);
        Ok(ResponseResult::from_payload(payload, latency_ms))
    }

    fn enter(&mut self, state: TransportState) {
        self.state = state;
        self.transitions.push(state);
    }
}

/// An unreadable body is treated as an empty object.
fn parse_payload(body: &[u8]) -> Value {
    serde_json::from_slice::<Value>(body).unwrap_or_else(|_| Value::Object(Map::new()))
}
