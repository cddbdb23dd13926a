//! Per-run bridge session
//!
//! Everything a run produces goes through one bounded queue drained by a
//! single delivery task, so subscribers see it in production order.
//! Sequence numbers are assigned under the session lock in the same step
//! that enqueues the message; a message that cannot be enqueued never
//! consumes a sequence number.

use parking_lot::Mutex;
use realtime::{timestamp, OutboundMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::io::{Emission, FallbackReason, InputReply, IoChannel, OutputEvent};
use super::line_buffer::LineBuffer;
use super::BridgeInner;
use crate::sync::{ResolutionCell, WaitOutcome};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Full,
    Closed,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full => f.write_str("delivery queue full"),
            EnqueueError::Closed => f.write_str("delivery queue closed"),
        }
    }
}

struct SessionState {
    buffer: LineBuffer,
    next_sequence: u64,
    tx: Option<mpsc::Sender<OutboundMessage>>,
    /// Published prompts whose answer cell the run is blocked on
    open_requests: HashMap<String, Arc<ResolutionCell<String>>>,
}

/// Shared state of one run's session
pub(crate) struct SessionCore {
    run_id: String,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SessionCore {
    pub(crate) fn new(run_id: &str, tx: mpsc::Sender<OutboundMessage>, max_line_bytes: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            state: Mutex::new(SessionState {
                buffer: LineBuffer::with_limit(max_line_bytes),
                next_sequence: 0,
                tx: Some(tx),
                open_requests: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue_locked<F>(&self, state: &mut SessionState, build: F) -> Result<u64, EnqueueError>
    where
        F: FnOnce(u64) -> OutboundMessage,
    {
        let tx = state.tx.as_ref().ok_or(EnqueueError::Closed)?;
        let sequence = state.next_sequence;
        match tx.try_send(build(sequence)) {
            Ok(()) => {
                state.next_sequence += 1;
                Ok(sequence)
            }
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    fn enqueue_output(&self, state: &mut SessionState, emission: Emission) {
        let run_id = self.run_id.as_str();
        let result = self.enqueue_locked(state, |sequence| {
            OutputEvent::new(run_id, sequence, emission).to_message()
        });
        if let Err(e) = result {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Dropped output for run {}: {}", self.run_id, e);
        }
    }

    fn enqueue_withdrawn(&self, state: &mut SessionState, request_id: &str, reason: FallbackReason) {
        let run_id = self.run_id.clone();
        let result = self.enqueue_locked(state, |sequence| OutboundMessage::InputWithdrawn {
            run_id,
            request_id: request_id.to_string(),
            reason: reason.to_string(),
            sequence,
            timestamp: timestamp(),
        });
        if let Err(e) = result {
            warn!(
                "Could not withdraw input request {} on run {}: {}",
                request_id, self.run_id, e
            );
        }
    }

    pub(crate) fn write(&self, inner: &BridgeInner, text: &str) {
        if self.is_closed() {
            debug!("Ignoring write on closed session {}", self.run_id);
            return;
        }
        let mut state = self.state.lock();
        for line in state.buffer.push(text) {
            let emission = inner.classifier.classify(&line);
            self.enqueue_output(&mut state, emission);
        }
    }

    pub(crate) fn emit(&self, inner: &BridgeInner, emission: Emission) {
        if self.is_closed() {
            debug!("Ignoring emission on closed session {}", self.run_id);
            return;
        }
        let mut state = self.state.lock();
        // Keep raw text that preceded this emission ahead of it
        if let Some(line) = state.buffer.flush() {
            let pending = inner.classifier.classify(&line);
            self.enqueue_output(&mut state, pending);
        }
        self.enqueue_output(&mut state, emission);
    }

    pub(crate) fn flush(&self, inner: &BridgeInner) {
        let mut state = self.state.lock();
        if let Some(line) = state.buffer.flush() {
            let emission = inner.classifier.classify(&line);
            self.enqueue_output(&mut state, emission);
        }
    }

    /// Publish `prompt` and block until answered, timed out or released
    ///
    /// Must run on the workflow's own thread, never on an async worker.
    pub(crate) fn request_input(&self, inner: &BridgeInner, prompt: &str) -> InputReply {
        let fallback = |reason| InputReply::fallback(inner.config.default_input.clone(), reason);
        if self.is_closed() {
            return fallback(FallbackReason::SessionClosed);
        }
        self.flush(inner);

        let request_id = Uuid::new_v4().to_string();
        let timeout = inner.config.input_timeout();

        // The answer slot exists before anyone can see the prompt
        let cell = match inner.inputs.register(request_id.clone(), timeout) {
            Ok(cell) => cell,
            Err(e) => {
                warn!("Input request on run {} not registered: {}", self.run_id, e);
                return fallback(FallbackReason::Unreachable);
            }
        };

        let enqueued = inner.retry.retry_blocking(
            || {
                let mut state = self.state.lock();
                if self.is_closed() {
                    return Err(EnqueueError::Closed);
                }
                let run_id = self.run_id.clone();
                let sequence = self.enqueue_locked(&mut state, |sequence| {
                    OutboundMessage::InputRequired {
                        run_id,
                        request_id: request_id.clone(),
                        prompt: prompt.to_string(),
                        sequence,
                        timestamp: timestamp(),
                    }
                })?;
                state
                    .open_requests
                    .insert(request_id.clone(), Arc::clone(&cell));
                Ok(sequence)
            },
            |e| *e == EnqueueError::Full,
        );

        if let Err(e) = enqueued {
            inner.inputs.release(&request_id);
            if self.is_closed() {
                return fallback(FallbackReason::SessionClosed);
            }
            warn!(
                "Input request on run {} could not be published ({}), using fallback",
                self.run_id, e
            );
            return fallback(FallbackReason::Unreachable);
        }
        info!("Run {} waiting for input {}", self.run_id, request_id);

        match cell.wait_blocking(timeout) {
            WaitOutcome::Resolved(answer) => {
                self.state.lock().open_requests.remove(&request_id);
                debug!("Input {} answered", request_id);
                InputReply::answered(answer)
            }
            WaitOutcome::TimedOut => {
                let mut state = self.state.lock();
                inner.inputs.forget(&request_id, &cell);
                // Gone already if the session ended and withdrew it
                if state.open_requests.remove(&request_id).is_some() {
                    self.enqueue_withdrawn(&mut state, &request_id, FallbackReason::TimedOut);
                }
                warn!(
                    "Input {} on run {} timed out after {:?}",
                    request_id, self.run_id, timeout
                );
                fallback(FallbackReason::TimedOut)
            }
            WaitOutcome::Closed => fallback(FallbackReason::SessionClosed),
        }
    }

    /// Tear down the session; only the first call has any effect
    pub(crate) fn end(&self, inner: &BridgeInner, outcome: RunOutcome) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let withdrawn = {
            let mut state = self.state.lock();
            if let Some(line) = state.buffer.flush() {
                let emission = inner.classifier.classify(&line);
                self.enqueue_output(&mut state, emission);
            }

            // An answer that already reached its cell belongs to the run
            let mut withdrawn = 0;
            let open: Vec<_> = state.open_requests.drain().collect();
            for (request_id, cell) in &open {
                inner.inputs.forget(request_id, cell);
                if cell.withdraw() {
                    self.enqueue_withdrawn(&mut state, request_id, FallbackReason::SessionClosed);
                    withdrawn += 1;
                }
            }

            let run_id = self.run_id.clone();
            let finished = self.enqueue_locked(&mut state, |sequence| {
                OutboundMessage::RunFinished {
                    run_id,
                    outcome: outcome.to_string(),
                    sequence,
                    timestamp: timestamp(),
                }
            });
            if let Err(e) = finished {
                warn!("Could not announce end of run {}: {}", self.run_id, e);
            }

            // Dropping the sender lets the delivery task drain and exit
            state.tx = None;
            withdrawn
        };

        info!(
            "Bridge session for run {} ended ({}), {} open request(s) withdrawn, {} output(s) dropped",
            self.run_id,
            outcome,
            withdrawn,
            self.dropped()
        );
        true
    }
}

/// A workflow run's view of the bridge
///
/// Ending the session (explicitly or by dropping it) releases any open
/// input request with the fallback value and announces the outcome.
pub struct BridgeSession {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) inner: Arc<BridgeInner>,
}

impl BridgeSession {
    pub fn run_id(&self) -> &str {
        self.core.run_id()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Outputs that could not be enqueued
    pub fn dropped(&self) -> u64 {
        self.core.dropped()
    }

    /// End the session with `outcome`
    pub fn finish(self, outcome: RunOutcome) {
        self.inner.end_session(&self.core, outcome);
    }
}

impl IoChannel for BridgeSession {
    fn write(&self, text: &str) {
        self.core.write(&self.inner, text);
    }

    fn emit(&self, emission: Emission) {
        self.core.emit(&self.inner, emission);
    }

    fn flush(&self) {
        self.core.flush(&self.inner);
    }

    fn request_input(&self, prompt: &str) -> InputReply {
        self.core.request_input(&self.inner, prompt)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if !self.core.is_closed() {
            self.inner.end_session(&self.core, RunOutcome::Cancelled);
        }
    }
}

impl fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSession")
            .field("run_id", &self.core.run_id())
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
