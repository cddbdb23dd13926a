//! Execution bridge between workflow runs and live subscribers
//!
//! A workflow run executes on its own thread and talks to the world
//! through an [`IoChannel`]. The bridge implements that channel per run:
//! output is line-buffered, classified, sequenced and handed to a delivery
//! task on the Tokio runtime, which publishes it to the run's workflow
//! topic. Input requests publish a prompt and block the run's thread on a
//! single-resolution cell until a subscriber replies, the wait times out,
//! or the session ends. Timeouts and unreachable subscribers produce the
//! configured default input instead of stalling the run.

pub mod io;
pub mod line_buffer;
pub mod retry;
pub mod session;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use realtime::{ConnectionRegistry, OutboundMessage, Topic};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::sync::PendingTable;

pub use io::{Emission, FallbackReason, InputReply, IoChannel, OutputEvent, OutputKind, PassthroughIo};
pub use line_buffer::{Classifier, LineBuffer};
pub use retry::RetryPolicy;
pub use session::{BridgeSession, RunOutcome};

use session::SessionCore;

pub(crate) struct BridgeInner {
    registry: Arc<ConnectionRegistry>,
    runtime: Handle,
    sessions: DashMap<String, Arc<SessionCore>>,
    inputs: PendingTable<String, String>,
    config: BridgeConfig,
    classifier: Classifier,
    retry: RetryPolicy,
}

impl BridgeInner {
    pub(crate) fn end_session(&self, core: &Arc<SessionCore>, outcome: RunOutcome) -> bool {
        let ended = core.end(self, outcome);
        self.sessions
            .remove_if(core.run_id(), |_, current| Arc::ptr_eq(current, core));
        ended
    }
}

/// Routes workflow I/O through the realtime registry
#[derive(Clone)]
pub struct ExecutionBridge {
    inner: Arc<BridgeInner>,
}

impl ExecutionBridge {
    /// Build a bridge on the current Tokio runtime
    pub fn new(registry: Arc<ConnectionRegistry>, config: BridgeConfig) -> BridgeResult<Self> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::RuntimeUnavailable)?;
        Self::with_runtime(registry, config, runtime)
    }

    /// Build a bridge whose delivery tasks run on `runtime`
    pub fn with_runtime(
        registry: Arc<ConnectionRegistry>,
        config: BridgeConfig,
        runtime: Handle,
    ) -> BridgeResult<Self> {
        let classifier = Classifier::new()?;
        let retry = RetryPolicy::new(config.publish_retries)
            .with_initial_interval(config.retry_backoff());

        Ok(Self {
            inner: Arc::new(BridgeInner {
                registry,
                runtime,
                sessions: DashMap::new(),
                inputs: PendingTable::new(),
                config,
                classifier,
                retry,
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Open the session for `run_id`
    ///
    /// Fails with [`BridgeError::SessionExists`] if the run already has one.
    pub fn start_session(&self, run_id: &str) -> BridgeResult<BridgeSession> {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let core = match self.inner.sessions.entry(run_id.to_string()) {
            Entry::Occupied(_) => return Err(BridgeError::SessionExists(run_id.to_string())),
            Entry::Vacant(vacant) => {
                let core = Arc::new(SessionCore::new(
                    run_id,
                    tx,
                    self.inner.config.max_line_bytes,
                ));
                vacant.insert(Arc::clone(&core));
                core
            }
        };

        self.inner.runtime.spawn(deliver(
            Arc::clone(&self.inner.registry),
            run_id.to_string(),
            rx,
        ));
        info!("Bridge session started for run {}", run_id);

        Ok(BridgeSession {
            core,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Open a session, or fall back to terminal I/O if that fails
    pub fn open_or_passthrough(&self, run_id: &str) -> Box<dyn IoChannel> {
        match self.start_session(run_id) {
            Ok(session) => Box::new(session),
            Err(e) => {
                warn!(
                    "Bridge unavailable for run {} ({}), passing I/O through",
                    run_id, e
                );
                Box::new(PassthroughIo::new(self.inner.config.default_input.clone()))
            }
        }
    }

    /// Run `work` on a blocking thread with a fresh session for `run_id`
    ///
    /// The session ends `completed` or `failed` according to the result. A
    /// panic in `work` ends it `failed` and comes back as an error.
    pub fn spawn_run<T, F>(&self, run_id: &str, work: F) -> BridgeResult<JoinHandle<anyhow::Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&BridgeSession) -> anyhow::Result<T> + Send + 'static,
    {
        let session = self.start_session(run_id)?;
        Ok(self.inner.runtime.spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| work(&session))).unwrap_or_else(|panic| {
                Err(anyhow::anyhow!("workflow panicked: {}", panic_message(panic.as_ref())))
            });
            let outcome = match &result {
                Ok(_) => RunOutcome::Completed,
                Err(e) => {
                    warn!("Run {} failed: {:#}", session.run_id(), e);
                    RunOutcome::Failed
                }
            };
            session.finish(outcome);
            result
        }))
    }

    /// Write raw text to a run's session
    pub fn emit(&self, run_id: &str, text: &str) -> BridgeResult<()> {
        let core = self.session(run_id)?;
        core.write(&self.inner, text);
        Ok(())
    }

    /// Emit typed output on a run's session
    pub fn emit_event(&self, run_id: &str, emission: Emission) -> BridgeResult<()> {
        let core = self.session(run_id)?;
        core.emit(&self.inner, emission);
        Ok(())
    }

    /// Ask the subscribers of `run_id` for input, blocking the caller
    pub fn request_input(&self, run_id: &str, prompt: &str) -> BridgeResult<InputReply> {
        let core = self.session(run_id)?;
        Ok(core.request_input(&self.inner, prompt))
    }

    /// Deliver a subscriber's answer to an open input request
    pub fn submit_input_reply(&self, request_id: &str, answer: impl Into<String>) -> BridgeResult<()> {
        if self.inner.inputs.resolve(&request_id.to_string(), answer.into()) {
            debug!("Input reply delivered for {}", request_id);
            Ok(())
        } else {
            Err(BridgeError::NotFound(format!("input request {}", request_id)))
        }
    }

    /// IDs of input requests still waiting for an answer
    pub fn pending_inputs(&self) -> Vec<String> {
        self.inner.inputs.keys()
    }

    pub fn has_session(&self, run_id: &str) -> bool {
        self.inner.sessions.contains_key(run_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// End a run's session as cancelled
    pub fn cancel_session(&self, run_id: &str) -> bool {
        match self.inner.sessions.get(run_id).map(|s| Arc::clone(s.value())) {
            Some(core) => self.inner.end_session(&core, RunOutcome::Cancelled),
            None => false,
        }
    }

    /// Cancel every session and release every pending input
    pub fn shutdown(&self) -> usize {
        let cores: Vec<Arc<SessionCore>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let ended = cores
            .iter()
            .filter(|core| self.inner.end_session(core, RunOutcome::Cancelled))
            .count();
        let released = self.inner.inputs.drain();
        info!(
            "Bridge shut down: {} session(s) cancelled, {} input(s) released",
            ended, released
        );
        ended
    }

    fn session(&self, run_id: &str) -> BridgeResult<Arc<SessionCore>> {
        let core = self
            .inner
            .sessions
            .get(run_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BridgeError::NotFound(format!("session for run {}", run_id)))?;
        if core.is_closed() {
            return Err(BridgeError::SessionClosed(run_id.to_string()));
        }
        Ok(core)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Publish a run's messages in queue order until the session drops its sender
async fn deliver(
    registry: Arc<ConnectionRegistry>,
    run_id: String,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    let topic = Topic::workflow(run_id.as_str());
    while let Some(message) = rx.recv().await {
        let report = registry.publish(&topic, &message);
        debug!(
            "Run {} {} #{:?} delivered to {}",
            run_id,
            message.event_type(),
            message.sequence(),
            report.delivered
        );
    }
    debug!("Delivery task for run {} finished", run_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime::ChannelHandle;
    use std::time::Duration;

    fn bridge_config() -> BridgeConfig {
        BridgeConfig {
            input_timeout_secs: 5,
            default_input: "continue".to_string(),
            queue_capacity: 64,
            publish_retries: 2,
            retry_backoff_ms: 1,
            max_line_bytes: 64,
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<OutboundMessage>) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    fn watch(registry: &ConnectionRegistry, run_id: &str) -> mpsc::Receiver<OutboundMessage> {
        let (handle, mut rx) = ChannelHandle::new(128);
        registry
            .subscribe(Arc::new(handle), Topic::workflow(run_id), "watcher")
            .unwrap();
        rx.try_recv().unwrap();
        rx
    }

    #[test]
    fn test_new_outside_runtime() {
        let result = ExecutionBridge::new(Arc::new(ConnectionRegistry::new()), bridge_config());
        assert!(matches!(result, Err(BridgeError::RuntimeUnavailable)));
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let bridge = ExecutionBridge::new(Arc::new(ConnectionRegistry::new()), bridge_config()).unwrap();
        let _session = bridge.start_session("run-1").unwrap();
        assert!(matches!(
            bridge.start_session("run-1"),
            Err(BridgeError::SessionExists(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_session_ends_run() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx = watch(&registry, "run-1");
        let bridge = ExecutionBridge::new(Arc::clone(&registry), bridge_config()).unwrap();

        let session = bridge.start_session("run-1").unwrap();
        session.write("partial");
        drop(session);
        assert!(!bridge.has_session("run-1"));

        let partial = recv(&mut rx).await;
        assert_eq!(partial.sequence(), Some(0));
        match recv(&mut rx).await {
            OutboundMessage::RunFinished { outcome, sequence, .. } => {
                assert_eq!(outcome, "cancelled");
                assert_eq!(sequence, 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // A new session for the same run is allowed once the old one ended
        assert!(bridge.start_session("run-1").is_ok());
    }

    #[tokio::test]
    async fn test_emit_by_run_id() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx = watch(&registry, "run-2");
        let bridge = ExecutionBridge::new(Arc::clone(&registry), bridge_config()).unwrap();
        let _session = bridge.start_session("run-2").unwrap();

        bridge.emit("run-2", "Stage 1: outline\n").unwrap();
        bridge
            .emit_event("run-2", Emission::text("typed").with_role("writer"))
            .unwrap();

        match recv(&mut rx).await {
            OutboundMessage::Output { kind, stage, .. } => {
                assert_eq!(kind, "stage");
                assert_eq!(stage.as_deref(), Some("1"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        match recv(&mut rx).await {
            OutboundMessage::Output { text, role, sequence, .. } => {
                assert_eq!(text, "typed");
                assert_eq!(role.as_deref(), Some("writer"));
                assert_eq!(sequence, 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        assert!(matches!(
            bridge.emit("missing", "x"),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_long_unterminated_write_is_forwarded() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx = watch(&registry, "run-5");
        let bridge = ExecutionBridge::new(Arc::clone(&registry), bridge_config()).unwrap();
        let session = bridge.start_session("run-5").unwrap();

        session.write(&"x".repeat(100));
        match recv(&mut rx).await {
            OutboundMessage::Output { text, sequence, .. } => {
                assert_eq!(text.len(), 64);
                assert_eq!(sequence, 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_reply_is_not_found() {
        let bridge = ExecutionBridge::new(Arc::new(ConnectionRegistry::new()), bridge_config()).unwrap();
        assert!(matches!(
            bridge.submit_input_reply("nope", "yes"),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_passthrough_when_session_exists() {
        let bridge = ExecutionBridge::new(Arc::new(ConnectionRegistry::new()), bridge_config()).unwrap();
        let _session = bridge.start_session("run-3").unwrap();
        let io = bridge.open_or_passthrough("run-3");
        io.flush();
        assert_eq!(bridge.session_count(), 1);
    }

    #[tokio::test]
    async fn test_request_on_closed_session_falls_back() {
        let bridge = ExecutionBridge::new(Arc::new(ConnectionRegistry::new()), bridge_config()).unwrap();
        let session = bridge.start_session("run-4").unwrap();
        assert!(bridge.cancel_session("run-4"));
        assert!(!bridge.cancel_session("run-4"));

        let reply = session.request_input("anything?");
        assert_eq!(
            reply,
            InputReply::fallback("continue", FallbackReason::SessionClosed)
        );
    }
}
