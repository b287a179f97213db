//! Pipeline runtime.
//!
//! [`PipelineRunner`] drives the poll → map → persist cycle: fetch a batch
//! from the source, hand it to the sink, sleep, repeat — until the
//! configured cycle limit is reached or a shutdown signal arrives. The
//! runner is strictly sequential; there is exactly one in-flight fetch and
//! one in-flight insert at any time.
//!
//! State machine: `Idle → Running → {Stopped, Failed}`. `Failed` is only
//! reachable from setup (topic override, connect, sink start); once the
//! pipeline is `Running`, per-cycle failures are logged and the loop
//! continues.

use std::time::Duration;

use tokio::sync::watch;
use tracing;

use crate::config::PipelineState;
use crate::error::Result;
use crate::traits::{EventSink, EventSource};

/// Runtime knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pause between cycles.
    pub sleep_interval: Duration,
    /// Stop after this many cycles; `None` runs until shutdown.
    pub max_cycles: Option<u64>,
    /// Replace the source's topic subscription before connecting.
    pub topic_override: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_secs(60),
            max_cycles: None,
            topic_override: None,
        }
    }
}

/// Drives a source and a sink through the consume-persist cycle.
pub struct PipelineRunner {
    config: PipelineConfig,
    state: PipelineState,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the pipeline until the cycle limit or a shutdown signal.
    ///
    /// A shutdown is signalled by sending `true` on the watch channel (or
    /// dropping its sender). Both the fetch and the inter-cycle sleep are
    /// interruptible; the source is released on every exit path.
    ///
    /// # Errors
    ///
    /// Setup failures (topic override rejection, broker connect, sink
    /// preparation) propagate and leave the runner in the `Failed` state
    /// without ever entering `Running`.
    pub async fn run(
        &mut self,
        mut source: Box<dyn EventSource>,
        mut sink: Box<dyn EventSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if let Some(topics) = self.config.topic_override.clone() {
            if let Err(e) = source.change_topics(topics) {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        }
        if let Err(e) = source.connect().await {
            self.state = PipelineState::Failed;
            return Err(e);
        }
        if let Err(e) = sink.start().await {
            self.state = PipelineState::Failed;
            return Err(e);
        }

        self.state = PipelineState::Running;
        tracing::info!(
            cycles = ?self.config.max_cycles,
            sleep_secs = self.config.sleep_interval.as_secs(),
            "pipeline running"
        );

        let mut cycles: u64 = 0;
        loop {
            let fetched = tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("shutdown signal received, stopping pipeline");
                    break;
                }
                result = source.fetch_latest() => result,
            };

            match fetched {
                Ok(batch) if batch.is_empty() => {
                    tracing::warn!("no data to push to storage; is the web metric service running?");
                }
                Ok(batch) => {
                    tracing::info!(count = batch.len(), "successfully fetched events");
                    match sink.persist(&batch).await {
                        Ok(Some(rows)) => {
                            tracing::info!(rows = rows.len(), "cycle persisted rows");
                        }
                        Ok(None) => {
                            tracing::warn!("cycle had no confirmed effect on storage");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "batch aborted, continuing with next cycle");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "fetch failed, continuing with next cycle");
                }
            }

            cycles += 1;
            if let Some(limit) = self.config.max_cycles {
                if cycles >= limit {
                    tracing::info!(
                        cycles,
                        limit,
                        "exiting because the pipeline worked its configured cycles"
                    );
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("shutdown signal received during sleep, stopping pipeline");
                    break;
                }
                _ = tokio::time::sleep(self.config.sleep_interval) => {}
            }
        }

        self.state = PipelineState::Stopped;
        // The source (and its broker connection) is released here on every
        // exit path, including cancellation.
        drop(source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::sinks::postgres::MetricRow;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Source that returns the same batch on every fetch and records the
    /// order of lifecycle calls.
    struct ScriptedSource {
        batch: Vec<Value>,
        fail_connect: bool,
        fail_fetch: bool,
        fetch_count: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(batch: Vec<Value>) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
            let fetch_count = Arc::new(AtomicUsize::new(0));
            let log = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    batch,
                    fail_connect: false,
                    fail_fetch: false,
                    fetch_count: fetch_count.clone(),
                    log: log.clone(),
                },
                fetch_count,
                log,
            )
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("connect".to_string());
            if self.fail_connect {
                return Err(ConnectorError::BrokerError("connection refused".to_string()));
            }
            Ok(())
        }

        async fn fetch_latest(&mut self) -> Result<Vec<Value>> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(ConnectorError::BrokerError("poll failed".to_string()));
            }
            Ok(self.batch.clone())
        }

        fn change_topics(&mut self, topics: Vec<String>) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("change_topics:{}", topics.join(",")));
            Ok(())
        }
    }

    struct CountingSink {
        persist_count: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
    }

    impl CountingSink {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let persist_count = Arc::new(AtomicUsize::new(0));
            let started = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    persist_count: persist_count.clone(),
                    started: started.clone(),
                },
                persist_count,
                started,
            )
        }
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn start(&mut self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn persist(&mut self, _events: &[Value]) -> Result<Option<Vec<MetricRow>>> {
            self.persist_count.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![]))
        }
    }

    fn fast_config(max_cycles: Option<u64>) -> PipelineConfig {
        PipelineConfig {
            sleep_interval: Duration::from_millis(1),
            max_cycles,
            topic_override: None,
        }
    }

    fn event() -> Value {
        json!({"url": "https://example.com"})
    }

    // ---------------------------------------------------------------
    // Cycle bound
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_cycle_limit_performs_exactly_n_fetches() {
        let (source, fetch_count, _) = ScriptedSource::new(vec![event()]);
        let (sink, _, _) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(3)));
        runner
            .run(Box::new(source), Box::new(sink), rx)
            .await
            .unwrap();

        assert_eq!(fetch_count.load(Ordering::SeqCst), 3);
        assert_eq!(runner.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_cycle_limit_counts_empty_fetches() {
        let (source, fetch_count, _) = ScriptedSource::new(vec![]);
        let (sink, persist_count, _) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(4)));
        runner
            .run(Box::new(source), Box::new(sink), rx)
            .await
            .unwrap();

        assert_eq!(fetch_count.load(Ordering::SeqCst), 4);
        // Empty batches never reach the sink.
        assert_eq!(persist_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_counts_cycle_and_continues() {
        let (mut source, fetch_count, _) = ScriptedSource::new(vec![]);
        source.fail_fetch = true;
        let (sink, persist_count, _) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(2)));
        runner
            .run(Box::new(source), Box::new(sink), rx)
            .await
            .unwrap();

        assert_eq!(fetch_count.load(Ordering::SeqCst), 2);
        assert_eq!(persist_count.load(Ordering::SeqCst), 0);
        assert_eq!(runner.state(), PipelineState::Stopped);
    }

    // ---------------------------------------------------------------
    // Persist policy
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_non_empty_batches_are_persisted_each_cycle() {
        let (source, _, _) = ScriptedSource::new(vec![event(), event()]);
        let (sink, persist_count, started) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(2)));
        runner
            .run(Box::new(source), Box::new(sink), rx)
            .await
            .unwrap();

        assert_eq!(persist_count.load(Ordering::SeqCst), 2);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persist_error_does_not_stop_the_loop() {
        struct RejectingSink;

        #[async_trait]
        impl EventSink for RejectingSink {
            async fn start(&mut self) -> Result<()> {
                Ok(())
            }
            async fn persist(&mut self, _events: &[Value]) -> Result<Option<Vec<MetricRow>>> {
                Err(ConnectorError::MappingError("missing field".to_string()))
            }
        }

        let (source, fetch_count, _) = ScriptedSource::new(vec![event()]);
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(3)));
        runner
            .run(Box::new(source), Box::new(RejectingSink), rx)
            .await
            .unwrap();

        assert_eq!(fetch_count.load(Ordering::SeqCst), 3);
        assert_eq!(runner.state(), PipelineState::Stopped);
    }

    // ---------------------------------------------------------------
    // Setup failures
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_failure_enters_failed_not_running() {
        let (mut source, fetch_count, _) = ScriptedSource::new(vec![]);
        source.fail_connect = true;
        let (sink, _, started) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(fast_config(Some(1)));
        let result = runner.run(Box::new(source), Box::new(sink), rx).await;

        assert!(result.is_err());
        assert_eq!(runner.state(), PipelineState::Failed);
        assert_eq!(fetch_count.load(Ordering::SeqCst), 0);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_topic_override_applied_before_connect() {
        let (source, _, log) = ScriptedSource::new(vec![]);
        let (sink, _, _) = CountingSink::new();
        let (_tx, rx) = watch::channel(false);

        let mut runner = PipelineRunner::new(PipelineConfig {
            sleep_interval: Duration::from_millis(1),
            max_cycles: Some(1),
            topic_override: Some(vec!["other-topic".to_string()]),
        });
        runner
            .run(Box::new(source), Box::new(sink), rx)
            .await
            .unwrap();

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["change_topics:other-topic", "connect"]);
    }

    // ---------------------------------------------------------------
    // Cancellation
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_shutdown_signal_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let (source, _, _) = ScriptedSource::new(vec![]);
            let (sink, _, _) = CountingSink::new();
            let mut runner = PipelineRunner::new(PipelineConfig {
                sleep_interval: Duration::from_secs(3600),
                max_cycles: None,
                topic_override: None,
            });
            let result = runner.run(Box::new(source), Box::new(sink), rx).await;
            (result.is_ok(), runner.state())
        });

        // Let the runner reach its inter-cycle sleep, then cancel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let (ok, state) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop after shutdown signal")
            .unwrap();
        assert!(ok);
        assert_eq!(state, PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let runner = PipelineRunner::new(PipelineConfig::default());
        assert_eq!(runner.state(), PipelineState::Idle);
    }
}
