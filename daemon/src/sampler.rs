use std::{sync::Arc, time::Duration};

use gpu_metrics::{Collector, Metrics, TelemetrySource};
use tokio::{
    select,
    sync::mpsc::Sender,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, trace_span, warn};

use crate::{
    errors::{DaemonError, SamplerError},
    sink::MetricsSink,
};

/// Periodically collect a snapshot and hand it to every registered sink.
///
/// Collection blocks on the management library, so it runs on the blocking
/// thread pool. A tick never starts before the previous one is published.
pub struct Sampler<S> {
    collector: Arc<Collector<S>>,
    interval: Duration,
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl<S> Sampler<S>
where
    S: TelemetrySource + Send + Sync + 'static,
{
    pub fn new(collector: Collector<S>, interval: Duration) -> Self {
        Self {
            collector: Arc::new(collector),
            interval,
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn MetricsSink>) {
        info!("Sampler: publishing to the {} sink", sink.name());
        self.sinks.push(sink);
    }

    /// Collect one snapshot without publishing it
    pub async fn sample(&self) -> Result<Metrics, SamplerError> {
        let collector = self.collector.clone();

        let metrics =
            tokio::task::spawn_blocking(move || collector.collect()).await??;

        Ok(metrics)
    }

    /// Publish a snapshot to every sink, a failing sink doesn't stop the others
    pub fn publish(&mut self, metrics: &Metrics) -> Vec<DaemonError> {
        self.sinks
            .iter_mut()
            .filter_map(|sink| sink.publish(metrics).err())
            .map(DaemonError::from)
            .collect()
    }

    pub async fn run(
        &mut self,
        run_token: CancellationToken,
        tx_err: Sender<anyhow::Error>,
    ) {
        info!("Sampler: Running every {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = run_token.cancelled() => {
                    info!("Sampler: Quiting");
                    break;
                },
                _ = ticker.tick() => {
                    let sampled =
                        self.sample().instrument(trace_span!("sampling")).await;

                    let errors = match sampled {
                        Ok(metrics) => self.publish(&metrics),
                        Err(err) => {
                            warn!("Sampler: skipping this interval");
                            vec![DaemonError::from(err)]
                        }
                    };

                    // If any error occur send it to the error channel
                    for err in errors {
                        tx_err.send(err.into()).await.unwrap_or_else(|err| {
                            error!("Sampler: Couldn't send error to channel: {err}")
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use gpu_metrics::{
        Reading,
        errors::SourceError,
        telemetry::mock::{MOCK_DRIVER_VERSION, MockSource},
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::errors::SinkError;

    // Keeps every published snapshot
    struct RecordingSink(Arc<Mutex<Vec<Metrics>>>);

    impl MetricsSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn publish(&mut self, metrics: &Metrics) -> crate::sink::Result<()> {
            self.0.lock().unwrap().push(metrics.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl MetricsSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn publish(&mut self, _metrics: &Metrics) -> crate::sink::Result<()> {
            Err(SinkError::Write {
                path: "/dev/full/gpu.prom".into(),
                error: std::io::Error::other("disk full"),
            })
        }
    }

    fn is_send<T: Send>(_: T) {}

    fn sampler(source: MockSource) -> Sampler<MockSource> {
        Sampler::new(Collector::new(source), Duration::from_millis(10))
    }

    #[test]
    fn run_can_be_spawned_with_boxed_sinks() {
        let mut sampler = sampler(MockSource::new(1));
        sampler.add_sink(Box::new(BrokenSink));
        let (tx_err, _rx_err) = mpsc::channel(1);

        // Never polled, only the Send bound of the future matters
        is_send(sampler.run(CancellationToken::new(), tx_err));
    }

    #[tokio::test]
    async fn sample_collects_on_blocking_pool() {
        let source = MockSource::new(2);
        let counters = source.counters();

        let metrics = sampler(source).sample().await.expect("sample");

        assert_eq!(metrics.version(), MOCK_DRIVER_VERSION);
        assert_eq!(metrics.devices().len(), 2);
        assert_eq!(counters.shutdowns(), 1);
    }

    #[tokio::test]
    async fn sample_propagates_collection_errors() {
        let source = MockSource::new(2).fail(Reading::DeviceCount, "GPU is lost");

        let err = sampler(source).sample().await.unwrap_err();

        match err {
            SamplerError::Collect(SourceError::Query { reading, .. }) => {
                assert_eq!(reading, Reading::DeviceCount)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failing_sink_does_not_block_the_others() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let mut sampler = sampler(MockSource::new(1));
        sampler.add_sink(Box::new(BrokenSink));
        sampler.add_sink(Box::new(RecordingSink(recorded.clone())));

        let metrics = Metrics::new("550.54.15".to_string(), Vec::new());
        let errors = sampler.publish(&metrics);

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], DaemonError::Sink(SinkError::Write { .. })));
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_publishes_until_cancelled() {
        let source = MockSource::new(3);
        let counters = source.counters();
        let recorded = Arc::new(Mutex::new(Vec::new()));

        let mut sampler = sampler(source);
        sampler.add_sink(Box::new(RecordingSink(recorded.clone())));

        let token = CancellationToken::new();
        let (tx_err, mut rx_err) = mpsc::channel(16);

        let task = {
            let token = token.clone();
            tokio::spawn(async move { sampler.run(token, tx_err).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        task.await.expect("sampler task");

        let snapshots = recorded.lock().unwrap();
        assert!(snapshots.len() >= 2);
        assert!(snapshots.iter().all(|metrics| metrics.devices().len() == 3));
        assert_eq!(counters.max_open_sessions(), 1);
        assert_eq!(counters.initializations(), counters.shutdowns());

        // The sender was dropped with the task and nothing failed
        assert!(rx_err.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_keeps_going_after_failed_collections() {
        let source = MockSource::new(1).fail(Reading::DriverVersion, "Unknown Error");
        let counters = source.counters();

        let mut sampler = sampler(source);
        let token = CancellationToken::new();
        let (tx_err, mut rx_err) = mpsc::channel(64);

        let task = {
            let token = token.clone();
            tokio::spawn(async move { sampler.run(token, tx_err).await })
        };

        let first = rx_err.recv().await.expect("first error");
        let second = rx_err.recv().await.expect("second error");
        token.cancel();
        task.await.expect("sampler task");

        for err in [first, second] {
            let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();
            assert_eq!(chain[0], "Failed to collect GPU metrics");
            assert!(chain[1].contains("driver version"));
        }
        assert!(counters.shutdowns() >= 2);
    }
}
