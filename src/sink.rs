//! The outbound sink interface (spec.md §6): two channels carrying batches
//! of metric definitions and datapoints to the external time-series store.
//! The store itself — its retry/batching policy — is an out-of-scope
//! collaborator; [`SinkHandle`] is just enough surface for the manager to
//! depend on.

use async_trait::async_trait;
use snafu::Snafu;
use tokio::sync::mpsc;

use crate::model::{EmittedSeries, MetricDefinitionDeclaration};

#[derive(Debug, Snafu)]
pub enum SinkError {
    #[snafu(display("sink is gone: the receiving end of the {} channel was dropped", channel))]
    Closed { channel: &'static str },
}

/// The surface the collector manager needs from a downstream sink. Pushes
/// block when the channel is full — backpressure propagates up into the
/// scheduler loop rather than datapoints being silently discarded
/// (spec.md §5 "Shared resources", §7 "sink-push").
#[async_trait]
pub trait SinkHandle: Send + Sync {
    async fn send_definitions(&self, batch: Vec<MetricDefinitionDeclaration>) -> Result<(), SinkError>;
    async fn send_datapoints(&self, batch: Vec<EmittedSeries>) -> Result<(), SinkError>;
}

/// The production sink: a pair of bounded `tokio::mpsc` channels. The
/// receivers are handed off to whatever external client drains them (out of
/// scope here — spec.md §1).
pub struct ChannelSink {
    definitions: mpsc::Sender<Vec<MetricDefinitionDeclaration>>,
    datapoints: mpsc::Sender<Vec<EmittedSeries>>,
}

impl ChannelSink {
    pub fn new(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Vec<MetricDefinitionDeclaration>>,
        mpsc::Receiver<Vec<EmittedSeries>>,
    ) {
        let (definitions_tx, definitions_rx) = mpsc::channel(capacity);
        let (datapoints_tx, datapoints_rx) = mpsc::channel(capacity);
        (
            ChannelSink {
                definitions: definitions_tx,
                datapoints: datapoints_tx,
            },
            definitions_rx,
            datapoints_rx,
        )
    }
}

#[async_trait]
impl SinkHandle for ChannelSink {
    async fn send_definitions(&self, batch: Vec<MetricDefinitionDeclaration>) -> Result<(), SinkError> {
        self.definitions
            .send(batch)
            .await
            .map_err(|_| SinkError::Closed { channel: "definitions" })
    }

    async fn send_datapoints(&self, batch: Vec<EmittedSeries>) -> Result<(), SinkError> {
        self.datapoints
            .send(batch)
            .await
            .map_err(|_| SinkError::Closed { channel: "datapoints" })
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    /// An in-memory sink for tests: every pushed batch is appended to a
    /// shared, inspectable buffer instead of being forwarded anywhere.
    #[derive(Clone, Default)]
    pub struct MockSink {
        pub definitions: Arc<Mutex<Vec<MetricDefinitionDeclaration>>>,
        pub datapoints: Arc<Mutex<Vec<EmittedSeries>>>,
    }

    #[async_trait]
    impl SinkHandle for MockSink {
        async fn send_definitions(&self, batch: Vec<MetricDefinitionDeclaration>) -> Result<(), SinkError> {
            self.definitions.lock().await.extend(batch);
            Ok(())
        }

        async fn send_datapoints(&self, batch: Vec<EmittedSeries>) -> Result<(), SinkError> {
            self.datapoints.lock().await.extend(batch);
            Ok(())
        }
    }
}
