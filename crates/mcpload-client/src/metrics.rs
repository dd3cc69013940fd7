//! Per-call request metrics.
//!
//! Every RPC produces a duration sample and a count sample; a failed RPC adds
//! an error sample. Samples go to a [`SampleSink`], tagged with the
//! session's [`AmbientTags`] plus `method`.
//!
//! ```rust,ignore
//! use mcpload_client::metrics::{ChannelSink, MetricsRecorder};
//!
//! let (sink, mut samples) = ChannelSink::channel(1000);
//! let recorder = MetricsRecorder::new(Arc::new(sink));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime};

use metrics::{Label, counter, describe_counter, describe_histogram, histogram};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::context::CallContext;

/// Request latency in milliseconds.
pub const REQUEST_DURATION: &str = "mcp_request_duration";
/// One per request.
pub const REQUEST_COUNT: &str = "mcp_request_count";
/// One per failed request.
pub const REQUEST_ERRORS: &str = "mcp_request_errors";

/// Tag carrying the MCP method name.
pub const METHOD_TAG: &str = "method";

/// The series a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// [`REQUEST_DURATION`]
    Duration,
    /// [`REQUEST_COUNT`]
    Count,
    /// [`REQUEST_ERRORS`]
    Errors,
}

impl MetricKind {
    /// Series name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Duration => REQUEST_DURATION,
            Self::Count => REQUEST_COUNT,
            Self::Errors => REQUEST_ERRORS,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Series
    pub kind: MetricKind,
    /// MCP method the request invoked
    pub method: String,
    /// Ambient tags plus `method`
    pub tags: BTreeMap<String, String>,
    /// Milliseconds for durations, `1.0` for counts and errors
    pub value: f64,
    /// When the sample was taken
    pub time: SystemTime,
}

/// Receives samples. Must never block.
pub trait SampleSink: Send + Sync + fmt::Debug {
    /// Offer a sample; dropping it is allowed.
    fn push(&self, sample: MetricSample);
}

/// Forwards samples into a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MetricSample>,
}

impl ChannelSink {
    /// Push into `tx`.
    pub fn new(tx: mpsc::Sender<MetricSample>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver draining it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MetricSample>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl SampleSink for ChannelSink {
    fn push(&self, sample: MetricSample) {
        if let Err(e) = self.tx.try_send(sample) {
            trace!("Dropping metric sample: {}", e);
        }
    }
}

static DESCRIBE: Once = Once::new();

/// Forwards samples to whatever `metrics` recorder is installed.
///
/// Durations become a histogram, counts and errors become counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacadeSink;

impl MetricsFacadeSink {
    /// Describe the three series once per process.
    pub fn new() -> Self {
        DESCRIBE.call_once(|| {
            describe_histogram!(
                REQUEST_DURATION,
                metrics::Unit::Milliseconds,
                "Duration of MCP requests in milliseconds"
            );
            describe_counter!(REQUEST_COUNT, "Total number of MCP requests");
            describe_counter!(REQUEST_ERRORS, "Total number of failed MCP requests");
        });
        Self
    }
}

impl SampleSink for MetricsFacadeSink {
    fn push(&self, sample: MetricSample) {
        let labels: Vec<Label> = sample
            .tags
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();

        match sample.kind {
            MetricKind::Duration => histogram!(REQUEST_DURATION, labels).record(sample.value),
            MetricKind::Count => counter!(REQUEST_COUNT, labels).increment(sample.value as u64),
            MetricKind::Errors => counter!(REQUEST_ERRORS, labels).increment(sample.value as u64),
        }
    }
}

/// Tags attached to every sample, shared with and updatable by the host.
#[derive(Debug, Clone, Default)]
pub struct AmbientTags(Arc<RwLock<BTreeMap<String, String>>>);

impl AmbientTags {
    /// No tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.write().insert(key.into(), value.into())
    }

    /// Remove a tag.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.0.write().remove(key)
    }

    /// Current tags.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.0.read().clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AmbientTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let tags = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self(Arc::new(RwLock::new(tags)))
    }
}

/// Turns one finished RPC into samples.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    sink: Arc<dyn SampleSink>,
    tags: AmbientTags,
}

impl MetricsRecorder {
    /// Record into `sink` with no ambient tags.
    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self {
            sink,
            tags: AmbientTags::new(),
        }
    }

    /// Attach `tags` to every sample.
    #[must_use]
    pub fn with_tags(mut self, tags: AmbientTags) -> Self {
        self.tags = tags;
        self
    }

    /// The ambient tags.
    pub fn tags(&self) -> &AmbientTags {
        &self.tags
    }

    /// Emit the samples for one call of `method`.
    ///
    /// Nothing is emitted once `ctx` is cancelled or expired.
    pub fn record(&self, ctx: &CallContext, method: &str, duration: Duration, failed: bool) {
        if ctx.is_done() {
            trace!(method, "Context done, dropping metric samples");
            return;
        }

        let mut tags = self.tags.snapshot();
        tags.insert(METHOD_TAG.to_string(), method.to_string());
        let time = SystemTime::now();

        let sample = |kind, value| MetricSample {
            kind,
            method: method.to_string(),
            tags: tags.clone(),
            value,
            time,
        };

        self.sink
            .push(sample(MetricKind::Duration, duration.as_secs_f64() * 1000.0));
        self.sink.push(sample(MetricKind::Count, 1.0));
        if failed {
            self.sink.push(sample(MetricKind::Errors, 1.0));
        }
    }
}
