//! The exporter pipeline: batches sampled spans and fans them out to one or
//! more backends.

/// OTLP-style wire exporter, POSTing JSON batches over HTTP.
pub mod otlp;
/// Human-readable line-per-span text exporter, for local development.
pub mod text;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ex_tokio::{notify_once::NotifyOnce, task::Task};
use tokio::sync::mpsc;
use tracing::warn;

use crate::span::Exported;

/// A trace export backend. Implementors receive a batch of already-sampled
/// spans and are responsible for shipping them off-process.
#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, spans: &[Exported]) -> anyhow::Result<()>;
}

/// Default channel capacity for the live pipeline: generous enough to absorb
/// a burst without blocking span producers, small enough that a permanently
/// stuck exporter fails loudly (dropped-span warnings) instead of growing
/// unboundedly.
const CHANNEL_CAPACITY: usize = 4096;

/// Batches and fans sampled spans out to the configured [`Exporter`]s.
///
/// In production this batches spans on a background task (see
/// [`Pipeline::new`]); under `test-utils`, [`Pipeline::for_testing`] instead
/// records every pushed span synchronously in-memory, with no background
/// task and no dependency on a running Tokio runtime.
pub enum Pipeline {
    Live {
        tx: mpsc::Sender<Exported>,
        shutdown: NotifyOnce,
        task: Mutex<Option<Task<()>>>,
    },
    #[cfg(any(test, feature = "test-utils"))]
    Testing {
        recorded: Arc<Mutex<Vec<Exported>>>,
    },
    /// Discards every pushed span. Used by [`Provider::default`](crate::provider::Provider),
    /// which must be constructible outside a Tokio runtime and without a
    /// `test-utils` build.
    Noop,
}

impl Pipeline {
    /// Spawns the background batching task. Must be called from within a
    /// Tokio runtime.
    pub fn new(
        exporters: Vec<Arc<dyn Exporter>>,
        max_spans: usize,
        max_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let shutdown = NotifyOnce::new();
        let task = Task::spawn(
            "ex-o11y-batch-exporter",
            run(rx, exporters, max_spans, max_delay, shutdown.clone()),
        );
        Self::Live {
            tx,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing() -> Self {
        Self::Testing {
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A pipeline that discards everything pushed to it. No Tokio runtime
    /// or background task required.
    pub fn noop() -> Self {
        Self::Noop
    }

    /// Queues a span for export. Never blocks: if the live pipeline's
    /// channel is full, the span is dropped and a warning is logged.
    pub fn push(&self, span: Exported) {
        match self {
            Self::Live { tx, .. } => {
                if let Err(e) = tx.try_send(span) {
                    warn!("dropping span: exporter channel is {e}");
                }
            }
            #[cfg(any(test, feature = "test-utils"))]
            Self::Testing { recorded } => {
                recorded
                    .lock()
                    .expect("recorded spans mutex poisoned")
                    .push(span);
            }
            Self::Noop => {}
        }
    }

    /// Signals the background task to flush and exit, then waits for it.
    pub async fn close(&self) {
        match self {
            Self::Live { shutdown, task, .. } => {
                shutdown.send();
                if let Some(task) = task.lock().expect("pipeline task mutex poisoned").take() {
                    let _ = task.await;
                }
            }
            #[cfg(any(test, feature = "test-utils"))]
            Self::Testing { .. } => {}
            Self::Noop => {}
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn recorded(&self) -> Vec<Exported> {
        match self {
            Self::Testing { recorded } => {
                recorded.lock().expect("recorded spans mutex poisoned").clone()
            }
            Self::Live { .. } | Self::Noop => Vec::new(),
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<Exported>,
    exporters: Vec<Arc<dyn Exporter>>,
    max_spans: usize,
    max_delay: Duration,
    mut shutdown: NotifyOnce,
) {
    let mut buffer = Vec::with_capacity(max_spans);
    let mut ticker = tokio::time::interval(max_delay);
    // The first tick fires immediately; skip it so we don't flush an empty
    // buffer the moment the task starts.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.recv() => {
                while let Ok(span) = rx.try_recv() {
                    buffer.push(span);
                }
                flush(&exporters, &mut buffer).await;
                break;
            }
            maybe_span = rx.recv() => {
                match maybe_span {
                    Some(span) => {
                        buffer.push(span);
                        if buffer.len() >= max_spans {
                            flush(&exporters, &mut buffer).await;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                flush(&exporters, &mut buffer).await;
            }
        }
    }
}

async fn flush(exporters: &[Arc<dyn Exporter>], buffer: &mut Vec<Exported>) {
    if buffer.is_empty() {
        return;
    }
    for exporter in exporters {
        if let Err(e) = exporter.export(buffer).await {
            warn!("span exporter failed: {e:#}");
        }
    }
    buffer.clear();
}
