use crate::error::StorageError;
use crate::recording::SessionStamp;
use crate::sensors::{SensorKind, SensorSample, SensorTable};
use crate::storage::{FileRef, StorageBackend};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

const SENSOR_LOG_EXTENSION: &str = "csv";

/// Samples buffered per kind between delivery and the writer thread
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Per-kind outcome of a session's sensor log
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub kind: SensorKind,
    pub file: FileRef,
    pub rows: u64,
    pub dropped: u64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Accepted for writing; the row reaches the sink before `close_all` returns
    Queued,
    Dropped,
}

#[derive(Default)]
struct StreamCounters {
    rows: AtomicU64,
    dropped: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl StreamCounters {
    fn fail(&self, kind: SensorKind, err: io::Error) -> io::Error {
        error!("Writing {} log failed, closing it: {}", kind, err);
        *self.failure.lock() = Some(err.to_string());
        err
    }
}

#[derive(Default)]
struct Slot {
    queue: Option<mpsc::Sender<SensorSample>>,
    writer: Option<JoinHandle<io::Result<()>>>,
    file: Option<FileRef>,
    last_timestamp: Option<i64>,
    counters: Arc<StreamCounters>,
}

/// Buffered CSV sinks, one per sensor kind, for the lifetime of one session.
///
/// `write` only enqueues: each open kind has a bounded queue drained by its
/// own blocking writer, so file I/O never runs on the delivery context. A
/// full queue drops the sample and counts it. `close_all` waits for every
/// writer to drain its queue and flush.
pub struct SensorWriterPool {
    slots: SensorTable<Mutex<Slot>>,
    queue_capacity: usize,
}

impl Default for SensorWriterPool {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl SensorWriterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            slots: SensorTable::default(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Open the CSV sink for `kind` and start its writer. Opening a kind that
    /// is already open is rejected and leaves the existing sink untouched.
    /// Must be called from within a tokio runtime.
    pub fn open(
        &self,
        kind: SensorKind,
        backend: &dyn StorageBackend,
        session: &SessionStamp,
    ) -> Result<(), StorageError> {
        let mut slot = self.slots[kind].lock();
        if slot.queue.is_some() {
            return Err(StorageError::AlreadyOpen {
                stream: kind.short_name().to_string(),
            });
        }

        let runtime = Handle::try_current().map_err(|e| StorageError::WriterUnavailable {
            stream: kind.short_name().to_string(),
            details: e.to_string(),
        })?;

        let output = backend.open(kind.short_name(), SENSOR_LOG_EXTENSION, session)?;
        info!("Opened {} log at {}", kind, output.file);

        let (queue, receiver) = mpsc::channel(self.queue_capacity);
        let counters = Arc::new(StreamCounters::default());
        let writer = {
            let counters = Arc::clone(&counters);
            let sink = output.sink;
            runtime.spawn_blocking(move || drain(kind, receiver, sink, &counters))
        };

        *slot = Slot {
            queue: Some(queue),
            writer: Some(writer),
            file: Some(output.file),
            last_timestamp: None,
            counters,
        };
        Ok(())
    }

    /// Queue one row for the sample's kind. Rows for kinds without an open
    /// sink, with a non-increasing timestamp, or arriving while the queue is
    /// full are counted and dropped. Never blocks on I/O.
    pub fn write(&self, sample: &SensorSample) -> WriteOutcome {
        let kind = sample.kind;
        let mut slot = self.slots[kind].lock();

        if let Some(last) = slot.last_timestamp {
            if sample.timestamp_ns <= last {
                slot.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Out-of-order {} sample ({} <= {}), dropping",
                    kind, sample.timestamp_ns, last
                );
                return WriteOutcome::Dropped;
            }
        }

        let sent = match slot.queue.as_ref() {
            Some(queue) => queue.try_send(sample.clone()),
            None => {
                slot.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("No open {} log, dropping sample", kind);
                return WriteOutcome::Dropped;
            }
        };

        match sent {
            Ok(()) => {
                slot.last_timestamp = Some(sample.timestamp_ns);
                WriteOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                slot.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("{} log queue full, dropping sample", kind);
                WriteOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                slot.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("{} log writer has stopped, dropping sample", kind);
                WriteOutcome::Dropped
            }
        }
    }

    /// Close intake on every open sink, then wait until each writer has
    /// drained its queue and flushed. Safe to call repeatedly. Returns write
    /// or flush failures not reported before.
    pub async fn close_all(&self) -> Vec<(SensorKind, StorageError)> {
        let writers: Vec<(SensorKind, JoinHandle<io::Result<()>>)> = self
            .slots
            .iter()
            .filter_map(|(kind, slot)| {
                let mut slot = slot.lock();
                slot.queue = None;
                slot.writer.take().map(|writer| (kind, writer))
            })
            .collect();

        let mut failures = Vec::new();
        for (kind, writer) in writers {
            match writer.await {
                Ok(Ok(())) => debug!("Closed {} log ({} rows)", kind, self.rows(kind)),
                Ok(Err(e)) => failures.push((kind, StorageError::Io(e))),
                Err(e) => {
                    error!("{} log writer did not finish: {}", kind, e);
                    *self.slots[kind].lock().counters.failure.lock() = Some(e.to_string());
                    failures.push((
                        kind,
                        StorageError::WriterUnavailable {
                            stream: kind.short_name().to_string(),
                            details: e.to_string(),
                        },
                    ));
                }
            }
        }

        failures
    }

    pub fn is_open(&self, kind: SensorKind) -> bool {
        self.slots[kind].lock().queue.is_some()
    }

    pub fn file_ref(&self, kind: SensorKind) -> Option<FileRef> {
        self.slots[kind].lock().file.clone()
    }

    pub fn dropped(&self, kind: SensorKind) -> u64 {
        self.slots[kind].lock().counters.dropped.load(Ordering::Relaxed)
    }

    fn rows(&self, kind: SensorKind) -> u64 {
        self.slots[kind].lock().counters.rows.load(Ordering::Relaxed)
    }

    /// Summaries for every kind that was opened in this pool. Row counts are
    /// final once `close_all` has returned.
    pub fn summary(&self) -> Vec<StreamSummary> {
        self.slots
            .iter()
            .filter_map(|(kind, slot)| {
                let slot = slot.lock();
                slot.file.as_ref().map(|file| StreamSummary {
                    kind,
                    file: file.clone(),
                    rows: slot.counters.rows.load(Ordering::Relaxed),
                    dropped: slot.counters.dropped.load(Ordering::Relaxed),
                    failure: slot.counters.failure.lock().clone(),
                })
            })
            .collect()
    }
}

/// Writer loop for one kind; runs on the blocking pool until the queue closes
fn drain(
    kind: SensorKind,
    mut receiver: mpsc::Receiver<SensorSample>,
    sink: Box<dyn Write + Send>,
    counters: &StreamCounters,
) -> io::Result<()> {
    let mut writer = BufWriter::new(sink);

    while let Some(sample) = receiver.blocking_recv() {
        if let Err(e) = writer.write_all(sample.to_csv_row().as_bytes()) {
            // Stop intake; whatever is still queued is lost with this row
            receiver.close();
            let mut lost = 1;
            while receiver.try_recv().is_ok() {
                lost += 1;
            }
            counters.dropped.fetch_add(lost, Ordering::Relaxed);
            return Err(counters.fail(kind, e));
        }
        counters.rows.fetch_add(1, Ordering::Relaxed);
    }

    writer.flush().map_err(|e| counters.fail(kind, e))
}
