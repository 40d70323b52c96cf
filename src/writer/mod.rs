mod pool;

pub use pool::{SensorWriterPool, StreamSummary, WriteOutcome, DEFAULT_QUEUE_CAPACITY};
