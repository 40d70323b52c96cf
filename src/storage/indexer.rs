use super::FileRef;
use tokio::sync::mpsc;
use tracing::trace;

/// Best-effort notification that a new file exists and may be indexed
pub trait MediaIndexer: Send + Sync {
    fn file_created(&self, file: &FileRef);
}

pub struct NoopIndexer;

impl MediaIndexer for NoopIndexer {
    fn file_created(&self, _file: &FileRef) {}
}

/// Queues created files for an external indexing task. Never blocks.
pub struct ChannelIndexer {
    sender: mpsc::UnboundedSender<FileRef>,
}

impl ChannelIndexer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FileRef>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MediaIndexer for ChannelIndexer {
    fn file_created(&self, file: &FileRef) {
        if self.sender.send(file.clone()).is_err() {
            trace!("Index queue closed, skipping notification for {}", file);
        }
    }
}
