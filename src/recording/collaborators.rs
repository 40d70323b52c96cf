use super::SessionStamp;
use crate::sync::SharedSettings;
use async_trait::async_trait;
use std::io;
use tracing::info;

/// Video recording lifecycle the orchestrator wraps
#[async_trait]
pub trait VideoPipeline: Send + Sync {
    /// Whether the active camera pipeline can timestamp frames in the sensor clock domain
    fn supports_sensor_timestamps(&self) -> bool;

    async fn starting_video(&self);
    async fn started_video(&self);
    async fn stopping_video(&self);
    async fn stopped_video(&self);

    async fn apply_settings(&self, _settings: SharedSettings) {}
}

/// Flash synchronization signal emitted while recording
pub trait FlashSignal: Send + Sync {
    fn start_recording(&self, session: &SessionStamp) -> io::Result<()>;
    fn stop_recording(&self);
    fn is_recording(&self) -> bool;
}

/// Video pipeline stand-in that only logs its transitions
pub struct HeadlessVideoPipeline {
    sensor_timestamps: bool,
}

impl HeadlessVideoPipeline {
    pub fn new(sensor_timestamps: bool) -> Self {
        Self { sensor_timestamps }
    }
}

#[async_trait]
impl VideoPipeline for HeadlessVideoPipeline {
    fn supports_sensor_timestamps(&self) -> bool {
        self.sensor_timestamps
    }

    async fn starting_video(&self) {
        info!("Video starting");
    }

    async fn started_video(&self) {
        info!("Video started");
    }

    async fn stopping_video(&self) {
        info!("Video stopping");
    }

    async fn stopped_video(&self) {
        info!("Video stopped");
    }

    async fn apply_settings(&self, settings: SharedSettings) {
        info!("Applying {} shared camera settings", settings.values.len());
    }
}
