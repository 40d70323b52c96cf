use crate::sensors::SensorKind;
use crate::sync::SyncRole;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncRecConfig {
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub sync: SyncConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Plain files under `storage.path`
    Direct,
    /// Documents created through the scoped document provider
    ScopedDocument,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Which storage backend sessions are written to
    #[serde(default = "default_storage_backend")]
    pub backend: StorageMode,

    /// Root directory for the direct backend
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Directory backing the document provider
    #[serde(default = "default_document_root")]
    pub document_root: String,

    /// Granted document tree sessions are created in
    #[serde(default = "default_document_tree")]
    pub document_tree: String,

    /// Persist a JSON summary next to each session's sensor logs
    #[serde(default = "default_write_manifest")]
    pub write_manifest: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorPreference {
    #[serde(default = "default_sensor_enabled")]
    pub enabled: bool,

    /// Sampling period hint in microseconds, string-encoded; "0" is fastest
    #[serde(default = "default_sample_rate")]
    pub sample_rate: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Record sensor logs alongside video
    #[serde(default)]
    pub imu_recording: bool,

    /// Emit the flash synchronization signal while recording
    #[serde(default)]
    pub video_flash: bool,

    /// Save companion frame data with each recording
    #[serde(default)]
    pub save_frames: bool,

    /// Start video even when the sensor configuration is rejected
    #[serde(default)]
    pub allow_video_without_sensors: bool,

    /// Per-sensor settings keyed by short name (accel, gyro, ...)
    #[serde(default = "default_sensors")]
    pub sensors: BTreeMap<String, SensorPreference>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Run a synchronized multi-device session
    #[serde(default)]
    pub enabled: bool,

    /// Role taken by the loopback sync controller
    #[serde(default = "default_sync_role")]
    pub role: SyncRole,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Buffered link-state notifications per subscriber
    #[serde(default = "default_link_event_capacity")]
    pub link_event_capacity: usize,
}

impl SyncRecConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("syncrec.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("storage.backend", "direct")?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.document_root", default_document_root())?
            .set_default("storage.document_tree", default_document_tree())?
            .set_default("storage.write_manifest", default_write_manifest())?
            .set_default("recording.imu_recording", false)?
            .set_default("recording.video_flash", false)?
            .set_default("recording.save_frames", false)?
            .set_default("recording.allow_video_without_sensors", false)?
            .set_default("sync.enabled", false)?
            .set_default("sync.role", "leader")?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.link_event_capacity",
                default_link_event_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("SYNCREC").separator("__"))
            .build()?;

        let config: SyncRecConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Storage path must not be empty".to_string(),
            ));
        }

        if self.storage.backend == StorageMode::ScopedDocument {
            if self.storage.document_root.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Document root must not be empty".to_string(),
                ));
            }
            if self.storage.document_tree.is_empty() || self.storage.document_tree.contains('/') {
                return Err(ConfigError::Message(format!(
                    "Invalid document tree name '{}'",
                    self.storage.document_tree
                )));
            }
        }

        for name in self.recording.sensors.keys() {
            if SensorKind::from_short_name(name).is_none() {
                return Err(ConfigError::Message(format!(
                    "Unknown sensor '{}' in recording.sensors",
                    name
                )));
            }
        }

        if self.sync.role == SyncRole::Inactive {
            return Err(ConfigError::Message(
                "Sync role must be leader or follower".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.link_event_capacity == 0 {
            return Err(ConfigError::Message(
                "Link event capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SyncRecConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: default_storage_backend(),
                path: default_storage_path(),
                document_root: default_document_root(),
                document_tree: default_document_tree(),
                write_manifest: default_write_manifest(),
            },
            recording: RecordingConfig {
                imu_recording: false,
                video_flash: false,
                save_frames: false,
                allow_video_without_sensors: false,
                sensors: default_sensors(),
            },
            sync: SyncConfig {
                enabled: false,
                role: default_sync_role(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                link_event_capacity: default_link_event_capacity(),
            },
        }
    }
}

// Default value functions
fn default_storage_backend() -> StorageMode {
    StorageMode::Direct
}
fn default_storage_path() -> String {
    "./recordings".to_string()
}
fn default_document_root() -> String {
    "./documents".to_string()
}
fn default_document_tree() -> String {
    "recordings".to_string()
}
fn default_write_manifest() -> bool {
    true
}

fn default_sensor_enabled() -> bool {
    true
}
fn default_sample_rate() -> String {
    "0".to_string()
}
fn default_sensors() -> BTreeMap<String, SensorPreference> {
    SensorKind::ALL
        .into_iter()
        .map(|kind| {
            (
                kind.short_name().to_string(),
                SensorPreference {
                    enabled: default_sensor_enabled(),
                    sample_rate: default_sample_rate(),
                },
            )
        })
        .collect()
}

fn default_sync_role() -> SyncRole {
    SyncRole::Leader
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_link_event_capacity() -> usize {
    16
}
