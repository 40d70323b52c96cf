//! Key/value preferences read at session start and the typed snapshot derived from them.

use crate::config::RecordingConfig;
use crate::sensors::{SamplingHint, SensorKind, SensorTable};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const IMU_RECORDING_KEY: &str = "imu_recording";
pub const SYNC_ENABLED_KEY: &str = "sync_enabled";
pub const SAVE_FRAMES_KEY: &str = "save_frames";
pub const VIDEO_FLASH_KEY: &str = "video_flash";

const DEFAULT_SAMPLE_RATE: u32 = 0;

pub fn sensor_enabled_key(kind: SensorKind) -> String {
    format!("sensor.{}.enabled", kind.short_name())
}

pub fn sensor_rate_key(kind: SensorKind) -> String {
    format!("sensor.{}.sample_rate", kind.short_name())
}

/// Key/value contract of the host's preference storage
pub trait PreferenceStore: Send + Sync {
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_bool(&self, key: &str, value: bool);
    fn set_string(&self, key: &str, value: &str);
}

#[derive(Debug, Clone)]
enum PrefValue {
    Bool(bool),
    Text(String),
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, PrefValue>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.read().get(key) {
            Some(PrefValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.read().get(key) {
            Some(PrefValue::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.values
            .write()
            .insert(key.to_string(), PrefValue::Bool(value));
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values
            .write()
            .insert(key.to_string(), PrefValue::Text(value.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSetting {
    pub enabled: bool,
    pub hint: SamplingHint,
}

/// Immutable view of the preferences taken when a session starts
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub imu_recording: bool,
    pub sync_enabled: bool,
    pub save_frames: bool,
    pub video_flash: bool,
    pub sensors: SensorTable<SensorSetting>,
}

impl RecordingSettings {
    /// Kinds with recording enabled, in declaration order
    pub fn requested_sensors(&self) -> Vec<SensorKind> {
        self.sensors
            .iter()
            .filter(|(_, setting)| setting.enabled)
            .map(|(kind, _)| kind)
            .collect()
    }
}

/// Typed accessors over a [`PreferenceStore`]
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// In-memory preferences seeded from the recording section of the config file
    pub fn from_config(recording: &RecordingConfig, sync_enabled: bool) -> Self {
        let store = MemoryPreferenceStore::new();
        store.set_bool(IMU_RECORDING_KEY, recording.imu_recording);
        store.set_bool(VIDEO_FLASH_KEY, recording.video_flash);
        store.set_bool(SAVE_FRAMES_KEY, recording.save_frames);
        store.set_bool(SYNC_ENABLED_KEY, sync_enabled);

        for (name, preference) in &recording.sensors {
            if let Some(kind) = SensorKind::from_short_name(name) {
                store.set_bool(&sensor_enabled_key(kind), preference.enabled);
                store.set_string(&sensor_rate_key(kind), &preference.sample_rate);
            }
        }

        Self::new(Arc::new(store))
    }

    pub fn is_imu_recording_enabled(&self) -> bool {
        self.store.get_bool(IMU_RECORDING_KEY).unwrap_or(false)
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.store.get_bool(SYNC_ENABLED_KEY).unwrap_or(false)
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        debug!("Setting {} = {}", SYNC_ENABLED_KEY, enabled);
        self.store.set_bool(SYNC_ENABLED_KEY, enabled);
    }

    pub fn is_save_frames_enabled(&self) -> bool {
        self.store.get_bool(SAVE_FRAMES_KEY).unwrap_or(false)
    }

    pub fn is_video_flash_enabled(&self) -> bool {
        self.store.get_bool(VIDEO_FLASH_KEY).unwrap_or(false)
    }

    pub fn is_sensor_enabled(&self, kind: SensorKind) -> bool {
        self.store.get_bool(&sensor_enabled_key(kind)).unwrap_or(true)
    }

    /// Sample-rate hint for `kind`; malformed values fall back to the fastest rate
    pub fn sample_rate(&self, kind: SensorKind) -> SamplingHint {
        let raw = match self.store.get_string(&sensor_rate_key(kind)) {
            Some(raw) => raw,
            None => return SamplingHint(DEFAULT_SAMPLE_RATE),
        };

        match raw.trim().parse::<u32>() {
            Ok(period) => SamplingHint(period),
            Err(_) => {
                warn!("Sample rate for {} has invalid format: {:?}", kind, raw);
                SamplingHint(DEFAULT_SAMPLE_RATE)
            }
        }
    }

    pub fn snapshot(&self) -> RecordingSettings {
        RecordingSettings {
            imu_recording: self.is_imu_recording_enabled(),
            sync_enabled: self.is_sync_enabled(),
            save_frames: self.is_imu_recording_enabled() && self.is_save_frames_enabled(),
            video_flash: self.is_video_flash_enabled(),
            sensors: SensorTable::from_fn(|kind| SensorSetting {
                enabled: self.is_sensor_enabled(kind),
                hint: self.sample_rate(kind),
            }),
        }
    }
}
