use super::*;
use crate::error::{SessionError, SyncRecError};
use crate::events::{EventBus, Notice, NoticeLevel, SyncRecEvent};
use crate::preferences::{
    sensor_enabled_key, sensor_rate_key, MemoryPreferenceStore, PreferenceStore, Preferences,
    IMU_RECORDING_KEY, SYNC_ENABLED_KEY, VIDEO_FLASH_KEY,
};
use crate::sensors::{SamplingHint, SensorCaptureManager, SensorKind, SensorSample, SimulatedHardware};
use crate::storage::{DirectStorage, NoopIndexer, StorageBackend};
use crate::sync::{
    HotspotState, LinkEvent, LinkStateSource, LinkWatchState, LoopbackSyncProtocol, NetworkType,
    SharedSettings, SyncRole,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct FakeVideo {
    no_sensor_timestamps: bool,
    calls: Mutex<Vec<&'static str>>,
    applied: Mutex<Vec<SharedSettings>>,
}

impl FakeVideo {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl VideoPipeline for FakeVideo {
    fn supports_sensor_timestamps(&self) -> bool {
        !self.no_sensor_timestamps
    }

    async fn starting_video(&self) {
        self.calls.lock().push("starting");
    }

    async fn started_video(&self) {
        self.calls.lock().push("started");
    }

    async fn stopping_video(&self) {
        self.calls.lock().push("stopping");
    }

    async fn stopped_video(&self) {
        self.calls.lock().push("stopped");
    }

    async fn apply_settings(&self, settings: SharedSettings) {
        self.applied.lock().push(settings);
    }
}

#[derive(Default)]
struct FakeFlash {
    fail: bool,
    recording: AtomicBool,
    stops: Mutex<u32>,
}

impl FlashSignal for FakeFlash {
    fn start_recording(&self, _session: &SessionStamp) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "torch busy"));
        }
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        *self.stops.lock() += 1;
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    store: Arc<MemoryPreferenceStore>,
    hardware: Arc<SimulatedHardware>,
    video: Arc<FakeVideo>,
    flash: Arc<FakeFlash>,
    protocol: Arc<LoopbackSyncProtocol>,
    links: LinkStateSource,
    app: Arc<AppLifecycle>,
    events: broadcast::Receiver<SyncRecEvent>,
    orchestrator: RecordingOrchestrator,
}

struct HarnessOptions {
    present: Vec<SensorKind>,
    video: FakeVideo,
    flash: FakeFlash,
    role: SyncRole,
    policy: SessionPolicy,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            present: SensorKind::ALL.to_vec(),
            video: FakeVideo::default(),
            flash: FakeFlash::default(),
            role: SyncRole::Leader,
            policy: SessionPolicy {
                allow_video_without_sensors: false,
                write_manifest: true,
            },
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("recordings");

    let store = Arc::new(MemoryPreferenceStore::new());
    store.set_bool(IMU_RECORDING_KEY, true);

    let hardware = Arc::new(SimulatedHardware::new(options.present));
    let video = Arc::new(options.video);
    let flash = Arc::new(options.flash);
    let protocol = Arc::new(LoopbackSyncProtocol::new(options.role));
    let links = LinkStateSource::new(16);
    let app = Arc::new(AppLifecycle::new());
    let bus = Arc::new(EventBus::new(256));
    let events = bus.subscribe();

    let orchestrator = RecordingOrchestrator::builder()
        .with_preferences(Preferences::new(store.clone()))
        .with_policy(options.policy)
        .with_capture(Arc::new(SensorCaptureManager::new(hardware.clone())))
        .with_storage(Arc::new(DirectStorage::new(&root, Arc::new(NoopIndexer))))
        .with_video(video.clone())
        .with_flash(flash.clone())
        .with_sync_protocol(protocol.clone())
        .with_link_source(links.clone())
        .with_app_lifecycle(app.clone())
        .with_event_bus(bus)
        .build()
        .unwrap();

    Harness {
        _dir: dir,
        root,
        store,
        hardware,
        video,
        flash,
        protocol,
        links,
        app,
        events,
        orchestrator,
    }
}

impl Harness {
    /// Enable recording for exactly `kinds`
    fn select(&self, kinds: &[(SensorKind, &str)]) {
        for kind in SensorKind::ALL {
            self.store.set_bool(&sensor_enabled_key(kind), false);
        }
        for (kind, rate) in kinds {
            self.store.set_bool(&sensor_enabled_key(*kind), true);
            self.store.set_string(&sensor_rate_key(*kind), rate);
        }
    }

    fn notices(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let SyncRecEvent::Notice(notice) = event {
                notices.push(notice);
            }
        }
        notices
    }

    /// Wait for the next notice, skipping other events
    async fn next_notice(&mut self) -> Notice {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                match events.recv().await {
                    Ok(SyncRecEvent::Notice(notice)) => return notice,
                    Ok(_) => continue,
                    Err(e) => panic!("event bus failed: {}", e),
                }
            }
        })
        .await
        .expect("no notice was raised")
    }

    fn session_dir(&self, stamp: &SessionStamp) -> std::path::PathBuf {
        self.root.join(stamp.id())
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

fn sample(kind: SensorKind, timestamp_ns: i64) -> SensorSample {
    let values = (0..kind.axis_count()).map(|axis| axis as f32 + 0.5).collect();
    SensorSample::new(kind, values, timestamp_ns)
}

#[tokio::test]
async fn test_accel_gyro_round_trip() {
    let h = harness(HarnessOptions::default());
    h.select(&[
        (SensorKind::Accelerometer, "50"),
        (SensorKind::Gyroscope, "0"),
    ]);

    let stamp = SessionStamp::now();
    let report = h.orchestrator.start_session(stamp).await.unwrap();
    assert_eq!(
        report.recording,
        vec![SensorKind::Accelerometer, SensorKind::Gyroscope]
    );
    assert_eq!(report.notices, 0);
    assert_eq!(
        h.hardware.registered_hint(SensorKind::Accelerometer),
        Some(SamplingHint(50))
    );
    assert_eq!(
        h.hardware.registered_hint(SensorKind::Gyroscope),
        Some(SamplingHint::FASTEST)
    );

    for i in 1..=10 {
        assert!(h.hardware.emit(&sample(SensorKind::Accelerometer, i * 1_000)));
        assert!(h.hardware.emit(&sample(SensorKind::Gyroscope, i * 1_000 + 7)));
    }

    let summary = h
        .orchestrator
        .stop_session(StopCause::User)
        .await
        .unwrap()
        .unwrap();

    for kind in [SensorKind::Accelerometer, SensorKind::Gyroscope] {
        let path = h
            .session_dir(&stamp)
            .join(format!("{}_{}.csv", stamp.id(), kind.short_name()));
        let rows = read_rows(&path);
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|row| row.len() == 4));

        let timestamps: Vec<i64> = rows.iter().map(|row| row[3].parse().unwrap()).collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));

        let stream = summary.stream(kind).unwrap();
        assert_eq!(stream.rows, 10);
        assert_eq!(stream.dropped, 0);
        assert!(stream.failure.is_none());
    }

    assert!(h.hardware.registered_kinds().is_empty());
    assert_eq!(h.video.calls(), vec!["starting", "started", "stopping", "stopped"]);
}

#[tokio::test]
async fn test_unavailable_sensor_gets_one_notice_and_no_file() {
    let mut h = harness(HarnessOptions {
        present: vec![SensorKind::Accelerometer],
        ..HarnessOptions::default()
    });
    h.select(&[
        (SensorKind::Accelerometer, "0"),
        (SensorKind::Barometer, "0"),
    ]);

    let stamp = SessionStamp::now();
    let report = h.orchestrator.start_session(stamp).await.unwrap();
    assert_eq!(report.requested.len(), 2);
    assert_eq!(report.recording, vec![SensorKind::Accelerometer]);
    assert_eq!(report.notices, 1);

    let notices = h.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Toast);
    assert!(notices[0].message.contains("Barometer"));

    h.orchestrator.stop_session(StopCause::User).await.unwrap();

    let baro = h
        .session_dir(&stamp)
        .join(format!("{}_baro.csv", stamp.id()));
    assert!(!baro.exists());
    assert!(h
        .session_dir(&stamp)
        .join(format!("{}_accel.csv", stamp.id()))
        .exists());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = harness(HarnessOptions::default());
    h.store.set_bool(VIDEO_FLASH_KEY, true);
    h.select(&[(SensorKind::Gyroscope, "0")]);

    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert!(h.orchestrator.stop_session(StopCause::User).await.unwrap().is_some());
    let events_after_first = h.notices().len();

    assert!(h.orchestrator.stop_session(StopCause::User).await.unwrap().is_none());
    assert_eq!(h.notices().len(), 0);
    assert_eq!(events_after_first, 0);
    assert_eq!(*h.flash.stops.lock(), 1);
    assert_eq!(h.video.calls(), vec!["starting", "started", "stopping", "stopped"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_write_after_stop_under_concurrent_delivery() {
    let h = harness(HarnessOptions::default());
    h.select(&[
        (SensorKind::Accelerometer, "0"),
        (SensorKind::Gyroscope, "0"),
    ]);

    let stamp = SessionStamp::now();
    h.orchestrator.start_session(stamp).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut feeders = Vec::new();
    for kind in [SensorKind::Accelerometer, SensorKind::Gyroscope] {
        let hardware = h.hardware.clone();
        let stop = stop.clone();
        feeders.push(std::thread::spawn(move || {
            let mut timestamp = 0;
            while !stop.load(Ordering::SeqCst) {
                timestamp += 1;
                hardware.emit(&sample(kind, timestamp));
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    h.orchestrator.stop_session(StopCause::User).await.unwrap();

    let paths: Vec<_> = ["accel", "gyro"]
        .iter()
        .map(|name| h.session_dir(&stamp).join(format!("{}_{}.csv", stamp.id(), name)))
        .collect();
    let sizes: Vec<u64> = paths
        .iter()
        .map(|path| std::fs::metadata(path).unwrap().len())
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.store(true, Ordering::SeqCst);
    for feeder in feeders {
        feeder.join().unwrap();
    }

    let after: Vec<u64> = paths
        .iter()
        .map(|path| std::fs::metadata(path).unwrap().len())
        .collect();
    assert_eq!(sizes, after);
    assert!(sizes.iter().all(|size| *size > 0));
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let mut h = harness(HarnessOptions::default());
    h.select(&[(SensorKind::Gyroscope, "0")]);

    let first = SessionStamp::now();
    h.orchestrator.start_session(first).await.unwrap();

    let second = SessionStamp::new(first.started_at() + chrono::Duration::seconds(1));
    match h.orchestrator.start_session(second).await {
        Err(SyncRecError::SessionActive { id }) => assert_eq!(id, first.id()),
        other => panic!("Expected SessionActive, got {:?}", other.map(|r| r.session_id)),
    }

    assert!(h.orchestrator.is_session_active());
    assert_eq!(
        h.orchestrator.recording_sensors(),
        vec![SensorKind::Gyroscope]
    );
    assert!(!h.session_dir(&second).exists());
    // Hosts tell the user about a rejected start themselves
    assert!(h.notices().is_empty());
}

#[tokio::test]
async fn test_camera_mode_mismatch_blocks_sensor_capture() {
    let mut h = harness(HarnessOptions {
        video: FakeVideo {
            no_sensor_timestamps: true,
            ..FakeVideo::default()
        },
        ..HarnessOptions::default()
    });
    h.select(&[(SensorKind::Accelerometer, "0")]);

    let result = h.orchestrator.start_session(SessionStamp::now()).await;
    assert!(matches!(
        result,
        Err(SyncRecError::Session(SessionError::Configuration { .. }))
    ));
    assert!(!h.orchestrator.is_session_active());
    assert!(h.hardware.registered_kinds().is_empty());
    assert!(h.video.calls().is_empty());
    assert_eq!(h.notices().len(), 1);
}

#[tokio::test]
async fn test_policy_allows_video_without_sensors() {
    let mut h = harness(HarnessOptions {
        video: FakeVideo {
            no_sensor_timestamps: true,
            ..FakeVideo::default()
        },
        policy: SessionPolicy {
            allow_video_without_sensors: true,
            write_manifest: false,
        },
        ..HarnessOptions::default()
    });
    h.select(&[(SensorKind::Accelerometer, "0")]);

    let report = h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert!(report.recording.is_empty());
    assert_eq!(report.notices, 1);
    assert_eq!(h.video.calls(), vec!["starting", "started"]);
    assert_eq!(h.notices().len(), 1);

    let summary = h
        .orchestrator
        .stop_session(StopCause::User)
        .await
        .unwrap()
        .unwrap();
    assert!(summary.streams.is_empty());
}

#[tokio::test]
async fn test_empty_sensor_selection_is_a_configuration_error() {
    let h = harness(HarnessOptions::default());
    h.select(&[]);

    let result = h.orchestrator.start_session(SessionStamp::now()).await;
    assert!(matches!(
        result,
        Err(SyncRecError::Session(SessionError::Configuration { .. }))
    ));
}

#[tokio::test]
async fn test_video_only_when_sensor_recording_is_off() {
    let h = harness(HarnessOptions::default());
    h.store.set_bool(IMU_RECORDING_KEY, false);

    let report = h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert!(report.requested.is_empty());
    assert!(h.hardware.registered_kinds().is_empty());
    assert_eq!(h.video.calls(), vec!["starting", "started"]);
}

#[tokio::test]
async fn test_flash_failure_is_not_fatal() {
    let mut h = harness(HarnessOptions {
        flash: FakeFlash {
            fail: true,
            ..FakeFlash::default()
        },
        ..HarnessOptions::default()
    });
    h.store.set_bool(VIDEO_FLASH_KEY, true);
    h.select(&[(SensorKind::Gyroscope, "0")]);

    let report = h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert_eq!(report.recording, vec![SensorKind::Gyroscope]);
    assert_eq!(report.notices, 1);

    let notices = h.notices();
    assert_eq!(notices.len(), 1);
    assert!(!notices[0].message.contains("torch busy"));

    h.orchestrator.stop_session(StopCause::User).await.unwrap();
    assert_eq!(*h.flash.stops.lock(), 0);
}

#[tokio::test]
async fn test_flash_stopped_elsewhere_is_left_alone() {
    let h = harness(HarnessOptions::default());
    h.store.set_bool(VIDEO_FLASH_KEY, true);
    h.select(&[(SensorKind::Gyroscope, "0")]);

    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert!(h.flash.is_recording());

    // e.g. the torch was claimed by another app mid-session
    h.flash.recording.store(false, Ordering::SeqCst);
    h.orchestrator.stop_session(StopCause::User).await.unwrap();
    assert_eq!(*h.flash.stops.lock(), 0);
}

#[tokio::test]
async fn test_storage_failure_isolated_to_one_kind() {
    struct FailingGyro(DirectStorage);

    impl StorageBackend for FailingGyro {
        fn open(
            &self,
            stream: &str,
            extension: &str,
            session: &SessionStamp,
        ) -> std::result::Result<crate::storage::OutputStream, crate::error::StorageError> {
            if stream == "gyro" {
                return Err(crate::error::StorageError::DescriptorUnavailable {
                    uri: "content://syncrec.documents/tree/x/document/gyro.csv".to_string(),
                });
            }
            self.0.open(stream, extension, session)
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    let mut h = harness(HarnessOptions::default());
    h.orchestrator.set_storage_backend(Arc::new(FailingGyro(DirectStorage::new(
        &h.root,
        Arc::new(NoopIndexer),
    ))));
    h.select(&[
        (SensorKind::Accelerometer, "0"),
        (SensorKind::Gyroscope, "0"),
    ]);

    let report = h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    assert_eq!(report.recording, vec![SensorKind::Accelerometer]);
    assert!(!h.hardware.is_registered(SensorKind::Gyroscope));

    let notices = h.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Couldn't save Gyroscope data");
}

#[tokio::test]
async fn test_manifest_and_last_session_files() {
    let h = harness(HarnessOptions::default());
    h.select(&[(SensorKind::Magnetic, "0")]);

    let stamp = SessionStamp::now();
    h.orchestrator.start_session(stamp).await.unwrap();
    h.hardware.emit(&sample(SensorKind::Magnetic, 5));
    h.orchestrator.stop_session(StopCause::User).await.unwrap();

    let manifest = h
        .session_dir(&stamp)
        .join(format!("{}_session.json", stamp.id()));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(manifest).unwrap()).unwrap();
    assert_eq!(json["session_id"], stamp.id());
    assert_eq!(json["cause"], "User");
    assert_eq!(json["streams"][0]["rows"], 1);

    let files = h.orchestrator.last_session_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, SensorKind::Magnetic);
    assert!(files[0].1.path.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_sync_start_failure_disables_feature() {
    let mut h = harness(HarnessOptions::default());
    h.store.set_bool(SYNC_ENABLED_KEY, true);
    h.protocol.set_network_available(false);

    let result = h.orchestrator.start_sync_session().await;
    assert!(matches!(
        result,
        Err(SyncRecError::Session(SessionError::ProtocolUnavailable { .. }))
    ));
    assert_eq!(h.store.get_bool(SYNC_ENABLED_KEY), Some(false));
    assert_eq!(h.orchestrator.watchdog().state(), LinkWatchState::Idle);

    let notices = h.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Alert);
}

#[tokio::test]
async fn test_leader_link_loss_tears_down_session() {
    let mut h = harness(HarnessOptions::default());
    h.store.set_bool(SYNC_ENABLED_KEY, true);
    h.select(&[(SensorKind::Accelerometer, "0")]);

    assert_eq!(h.orchestrator.start_sync_session().await.unwrap(), SyncRole::Leader);
    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    h.notices();

    // Unrelated notifications are ignored
    h.links.publish(LinkEvent::ConnectivityChanged { active: None });
    h.links
        .publish(LinkEvent::HotspotStateChanged(HotspotState::Disabling));
    let notice = h.next_notice().await;
    assert_eq!(notice.level, NoticeLevel::Alert);
    assert_eq!(notice.title, "Hotspot was stopped");

    assert!(!h.orchestrator.is_session_active());
    assert_eq!(h.orchestrator.sync_role(), SyncRole::Inactive);
    assert_eq!(h.store.get_bool(SYNC_ENABLED_KEY), Some(false));
    assert!(h.hardware.registered_kinds().is_empty());
    assert_eq!(h.orchestrator.watchdog().state(), LinkWatchState::Idle);
    assert!(h.protocol.last_controller().unwrap().is_closed());
    assert!(h.notices().is_empty());

    // Repeated notifications after teardown raise nothing
    h.links
        .publish(LinkEvent::HotspotStateChanged(HotspotState::Disabled));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.notices().is_empty());
}

#[tokio::test]
async fn test_follower_link_loss_tears_down_session() {
    let mut h = harness(HarnessOptions {
        role: SyncRole::Follower,
        ..HarnessOptions::default()
    });
    h.store.set_bool(SYNC_ENABLED_KEY, true);
    h.select(&[(SensorKind::Gyroscope, "0")]);

    assert_eq!(h.orchestrator.start_sync_session().await.unwrap(), SyncRole::Follower);
    assert!(!h.orchestrator.local_trigger_allowed());
    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    h.notices();

    h.links.publish(LinkEvent::ConnectivityChanged {
        active: Some(NetworkType::Wifi),
    });
    h.links.publish(LinkEvent::ConnectivityChanged {
        active: Some(NetworkType::Cellular),
    });
    let notice = h.next_notice().await;
    assert_eq!(notice.title, "Wi-Fi was stopped");

    assert!(!h.orchestrator.is_session_active());
    assert_eq!(h.store.get_bool(SYNC_ENABLED_KEY), Some(false));
    assert!(h.orchestrator.local_trigger_allowed());
    assert!(h.notices().is_empty());
}

#[tokio::test]
async fn test_stale_link_loss_is_ignored_after_restart() {
    let mut h = harness(HarnessOptions::default());
    h.orchestrator.start_sync_session().await.unwrap();
    let first = h.orchestrator.sync_generation().unwrap();

    h.orchestrator.start_sync_session().await.unwrap();
    let second = h.orchestrator.sync_generation().unwrap();
    assert!(second > first);
    h.notices();

    assert!(!h.orchestrator.handle_link_lost(SyncRole::Leader, first).await);
    assert_eq!(h.orchestrator.sync_role(), SyncRole::Leader);
    assert!(h.notices().is_empty());

    assert!(h.orchestrator.handle_link_lost(SyncRole::Leader, second).await);
    assert_eq!(h.orchestrator.sync_role(), SyncRole::Inactive);
    assert_eq!(h.orchestrator.watchdog().state(), LinkWatchState::Idle);
}

#[tokio::test]
async fn test_rearm_after_stop_follows_app_state() {
    let h = harness(HarnessOptions::default());
    h.select(&[(SensorKind::Gyroscope, "0")]);
    h.orchestrator.start_sync_session().await.unwrap();
    let controller = h.protocol.last_controller().unwrap();

    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    h.orchestrator.stop_session(StopCause::RemoteLeader).await.unwrap();
    assert_eq!(controller.preparations(), 1);

    h.app.set_settings_active(true);
    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    h.orchestrator.stop_session(StopCause::RemoteLeader).await.unwrap();
    assert_eq!(controller.preparations(), 1);

    h.app.set_settings_active(false);
    controller.set_preparation_needed(false);
    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();
    h.orchestrator.stop_session(StopCause::User).await.unwrap();
    assert_eq!(controller.preparations(), 1);
}

#[tokio::test]
async fn test_camera_opened_applies_pending_settings() {
    let h = harness(HarnessOptions {
        role: SyncRole::Follower,
        ..HarnessOptions::default()
    });
    h.orchestrator.camera_opened().await;
    assert!(h.video.applied.lock().is_empty());

    h.orchestrator.start_sync_session().await.unwrap();
    let controller = h.protocol.last_controller().unwrap();
    let mut settings = SharedSettings::default();
    settings
        .values
        .insert("exposure".to_string(), "8000000".to_string());
    controller.queue_settings(settings.clone());

    h.orchestrator.camera_opened().await;
    assert_eq!(controller.preparations(), 1);
    assert_eq!(*h.video.applied.lock(), vec![settings]);

    h.orchestrator.camera_opened().await;
    assert_eq!(h.video.applied.lock().len(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let h = harness(HarnessOptions::default());
    h.select(&[(SensorKind::Gyroscope, "0")]);
    h.orchestrator.start_sync_session().await.unwrap();
    h.orchestrator.start_session(SessionStamp::now()).await.unwrap();

    h.orchestrator.shutdown().await.unwrap();
    assert!(!h.orchestrator.is_session_active());
    assert_eq!(h.orchestrator.sync_role(), SyncRole::Inactive);
    assert_eq!(h.orchestrator.watchdog().state(), LinkWatchState::Idle);
    // Shutdown never re-arms
    assert_eq!(h.protocol.last_controller().unwrap().preparations(), 0);
}

#[test]
fn test_builder_requires_collaborators() {
    let result = RecordingOrchestrator::builder().build();
    assert!(matches!(result, Err(SyncRecError::Component { .. })));
}

#[test]
fn test_session_id_format() {
    use chrono::TimeZone;
    let at = chrono::Utc
        .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
        .unwrap()
        + chrono::Duration::milliseconds(42);
    assert_eq!(SessionStamp::new(at).id(), "20240309_140507_042");
}

/// Video pipeline whose hooks call back into the orchestrator
#[derive(Default)]
struct ReentrantVideo {
    orchestrator: std::sync::OnceLock<RecordingOrchestrator>,
    stop_while_starting: bool,
    observed: Mutex<Vec<(&'static str, bool, SyncRole)>>,
}

impl ReentrantVideo {
    fn observe(&self, hook: &'static str) {
        if let Some(orchestrator) = self.orchestrator.get() {
            self.observed.lock().push((
                hook,
                orchestrator.is_session_active(),
                orchestrator.sync_role(),
            ));
        }
    }

    fn observed(&self) -> Vec<(&'static str, bool, SyncRole)> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl VideoPipeline for ReentrantVideo {
    fn supports_sensor_timestamps(&self) -> bool {
        true
    }

    async fn starting_video(&self) {
        self.observe("starting");
        if self.stop_while_starting {
            if let Some(orchestrator) = self.orchestrator.get() {
                orchestrator.stop_session(StopCause::User).await.unwrap();
            }
        }
    }

    async fn started_video(&self) {
        self.observe("started");
    }

    async fn stopping_video(&self) {
        self.observe("stopping");
    }

    async fn stopped_video(&self) {
        self.observe("stopped");
    }

    async fn apply_settings(&self, _settings: SharedSettings) {
        self.observe("apply");
    }
}

fn reentrant_orchestrator(
    role: SyncRole,
    stop_while_starting: bool,
) -> (tempfile::TempDir, Arc<ReentrantVideo>, Arc<LoopbackSyncProtocol>, RecordingOrchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let video = Arc::new(ReentrantVideo {
        stop_while_starting,
        ..ReentrantVideo::default()
    });
    let protocol = Arc::new(LoopbackSyncProtocol::new(role));
    let hardware = Arc::new(SimulatedHardware::with_all_sensors());

    let orchestrator = RecordingOrchestrator::builder()
        .with_preferences(Preferences::new(Arc::new(MemoryPreferenceStore::new())))
        .with_capture(Arc::new(SensorCaptureManager::new(hardware)))
        .with_storage(Arc::new(DirectStorage::new(dir.path(), Arc::new(NoopIndexer))))
        .with_video(video.clone())
        .with_sync_protocol(protocol.clone())
        .with_link_source(LinkStateSource::new(8))
        .with_event_bus(Arc::new(EventBus::new(64)))
        .build()
        .unwrap();
    assert!(video.orchestrator.set(orchestrator.clone()).is_ok());

    (dir, video, protocol, orchestrator)
}

#[tokio::test]
async fn test_hooks_may_query_orchestrator() {
    let (_dir, video, protocol, orchestrator) = reentrant_orchestrator(SyncRole::Follower, false);
    let deadline = Duration::from_secs(2);

    orchestrator.start_sync_session().await.unwrap();
    protocol
        .last_controller()
        .unwrap()
        .queue_settings(SharedSettings::default());

    tokio::time::timeout(deadline, orchestrator.camera_opened())
        .await
        .expect("camera_opened blocked on a nested query");
    tokio::time::timeout(deadline, orchestrator.start_session(SessionStamp::now()))
        .await
        .expect("start_session blocked on a nested query")
        .unwrap();
    tokio::time::timeout(deadline, orchestrator.stop_session(StopCause::User))
        .await
        .expect("stop_session blocked on a nested query")
        .unwrap();

    let follower = SyncRole::Follower;
    assert_eq!(
        video.observed(),
        vec![
            ("apply", false, follower),
            ("starting", true, follower),
            ("started", true, follower),
            ("stopping", false, follower),
            ("stopped", false, follower),
        ]
    );
}

#[tokio::test]
async fn test_session_stopped_from_start_hook() {
    let (_dir, video, _protocol, orchestrator) = reentrant_orchestrator(SyncRole::Leader, true);

    tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.start_session(SessionStamp::now()),
    )
    .await
    .expect("start_session blocked on a nested stop")
    .unwrap();

    assert!(!orchestrator.is_session_active());
    assert!(orchestrator.stop_session(StopCause::User).await.unwrap().is_none());

    let inactive = SyncRole::Inactive;
    assert_eq!(
        video.observed(),
        vec![
            ("starting", true, inactive),
            ("stopping", false, inactive),
            ("stopped", false, inactive),
            ("started", false, inactive),
        ]
    );
}
