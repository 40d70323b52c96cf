use super::collaborators::{FlashSignal, VideoPipeline};
use super::policy::{should_prepare_next, AppLifecycle, RearmInputs};
use super::session::{RecordingSession, SessionReport, SessionStamp, SessionSummary, StopCause};
use crate::error::{Result, SessionError, SyncRecError};
use crate::events::{EventBus, SyncRecEvent};
use crate::preferences::{Preferences, RecordingSettings};
use crate::sensors::{SensorCaptureManager, SensorKind};
use crate::storage::{FileRef, StorageBackend};
use crate::sync::{
    LinkLossHandler, LinkStateSource, NetworkLinkWatchdog, SyncController, SyncProtocol, SyncRole,
};
use crate::writer::SensorWriterPool;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::error::Error as _;
use std::io::Write;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Caller policy for session starts
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicy {
    /// Start video even when sensor configuration is rejected
    pub allow_video_without_sensors: bool,
    /// Persist a JSON summary through the session's storage backend
    pub write_manifest: bool,
}

struct SyncSession {
    controller: Arc<dyn SyncController>,
    role: SyncRole,
    generation: u64,
}

/// A start that has claimed the session slot but is not live yet
struct PendingStart {
    ticket: u64,
    id: String,
}

/// Orchestrator state. The lock is never held across an await, so
/// collaborators may call back into the orchestrator from any hook.
#[derive(Default)]
struct State {
    session: Option<RecordingSession>,
    starting: Option<PendingStart>,
    next_ticket: u64,
    sync: Option<SyncSession>,
    sync_generation: u64,
}

impl State {
    fn sync_controller(&self) -> Option<Arc<dyn SyncController>> {
        self.sync.as_ref().map(|sync| Arc::clone(&sync.controller))
    }
}

/// Releases the session slot if a start is abandoned before it goes live
struct StartReservation<'a> {
    state: &'a Mutex<State>,
    ticket: u64,
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.starting.as_ref().map(|pending| pending.ticket) == Some(self.ticket) {
            state.starting = None;
        }
    }
}

struct Inner {
    prefs: Preferences,
    policy: SessionPolicy,
    capture: Arc<SensorCaptureManager>,
    backend: RwLock<Arc<dyn StorageBackend>>,
    video: Arc<dyn VideoPipeline>,
    flash: Option<Arc<dyn FlashSignal>>,
    sync_protocol: Arc<dyn SyncProtocol>,
    watchdog: NetworkLinkWatchdog,
    app: Arc<AppLifecycle>,
    events: Arc<EventBus>,
    state: Mutex<State>,
    last_files: Mutex<Vec<(SensorKind, FileRef)>>,
}

/// Sequences sensor capture, flash signalling and video for one session at a
/// time, and owns the synchronized session together with its link watchdog.
#[derive(Clone)]
pub struct RecordingOrchestrator {
    inner: Arc<Inner>,
}

struct WatchdogBridge {
    inner: Weak<Inner>,
}

#[async_trait]
impl LinkLossHandler for WatchdogBridge {
    async fn on_link_lost(&self, role: SyncRole, generation: u64) {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.handle_link_lost(role, generation).await;
            }
            None => debug!("Orchestrator gone, ignoring link loss"),
        }
    }
}

fn cause_chain(err: &SessionError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

impl RecordingOrchestrator {
    pub fn builder() -> RecordingOrchestratorBuilder {
        RecordingOrchestratorBuilder::default()
    }

    /// Start a recording session named after `stamp`.
    ///
    /// Rejected with [`SyncRecError::SessionActive`] while another session is
    /// live or starting. That rejection publishes no notice; hosts that let
    /// the user trigger a start should tell the user themselves.
    pub async fn start_session(&self, stamp: SessionStamp) -> Result<SessionReport> {
        self.inner.start_session(stamp).await
    }

    /// Stop the live session. Returns `None` when there was nothing to stop.
    pub async fn stop_session(&self, cause: StopCause) -> Result<Option<SessionSummary>> {
        self.inner.stop_session(cause).await
    }

    pub fn is_session_active(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// Kinds currently writing to a log, empty when no session is live
    pub fn recording_sensors(&self) -> Vec<SensorKind> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|session| session.recording.clone())
            .unwrap_or_default()
    }

    /// Files produced by the last finished session
    pub fn last_session_files(&self) -> Vec<(SensorKind, FileRef)> {
        self.inner.last_files.lock().clone()
    }

    /// Replace the storage backend. Applies from the next session on.
    pub fn set_storage_backend(&self, backend: Arc<dyn StorageBackend>) {
        info!("Storage backend switched to {}", backend.name());
        *self.inner.backend.write() = backend;
    }

    /// Start a synchronized session, tearing down a running one first
    pub async fn start_sync_session(&self) -> Result<SyncRole> {
        self.inner.start_sync_session().await
    }

    /// Returns false if no synchronized session was running
    pub async fn stop_sync_session(&self) -> bool {
        self.inner.teardown_sync().await
    }

    pub fn sync_role(&self) -> SyncRole {
        self.inner
            .state
            .lock()
            .sync
            .as_ref()
            .map(|sync| sync.role)
            .unwrap_or(SyncRole::Inactive)
    }

    /// Local capture controls are suppressed on followers
    pub fn local_trigger_allowed(&self) -> bool {
        self.sync_role() != SyncRole::Follower
    }

    /// Camera became available: prepare the next synchronized recording if
    /// asked to, then apply settings shared by the leader.
    pub async fn camera_opened(&self) {
        let controller = self.inner.state.lock().sync_controller();
        let Some(controller) = controller else {
            return;
        };

        if controller.is_video_preparation_needed() {
            controller.prepare_video_recording().await;
            self.inner.events.publish(SyncRecEvent::RecordingPrepared).await;
        }

        if let Some(settings) = controller.take_pending_settings() {
            self.inner.video.apply_settings(settings).await;
        }
    }

    /// Entry point used by the link watchdog; public so hosts can report
    /// link loss detected elsewhere.
    pub async fn handle_link_lost(&self, role: SyncRole, generation: u64) -> bool {
        self.inner.handle_link_lost(role, generation).await
    }

    /// Generation of the running synchronized session, if any
    pub fn sync_generation(&self) -> Option<u64> {
        self.inner
            .state
            .lock()
            .sync
            .as_ref()
            .map(|sync| sync.generation)
    }

    pub fn watchdog(&self) -> &NetworkLinkWatchdog {
        &self.inner.watchdog
    }

    /// Stop any live session and the synchronized session
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_session(StopCause::Shutdown).await?;
        self.stop_sync_session().await;
        info!("Recording orchestrator shut down");
        Ok(())
    }
}

impl Inner {
    async fn report(&self, err: &SessionError) {
        warn!("{}", cause_chain(err));
        self.events.publish(SyncRecEvent::Notice(err.notice())).await;
    }

    /// Kinds to record, or why sensor capture cannot run with these settings
    fn check_sensor_configuration(
        &self,
        settings: &RecordingSettings,
    ) -> std::result::Result<Vec<SensorKind>, SessionError> {
        if !self.video.supports_sensor_timestamps() {
            return Err(SessionError::Configuration {
                reason: "Camera pipeline can't record in sync with sensors".to_string(),
            });
        }

        let requested = settings.requested_sensors();
        if requested.is_empty() {
            return Err(SessionError::Configuration {
                reason: "Requested sensor recording but no sensors were enabled".to_string(),
            });
        }

        Ok(requested)
    }

    async fn start_sensor_capture(
        &self,
        session: &mut RecordingSession,
        settings: &RecordingSettings,
    ) -> usize {
        let mut notices = 0;
        let mut enabled = Vec::new();

        for &kind in &session.requested {
            if self.capture.enable_sensor(kind, settings.sensors[kind].hint) {
                enabled.push(kind);
            } else {
                self.report(&SessionError::SensorUnavailable(kind)).await;
                notices += 1;
            }
        }

        let pool = Arc::new(SensorWriterPool::new());
        for kind in enabled {
            match pool.open(kind, session.backend.as_ref(), &session.stamp) {
                Ok(()) => session.recording.push(kind),
                Err(source) => {
                    self.capture.disable_sensor(kind);
                    self.report(&SessionError::Storage { kind, source }).await;
                    notices += 1;
                }
            }
        }

        if !session.recording.is_empty() {
            self.capture.start_recording(Arc::clone(&pool));
            session.pool = Some(pool);
        }

        notices
    }

    /// Claim the session slot for `stamp`, or name the session holding it
    fn reserve_start(&self, stamp: &SessionStamp) -> std::result::Result<StartReservation<'_>, String> {
        let mut state = self.state.lock();
        let holder = match (&state.session, &state.starting) {
            (Some(live), _) => Some(live.stamp.id()),
            (None, Some(pending)) => Some(pending.id.clone()),
            (None, None) => None,
        };
        if let Some(id) = holder {
            warn!("Rejecting session {}: {} is still live", stamp, id);
            return Err(id);
        }

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.starting = Some(PendingStart {
            ticket,
            id: stamp.id(),
        });
        Ok(StartReservation {
            state: &self.state,
            ticket,
        })
    }

    async fn start_session(&self, stamp: SessionStamp) -> Result<SessionReport> {
        let reservation = self
            .reserve_start(&stamp)
            .map_err(|id| SyncRecError::SessionActive { id })?;

        let settings = self.prefs.snapshot();
        let backend = Arc::clone(&*self.backend.read());
        let mut session = RecordingSession::new(stamp, backend);
        let mut notices = 0;

        if settings.imu_recording {
            match self.check_sensor_configuration(&settings) {
                Ok(requested) => {
                    info!("Starting video with sensor recording");
                    session.requested = requested;
                    notices += self.start_sensor_capture(&mut session, &settings).await;
                }
                Err(err) => {
                    self.report(&err).await;
                    if !self.policy.allow_video_without_sensors {
                        return Err(err.into());
                    }
                    notices += 1;
                }
            }
        }

        if settings.video_flash {
            match self.flash.as_ref() {
                Some(flash) => match flash.start_recording(&session.stamp) {
                    Ok(()) => session.flash_active = true,
                    Err(source) => {
                        self.report(&SessionError::FlashSignal { source }).await;
                        notices += 1;
                    }
                },
                None => debug!("Flash signal requested but no flash is attached"),
            }
        }

        let report = SessionReport {
            session_id: session.stamp.id(),
            requested: session.requested.clone(),
            recording: session.recording.clone(),
            notices,
        };

        {
            let mut state = self.state.lock();
            state.starting = None;
            state.session = Some(session);
        }
        drop(reservation);

        self.events
            .publish(SyncRecEvent::SessionStarted {
                session_id: report.session_id.clone(),
                sensors: report.recording.clone(),
                timestamp: SystemTime::now(),
            })
            .await;

        // The session is live from here on, so a hook may already stop it
        self.video.starting_video().await;
        self.video.started_video().await;

        Ok(report)
    }

    async fn stop_session(&self, cause: StopCause) -> Result<Option<SessionSummary>> {
        let session = self.state.lock().session.take();
        let Some(session) = session else {
            debug!("No live session to stop");
            return Ok(None);
        };

        let summary = self.teardown_session(session, cause).await;
        self.prepare_next_if_needed(cause).await;
        Ok(Some(summary))
    }

    /// Capture stops before sinks close; flash and video stop after data is final
    async fn teardown_session(&self, mut session: RecordingSession, cause: StopCause) -> SessionSummary {
        info!("Stopping session {} ({:?})", session.stamp, cause);

        let streams = match session.pool.take() {
            Some(pool) => {
                self.capture.disable_all_sensors();
                for (kind, source) in pool.close_all().await {
                    self.report(&SessionError::Storage { kind, source }).await;
                }
                pool.summary()
            }
            None => Vec::new(),
        };

        if session.flash_active {
            if let Some(flash) = self.flash.as_ref() {
                if flash.is_recording() {
                    flash.stop_recording();
                } else {
                    debug!("Flash signal already stopped");
                }
            }
        }

        self.video.stopping_video().await;
        self.video.stopped_video().await;

        let summary = SessionSummary {
            session_id: session.stamp.id(),
            started_at: session.stamp.started_at(),
            stopped_at: Utc::now(),
            cause,
            requested: session.requested.clone(),
            streams,
        };

        if self.policy.write_manifest {
            self.write_manifest(&session, &summary);
        }

        *self.last_files.lock() = summary
            .streams
            .iter()
            .map(|stream| (stream.kind, stream.file.clone()))
            .collect();

        self.events
            .publish(SyncRecEvent::SessionStopped {
                session_id: summary.session_id.clone(),
                cause,
                timestamp: SystemTime::now(),
            })
            .await;

        summary
    }

    fn write_manifest(&self, session: &RecordingSession, summary: &SessionSummary) {
        let json = match serde_json::to_vec_pretty(summary) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize session manifest: {}", e);
                return;
            }
        };

        match session.backend.open("session", "json", &session.stamp) {
            Ok(mut output) => {
                if let Err(e) = output.sink.write_all(&json).and_then(|_| output.sink.flush()) {
                    error!("Failed to write session manifest {}: {}", output.file, e);
                } else {
                    debug!("Saved session manifest to {}", output.file);
                }
            }
            Err(e) => error!("Failed to create session manifest: {}", e),
        }
    }

    async fn prepare_next_if_needed(&self, cause: StopCause) -> bool {
        let controller = self.state.lock().sync_controller();
        let Some(controller) = controller else {
            return false;
        };

        let inputs = RearmInputs {
            sync_running: true,
            preparation_needed: controller.is_video_preparation_needed(),
            app_paused: self.app.is_paused(),
            settings_active: self.app.is_settings_active(),
        };

        if !should_prepare_next(cause, &inputs) {
            debug!("Not preparing next recording: {:?}", inputs);
            return false;
        }

        controller.prepare_video_recording().await;
        self.events.publish(SyncRecEvent::RecordingPrepared).await;
        true
    }

    async fn start_sync_session(self: &Arc<Self>) -> Result<SyncRole> {
        if self.teardown_sync().await {
            info!("Restarting synchronized session");
        }

        let controller = match self.sync_protocol.start() {
            Ok(controller) => controller,
            Err(err) => {
                self.prefs.set_sync_enabled(false);
                self.report(&err).await;
                return Err(err.into());
            }
        };

        let role = if controller.is_leader() {
            SyncRole::Leader
        } else {
            SyncRole::Follower
        };
        let bridge = Arc::new(WatchdogBridge {
            inner: Arc::downgrade(self),
        });

        // The watchdog and the state slot change together under the lock
        let started = {
            let mut state = self.state.lock();
            let generation = state.sync_generation + 1;
            match self.watchdog.start(role, generation, bridge) {
                Ok(()) => {
                    state.sync_generation = generation;
                    state.sync = Some(SyncSession {
                        controller: Arc::clone(&controller),
                        role,
                        generation,
                    });
                    Ok(generation)
                }
                Err(e) => Err(e),
            }
        };

        match started {
            Ok(generation) => {
                self.events.publish(SyncRecEvent::SyncStarted { role }).await;
                info!("Synchronized session #{} running as {}", generation, role);
                Ok(role)
            }
            Err(e) => {
                controller.close().await;
                Err(e.into())
            }
        }
    }

    async fn teardown_sync(&self) -> bool {
        let sync = {
            let mut state = self.state.lock();
            let sync = state.sync.take();
            if sync.is_some() {
                self.watchdog.stop();
            }
            sync
        };

        match sync {
            Some(sync) => {
                self.close_sync(sync).await;
                true
            }
            None => false,
        }
    }

    async fn close_sync(&self, sync: SyncSession) {
        sync.controller.close().await;
        self.events.publish(SyncRecEvent::SyncStopped).await;
        info!("Synchronized session #{} closed", sync.generation);
    }

    async fn handle_link_lost(&self, role: SyncRole, generation: u64) -> bool {
        let (session, sync) = {
            let mut state = self.state.lock();
            match state.sync.as_ref() {
                Some(sync) if sync.generation == generation => {}
                _ => {
                    debug!("Ignoring link loss for stale session #{}", generation);
                    return false;
                }
            }
            self.watchdog.stop();
            (state.session.take(), state.sync.take())
        };

        self.prefs.set_sync_enabled(false);
        if let Some(session) = session {
            self.teardown_session(session, StopCause::LinkLost).await;
        }
        if let Some(sync) = sync {
            self.close_sync(sync).await;
        }
        self.report(&SessionError::LinkLost(role)).await;
        true
    }
}

/// Builder for [`RecordingOrchestrator`]
#[derive(Default)]
pub struct RecordingOrchestratorBuilder {
    prefs: Option<Preferences>,
    policy: SessionPolicy,
    capture: Option<Arc<SensorCaptureManager>>,
    backend: Option<Arc<dyn StorageBackend>>,
    video: Option<Arc<dyn VideoPipeline>>,
    flash: Option<Arc<dyn FlashSignal>>,
    sync_protocol: Option<Arc<dyn SyncProtocol>>,
    link_source: Option<LinkStateSource>,
    app: Option<Arc<AppLifecycle>>,
    events: Option<Arc<EventBus>>,
}

impl RecordingOrchestratorBuilder {
    pub fn with_preferences(mut self, prefs: Preferences) -> Self {
        self.prefs = Some(prefs);
        self
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_capture(mut self, capture: Arc<SensorCaptureManager>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_video(mut self, video: Arc<dyn VideoPipeline>) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_flash(mut self, flash: Arc<dyn FlashSignal>) -> Self {
        self.flash = Some(flash);
        self
    }

    pub fn with_sync_protocol(mut self, protocol: Arc<dyn SyncProtocol>) -> Self {
        self.sync_protocol = Some(protocol);
        self
    }

    pub fn with_link_source(mut self, source: LinkStateSource) -> Self {
        self.link_source = Some(source);
        self
    }

    pub fn with_app_lifecycle(mut self, app: Arc<AppLifecycle>) -> Self {
        self.app = Some(app);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<RecordingOrchestrator> {
        fn required<T>(value: Option<T>, what: &str) -> Result<T> {
            value.ok_or_else(|| {
                SyncRecError::component("orchestrator", format!("{} is required", what).as_str())
            })
        }

        let inner = Inner {
            prefs: required(self.prefs, "preferences")?,
            policy: self.policy,
            capture: required(self.capture, "sensor capture manager")?,
            backend: RwLock::new(required(self.backend, "storage backend")?),
            video: required(self.video, "video pipeline")?,
            flash: self.flash,
            sync_protocol: required(self.sync_protocol, "sync protocol")?,
            watchdog: NetworkLinkWatchdog::new(required(self.link_source, "link state source")?),
            app: self.app.unwrap_or_default(),
            events: required(self.events, "event bus")?,
            state: Mutex::new(State::default()),
            last_files: Mutex::new(Vec::new()),
        };

        Ok(RecordingOrchestrator {
            inner: Arc::new(inner),
        })
    }
}
