//! Simulation supervisor.
//!
//! Owns the tick loop and the run lifecycle, and answers control requests
//! one at a time. Engines are built per run and injected into the worker;
//! their final states carry over into the next run.

use crate::codec::{humanize, ArchivedFrame, PacketCodec};
use crate::config::SimConfig;
use crate::control::{AdminAction, ControlRequest, ControlResponse, HistoryEntry, RunLog, System};
use crate::geometry::OrbitGeometryProvider;
use crate::ground_station::{GroundStationEngine, GroundStationState};
use crate::overrides::OverrideRegistry;
use crate::scenario::{overlay, Scenario, ScenarioError, ScenarioRepository};
use crate::spacecraft::{ControlVerdict, SpacecraftEngine, SpacecraftState};
use crate::storage::{BlobStore, StoreError};
use crate::telemetry::{self, TelemetrySink, TOPIC_FRAMES, TOPIC_GROUND_STATION, TOPIC_SPACECRAFT};
use crate::verifier::TelecommandVerifier;
use chrono::Utc;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Blob store namespace for everything the supervisor persists.
pub const STORE_NAMESPACE: &str = "simops";
const HISTORY_PREFIX: &str = "hist/";
const FRAMES_PREFIX: &str = "frames/";
const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serialising run data: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Builds the geometry provider for a scenario.
pub type GeometryFactory = Arc<
    dyn Fn(&Scenario) -> Result<Arc<dyn OrbitGeometryProvider>, ScenarioError> + Send + Sync,
>;

/// SGP4 propagation of the scenario's element set.
pub fn sgp4_geometry() -> GeometryFactory {
    Arc::new(
        |scenario: &Scenario| -> Result<Arc<dyn OrbitGeometryProvider>, ScenarioError> {
            Ok(Arc::new(scenario.geometry()?))
        },
    )
}

struct Engines {
    ground: GroundStationEngine,
    spacecraft: SpacecraftEngine,
}

struct Run {
    name: String,
    started_ms: i64,
    engines: Arc<Engines>,
    history: Vec<HistoryEntry>,
    cancel: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct CarryOver {
    ground: Option<GroundStationState>,
    spacecraft: Option<SpacecraftState>,
}

/// Everything the tick worker needs besides the engines.
struct Outputs {
    overrides: Arc<OverrideRegistry>,
    sink: Arc<dyn TelemetrySink>,
    store: Arc<dyn BlobStore>,
    archive_key: Option<String>,
}

pub struct SimulationSupervisor {
    config: SimConfig,
    scenarios: Arc<dyn ScenarioRepository>,
    store: Arc<dyn BlobStore>,
    sink: Arc<dyn TelemetrySink>,
    overrides: Arc<OverrideRegistry>,
    geometry: GeometryFactory,
    run: Option<Run>,
    carry: CarryOver,
    // stopped runs whose command log has not reached the store yet
    pending_history: Vec<(String, RunLog)>,
    last_started_ms: i64,
}

impl SimulationSupervisor {
    pub fn new(
        config: SimConfig,
        scenarios: Arc<dyn ScenarioRepository>,
        store: Arc<dyn BlobStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            scenarios,
            store,
            sink,
            overrides: Arc::new(OverrideRegistry::new()),
            geometry: sgp4_geometry(),
            run: None,
            carry: CarryOver::default(),
            pending_history: Vec::new(),
            last_started_ms: 0,
        }
    }

    pub fn with_geometry(mut self, geometry: GeometryFactory) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn overrides(&self) -> Arc<OverrideRegistry> {
        Arc::clone(&self.overrides)
    }

    /// True while the tick worker is alive.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.worker.is_finished())
    }

    pub fn scenario_name(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.name.as_str())
    }

    pub fn ground_station_state(&self) -> Option<GroundStationState> {
        self.run.as_ref().map(|run| run.engines.ground.snapshot())
    }

    pub fn spacecraft_state(&self) -> Option<SpacecraftState> {
        self.run.as_ref().map(|run| run.engines.spacecraft.snapshot())
    }

    /// Start `uid`, stopping any current run first.
    pub async fn start(&mut self, uid: &str) -> Result<(), SupervisorError> {
        if let Err(e) = self.stop().await {
            warn!("Command history kept for a later flush: {}", e);
        }

        let scenario = self.scenarios.load(uid)?;
        let geometry = (self.geometry)(&scenario)?;

        let mut ground = self.carry.ground.clone().unwrap_or_default();
        ground.name = scenario.ground_station.name.clone();
        if let Some(patch) = &scenario.gs_initial_state {
            ground = overlay(&ground, patch)?;
        }
        let mut spacecraft = self.carry.spacecraft.clone().unwrap_or_default();
        if let Some(patch) = &scenario.sc_initial_state {
            spacecraft = overlay(&spacecraft, patch)?;
        }
        // the first tick of a run integrates nothing
        ground.ts = 0.0;
        spacecraft.ts = 0.0;

        let seed = self.config.rng_seed;
        let engines = Arc::new(Engines {
            ground: GroundStationEngine::new(ground, Arc::clone(&geometry), seed),
            spacecraft: SpacecraftEngine::new(
                spacecraft,
                geometry,
                TelecommandVerifier::new(self.config.min_uplink_power),
                seed,
            ),
        });

        // run ids key the history, so they must not repeat
        let started_ms = Utc::now().timestamp_millis().max(self.last_started_ms + 1);
        self.last_started_ms = started_ms;
        let outputs = Outputs {
            overrides: Arc::clone(&self.overrides),
            sink: Arc::clone(&self.sink),
            store: Arc::clone(&self.store),
            archive_key: self
                .config
                .archive_frames
                .then(|| format!("{FRAMES_PREFIX}{started_ms:013}/")),
        };
        let timing = Timing {
            first_tick: scenario.begin_ts(),
            end: scenario.end_ts(),
            time_step: scenario.time_step,
            cadence: Duration::from_secs_f64(scenario.time_step / self.config.speed),
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let worker = tokio::spawn(tick_loop(Arc::clone(&engines), outputs, timing, cancel_rx));

        info!(
            "Started '{}' ({} .. {}, step {} s, speed x{})",
            scenario.name, scenario.begin, scenario.end, scenario.time_step, self.config.speed
        );
        self.run = Some(Run {
            name: scenario.name,
            started_ms,
            engines,
            history: Vec::new(),
            cancel,
            worker,
        });
        Ok(())
    }

    /// Stop the current run, keep its final states and flush its command
    /// history. Logs that could not be stored stay pending and are retried
    /// on every later stop. Does nothing else when no run exists.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        if let Some(run) = self.run.take() {
            // the worker may already have ended at the scenario end
            let _ = run.cancel.send(true);
            if let Err(e) = run.worker.await {
                error!("Tick worker ended abnormally: {}", e);
            }

            self.carry = CarryOver {
                ground: Some(run.engines.ground.snapshot()),
                spacecraft: Some(run.engines.spacecraft.snapshot()),
            };

            info!("Stopped '{}', {} commands logged", run.name, run.history.len());
            let log = RunLog {
                run: format!("{} {}", run.name, iso_millis(run.started_ms)),
                entries: run.history,
            };
            let key = format!("{HISTORY_PREFIX}{:013}.json", run.started_ms);
            self.pending_history.push((key, log));
        }
        self.flush_history()
    }

    fn flush_history(&mut self) -> Result<(), SupervisorError> {
        while let Some((key, log)) = self.pending_history.first() {
            self.store.put(STORE_NAMESPACE, key, &serde_json::to_vec(log)?)?;
            debug!("Stored history {}", key);
            self.pending_history.remove(0);
        }
        Ok(())
    }

    /// Past run logs, newest first.
    pub fn history(&self) -> Result<Vec<RunLog>, SupervisorError> {
        let mut keys = self.store.list(STORE_NAMESPACE, HISTORY_PREFIX)?;
        keys.reverse();
        let mut logs = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get(STORE_NAMESPACE, &key)? {
                Some(bytes) => match serde_json::from_slice::<RunLog>(&bytes) {
                    Ok(log) => logs.push(log),
                    Err(e) => warn!("Skipping unreadable history {}: {}", key, e),
                },
                None => debug!("History {} vanished", key),
            }
        }
        Ok(logs)
    }

    /// Route one control request.
    pub async fn handle(&mut self, request: ControlRequest) -> ControlResponse {
        match request.system {
            System::Admin => self.handle_admin(&request).await,
            System::Override => match self.overrides.update(&request.control, &request.value) {
                Ok(()) => ControlResponse::ok(),
                Err(e) => {
                    warn!("Override refused: {}", e);
                    ControlResponse::fail(e.to_string())
                }
            },
            System::GroundStation => self.handle_ground_station(&request),
            System::Spacecraft => self.handle_spacecraft(&request),
        }
    }

    async fn handle_admin(&mut self, request: &ControlRequest) -> ControlResponse {
        let Some(action) = AdminAction::parse(&request.control, &request.value) else {
            warn!("Unknown admin control '{}'", request.control);
            return ControlResponse::fail(format!("unknown admin control '{}'", request.control));
        };
        match action {
            AdminAction::Start { scenario } => match self.start(&scenario).await {
                Ok(()) => ControlResponse::ok(),
                Err(e) => {
                    warn!("Cannot start '{}': {}", scenario, e);
                    ControlResponse::fail(e.to_string())
                }
            },
            AdminAction::Stop => match self.stop().await {
                Ok(()) => ControlResponse::ok(),
                Err(e) => {
                    error!("Stop failed: {}", e);
                    ControlResponse::fail(e.to_string())
                }
            },
            AdminAction::Status => self.status(),
            AdminAction::History => match self.history() {
                Ok(history) => ControlResponse { history: Some(history), ..ControlResponse::ok() },
                Err(e) => ControlResponse::fail(e.to_string()),
            },
        }
    }

    fn status(&self) -> ControlResponse {
        let catalog = match self.scenarios.catalog() {
            Ok(catalog) => catalog,
            Err(e) => return ControlResponse::fail(e.to_string()),
        };
        let mut data = Map::new();
        for uid in &catalog {
            match self.scenarios.raw(uid) {
                Ok(raw) => {
                    data.insert(uid.clone(), raw);
                }
                Err(e) => warn!("Scenario {} unreadable: {}", uid, e),
            }
        }
        ControlResponse {
            scenarios: Some(catalog),
            data: Some(data),
            running: Some(self.is_running()),
            name: self.scenario_name().map(str::to_string),
            overrides: Some(self.overrides.current()),
            ..ControlResponse::ok()
        }
    }

    fn handle_ground_station(&mut self, request: &ControlRequest) -> ControlResponse {
        let Some(run) = self.run.as_mut() else {
            return ControlResponse::fail("no simulation running");
        };
        let response = match run.engines.ground.handle(&request.control, &request.value) {
            Ok(()) => ControlResponse::ok(),
            Err(e) => {
                warn!("GS control {} refused: {}", request.control, e);
                ControlResponse::fail(e.to_string())
            }
        };
        if !request.admin {
            let ts = run.engines.ground.snapshot().ts;
            run.record(ts, request, &response.status);
        }
        response
    }

    fn handle_spacecraft(&mut self, request: &ControlRequest) -> ControlResponse {
        let Some(run) = self.run.as_mut() else {
            return ControlResponse::fail("no simulation running");
        };
        let overrides = self.overrides.snapshot();
        let verdict = run.engines.spacecraft.control(
            &request.control,
            &request.value,
            request.command.as_deref(),
            &overrides,
            request.admin,
        );
        let response = match verdict {
            ControlVerdict::Admin { accepted, reason } => ControlResponse {
                message: reason,
                ..ControlResponse::from_result(accepted)
            },
            ControlVerdict::Telecommand(verification) => ControlResponse {
                outcome: Some(verification.outcome),
                message: verification.reason.clone(),
                ..ControlResponse::with_status(verification.status())
            },
        };
        if !request.admin {
            let ts = run.engines.spacecraft.snapshot().ts;
            run.record(ts, request, &response.status);
        }
        response
    }
}

impl Run {
    fn record(&mut self, ts: f64, request: &ControlRequest, status: &str) {
        self.history.push(HistoryEntry {
            ts,
            system: request.system,
            control: request.control.clone(),
            value: request.value.clone(),
            command: request.command.clone(),
            status: status.to_string(),
        });
    }
}

fn iso_millis(ms: i64) -> String {
    chrono::DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    first_tick: f64,
    end: f64,
    time_step: f64,
    cadence: Duration,
}

async fn tick_loop(
    engines: Arc<Engines>,
    outputs: Outputs,
    timing: Timing,
    mut cancel: watch::Receiver<bool>,
) {
    let codec = PacketCodec;
    let mut ts = timing.first_tick;
    loop {
        let started = Instant::now();
        tick(&engines, &outputs, &codec, ts);

        ts += timing.time_step;
        if ts > timing.end {
            info!("Scenario end reached at {}", ts);
            break;
        }

        let sleep = timing.cadence.saturating_sub(started.elapsed()).max(MIN_SLEEP);
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = cancel.changed() => {
                debug!("Tick worker cancelled");
                break;
            }
        }
    }
}

fn tick(engines: &Engines, outputs: &Outputs, codec: &PacketCodec, ts: f64) {
    let overrides = outputs.overrides.snapshot();
    let previous = engines.spacecraft.snapshot();

    let ground = match engines.ground.ping(ts, Some(&previous), &overrides) {
        Ok(ground) => ground,
        Err(e) => {
            error!("Ground station tick at {} failed: {}", ts, e);
            return;
        }
    };
    let spacecraft = match engines.spacecraft.ping(ts, Some(&ground), &overrides) {
        Ok(spacecraft) => spacecraft,
        Err(e) => {
            error!("Spacecraft tick at {} failed: {}", ts, e);
            return;
        }
    };

    publish(outputs.sink.as_ref(), TOPIC_GROUND_STATION, &ground);
    publish(outputs.sink.as_ref(), TOPIC_SPACECRAFT, &spacecraft);

    let Some(downlinked) = telemetry::downlink(codec, &spacecraft, &overrides) else {
        return;
    };
    outputs.sink.publish(
        TOPIC_FRAMES,
        &json!({ "kind": downlinked.kind, "frame": humanize(&downlinked.record) }),
    );
    if let Some(prefix) = &outputs.archive_key {
        let archived = ArchivedFrame {
            ts,
            scrubbed: downlinked.kind == telemetry::FrameKind::Scrubbed,
            bytes: downlinked.frame.to_vec(),
        };
        let key = format!("{prefix}{:010}.json", spacecraft.dhs.tm_counter);
        let stored = serde_json::to_vec(&archived)
            .map_err(SupervisorError::from)
            .and_then(|bytes| {
                outputs.store.put(STORE_NAMESPACE, &key, &bytes).map_err(SupervisorError::from)
            });
        if let Err(e) = stored {
            warn!("Frame archive failed: {}", e);
        }
    }
}

fn publish<T: serde::Serialize>(sink: &dyn TelemetrySink, topic: &str, state: &T) {
    match serde_json::to_value(state) {
        Ok(value) => sink.publish(topic, &value),
        Err(e) => warn!("Cannot serialise {} state: {}", topic, e),
    }
}

impl std::fmt::Debug for SimulationSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationSupervisor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("scenario", &self.scenario_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keys_sort_by_start_time() {
        let early = format!("{HISTORY_PREFIX}{:013}.json", 999_999_999_999i64);
        let late = format!("{HISTORY_PREFIX}{:013}.json", 1_000_000_000_000i64);
        assert!(early < late);
    }

    #[test]
    fn iso_of_epoch_millis() {
        assert_eq!(iso_millis(0), "1970-01-01T00:00:00+00:00");
    }
}
