//! Scenarios: the immutable per-run configuration, where they come from,
//! and how their initial states are laid over engine defaults.

use crate::geometry::GeometryError;
use crate::orbit::{self, Sgp4Geometry, Site};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

pub const SCENARIO_FILE: &str = "data.json";
const DEFAULT_TIME_STEP: f64 = 5.0;
/// Accepted in place of `eps_` in flat initial-state keys.
const LEGACY_EPS_GROUP: &str = "pts";

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("scenario '{0}' not found")]
    NotFound(String),
    #[error("invalid scenario id '{0}'")]
    InvalidUid(String),
    #[error("reading scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed scenario '{uid}': {source}")]
    Parse {
        uid: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("scenario rejected: {0}")]
    Invalid(String),
    #[error("initial state does not fit: {0}")]
    InitialState(#[source] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundSite {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above the ellipsoid.
    #[serde(default)]
    pub altitude: f64,
}

fn default_time_step() -> f64 {
    DEFAULT_TIME_STEP
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds of simulated time per tick.
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    pub ground_station: GroundSite,
    /// Name line plus the two element lines.
    pub tle: String,
    #[serde(default)]
    pub gs_initial_state: Option<Map<String, Value>>,
    #[serde(default)]
    pub sc_initial_state: Option<Map<String, Value>>,
}

impl Scenario {
    pub fn from_value(uid: &str, raw: Value) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_value(raw)
            .map_err(|source| ScenarioError::Parse { uid: uid.to_string(), source })?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(ScenarioError::Invalid(format!("time_step {}", self.time_step)));
        }
        if self.end <= self.begin {
            return Err(ScenarioError::Invalid("end is not after begin".into()));
        }
        let lines = self.tle.lines().filter(|l| !l.trim().is_empty()).count();
        if !(2..=3).contains(&lines) {
            return Err(ScenarioError::Invalid(format!("TLE has {lines} lines")));
        }
        Ok(())
    }

    pub fn begin_ts(&self) -> f64 {
        orbit::timestamp(self.begin)
    }

    pub fn end_ts(&self) -> f64 {
        orbit::timestamp(self.end)
    }

    pub fn site(&self) -> Site {
        Site {
            latitude: self.ground_station.latitude,
            longitude: self.ground_station.longitude,
            altitude_m: self.ground_station.altitude,
        }
    }

    pub fn geometry(&self) -> Result<Sgp4Geometry, ScenarioError> {
        Ok(Sgp4Geometry::new(&self.tle, self.site(), self.begin, self.end)?)
    }
}

/// Lay `patch` over `base`. Keys may name fields directly, nest objects
/// (`{"ttc": {"tx_status": "on"}}`) or use the flat `group_field` form
/// (`"ttc_tx_status"`). Unknown keys are skipped with a warning.
pub fn overlay<T>(base: &T, patch: &Map<String, Value>) -> Result<T, ScenarioError>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(base).map_err(ScenarioError::InitialState)?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in patch {
            if !place(target, key, value) {
                warn!("Ignoring unknown initial state key '{}'", key);
            }
        }
    }
    serde_json::from_value(merged).map_err(ScenarioError::InitialState)
}

fn place(target: &mut Map<String, Value>, key: &str, value: &Value) -> bool {
    if let Some(slot) = target.get_mut(key) {
        merge(slot, value);
        return true;
    }
    let Some((group, field)) = key.split_once('_') else {
        return false;
    };
    let group = if group == LEGACY_EPS_GROUP { "eps" } else { group };
    match target.get_mut(group) {
        Some(Value::Object(inner)) => place(inner, field, value),
        _ => false,
    }
}

fn merge(slot: &mut Value, value: &Value) {
    match (slot, value) {
        (Value::Object(into), Value::Object(from)) => {
            for (k, v) in from {
                match into.get_mut(k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        into.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Source of scenarios by id.
pub trait ScenarioRepository: Send + Sync {
    /// Known scenario ids, sorted.
    fn catalog(&self) -> Result<Vec<String>, ScenarioError>;

    /// Scenario document as stored.
    fn raw(&self, uid: &str) -> Result<Value, ScenarioError>;

    fn load(&self, uid: &str) -> Result<Scenario, ScenarioError> {
        Scenario::from_value(uid, self.raw(uid)?)
    }
}

fn check_uid(uid: &str) -> Result<(), ScenarioError> {
    let ok = !uid.is_empty()
        && uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && uid != "."
        && uid != "..";
    if ok {
        Ok(())
    } else {
        Err(ScenarioError::InvalidUid(uid.to_string()))
    }
}

/// Scenarios stored as `root/<uid>/data.json`.
#[derive(Debug, Clone)]
pub struct FsScenarioRepository {
    root: PathBuf,
}

impl FsScenarioRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ScenarioRepository for FsScenarioRepository {
    fn catalog(&self) -> Result<Vec<String>, ScenarioError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ScenarioError::Io { path: self.root.clone(), source }),
        };
        let mut uids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().join(SCENARIO_FILE).is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|uid| check_uid(uid).is_ok())
            .collect();
        uids.sort();
        debug!("{} scenarios under {}", uids.len(), self.root.display());
        Ok(uids)
    }

    fn raw(&self, uid: &str) -> Result<Value, ScenarioError> {
        check_uid(uid)?;
        let path = self.root.join(uid).join(SCENARIO_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScenarioError::NotFound(uid.to_string()))
            }
            Err(source) => return Err(ScenarioError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map_err(|source| ScenarioError::Parse { uid: uid.to_string(), source })
    }
}

#[derive(Debug, Default)]
pub struct MemoryScenarioRepository {
    scenarios: RwLock<BTreeMap<String, Value>>,
}

impl MemoryScenarioRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uid: impl Into<String>, raw: Value) {
        self.scenarios
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.into(), raw);
    }
}

impl ScenarioRepository for MemoryScenarioRepository {
    fn catalog(&self) -> Result<Vec<String>, ScenarioError> {
        Ok(self
            .scenarios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn raw(&self, uid: &str) -> Result<Value, ScenarioError> {
        self.scenarios
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
            .ok_or_else(|| ScenarioError::NotFound(uid.to_string()))
    }
}
