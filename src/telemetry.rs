//! Telemetry publication: where engine snapshots and downlinked frames go
//! after each tick.

use crate::codec::{Frame, PacketCodec, TelemetryRecord};
use crate::model::LockState;
use crate::overrides::OverrideState;
use crate::spacecraft::SpacecraftState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

pub const TOPIC_GROUND_STATION: &str = "ground_station";
pub const TOPIC_SPACECRAFT: &str = "spacecraft";
pub const TOPIC_FRAMES: &str = "frames";

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Value,
}

/// Destination for published telemetry. Publishing never fails the tick.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, topic: &str, record: &Value);
}

/// Fan-out to any number of subscribers; messages are dropped while nobody
/// listens.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<TelemetryMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl TelemetrySink for BroadcastSink {
    fn publish(&self, topic: &str, record: &Value) {
        let message = TelemetryMessage { topic: topic.to_string(), payload: record.clone() };
        if self.sender.send(message).is_err() {
            trace!("No telemetry subscribers for {}", topic);
        }
    }
}

/// Keeps everything in memory. Used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<TelemetryMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, topic: &str) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn publish(&self, topic: &str, record: &Value) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TelemetryMessage { topic: topic.to_string(), payload: record.clone() });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Full,
    /// Transponder fields only.
    Scrubbed,
}

/// What the ground receives this tick, if anything.
pub fn frame_kind(sc: &SpacecraftState, overrides: &OverrideState) -> Option<FrameKind> {
    let dl = sc.ttc.state_dl;
    if dl == LockState::FrameLock && !sc.ttc.tm_suppressed {
        Some(FrameKind::Full)
    } else if dl.at_least(LockState::BitLock) && !overrides.no_tm() {
        Some(FrameKind::Scrubbed)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Downlinked {
    pub kind: FrameKind,
    pub record: TelemetryRecord,
    pub frame: Frame,
}

/// Build the frame for this tick. The record is what the ground decodes,
/// so scrubbed frames already carry neutral values outside TTC.
pub fn downlink(
    codec: &PacketCodec,
    sc: &SpacecraftState,
    overrides: &OverrideState,
) -> Option<Downlinked> {
    let kind = frame_kind(sc, overrides)?;
    let full = TelemetryRecord::from(sc);
    let record = match kind {
        FrameKind::Full => full,
        FrameKind::Scrubbed => full.scrubbed(),
    };
    Some(Downlinked { kind, record, frame: codec.encode(&record) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FrameQuality;
    use crate::overrides::OverrideUpdate;
    use serde_json::json;

    fn at(state_dl: LockState) -> SpacecraftState {
        let mut sc = SpacecraftState::default();
        sc.ttc.state_dl = state_dl;
        sc
    }

    #[test]
    fn framing_follows_downlink_lock() {
        let none = OverrideState::default();
        assert_eq!(frame_kind(&at(LockState::FrameLock), &none), Some(FrameKind::Full));
        assert_eq!(frame_kind(&at(LockState::BitLock), &none), Some(FrameKind::Scrubbed));
        assert_eq!(frame_kind(&at(LockState::PskLock), &none), None);
        assert_eq!(frame_kind(&at(LockState::NoRf), &none), None);
    }

    #[test]
    fn suppressed_telemetry_degrades_to_scrubbed() {
        let mut sc = at(LockState::FrameLock);
        sc.ttc.tm_suppressed = true;
        sc.ground.frame_quality = FrameQuality::Bad;
        assert_eq!(frame_kind(&sc, &OverrideState::default()), Some(FrameKind::Scrubbed));

        let mut no_tm = OverrideState::default();
        no_tm.apply(OverrideUpdate::parse("no_tm", &json!("enabled")).unwrap());
        assert_eq!(frame_kind(&sc, &no_tm), None);
    }

    #[test]
    fn scrubbed_downlink_keeps_transponder_fields() {
        let mut sc = at(LockState::BitLock);
        sc.ttc.ping_ack = 4;
        sc.dhs.memory = 70.0;
        let frame = downlink(&PacketCodec, &sc, &OverrideState::default()).unwrap();
        let decoded = PacketCodec.decode(&frame.frame).unwrap();
        assert_eq!(decoded.ttc.ping_ack, 4);
        assert_eq!(decoded.dhs.memory, 0.0);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(4);
        sink.publish(TOPIC_SPACECRAFT, &json!({"ts": 1.0}));
        let mut rx = sink.subscribe();
        sink.publish(TOPIC_GROUND_STATION, &json!({"ts": 2.0}));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, TOPIC_GROUND_STATION);
        assert_eq!(message.payload["ts"], 2.0);
    }
}
