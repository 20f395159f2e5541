//! Fault-injection overrides.
//!
//! The [`OverrideRegistry`] is shared by both engines and read once per
//! tick. Engines substitute overridden values through a [`Shadow`] slot so
//! that clearing an override brings back whatever value was in effect
//! before it was applied.

use crate::control::value_text;
use crate::model::{FrameQuality, LockState, OnOff};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// Control names that remove an override. The field to clear is the value.
pub const CLEAR_CONTROLS: [&str; 2] = ["_unset", "clear"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    #[error("unknown override field '{0}'")]
    UnknownField(String),
    #[error("invalid value for override '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Sparse override table. `None` means "not overridden".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideState {
    pub max_status_dl: Option<LockState>,
    pub max_snr_dl: Option<f64>,
    pub frame_quality: Option<FrameQuality>,
    pub carrier_ul: Option<OnOff>,
    pub tx_status: Option<OnOff>,
    pub no_tm: Option<bool>,
    pub no_tc: Option<bool>,
    pub no_uploads: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideField {
    MaxStatusDl,
    MaxSnrDl,
    FrameQuality,
    CarrierUl,
    TxStatus,
    NoTm,
    NoTc,
    NoUploads,
}

impl OverrideField {
    pub const ALL: [OverrideField; 8] = [
        OverrideField::MaxStatusDl,
        OverrideField::MaxSnrDl,
        OverrideField::FrameQuality,
        OverrideField::CarrierUl,
        OverrideField::TxStatus,
        OverrideField::NoTm,
        OverrideField::NoTc,
        OverrideField::NoUploads,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            OverrideField::MaxStatusDl => "max_status_dl",
            OverrideField::MaxSnrDl => "max_snr_dl",
            OverrideField::FrameQuality => "frame_quality",
            OverrideField::CarrierUl => "carrier_ul",
            OverrideField::TxStatus => "tx_status",
            OverrideField::NoTm => "no_tm",
            OverrideField::NoTc => "no_tc",
            OverrideField::NoUploads => "no_uploads",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, OverrideError> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name)
            .ok_or_else(|| OverrideError::UnknownField(name.to_string()))
    }
}

/// One validated mutation of the override table.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideUpdate {
    MaxStatusDl(LockState),
    MaxSnrDl(f64),
    FrameQuality(FrameQuality),
    CarrierUl(OnOff),
    TxStatus(OnOff),
    NoTm(bool),
    NoTc(bool),
    NoUploads(bool),
    Clear(OverrideField),
}

impl OverrideUpdate {
    /// Parse a control request addressed to the `override` system.
    pub fn parse(control: &str, value: &Value) -> Result<Self, OverrideError> {
        let control = control.trim();
        let text = value_text(value).unwrap_or_default();

        if CLEAR_CONTROLS.contains(&control) {
            return OverrideField::from_name(&text).map(OverrideUpdate::Clear);
        }

        let field = OverrideField::from_name(control)?;
        let invalid = || OverrideError::InvalidValue {
            field: field.name(),
            value: text.clone(),
        };

        let update = match field {
            OverrideField::MaxStatusDl => {
                OverrideUpdate::MaxStatusDl(text.parse().map_err(|_| invalid())?)
            }
            OverrideField::MaxSnrDl => {
                let snr: f64 = text.trim().parse().map_err(|_| invalid())?;
                if !snr.is_finite() {
                    return Err(invalid());
                }
                OverrideUpdate::MaxSnrDl(snr)
            }
            OverrideField::FrameQuality => {
                OverrideUpdate::FrameQuality(text.parse().map_err(|_| invalid())?)
            }
            OverrideField::CarrierUl => OverrideUpdate::CarrierUl(text.parse().map_err(|_| invalid())?),
            OverrideField::TxStatus => OverrideUpdate::TxStatus(text.parse().map_err(|_| invalid())?),
            OverrideField::NoTm => OverrideUpdate::NoTm(kill_switch(&text)),
            OverrideField::NoTc => OverrideUpdate::NoTc(kill_switch(&text)),
            OverrideField::NoUploads => OverrideUpdate::NoUploads(kill_switch(&text)),
        };
        Ok(update)
    }
}

// Kill switches are armed by "enabled" (or `true`); anything else disarms.
fn kill_switch(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("enabled") || text.eq_ignore_ascii_case("true")
}

impl OverrideState {
    pub fn apply(&mut self, update: OverrideUpdate) {
        match update {
            OverrideUpdate::MaxStatusDl(v) => self.max_status_dl = Some(v),
            OverrideUpdate::MaxSnrDl(v) => self.max_snr_dl = Some(v),
            OverrideUpdate::FrameQuality(v) => self.frame_quality = Some(v),
            OverrideUpdate::CarrierUl(v) => self.carrier_ul = Some(v),
            OverrideUpdate::TxStatus(v) => self.tx_status = Some(v),
            OverrideUpdate::NoTm(v) => self.no_tm = Some(v),
            OverrideUpdate::NoTc(v) => self.no_tc = Some(v),
            OverrideUpdate::NoUploads(v) => self.no_uploads = Some(v),
            OverrideUpdate::Clear(field) => self.clear(field),
        }
    }

    pub fn clear(&mut self, field: OverrideField) {
        match field {
            OverrideField::MaxStatusDl => self.max_status_dl = None,
            OverrideField::MaxSnrDl => self.max_snr_dl = None,
            OverrideField::FrameQuality => self.frame_quality = None,
            OverrideField::CarrierUl => self.carrier_ul = None,
            OverrideField::TxStatus => self.tx_status = None,
            OverrideField::NoTm => self.no_tm = None,
            OverrideField::NoTc => self.no_tc = None,
            OverrideField::NoUploads => self.no_uploads = None,
        }
    }

    pub fn no_tc(&self) -> bool {
        self.no_tc.unwrap_or(false)
    }

    pub fn no_tm(&self) -> bool {
        self.no_tm.unwrap_or(false)
    }

    pub fn no_uploads(&self) -> bool {
        self.no_uploads.unwrap_or(false)
    }

    /// Active overrides only, keyed by field name.
    pub fn current(&self) -> Map<String, Value> {
        let mut active = Map::new();
        if let Some(v) = self.max_status_dl {
            active.insert("max_status_dl".into(), Value::from(v.name()));
        }
        if let Some(v) = self.max_snr_dl {
            active.insert("max_snr_dl".into(), Value::from(v));
        }
        if let Some(v) = self.frame_quality {
            active.insert("frame_quality".into(), Value::from(v.name()));
        }
        if let Some(v) = self.carrier_ul {
            active.insert("carrier_ul".into(), Value::from(v.name()));
        }
        if let Some(v) = self.tx_status {
            active.insert("tx_status".into(), Value::from(v.name()));
        }
        if let Some(v) = self.no_tm {
            active.insert("no_tm".into(), Value::from(v));
        }
        if let Some(v) = self.no_tc {
            active.insert("no_tc".into(), Value::from(v));
        }
        if let Some(v) = self.no_uploads {
            active.insert("no_uploads".into(), Value::from(v));
        }
        active
    }
}

/// Process-wide override table, read by the engines every tick.
#[derive(Debug, Default)]
pub struct OverrideRegistry {
    state: RwLock<OverrideState>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> OverrideState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn apply(&self, update: OverrideUpdate) {
        info!("Override update: {:?}", update);
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
    }

    pub fn update(&self, control: &str, value: &Value) -> Result<(), OverrideError> {
        let update = OverrideUpdate::parse(control, value)?;
        self.apply(update);
        Ok(())
    }

    pub fn current(&self) -> Map<String, Value> {
        self.snapshot().current()
    }
}

/// One-slot memory of the value an override replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shadow<T> {
    saved: Option<T>,
}

impl<T> Default for Shadow<T> {
    fn default() -> Self {
        Self { saved: None }
    }
}

impl<T: Clone> Shadow<T> {
    pub fn new() -> Self {
        Self { saved: None }
    }

    /// Force `slot` to `forced` while an override is present. The first
    /// substitution saves the live value; once the override disappears the
    /// saved value is written back exactly once.
    pub fn apply(&mut self, slot: &mut T, forced: Option<T>) {
        match forced {
            Some(value) => {
                if self.saved.is_none() {
                    self.saved = Some(slot.clone());
                }
                *slot = value;
            }
            None => {
                if let Some(previous) = self.saved.take() {
                    *slot = previous;
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_set_and_clear() {
        assert_eq!(
            OverrideUpdate::parse("max_status_dl", &json!("BIT_LOCK")).unwrap(),
            OverrideUpdate::MaxStatusDl(LockState::BitLock)
        );
        assert_eq!(
            OverrideUpdate::parse("max_snr_dl", &json!(3.5)).unwrap(),
            OverrideUpdate::MaxSnrDl(3.5)
        );
        assert_eq!(
            OverrideUpdate::parse("no_tc", &json!("enabled")).unwrap(),
            OverrideUpdate::NoTc(true)
        );
        assert_eq!(
            OverrideUpdate::parse("no_tc", &json!("disabled")).unwrap(),
            OverrideUpdate::NoTc(false)
        );
        assert_eq!(
            OverrideUpdate::parse("_unset", &json!("carrier_ul")).unwrap(),
            OverrideUpdate::Clear(OverrideField::CarrierUl)
        );
        assert_eq!(
            OverrideUpdate::parse("clear", &json!("no_tm")).unwrap(),
            OverrideUpdate::Clear(OverrideField::NoTm)
        );
    }

    #[test]
    fn rejects_unknown_fields_and_values() {
        assert!(matches!(
            OverrideUpdate::parse("gravity", &json!("off")),
            Err(OverrideError::UnknownField(_))
        ));
        assert!(matches!(
            OverrideUpdate::parse("max_status_dl", &json!("WARP_LOCK")),
            Err(OverrideError::InvalidValue { .. })
        ));
        assert!(OverrideUpdate::parse("_unset", &json!("nothing")).is_err());
    }

    #[test]
    fn registry_reports_only_active_fields() {
        let registry = OverrideRegistry::new();
        registry.update("tx_status", &json!("off")).unwrap();
        registry.update("no_uploads", &json!("enabled")).unwrap();
        let current = registry.current();
        assert_eq!(current.len(), 2);
        assert_eq!(current["tx_status"], json!("off"));

        registry.update("_unset", &json!("tx_status")).unwrap();
        assert_eq!(registry.current().len(), 1);
        assert_eq!(registry.snapshot().tx_status, None);
    }

    #[test]
    fn shadow_restores_value_from_before_override() {
        let mut shadow = Shadow::new();
        let mut carrier = OnOff::On;

        shadow.apply(&mut carrier, Some(OnOff::Off));
        assert_eq!(carrier, OnOff::Off);
        // repeated ticks keep the first saved value
        shadow.apply(&mut carrier, Some(OnOff::Off));
        assert!(shadow.is_active());

        shadow.apply(&mut carrier, None);
        assert_eq!(carrier, OnOff::On);
        assert!(!shadow.is_active());

        // nothing to restore afterwards
        carrier = OnOff::Off;
        shadow.apply(&mut carrier, None);
        assert_eq!(carrier, OnOff::Off);
    }
}
