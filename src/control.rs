//! Control channel wire types.
//!
//! Requests and responses are JSON objects, one per line on the transport.
//! Values arrive loosely typed (`"on"`, `true`, `"42"`, `42`), so commands
//! read them through [`value_text`] and [`value_bool`].

use crate::verifier::TcOutcome;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_OK: &str = "OK";
pub const STATUS_FAIL: &str = "FAIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    GroundStation,
    Spacecraft,
    Admin,
    Override,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub system: System,
    pub control: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub admin: bool,
    /// Free text label, only used for the history logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ControlRequest {
    pub fn new(system: System, control: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            system,
            control: control.into(),
            value: value.into(),
            admin: false,
            command: None,
        }
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn labelled(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// Actions of the `admin` system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Start { scenario: String },
    Stop,
    Status,
    History,
}

impl AdminAction {
    pub fn parse(control: &str, value: &Value) -> Option<Self> {
        match control.trim() {
            "start" => value_text(value)
                .filter(|uid| !uid.trim().is_empty())
                .map(|scenario| AdminAction::Start { scenario }),
            "stop" => Some(AdminAction::Stop),
            "status" => Some(AdminAction::Status),
            "history" => Some(AdminAction::History),
            _ => None,
        }
    }
}

/// One logged control request of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: f64,
    pub system: System,
    pub control: String,
    pub value: Value,
    #[serde(default)]
    pub command: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run: String,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TcOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<RunLog>>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self::with_status(STATUS_OK)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(STATUS_FAIL)
        }
    }

    pub fn from_result(accepted: bool) -> Self {
        if accepted {
            Self::ok()
        } else {
            Self::with_status(STATUS_FAIL)
        }
    }

    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Textual form of a loosely typed control value.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "enabled" | "1" => Some(true),
            "false" | "off" | "disabled" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn value_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"system":"ground_station","control":"sweep"}"#).unwrap();
        assert_eq!(req.system, System::GroundStation);
        assert_eq!(req.value, Value::Null);
        assert!(!req.admin);
        assert!(req.command.is_none());

        assert!(serde_json::from_str::<ControlRequest>(r#"{"system":"moon","control":"x"}"#).is_err());
    }

    #[test]
    fn loose_values() {
        assert_eq!(value_bool(&json!("on")), Some(true));
        assert_eq!(value_bool(&json!(0)), Some(false));
        assert_eq!(value_bool(&json!("maybe")), None);
        assert_eq!(value_f64(&json!("55.5")), Some(55.5));
        assert_eq!(value_f64(&json!("NaN")), None);
        assert_eq!(value_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(value_text(&Value::Null), None);
    }

    #[test]
    fn admin_actions() {
        assert_eq!(
            AdminAction::parse("start", &json!("leop")),
            Some(AdminAction::Start { scenario: "leop".into() })
        );
        assert_eq!(AdminAction::parse("start", &json!("")), None);
        assert_eq!(AdminAction::parse("status", &Value::Null), Some(AdminAction::Status));
        assert_eq!(AdminAction::parse("reboot", &Value::Null), None);
    }

    #[test]
    fn response_skips_empty_fields() {
        let json = serde_json::to_value(ControlResponse::ok()).unwrap();
        assert_eq!(json, json!({"status": "OK"}));
    }
}
