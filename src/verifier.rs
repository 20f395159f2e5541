//! Three stage telecommand verification.
//!
//! Every operator telecommand is stamped at Reception, Acceptance and
//! Execution. The composite status string (`g:REL g:ACC g:OK`) is what the
//! operator sees; each token can be read back independently through
//! [`VerificationReport::from_str`].

use crate::link;
use crate::model::{Antenna, Health, OnOff, RfMode};
use crate::overrides::OverrideState;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ground uplink power below which telecommands are not accepted.
pub const DEFAULT_MIN_UPLINK_POWER: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stamp {
    Pass,
    Reject,
    Unknown,
}

impl Stamp {
    const fn colour(self) -> char {
        match self {
            Stamp::Pass => 'g',
            Stamp::Reject => 'r',
            Stamp::Unknown => 'w',
        }
    }

    fn from_colour(c: &str) -> Option<Self> {
        match c {
            "g" => Some(Stamp::Pass),
            "r" => Some(Stamp::Reject),
            "w" => Some(Stamp::Unknown),
            _ => None,
        }
    }

    const fn verdict(self) -> &'static str {
        match self {
            Stamp::Pass => "OK",
            Stamp::Reject => "FAIL",
            Stamp::Unknown => "UNK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub reception: Stamp,
    pub acceptance: Stamp,
    pub execution: Stamp,
}

impl VerificationReport {
    pub const fn new(reception: Stamp, acceptance: Stamp, execution: Stamp) -> Self {
        Self { reception, acceptance, execution }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:REL {}:ACC {}:{}",
            self.reception.colour(),
            self.acceptance.colour(),
            self.execution.colour(),
            self.execution.verdict()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed verification string '{0}'")]
pub struct ReportParseError(pub String);

impl FromStr for VerificationReport {
    type Err = ReportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ReportParseError(s.to_string());
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [rel, acc, exe] = tokens.as_slice() else {
            return Err(err());
        };

        let stage = |token: &str, label: &str| -> Option<Stamp> {
            let (colour, name) = token.split_once(':')?;
            (name == label).then_some(())?;
            Stamp::from_colour(colour)
        };
        let reception = stage(*rel, "REL").ok_or_else(err)?;
        let acceptance = stage(*acc, "ACC").ok_or_else(err)?;

        let (colour, verdict) = exe.split_once(':').ok_or_else(err)?;
        let execution = Stamp::from_colour(colour).ok_or_else(err)?;
        if execution.verdict() != verdict {
            return Err(err());
        }
        Ok(Self::new(reception, acceptance, execution))
    }
}

/// Why a telecommand ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcOutcome {
    NoTelecommand,
    LinkNotReady,
    UplinkPowerLow,
    Blackout,
    Rejected,
    ObcLockout,
    ExecutionFailed,
    Executed,
}

impl TcOutcome {
    /// Report for this outcome before any telemetry downgrade.
    pub const fn report(self) -> VerificationReport {
        use Stamp::{Pass, Reject, Unknown};
        match self {
            TcOutcome::NoTelecommand => VerificationReport::new(Pass, Unknown, Unknown),
            TcOutcome::LinkNotReady => VerificationReport::new(Reject, Reject, Reject),
            TcOutcome::UplinkPowerLow | TcOutcome::Rejected => {
                VerificationReport::new(Pass, Reject, Reject)
            }
            TcOutcome::Blackout => VerificationReport::new(Unknown, Unknown, Unknown),
            TcOutcome::ObcLockout => VerificationReport::new(Pass, Pass, Unknown),
            TcOutcome::ExecutionFailed => VerificationReport::new(Pass, Pass, Reject),
            TcOutcome::Executed => VerificationReport::new(Pass, Pass, Pass),
        }
    }

    /// True when the command reached the onboard software.
    pub const fn reached_execution(self) -> bool {
        matches!(self, TcOutcome::ExecutionFailed | TcOutcome::Executed)
    }
}

/// A command type the verifier can parse and classify.
pub trait Telecommand: Sized {
    type Error: fmt::Display;

    fn parse(control: &str, value: &Value) -> Result<Self, Self::Error>;

    /// Commands still processed while the onboard computer is in error.
    fn high_priority(&self) -> bool;
}

/// Link and onboard conditions at the moment a telecommand arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UplinkConditions {
    pub carrier: OnOff,
    pub sweep_done: bool,
    pub power_ul: f64,
    pub mode: RfMode,
    pub x_antenna: Antenna,
    pub obc: Health,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub report: VerificationReport,
    pub outcome: TcOutcome,
    pub reason: Option<String>,
}

impl Verification {
    fn of(outcome: TcOutcome, reason: Option<String>) -> Self {
        Self { report: outcome.report(), outcome, reason }
    }

    pub fn status(&self) -> String {
        self.report.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TelecommandVerifier {
    min_uplink_power: f64,
}

impl Default for TelecommandVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_UPLINK_POWER)
    }
}

impl TelecommandVerifier {
    pub fn new(min_uplink_power: f64) -> Self {
        Self { min_uplink_power }
    }

    /// Classify a telecommand and, when every precondition holds, hand the
    /// parsed command to `execute`. `execute` returns the refusal reason of
    /// an onboard interlock.
    pub fn verify<C, F>(
        &self,
        conditions: &UplinkConditions,
        overrides: &OverrideState,
        control: &str,
        value: &Value,
        execute: F,
    ) -> Verification
    where
        C: Telecommand,
        F: FnOnce(C) -> Result<(), &'static str>,
    {
        if overrides.no_tc() {
            return Verification::of(TcOutcome::NoTelecommand, None);
        }
        // a blackout kills the uplink, so it outranks the link checks
        if link::is_blackout(conditions.mode, conditions.x_antenna) {
            return Verification::of(TcOutcome::Blackout, None);
        }
        if !conditions.carrier.is_on() || !conditions.sweep_done {
            return Verification::of(TcOutcome::LinkNotReady, None);
        }
        if conditions.power_ul < self.min_uplink_power {
            return Verification::of(TcOutcome::UplinkPowerLow, None);
        }

        let command = match C::parse(control, value) {
            Ok(command) => command,
            Err(e) => return Verification::of(TcOutcome::Rejected, Some(e.to_string())),
        };
        if conditions.obc == Health::Error && !command.high_priority() {
            return Verification::of(TcOutcome::ObcLockout, None);
        }

        let mut verification = match execute(command) {
            Ok(()) => Verification::of(TcOutcome::Executed, None),
            Err(reason) => Verification::of(TcOutcome::ExecutionFailed, Some(reason.to_string())),
        };
        // without telemetry the operator cannot see the execution result
        if overrides.no_tm() {
            verification.report.execution = Stamp::Unknown;
        }
        verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_and_parses_status_strings() {
        let cases = [
            (TcOutcome::Executed, "g:REL g:ACC g:OK"),
            (TcOutcome::ExecutionFailed, "g:REL g:ACC r:FAIL"),
            (TcOutcome::Rejected, "g:REL r:ACC r:FAIL"),
            (TcOutcome::LinkNotReady, "r:REL r:ACC r:FAIL"),
            (TcOutcome::NoTelecommand, "g:REL w:ACC w:UNK"),
            (TcOutcome::Blackout, "w:REL w:ACC w:UNK"),
            (TcOutcome::ObcLockout, "g:REL g:ACC w:UNK"),
        ];
        for (outcome, text) in cases {
            assert_eq!(outcome.report().to_string(), text);
            assert_eq!(text.parse::<VerificationReport>().unwrap(), outcome.report());
        }
    }

    #[test]
    fn rejects_malformed_status_strings() {
        for bad in ["", "g:REL g:ACC", "g:ACC g:REL g:OK", "g:REL g:ACC g:FAIL", "x:REL g:ACC g:OK"] {
            assert!(bad.parse::<VerificationReport>().is_err(), "{bad}");
        }
    }
}
