//! Spacecraft telecommands.
//!
//! [`SpacecraftCommand`] is the closed set operators can uplink.
//! [`AdminCommand`] adds the instructor-only actions and applies commands
//! without interlocks.

use super::{enter_safe_mode, SafeModeCause, SpacecraftState};
use crate::control::{value_bool, value_text};
use crate::model::{
    Antenna, AocsValidity, Band, Chain, Enablement, Health, ObswMode, OnOff, PointingMode,
    RfMode, SolarArrayStatus,
};
use crate::overrides::OverrideState;
use crate::verifier::Telecommand;
use core::str::FromStr;
use serde_json::Value;

/// Alias accepted for `eps_` controls.
const LEGACY_EPS_PREFIX: &str = "pts_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown control '{0}'")]
    UnknownControl(String),
    #[error("invalid value '{value}' for {control}")]
    InvalidValue { control: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Aocs,
    Ttc,
    Eps,
    Dhs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadUnit {
    Gps,
    Camera,
    Sdr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpacecraftCommand {
    AocsMode(PointingMode),
    AocsValid(AocsValidity),
    Chain(Unit, Chain),
    TtcMode(RfMode),
    Antenna(Band, Antenna),
    PingAck,
    Coherent(bool),
    TxStatus(OnOff),
    Ranging(Enablement),
    ObcReset,
    SolarArray(usize, SolarArrayStatus),
    ObswMode(ObswMode),
    MemDump(bool),
    Upload(String),
    Payload(PayloadUnit, OnOff),
}

/// Whether onboard interlocks are checked when a command executes.
#[derive(Debug, Clone, Copy)]
pub enum Interlocks<'a> {
    Enforced(&'a OverrideState),
    Bypassed,
}

fn invalid(control: &str, value: &Value) -> CommandError {
    CommandError::InvalidValue {
        control: control.to_string(),
        value: value_text(value).unwrap_or_else(|| value.to_string()),
    }
}

fn parse_value<T: FromStr>(control: &str, value: &Value) -> Result<T, CommandError> {
    value_text(value)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid(control, value))
}

fn parse_bool(control: &str, value: &Value) -> Result<bool, CommandError> {
    value_bool(value).ok_or_else(|| invalid(control, value))
}

impl SpacecraftCommand {
    pub fn parse(control: &str, value: &Value) -> Result<Self, CommandError> {
        let name = control.trim();
        let name = match name.strip_prefix(LEGACY_EPS_PREFIX) {
            Some(rest) => format!("eps_{rest}"),
            None => name.to_string(),
        };

        let command = match name.as_str() {
            "aocs_mode" => Self::AocsMode(parse_value(control, value)?),
            "aocs_valid" => Self::AocsValid(parse_value(control, value)?),
            "aocs_chain" => Self::Chain(Unit::Aocs, parse_value(control, value)?),
            "ttc_chain" => Self::Chain(Unit::Ttc, parse_value(control, value)?),
            "eps_chain" => Self::Chain(Unit::Eps, parse_value(control, value)?),
            "dhs_chain" => Self::Chain(Unit::Dhs, parse_value(control, value)?),
            "ttc_mode" => Self::TtcMode(parse_value(control, value)?),
            "ttc_s_antenna" => Self::Antenna(Band::S, parse_value(control, value)?),
            "ttc_x_antenna" => Self::Antenna(Band::X, parse_value(control, value)?),
            "ttc_ping_ack" => Self::PingAck,
            "ttc_coherent" => Self::Coherent(parse_bool(control, value)?),
            "ttc_tx_status" => Self::TxStatus(parse_value(control, value)?),
            "ttc_ranging" => Self::Ranging(parse_value(control, value)?),
            "ttc_obc_reset" => Self::ObcReset,
            "eps_sol_array__0" => Self::SolarArray(0, parse_value(control, value)?),
            "eps_sol_array__1" => Self::SolarArray(1, parse_value(control, value)?),
            "dhs_obsw_mode" => Self::ObswMode(parse_value(control, value)?),
            "dhs_mem_dump_enabled" => Self::MemDump(parse_bool(control, value)?),
            "dhs_uploaded" => {
                let file = value_text(value)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| invalid(control, value))?;
                Self::Upload(file)
            }
            "pl_gps_status" => Self::Payload(PayloadUnit::Gps, parse_value(control, value)?),
            "pl_camera_status" => Self::Payload(PayloadUnit::Camera, parse_value(control, value)?),
            "pl_sdr_status" => Self::Payload(PayloadUnit::Sdr, parse_value(control, value)?),
            _ => return Err(CommandError::UnknownControl(control.to_string())),
        };
        Ok(command)
    }

    /// Mutate the state. Refusals carry the interlock that blocked the
    /// command.
    pub fn apply(
        self,
        state: &mut SpacecraftState,
        interlocks: Interlocks<'_>,
    ) -> Result<(), &'static str> {
        let enforced = matches!(interlocks, Interlocks::Enforced(_));
        match self {
            Self::AocsMode(mode) => state.aocs.mode = mode,
            Self::AocsValid(valid) => state.aocs.valid = valid,
            Self::Chain(unit, chain) => {
                match unit {
                    Unit::Aocs => state.aocs.chain = chain,
                    Unit::Ttc => state.ttc.chain = chain,
                    Unit::Eps => state.eps.chain = chain,
                    Unit::Dhs => state.dhs.chain = chain,
                }
                // switching power or data handling reboots into survival
                if matches!(unit, Unit::Eps | Unit::Dhs) {
                    state.dhs.obsw_mode = ObswMode::Safe;
                    state.aocs.mode = PointingMode::Sun;
                }
            }
            Self::TtcMode(mode) => state.ttc.mode = mode,
            Self::Antenna(Band::S, antenna) => state.ttc.s_antenna = antenna,
            Self::Antenna(Band::X, antenna) => state.ttc.x_antenna = antenna,
            Self::PingAck => state.ttc.ping_ack = state.ttc.ping_ack.wrapping_add(1),
            Self::Coherent(on) => state.ttc.coherent = on,
            Self::TxStatus(status) => state.ttc.tx_status = status,
            Self::Ranging(ranging) => state.ttc.ranging = ranging,
            Self::ObcReset => state.ttc.obc = Health::Nominal,
            Self::SolarArray(index, status) => {
                let slot = state.eps.sol_array.get_mut(index).ok_or("no such solar array")?;
                *slot = status;
            }
            Self::ObswMode(mode) => state.dhs.obsw_mode = mode,
            Self::MemDump(on) => state.dhs.mem_dump_enabled = on,
            Self::Upload(file) => {
                if let Interlocks::Enforced(overrides) = interlocks {
                    if overrides.no_uploads() {
                        return Err("uploads blocked");
                    }
                }
                state.dhs.uploaded.push(file);
            }
            Self::Payload(unit, status) => {
                if enforced && state.dhs.obsw_mode == ObswMode::Safe {
                    return Err("payload commanding refused in safe mode");
                }
                match unit {
                    PayloadUnit::Gps => state.pl.gps_status = status,
                    PayloadUnit::Camera => state.pl.camera_status = status,
                    PayloadUnit::Sdr => state.pl.sdr_status = status,
                }
            }
        }
        Ok(())
    }
}

impl Telecommand for SpacecraftCommand {
    type Error = CommandError;

    fn parse(control: &str, value: &Value) -> Result<Self, Self::Error> {
        SpacecraftCommand::parse(control, value)
    }

    fn high_priority(&self) -> bool {
        matches!(
            self,
            Self::PingAck
                | Self::Chain(Unit::Ttc | Unit::Dhs, _)
                | Self::ObcReset
                | Self::ObswMode(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    SafeMode,
    /// `true` injects an onboard computer error, `false` clears it.
    ObcError(bool),
    Telecommand(SpacecraftCommand),
}

impl AdminCommand {
    pub fn parse(control: &str, value: &Value) -> Result<Self, CommandError> {
        match control.trim() {
            "safe_mode" => Ok(Self::SafeMode),
            "obc_error" => Ok(Self::ObcError(parse_bool(control, value)?)),
            _ => SpacecraftCommand::parse(control, value).map(Self::Telecommand),
        }
    }

    pub fn apply(self, state: &mut SpacecraftState) -> Result<(), &'static str> {
        match self {
            Self::SafeMode => enter_safe_mode(state, SafeModeCause::Operator),
            Self::ObcError(true) => state.ttc.obc = Health::Error,
            Self::ObcError(false) => state.ttc.obc = Health::Nominal,
            Self::Telecommand(command) => command.apply(state, Interlocks::Bypassed)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::OverrideUpdate;
    use serde_json::json;

    #[test]
    fn parses_the_command_set() {
        assert_eq!(
            SpacecraftCommand::parse("aocs_mode", &json!("RATEDAMPING")).unwrap(),
            SpacecraftCommand::AocsMode(PointingMode::RateDamping)
        );
        assert_eq!(
            SpacecraftCommand::parse("ttc_mode", &json!("X_Res_LBR")).unwrap(),
            SpacecraftCommand::TtcMode(RfMode::XResLbr)
        );
        assert_eq!(
            SpacecraftCommand::parse("pts_sol_array__1", &json!("disabled")).unwrap(),
            SpacecraftCommand::SolarArray(1, SolarArrayStatus::Disabled)
        );
        assert_eq!(
            SpacecraftCommand::parse("dhs_mem_dump_enabled", &json!(true)).unwrap(),
            SpacecraftCommand::MemDump(true)
        );
        assert_eq!(
            SpacecraftCommand::parse("ttc_ping_ack", &Value::Null).unwrap(),
            SpacecraftCommand::PingAck
        );
    }

    #[test]
    fn rejects_unknown_controls_and_values() {
        assert!(matches!(
            SpacecraftCommand::parse("aocs_spin", &json!("fast")),
            Err(CommandError::UnknownControl(_))
        ));
        assert!(matches!(
            SpacecraftCommand::parse("aocs_chain", &json!("C")),
            Err(CommandError::InvalidValue { .. })
        ));
        assert!(SpacecraftCommand::parse("eps_sol_array__2", &json!("nominal")).is_err());
        assert!(SpacecraftCommand::parse("dhs_uploaded", &json!("  ")).is_err());
    }

    #[test]
    fn high_priority_allow_list() {
        let allowed = [
            ("ttc_ping_ack", json!(null)),
            ("ttc_chain", json!("B")),
            ("ttc_obc_reset", json!(null)),
            ("dhs_chain", json!("A")),
            ("dhs_obsw_mode", json!("nominal")),
        ];
        for (control, value) in allowed {
            assert!(SpacecraftCommand::parse(control, &value).unwrap().high_priority(), "{control}");
        }
        for (control, value) in [("aocs_chain", json!("B")), ("ttc_tx_status", json!("on"))] {
            assert!(!SpacecraftCommand::parse(control, &value).unwrap().high_priority());
        }
    }

    #[test]
    fn chain_switch_side_effects() {
        let mut state = SpacecraftState::default();
        SpacecraftCommand::Chain(Unit::Ttc, Chain::B)
            .apply(&mut state, Interlocks::Bypassed)
            .unwrap();
        assert_eq!(state.dhs.obsw_mode, ObswMode::Nominal);

        SpacecraftCommand::Chain(Unit::Eps, Chain::B)
            .apply(&mut state, Interlocks::Bypassed)
            .unwrap();
        assert_eq!(state.eps.chain, Chain::B);
        assert_eq!(state.dhs.obsw_mode, ObswMode::Safe);
        assert_eq!(state.aocs.mode, PointingMode::Sun);
    }

    #[test]
    fn interlocks_apply_to_operators_only() {
        let mut overrides = OverrideState::default();
        overrides.apply(OverrideUpdate::parse("no_uploads", &json!(true)).unwrap());
        let mut state = SpacecraftState::default();

        let upload = SpacecraftCommand::Upload("patch.bin".into());
        assert_eq!(
            upload.clone().apply(&mut state, Interlocks::Enforced(&overrides)),
            Err("uploads blocked")
        );
        assert!(state.dhs.uploaded.is_empty());
        AdminCommand::Telecommand(upload).apply(&mut state).unwrap();
        assert_eq!(state.dhs.uploaded, vec!["patch.bin".to_string()]);

        state.dhs.obsw_mode = ObswMode::Safe;
        let camera = SpacecraftCommand::Payload(PayloadUnit::Camera, OnOff::On);
        assert!(camera
            .clone()
            .apply(&mut state, Interlocks::Enforced(&OverrideState::default()))
            .is_err());
        AdminCommand::Telecommand(camera).apply(&mut state).unwrap();
        assert_eq!(state.pl.camera_status, OnOff::On);
    }

    #[test]
    fn admin_actions() {
        let mut state = SpacecraftState::default();
        AdminCommand::parse("obc_error", &json!(true)).unwrap().apply(&mut state).unwrap();
        assert_eq!(state.ttc.obc, Health::Error);
        AdminCommand::parse("obc_error", &json!("false")).unwrap().apply(&mut state).unwrap();
        assert_eq!(state.ttc.obc, Health::Nominal);
        AdminCommand::parse("safe_mode", &Value::Null).unwrap().apply(&mut state).unwrap();
        assert_eq!(state.dhs.obsw_mode, ObswMode::Safe);
        assert_eq!(state.safe_mode_entries, 1);
    }
}
