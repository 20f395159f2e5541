//! Shared vocabulary of the simulator.
//!
//! Every enumeration that crosses the control channel, the published state
//! snapshots or the binary telemetry frame lives here. Each one carries an
//! explicit wire ordinal (used by [`crate::codec`]) and a canonical name
//! (used by JSON and by operator commands), so neither depends on
//! declaration order.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Error returned when a name does not match any variant of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $ord:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire ordinal used by the telemetry frame.
            pub const fn ordinal(self) -> u8 {
                match self {
                    $($name::$variant => $ord),+
                }
            }

            pub fn from_ordinal(value: u8) -> Option<Self> {
                match value {
                    $($ord => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    })
            }
        }
    };
}

wire_enum! {
    /// RF acquisition stage of a link.
    ///
    /// Ordering goes through [`LockState::rank`], never through the wire
    /// ordinal or declaration order.
    #[derive(Default)]
    pub enum LockState {
        #[default]
        NoRf = 1 => "NO_RF",
        PllLock = 2 => "PLL_LOCK",
        PskLock = 3 => "PSK_LOCK",
        BitLock = 4 => "BIT_LOCK",
        FrameLock = 5 => "FRAME_LOCK",
    }
}

impl LockState {
    pub const fn rank(self) -> u8 {
        match self {
            LockState::NoRf => 0,
            LockState::PllLock => 1,
            LockState::PskLock => 2,
            LockState::BitLock => 3,
            LockState::FrameLock => 4,
        }
    }

    pub fn at_least(self, floor: LockState) -> bool {
        self.rank() >= floor.rank()
    }
}

impl PartialOrd for LockState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LockState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

wire_enum! {
    /// Transponder configuration, shared by ground station and spacecraft.
    #[derive(Default)]
    pub enum RfMode {
        SSupLbr = 1 => "S_Sup_LBR",
        SSupHbr = 2 => "S_Sup_HBR",
        XSupLbr = 3 => "X_Sup_LBR",
        XSupHbr = 4 => "X_Sup_HBR",
        SResLbr = 5 => "S_Res_LBR",
        XResLbr = 6 => "X_Res_LBR",
        #[default]
        SSubLbr = 7 => "S_Sub_LBR",
        XSubLbr = 8 => "X_Sub_LBR",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    S,
    X,
}

/// Downlink modulation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Carrier {
    /// Suppressed carrier (PSK).
    Sup,
    /// Residual carrier (SP-L/PM).
    Res,
    /// Subcarrier (NRZ/PSK/PM).
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitRate {
    Lbr,
    Hbr,
}

impl RfMode {
    pub const fn band(self) -> Band {
        match self {
            RfMode::SSupLbr | RfMode::SSupHbr | RfMode::SResLbr | RfMode::SSubLbr => Band::S,
            RfMode::XSupLbr | RfMode::XSupHbr | RfMode::XResLbr | RfMode::XSubLbr => Band::X,
        }
    }

    pub const fn carrier(self) -> Carrier {
        match self {
            RfMode::SSupLbr | RfMode::SSupHbr | RfMode::XSupLbr | RfMode::XSupHbr => Carrier::Sup,
            RfMode::SResLbr | RfMode::XResLbr => Carrier::Res,
            RfMode::SSubLbr | RfMode::XSubLbr => Carrier::Sub,
        }
    }

    pub const fn bit_rate(self) -> BitRate {
        match self {
            RfMode::SSupHbr | RfMode::XSupHbr => BitRate::Hbr,
            _ => BitRate::Lbr,
        }
    }
}

wire_enum! {
    pub enum OnOff {
        On = 6 => "on",
        Off = 7 => "off",
    }
}

impl OnOff {
    pub fn is_on(self) -> bool {
        self == OnOff::On
    }
}

impl From<bool> for OnOff {
    fn from(on: bool) -> Self {
        if on {
            OnOff::On
        } else {
            OnOff::Off
        }
    }
}

wire_enum! {
    pub enum Enablement {
        Enabled = 1 => "enabled",
        Disabled = 2 => "disabled",
    }
}

impl Enablement {
    pub fn is_enabled(self) -> bool {
        self == Enablement::Enabled
    }
}

impl From<bool> for Enablement {
    fn from(enabled: bool) -> Self {
        if enabled {
            Enablement::Enabled
        } else {
            Enablement::Disabled
        }
    }
}

wire_enum! {
    pub enum FrameQuality {
        Good = 1 => "good",
        Bad = 2 => "bad",
        Unknown = 3 => "unknown",
    }
}

wire_enum! {
    /// Redundancy chain selector. The ordinal is the ASCII letter.
    pub enum Chain {
        A = b'A' => "A",
        B = b'B' => "B",
    }
}

wire_enum! {
    pub enum PointingMode {
        Sun = 1 => "SUN",
        Target = 2 => "TARGET",
        Nadir = 3 => "NADIR",
        RateDamping = 4 => "RATEDAMPING",
        Monitoring = 5 => "MONITORING",
    }
}

wire_enum! {
    pub enum AocsValidity {
        Unknown = 3 => "unknown",
        NotValid = 8 => "not_valid",
        Valid = 9 => "valid",
    }
}

wire_enum! {
    pub enum ObswMode {
        Nominal = 4 => "nominal",
        Safe = 5 => "safe",
    }
}

wire_enum! {
    /// Solar array branch status. Only `nominal` branches produce power.
    pub enum SolarArrayStatus {
        Enabled = 1 => "enabled",
        Disabled = 2 => "disabled",
        Nominal = 4 => "nominal",
    }
}

wire_enum! {
    pub enum Antenna {
        Lga = 1 => "LGA",
        Hga = 2 => "HGA",
    }
}

wire_enum! {
    /// Health of an onboard unit (OBC, PCDU).
    #[derive(Default)]
    pub enum Health {
        #[default]
        Nominal = 1 => "nominal",
        Error = 2 => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_defaults() {
        assert_eq!(LockState::default(), LockState::NoRf);
        assert_eq!(RfMode::default(), RfMode::SSubLbr);
        assert_eq!(Health::default(), Health::Nominal);
    }

    #[test]
    fn lock_state_order_follows_rank() {
        assert!(LockState::NoRf < LockState::PllLock);
        assert!(LockState::PllLock < LockState::PskLock);
        assert!(LockState::PskLock < LockState::BitLock);
        assert!(LockState::BitLock < LockState::FrameLock);
        assert!(LockState::FrameLock.at_least(LockState::BitLock));
        assert!(!LockState::PllLock.at_least(LockState::BitLock));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("x_sup_hbr".parse::<RfMode>().unwrap(), RfMode::XSupHbr);
        assert_eq!(" ON ".parse::<OnOff>().unwrap(), OnOff::On);
        assert_eq!("RateDamping".parse::<PointingMode>().unwrap(), PointingMode::RateDamping);
        assert!("C".parse::<Chain>().is_err());
    }

    #[test]
    fn ordinals_round_trip() {
        for mode in RfMode::ALL {
            assert_eq!(RfMode::from_ordinal(mode.ordinal()), Some(*mode));
        }
        assert_eq!(Chain::A.ordinal(), b'A');
        assert_eq!(LockState::from_ordinal(0), None);
    }

    #[test]
    fn mode_decomposition() {
        assert_eq!(RfMode::XSupHbr.band(), Band::X);
        assert_eq!(RfMode::XSupHbr.bit_rate(), BitRate::Hbr);
        assert_eq!(RfMode::SResLbr.carrier(), Carrier::Res);
        assert_eq!(RfMode::SSubLbr.band(), Band::S);
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&LockState::FrameLock).unwrap();
        assert_eq!(json, "\"FRAME_LOCK\"");
        let mode: RfMode = serde_json::from_str("\"X_Res_LBR\"").unwrap();
        assert_eq!(mode, RfMode::XResLbr);
    }
}
