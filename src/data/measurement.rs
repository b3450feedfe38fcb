//! Measurement channels and values.
//!
//! The monitor stores readings for two users. Every reading lands in one of a
//! fixed set of channels; the set is known up front and never grows.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One of the two user slots the monitor keeps readings for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum UserSlot {
    /// First user, selector byte `0`.
    One = 0,
    /// Second user, selector byte `1`.
    Two = 1,
}

impl UserSlot {
    /// Both slots, in wire order.
    pub const ALL: [UserSlot; 2] = [UserSlot::One, UserSlot::Two];

    /// Create from the raw selector byte. Only `0` and `1` are valid.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::One),
            1 => Some(Self::Two),
            _ => None,
        }
    }

    /// The raw selector byte.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// The 1-based number shown on the device.
    pub fn display_number(&self) -> u8 {
        self.to_raw() + 1
    }
}

/// Units the monitor displays pressures in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisplayUnits {
    /// Kilopascal.
    KPa,
    /// Millimetres of mercury.
    MmHg,
}

impl DisplayUnits {
    /// Create from the config frame's units byte.
    pub fn from_raw(value: u8) -> Self {
        if value == 0x01 {
            Self::KPa
        } else {
            Self::MmHg
        }
    }

    /// Get the unit label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KPa => "kPa",
            Self::MmHg => "mmHg",
        }
    }
}

impl fmt::Display for DisplayUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayUnits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kPa" => Ok(Self::KPa),
            "mmHg" => Ok(Self::MmHg),
            other => Err(Error::InvalidParameter {
                name: "display_units".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// What kind of value a channel holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Pressures, pulse and signal strength.
    Integer,
    /// Irregular heartbeat.
    Flag,
    /// Display units.
    Units,
}

/// A named measurement slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeasurementChannel {
    /// Systolic pressure for a user.
    Systolic(UserSlot),
    /// Diastolic pressure for a user.
    Diastolic(UserSlot),
    /// Pulse rate for a user.
    Pulse(UserSlot),
    /// Irregular heartbeat flag for a user.
    IrregularHeartbeat(UserSlot),
    /// Units currently shown on the device display.
    DisplayUnits,
    /// Signal strength of the last advertisement.
    SignalStrength,
}

impl MeasurementChannel {
    /// Every channel a device snapshot carries.
    pub const ALL: [MeasurementChannel; 10] = [
        Self::Systolic(UserSlot::One),
        Self::Diastolic(UserSlot::One),
        Self::Pulse(UserSlot::One),
        Self::IrregularHeartbeat(UserSlot::One),
        Self::Systolic(UserSlot::Two),
        Self::Diastolic(UserSlot::Two),
        Self::Pulse(UserSlot::Two),
        Self::IrregularHeartbeat(UserSlot::Two),
        Self::DisplayUnits,
        Self::SignalStrength,
    ];

    /// Stable key, e.g. `systolic0` or `display_units`.
    pub fn key(&self) -> &'static str {
        use UserSlot::{One, Two};
        match self {
            Self::Systolic(One) => "systolic0",
            Self::Systolic(Two) => "systolic1",
            Self::Diastolic(One) => "diastolic0",
            Self::Diastolic(Two) => "diastolic1",
            Self::Pulse(One) => "pulse0",
            Self::Pulse(Two) => "pulse1",
            Self::IrregularHeartbeat(One) => "irregular_heartbeat0",
            Self::IrregularHeartbeat(Two) => "irregular_heartbeat1",
            Self::DisplayUnits => "display_units",
            Self::SignalStrength => "rssi",
        }
    }

    /// Look up a channel by its key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.key() == key)
    }

    /// Human readable name.
    pub fn name(&self) -> String {
        match self {
            Self::Systolic(u) => format!("Systolic Pressure User {}", u.display_number()),
            Self::Diastolic(u) => format!("Diastolic Pressure User {}", u.display_number()),
            Self::Pulse(u) => format!("Pulse User {}", u.display_number()),
            Self::IrregularHeartbeat(u) => {
                format!("Irregular Heartbeat User {}", u.display_number())
            }
            Self::DisplayUnits => "Display Units".to_string(),
            Self::SignalStrength => "Bluetooth Signal".to_string(),
        }
    }

    /// Native unit of measurement, if any.
    ///
    /// Pressures are always reported in mmHg on the wire, whatever the
    /// display shows.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Self::Systolic(_) | Self::Diastolic(_) => Some("mmHg"),
            Self::Pulse(_) => Some("bpm"),
            Self::SignalStrength => Some("dBm"),
            Self::IrregularHeartbeat(_) | Self::DisplayUnits => None,
        }
    }

    /// The kind of value this channel holds.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::IrregularHeartbeat(_) => ValueKind::Flag,
            Self::DisplayUnits => ValueKind::Units,
            _ => ValueKind::Integer,
        }
    }

    /// The user slot this channel belongs to.
    pub fn user(&self) -> Option<UserSlot> {
        match self {
            Self::Systolic(u) | Self::Diastolic(u) | Self::Pulse(u) | Self::IrregularHeartbeat(u) => {
                Some(*u)
            }
            Self::DisplayUnits | Self::SignalStrength => None,
        }
    }
}

impl fmt::Display for MeasurementChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for MeasurementChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_key(s).ok_or_else(|| Error::UnknownChannel { key: s.to_string() })
    }
}

/// A decoded measurement value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeasurementValue {
    /// Pressure, pulse or RSSI.
    Integer(i32),
    /// Irregular heartbeat flag.
    Flag(bool),
    /// Display units.
    Units(DisplayUnits),
}

impl MeasurementValue {
    /// Parse a persisted state string for a channel.
    ///
    /// Returns `None` when the string does not fit the channel's value kind.
    pub fn parse_for(channel: MeasurementChannel, state: &str) -> Option<Self> {
        let state = state.trim();
        match channel.value_kind() {
            ValueKind::Integer => state
                .parse::<i32>()
                .ok()
                .or_else(|| state.parse::<f64>().ok().map(|v| v.round() as i32))
                .map(Self::Integer),
            ValueKind::Flag => match state.to_ascii_lowercase().as_str() {
                "on" | "true" => Some(Self::Flag(true)),
                "off" | "false" => Some(Self::Flag(false)),
                _ => None,
            },
            ValueKind::Units => state.parse().ok().map(Self::Units),
        }
    }

    /// Get the integer value, if this is one.
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the flag value, if this is one.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the display units, if this is one.
    pub fn as_units(&self) -> Option<DisplayUnits> {
        match self {
            Self::Units(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Flag(true) => f.write_str("on"),
            Self::Flag(false) => f.write_str("off"),
            Self::Units(u) => write!(f, "{}", u),
        }
    }
}

/// A single `(channel, value)` pair produced by the decoder.
pub type MeasurementUpdate = (MeasurementChannel, MeasurementValue);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_slot_from_raw() {
        assert_eq!(UserSlot::from_raw(0), Some(UserSlot::One));
        assert_eq!(UserSlot::from_raw(1), Some(UserSlot::Two));
        assert_eq!(UserSlot::from_raw(2), None);
        assert_eq!(UserSlot::Two.display_number(), 2);
    }

    #[test]
    fn test_display_units_from_raw() {
        assert_eq!(DisplayUnits::from_raw(0x01), DisplayUnits::KPa);
        assert_eq!(DisplayUnits::from_raw(0x00), DisplayUnits::MmHg);
        assert_eq!(DisplayUnits::from_raw(0xFF), DisplayUnits::MmHg);
        assert_eq!(DisplayUnits::KPa.to_string(), "kPa");
    }

    #[test]
    fn test_channel_keys_are_unique_and_round_trip() {
        let keys: HashSet<_> = MeasurementChannel::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), MeasurementChannel::ALL.len());

        for channel in MeasurementChannel::ALL {
            assert_eq!(MeasurementChannel::from_key(channel.key()), Some(channel));
        }
        assert!("systolic2".parse::<MeasurementChannel>().is_err());
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(
            MeasurementChannel::Systolic(UserSlot::One).name(),
            "Systolic Pressure User 1"
        );
        assert_eq!(
            MeasurementChannel::IrregularHeartbeat(UserSlot::Two).name(),
            "Irregular Heartbeat User 2"
        );
        assert_eq!(MeasurementChannel::Pulse(UserSlot::One).unit(), Some("bpm"));
        assert_eq!(MeasurementChannel::DisplayUnits.unit(), None);
    }

    #[test]
    fn test_parse_persisted_state() {
        let sys = MeasurementChannel::Systolic(UserSlot::One);
        assert_eq!(
            MeasurementValue::parse_for(sys, "120"),
            Some(MeasurementValue::Integer(120))
        );
        assert_eq!(
            MeasurementValue::parse_for(sys, "119.6"),
            Some(MeasurementValue::Integer(120))
        );
        assert_eq!(MeasurementValue::parse_for(sys, "high"), None);

        let irregular = MeasurementChannel::IrregularHeartbeat(UserSlot::Two);
        assert_eq!(
            MeasurementValue::parse_for(irregular, "on"),
            Some(MeasurementValue::Flag(true))
        );
        assert_eq!(
            MeasurementValue::parse_for(irregular, "False"),
            Some(MeasurementValue::Flag(false))
        );

        assert_eq!(
            MeasurementValue::parse_for(MeasurementChannel::DisplayUnits, "kPa"),
            Some(MeasurementValue::Units(DisplayUnits::KPa))
        );
        assert_eq!(
            MeasurementValue::parse_for(MeasurementChannel::DisplayUnits, "psi"),
            None
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MeasurementValue::Integer(80).to_string(), "80");
        assert_eq!(MeasurementValue::Flag(true).to_string(), "on");
        assert_eq!(MeasurementValue::Units(DisplayUnits::MmHg).to_string(), "mmHg");
    }
}
