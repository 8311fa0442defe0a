//! # Servo Equipment Demands
//!
//! Demands sent to the helm exec over UDP. Each datagram carries the current demand as ASCII text
//! of the form `"<throttle_pct>,<rudder_pct>"`, for example `"50.0,-20.0"`. There is no framing,
//! sequencing or acknowledgement, a demand is the current desired state and a newer datagram
//! simply replaces an older one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum length of a demands datagram in bytes. Anything longer is rejected.
pub const MAX_DEMS_PACKET_LEN: usize = 32;

/// Valid range of the throttle demand, in percent.
pub const THROTTLE_RANGE_PCT: (f64, f64) = (0.0, 100.0);

/// Valid range of the rudder demand, in percent. Negative values are to port.
pub const RUDDER_RANGE_PCT: (f64, f64) = (-100.0, 100.0);

/// Separator between the throttle and rudder fields.
const FIELD_SEPARATOR: char = ',';

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Throttle and rudder demands for the vehicle.
///
/// Values are not range checked when parsed, it is up to the servo controller to reject out of
/// range demands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoDems {
    /// Throttle demand as a percentage, valid in [0, 100]
    pub throttle_pct: f64,

    /// Rudder demand as a percentage, valid in [-100, 100]
    pub rudder_pct: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Reasons a demands packet can be rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DemsParseError {
    #[error("Packet is empty")]
    Empty,

    #[error("Packet is {0} bytes long, the maximum is {}", MAX_DEMS_PACKET_LEN)]
    Oversized(usize),

    #[error("Packet is not valid ASCII text")]
    NotText,

    #[error("Expected two fields separated by '{}', found none", FIELD_SEPARATOR)]
    MissingSeparator,

    #[error("Expected two fields separated by '{}', found {0}", FIELD_SEPARATOR)]
    TooManyFields(usize),

    #[error("The {0} field ({1:?}) is not a number")]
    InvalidNumber(&'static str, String),

    #[error("The {0} field is not a finite number")]
    NotFinite(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoDems {
    /// Neutral demands, throttle off and rudder centred.
    pub const NEUTRAL: ServoDems = ServoDems {
        throttle_pct: 0.0,
        rudder_pct: 0.0,
    };

    pub fn new(throttle_pct: f64, rudder_pct: f64) -> Self {
        Self {
            throttle_pct,
            rudder_pct,
        }
    }

    /// Parse demands from the raw contents of a datagram.
    pub fn from_packet(packet: &[u8]) -> Result<Self, DemsParseError> {
        if packet.len() > MAX_DEMS_PACKET_LEN {
            return Err(DemsParseError::Oversized(packet.len()));
        }

        let text = std::str::from_utf8(packet).map_err(|_| DemsParseError::NotText)?;

        text.parse()
    }

    /// Serialize the demands into the contents of a datagram.
    ///
    /// Values are written with three decimal places, in range demands always fit within
    /// [`MAX_DEMS_PACKET_LEN`].
    pub fn to_packet(&self) -> String {
        format!(
            "{:.3}{}{:.3}",
            self.throttle_pct, FIELD_SEPARATOR, self.rudder_pct
        )
    }

    /// Returns true if the throttle demand is within [`THROTTLE_RANGE_PCT`].
    pub fn throttle_valid(&self) -> bool {
        self.throttle_pct >= THROTTLE_RANGE_PCT.0 && self.throttle_pct <= THROTTLE_RANGE_PCT.1
    }

    /// Returns true if the rudder demand is within [`RUDDER_RANGE_PCT`].
    pub fn rudder_valid(&self) -> bool {
        self.rudder_pct >= RUDDER_RANGE_PCT.0 && self.rudder_pct <= RUDDER_RANGE_PCT.1
    }
}

impl Default for ServoDems {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl FromStr for ServoDems {
    type Err = DemsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Senders such as netcat append a newline, so surrounding whitespace is ignored
        let s = s.trim();

        if s.is_empty() {
            return Err(DemsParseError::Empty);
        }

        let fields: Vec<&str> = s.split(FIELD_SEPARATOR).collect();

        match fields.len() {
            1 => Err(DemsParseError::MissingSeparator),
            2 => Ok(Self {
                throttle_pct: parse_field("throttle", fields[0])?,
                rudder_pct: parse_field("rudder", fields[1])?,
            }),
            n => Err(DemsParseError::TooManyFields(n)),
        }
    }
}

impl fmt::Display for ServoDems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "throttle {:.1} %, rudder {:.1} %",
            self.throttle_pct, self.rudder_pct
        )
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_field(name: &'static str, token: &str) -> Result<f64, DemsParseError> {
    let token = token.trim();

    let value: f64 = token
        .parse()
        .map_err(|_| DemsParseError::InvalidNumber(name, token.to_string()))?;

    if value.is_finite() {
        Ok(value)
    }
    else {
        Err(DemsParseError::NotFinite(name))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
