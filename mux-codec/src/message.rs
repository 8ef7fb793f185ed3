//! The canonical, codec-independent representation of an instrumentation
//! reading. A [`Message`] is produced by either the NMEA or the Seatalk
//! codec and is exchanged between devices regardless of which family
//! decoded or will re-encode it.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Unit a wind speed or mileage/speed display is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeedUnit {
    Knots,
    MetersPerSecond,
}

/// Unit the mileage/speed display panel is set to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistanceUnit {
    NauticalMiles,
    StatuteMiles,
    Kilometers,
}

/// Relative vs. true wind angle reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WindReference {
    Relative,
    True,
}

/// A single decoded instrumentation reading, tagged by variant.
///
/// All angles are normalized to `[0, 360)`, latitudes to `[-90, 90]`,
/// longitudes to `[-180, 180)`, and speeds/mileages are non-negative.
/// `decode` never returns a [`Message`] that violates these invariants;
/// see [`Message::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    DepthBelowTransducer { meters: f32 },
    SpeedThroughWater { knots: f32 },
    WaterTemperature { celsius: f32 },
    ApparentWindAngle { degrees: f32 },
    ApparentWindSpeed { value: f32, unit: SpeedUnit },
    TripMileage { nautical_miles: f32 },
    TotalMileage { nautical_miles: f32 },
    DisplayUnitMileageSpeed { unit: DistanceUnit },
    /// Backlight level: 0 (off) to 3 (bright).
    LampIntensity { level: u8 },
    Position { lat_deg: f64, lon_deg: f64 },
    Latitude { lat_deg: f64 },
    Longitude { lon_deg: f64 },
    SpeedOverGround { knots: f32 },
    CourseOverGround { degrees_true: f32 },
    GmtTime { hour: u8, minute: u8, second: u8 },
    Date { year: u16, month: u8, day: u8 },
    SatelliteInfo { count: u8 },
    Keystroke { code: u8 },
    SetResponseLevel,
    CancelMob,
    ManOverBoard,
    /// East-positive magnetic variation, degrees.
    MagneticVariation { degrees_east: f32 },
    /// An NMEA line that carries no typed parser, preserved verbatim so it
    /// can round-trip through an NMEA observer byte-for-byte.
    RawNmeaLine { bytes: String },
    /// A Seatalk datagram with no canonical semantic mapping (equipment
    /// IDs, code locks, autopilot setup, ...), preserved verbatim so it
    /// can round-trip through a Seatalk observer byte-for-byte.
    RawSeatalkDatagram { command: u8, bytes: Vec<u8> },
}

/// A decoded value that failed a domain invariant and was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

impl Message {
    /// Reject messages whose value is outside the domain the spec
    /// guarantees. Called by both codecs right after a successful parse;
    /// a rejected message is dropped, never emitted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        fn angle_0_360(v: f32) -> bool {
            (0.0..360.0).contains(&v)
        }
        match self {
            Message::ApparentWindAngle { degrees } if !angle_0_360(*degrees) => {
                Err(ValidationError(format!("angle {degrees} outside [0, 360)")))
            }
            Message::CourseOverGround { degrees_true }
                if !angle_0_360(*degrees_true) =>
            {
                Err(ValidationError(format!(
                    "course {degrees_true} outside [0, 360)"
                )))
            }
            Message::SpeedThroughWater { knots } if *knots < 0.0 => Err(
                ValidationError(format!("speed {knots} is negative")),
            ),
            Message::SpeedOverGround { knots } if *knots < 0.0 => Err(
                ValidationError(format!("speed {knots} is negative")),
            ),
            Message::ApparentWindSpeed { value, .. } if *value < 0.0 => Err(
                ValidationError(format!("wind speed {value} is negative")),
            ),
            Message::Position { lat_deg, lon_deg } => {
                check_lat_lon(*lat_deg, *lon_deg)
            }
            Message::Latitude { lat_deg } => check_lat_lon(*lat_deg, 0.0),
            Message::Longitude { lon_deg } => check_lat_lon(0.0, *lon_deg),
            _ => Ok(()),
        }
    }
}

fn check_lat_lon(lat_deg: f64, lon_deg: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&lat_deg) {
        return Err(ValidationError(format!(
            "latitude {lat_deg} outside [-90, 90]"
        )));
    }
    if !(-180.0..180.0).contains(&lon_deg) {
        return Err(ValidationError(format!(
            "longitude {lon_deg} outside [-180, 180)"
        )));
    }
    Ok(())
}

/// A [`Message`] queued for delivery to one observer, stamped with the
/// monotonic instant it entered that observer's queue so the writer task
/// can drop it once it ages past `max_item_age`.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub message: Message,
    pub enqueued_at: Instant,
}

impl Enqueued {
    pub fn new(message: Message) -> Self {
        Enqueued {
            message,
            enqueued_at: Instant::now(),
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_out_of_range_angle() {
        let msg = Message::ApparentWindAngle { degrees: 361.0 };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn rejects_negative_speed() {
        let msg = Message::SpeedThroughWater { knots: -1.0 };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn accepts_boundary_position() {
        let msg = Message::Position {
            lat_deg: -90.0,
            lon_deg: -180.0,
        };
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn rejects_longitude_at_180() {
        let msg = Message::Position {
            lat_deg: 0.0,
            lon_deg: 180.0,
        };
        assert!(msg.validate().is_err());
    }
}
