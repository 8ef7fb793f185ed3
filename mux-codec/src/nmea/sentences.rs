//! Typed parsers and builders for the five sentence identifiers this
//! multiplexer understands: RMC, VHW, DBT, MTW, MWV.
//!
//! Builders only ever see one canonical [`Message`] at a time, so a
//! field no single message carries (e.g. the heading in a `VHW` built
//! from a lone `SpeedThroughWater` reading) is emitted empty, per the
//! spec's "fields absent from the source message are encoded as empty
//! strings" rule.

use crate::message::{Message, SpeedUnit, WindReference};
use crate::nmea::build_line;

fn field<'a>(fields: &[&'a str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or("")
}

fn parse_lat(value: &str, hemi: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    let dot = value.find('.')?;
    let deg: f64 = value.get(..dot.saturating_sub(2))?.parse().ok()?;
    let min: f64 = value.get(dot.saturating_sub(2)..)?.parse().ok()?;
    let abs = deg + min / 60.0;
    Some(if hemi == "S" { -abs } else { abs })
}

fn parse_lon(value: &str, hemi: &str) -> Option<f64> {
    parse_lat(value, if hemi == "W" { "S" } else { "N" })
}

fn format_lat(lat_deg: f64) -> (String, &'static str) {
    let hemi = if lat_deg < 0.0 { "S" } else { "N" };
    let abs = lat_deg.abs();
    let deg = abs.trunc() as u32;
    let min = (abs.fract()) * 60.0;
    (format!("{deg:02}{min:07.4}"), hemi)
}

fn format_lon(lon_deg: f64) -> (String, &'static str) {
    let hemi = if lon_deg < 0.0 { "W" } else { "E" };
    let abs = lon_deg.abs();
    let deg = abs.trunc() as u32;
    let min = (abs.fract()) * 60.0;
    (format!("{deg:03}{min:07.4}"), hemi)
}

fn parse_time(value: &str) -> Option<(u8, u8, u8)> {
    if value.len() < 6 {
        return None;
    }
    Some((
        value[0..2].parse().ok()?,
        value[2..4].parse().ok()?,
        value[4..6].parse().ok()?,
    ))
}

fn parse_date(value: &str) -> Option<(u16, u8, u8)> {
    if value.len() != 6 {
        return None;
    }
    let day: u8 = value[0..2].parse().ok()?;
    let month: u8 = value[2..4].parse().ok()?;
    let yy: u16 = value[4..6].parse().ok()?;
    // NMEA carries only a two-digit year; pivot at 80 so GPS-era dates
    // (epoch 1980) read as 19xx and everything since as 20xx.
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };
    Some((year, month, day))
}

/// RMC bundles a fix, a ground track and a timestamp in one sentence;
/// a void (`status != 'A'`) fix carries no reliable data and yields no
/// messages. `Date` is emitted immediately before `GmtTime` so an
/// observer reading its queue in order (e.g. `SetTimeDevice`) sees the
/// date in hand before it needs it.
pub fn parse_rmc(fields: &[&str]) -> Option<Vec<Message>> {
    if field(fields, 1) != "A" {
        return None;
    }
    let mut out = Vec::new();

    if let Some((year, month, day)) = parse_date(field(fields, 8)) {
        out.push(Message::Date { year, month, day });
    }
    if let Some((hour, minute, second)) = parse_time(field(fields, 0)) {
        out.push(Message::GmtTime { hour, minute, second });
    }
    if let (Some(lat_deg), Some(lon_deg)) = (
        parse_lat(field(fields, 2), field(fields, 3)),
        parse_lon(field(fields, 4), field(fields, 5)),
    ) {
        out.push(Message::Position { lat_deg, lon_deg });
    }
    if let Ok(knots) = field(fields, 6).parse::<f32>() {
        out.push(Message::SpeedOverGround { knots });
    }
    if let Ok(degrees_true) = field(fields, 7).parse::<f32>() {
        out.push(Message::CourseOverGround { degrees_true });
    }
    if let Ok(variation) = field(fields, 9).parse::<f32>() {
        let degrees_east = if field(fields, 10) == "W" {
            -variation
        } else {
            variation
        };
        out.push(Message::MagneticVariation { degrees_east });
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

pub fn parse_vhw(fields: &[&str]) -> Option<Vec<Message>> {
    field(fields, 4).parse::<f32>().ok().map(|knots| {
        vec![Message::SpeedThroughWater { knots }]
    })
}

pub fn parse_dbt(fields: &[&str]) -> Option<Vec<Message>> {
    field(fields, 2).parse::<f32>().ok().map(|meters| {
        vec![Message::DepthBelowTransducer { meters }]
    })
}

pub fn parse_mtw(fields: &[&str]) -> Option<Vec<Message>> {
    field(fields, 0).parse::<f32>().ok().map(|celsius| {
        vec![Message::WaterTemperature { celsius }]
    })
}

pub fn parse_mwv(fields: &[&str]) -> Option<Vec<Message>> {
    let mut out = Vec::new();
    if let Ok(degrees) = field(fields, 0).parse::<f32>() {
        out.push(Message::ApparentWindAngle { degrees });
    }
    if let Ok(value) = field(fields, 2).parse::<f32>() {
        let unit = match field(fields, 3) {
            "M" => SpeedUnit::MetersPerSecond,
            _ => SpeedUnit::Knots,
        };
        out.push(Message::ApparentWindSpeed { value, unit });
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Encode a single [`Message`] as the one NMEA sentence it best fits,
/// leaving fields the message doesn't carry empty. Returns `None` for
/// variants with no NMEA representation (control/keystroke messages
/// that only make sense on a Seatalk bus).
pub fn encode(message: &Message, talker: &str) -> Option<String> {
    match message {
        Message::DepthBelowTransducer { meters } => {
            let feet = meters / 0.3048;
            let fathoms = meters / 1.8288;
            Some(build_line(
                &format!("{talker}DBT"),
                &[
                    format!("{feet:.1}"),
                    "f".into(),
                    format!("{meters:.1}"),
                    "M".into(),
                    format!("{fathoms:.1}"),
                    "F".into(),
                ],
            ))
        }
        Message::WaterTemperature { celsius } => Some(build_line(
            &format!("{talker}MTW"),
            &[format!("{celsius:.1}"), "C".into()],
        )),
        Message::SpeedThroughWater { knots } => Some(build_line(
            &format!("{talker}VHW"),
            &[
                String::new(),
                "T".into(),
                String::new(),
                "M".into(),
                format!("{knots:.1}"),
                "N".into(),
                format!("{:.1}", knots * 1.852),
                "K".into(),
            ],
        )),
        Message::ApparentWindAngle { degrees } => Some(build_line(
            &format!("{talker}MWV"),
            &[
                format!("{degrees:.1}"),
                wind_reference_code(WindReference::Relative).into(),
                String::new(),
                "N".into(),
                "A".into(),
            ],
        )),
        Message::ApparentWindSpeed { value, unit } => {
            let unit_code = match unit {
                SpeedUnit::Knots => "N",
                SpeedUnit::MetersPerSecond => "M",
            };
            Some(build_line(
                &format!("{talker}MWV"),
                &[
                    String::new(),
                    wind_reference_code(WindReference::Relative).into(),
                    format!("{value:.1}"),
                    unit_code.into(),
                    "A".into(),
                ],
            ))
        }
        Message::Position { lat_deg, lon_deg } => {
            let (lat, lat_h) = format_lat(*lat_deg);
            let (lon, lon_h) = format_lon(*lon_deg);
            Some(rmc_line(talker, |f| {
                f[2] = lat;
                f[3] = lat_h.to_string();
                f[4] = lon;
                f[5] = lon_h.to_string();
            }))
        }
        Message::SpeedOverGround { knots } => {
            Some(rmc_line(talker, |f| f[6] = format!("{knots:.1}")))
        }
        Message::CourseOverGround { degrees_true } => {
            Some(rmc_line(talker, |f| f[7] = format!("{degrees_true:.1}")))
        }
        Message::GmtTime { hour, minute, second } => Some(rmc_line(talker, |f| {
            f[0] = format!("{hour:02}{minute:02}{second:02}")
        })),
        Message::Date { year, month, day } => Some(rmc_line(talker, |f| {
            f[8] = format!("{day:02}{month:02}{:02}", year % 100)
        })),
        Message::MagneticVariation { degrees_east } => Some(rmc_line(talker, |f| {
            f[9] = format!("{:.1}", degrees_east.abs());
            f[10] = if *degrees_east < 0.0 { "W" } else { "E" }.to_string();
        })),
        Message::DisplayUnitMileageSpeed { .. }
        | Message::TripMileage { .. }
        | Message::TotalMileage { .. }
        | Message::LampIntensity { .. }
        | Message::Latitude { .. }
        | Message::Longitude { .. }
        | Message::SatelliteInfo { .. }
        | Message::Keystroke { .. }
        | Message::SetResponseLevel
        | Message::CancelMob
        | Message::ManOverBoard
        | Message::RawSeatalkDatagram { .. } => None,
        Message::RawNmeaLine { .. } => {
            unreachable!("RawNmeaLine is handled by nmea::encode before dispatch")
        }
    }
}

fn wind_reference_code(reference: WindReference) -> &'static str {
    match reference {
        WindReference::Relative => "R",
        WindReference::True => "T",
    }
}

/// Build an RMC line with every field blank except status (forced `A`,
/// since only valid fixes reach the encoder) and whatever `fill` sets.
fn rmc_line(talker: &str, fill: impl FnOnce(&mut [String; 11])) -> String {
    let mut fields: [String; 11] = Default::default();
    fields[1] = "A".to_string();
    fill(&mut fields);
    build_line(&format!("{talker}RMC"), &fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nmea::decode_line;

    #[test]
    fn parses_scenario_s1_rmc() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
        let messages = decode_line(line).unwrap();
        assert!(messages.contains(&Message::Date {
            year: 1994,
            month: 3,
            day: 23
        }));
        assert!(messages.contains(&Message::GmtTime {
            hour: 12,
            minute: 35,
            second: 19
        }));
        assert!(messages.iter().any(|m| matches!(m, Message::Position { .. })));
        assert!(messages.contains(&Message::SpeedOverGround { knots: 22.4 }));
        assert!(messages.contains(&Message::CourseOverGround { degrees_true: 84.4 }));
        assert!(messages.contains(&Message::MagneticVariation {
            degrees_east: -3.1
        }));
    }

    #[test]
    fn void_rmc_yields_nothing() {
        let body = "GPRMC,123519,V,,,,,,,230394,,";
        let sum = crate::nmea::checksum(body.as_bytes());
        let line = format!("${body}*{sum:02X}\r\n");
        assert!(decode_line(&line).unwrap().is_empty());
    }

    #[test]
    fn dbt_round_trips_scenario_s2() {
        let msg = Message::DepthBelowTransducer { meters: 3.048 };
        let line = encode(&msg, "II").unwrap();
        assert!(line.starts_with("$IIDBT,10.0,f,3.0,M,1.7,F*"));
        // The sentence's one-decimal fields can't carry the full input
        // precision back; the round trip lands on the rounded value.
        let decoded = decode_line(&line).unwrap();
        assert_eq!(decoded, vec![Message::DepthBelowTransducer { meters: 3.0 }]);
    }

    #[test]
    fn mtw_round_trips_scenario_s3() {
        let msg = Message::WaterTemperature { celsius: 21.5 };
        let line = encode(&msg, "II").unwrap();
        let decoded = decode_line(&line).unwrap();
        assert_eq!(decoded, vec![msg]);
    }
}
