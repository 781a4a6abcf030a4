//! Output formatting for the inspection commands

use crate::core::protocol::{compass_direction, GpsFixQuality, Sentence};
use clap::ValueEnum;
use std::fmt::Write;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

fn push_coordinates(out: &mut String, latitude: Option<f64>, longitude: Option<f64>) {
    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        let _ = write!(out, " {:.6},{:.6}", lat, lon);
    }
}

/// Render one decoded sentence
pub fn format_sentence(
    sentence: &Sentence,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return serde_json::to_string(sentence);
    }

    let mut out = String::new();
    match sentence {
        Sentence::Rmc(rmc) => {
            out.push_str("RMC");
            if let Some(status) = rmc.status {
                let _ = write!(out, " status={}", status);
            }
            push_coordinates(&mut out, rmc.latitude, rmc.longitude);
            if let Some(speed) = rmc.speed {
                let _ = write!(out, " {:.2} km/h", speed.kmh);
            }
            if let Some(course) = rmc.course {
                let _ = write!(out, " course={:.1} ({})", course, compass_direction(course));
            }
        }
        Sentence::Gga(gga) => {
            out.push_str("GGA");
            push_coordinates(&mut out, gga.latitude, gga.longitude);
            if let Some(quality) = gga.fix_quality {
                let _ = write!(out, " fix={}", GpsFixQuality::label_for(quality));
            }
            if let Some(satellites) = gga.satellites {
                let _ = write!(out, " sats={}", satellites);
            }
            if let Some(hdop) = gga.hdop {
                let _ = write!(out, " hdop={}", hdop);
            }
            if let Some(altitude) = gga.altitude {
                let _ = write!(out, " alt={}m", altitude);
            }
        }
        Sentence::Vtg(vtg) => {
            out.push_str("VTG");
            if let Some(course) = vtg.course {
                let _ = write!(out, " course={:.1} ({})", course, compass_direction(course));
            }
            if let Some(speed) = vtg.speed {
                let _ = write!(out, " {:.2} km/h", speed.kmh);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::decode;

    const GGA: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn test_text_output() {
        let sentence = decode(GGA).unwrap();
        let text = format_sentence(&sentence, OutputFormat::Text).unwrap();
        assert_eq!(text, "GGA 48.117300,11.516667 fix=GPS sats=8 hdop=0.9 alt=545.4m");
    }

    #[test]
    fn test_json_output_is_tagged() {
        let sentence = decode(GGA).unwrap();
        let json = format_sentence(&sentence, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sentence"], "GGA");
        assert_eq!(value["satellites"], 8);
        assert_eq!(value["time"], "12:35:19");
    }
}
