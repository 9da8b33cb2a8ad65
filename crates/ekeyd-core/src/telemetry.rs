//! Parsing of `I` (info) packet payloads into typed telemetry fields.
//!
//! The payload is a space-separated list of tagged fields: `F<n>` (FIPS
//! frame count), `T<n>` (temperature), `V<n>` (supply voltage), and an `S`
//! record carrying eight Shannon-entropy-estimator numbers followed
//! directly by a one-character badness code, with no separating space
//! before that final character. An unparseable field is skipped rather than
//! treated as fatal, mirroring a permissive line format that keeps evolving
//! firmware versions able to add fields without breaking older hosts — but
//! unlike a fixed-width parser that blindly reads one byte past the last
//! number, a short or truncated `S` record here simply contributes no
//! [`ShannonReport`], never an out-of-bounds read.

/// The eight-number Shannon-estimator record plus its trailing badness code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShannonReport {
    /// Raw sample size, in bytes, the estimate was computed over.
    pub raw_bytes: u32,
    /// Raw estimator, left half.
    pub raw_est_l: i32,
    /// Raw estimator, right half.
    pub raw_est_r: i32,
    /// Raw estimator, cross term.
    pub raw_est_x: i32,
    /// De-biased sample size, left half.
    pub dbsd_bytes_l: u32,
    /// De-biased estimator, left half.
    pub dbsd_est_l: i32,
    /// De-biased sample size, right half.
    pub dbsd_bytes_r: u32,
    /// De-biased estimator, right half.
    pub dbsd_est_r: i32,
    /// Single-character badness code, if the payload carried one.
    pub badness: Option<char>,
}

/// Accumulated telemetry for one connection.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Most recently reported FIPS 140 frame count.
    pub fips_frame_count: Option<u32>,
    /// Most recently reported temperature reading.
    pub temperature: Option<i32>,
    /// Most recently reported supply voltage reading.
    pub supply_voltage: Option<i32>,
    /// Most recently reported Shannon estimator record.
    pub shannon: Option<ShannonReport>,
    baseline: Option<(std::time::Instant, u32)>,
}

impl Telemetry {
    /// Parses one `I`-packet payload and folds any recognized fields in.
    pub fn ingest(&mut self, text: &str, now: std::time::Instant) {
        let mut tokens = text.split_ascii_whitespace();
        while let Some(token) = tokens.next() {
            if token.is_empty() {
                continue;
            }
            let (tag, rest) = token.split_at(1);
            match tag {
                "F" => {
                    if let Ok(value) = rest.parse::<u32>() {
                        self.note_fips_frame_count(value, now);
                    }
                },
                "T" => {
                    if let Ok(value) = rest.parse::<i32>() {
                        self.temperature = Some(value);
                    }
                },
                "V" => {
                    if let Ok(value) = rest.parse::<i32>() {
                        self.supply_voltage = Some(value);
                    }
                },
                "S" => {
                    if let Some(report) = parse_shannon(rest, &mut tokens) {
                        self.shannon = Some(report);
                    }
                },
                _ => {},
            }
        }
    }

    fn note_fips_frame_count(&mut self, value: u32, now: std::time::Instant) {
        self.fips_frame_count = Some(value);
        if self.baseline.is_none() {
            self.baseline = Some((now, value));
        }
    }

    /// FIPS frames per second since the last computed rate, gated so a burst
    /// of closely spaced packets can't produce a noisy instantaneous rate:
    /// the window needs either 100 new frames or 50 elapsed seconds before a
    /// rate is reported. Once reported, the window resets.
    pub fn fips_frame_rate(&mut self, now: std::time::Instant) -> Option<f64> {
        let (baseline_at, baseline_count) = self.baseline?;
        let count = self.fips_frame_count?;
        let elapsed = now.saturating_duration_since(baseline_at);
        let delta = count.saturating_sub(baseline_count);
        if delta < 100 && elapsed.as_secs_f64() < 50.0 {
            return None;
        }
        let seconds = elapsed.as_secs_f64();
        let rate = (seconds > 0.0).then(|| f64::from(delta) / seconds);
        self.baseline = Some((now, count));
        rate
    }
}

fn parse_shannon<'a>(
    raw_bytes_field: &str,
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Option<ShannonReport> {
    let raw_bytes = raw_bytes_field.parse().ok()?;
    let raw_est_l = tokens.next()?.parse().ok()?;
    let raw_est_r = tokens.next()?.parse().ok()?;
    let raw_est_x = tokens.next()?.parse().ok()?;
    let dbsd_bytes_l = tokens.next()?.parse().ok()?;
    let dbsd_est_l = tokens.next()?.parse().ok()?;
    let dbsd_bytes_r = tokens.next()?.parse().ok()?;
    let last = tokens.next()?;

    let split_at = last
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(last.len());
    let (number_part, badness_part) = last.split_at(split_at);
    let dbsd_est_r = number_part.parse().ok()?;
    let badness = badness_part.chars().next();

    Some(ShannonReport {
        raw_bytes,
        raw_est_l,
        raw_est_r,
        raw_est_x,
        dbsd_bytes_l,
        dbsd_est_l,
        dbsd_bytes_r,
        dbsd_est_r,
        badness,
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn parses_fips_temperature_and_voltage() {
        let mut telemetry = Telemetry::default();
        telemetry.ingest("F1000 T2931 V501", Instant::now());
        assert_eq!(telemetry.fips_frame_count, Some(1000));
        assert_eq!(telemetry.temperature, Some(2931));
        assert_eq!(telemetry.supply_voltage, Some(501));
    }

    #[test]
    fn parses_shannon_record_with_attached_badness() {
        let mut telemetry = Telemetry::default();
        telemetry.ingest("S10000 7900 7910 10 9000 7920 9000 7930G", Instant::now());
        let report = telemetry.shannon.expect("shannon record parsed");
        assert_eq!(report.raw_bytes, 10000);
        assert_eq!(report.raw_est_l, 7900);
        assert_eq!(report.dbsd_est_r, 7930);
        assert_eq!(report.badness, Some('G'));
    }

    #[test]
    fn shannon_record_without_badness_still_parses_numbers() {
        let mut telemetry = Telemetry::default();
        telemetry.ingest("S100 1 2 3 4 5 6 7", Instant::now());
        let report = telemetry.shannon.expect("shannon record parsed");
        assert_eq!(report.dbsd_est_r, 7);
        assert_eq!(report.badness, None);
    }

    #[test]
    fn truncated_shannon_record_is_dropped_without_panicking() {
        let mut telemetry = Telemetry::default();
        telemetry.ingest("S100 1 2", Instant::now());
        assert!(telemetry.shannon.is_none());
    }

    #[test]
    fn unparseable_field_is_skipped_not_fatal() {
        let mut telemetry = Telemetry::default();
        telemetry.ingest("Fabc T100", Instant::now());
        assert_eq!(telemetry.fips_frame_count, None);
        assert_eq!(telemetry.temperature, Some(100));
    }

    #[test]
    fn rate_is_none_below_gate_then_available_past_it() {
        let mut telemetry = Telemetry::default();
        let t0 = Instant::now();
        telemetry.ingest("F1000", t0);
        assert_eq!(telemetry.fips_frame_rate(t0 + Duration::from_secs(1)), None);

        telemetry.ingest("F1200", t0 + Duration::from_secs(1));
        assert!(telemetry.fips_frame_rate(t0 + Duration::from_secs(2)).is_some());
    }
}
