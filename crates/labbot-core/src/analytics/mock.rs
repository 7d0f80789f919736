use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    analytics::{sample::SampleSource, types::*},
    Result,
};

const STEP_SECS: i64 = 5 * 60;
const NOMINAL_V: f64 = 220.0;
const MIN_KW: f64 = 1.5;
const MAX_KW: f64 = 6.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GridEvent {
    Normal,
    Blackout,
    Spike,
    Sag,
}

/// Deterministic synthetic laboratory readings for development.
///
/// Samples exist every 5 minutes from `anchor - history` up to `anchor`. Each
/// timestamp draws from its own seeded RNG, so overlapping ranges always see
/// the same values.
#[derive(Clone, Debug)]
pub struct MockSampleSource {
    anchor: NaiveDateTime,
    history: Duration,
    seed: u64,
}

impl MockSampleSource {
    pub fn new(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            history: Duration::days(65),
            seed: 0x1AB0_2025,
        }
    }

    pub fn with_history(mut self, history: Duration) -> Self {
        self.history = history;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn readings_at(&self, ts: NaiveDateTime) -> [Sample; 3] {
        let epoch = ts.and_utc().timestamp();
        let mut rng = StdRng::seed_from_u64(self.seed ^ epoch as u64);

        let work_hours = (8..=18).contains(&ts.hour());
        let weekend = ts.weekday().num_days_from_monday() >= 5;
        let load_factor = match (work_hours, weekend) {
            (true, false) => 1.0,
            (true, true) => 0.5,
            _ => 0.3,
        };

        let roll: f64 = rng.gen();
        let event = if roll < 0.0005 {
            GridEvent::Blackout
        } else if roll < 0.0025 {
            GridEvent::Spike
        } else if roll < 0.0045 {
            GridEvent::Sag
        } else {
            GridEvent::Normal
        };

        let phase2_degraded = ts > self.anchor - Duration::days(3);

        Phase::ALL.map(|phase| {
            let mut voltage = NOMINAL_V + rng.gen_range(-4.0..4.0);
            let target = MIN_KW + (MAX_KW - MIN_KW) * load_factor;
            let mut power = target * rng.gen_range(0.9..1.1);
            let mut pf: f64 = rng.gen_range(0.85..0.99);

            match event {
                GridEvent::Blackout => {
                    voltage = rng.gen_range(0.0..5.0);
                    power = 0.0;
                    pf = 1.0;
                }
                GridEvent::Spike => voltage = rng.gen_range(245.0..260.0),
                GridEvent::Sag => voltage = rng.gen_range(180.0..195.0),
                GridEvent::Normal => {}
            }
            if phase == Phase::Fase2 && phase2_degraded {
                power *= 0.2;
            }

            let (current, reactive) = if voltage > 10.0 {
                (
                    power * 1000.0 / (voltage * pf),
                    power * pf.acos().tan(),
                )
            } else {
                power = 0.0;
                (0.0, 0.0)
            };

            Sample {
                timestamp: ts,
                phase,
                power_kw: round_to(power, 3),
                reactive_kvar: round_to(reactive, 3),
                current_a: round_to(current, 2),
                voltage_v: round_to(voltage, 1),
            }
        })
    }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (v * f).round() / f
}

#[async_trait]
impl SampleSource for MockSampleSource {
    async fn samples(&self, range: &TimeRange) -> Result<Vec<Sample>> {
        let start = range.start.max(self.anchor - self.history);
        let end = range.end.min(self.anchor + Duration::seconds(1));

        // Align up to the 5-minute grid.
        let secs = start.and_utc().timestamp();
        let rem = secs.rem_euclid(STEP_SECS);
        let first = if rem == 0 { secs } else { secs + STEP_SECS - rem };
        let Some(mut ts) = DateTime::from_timestamp(first, 0).map(|d| d.naive_utc()) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        while ts < end && ts < range.end {
            out.extend(self.readings_at(ts));
            ts += Duration::seconds(STEP_SECS);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::metrics;
    use chrono::NaiveDate;

    fn anchor() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 16)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn deterministic_and_gridded() {
        let src = MockSampleSource::new(anchor());
        let range = TimeRange::new(anchor() - Duration::hours(2), anchor());
        let a = src.samples(&range).await.unwrap();
        let b = src.samples(&range).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 24 * 3);
        assert!(a
            .iter()
            .all(|s| s.timestamp.minute() % 5 == 0 && s.timestamp.second() == 0));
    }

    #[tokio::test]
    async fn nothing_before_history_or_after_anchor() {
        let src = MockSampleSource::new(anchor()).with_history(Duration::days(1));
        let old = TimeRange::new(
            anchor() - Duration::days(10),
            anchor() - Duration::days(5),
        );
        assert!(src.samples(&old).await.unwrap().is_empty());

        let future = TimeRange::new(anchor() + Duration::hours(1), anchor() + Duration::days(1));
        assert!(src.samples(&future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn phase2_loses_load_in_last_days() {
        let src = MockSampleSource::new(anchor());
        let recent = TimeRange::new(anchor() - Duration::days(2), anchor());
        let rows = src.samples(&recent).await.unwrap();
        let c = metrics::consumption(&rows, std::time::Duration::from_secs(900));
        let kwh = |p: Phase| c.phases.iter().find(|e| e.phase == p).unwrap().kwh;
        assert!(kwh(Phase::Fase2) < kwh(Phase::Fase1) * 0.5);
    }

    #[tokio::test]
    async fn voltage_stays_in_band_most_of_the_time() {
        let src = MockSampleSource::new(anchor());
        let week = TimeRange::new(anchor() - Duration::days(7), anchor());
        let rows = src.samples(&week).await.unwrap();
        let r = metrics::voltage_anomalies(&rows, VoltageBand::default(), 10);
        assert!(r.total_events() < rows.len() as u64 / 50);
    }
}
