//! Pure numerical rules over measurement samples.
//!
//! Every function accepts samples in any order and sorts per phase itself.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::analytics::types::*;

fn by_phase(samples: &[Sample]) -> BTreeMap<Phase, Vec<&Sample>> {
    let mut map: BTreeMap<Phase, Vec<&Sample>> = BTreeMap::new();
    for s in samples {
        map.entry(s.phase).or_default().push(s);
    }
    for series in map.values_mut() {
        series.sort_by_key(|s| s.timestamp);
    }
    map
}

fn hours_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (b - a).num_milliseconds() as f64 / 3_600_000.0
}

/// Integrated pairs `(later timestamp, kWh)` for one time-ordered phase series.
fn trapezoids<'a>(
    series: &'a [&'a Sample],
    max_gap: Duration,
) -> impl Iterator<Item = (NaiveDateTime, f64)> + 'a {
    let max_gap_h = max_gap.as_secs_f64() / 3600.0;
    series.windows(2).filter_map(move |w| {
        let dt = hours_between(w[0].timestamp, w[1].timestamp);
        if dt <= 0.0 || dt > max_gap_h {
            return None;
        }
        Some((w[1].timestamp, (w[0].power_kw + w[1].power_kw) / 2.0 * dt))
    })
}

/// Trapezoidal energy per phase.
pub fn consumption(samples: &[Sample], max_gap: Duration) -> Consumption {
    let phases: Vec<PhaseEnergy> = by_phase(samples)
        .iter()
        .map(|(phase, series)| PhaseEnergy {
            phase: *phase,
            kwh: trapezoids(series, max_gap).map(|(_, e)| e).sum(),
        })
        .collect();
    let total_kwh = phases.iter().map(|p| p.kwh).sum();
    Consumption { phases, total_kwh }
}

/// Energy summed over phases, bucketed by the calendar day of the later sample of each pair.
pub fn daily_consumption(samples: &[Sample], max_gap: Duration) -> DailyConsumption {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for series in by_phase(samples).values() {
        for (ts, kwh) in trapezoids(series, max_gap) {
            *days.entry(ts.date()).or_default() += kwh;
        }
    }
    let days: Vec<DailyEnergy> = days
        .into_iter()
        .map(|(date, kwh)| DailyEnergy { date, kwh })
        .collect();
    let total_kwh = days.iter().map(|d| d.kwh).sum();
    DailyConsumption { days, total_kwh }
}

/// Rolling mean over `(end - window, end]` for every sample end, per phase.
pub fn demand_peaks(samples: &[Sample], window: Duration) -> DemandPeaks {
    let window_td = chrono::Duration::milliseconds(window.as_millis() as i64);
    let mut phases = Vec::new();

    for (phase, series) in by_phase(samples) {
        let mut lo = 0usize;
        let mut sum = 0.0;
        let mut best: Option<(f64, NaiveDateTime)> = None;
        let mut max_instant: Option<(f64, NaiveDateTime)> = None;

        for (hi, s) in series.iter().enumerate() {
            sum += s.power_kw;
            while lo < hi && series[lo].timestamp <= s.timestamp - window_td {
                sum -= series[lo].power_kw;
                lo += 1;
            }
            let mean = sum / (hi - lo + 1) as f64;
            if best.map_or(true, |(b, _)| mean > b) {
                best = Some((mean, s.timestamp));
            }
            if max_instant.map_or(true, |(m, _)| s.power_kw > m) {
                max_instant = Some((s.power_kw, s.timestamp));
            }
        }

        if let (Some((peak, peak_end)), Some((inst, inst_at))) = (best, max_instant) {
            phases.push(PhaseDemand {
                phase,
                peak_demand_kw: peak,
                peak_window_end: peak_end,
                max_instant_kw: inst,
                max_instant_at: inst_at,
            });
        }
    }

    DemandPeaks {
        window_minutes: (window.as_secs() / 60).max(1),
        phases,
    }
}

/// `P / sqrt(P^2 + Q^2)`, or `None` when apparent power is zero.
pub fn power_factor_of(p: f64, q: f64) -> Option<f64> {
    let apparent = p.hypot(q);
    if apparent > 0.0 {
        Some(p / apparent)
    } else {
        None
    }
}

pub fn power_factor(samples: &[Sample], reference: f64) -> PowerFactorReport {
    let mut phases = Vec::new();

    for (phase, series) in by_phase(samples) {
        let mut count = 0u64;
        let mut sum_pf = 0.0;
        let mut min = f64::INFINITY;
        let mut below = 0u64;
        let (mut sum_p, mut sum_q) = (0.0, 0.0);

        for s in series {
            let Some(pf) = power_factor_of(s.power_kw, s.reactive_kvar) else {
                continue;
            };
            count += 1;
            sum_pf += pf;
            min = min.min(pf);
            if pf < reference {
                below += 1;
            }
            sum_p += s.power_kw;
            sum_q += s.reactive_kvar;
        }

        if count == 0 {
            continue;
        }
        phases.push(PhasePowerFactor {
            phase,
            mean: sum_pf / count as f64,
            min,
            aggregate: power_factor_of(sum_p, sum_q).unwrap_or(0.0),
            samples: count,
            below_reference: below,
        });
    }

    PowerFactorReport { reference, phases }
}

/// For each hour of day, the sum over phases of that phase's mean power.
pub fn load_profile(samples: &[Sample]) -> LoadProfile {
    let mut acc: BTreeMap<u32, [(f64, u64); 3]> = BTreeMap::new();
    for s in samples {
        let slot = &mut acc.entry(s.timestamp.hour()).or_default()[s.phase.index()];
        slot.0 += s.power_kw;
        slot.1 += 1;
    }

    let hours = acc
        .into_iter()
        .map(|(hour, phases)| HourlyLoad {
            hour,
            mean_kw: phases
                .iter()
                .filter(|(_, n)| *n > 0)
                .map(|(sum, n)| sum / *n as f64)
                .sum(),
        })
        .collect();
    LoadProfile { hours }
}

pub fn phase_imbalance(samples: &[Sample], threshold_pct: f64) -> PhaseImbalance {
    let mut by_ts: BTreeMap<NaiveDateTime, [Option<f64>; 3]> = BTreeMap::new();
    let mut currents: BTreeMap<Phase, (f64, u64)> = BTreeMap::new();

    for s in samples {
        by_ts.entry(s.timestamp).or_default()[s.phase.index()] = Some(s.current_a);
        let c = currents.entry(s.phase).or_default();
        c.0 += s.current_a;
        c.1 += 1;
    }

    let mut count = 0u64;
    let mut sum_pct = 0.0;
    let mut max: Option<(f64, NaiveDateTime)> = None;
    let mut above = 0u64;

    for (ts, slots) in &by_ts {
        let [Some(a), Some(b), Some(c)] = *slots else {
            continue;
        };
        let mean = (a + b + c) / 3.0;
        if mean <= 0.0 {
            continue;
        }
        let pct = [a, b, c]
            .iter()
            .map(|i| (i - mean).abs())
            .fold(0.0, f64::max)
            / mean
            * 100.0;

        count += 1;
        sum_pct += pct;
        if pct > threshold_pct {
            above += 1;
        }
        if max.map_or(true, |(m, _)| pct > m) {
            max = Some((pct, *ts));
        }
    }

    PhaseImbalance {
        threshold_pct,
        samples: count,
        mean_pct: if count > 0 { sum_pct / count as f64 } else { 0.0 },
        max_pct: max.map_or(0.0, |(m, _)| m),
        max_at: max.map(|(_, ts)| ts),
        above_threshold: above,
        phase_currents: currents
            .into_iter()
            .map(|(phase, (sum, n))| PhaseCurrent {
                phase,
                mean_a: sum / n as f64,
            })
            .collect(),
    }
}

pub fn classify_voltage(v: f64, band: &VoltageBand) -> Option<AnomalyKind> {
    if v < band.outage {
        Some(AnomalyKind::Outage)
    } else if v < band.lower {
        Some(AnomalyKind::Sag)
    } else if v > band.upper {
        Some(AnomalyKind::Swell)
    } else {
        None
    }
}

pub fn voltage_anomalies(samples: &[Sample], band: VoltageBand, top_n: usize) -> VoltageAnomalies {
    let mut counts: BTreeMap<Phase, PhaseAnomalyCount> = BTreeMap::new();
    let mut events = Vec::new();

    for s in samples {
        let entry = counts.entry(s.phase).or_insert_with(|| PhaseAnomalyCount {
            phase: s.phase,
            samples: 0,
            sag: 0,
            swell: 0,
            outage: 0,
        });
        entry.samples += 1;

        let Some(kind) = classify_voltage(s.voltage_v, &band) else {
            continue;
        };
        match kind {
            AnomalyKind::Sag => entry.sag += 1,
            AnomalyKind::Swell => entry.swell += 1,
            AnomalyKind::Outage => entry.outage += 1,
        }
        events.push(VoltageEvent {
            timestamp: s.timestamp,
            phase: s.phase,
            voltage_v: s.voltage_v,
            deviation_pct: (s.voltage_v - band.nominal) / band.nominal * 100.0,
            kind,
        });
    }

    events.sort_by(|a, b| {
        b.deviation_pct
            .abs()
            .total_cmp(&a.deviation_pct.abs())
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.phase.cmp(&b.phase))
    });
    events.truncate(top_n);

    VoltageAnomalies {
        band,
        phases: counts.into_values().collect(),
        worst: events,
    }
}

/// Quantile of ascending `sorted` with linear interpolation (as `percentile_cont`).
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Tukey fences per phase over active power.
pub fn power_outliers(samples: &[Sample]) -> PowerOutliers {
    let mut values: HashMap<Phase, Vec<f64>> = HashMap::new();
    for s in samples {
        values.entry(s.phase).or_default().push(s.power_kw);
    }

    let mut phases: Vec<PhaseOutliers> = values
        .into_iter()
        .filter_map(|(phase, mut v)| {
            v.sort_by(f64::total_cmp);
            let q1 = quantile(&v, 0.25)?;
            let median = quantile(&v, 0.5)?;
            let q3 = quantile(&v, 0.75)?;
            let iqr = q3 - q1;
            let lower_fence = q1 - 1.5 * iqr;
            let upper_fence = q3 + 1.5 * iqr;
            Some(PhaseOutliers {
                phase,
                samples: v.len() as u64,
                min: v[0],
                q1,
                median,
                q3,
                max: v[v.len() - 1],
                lower_fence,
                upper_fence,
                outliers: v
                    .iter()
                    .filter(|x| **x < lower_fence || **x > upper_fence)
                    .count() as u64,
            })
        })
        .collect();
    phases.sort_by_key(|p| p.phase);
    PowerOutliers { phases }
}
