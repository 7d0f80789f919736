use std::{fmt, str::FromStr, time::Duration};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// One of the three monitored electrical phases (`sensor` column).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "fase1")]
    Fase1,
    #[serde(rename = "fase2")]
    Fase2,
    #[serde(rename = "fase3")]
    Fase3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Fase1, Phase::Fase2, Phase::Fase3];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Fase1 => "fase1",
            Phase::Fase2 => "fase2",
            Phase::Fase3 => "fase3",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Phase::Fase1 => 0,
            Phase::Fase2 => 1,
            Phase::Fase3 => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fase1" => Ok(Phase::Fase1),
            "fase2" => Ok(Phase::Fase2),
            "fase3" => Ok(Phase::Fase3),
            other => Err(Error::InvalidInput(format!("unknown phase: {other}"))),
        }
    }
}

/// One measurement row. Timestamps are local wall-clock time.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub phase: Phase,
    pub power_kw: f64,
    pub reactive_kvar: f64,
    pub current_a: f64,
    pub voltage_v: f64,
}

/// Half-open local-time interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} a {}",
            self.start.format("%d/%m/%Y %H:%M"),
            self.end.format("%d/%m/%Y %H:%M")
        )
    }
}

/// Acceptable voltage window and classification thresholds, in volts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoltageBand {
    pub nominal: f64,
    pub lower: f64,
    pub upper: f64,
    pub outage: f64,
}

impl Default for VoltageBand {
    fn default() -> Self {
        Self {
            nominal: 220.0,
            lower: 202.0,
            upper: 231.0,
            outage: 50.0,
        }
    }
}

/// Tunables shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalyticsParams {
    pub demand_window: Duration,
    /// Consecutive samples further apart than this are not integrated.
    pub max_gap: Duration,
    pub power_factor_reference: f64,
    pub imbalance_threshold_pct: f64,
    pub voltage_band: VoltageBand,
    /// How many voltage events to keep, worst first.
    pub max_events: usize,
}

impl Default for AnalyticsParams {
    fn default() -> Self {
        Self {
            demand_window: Duration::from_secs(15 * 60),
            max_gap: Duration::from_secs(15 * 60),
            power_factor_reference: 0.92,
            imbalance_threshold_pct: 10.0,
            voltage_band: VoltageBand::default(),
            max_events: 10,
        }
    }
}

impl AnalyticsParams {
    pub fn demand_window_minutes(&self) -> u64 {
        (self.demand_window.as_secs() / 60).max(1)
    }

    pub fn max_gap_minutes(&self) -> u64 {
        (self.max_gap.as_secs() / 60).max(1)
    }
}

/// The analyses the data tool can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analytic {
    Consumption,
    DailyConsumption,
    DemandPeaks,
    PowerFactor,
    LoadProfile,
    PhaseImbalance,
    VoltageAnomalies,
    PowerOutliers,
}

impl Analytic {
    pub const ALL: [Analytic; 8] = [
        Analytic::Consumption,
        Analytic::DailyConsumption,
        Analytic::DemandPeaks,
        Analytic::PowerFactor,
        Analytic::LoadProfile,
        Analytic::PhaseImbalance,
        Analytic::VoltageAnomalies,
        Analytic::PowerOutliers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Analytic::Consumption => "consumption",
            Analytic::DailyConsumption => "daily_consumption",
            Analytic::DemandPeaks => "demand_peaks",
            Analytic::PowerFactor => "power_factor",
            Analytic::LoadProfile => "load_profile",
            Analytic::PhaseImbalance => "phase_imbalance",
            Analytic::VoltageAnomalies => "voltage_anomalies",
            Analytic::PowerOutliers => "power_outliers",
        }
    }
}

impl fmt::Display for Analytic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Analytic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Analytic::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Analytic::ALL.iter().map(|a| a.as_str()).collect();
                Error::InvalidInput(format!(
                    "análise desconhecida '{wanted}'. Use uma de: {}",
                    names.join(", ")
                ))
            })
    }
}

// ============== Results ==============

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseEnergy {
    pub phase: Phase,
    pub kwh: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub phases: Vec<PhaseEnergy>,
    pub total_kwh: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyEnergy {
    pub date: NaiveDate,
    pub kwh: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyConsumption {
    pub days: Vec<DailyEnergy>,
    pub total_kwh: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseDemand {
    pub phase: Phase,
    /// Highest rolling-window mean power.
    pub peak_demand_kw: f64,
    pub peak_window_end: NaiveDateTime,
    pub max_instant_kw: f64,
    pub max_instant_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandPeaks {
    pub window_minutes: u64,
    pub phases: Vec<PhaseDemand>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhasePowerFactor {
    pub phase: Phase,
    pub mean: f64,
    pub min: f64,
    /// `sum P / sqrt((sum P)^2 + (sum Q)^2)`.
    pub aggregate: f64,
    pub samples: u64,
    pub below_reference: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerFactorReport {
    pub reference: f64,
    pub phases: Vec<PhasePowerFactor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HourlyLoad {
    pub hour: u32,
    pub mean_kw: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub hours: Vec<HourlyLoad>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseCurrent {
    pub phase: Phase,
    pub mean_a: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseImbalance {
    pub threshold_pct: f64,
    /// Timestamps with all three phases present and a positive mean current.
    pub samples: u64,
    pub mean_pct: f64,
    pub max_pct: f64,
    pub max_at: Option<NaiveDateTime>,
    pub above_threshold: u64,
    pub phase_currents: Vec<PhaseCurrent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Sag,
    Swell,
    Outage,
}

impl AnomalyKind {
    pub fn label(self) -> &'static str {
        match self {
            AnomalyKind::Sag => "afundamento",
            AnomalyKind::Swell => "sobretensão",
            AnomalyKind::Outage => "interrupção",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseAnomalyCount {
    pub phase: Phase,
    pub samples: u64,
    pub sag: u64,
    pub swell: u64,
    pub outage: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoltageEvent {
    pub timestamp: NaiveDateTime,
    pub phase: Phase,
    pub voltage_v: f64,
    pub deviation_pct: f64,
    pub kind: AnomalyKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoltageAnomalies {
    pub band: VoltageBand,
    pub phases: Vec<PhaseAnomalyCount>,
    pub worst: Vec<VoltageEvent>,
}

impl VoltageAnomalies {
    pub fn total_events(&self) -> u64 {
        self.phases
            .iter()
            .map(|p| p.sag + p.swell + p.outage)
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutliers {
    pub phase: Phase,
    pub samples: u64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub lower_fence: f64,
    pub upper_fence: f64,
    pub outliers: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerOutliers {
    pub phases: Vec<PhaseOutliers>,
}

/// Any analytic result, tagged by analytic name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analytic", content = "data", rename_all = "snake_case")]
pub enum AnalyticsResult {
    Consumption(Consumption),
    DailyConsumption(DailyConsumption),
    DemandPeaks(DemandPeaks),
    PowerFactor(PowerFactorReport),
    LoadProfile(LoadProfile),
    PhaseImbalance(PhaseImbalance),
    VoltageAnomalies(VoltageAnomalies),
    PowerOutliers(PowerOutliers),
}

impl AnalyticsResult {
    pub fn analytic(&self) -> Analytic {
        match self {
            AnalyticsResult::Consumption(_) => Analytic::Consumption,
            AnalyticsResult::DailyConsumption(_) => Analytic::DailyConsumption,
            AnalyticsResult::DemandPeaks(_) => Analytic::DemandPeaks,
            AnalyticsResult::PowerFactor(_) => Analytic::PowerFactor,
            AnalyticsResult::LoadProfile(_) => Analytic::LoadProfile,
            AnalyticsResult::PhaseImbalance(_) => Analytic::PhaseImbalance,
            AnalyticsResult::VoltageAnomalies(_) => Analytic::VoltageAnomalies,
            AnalyticsResult::PowerOutliers(_) => Analytic::PowerOutliers,
        }
    }

    /// True when the backend found no measurements for the range.
    pub fn is_empty(&self) -> bool {
        match self {
            AnalyticsResult::Consumption(r) => r.phases.is_empty(),
            AnalyticsResult::DailyConsumption(r) => r.days.is_empty(),
            AnalyticsResult::DemandPeaks(r) => r.phases.is_empty(),
            AnalyticsResult::PowerFactor(r) => r.phases.is_empty(),
            AnalyticsResult::LoadProfile(r) => r.hours.is_empty(),
            AnalyticsResult::PhaseImbalance(r) => r.samples == 0,
            AnalyticsResult::VoltageAnomalies(r) => r.phases.is_empty(),
            AnalyticsResult::PowerOutliers(r) => r.phases.is_empty(),
        }
    }
}
