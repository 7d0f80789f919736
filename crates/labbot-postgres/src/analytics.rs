//! Analytics computed inside Postgres, one aggregation query per analytic.
//!
//! Readings live in `medicoes("timestamp", sensor, power, "reactivePower",
//! "current", voltage)`, one row per phase and instant, in local time.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use labbot_core::{
    analytics::{metrics::classify_voltage, types::*, AnalyticsBackend},
    Result,
};
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};

use crate::pool::db_err;

const CONSUMPTION_SQL: &str = r#"
WITH ordered AS (
    SELECT sensor,
           "timestamp" AS ts,
           power::float8 AS p,
           LAG("timestamp") OVER w AS prev_ts,
           LAG(power::float8) OVER w AS prev_p
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
    WINDOW w AS (PARTITION BY sensor ORDER BY "timestamp")
)
SELECT sensor,
       COALESCE(SUM((p + prev_p) / 2.0 * EXTRACT(EPOCH FROM (ts - prev_ts))::float8 / 3600.0)
           FILTER (WHERE prev_ts IS NOT NULL
                     AND ts > prev_ts
                     AND ts - prev_ts <= make_interval(secs => $3)), 0)::float8 AS kwh
FROM ordered
GROUP BY sensor
ORDER BY sensor
"#;

const DAILY_CONSUMPTION_SQL: &str = r#"
WITH ordered AS (
    SELECT "timestamp" AS ts,
           power::float8 AS p,
           LAG("timestamp") OVER w AS prev_ts,
           LAG(power::float8) OVER w AS prev_p
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
    WINDOW w AS (PARTITION BY sensor ORDER BY "timestamp")
)
SELECT ts::date AS day,
       SUM((p + prev_p) / 2.0 * EXTRACT(EPOCH FROM (ts - prev_ts))::float8 / 3600.0)::float8 AS kwh
FROM ordered
WHERE prev_ts IS NOT NULL
  AND ts > prev_ts
  AND ts - prev_ts <= make_interval(secs => $3)
GROUP BY 1
ORDER BY 1
"#;

const DEMAND_PEAKS_SQL: &str = r#"
WITH s AS (
    SELECT sensor, "timestamp" AS ts, power::float8 AS p
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
),
rolling AS (
    SELECT a.sensor, a.ts, AVG(b.p) AS mean_kw
    FROM s a
    JOIN s b
      ON b.sensor = a.sensor
     AND b.ts > a.ts - make_interval(secs => $3)
     AND b.ts <= a.ts
    GROUP BY a.sensor, a.ts
),
peak AS (
    SELECT DISTINCT ON (sensor) sensor, mean_kw, ts
    FROM rolling
    ORDER BY sensor, mean_kw DESC, ts
),
inst AS (
    SELECT DISTINCT ON (sensor) sensor, p, ts
    FROM s
    ORDER BY sensor, p DESC, ts
)
SELECT peak.sensor,
       peak.mean_kw::float8 AS peak_demand_kw,
       peak.ts AS peak_window_end,
       inst.p AS max_instant_kw,
       inst.ts AS max_instant_at
FROM peak
JOIN inst USING (sensor)
ORDER BY peak.sensor
"#;

const POWER_FACTOR_SQL: &str = r#"
WITH s AS (
    SELECT sensor,
           power::float8 AS p,
           "reactivePower"::float8 AS q,
           power::float8 / NULLIF(sqrt(power::float8 ^ 2 + "reactivePower"::float8 ^ 2), 0) AS pf
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
)
SELECT sensor,
       AVG(pf)::float8 AS mean,
       MIN(pf)::float8 AS min,
       (SUM(p) / NULLIF(sqrt(SUM(p) ^ 2 + SUM(q) ^ 2), 0))::float8 AS aggregate,
       COUNT(*) AS samples,
       COUNT(*) FILTER (WHERE pf < $3) AS below_reference
FROM s
WHERE pf IS NOT NULL
GROUP BY sensor
ORDER BY sensor
"#;

const LOAD_PROFILE_SQL: &str = r#"
WITH per_phase AS (
    SELECT EXTRACT(HOUR FROM "timestamp")::int4 AS hour,
           sensor,
           AVG(power::float8) AS mean_kw
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
    GROUP BY 1, 2
)
SELECT hour, SUM(mean_kw)::float8 AS mean_kw
FROM per_phase
GROUP BY hour
ORDER BY hour
"#;

const IMBALANCE_SQL: &str = r#"
WITH per_ts AS (
    SELECT "timestamp" AS ts,
           MAX("current"::float8) FILTER (WHERE sensor = 'fase1') AS a,
           MAX("current"::float8) FILTER (WHERE sensor = 'fase2') AS b,
           MAX("current"::float8) FILTER (WHERE sensor = 'fase3') AS c
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
    GROUP BY 1
),
means AS (
    SELECT ts, a, b, c, (a + b + c) / 3.0 AS m
    FROM per_ts
    WHERE a IS NOT NULL AND b IS NOT NULL AND c IS NOT NULL
),
imb AS (
    SELECT ts, GREATEST(abs(a - m), abs(b - m), abs(c - m)) / m * 100.0 AS pct
    FROM means
    WHERE m > 0
)
SELECT COUNT(*) AS samples,
       COALESCE(AVG(pct), 0)::float8 AS mean_pct,
       COALESCE(MAX(pct), 0)::float8 AS max_pct,
       (SELECT ts FROM imb ORDER BY pct DESC, ts LIMIT 1) AS max_at,
       COUNT(*) FILTER (WHERE pct > $3) AS above_threshold
FROM imb
"#;

const PHASE_CURRENTS_SQL: &str = r#"
SELECT sensor, AVG("current"::float8)::float8 AS mean_a
FROM medicoes
WHERE "timestamp" >= $1 AND "timestamp" < $2
  AND sensor IN ('fase1', 'fase2', 'fase3')
GROUP BY sensor
ORDER BY sensor
"#;

const VOLTAGE_COUNTS_SQL: &str = r#"
SELECT sensor,
       COUNT(*) AS samples,
       COUNT(*) FILTER (WHERE voltage::float8 >= $5 AND voltage::float8 < $3) AS sag,
       COUNT(*) FILTER (WHERE voltage::float8 >= $5 AND voltage::float8 > $4) AS swell,
       COUNT(*) FILTER (WHERE voltage::float8 < $5) AS outage
FROM medicoes
WHERE "timestamp" >= $1 AND "timestamp" < $2
  AND sensor IN ('fase1', 'fase2', 'fase3')
GROUP BY sensor
ORDER BY sensor
"#;

const VOLTAGE_WORST_SQL: &str = r#"
SELECT "timestamp" AS ts, sensor, voltage::float8 AS voltage_v
FROM medicoes
WHERE "timestamp" >= $1 AND "timestamp" < $2
  AND sensor IN ('fase1', 'fase2', 'fase3')
  AND (voltage::float8 < $3 OR voltage::float8 > $4)
ORDER BY abs(voltage::float8 - $5) DESC, "timestamp", sensor
LIMIT $6
"#;

const OUTLIERS_SQL: &str = r#"
WITH s AS (
    SELECT sensor, power::float8 AS p
    FROM medicoes
    WHERE "timestamp" >= $1 AND "timestamp" < $2
      AND sensor IN ('fase1', 'fase2', 'fase3')
),
q AS (
    SELECT sensor,
           COUNT(*) AS samples,
           MIN(p) AS min,
           percentile_cont(0.25) WITHIN GROUP (ORDER BY p) AS q1,
           percentile_cont(0.5) WITHIN GROUP (ORDER BY p) AS median,
           percentile_cont(0.75) WITHIN GROUP (ORDER BY p) AS q3,
           MAX(p) AS max
    FROM s
    GROUP BY sensor
)
SELECT q.sensor, q.samples, q.min, q.q1, q.median, q.q3, q.max,
       (SELECT COUNT(*)
          FROM s
         WHERE s.sensor = q.sensor
           AND (s.p < q.q1 - 1.5 * (q.q3 - q.q1) OR s.p > q.q3 + 1.5 * (q.q3 - q.q1))) AS outliers
FROM q
ORDER BY q.sensor
"#;

#[derive(Debug, FromRow)]
struct EnergyRow {
    sensor: String,
    kwh: f64,
}

#[derive(Debug, FromRow)]
struct DayRow {
    day: NaiveDate,
    kwh: f64,
}

#[derive(Debug, FromRow)]
struct DemandRow {
    sensor: String,
    peak_demand_kw: f64,
    peak_window_end: NaiveDateTime,
    max_instant_kw: f64,
    max_instant_at: NaiveDateTime,
}

#[derive(Debug, FromRow)]
struct PowerFactorRow {
    sensor: String,
    mean: f64,
    min: f64,
    aggregate: Option<f64>,
    samples: i64,
    below_reference: i64,
}

#[derive(Debug, FromRow)]
struct HourRow {
    hour: i32,
    mean_kw: f64,
}

#[derive(Debug, FromRow)]
struct ImbalanceRow {
    samples: i64,
    mean_pct: f64,
    max_pct: f64,
    max_at: Option<NaiveDateTime>,
    above_threshold: i64,
}

#[derive(Debug, FromRow)]
struct CurrentRow {
    sensor: String,
    mean_a: f64,
}

#[derive(Debug, FromRow)]
struct VoltageCountRow {
    sensor: String,
    samples: i64,
    sag: i64,
    swell: i64,
    outage: i64,
}

#[derive(Debug, FromRow)]
struct VoltageRow {
    ts: NaiveDateTime,
    sensor: String,
    voltage_v: f64,
}

#[derive(Debug, FromRow)]
struct OutlierRow {
    sensor: String,
    samples: i64,
    min: f64,
    q1: f64,
    median: f64,
    q3: f64,
    max: f64,
    outliers: i64,
}

/// Unknown sensors are logged and skipped.
fn phase_of(sensor: &str) -> Option<Phase> {
    match sensor.parse() {
        Ok(p) => Some(p),
        Err(_) => {
            warn!(sensor, "skipping readings of unknown sensor");
            None
        }
    }
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn voltage_event(row: VoltageRow, band: &VoltageBand) -> Option<VoltageEvent> {
    let phase = phase_of(&row.sensor)?;
    let kind = classify_voltage(row.voltage_v, band)?;
    Some(VoltageEvent {
        timestamp: row.ts,
        phase,
        voltage_v: row.voltage_v,
        deviation_pct: (row.voltage_v - band.nominal) / band.nominal * 100.0,
        kind,
    })
}

fn outliers_from_row(row: OutlierRow) -> Option<PhaseOutliers> {
    let iqr = row.q3 - row.q1;
    Some(PhaseOutliers {
        phase: phase_of(&row.sensor)?,
        samples: count(row.samples),
        min: row.min,
        q1: row.q1,
        median: row.median,
        q3: row.q3,
        max: row.max,
        lower_fence: row.q1 - 1.5 * iqr,
        upper_fence: row.q3 + 1.5 * iqr,
        outliers: count(row.outliers),
    })
}

/// Backend that pushes every aggregation down to the readings database.
#[derive(Clone)]
pub struct SqlAnalytics {
    pool: PgPool,
}

impl SqlAnalytics {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch<T>(&self, name: &str, sql: &'static str, range: &TimeRange, extra: f64) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let rows = sqlx::query_as::<_, T>(sql)
            .bind(range.start)
            .bind(range.end)
            .bind(extra)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        debug!(analytic = name, rows = rows.len(), %range, "sql analytic fetched");
        Ok(rows)
    }
}

#[async_trait]
impl AnalyticsBackend for SqlAnalytics {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn consumption(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<Consumption> {
        let rows: Vec<EnergyRow> = self
            .fetch("consumption", CONSUMPTION_SQL, range, params.max_gap.as_secs_f64())
            .await?;
        let phases: Vec<PhaseEnergy> = rows
            .into_iter()
            .filter_map(|r| {
                Some(PhaseEnergy {
                    phase: phase_of(&r.sensor)?,
                    kwh: r.kwh,
                })
            })
            .collect();
        let total_kwh = phases.iter().map(|p| p.kwh).sum();
        Ok(Consumption { phases, total_kwh })
    }

    async fn daily_consumption(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<DailyConsumption> {
        let rows: Vec<DayRow> = self
            .fetch(
                "daily_consumption",
                DAILY_CONSUMPTION_SQL,
                range,
                params.max_gap.as_secs_f64(),
            )
            .await?;
        let days: Vec<DailyEnergy> = rows
            .into_iter()
            .map(|r| DailyEnergy {
                date: r.day,
                kwh: r.kwh,
            })
            .collect();
        let total_kwh = days.iter().map(|d| d.kwh).sum();
        Ok(DailyConsumption { days, total_kwh })
    }

    async fn demand_peaks(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<DemandPeaks> {
        let rows: Vec<DemandRow> = self
            .fetch(
                "demand_peaks",
                DEMAND_PEAKS_SQL,
                range,
                params.demand_window.as_secs_f64(),
            )
            .await?;
        Ok(DemandPeaks {
            window_minutes: params.demand_window_minutes(),
            phases: rows
                .into_iter()
                .filter_map(|r| {
                    Some(PhaseDemand {
                        phase: phase_of(&r.sensor)?,
                        peak_demand_kw: r.peak_demand_kw,
                        peak_window_end: r.peak_window_end,
                        max_instant_kw: r.max_instant_kw,
                        max_instant_at: r.max_instant_at,
                    })
                })
                .collect(),
        })
    }

    async fn power_factor(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PowerFactorReport> {
        let rows: Vec<PowerFactorRow> = self
            .fetch(
                "power_factor",
                POWER_FACTOR_SQL,
                range,
                params.power_factor_reference,
            )
            .await?;
        Ok(PowerFactorReport {
            reference: params.power_factor_reference,
            phases: rows
                .into_iter()
                .filter_map(|r| {
                    Some(PhasePowerFactor {
                        phase: phase_of(&r.sensor)?,
                        mean: r.mean,
                        min: r.min,
                        aggregate: r.aggregate.unwrap_or(0.0),
                        samples: count(r.samples),
                        below_reference: count(r.below_reference),
                    })
                })
                .collect(),
        })
    }

    async fn load_profile(&self, range: &TimeRange, _params: &AnalyticsParams) -> Result<LoadProfile> {
        let rows = sqlx::query_as::<_, HourRow>(LOAD_PROFILE_SQL)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(LoadProfile {
            hours: rows
                .into_iter()
                .filter_map(|r| {
                    Some(HourlyLoad {
                        hour: u32::try_from(r.hour).ok()?,
                        mean_kw: r.mean_kw,
                    })
                })
                .collect(),
        })
    }

    async fn phase_imbalance(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PhaseImbalance> {
        let summary = sqlx::query_as::<_, ImbalanceRow>(IMBALANCE_SQL)
            .bind(range.start)
            .bind(range.end)
            .bind(params.imbalance_threshold_pct)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let currents = sqlx::query_as::<_, CurrentRow>(PHASE_CURRENTS_SQL)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(PhaseImbalance {
            threshold_pct: params.imbalance_threshold_pct,
            samples: count(summary.samples),
            mean_pct: summary.mean_pct,
            max_pct: summary.max_pct,
            max_at: summary.max_at,
            above_threshold: count(summary.above_threshold),
            phase_currents: currents
                .into_iter()
                .filter_map(|r| {
                    Some(PhaseCurrent {
                        phase: phase_of(&r.sensor)?,
                        mean_a: r.mean_a,
                    })
                })
                .collect(),
        })
    }

    async fn voltage_anomalies(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<VoltageAnomalies> {
        let band = params.voltage_band;
        let counts = sqlx::query_as::<_, VoltageCountRow>(VOLTAGE_COUNTS_SQL)
            .bind(range.start)
            .bind(range.end)
            .bind(band.lower)
            .bind(band.upper)
            .bind(band.outage)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let worst = sqlx::query_as::<_, VoltageRow>(VOLTAGE_WORST_SQL)
            .bind(range.start)
            .bind(range.end)
            .bind(band.lower)
            .bind(band.upper)
            .bind(band.nominal)
            .bind(i64::try_from(params.max_events).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(VoltageAnomalies {
            band,
            phases: counts
                .into_iter()
                .filter_map(|r| {
                    Some(PhaseAnomalyCount {
                        phase: phase_of(&r.sensor)?,
                        samples: count(r.samples),
                        sag: count(r.sag),
                        swell: count(r.swell),
                        outage: count(r.outage),
                    })
                })
                .collect(),
            worst: worst
                .into_iter()
                .filter_map(|r| voltage_event(r, &band))
                .collect(),
        })
    }

    async fn power_outliers(&self, range: &TimeRange, _params: &AnalyticsParams) -> Result<PowerOutliers> {
        let rows = sqlx::query_as::<_, OutlierRow>(OUTLIERS_SQL)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(PowerOutliers {
            phases: rows.into_iter().filter_map(outliers_from_row).collect(),
        })
    }
}
