//! Runs every analytic through Postgres and through the in-process rules on
//! the same readings. Skipped unless `DATABASE_URL` is set.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use labbot_core::{
    analytics::{sample::SampleAnalytics, sample::SampleSource, types::*, AnalyticsBackend},
    Result,
};
use labbot_postgres::SqlAnalytics;
use sqlx::{postgres::PgPoolOptions, PgPool};

const EPS: f64 = 1e-9;

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, 15)
        .unwrap()
        .and_hms_opt(22, 0, 0)
        .unwrap()
}

/// Five-minute readings across midnight with a 25 minute hole, a missing
/// phase, a zero-power row, a demand spike, an imbalance spike and one
/// voltage event of each kind.
fn fixture() -> Vec<Sample> {
    let mut rows = Vec::new();
    for i in 0..60u32 {
        if (20..24).contains(&i) {
            continue;
        }
        let ts = base() + Duration::minutes(5 * i64::from(i));
        for phase in Phase::ALL {
            let k = phase.index() as f64;
            if phase == Phase::Fase3 && i == 7 {
                continue;
            }
            let mut power = 2.0 + k * 0.5 + f64::from((i * 37) % 101) * 0.01;
            if (30..=32).contains(&i) {
                power += 8.0 + f64::from(i - 30) * 0.3 + k * 0.1;
            }
            let mut reactive = 0.6 + f64::from(i % 5) * 0.07 + k * 0.02;
            if phase == Phase::Fase2 && i == 11 {
                power = 0.0;
                reactive = 0.0;
            }
            let mut current = power * 4.5 + k * 0.3;
            if phase == Phase::Fase1 && i == 40 {
                current += 120.0;
            }
            let voltage = match (phase, i) {
                (Phase::Fase1, 15) => 180.0,
                (Phase::Fase2, 16) => 240.0,
                (Phase::Fase3, 17) => 0.0,
                _ => 219.0 + f64::from(i % 4) + k,
            };
            rows.push(Sample {
                timestamp: ts,
                phase,
                power_kw: power,
                reactive_kvar: reactive,
                current_a: current,
                voltage_v: voltage,
            });
        }
    }
    rows
}

struct InMemory(Vec<Sample>);

#[async_trait]
impl SampleSource for InMemory {
    async fn samples(&self, range: &TimeRange) -> Result<Vec<Sample>> {
        Ok(self
            .0
            .iter()
            .filter(|s| s.timestamp >= range.start && s.timestamp < range.end)
            .cloned()
            .collect())
    }
}

async fn setup_pool(url: &str, schema: &str, rows: &[Sample]) -> PgPool {
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .unwrap();
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;

    let schema_name = schema.to_string();
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(move |conn, _meta| {
            let schema = schema_name.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {schema}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(url)
        .await
        .unwrap();

    sqlx::query(
        r#"
        CREATE TABLE medicoes (
            "timestamp" timestamp NOT NULL,
            sensor text NOT NULL,
            power double precision NOT NULL,
            "reactivePower" double precision NOT NULL,
            "current" double precision NOT NULL,
            voltage double precision NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    for s in rows {
        sqlx::query(
            r#"INSERT INTO medicoes ("timestamp", sensor, power, "reactivePower", "current", voltage)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(s.timestamp)
        .bind(s.phase.as_str())
        .bind(s.power_kw)
        .bind(s.reactive_kvar)
        .bind(s.current_a)
        .bind(s.voltage_v)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool
}

fn close(what: &str, sql: f64, rules: f64) {
    assert!(
        (sql - rules).abs() < EPS,
        "{what}: sql {sql} vs in-process {rules}"
    );
}

fn assert_consumption(sql: &Consumption, rules: &Consumption) {
    assert_eq!(sql.phases.len(), rules.phases.len());
    for (a, b) in sql.phases.iter().zip(&rules.phases) {
        assert_eq!(a.phase, b.phase);
        close("phase kwh", a.kwh, b.kwh);
    }
    close("total kwh", sql.total_kwh, rules.total_kwh);
}

fn assert_daily(sql: &DailyConsumption, rules: &DailyConsumption) {
    assert_eq!(sql.days.len(), 2);
    assert_eq!(sql.days.len(), rules.days.len());
    for (a, b) in sql.days.iter().zip(&rules.days) {
        assert_eq!(a.date, b.date);
        close("daily kwh", a.kwh, b.kwh);
    }
    close("daily total", sql.total_kwh, rules.total_kwh);
}

fn assert_demand(sql: &DemandPeaks, rules: &DemandPeaks) {
    assert_eq!(sql.window_minutes, rules.window_minutes);
    assert_eq!(sql.phases.len(), 3);
    for (a, b) in sql.phases.iter().zip(&rules.phases) {
        assert_eq!(a.phase, b.phase);
        close("peak demand", a.peak_demand_kw, b.peak_demand_kw);
        assert_eq!(a.peak_window_end, b.peak_window_end);
        close("max instant", a.max_instant_kw, b.max_instant_kw);
        assert_eq!(a.max_instant_at, b.max_instant_at);
    }
}

fn assert_power_factor(sql: &PowerFactorReport, rules: &PowerFactorReport) {
    assert_eq!(sql.phases.len(), rules.phases.len());
    for (a, b) in sql.phases.iter().zip(&rules.phases) {
        assert_eq!(a.phase, b.phase);
        close("mean pf", a.mean, b.mean);
        close("min pf", a.min, b.min);
        close("aggregate pf", a.aggregate, b.aggregate);
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.below_reference, b.below_reference);
    }
}

fn assert_load_profile(sql: &LoadProfile, rules: &LoadProfile) {
    assert_eq!(sql.hours.len(), rules.hours.len());
    for (a, b) in sql.hours.iter().zip(&rules.hours) {
        assert_eq!(a.hour, b.hour);
        close("hourly load", a.mean_kw, b.mean_kw);
    }
}

fn assert_imbalance(sql: &PhaseImbalance, rules: &PhaseImbalance) {
    assert_eq!(sql.samples, rules.samples);
    close("mean imbalance", sql.mean_pct, rules.mean_pct);
    close("max imbalance", sql.max_pct, rules.max_pct);
    assert_eq!(sql.max_at, rules.max_at);
    assert_eq!(sql.above_threshold, rules.above_threshold);
    assert_eq!(sql.phase_currents.len(), rules.phase_currents.len());
    for (a, b) in sql.phase_currents.iter().zip(&rules.phase_currents) {
        assert_eq!(a.phase, b.phase);
        close("mean current", a.mean_a, b.mean_a);
    }
}

fn assert_voltage(sql: &VoltageAnomalies, rules: &VoltageAnomalies) {
    assert_eq!(sql.phases, rules.phases);
    assert_eq!(sql.worst.len(), 3);
    assert_eq!(sql.worst.len(), rules.worst.len());
    for (a, b) in sql.worst.iter().zip(&rules.worst) {
        assert_eq!((a.timestamp, a.phase, a.kind), (b.timestamp, b.phase, b.kind));
        close("event voltage", a.voltage_v, b.voltage_v);
        close("event deviation", a.deviation_pct, b.deviation_pct);
    }
}

fn assert_outliers(sql: &PowerOutliers, rules: &PowerOutliers) {
    assert_eq!(sql.phases.len(), rules.phases.len());
    for (a, b) in sql.phases.iter().zip(&rules.phases) {
        assert_eq!(a.phase, b.phase);
        assert_eq!(a.samples, b.samples);
        close("min", a.min, b.min);
        close("q1", a.q1, b.q1);
        close("median", a.median, b.median);
        close("q3", a.q3, b.q3);
        close("max", a.max, b.max);
        assert_eq!(a.outliers, b.outliers);
    }
}

#[tokio::test]
async fn sql_backend_matches_in_process_rules() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return;
    };

    let rows = fixture();
    let schema = format!("labbot_parity_{}", std::process::id());
    let pool = setup_pool(&url, &schema, &rows).await;

    let sql = SqlAnalytics::new(pool.clone());
    let rules = SampleAnalytics::new(Arc::new(InMemory(rows)));
    let params = AnalyticsParams::default();

    // Whole fixture, then a slice whose end falls inside the demand spike.
    let ranges = [
        TimeRange::new(base(), base() + Duration::hours(6)),
        TimeRange::new(
            base() + Duration::minutes(50),
            base() + Duration::minutes(5 * 32),
        ),
    ];

    for range in &ranges {
        assert_consumption(
            &sql.consumption(range, &params).await.unwrap(),
            &rules.consumption(range, &params).await.unwrap(),
        );
        assert_demand(
            &sql.demand_peaks(range, &params).await.unwrap(),
            &rules.demand_peaks(range, &params).await.unwrap(),
        );
        assert_power_factor(
            &sql.power_factor(range, &params).await.unwrap(),
            &rules.power_factor(range, &params).await.unwrap(),
        );
        assert_load_profile(
            &sql.load_profile(range, &params).await.unwrap(),
            &rules.load_profile(range, &params).await.unwrap(),
        );
        assert_imbalance(
            &sql.phase_imbalance(range, &params).await.unwrap(),
            &rules.phase_imbalance(range, &params).await.unwrap(),
        );
        assert_outliers(
            &sql.power_outliers(range, &params).await.unwrap(),
            &rules.power_outliers(range, &params).await.unwrap(),
        );
    }

    let whole = &ranges[0];
    assert_daily(
        &sql.daily_consumption(whole, &params).await.unwrap(),
        &rules.daily_consumption(whole, &params).await.unwrap(),
    );
    assert_voltage(
        &sql.voltage_anomalies(whole, &params).await.unwrap(),
        &rules.voltage_anomalies(whole, &params).await.unwrap(),
    );

    let imbalance = rules.phase_imbalance(whole, &params).await.unwrap();
    assert_eq!(imbalance.max_at, Some(base() + Duration::minutes(200)));

    pool.close().await;
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(&admin)
        .await;
}
