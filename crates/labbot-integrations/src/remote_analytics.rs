use async_trait::async_trait;
use labbot_core::{
    analytics::{types::*, AnalyticsBackend},
    Result,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::http::{build_client, read_json, request_err};

#[derive(Debug, Serialize)]
struct RemoteParams {
    demand_window_minutes: u64,
    max_gap_minutes: u64,
    power_factor_reference: f64,
    imbalance_threshold_pct: f64,
    voltage_band: VoltageBand,
    max_events: usize,
}

impl From<&AnalyticsParams> for RemoteParams {
    fn from(p: &AnalyticsParams) -> Self {
        Self {
            demand_window_minutes: p.demand_window_minutes(),
            max_gap_minutes: p.max_gap_minutes(),
            power_factor_reference: p.power_factor_reference,
            imbalance_threshold_pct: p.imbalance_threshold_pct,
            voltage_band: p.voltage_band,
            max_events: p.max_events,
        }
    }
}

/// `start`/`end` are local wall-clock time, `YYYY-MM-DDTHH:MM:SS`.
#[derive(Debug, Serialize)]
struct RemoteRequest<'a> {
    start: String,
    end: String,
    params: &'a RemoteParams,
}

/// Delegates every analytic to `POST {base_url}/analytics/{analytic}`.
///
/// The service answers with the same JSON shape the in-process backends
/// produce for that analytic.
#[derive(Clone, Debug)]
pub struct RemoteAnalytics {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteAnalytics {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        analytic: Analytic,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<T> {
        let url = format!("{}/analytics/{}", self.base_url, analytic.as_str());
        let params = RemoteParams::from(params);
        let body = RemoteRequest {
            start: range.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            end: range.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            params: &params,
        };

        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        debug!(%analytic, %range, "calling remote analytics");
        let resp = req
            .send()
            .await
            .map_err(|e| request_err("remote analytics", e))?;
        read_json("remote analytics", resp).await
    }
}

#[async_trait]
impl AnalyticsBackend for RemoteAnalytics {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn consumption(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<Consumption> {
        self.call(Analytic::Consumption, range, params).await
    }

    async fn daily_consumption(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<DailyConsumption> {
        self.call(Analytic::DailyConsumption, range, params).await
    }

    async fn demand_peaks(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<DemandPeaks> {
        self.call(Analytic::DemandPeaks, range, params).await
    }

    async fn power_factor(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PowerFactorReport> {
        self.call(Analytic::PowerFactor, range, params).await
    }

    async fn load_profile(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<LoadProfile> {
        self.call(Analytic::LoadProfile, range, params).await
    }

    async fn phase_imbalance(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PhaseImbalance> {
        self.call(Analytic::PhaseImbalance, range, params).await
    }

    async fn voltage_anomalies(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<VoltageAnomalies> {
        self.call(Analytic::VoltageAnomalies, range, params).await
    }

    async fn power_outliers(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<PowerOutliers> {
        self.call(Analytic::PowerOutliers, range, params).await
    }
}
