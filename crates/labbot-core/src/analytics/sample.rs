use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    analytics::{metrics, types::*, AnalyticsBackend},
    Result,
};

/// Raw measurement rows for a range.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn samples(&self, range: &TimeRange) -> Result<Vec<Sample>>;
}

/// Backend that loads samples and computes every analytic in process.
#[derive(Clone)]
pub struct SampleAnalytics {
    source: Arc<dyn SampleSource>,
}

impl SampleAnalytics {
    pub fn new(source: Arc<dyn SampleSource>) -> Self {
        Self { source }
    }

    async fn load(&self, range: &TimeRange) -> Result<Vec<Sample>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let samples = self.source.samples(range).await?;
        debug!(count = samples.len(), %range, "samples loaded");
        Ok(samples)
    }
}

#[async_trait]
impl AnalyticsBackend for SampleAnalytics {
    fn name(&self) -> &'static str {
        "samples"
    }

    async fn consumption(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<Consumption> {
        Ok(metrics::consumption(&self.load(range).await?, params.max_gap))
    }

    async fn daily_consumption(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<DailyConsumption> {
        Ok(metrics::daily_consumption(
            &self.load(range).await?,
            params.max_gap,
        ))
    }

    async fn demand_peaks(&self, range: &TimeRange, params: &AnalyticsParams) -> Result<DemandPeaks> {
        Ok(metrics::demand_peaks(
            &self.load(range).await?,
            params.demand_window,
        ))
    }

    async fn power_factor(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PowerFactorReport> {
        Ok(metrics::power_factor(
            &self.load(range).await?,
            params.power_factor_reference,
        ))
    }

    async fn load_profile(&self, range: &TimeRange, _params: &AnalyticsParams) -> Result<LoadProfile> {
        Ok(metrics::load_profile(&self.load(range).await?))
    }

    async fn phase_imbalance(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PhaseImbalance> {
        Ok(metrics::phase_imbalance(
            &self.load(range).await?,
            params.imbalance_threshold_pct,
        ))
    }

    async fn voltage_anomalies(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<VoltageAnomalies> {
        Ok(metrics::voltage_anomalies(
            &self.load(range).await?,
            params.voltage_band,
            params.max_events,
        ))
    }

    async fn power_outliers(
        &self,
        range: &TimeRange,
        _params: &AnalyticsParams,
    ) -> Result<PowerOutliers> {
        Ok(metrics::power_outliers(&self.load(range).await?))
    }
}
