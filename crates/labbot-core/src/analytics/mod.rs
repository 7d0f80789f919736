//! Time-series analytics over three-phase electrical measurements.
//!
//! `period` turns symbolic tokens into ranges, `metrics` holds the numerical
//! rules, and `AnalyticsBackend` implementations compute results either in
//! the database, remotely, or in process over a `SampleSource`.

pub mod metrics;
pub mod mock;
pub mod period;
pub mod report;
pub mod sample;
pub mod types;

use async_trait::async_trait;

use crate::Result;

pub use types::*;

/// One async operation per analytic.
#[async_trait]
pub trait AnalyticsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn consumption(&self, range: &TimeRange, params: &AnalyticsParams)
        -> Result<Consumption>;

    async fn daily_consumption(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<DailyConsumption>;

    async fn demand_peaks(&self, range: &TimeRange, params: &AnalyticsParams)
        -> Result<DemandPeaks>;

    async fn power_factor(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PowerFactorReport>;

    async fn load_profile(&self, range: &TimeRange, params: &AnalyticsParams)
        -> Result<LoadProfile>;

    async fn phase_imbalance(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PhaseImbalance>;

    async fn voltage_anomalies(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<VoltageAnomalies>;

    async fn power_outliers(
        &self,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<PowerOutliers>;

    /// Dispatch by analytic name.
    async fn run(
        &self,
        analytic: Analytic,
        range: &TimeRange,
        params: &AnalyticsParams,
    ) -> Result<AnalyticsResult> {
        Ok(match analytic {
            Analytic::Consumption => {
                AnalyticsResult::Consumption(self.consumption(range, params).await?)
            }
            Analytic::DailyConsumption => {
                AnalyticsResult::DailyConsumption(self.daily_consumption(range, params).await?)
            }
            Analytic::DemandPeaks => {
                AnalyticsResult::DemandPeaks(self.demand_peaks(range, params).await?)
            }
            Analytic::PowerFactor => {
                AnalyticsResult::PowerFactor(self.power_factor(range, params).await?)
            }
            Analytic::LoadProfile => {
                AnalyticsResult::LoadProfile(self.load_profile(range, params).await?)
            }
            Analytic::PhaseImbalance => {
                AnalyticsResult::PhaseImbalance(self.phase_imbalance(range, params).await?)
            }
            Analytic::VoltageAnomalies => {
                AnalyticsResult::VoltageAnomalies(self.voltage_anomalies(range, params).await?)
            }
            Analytic::PowerOutliers => {
                AnalyticsResult::PowerOutliers(self.power_outliers(range, params).await?)
            }
        })
    }
}
