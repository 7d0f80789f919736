use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    analytics::{
        period::{Clock, Period},
        report, Analytic, AnalyticsBackend, AnalyticsParams,
    },
    charts::ChartRenderer,
    model::ToolDefinition,
    tools::{parse_args, Tool},
    Result,
};

pub const NO_DATA: &str = "Não há dados disponíveis para o período informado.";

#[derive(Debug, Deserialize)]
struct Args {
    analytic: String,
    period: String,
    #[serde(default)]
    should_plot: bool,
    #[serde(default)]
    window_minutes: Option<u64>,
}

/// Historical electrical measurements: resolves a period, runs one analytic, reports it.
pub struct DataAccess {
    backend: Arc<dyn AnalyticsBackend>,
    clock: Arc<dyn Clock>,
    charts: Arc<dyn ChartRenderer>,
    params: AnalyticsParams,
    max_report_chars: usize,
}

impl DataAccess {
    pub fn new(
        backend: Arc<dyn AnalyticsBackend>,
        clock: Arc<dyn Clock>,
        charts: Arc<dyn ChartRenderer>,
        params: AnalyticsParams,
        max_report_chars: usize,
    ) -> Self {
        Self {
            backend,
            clock,
            charts,
            params,
            max_report_chars,
        }
    }
}

fn subject(analytic: Analytic) -> &'static str {
    match analytic {
        Analytic::Consumption => "o consumo de energia",
        Analytic::DailyConsumption => "o consumo diário",
        Analytic::DemandPeaks => "os picos de demanda",
        Analytic::PowerFactor => "o fator de potência",
        Analytic::LoadProfile => "o perfil de carga",
        Analytic::PhaseImbalance => "o desequilíbrio entre fases",
        Analytic::VoltageAnomalies => "as anomalias de tensão",
        Analytic::PowerOutliers => "os outliers de potência",
    }
}

#[async_trait]
impl Tool for DataAccess {
    fn name(&self) -> &str {
        "DataAccess"
    }

    fn definition(&self) -> ToolDefinition {
        let analytics: Vec<&str> = Analytic::ALL.iter().map(|a| a.as_str()).collect();
        let periods: Vec<&str> = Period::ALL.iter().map(|p| p.as_str()).collect();
        ToolDefinition {
            name: "DataAccess".into(),
            description: "Acessa o histórico de medições elétricas trifásicas do laboratório \
                (fases fase1, fase2 e fase3). Análises: consumption (energia por fase, kWh), \
                daily_consumption (kWh por dia), demand_peaks (maior demanda média em janela \
                móvel), power_factor (fator de potência por fase), load_profile (potência média \
                por hora do dia), phase_imbalance (desequilíbrio de corrente entre fases), \
                voltage_anomalies (afundamentos, sobretensões e interrupções) e power_outliers \
                (quartis e outliers da potência ativa)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "analytic": {
                        "type": "string",
                        "enum": analytics,
                        "description": "A análise que deve ser executada."
                    },
                    "period": {
                        "type": "string",
                        "enum": periods,
                        "description": "O período de tempo analisado, relativo à data atual."
                    },
                    "should_plot": {
                        "type": "boolean",
                        "description": "Use true apenas se o usuário pediu explicitamente um gráfico."
                    },
                    "window_minutes": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 1440,
                        "description": "Janela da média móvel em minutos, apenas para demand_peaks."
                    }
                },
                "required": ["analytic", "period", "should_plot"]
            }),
        }
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: Args = parse_args(arguments)?;
        let analytic: Analytic = args.analytic.parse()?;
        let period = Period::parse(&args.period)?;
        let range = period.resolve(self.clock.as_ref())?;

        let mut params = self.params;
        if let Some(minutes) = args.window_minutes {
            params.demand_window = Duration::from_secs(minutes.clamp(1, 1440) * 60);
        }

        info!(
            %analytic,
            %period,
            start = %range.start,
            end = %range.end,
            should_plot = args.should_plot,
            backend = self.backend.name(),
            "DataAccess called"
        );

        if range.is_empty() {
            return Ok(NO_DATA.to_string());
        }

        let result = match self.backend.run(analytic, &range, &params).await {
            Ok(r) => r,
            Err(e) => {
                error!(%analytic, error = %e, "analytics backend failed");
                return Ok(format!("Não foi possível consultar {}.", subject(analytic)));
            }
        };
        if result.is_empty() {
            info!(%analytic, "no measurements for range");
            return Ok(NO_DATA.to_string());
        }

        let text = report::render(&result, &range, self.max_report_chars);
        if !args.should_plot {
            return Ok(text);
        }

        match self.charts.render(&report::chart_spec(&result, &range)).await {
            Ok(path) => Ok(format!(
                "Gráfico salvo no caminho: {}\nDados: {text}",
                path.display()
            )),
            Err(e) => {
                warn!(%analytic, error = %e, "chart rendering failed");
                Ok(format!("{text}\nNão foi possível gerar o gráfico."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::{
            mock::MockSampleSource,
            period::{FixedClock, PinnedClock},
            sample::SampleAnalytics,
            types::*,
        },
        charts::ChartSpec,
        errors::Error,
    };
    use chrono::{NaiveDate, NaiveDateTime};
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 17)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[derive(Default)]
    struct FakeCharts {
        rendered: Mutex<Vec<ChartSpec>>,
    }

    #[async_trait]
    impl ChartRenderer for FakeCharts {
        async fn render(&self, spec: &ChartSpec) -> Result<PathBuf> {
            self.rendered.lock().await.push(spec.clone());
            Ok(PathBuf::from("plots/fake.svg"))
        }
    }

    struct Broken;

    #[async_trait]
    impl crate::analytics::sample::SampleSource for Broken {
        async fn samples(&self, _range: &TimeRange) -> Result<Vec<Sample>> {
            Err(Error::External("connection refused".into()))
        }
    }

    fn tool_with(
        source: Arc<dyn crate::analytics::sample::SampleSource>,
        charts: Arc<FakeCharts>,
    ) -> DataAccess {
        DataAccess::new(
            Arc::new(SampleAnalytics::new(source)),
            Arc::new(FixedClock(now())),
            charts,
            AnalyticsParams::default(),
            1500,
        )
    }

    #[tokio::test]
    async fn reports_consumption_for_last_week() {
        let charts = Arc::new(FakeCharts::default());
        let tool = tool_with(Arc::new(MockSampleSource::new(now())), charts.clone());
        let out = tool
            .execute(r#"{"analytic":"consumption","period":"semana_passada","should_plot":false}"#)
            .await
            .unwrap();
        assert!(out.starts_with("Consumo de energia (08/09/2025 00:00 a 15/09/2025 00:00)"));
        assert!(out.contains("| total |"));
        assert!(charts.rendered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pinned_reference_date_answers_for_that_day() {
        let clock = PinnedClock::new(NaiveDate::from_ymd_opt(2025, 9, 15).unwrap());
        let tool = DataAccess::new(
            Arc::new(SampleAnalytics::new(Arc::new(MockSampleSource::new(clock.now())))),
            Arc::new(clock),
            Arc::new(FakeCharts::default()),
            AnalyticsParams::default(),
            1500,
        );

        let out = tool
            .execute(r#"{"analytic":"consumption","period":"hoje","should_plot":false}"#)
            .await
            .unwrap();
        assert!(out.starts_with("Consumo de energia (15/09/2025 00:00 a 16/09/2025 00:00)"));

        let out = tool
            .execute(r#"{"analytic":"consumption","period":"ontem","should_plot":false}"#)
            .await
            .unwrap();
        assert!(out.starts_with("Consumo de energia (14/09/2025 00:00 a 15/09/2025 00:00)"));
    }

    #[tokio::test]
    async fn plotting_prefixes_the_chart_path() {
        let charts = Arc::new(FakeCharts::default());
        let tool = tool_with(Arc::new(MockSampleSource::new(now())), charts.clone());
        let out = tool
            .execute(r#"{"analytic":"daily_consumption","period":"last_7_days","should_plot":true}"#)
            .await
            .unwrap();
        assert!(out.starts_with("Gráfico salvo no caminho: plots/fake.svg\nDados: "));
        assert_eq!(charts.rendered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_result_is_no_data() {
        let tool = tool_with(
            Arc::new(MockSampleSource::new(now()).with_history(chrono::Duration::days(1))),
            Arc::new(FakeCharts::default()),
        );
        let out = tool
            .execute(r#"{"analytic":"power_factor","period":"last_year","should_plot":false}"#)
            .await
            .unwrap();
        assert_eq!(out, NO_DATA);
    }

    #[tokio::test]
    async fn backend_failure_is_user_readable() {
        let tool = tool_with(Arc::new(Broken), Arc::new(FakeCharts::default()));
        let out = tool
            .execute(r#"{"analytic":"demand_peaks","period":"yesterday","should_plot":false,"window_minutes":30}"#)
            .await
            .unwrap();
        assert_eq!(out, "Não foi possível consultar os picos de demanda.");
    }

    #[tokio::test]
    async fn unknown_period_is_an_error() {
        let tool = tool_with(Arc::new(Broken), Arc::new(FakeCharts::default()));
        let err = tool
            .execute(r#"{"analytic":"consumption","period":"quinzena","should_plot":false}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn definition_lists_every_analytic() {
        let tool = tool_with(Arc::new(Broken), Arc::new(FakeCharts::default()));
        let def = tool.definition();
        let enums = def.parameters["properties"]["analytic"]["enum"]
            .as_array()
            .unwrap()
            .len();
        assert_eq!(enums, Analytic::ALL.len());
    }
}
