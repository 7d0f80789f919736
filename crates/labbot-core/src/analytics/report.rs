use tracing::warn;

use crate::{
    analytics::types::*,
    charts::{ChartKind, ChartSpec, Series},
    formatting::markdown_table,
    utils::truncate_text,
};

const DATETIME: &str = "%d/%m/%Y %H:%M";

fn n2(v: f64) -> String {
    format!("{v:.2}")
}

/// Markdown summary of a result, truncated to `max_chars`.
pub fn render(result: &AnalyticsResult, range: &TimeRange, max_chars: usize) -> String {
    let text = render_full(result, range);
    let len = text.chars().count();
    if len > max_chars {
        warn!(
            analytic = %result.analytic(),
            len,
            max_chars,
            "analytics report truncated"
        );
        return truncate_text(&text, max_chars);
    }
    text
}

pub fn render_full(result: &AnalyticsResult, range: &TimeRange) -> String {
    match result {
        AnalyticsResult::Consumption(r) => {
            let mut rows: Vec<Vec<String>> = r
                .phases
                .iter()
                .map(|p| vec![p.phase.to_string(), n2(p.kwh)])
                .collect();
            rows.push(vec!["total".into(), n2(r.total_kwh)]);
            format!(
                "Consumo de energia ({range}):\n{}",
                markdown_table(&["fase", "kWh"], &rows)
            )
        }
        AnalyticsResult::DailyConsumption(r) => {
            let rows: Vec<Vec<String>> = r
                .days
                .iter()
                .map(|d| vec![d.date.format("%d/%m/%Y").to_string(), n2(d.kwh)])
                .collect();
            format!(
                "Consumo diário ({range}), total {} kWh:\n{}",
                n2(r.total_kwh),
                markdown_table(&["dia", "kWh"], &rows)
            )
        }
        AnalyticsResult::DemandPeaks(r) => {
            let rows: Vec<Vec<String>> = r
                .phases
                .iter()
                .map(|p| {
                    vec![
                        p.phase.to_string(),
                        n2(p.peak_demand_kw),
                        p.peak_window_end.format(DATETIME).to_string(),
                        n2(p.max_instant_kw),
                        p.max_instant_at.format(DATETIME).to_string(),
                    ]
                })
                .collect();
            format!(
                "Picos de demanda, janela de {} min ({range}):\n{}",
                r.window_minutes,
                markdown_table(
                    &[
                        "fase",
                        "demanda máx (kW)",
                        "fim da janela",
                        "potência instantânea máx (kW)",
                        "em",
                    ],
                    &rows
                )
            )
        }
        AnalyticsResult::PowerFactor(r) => {
            let rows: Vec<Vec<String>> = r
                .phases
                .iter()
                .map(|p| {
                    vec![
                        p.phase.to_string(),
                        format!("{:.3}", p.mean),
                        format!("{:.3}", p.min),
                        format!("{:.3}", p.aggregate),
                        p.samples.to_string(),
                        p.below_reference.to_string(),
                    ]
                })
                .collect();
            format!(
                "Fator de potência, referência {:.2} ({range}):\n{}",
                r.reference,
                markdown_table(
                    &["fase", "médio", "mínimo", "agregado", "amostras", "abaixo da ref."],
                    &rows
                )
            )
        }
        AnalyticsResult::LoadProfile(r) => {
            let rows: Vec<Vec<String>> = r
                .hours
                .iter()
                .map(|h| vec![format!("{:02}h", h.hour), n2(h.mean_kw)])
                .collect();
            format!(
                "Perfil de carga por hora, soma das fases ({range}):\n{}",
                markdown_table(&["hora", "potência média (kW)"], &rows)
            )
        }
        AnalyticsResult::PhaseImbalance(r) => {
            let rows: Vec<Vec<String>> = r
                .phase_currents
                .iter()
                .map(|p| vec![p.phase.to_string(), n2(p.mean_a)])
                .collect();
            let max_at = r
                .max_at
                .map(|t| t.format(DATETIME).to_string())
                .unwrap_or_else(|| "-".into());
            format!(
                "Desequilíbrio de corrente entre fases ({range}):\n\
                 instantes analisados: {}\n\
                 desequilíbrio médio: {}%\n\
                 desequilíbrio máximo: {}% em {max_at}\n\
                 instantes acima de {}%: {}\n{}",
                r.samples,
                n2(r.mean_pct),
                n2(r.max_pct),
                n2(r.threshold_pct),
                r.above_threshold,
                markdown_table(&["fase", "corrente média (A)"], &rows)
            )
        }
        AnalyticsResult::VoltageAnomalies(r) => {
            let b = &r.band;
            let header = format!(
                "Anomalias de tensão ({range}), faixa adequada {:.0}-{:.0} V, nominal {:.0} V:",
                b.lower, b.upper, b.nominal
            );
            let counts: Vec<Vec<String>> = r
                .phases
                .iter()
                .map(|p| {
                    vec![
                        p.phase.to_string(),
                        p.samples.to_string(),
                        p.sag.to_string(),
                        p.swell.to_string(),
                        p.outage.to_string(),
                    ]
                })
                .collect();
            let counts = markdown_table(
                &["fase", "amostras", "afundamentos", "sobretensões", "interrupções"],
                &counts,
            );
            if r.total_events() == 0 {
                return format!("{header}\n{counts}\nNenhuma anomalia de tensão encontrada.");
            }
            let worst: Vec<Vec<String>> = r
                .worst
                .iter()
                .map(|e| {
                    vec![
                        e.timestamp.format(DATETIME).to_string(),
                        e.phase.to_string(),
                        format!("{:.1}", e.voltage_v),
                        format!("{:+.1}", e.deviation_pct),
                        e.kind.label().to_string(),
                    ]
                })
                .collect();
            format!(
                "{header}\n{counts}\nPiores eventos:\n{}",
                markdown_table(&["data/hora", "fase", "tensão (V)", "desvio (%)", "tipo"], &worst)
            )
        }
        AnalyticsResult::PowerOutliers(r) => {
            let rows: Vec<Vec<String>> = r
                .phases
                .iter()
                .map(|p| {
                    vec![
                        p.phase.to_string(),
                        n2(p.min),
                        n2(p.q1),
                        n2(p.median),
                        n2(p.q3),
                        n2(p.max),
                        n2(p.lower_fence),
                        n2(p.upper_fence),
                        format!("{}/{}", p.outliers, p.samples),
                    ]
                })
                .collect();
            format!(
                "Distribuição da potência ativa (kW) e outliers ({range}):\n{}",
                markdown_table(
                    &[
                        "fase",
                        "mín",
                        "Q1",
                        "mediana",
                        "Q3",
                        "máx",
                        "limite inf.",
                        "limite sup.",
                        "outliers",
                    ],
                    &rows
                )
            )
        }
    }
}

fn phase_categories<T>(items: &[T], phase: impl Fn(&T) -> Phase) -> Vec<String> {
    items.iter().map(|i| phase(i).to_string()).collect()
}

fn series(name: &str, values: Vec<f64>) -> Series {
    Series {
        name: name.to_string(),
        values,
    }
}

/// Chart description for a result.
pub fn chart_spec(result: &AnalyticsResult, range: &TimeRange) -> ChartSpec {
    let subtitle = range.to_string();
    match result {
        AnalyticsResult::Consumption(r) => ChartSpec {
            title: format!("Consumo por fase ({subtitle})"),
            x_label: "fase".into(),
            y_label: "kWh".into(),
            kind: ChartKind::Bar,
            categories: phase_categories(&r.phases, |p| p.phase),
            series: vec![series("kWh", r.phases.iter().map(|p| p.kwh).collect())],
        },
        AnalyticsResult::DailyConsumption(r) => ChartSpec {
            title: format!("Consumo diário ({subtitle})"),
            x_label: "dia".into(),
            y_label: "kWh".into(),
            kind: ChartKind::Bar,
            categories: r
                .days
                .iter()
                .map(|d| d.date.format("%d/%m").to_string())
                .collect(),
            series: vec![series("kWh", r.days.iter().map(|d| d.kwh).collect())],
        },
        AnalyticsResult::DemandPeaks(r) => ChartSpec {
            title: format!("Picos de demanda, janela de {} min", r.window_minutes),
            x_label: "fase".into(),
            y_label: "kW".into(),
            kind: ChartKind::GroupedBar,
            categories: phase_categories(&r.phases, |p| p.phase),
            series: vec![
                series(
                    "demanda máx",
                    r.phases.iter().map(|p| p.peak_demand_kw).collect(),
                ),
                series(
                    "instantânea máx",
                    r.phases.iter().map(|p| p.max_instant_kw).collect(),
                ),
            ],
        },
        AnalyticsResult::PowerFactor(r) => ChartSpec {
            title: format!("Fator de potência ({subtitle})"),
            x_label: "fase".into(),
            y_label: "FP".into(),
            kind: ChartKind::GroupedBar,
            categories: phase_categories(&r.phases, |p| p.phase),
            series: vec![
                series("médio", r.phases.iter().map(|p| p.mean).collect()),
                series("mínimo", r.phases.iter().map(|p| p.min).collect()),
                series("referência", r.phases.iter().map(|_| r.reference).collect()),
            ],
        },
        AnalyticsResult::LoadProfile(r) => ChartSpec {
            title: format!("Perfil de carga horário ({subtitle})"),
            x_label: "hora".into(),
            y_label: "kW".into(),
            kind: ChartKind::Line,
            categories: r.hours.iter().map(|h| format!("{:02}h", h.hour)).collect(),
            series: vec![series("kW", r.hours.iter().map(|h| h.mean_kw).collect())],
        },
        AnalyticsResult::PhaseImbalance(r) => ChartSpec {
            title: format!("Corrente média por fase ({subtitle})"),
            x_label: "fase".into(),
            y_label: "A".into(),
            kind: ChartKind::Bar,
            categories: phase_categories(&r.phase_currents, |p| p.phase),
            series: vec![series(
                "corrente média",
                r.phase_currents.iter().map(|p| p.mean_a).collect(),
            )],
        },
        AnalyticsResult::VoltageAnomalies(r) => ChartSpec {
            title: format!("Anomalias de tensão ({subtitle})"),
            x_label: "fase".into(),
            y_label: "ocorrências".into(),
            kind: ChartKind::GroupedBar,
            categories: phase_categories(&r.phases, |p| p.phase),
            series: vec![
                series(
                    "afundamentos",
                    r.phases.iter().map(|p| p.sag as f64).collect(),
                ),
                series(
                    "sobretensões",
                    r.phases.iter().map(|p| p.swell as f64).collect(),
                ),
                series(
                    "interrupções",
                    r.phases.iter().map(|p| p.outage as f64).collect(),
                ),
            ],
        },
        AnalyticsResult::PowerOutliers(r) => ChartSpec {
            title: format!("Distribuição da potência ({subtitle})"),
            x_label: "fase".into(),
            y_label: "kW".into(),
            kind: ChartKind::GroupedBar,
            categories: phase_categories(&r.phases, |p| p.phase),
            series: vec![
                series("Q1", r.phases.iter().map(|p| p.q1).collect()),
                series("mediana", r.phases.iter().map(|p| p.median).collect()),
                series("Q3", r.phases.iter().map(|p| p.q3).collect()),
                series("limite sup.", r.phases.iter().map(|p| p.upper_fence).collect()),
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> TimeRange {
        let d = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        TimeRange::new(
            d.and_hms_opt(0, 0, 0).unwrap(),
            d.and_hms_opt(0, 0, 0).unwrap() + chrono::Duration::days(7),
        )
    }

    fn consumption() -> AnalyticsResult {
        AnalyticsResult::Consumption(Consumption {
            phases: vec![
                PhaseEnergy {
                    phase: Phase::Fase1,
                    kwh: 120.456,
                },
                PhaseEnergy {
                    phase: Phase::Fase2,
                    kwh: 80.0,
                },
            ],
            total_kwh: 200.456,
        })
    }

    #[test]
    fn consumption_table() {
        let text = render(&consumption(), &range(), 1500);
        assert!(text.starts_with("Consumo de energia (08/09/2025 00:00 a 15/09/2025 00:00)"));
        assert!(text.contains("| fase1 | 120.46 |"));
        assert!(text.contains("| total | 200.46 |"));
    }

    #[test]
    fn long_reports_are_truncated() {
        let text = render(&consumption(), &range(), 20);
        assert_eq!(text.chars().count(), 23);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn no_voltage_events_says_so() {
        let r = AnalyticsResult::VoltageAnomalies(VoltageAnomalies {
            band: VoltageBand::default(),
            phases: vec![PhaseAnomalyCount {
                phase: Phase::Fase1,
                samples: 10,
                sag: 0,
                swell: 0,
                outage: 0,
            }],
            worst: vec![],
        });
        let text = render_full(&r, &range());
        assert!(text.contains("faixa adequada 202-231 V"));
        assert!(text.ends_with("Nenhuma anomalia de tensão encontrada."));
    }

    #[test]
    fn chart_series_match_categories() {
        let spec = chart_spec(&consumption(), &range());
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.categories, vec!["fase1", "fase2"]);
        assert_eq!(spec.series[0].values, vec![120.456, 80.0]);
    }
}
