use std::{fmt::Write as _, path::PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
    GroupedBar,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Renderer-independent chart description built from an analytic result.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub kind: ChartKind,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
}

/// Writes a chart somewhere the messenger can pick it up from.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, spec: &ChartSpec) -> Result<PathBuf>;
}

/// Renders plain SVG files named `<uuid>.svg` into a directory.
#[derive(Clone, Debug)]
pub struct SvgChartRenderer {
    dir: PathBuf,
}

impl SvgChartRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ChartRenderer for SvgChartRenderer {
    async fn render(&self, spec: &ChartSpec) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.svg", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, to_svg(spec)).await?;
        debug!(path = %path.display(), title = %spec.title, "chart written");
        Ok(path)
    }
}

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 480.0;
const LEFT: f64 = 80.0;
const RIGHT: f64 = 30.0;
const TOP: f64 = 60.0;
const BOTTOM: f64 = 80.0;
const PALETTE: [&str; 6] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b",
];
const MAX_X_LABELS: usize = 16;

pub fn to_svg(spec: &ChartSpec) -> String {
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let n = spec.categories.len().max(1);

    let all = spec.series.iter().flat_map(|s| s.values.iter().copied());
    let (mut lo, mut hi) = all
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (hi - lo).abs() < f64::EPSILON {
        hi = lo + 1.0;
    }
    hi += (hi - lo) * 0.05;
    if lo < 0.0 {
        lo -= (hi - lo) * 0.05;
    }
    let y = |v: f64| TOP + plot_h - (v - lo) / (hi - lo) * plot_h;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    let _ = write!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = write!(
        svg,
        r#"<text x="{}" y="30" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
        WIDTH / 2.0,
        escape(&spec.title)
    );

    // Grid and y ticks.
    for i in 0..=5 {
        let v = lo + (hi - lo) * f64::from(i) / 5.0;
        let py = y(v);
        let _ = write!(
            svg,
            r##"<line x1="{LEFT}" y1="{py:.1}" x2="{:.1}" y2="{py:.1}" stroke="#e0e0e0"/><text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"##,
            LEFT + plot_w,
            LEFT - 6.0,
            py + 4.0,
            tick_label(v)
        );
    }

    let slot = plot_w / n as f64;
    match spec.kind {
        ChartKind::Line => {
            for (si, series) in spec.series.iter().enumerate() {
                let points: Vec<String> = series
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(i, v)| format!("{:.1},{:.1}", LEFT + slot * (i as f64 + 0.5), y(*v)))
                    .collect();
                let _ = write!(
                    svg,
                    r#"<polyline fill="none" stroke="{}" stroke-width="2" points="{}"/>"#,
                    PALETTE[si % PALETTE.len()],
                    points.join(" ")
                );
            }
        }
        ChartKind::Bar | ChartKind::GroupedBar => {
            let groups = spec.series.len().max(1);
            let bar_w = slot * 0.8 / groups as f64;
            let base = y(0.0f64.clamp(lo, hi));
            for (si, series) in spec.series.iter().enumerate() {
                for (i, v) in series.values.iter().enumerate() {
                    if !v.is_finite() {
                        continue;
                    }
                    let x = LEFT + slot * i as f64 + slot * 0.1 + bar_w * si as f64;
                    let top = y(*v).min(base);
                    let h = (y(*v) - base).abs();
                    let _ = write!(
                        svg,
                        r#"<rect x="{x:.1}" y="{top:.1}" width="{bar_w:.1}" height="{h:.1}" fill="{}"/>"#,
                        PALETTE[si % PALETTE.len()]
                    );
                }
            }
        }
    }

    // Axes.
    let _ = write!(
        svg,
        r##"<line x1="{LEFT}" y1="{TOP}" x2="{LEFT}" y2="{:.1}" stroke="#333"/><line x1="{LEFT}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#333"/>"##,
        TOP + plot_h,
        TOP + plot_h,
        LEFT + plot_w,
        TOP + plot_h
    );

    let step = spec.categories.len().div_ceil(MAX_X_LABELS).max(1);
    for (i, cat) in spec.categories.iter().enumerate().step_by(step) {
        let x = LEFT + slot * (i as f64 + 0.5);
        let _ = write!(
            svg,
            r#"<text x="{x:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            TOP + plot_h + 18.0,
            escape(cat)
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        LEFT + plot_w / 2.0,
        HEIGHT - 20.0,
        escape(&spec.x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{:.1}" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>"#,
        TOP + plot_h / 2.0,
        TOP + plot_h / 2.0,
        escape(&spec.y_label)
    );

    if spec.series.len() > 1 {
        for (si, series) in spec.series.iter().enumerate() {
            let ly = TOP + 14.0 * si as f64;
            let lx = LEFT + plot_w - 180.0;
            let _ = write!(
                svg,
                r#"<rect x="{lx:.1}" y="{:.1}" width="10" height="10" fill="{}"/><text x="{:.1}" y="{ly:.1}">{}</text>"#,
                ly - 9.0,
                PALETTE[si % PALETTE.len()],
                lx + 14.0,
                escape(&series.name)
            );
        }
    }

    svg.push_str("</svg>");
    svg
}

fn tick_label(v: f64) -> String {
    if v.abs() >= 100.0 {
        format!("{v:.0}")
    } else if v.abs() >= 1.0 {
        format!("{v:.1}")
    } else {
        format!("{v:.2}")
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ChartKind) -> ChartSpec {
        ChartSpec {
            title: "Consumo <diário>".into(),
            x_label: "dia".into(),
            y_label: "kWh".into(),
            kind,
            categories: vec!["01/09".into(), "02/09".into()],
            series: vec![Series {
                name: "kWh".into(),
                values: vec![10.0, 25.5],
            }],
        }
    }

    #[test]
    fn bar_chart_has_one_rect_per_value() {
        let svg = to_svg(&spec(ChartKind::Bar));
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("Consumo &lt;diário&gt;"));
        // background + 2 bars
        assert_eq!(svg.matches("<rect").count(), 3);
    }

    #[test]
    fn line_chart_uses_polyline() {
        let svg = to_svg(&spec(ChartKind::Line));
        assert_eq!(svg.matches("<polyline").count(), 1);
    }

    #[test]
    fn empty_series_still_renders() {
        let mut s = spec(ChartKind::GroupedBar);
        s.categories.clear();
        s.series.clear();
        assert!(to_svg(&s).ends_with("</svg>"));
    }

    #[tokio::test]
    async fn renderer_writes_uuid_named_svg() {
        let dir = std::env::temp_dir().join(format!("labbot-plots-{}", uuid::Uuid::new_v4()));
        let renderer = SvgChartRenderer::new(&dir);
        let path = renderer.render(&spec(ChartKind::Bar)).await.unwrap();
        assert_eq!(path.parent(), Some(dir.as_path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("svg"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("25.5") || body.contains("<rect"));
    }
}
