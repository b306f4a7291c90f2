//! Chart descriptions and the default SVG renderer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::RenderError;

/// Kind of chart to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
}

/// A single plotted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
    /// Category label for bar and pie charts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DataPoint {
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, label: None }
    }

    pub fn labeled(label: impl Into<String>, y: f64) -> Self {
        Self {
            x: 0.0,
            y,
            label: Some(label.into()),
        }
    }
}

/// A named data series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<DataPoint>,
}

impl Series {
    pub fn new(name: impl Into<String>, points: Vec<DataPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

/// Everything a renderer needs to draw one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Stable identifier used for file names and lookups
    pub name: String,
    pub title: String,
    pub kind: ChartKind,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
}

impl ChartSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>, kind: ChartKind) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            kind,
            x_label: String::new(),
            y_label: String::new(),
            series: Vec::new(),
        }
    }

    pub fn axes(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }

    pub fn series(mut self, series: Series) -> Self {
        self.series.push(series);
        self
    }

    fn points(&self) -> impl Iterator<Item = &DataPoint> {
        self.series.iter().flat_map(|s| s.points.iter())
    }

    /// Reject charts a renderer cannot draw meaningfully
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.points().next().is_none() {
            return Err(RenderError::EmptyChart(self.name.clone()));
        }
        if self.points().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(RenderError::InvalidData(format!(
                "chart '{}' contains non-finite values",
                self.name
            )));
        }
        if self.kind == ChartKind::Pie && self.points().any(|p| p.y < 0.0) {
            return Err(RenderError::InvalidData(format!(
                "pie chart '{}' contains negative slices",
                self.name
            )));
        }
        Ok(())
    }
}

/// Turns a chart description into image bytes
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render_chart(&self, spec: &ChartSpec) -> Result<Vec<u8>, RenderError>;

    /// MIME type of the bytes produced by [`ChartRenderer::render_chart`]
    fn media_type(&self) -> &'static str;
}

const PALETTE: [&str; 6] = ["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b"];

/// Renders charts as standalone SVG documents
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    width: f64,
    height: f64,
}

impl SvgChartRenderer {
    pub fn new() -> Self {
        Self {
            width: 800.0,
            height: 500.0,
        }
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width: f64::from(width.max(200)),
            height: f64::from(height.max(150)),
        }
    }

    fn draw(&self, spec: &ChartSpec) -> Result<String, std::fmt::Error> {
        let mut svg = String::new();
        writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
            w = self.width,
            h = self.height
        )?;
        writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
        writeln!(
            svg,
            r#"<text x="{}" y="28" text-anchor="middle" font-size="18">{}</text>"#,
            self.width / 2.0,
            escape(&spec.title)
        )?;

        match spec.kind {
            ChartKind::Line => self.draw_line(spec, &mut svg)?,
            ChartKind::Bar => self.draw_bar(spec, &mut svg)?,
            ChartKind::Pie => self.draw_pie(spec, &mut svg)?,
        }

        svg.push_str("</svg>\n");
        Ok(svg)
    }

    fn plot_area(&self) -> (f64, f64, f64, f64) {
        // left, top, right, bottom
        (70.0, 50.0, self.width - 30.0, self.height - 60.0)
    }

    fn draw_axes(
        &self,
        spec: &ChartSpec,
        svg: &mut String,
        y_max: f64,
    ) -> Result<(), std::fmt::Error> {
        let (left, top, right, bottom) = self.plot_area();
        writeln!(
            svg,
            r#"<line x1="{left}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="black"/>"#
        )?;
        writeln!(
            svg,
            r#"<line x1="{left}" y1="{top}" x2="{left}" y2="{bottom}" stroke="black"/>"#
        )?;

        for i in 0..=4 {
            let value = y_max * f64::from(i) / 4.0;
            let y = bottom - (bottom - top) * f64::from(i) / 4.0;
            writeln!(
                svg,
                r#"<text x="{}" y="{:.1}" text-anchor="end" font-size="11">{}</text>"#,
                left - 6.0,
                y + 4.0,
                tick_label(value)
            )?;
        }

        writeln!(
            svg,
            r#"<text x="{:.1}" y="{}" text-anchor="middle" font-size="13">{}</text>"#,
            (left + right) / 2.0,
            self.height - 15.0,
            escape(&spec.x_label)
        )?;
        writeln!(
            svg,
            r#"<text x="18" y="{:.1}" text-anchor="middle" font-size="13" transform="rotate(-90 18 {:.1})">{}</text>"#,
            (top + bottom) / 2.0,
            (top + bottom) / 2.0,
            escape(&spec.y_label)
        )?;
        Ok(())
    }

    fn draw_line(&self, spec: &ChartSpec, svg: &mut String) -> Result<(), std::fmt::Error> {
        let (left, top, right, bottom) = self.plot_area();
        let (x_min, x_max) = bounds(spec.points().map(|p| p.x));
        let (_, y_max) = bounds(spec.points().map(|p| p.y).chain(std::iter::once(0.0)));
        let y_max = if y_max > 0.0 { y_max } else { 1.0 };
        let x_span = if x_max > x_min { x_max - x_min } else { 1.0 };

        self.draw_axes(spec, svg, y_max)?;

        for i in 0..=4 {
            let value = x_min + x_span * f64::from(i) / 4.0;
            let x = left + (right - left) * f64::from(i) / 4.0;
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{}" text-anchor="middle" font-size="11">{}</text>"#,
                x,
                bottom + 16.0,
                tick_label(value)
            )?;
        }

        for (idx, series) in spec.series.iter().enumerate() {
            let color = PALETTE[idx % PALETTE.len()];
            let coords: Vec<String> = series
                .points
                .iter()
                .map(|p| {
                    let x = left + (p.x - x_min) / x_span * (right - left);
                    let y = bottom - p.y / y_max * (bottom - top);
                    format!("{:.1},{:.1}", x, y)
                })
                .collect();
            writeln!(
                svg,
                r#"<polyline fill="none" stroke="{}" stroke-width="2" points="{}"/>"#,
                color,
                coords.join(" ")
            )?;
            writeln!(
                svg,
                r#"<text x="{}" y="{}" font-size="12" fill="{}">{}</text>"#,
                right - 150.0,
                top + 16.0 * (idx as f64 + 1.0),
                color,
                escape(&series.name)
            )?;
        }
        Ok(())
    }

    fn draw_bar(&self, spec: &ChartSpec, svg: &mut String) -> Result<(), std::fmt::Error> {
        let (left, top, right, bottom) = self.plot_area();
        let points: Vec<&DataPoint> = spec.points().collect();
        let (_, y_max) = bounds(points.iter().map(|p| p.y).chain(std::iter::once(0.0)));
        let y_max = if y_max > 0.0 { y_max } else { 1.0 };

        self.draw_axes(spec, svg, y_max)?;

        let slot = (right - left) / points.len() as f64;
        for (idx, point) in points.iter().enumerate() {
            let height = point.y.max(0.0) / y_max * (bottom - top);
            let x = left + slot * idx as f64 + slot * 0.15;
            writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
                x,
                bottom - height,
                slot * 0.7,
                height,
                PALETTE[0]
            )?;
            let label = point
                .label
                .clone()
                .unwrap_or_else(|| tick_label(point.x));
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{}" text-anchor="middle" font-size="11">{}</text>"#,
                x + slot * 0.35,
                bottom + 16.0,
                escape(&label)
            )?;
        }
        Ok(())
    }

    fn draw_pie(&self, spec: &ChartSpec, svg: &mut String) -> Result<(), std::fmt::Error> {
        let points: Vec<&DataPoint> = spec.points().collect();
        let total: f64 = points.iter().map(|p| p.y).sum();
        let cx = self.width / 2.0 - 80.0;
        let cy = self.height / 2.0 + 15.0;
        let radius = (self.height / 2.0 - 70.0).max(40.0);

        if total <= 0.0 {
            writeln!(
                svg,
                r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{radius:.1}" fill="none" stroke="gray"/>"#
            )?;
        }

        let mut angle = -std::f64::consts::FRAC_PI_2;
        for (idx, point) in points.iter().enumerate() {
            let color = PALETTE[idx % PALETTE.len()];
            let share = if total > 0.0 { point.y / total } else { 0.0 };

            if share >= 0.9999 {
                writeln!(
                    svg,
                    r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{radius:.1}" fill="{color}"/>"#
                )?;
            } else if share > 0.0 {
                let sweep = share * std::f64::consts::TAU;
                let (x1, y1) = (cx + radius * angle.cos(), cy + radius * angle.sin());
                let end = angle + sweep;
                let (x2, y2) = (cx + radius * end.cos(), cy + radius * end.sin());
                let large_arc = if sweep > std::f64::consts::PI { 1 } else { 0 };
                writeln!(
                    svg,
                    r#"<path d="M{cx:.1},{cy:.1} L{x1:.1},{y1:.1} A{radius:.1},{radius:.1} 0 {large_arc} 1 {x2:.1},{y2:.1} Z" fill="{color}"/>"#
                )?;
                angle = end;
            }

            let label = point.label.clone().unwrap_or_else(|| format!("#{}", idx + 1));
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-size="12" fill="{}">{} ({:.1}%)</text>"#,
                cx + radius + 30.0,
                cy - radius + 20.0 * (idx as f64 + 1.0),
                color,
                escape(&label),
                share * 100.0
            )?;
        }
        Ok(())
    }
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChartRenderer for SvgChartRenderer {
    async fn render_chart(&self, spec: &ChartSpec) -> Result<Vec<u8>, RenderError> {
        spec.validate()?;
        let svg = self
            .draw(spec)
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        Ok(svg.into_bytes())
    }

    fn media_type(&self) -> &'static str {
        "image/svg+xml"
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn tick_label(value: f64) -> String {
    if value.abs() >= 100.0 || value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fuel_curve() -> ChartSpec {
        ChartSpec::new("speed_vs_fuel", "Speed vs Fuel <GPH>", ChartKind::Line)
            .axes("Speed (knots)", "Fuel (gal/h)")
            .series(Series::new(
                "Fuel rate",
                vec![DataPoint::xy(5.0, 1.2), DataPoint::xy(10.0, 3.4), DataPoint::xy(15.0, 7.9)],
            ))
    }

    #[tokio::test]
    async fn test_line_chart_is_svg() {
        let renderer = SvgChartRenderer::new();
        let bytes = renderer.render_chart(&fuel_curve()).await.unwrap();
        let svg = String::from_utf8(bytes).unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("Speed vs Fuel &lt;GPH&gt;"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(renderer.media_type(), "image/svg+xml");
    }

    #[tokio::test]
    async fn test_bar_and_pie_charts() {
        let renderer = SvgChartRenderer::new();

        let bar = ChartSpec::new("fuel_by_voyage", "Fuel by voyage", ChartKind::Bar).series(
            Series::new("Fuel", vec![DataPoint::labeled("V1", 4.0), DataPoint::labeled("V2", 2.0)]),
        );
        let svg = String::from_utf8(renderer.render_chart(&bar).await.unwrap()).unwrap();
        assert_eq!(svg.matches("<rect").count(), 3); // background + 2 bars

        let pie = ChartSpec::new("emissions", "Emissions", ChartKind::Pie).series(Series::new(
            "CO2",
            vec![DataPoint::labeled("Operational", 75.0), DataPoint::labeled("Auxiliary", 25.0)],
        ));
        let svg = String::from_utf8(renderer.render_chart(&pie).await.unwrap()).unwrap();
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains("Operational (75.0%)"));
    }

    #[tokio::test]
    async fn test_rejects_empty_and_non_finite() {
        let renderer = SvgChartRenderer::new();
        let empty = ChartSpec::new("empty", "Empty", ChartKind::Line);
        assert!(matches!(
            renderer.render_chart(&empty).await,
            Err(RenderError::EmptyChart(_))
        ));

        let bad = ChartSpec::new("bad", "Bad", ChartKind::Line)
            .series(Series::new("s", vec![DataPoint::xy(1.0, f64::NAN)]));
        assert!(matches!(
            renderer.render_chart(&bad).await,
            Err(RenderError::InvalidData(_))
        ));
    }
}
