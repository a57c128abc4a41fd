//! Grouped uptime/downtime bar chart.

use std::panic;
use std::path::Path;

use anyhow::Result;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use plotters_backend::text_anchor::{HPos, Pos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind,
};
use rack_uptime::ColumnResult;
use tracing::debug;

const DOWNTIME_COLOR: RGBColor = RGBColor(255, 82, 82);
const UPTIME_COLOR: RGBColor = RGBColor(76, 175, 80);
const BAR_WIDTH: f64 = 0.38;
const CHART_SIZE: (u32, u32) = (1280, 760);

pub enum ChartKind {
    Png,
    Svg,
}

/// Render the chart, turning backend panics (missing system fonts, mostly)
/// into an error the caller can log.
pub fn render_chart_guard(
    title: &str,
    results: &[ColumnResult],
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_bar_chart(title, results, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_bar_chart(
    title: &str,
    results: &[ColumnResult],
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }
    match kind {
        ChartKind::Png => {
            let backend = BitMapBackend::new(path, CHART_SIZE);
            let root = FontSafeBackend::new(backend).into_drawing_area();
            draw_bar_chart(root, title, results)
        }
        ChartKind::Svg => {
            let backend = SVGBackend::new(path, CHART_SIZE);
            let root = FontSafeBackend::new(backend).into_drawing_area();
            draw_bar_chart(root, title, results)
        }
    }
}

/// Upper bound of the percentage axis, leaving headroom for the bar labels.
pub fn y_axis_max(results: &[ColumnResult]) -> f64 {
    let top = results
        .iter()
        .flat_map(|r| [r.uptime_pct, r.downtime_pct])
        .fold(0.0, f64::max);
    (top * 1.25).max(10.0)
}

pub fn bar_label(pct: f64, minutes: f64) -> (String, String) {
    (format!("{:.1}%", pct), format!("({:.0} min)", minutes))
}

fn column_label(labels: &[String], value: f64) -> String {
    let idx = value.round();
    if (value - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

fn draw_bar_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    title: &str,
    results: &[ColumnResult],
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = root;
    area.fill(&WHITE)?;

    let labels: Vec<String> = results.iter().map(|r| r.column_id.clone()).collect();
    let n = results.len();
    let y_max = y_axis_max(results);

    let title_font = FontDesc::new(FontFamily::SansSerif, 26.0, FontStyle::Normal);
    let mut chart = ChartBuilder::on(&area)
        .caption(title, title_font)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), 0.0..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .light_line_style(&TRANSPARENT)
        .x_labels(n + 1)
        .x_label_formatter(&|v: &f64| column_label(&labels, *v))
        .y_desc("% of time")
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    chart
        .draw_series(results.iter().enumerate().map(|(i, r)| {
            let x = i as f64;
            Rectangle::new(
                [(x - BAR_WIDTH, 0.0), (x - 0.01, r.downtime_pct)],
                DOWNTIME_COLOR.filled(),
            )
        }))?
        .label("Downtime")
        .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], DOWNTIME_COLOR.filled()));

    chart
        .draw_series(results.iter().enumerate().map(|(i, r)| {
            let x = i as f64;
            Rectangle::new(
                [(x + 0.01, 0.0), (x + BAR_WIDTH, r.uptime_pct)],
                UPTIME_COLOR.filled(),
            )
        }))?
        .label("Uptime")
        .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], UPTIME_COLOR.filled()));

    let label_style = TextStyle::from(FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal))
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    let line_gap = y_max * 0.035;
    let mut annotations = Vec::with_capacity(n * 4);
    for (i, r) in results.iter().enumerate() {
        let x = i as f64;
        for (center, pct, minutes) in [
            (x - BAR_WIDTH / 2.0, r.downtime_pct, r.downtime_minutes),
            (x + BAR_WIDTH / 2.0, r.uptime_pct, r.uptime_minutes),
        ] {
            let (pct_text, min_text) = bar_label(pct, minutes);
            annotations.push(Text::new(
                min_text,
                (center, pct + y_max * 0.01),
                label_style.clone(),
            ));
            annotations.push(Text::new(
                pct_text,
                (center, pct + y_max * 0.01 + line_gap),
                label_style.clone(),
            ));
        }
    }
    chart.draw_series(annotations)?;

    let legend_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    area.present()?;
    Ok(())
}

/// Backend wrapper that survives font lookup panics by dropping the text.
struct FontSafeBackend<DB> {
    inner: DB,
}

impl<DB> FontSafeBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for FontSafeBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(result) => result,
            Err(_) => {
                debug!("font backend unavailable, skipping label {:?}", text);
                Ok(())
            }
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(result) => result,
            Err(_) => {
                let size = style.size().max(1.0);
                let width = (text.chars().count() as f64 * size * 0.6).ceil() as u32;
                Ok((width, size.ceil() as u32))
            }
        }
    }
}
