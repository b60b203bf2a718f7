//! 3D scatter plots of a color set in RGB space.
//!
//! Each dominant color is drawn as a disc in its own color at its (R, G, B)
//! position; the disc area grows with the color's share.

use std::path::Path;
use std::sync::OnceLock;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};

use crate::config::PlotConfig;
use crate::error::{ExtractError, Result};
use crate::extract::{DominantColor, DominantColorSet};

const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const AXIS_LABELS: [(&str, (f64, f64, f64)); 3] = [
    ("Red", (255.0, 0.0, 0.0)),
    ("Green", (0.0, 255.0, 0.0)),
    ("Blue", (0.0, 0.0, 255.0)),
];

/// Write the plot to `path`; `svg` goes through the SVG backend, `png`,
/// `jpg`, `jpeg` and `bmp` through the bitmap one.
pub fn render_to_file(set: &DominantColorSet, config: &PlotConfig, path: &Path) -> Result<()> {
    config.validate()?;
    ensure_font()?;

    let size = (config.width, config.height);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("svg") => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_chart(&root, set, config).map_err(render_error)
        }
        Some("png" | "jpg" | "jpeg" | "bmp") => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_chart(&root, set, config).map_err(render_error)
        }
        _ => Err(ExtractError::invalid(format!(
            "cannot infer a plot format from {}",
            path.display()
        ))),
    }
}

/// Render into a packed RGB8 buffer of `width * height * 3` bytes.
pub fn render_to_rgb_buffer(set: &DominantColorSet, config: &PlotConfig) -> Result<Vec<u8>> {
    config.validate()?;
    ensure_font()?;

    let mut buffer = vec![0u8; config.width as usize * config.height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (config.width, config.height))
            .into_drawing_area();
        draw_chart(&root, set, config).map_err(render_error)?;
    }
    Ok(buffer)
}

pub fn render_to_svg_string(set: &DominantColorSet, config: &PlotConfig) -> Result<String> {
    config.validate()?;
    ensure_font()?;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (config.width, config.height))
            .into_drawing_area();
        draw_chart(&root, set, config).map_err(render_error)?;
    }
    Ok(svg)
}

/// Disc radius in pixels: `min_radius` for a vanishing share, `max_radius`
/// for a share of 1, so the area is roughly proportional to the share.
pub fn point_radius(share: f64, config: &PlotConfig) -> u32 {
    let span = config.max_radius.saturating_sub(config.min_radius) as f64;
    (config.min_radius as f64 + share.clamp(0.0, 1.0).sqrt() * span).round() as u32
}

fn draw_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    set: &DominantColorSet,
    config: &PlotConfig,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let caption = format!("{} ({} colors)", config.title, set.len());
    let mut chart = ChartBuilder::on(root)
        .caption(caption, (FONT_FAMILY, 28))
        .margin(20)
        .build_cartesian_3d(0.0..255.0, 0.0..255.0, 0.0..255.0)?;

    chart.with_projection(|mut pb| {
        pb.yaw = config.yaw;
        pb.pitch = config.pitch;
        pb.scale = config.scale;
        pb.into_matrix()
    });

    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.15))
        .max_light_lines(3)
        .draw()?;

    // Largest first so small discs stay visible on top.
    let mut points: Vec<&DominantColor> = set.iter().collect();
    points.sort_by(|a, b| b.share.total_cmp(&a.share));

    chart.draw_series(points.iter().map(|c| {
        let [r, g, b] = c.rgb();
        Circle::new(
            (r as f64, g as f64, b as f64),
            point_radius(c.share, config),
            RGBColor(r, g, b).filled(),
        )
    }))?;
    chart.draw_series(points.iter().map(|c| {
        let [r, g, b] = c.rgb();
        Circle::new(
            (r as f64, g as f64, b as f64),
            point_radius(c.share, config),
            BLACK.mix(0.6).stroke_width(1),
        )
    }))?;

    chart.draw_series(
        AXIS_LABELS
            .iter()
            .map(|&(label, position)| Text::new(label, position, (FONT_FAMILY, 18).into_font())),
    )?;

    root.present()?;
    Ok(())
}

fn ensure_font() -> Result<()> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let ok = *REGISTERED
        .get_or_init(|| register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES).is_ok());
    if ok {
        Ok(())
    } else {
        Err(ExtractError::Render("bundled font could not be loaded".to_string()))
    }
}

fn render_error<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> ExtractError {
    ExtractError::Render(err.to_string())
}
