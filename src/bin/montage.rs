use clap::{Parser, ValueEnum};
use plotters::prelude::*;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use plot_montage::{CellCanvas, MontageConfig, OutputFormat, Pager, SurfaceLifecycle};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Png,
    Jpeg,
    Bmp,
    Tiff,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Bmp => OutputFormat::Bmp,
            FormatArg::Tiff => OutputFormat::Tiff,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "montage",
    about = "Render synthetic line charts into paginated montages and slice them into crops",
    version
)]
struct Cli {
    /// JSON file with a montage config; flags below override it
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Number of charts to render
    #[arg(short = 'n', long = "count", default_value_t = 128)]
    count: usize,

    /// Charts per montage
    #[arg(short = 'p', long = "page-size")]
    page_size: Option<usize>,

    /// Columns per montage (default: sqrt of page size clipped to 5..=20)
    #[arg(long = "cols")]
    cols: Option<usize>,

    /// Montage filename prefix
    #[arg(long = "prefix")]
    prefix: Option<String>,

    #[arg(long = "format", value_enum)]
    format: Option<FormatArg>,

    /// Cell width in inches
    #[arg(long = "cell-width")]
    cell_width: Option<f64>,

    /// Cell height in inches
    #[arg(long = "cell-height")]
    cell_height: Option<f64>,

    #[arg(long = "dpi")]
    dpi: Option<u32>,

    /// Key out the background and tighten crops by alpha
    #[arg(long = "transparent")]
    transparent: bool,

    /// Reuse one surface across pages instead of recreating it
    #[arg(long = "reset")]
    reset: bool,
}

impl Cli {
    fn into_config(self) -> Result<(MontageConfig, usize), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str::<MontageConfig>(&fs::read_to_string(path)?)?,
            None => MontageConfig::default(),
        };
        if let Some(out) = self.out {
            config.path = out;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if self.cols.is_some() {
            config.cols = self.cols;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(format) = self.format {
            config.format = format.into();
        }
        if let Some(w) = self.cell_width {
            config.cell_size.0 = w;
        }
        if let Some(h) = self.cell_height {
            config.cell_size.1 = h;
        }
        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if self.transparent {
            config.transparent = true;
        }
        if self.reset {
            config.lifecycle = SurfaceLifecycle::Reset;
        }
        Ok((config, self.count))
    }
}

/// Draws a bordered sine-like series; the phase and frequency vary with `seed`.
fn draw_chart(cell: &mut CellCanvas<'_>, seed: usize) -> Result<(), String> {
    let (w, h) = cell.size();
    let root = cell.drawing_area();

    let margin = (w.min(h) / 12).max(2);
    let frame = [
        (margin as i32, margin as i32),
        (w.saturating_sub(margin) as i32, h.saturating_sub(margin) as i32),
    ];
    root.draw(&Rectangle::new(frame, BLACK.stroke_width(1)))
        .map_err(|e| e.to_string())?;

    let mut chart = ChartBuilder::on(&root)
        .margin(margin * 2)
        .build_cartesian_2d(0f64..10f64, -1.2f64..1.2f64)
        .map_err(|e| e.to_string())?;

    let phase = seed as f64 * 0.37;
    let freq = 0.5 + (seed % 7) as f64 * 0.15;
    let color = Palette99::pick(seed);
    chart
        .draw_series(LineSeries::new(
            (0..=100).map(|i| {
                let x = i as f64 / 10.0;
                (x, (x * freq + phase).sin())
            }),
            color.stroke_width(2),
        ))
        .map_err(|e| e.to_string())?;

    root.present().map_err(|e| e.to_string())?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (config, count) = Cli::parse().into_config()?;
    let out = config.path.clone();
    let mut pager: Pager = Pager::new(config)?;

    for i in 0..count {
        let title = format!("chart-{i:04}");
        pager.add(&title, |cell| draw_chart(cell, i))??;
    }
    pager.close()?;
    let pages = pager.page_index();

    tracing::info!(
        charts = count,
        pages,
        out = %out.display(),
        "montages written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plot_montage::MontageSheet;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "montage",
            "--count",
            "7",
            "--page-size",
            "12",
            "--format",
            "jpeg",
            "--cell-width",
            "0.8",
            "--reset",
        ]);
        let (config, count) = cli.into_config().expect("config");
        assert_eq!(count, 7);
        assert_eq!(config.page_size, 12);
        assert_eq!(config.format, OutputFormat::Jpeg);
        assert_eq!(config.cell_size, (0.8, 4.8));
        assert_eq!(config.lifecycle, SurfaceLifecycle::Reset);
        assert!(!config.transparent);
    }

    #[test]
    fn chart_draws_onto_background() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = MontageConfig {
            page_size: 1,
            cell_size: (0.8, 0.6),
            ..Default::default()
        };
        let mut sheet: MontageSheet = MontageSheet::new(&config).expect("sheet");
        sheet
            .add(|cell| draw_chart(cell, 3))
            .expect("slot")
            .expect("draw");
        let bitmap = sheet.save(dir.path().join("chart.png")).expect("save");

        assert_eq!(bitmap.dimensions(), (80, 60));
        assert!(bitmap.pixels().any(|p| p.0 != [255, 255, 255, 255]));
    }
}
