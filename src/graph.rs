#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use plotters::prelude::*;
use std::str::FromStr;
use thiserror::Error;

use crate::equipment::EquipmentRecord;
use crate::summary::SummaryStatistics;

/// Number of bins used by the flowrate histogram
pub const HISTOGRAM_BINS: usize = 8;

/// Number of records shown in the parameter comparison chart
pub const COMPARISON_LIMIT: usize = 8;

/// Charts the server can render for a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// Bar chart of the equipment type distribution
    Types,

    /// Histogram of flowrate values
    Flowrate,

    /// Flowrate and pressure side by side for the first few records
    Parameters,
}

impl FromStr for ChartKind {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "types" | "distribution" => Ok(ChartKind::Types),
            "flowrate" | "histogram" => Ok(ChartKind::Flowrate),
            "parameters" | "comparison" => Ok(ChartKind::Parameters),
            _ => Err(ChartError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ChartError {
    #[error("Unknown chart type: {0}")]
    UnknownKind(String),

    #[error("Cannot draw a chart for a session with no equipment records")]
    NoData,

    #[error("Chart rendering failed: {0}")]
    Draw(String),
}

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// One histogram bin covering `[start, end)` (the last bin also includes `end`)
#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

impl Bin {
    fn label(&self) -> String {
        format!("{:.0}-{:.0}", self.start, self.end)
    }
}

/// Split values into `bins` equal-width bins spanning their range
///
/// When every value is equal there is nothing to spread over, so a single
/// bin holds them all.
///
/// # Examples
/// ```
/// use equipviz::graph::histogram_bins;
///
/// let bins = histogram_bins(&[1.0, 2.0, 3.0, 4.0], 2);
/// assert_eq!(bins.iter().map(|b| b.count).collect::<Vec<_>>(), vec![2, 2]);
/// ```
pub fn histogram_bins(values: &[f64], bins: usize) -> Vec<Bin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![Bin {
            start: min,
            end: max,
            count: finite.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut result: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            start: min + width * i as f64,
            end: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for value in finite {
        let index = (((value - min) / width) as usize).min(bins - 1);
        result[index].count += 1;
    }
    result
}

/// Render a chart as PNG bytes
///
/// # Arguments
/// * `kind` - Which chart to draw
/// * `records` - Records of the session, in file order
/// * `summary` - Summary statistics of the same records
/// * `options` - Image size
///
/// # Returns
/// * `Result<Vec<u8>, ChartError>` - PNG data, or `NoData` for an empty session
pub fn render_chart(
    kind: ChartKind,
    records: &[EquipmentRecord],
    summary: &SummaryStatistics,
    options: &ChartOptions,
) -> Result<Vec<u8>, ChartError> {
    if records.is_empty() {
        return Err(ChartError::NoData);
    }

    let mut pixels = vec![0u8; options.width as usize * options.height as usize * 3];
    let drawn = match kind {
        ChartKind::Types => {
            let labels: Vec<String> = summary.type_distribution.keys().cloned().collect();
            let counts: Vec<usize> = summary.type_distribution.values().copied().collect();
            draw_category_bars(
                &mut pixels,
                options,
                "Equipment Type Distribution",
                "Type",
                &labels,
                &counts,
            )
        }
        ChartKind::Flowrate => {
            let flowrates: Vec<f64> = records.iter().map(|r| r.flowrate).collect();
            let bins = histogram_bins(&flowrates, HISTOGRAM_BINS);
            let labels: Vec<String> = bins.iter().map(Bin::label).collect();
            let counts: Vec<usize> = bins.iter().map(|b| b.count).collect();
            draw_category_bars(
                &mut pixels,
                options,
                "Flowrate Distribution",
                "Flowrate",
                &labels,
                &counts,
            )
        }
        ChartKind::Parameters => draw_parameter_bars(
            &mut pixels,
            options,
            &records[..records.len().min(COMPARISON_LIMIT)],
        ),
    };
    drawn.map_err(|e| ChartError::Draw(e.to_string()))?;

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&pixels, options.width, options.height, ColorType::Rgb8)
        .map_err(|e| ChartError::Draw(e.to_string()))?;
    Ok(png)
}

/// Draws one bar per category with its count
fn draw_category_bars(
    pixels: &mut [u8],
    options: &ChartOptions,
    title: &str,
    x_label: &str,
    labels: &[String],
    counts: &[usize],
) -> Result<(), Box<dyn std::error::Error>> {
    let root =
        BitMapBackend::with_buffer(pixels, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_count = counts.iter().copied().max().unwrap_or(0);

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0..labels.len()).into_segmented(), 0..max_count + 1)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_label)
        .y_desc("Count")
        .x_label_formatter(&|value| match value {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                labels.get(*i).cloned().unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        })
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(RGBColor(124, 58, 237).filled())
            .margin(10)
            .data(counts.iter().enumerate().map(|(i, count)| (i, *count))),
    )?;

    root.present()?;
    Ok(())
}

/// Draws grouped flowrate and pressure bars for each record
fn draw_parameter_bars(
    pixels: &mut [u8],
    options: &ChartOptions,
    records: &[EquipmentRecord],
) -> Result<(), Box<dyn std::error::Error>> {
    let root =
        BitMapBackend::with_buffer(pixels, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_value = records
        .iter()
        .flat_map(|r| [r.flowrate, r.pressure])
        .fold(0.0_f64, f64::max);
    let min_value = records
        .iter()
        .flat_map(|r| [r.flowrate, r.pressure])
        .fold(0.0_f64, f64::min);

    let flow_color = RGBColor(124, 58, 237);
    let pressure_color = RGBColor(6, 182, 212);

    let mut chart = ChartBuilder::on(&root)
        .caption("Flowrate vs Pressure", ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..records.len() as f64, min_value..max_value * 1.1 + 1.0)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(records.len() * 2 + 1)
        .x_label_formatter(&|x| {
            let index = x.floor() as usize;
            if (x - x.floor() - 0.5).abs() < 0.26 {
                records
                    .get(index)
                    .map(|r| r.name.chars().take(10).collect())
                    .unwrap_or_default()
            } else {
                String::new()
            }
        })
        .y_desc("Value")
        .draw()?;

    chart
        .draw_series(records.iter().enumerate().map(|(i, r)| {
            let x = i as f64;
            Rectangle::new([(x + 0.1, 0.0), (x + 0.5, r.flowrate)], flow_color.filled())
        }))?
        .label("Flowrate")
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], flow_color.filled()));

    chart
        .draw_series(records.iter().enumerate().map(|(i, r)| {
            let x = i as f64;
            Rectangle::new([(x + 0.5, 0.0), (x + 0.9, r.pressure)], pressure_color.filled())
        }))?
        .label("Pressure")
        .legend(move |(x, y)| {
            Rectangle::new([(x, y - 5), (x + 10, y + 5)], pressure_color.filled())
        });

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
