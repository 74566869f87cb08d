#![cfg(feature = "web")]
//! PDF report generation for an upload session.
//!
//! Rendering happens in two steps: [`layout_report`] turns a session into
//! pages of styled text lines (pure and deterministic, so it is easy to
//! test), and [`render_pdf`] draws those lines with printpdf's built-in
//! fonts. Tables use Courier so that padded columns line up.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use std::io::BufWriter;
use thiserror::Error;

use crate::equipment::{EquipmentRecord, UploadSession};
use crate::summary::{SummaryStatistics, summarize};

pub const REPORT_TITLE: &str = "Chemical Equipment Parameter Report";

// A4 portrait, millimetres
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;

// Fixed-width table columns
const NAME_WIDTH: usize = 24;
const TYPE_WIDTH: usize = 16;
const NUMBER_WIDTH: usize = 12;

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("Cannot generate a report for a session with no equipment records")]
    EmptySession,

    #[error("PDF generation failed: {0}")]
    Pdf(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Body,
    TableHeader,
    TableRow,
    Spacer,
}

impl LineStyle {
    fn font_size(self) -> f32 {
        match self {
            LineStyle::Title => 18.0,
            LineStyle::Heading => 14.0,
            LineStyle::Body => 11.0,
            LineStyle::TableHeader | LineStyle::TableRow => 9.0,
            LineStyle::Spacer => 0.0,
        }
    }

    /// Vertical space the line occupies, in millimetres
    fn height(self) -> f32 {
        match self {
            LineStyle::Title => 12.0,
            LineStyle::Heading => 10.0,
            LineStyle::Body => 6.0,
            LineStyle::TableHeader | LineStyle::TableRow => 4.5,
            LineStyle::Spacer => 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportLine {
    pub style: LineStyle,
    pub text: String,
}

impl ReportLine {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        ReportLine {
            style,
            text: text.into(),
        }
    }

    fn spacer() -> Self {
        ReportLine::new(LineStyle::Spacer, "")
    }
}

/// Report content split into pages
#[derive(Clone, Debug, PartialEq)]
pub struct ReportLayout {
    pub pages: Vec<Vec<ReportLine>>,
}

impl ReportLayout {
    pub fn lines(&self) -> impl Iterator<Item = &ReportLine> {
        self.pages.iter().flatten()
    }
}

/// Lay out the report for a session
///
/// # Arguments
/// * `session` - Session metadata, or `None` to label the report "latest"
/// * `records` - Every record of the session, in the order to print them
/// * `generated_at` - Timestamp printed on the "Generated at" line
///
/// # Returns
/// * `Result<ReportLayout, RenderError>` - `EmptySession` when `records` is empty
pub fn layout_report(
    session: Option<&UploadSession>,
    records: &[EquipmentRecord],
    generated_at: DateTime<Utc>,
) -> Result<ReportLayout, RenderError> {
    if records.is_empty() {
        return Err(RenderError::EmptySession);
    }
    let summary = summarize(records);

    let mut lines = vec![
        ReportLine::new(LineStyle::Title, REPORT_TITLE),
        ReportLine::new(
            LineStyle::Body,
            format!("File: {}", session.map_or("latest", |s| s.filename.as_str())),
        ),
    ];
    if let Some(session) = session {
        lines.push(ReportLine::new(
            LineStyle::Body,
            format!("Uploaded: {}", session.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ));
    }
    lines.push(ReportLine::new(
        LineStyle::Body,
        format!("Generated at: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
    ));
    lines.push(ReportLine::new(
        LineStyle::Body,
        format!("Total Records: {}", summary.total_count),
    ));
    lines.push(ReportLine::spacer());

    lines.extend(summary_table(&summary));
    lines.push(ReportLine::spacer());
    lines.extend(distribution_table(&summary));
    lines.push(ReportLine::spacer());

    lines.push(ReportLine::new(LineStyle::Heading, "Equipment Data"));
    let equipment_header = equipment_row(["Name", "Type", "Flowrate", "Pressure", "Temperature"]);
    lines.push(ReportLine::new(LineStyle::TableHeader, equipment_header.clone()));
    lines.extend(records.iter().map(|record| {
        ReportLine::new(
            LineStyle::TableRow,
            equipment_row([
                record.name.as_str(),
                record.equipment_type.as_str(),
                &format_value(record.flowrate),
                &format_value(record.pressure),
                &format_value(record.temperature),
            ]),
        )
    }));

    Ok(paginate(lines, &equipment_header))
}

fn summary_table(summary: &SummaryStatistics) -> Vec<ReportLine> {
    let row = |label: &str, flow: f64, pressure: f64, temperature: f64| {
        ReportLine::new(
            LineStyle::TableRow,
            format!(
                "{:<10}{:>w$}{:>w$}{:>w$}",
                label,
                format_value(flow),
                format_value(pressure),
                format_value(temperature),
                w = NUMBER_WIDTH
            ),
        )
    };

    vec![
        ReportLine::new(LineStyle::Heading, "Summary Statistics"),
        ReportLine::new(
            LineStyle::TableHeader,
            format!(
                "{:<10}{:>w$}{:>w$}{:>w$}",
                "Metric",
                "Flowrate",
                "Pressure",
                "Temperature",
                w = NUMBER_WIDTH
            ),
        ),
        row(
            "Average",
            summary.avg_flowrate,
            summary.avg_pressure,
            summary.avg_temperature,
        ),
        row(
            "Minimum",
            summary.min_flowrate,
            summary.min_pressure,
            summary.min_temperature,
        ),
        row(
            "Maximum",
            summary.max_flowrate,
            summary.max_pressure,
            summary.max_temperature,
        ),
    ]
}

fn distribution_table(summary: &SummaryStatistics) -> Vec<ReportLine> {
    let mut lines = vec![
        ReportLine::new(LineStyle::Heading, "Equipment Type Distribution"),
        ReportLine::new(
            LineStyle::TableHeader,
            format!("{:<w$}{:>8}", "Type", "Count", w = NAME_WIDTH),
        ),
    ];
    // BTreeMap iteration is already sorted by type name
    lines.extend(summary.type_distribution.iter().map(|(kind, count)| {
        ReportLine::new(
            LineStyle::TableRow,
            format!("{:<w$}{:>8}", fit(kind, NAME_WIDTH), count, w = NAME_WIDTH),
        )
    }));
    lines
}

fn equipment_row(cells: [&str; 5]) -> String {
    let [name, kind, flow, pressure, temperature] = cells;
    format!(
        "{:<nw$}{:<tw$}{:>w$}{:>w$}{:>w$}",
        fit(name, NAME_WIDTH),
        fit(kind, TYPE_WIDTH),
        flow,
        pressure,
        temperature,
        nw = NAME_WIDTH,
        tw = TYPE_WIDTH,
        w = NUMBER_WIDTH
    )
}

// Truncate to fit a column, leaving one space of padding
fn fit(text: &str, width: usize) -> String {
    let max = width.saturating_sub(1);
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(max.saturating_sub(3)).collect();
        short.push_str("...");
        short
    }
}

fn format_value(value: f64) -> String {
    format!("{value:.2}")
}

// Break lines into pages; the equipment table header is repeated at the
// top of every continuation page.
fn paginate(lines: Vec<ReportLine>, table_header: &str) -> ReportLayout {
    let usable = PAGE_HEIGHT - 2.0 * MARGIN;
    let mut pages = Vec::new();
    let mut current: Vec<ReportLine> = Vec::new();
    let mut used = 0.0;

    for line in lines {
        let height = line.style.height();
        if used + height > usable && !current.is_empty() {
            let continues_table = line.style == LineStyle::TableRow
                && current
                    .iter()
                    .rev()
                    .find(|l| l.style == LineStyle::TableHeader)
                    .is_some_and(|l| l.text == table_header);
            pages.push(std::mem::take(&mut current));
            used = 0.0;
            if continues_table {
                let header = ReportLine::new(LineStyle::TableHeader, table_header);
                used += header.style.height();
                current.push(header);
            }
        }
        used += height;
        current.push(line);
    }
    if !current.is_empty() {
        pages.push(current);
    }

    ReportLayout { pages }
}

struct ReportFonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    mono: IndirectFontRef,
    mono_bold: IndirectFontRef,
}

impl ReportFonts {
    fn for_style(&self, style: LineStyle) -> &IndirectFontRef {
        match style {
            LineStyle::Title | LineStyle::Heading => &self.bold,
            LineStyle::Body | LineStyle::Spacer => &self.regular,
            LineStyle::TableHeader => &self.mono_bold,
            LineStyle::TableRow => &self.mono,
        }
    }
}

/// Draw a laid-out report into PDF bytes
pub fn render_pdf(layout: &ReportLayout) -> Result<Vec<u8>, RenderError> {
    let pdf_error = |e: printpdf::Error| RenderError::Pdf(e.to_string());

    let (doc, first_page, first_layer) =
        PdfDocument::new(REPORT_TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let fonts = ReportFonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
        mono: doc.add_builtin_font(BuiltinFont::Courier).map_err(pdf_error)?,
        mono_bold: doc.add_builtin_font(BuiltinFont::CourierBold).map_err(pdf_error)?,
    };

    for (index, lines) in layout.pages.iter().enumerate() {
        let (page, layer) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(
                Mm(PAGE_WIDTH),
                Mm(PAGE_HEIGHT),
                format!("Layer {}", index + 1),
            )
        };
        let canvas = doc.get_page(page).get_layer(layer);

        let mut y = PAGE_HEIGHT - MARGIN;
        for line in lines {
            y -= line.style.height();
            if line.style == LineStyle::Spacer {
                continue;
            }
            canvas.use_text(
                line.text.clone(),
                line.style.font_size(),
                Mm(MARGIN),
                Mm(y),
                fonts.for_style(line.style),
            );
        }
    }

    let mut writer = BufWriter::new(Vec::new());
    doc.save(&mut writer).map_err(pdf_error)?;
    writer
        .into_inner()
        .map_err(|e| RenderError::Pdf(e.into_error().to_string()))
}

/// Lay out and render a session report in one call
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use equipviz::report::{render, RenderError};
///
/// assert_eq!(render(None, &[], Utc::now()), Err(RenderError::EmptySession));
/// ```
pub fn render(
    session: Option<&UploadSession>,
    records: &[EquipmentRecord],
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, RenderError> {
    let layout = layout_report(session, records, generated_at)?;
    render_pdf(&layout)
}
