//! Export of a finished analysis: a JSON summary next to a copy of the scan
//! with the twelve lead boxes outlined.

use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgba, RgbaImage};
use serde::Serialize;

use crate::error::Error;
use crate::mapper::LeadBoundary;
use crate::payload::PatientMetadata;
use crate::service::{AnalysisResult, ConvertedRecord};

const BOX_COLOR: [u8; 4] = [220, 30, 30, 255];
const BOX_HALF_WIDTH: i64 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    record_id: &'a str,
    metadata: &'a PatientMetadata,
    analysis_result: &'a AnalysisResult,
    source_file: &'a str,
    lead_boundaries: &'a [LeadBoundary],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub summary: PathBuf,
    pub annotated: PathBuf,
}

/// Write `<stem>_report.json` and `<stem>_leads.png` into `dir`.
pub fn export_report(
    dir: &Path,
    source_file: &str,
    source: &DynamicImage,
    boundaries: &[LeadBoundary],
    record: &ConvertedRecord,
    analysis: &AnalysisResult,
) -> Result<ReportPaths, Error> {
    let stem = Path::new(source_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ecg");
    let paths = ReportPaths {
        summary: dir.join(format!("{stem}_report.json")),
        annotated: dir.join(format!("{stem}_leads.png")),
    };

    let record = record.record();
    let report = Report {
        record_id: &record.record_id,
        metadata: &record.metadata,
        analysis_result: analysis,
        source_file,
        lead_boundaries: boundaries,
    };
    std::fs::write(&paths.summary, serde_json::to_string_pretty(&report)?)?;

    let mut img = source.to_rgba8();
    for boundary in boundaries {
        draw_box_on_image(&mut img, boundary);
    }
    img.save(&paths.annotated)?;

    tracing::info!(
        summary = %paths.summary.display(),
        annotated = %paths.annotated.display(),
        "Report exported"
    );
    Ok(paths)
}

/// Outline `boundary` with a band `BOX_HALF_WIDTH` pixels either side of
/// each edge, clipped to the image.
fn draw_box_on_image(img: &mut RgbaImage, boundary: &LeadBoundary) {
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    let (x1, y1) = (i64::from(boundary.x1), i64::from(boundary.y1));
    let (x2, y2) = (i64::from(boundary.x2), i64::from(boundary.y2));
    let t = BOX_HALF_WIDTH;

    let mut fill = |left: i64, top: i64, right: i64, bottom: i64| {
        for y in top.max(0)..=bottom.min(h - 1) {
            for x in left.max(0)..=right.min(w - 1) {
                img.put_pixel(x as u32, y as u32, Rgba(BOX_COLOR));
            }
        }
    };
    fill(x1 - t, y1 - t, x2 + t, y1 + t);
    fill(x1 - t, y2 - t, x2 + t, y2 + t);
    fill(x1 - t, y1 - t, x1 + t, y2 + t);
    fill(x2 - t, y1 - t, x2 + t, y2 + t);
}
