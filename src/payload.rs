//! Patient metadata, the source image, and the conversion request built
//! from a completed annotation session.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ValidationError};
use crate::leads::LEAD_COUNT;
use crate::mapper::{ImageSize, LeadBoundary};
use crate::session::AnnotationSession;

/// Lowest accepted pixels-per-millivolt.
pub const MIN_SCALE_FACTOR: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientMetadata {
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_sex: Option<Sex>,
    pub recording_date: NaiveDate,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub note: String,
}

impl Default for PatientMetadata {
    fn default() -> Self {
        Self {
            patient_name: String::new(),
            patient_age: None,
            patient_sex: None,
            recording_date: chrono::Local::now().date_naive(),
            source_file: String::new(),
            note: String::new(),
        }
    }
}

/// The scanned ECG as loaded from disk. The encoded bytes are shared, not
/// copied, between the canvas, payloads and report export.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceImage {
    file_name: String,
    bytes: Arc<[u8]>,
    size: ImageSize,
}

impl SourceImage {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>, size: ImageSize) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            size,
        }
    }

    /// Read and decode an image file. The decoded bitmap is only used for
    /// display; the original bytes travel to the conversion service.
    pub fn load(path: &Path) -> Result<(Self, DynamicImage), Error> {
        let bytes = std::fs::read(path)?;
        let decoded = image::load_from_memory(&bytes)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let size = ImageSize::new(decoded.width(), decoded.height());
        tracing::info!(file = %file_name, width = size.width, height = size.height, "Image loaded");
        Ok((Self::new(file_name, bytes, size), decoded))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn mime_type(&self) -> &'static str {
        let ext = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

/// Everything the conversion service needs for one attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionPayload {
    metadata: PatientMetadata,
    image: SourceImage,
    lead_boundaries: Vec<LeadBoundary>,
    scale_factor: f64,
}

/// JSON half of the multipart conversion request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest<'a> {
    pub metadata: &'a PatientMetadata,
    pub lead_boxes: Vec<[u32; 4]>,
    pub pixels_per_mv: f64,
}

impl ConversionPayload {
    pub fn metadata(&self) -> &PatientMetadata {
        &self.metadata
    }

    pub fn image(&self) -> &SourceImage {
        &self.image
    }

    pub fn lead_boundaries(&self) -> &[LeadBoundary] {
        &self.lead_boundaries
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn request_body(&self) -> ConversionRequest<'_> {
        ConversionRequest {
            metadata: &self.metadata,
            lead_boxes: self.lead_boundaries.iter().map(LeadBoundary::lead_box).collect(),
            pixels_per_mv: self.scale_factor,
        }
    }
}

pub fn validate_scale_factor(scale_factor: f64) -> Result<f64, ValidationError> {
    if scale_factor.is_finite() && scale_factor >= MIN_SCALE_FACTOR {
        Ok(scale_factor)
    } else {
        Err(ValidationError::ScaleFactorTooSmall {
            got: scale_factor,
            min: MIN_SCALE_FACTOR,
        })
    }
}

/// Build the conversion request for a completed session.
///
/// Boundaries are sorted by canonical lead index here rather than trusted
/// to already be in capture order.
pub fn assemble(
    session: &AnnotationSession,
    metadata: &PatientMetadata,
    image: &SourceImage,
    scale_factor: f64,
) -> Result<ConversionPayload, ValidationError> {
    if !session.is_complete() {
        return Err(ValidationError::IncompleteBoundaries {
            captured: session.boundaries().len(),
        });
    }
    if metadata.patient_name.trim().is_empty() {
        return Err(ValidationError::MissingPatientName);
    }
    let scale_factor = validate_scale_factor(scale_factor)?;
    if image.size() != session.image_size() {
        let (expected, actual) = (session.image_size(), image.size());
        return Err(ValidationError::ImageMismatch {
            expected: (expected.width, expected.height),
            actual: (actual.width, actual.height),
        });
    }

    Ok(ConversionPayload {
        metadata: metadata.clone(),
        image: image.clone(),
        lead_boundaries: canonical_boundaries(session.boundaries()),
        scale_factor,
    })
}

fn canonical_boundaries(boundaries: &[LeadBoundary]) -> Vec<LeadBoundary> {
    let mut sorted = boundaries.to_vec();
    sorted.sort_by_key(|b| b.lead_name.canonical_index());
    debug_assert_eq!(sorted.len(), LEAD_COUNT);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::{LeadName, CANONICAL_LEAD_ORDER};
    use crate::mapper::{DisplayRect, PixelBox, ScaleRatio};
    use assert_matches::assert_matches;

    const SIZE: ImageSize = ImageSize {
        width: 1000,
        height: 800,
    };

    fn image() -> SourceImage {
        SourceImage::new("scan.png", vec![1u8, 2, 3], SIZE)
    }

    fn metadata() -> PatientMetadata {
        PatientMetadata {
            patient_name: "Ada Example".into(),
            patient_age: Some(54),
            patient_sex: Some(Sex::Female),
            recording_date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            source_file: "scan.png".into(),
            note: String::new(),
        }
    }

    fn session_with(n: usize) -> AnnotationSession {
        let mut session = AnnotationSession::new(SIZE);
        for i in 0..n {
            let x = (i % 4) as f64 * 200.0 + 10.0;
            let y = (i / 4) as f64 * 200.0 + 10.0;
            session
                .capture_region(DisplayRect::new(x, y, 150.0, 120.0), ScaleRatio::uniform(1.0))
                .unwrap();
        }
        session
    }

    #[test]
    fn complete_session_assembles() {
        let session = session_with(12);
        let payload = assemble(&session, &metadata(), &image(), 10.0).unwrap();
        assert_eq!(payload.lead_boundaries(), session.boundaries());
        assert_eq!(payload.scale_factor(), 10.0);
        assert_eq!(payload.image().file_name(), "scan.png");
    }

    #[test]
    fn incomplete_session_is_rejected() {
        for n in [0, 1, 11] {
            let err = assemble(&session_with(n), &metadata(), &image(), 10.0).unwrap_err();
            assert_eq!(err, ValidationError::IncompleteBoundaries { captured: n });
        }
    }

    #[test]
    fn missing_name_is_rejected() {
        let mut meta = metadata();
        meta.patient_name = "   ".into();
        let err = assemble(&session_with(12), &meta, &image(), 10.0).unwrap_err();
        assert_eq!(err, ValidationError::MissingPatientName);

        // Incomplete wins regardless of the rest.
        let err = assemble(&session_with(3), &meta, &image(), 1.0).unwrap_err();
        assert_matches!(err, ValidationError::IncompleteBoundaries { .. });
    }

    #[test]
    fn minimum_scale_factor() {
        let session = session_with(12);
        let err = assemble(&session, &metadata(), &image(), 4.0).unwrap_err();
        assert_matches!(err, ValidationError::ScaleFactorTooSmall { .. });
        assert!(assemble(&session, &metadata(), &image(), 5.0).is_ok());
        assert!(validate_scale_factor(f64::NAN).is_err());
    }

    #[test]
    fn mismatched_image_is_rejected() {
        let other = SourceImage::new("other.png", vec![0u8], ImageSize::new(10, 10));
        let err = assemble(&session_with(12), &metadata(), &other, 10.0).unwrap_err();
        assert_matches!(err, ValidationError::ImageMismatch { .. });
    }

    #[test]
    fn assembly_is_pure() {
        let session = session_with(12);
        let before = session.clone();
        let meta = metadata();
        let a = assemble(&session, &meta, &image(), 12.5).unwrap();
        let b = assemble(&session, &meta, &image(), 12.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(session, before);
        assert_eq!(meta, metadata());
    }

    #[test]
    fn lead_boxes_serialize_in_canonical_order() {
        let session = session_with(12);
        let payload = assemble(&session, &metadata(), &image(), 10.0).unwrap();
        let body = serde_json::to_value(payload.request_body()).unwrap();

        let expected: Vec<[u32; 4]> = session
            .boundaries()
            .iter()
            .map(|b| [b.y1, b.y2, b.x1, b.x2])
            .collect();
        assert_eq!(body["leadBoxes"], serde_json::json!(expected));
        assert_eq!(body["leadBoxes"][0], serde_json::json!([10, 130, 10, 160]));
        assert_eq!(body["pixelsPerMv"], serde_json::json!(10.0));
        assert_eq!(body["metadata"]["patientName"], "Ada Example");
        assert_eq!(body["metadata"]["patientSex"], "female");
        assert_eq!(body["metadata"]["recordingDate"], "2024-03-09");
    }

    #[test]
    fn out_of_order_boundaries_are_sorted() {
        let mut shuffled: Vec<LeadBoundary> = CANONICAL_LEAD_ORDER
            .iter()
            .enumerate()
            .map(|(i, &lead)| {
                let x = i as u32 * 10;
                LeadBoundary::new(
                    lead,
                    PixelBox {
                        x1: x,
                        y1: 0,
                        x2: x + 5,
                        y2: 5,
                    },
                )
            })
            .collect();
        shuffled.reverse();
        shuffled.swap(0, 5);

        let sorted = canonical_boundaries(&shuffled);
        let names: Vec<LeadName> = sorted.iter().map(|b| b.lead_name).collect();
        assert_eq!(names, CANONICAL_LEAD_ORDER.to_vec());
        assert_eq!(sorted[3].x1, 30);
    }

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(image().mime_type(), "image/png");
        let jpg = SourceImage::new("ECG.JPG", vec![0u8], SIZE);
        assert_eq!(jpg.mime_type(), "image/jpeg");
    }
}
