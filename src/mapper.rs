//! Display-space ↔ image-space conversion for lead regions.
//!
//! The canvas shows the image scaled by a ratio `r = display / original`
//! (per axis). Rectangles the operator draws are expressed relative to the
//! displayed image's top-left corner and have to be brought back into the
//! original bitmap's pixel grid before they are sent anywhere.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::leads::LeadName;

/// Smallest edge of the initial selection box, in image pixels.
const MIN_SELECTION_EDGE: u32 = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangle in display pixels, origin at the displayed image's top-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl DisplayRect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// Display size divided by original size, per axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleRatio {
    pub x: f64,
    pub y: f64,
}

impl ScaleRatio {
    pub fn uniform(r: f64) -> Self {
        Self { x: r, y: r }
    }

    fn validate(self) -> Result<Self, ValidationError> {
        let ok = |r: f64| r.is_finite() && r > 0.0;
        if ok(self.x) && ok(self.y) {
            Ok(self)
        } else {
            Err(ValidationError::InvalidRatio {
                x: self.x,
                y: self.y,
            })
        }
    }
}

/// Integer box in image pixel space with `x2 > x1` and `y2 > y1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// A pixel box labeled with the lead it encloses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadBoundary {
    pub lead_name: LeadName,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl LeadBoundary {
    pub fn new(lead_name: LeadName, bounds: PixelBox) -> Self {
        Self {
            lead_name,
            x1: bounds.x1,
            y1: bounds.y1,
            x2: bounds.x2,
            y2: bounds.y2,
        }
    }

    pub fn bounds(&self) -> PixelBox {
        PixelBox {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
        }
    }

    /// `[y1, y2, x1, x2]`, the tuple layout the conversion service expects.
    pub fn lead_box(&self) -> [u32; 4] {
        [self.y1, self.y2, self.x1, self.x2]
    }
}

/// Map a display rectangle into the image's pixel grid.
///
/// Coordinates are rounded and clamped to the image. A box that collapses
/// to zero width or height gets its far edge pushed out by one pixel; if the
/// image edge prevents that, or the rectangle misses the image entirely,
/// the mapping fails instead of producing an empty box.
pub fn map_to_image(
    rect: DisplayRect,
    ratio: ScaleRatio,
    image: ImageSize,
) -> Result<PixelBox, ValidationError> {
    let ratio = ratio.validate()?;
    let finite = [rect.x, rect.y, rect.w, rect.h].iter().all(|v| v.is_finite());
    if !finite || rect.w <= 0.0 || rect.h <= 0.0 {
        return Err(ValidationError::DegenerateRegion);
    }

    let (x1, x2) = map_axis(rect.x, rect.w, ratio.x, image.width)?;
    let (y1, y2) = map_axis(rect.y, rect.h, ratio.y, image.height)?;
    Ok(PixelBox { x1, y1, x2, y2 })
}

fn map_axis(start: f64, len: f64, ratio: f64, limit: u32) -> Result<(u32, u32), ValidationError> {
    let limit = f64::from(limit);
    let lo = start / ratio;
    let hi = (start + len) / ratio;
    if hi <= 0.0 || lo >= limit {
        return Err(ValidationError::OutOfBounds);
    }

    let lo = lo.round().clamp(0.0, limit);
    let mut hi = hi.round().clamp(0.0, limit);
    if hi <= lo {
        if lo + 1.0 > limit {
            return Err(ValidationError::DegenerateRegion);
        }
        hi = lo + 1.0;
    }
    // Both ends are whole numbers in [0, limit] here.
    Ok((lo as u32, hi as u32))
}

/// Inverse of [`map_to_image`], used to draw captured boxes.
pub fn to_display(bounds: PixelBox, ratio: ScaleRatio) -> DisplayRect {
    DisplayRect {
        x: f64::from(bounds.x1) * ratio.x,
        y: f64::from(bounds.y1) * ratio.y,
        w: f64::from(bounds.width()) * ratio.x,
        h: f64::from(bounds.height()) * ratio.y,
    }
}

/// Box the region selector opens with: a quarter of the width and a third
/// of the height (never under 40 px), centred in the image.
pub fn initial_selection(image: ImageSize) -> PixelBox {
    let w = (image.width / 4)
        .max(MIN_SELECTION_EDGE)
        .min(image.width)
        .max(1);
    let h = (image.height / 3)
        .max(MIN_SELECTION_EDGE)
        .min(image.height)
        .max(1);
    let x1 = image.width.saturating_sub(w) / 2;
    let y1 = image.height.saturating_sub(h) / 2;
    PixelBox {
        x1,
        y1,
        x2: x1 + w,
        y2: y1 + h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const IMAGE: ImageSize = ImageSize {
        width: 800,
        height: 600,
    };

    #[test]
    fn identity_ratio_maps_edges() {
        let mapped = map_to_image(
            DisplayRect::new(10.0, 10.0, 40.0, 40.0),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap();
        assert_eq!(
            mapped,
            PixelBox {
                x1: 10,
                y1: 10,
                x2: 50,
                y2: 50
            }
        );
    }

    #[test]
    fn downscaled_display_is_scaled_up() {
        let mapped = map_to_image(
            DisplayRect::new(10.0, 20.0, 40.0, 30.0),
            ScaleRatio::uniform(0.5),
            IMAGE,
        )
        .unwrap();
        assert_eq!(
            mapped,
            PixelBox {
                x1: 20,
                y1: 40,
                x2: 100,
                y2: 100
            }
        );
    }

    #[test]
    fn axes_use_their_own_ratio() {
        let mapped = map_to_image(
            DisplayRect::new(10.0, 10.0, 10.0, 10.0),
            ScaleRatio { x: 0.5, y: 2.0 },
            IMAGE,
        )
        .unwrap();
        assert_eq!(
            mapped,
            PixelBox {
                x1: 20,
                y1: 5,
                x2: 40,
                y2: 10
            }
        );
    }

    #[test]
    fn clamps_to_image() {
        let mapped = map_to_image(
            DisplayRect::new(-20.0, 550.0, 100.0, 100.0),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap();
        assert_eq!(
            mapped,
            PixelBox {
                x1: 0,
                y1: 550,
                x2: 80,
                y2: 600
            }
        );
    }

    #[test]
    fn rounding_collapse_expands_far_edge() {
        let mapped = map_to_image(
            DisplayRect::new(10.0, 10.0, 0.2, 0.2),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap();
        assert_eq!(mapped.width(), 1);
        assert_eq!(mapped.height(), 1);
        assert_eq!((mapped.x1, mapped.y1), (10, 10));
    }

    #[test]
    fn collapse_at_image_edge_fails() {
        let err = map_to_image(
            DisplayRect::new(799.8, 10.0, 0.1, 20.0),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::DegenerateRegion);
    }

    #[test]
    fn rect_outside_image_fails() {
        let err = map_to_image(
            DisplayRect::new(900.0, 10.0, 50.0, 50.0),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::OutOfBounds);

        let err = map_to_image(
            DisplayRect::new(-60.0, 10.0, 50.0, 50.0),
            ScaleRatio::uniform(1.0),
            IMAGE,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::OutOfBounds);
    }

    #[test]
    fn rejects_empty_rect_and_bad_ratio() {
        assert_matches!(
            map_to_image(
                DisplayRect::new(10.0, 10.0, 0.0, 20.0),
                ScaleRatio::uniform(1.0),
                IMAGE
            ),
            Err(ValidationError::DegenerateRegion)
        );
        assert_matches!(
            map_to_image(
                DisplayRect::new(10.0, 10.0, f64::NAN, 20.0),
                ScaleRatio::uniform(1.0),
                IMAGE
            ),
            Err(ValidationError::DegenerateRegion)
        );
        assert_matches!(
            map_to_image(
                DisplayRect::new(10.0, 10.0, 20.0, 20.0),
                ScaleRatio { x: 0.0, y: 1.0 },
                IMAGE
            ),
            Err(ValidationError::InvalidRatio { .. })
        );
    }

    #[test]
    fn round_trip_stays_within_a_pixel() {
        let rects = [
            DisplayRect::new(13.3, 7.9, 101.2, 55.5),
            DisplayRect::new(0.4, 0.6, 3.7, 9.1),
            DisplayRect::new(250.25, 120.75, 60.5, 33.3),
        ];
        for ratio in [0.5, 0.75, 1.0, 1.6, 2.0] {
            let r = ScaleRatio::uniform(ratio);
            for rect in rects {
                let back = to_display(map_to_image(rect, r, IMAGE).unwrap(), r);
                assert!((back.x - rect.x).abs() <= 1.0, "{rect:?} @ {ratio}");
                assert!((back.y - rect.y).abs() <= 1.0, "{rect:?} @ {ratio}");
                assert!(
                    ((back.x + back.w) - (rect.x + rect.w)).abs() <= 1.0,
                    "{rect:?} @ {ratio}"
                );
                assert!(
                    ((back.y + back.h) - (rect.y + rect.h)).abs() <= 1.0,
                    "{rect:?} @ {ratio}"
                );
            }
        }
    }

    #[test]
    fn initial_selection_for_800x600() {
        let sel = initial_selection(IMAGE);
        assert_eq!(sel.width(), 200);
        assert_eq!(sel.height(), 200);
        assert_eq!((sel.x1, sel.y1), (300, 200));
    }

    #[test]
    fn initial_selection_has_minimum_edge() {
        let sel = initial_selection(ImageSize::new(100, 90));
        assert_eq!(sel.width(), 40);
        assert_eq!(sel.height(), 40);

        let tiny = initial_selection(ImageSize::new(20, 10));
        assert_eq!((tiny.width(), tiny.height()), (20, 10));
    }

    #[test]
    fn lead_box_layout() {
        let boundary = LeadBoundary::new(
            LeadName::II,
            PixelBox {
                x1: 1,
                y1: 2,
                x2: 3,
                y2: 4,
            },
        );
        assert_eq!(boundary.lead_box(), [2, 4, 1, 3]);
    }
}
