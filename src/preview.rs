//! Waveform preview points for digitized leads.
//!
//! Point `i` of a preview is `(i, baseline - samples[i] * scale_factor)`:
//! screen y grows downward, so positive millivolts plot above the baseline.
//! Each point also carries its signed deviation from the baseline, computed
//! straight from the sample so it scales exactly with `scale_factor`.
//! Nothing is cached; a preview borrows the samples and is rebuilt
//! whenever the scale or baseline changes.

/// A bounded, restartable view over one lead's samples.
#[derive(Clone, Copy, Debug)]
pub struct WaveformPreview<'a> {
    samples: &'a [f64],
    scale_factor: f64,
    baseline: f64,
    len: usize,
}

pub fn render_preview(
    samples: &[f64],
    scale_factor: f64,
    baseline: f64,
    max_points: usize,
) -> WaveformPreview<'_> {
    WaveformPreview {
        samples,
        scale_factor,
        baseline,
        len: samples.len().min(max_points),
    }
}

impl<'a> WaveformPreview<'a> {
    /// Number of points the preview yields.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fresh iterator from the first point.
    pub fn points(&self) -> PreviewPoints<'a> {
        PreviewPoints {
            preview: *self,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for WaveformPreview<'a> {
    type Item = PreviewPoint;
    type IntoIter = PreviewPoints<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.points()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreviewPoint {
    pub index: usize,
    /// `-samples[index] * scale_factor`.
    pub deviation: f64,
    /// `baseline + deviation`, the screen y of the point.
    pub y: f64,
}

#[derive(Clone, Debug)]
pub struct PreviewPoints<'a> {
    preview: WaveformPreview<'a>,
    index: usize,
}

impl Iterator for PreviewPoints<'_> {
    type Item = PreviewPoint;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.preview.len {
            return None;
        }
        let i = self.index;
        self.index += 1;
        let p = &self.preview;
        let deviation = -(p.samples[i] * p.scale_factor);
        Some(PreviewPoint {
            index: i,
            deviation,
            y: p.baseline + deviation,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.preview.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PreviewPoints<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 8] = [0.0, 0.5, 1.25, -0.75, 2.0, -1.5, 0.125, 3.0];

    fn ys(preview: WaveformPreview<'_>) -> Vec<f64> {
        preview.points().map(|p| p.y).collect()
    }

    #[test]
    fn points_follow_the_formula() {
        let points: Vec<_> = render_preview(&SAMPLES, 10.0, 100.0, 100).points().collect();
        assert_eq!(points.len(), SAMPLES.len());
        assert_eq!(points[0].y, 100.0);
        assert_eq!(points[2].index, 2);
        assert_eq!(points[2].y, 87.5);
        assert_eq!(points[2].deviation, -12.5);
        assert_eq!(points[3].y, 107.5);
    }

    #[test]
    fn bounded_by_max_points() {
        let preview = render_preview(&SAMPLES, 10.0, 0.0, 3);
        assert_eq!(preview.len(), 3);
        assert_eq!(preview.points().len(), 3);
        assert_eq!(preview.points().last().unwrap().index, 2);
        assert!(render_preview(&SAMPLES, 10.0, 0.0, 0).is_empty());
        assert!(render_preview(&[], 10.0, 0.0, 50).points().next().is_none());
    }

    #[test]
    fn restartable() {
        let preview = render_preview(&SAMPLES, 8.0, 64.0, 5);
        let first: Vec<_> = preview.points().collect();
        let second: Vec<_> = preview.into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn doubling_scale_doubles_deviation() {
        let samples = [0.1, 0.3, -0.7, 1.1, -0.033, 2.71828, 0.0, -1.9];
        for (s1, baseline) in [(7.3, 100.3), (5.0, 64.0), (12.9, -3.7), (33.33, 0.1)] {
            let single: Vec<_> = render_preview(&samples, s1, baseline, 100).points().collect();
            let double: Vec<_> = render_preview(&samples, 2.0 * s1, baseline, 100)
                .points()
                .collect();
            assert_eq!(single.len(), double.len());
            for (a, b) in single.iter().zip(&double) {
                assert_eq!(a.index, b.index);
                assert_eq!(b.deviation, 2.0 * a.deviation, "scale {s1}, index {}", a.index);
            }
        }
    }

    #[test]
    fn y_is_baseline_plus_deviation() {
        for p in render_preview(&[0.1, -0.7, 1.1], 7.3, 100.3, 10).points() {
            assert_eq!(p.y, 100.3 + p.deviation);
        }
    }

    #[test]
    fn monotonic_in_amplitude() {
        let ys = ys(render_preview(&[-1.0, 0.0, 1.0, 2.0], 10.0, 50.0, 10));
        for pair in ys.windows(2) {
            assert!(pair[1] < pair[0]);
        }
    }

    #[test]
    fn source_samples_untouched() {
        let samples = SAMPLES.to_vec();
        let _ = render_preview(&samples, 20.0, 10.0, 4).points().count();
        assert_eq!(samples, SAMPLES.to_vec());
    }
}
