//! Pupil detection on captured frames

use crate::types::FrameInfo;

/// Pupil position and size found in a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilFix {
    pub x: f64,
    pub y: f64,
    pub diameter: f64,
}

/// Locates the pupil in a frame. `None` when no pupil is visible.
pub trait PupilDetector: Send {
    fn detect(&mut self, frame: &FrameInfo) -> Option<PupilFix>;
}

impl<F> PupilDetector for F
where
    F: FnMut(&FrameInfo) -> Option<PupilFix> + Send,
{
    fn detect(&mut self, frame: &FrameInfo) -> Option<PupilFix> {
        self(frame)
    }
}

/// Threshold detector: the pupil is the set of pixels darker than `threshold`.
///
/// Position is the centroid of the dark pixels and diameter that of a disc
/// with the same area.
#[derive(Debug, Clone, Copy)]
pub struct DarkBlobDetector {
    pub threshold: u8,
    pub min_pixels: usize,
}

impl Default for DarkBlobDetector {
    fn default() -> Self {
        Self { threshold: 60, min_pixels: 12 }
    }
}

impl PupilDetector for DarkBlobDetector {
    fn detect(&mut self, frame: &FrameInfo) -> Option<PupilFix> {
        if !frame.is_valid() || frame.width == 0 {
            return None;
        }

        let width = frame.width as usize;
        let (mut count, mut sum_x, mut sum_y) = (0usize, 0f64, 0f64);
        for (index, _) in frame.pixels.iter().enumerate().filter(|(_, p)| **p < self.threshold) {
            count += 1;
            sum_x += (index % width) as f64 + 0.5;
            sum_y += (index / width) as f64 + 0.5;
        }

        if count < self.min_pixels.max(1) {
            return None;
        }

        let area = count as f64;
        Some(PupilFix {
            x: sum_x / area,
            y: sum_y / area,
            diameter: 2.0 * (area / std::f64::consts::PI).sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::source::{FrameSource, SyntheticCamera};
    use crate::types::Eye;

    #[test]
    fn finds_synthetic_pupil() {
        let mut camera = SyntheticCamera::new(64, 64);
        let mut frame = FrameInfo::default();
        camera.capture(Eye::Left, &mut frame).unwrap();

        let fix = DarkBlobDetector::default().detect(&frame).expect("pupil visible");
        // Radius is 64 / 8, drift keeps the centre within 6.4 px of the middle
        assert!((fix.diameter - 16.0).abs() < 2.0, "diameter {}", fix.diameter);
        assert!((fix.x - 32.0).abs() < 8.0);
        assert!((fix.y - 32.0).abs() < 8.0);
    }

    #[test]
    fn blank_or_invalid_frames_have_no_pupil() {
        let mut detector = DarkBlobDetector::default();
        let mut frame = FrameInfo::placeholder(8, 8);
        assert!(detector.detect(&frame).is_none());

        frame.timestamp_ms = 5;
        frame.pixels.fill(255);
        assert!(detector.detect(&frame).is_none());
    }
}
