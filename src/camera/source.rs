//! Camera capture sources

use crate::types::{Eye, FrameInfo, monotonic_ms};
use crate::Result;

/// A device that can capture an image for one eye into a recycled frame slot.
///
/// Implementations write pixels and the acquisition timestamp directly into
/// `frame`, reusing its storage. Returning an error marks the slot invalid.
pub trait FrameSource: Send {
    fn capture(&mut self, eye: Eye, frame: &mut FrameInfo) -> Result<()>;
}

impl<F> FrameSource for F
where
    F: FnMut(Eye, &mut FrameInfo) -> Result<()> + Send,
{
    fn capture(&mut self, eye: Eye, frame: &mut FrameInfo) -> Result<()> {
        self(eye, frame)
    }
}

/// Synthetic eye camera producing a dark pupil disc on a bright iris.
///
/// The pupil drifts slowly around the image centre so consecutive frames
/// differ. Used when no physical camera is configured.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    pupil_radius: f64,
    frames: u64,
}

impl SyntheticCamera {
    const BACKGROUND: u8 = 200;
    const PUPIL: u8 = 20;

    pub fn new(width: u32, height: u32) -> Self {
        let pupil_radius = f64::from(width.min(height)) / 8.0;
        Self { width, height, pupil_radius, frames: 0 }
    }

    /// Pupil centre for the current frame counter.
    fn pupil_centre(&self, eye: Eye) -> (f64, f64) {
        let phase = self.frames as f64 / 20.0 + if eye == Eye::Right { 1.0 } else { 0.0 };
        let drift = f64::from(self.width.min(self.height)) / 10.0;
        (
            f64::from(self.width) / 2.0 + drift * phase.cos(),
            f64::from(self.height) / 2.0 + drift * phase.sin(),
        )
    }
}

impl FrameSource for SyntheticCamera {
    fn capture(&mut self, eye: Eye, frame: &mut FrameInfo) -> Result<()> {
        frame.reshape(self.width, self.height);
        let (cx, cy) = self.pupil_centre(eye);
        let radius_sq = self.pupil_radius * self.pupil_radius;

        for (index, pixel) in frame.pixels.iter_mut().enumerate() {
            let x = (index % self.width as usize) as f64 + 0.5;
            let y = (index / self.width as usize) as f64 + 0.5;
            let dist_sq = (x - cx).powi(2) + (y - cy).powi(2);
            *pixel = if dist_sq <= radius_sq { Self::PUPIL } else { Self::BACKGROUND };
        }

        frame.timestamp_ms = monotonic_ms();
        if eye == Eye::Right {
            self.frames += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_are_valid_and_sized() {
        let mut camera = SyntheticCamera::new(32, 24);
        let mut frame = FrameInfo::default();
        camera.capture(Eye::Left, &mut frame).unwrap();

        assert!(frame.is_valid());
        assert_eq!(frame.pixels.len(), 32 * 24);
        assert!(frame.pixels.contains(&SyntheticCamera::PUPIL));
        assert!(frame.pixels.contains(&SyntheticCamera::BACKGROUND));
    }
}
