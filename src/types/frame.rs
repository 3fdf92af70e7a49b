//! Camera frame slots

/// Timestamp marking a slot whose capture failed or never happened.
pub const INVALID_TIMESTAMP: i64 = -1;

/// A time-stamped greyscale camera image.
///
/// Frames live in ring buffer slots and are overwritten in place by the
/// acquisition thread. Outside the buffer they only exist as caller-owned
/// scratch copies.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Monotonic acquisition time in milliseconds, `-1` when invalid
    pub timestamp_ms: i64,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Row-major 8-bit pixels, `width * height` long
    pub pixels: Vec<u8>,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self::placeholder(0, 0)
    }
}

impl FrameInfo {
    /// Invalid frame with storage pre-allocated for the given dimensions.
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self {
            timestamp_ms: INVALID_TIMESTAMP,
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Whether the frame holds a successful capture.
    pub fn is_valid(&self) -> bool {
        self.timestamp_ms >= 0
    }

    /// Mark the frame invalid without touching its storage.
    pub fn invalidate(&mut self) {
        self.timestamp_ms = INVALID_TIMESTAMP;
    }

    /// Resize pixel storage, reusing the existing allocation where possible.
    pub fn reshape(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.resize(width as usize * height as usize, 0);
    }

    /// Copy another frame into this one, reusing this frame's allocation.
    pub fn copy_from(&mut self, other: &FrameInfo) {
        self.timestamp_ms = other.timestamp_ms;
        self.width = other.width;
        self.height = other.height;
        self.pixels.clone_from(&other.pixels);
    }

    /// Pixel at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }
}
