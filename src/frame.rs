//! Raw frame representation shared across pipeline stages.
//!
//! A `VideoFrame` is the opaque payload carried by a [`crate::slot::Slot`]:
//! pixel data plus the identity fields (dimensions, timestamps, picture
//! number) the slot uses to detect freshness and invalidate derived views.

use serde::Deserialize;

/// Pixel layout of a frame's data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// Single 8-bit luma plane.
    Gray8,
    /// Planar 4:2:0 YUV, limited (studio) range.
    Yuv420p,
    /// Planar 4:2:0 YUV, full range (the "J" variant produced by MJPEG
    /// sources). Needs range correction before conversion.
    Yuvj420p,
}

impl PixelFormat {
    /// Byte size of a frame of this format at the given dimensions.
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgb24 => w * h * 3,
            PixelFormat::Gray8 => w * h,
            // Luma plane plus two quarter-size chroma planes.
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
        }
    }

    /// Whether this format stores full-range samples that must be
    /// range-corrected when converting to another colorspace.
    pub fn is_full_range(self) -> bool {
        matches!(self, PixelFormat::Yuvj420p)
    }
}

/// Scaling algorithm for derived views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// A single raw or derived video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in source time units.
    pub pts: i64,
    /// Decode timestamp in source time units.
    pub dts: i64,
    /// Monotone picture identity assigned by the producing input. Derived
    /// views cached against an older identity are recomputed.
    pub frame_no: u64,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Allocate a zeroed frame of the given format and size.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            pts: 0,
            dts: 0,
            frame_no: 0,
            data: vec![0u8; format.buffer_size(width, height)],
        }
    }

    /// An empty placeholder frame, used before an input produces anything.
    pub fn empty() -> Self {
        Self {
            format: PixelFormat::Gray8,
            width: 0,
            height: 0,
            pts: 0,
            dts: 0,
            frame_no: 0,
            data: Vec::new(),
        }
    }

    /// Resize the buffer in place for new parameters, keeping the
    /// allocation when it already fits.
    pub fn reformat(&mut self, format: PixelFormat, width: u32, height: u32) {
        self.format = format;
        self.width = width;
        self.height = height;
        self.data.resize(format.buffer_size(width, height), 0);
    }

    /// Offsets of the Y, U and V planes for planar formats.
    pub fn yuv_planes(&self) -> (usize, usize, usize) {
        let luma = (self.width as usize) * (self.height as usize);
        let chroma = (self.width as usize).div_ceil(2) * (self.height as usize).div_ceil(2);
        (0, luma, luma + chroma)
    }
}
