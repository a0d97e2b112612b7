//! Frame format conversion and rescaling for derived views.
//!
//! This is the conversion backend behind [`crate::slot::Slot::frame`]: given
//! a source frame and a `(format, width, height, filter)` request it produces
//! a newly computed view, or recomputes one in place into an existing buffer.
//! Full-range sources (Yuvj420p) are decoded with full-range coefficients so
//! the result does not pick up a contrast shift from limited-range math.

use crate::frame::{PixelFormat, ScaleFilter, VideoFrame};
use thiserror::Error;

/// Errors produced by view conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("cannot convert {from:?} to {to:?}")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("source frame is empty")]
    EmptySource,

    #[error("source buffer too small: {len} bytes for {width}x{height} {format:?}")]
    ShortBuffer {
        len: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}

/// Resolve requested dimensions against the source, preserving aspect ratio
/// when only one of width/height is given. Both zero means source size.
pub fn resolve_dims(src_w: u32, src_h: u32, req_w: u32, req_h: u32) -> (u32, u32) {
    match (req_w, req_h) {
        (0, 0) => (src_w, src_h),
        (0, h) => {
            let factor = src_w as f64 / src_h as f64;
            ((h as f64 * factor) as u32, h)
        }
        (w, 0) => {
            let factor = src_h as f64 / src_w as f64;
            (w, (w as f64 * factor) as u32)
        }
        (w, h) => (w, h),
    }
}

/// Convert `src` to the requested format and size into a fresh frame.
pub fn convert(
    src: &VideoFrame,
    format: PixelFormat,
    width: u32,
    height: u32,
    filter: ScaleFilter,
) -> Result<VideoFrame, ConvertError> {
    let (width, height) = resolve_dims(src.width, src.height, width, height);
    let mut out = VideoFrame::new(format, width, height);
    convert_into(src, &mut out, filter)?;
    Ok(out)
}

/// Recompute a view in place. `dst` keeps its format and dimensions; its
/// buffer is reused and the identity fields are refreshed from `src`.
pub fn convert_into(
    src: &VideoFrame,
    dst: &mut VideoFrame,
    filter: ScaleFilter,
) -> Result<(), ConvertError> {
    if src.width == 0 || src.height == 0 {
        return Err(ConvertError::EmptySource);
    }
    let needed = src.format.buffer_size(src.width, src.height);
    if src.data.len() < needed {
        return Err(ConvertError::ShortBuffer {
            len: src.data.len(),
            width: src.width,
            height: src.height,
            format: src.format,
        });
    }

    dst.data
        .resize(dst.format.buffer_size(dst.width, dst.height), 0);

    if dst.format == src.format {
        rescale_same_format(src, dst, filter);
    } else {
        match dst.format {
            PixelFormat::Rgb24 => render(src, dst, filter, |rgb, data, idx| {
                data[idx * 3] = rgb[0];
                data[idx * 3 + 1] = rgb[1];
                data[idx * 3 + 2] = rgb[2];
            }),
            PixelFormat::Gray8 => render(src, dst, filter, |rgb, data, idx| {
                // Integer BT.601 luma
                let y = (77 * rgb[0] as u32 + 150 * rgb[1] as u32 + 29 * rgb[2] as u32) >> 8;
                data[idx] = y as u8;
            }),
            other => {
                return Err(ConvertError::Unsupported {
                    from: src.format,
                    to: other,
                })
            }
        }
    }

    dst.pts = src.pts;
    dst.dts = src.dts;
    dst.frame_no = src.frame_no;
    Ok(())
}

/// Drive the per-pixel sampling loop, writing through `put`.
fn render(
    src: &VideoFrame,
    dst: &mut VideoFrame,
    filter: ScaleFilter,
    put: impl Fn([u8; 3], &mut [u8], usize),
) {
    let (dw, dh) = (dst.width, dst.height);
    let sx = src.width as f32 / dw as f32;
    let sy = src.height as f32 / dh as f32;

    for dy in 0..dh {
        for dx in 0..dw {
            let fx = (dx as f32 + 0.5) * sx - 0.5;
            let fy = (dy as f32 + 0.5) * sy - 0.5;
            let rgb = match filter {
                ScaleFilter::Nearest => {
                    sample_rgb(src, fx.round().max(0.0) as u32, fy.round().max(0.0) as u32)
                }
                ScaleFilter::Bilinear => sample_rgb_bilinear(src, fx, fy),
            };
            put(rgb, &mut dst.data, (dy * dw + dx) as usize);
        }
    }
}

/// Decode one source pixel to RGB, whatever the source layout.
fn sample_rgb(src: &VideoFrame, x: u32, y: u32) -> [u8; 3] {
    let x = x.min(src.width - 1) as usize;
    let y = y.min(src.height - 1) as usize;
    let w = src.width as usize;
    match src.format {
        PixelFormat::Rgb24 => {
            let i = (y * w + x) * 3;
            [src.data[i], src.data[i + 1], src.data[i + 2]]
        }
        PixelFormat::Gray8 => {
            let g = src.data[y * w + x];
            [g, g, g]
        }
        PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
            let (yo, uo, vo) = src.yuv_planes();
            let cw = w.div_ceil(2);
            let ci = (y / 2) * cw + x / 2;
            let (luma, cb, cr) = (
                src.data[yo + y * w + x] as i32,
                src.data[uo + ci] as i32,
                src.data[vo + ci] as i32,
            );
            yuv_to_rgb(luma, cb, cr, src.format.is_full_range())
        }
    }
}

fn sample_rgb_bilinear(src: &VideoFrame, fx: f32, fy: f32) -> [u8; 3] {
    let fx = fx.max(0.0);
    let fy = fy.max(0.0);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(src.width - 1);
    let y1 = (y0 + 1).min(src.height - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let p00 = sample_rgb(src, x0, y0);
    let p10 = sample_rgb(src, x1, y0);
    let p01 = sample_rgb(src, x0, y1);
    let p11 = sample_rgb(src, x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - tx) + p10[c] as f32 * tx;
        let bot = p01[c] as f32 * (1.0 - tx) + p11[c] as f32 * tx;
        out[c] = (top * (1.0 - ty) + bot * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// BT.601 YUV to RGB. Limited-range sources get the 16..235 expansion;
/// full-range sources use the coefficients directly.
fn yuv_to_rgb(y: i32, cb: i32, cr: i32, full_range: bool) -> [u8; 3] {
    // 16.16 fixed point
    let (y_scaled, coef_rv, coef_gu, coef_gv, coef_bu) = if full_range {
        (y << 16, 91_881, 22_554, 46_802, 116_130)
    } else {
        ((y - 16).max(0) * 76_309, 104_597, 25_675, 53_279, 132_201)
    };
    let cb = cb - 128;
    let cr = cr - 128;
    let r = (y_scaled + coef_rv * cr) >> 16;
    let g = (y_scaled - coef_gu * cb - coef_gv * cr) >> 16;
    let b = (y_scaled + coef_bu * cb) >> 16;
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

/// Plane-wise rescale for a same-format request with different dimensions.
fn rescale_same_format(src: &VideoFrame, dst: &mut VideoFrame, filter: ScaleFilter) {
    match src.format {
        PixelFormat::Rgb24 | PixelFormat::Gray8 => {
            // Reuse the sampling path; identity conversions are cheap enough.
            match src.format {
                PixelFormat::Rgb24 => render(src, dst, filter, |rgb, data, idx| {
                    data[idx * 3] = rgb[0];
                    data[idx * 3 + 1] = rgb[1];
                    data[idx * 3 + 2] = rgb[2];
                }),
                _ => render(src, dst, filter, |rgb, data, idx| data[idx] = rgb[0]),
            }
        }
        PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
            let (syo, suo, svo) = src.yuv_planes();
            let (dyo, duo, dvo) = dst.yuv_planes();
            let (sw, sh) = (src.width as usize, src.height as usize);
            let (dw, dh) = (dst.width as usize, dst.height as usize);
            let (scw, sch) = (sw.div_ceil(2), sh.div_ceil(2));
            let (dcw, dch) = (dw.div_ceil(2), dh.div_ceil(2));
            let mut planes = std::mem::take(&mut dst.data);
            scale_plane(&src.data[syo..syo + sw * sh], sw, sh, &mut planes[dyo..dyo + dw * dh], dw, dh, filter);
            scale_plane(&src.data[suo..suo + scw * sch], scw, sch, &mut planes[duo..duo + dcw * dch], dcw, dch, filter);
            scale_plane(&src.data[svo..svo + scw * sch], scw, sch, &mut planes[dvo..dvo + dcw * dch], dcw, dch, filter);
            dst.data = planes;
        }
    }
}

fn scale_plane(
    src: &[u8],
    sw: usize,
    sh: usize,
    dst: &mut [u8],
    dw: usize,
    dh: usize,
    filter: ScaleFilter,
) {
    let sx = sw as f32 / dw as f32;
    let sy = sh as f32 / dh as f32;
    for dy in 0..dh {
        for dx in 0..dw {
            let fx = ((dx as f32 + 0.5) * sx - 0.5).max(0.0);
            let fy = ((dy as f32 + 0.5) * sy - 0.5).max(0.0);
            let v = match filter {
                ScaleFilter::Nearest => {
                    let x = (fx.round() as usize).min(sw - 1);
                    let y = (fy.round() as usize).min(sh - 1);
                    src[y * sw + x]
                }
                ScaleFilter::Bilinear => {
                    let x0 = (fx.floor() as usize).min(sw - 1);
                    let y0 = (fy.floor() as usize).min(sh - 1);
                    let x1 = (x0 + 1).min(sw - 1);
                    let y1 = (y0 + 1).min(sh - 1);
                    let tx = fx - x0 as f32;
                    let ty = fy - y0 as f32;
                    let top = src[y0 * sw + x0] as f32 * (1.0 - tx) + src[y0 * sw + x1] as f32 * tx;
                    let bot = src[y1 * sw + x0] as f32 * (1.0 - tx) + src[y1 * sw + x1] as f32 * tx;
                    (top * (1.0 - ty) + bot * ty).round() as u8
                }
            };
            dst[dy * dw + dx] = v;
        }
    }
}
