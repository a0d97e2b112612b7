//! YUV4MPEG2 file source.
//!
//! Reads uncompressed 4:2:0 frames from a `.y4m` file, paced to the rate
//! declared in the stream header. With `repeat` the file is rewound at end
//! of stream, which emulates an endless camera; a header change between
//! loops (the file was replaced) surfaces as [`ReadStatus::Changed`] so the
//! harness reopens cleanly.

use super::{FrameSource, ReadStatus};
use crate::frame::{PixelFormat, VideoFrame};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const TIMEBASE: u64 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamHeader {
    width: u32,
    height: u32,
    /// Frame rate as a rational, e.g. 30000/1001.
    fps_num: u32,
    fps_den: u32,
    format: PixelFormat,
}

pub struct Y4mSource {
    path: PathBuf,
    repeat: bool,
    reader: Option<BufReader<File>>,
    header: Option<StreamHeader>,
    index: u64,
    next_due: Option<Instant>,
}

impl Y4mSource {
    pub fn new(path: PathBuf, repeat: bool) -> Self {
        Self {
            path,
            repeat,
            reader: None,
            header: None,
            index: 0,
            next_due: None,
        }
    }

    fn open_file(&self) -> Option<(BufReader<File>, StreamHeader)> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "cannot open y4m file");
                return None;
            }
        };
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        if let Err(e) = reader.read_line(&mut line) {
            tracing::error!(path = %self.path.display(), error = %e, "cannot read y4m header");
            return None;
        }
        match parse_header(line.trim_end()) {
            Ok(header) => Some((reader, header)),
            Err(reason) => {
                tracing::error!(path = %self.path.display(), reason, "invalid y4m header");
                None
            }
        }
    }

    /// Rewind by reopening. The file may have been replaced in the
    /// meantime, so the header is re-checked.
    fn rewind(&mut self) -> ReadStatus {
        let Some((reader, header)) = self.open_file() else {
            return ReadStatus::Error;
        };
        if self.header != Some(header) {
            return ReadStatus::Changed;
        }
        self.reader = Some(reader);
        self.index = 0;
        ReadStatus::Again
    }
}

impl FrameSource for Y4mSource {
    fn open(&mut self) -> bool {
        let Some((reader, header)) = self.open_file() else {
            return false;
        };
        tracing::info!(
            path = %self.path.display(),
            width = header.width,
            height = header.height,
            fps = format!("{}/{}", header.fps_num, header.fps_den),
            "y4m stream opened"
        );
        self.reader = Some(reader);
        self.header = Some(header);
        self.index = 0;
        self.next_due = None;
        true
    }

    fn close(&mut self) {
        self.reader = None;
        self.next_due = None;
    }

    fn read(&mut self, frame: &mut VideoFrame) -> ReadStatus {
        let (Some(reader), Some(header)) = (self.reader.as_mut(), self.header) else {
            return ReadStatus::Error;
        };

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                return if self.repeat {
                    self.rewind()
                } else {
                    ReadStatus::Eof
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "y4m read failed");
                return ReadStatus::Error;
            }
        }
        if !line.starts_with("FRAME") {
            tracing::warn!(path = %self.path.display(), "malformed frame marker");
            return ReadStatus::Error;
        }

        frame.reformat(header.format, header.width, header.height);
        if let Err(e) = reader.read_exact(&mut frame.data) {
            tracing::warn!(path = %self.path.display(), error = %e, "truncated y4m frame");
            return if self.repeat { self.rewind() } else { ReadStatus::Eof };
        }

        // Pace to the declared rate, one frame interval at most.
        let interval = Duration::from_secs_f64(header.fps_den as f64 / header.fps_num as f64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);

        frame.pts =
            (self.index * TIMEBASE * header.fps_den as u64 / header.fps_num as u64) as i64;
        frame.dts = frame.pts;
        self.index += 1;
        ReadStatus::Frame
    }
}

fn parse_header(line: &str) -> Result<StreamHeader, &'static str> {
    let mut tokens = line.split_ascii_whitespace();
    if tokens.next() != Some("YUV4MPEG2") {
        return Err("missing YUV4MPEG2 magic");
    }

    let mut width = None;
    let mut height = None;
    let mut fps = (25, 1);
    let mut format = PixelFormat::Yuv420p;
    for token in tokens {
        let (tag, value) = token.split_at(1);
        match tag {
            "W" => width = value.parse().ok(),
            "H" => height = value.parse().ok(),
            "F" => {
                let (num, den) = value.split_once(':').ok_or("malformed frame rate")?;
                fps = (
                    num.parse().map_err(|_| "malformed frame rate")?,
                    den.parse().map_err(|_| "malformed frame rate")?,
                );
            }
            "C" => {
                format = match value {
                    "420" | "420mpeg2" | "420paldv" => PixelFormat::Yuv420p,
                    "420jpeg" => PixelFormat::Yuvj420p,
                    _ => return Err("unsupported colorspace"),
                };
            }
            // Interlacing, aspect and extension tags are ignored.
            _ => {}
        }
    }

    let width = width.filter(|w| *w > 0).ok_or("missing frame width")?;
    let height = height.filter(|h| *h > 0).ok_or("missing frame height")?;
    if fps.0 == 0 || fps.1 == 0 {
        return Err("malformed frame rate");
    }
    Ok(StreamHeader {
        width,
        height,
        fps_num: fps.0,
        fps_den: fps.1,
        format,
    })
}
