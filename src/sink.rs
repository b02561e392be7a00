//! Raw frame sink.
//!
//! [`FrameSink`] serializes decoded pictures plane by plane into a flat byte
//! stream with no header or framing between frames. Each row is trimmed to
//! its meaningful width, so stride padding never reaches the output.
//!
//! The sink enforces a frame budget. While fewer than `budget` frames have
//! been written, every supported frame is written. The first frame that
//! arrives after the budget is met closes the sink and returns
//! [`SinkStatus::Stop`] instead of being written, so a budget of `N` writes
//! exactly `N` frames.
//!
//! # Example
//!
//! ```
//! use framedump::{FrameSink, PixelFormat, RawFrame, SinkStatus};
//!
//! let frame = RawFrame::packed(PixelFormat::Nv12, 4, 2, &[0u8; 12]).unwrap();
//! let mut sink = FrameSink::new(Vec::new(), 1);
//!
//! assert_eq!(sink.write_frame(&frame).unwrap(), SinkStatus::Continue);
//! assert_eq!(sink.write_frame(&frame).unwrap(), SinkStatus::Stop);
//! assert_eq!(sink.frames_written(), 1);
//! assert!(sink.is_closed());
//! ```

use std::fs::File;
use std::io::{BufWriter, Error as IoError, ErrorKind, Write};
use std::path::Path;

use ffmpeg_next::frame::{Flags as FrameFlags, Video as VideoFrame};

use crate::error::FrameDumpError;
use crate::pixel::PixelFormat;

/// A decoded picture with per-plane strides.
pub trait PlanarFrame {
    /// Pixel layout, or `None` if it is not one of [`PixelFormat`].
    fn format(&self) -> Option<PixelFormat>;
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Byte distance between the starts of consecutive rows of `plane`.
    fn stride(&self, plane: usize) -> usize;
    /// Raw bytes of `plane`, including stride padding.
    fn plane(&self, plane: usize) -> &[u8];
    /// Whether the decoder flagged the picture as corrupt.
    fn is_corrupt(&self) -> bool;
}

impl PlanarFrame for VideoFrame {
    fn format(&self) -> Option<PixelFormat> {
        PixelFormat::from_ffmpeg_pixel(VideoFrame::format(self))
    }

    fn width(&self) -> u32 {
        VideoFrame::width(self)
    }

    fn height(&self) -> u32 {
        VideoFrame::height(self)
    }

    fn stride(&self, plane: usize) -> usize {
        VideoFrame::stride(self, plane)
    }

    fn plane(&self, plane: usize) -> &[u8] {
        self.data(plane)
    }

    fn is_corrupt(&self) -> bool {
        self.flags().contains(FrameFlags::CORRUPT)
    }
}

/// An owned picture held in ordinary memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<Vec<u8>>,
    strides: Vec<usize>,
    corrupt: bool,
}

impl RawFrame {
    /// Build a frame from explicit planes and strides.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::InvalidPicture`] if the plane count does
    /// not match the format, a stride is narrower than the plane's row, or
    /// a plane is too short for its rows.
    pub fn with_planes(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<Vec<u8>>,
        strides: Vec<usize>,
    ) -> Result<Self, FrameDumpError> {
        let layout = format
            .plane_layout(width as usize, height as usize)
            .ok_or_else(|| {
                FrameDumpError::InvalidPicture(format!("{format} has no raw plane layout"))
            })?;

        if planes.len() != layout.len() || strides.len() != layout.len() {
            return Err(FrameDumpError::InvalidPicture(format!(
                "{format} needs {} planes, got {} planes and {} strides",
                layout.len(),
                planes.len(),
                strides.len()
            )));
        }

        for (index, (plane, expected)) in planes.iter().zip(&layout).enumerate() {
            let stride = strides[index];
            if stride < expected.row_bytes {
                return Err(FrameDumpError::InvalidPicture(format!(
                    "plane {index}: stride {stride} is narrower than {} bytes",
                    expected.row_bytes
                )));
            }
            let needed = required_plane_bytes(stride, expected.row_bytes, expected.rows);
            if plane.len() < needed {
                return Err(FrameDumpError::InvalidPicture(format!(
                    "plane {index}: {} bytes, need at least {needed}",
                    plane.len()
                )));
            }
        }

        Ok(Self {
            format,
            width,
            height,
            planes,
            strides,
            corrupt: false,
        })
    }

    /// Split a tightly packed buffer into planes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::InvalidPicture`] unless `data` is exactly
    /// [`PixelFormat::raw_frame_size`] bytes long.
    pub fn packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<Self, FrameDumpError> {
        let layout = format
            .plane_layout(width as usize, height as usize)
            .ok_or_else(|| {
                FrameDumpError::InvalidPicture(format!("{format} has no raw plane layout"))
            })?;

        let expected: usize = layout.iter().map(|plane| plane.len()).sum();
        if data.len() != expected {
            return Err(FrameDumpError::InvalidPicture(format!(
                "{width}x{height} {format} needs {expected} bytes, got {}",
                data.len()
            )));
        }

        let mut planes = Vec::with_capacity(layout.len());
        let mut strides = Vec::with_capacity(layout.len());
        let mut offset = 0;
        for plane in &layout {
            planes.push(data[offset..offset + plane.len()].to_vec());
            strides.push(plane.row_bytes);
            offset += plane.len();
        }

        Ok(Self {
            format,
            width,
            height,
            planes,
            strides,
            corrupt: false,
        })
    }

    /// Mark the frame as corrupt.
    #[must_use]
    pub fn with_corrupt(mut self, corrupt: bool) -> Self {
        self.corrupt = corrupt;
        self
    }

    /// The frame's pixel format.
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }
}

impl PlanarFrame for RawFrame {
    fn format(&self) -> Option<PixelFormat> {
        Some(self.format)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self, plane: usize) -> usize {
        self.strides.get(plane).copied().unwrap_or(0)
    }

    fn plane(&self, plane: usize) -> &[u8] {
        self.planes.get(plane).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

/// Bytes a plane must hold so its last row can be read without the stride
/// padding after it.
fn required_plane_bytes(stride: usize, row_bytes: usize, rows: usize) -> usize {
    if rows == 0 {
        0
    } else {
        stride * (rows - 1) + row_bytes
    }
}

/// Serialize `frame` as `format` into `writer`, trimming every row to its
/// meaningful width.
///
/// Returns the number of bytes written, which always equals
/// [`PixelFormat::raw_frame_size`] for the frame's dimensions.
///
/// # Errors
///
/// Returns an [`ErrorKind::InvalidInput`] error for [`PixelFormat::Jpeg`]
/// and an [`ErrorKind::InvalidData`] error if a plane is shorter than its
/// stride and row count imply. Writer errors are passed through.
pub fn write_planes<F, W>(frame: &F, format: PixelFormat, writer: &mut W) -> Result<usize, IoError>
where
    F: PlanarFrame + ?Sized,
    W: Write + ?Sized,
{
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let layout = format.plane_layout(width, height).ok_or_else(|| {
        IoError::new(
            ErrorKind::InvalidInput,
            format!("{format} has no raw plane layout"),
        )
    })?;

    let mut total = 0;
    for (index, plane) in layout.iter().enumerate() {
        let data = frame.plane(index);
        let stride = frame.stride(index);

        if stride < plane.row_bytes
            || data.len() < required_plane_bytes(stride, plane.row_bytes, plane.rows)
        {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "plane {index} of {width}x{height} {format} is truncated \
                     (stride {stride}, {} bytes)",
                    data.len()
                ),
            ));
        }

        if stride == plane.row_bytes {
            writer.write_all(&data[..plane.len()])?;
        } else {
            for row in 0..plane.rows {
                let start = row * stride;
                writer.write_all(&data[start..start + plane.row_bytes])?;
            }
        }
        total += plane.len();
    }

    Ok(total)
}

/// Outcome of handing a frame to a [`FrameConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Keep decoding.
    Continue,
    /// The sink is closed; the worker should stop.
    Stop,
}

/// Anything the packet decoder can deliver finished frames to.
pub trait FrameConsumer<F: PlanarFrame + ?Sized> {
    /// Accept one non-corrupt decoded frame.
    fn consume(&mut self, frame: &F) -> Result<SinkStatus, FrameDumpError>;
}

/// Budgeted writer of raw frames.
#[derive(Debug)]
pub struct FrameSink<W: Write> {
    /// `None` once closed.
    writer: Option<W>,
    budget: u64,
    written: u64,
    unsupported: u64,
}

impl FrameSink<BufWriter<File>> {
    /// Create (or truncate) the file at `path` and wrap it in a sink.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Io`] if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, budget: u64) -> Result<Self, FrameDumpError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        log::debug!("Opened output {} (budget {budget})", path.display());
        Ok(Self::new(BufWriter::new(file), budget))
    }
}

impl<W: Write> FrameSink<W> {
    /// Wrap `writer`, accepting `budget` frames.
    pub fn new(writer: W, budget: u64) -> Self {
        Self {
            writer: Some(writer),
            budget,
            written: 0,
            unsupported: 0,
        }
    }

    /// Write one frame, honouring the budget.
    ///
    /// Frames in a format other than YUV420 or NV12 are dropped with a
    /// warning and do not count against the budget.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Io`] if writing or closing fails.
    pub fn write_frame<F>(&mut self, frame: &F) -> Result<SinkStatus, FrameDumpError>
    where
        F: PlanarFrame + ?Sized,
    {
        if self.writer.is_none() {
            return Ok(SinkStatus::Stop);
        }

        if self.written >= self.budget {
            log::info!("Frame budget of {} reached, closing output", self.budget);
            self.close()?;
            return Ok(SinkStatus::Stop);
        }

        let Some(format) = frame.format().filter(|format| format.is_sink_writable()) else {
            self.unsupported += 1;
            log::warn!(
                "Dropping {}x{} frame: unsupported pixel format {}",
                frame.width(),
                frame.height(),
                frame
                    .format()
                    .map_or_else(|| "unknown".to_string(), |format| format.to_string())
            );
            return Ok(SinkStatus::Continue);
        };

        let Some(writer) = self.writer.as_mut() else {
            return Ok(SinkStatus::Stop);
        };
        let bytes = write_planes(frame, format, writer)?;
        self.written += 1;
        log::debug!(
            "Wrote frame {}/{} ({bytes} bytes, {format})",
            self.written,
            self.budget
        );

        Ok(SinkStatus::Continue)
    }

    /// Flush and release the writer. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Io`] if the final flush fails.
    pub fn close(&mut self) -> Result<(), FrameDumpError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            log::debug!("Closed output after {} frames", self.written);
        }
        Ok(())
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Frames dropped because of their pixel format.
    pub fn unsupported_frames(&self) -> u64 {
        self.unsupported
    }

    /// The frame budget.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Borrow the writer while the sink is open.
    pub fn get_ref(&self) -> Option<&W> {
        self.writer.as_ref()
    }
}

impl<W: Write, F: PlanarFrame + ?Sized> FrameConsumer<F> for FrameSink<W> {
    fn consume(&mut self, frame: &F) -> Result<SinkStatus, FrameDumpError> {
        self.write_frame(frame)
    }
}
