//! Picture conversion: crop, scale, pixel format and orientation.
//!
//! [`PictureConverter`] takes a tightly packed source picture and returns a
//! freshly allocated buffer in the destination layout. [`SoftwareConverter`]
//! implements it with FFmpeg's swscale:
//!
//! 1. the source is unpacked into a full-resolution working picture
//!    (planar 4:4:4 for YUV and gray destinations, RGBA otherwise),
//! 2. the crop rectangle is cut out,
//! 3. the flip or rotation is applied,
//! 4. the result is scaled into the destination format and size.
//!
//! A [`PixelFormat::Jpeg`] destination hands the scaled RGB picture to the
//! JPEG encoder.
//!
//! # Example
//!
//! ```no_run
//! use framedump::{
//!     ConversionSettings, FlipMode, PictureConverter, PictureParams, PixelFormat,
//!     SoftwareConverter,
//! };
//!
//! let settings = ConversionSettings::new(
//!     PictureParams::new(PixelFormat::Nv12, 1920, 1080),
//!     PictureParams::new(PixelFormat::Argb32, 540, 960),
//! )
//! .with_flip(FlipMode::Rotate90);
//!
//! let mut converter = SoftwareConverter::new(settings)?;
//! let nv12 = vec![0u8; 1920 * 1080 * 3 / 2];
//! let rgba = converter.convert(&nv12)?;
//! assert_eq!(rgba.len(), 540 * 960 * 4);
//! # Ok::<(), framedump::FrameDumpError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};

use ffmpeg_next::{
    format::Pixel,
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};

use crate::error::FrameDumpError;
use crate::jpeg::{self, DEFAULT_JPEG_QUALITY};
use crate::pixel::PixelFormat;
use crate::sink::{PlanarFrame, write_planes};

/// Format and size of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureParams {
    /// Pixel layout of the buffer.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PictureParams {
    /// Describe a `width` x `height` picture in `format`.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    /// Packed size in bytes, `None` for JPEG.
    pub fn raw_size(&self) -> Option<usize> {
        self.format
            .raw_frame_size(self.width as usize, self.height as usize)
    }
}

/// A rectangle inside the source picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRect {
    /// A `width` x `height` rectangle whose top-left corner is `(x, y)`.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Orientation change applied after cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipMode {
    /// Keep the orientation.
    #[default]
    None,
    /// Rotate 90 degrees counter-clockwise.
    Rotate90,
    /// Rotate 180 degrees.
    Rotate180,
    /// Rotate 270 degrees counter-clockwise (90 degrees clockwise).
    Rotate270,
    /// Mirror left to right.
    FlipX,
    /// Mirror top to bottom.
    FlipY,
    /// Mirror across the top-left to bottom-right diagonal.
    Transpose,
    /// Mirror across the top-right to bottom-left diagonal.
    InverseTranspose,
}

impl FlipMode {
    /// Whether the output swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            FlipMode::Rotate90
                | FlipMode::Rotate270
                | FlipMode::Transpose
                | FlipMode::InverseTranspose
        )
    }

    /// Source pixel that lands at `(x, y)` of the transformed picture,
    /// for a source of `width` x `height`.
    pub(crate) fn source_coordinates(
        self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> (usize, usize) {
        match self {
            FlipMode::None => (x, y),
            FlipMode::Rotate90 => (width - 1 - y, x),
            FlipMode::Rotate180 => (width - 1 - x, height - 1 - y),
            FlipMode::Rotate270 => (y, height - 1 - x),
            FlipMode::FlipX => (width - 1 - x, y),
            FlipMode::FlipY => (x, height - 1 - y),
            FlipMode::Transpose => (y, x),
            FlipMode::InverseTranspose => (width - 1 - y, height - 1 - x),
        }
    }
}

/// Resampling filter used when scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Bilinear.
    #[default]
    Default,
    /// Nearest neighbour.
    Nearest,
    /// Bilinear.
    Bilinear,
    /// Bicubic.
    FiveTap,
    /// Lanczos.
    TenTap,
    /// Area averaging.
    Smart,
    /// Lanczos with accurate rounding and full chroma interpolation.
    Nicest,
}

impl Interpolation {
    fn scaling_flags(self) -> ScalingFlags {
        match self {
            Interpolation::Default | Interpolation::Bilinear => ScalingFlags::BILINEAR,
            Interpolation::Nearest => ScalingFlags::POINT,
            Interpolation::FiveTap => ScalingFlags::BICUBIC,
            Interpolation::TenTap => ScalingFlags::LANCZOS,
            Interpolation::Smart => ScalingFlags::AREA,
            Interpolation::Nicest => {
                ScalingFlags::LANCZOS | ScalingFlags::ACCURATE_RND | ScalingFlags::FULL_CHR_H_INT
            }
        }
    }
}

/// Everything a conversion needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSettings {
    /// Layout of the input buffer.
    pub source: PictureParams,
    /// Final format and size, after rotation.
    pub destination: PictureParams,
    /// Region of the source to convert. `None` takes the whole picture.
    pub crop: Option<CropRect>,
    /// Orientation change applied after cropping.
    pub flip: FlipMode,
    /// Filter used when scaling.
    pub interpolation: Interpolation,
    /// Used only for JPEG destinations. `0` selects the default of 75.
    pub jpeg_quality: u8,
}

impl ConversionSettings {
    /// Convert `source` into `destination` without crop, flip or custom
    /// filter.
    pub fn new(source: PictureParams, destination: PictureParams) -> Self {
        Self {
            source,
            destination,
            crop: None,
            flip: FlipMode::None,
            interpolation: Interpolation::Default,
            jpeg_quality: 0,
        }
    }

    /// Convert only `crop` of the source.
    #[must_use]
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Set the orientation change.
    #[must_use]
    pub fn with_flip(mut self, flip: FlipMode) -> Self {
        self.flip = flip;
        self
    }

    /// Set the scaling filter.
    #[must_use]
    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Set the JPEG quality used for JPEG destinations.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// The region of the source that is converted.
    pub fn effective_crop(&self) -> CropRect {
        self.crop
            .unwrap_or_else(|| CropRect::new(0, 0, self.source.width, self.source.height))
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    ///
    /// - [`FrameDumpError::UnsupportedConversion`] for a JPEG source or a
    ///   90 degree or diagonal transform involving packed 4:2:2.
    /// - [`FrameDumpError::InvalidPicture`] for empty or odd-sized
    ///   subsampled pictures and crops outside the source.
    /// - [`FrameDumpError::InvalidQuality`] for a JPEG quality above 100.
    pub fn validate(&self) -> Result<(), FrameDumpError> {
        if self.source.format == PixelFormat::Jpeg {
            return Err(FrameDumpError::UnsupportedConversion(
                "JPEG is only supported as a destination".to_string(),
            ));
        }
        check_dimensions("source", &self.source)?;
        check_dimensions("destination", &self.destination)?;

        if self.flip.swaps_dimensions()
            && (self.source.format.is_packed_422() || self.destination.format.is_packed_422())
        {
            return Err(FrameDumpError::UnsupportedConversion(format!(
                "{:?} is not available for packed 4:2:2 pictures",
                self.flip
            )));
        }

        let crop = self.effective_crop();
        let fits = crop.width > 0
            && crop.height > 0
            && crop.x.checked_add(crop.width).is_some_and(|right| right <= self.source.width)
            && crop.y.checked_add(crop.height).is_some_and(|bottom| bottom <= self.source.height);
        if !fits {
            return Err(FrameDumpError::InvalidPicture(format!(
                "crop {crop:?} does not fit a {}x{} source",
                self.source.width, self.source.height
            )));
        }

        if self.jpeg_quality > 100 {
            return Err(FrameDumpError::InvalidQuality(self.jpeg_quality));
        }

        Ok(())
    }
}

fn check_dimensions(role: &str, picture: &PictureParams) -> Result<(), FrameDumpError> {
    if picture.width == 0 || picture.height == 0 {
        return Err(FrameDumpError::InvalidPicture(format!(
            "{role} picture is empty ({}x{})",
            picture.width, picture.height
        )));
    }

    let (needs_even_width, needs_even_height) = match picture.format {
        PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21 => (true, true),
        format if format.is_packed_422() => (true, false),
        _ => (false, false),
    };
    if (needs_even_width && picture.width % 2 != 0)
        || (needs_even_height && picture.height % 2 != 0)
    {
        return Err(FrameDumpError::InvalidPicture(format!(
            "{role} {} picture needs even dimensions, got {}x{}",
            picture.format, picture.width, picture.height
        )));
    }

    Ok(())
}

/// Converts packed pictures from one layout to another.
pub trait PictureConverter {
    /// The settings this converter was built for.
    fn settings(&self) -> &ConversionSettings;

    /// Convert `source` into a newly allocated buffer.
    fn convert(&mut self, source: &[u8]) -> Result<Vec<u8>, FrameDumpError>;

    /// Convert `source` into `destination`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::InvalidPicture`] if `destination` is too
    /// small, plus anything [`convert`](Self::convert) returns.
    fn convert_into(
        &mut self,
        source: &[u8],
        destination: &mut [u8],
    ) -> Result<usize, FrameDumpError> {
        let converted = self.convert(source)?;
        let target = destination.get_mut(..converted.len()).ok_or_else(|| {
            FrameDumpError::InvalidPicture(format!(
                "destination holds {} bytes, conversion produced {}",
                destination.len(),
                converted.len()
            ))
        })?;
        target.copy_from_slice(&converted);
        Ok(converted.len())
    }

    /// Convert a decoded frame whose format and size match the source
    /// settings.
    fn convert_frame<F>(&mut self, frame: &F) -> Result<Vec<u8>, FrameDumpError>
    where
        F: PlanarFrame + ?Sized,
        Self: Sized,
    {
        let source = self.settings().source;
        let packed = pack_frame(frame, &source)?;
        self.convert(&packed)
    }
}

/// Serialize `frame` after checking it against `expected`.
pub(crate) fn pack_frame<F>(frame: &F, expected: &PictureParams) -> Result<Vec<u8>, FrameDumpError>
where
    F: PlanarFrame + ?Sized,
{
    let actual = PictureParams {
        format: frame.format().ok_or_else(|| {
            FrameDumpError::UnsupportedConversion("frame has an unknown pixel format".to_string())
        })?,
        width: frame.width(),
        height: frame.height(),
    };
    if actual != *expected {
        return Err(FrameDumpError::InvalidPicture(format!(
            "frame is {}x{} {}, expected {}x{} {}",
            actual.width,
            actual.height,
            actual.format,
            expected.width,
            expected.height,
            expected.format
        )));
    }

    let mut packed = Vec::with_capacity(expected.raw_size().unwrap_or_default());
    write_planes(frame, actual.format, &mut packed)?;
    Ok(packed)
}

/// A full-resolution picture whose planes all share the same geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Canvas {
    width: usize,
    height: usize,
    sample_bytes: usize,
    planes: Vec<Vec<u8>>,
}

impl Canvas {
    fn from_frame(frame: &VideoFrame, plane_count: usize, sample_bytes: usize) -> Self {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let row_bytes = width * sample_bytes;

        let planes = (0..plane_count)
            .map(|index| {
                let stride = frame.stride(index);
                let data = frame.data(index);
                let mut plane = Vec::with_capacity(row_bytes * height);
                for row in 0..height {
                    plane.extend_from_slice(&data[row * stride..row * stride + row_bytes]);
                }
                plane
            })
            .collect();

        Self {
            width,
            height,
            sample_bytes,
            planes,
        }
    }

    fn to_frame(&self, pixel: Pixel) -> VideoFrame {
        let mut frame = VideoFrame::new(pixel, self.width as u32, self.height as u32);
        let row_bytes = self.width * self.sample_bytes;

        for (index, plane) in self.planes.iter().enumerate() {
            let stride = frame.stride(index);
            let data = frame.data_mut(index);
            for row in 0..self.height {
                data[row * stride..row * stride + row_bytes]
                    .copy_from_slice(&plane[row * row_bytes..(row + 1) * row_bytes]);
            }
        }

        frame
    }

    fn crop(&self, rect: CropRect) -> Self {
        let (x, y) = (rect.x as usize, rect.y as usize);
        let (width, height) = (rect.width as usize, rect.height as usize);
        if (x, y, width, height) == (0, 0, self.width, self.height) {
            return self.clone();
        }

        let source_row = self.width * self.sample_bytes;
        let row_bytes = width * self.sample_bytes;
        let planes = self
            .planes
            .iter()
            .map(|plane| {
                let mut cropped = Vec::with_capacity(row_bytes * height);
                for row in y..y + height {
                    let start = row * source_row + x * self.sample_bytes;
                    cropped.extend_from_slice(&plane[start..start + row_bytes]);
                }
                cropped
            })
            .collect();

        Self {
            width,
            height,
            sample_bytes: self.sample_bytes,
            planes,
        }
    }

    fn transform(&self, flip: FlipMode) -> Self {
        if flip == FlipMode::None {
            return self.clone();
        }

        let (width, height) = if flip.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        let sample = self.sample_bytes;

        let planes = self
            .planes
            .iter()
            .map(|plane| {
                let mut out = vec![0; width * height * sample];
                for y in 0..height {
                    for x in 0..width {
                        let (sx, sy) = flip.source_coordinates(x, y, self.width, self.height);
                        let from = (sy * self.width + sx) * sample;
                        let to = (y * width + x) * sample;
                        out[to..to + sample].copy_from_slice(&plane[from..from + sample]);
                    }
                }
                out
            })
            .collect();

        Self {
            width,
            height,
            sample_bytes: sample,
            planes,
        }
    }
}

/// Working layout used between unpacking and the final scale.
#[derive(Debug, Clone, Copy)]
struct WorkingFormat {
    pixel: Pixel,
    planes: usize,
    sample_bytes: usize,
}

impl WorkingFormat {
    fn for_destination(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Abgr32
            | PixelFormat::Xrgb32
            | PixelFormat::Argb32
            | PixelFormat::Xbgr32
            | PixelFormat::Jpeg => WorkingFormat {
                pixel: Pixel::RGBA,
                planes: 1,
                sample_bytes: 4,
            },
            _ => WorkingFormat {
                pixel: Pixel::YUV444P,
                planes: 3,
                sample_bytes: 1,
            },
        }
    }
}

/// swscale-backed [`PictureConverter`].
pub struct SoftwareConverter {
    settings: ConversionSettings,
    working: WorkingFormat,
    unpack: ScalingContext,
    pack: ScalingContext,
    output_pixel: Pixel,
}

impl Debug for SoftwareConverter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SoftwareConverter")
            .field("settings", &self.settings)
            .field("working", &self.working.pixel)
            .finish()
    }
}

impl SoftwareConverter {
    /// Validate `settings` and prepare the scaling contexts.
    ///
    /// # Errors
    ///
    /// Anything [`ConversionSettings::validate`] reports, or
    /// [`FrameDumpError::Ffmpeg`] if swscale rejects the combination.
    pub fn new(settings: ConversionSettings) -> Result<Self, FrameDumpError> {
        settings.validate()?;
        ffmpeg_next::init()?;

        let source = settings.source;
        let destination = settings.destination;
        let working = WorkingFormat::for_destination(destination.format);

        let source_pixel = source.format.to_ffmpeg_pixel().ok_or_else(|| {
            FrameDumpError::UnsupportedConversion(format!("{} source", source.format))
        })?;
        // JPEG output is encoded from packed RGB.
        let output_pixel = destination.format.to_ffmpeg_pixel().unwrap_or(Pixel::RGB24);

        let crop = settings.effective_crop();
        let (working_width, working_height) = if settings.flip.swaps_dimensions() {
            (crop.height, crop.width)
        } else {
            (crop.width, crop.height)
        };

        let unpack = ScalingContext::get(
            source_pixel,
            source.width,
            source.height,
            working.pixel,
            source.width,
            source.height,
            ScalingFlags::POINT | ScalingFlags::ACCURATE_RND | ScalingFlags::FULL_CHR_H_INT,
        )?;
        let pack = ScalingContext::get(
            working.pixel,
            working_width,
            working_height,
            output_pixel,
            destination.width,
            destination.height,
            settings.interpolation.scaling_flags() | ScalingFlags::ACCURATE_RND,
        )?;

        log::debug!(
            "Converter {}x{} {} -> {}x{} {} (crop {crop:?}, {:?})",
            source.width,
            source.height,
            source.format,
            destination.width,
            destination.height,
            destination.format,
            settings.flip
        );

        Ok(Self {
            settings,
            working,
            unpack,
            pack,
            output_pixel,
        })
    }

    fn source_frame(&self, data: &[u8]) -> Result<VideoFrame, FrameDumpError> {
        let source = self.settings.source;
        let layout = source
            .format
            .plane_layout(source.width as usize, source.height as usize)
            .ok_or_else(|| FrameDumpError::UnsupportedConversion("JPEG source".to_string()))?;

        let expected: usize = layout.iter().map(|plane| plane.len()).sum();
        if data.len() != expected {
            return Err(FrameDumpError::InvalidPicture(format!(
                "{}x{} {} needs {expected} bytes, got {}",
                source.width,
                source.height,
                source.format,
                data.len()
            )));
        }

        let pixel = source.format.to_ffmpeg_pixel().unwrap_or(Pixel::None);
        let mut frame = VideoFrame::new(pixel, source.width, source.height);
        let mut offset = 0;
        for (index, plane) in layout.iter().enumerate() {
            let stride = frame.stride(index);
            let target = frame.data_mut(index);
            for row in 0..plane.rows {
                let from = offset + row * plane.row_bytes;
                target[row * stride..row * stride + plane.row_bytes]
                    .copy_from_slice(&data[from..from + plane.row_bytes]);
            }
            offset += plane.len();
        }

        Ok(frame)
    }
}

impl PictureConverter for SoftwareConverter {
    fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    fn convert(&mut self, source: &[u8]) -> Result<Vec<u8>, FrameDumpError> {
        let input = self.source_frame(source)?;

        let mut unpacked = VideoFrame::empty();
        self.unpack.run(&input, &mut unpacked)?;
        let canvas = Canvas::from_frame(&unpacked, self.working.planes, self.working.sample_bytes)
            .crop(self.settings.effective_crop())
            .transform(self.settings.flip);

        let working = canvas.to_frame(self.working.pixel);
        let mut output = VideoFrame::empty();
        self.pack.run(&working, &mut output)?;

        let destination = self.settings.destination;
        match PixelFormat::from_ffmpeg_pixel(self.output_pixel) {
            Some(format) => {
                let mut buffer = Vec::with_capacity(destination.raw_size().unwrap_or_default());
                write_planes(&output, format, &mut buffer)?;
                Ok(buffer)
            }
            None => {
                let rgb = Canvas::from_frame(&output, 1, 3)
                    .planes
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let quality = match self.settings.jpeg_quality {
                    0 => DEFAULT_JPEG_QUALITY,
                    quality => quality,
                };
                jpeg::encode_rgb(destination.width, destination.height, rgb, quality)
            }
        }
    }
}
