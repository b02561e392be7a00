//! Still-image JPEG encoding of raw pictures.
//!
//! [`SoftwareJpegEncoder`] runs the picture through a [`SoftwareConverter`]
//! (crop and scale into packed RGB) and compresses the result with the
//! `image` crate's baseline JPEG encoder.

use image::{RgbImage, codecs::jpeg::JpegEncoder as ImageJpegEncoder};

use crate::convert::{
    ConversionSettings, CropRect, PictureConverter, PictureParams, SoftwareConverter, pack_frame,
};
use crate::error::FrameDumpError;
use crate::pixel::PixelFormat;
use crate::sink::PlanarFrame;

/// Quality used when the settings ask for `0`.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Source geometry and output options for a JPEG encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegSettings {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Layout of the raw input. Defaults to [`PixelFormat::Yuv420`].
    pub format: PixelFormat,
    /// Output size; defaults to the crop size, or the source size.
    pub scale: Option<(u32, u32)>,
    /// Region of the source to encode.
    pub crop: Option<CropRect>,
    /// `1..=100`, or `0` for [`DEFAULT_JPEG_QUALITY`].
    pub quality: u8,
}

impl JpegSettings {
    /// Encode a `width` x `height` YUV 4:2:0 picture at the default quality.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Yuv420,
            scale: None,
            crop: None,
            quality: 0,
        }
    }

    /// Set the layout of the raw input.
    #[must_use]
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Scale the output to `width` x `height`.
    #[must_use]
    pub fn with_scale(mut self, width: u32, height: u32) -> Self {
        self.scale = Some((width, height));
        self
    }

    /// Encode only `crop` of the source.
    #[must_use]
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Set the quality, `0` for the default.
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Quality actually handed to the encoder.
    pub fn effective_quality(&self) -> u8 {
        match self.quality {
            0 => DEFAULT_JPEG_QUALITY,
            quality => quality,
        }
    }

    /// Width and height of the encoded image.
    pub fn output_dimensions(&self) -> (u32, u32) {
        self.scale
            .or_else(|| self.crop.map(|crop| (crop.width, crop.height)))
            .unwrap_or((self.width, self.height))
    }

    fn conversion(&self) -> ConversionSettings {
        let (width, height) = self.output_dimensions();
        let mut settings = ConversionSettings::new(
            PictureParams::new(self.format, self.width, self.height),
            PictureParams::new(PixelFormat::Jpeg, width, height),
        )
        .with_jpeg_quality(self.effective_quality());
        if let Some(crop) = self.crop {
            settings = settings.with_crop(crop);
        }
        settings
    }
}

/// Encodes raw pictures into JPEG byte streams.
pub trait JpegEncoder {
    fn settings(&self) -> &JpegSettings;

    /// Encode one tightly packed picture laid out as the settings describe.
    fn encode(&mut self, picture: &[u8]) -> Result<Vec<u8>, FrameDumpError>;

    /// Encode a decoded frame whose format and size match the settings.
    fn encode_frame<F>(&mut self, frame: &F) -> Result<Vec<u8>, FrameDumpError>
    where
        F: PlanarFrame + ?Sized,
        Self: Sized,
    {
        let settings = self.settings();
        let expected = PictureParams::new(settings.format, settings.width, settings.height);
        let packed = pack_frame(frame, &expected)?;
        self.encode(&packed)
    }
}

/// [`JpegEncoder`] backed by swscale and the `image` crate.
#[derive(Debug)]
pub struct SoftwareJpegEncoder {
    settings: JpegSettings,
    converter: SoftwareConverter,
}

impl SoftwareJpegEncoder {
    /// # Errors
    ///
    /// Returns [`FrameDumpError::InvalidQuality`] for a quality above 100,
    /// and any error [`SoftwareConverter::new`] reports for the geometry.
    pub fn new(settings: JpegSettings) -> Result<Self, FrameDumpError> {
        if settings.quality > 100 {
            return Err(FrameDumpError::InvalidQuality(settings.quality));
        }
        let converter = SoftwareConverter::new(settings.conversion())?;
        Ok(Self {
            settings,
            converter,
        })
    }
}

impl JpegEncoder for SoftwareJpegEncoder {
    fn settings(&self) -> &JpegSettings {
        &self.settings
    }

    fn encode(&mut self, picture: &[u8]) -> Result<Vec<u8>, FrameDumpError> {
        self.converter.convert(picture)
    }
}

/// Compress a packed RGB24 buffer.
pub(crate) fn encode_rgb(
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    quality: u8,
) -> Result<Vec<u8>, FrameDumpError> {
    let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        FrameDumpError::JpegEncode(format!("RGB buffer does not match {width}x{height}"))
    })?;

    let mut output = Vec::new();
    ImageJpegEncoder::new_with_quality(&mut output, quality).encode_image(&image)?;
    log::debug!("Encoded {width}x{height} JPEG at quality {quality}: {} bytes", output.len());
    Ok(output)
}
