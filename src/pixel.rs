//! Pixel formats shared by the decode pipeline, the picture converter and
//! the JPEG encoder.
//!
//! Only [`PixelFormat::Yuv420`] and [`PixelFormat::Nv12`] can be written by
//! the raw frame sink. The remaining variants exist for the converter and
//! encoder contracts.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use ffmpeg_next::format::Pixel;

/// Closed set of raw picture layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar 4:2:0: `Y...U...V...`.
    Yuv420,
    /// Semi-planar 4:2:0 with interleaved `UV` chroma.
    Nv12,
    /// Semi-planar 4:2:0 with interleaved `VU` chroma.
    Nv21,
    /// Packed 4:2:2, `UYVY` byte order.
    Uyvy,
    /// Packed 4:2:2, `YUYV` byte order.
    Yuyv,
    /// Packed 4:2:2, `YVYU` byte order.
    Yvyu,
    /// Planar 4:4:4.
    Yuv444,
    /// Packed 32-bit, `B G R A` byte order.
    Abgr32,
    /// Packed 32-bit, `R G B X` byte order.
    Xrgb32,
    /// Packed 32-bit, `R G B A` byte order.
    Argb32,
    /// Packed 32-bit, `B G R X` byte order.
    Xbgr32,
    /// 8-bit grayscale.
    Gray8,
    /// Compressed JPEG. Only valid as a converter destination.
    Jpeg,
}

/// Geometry of one plane in a tightly packed picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Meaningful bytes per row.
    pub row_bytes: usize,
    /// Number of rows.
    pub rows: usize,
    /// Bytes per sample, used when rotating or flipping the plane.
    pub sample_bytes: usize,
}

impl PlaneLayout {
    const fn new(row_bytes: usize, rows: usize, sample_bytes: usize) -> Self {
        Self {
            row_bytes,
            rows,
            sample_bytes,
        }
    }

    /// Total packed size of the plane in bytes.
    pub fn len(&self) -> usize {
        self.row_bytes * self.rows
    }

    /// Returns `true` if the plane holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PixelFormat {
    /// Every format, in declaration order.
    pub const ALL: [PixelFormat; 13] = [
        PixelFormat::Yuv420,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Uyvy,
        PixelFormat::Yuyv,
        PixelFormat::Yvyu,
        PixelFormat::Yuv444,
        PixelFormat::Abgr32,
        PixelFormat::Xrgb32,
        PixelFormat::Argb32,
        PixelFormat::Xbgr32,
        PixelFormat::Gray8,
        PixelFormat::Jpeg,
    ];

    /// Whether the raw frame sink can serialize this format.
    pub fn is_sink_writable(self) -> bool {
        matches!(self, PixelFormat::Yuv420 | PixelFormat::Nv12)
    }

    /// Whether this is a packed 4:2:2 layout (two pixels per macropixel).
    pub fn is_packed_422(self) -> bool {
        matches!(
            self,
            PixelFormat::Uyvy | PixelFormat::Yuyv | PixelFormat::Yvyu
        )
    }

    /// Per-plane layout of a `width` x `height` picture.
    ///
    /// Chroma dimensions of 4:2:0 formats use truncating division, matching
    /// how the sink trims rows. Returns `None` for [`PixelFormat::Jpeg`].
    pub fn plane_layout(self, width: usize, height: usize) -> Option<Vec<PlaneLayout>> {
        let layout = match self {
            PixelFormat::Yuv420 => vec![
                PlaneLayout::new(width, height, 1),
                PlaneLayout::new(width / 2, height / 2, 1),
                PlaneLayout::new(width / 2, height / 2, 1),
            ],
            // Interleaved chroma keeps the full row width.
            PixelFormat::Nv12 | PixelFormat::Nv21 => vec![
                PlaneLayout::new(width, height, 1),
                PlaneLayout::new(width, height / 2, 2),
            ],
            PixelFormat::Uyvy | PixelFormat::Yuyv | PixelFormat::Yvyu => {
                vec![PlaneLayout::new(width * 2, height, 4)]
            }
            PixelFormat::Yuv444 => vec![PlaneLayout::new(width, height, 1); 3],
            PixelFormat::Abgr32
            | PixelFormat::Xrgb32
            | PixelFormat::Argb32
            | PixelFormat::Xbgr32 => vec![PlaneLayout::new(width * 4, height, 4)],
            PixelFormat::Gray8 => vec![PlaneLayout::new(width, height, 1)],
            PixelFormat::Jpeg => return None,
        };
        Some(layout)
    }

    /// Size in bytes of one tightly packed `width` x `height` picture.
    pub fn raw_frame_size(self, width: usize, height: usize) -> Option<usize> {
        self.plane_layout(width, height)
            .map(|planes| planes.iter().map(PlaneLayout::len).sum())
    }

    /// Map to the corresponding FFmpeg pixel format.
    pub(crate) fn to_ffmpeg_pixel(self) -> Option<Pixel> {
        let pixel = match self {
            PixelFormat::Yuv420 => Pixel::YUV420P,
            PixelFormat::Nv12 => Pixel::NV12,
            PixelFormat::Nv21 => Pixel::NV21,
            PixelFormat::Uyvy => Pixel::UYVY422,
            PixelFormat::Yuyv => Pixel::YUYV422,
            PixelFormat::Yvyu => Pixel::YVYU422,
            PixelFormat::Yuv444 => Pixel::YUV444P,
            PixelFormat::Abgr32 => Pixel::BGRA,
            PixelFormat::Xrgb32 => Pixel::RGBZ,
            PixelFormat::Argb32 => Pixel::RGBA,
            PixelFormat::Xbgr32 => Pixel::BGRZ,
            PixelFormat::Gray8 => Pixel::GRAY8,
            PixelFormat::Jpeg => return None,
        };
        Some(pixel)
    }

    /// Map from an FFmpeg pixel format, if it is one of ours.
    pub(crate) fn from_ffmpeg_pixel(pixel: Pixel) -> Option<Self> {
        let format = match pixel {
            Pixel::YUV420P => PixelFormat::Yuv420,
            Pixel::NV12 => PixelFormat::Nv12,
            Pixel::NV21 => PixelFormat::Nv21,
            Pixel::UYVY422 => PixelFormat::Uyvy,
            Pixel::YUYV422 => PixelFormat::Yuyv,
            Pixel::YVYU422 => PixelFormat::Yvyu,
            Pixel::YUV444P => PixelFormat::Yuv444,
            Pixel::BGRA => PixelFormat::Abgr32,
            Pixel::RGBZ => PixelFormat::Xrgb32,
            Pixel::RGBA => PixelFormat::Argb32,
            Pixel::BGRZ => PixelFormat::Xbgr32,
            Pixel::GRAY8 => PixelFormat::Gray8,
            _ => return None,
        };
        Some(format)
    }

    /// Short lowercase name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Yuv420 => "yuv420",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Nv21 => "nv21",
            PixelFormat::Uyvy => "uyvy",
            PixelFormat::Yuyv => "yuyv",
            PixelFormat::Yvyu => "yvyu",
            PixelFormat::Yuv444 => "yuv444",
            PixelFormat::Abgr32 => "bgra",
            PixelFormat::Xrgb32 => "rgbx",
            PixelFormat::Argb32 => "rgba",
            PixelFormat::Xbgr32 => "bgrx",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Jpeg => "jpeg",
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        let format = match lowered.as_str() {
            "yuv420" | "yuv420p" | "i420" => PixelFormat::Yuv420,
            "gray" | "grey" | "gray8" => PixelFormat::Gray8,
            "jpg" => PixelFormat::Jpeg,
            other => PixelFormat::ALL
                .into_iter()
                .find(|format| format.name() == other)
                .ok_or_else(|| format!("unknown pixel format: {value}"))?,
        };
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420_size_matches_plane_sum() {
        for (width, height) in [(2, 2), (640, 480), (1920, 1080), (176, 144)] {
            let expected = width * height + 2 * (width / 2) * (height / 2);
            assert_eq!(
                PixelFormat::Yuv420.raw_frame_size(width, height),
                Some(expected)
            );
        }
    }

    #[test]
    fn nv12_chroma_keeps_full_row_width() {
        let planes = PixelFormat::Nv12.plane_layout(1920, 1080).unwrap();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].row_bytes, 1920);
        assert_eq!(planes[1].rows, 540);
        assert_eq!(
            PixelFormat::Nv12.raw_frame_size(1920, 1080),
            Some(1920 * 1080 + 1920 * 540)
        );
    }

    #[test]
    fn only_planar_and_semi_planar_420_reach_the_sink() {
        let writable: Vec<_> = PixelFormat::ALL
            .into_iter()
            .filter(|format| format.is_sink_writable())
            .collect();
        assert_eq!(writable, vec![PixelFormat::Yuv420, PixelFormat::Nv12]);
    }

    #[test]
    fn jpeg_has_no_raw_layout() {
        assert!(PixelFormat::Jpeg.plane_layout(16, 16).is_none());
        assert!(PixelFormat::Jpeg.to_ffmpeg_pixel().is_none());
    }

    #[test]
    fn ffmpeg_mapping_is_consistent() {
        for format in PixelFormat::ALL {
            if let Some(pixel) = format.to_ffmpeg_pixel() {
                assert_eq!(PixelFormat::from_ffmpeg_pixel(pixel), Some(format));
            }
        }
        assert_eq!(PixelFormat::from_ffmpeg_pixel(Pixel::YUV420P10LE), None);
    }

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("nv12".parse::<PixelFormat>(), Ok(PixelFormat::Nv12));
        assert_eq!("YUV420".parse::<PixelFormat>(), Ok(PixelFormat::Yuv420));
        assert_eq!("bgra".parse::<PixelFormat>(), Ok(PixelFormat::Abgr32));
        assert_eq!("rgba".parse::<PixelFormat>(), Ok(PixelFormat::Argb32));
        assert!("p010".parse::<PixelFormat>().is_err());
    }
}
