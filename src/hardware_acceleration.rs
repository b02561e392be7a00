//! Hardware device contexts for the generic decoder path.
//!
//! When a stream's codec has no dedicated hardware decoder available (see
//! [`preferred_hardware_decoder`](crate::preferred_hardware_decoder)), the
//! codec session falls back to FFmpeg's default decoder for the codec. With
//! the `hardware` feature enabled, that decoder can still offload work to a
//! GPU by attaching an FFmpeg hardware device context before it is opened.
//!
//! Frames decoded on a device live in GPU surfaces. They are copied back to
//! system memory before they reach the frame sink, which only understands
//! planar pictures in ordinary memory.
//!
//! Device setup is best effort: if the codec has no matching configuration
//! or the device cannot be created, decoding continues in software.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ptr;
use std::str::FromStr;

use ffmpeg_next::{codec::context::Context as CodecContext, frame::Video as VideoFrame};
use ffmpeg_sys_next::{
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX, AVBufferRef, AVCodec, AVHWDeviceType,
};

use crate::error::FrameDumpError;

/// How the generic decoder path uses hardware devices.
///
/// ```no_run
/// use framedump::{DecodeOptions, HardwareAccelerationMode, HardwareDeviceType};
///
/// let options = DecodeOptions::new("input.mkv", "out.yuv").with_hardware_acceleration(
///     HardwareAccelerationMode::Specific(HardwareDeviceType::Vaapi),
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareAccelerationMode {
    /// Use the first device type the codec supports.
    #[default]
    Auto,
    /// Never attach a device.
    Software,
    /// Use this device type only.
    Specific(HardwareDeviceType),
}

/// Device types a hardware context can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareDeviceType {
    /// NVIDIA CUDA.
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox.
    VideoToolbox,
    /// Intel Quick Sync Video.
    Qsv,
}

const DEVICE_TYPES: [HardwareDeviceType; 6] = [
    HardwareDeviceType::Cuda,
    HardwareDeviceType::Vaapi,
    HardwareDeviceType::Dxva2,
    HardwareDeviceType::D3d11va,
    HardwareDeviceType::VideoToolbox,
    HardwareDeviceType::Qsv,
];

impl HardwareDeviceType {
    fn as_av_type(self) -> AVHWDeviceType {
        match self {
            HardwareDeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareDeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareDeviceType::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HardwareDeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HardwareDeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HardwareDeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
        }
    }

    fn from_av_type(device_type: AVHWDeviceType) -> Option<Self> {
        DEVICE_TYPES
            .into_iter()
            .find(|candidate| candidate.as_av_type() == device_type)
    }

    /// Lowercase name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2",
            HardwareDeviceType::D3d11va => "d3d11va",
            HardwareDeviceType::VideoToolbox => "videotoolbox",
            HardwareDeviceType::Qsv => "qsv",
        }
    }
}

impl Display for HardwareDeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareAccelerationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "auto" => Ok(HardwareAccelerationMode::Auto),
            "software" | "sw" | "cpu" => Ok(HardwareAccelerationMode::Software),
            other => DEVICE_TYPES
                .into_iter()
                .find(|device| device.name() == other)
                .map(HardwareAccelerationMode::Specific)
                .ok_or_else(|| format!("unsupported hardware mode: {value}")),
        }
    }
}

/// Device types compiled into the linked FFmpeg build.
pub fn available_hardware_devices() -> Vec<HardwareDeviceType> {
    let mut devices = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(device) = HardwareDeviceType::from_av_type(device_type) {
            devices.push(device);
        }
    }

    devices
}

/// Device types `codec` can decode on through a device context, in the
/// codec's order of preference.
fn codec_device_types(codec: *const AVCodec) -> Vec<AVHWDeviceType> {
    let mut types = Vec::new();
    if codec.is_null() {
        return types;
    }

    let mut index = 0;
    loop {
        let config = unsafe { ffmpeg_sys_next::avcodec_get_hw_config(codec, index) };
        if config.is_null() {
            break;
        }
        let (methods, device_type) = unsafe { ((*config).methods, (*config).device_type) };
        if methods & (AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
            && device_type != AVHWDeviceType::AV_HWDEVICE_TYPE_NONE
        {
            types.push(device_type);
        }
        index += 1;
    }

    types
}

/// Attach a hardware device context to an unopened decoder context.
///
/// Returns the device type in use, or `None` when decoding stays in
/// software.
pub(crate) fn attach_device_context(
    context: &mut CodecContext,
    mode: HardwareAccelerationMode,
) -> Option<AVHWDeviceType> {
    let supported = codec_device_types(unsafe { (*context.as_ptr()).codec });

    let device_type = match mode {
        HardwareAccelerationMode::Software => return None,
        HardwareAccelerationMode::Auto => supported.first().copied(),
        HardwareAccelerationMode::Specific(device) => {
            let wanted = device.as_av_type();
            supported.contains(&wanted).then_some(wanted)
        }
    };
    let Some(device_type) = device_type else {
        log::debug!("Codec has no usable hardware configuration for {mode:?}");
        return None;
    };

    let mut device: *mut AVBufferRef = ptr::null_mut();
    let result = unsafe {
        ffmpeg_sys_next::av_hwdevice_ctx_create(
            &mut device,
            device_type,
            ptr::null(),
            ptr::null_mut(),
            0,
        )
    };
    if result < 0 {
        log::warn!(
            "Could not create {device_type:?} device ({}), decoding in software",
            ffmpeg_next::Error::from(result)
        );
        return None;
    }

    unsafe {
        let raw = context.as_mut_ptr();
        (*raw).hw_device_ctx = ffmpeg_sys_next::av_buffer_ref(device);
        // The codec context holds its own reference now.
        ffmpeg_sys_next::av_buffer_unref(&mut device);
    }
    log::info!("Attached {device_type:?} hardware device to the decoder");

    Some(device_type)
}

/// Whether `frame` lives in a hardware surface.
pub(crate) fn is_hardware_frame(frame: &VideoFrame) -> bool {
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

/// Copy a hardware surface into a frame in system memory.
///
/// Frame properties, including the corrupt flag, are carried over.
pub(crate) fn transfer_to_system_memory(
    hardware_frame: &VideoFrame,
) -> Result<VideoFrame, FrameDumpError> {
    let mut frame = VideoFrame::empty();

    let result = unsafe {
        ffmpeg_sys_next::av_hwframe_transfer_data(frame.as_mut_ptr(), hardware_frame.as_ptr(), 0)
    };
    if result < 0 {
        return Err(FrameDumpError::Protocol(format!(
            "Hardware frame transfer failed: {}",
            ffmpeg_next::Error::from(result)
        )));
    }

    let result = unsafe {
        ffmpeg_sys_next::av_frame_copy_props(frame.as_mut_ptr(), hardware_frame.as_ptr())
    };
    if result < 0 {
        return Err(FrameDumpError::Protocol(format!(
            "Copying hardware frame properties failed: {}",
            ffmpeg_next::Error::from(result)
        )));
    }

    Ok(frame)
}
