use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use framedump::{
    ConversionSettings, CropRect, DecodeOptions, DecodeWorker, EndReason, FfmpegLogLevel,
    FlipMode, FrameDumpError, Interpolation, JpegEncoder, JpegSettings, MediaKind, MediaSession,
    PictureConverter, PictureParams, PixelFormat, ProgressCallback, ProgressInfo, RetryPolicy,
    SoftwareConverter, SoftwareJpegEncoder, StreamSource, preferred_hardware_decoder,
};

#[cfg(feature = "hardware")]
use framedump::HardwareAccelerationMode;

const CLI_AFTER_HELP: &str = "Examples:\n  framedump decode -i input.mp4 -o frames.yuv -c 10\n  framedump decode -i rtsp://10.0.0.7/live -o camera.yuv -c 250 --retry-limit 50 --progress\n  framedump probe input.mp4 --json\n  framedump convert -i frames.yuv -o small.rgba -s 1920,1080,yuv420 -c 640,360,rgba\n  framedump jpeg -i frames.yuv -o frame.jpg -w 1920 -h 1080\n  framedump completions zsh > _framedump";

#[derive(Debug, Parser)]
#[command(
    name = "framedump",
    version,
    about = "Decode video streams and dump raw frames, convert and encode pictures",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Hardware device for fallback decoders (auto, software, cuda, vaapi, dxva2, d3d11va, videotoolbox, qsv).
    #[arg(long, global = true)]
    hardware: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode the first video stream and write raw frames.
    #[command(
        about = "Decode a stream into raw YUV frames",
        after_help = "Examples:\n  framedump decode -i input.mp4 -o frames.yuv -c 10\n  framedump decode -i rtsp://camera/live -o live.yuv -c 100 --rtsp-timeout 5"
    )]
    Decode {
        /// Input media path or URL.
        #[arg(short, long)]
        input: String,
        /// Output file for the raw frames.
        #[arg(short, long)]
        output: PathBuf,
        /// Number of frames to write.
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        count: u64,
        /// Give up after this many consecutive failed reads (unlimited when omitted).
        #[arg(long)]
        retry_limit: Option<u32>,
        /// Connection timeout for rtsp: inputs, in seconds.
        #[arg(long, default_value_t = 10.0)]
        rtsp_timeout: f64,
    },

    /// List the streams of a container.
    #[command(about = "Print stream information", visible_alias = "info")]
    Probe {
        /// Input media path or URL.
        input: String,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert a raw picture between formats and sizes.
    #[command(
        about = "Convert a raw picture",
        after_help = "Examples:\n  framedump convert -i in.yuv -o out.nv12 -s 1920,1080,yuv420 -c 1280,720,nv12\n  framedump convert -i in.yuv -o out.rgba -s 1920,1080,yuv420 -c 1080,1920,rgba --flip rotate90"
    )]
    Convert {
        /// Raw input picture file.
        #[arg(short, long)]
        input: PathBuf,
        /// Output picture file.
        #[arg(short, long)]
        output: PathBuf,
        /// Input picture: width,height,format.
        #[arg(short, long, value_parser = parse_picture_params)]
        source: PictureParams,
        /// Output picture: width,height,format.
        #[arg(short, long, value_parser = parse_picture_params)]
        converted: PictureParams,
        /// Crop rectangle in the source: x,y,width,height.
        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropRect>,
        /// Orientation change (none, rotate90, rotate180, rotate270, flipx, flipy, transpose, inverse-transpose).
        #[arg(long, default_value = "none", value_parser = parse_flip)]
        flip: FlipMode,
        /// Scaling filter (default, nearest, bilinear, five-tap, ten-tap, smart, nicest).
        #[arg(long, default_value = "default", value_parser = parse_interpolation)]
        interpolation: Interpolation,
        /// Which picture of a multi-picture input to convert.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },

    /// Encode a raw picture as JPEG.
    #[command(
        about = "Encode a raw picture as JPEG",
        disable_help_flag = true,
        after_help = "Examples:\n  framedump jpeg -i frame.yuv -o frame.jpg -w 1920 -h 1080\n  framedump jpeg -i frames.nv12 -o small.jpg -w 1920 -h 1080 --format nv12 --scale 480,270 --quality 90"
    )]
    Jpeg {
        /// Raw input picture file.
        #[arg(short, long)]
        input: PathBuf,
        /// Output JPEG file.
        #[arg(short, long)]
        output: PathBuf,
        /// Picture width.
        #[arg(short, long)]
        width: u32,
        /// Picture height.
        #[arg(short, long)]
        height: u32,
        /// Input pixel format.
        #[arg(long, default_value = "yuv420")]
        format: PixelFormat,
        /// Output size: width,height.
        #[arg(long, value_parser = parse_size)]
        scale: Option<(u32, u32)>,
        /// Crop rectangle: x,y,width,height.
        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropRect>,
        /// JPEG quality 1-100 (0 selects the default).
        #[arg(short, long, default_value_t = 0)]
        quality: u8,
        /// Which picture of a multi-picture input to encode.
        #[arg(long, default_value_t = 0)]
        index: usize,
        /// Print help.
        #[arg(long, action = ArgAction::Help)]
        help: Option<bool>,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_numbers(value: &str, expected: usize) -> Result<Vec<u32>, String> {
    let numbers = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid number '{part}' in '{value}'"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if numbers.len() != expected {
        return Err(format!(
            "expected {expected} comma-separated numbers, got '{value}'"
        ));
    }
    Ok(numbers)
}

fn parse_picture_params(value: &str) -> Result<PictureParams, String> {
    let (size, format) = value
        .rsplit_once(',')
        .ok_or_else(|| format!("expected width,height,format, got '{value}'"))?;
    let numbers = parse_numbers(size, 2)?;
    let format = format.parse::<PixelFormat>()?;
    Ok(PictureParams::new(format, numbers[0], numbers[1]))
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let numbers = parse_numbers(value, 2)?;
    Ok((numbers[0], numbers[1]))
}

fn parse_crop(value: &str) -> Result<CropRect, String> {
    let numbers = parse_numbers(value, 4)?;
    Ok(CropRect::new(numbers[0], numbers[1], numbers[2], numbers[3]))
}

fn parse_flip(value: &str) -> Result<FlipMode, String> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "none" => Ok(FlipMode::None),
        "rotate90" | "90" => Ok(FlipMode::Rotate90),
        "rotate180" | "180" => Ok(FlipMode::Rotate180),
        "rotate270" | "270" => Ok(FlipMode::Rotate270),
        "flipx" | "hflip" => Ok(FlipMode::FlipX),
        "flipy" | "vflip" => Ok(FlipMode::FlipY),
        "transpose" => Ok(FlipMode::Transpose),
        "inverse-transpose" | "transverse" => Ok(FlipMode::InverseTranspose),
        _ => Err(format!("unsupported flip mode: {value}")),
    }
}

fn parse_interpolation(value: &str) -> Result<Interpolation, String> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "default" => Ok(Interpolation::Default),
        "nearest" => Ok(Interpolation::Nearest),
        "bilinear" => Ok(Interpolation::Bilinear),
        "five-tap" | "bicubic" => Ok(Interpolation::FiveTap),
        "ten-tap" | "lanczos" => Ok(Interpolation::TenTap),
        "smart" => Ok(Interpolation::Smart),
        "nicest" => Ok(Interpolation::Nicest),
        _ => Err(format!("unsupported interpolation: {value}")),
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Read picture `index` of `size` bytes from a file of back-to-back pictures.
fn read_picture(path: &Path, size: usize, index: usize) -> Result<Vec<u8>, FrameDumpError> {
    if size == 0 {
        return Err(FrameDumpError::InvalidPicture(
            "picture size is zero bytes".to_string(),
        ));
    }
    let out_of_range = || {
        FrameDumpError::InvalidPicture(format!(
            "picture {index} of {size} bytes lies beyond any addressable offset"
        ))
    };
    let start = index.checked_mul(size).ok_or_else(out_of_range)?;
    let end = start.checked_add(size).ok_or_else(out_of_range)?;

    let data = fs::read(path)?;
    let picture = data.get(start..end).ok_or_else(|| {
        FrameDumpError::InvalidPicture(format!(
            "{} holds {} bytes, picture {index} needs bytes {start}..{end}",
            path.display(),
            data.len()
        ))
    })?;
    if data.len() % size != 0 {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!(
                "{} is not a whole number of {size}-byte pictures",
                path.display()
            )
            .yellow()
        );
    }
    Ok(picture.to_vec())
}

fn init_logging(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    let ffmpeg_level = match &global.log_level {
        Some(level) => level
            .parse::<FfmpegLogLevel>()
            .map_err(|_| format!("unsupported --log-level: {level}"))?,
        None => FfmpegLogLevel::for_filter(default_filter),
    };
    framedump::set_ffmpeg_log_level(ffmpeg_level);

    #[cfg(not(feature = "hardware"))]
    if global.hardware.is_some() {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "--hardware requires building with the `hardware` feature".yellow()
        );
    }

    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(budget: u64) -> Self {
        let bar = ProgressBar::new(budget);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.frames_written);
        self.bar
            .set_message(format!("{} packets, {} KiB", info.packets, info.bytes / 1024));
    }
}

fn decode_options(
    global: &GlobalOptions,
    input: String,
    output: &Path,
    count: u64,
    retry_limit: Option<u32>,
    rtsp_timeout: f64,
) -> Result<(DecodeOptions, Option<ProgressBar>), Box<dyn std::error::Error>> {
    if !rtsp_timeout.is_finite() || rtsp_timeout <= 0.0 {
        return Err(format!("--rtsp-timeout must be positive, got {rtsp_timeout}").into());
    }

    let retry_policy = retry_limit.map_or_else(RetryPolicy::unlimited, RetryPolicy::limited);
    let mut options = DecodeOptions::new(input, output)
        .with_frame_count(count)
        .with_network_timeout(Duration::from_secs_f64(rtsp_timeout))
        .with_retry_policy(retry_policy);

    #[cfg(feature = "hardware")]
    if let Some(hardware) = &global.hardware {
        let mode = hardware.parse::<HardwareAccelerationMode>()?;
        options = options.with_hardware_acceleration(mode);
    }

    let mut bar = None;
    if global.progress {
        let progress = TerminalProgress::new(count);
        bar = Some(progress.bar.clone());
        options = options.with_progress(Arc::new(progress));
    }

    Ok((options, bar))
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global)?;

    match cli.command {
        Commands::Decode {
            input,
            output,
            count,
            retry_limit,
            rtsp_timeout,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;
            let (options, bar) =
                decode_options(&cli.global, input, &output, count, retry_limit, rtsp_timeout)?;

            let session = MediaSession::open(&options)?;
            eprintln!(
                "{} {} with {}",
                "decoding".cyan().bold(),
                options.input(),
                session.decoder().selection()
            );
            let report = DecodeWorker::spawn(session)?.join()?;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }

            if report.frames_written < count {
                let why = match report.end {
                    EndReason::Stopped => "stopped early",
                    _ => "stream ended",
                };
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("{why}: wrote {} of {count} frames", report.frames_written).yellow()
                );
            }
            if report.corrupt_packets + report.corrupt_frames + report.unsupported_frames > 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!(
                        "dropped {} corrupt packets, {} corrupt frames, {} unsupported frames",
                        report.corrupt_packets, report.corrupt_frames, report.unsupported_frames
                    )
                    .yellow()
                );
            }
            println!(
                "{} {} ({} frames, {} packets, {} bytes in {:.2}s)",
                "saved".green().bold(),
                output.display(),
                report.frames_written,
                report.packets,
                report.bytes,
                report.elapsed.as_secs_f64()
            );
        }
        Commands::Probe { input, json } => {
            let options = DecodeOptions::new(input.as_str(), "");
            let mut source = StreamSource::open(&input, &options)?;
            let streams = source.streams();
            let format = source.format_name().unwrap_or_default();

            if json {
                let payload = json!({
                    "input": input,
                    "format": format,
                    "streams": streams.iter().map(|stream| json!({
                        "index": stream.index,
                        "kind": format!("{:?}", stream.kind).to_lowercase(),
                        "codec": format!("{:?}", stream.codec_id).to_lowercase(),
                        "width": stream.width,
                        "height": stream.height,
                        "bit_rate": stream.bit_rate,
                        "hardware_decoder": preferred_hardware_decoder(stream.codec_id),
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Input: {input} ({format})");
                for stream in &streams {
                    match stream.kind {
                        MediaKind::Video => println!(
                            "  #{} video {:?} {}x{} {} kb/s (hardware decoder: {})",
                            stream.index,
                            stream.codec_id,
                            stream.width,
                            stream.height,
                            stream.bit_rate / 1000,
                            preferred_hardware_decoder(stream.codec_id).unwrap_or("none")
                        ),
                        kind => println!(
                            "  #{} {kind:?} {:?} {} kb/s",
                            stream.index,
                            stream.codec_id,
                            stream.bit_rate / 1000
                        ),
                    }
                }
            }
            source.close();
        }
        Commands::Convert {
            input,
            output,
            source,
            converted,
            crop,
            flip,
            interpolation,
            index,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;
            let size = source
                .raw_size()
                .ok_or("JPEG is not a supported input format")?;
            let picture = read_picture(&input, size, index)?;

            let mut settings = ConversionSettings::new(source, converted)
                .with_flip(flip)
                .with_interpolation(interpolation);
            if let Some(crop) = crop {
                settings = settings.with_crop(crop);
            }
            let mut converter = SoftwareConverter::new(settings)?;
            let result = converter.convert(&picture)?;

            fs::write(&output, &result)?;
            println!(
                "{} {} ({} bytes)",
                "saved".green().bold(),
                output.display(),
                result.len()
            );
        }
        Commands::Jpeg {
            input,
            output,
            width,
            height,
            format,
            scale,
            crop,
            quality,
            index,
            help: _,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;
            let size = format
                .raw_frame_size(width as usize, height as usize)
                .ok_or("JPEG is not a supported input format")?;
            let picture = read_picture(&input, size, index)?;

            let mut settings = JpegSettings::new(width, height)
                .with_format(format)
                .with_quality(quality);
            if let Some((scaled_width, scaled_height)) = scale {
                settings = settings.with_scale(scaled_width, scaled_height);
            }
            if let Some(crop) = crop {
                settings = settings.with_crop(crop);
            }
            let mut encoder = SoftwareJpegEncoder::new(settings)?;
            let jpeg = encoder.encode(&picture)?;

            fs::write(&output, &jpeg)?;
            println!(
                "{} {} ({} bytes)",
                "saved".green().bold(),
                output.display(),
                jpeg.len()
            );
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framedump", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picture_params_parse() {
        let params = parse_picture_params("1920,1080,nv12").unwrap();
        assert_eq!(params, PictureParams::new(PixelFormat::Nv12, 1920, 1080));
        assert!(parse_picture_params("1920,1080").is_err());
        assert!(parse_picture_params("1920,x,nv12").is_err());
        assert!(parse_picture_params("1920,1080,png").is_err());
    }

    #[test]
    fn crop_and_size_parse() {
        assert_eq!(parse_crop("8,16,320,240").unwrap(), CropRect::new(8, 16, 320, 240));
        assert!(parse_crop("8,16,320").is_err());
        assert_eq!(parse_size("640, 360").unwrap(), (640, 360));
    }

    #[test]
    fn flip_and_interpolation_aliases() {
        assert_eq!(parse_flip("rotate90").unwrap(), FlipMode::Rotate90);
        assert_eq!(parse_flip("inverse_transpose").unwrap(), FlipMode::InverseTranspose);
        assert!(parse_flip("sideways").is_err());
        assert_eq!(parse_interpolation("lanczos").unwrap(), Interpolation::TenTap);
        assert_eq!(parse_interpolation("default").unwrap(), Interpolation::Default);
    }

    #[test]
    fn decode_count_must_be_positive() {
        let parsed = Cli::try_parse_from(["framedump", "decode", "-i", "a.mp4", "-o", "a.yuv", "-c", "0"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["framedump", "decode", "-i", "a.mp4", "-o", "a.yuv"]);
        let Commands::Decode { count, .. } = parsed.unwrap().command else {
            panic!("expected decode");
        };
        assert_eq!(count, 1);
    }

    #[test]
    fn jpeg_uses_short_height_flag() {
        let parsed = Cli::try_parse_from([
            "framedump", "jpeg", "-i", "in.yuv", "-o", "out.jpg", "-w", "640", "-h", "480",
        ]);
        let Commands::Jpeg { width, height, .. } = parsed.unwrap().command else {
            panic!("expected jpeg");
        };
        assert_eq!((width, height), (640, 480));
    }

    #[test]
    fn picture_reads_reject_bad_geometry() {
        let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temporary_directory.path().join("pictures.raw");
        fs::write(&path, [1u8, 1, 2, 2, 3, 3]).unwrap();

        assert_eq!(read_picture(&path, 2, 1).unwrap(), vec![2, 2]);
        assert!(matches!(
            read_picture(&path, 0, 0),
            Err(FrameDumpError::InvalidPicture(_))
        ));
        assert!(matches!(
            read_picture(&path, 2, 3),
            Err(FrameDumpError::InvalidPicture(_))
        ));
        assert!(matches!(
            read_picture(&path, usize::MAX / 2 + 1, 2),
            Err(FrameDumpError::InvalidPicture(_))
        ));
        assert!(matches!(
            read_picture(&path, usize::MAX, 0),
            Err(FrameDumpError::InvalidPicture(_))
        ));
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
