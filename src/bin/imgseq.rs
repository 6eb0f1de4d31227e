use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use imgseq::encode::ffmpeg::{default_ffmpeg_bin, has_libx264, is_ffmpeg_available};
use imgseq::{
    CancelToken, EncodeRequest, EncodeResponse, EncodeSession, FrameSource, PixelFormat, Pipeline,
};

#[derive(Parser, Debug)]
#[command(name = "imgseq", version, about = "Encode a folder of images into an H.264 MP4")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a folder of images (requires `ffmpeg` with libx264).
    Encode(EncodeArgs),
    /// Run a JSON encode request and print the JSON response.
    Run(RunArgs),
    /// Print the frame order of a folder.
    List(ListArgs),
    /// Check that the ffmpeg encoder is usable.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    /// Folder of still images, encoded in file-name order.
    #[arg(long)]
    folder: PathBuf,

    /// Output MP4 path. Replaced if it exists.
    #[arg(long)]
    out: PathBuf,

    #[arg(long)]
    fps: u32,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// Average bitrate in bit/s.
    #[arg(long, default_value_t = imgseq::config::DEFAULT_BITRATE)]
    bitrate: u32,

    /// Seconds between keyframes.
    #[arg(long, default_value_t = imgseq::config::DEFAULT_KEYFRAME_INTERVAL_SECS)]
    keyframe_interval: u32,

    #[arg(long, value_enum, default_value_t = CliPixelFormat::Rgba)]
    pixel_format: CliPixelFormat,

    /// Background for transparent pixels, `#rrggbb`.
    #[arg(long)]
    background: Option<String>,

    /// Frames allowed to wait in the encoder queue.
    #[arg(long, default_value_t = imgseq::config::DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// ffmpeg binary (defaults to $IMGSEQ_FFMPEG, then `ffmpeg` on PATH).
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Request JSON file, or `-` for stdin.
    request: PathBuf,
}

#[derive(Parser, Debug)]
struct ListArgs {
    folder: PathBuf,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliPixelFormat {
    Rgba,
    Bgra,
}

impl From<CliPixelFormat> for PixelFormat {
    fn from(v: CliPixelFormat) -> Self {
        match v {
            CliPixelFormat::Rgba => PixelFormat::Rgba8,
            CliPixelFormat::Bgra => PixelFormat::Bgra8,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Encode(args) => cmd_encode(args),
        Command::Run(args) => cmd_run(args),
        Command::List(args) => cmd_list(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_encode(args: EncodeArgs) -> anyhow::Result<ExitCode> {
    let mut session = EncodeSession::new(args.folder, args.out, args.fps, args.width, args.height);
    session.bitrate = args.bitrate;
    session.keyframe_interval_secs = args.keyframe_interval;
    session.pixel_format = args.pixel_format.into();
    session.queue_depth = args.queue_depth;
    if let Some(bg) = args.background.as_deref() {
        session.background_rgba = imgseq::config::parse_hex_color(bg)?;
    }
    if let Some(bin) = args.ffmpeg {
        session.ffmpeg_bin = bin;
    }

    let (path, stats) = Pipeline::new().run_with_stats(&session, &CancelToken::new())?;
    eprintln!(
        "wrote {} ({} frames, {:.3}s, {} bytes)",
        path.display(),
        stats.samples,
        stats.duration_us as f64 / 1_000_000.0,
        stats.bytes
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let request = if args.request.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("read request from stdin")?;
        EncodeRequest::from_reader(buf.as_slice())
    } else {
        EncodeRequest::from_path(&args.request)
    };

    let result = request
        .and_then(EncodeRequest::into_session)
        .and_then(|session| Pipeline::new().run(&session, &CancelToken::new()));
    let response = EncodeResponse::from_result(&result);
    println!("{}", response.to_json()?);
    Ok(if response.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_list(args: ListArgs) -> anyhow::Result<ExitCode> {
    let source = FrameSource::list(&args.folder)?;
    for path in source.paths() {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<ExitCode> {
    let bin = args.ffmpeg.unwrap_or_else(default_ffmpeg_bin);
    if !is_ffmpeg_available(&bin) {
        eprintln!("ffmpeg not found at '{}'", bin.display());
        return Ok(ExitCode::FAILURE);
    }
    if !has_libx264(&bin) {
        eprintln!("'{}' has no libx264 encoder", bin.display());
        return Ok(ExitCode::FAILURE);
    }
    println!("ffmpeg: {} with libx264", bin.display());
    Ok(ExitCode::SUCCESS)
}
