//! `va-pool` command line tool.
//!
//! `probe` negotiates the configured stream format and prints what the pool
//! would allocate. `stress` pushes decoded frames through a pool to
//! consumer threads and reports how well surfaces were reused.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use va_core::config::{AllocatorKind, Settings};
use va_core::driver::{Codec, DecodePicture, MapFlags, ParamKind};
use va_core::logging::init_from_settings;
use va_core::{VideoFormat, VideoInfo};
use va_driver_mock::{MockConfig, MockDriver, MockHandle};
use va_pool::{decode, Allocator, Buffer, Display, PoolConfig, VaPool, VideoFrame};

/// Surface formats the mock device reports.
const SURFACE_FORMATS: [VideoFormat; 4] = [
    VideoFormat::Nv12,
    VideoFormat::P010,
    VideoFormat::Yuy2,
    VideoFormat::Rgba,
];

#[derive(Parser, Debug)]
#[command(name = "va-pool", version, about = "Probe and exercise the accelerator surface pool")]
struct Cli {
    /// Settings file (TOML). Missing files fall back to defaults.
    #[arg(short, long, default_value = "va-pool.toml")]
    config: PathBuf,

    /// Override the allocator from the settings file.
    #[arg(long, value_parser = parse_allocator)]
    allocator: Option<AllocatorKind>,

    /// Disable derived images in the mock driver, forcing the copy path.
    #[arg(long)]
    no_derive: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate the stream format and print the chosen layout.
    Probe {
        /// Image format, overriding the settings file.
        #[arg(long)]
        format: Option<VideoFormat>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Decode frames into pooled surfaces and hand them to consumers.
    Stress {
        #[arg(long, default_value_t = 300)]
        frames: usize,
        #[arg(long, default_value_t = 2)]
        consumers: usize,
        /// Simulated decode time per frame.
        #[arg(long, default_value_t = 2)]
        decode_ms: u64,
        /// Time each consumer holds a frame.
        #[arg(long, default_value_t = 3)]
        consume_ms: u64,
    },
}

fn parse_allocator(value: &str) -> Result<AllocatorKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "surface" => Ok(AllocatorKind::Surface),
        "dmabuf" => Ok(AllocatorKind::Dmabuf),
        other => Err(format!("unknown allocator '{other}' (surface | dmabuf)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(kind) = cli.allocator {
        settings.pool.allocator = kind;
    }
    init_from_settings(&settings).map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    let mock = MockConfig::default().with_derive(!cli.no_derive);
    match cli.command {
        Command::Probe {
            format,
            width,
            height,
        } => {
            let stream = &settings.stream;
            let info = VideoInfo::new(
                format.unwrap_or(stream.format),
                width.unwrap_or(stream.width),
                height.unwrap_or(stream.height),
            )?;
            probe(&settings, mock, &info)
        }
        Command::Stress {
            frames,
            consumers,
            decode_ms,
            consume_ms,
        } => {
            let mock = mock.with_decode_latency(Duration::from_millis(decode_ms));
            stress(
                &settings,
                mock,
                frames,
                consumers.max(1),
                Duration::from_millis(consume_ms),
            )
            .await
        }
    }
}

fn open(settings: &Settings, mock: MockConfig) -> (Allocator, MockHandle) {
    let driver = MockDriver::new(mock);
    let handle = driver.handle();
    let display = Display::new(driver);
    let vendor = display.vendor();
    info!(vendor = vendor, allocator = ?settings.pool.allocator, "Opened display");
    let allocator = Allocator::new(settings.pool.allocator, display, SURFACE_FORMATS.to_vec());
    (allocator, handle)
}

fn probe(settings: &Settings, mock: MockConfig, info: &VideoInfo) -> Result<()> {
    let (allocator, handle) = open(settings, mock);
    let committed = allocator
        .set_format(info, settings.pool.usage_hint)
        .with_context(|| format!("negotiating {} {}x{}", info.format, info.width, info.height))?;

    let strategy = match &allocator {
        Allocator::Surface(a) if a.uses_derived_images() == Some(true) => "derived (zero-copy)",
        Allocator::Surface(_) => "copied through an image",
        Allocator::Dmabuf(_) => "exported planes",
    };
    println!(
        "{} {}x{} via {:?} allocator: {strategy}",
        committed.format, committed.width, committed.height, settings.pool.allocator
    );
    println!("  frame size: {} bytes", committed.size);
    for plane in 0..committed.n_planes() {
        println!(
            "  plane {plane}: offset {:>8}  stride {:>6}",
            committed.offset[plane], committed.stride[plane]
        );
    }
    println!(
        "  driver calls: {} surfaces created, {} derives, {} exports",
        handle.surfaces_created(),
        handle.derive_calls(),
        handle.export_calls()
    );
    Ok(())
}

async fn stress(
    settings: &Settings,
    mock: MockConfig,
    frames: usize,
    consumers: usize,
    hold: Duration,
) -> Result<()> {
    let (allocator, handle) = open(settings, mock);
    let display = allocator.display().clone();
    let pool = VaPool::new(allocator);

    let stream = &settings.stream;
    let info = VideoInfo::new(stream.format, stream.width, stream.height)?;
    let applied = pool.set_config(PoolConfig::from_settings(&settings.pool, info))?;
    pool.start()?;
    let info = applied.info;

    let started = Instant::now();
    let mut senders = Vec::with_capacity(consumers);
    let mut workers = Vec::with_capacity(consumers);
    for id in 0..consumers {
        let (tx, mut rx) = mpsc::channel::<Buffer>(1);
        senders.push(tx);
        let info = info.clone();
        workers.push(tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut seen = 0usize;
            while let Some(buffer) = rx.blocking_recv() {
                let frame = VideoFrame::map(&buffer, &info, MapFlags::READ)?;
                let luma = frame.plane(0).map_or(0, |p| p.len());
                debug!(consumer = id, surface = ?buffer.surface(), luma, "Consumed frame");
                std::thread::sleep(hold);
                seen += 1;
            }
            Ok(seen)
        }));
    }

    let producer = {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for n in 0..frames {
                let buffer = pool.acquire()?;
                let mut picture = DecodePicture::new(Codec::H264);
                picture
                    .add_param(ParamKind::PictureParameter, (n as u32).to_le_bytes().to_vec())
                    .add_slice(Vec::<u8>::new(), format!("frame {n}").into_bytes());
                decode::submit(&display, &buffer, &picture)?;
                if senders[n % senders.len()].blocking_send(buffer).is_err() {
                    warn!(frame = n, "Consumer gone, stopping");
                    break;
                }
            }
            Ok(())
        })
    };

    producer.await??;
    let mut consumed = 0usize;
    for worker in workers {
        consumed += worker.await??;
    }
    let elapsed = started.elapsed();

    let created = handle.surfaces_created();
    let allocated = pool.allocated();
    pool.stop();
    info!(frames = consumed, created, ?elapsed, "Stress run finished");
    println!(
        "{consumed} frames in {:.2?} through {allocated} buffers; {created} surfaces created ({} decodes)",
        elapsed,
        handle.decodes().len()
    );
    Ok(())
}
