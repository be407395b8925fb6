mod bridge;
mod config;
mod detector;
mod discovery;
mod indicator;
mod link;
mod platform;
mod sampler;
mod window;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use image::{GrayImage, Luma};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::bridge::{Bridge, ShutdownPause};
use crate::config::{
    BridgeConfig, BAUD_RATE, DEFAULT_FRACTION, DEFAULT_INTERVAL_MS, DEFAULT_LIMIT,
    DEFAULT_RETRY_MS, FLASH_PAYLOAD, INDICATOR_IDENTITY, TITLE_EXCLUDES, TITLE_MATCHES,
};
use crate::discovery::{PortCandidate, PortLister, SystemPorts};
use crate::indicator::{render_ascii, Frame, Indicator, IndicatorState, MAX_BRIGHTNESS, TICK};
use crate::link::{DeviceLink, SerialConnector};
use crate::platform::HostDesktop;
use crate::window::{select_window, Desktop, WindowRect};

#[derive(Parser, Debug)]
#[command(
    name = "activity-beacon",
    version,
    about = "Pulses a serial LED indicator whenever a communication app's window changes",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    watch: WatchArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the communication window and flash the indicator on activity (default)
    Watch(WatchArgs),
    /// List serial ports as JSON and mark the indicator
    Ports,
    /// List top-level windows as JSON and mark the one that would be monitored
    Windows,
    /// Play the indicator's throb animation on the terminal (one button press by default)
    Preview(PreviewArgs),
}

#[derive(Args, Debug, Clone)]
struct WatchArgs {
    /// Number of changed pixels to trigger event
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: u64,
    /// Fraction of window, from the top, to monitor (0.01 < f < 0.99)
    #[arg(long, default_value_t = DEFAULT_FRACTION, allow_negative_numbers = true)]
    fraction: f64,
    /// Sampling interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
    interval_ms: u64,
    /// Delay between device discovery / connect attempts in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_MS)]
    retry_ms: u64,
    /// Serial port to use instead of USB discovery
    #[arg(long)]
    port: Option<String>,
}

/// What starts the previewed throb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Trigger {
    /// The board's button
    Button,
    /// A `flash` line on the UART, as the bridge sends it
    Flash,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// What starts the throb
    #[arg(long, value_enum, default_value_t = Trigger::Button)]
    trigger: Trigger,
    /// Directory to write one PNG per rendered frame
    #[arg(long)]
    out: Option<PathBuf>,
    /// Pixels per LED in written PNGs
    #[arg(long, default_value_t = 16)]
    scale: u32,
    /// Print frames without waiting one tick between them
    #[arg(long)]
    no_delay: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => command_watch(cli.watch),
        Some(Commands::Watch(args)) => command_watch(args),
        Some(Commands::Ports) => command_ports(),
        Some(Commands::Windows) => command_windows(),
        Some(Commands::Preview(args)) => command_preview(args),
    }
}

fn command_watch(args: WatchArgs) -> Result<()> {
    let config = BridgeConfig::new(
        args.limit,
        args.fraction,
        args.interval_ms,
        args.retry_ms,
        args.port,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let shutdown = Arc::clone(&shutdown);
        move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        }
    })
    .context("failed to set Ctrl+C handler")?;

    let mut bridge = Bridge::new(
        config,
        HostDesktop::new(),
        SystemPorts,
        DeviceLink::new(SerialConnector, BAUD_RATE),
        ShutdownPause::new(shutdown),
    );
    bridge.run();
    Ok(())
}

#[derive(Debug, Serialize)]
struct PortRow {
    #[serde(flatten)]
    port: PortCandidate,
    matches_indicator: bool,
}

fn port_rows<L: PortLister>(lister: &mut L) -> Result<Vec<PortRow>> {
    Ok(lister
        .list_ports()?
        .into_iter()
        .map(|port| PortRow {
            matches_indicator: port.matches(&INDICATOR_IDENTITY),
            port,
        })
        .collect())
}

fn command_ports() -> Result<()> {
    let rows = port_rows(&mut SystemPorts)?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct WindowRow {
    title: String,
    #[serde(flatten)]
    rect: WindowRect,
    selected: bool,
}

fn window_rows<D: Desktop>(desktop: &mut D) -> Result<Vec<WindowRow>> {
    let windows = desktop.top_level_windows()?;
    let selected = select_window(&windows, TITLE_MATCHES, TITLE_EXCLUDES);

    Ok(windows
        .iter()
        .map(|window| WindowRow {
            title: window.title.clone(),
            rect: window.rect,
            selected: selected.is_some_and(|s| std::ptr::eq(s, window)),
        })
        .collect())
}

fn command_windows() -> Result<()> {
    let rows = window_rows(&mut HostDesktop::new())?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn command_preview(args: PreviewArgs) -> Result<()> {
    let frames = preview_frames(args.trigger);

    if let Some(dir) = args.out.as_deref() {
        for (n, frame) in frames.iter().enumerate() {
            let path = dir.join(format!("frame-{n:02}.png"));
            write_frame_png(frame, args.scale, &path)?;
        }
        log::info!("wrote {} frame(s) to {}", frames.len(), dir.display());
    }

    for (n, frame) in frames.iter().enumerate() {
        println!("frame {n}\n{}\n", render_ascii(frame));
        if !args.no_delay {
            thread::sleep(TICK);
        }
    }
    Ok(())
}

/// One trigger: the full throb plus the ready frame it settles on.
fn preview_frames(trigger: Trigger) -> Vec<Frame> {
    let mut indicator = Indicator::new();
    match trigger {
        Trigger::Button => indicator.set_button(true),
        Trigger::Flash => indicator.receive(FLASH_PAYLOAD),
    }
    let mut frames = vec![indicator.tick()];
    indicator.set_button(false);
    while indicator.state() != IndicatorState::IdleDisplay {
        frames.push(indicator.tick());
    }
    frames
}

fn write_frame_png(frame: &Frame, scale: u32, path: &Path) -> Result<()> {
    let scale = scale.max(1);
    let mut img = GrayImage::new(5 * scale, 5 * scale);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let row = (y / scale) as usize;
        let col = (x / scale) as usize;
        let level = u32::from(frame[row][col]);
        *pixel = Luma([(level * 255 / u32::from(MAX_BRIGHTNESS)) as u8]);
    }
    ensure_parent_dir(path)?;
    img.save(path)
        .with_context(|| format!("failed to save frame: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}
