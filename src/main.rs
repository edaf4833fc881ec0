use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, bounded};
use tracing_subscriber::EnvFilter;

use frame_ingest::config::StreamConfig;
use frame_ingest::pipeline::{
    DecodeBackend, FixedSurface, RenderSurface, TracingObserver, WindowHandle,
};
use frame_ingest::router::FrameRouter;
use frame_ingest::transport::WsConnector;

/// Receive a live H.264 stream over WebSocket and hand it to the decoder.
#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest a live H.264 WebSocket stream into a decode pipeline")]
#[command(long_about = "Connects to a streaming endpoint, strips the 16-byte frame header from every
message and pushes the payload into a decode pipeline. Reconnects automatically until
stopped. Type `stop` or close stdin to end the session.")]
struct Args {
    /// Stream label used in logs
    #[arg(help = "Stream label, e.g. heat or day")]
    stream_id: String,

    /// Endpoint URL
    #[arg(help = "ws:// or wss:// endpoint")]
    url: String,

    /// JSON configuration file
    #[arg(short, long, help = "JSON file with transport/pipeline settings")]
    config: Option<String>,

    /// Native window to render into
    #[arg(long, value_parser = parse_window_handle,
          help = "Native window handle (decimal or 0x-prefixed hex)")]
    window_handle: Option<u64>,

    /// Session length
    #[arg(short, long,
          help = "Stop after: 30s (30 seconds), 2m (2 minutes), 1h (1 hour)")]
    duration: Option<String>,

    /// Accept self-signed certificates (default)
    #[arg(long, conflicts_with = "verify_certs")]
    insecure: bool,

    /// Verify TLS certificates
    #[arg(long)]
    verify_certs: bool,

    /// Override the handshake User-Agent
    #[arg(long)]
    user_agent: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => StreamConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {path}"))?,
        None => StreamConfig::default(),
    };
    config.stream_id = args.stream_id.clone();
    config.url = args.url.clone();
    if let Some(agent) = &args.user_agent {
        config.user_agent = agent.clone();
    }
    if args.verify_certs {
        config.transport.accept_invalid_certs = false;
    } else if args.insecure {
        config.transport.accept_invalid_certs = true;
    }

    let duration = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|secs| Duration::from_secs(u64::from(secs)));

    let (backend, counters) = make_backend()?;
    let router = FrameRouter::new(
        &config,
        Box::new(WsConnector::new()),
        backend,
        Arc::new(TracingObserver),
    )?;

    let surface = args
        .window_handle
        .map(|handle| Arc::new(FixedSurface(WindowHandle(handle))) as Arc<dyn RenderSurface>);
    router.start(surface)?;

    wait_for_stop(duration);
    router.stop();

    let transport = router.transport().stats();
    println!(
        "{}: {} messages ({} bytes), {} frames routed, {} short dropped, {} reconnects",
        router.stream_id(),
        transport.messages_received,
        transport.bytes_received,
        router.frames_routed(),
        router.short_frames_dropped(),
        transport.reconnects_scheduled
    );
    if let Some((frames, bytes)) = counters {
        println!(
            "null backend consumed {} frames ({} bytes)",
            frames.load(Ordering::Relaxed),
            bytes.load(Ordering::Relaxed)
        );
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Frame and byte counters of the null backend.
type BackendCounters = Option<(Arc<AtomicU64>, Arc<AtomicU64>)>;

#[cfg(feature = "gstreamer-backend")]
fn make_backend() -> Result<(Box<dyn DecodeBackend>, BackendCounters)> {
    let backend = frame_ingest::pipeline::GstBackend::new().context("GStreamer unavailable")?;
    Ok((Box::new(backend), None))
}

#[cfg(not(feature = "gstreamer-backend"))]
fn make_backend() -> Result<(Box<dyn DecodeBackend>, BackendCounters)> {
    tracing::warn!("built without gstreamer-backend; frames are counted, not decoded");
    let backend = frame_ingest::pipeline::NullBackend::new();
    let counters = (backend.frame_counter(), backend.byte_counter());
    Ok((Box::new(backend), Some(counters)))
}

/// Block until `duration` elapses, stdin closes, or a `stop` line is read.
fn wait_for_stop(duration: Option<Duration>) {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("stop") => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = stop_tx.send(());
    });

    match duration {
        Some(limit) => match stop_rx.recv_timeout(limit) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => tracing::info!("duration elapsed"),
        },
        None => {
            let _ = stop_rx.recv();
        }
    }
}

/// Session length in seconds from "45", "30s", "2m" or "1h".
fn parse_duration(duration: &str) -> Result<u32> {
    if let Ok(seconds) = duration.parse::<u32>() {
        return Ok(seconds);
    }

    let Some((split, unit)) = duration.char_indices().last() else {
        bail!("empty duration");
    };
    let number = &duration[..split];
    if number.is_empty() {
        bail!("invalid duration '{duration}': missing number");
    }
    let value: u32 = number
        .parse()
        .with_context(|| format!("invalid number in duration '{duration}'"))?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        other => bail!("invalid duration unit '{other}': use s, m or h"),
    };
    value
        .checked_mul(scale)
        .with_context(|| format!("duration '{duration}' is too long"))
}

fn parse_window_handle(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid window handle '{value}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45").unwrap(), 45);
        assert_eq!(parse_duration("30s").unwrap(), 30);
        assert_eq!(parse_duration("2m").unwrap(), 120);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow_and_multibyte_units() {
        assert!(parse_duration("2000000h").is_err());
        assert_eq!(parse_duration("1193046h").unwrap(), 1_193_046 * 3600);
        assert!(parse_duration("5é").is_err());
        assert!(parse_duration("é").is_err());
    }

    #[test]
    fn test_parse_window_handle() {
        assert_eq!(parse_window_handle("4194307").unwrap(), 4_194_307);
        assert_eq!(parse_window_handle("0x400003").unwrap(), 0x40_0003);
        assert!(parse_window_handle("window").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "ingest",
            "heat",
            "wss://sych.local/ws/ws_video_heat",
            "--duration",
            "2m",
            "--verify-certs",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.stream_id, "heat");
        assert_eq!(args.duration.as_deref(), Some("2m"));
        assert!(args.verify_certs);
        assert_eq!(args.verbose, 2);
    }
}
