//! Thin CLI wrapper driving the capture core's `CaptureEngine` (spec §6).
//!
//! Settings-file (`$SNGREPRC`) parsing, PCAP/WAV export and audio playback
//! are external collaborators this binary does not implement; flags for
//! them are still parsed so the surface matches, and unsupported ones log
//! a warning rather than silently doing nothing.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use sngrep_core::{CaptureConfig, CaptureEngine};
use sngrep_core::error::Error;

/// SIP/RTP capture core CLI.
#[derive(Parser, Debug)]
#[command(name = "sngrepcap", about = "SIP/RTP dialog and media stream capture")]
struct Cli {
    /// Read packets from a pcap file instead of a live device.
    #[arg(short = 'I', long = "input-file", value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// Also write captured packets to a pcap file (unsupported: export is
    /// outside this core's scope).
    #[arg(short = 'O', long = "output-file", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Capture live on the named device ("any" for every interface).
    #[arg(short = 'd', long = "device", value_name = "DEV")]
    device: Option<String>,

    /// Maximum number of concurrently retained dialogs.
    #[arg(short = 'l', long = "dialog-limit", value_name = "N")]
    dialog_limit: Option<usize>,

    /// Soft memory cap in bytes.
    #[arg(short = 'm', long = "memory-limit", value_name = "BYTES")]
    memory_limit: Option<u64>,

    /// Disable colored output (no-op here; the core carries no rendering).
    #[arg(short = 'c', long = "no-color")]
    no_color: bool,

    /// Listen for HEP3 packets on `addr:port`.
    #[arg(short = 'L', long = "hep-listen", value_name = "ADDR:PORT")]
    hep_listen: Option<String>,

    /// Forward captured packets as HEP3 to `addr:port` (unsupported: this
    /// core is an ingest point, not a HEP client).
    #[arg(short = 'H', long = "hep-send", value_name = "ADDR:PORT")]
    hep_send: Option<String>,

    /// Trailing arguments form a BPF filter expression. The core only
    /// accepts pre-assembled BPF bytecode (§9 open question); a textual
    /// expression here is logged and otherwise ignored.
    #[arg(trailing_var_arg = true)]
    bpf: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    if cli.output_file.is_some() {
        warn!("-O/--output-file is not supported by this build; packets will not be re-exported");
    }
    if cli.hep_send.is_some() {
        warn!("-H/--hep-send is not supported by this build; this core only ingests HEP");
    }
    if !cli.bpf.is_empty() {
        warn!(
            expression = %cli.bpf.join(" "),
            "BPF expression compilation is out of scope; pass pre-assembled bytecode via the library API instead"
        );
    }

    let mut config = CaptureConfig::default();
    if let Some(limit) = cli.dialog_limit {
        config.max_dialogs = limit;
    }
    if let Some(limit) = cli.memory_limit {
        config.memory_limit = limit;
    }

    let mut engine = CaptureEngine::new(config);

    let input = match open_input(&cli).await {
        Ok(input) => input,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };

    info!("capture started");
    let handle = engine.spawn_input("cli", input);

    tokio::select! {
        result = handle => {
            match result {
                Ok(Ok(())) => {
                    info!("capture finished");
                }
                Ok(Err(e)) => {
                    error!("capture failed: {e}");
                    engine.close().await;
                    return ExitCode::from(if e.is_open_failure() { 1 } else { 2 });
                }
                Err(e) => {
                    error!("capture task panicked: {e}");
                    engine.close().await;
                    return ExitCode::from(2);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    engine.close().await;
    let stats = engine.storage().stats();
    info!(
        calls = stats.call_count,
        messages = stats.message_count,
        "capture stopped"
    );
    ExitCode::from(0)
}

async fn open_input(cli: &Cli) -> Result<sngrep_core::capture::CaptureInput, Error> {
    if let Some(path) = &cli.input_file {
        return sngrep_core::capture::CaptureInput::open_file(path).await;
    }
    if let Some(addr) = &cli.hep_listen {
        return sngrep_core::capture::CaptureInput::open_hep(addr).await;
    }
    if let Some(device) = &cli.device {
        return sngrep_core::capture::CaptureInput::open_live(device.clone(), None);
    }
    Err(Error::InvalidConfig(
        "one of -I, -d or -L must be given".to_string(),
    ))
}
