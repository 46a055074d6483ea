use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use light_engine_core::function::codec::{decode_steps_xml, encode_steps_xml};
use light_engine_core::{
    ChaserStep, Engine, EngineConfig, EngineHandle, Function, FunctionId, LightEngineError,
    OutputLine, StartOptions, StepCodec, Transport, TransportError, VariantStepCodec,
    UNIVERSE_SIZE,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn main() -> light_engine_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            show,
            seconds,
        } => run_show(config.as_deref(), &show, seconds),
        Commands::Steps { input, to_xml } => convert_steps(&input, to_xml),
        Commands::Transports => list_transports(),
    }
}

/// A show file: function definitions, universe patches and the functions
/// to start once the engine runs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Show {
    functions: Vec<Function>,
    patches: Vec<ShowPatch>,
    start: Vec<ShowStart>,
}

#[derive(Debug, Deserialize)]
struct ShowPatch {
    universe: usize,
    transport: String,
    line: OutputLine,
}

#[derive(Debug, Deserialize)]
struct ShowStart {
    function: FunctionId,
    #[serde(flatten)]
    options: StartOptions,
}

fn run_show(config: Option<&Path>, show: &Path, seconds: f64) -> light_engine_core::Result<()> {
    let duration = play_time(seconds)?;
    let config = match config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let show: Show = serde_json::from_str(&std::fs::read_to_string(show)?)?;
    tracing::info!(
        functions = show.functions.len(),
        patches = show.patches.len(),
        seconds,
        "running show"
    );

    let mut engine = Engine::new(config)?;
    for transport in demo_transports() {
        engine.register_transport(transport)?;
    }
    for function in show.functions {
        engine.upsert_function(function)?;
    }
    for patch in &show.patches {
        engine.set_patch(patch.universe, Some(patch.transport.as_str()), patch.line)?;
    }

    let mut handle = EngineHandle::spawn(engine)?;
    for start in show.start {
        handle.start(start.function, start.options)?;
    }
    std::thread::sleep(duration);

    let status = handle.status()?;
    let diagnostics = handle.drain_diagnostics()?;
    handle.shutdown()?;

    for diagnostic in &diagnostics {
        tracing::warn!(%diagnostic, "diagnostic during show");
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn play_time(seconds: f64) -> light_engine_core::Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        LightEngineError::InvalidInput("--seconds must be a finite, non-negative number")
    })
}

/// Prints a `<Steps>` document as flat step lists, or the reverse when
/// `to_xml` is set.
fn convert_steps(input: &Path, to_xml: bool) -> light_engine_core::Result<()> {
    let raw = std::fs::read_to_string(input)?;
    if to_xml {
        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        let steps = values
            .iter()
            .map(|value| VariantStepCodec.decode(value))
            .collect::<light_engine_core::Result<Vec<ChaserStep>>>()?;
        println!("{}", encode_steps_xml(&steps)?);
        return Ok(());
    }

    let steps = decode_steps_xml(&raw)?;
    let encoded = steps
        .iter()
        .enumerate()
        .map(|(ordinal, step)| VariantStepCodec.encode(step, ordinal))
        .collect::<light_engine_core::Result<Vec<_>>>()?;
    tracing::debug!(count = encoded.len(), "decoded steps");
    println!("{}", serde_json::to_string_pretty(&encoded)?);
    Ok(())
}

fn list_transports() -> light_engine_core::Result<()> {
    for transport in demo_transports() {
        println!("{}", transport.name());
        for (line, output) in transport.outputs().iter().enumerate() {
            println!("  {line}: {output}");
        }
    }
    Ok(())
}

fn demo_transports() -> Vec<Arc<dyn Transport>> {
    vec![Arc::new(LogTransport::new("Log", 4))]
}

/// Transport that reports every frame through `tracing` instead of
/// driving hardware.
#[derive(Debug)]
struct LogTransport {
    name: String,
    lines: usize,
    frames: AtomicU64,
}

impl LogTransport {
    fn new(name: &str, lines: usize) -> Self {
        Self {
            name: name.to_string(),
            lines,
            frames: AtomicU64::new(0),
        }
    }
}

impl Transport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        (0..self.lines).map(|line| format!("Log {line}")).collect()
    }

    fn open(&self, line: OutputLine) -> Result<(), TransportError> {
        if line as usize >= self.lines {
            return Err(TransportError::Open {
                line,
                reason: "no such line".into(),
            });
        }
        tracing::info!(line, "log output opened");
        Ok(())
    }

    fn close(&self, line: OutputLine) {
        tracing::info!(line, "log output closed");
    }

    fn send(&self, line: OutputLine, frame: &[u8; UNIVERSE_SIZE]) -> Result<(), TransportError> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        let lit = frame.iter().filter(|v| **v > 0).count();
        tracing::debug!(line, frame = count, lit, head = ?&frame[..8], "frame");
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time lighting playback engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a show file on the engine thread for a fixed time.
    Run {
        /// Engine configuration (JSON). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Show file with functions, patches and start requests.
        #[arg(short, long)]
        show: PathBuf,
        /// How long to play before printing the final state.
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
    },
    /// Convert persisted chaser steps between XML and flat lists.
    Steps {
        /// `<Steps>` XML document, or a JSON array with `--to-xml`.
        input: PathBuf,
        /// Read flat JSON steps and print XML instead.
        #[arg(long)]
        to_xml: bool,
    },
    /// List the transports available to `run`.
    Transports,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_time_rejects_unusable_values() {
        assert_eq!(play_time(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(play_time(0.0).unwrap(), Duration::ZERO);
        for seconds in [f64::INFINITY, f64::NAN, -1.0, 1e30] {
            assert!(matches!(
                play_time(seconds),
                Err(LightEngineError::InvalidInput(_))
            ));
        }
    }
}
