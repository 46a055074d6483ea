//! Core library of the light engine.
//!
//! A fixed-period tick advances running lighting functions (scenes,
//! chasers, EFX patterns, RGB matrices), merges their channel values into
//! 512-channel universe buffers and flushes the buffers to output
//! transports through a patch table. Each module owns one stage of that
//! pipeline; [`Engine`] ties them together and [`EngineHandle`] runs it on
//! its own thread.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fade;
pub mod function;
pub mod patch;
pub mod record;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod universe;

pub use config::{EngineConfig, MergeMode};
pub use diagnostics::{Diagnostic, DiagnosticLog};
pub use error::{LightEngineError, Result};
pub use fade::FadeChannel;
pub use function::codec::{StepCodec, VariantStepCodec, XmlStepCodec};
pub use function::{
    Chaser, ChaserStep, Collection, Direction, Efx, Function, FunctionId, FunctionKind,
    FunctionRegistry, RgbMatrix, RunOrder, Scene, SceneValue, Timing, TimingOverride,
};
pub use patch::{
    OutputLine, OutputPatch, PatchInfo, PatchState, PatchTable, Transport, TransportError,
    TransportRegistry, INVALID_LINE, OUTPUT_NONE,
};
pub use record::{CaptureSettings, CaptureTransport};
pub use resolver::Contribution;
pub use runtime::{Instance, Phase, PhaseClock};
pub use scheduler::{
    Command, CommandQueue, Engine, EngineHandle, EngineStatus, RunningFunction, StartOptions,
    TickClock, TickSummary,
};
pub use universe::{Universe, UniverseArray, UniverseSnapshot, UNIVERSE_SIZE};
