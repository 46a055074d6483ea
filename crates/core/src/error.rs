use crate::function::FunctionId;
use crate::patch::{OutputLine, TransportError};

/// Result alias that carries the custom [`LightEngineError`] type.
pub type Result<T> = std::result::Result<T, LightEngineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LightEngineError {
    /// Free-form message for conditions that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A configuration or show document could not be parsed.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
    /// A persisted step or step list could not be decoded.
    #[error("invalid step XML: {0}")]
    Xml(String),
    /// A caller handed the engine a value it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("no transport named `{0}` is registered")]
    UnknownTransport(String),
    #[error("transport `{transport}` has no output line {line}")]
    InvalidLine { transport: String, line: OutputLine },
    #[error("output line {line} of `{transport}` is already patched to universe {universe}")]
    LineInUse {
        transport: String,
        line: OutputLine,
        universe: usize,
    },
    #[error("universe {universe} is out of range (engine has {count})")]
    UniverseOutOfRange { universe: usize, count: usize },
    #[error("function {0} does not exist")]
    FunctionNotFound(FunctionId),
    /// Functions may only be edited or removed while no instance of them runs.
    #[error("function {0} is running and cannot be edited")]
    FunctionRunning(FunctionId),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0} lock has been poisoned")]
    Poisoned(&'static str),
    #[error("engine thread has stopped")]
    EngineStopped,
    /// Universe buffers could not be allocated. This is the only fatal
    /// condition of the engine.
    #[error("unable to allocate {0} universe buffers")]
    ResourceExhausted(usize),
}

impl LightEngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for LightEngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightEngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
