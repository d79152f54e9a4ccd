use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A CUDA event reported an invalid thread id")]
    InvalidThreadId,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Request cannot be satisfied. CUDA focus unchanged.")]
    UnsatisfiableFocus,

    #[error("Focus is not set on any active CUDA device")]
    NoCurrentDevice,

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Unrecognized option: {0}")]
    UnrecognizedOption(String),

    #[error("Device {0} is in use by a display and cannot be debugged")]
    GpuBusy(u32),

    #[error("Internal debugger error (code {0})")]
    CoreFatal(u64),

    #[error("Debug API Error: {0}")]
    Api(String),
}

// A convenient alias
pub type Result<T> = std::result::Result<T, Error>;
