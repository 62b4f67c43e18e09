use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Reasons a simulator instance could not be brought up.
#[derive(Debug)]
pub enum LaunchFailure {
    ExecutableNotFound { path: PathBuf },
    WorkerInUse { worker_id: u16 },
    WorkersExhausted { capacity: u16 },
    WorkerOutOfRange { worker_id: u16, capacity: u16 },
    InvalidWorker { worker_id: u16, base_port: u16 },
    PortUnavailable { port: u16, source: io::Error },
    Spawn { path: PathBuf, source: io::Error },
    HandshakeTimeout { timeout: Duration },
    ProcessExited { status: ExitStatus },
    Incompatible { unity_version: String, expected: String },
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LaunchFailure::ExecutableNotFound { path } => {
                write!(formatter, "no simulator build found at {}", path.display())
            }
            LaunchFailure::WorkerInUse { worker_id } => {
                write!(formatter, "worker id {} is held by a live environment", worker_id)
            }
            LaunchFailure::WorkersExhausted { capacity } => {
                write!(formatter, "all {} worker ids are in use", capacity)
            }
            LaunchFailure::WorkerOutOfRange { worker_id, capacity } => write!(
                formatter,
                "worker id {} is outside 0..{}",
                worker_id, capacity
            ),
            LaunchFailure::InvalidWorker { worker_id, base_port } => write!(
                formatter,
                "worker id {} with base port {} does not map to a valid port",
                worker_id, base_port
            ),
            LaunchFailure::PortUnavailable { port, source } => {
                write!(formatter, "could not listen on port {}: {}", port, source)
            }
            LaunchFailure::Spawn { path, source } => {
                write!(formatter, "could not start {}: {}", path.display(), source)
            }
            LaunchFailure::HandshakeTimeout { timeout } => write!(
                formatter,
                "simulator did not connect within {:.1}s",
                timeout.as_secs_f64()
            ),
            LaunchFailure::ProcessExited { status } => {
                write!(formatter, "simulator exited before connecting ({})", status)
            }
            LaunchFailure::Incompatible {
                unity_version,
                expected,
            } => write!(
                formatter,
                "simulator speaks communication version {}, expected {}",
                unity_version, expected
            ),
        }
    }
}

#[derive(Debug)]
pub enum EnvError {
    Configuration { reason: String },
    Launch(LaunchFailure),
    NotFound { name: String },
    ClosedHandle,
    EpisodeFinished,
    InvalidAction { reason: String },
    Protocol { reason: String },
    Io(io::Error),
}

impl EnvError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        EnvError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid_action(reason: impl Into<String>) -> Self {
        EnvError::InvalidAction {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        EnvError::Protocol {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EnvError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnvError::Configuration { reason } => {
                write!(formatter, "invalid configuration: {}", reason)
            }
            EnvError::Launch(failure) => write!(formatter, "launch failed: {}", failure),
            EnvError::NotFound { name } => {
                write!(formatter, "no environment registered as '{}'", name)
            }
            EnvError::ClosedHandle => write!(formatter, "environment has been closed"),
            EnvError::EpisodeFinished => write!(
                formatter,
                "step called after the episode returned done; call reset first"
            ),
            EnvError::InvalidAction { reason } => write!(formatter, "invalid action: {}", reason),
            EnvError::Protocol { reason } => write!(formatter, "protocol error: {}", reason),
            EnvError::Io(err) => write!(formatter, "i/o error: {}", err),
        }
    }
}

impl Error for EnvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EnvError::Launch(LaunchFailure::PortUnavailable { source, .. })
            | EnvError::Launch(LaunchFailure::Spawn { source, .. }) => Some(source),
            EnvError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LaunchFailure> for EnvError {
    fn from(failure: LaunchFailure) -> Self {
        EnvError::Launch(failure)
    }
}

impl From<io::Error> for EnvError {
    fn from(err: io::Error) -> Self {
        EnvError::Io(err)
    }
}

pub type Result<T, E = EnvError> = std::result::Result<T, E>;
