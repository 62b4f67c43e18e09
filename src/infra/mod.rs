pub mod communicator;
mod launcher;
mod transcript;
mod worker;

pub use communicator::Communicator;
pub use launcher::{PlayerArgs, SimulatorProcess, resolve_executable};
pub use transcript::{TranscriptFile, read_transcript};
pub use worker::{DEFAULT_WORKER_CAPACITY, WorkerIdAllocator, WorkerLease};

use crate::error::{LaunchFailure, Result};

/// Port a worker's communicator listens on.
pub fn worker_port(base_port: u16, worker_id: u16) -> Result<u16> {
    base_port
        .checked_add(worker_id)
        .filter(|port| *port != 0)
        .ok_or_else(|| {
            LaunchFailure::InvalidWorker {
                worker_id,
                base_port,
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_port() {
        assert_eq!(worker_port(5005, 0).unwrap(), 5005);
        assert_eq!(worker_port(5005, 999).unwrap(), 6004);
        assert!(worker_port(65_000, 999).is_err());
    }
}
