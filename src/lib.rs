pub mod channels;
pub mod driver;
pub mod env;
pub mod error;
pub mod factory;
pub mod infra;
pub mod registry;
pub mod scenario;

pub use env::Environment;
pub use error::{EnvError, LaunchFailure, Result};
pub use factory::{EnvFactory, LaunchSettings, UuvEnv};
pub use registry::EnvRegistry;
pub use scenario::ScenarioVariant;

// Re-export proto interface
pub mod communicator_objects {
    tonic::include_proto!("communicator_objects");
}
