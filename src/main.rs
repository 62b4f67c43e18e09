use std::sync::Arc;

use aquanav::driver::{self, DriverConfig, RandomPolicy};
use aquanav::registry::{EnvRegistry, variant_for};
use aquanav::{EnvError, EnvFactory, Environment};
use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aquanav=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = DriverConfig::from_env()?;
    tracing::info!("Environment: {} ({} steps)", config.env_name, config.steps);

    let factory = Arc::new(EnvFactory::new(config.launch_settings()));
    let registry = EnvRegistry::global();
    registry.register_defaults(Arc::clone(&factory));

    let mut env = match config.worker_id {
        Some(worker_id) => {
            let variant = variant_for(&config.env_name).ok_or_else(|| EnvError::NotFound {
                name: config.env_name.clone(),
            })?;
            factory.make_with_worker(variant, worker_id).await?
        }
        None => registry.make(&config.env_name).await?,
    };

    let mut policy = RandomPolicy::new(config.seed as u64);
    let outcome = driver::run(&mut env, &mut policy, config.steps).await;
    env.close().await?;

    outcome?.print_summary(&config.env_name);
    Ok(())
}
