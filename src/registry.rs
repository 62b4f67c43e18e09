//! Named environment entry points.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::error::{EnvError, Result};
use crate::factory::{EnvFactory, UuvEnv};
use crate::scenario::ScenarioVariant;

pub type EnvFuture = Pin<Box<dyn Future<Output = Result<UuvEnv>> + Send>>;
pub type EnvConstructor = Arc<dyn Fn() -> EnvFuture + Send + Sync>;

/// Registered name of a scenario.
pub fn env_id(variant: ScenarioVariant) -> &'static str {
    match variant {
        ScenarioVariant::Easy => "aquatic_navigation_gym/EasyUuvEnv-v0",
        ScenarioVariant::Medium => "aquatic_navigation_gym/MediumUuvEnv-v0",
        ScenarioVariant::Hard => "aquatic_navigation_gym/HardUuvEnv-v0",
        ScenarioVariant::GymEnv => "auv_env/Gym_Env-v0",
        ScenarioVariant::First => "auv_env/FirstEnv-v0",
        ScenarioVariant::Second => "auv_env/SecondEnv-v0",
        ScenarioVariant::Third => "auv_env/ThirdEnv-v0",
    }
}

/// Scenario registered under `name` by [`EnvRegistry::register_defaults`].
pub fn variant_for(name: &str) -> Option<ScenarioVariant> {
    ScenarioVariant::ALL
        .into_iter()
        .find(|variant| env_id(*variant) == name)
}

#[derive(Default)]
pub struct EnvRegistry {
    entries: RwLock<HashMap<String, EnvConstructor>>,
}

impl EnvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static EnvRegistry {
        static GLOBAL: OnceLock<EnvRegistry> = OnceLock::new();
        GLOBAL.get_or_init(EnvRegistry::new)
    }

    /// Registers `constructor` under `name`, replacing any earlier entry.
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> EnvFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(name.clone(), Arc::new(constructor)).is_some() {
            debug!("replaced environment {}", name);
        }
    }

    /// Registers every scenario under its [`env_id`]. Safe to call again.
    pub fn register_defaults(&self, factory: Arc<EnvFactory>) {
        for variant in ScenarioVariant::ALL {
            let factory = Arc::clone(&factory);
            self.register(env_id(variant), move || -> EnvFuture {
                let factory = Arc::clone(&factory);
                Box::pin(async move { factory.make(variant).await })
            });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub async fn make(&self, name: &str) -> Result<UuvEnv> {
        let constructor = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| EnvError::NotFound {
                name: name.to_string(),
            })?;
        constructor().await
    }
}
