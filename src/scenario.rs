//! Fixed scenario table: which simulator build to start and which engine
//! and environment parameters to hand it.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{EnvError, Result};

/// Name of the player binary inside every scenario build directory.
pub const SIMULATOR_BINARY: &str = "SafeRLAUV";

/// Unity ships quality levels 0 ("Very Low") through 5 ("Ultra").
pub const MAX_QUALITY_LEVEL: i32 = 5;

/// Hard currently shares Medium's values and Third shares Second's; see [`lookup`].
///
/// `GymEnv` is the legacy dry-run build kept under its `Gym_Env` directory.
/// `First` has the same values but launches the `FirstEnv` build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScenarioVariant {
    Easy,
    Medium,
    Hard,
    GymEnv,
    First,
    Second,
    Third,
}

impl ScenarioVariant {
    pub const ALL: [ScenarioVariant; 7] = [
        ScenarioVariant::Easy,
        ScenarioVariant::Medium,
        ScenarioVariant::Hard,
        ScenarioVariant::GymEnv,
        ScenarioVariant::First,
        ScenarioVariant::Second,
        ScenarioVariant::Third,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScenarioVariant::Easy => "Easy",
            ScenarioVariant::Medium => "Medium",
            ScenarioVariant::Hard => "Hard",
            ScenarioVariant::GymEnv => "GymEnv",
            ScenarioVariant::First => "First",
            ScenarioVariant::Second => "Second",
            ScenarioVariant::Third => "Third",
        }
    }

    /// Accepts the variant name or its build directory name, case-insensitively.
    pub fn from_name(value: &str) -> Result<Self> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|variant| {
                variant.name().eq_ignore_ascii_case(wanted)
                    || variant.build_dir().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| EnvError::configuration(format!("unknown scenario '{}'", value)))
    }

    /// Directory under the builds root holding this scenario's player build.
    pub fn build_dir(self) -> &'static str {
        match self {
            ScenarioVariant::Easy => "EasyEnv",
            ScenarioVariant::Medium => "MediumEnv",
            ScenarioVariant::Hard => "HardEnv",
            ScenarioVariant::GymEnv => "Gym_Env",
            ScenarioVariant::First => "FirstEnv",
            ScenarioVariant::Second => "SecondEnv",
            ScenarioVariant::Third => "ThirdEnv",
        }
    }

    pub fn config(self) -> ScenarioConfig {
        lookup(self)
    }
}

impl fmt::Display for ScenarioVariant {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetFrameRate {
    /// Encoded as -1: the player renders as fast as it can.
    Unbounded,
    Fixed(i32),
}

impl TargetFrameRate {
    pub fn wire_value(self) -> i32 {
        match self {
            TargetFrameRate::Unbounded => -1,
            TargetFrameRate::Fixed(rate) => rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub width: i32,
    pub height: i32,
    pub quality_level: i32,
    pub time_scale: f32,
    /// `None` leaves the player's own setting untouched.
    pub target_frame_rate: Option<TargetFrameRate>,
    pub capture_frame_rate: i32,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(EnvError::configuration(format!(
                "screen resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !(0..=MAX_QUALITY_LEVEL).contains(&self.quality_level) {
            return Err(EnvError::configuration(format!(
                "quality level {} outside 0..={}",
                self.quality_level, MAX_QUALITY_LEVEL
            )));
        }
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(EnvError::configuration(format!(
                "time scale must be positive, got {}",
                self.time_scale
            )));
        }
        if let Some(TargetFrameRate::Fixed(rate)) = self.target_frame_rate
            && rate <= 0
        {
            return Err(EnvError::configuration(format!(
                "target frame rate must be positive, got {}",
                rate
            )));
        }
        if self.capture_frame_rate < 0 {
            return Err(EnvError::configuration(format!(
                "capture frame rate must not be negative, got {}",
                self.capture_frame_rate
            )));
        }
        Ok(())
    }
}

/// Target position in simulator world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl TargetPosition {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentParameters {
    pub target: TargetPosition,
    pub water_enabled: bool,
    pub fast_restart: bool,
    pub distance_planes: u32,
    pub safe_training: bool,
}

impl EnvironmentParameters {
    pub fn validate(&self) -> Result<()> {
        let TargetPosition { x, y, z } = self.target;
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            return Err(EnvError::configuration(format!(
                "target position ({}, {}, {}) is not finite",
                x, y, z
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioConfig {
    pub variant: ScenarioVariant,
    pub engine: EngineConfig,
    pub parameters: EnvironmentParameters,
    pub binary_name: &'static str,
}

impl ScenarioConfig {
    /// `<base>/<build dir>/<binary>`, without any platform suffix.
    pub fn executable_path(&self, base: &Path) -> PathBuf {
        base.join(self.variant.build_dir()).join(self.binary_name)
    }
}

const GYM_ENGINE: EngineConfig = EngineConfig {
    width: 800,
    height: 800,
    quality_level: 1,
    time_scale: 1.0,
    target_frame_rate: None,
    capture_frame_rate: 60,
};

const LEGACY_ENGINE: EngineConfig = EngineConfig {
    width: 800,
    height: 800,
    quality_level: 1,
    time_scale: 10.0,
    target_frame_rate: Some(TargetFrameRate::Unbounded),
    capture_frame_rate: 60,
};

const DRY_RUN: EnvironmentParameters = EnvironmentParameters {
    target: TargetPosition::new(33.66, 6.29, -76.13),
    water_enabled: false,
    fast_restart: false,
    distance_planes: 6,
    safe_training: true,
};

// Medium and Hard (and Second and Third) currently carry identical values.
const UNDERWATER: EnvironmentParameters = EnvironmentParameters {
    target: TargetPosition::new(9.38, 4.33, -76.13),
    water_enabled: true,
    fast_restart: false,
    distance_planes: 6,
    safe_training: true,
};

pub fn lookup(variant: ScenarioVariant) -> ScenarioConfig {
    let (engine, parameters) = match variant {
        ScenarioVariant::Easy => (GYM_ENGINE, DRY_RUN),
        ScenarioVariant::Medium | ScenarioVariant::Hard => (GYM_ENGINE, UNDERWATER),
        ScenarioVariant::GymEnv | ScenarioVariant::First => (LEGACY_ENGINE, DRY_RUN),
        ScenarioVariant::Second | ScenarioVariant::Third => (LEGACY_ENGINE, UNDERWATER),
    };

    ScenarioConfig {
        variant,
        engine,
        parameters,
        binary_name: SIMULATOR_BINARY,
    }
}
