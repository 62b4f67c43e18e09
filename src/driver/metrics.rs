//! Episode statistics for rollouts

use std::collections::VecDeque;
use std::time::Instant;

/// Mean of the last `window` samples. Older samples fall out as new ones arrive.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    recent: VecDeque<f32>,
    total: f64,
}

impl MovingAverage {
    /// A zero window is treated as a window of one.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            total: 0.0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn push(&mut self, sample: f32) {
        if self.recent.len() == self.window {
            let evicted = self.recent.pop_front().unwrap_or_default();
            self.total -= f64::from(evicted);
        }
        self.recent.push_back(sample);
        self.total += f64::from(sample);
    }

    /// 0.0 until the first sample.
    pub fn average(&self) -> f32 {
        match self.recent.len() {
            0 => 0.0,
            count => (self.total / count as f64) as f32,
        }
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

/// Windowed statistics reported while a rollout is running
#[derive(Debug)]
pub struct RolloutMetrics {
    /// Reward summed over each finished episode
    pub episode_rewards: MovingAverage,
    /// Steps taken per finished episode
    pub episode_lengths: MovingAverage,
    /// Share of episodes cut off by the step limit
    pub interruption_rate: MovingAverage,
    /// Steps since the rollout began
    pub total_timesteps: usize,
    start_time: Instant,
}

impl RolloutMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            episode_rewards: MovingAverage::new(window_size),
            episode_lengths: MovingAverage::new(window_size),
            interruption_rate: MovingAverage::new(window_size),
            total_timesteps: 0,
            start_time: Instant::now(),
        }
    }

    pub fn record_step(&mut self) {
        self.total_timesteps += 1;
    }

    pub fn record_episode(&mut self, reward: f32, length: usize, interrupted: bool) {
        self.episode_rewards.push(reward);
        self.episode_lengths.push(length as f32);
        self.interruption_rate.push(if interrupted { 1.0 } else { 0.0 });
    }

    pub fn timesteps_per_second(&self) -> f64 {
        let duration = self.start_time.elapsed().as_secs_f64();
        if duration > 0.0 {
            self.total_timesteps as f64 / duration
        } else {
            0.0
        }
    }

    pub fn log_to_console(&self) {
        tracing::info!(
            "Timesteps {} | SPS {:.1} | reward={:.2}, length={:.1}, interrupted={:.1}%",
            self.total_timesteps,
            self.timesteps_per_second(),
            self.episode_rewards.average(),
            self.episode_lengths.average(),
            self.interruption_rate.average() * 100.0
        );
    }
}

impl Default for RolloutMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Totals over every finished episode of a rollout
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    pub num_episodes: usize,
    pub total_reward: f32,
    pub total_steps: usize,
    /// Episodes that hit the step limit
    pub num_interrupted: usize,
    pub best_reward: Option<f32>,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_episode(&mut self, reward: f32, steps: usize, interrupted: bool) {
        self.num_episodes += 1;
        self.total_reward += reward;
        self.total_steps += steps;
        if interrupted {
            self.num_interrupted += 1;
        }
        self.best_reward = Some(self.best_reward.map_or(reward, |best| best.max(reward)));
    }

    pub fn avg_reward(&self) -> f32 {
        if self.num_episodes > 0 {
            self.total_reward / self.num_episodes as f32
        } else {
            0.0
        }
    }

    pub fn avg_steps(&self) -> f32 {
        if self.num_episodes > 0 {
            self.total_steps as f32 / self.num_episodes as f32
        } else {
            0.0
        }
    }

    pub fn interruption_rate(&self) -> f32 {
        if self.num_episodes > 0 {
            self.num_interrupted as f32 / self.num_episodes as f32
        } else {
            0.0
        }
    }

    pub fn print_summary(&self, env_name: &str) {
        tracing::info!("=== Evaluation Summary: {} ===", env_name);
        tracing::info!("Episodes: {}", self.num_episodes);
        tracing::info!("Avg Reward: {:.2}", self.avg_reward());
        if let Some(best) = self.best_reward {
            tracing::info!("Best Reward: {:.2}", best);
        }
        tracing::info!("Avg Steps: {:.1}", self.avg_steps());
        tracing::info!("Interrupted: {:.1}%", self.interruption_rate() * 100.0);
    }
}
