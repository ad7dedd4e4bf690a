use orders_core::PollSettings;
use std::time::Duration;

/// Upper bound of the short delay used after failures.
const ERROR_DELAY_CAP: Duration = Duration::from_secs(10);

/// Timing parameters of the poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub idle_step: Duration,
    pub jitter: Duration,
    pub max_auth_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_settings(&PollSettings::default())
    }
}

impl PollConfig {
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self {
            min_interval: settings.min_interval(),
            max_interval: settings.max_interval(),
            idle_step: settings.idle_step(),
            jitter: settings.jitter(),
            max_auth_failures: settings.max_auth_failures,
        }
    }
}

/// Inter-poll delay that grows while the feed is quiet.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    config: PollConfig,
    idle: u32,
}

fn uniform(low: Duration, high: Duration) -> Duration {
    let low_ms = u64::try_from(low.as_millis()).unwrap_or(u64::MAX);
    let high_ms = u64::try_from(high.as_millis())
        .unwrap_or(u64::MAX)
        .max(low_ms);
    Duration::from_millis(fastrand::u64(low_ms..=high_ms))
}

impl AdaptiveDelay {
    pub fn new(config: PollConfig) -> Self {
        Self { config, idle: 0 }
    }

    pub fn idle(&self) -> u32 {
        self.idle
    }

    /// A tick with at least one match resets the idle count.
    pub fn record_tick(&mut self, matched: bool) {
        if matched {
            self.idle = 0;
        } else {
            self.idle = self.idle.saturating_add(1);
        }
    }

    /// `min(min_interval + idle * step, max_interval)`, without jitter.
    pub fn base_delay(&self) -> Duration {
        self.config
            .min_interval
            .saturating_add(self.config.idle_step.saturating_mul(self.idle))
            .min(self.config.max_interval)
    }

    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay();
        base.saturating_add(uniform(Duration::ZERO, self.config.jitter))
    }

    /// Uniform in `[min_interval, max(min_interval, min(10s, max_interval))]`.
    pub fn error_delay(&self) -> Duration {
        let upper = ERROR_DELAY_CAP
            .min(self.config.max_interval)
            .max(self.config.min_interval);
        uniform(self.config.min_interval, upper)
    }
}
