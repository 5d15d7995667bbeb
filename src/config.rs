use serde::Deserialize;
use std::time::Duration;

/// Engine tuning knobs. Defaults match production; every field can be
/// overridden from the environment (`BALCAO_*`).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interval between queue assignment passes.
    #[serde(default = "default_queue_tick_secs")]
    pub queue_tick_secs: u64,
    /// Interval between dead-connection sweeps.
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    /// Upper bound on assignment attempts per pass.
    #[serde(default = "default_assignment_batch")]
    pub assignment_batch: usize,
    /// A waiting user is re-notified each time their accumulated wait
    /// crosses a multiple of this.
    #[serde(default = "default_wait_notify_secs")]
    pub wait_notify_interval_secs: u64,
    /// Coarse per-chat duration used by the wait estimate.
    #[serde(default = "default_average_chat_secs")]
    pub average_chat_duration_secs: u64,
    /// Delay between a requires-human bot reply and the actual enqueue.
    #[serde(default = "default_escalation_delay_secs")]
    pub escalation_delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            queue_tick_secs: default_queue_tick_secs(),
            sweep_interval_secs: default_sweep_secs(),
            assignment_batch: default_assignment_batch(),
            wait_notify_interval_secs: default_wait_notify_secs(),
            average_chat_duration_secs: default_average_chat_secs(),
            escalation_delay_secs: default_escalation_delay_secs(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `BALCAO_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(host) = std::env::var("BALCAO_HOST") {
            cfg.host = host;
        }
        read_env("BALCAO_PORT", &mut cfg.port);
        read_env("BALCAO_QUEUE_TICK_SECS", &mut cfg.queue_tick_secs);
        read_env("BALCAO_SWEEP_INTERVAL_SECS", &mut cfg.sweep_interval_secs);
        read_env("BALCAO_ASSIGNMENT_BATCH", &mut cfg.assignment_batch);
        read_env(
            "BALCAO_WAIT_NOTIFY_INTERVAL_SECS",
            &mut cfg.wait_notify_interval_secs,
        );
        read_env(
            "BALCAO_AVERAGE_CHAT_DURATION_SECS",
            &mut cfg.average_chat_duration_secs,
        );
        read_env(
            "BALCAO_ESCALATION_DELAY_SECS",
            &mut cfg.escalation_delay_secs,
        );
        cfg
    }

    pub fn queue_tick(&self) -> Duration {
        Duration::from_secs(self.queue_tick_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn escalation_delay(&self) -> Duration {
        Duration::from_secs(self.escalation_delay_secs)
    }
}

fn read_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        } else {
            tracing::warn!("ignoring unparseable {}={}", key, raw);
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_queue_tick_secs() -> u64 {
    30
}

fn default_sweep_secs() -> u64 {
    300
}

fn default_assignment_batch() -> usize {
    10
}

fn default_wait_notify_secs() -> u64 {
    300
}

fn default_average_chat_secs() -> u64 {
    300
}

fn default_escalation_delay_secs() -> u64 {
    3
}
