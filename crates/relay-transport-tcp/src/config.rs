use std::time::Duration;

use relay_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// 反应器节点的缓冲与轮询参数。
///
/// ```toml
/// inbound_capacity = 16384
/// idle_poll_interval_ms = 250
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReactorConfig {
    /// 入站区域容量（字节）。
    pub inbound_capacity: usize,
    /// 出站区域容量（字节）。
    pub outbound_capacity: usize,
    /// 无事可做时单次阻塞等待的上限。
    pub idle_poll_interval_ms: u64,
    /// 每次 `poll` 最多取回的事件数。
    pub events_capacity: usize,
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 20 * 1024,
            outbound_capacity: 20 * 1024,
            idle_poll_interval_ms: 1_000,
            events_capacity: 16,
            thread_name: "relay-reactor".to_owned(),
        }
    }
}

impl ReactorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str| {
            Err(PipelineError::Config(format!(
                "reactor {field} must be greater than zero"
            )))
        };
        if self.inbound_capacity == 0 {
            return invalid("inbound_capacity");
        }
        if self.outbound_capacity == 0 {
            return invalid("outbound_capacity");
        }
        if self.idle_poll_interval_ms == 0 {
            return invalid("idle_poll_interval_ms");
        }
        if self.events_capacity == 0 {
            return invalid("events_capacity");
        }
        if self.thread_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "reactor thread_name must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}
