//! 引擎级配置。
//!
//! 所有配置类型都实现 `Default` 并以 `#[serde(default)]` 反序列化，
//! 因此 TOML 中只需写出与默认值不同的字段。

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// 入站处理任务所用工作线程池的配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerPoolConfig {
    /// 同时执行入站任务的线程上限；`0` 表示沿用 Tokio 阻塞线程池的默认上限。
    pub threads: usize,
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            thread_name: "relay-worker".to_owned(),
        }
    }
}

impl WorkerPoolConfig {
    /// 解析 TOML 文本并执行校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "worker pool thread_name must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}
