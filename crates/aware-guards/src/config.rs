use serde::Deserialize;

use crate::error::{Error, Result};

/// 是否启用注解式埋点；缺省视为启用。
pub const ENV_ENABLED: &str = "OTEL_INSTRUMENTATION_ANNOTATIONS_ENABLED";
/// 拦截器向全局 Provider 索取 Tracer 时使用的名称。
pub const ENV_TRACER_NAME: &str = "AWARE_GUARDS_TRACER_NAME";
/// `install` 组装 `EnvFilter` 时的默认过滤指令，`RUST_LOG` 优先。
pub const ENV_LOG: &str = "AWARE_GUARDS_LOG";

pub const DEFAULT_TRACER_NAME: &str = "aware_guards";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 守卫运行期配置。
///
/// # 教案式说明
/// - **意图（Why）**：宿主在启动期一次性决定守卫是否生效、使用哪个 Tracer 名称以及日志过滤级别。
/// - **逻辑（How）**：可由 TOML 片段（缺失字段取默认值）或环境变量构造；环境变量读取经由
///   [`from_lookup`](Self::from_lookup) 注入查找函数，便于测试。
/// - **契约（What）**：`enabled` 缺省为 `true`；布尔值只接受 `true` / `false`（忽略大小写与首尾空白），
///   其他取值返回 [`Error::InvalidSetting`]。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardsConfig {
    pub enabled: bool,
    pub tracer_name: String,
    pub log_filter: String,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tracer_name: DEFAULT_TRACER_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl GuardsConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 以任意键值查找函数构造配置，未提供的键保持默认值。
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &raw)?;
        }
        if let Some(name) = lookup(ENV_TRACER_NAME).filter(|name| !name.trim().is_empty()) {
            config.tracer_name = name.trim().to_string();
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|filter| !filter.trim().is_empty()) {
            config.log_filter = filter;
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    let value = raw.trim();
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }
}
