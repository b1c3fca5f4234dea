//! aware-guards 安装与配置阶段的错误域。
//!
//! 守卫的应用本身从不产生错误：没有活跃 Span 时只是 no-op。这里只归纳启动期失败路径。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// `install` 被重复调用。
    #[error("aware-guards is already installed")]
    AlreadyInstalled,

    /// 外部已提前设置全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set, aware-guards cannot replace it")]
    SubscriberAlreadySet,

    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::dispatcher::SetGlobalDefaultError),

    #[error("invalid guards configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// 环境变量或配置项取值无法解析。
    #[error("invalid value `{value}` for setting `{key}`")]
    InvalidSetting { key: String, value: String },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
