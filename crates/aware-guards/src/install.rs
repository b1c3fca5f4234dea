use std::sync::OnceLock;

use opentelemetry::{
    global::{self, BoxedTracer},
    trace::TracerProvider as _,
};
use opentelemetry_sdk::{
    Resource,
    export::trace::SpanExporter,
    trace::{self, TracerProvider},
};
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::{
    config::GuardsConfig,
    error::{Error, Result},
    interceptor::GuardInterceptor,
};

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALL_STATE: OnceLock<InstallState> = OnceLock::new();

/// 未安装时从环境变量推导的配置，首次访问时读取。
static AMBIENT_CONFIG: OnceLock<GuardsConfig> = OnceLock::new();

struct InstallState {
    provider: TracerProvider,
    config: GuardsConfig,
}

/// 启动期注册入口：组装 Provider 与 `tracing` Subscriber，并记录守卫配置。
///
/// # 教案式说明
/// - **意图（Why）**：宿主只需在启动时调用一次，即可让过程宏生成的守卫代码拿到可导出的 Tracer。
/// - **逻辑（How）**：
///   1. 检查重复安装与外部已设置的 Subscriber；
///   2. 组装 `EnvFilter + fmt + tracing-opentelemetry` Layer 并设为全局 Subscriber；
///   3. Subscriber 注册成功后，才把 `AlwaysOn` 采样的 `TracerProvider` 注册到 `opentelemetry::global`；
///   4. 将 Provider 与配置写入 `INSTALL_STATE`。
/// - **契约（What）**：多次调用返回 [`Error::AlreadyInstalled`]；外部已配置 Subscriber 时返回
///   [`Error::SubscriberAlreadySet`]。不带导出器的 Provider 只产生 Span 而不外发，
///   需要外发时使用 [`install_with_exporter`]。
pub fn install(config: GuardsConfig) -> Result<()> {
    let provider = provider_builder().build();
    install_provider(config, provider)
}

/// 与 [`install`] 相同，额外挂载一个同步导出器。
pub fn install_with_exporter<X>(config: GuardsConfig, exporter: X) -> Result<()>
where
    X: SpanExporter + 'static,
{
    let provider = provider_builder().with_simple_exporter(exporter).build();
    install_provider(config, provider)
}

fn provider_builder() -> trace::Builder {
    TracerProvider::builder().with_config(
        trace::config()
            .with_sampler(trace::Sampler::AlwaysOn)
            .with_resource(Resource::default()),
    )
}

fn install_provider(config: GuardsConfig, provider: TracerProvider) -> Result<()> {
    if INSTALL_STATE.get().is_some() {
        return Err(Error::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(Error::SubscriberAlreadySet);
    }

    let tracer = provider.tracer(config.tracer_name.clone());
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(&config))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer));
    // Subscriber 注册失败时全局 Provider 必须保持原样。
    tracing::subscriber::set_global_default(subscriber)?;
    global::set_tracer_provider(provider.clone());

    tracing::info!(
        target: "aware_guards",
        enabled = config.enabled,
        tracer = %config.tracer_name,
        "aware guards installed"
    );
    INSTALL_STATE
        .set(InstallState { provider, config })
        .map_err(|_| Error::AlreadyInstalled)
}

fn build_env_filter(config: &GuardsConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
}

/// 当前生效的配置：已安装时为安装配置，否则为环境变量推导的配置（解析失败回退默认值）。
pub fn active_config() -> &'static GuardsConfig {
    match INSTALL_STATE.get() {
        Some(state) => &state.config,
        None => AMBIENT_CONFIG.get_or_init(|| {
            GuardsConfig::from_env().unwrap_or_else(|err| {
                tracing::warn!(target: "aware_guards", error = %err, "ignoring invalid guards environment");
                GuardsConfig::default()
            })
        }),
    }
}

/// 基于全局 Provider 的拦截器，过程宏展开代码经由此入口拦截调用。
///
/// 每次调用都向全局 Provider 重新索取 Tracer，因此在 [`install`] 之前构造的调用点不会被
/// no-op Tracer 永久绑定。
pub fn global_interceptor() -> GuardInterceptor<BoxedTracer> {
    let config = active_config();
    GuardInterceptor::from_config(global::tracer(config.tracer_name.clone()), config)
}

/// 强制刷新已安装的 Provider；未安装时无操作。
pub fn force_flush() {
    if let Some(state) = INSTALL_STATE.get() {
        for result in state.provider.force_flush() {
            if let Err(err) = result {
                tracing::warn!(target: "aware_guards", error = %err, "span flush failed");
            }
        }
    }
}
