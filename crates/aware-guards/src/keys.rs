//! Span 属性键名契约：外部守卫评估服务读取的稳定键集合。
//!
//! 教案式说明（Why）：拦截器与流式发射器共用同一组键，任何改名都会让下游评估服务静默失配，因此集中定义。
//! 契约定义（What）：`guard` 分组由本库写入；`derived` 分组只做预留，本库永远不写。

/// 守卫策略属性。
pub mod guard {
    /// 守卫生效日期，`YYYY-MM-DD`，不做校验。
    pub const SINCE: &str = "aware.guard.since";

    /// 条件表达式，语义对本库不透明。
    pub const CONDITION: &str = "aware.guard.condition";

    /// 严重级别符号名：`WARN` | `FATAL`。
    pub const SEVERITY: &str = "aware.guard.severity";

    /// 评估环境标签，空串表示使用外部默认环境。
    pub const ENVIRONMENT: &str = "aware.guard.environment";

    /// 逗号拼接的过滤表达式。
    pub const FILTERS: &str = "aware.guard.filters";

    /// 拦截器写入顺序。
    pub const ALL: [&str; 5] = [SINCE, CONDITION, ENVIRONMENT, FILTERS, SEVERITY];
}

/// 评估服务输出的派生指标键，仅预留。
pub mod derived {
    pub const AVG_LATENCY: &str = "aware.derived.avg_latency";
    pub const MIN_LATENCY: &str = "aware.derived.min_latency";
    pub const MAX_LATENCY: &str = "aware.derived.max_latency";
}

/// 记录错误时使用的 OpenTelemetry 语义约定。
pub mod exception {
    pub const EVENT_NAME: &str = "exception";
    pub const TYPE: &str = "exception.type";
    pub const MESSAGE: &str = "exception.message";
}

/// 过滤表达式的拼接分隔符。
pub const FILTER_SEPARATOR: &str = ",";
