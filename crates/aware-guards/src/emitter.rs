//! 流式守卫发射器：在无法使用声明式装饰的调用点，以命令式 API 写出同一套属性契约。
//!
//! # 教案式说明
//! - **意图（Why）**：动态构造的调用点、脚本宿主等场景拿不到过程宏或拦截器包装，仍需要给当前 Span 挂守卫。
//! - **逻辑（How）**：[`create_guard`] 返回 [`GuardBuilder`]，终结调用 [`GuardBuilder::guard`] 将稀疏属性写到
//!   给定 `Context` 的活跃 Span 上。
//! - **契约（What）**：不创建、不结束任何 Span；没有活跃 Span 时静默跳过，仅输出 DEBUG 日志。

use opentelemetry::{Context, trace::TraceContextExt as _};

use crate::descriptor::GuardBuilder;

/// 创建一个默认值的守卫构造器。
pub fn create_guard() -> GuardBuilder {
    GuardBuilder::default()
}

impl GuardBuilder {
    /// 将守卫写到 `cx` 的活跃 Span 上，返回写入的属性数量。
    ///
    /// 没有活跃 Span 时返回 `0`，不视为错误。
    pub fn guard(self, cx: &Context) -> usize {
        tracing::debug!(target: "aware_guards", "guard invoked");
        if !cx.has_active_span() {
            tracing::debug!(target: "aware_guards", "no active span, guard skipped");
            return 0;
        }
        self.descriptor().annotate_sparse(&cx.span())
    }

    /// 针对线程当前附着的 `Context` 执行 [`guard`](Self::guard)。
    pub fn guard_current(self) -> usize {
        self.guard(&Context::current())
    }
}
