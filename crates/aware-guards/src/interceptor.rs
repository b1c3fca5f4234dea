use std::{fmt::Display, future::Future};

use opentelemetry::{
    Context,
    global::BoxedTracer,
    trace::{FutureExt as _, TraceContextExt as _, Tracer},
};

use crate::{
    config::GuardsConfig,
    decoration::{Decoration, GuardedFn},
    scope::{GuardedCall, SpanScope},
};

/// 守卫拦截器：包在每次被守卫函数调用的外围。
///
/// # 教案式说明
/// - **意图（Why）**：把 [`GuardDescriptor`](crate::GuardDescriptor) 写到正确的 Span 上，并在需要时为本次调用
///   单独建 Span，供外部评估服务统计延迟等指标。
/// - **逻辑（How）**：
///   1. 按 [`GuardedFn::decorations`] 的外层到内层顺序进入各装饰；
///   2. 独立建 Span 装饰（[`WithSpan`](crate::WithSpan)）总在外层先打开 Span；
///   3. 守卫在“函数已自带 Span”或 `create_new_span == false` 时复用当前 Span，无条件写入五个属性；
///      否则以当前上下文为父新建子 Span，属性在 Span 启动前挂到构造器上；
///   4. 函数体在最内层上下文中执行，退出时自内向外结束自建 Span，`Err` 时记录错误状态与 `exception` 事件。
/// - **契约（What）**：
///   - 函数体的返回值与错误原样返回，拦截器从不包装、转换或吞掉错误；
///   - 只结束自己创建的 Span；复用分支不触碰 Span 生命周期与状态；
///   - 上下文中没有活跃 Span 时，复用分支的写入由 OpenTelemetry no-op Span 吸收，不报错；
///   - `enabled == false` 时函数体直接在调用方上下文中运行。
/// - **风险与取舍（Trade-offs）**：拦截器对 `Tracer` 泛型化，测试可注入 SDK Tracer；全局入口
///   [`global_interceptor`](crate::global_interceptor) 则使用 [`BoxedTracer`]。
#[derive(Clone, Debug)]
pub struct GuardInterceptor<T = BoxedTracer> {
    tracer: T,
    enabled: bool,
}

impl<T> GuardInterceptor<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            enabled: true,
        }
    }

    pub fn from_config(tracer: T, config: &GuardsConfig) -> Self {
        Self {
            tracer,
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// 进入一次被拦截调用，返回的 [`GuardedCall`] 负责后续收尾。
    ///
    /// 供无法使用闭包形态的宿主（中间件链、过程宏展开）直接驱动进入/退出。
    pub fn enter(&self, cx: &Context, target: &GuardedFn) -> GuardedCall {
        let mut call = GuardedCall::new(cx.clone());
        if !self.enabled {
            tracing::trace!(target: "aware_guards", function = %target.site(), "guards disabled, passing through");
            return call;
        }

        for decoration in target.decorations() {
            match decoration {
                Decoration::WithSpan(with_span) => {
                    let name = with_span.resolve_span_name(target.site());
                    tracing::trace!(target: "aware_guards", span = %name, "with_span opened span");
                    let scope = SpanScope::start(
                        &self.tracer,
                        call.context(),
                        name,
                        with_span.span_kind(),
                        Vec::new(),
                    );
                    call.push(scope);
                }
                Decoration::Guard(descriptor) => {
                    if target.creates_own_span() || !descriptor.create_new_span() {
                        tracing::debug!(
                            target: "aware_guards",
                            function = %target.site(),
                            active = call.context().has_active_span(),
                            "guard annotating current span"
                        );
                        descriptor.annotate(&call.context().span());
                    } else {
                        let name = descriptor.resolve_span_name(target.site());
                        tracing::debug!(
                            target: "aware_guards",
                            function = %target.site(),
                            span = %name,
                            "guard opened new span"
                        );
                        let scope = SpanScope::start(
                            &self.tracer,
                            call.context(),
                            name,
                            descriptor.span_kind(),
                            descriptor.attributes(),
                        );
                        call.push(scope);
                    }
                }
            }
        }
        call
    }

    /// 同步调用：函数体期间最内层上下文既附着到当前线程，也显式传入。
    pub fn call<R, E, F>(&self, cx: &Context, target: &GuardedFn, body: F) -> Result<R, E>
    where
        F: FnOnce(&Context) -> Result<R, E>,
        E: Display,
    {
        let call = self.enter(cx, target);
        let inner = call.context().clone();
        let result = {
            let _attached = inner.clone().attach();
            body(&inner)
        };
        call.finish(&result);
        result
    }

    /// 不返回 `Result` 的同步调用，仅 panic 会被记为错误。
    pub fn call_infallible<R, F>(&self, cx: &Context, target: &GuardedFn, body: F) -> R
    where
        F: FnOnce(&Context) -> R,
    {
        let call = self.enter(cx, target);
        let inner = call.context().clone();
        let value = {
            let _attached = inner.clone().attach();
            body(&inner)
        };
        call.finish_ok();
        value
    }

    /// 异步调用：Future 在最内层上下文下被轮询；Future 被提前丢弃时自建 Span 随之结束。
    pub async fn call_async<R, E, F, Fut>(
        &self,
        cx: &Context,
        target: &GuardedFn,
        body: F,
    ) -> Result<R, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let call = self.enter(cx, target);
        let inner = call.context().clone();
        let result = body(inner.clone()).with_context(inner).await;
        call.finish(&result);
        result
    }

    pub async fn call_async_infallible<R, F, Fut>(
        &self,
        cx: &Context,
        target: &GuardedFn,
        body: F,
    ) -> R
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = R>,
    {
        let call = self.enter(cx, target);
        let inner = call.context().clone();
        let value = body(inner.clone()).with_context(inner).await;
        call.finish_ok();
        value
    }

    /// 以线程当前附着的 `Context` 为父上下文执行 [`call`](Self::call)。
    pub fn call_current<R, E, F>(&self, target: &GuardedFn, body: F) -> Result<R, E>
    where
        F: FnOnce(&Context) -> Result<R, E>,
        E: Display,
    {
        self.call(&Context::current(), target, body)
    }

    pub fn call_current_infallible<R, F>(&self, target: &GuardedFn, body: F) -> R
    where
        F: FnOnce(&Context) -> R,
    {
        self.call_infallible(&Context::current(), target, body)
    }
}
