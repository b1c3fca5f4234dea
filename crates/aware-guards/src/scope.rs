use std::{any::type_name, fmt::Display, time::SystemTime};

use opentelemetry::{
    Context, KeyValue,
    trace::{SpanRef, Status, TraceContextExt as _, Tracer},
};

use crate::{keys::exception, severity::GuardSpanKind};

/// 由拦截器亲自打开的 Span 及其所在的 `Context`。
///
/// # 教案式说明
/// - **意图（Why）**：拦截器只结束自己创建的 Span，且必须覆盖成功、失败、panic 与 Future 取消四条退出路径。
/// - **逻辑（How）**：正常路径由 [`finish_ok`](Self::finish_ok) / [`finish_err`](Self::finish_err) 收尾；
///   其余路径落到 `Drop`，若正处于 panic 展开则标记错误状态后结束。
/// - **契约（What）**：每个 `SpanScope` 对应的 Span 恰好结束一次。
pub(crate) struct SpanScope {
    cx: Context,
    finished: bool,
}

impl SpanScope {
    /// 以 `parent` 为父上下文启动子 Span，属性在启动前挂到构造器上。
    pub(crate) fn start<T>(
        tracer: &T,
        parent: &Context,
        name: String,
        kind: GuardSpanKind,
        attributes: Vec<KeyValue>,
    ) -> Self
    where
        T: Tracer,
        T::Span: Send + Sync + 'static,
    {
        let mut builder = tracer.span_builder(name);
        builder.span_kind = Some(kind.into());
        builder.start_time = Some(SystemTime::now());
        if !attributes.is_empty() {
            builder.attributes = Some(attributes);
        }

        let span = tracer.build_with_context(builder, parent);
        Self {
            cx: parent.with_span(span),
            finished: false,
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.cx
    }

    pub(crate) fn finish_ok(mut self) {
        self.cx.span().end();
        self.finished = true;
    }

    pub(crate) fn finish_err(mut self, error_type: &'static str, message: &str) {
        {
            let span = self.cx.span();
            record_failure(&span, error_type, message);
            span.end();
        }
        self.finished = true;
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let span = self.cx.span();
        if std::thread::panicking() {
            span.set_status(Status::error("guarded call panicked"));
            tracing::debug!(target: "aware_guards", "guarded call panicked, span ended with error");
        }
        span.end();
    }
}

/// 在 Span 上记录失败：错误状态加一条 `exception` 事件。
pub(crate) fn record_failure(span: &SpanRef<'_>, error_type: &'static str, message: &str) {
    span.set_status(Status::error(message.to_string()));
    span.add_event(
        exception::EVENT_NAME,
        vec![
            KeyValue::new(exception::TYPE, error_type),
            KeyValue::new(exception::MESSAGE, message.to_string()),
        ],
    );
}

/// 一次被拦截调用的运行期状态：最内层 `Context` 与拦截器打开的全部 Span。
///
/// # 教案式说明
/// - **意图（Why）**：同步、异步与过程宏展开三种调用形态共享同一套“进入/退出”逻辑。
/// - **逻辑（How）**：[`crate::GuardInterceptor::enter`] 按装饰顺序逐层压栈；退出时自栈顶（最内层）向外结束。
/// - **契约（What）**：
///   - [`context`](Self::context) 返回函数体应运行其下的上下文；
///   - 调用方应以 [`finish`](Self::finish) 等方法显式收尾，遗漏时 `Drop` 仍会按相同顺序结束所有 Span；
///   - 不持有拦截器引用，可在拦截器临时值释放后继续使用。
#[must_use = "dropping a guarded call immediately ends the spans it opened"]
pub struct GuardedCall {
    cx: Context,
    scopes: Vec<SpanScope>,
}

impl GuardedCall {
    pub(crate) fn new(parent: Context) -> Self {
        Self {
            cx: parent,
            scopes: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, scope: SpanScope) {
        self.cx = scope.context().clone();
        self.scopes.push(scope);
    }

    /// 函数体应运行其下的上下文。
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// 本次调用由拦截器新建的 Span 数量。
    pub fn owned_spans(&self) -> usize {
        self.scopes.len()
    }

    /// 依据函数体结果收尾：`Err` 时在每个自建 Span 上记录失败。
    pub fn finish<R, E>(self, result: &Result<R, E>)
    where
        E: Display,
    {
        self.finish_with(result, ToString::to_string)
    }

    /// 与 [`finish`](Self::finish) 相同，但由 `describe` 给出错误文本，适用于未实现 `Display` 的错误类型。
    pub fn finish_with<R, E, D>(self, result: &Result<R, E>, describe: D)
    where
        D: FnOnce(&E) -> String,
    {
        match result {
            Ok(_) => self.finish_ok(),
            Err(error) => self.fail(type_name::<E>(), &describe(error)),
        }
    }

    pub fn finish_ok(mut self) {
        while let Some(scope) = self.scopes.pop() {
            scope.finish_ok();
        }
    }

    pub fn finish_err<E>(self, error: &E)
    where
        E: Display + ?Sized,
    {
        self.fail(type_name::<E>(), &error.to_string());
    }

    fn fail(mut self, error_type: &'static str, message: &str) {
        tracing::debug!(target: "aware_guards", error = %message, "guarded call failed");
        while let Some(scope) = self.scopes.pop() {
            scope.finish_err(error_type, message);
        }
    }
}

impl Drop for GuardedCall {
    fn drop(&mut self) {
        while let Some(scope) = self.scopes.pop() {
            drop(scope);
        }
    }
}
