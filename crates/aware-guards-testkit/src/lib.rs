//! aware-guards 的测试支撑工具。
//!
//! # 教案式说明
//! - **意图（Why）**：守卫拦截器的全部可观测结果都落在 Span 上，测试需要一个能收集已结束 Span
//!   的导出器，并且每个用例拥有互不干扰的 Provider。
//! - **逻辑（How）**：[`InMemorySpanExporter`] 以 `Arc<Mutex<Vec<SpanData>>>` 缓存导出结果；
//!   [`TestTracing`] 将其挂到一个独立的 `TracerProvider` 上；[`SpanDataExt`] 提供按键读取属性、
//!   判断错误状态等断言辅助。
//! - **契约（What）**：不触碰 `opentelemetry::global`，因此可在同一测试进程中并行使用。

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use opentelemetry::trace::{Status, TraceError, TraceResult, TracerProvider as _};
use opentelemetry_sdk::{
    Resource,
    export::trace::{ExportResult, SpanData, SpanExporter},
    trace::{self, Tracer, TracerProvider},
};

/// 收集已完成 Span 的内存导出器。
///
/// 复刻官方 testing 实现的最小子集，避免 `opentelemetry_sdk/testing` 特性引入额外运行时。
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// 返回当前已收集的 Span 数据副本；锁被毒化时返回错误。
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .map_err(TraceError::from)
    }

    /// 清空内部缓冲，锁毒化时静默忽略。
    pub fn reset(&self) {
        if let Ok(mut guard) = self.spans.lock() {
            guard.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, mut batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .spans
            .lock()
            .map(|mut guard| guard.append(&mut batch))
            .map_err(TraceError::from);

        Box::pin(async move { result })
    }

    fn shutdown(&mut self) {
        self.reset();
    }
}

/// 单个测试用例专属的追踪环境。
///
/// # 教案式说明
/// - **意图（Why）**：拦截器对 Tracer 泛型化，测试直接注入 SDK Tracer 即可断言，无需安装全局 Provider。
/// - **逻辑（How）**：构造时以 `AlwaysOn` 采样器和简单导出器组装 Provider；`finished_spans`
///   先强制刷新再读取缓冲。
/// - **契约（What）**：`TestTracing` 被 drop 时 Provider 随之释放，尚未结束的 Span 由 SDK 在 drop 时补结束。
pub struct TestTracing {
    provider: TracerProvider,
    exporter: InMemorySpanExporter,
}

impl TestTracing {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_config(
                trace::config()
                    .with_sampler(trace::Sampler::AlwaysOn)
                    .with_resource(Resource::default()),
            )
            .with_simple_exporter(exporter.clone())
            .build();
        Self { provider, exporter }
    }

    /// 以固定名称获取 SDK Tracer。
    pub fn tracer(&self) -> Tracer {
        self.provider.tracer("aware_guards.test")
    }

    pub fn exporter(&self) -> &InMemorySpanExporter {
        &self.exporter
    }

    /// 强制刷新后返回全部已导出 Span。
    ///
    /// 刷新或读取失败时 panic，测试不应在导出异常时继续断言。
    pub fn finished_spans(&self) -> Vec<SpanData> {
        for result in self.provider.force_flush() {
            if let Err(err) = result {
                panic!("span flush failed: {err}");
            }
        }
        match self.exporter.get_finished_spans() {
            Ok(spans) => spans,
            Err(err) => panic!("reading exported spans failed: {err}"),
        }
    }

    /// 按名称查找唯一的已导出 Span。
    ///
    /// 名称不存在或重复时 panic，便于测试直接暴露错误。
    pub fn span_named(&self, name: &str) -> SpanData {
        let mut matches: Vec<SpanData> = self
            .finished_spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect();
        assert_eq!(
            matches.len(),
            1,
            "expected exactly one finished span named `{name}`"
        );
        matches.remove(0)
    }

    pub fn reset(&self) {
        self.exporter.reset();
    }
}

impl Default for TestTracing {
    fn default() -> Self {
        Self::new()
    }
}

/// `SpanData` 的断言辅助。
pub trait SpanDataExt {
    /// 读取字符串化的属性值。
    fn attribute(&self, key: &str) -> Option<String>;

    /// 是否存在指定属性键。
    fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// Span 状态是否为 `Error`。
    fn is_error(&self) -> bool;

    /// 名为 `exception` 的事件，按记录顺序返回其属性。
    fn exception_events(&self) -> Vec<Vec<(String, String)>>;
}

impl SpanDataExt for SpanData {
    fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.as_str().into_owned())
    }

    fn is_error(&self) -> bool {
        matches!(self.status, Status::Error { .. })
    }

    fn exception_events(&self) -> Vec<Vec<(String, String)>> {
        self.events
            .iter()
            .filter(|event| event.name == "exception")
            .map(|event| {
                event
                    .attributes
                    .iter()
                    .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
                    .collect()
            })
            .collect()
    }
}
