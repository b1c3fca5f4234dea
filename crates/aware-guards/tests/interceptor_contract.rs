//! 守卫拦截器的 Span 生命周期与属性契约。

use std::{
    error::Error as StdError,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex},
};

use aware_guards::{
    FunctionSite, GuardDescriptor, GuardInterceptor, GuardSpanKind, GuardedFn, GuardsConfig,
    Severity, keys,
};
use aware_guards_testkit::{SpanDataExt as _, TestTracing};
use opentelemetry::{
    Context, KeyValue,
    trace::{SpanBuilder, SpanKind, TraceContextExt as _, Tracer},
};

#[derive(Debug)]
struct PaymentDeclined {
    order: u32,
}

impl fmt::Display for PaymentDeclined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment declined for order {}", self.order)
    }
}

impl StdError for PaymentDeclined {}

fn checkout_guard() -> GuardDescriptor {
    GuardDescriptor::builder()
        .for_condition("avg_latency < 500")
        .in_environment("staging")
        .at_severity(Severity::Fatal)
        .with_filters(["input_size > 1000", "region = eu"])
        .since("2024-03-01")
        .build()
}

fn checkout_fn(descriptor: GuardDescriptor) -> GuardedFn {
    GuardedFn::new(FunctionSite::new("CheckoutService", "submit")).guarded(descriptor)
}

/// 记录每次建 Span 时构造器上已有属性的 Tracer。
#[derive(Clone)]
struct StartRecordingTracer {
    inner: opentelemetry_sdk::trace::Tracer,
    started: Arc<Mutex<Vec<(String, Vec<KeyValue>)>>>,
}

impl StartRecordingTracer {
    fn new(harness: &TestTracing) -> Self {
        Self {
            inner: harness.tracer(),
            started: Arc::default(),
        }
    }

    fn started(&self) -> Vec<(String, Vec<KeyValue>)> {
        self.started.lock().unwrap().clone()
    }
}

impl Tracer for StartRecordingTracer {
    type Span = opentelemetry_sdk::trace::Span;

    fn build_with_context(&self, builder: SpanBuilder, parent_cx: &Context) -> Self::Span {
        self.started.lock().unwrap().push((
            builder.name.to_string(),
            builder.attributes.clone().unwrap_or_default(),
        ));
        self.inner.build_with_context(builder, parent_cx)
    }
}

#[test]
fn guard_attributes_are_on_the_span_before_the_body_runs() {
    let harness = TestTracing::new();
    let tracer = StartRecordingTracer::new(&harness);
    let interceptor = GuardInterceptor::new(tracer.clone());
    let target = checkout_fn(checkout_guard());

    interceptor.call_infallible(&Context::new(), &target, |cx| {
        assert!(cx.has_active_span());
        let started = tracer.started();
        assert_eq!(started.len(), 1, "span must be started before the body");
        let (name, attributes) = &started[0];
        assert_eq!(name, "CheckoutService.submit");
        let keys_at_start: Vec<&str> = attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys_at_start, keys::guard::ALL.to_vec());
        let condition = attributes
            .iter()
            .find(|kv| kv.key.as_str() == keys::guard::CONDITION)
            .map(|kv| kv.value.as_str().into_owned());
        assert_eq!(condition.as_deref(), Some("avg_latency < 500"));
    });

    assert_eq!(tracer.started().len(), 1);
    assert_eq!(harness.finished_spans().len(), 1);
}

/// 新建分支：恰好一个 Span，属性在函数体执行前已就位，并以默认名称命名。
#[test]
fn new_span_branch_creates_names_and_ends_exactly_one_span() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let result: Result<u32, PaymentDeclined> =
        interceptor.call(&Context::new(), &target, |cx| {
            assert!(cx.has_active_span(), "body must run under the guard span");
            assert!(
                harness.finished_spans().is_empty(),
                "span must still be open while the body runs"
            );
            Ok(7)
        });

    assert_eq!(result.unwrap(), 7);
    let spans = harness.finished_spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "CheckoutService.submit");
    assert_eq!(span.span_kind, SpanKind::Internal);
    assert!(!span.is_error());
    assert_eq!(
        span.attribute(keys::guard::CONDITION).as_deref(),
        Some("avg_latency < 500")
    );
    assert_eq!(
        span.attribute(keys::guard::ENVIRONMENT).as_deref(),
        Some("staging")
    );
    assert_eq!(span.attribute(keys::guard::SEVERITY).as_deref(), Some("FATAL"));
    assert_eq!(
        span.attribute(keys::guard::FILTERS).as_deref(),
        Some("input_size > 1000,region = eu")
    );
    assert_eq!(span.attribute(keys::guard::SINCE).as_deref(), Some("2024-03-01"));
}

#[test]
fn attributes_are_visible_to_the_body_through_the_explicit_context() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    interceptor.call_infallible(&Context::new(), &target, |cx| {
        // 函数体内的流式守卫落在同一个 Span 上。
        aware_guards::create_guard()
            .for_condition("p99 < 900")
            .guard(cx);
    });

    let span = harness.span_named("CheckoutService.submit");
    assert_eq!(span.attribute(keys::guard::CONDITION).as_deref(), Some("p99 < 900"));
}

#[test]
fn span_name_override_and_kind_are_honoured() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(
        GuardDescriptor::builder()
            .span_name("custom")
            .span_kind(GuardSpanKind::Server)
            .build(),
    );

    interceptor.call_infallible(&Context::new(), &target, |_| ());

    let span = harness.span_named("custom");
    assert_eq!(span.span_kind, SpanKind::Server);
}

#[test]
fn new_span_is_child_of_the_callers_context() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let parent = Context::new().with_span(harness.tracer().start("http.request"));
    let parent_span_id = parent.span().span_context().span_id();

    interceptor.call_infallible(&parent, &checkout_fn(checkout_guard()), |_| ());
    parent.span().end();

    let child = harness.span_named("CheckoutService.submit");
    assert_eq!(child.parent_span_id, parent_span_id);
    let root = harness.span_named("http.request");
    assert!(
        !root.has_attribute(keys::guard::CONDITION),
        "the caller's span must not receive guard attributes"
    );
}

/// 错误路径：错误状态、异常事件、Span 结束，调用方拿到的是同一个错误值。
#[test]
fn error_is_recorded_and_propagated_with_identity_preserved() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let original: Box<dyn StdError + Send + Sync> = Box::new(PaymentDeclined { order: 42 });
    let original_addr = &*original as *const (dyn StdError + Send + Sync) as *const u8;

    let result: Result<(), Box<dyn StdError + Send + Sync>> =
        interceptor.call(&Context::new(), &target, move |_| Err(original));

    let err = result.unwrap_err();
    let returned_addr = &*err as *const (dyn StdError + Send + Sync) as *const u8;
    assert_eq!(original_addr, returned_addr, "error must not be re-wrapped");
    assert_eq!(
        err.downcast_ref::<PaymentDeclined>().map(|e| e.order),
        Some(42)
    );

    let span = harness.span_named("CheckoutService.submit");
    assert!(span.is_error());
    let events = span.exception_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].contains(&(
        keys::exception::MESSAGE.to_string(),
        "payment declined for order 42".to_string()
    )));
}

#[test]
fn panicking_body_still_ends_span_with_error_status() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        interceptor.call_infallible(&Context::new(), &target, |_| -> () {
            panic!("inventory service unreachable")
        })
    }));

    assert!(outcome.is_err());
    let span = harness.span_named("CheckoutService.submit");
    assert!(span.is_error());
}

/// 复用分支：不新建 Span，五个属性无条件写入调用时的活跃 Span（空串也写）。
#[test]
fn reuse_branch_annotates_active_span_without_creating_one() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(
        GuardDescriptor::builder()
            .for_condition("avg_latency < 80")
            .create_new_span(false)
            .build(),
    );
    let cx = Context::new().with_span(harness.tracer().start("grpc.call"));

    let result: Result<&str, PaymentDeclined> = interceptor.call(&cx, &target, |inner| {
        assert_eq!(
            inner.span().span_context().span_id(),
            cx.span().span_context().span_id()
        );
        Ok("reserved")
    });
    assert_eq!(result.unwrap(), "reserved");
    assert!(
        harness.finished_spans().is_empty(),
        "reuse branch must not end the caller's span"
    );
    cx.span().end();

    let spans = harness.finished_spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "grpc.call");
    assert_eq!(
        span.attribute(keys::guard::CONDITION).as_deref(),
        Some("avg_latency < 80")
    );
    for key in keys::guard::ALL {
        assert!(span.has_attribute(key), "missing {key}");
    }
    assert_eq!(span.attribute(keys::guard::ENVIRONMENT).as_deref(), Some(""));
    assert_eq!(span.attribute(keys::guard::FILTERS).as_deref(), Some(""));
}

#[test]
fn reuse_branch_leaves_caller_span_status_untouched_on_error() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(GuardDescriptor::builder().create_new_span(false).build());
    let cx = Context::new().with_span(harness.tracer().start("grpc.call"));

    let result: Result<(), PaymentDeclined> =
        interceptor.call(&cx, &target, |_| Err(PaymentDeclined { order: 1 }));
    assert_eq!(result.unwrap_err().order, 1);
    cx.span().end();

    let span = harness.span_named("grpc.call");
    assert!(!span.is_error());
    assert!(span.exception_events().is_empty());
}

#[test]
fn reuse_branch_without_active_span_is_a_noop() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(GuardDescriptor::builder().create_new_span(false).build());

    let value = interceptor.call_infallible(&Context::new(), &target, |cx| {
        assert!(!cx.has_active_span());
        5
    });

    assert_eq!(value, 5);
    assert!(harness.finished_spans().is_empty());
}

#[test]
fn disabled_interceptor_passes_through() {
    let harness = TestTracing::new();
    let config = GuardsConfig {
        enabled: false,
        ..GuardsConfig::default()
    };
    let interceptor = GuardInterceptor::from_config(harness.tracer(), &config);
    assert!(!interceptor.is_enabled());

    let result: Result<u8, PaymentDeclined> =
        interceptor.call(&Context::new(), &checkout_fn(checkout_guard()), |cx| {
            assert!(!cx.has_active_span());
            Ok(1)
        });

    assert_eq!(result.unwrap(), 1);
    assert!(harness.finished_spans().is_empty());
}

#[test]
fn async_call_runs_future_inside_guard_span() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let result: Result<u64, PaymentDeclined> = futures::executor::block_on(
        interceptor.call_async(&Context::new(), &target, |cx| async move {
            assert!(cx.has_active_span());
            assert!(Context::current().has_active_span());
            Ok(99)
        }),
    );

    assert_eq!(result.unwrap(), 99);
    let span = harness.span_named("CheckoutService.submit");
    assert!(!span.is_error());
    assert_eq!(span.attribute(keys::guard::SEVERITY).as_deref(), Some("FATAL"));
}

#[test]
fn async_error_is_recorded() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let result: Result<(), PaymentDeclined> = futures::executor::block_on(
        interceptor.call_async(&Context::new(), &target, |_| async {
            Err(PaymentDeclined { order: 3 })
        }),
    );

    assert_eq!(result.unwrap_err().order, 3);
    assert!(harness.span_named("CheckoutService.submit").is_error());
}

#[test]
fn dropped_future_ends_span_without_error() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());
    let target = checkout_fn(checkout_guard());

    let root = Context::new();
    {
        let pending = interceptor.call_async(&root, &target, |_| {
            futures::future::pending::<Result<(), PaymentDeclined>>()
        });
        let mut pending = Box::pin(pending);
        let waker = futures::task::noop_waker();
        let mut task_cx = std::task::Context::from_waker(&waker);
        assert!(pending.as_mut().poll(&mut task_cx).is_pending());
    }

    let span = harness.span_named("CheckoutService.submit");
    assert!(!span.is_error());
}

#[derive(Debug)]
struct Undisplayable(u8);

#[test]
fn finish_with_records_caller_supplied_description() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());

    let call = interceptor.enter(&Context::new(), &checkout_fn(checkout_guard()));
    let result: Result<(), Undisplayable> = Err(Undisplayable(7));
    call.finish_with(&result, |err| format!("{err:?}"));

    let span = harness.span_named("CheckoutService.submit");
    assert!(span.is_error());
    let events = span.exception_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].contains(&(
        keys::exception::MESSAGE.to_string(),
        "Undisplayable(7)".to_string()
    )));
    assert!(
        events[0]
            .iter()
            .any(|(key, value)| key == keys::exception::TYPE && value.ends_with("Undisplayable"))
    );
}

#[test]
fn enter_exposes_owned_span_count() {
    let harness = TestTracing::new();
    let interceptor = GuardInterceptor::new(harness.tracer());

    let creating = interceptor.enter(&Context::new(), &checkout_fn(checkout_guard()));
    assert_eq!(creating.owned_spans(), 1);
    creating.finish_ok();

    let reusing = interceptor.enter(
        &Context::new(),
        &checkout_fn(GuardDescriptor::builder().create_new_span(false).build()),
    );
    assert_eq!(reusing.owned_spans(), 0);
    reusing.finish_ok();

    assert_eq!(harness.finished_spans().len(), 1);
}
