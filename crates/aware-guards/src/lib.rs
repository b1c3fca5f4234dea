//! aware-guards：把守卫策略元数据写入 OpenTelemetry Span。
//!
//! # 教案式概览
//! - **意图（Why）**：在函数级声明条件表达式、严重级别、评估环境、过滤器与生效日期，由外部评估服务读取
//!   Span 属性判断运行期行为（如延迟）是否违规，必要时阻断流水线。
//! - **结构（How）**：
//!   - [`GuardDescriptor`] / [`GuardBuilder`]：不可变的守卫描述及其流式构造器；
//!   - [`GuardInterceptor`]：包裹被守卫函数，决定新建还是复用 Span，并写入完整属性集；
//!   - [`create_guard`]：流式发射器，把稀疏属性写到已有的活跃 Span；
//!   - [`GuardedFn`] / [`Decoration`]：启动期登记的有序装饰列表，保证守卫总在独立建 Span 装饰之内执行；
//!   - [`install`] / [`global_interceptor`]：启动注册与过程宏使用的全局入口；
//!   - `#[guarded]` / `#[with_span]`（`macros` 特性）：声明式写法。
//! - **契约（What）**：属性键见 [`keys`]；守卫应用本身从不返回错误，被守卫函数的错误原样返回。
//!
//! ```no_run
//! use aware_guards::{FunctionSite, GuardDescriptor, GuardedFn, Severity, global_interceptor};
//! use opentelemetry::Context;
//!
//! let checkout = GuardedFn::new(FunctionSite::new("CheckoutService", "submit")).guarded(
//!     GuardDescriptor::builder()
//!         .for_condition("avg_latency < 500")
//!         .at_severity(Severity::Fatal)
//!         .build(),
//! );
//!
//! let total: Result<u64, std::io::Error> =
//!     global_interceptor().call(&Context::current(), &checkout, |_cx| Ok(42));
//! # let _ = total;
//! ```

pub mod config;
pub mod decoration;
pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod install;
pub mod interceptor;
pub mod keys;
mod scope;
pub mod severity;

pub use config::GuardsConfig;
pub use decoration::{Decoration, GuardedFn, Precedence, WithSpan};
pub use descriptor::{FunctionSite, GuardBuilder, GuardDescriptor};
pub use emitter::create_guard;
pub use error::{Error, Result};
pub use install::{active_config, force_flush, global_interceptor, install, install_with_exporter};
pub use interceptor::GuardInterceptor;
pub use scope::GuardedCall;
pub use severity::{GuardSpanKind, ParseSeverityError, Severity};

#[cfg(feature = "macros")]
pub use aware_guards_macros::{guarded, with_span};

/// 过程宏展开代码使用的路径，不属于稳定 API。
#[doc(hidden)]
pub mod __private {
    use core::fmt::{Debug, Display};

    pub use opentelemetry::{Context, trace::FutureExt};

    /// 错误文本的取值视图：`(&ErrorView(err)).describe()` 在 `E: Display` 时取 `Display`，否则取 `Debug`。
    pub struct ErrorView<'a, E>(pub &'a E);

    pub trait DescribeDisplay {
        fn describe(&self) -> String;
    }

    impl<E: Display> DescribeDisplay for ErrorView<'_, E> {
        fn describe(&self) -> String {
            self.0.to_string()
        }
    }

    pub trait DescribeDebug {
        fn describe(&self) -> String;
    }

    impl<E: Debug> DescribeDebug for &ErrorView<'_, E> {
        fn describe(&self) -> String {
            format!("{:?}", self.0)
        }
    }
}
