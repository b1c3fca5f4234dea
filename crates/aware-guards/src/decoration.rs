//! 有序装饰列表：决定同一函数上多个包装层的执行先后。
//!
//! # 教案式说明
//! - **意图（Why）**：函数同时带有守卫与独立的“建 Span”装饰时，守卫必须观察并标注后者已经打开的 Span，
//!   而不能再嵌套一个重复 Span；这一顺序不能依赖声明先后。
//! - **逻辑（How）**：每个 [`Decoration`] 给出固定的 [`Precedence`]，[`GuardedFn`] 在每次追加后做稳定排序，
//!   拦截器总是按“外层在前”的顺序进入。
//! - **契约（What）**：`SpanCreation` 永远包在 `Guard` 外面；同一函数至多一个守卫，后加者替换先加者。

use crate::{
    descriptor::{FunctionSite, GuardDescriptor},
    severity::GuardSpanKind,
};

/// 包装层优先级，值越小越靠外。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    /// 独立建 Span 的装饰。
    SpanCreation,
    /// 守卫，最低优先级，始终最内层。
    Guard,
}

/// 独立的建 Span 装饰，与守卫无关，仅负责打开、结束 Span 并记录错误。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WithSpan {
    name: Option<String>,
    kind: GuardSpanKind,
}

impl WithSpan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: GuardSpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn span_kind(&self) -> GuardSpanKind {
        self.kind
    }

    pub fn resolve_span_name(&self, site: &FunctionSite) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => site.default_span_name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoration {
    WithSpan(WithSpan),
    Guard(GuardDescriptor),
}

impl Decoration {
    pub fn precedence(&self) -> Precedence {
        match self {
            Decoration::WithSpan(_) => Precedence::SpanCreation,
            Decoration::Guard(_) => Precedence::Guard,
        }
    }
}

/// 一个被装饰函数在启动期登记的全部元数据。
///
/// # 教案式说明
/// - **意图（Why）**：以显式的不可变配置替代运行期反射读取注解，调用点把它与函数体一起交给拦截器。
/// - **逻辑（How）**：`decorations` 始终按 [`Precedence`] 稳定排序，因此 `with_span(..).guarded(..)` 与
///   `guarded(..).with_span(..)` 得到完全相同的结果。
/// - **契约（What）**：构造后只读；通常放在 `static OnceLock` 中跨调用复用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedFn {
    site: FunctionSite,
    decorations: Vec<Decoration>,
}

impl GuardedFn {
    pub fn new(site: FunctionSite) -> Self {
        Self {
            site,
            decorations: Vec::new(),
        }
    }

    /// 追加一个装饰并重新排序；守卫装饰会替换已存在的守卫。
    pub fn decorate(mut self, decoration: Decoration) -> Self {
        if matches!(decoration, Decoration::Guard(_)) {
            self.decorations
                .retain(|existing| !matches!(existing, Decoration::Guard(_)));
        }
        self.decorations.push(decoration);
        self.decorations.sort_by_key(Decoration::precedence);
        self
    }

    pub fn guarded(self, descriptor: GuardDescriptor) -> Self {
        self.decorate(Decoration::Guard(descriptor))
    }

    pub fn with_span(self, with_span: WithSpan) -> Self {
        self.decorate(Decoration::WithSpan(with_span))
    }

    pub fn site(&self) -> &FunctionSite {
        &self.site
    }

    /// 按外层到内层的顺序返回装饰。
    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    pub fn guard(&self) -> Option<&GuardDescriptor> {
        self.decorations.iter().find_map(|decoration| match decoration {
            Decoration::Guard(descriptor) => Some(descriptor),
            Decoration::WithSpan(_) => None,
        })
    }

    /// 函数是否已由独立装饰负责建 Span。
    pub fn creates_own_span(&self) -> bool {
        self.decorations
            .iter()
            .any(|decoration| matches!(decoration, Decoration::WithSpan(_)))
    }
}
