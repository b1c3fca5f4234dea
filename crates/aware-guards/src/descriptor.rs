use std::borrow::Cow;

use opentelemetry::{KeyValue, trace::SpanRef};

use crate::{
    keys::{self, guard as guard_keys},
    severity::{GuardSpanKind, Severity},
};

/// 被守卫函数的身份：声明类型与函数名。
///
/// 默认 Span 名称为 `"<declaring_type>.<function>"`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSite {
    declaring_type: Cow<'static, str>,
    function: Cow<'static, str>,
}

impl FunctionSite {
    pub fn new(
        declaring_type: impl Into<Cow<'static, str>>,
        function: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            function: function.into(),
        }
    }

    /// 以模块路径的最后一段作为声明类型，供过程宏在未显式指定 `type_name` 时使用。
    ///
    /// `"shop::orders"` 与 `"place"` 得到 `orders.place`。
    pub fn from_module_path(module_path: &'static str, function: &'static str) -> Self {
        let declaring_type = module_path.rsplit("::").next().unwrap_or(module_path);
        Self::new(declaring_type, function)
    }

    /// 以 `std::any::type_name` 的结果推导声明类型：去掉泛型参数后取最后一段路径。
    ///
    /// `"shop::orders::Ledger<u8>"` 与 `"post"` 得到 `Ledger.post`。
    pub fn from_type_name(type_name: &'static str, function: &'static str) -> Self {
        let without_generics = type_name
            .split_once('<')
            .map_or(type_name, |(path, _)| path);
        let declaring_type = without_generics
            .rsplit("::")
            .next()
            .unwrap_or(without_generics);
        Self::new(declaring_type, function)
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn default_span_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.function)
    }
}

impl core::fmt::Display for FunctionSite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.function)
    }
}

/// 挂在被守卫函数上的不可变策略描述。
///
/// # 教案式说明
/// - **意图（Why）**：把条件、严重级别、环境、过滤器与生效日期打包成一份声明式元数据，交给外部评估服务解读。
/// - **逻辑（How）**：只能经由 [`GuardBuilder`] 构造，构造完成后仅暴露只读访问器；写入 Span 时有两种形态：
///   [`attributes`](Self::attributes) 无条件给出全部五个键，[`sparse_attributes`](Self::sparse_attributes)
///   省略空白字段。
/// - **契约（What）**：
///   - 所有字符串原样透传，不校验日期格式或条件语法；
///   - 默认值：`since = ""`、`condition = ""`、`severity = Warn`、`environment = ""`、`filters = []`、
///     `span_name = None`、`create_new_span = true`、`span_kind = Internal`。
/// - **风险与取舍（Trade-offs）**：两种写入形态刻意不一致。拦截路径保证下游总能看到完整的五个键；
///   流式路径保持稀疏，避免覆盖同一 Span 上其他守卫已写入的值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardDescriptor {
    since: String,
    condition: String,
    severity: Severity,
    environment: String,
    filters: Vec<String>,
    span_name: Option<String>,
    create_new_span: bool,
    span_kind: GuardSpanKind,
}

impl Default for GuardDescriptor {
    fn default() -> Self {
        Self {
            since: String::new(),
            condition: String::new(),
            severity: Severity::Warn,
            environment: String::new(),
            filters: Vec::new(),
            span_name: None,
            create_new_span: true,
            span_kind: GuardSpanKind::Internal,
        }
    }
}

impl GuardDescriptor {
    pub fn builder() -> GuardBuilder {
        GuardBuilder::default()
    }

    pub fn since(&self) -> &str {
        &self.since
    }

    pub fn condition(&self) -> &str {
        &self.condition
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn span_name(&self) -> Option<&str> {
        self.span_name.as_deref()
    }

    pub fn create_new_span(&self) -> bool {
        self.create_new_span
    }

    pub fn span_kind(&self) -> GuardSpanKind {
        self.span_kind
    }

    /// 过滤表达式的逗号拼接形式，空序列得到空串。
    pub fn joined_filters(&self) -> String {
        self.filters.join(keys::FILTER_SEPARATOR)
    }

    /// 新建 Span 的名称：非空的覆盖名优先，否则回退到 `site` 的默认名称。
    pub fn resolve_span_name(&self, site: &FunctionSite) -> String {
        match self.span_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => site.default_span_name(),
        }
    }

    /// 拦截路径写入的完整属性集：五个键全部给出，空串也照写。
    pub fn attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(guard_keys::SINCE, self.since.clone()),
            KeyValue::new(guard_keys::CONDITION, self.condition.clone()),
            KeyValue::new(guard_keys::ENVIRONMENT, self.environment.clone()),
            KeyValue::new(guard_keys::FILTERS, self.joined_filters()),
            KeyValue::new(guard_keys::SEVERITY, self.severity.as_str()),
        ]
    }

    /// 流式路径写入的稀疏属性集。
    ///
    /// 条件、环境、生效日期在去除首尾空白后为空即省略；过滤器为空序列即省略；严重级别总是写入。
    pub fn sparse_attributes(&self) -> Vec<KeyValue> {
        let mut attributes = Vec::with_capacity(guard_keys::ALL.len());
        if !is_blank(&self.condition) {
            attributes.push(KeyValue::new(guard_keys::CONDITION, self.condition.clone()));
        }
        if !is_blank(&self.environment) {
            attributes.push(KeyValue::new(
                guard_keys::ENVIRONMENT,
                self.environment.clone(),
            ));
        }
        attributes.push(KeyValue::new(guard_keys::SEVERITY, self.severity.as_str()));
        if !self.filters.is_empty() {
            attributes.push(KeyValue::new(guard_keys::FILTERS, self.joined_filters()));
        }
        if !is_blank(&self.since) {
            attributes.push(KeyValue::new(guard_keys::SINCE, self.since.clone()));
        }
        attributes
    }

    /// 将完整属性集写到给定 Span；Span 不活跃时由 OpenTelemetry 的 no-op 语义吸收。
    pub fn annotate(&self, span: &SpanRef<'_>) {
        for attribute in self.attributes() {
            span.set_attribute(attribute);
        }
    }

    /// 将稀疏属性集写到给定 Span，返回写入的属性数量。
    pub fn annotate_sparse(&self, span: &SpanRef<'_>) -> usize {
        let attributes = self.sparse_attributes();
        let written = attributes.len();
        for attribute in attributes {
            span.set_attribute(attribute);
        }
        written
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// [`GuardDescriptor`] 的流式构造器，同时也是流式发射器的入口（见 [`crate::create_guard`]）。
///
/// 每个方法都消费并返回构造器本身；终结调用为 [`build`](Self::build) 或
/// [`guard`](Self::guard) / [`guard_current`](Self::guard_current)。
#[derive(Clone, Debug, Default)]
#[must_use = "a guard builder does nothing until `build()` or `guard()` is called"]
pub struct GuardBuilder {
    descriptor: GuardDescriptor,
}

impl GuardBuilder {
    pub fn for_condition(mut self, condition: impl Into<String>) -> Self {
        self.descriptor.condition = condition.into();
        self
    }

    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.descriptor.environment = environment.into();
        self
    }

    pub fn at_severity(mut self, severity: Severity) -> Self {
        self.descriptor.severity = severity;
        self
    }

    /// 替换整组过滤表达式，顺序即拼接顺序。
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// 生效日期，约定 `YYYY-MM-DD`。
    pub fn since(mut self, date: impl Into<String>) -> Self {
        self.descriptor.since = date.into();
        self
    }

    pub fn span_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.span_name = Some(name.into());
        self
    }

    pub fn create_new_span(mut self, create: bool) -> Self {
        self.descriptor.create_new_span = create;
        self
    }

    pub fn span_kind(mut self, kind: GuardSpanKind) -> Self {
        self.descriptor.span_kind = kind;
        self
    }

    pub fn build(self) -> GuardDescriptor {
        self.descriptor
    }

    pub(crate) fn descriptor(&self) -> &GuardDescriptor {
        &self.descriptor
    }
}
