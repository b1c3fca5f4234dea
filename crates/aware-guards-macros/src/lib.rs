//! aware-guards 过程宏入口。
//!
//! # 设计意图（Why）
//! - 提供守卫的声明式写法：`#[guarded(...)]` 对应守卫描述，`#[with_span(...)]` 对应独立的建 Span 装饰；
//! - 两个属性同时出现时，先展开的一方吞并另一方，只生成一份 `GuardedFn`，执行顺序交由运行期的优先级排序决定，
//!   因而与声明先后无关。
//!
//! # 集成方式（How）
//! - 业务 crate 依赖 `aware-guards`（默认启用 `macros` 特性），写作 `#[aware_guards::guarded(...)]`；
//! - 展开代码在函数内以 `static OnceLock` 缓存 `GuardedFn`，每次调用经由 `aware_guards::global_interceptor()`
//!   以 `Context::current()` 为父上下文进入拦截；
//! - 返回类型末段为 `Result` 的函数在 `Err` 时记录错误（优先 `Display`，否则 `Debug`），其余函数只在 panic 时标记错误。

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, Error, Ident, ItemFn, LitBool, LitStr, Meta, ReturnType, Token, Type,
    meta::ParseNestedMeta, parse_macro_input, punctuated::Punctuated, spanned::Spanned, token,
};

/// 为函数挂载守卫。
///
/// # 语义说明（What）
/// - 参数：`since`、`condition`、`environment`、`name`（Span 名称覆盖）、`type_name`（声明类型覆盖）取字符串；
///   `filters` 取字符串或字符串数组；`severity` 取 `Warn` / `Fatal`；`kind` 取 `Internal` / `Server` /
///   `Client` / `Producer` / `Consumer`；`create_new_span` 取布尔值；
/// - 未给出 `type_name` 时，带接收者（`self` / `&self` / `&mut self`）的方法以 `Self` 的类型名作为声明类型，
///   自由函数与不带接收者的关联函数以模块路径最后一段作为声明类型；
/// - 返回 `Result<_, E>` 时，`Err` 以 `E` 的 `Display` 文本记录；`E` 未实现 `Display` 时退回 `Debug` 文本，
///   两者都未实现则无法编译。
///
/// # 风险提示（Trade-offs）
/// - 不支持 `const fn`；返回 `impl Trait` 的函数不做结果类型标注，`?` 的错误类型推断需由函数体自行确定；
/// - 泛型类型上的方法在所有单态化之间共享一份 `GuardedFn`；声明类型不含泛型参数，各实例名称一致。
#[proc_macro_attribute]
pub fn guarded(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = GuardArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let func = parse_macro_input!(item as ItemFn);
    expand(func, Plan::guard(args))
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// 为函数挂载独立的建 Span 装饰，参数为 `name`、`kind`、`type_name`。
#[proc_macro_attribute]
pub fn with_span(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = WithSpanArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let func = parse_macro_input!(item as ItemFn);
    expand(func, Plan::with_span(args))
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

#[derive(Default)]
struct GuardArgs {
    since: Option<LitStr>,
    condition: Option<LitStr>,
    severity: Option<Ident>,
    environment: Option<LitStr>,
    filters: Option<Vec<LitStr>>,
    name: Option<LitStr>,
    create_new_span: Option<LitBool>,
    kind: Option<Ident>,
    type_name: Option<LitStr>,
}

impl GuardArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("since") {
            self.since = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("condition") {
            self.condition = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("environment") {
            self.environment = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("name") || meta.path.is_ident("value") {
            self.name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("type_name") {
            self.type_name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("create_new_span") {
            self.create_new_span = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("severity") {
            let ident: Ident = meta.value()?.parse()?;
            self.severity = Some(normalize_variant(&ident, SEVERITIES)?);
        } else if meta.path.is_ident("kind") {
            let ident: Ident = meta.value()?.parse()?;
            self.kind = Some(normalize_variant(&ident, SPAN_KINDS)?);
        } else if meta.path.is_ident("filters") {
            let value = meta.value()?;
            if value.peek(token::Bracket) {
                let content;
                syn::bracketed!(content in value);
                let items = Punctuated::<LitStr, Token![,]>::parse_terminated(&content)?;
                self.filters = Some(items.into_iter().collect());
            } else {
                let filter: LitStr = value.parse()?;
                self.filters = Some(if filter.value().is_empty() {
                    Vec::new()
                } else {
                    vec![filter]
                });
            }
        } else {
            return Err(meta.error("unsupported #[guarded] argument"));
        }
        Ok(())
    }

    fn to_tokens(&self) -> TokenStream2 {
        let mut calls = Vec::new();
        if let Some(since) = &self.since {
            calls.push(quote!(.since(#since)));
        }
        if let Some(condition) = &self.condition {
            calls.push(quote!(.for_condition(#condition)));
        }
        if let Some(environment) = &self.environment {
            calls.push(quote!(.in_environment(#environment)));
        }
        if let Some(severity) = &self.severity {
            calls.push(quote!(.at_severity(::aware_guards::Severity::#severity)));
        }
        match self.filters.as_deref() {
            Some([]) => calls.push(quote!(.with_filters(::core::iter::empty::<&'static str>()))),
            Some(filters) => calls.push(quote!(.with_filters([#(#filters),*]))),
            None => {}
        }
        if let Some(name) = &self.name {
            calls.push(quote!(.span_name(#name)));
        }
        if let Some(create) = &self.create_new_span {
            calls.push(quote!(.create_new_span(#create)));
        }
        if let Some(kind) = &self.kind {
            calls.push(quote!(.span_kind(::aware_guards::GuardSpanKind::#kind)));
        }
        quote! {
            .guarded(::aware_guards::GuardDescriptor::builder() #(#calls)* .build())
        }
    }
}

#[derive(Default)]
struct WithSpanArgs {
    name: Option<LitStr>,
    kind: Option<Ident>,
    type_name: Option<LitStr>,
}

impl WithSpanArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("name") || meta.path.is_ident("value") {
            self.name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("type_name") {
            self.type_name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("kind") {
            let ident: Ident = meta.value()?.parse()?;
            self.kind = Some(normalize_variant(&ident, SPAN_KINDS)?);
        } else {
            return Err(meta.error("unsupported #[with_span] argument"));
        }
        Ok(())
    }

    fn to_tokens(&self) -> TokenStream2 {
        let name = self.name.as_ref().map(|name| quote!(.named(#name)));
        let kind = self
            .kind
            .as_ref()
            .map(|kind| quote!(.kind(::aware_guards::GuardSpanKind::#kind)));
        quote! {
            .with_span(::aware_guards::WithSpan::new() #name #kind)
        }
    }
}

const SEVERITIES: &[&str] = &["Warn", "Fatal"];
const SPAN_KINDS: &[&str] = &["Internal", "Server", "Client", "Producer", "Consumer"];

/// 忽略大小写地把 `FATAL` / `fatal` 等写法归一为枚举变体名。
fn normalize_variant(ident: &Ident, variants: &[&str]) -> syn::Result<Ident> {
    let text = ident.to_string();
    variants
        .iter()
        .find(|variant| variant.eq_ignore_ascii_case(&text))
        .map(|variant| Ident::new(variant, ident.span()))
        .ok_or_else(|| {
            Error::new(
                ident.span(),
                format!("expected one of: {}", variants.join(", ")),
            )
        })
}

/// 一个函数上的全部装饰。
struct Plan {
    guard: Option<GuardArgs>,
    with_span: Option<WithSpanArgs>,
}

impl Plan {
    fn guard(args: GuardArgs) -> Self {
        Self {
            guard: Some(args),
            with_span: None,
        }
    }

    fn with_span(args: WithSpanArgs) -> Self {
        Self {
            guard: None,
            with_span: Some(args),
        }
    }

    /// 吞并函数上尚未展开的另一种装饰属性，其余属性原样保留。
    fn absorb(&mut self, attrs: Vec<Attribute>) -> syn::Result<Vec<Attribute>> {
        let mut kept = Vec::with_capacity(attrs.len());
        for attr in attrs {
            match attribute_name(&attr).as_deref() {
                Some("guarded") => {
                    if self.guard.is_some() {
                        return Err(Error::new(attr.span(), "duplicate #[guarded] attribute"));
                    }
                    let mut args = GuardArgs::default();
                    if !matches!(attr.meta, Meta::Path(_)) {
                        attr.parse_nested_meta(|meta| args.parse(meta))?;
                    }
                    self.guard = Some(args);
                }
                Some("with_span") => {
                    if self.with_span.is_some() {
                        return Err(Error::new(attr.span(), "duplicate #[with_span] attribute"));
                    }
                    let mut args = WithSpanArgs::default();
                    if !matches!(attr.meta, Meta::Path(_)) {
                        attr.parse_nested_meta(|meta| args.parse(meta))?;
                    }
                    self.with_span = Some(args);
                }
                _ => kept.push(attr),
            }
        }
        Ok(kept)
    }

    fn type_name(&self) -> Option<&LitStr> {
        self.guard
            .as_ref()
            .and_then(|args| args.type_name.as_ref())
            .or_else(|| self.with_span.as_ref().and_then(|args| args.type_name.as_ref()))
    }
}

fn attribute_name(attr: &Attribute) -> Option<String> {
    attr.path()
        .segments
        .last()
        .map(|segment| segment.ident.to_string())
}

fn expand(func: ItemFn, mut plan: Plan) -> syn::Result<TokenStream2> {
    if func.sig.constness.is_some() {
        return Err(Error::new(
            func.sig.constness.span(),
            "guard decorations cannot be applied to const fn",
        ));
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = func;
    let attrs = plan.absorb(attrs)?;

    let fn_name = sig.ident.to_string();
    let site = match plan.type_name() {
        Some(type_name) => quote!(::aware_guards::FunctionSite::new(#type_name, #fn_name)),
        None if sig.receiver().is_some() => quote!(::aware_guards::FunctionSite::from_type_name(
            ::core::any::type_name::<Self>(),
            #fn_name
        )),
        None => quote!(::aware_guards::FunctionSite::from_module_path(
            ::core::module_path!(),
            #fn_name
        )),
    };
    let with_span = plan.with_span.as_ref().map(WithSpanArgs::to_tokens);
    let guard = plan.guard.as_ref().map(GuardArgs::to_tokens);

    let (annotation, fallible) = match &sig.output {
        ReturnType::Default => (quote!(: ()), false),
        ReturnType::Type(_, ty) => match ty.as_ref() {
            Type::ImplTrait(_) => (TokenStream2::new(), false),
            other => (quote!(: #other), is_result(other)),
        },
    };
    let finish = if fallible {
        quote! {
            __aware_call.finish_with(&__aware_result, |__aware_err| {
                use ::aware_guards::__private::{DescribeDebug as _, DescribeDisplay as _};
                (&::aware_guards::__private::ErrorView(__aware_err)).describe()
            });
        }
    } else {
        quote!(__aware_call.finish_ok();)
    };

    let run = if sig.asyncness.is_some() {
        quote! {
            let __aware_cx = ::core::clone::Clone::clone(__aware_call.context());
            let __aware_result #annotation =
                ::aware_guards::__private::FutureExt::with_context(async move #block, __aware_cx).await;
        }
    } else {
        quote! {
            let __aware_attached = ::aware_guards::__private::Context::attach(
                ::core::clone::Clone::clone(__aware_call.context()),
            );
            #[allow(clippy::redundant_closure_call)]
            let __aware_result #annotation = (move || #block)();
            ::core::mem::drop(__aware_attached);
        }
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            static __AWARE_GUARDED_FN: ::std::sync::OnceLock<::aware_guards::GuardedFn> =
                ::std::sync::OnceLock::new();
            let __aware_target = __AWARE_GUARDED_FN.get_or_init(|| {
                ::aware_guards::GuardedFn::new(#site) #with_span #guard
            });
            let __aware_call = ::aware_guards::global_interceptor()
                .enter(&::aware_guards::__private::Context::current(), __aware_target);
            #run
            #finish
            __aware_result
        }
    })
}

fn is_result(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Result"),
        Type::Paren(inner) => is_result(&inner.elem),
        Type::Group(inner) => is_result(&inner.elem),
        _ => false,
    }
}
