use core::{fmt, str::FromStr};

use opentelemetry::trace::SpanKind;
use serde::{Deserialize, Serialize};

/// 守卫违规的严重级别。
///
/// # 教案式说明
/// - **意图（Why）**：评估服务据此决定是仅告警还是阻断 CI/CD 流水线。
/// - **契约（What）**：写入 Span 时使用符号名 `WARN` / `FATAL`；`Warn < Fatal`；默认 `Warn`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// 非阻断。
    #[default]
    Warn,
    /// 阻断流水线。
    Fatal,
}

impl Severity {
    /// 写入 `aware.guard.severity` 的符号名。
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Warn => "WARN",
            Severity::Fatal => "FATAL",
        }
    }

    pub const fn is_blocking(self) -> bool {
        matches!(self, Severity::Fatal)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 无法识别的严重级别文本。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown guard severity `{0}`, expected WARN or FATAL")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("WARN") {
            Ok(Severity::Warn)
        } else if trimmed.eq_ignore_ascii_case("FATAL") {
            Ok(Severity::Fatal)
        } else {
            Err(ParseSeverityError(s.to_string()))
        }
    }
}

/// 守卫新建 Span 时使用的种类，与 OpenTelemetry `SpanKind` 一一对应。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardSpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl From<GuardSpanKind> for SpanKind {
    fn from(kind: GuardSpanKind) -> Self {
        match kind {
            GuardSpanKind::Internal => SpanKind::Internal,
            GuardSpanKind::Server => SpanKind::Server,
            GuardSpanKind::Client => SpanKind::Client,
            GuardSpanKind::Producer => SpanKind::Producer,
            GuardSpanKind::Consumer => SpanKind::Consumer,
        }
    }
}
