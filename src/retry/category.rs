//! エラーの分類
//!
//! # 分類の優先順位
//!
//! 1. エラー連鎖（`source()`）のどこかに [`CategorizedError`] があれば、その分類を採用
//! 2. 型による判定（[`ProviderError`]、`std::io::Error`、タイムアウト、コンテキスト終了）
//! 3. エラーメッセージの部分一致（SDK の不透明なエラー向けの最終手段）
//!
//! いずれにも該当しないエラーは [`ErrorCategory::Permanent`] として扱います。

use std::error::Error;
use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ContextError;
use crate::error::ProviderError;

/// リトライ判定用のエラーカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// 一時的なエラー（リトライ対象）
    Transient,

    /// 恒久的なエラー（認証・認可等、リトライしない）
    Permanent,

    /// 入力起因のエラー（バリデーション等、リトライしない）
    UserInput,
}

impl ErrorCategory {
    /// リトライ対象かどうか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// カテゴリを明示したエラー
///
/// ヒューリスティックよりも優先されます。例えば 429 を
/// [`ErrorCategory::Permanent`] としてマークすればリトライを抑止できます。
#[derive(Debug)]
pub struct CategorizedError {
    category: ErrorCategory,
    retry_after: Option<Duration>,
    source: Box<dyn Error + Send + Sync>,
}

impl CategorizedError {
    /// カテゴリを指定して生成
    pub fn new(category: ErrorCategory, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            category,
            retry_after: None,
            source: source.into(),
        }
    }

    /// 一時的なエラーとして生成
    pub fn transient(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::Transient, source)
    }

    /// 恒久的なエラーとして生成
    pub fn permanent(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::Permanent, source)
    }

    /// 入力起因のエラーとして生成
    pub fn user_input(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::UserInput, source)
    }

    /// サーバー指定の待機時間を付与
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// 元のエラーを取り出す
    pub fn into_inner(self) -> Box<dyn Error + Send + Sync> {
        self.source
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Error for CategorizedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// 分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// カテゴリ
    pub category: ErrorCategory,

    /// サーバー指定の待機時間
    pub retry_after: Option<Duration>,
}

impl Classification {
    fn of(category: ErrorCategory) -> Self {
        Self {
            category,
            retry_after: None,
        }
    }
}

// 一時的なエラーを示すメッセージのパターン（小文字で比較）
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "internal server error",
    "temporary failure in name resolution",
    "temporarily unavailable",
    "overloaded",
    "try again",
];

/// エラーを分類する
///
/// # 例
///
/// ```rust
/// use melted_flow::error::ProviderError;
/// use melted_flow::retry::{classify, ErrorCategory};
///
/// let err = ProviderError::Api { status: 503, message: "busy".to_string() };
/// assert_eq!(classify(&err).category, ErrorCategory::Transient);
///
/// let err = ProviderError::Api { status: 401, message: "denied".to_string() };
/// assert_eq!(classify(&err).category, ErrorCategory::Permanent);
/// ```
pub fn classify(err: &(dyn Error + 'static)) -> Classification {
    if let Some(explicit) = chain(err).find_map(|e| e.downcast_ref::<CategorizedError>()) {
        return Classification {
            category: explicit.category(),
            retry_after: explicit.retry_after(),
        };
    }

    if let Some(typed) = chain(err).find_map(classify_typed) {
        return typed;
    }

    let transient = chain(err).any(|e| {
        let message = e.to_string().to_lowercase();
        TRANSIENT_PATTERNS.iter().any(|pattern| message.contains(pattern))
    });
    if transient {
        Classification::of(ErrorCategory::Transient)
    } else {
        Classification::of(ErrorCategory::Permanent)
    }
}

/// HTTPステータスコードからカテゴリを判定
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        408 | 429 | 500..=599 => ErrorCategory::Transient,
        401 | 403 => ErrorCategory::Permanent,
        400..=499 => ErrorCategory::UserInput,
        _ => ErrorCategory::Permanent,
    }
}

fn classify_typed(err: &(dyn Error + 'static)) -> Option<Classification> {
    if let Some(provider) = err.downcast_ref::<ProviderError>() {
        let category = match provider {
            ProviderError::Api { status, .. } => category_for_status(*status),
            ProviderError::RateLimitExceeded { .. }
            | ProviderError::Timeout
            | ProviderError::Network(_)
            | ProviderError::Stream(_) => ErrorCategory::Transient,
            ProviderError::AuthenticationError(_) => ErrorCategory::Permanent,
            ProviderError::InvalidResponse(_) => ErrorCategory::Permanent,
            ProviderError::IoError(io_err) => category_for_io(io_err)?,
        };
        return Some(Classification {
            category,
            retry_after: provider.retry_after(),
        });
    }

    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return category_for_io(io_err).map(Classification::of);
    }

    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(Classification::of(ErrorCategory::Transient));
    }

    if err.downcast_ref::<ContextError>().is_some() {
        return Some(Classification::of(ErrorCategory::Permanent));
    }

    None
}

fn category_for_io(err: &io::Error) -> Option<ErrorCategory> {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::Interrupted => Some(ErrorCategory::Transient),
        io::ErrorKind::PermissionDenied => Some(ErrorCategory::Permanent),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Some(ErrorCategory::UserInput),
        // DNS 失敗等は Other として届くためメッセージ判定に委ねる
        _ => None,
    }
}

fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |e: &&'a (dyn Error + 'static)| (*e).source())
}
