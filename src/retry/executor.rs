//! バックオフ付きリトライ実行
//!
//! # 実行フロー
//!
//! 1. コンテキストが終了していれば即座に中断
//! 2. 操作を実行（コンテキストと競合させる）
//! 3. 失敗した場合はエラーを分類
//!    - 一時的でなければ即座に返す
//!    - 試行回数が上限に達していれば最後のエラーを返す
//! 4. `max(delay(n), retry_after)` だけ待機（コンテキストの終了で中断）
//! 5. 1 に戻る

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::{Context, ContextError};
use super::category::{classify, ErrorCategory};
use super::config::RetryConfig;

/// リトライの進行状況（ベストエフォートで通知）
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    /// 試行開始
    AttemptStart { attempt: u32 },

    /// 試行失敗
    AttemptFailed {
        attempt: u32,
        error: String,
        category: ErrorCategory,
    },

    /// 待機してから再試行
    Retrying { attempt: u32, delay: Duration },

    /// 成功
    Success { attempt: u32 },

    /// 試行回数の上限に到達
    Exhausted { attempts: u32, error: String },
}

/// リトライ実行のエラー
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// 全ての試行が一時的なエラーで失敗
    #[error("リトライ上限（{attempts}回）に達しました: {last_error}")]
    Exhausted {
        /// 試行回数
        attempts: u32,
        /// 最後の試行のエラー
        last_error: E,
    },

    /// リトライ対象外のエラー
    #[error("リトライ対象外のエラー: {0}")]
    NonRetryable(E),

    /// 待機中または実行中にコンテキストが終了
    #[error("{0}")]
    Context(ContextError),
}

impl<E> RetryError<E> {
    /// 最後の試行のエラー（コンテキスト終了時は `None`）
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::NonRetryable(e) => Some(e),
            Self::Context(_) => None,
        }
    }

    /// 試行回数の上限に達したかどうか
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// 元のエラー型に変換
    ///
    /// コンテキスト終了は `E::from(ContextError)` で変換します。
    pub fn into_inner(self) -> E
    where
        E: From<ContextError>,
    {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::NonRetryable(e) => e,
            Self::Context(err) => E::from(err),
        }
    }
}

/// 操作を成功するまでリトライする
///
/// # 引数
///
/// - `ctx`: キャンセル・デッドラインを運ぶコンテキスト
/// - `config`: リトライ設定
/// - `operation`: 試行ごとに呼び出される操作
///
/// # 例
///
/// ```rust
/// use melted_flow::context::Context;
/// use melted_flow::error::ProviderError;
/// use melted_flow::retry::{retry, RetryConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result: Result<u32, _> = retry(&Context::new(), &RetryConfig::no_retry(), || async {
///     Ok::<_, ProviderError>(42)
/// })
/// .await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn retry<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    retry_with_events(ctx, config, None, operation).await
}

/// 進行状況を通知しながら操作をリトライする
///
/// 通知は `try_send` で行い、チャネルが満杯ならイベントを捨てます。
/// 通知の遅延がリトライ対象の操作を止めることはありません。
pub async fn retry_with_events<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    events: Option<&mpsc::Sender<RetryEvent>>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let max_attempts = config.max_attempts.max(1);
    let notify = |event: RetryEvent| {
        if let Some(tx) = events {
            let _ = tx.try_send(event);
        }
    };

    let mut attempt = 0;
    loop {
        if let Some(err) = ctx.err() {
            return Err(RetryError::Context(err));
        }

        attempt += 1;
        notify(RetryEvent::AttemptStart { attempt });

        let result = tokio::select! {
            biased;
            err = ctx.done() => return Err(RetryError::Context(err)),
            result = operation() => result,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retries");
                }
                notify(RetryEvent::Success { attempt });
                return Ok(value);
            }
            Err(error) => error,
        };

        let classification = classify(&error);
        notify(RetryEvent::AttemptFailed {
            attempt,
            error: error.to_string(),
            category: classification.category,
        });

        if !classification.category.is_retryable() {
            debug!(
                attempt,
                category = ?classification.category,
                error = %error,
                "Non-retryable error"
            );
            return Err(RetryError::NonRetryable(error));
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %error, "Retry attempts exhausted");
            notify(RetryEvent::Exhausted {
                attempts: attempt,
                error: error.to_string(),
            });
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = config.delay(attempt - 1);
        let wait = classification
            .retry_after
            .map_or(delay, |retry_after| delay.max(retry_after));

        warn!(
            attempt,
            max_attempts,
            error = %error,
            wait_ms = wait.as_millis() as u64,
            "Attempt failed, waiting before next try"
        );
        notify(RetryEvent::Retrying {
            attempt,
            delay: wait,
        });

        tokio::select! {
            biased;
            err = ctx.done() => return Err(RetryError::Context(err)),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
