//! キャンセルとデッドラインの伝播
//!
//! # 責務
//!
//! - ワークフローの各階層へキャンセル通知を伝播する
//! - タイムアウト（デッドライン）を親から子へ引き継ぐ
//! - 待機中の処理（LLM呼び出し、ツール実行、リトライ待機）を速やかに中断する
//!
//! [`Context`] は `Clone` 可能なハンドルで、内部に
//! [`CancellationToken`] と任意のデッドラインを保持します。
//! 子コンテキストのキャンセルは親に影響しません。
//!
//! # 使用例
//!
//! ```rust
//! use melted_flow::context::{Context, ContextError};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = Context::new();
//! let child = ctx.with_timeout(Duration::from_millis(10));
//!
//! let result: Result<(), ContextError> = child
//!     .run(async {
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!         Ok(())
//!     })
//!     .await;
//!
//! assert_eq!(result, Err(ContextError::DeadlineExceeded));
//! assert!(ctx.err().is_none());
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// コンテキスト終了の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// 明示的にキャンセルされた
    #[error("コンテキストがキャンセルされました")]
    Canceled,

    /// デッドラインを超過した
    #[error("コンテキストのデッドラインを超過しました")]
    DeadlineExceeded,
}

/// キャンセルとデッドラインを運ぶ実行コンテキスト
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// ルートコンテキストを生成（デッドラインなし）
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// キャンセル可能な子コンテキストを生成
    ///
    /// 親のキャンセルは子に伝播しますが、子のキャンセルは親に伝播しません。
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// タイムアウト付きの子コンテキストを生成
    ///
    /// デッドラインは親のデッドラインと `now + timeout` の早い方になります。
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// タイムアウトが指定されていれば子コンテキストを、なければ複製を返す
    pub fn with_optional_timeout(&self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => self.with_timeout(timeout),
            None => self.clone(),
        }
    }

    /// このコンテキスト（と全ての子）をキャンセル
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// デッドライン（設定されている場合）
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 終了していればその理由を返す
    ///
    /// キャンセルはデッドライン超過より優先されます。
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// 終了しているかどうか
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// キャンセルまたはデッドライン超過まで待機
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Future をコンテキストと競合させて実行
    ///
    /// コンテキストが先に終了した場合、Future は破棄され
    /// コンテキストのエラーが返ります。
    pub async fn run<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ContextError>,
    {
        if let Some(err) = self.err() {
            return Err(err.into());
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err.into()),
            result = future => result,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
