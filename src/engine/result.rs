//! 実行結果とエラーの型定義
//!
//! # 責務
//!
//! - ステップ実行結果 [`StepResult`] の型定義
//! - ワークフロー実行結果 [`WorkflowResult`] と [`ExecutionStatus`] の型定義
//! - 実行エラー [`ExecutionError`] の型定義
//!
//! # 使用例
//!
//! ```rust,no_run
//! use melted_flow::engine::WorkflowResult;
//!
//! fn handle_result(result: WorkflowResult) {
//!     if result.is_success() {
//!         println!("ワークフロー成功: {}", result.workflow_name);
//!         println!("総トークン使用量: {}", result.usage.total());
//!         println!("実行時間: {:?}", result.total_duration);
//!     } else {
//!         println!("ワークフロー失敗: {:?}", result.error);
//!     }
//!
//!     // JSON形式で出力
//!     if let Ok(json) = result.to_json() {
//!         println!("JSON: {}", json);
//!     }
//! }
//! ```

use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::agent::Termination;
use crate::context::ContextError;
use crate::error::{ConfigError, ProviderError, ToolError};
use crate::provider::TokenUsage;
use crate::retry::{CategorizedError, RetryError};

/// ステップ実行結果
///
/// 出力は任意のJSON値です。テキストを返すステップは `Value::String` を使います。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepResult {
    /// ステップの出力
    pub output: Value,

    /// トークン使用量
    pub usage: TokenUsage,
}

impl StepResult {
    /// 出力を指定して生成（使用量は0）
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            usage: TokenUsage::default(),
        }
    }

    /// 出力なしの結果
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// 出力を文字列として取得
    ///
    /// 文字列以外の値はJSON表現を返し、`null` は空文字列になります。
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// ワークフロー実行結果
///
/// # 例
///
/// ```rust,no_run
/// use melted_flow::engine::WorkflowResult;
///
/// fn analyze_result(result: WorkflowResult) {
///     println!("ワークフロー: {}", result.workflow_name);
///     println!("ステータス: {:?}", result.status);
///     println!("出力: {}", result.output);
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    /// ワークフロー名
    pub workflow_name: String,

    /// 実行ステータス
    pub status: ExecutionStatus,

    /// 最終出力
    pub output: Value,

    /// 総トークン使用量
    pub usage: TokenUsage,

    /// 実行開始時刻
    pub start_time: SystemTime,

    /// 実行終了時刻
    pub end_time: SystemTime,

    /// 総実行時間
    pub total_duration: Duration,

    /// エラーメッセージ（失敗時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// 成功結果を生成
    pub fn success(workflow_name: &str, start_time: SystemTime, result: StepResult) -> Self {
        let end_time = SystemTime::now();
        Self {
            workflow_name: workflow_name.to_string(),
            status: ExecutionStatus::Success,
            output: result.output,
            usage: result.usage,
            start_time,
            end_time,
            total_duration: end_time.duration_since(start_time).unwrap_or(Duration::ZERO),
            error: None,
        }
    }

    /// 失敗結果を生成
    ///
    /// コンテキストの終了が原因の場合は [`ExecutionStatus::Cancelled`] になります。
    pub fn failure(workflow_name: &str, start_time: SystemTime, error: &ExecutionError) -> Self {
        let end_time = SystemTime::now();
        let status = if error.is_context_error() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        Self {
            workflow_name: workflow_name.to_string(),
            status,
            output: Value::Null,
            usage: TokenUsage::default(),
            start_time,
            end_time,
            total_duration: end_time.duration_since(start_time).unwrap_or(Duration::ZERO),
            error: Some(error.to_string()),
        }
    }

    /// 結果をJSON形式でシリアライズ
    ///
    /// # 戻り値
    ///
    /// - `Ok(String)`: JSON文字列
    /// - `Err(serde_json::Error)`: シリアライズ失敗
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 成功したかどうか
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success)
    }
}

/// ワークフロー実行ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    /// すべてのステップが成功
    Success,

    /// ワークフロー失敗
    Failed,

    /// キャンセルまたはデッドライン超過で中断
    Cancelled,
}

/// 実行エラー
///
/// ステップ・オペレーター・エージェントの実行時に発生するエラーを表します。
///
/// # エラー種別
///
/// - [`ExecutionError::Step`] - チェーン内のステップ失敗（ステップ名付き）
/// - [`ExecutionError::Context`] - キャンセル・デッドライン超過
/// - [`ExecutionError::Provider`] - チャットクライアントのエラー
/// - [`ExecutionError::Tool`] - ツールがエラー結果を返した
/// - [`ExecutionError::NoRoute`] - 分類ラベルに対応するルートがない
/// - [`ExecutionError::Aggregation`] - 並列ブランチの集約に失敗
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// ステップ失敗
    #[error("ステップ '{step_name}' が失敗しました: {source}")]
    Step {
        /// 失敗したステップ名
        step_name: String,
        /// 元のエラー
        #[source]
        source: Box<ExecutionError>,
    },

    /// ループの反復回数上限に到達
    #[error("ループ '{loop_name}' が {max_iterations}回の反復で終了条件を満たしませんでした")]
    MaxIterationsExceeded {
        /// ループ名
        loop_name: String,
        /// 反復回数の上限
        max_iterations: u32,
    },

    /// コンテキストの終了
    #[error("{0}")]
    Context(#[from] ContextError),

    /// プロバイダーエラー
    #[error("プロバイダーエラー: {0}")]
    Provider(#[from] ProviderError),

    /// ツールがエラー結果を返した
    #[error("ツール '{tool_name}' がエラーを返しました: {message}")]
    Tool {
        /// ツール名
        tool_name: String,
        /// エラー内容
        message: String,
    },

    /// ツールの実行に失敗
    #[error("ツール実行エラー: {0}")]
    ToolFailed(#[from] ToolError),

    /// カテゴリ付きエラー
    #[error("{0}")]
    Categorized(#[from] CategorizedError),

    /// 分類ラベルに対応するルートがない
    #[error("ルーター '{router}' にラベル '{label}' のルートがありません")]
    NoRoute {
        /// ルーター名
        router: String,
        /// 分類ラベル
        label: String,
    },

    /// タスクのパニック
    #[error("タスク '{task}' がパニックしました")]
    Panicked {
        /// タスクの説明
        task: String,
    },

    /// 並列ブランチの集約に失敗
    #[error("集約エラー: {0}")]
    Aggregation(String),

    /// エージェントが完了前に終了
    #[error("エージェント '{agent}' が完了前に終了しました: {termination}")]
    AgentTerminated {
        /// エージェントステップ名
        agent: String,
        /// 終了理由
        termination: Termination,
    },

    /// 設定エラー
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    /// バリデーションエラー
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// シリアライズエラー
    #[error("シリアライズエラー: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ストアエラー
    #[error("ストアエラー: {0}")]
    Store(String),
}

impl ExecutionError {
    /// ステップ名を付与して包む
    pub fn in_step(step_name: &str, source: ExecutionError) -> Self {
        Self::Step {
            step_name: step_name.to_string(),
            source: Box::new(source),
        }
    }

    /// [`ExecutionError::Step`] の入れ子を剥がした根本のエラー
    pub fn root_cause(&self) -> &ExecutionError {
        let mut current = self;
        while let Self::Step { source, .. } = current {
            current = source;
        }
        current
    }

    /// キャンセル・デッドライン超過が原因かどうか
    pub fn is_context_error(&self) -> bool {
        self.context_error().is_some()
    }

    /// 原因となったコンテキストエラー
    pub fn context_error(&self) -> Option<ContextError> {
        match self.root_cause() {
            Self::Context(err) => Some(*err),
            _ => None,
        }
    }
}

impl<E> From<RetryError<E>> for ExecutionError
where
    E: Into<ExecutionError>,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Exhausted { last_error, .. } => last_error.into(),
            RetryError::NonRetryable(e) => e.into(),
            RetryError::Context(e) => ExecutionError::Context(e),
        }
    }
}
