//! 逐次実行オペレーター [`Chain`]
//!
//! # 実行フロー
//!
//! 1. 全体タイムアウトがあればコンテキストを1度だけ包む
//! 2. 各ステップの前にステップ単位のタイムアウトで子コンテキストを作成
//! 3. ステップを宣言順に実行し、使用量を合算
//! 4. 失敗時はエラーハンドラーの判断に従う（既定は中断）
//!
//! チェーン自身のコンテキストのキャンセル・デッドライン超過は、ハンドラーの判断に
//! 関わらず中断します。ステップ単位のタイムアウトはそのステップの失敗として扱います。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::{run_child, Step};
use crate::event::{Event, EventSink, EventType};
use crate::provider::TokenUsage;
use crate::state::State;

/// ステップ失敗時の対応
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorAction {
    /// チェーンを中断してエラーを返す
    Abort,

    /// エラーを無視して次のステップへ進む
    Continue,

    /// 指定した値を出力として扱い次のステップへ進む
    Recover(Value),
}

/// ステップ失敗時に呼ばれるハンドラー
///
/// 引数は失敗したステップ名とエラーです。
pub type ErrorHandler = dyn Fn(&str, &ExecutionError) -> ErrorAction + Send + Sync;

/// チェーンの設定
#[derive(Clone, Default)]
pub struct ChainConfig {
    /// チェーン全体のタイムアウト
    pub timeout: Option<Duration>,

    /// 各ステップのタイムアウト
    pub step_timeout: Option<Duration>,

    /// ハンドラー未設定時に失敗を無視して続行するか
    pub continue_on_error: bool,

    /// 失敗時のハンドラー（`continue_on_error` より優先）
    pub error_handler: Option<Arc<ErrorHandler>>,
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("timeout", &self.timeout)
            .field("step_timeout", &self.step_timeout)
            .field("continue_on_error", &self.continue_on_error)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// ステップを宣言順に実行するオペレーター
///
/// 出力は最後に成功したステップの出力（または回復値）です。
///
/// # 例
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use melted_flow::engine::{Chain, ErrorAction, FuncStep, Step, StepResult};
///
/// let chain = Chain::new(
///     "pipeline",
///     vec![
///         Arc::new(FuncStep::from_fn("load", |state| {
///             state.set("loaded", true);
///             Ok(StepResult::new("loaded"))
///         })) as Arc<dyn Step>,
///         Arc::new(FuncStep::from_fn("check", |_| Ok(StepResult::new("ok")))),
///     ],
/// )
/// .with_step_timeout(Duration::from_secs(30))
/// .with_error_handler(|_step, _err| ErrorAction::Continue);
/// ```
pub struct Chain {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    config: ChainConfig,
}

impl Chain {
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
            config: ChainConfig::default(),
        }
    }

    /// ステップを末尾に追加
    pub fn then(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.config.step_timeout = Some(step_timeout);
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.config.continue_on_error = continue_on_error;
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &ExecutionError) -> ErrorAction + Send + Sync + 'static,
    {
        self.config.error_handler = Some(Arc::new(handler));
        self
    }

    /// 子ステップ
    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    fn decide(&self, ctx: &Context, step_name: &str, err: &ExecutionError) -> ErrorAction {
        if ctx.err().is_some() {
            return ErrorAction::Abort;
        }
        match &self.config.error_handler {
            Some(handler) => handler(step_name, err),
            None if self.config.continue_on_error => ErrorAction::Continue,
            None => ErrorAction::Abort,
        }
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let ctx = ctx.with_optional_timeout(self.config.timeout);
        let mut usage = TokenUsage::default();
        let mut output = Value::Null;

        for (index, step) in self.steps.iter().enumerate() {
            let step_ctx = ctx.with_optional_timeout(self.config.step_timeout);
            debug!(chain = %self.name, step = step.name(), index, "Running chain step");

            let err = match run_child(step.as_ref(), &step_ctx, state, events).await {
                Ok(result) => {
                    usage += result.usage;
                    output = result.output;
                    continue;
                }
                Err(err) => err,
            };

            match self.decide(&ctx, step.name(), &err) {
                ErrorAction::Abort => {
                    debug!(chain = %self.name, step = step.name(), error = %err, "Chain aborted");
                    return Err(ExecutionError::in_step(step.name(), err));
                }
                ErrorAction::Continue => {
                    warn!(chain = %self.name, step = step.name(), error = %err, "Step failed, continuing");
                }
                ErrorAction::Recover(value) => {
                    warn!(chain = %self.name, step = step.name(), error = %err, "Step failed, recovered");
                    output = value;
                }
            }
        }

        Ok(StepResult { output, usage })
    }
}

#[async_trait]
impl Step for Chain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
        self.execute(ctx, state, None).await
    }

    async fn run_streaming(
        &self,
        ctx: &Context,
        state: &mut State,
        events: &EventSink,
    ) -> Result<StepResult, ExecutionError> {
        events.emit(Event::for_step(EventType::WorkflowStart, &self.name)).await;
        let result = self.execute(ctx, state, Some(events)).await?;
        events
            .emit(Event::for_step(EventType::WorkflowComplete, &self.name).with_usage(result.usage))
            .await;
        Ok(result)
    }
}
