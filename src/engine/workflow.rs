//! ワークフロー
//!
//! # 責務
//!
//! - 名前付きのトップレベル [`Chain`] を保持
//! - 実行の開始・完了をログに記録し、[`WorkflowResult`] にまとめる
//! - バックグラウンド実行用の [`Workflow::run_stream`]
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use melted_flow::context::Context;
//! use melted_flow::engine::{FuncStep, Step, StepResult, Workflow};
//! use melted_flow::state::State;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Workflow::new(
//!         "greeting",
//!         vec![Arc::new(FuncStep::from_fn("greet", |state| {
//!             let greeting = format!("こんにちは、{}さん", state.get_string("user"));
//!             Ok(StepResult::new(greeting))
//!         })) as Arc<dyn Step>],
//!     );
//!
//!     let mut state = State::new();
//!     state.set("user", "Alice");
//!     let result = workflow.run(&Context::new(), &mut state).await?;
//!
//!     println!("Workflow: {}", result.workflow_name);
//!     println!("Output: {}", result.output);
//!     println!("Total tokens: {}", result.usage.total());
//!     println!("Duration: {:?}", result.total_duration);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{error, info};

use crate::context::Context;
use crate::engine::chain::{Chain, ChainConfig};
use crate::engine::result::{ExecutionError, WorkflowResult};
use crate::engine::step::{run_stream, Step, StepOutcome};
use crate::event::EventStream;
use crate::state::State;

/// 名前付きのステップ列
pub struct Workflow {
    chain: Arc<Chain>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            chain: Arc::new(Chain::new(name, steps)),
        }
    }

    /// 設定済みのチェーンから生成
    pub fn from_chain(chain: Chain) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    /// チェーンの設定を指定して生成
    pub fn with_config(name: impl Into<String>, steps: Vec<Arc<dyn Step>>, config: ChainConfig) -> Self {
        Self::from_chain(Chain::new(name, steps).with_config(config))
    }

    pub fn name(&self) -> &str {
        self.chain.name()
    }

    /// ワークフローを実行
    ///
    /// # 戻り値
    ///
    /// - `Ok(WorkflowResult)`: 全ステップが完了
    /// - `Err(ExecutionError)`: いずれかのステップが失敗、またはコンテキストが終了
    pub async fn run(&self, ctx: &Context, state: &mut State) -> Result<WorkflowResult, ExecutionError> {
        let start_time = SystemTime::now();
        info!(workflow = self.name(), steps = self.chain.steps().len(), "Workflow started");

        match self.chain.run(ctx, state).await {
            Ok(result) => {
                let result = WorkflowResult::success(self.name(), start_time, result);
                info!(
                    workflow = self.name(),
                    total_tokens = result.usage.total(),
                    duration_ms = result.total_duration.as_millis() as u64,
                    "Workflow completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(workflow = self.name(), error = %e, "Workflow failed");
                Err(e)
            }
        }
    }

    /// ワークフローを実行し、失敗も含めて結果にまとめる
    pub async fn execute(&self, ctx: &Context, state: &mut State) -> WorkflowResult {
        let start_time = SystemTime::now();
        match self.run(ctx, state).await {
            Ok(result) => result,
            Err(e) => WorkflowResult::failure(self.name(), start_time, &e),
        }
    }

    /// バックグラウンドで実行し、イベントストリームを返す
    ///
    /// ストリームは WorkflowStart で始まり、WorkflowComplete または Error で終わります。
    pub fn run_stream(&self, ctx: Context, state: State) -> EventStream<StepOutcome> {
        info!(workflow = self.name(), "Workflow stream started");
        run_stream(self.chain.clone(), ctx, state)
    }
}
