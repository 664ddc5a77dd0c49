//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - 合成可能な実行単位 [`Step`] と、その実行結果・エラーの型定義
//! - 葉ステップ（LLM 呼び出し・ツール呼び出し・任意の関数）
//! - 合成オペレーター（逐次・並列・条件分岐・LLM 分類・反復・リトライ）
//! - ワークフローの実行とイベントストリーム
//!
//! # モジュール構成
//!
//! - [`step`][]: [`Step`] トレイトと [`run_stream`]
//! - [`result`][]: 実行結果型とエラー型
//! - [`prompt`][] / [`tool_step`][] / [`func`][]: 葉ステップ
//! - [`chain`][] / [`parallel`][] / [`router`][] / [`classifier`][] / [`loop_step`][] / [`retry_step`][]: オペレーター
//! - [`workflow`][]: ワークフロー
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use melted_flow::context::Context;
//! use melted_flow::engine::{merge_successes, FuncStep, Loop, Parallel, Step, StepResult, Workflow};
//! use melted_flow::state::State;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let research = Parallel::new(
//!         "research",
//!         vec![
//!             Arc::new(FuncStep::from_fn("web", |s| { s.set("web", "..."); Ok(StepResult::empty()) })) as Arc<dyn Step>,
//!             Arc::new(FuncStep::from_fn("docs", |s| { s.set("docs", "..."); Ok(StepResult::empty()) })),
//!         ],
//!     )
//!     .with_aggregator(merge_successes);
//!
//!     let draft = Arc::new(FuncStep::from_fn("draft", |s| {
//!         let n = s.get_int("drafts") + 1;
//!         s.set("drafts", n);
//!         Ok(StepResult::new(n))
//!     }));
//!     let refine = Loop::new("refine", draft, |s| s.get_int("drafts") >= 3, 5);
//!
//!     let workflow = Workflow::new("report", vec![Arc::new(research) as Arc<dyn Step>, Arc::new(refine)]);
//!
//!     let mut state = State::new();
//!     let result = workflow.run(&Context::new(), &mut state).await?;
//!     println!("Status: {:?}", result.status);
//!     println!("Total tokens: {}", result.usage.total());
//!
//!     // ストリーミング実行
//!     let mut stream = workflow.run_stream(Context::new(), State::new());
//!     while let Some(event) = stream.next().await {
//!         println!("{:?} {:?}", event.event_type, event.step_name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod result;
pub mod step;
pub mod func;
pub mod prompt;
pub mod tool_step;
pub mod chain;
pub mod parallel;
pub mod router;
pub mod classifier;
pub mod loop_step;
pub mod retry_step;
pub mod workflow;

// 公開APIの再エクスポート
pub use result::{ExecutionError, ExecutionStatus, StepResult, WorkflowResult};
pub use step::{run_stream, Step, StepOutcome};
pub use func::FuncStep;
pub use prompt::{render_template, PromptStep};
pub use tool_step::ToolStep;
pub use chain::{Chain, ChainConfig, ErrorAction, ErrorHandler};
pub use parallel::{merge_all, merge_successes, Aggregator, BranchResults, BranchSuccess, Parallel, ParallelConfig};
pub use router::{Route, RouteCondition, Router, DEFAULT_ROUTE};
pub use classifier::ClassifierRouter;
pub use loop_step::{Loop, UntilFn};
pub use retry_step::RetryStep;
pub use workflow::Workflow;
