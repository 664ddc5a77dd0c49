//! ツール呼び出しエージェント
//!
//! # 責務
//!
//! - LLM の応答に含まれるツール呼び出しを承認・実行し、結果を会話に戻すループ
//! - ステップ上限・タイムアウト・ツールごとのタイムアウトによる終了制御
//! - ワークフローへの組み込み（[`AgentStep`]）
//!
//! # モジュール構成
//!
//! - `config` - [`AgentConfig`]
//! - `approval` - [`Approver`] と [`ApprovalDecision`]
//! - `runner` - [`Agent`] の状態遷移ループ
//! - `result` - [`AgentResult`] と [`Termination`]
//! - `step` - [`AgentStep`]

pub mod config;
pub mod approval;
pub mod runner;
pub mod result;
pub mod step;

// 公開APIの再エクスポート
pub use config::{AgentConfig, DEFAULT_MAX_STEPS};
pub use approval::{ApprovalDecision, Approver, AutoApprove, FnApprover, NO_APPROVER_REASON};
pub use runner::Agent;
pub use result::{AgentResult, Termination};
pub use step::AgentStep;
