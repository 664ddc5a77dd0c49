//! チャットクライアント抽象化レイヤー
//!
//! # 責務
//!
//! - LLMバックエンドを統一的に扱うインターフェース [`ChatClient`] を提供
//! - 会話メッセージ、呼び出しオプション、レスポンス、トークン使用量の型を定義
//!
//! # アーキテクチャ
//!
//! エンジンは LLM 呼び出しそのものを実装しません。
//! ベンダーSDKをラップしたクライアントを [`ChatClient`] として外部から注入し、
//! [`PromptStep`](crate::engine::PromptStep)、
//! [`ClassifierRouter`](crate::engine::ClassifierRouter)、
//! [`Agent`](crate::agent::Agent) がそれを利用します。
//!
//! # モジュール構成
//!
//! - `traits` - 共通インターフェース（[`ChatClient`]トレイト等）

pub mod traits;

// 公開APIの再エクスポート
pub use traits::{
    ChatClient, ChatOptions, ChatResponse, ChatStream, Message, Role, StopReason, StreamChunk,
    TokenUsage, ToolDefinition,
};
