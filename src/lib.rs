//! # melted-flow
//!
//! LLM を組み込んだワークフローを合成・実行するエンジン。
//!
//! # モジュール構成
//!
//! - [`engine`]: [`Step`](engine::Step) と合成オペレーター、ワークフロー
//! - [`agent`]: ツール呼び出しエージェント
//! - [`retry`]: エラー分類と指数バックオフによるリトライ
//! - [`event`]: ストリーミング実行のイベント
//! - [`state`] / [`store`]: ワークフローの状態と永続化
//! - [`context`]: キャンセルとデッドライン
//! - [`provider`] / [`tool`]: 外部から注入するチャットクライアントとツール
//! - [`config`] / [`telemetry`]: 設定ファイルとロガー
//! - [`error`]: 共通のエラー型

pub mod agent;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod provider;
pub mod retry;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod tool;
