//! 汎用リトライ実行
//!
//! # 責務
//!
//! - 引数なしの非同期操作を、成功するか試行回数の上限に達するまで繰り返す
//! - エラーを Transient / Permanent / UserInput に分類し、一時的なエラーのみ再試行
//! - 指数バックオフとゆらぎ（jitter）、サーバー指定の待機時間の尊重
//! - 待機中のキャンセル・デッドラインへの即時対応
//!
//! ステップ（[`RetryStep`](crate::engine::RetryStep)）や LLM 呼び出しなど、
//! 任意の操作から単体で利用できます。
//!
//! # モジュール構成
//!
//! - `config` - [`RetryConfig`] とバックオフ計算
//! - `category` - [`ErrorCategory`]、[`CategorizedError`]、[`classify`]
//! - `executor` - [`retry`]、[`retry_with_events`]

pub mod config;
pub mod category;
pub mod executor;

// 公開APIの再エクスポート
pub use config::RetryConfig;
pub use category::{category_for_status, classify, CategorizedError, Classification, ErrorCategory};
pub use executor::{retry, retry_with_events, RetryError, RetryEvent};
