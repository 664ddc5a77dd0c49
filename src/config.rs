//! 設定ファイルの読み込み
//!
//! # モジュール構成
//!
//! - `dto` - TOML 構造そのままの DTO（外部非公開）
//! - `settings` - [`EngineConfig`] と [`AgentSettings`]
//! - `logging` - [`LoggingConfig`] と [`LogFormat`]

mod dto;
pub mod logging;
pub mod settings;

// 公開APIの再エクスポート
pub use logging::{LogFormat, LoggingConfig};
pub use settings::{AgentSettings, EngineConfig};
