//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、TOML ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 設計思想
//!
//! - **単一責務**: TOML のデシリアライズのみを担当
//! - **TOML 構造への密結合**: 時間はミリ秒・秒の整数、列挙は文字列で保持
//! - **バリデーション前の状態**: 不正なデータも一旦受け入れる
//! - **カプセル化**: config モジュール内部のみで使用（外部非公開）
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! EngineConfigDto
//!   ↓ (TryFrom でバリデーション)
//! EngineConfig (ドメインモデル)
//! ```
//!
//! 全てのセクションとフィールドは省略可能で、省略時は既定値になります。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_MAX_STEPS;
use crate::retry::RetryConfig;

/// エンジン設定 DTO
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`EngineConfig`](super::settings::EngineConfig) を使用してください。
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct EngineConfigDto {
    pub(super) retry: RetryDto,
    pub(super) agent: AgentDto,
    pub(super) parallel: ParallelDto,
    pub(super) logging: LoggingDto,
}

/// `[retry]` セクション
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct RetryDto {
    pub(super) max_attempts: u32,
    pub(super) initial_delay_ms: u64,
    pub(super) max_delay_ms: u64,
    pub(super) multiplier: f64,
    pub(super) jitter: f64,
}

impl Default for RetryDto {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

/// `[agent]` セクション
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct AgentDto {
    pub(super) max_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) handler_timeout_secs: Option<u64>,
    pub(super) parallel_tool_calls: bool,
    pub(super) require_approval: Vec<String>,
    pub(super) fail_on_tool_timeout: bool,
    pub(super) stream: bool,
}

impl Default for AgentDto {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout_secs: None,
            handler_timeout_secs: None,
            parallel_tool_calls: false,
            require_approval: Vec::new(),
            fail_on_tool_timeout: false,
            stream: true,
        }
    }
}

/// `[parallel]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct ParallelDto {
    pub(super) max_concurrency: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) timeout_secs: Option<u64>,
}

/// `[logging]` セクション
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct LoggingDto {
    pub(super) level: String,
    pub(super) format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) directory: Option<PathBuf>,
    pub(super) file_prefix: String,
}

impl Default for LoggingDto {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
            file_prefix: "melted-flow".to_string(),
        }
    }
}
