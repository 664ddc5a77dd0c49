//! エンジン設定の読み込みと保存
//!
//! # 責務
//!
//! TOML ファイルに記述したリトライ・エージェント・並列実行・ログの既定値を読み込み、
//! 各コンポーネントの設定型へ変換します。
//!
//! ## 使用例
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//! multiplier = 2.0
//! jitter = 0.2
//!
//! [agent]
//! max_steps = 8
//! timeout_secs = 300
//! handler_timeout_secs = 30
//! parallel_tool_calls = true
//! require_approval = ["delete_file"]
//!
//! [parallel]
//! max_concurrency = 4
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! directory = "logs"
//! ```
//!
//! ## 関連モジュール
//!
//! - [`crate::retry`]: [`RetryConfig`] を利用
//! - [`crate::agent`]: [`AgentSettings::agent_config`] で [`AgentConfig`] を生成
//! - [`crate::telemetry`]: [`LoggingConfig`] でロガーを初期化

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::agent::{AgentConfig, DEFAULT_MAX_STEPS};
use crate::engine::ParallelConfig;
use crate::error::ConfigError;
use crate::retry::RetryConfig;
use super::dto::{AgentDto, EngineConfigDto, ParallelDto, RetryDto};
use super::logging::LoggingConfig;

/// エンジン設定（ドメインモデル）
///
/// バリデーション済みの状態を保証します。
///
/// ## DTO との違い
///
/// - `EngineConfigDto`: TOML デシリアライズ専用、バリデーション前の生データ
/// - [`EngineConfig`]: バリデーション済み、`Duration` 等の型付きの値を持つ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// LLM 呼び出しの既定リトライ設定
    pub retry: RetryConfig,

    /// エージェントの既定値
    pub agent: AgentSettings,

    /// 並列実行の既定値
    pub parallel: ParallelConfig,

    /// ログ出力
    pub logging: LoggingConfig,
}

/// エージェントの既定値
///
/// クライアントやシステムプロンプト等、実行時にしか決まらない値は含みません。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_steps: u32,
    pub timeout: Option<Duration>,
    pub handler_timeout: Option<Duration>,
    pub parallel_tool_calls: bool,
    pub require_approval: BTreeSet<String>,
    pub fail_on_tool_timeout: bool,
    pub stream: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
            handler_timeout: None,
            parallel_tool_calls: false,
            require_approval: BTreeSet::new(),
            fail_on_tool_timeout: false,
            stream: true,
        }
    }
}

impl AgentSettings {
    /// 既定値を反映した [`AgentConfig`] を生成
    ///
    /// # 引数
    ///
    /// * `retry` - LLM 呼び出しのリトライ設定
    pub fn agent_config(&self, retry: &RetryConfig) -> AgentConfig {
        AgentConfig {
            max_steps: self.max_steps,
            timeout: self.timeout,
            handler_timeout: self.handler_timeout,
            parallel_tool_calls: self.parallel_tool_calls,
            require_approval: self.require_approval.iter().cloned().collect(),
            fail_on_tool_timeout: self.fail_on_tool_timeout,
            stream: self.stream,
            retry: Some(retry.clone()),
            ..AgentConfig::default()
        }
    }
}

impl EngineConfig {
    /// TOML ファイルから設定を読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → `EngineConfigDto`
    /// 3. バリデーション & 変換 → [`EngineConfig`]
    ///
    /// # 戻り値
    ///
    /// * `Ok(EngineConfig)` - 読み込みに成功した場合
    /// * `Err(ConfigError)` - ファイルの読み込み、パース、バリデーションに失敗した場合
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: EngineConfigDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// 設定を TOML 文字列に変換
    pub fn to_string(&self) -> Result<String, ConfigError> {
        let dto = EngineConfigDto::from(self.clone());
        Ok(toml::to_string(&dto)?)
    }

    /// 設定を TOML ファイルに保存
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_string()?)?;
        Ok(())
    }

    /// エージェント設定の既定値（リトライ設定を含む）
    pub fn agent_config(&self) -> AgentConfig {
        self.agent.agent_config(&self.retry)
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// バリデーションを実施し、不正なデータの場合は [`ConfigError::Validation`] を返します。
impl TryFrom<EngineConfigDto> for EngineConfig {
    type Error = ConfigError;

    fn try_from(dto: EngineConfigDto) -> Result<Self, Self::Error> {
        let retry = RetryConfig::try_from(dto.retry)?;
        let agent = AgentSettings::try_from(dto.agent)?;
        let parallel = ParallelConfig::try_from(dto.parallel)?;
        let logging = LoggingConfig::try_from(dto.logging)?;

        Ok(Self {
            retry,
            agent,
            parallel,
            logging,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<EngineConfig> for EngineConfigDto {
    fn from(config: EngineConfig) -> Self {
        Self {
            retry: config.retry.into(),
            agent: config.agent.into(),
            parallel: config.parallel.into(),
            logging: config.logging.into(),
        }
    }
}

impl TryFrom<RetryDto> for RetryConfig {
    type Error = ConfigError;

    fn try_from(dto: RetryDto) -> Result<Self, Self::Error> {
        let config = RetryConfig {
            max_attempts: dto.max_attempts,
            initial_delay: Duration::from_millis(dto.initial_delay_ms),
            max_delay: Duration::from_millis(dto.max_delay_ms),
            multiplier: dto.multiplier,
            jitter: dto.jitter,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<RetryConfig> for RetryDto {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: config.initial_delay.as_millis() as u64,
            max_delay_ms: config.max_delay.as_millis() as u64,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl TryFrom<AgentDto> for AgentSettings {
    type Error = ConfigError;

    fn try_from(dto: AgentDto) -> Result<Self, Self::Error> {
        let settings = AgentSettings {
            max_steps: dto.max_steps,
            timeout: dto.timeout_secs.map(Duration::from_secs),
            handler_timeout: dto.handler_timeout_secs.map(Duration::from_secs),
            parallel_tool_calls: dto.parallel_tool_calls,
            require_approval: dto.require_approval.into_iter().collect(),
            fail_on_tool_timeout: dto.fail_on_tool_timeout,
            stream: dto.stream,
        };
        // 範囲チェックは AgentConfig と共通
        settings.agent_config(&RetryConfig::no_retry()).validate()?;
        Ok(settings)
    }
}

impl From<AgentSettings> for AgentDto {
    fn from(settings: AgentSettings) -> Self {
        Self {
            max_steps: settings.max_steps,
            timeout_secs: settings.timeout.map(|t| t.as_secs()),
            handler_timeout_secs: settings.handler_timeout.map(|t| t.as_secs()),
            parallel_tool_calls: settings.parallel_tool_calls,
            require_approval: settings.require_approval.into_iter().collect(),
            fail_on_tool_timeout: settings.fail_on_tool_timeout,
            stream: settings.stream,
        }
    }
}

impl TryFrom<ParallelDto> for ParallelConfig {
    type Error = ConfigError;

    fn try_from(dto: ParallelDto) -> Result<Self, Self::Error> {
        if dto.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "parallel.timeout_secs は0より大きい必要があります".to_string(),
            ));
        }
        Ok(ParallelConfig {
            max_concurrency: dto.max_concurrency,
            timeout: dto.timeout_secs.map(Duration::from_secs),
        })
    }
}

impl From<ParallelConfig> for ParallelDto {
    fn from(config: ParallelConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            timeout_secs: config.timeout.map(|t| t.as_secs()),
        }
    }
}
