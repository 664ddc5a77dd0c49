//! ログ出力の設定
//!
//! [`telemetry::init_tracing`](crate::telemetry::init_tracing) に渡す設定です。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;
use super::dto::LoggingDto;

/// ログの出力形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 人間向けの複数行形式
    #[default]
    Pretty,
    /// 1行1レコードの JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format は pretty または json である必要があります: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// ログ出力の設定（ドメインモデル）
///
/// `directory` が指定されている場合、コンソールに加えて
/// `<directory>/<file_prefix>.<日付>.log` へ日次ローテーションで書き出します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// 最大ログレベル
    pub level: LevelFilter,

    /// 出力形式
    pub format: LogFormat,

    /// ログファイルの出力先
    pub directory: Option<PathBuf>,

    /// ログファイル名の接頭辞
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        // DTO の既定値は常に有効
        Self::try_from(LoggingDto::default()).unwrap_or(Self {
            level: LevelFilter::INFO,
            format: LogFormat::Pretty,
            directory: None,
            file_prefix: "melted-flow".to_string(),
        })
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
impl TryFrom<LoggingDto> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(dto: LoggingDto) -> Result<Self, Self::Error> {
        let level = LevelFilter::from_str(&dto.level).map_err(|_| {
            ConfigError::Validation(format!(
                "logging.level が不正です: {}",
                dto.level
            ))
        })?;
        let format = dto.format.parse()?;

        if dto.file_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.file_prefix は空にできません".to_string(),
            ));
        }

        Ok(Self {
            level,
            format,
            directory: dto.directory,
            file_prefix: dto.file_prefix,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
impl From<LoggingConfig> for LoggingDto {
    fn from(config: LoggingConfig) -> Self {
        Self {
            level: config.level.to_string().to_ascii_lowercase(),
            format: config.format.to_string(),
            directory: config.directory,
            file_prefix: config.file_prefix,
        }
    }
}
