//! ロガーの初期化
//!
//! エンジンの各コンポーネントは `tracing` のマクロで構造化ログを出力します。
//! このモジュールはアプリケーション起動時に1度だけ呼び出す
//! グローバルサブスクライバーの設定を提供します。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use melted_flow::config::EngineConfig;
//! use melted_flow::telemetry::init_tracing;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_file("settings/example.toml")?;
//!     // ガードを保持している間だけファイルへの書き込みが継続する
//!     let _guard = init_tracing(&config.logging)?;
//!     Ok(())
//! }
//! ```

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// グローバルなログサブスクライバーを設定
///
/// コンソールへは常に出力し、`directory` が指定されていれば
/// 日次ローテーションのファイルにも ANSI カラーなしで出力します。
///
/// # 戻り値
///
/// - `Ok(Some(WorkerGuard))`: ファイル出力あり。破棄するとバッファがフラッシュされ書き込みが止まる
/// - `Ok(None)`: コンソール出力のみ
/// - `Err(ConfigError)`: ディレクトリの作成失敗、またはサブスクライバーが設定済み
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];

    let guard = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).map_err(|e| {
                ConfigError::Logging(format!("{}: {}", directory.display(), e))
            })?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(config.file_prefix.as_str())
                .filename_suffix("log")
                .build(directory)
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(file_layer(config, writer));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_filter(config.level).boxed(),
        LogFormat::Json => fmt::layer().json().with_filter(config.level).boxed(),
    }
}

fn file_layer(config: &LoggingConfig, writer: tracing_appender::non_blocking::NonBlocking) -> BoxedLayer {
    match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(config.level)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(config.level)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_second_init_fails() {
        let dir = std::env::temp_dir().join(format!("melted-flow-logs-{}", std::process::id()));
        let config = LoggingConfig::default()
            .with_level(LevelFilter::DEBUG)
            .with_format(LogFormat::Json)
            .with_directory(&dir);

        let guard = init_tracing(&config).unwrap();
        assert!(guard.is_some());
        tracing::info!(component = "telemetry", "initialized");

        assert!(matches!(
            init_tracing(&LoggingConfig::default()),
            Err(ConfigError::Logging(_))
        ));

        drop(guard);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
