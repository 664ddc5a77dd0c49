//! エラー型の定義
//!
//! このモジュールは、Melted Flow 全体で使用されるエラー型を定義します。
//!
//! - [`ConfigError`]: 設定ファイルの読み込み・検証エラー
//! - [`ProviderError`]: チャットクライアント（LLM呼び出し）のエラー
//! - [`ToolError`]: ツール実行のエラー
//!
//! ワークフロー実行時のエラーは [`crate::engine::ExecutionError`] を参照してください。

use std::time::Duration;

use thiserror::Error;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// TOML のシリアライズに失敗
    #[error("TOML のシリアライズに失敗しました: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),

    /// ロガーの初期化に失敗
    #[error("ロガーの初期化に失敗しました: {0}")]
    Logging(String),
}

/// チャットクライアントのエラー
///
/// バックエンド（ベンダーSDK等）固有のエラーはこの型に変換して返します。
/// リトライ判定（[`crate::retry::classify`]）はこの型のバリアントを手がかりに
/// エラーカテゴリを決定します。
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 認証失敗
    #[error("認証に失敗しました: {0}")]
    AuthenticationError(String),

    /// レート制限超過
    ///
    /// サーバーが待機時間を指示した場合は `retry_after` に保持します。
    #[error("レート制限を超えました")]
    RateLimitExceeded {
        /// サーバー指定の待機時間
        retry_after: Option<Duration>,
    },

    /// HTTPステータス付きのAPIエラー
    #[error("APIエラー (status {status}): {message}")]
    Api {
        /// HTTPステータスコード
        status: u16,
        /// エラーメッセージ
        message: String,
    },

    /// タイムアウト
    #[error("リクエストがタイムアウトしました")]
    Timeout,

    /// ネットワークエラー（接続リセット・DNS失敗等）
    #[error("ネットワークエラー: {0}")]
    Network(String),

    /// 不正なレスポンス
    #[error("不正なレスポンス: {0}")]
    InvalidResponse(String),

    /// ストリーミング中のエラー
    #[error("ストリーミングエラー: {0}")]
    Stream(String),

    /// I/Oエラー
    #[error("I/Oエラー: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProviderError {
    /// サーバーが指示した待機時間（存在する場合）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// ツール実行のエラー
///
/// [`ToolError::Fatal`] 以外のエラーは、エージェントの会話履歴に
/// `is_error = true` のツール結果として返されます。
#[derive(Debug, Error)]
pub enum ToolError {
    /// 未登録のツール
    #[error("ツール '{0}' は登録されていません")]
    NotFound(String),

    /// 引数の不備
    #[error("ツール引数が不正です: {0}")]
    InvalidArguments(String),

    /// 実行エラー
    #[error("ツールの実行に失敗しました: {0}")]
    Execution(String),

    /// 回復不能なエラー（エージェントを停止させる）
    #[error("ツールで致命的なエラーが発生しました: {0}")]
    Fatal(String),
}

impl ToolError {
    /// エージェントを停止させるべきエラーかどうか
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_validation_message() {
        let err = ConfigError::Validation("max_attempts は1以上".to_string());
        assert_eq!(
            err.to_string(),
            "設定のバリデーションに失敗しました: max_attempts は1以上"
        );
    }

    #[test]
    fn test_provider_error_retry_after() {
        let err = ProviderError::RateLimitExceeded {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(ProviderError::Timeout.retry_after(), None);
    }

    #[test]
    fn test_tool_error_is_fatal() {
        assert!(ToolError::Fatal("disk gone".to_string()).is_fatal());
        assert!(!ToolError::Execution("bad".to_string()).is_fatal());
        assert_eq!(
            ToolError::NotFound("search".to_string()).to_string(),
            "ツール 'search' は登録されていません"
        );
    }
}
