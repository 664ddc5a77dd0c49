//! エージェントの設定

use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::provider::ChatOptions;
use crate::retry::RetryConfig;

/// 既定の最大ステップ数
pub const DEFAULT_MAX_STEPS: u32 = 10;

/// エージェントの設定
///
/// # 例
///
/// ```rust
/// use std::time::Duration;
/// use melted_flow::agent::AgentConfig;
/// use melted_flow::retry::RetryConfig;
///
/// let config = AgentConfig::default()
///     .with_system_prompt("あなたは調査アシスタントです。")
///     .with_max_steps(8)
///     .with_handler_timeout(Duration::from_secs(30))
///     .with_parallel_tool_calls(true)
///     .with_approval_required("delete_file")
///     .with_retry(RetryConfig::for_llm());
///
/// assert!(config.requires_approval("delete_file"));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// システムプロンプト
    pub system_prompt: Option<String>,

    /// LLM 呼び出しの最大回数
    pub max_steps: u32,

    /// エージェント全体のタイムアウト
    pub timeout: Option<Duration>,

    /// ツール1回あたりのタイムアウト
    pub handler_timeout: Option<Duration>,

    /// 1ステップ内の複数のツール呼び出しを並行実行するか
    pub parallel_tool_calls: bool,

    /// 実行前に承認が必要なツール名
    pub require_approval: HashSet<String>,

    /// ツールのタイムアウトでエージェントを終了するか
    pub fail_on_tool_timeout: bool,

    /// ストリーミング実行時に LLM 応答の差分を転送するか
    pub stream: bool,

    /// LLM 呼び出しのリトライ設定
    pub retry: Option<RetryConfig>,

    /// LLM 呼び出しのオプション（`tools` が空ならレジストリの定義を使用）
    pub options: ChatOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
            handler_timeout: None,
            parallel_tool_calls: false,
            require_approval: HashSet::new(),
            fail_on_tool_timeout: false,
            stream: true,
            retry: None,
            options: ChatOptions::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = Some(handler_timeout);
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel_tool_calls: bool) -> Self {
        self.parallel_tool_calls = parallel_tool_calls;
        self
    }

    /// 承認が必要なツールを追加
    pub fn with_approval_required(mut self, tool_name: impl Into<String>) -> Self {
        self.require_approval.insert(tool_name.into());
        self
    }

    pub fn with_fail_on_tool_timeout(mut self, fail_on_tool_timeout: bool) -> Self {
        self.fail_on_tool_timeout = fail_on_tool_timeout;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// ツールの実行前に承認が必要か
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.require_approval.contains(tool_name)
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Validation(
                "agent.max_steps は1以上である必要があります".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation(
                "agent.timeout は0より大きい必要があります".to_string(),
            ));
        }
        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation(
                "agent.handler_timeout は0より大きい必要があります".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}
