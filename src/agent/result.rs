//! エージェントの実行結果

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::{Message, TokenUsage};

/// エージェントの終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// モデルがツール呼び出しなしで応答した
    Completed,

    /// 最大ステップ数に到達
    MaxSteps,

    /// エージェント自身のタイムアウト、またはツールのタイムアウト
    Timeout,

    /// 回復できないエラー
    Error,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::MaxSteps => "max_steps",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// エージェントの実行結果
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    /// 最後のアシスタント応答
    pub response: String,

    /// 実行したステップ（LLM 呼び出し）の数
    pub steps: u32,

    /// 終了理由
    pub termination: Termination,

    /// 累積トークン使用量
    pub usage: TokenUsage,

    /// 最終的な会話履歴
    pub messages: Vec<Message>,
}

impl AgentResult {
    /// 正常に完了したかどうか
    pub fn is_completed(&self) -> bool {
        self.termination == Termination::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_display_and_serde() {
        assert_eq!(Termination::MaxSteps.to_string(), "max_steps");
        assert_eq!(
            serde_json::to_value(Termination::Completed).unwrap(),
            serde_json::json!("completed")
        );
    }
}
