//! ツール呼び出しと実行結果の型

use serde::{Deserialize, Serialize};

/// モデルが要求したツール呼び出し
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 呼び出しID（結果との対応付けに使用）
    pub id: String,

    /// ツール名
    pub name: String,

    /// 引数（慣例的に JSON 文字列。エンジンは中身を解釈しない）
    pub arguments: String,
}

impl ToolCall {
    /// ツール呼び出しを生成
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// ツールの実行結果
///
/// `is_error = true` の結果もモデルへそのまま返され、会話の一部になります。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// 対応する呼び出しID
    pub tool_call_id: String,

    /// ツール名
    pub name: String,

    /// 結果（慣例的に JSON 文字列）
    pub content: String,

    /// エラー結果かどうか
    pub is_error: bool,
}

impl ToolResult {
    /// 成功結果を生成
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    /// エラー結果を生成
    pub fn failure(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(call, content)
        }
    }
}

/// レジストリが返す生の実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// 結果（慣例的に JSON 文字列）
    pub content: String,

    /// ツール自身がエラーを報告したか
    pub is_error: bool,
}

impl ToolOutput {
    /// 成功出力
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// エラー出力
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}
