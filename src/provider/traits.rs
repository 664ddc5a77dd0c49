//! チャットクライアントの共通インターフェース定義
//!
//! # 責務
//!
//! - チャットクライアントの共通トレイト [`ChatClient`] を定義
//! - バックエンド非依存のメッセージ型 [`Message`] とレスポンス型 [`ChatResponse`] を提供
//! - トークン使用量 [`TokenUsage`] と停止理由 [`StopReason`] の型を定義
//!
//! エンジンはどのバックエンドが応答するかを関知しません。
//! レスポンスからは本文、ツール呼び出し要求、トークン使用量のみを参照します。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use melted_flow::provider::{ChatClient, ChatOptions, Message};
//!
//! async fn example(client: &dyn ChatClient) {
//!     let messages = vec![
//!         Message::system("You are a helpful assistant."),
//!         Message::user("Hello!"),
//!     ];
//!     let response = client.chat(&messages, &ChatOptions::default()).await.unwrap();
//!
//!     println!("Response: {}", response.content);
//!     println!("Tokens: {} in, {} out",
//!         response.usage.input_tokens,
//!         response.usage.output_tokens
//!     );
//! }
//! ```

use std::ops::{Add, AddAssign};
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::tool::{ToolCall, ToolResult};

/// ストリーミング応答の型
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// チャットクライアントの共通インターフェース
///
/// このトレイトを実装することで、任意のLLMバックエンドを
/// エンジンに統合できます。
///
/// # 実装要件
///
/// - `Send + Sync`: マルチスレッド環境で安全に使用可能
/// - 非同期実行対応（`async_trait`を使用）
///
/// [`ChatClient::chat_stream`] はデフォルトで [`ChatClient::chat`] の結果を
/// 1つの差分と完了チャンクとして返します。
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// メッセージ履歴を送信し、応答を取得する
    ///
    /// # 引数
    ///
    /// - `messages`: 会話履歴（システムプロンプトを含む）
    /// - `options`: モデル名、温度、利用可能なツール等
    ///
    /// # エラー
    ///
    /// - [`ProviderError::AuthenticationError`] - 認証失敗
    /// - [`ProviderError::RateLimitExceeded`] - レート制限超過
    /// - [`ProviderError::Api`] - HTTPステータス付きのエラー
    /// - [`ProviderError::Timeout`] - タイムアウト
    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// ストリーミングで応答を取得する
    ///
    /// ストリームは0個以上の [`StreamChunk::Delta`] の後、
    /// 1つの [`StreamChunk::Complete`] で終わる必要があります。
    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream, ProviderError> {
        let response = self.chat(messages, options).await?;

        let mut chunks = Vec::with_capacity(2);
        if !response.content.is_empty() {
            chunks.push(Ok(StreamChunk::Delta(response.content.clone())));
        }
        chunks.push(Ok(StreamChunk::Complete(response)));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// ストリーミング応答の1チャンク
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// 生成されたテキストの差分
    Delta(String),

    /// 最終的な応答（ツール呼び出しと使用量を含む）
    Complete(ChatResponse),
}

/// メッセージの送信者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// システムプロンプト
    System,
    /// ユーザー入力
    User,
    /// モデルの応答
    Assistant,
    /// ツールの実行結果
    Tool,
}

/// 会話履歴の1メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 送信者
    pub role: Role,

    /// 本文
    pub content: String,

    /// モデルが要求したツール呼び出し（assistant のみ）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// 対応するツール呼び出しID（tool のみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// ツール結果がエラーかどうか（tool のみ）
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    /// システムメッセージを生成
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// ユーザーメッセージを生成
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// アシスタントメッセージを生成
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// ツール結果メッセージを生成
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// ツール実行結果からツール結果メッセージを生成
    ///
    /// 拒否・失敗した呼び出しは `is_error` が立ったまま履歴に載ります。
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            is_error: result.is_error,
            ..Self::tool(result.tool_call_id, result.content)
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }
}

/// モデルに公開するツールの定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// ツール名
    pub name: String,

    /// 説明
    pub description: String,

    /// 引数の JSON Schema
    pub parameters: serde_json::Value,
}

/// チャット呼び出しのオプション
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// モデル名（未指定ならクライアントの既定値）
    pub model: Option<String>,

    /// サンプリング温度
    pub temperature: Option<f32>,

    /// 最大出力トークン数
    pub max_tokens: Option<u32>,

    /// 利用可能なツール
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// チャットクライアントからのレスポンス
///
/// バックエンド固有のレスポンス形式を共通の型に変換したもの。
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// LLMが生成したテキスト
    pub content: String,

    /// ツール呼び出し要求
    pub tool_calls: Vec<ToolCall>,

    /// トークン使用量
    pub usage: TokenUsage,

    /// 生成停止理由
    pub stop_reason: StopReason,

    /// 使用されたモデル名
    pub model: String,
}

impl ChatResponse {
    /// ツール呼び出しを含むかどうか
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// トークン使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// 入力トークン数（プロンプト）
    pub input_tokens: u32,

    /// 出力トークン数（LLM生成テキスト）
    pub output_tokens: u32,
}

impl TokenUsage {
    /// 使用量を生成
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// 総トークン数を計算
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

/// LLMの生成停止理由
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// 自然な終了（LLMが完了を判断）
    #[default]
    EndTurn,

    /// ツール呼び出しのため停止
    ToolUse,

    /// 最大トークン数到達
    MaxTokens,

    /// 停止シーケンス検出
    StopSequence,

    /// コンテンツフィルター発動
    ContentFilter,

    /// 不明な理由
    Unknown,
}
