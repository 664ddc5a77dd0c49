//! 統合テスト共通のモック

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use melted_flow::config::EngineConfig;
use melted_flow::error::{ProviderError, ToolError};
use melted_flow::provider::{ChatClient, ChatOptions, ChatResponse, Message, TokenUsage};
use melted_flow::retry::RetryConfig;
use melted_flow::tool::{FunctionRegistry, ToolCall};

/// `settings/example.toml` のパス
pub fn example_settings_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/settings/example.toml")
}

pub fn example_settings() -> EngineConfig {
    EngineConfig::from_file(example_settings_path()).expect("Failed to load settings")
}

/// 待機を最小にしたリトライ設定
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
        .with_jitter(0.0)
}

/// 台本どおりに応答するチャットクライアント
///
/// 台本が尽きると [`ProviderError::InvalidResponse`] を返します。
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<ChatResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(
        &self,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".to_string())))
    }
}

/// テキストのみの応答
pub fn text(content: &str) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse {
        content: content.to_string(),
        usage: TokenUsage::new(10, 5),
        model: "scripted".to_string(),
        ..Default::default()
    })
}

/// ツール呼び出しを要求する応答（`(id, name, arguments)`）
pub fn tool_calls(calls: &[(&str, &str, &str)]) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse {
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect(),
        usage: TokenUsage::new(20, 10),
        model: "scripted".to_string(),
        ..Default::default()
    })
}

/// ファイル操作を模したツール群
///
/// - `read_file`: 引数をそのまま内容として返す
/// - `delete_file`: 呼び出し回数を `deletions` に記録
/// - `sleep_ms`: 引数のミリ秒だけ待機
/// - `crash`: 致命的エラー
pub fn file_tools(deletions: Arc<AtomicUsize>) -> FunctionRegistry {
    FunctionRegistry::new()
        .with_tool("read_file", "Read a file", |_ctx, path| async move {
            Ok(format!("contents of {}", path))
        })
        .with_tool("delete_file", "Delete a file", move |_ctx, path| {
            let deletions = Arc::clone(&deletions);
            async move {
                deletions.fetch_add(1, Ordering::SeqCst);
                Ok(format!("deleted {}", path))
            }
        })
        .with_tool("sleep_ms", "Sleep", |_ctx, ms| async move {
            let ms: u64 = ms.parse().map_err(|_| ToolError::InvalidArguments(ms.clone()))?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {}", ms))
        })
        .with_tool("crash", "Crash", |_ctx, _args| async move {
            Err(ToolError::Fatal("disk unavailable".to_string()))
        })
}
