//! LLM 呼び出しステップ [`PromptStep`]
//!
//! # 実行フロー
//!
//! 1. テンプレートの `{{key}}` を State の値で置換してユーザーメッセージを組み立てる
//! 2. システムプロンプトと共にチャットクライアントを呼び出す（リトライ設定があればリトライ）
//! 3. 応答テキストを `output_key` に書き込む
//!
//! ストリーミング実行時は [`ChatClient::chat_stream`] を使い、
//! 差分を [`EventType::StreamDelta`] として転送します。

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::Step;
use crate::error::ProviderError;
use crate::event::{Event, EventSink, EventType};
use crate::provider::{ChatClient, ChatOptions, ChatResponse, Message, StreamChunk};
use crate::retry::{retry, RetryConfig};
use crate::state::State;

/// テンプレートから1回の LLM 呼び出しを行うステップ
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::engine::PromptStep;
/// use melted_flow::provider::ChatClient;
/// use melted_flow::retry::RetryConfig;
///
/// # fn build(client: Arc<dyn ChatClient>) -> PromptStep {
/// PromptStep::new("summarize", client, "次の文章を要約してください:\n{{document}}")
///     .with_system_prompt("あなたは簡潔な要約者です。")
///     .with_output_key("summary")
///     .with_retry(RetryConfig::for_llm())
/// # }
/// ```
pub struct PromptStep {
    name: String,
    client: Arc<dyn ChatClient>,
    system_prompt: Option<String>,
    template: String,
    output_key: Option<String>,
    options: ChatOptions,
    retry: Option<RetryConfig>,
}

impl PromptStep {
    pub fn new(name: impl Into<String>, client: Arc<dyn ChatClient>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            system_prompt: None,
            template: template.into(),
            output_key: None,
            options: ChatOptions::default(),
            retry: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// 応答テキストを書き込む State のキー
    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = Some(output_key.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    fn messages(&self, state: &State) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(render_template(system, state)));
        }
        messages.push(Message::user(render_template(&self.template, state)));
        messages
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let messages = self.messages(state);
        let policy = self.retry.clone().unwrap_or_else(RetryConfig::no_retry);

        let response = retry(ctx, &policy, || self.call_once(&messages, events)).await?;
        debug!(
            step = %self.name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Prompt completed"
        );

        if let Some(key) = &self.output_key {
            state.set(key.as_str(), response.content.clone());
        }
        Ok(StepResult::new(response.content).with_usage(response.usage))
    }

    async fn call_once(
        &self,
        messages: &[Message],
        events: Option<&EventSink>,
    ) -> Result<ChatResponse, ProviderError> {
        match events {
            Some(sink) => {
                stream_chat(self.client.as_ref(), messages, &self.options, sink, &self.name).await
            }
            None => self.client.chat(messages, &self.options).await,
        }
    }
}

/// ストリーミングで応答を取得し、差分を [`EventType::StreamDelta`] として転送する
pub(crate) async fn stream_chat(
    client: &dyn ChatClient,
    messages: &[Message],
    options: &ChatOptions,
    sink: &EventSink,
    step_name: &str,
) -> Result<ChatResponse, ProviderError> {
    let mut stream = client.chat_stream(messages, options).await?;
    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Delta(text) => {
                sink.emit(Event::for_step(EventType::StreamDelta, step_name).with_delta(text))
                    .await;
            }
            StreamChunk::Complete(response) => return Ok(response),
        }
    }
    Err(ProviderError::Stream(
        "完了チャンクを受信する前にストリームが終了しました".to_string(),
    ))
}

#[async_trait]
impl Step for PromptStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
        self.execute(ctx, state, None).await
    }

    async fn run_streaming(
        &self,
        ctx: &Context,
        state: &mut State,
        events: &EventSink,
    ) -> Result<StepResult, ExecutionError> {
        events.emit(Event::for_step(EventType::StepStart, &self.name)).await;
        let result = self.execute(ctx, state, Some(events)).await?;
        events
            .emit(Event::for_step(EventType::StepComplete, &self.name).with_usage(result.usage))
            .await;
        Ok(result)
    }
}

/// `{{key}}` を State の値で置換する
///
/// 文字列はそのまま、それ以外の値はJSON表現で埋め込みます。
/// 存在しないキーは空文字列になり、閉じていない `{{` はそのまま残ります。
pub fn render_template(template: &str, state: &State) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        rendered.push_str(&rest[..start]);

        let key = rest[start + 2..start + 2 + len].trim();
        match state.get(key) {
            Some(Value::String(s)) => rendered.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => rendered.push_str(&other.to_string()),
        }
        rest = &rest[start + 2 + len + 2..];
    }

    rendered.push_str(rest);
    rendered
}
