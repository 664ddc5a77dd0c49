//! ツール呼び出しエージェント [`Agent`]
//!
//! # 状態遷移
//!
//! ```text
//! Requesting ──(ツール呼び出しなし)──▶ Complete
//!     │
//!     └──(ツール呼び出しあり)──▶ Approving ──▶ Executing ──▶ Requesting
//! ```
//!
//! - Requesting: 会話履歴を LLM に送信（リトライ設定があればリトライ）
//! - Approving: `require_approval` に含まれる呼び出しを [`Approver`] に問い合わせる
//! - Executing: 承認された呼び出しを実行し、結果をツールメッセージとして履歴に追加
//!
//! # 終了
//!
//! | 状況 | 戻り値 |
//! |------|--------|
//! | ツール呼び出しのない応答 | `Ok`（[`Termination::Completed`]） |
//! | `max_steps` 回の LLM 呼び出し後もツール呼び出しが続く | `Ok`（[`Termination::MaxSteps`]） |
//! | エージェント自身のタイムアウト | `Ok`（[`Termination::Timeout`]） |
//! | 親コンテキストのキャンセル・デッドライン超過 | `Err(ExecutionError::Context)` |
//! | リトライ後も LLM 呼び出しが失敗 | `Err(ExecutionError::Provider)` |
//! | [`ToolError::Fatal`] | `Err(ExecutionError::ToolFailed)` |
//! | 不正な [`AgentConfig`] | `Err(ExecutionError::Config)` |
//!
//! `Err` で終わった場合、[`Agent::run_stream`] は終了理由 [`Termination::Error`] を
//! エラーイベントに載せます。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::agent::approval::{ApprovalDecision, Approver, NO_APPROVER_REASON};
use crate::agent::config::AgentConfig;
use crate::agent::result::{AgentResult, Termination};
use crate::context::{Context, ContextError};
use crate::engine::prompt::stream_chat;
use crate::engine::ExecutionError;
use crate::error::{ProviderError, ToolError};
use crate::event::{Event, EventSink, EventStream, EventType, EVENT_BUFFER_SIZE};
use crate::provider::{ChatClient, ChatOptions, ChatResponse, Message, Role, TokenUsage};
use crate::retry::{retry, RetryConfig, RetryError};
use crate::tool::{ToolCall, ToolRegistry, ToolResult};

/// 既定のエージェント名
const DEFAULT_AGENT_NAME: &str = "agent";

/// LLM とツールレジストリを組み合わせた、複数ターンのツール呼び出しループ
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::agent::{Agent, AgentConfig, AutoApprove};
/// use melted_flow::context::Context;
/// use melted_flow::provider::ChatClient;
/// use melted_flow::tool::FunctionRegistry;
///
/// # async fn example(client: Arc<dyn ChatClient>) -> Result<(), Box<dyn std::error::Error>> {
/// let tools = FunctionRegistry::new()
///     .with_tool("search", "Search the web", |_ctx, query| async move {
///         Ok(format!("results for {}", query))
///     });
///
/// let agent = Agent::new(client, Arc::new(tools), AgentConfig::default().with_max_steps(5))
///     .with_name("researcher")
///     .with_approver(Arc::new(AutoApprove));
///
/// let result = agent.run(&Context::new(), "Rust の最新リリースを調べて").await?;
/// println!("{} ({} steps, {:?})", result.response, result.steps, result.termination);
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    name: String,
    client: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolRegistry>,
    config: AgentConfig,
    approver: Option<Arc<dyn Approver>>,
}

impl Agent {
    /// エージェントを生成
    ///
    /// # 引数
    ///
    /// - `client`: LLM バックエンド
    /// - `tools`: モデルが呼び出せるツール
    /// - `config`: ステップ上限・タイムアウト・承認等の設定
    pub fn new(client: Arc<dyn ChatClient>, tools: Arc<dyn ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            client,
            tools,
            config,
            approver: None,
        }
    }

    /// イベントとログに使う名前
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// ユーザー入力から会話を開始して実行
    pub async fn run(&self, ctx: &Context, input: &str) -> Result<AgentResult, ExecutionError> {
        self.execute(ctx, self.initial_messages(input), None).await
    }

    /// 既存の会話履歴から実行を再開
    ///
    /// システムプロンプトが設定されていて履歴の先頭がシステムメッセージでない場合、
    /// 先頭に追加します。
    pub async fn run_with_history(
        &self,
        ctx: &Context,
        mut messages: Vec<Message>,
    ) -> Result<AgentResult, ExecutionError> {
        if messages.is_empty() {
            return Err(ExecutionError::Validation(
                "会話履歴が空です".to_string(),
            ));
        }
        if let Some(system) = &self.config.system_prompt {
            if messages[0].role != Role::System {
                messages.insert(0, Message::system(system.as_str()));
            }
        }
        self.execute(ctx, messages, None).await
    }

    /// バックグラウンドタスクで実行し、イベントストリームを返す
    ///
    /// 失敗時は終了理由 [`Termination::Error`] を持つ [`EventType::Error`] を
    /// 1件発行してからストリームを閉じます。
    pub fn run_stream(
        self: Arc<Self>,
        ctx: Context,
        input: impl Into<String>,
    ) -> EventStream<Result<AgentResult, ExecutionError>> {
        let (sink, rx) = EventSink::channel(EVENT_BUFFER_SIZE);
        let input = input.into();

        let handle = tokio::spawn(async move {
            let messages = self.initial_messages(&input);
            let result = self.execute(&ctx, messages, Some(&sink)).await;
            if let Err(e) = &result {
                sink.emit(Event::error(&self.name, e).with_termination(Termination::Error))
                    .await;
            }
            result
        });

        EventStream::new(rx, handle)
    }

    pub(crate) fn initial_messages(&self, input: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::system(system.as_str()));
        }
        messages.push(Message::user(input));
        messages
    }

    /// 状態遷移ループ本体
    pub(crate) async fn execute(
        &self,
        ctx: &Context,
        mut messages: Vec<Message>,
        events: Option<&EventSink>,
    ) -> Result<AgentResult, ExecutionError> {
        self.config.validate()?;

        let run_ctx = ctx.with_optional_timeout(self.config.timeout);
        let options = self.chat_options();
        let policy = self.config.retry.clone().unwrap_or_else(RetryConfig::no_retry);
        let executor = ToolExecutor {
            agent: Arc::from(self.name.as_str()),
            tools: Arc::clone(&self.tools),
            handler_timeout: self.config.handler_timeout,
            events: events.cloned(),
        };

        let mut usage = TokenUsage::default();
        let mut steps = 0;
        let mut response_text = String::new();

        debug!(agent = %self.name, max_steps = self.config.max_steps, "Agent started");

        let termination = loop {
            if steps >= self.config.max_steps {
                warn!(agent = %self.name, steps, "Agent reached max steps");
                break Termination::MaxSteps;
            }
            if run_ctx.is_done() {
                break interruption(ctx)?;
            }

            steps += 1;
            emit(events, Event::for_step(EventType::StepStart, &self.name).with_iteration(steps)).await;

            let response = match retry(&run_ctx, &policy, || self.request(&messages, &options, events)).await {
                Ok(response) => response,
                Err(RetryError::Context(_)) => break interruption(ctx)?,
                Err(err) => {
                    let err = ExecutionError::from(err);
                    warn!(agent = %self.name, step = steps, error = %err, "LLM request failed");
                    return Err(err);
                }
            };

            usage += response.usage;
            let step_usage = response.usage;
            let tool_calls = response.tool_calls;
            response_text = response.content;
            messages.push(Message::assistant(response_text.as_str(), tool_calls.clone()));

            if tool_calls.is_empty() {
                emit(events, Event::for_step(EventType::StepComplete, &self.name).with_usage(step_usage)).await;
                break Termination::Completed;
            }

            debug!(agent = %self.name, step = steps, tool_calls = tool_calls.len(), "Dispatching tool calls");

            let results = match self.dispatch(&run_ctx, &executor, &tool_calls, events).await {
                Ok(results) => results,
                Err(DispatchStop::ToolTimeout) => break Termination::Timeout,
                Err(DispatchStop::Interrupted(_)) => break interruption(ctx)?,
                Err(DispatchStop::Fatal(err)) => {
                    warn!(agent = %self.name, step = steps, error = %err, "Fatal tool error");
                    return Err(ExecutionError::ToolFailed(err));
                }
            };

            messages.extend(results.into_iter().map(Message::tool_result));
            emit(events, Event::for_step(EventType::StepComplete, &self.name).with_usage(step_usage)).await;
        };

        info!(
            agent = %self.name,
            steps,
            termination = %termination,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Agent finished"
        );
        emit(
            events,
            Event::for_step(EventType::AgentComplete, &self.name)
                .with_usage(usage)
                .with_termination(termination),
        )
        .await;

        Ok(AgentResult {
            response: response_text,
            steps,
            termination,
            usage,
            messages,
        })
    }

    /// `tools` が空ならレジストリの定義で補う
    fn chat_options(&self) -> ChatOptions {
        let mut options = self.config.options.clone();
        if options.tools.is_empty() {
            options.tools = self.tools.definitions();
        }
        options
    }

    async fn request(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        events: Option<&EventSink>,
    ) -> Result<ChatResponse, ProviderError> {
        match events {
            Some(sink) if self.config.stream => {
                stream_chat(self.client.as_ref(), messages, options, sink, &self.name).await
            }
            _ => self.client.chat(messages, options).await,
        }
    }

    /// 承認と実行を行い、呼び出し順にツール結果を返す
    async fn dispatch(
        &self,
        ctx: &Context,
        executor: &ToolExecutor,
        calls: &[ToolCall],
        events: Option<&EventSink>,
    ) -> Result<Vec<ToolResult>, DispatchStop> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut approved = Vec::with_capacity(calls.len());

        for (index, call) in calls.iter().enumerate() {
            emit(events, Event::for_step(EventType::ToolCallRequested, &self.name).with_tool_call(call)).await;

            if !self.config.requires_approval(&call.name) {
                approved.push(index);
                continue;
            }

            match self.approve(ctx, call).await.map_err(DispatchStop::Interrupted)? {
                ApprovalDecision::Approve => {
                    emit(events, Event::for_step(EventType::ToolCallApproved, &self.name).with_tool_call(call)).await;
                    approved.push(index);
                }
                ApprovalDecision::Reject { reason } => {
                    warn!(agent = %self.name, tool = %call.name, reason = %reason, "Tool call rejected");
                    emit(
                        events,
                        Event::for_step(EventType::ToolCallRejected, &self.name)
                            .with_tool_call(call)
                            .with_error(reason.as_str()),
                    )
                    .await;
                    slots[index] = Some(ToolResult::failure(call, format!("tool call rejected: {}", reason)));
                }
            }
        }

        if self.config.parallel_tool_calls && approved.len() > 1 {
            let handles: Vec<_> = approved
                .iter()
                .map(|&index| {
                    let executor = executor.clone();
                    let ctx = ctx.clone();
                    let call = calls[index].clone();
                    tokio::spawn(async move { executor.execute(&ctx, &call).await })
                })
                .collect();

            let outcomes = join_all(handles).await;
            for (&index, joined) in approved.iter().zip(outcomes) {
                let outcome = joined.unwrap_or_else(|e| {
                    ToolOutcome::Done(ToolResult::failure(&calls[index], format!("tool task failed: {}", e)))
                });
                slots[index] = Some(self.settle(outcome)?);
            }
        } else {
            for &index in &approved {
                let outcome = executor.execute(ctx, &calls[index]).await;
                slots[index] = Some(self.settle(outcome)?);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    async fn approve(&self, ctx: &Context, call: &ToolCall) -> Result<ApprovalDecision, ContextError> {
        match &self.approver {
            Some(approver) => ctx.run(async { Ok(approver.approve(ctx, call).await) }).await,
            None => Ok(ApprovalDecision::reject(NO_APPROVER_REASON)),
        }
    }

    /// 1件の実行結果を、履歴に載せる結果か中断理由に振り分ける
    fn settle(&self, outcome: ToolOutcome) -> Result<ToolResult, DispatchStop> {
        match outcome {
            ToolOutcome::Done(result) => Ok(result),
            ToolOutcome::TimedOut(result) => {
                warn!(agent = %self.name, tool = %result.name, "Tool call timed out");
                if self.config.fail_on_tool_timeout {
                    Err(DispatchStop::ToolTimeout)
                } else {
                    Ok(result)
                }
            }
            ToolOutcome::Interrupted(err) => Err(DispatchStop::Interrupted(err)),
            ToolOutcome::Fatal(err) => Err(DispatchStop::Fatal(err)),
        }
    }
}

/// ツール実行を中断した理由
enum DispatchStop {
    ToolTimeout,
    Interrupted(ContextError),
    Fatal(ToolError),
}

/// 1件のツール呼び出しの結末
enum ToolOutcome {
    Done(ToolResult),
    TimedOut(ToolResult),
    Interrupted(ContextError),
    Fatal(ToolError),
}

/// ツールタスクへ渡す実行環境
#[derive(Clone)]
struct ToolExecutor {
    agent: Arc<str>,
    tools: Arc<dyn ToolRegistry>,
    handler_timeout: Option<Duration>,
    events: Option<EventSink>,
}

impl ToolExecutor {
    async fn execute(&self, ctx: &Context, call: &ToolCall) -> ToolOutcome {
        self.emit(Event::for_step(EventType::ToolCallStarted, &self.agent).with_tool_call(call))
            .await;

        let call_ctx = ctx.with_optional_timeout(self.handler_timeout);
        let outcome = tokio::select! {
            biased;
            _ = call_ctx.done() => match ctx.err() {
                Some(err) => return ToolOutcome::Interrupted(err),
                None => ToolOutcome::TimedOut(ToolResult::failure(call, "tool call timed out")),
            },
            result = self.tools.execute(&call_ctx, &call.name, &call.arguments) => match result {
                Ok(output) if output.is_error => ToolOutcome::Done(ToolResult::failure(call, output.content)),
                Ok(output) => ToolOutcome::Done(ToolResult::success(call, output.content)),
                Err(err) if err.is_fatal() => return ToolOutcome::Fatal(err),
                Err(err) => ToolOutcome::Done(ToolResult::failure(call, err.to_string())),
            },
        };

        if let ToolOutcome::Done(result) | ToolOutcome::TimedOut(result) = &outcome {
            self.emit(Event::for_step(EventType::ToolResult, &self.agent).with_tool_result(result))
                .await;
        }
        outcome
    }

    async fn emit(&self, event: Event) {
        emit(self.events.as_ref(), event).await;
    }
}

async fn emit(events: Option<&EventSink>, event: Event) {
    if let Some(sink) = events {
        sink.emit(event).await;
    }
}

/// エージェントのコンテキストが終了した理由を終了状態に変換
///
/// 親コンテキストが終了していればエラー、そうでなければエージェント自身のタイムアウト。
fn interruption(ctx: &Context) -> Result<Termination, ExecutionError> {
    match ctx.err() {
        Some(err) => Err(err.into()),
        None => Ok(Termination::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::approval::{AutoApprove, FnApprover};
    use crate::tool::FunctionRegistry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 事前に用意した応答を順に返すクライアント（尽きたら最後の応答を繰り返す）
    struct Scripted {
        replies: Mutex<VecDeque<ChatResponse>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatClient for Scripted {
        async fn chat(
            &self,
            messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.pop_front().unwrap())
            } else {
                Ok(replies.front().cloned().unwrap_or_default())
            }
        }
    }

    fn text(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            usage: TokenUsage::new(10, 5),
            ..Default::default()
        }
    }

    fn calls(calls: &[(&str, &str)]) -> ChatResponse {
        ChatResponse {
            tool_calls: calls
                .iter()
                .map(|(id, name)| ToolCall::new(*id, *name, "{}"))
                .collect(),
            usage: TokenUsage::new(20, 5),
            ..Default::default()
        }
    }

    fn echo_tools() -> Arc<FunctionRegistry> {
        Arc::new(
            FunctionRegistry::new()
                .with_tool("echo", "Echo", |_ctx, args| async move { Ok(format!("echo:{}", args)) }),
        )
    }

    fn tool_messages(result: &AgentResult) -> Vec<(String, String)> {
        result
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_single_turn_completion() {
        let client = Scripted::new(vec![text("こんにちは")]);
        let agent = Agent::new(client.clone(), echo_tools(), AgentConfig::default().with_system_prompt("sys"));

        let result = agent.run(&Context::new(), "hi").await.unwrap();

        assert!(result.is_completed());
        assert_eq!(result.response, "こんにちは");
        assert_eq!(result.steps, 1);
        assert_eq!(result.usage.total(), 15);
        assert_eq!(result.messages.len(), 3);
        assert_eq!(client.seen.lock().unwrap()[0][0].role, Role::System);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let client = Scripted::new(vec![calls(&[("c1", "echo")]), text("done")]);
        let agent = Agent::new(client.clone(), echo_tools(), AgentConfig::default());

        let result = agent.run(&Context::new(), "go").await.unwrap();

        assert!(result.is_completed());
        assert_eq!(result.steps, 2);
        assert_eq!(result.usage.total(), 40);
        assert_eq!(tool_messages(&result), vec![("c1".to_string(), "echo:{}".to_string())]);
        // 2回目の呼び出しにはツール結果が含まれる
        assert_eq!(client.seen.lock().unwrap()[1].len(), 3);
    }

    #[tokio::test]
    async fn test_approval_required_without_approver_rejects() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);
        let tools = FunctionRegistry::new().with_tool("delete", "Delete", move |_ctx, _args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("deleted".to_string())
            }
        });
        let client = Scripted::new(vec![calls(&[("c1", "delete")]), text("ok")]);
        let agent = Agent::new(
            client,
            Arc::new(tools),
            AgentConfig::default().with_approval_required("delete"),
        );

        let result = agent.run(&Context::new(), "clean up").await.unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(
            tool_messages(&result),
            vec![(
                "c1".to_string(),
                "tool call rejected: no approver configured".to_string()
            )]
        );
        assert!(result.messages.iter().filter(|m| m.role == Role::Tool).all(|m| m.is_error));
    }

    #[tokio::test]
    async fn test_approver_decides_per_call() {
        let client = Scripted::new(vec![calls(&[("c1", "echo"), ("c2", "echo")]), text("ok")]);
        let approver = FnApprover::new(|call: &ToolCall| {
            if call.id == "c1" {
                ApprovalDecision::Approve
            } else {
                ApprovalDecision::reject("only one")
            }
        });
        let agent = Agent::new(client, echo_tools(), AgentConfig::default().with_approval_required("echo"))
            .with_approver(Arc::new(approver));

        let result = agent.run(&Context::new(), "go").await.unwrap();

        assert_eq!(
            tool_messages(&result),
            vec![
                ("c1".to_string(), "echo:{}".to_string()),
                ("c2".to_string(), "tool call rejected: only one".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_max_steps_returns_ok_with_termination() {
        let client = Scripted::new(vec![calls(&[("c", "echo")])]);
        let agent = Agent::new(client, echo_tools(), AgentConfig::default().with_max_steps(2));

        let result = agent.run(&Context::new(), "loop").await.unwrap();

        assert_eq!(result.termination, Termination::MaxSteps);
        assert_eq!(result.steps, 2);
    }

    #[tokio::test]
    async fn test_tool_errors_become_conversation_content() {
        let client = Scripted::new(vec![calls(&[("c1", "missing")]), text("sorry")]);
        let agent = Agent::new(client, echo_tools(), AgentConfig::default());

        let result = agent.run(&Context::new(), "go").await.unwrap();

        assert!(result.is_completed());
        assert_eq!(tool_messages(&result)[0].1, "ツール 'missing' は登録されていません");
    }

    #[tokio::test]
    async fn test_fatal_tool_error_aborts() {
        let tools = FunctionRegistry::new().with_tool("explode", "Explode", |_ctx, _args| async move {
            Err(ToolError::Fatal("disk on fire".to_string()))
        });
        let client = Scripted::new(vec![calls(&[("c1", "explode")]), text("unreachable")]);
        let agent = Agent::new(client, Arc::new(tools), AgentConfig::default());

        let err = agent.run(&Context::new(), "go").await.unwrap_err();
        assert!(matches!(err, ExecutionError::ToolFailed(ToolError::Fatal(_))));
    }

    fn slow_tools() -> Arc<FunctionRegistry> {
        Arc::new(
            FunctionRegistry::new()
                .with_tool("slow", "Slow", |_ctx, _args| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("late".to_string())
                })
                .with_tool("fast", "Fast", |_ctx, _args| async move { Ok("fast".to_string()) }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_yields_error_result() {
        let client = Scripted::new(vec![calls(&[("c1", "slow"), ("c2", "fast")]), text("done")]);
        let agent = Agent::new(
            client,
            slow_tools(),
            AgentConfig::default().with_handler_timeout(Duration::from_secs(1)),
        );

        let result = agent.run(&Context::new(), "go").await.unwrap();

        assert!(result.is_completed());
        assert_eq!(
            tool_messages(&result),
            vec![
                ("c1".to_string(), "tool call timed out".to_string()),
                ("c2".to_string(), "fast".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_can_terminate_agent() {
        let client = Scripted::new(vec![calls(&[("c1", "slow")]), text("done")]);
        let agent = Agent::new(
            client,
            slow_tools(),
            AgentConfig::default()
                .with_handler_timeout(Duration::from_secs(1))
                .with_fail_on_tool_timeout(true),
        );

        let result = agent.run(&Context::new(), "go").await.unwrap();
        assert_eq!(result.termination, Termination::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timeout_is_not_an_error() {
        let client = Scripted::new(vec![calls(&[("c1", "slow")])]);
        let agent = Agent::new(
            client,
            slow_tools(),
            AgentConfig::default().with_timeout(Duration::from_secs(5)),
        );

        let result = agent.run(&Context::new(), "go").await.unwrap();
        assert_eq!(result.termination, Termination::Timeout);
        assert_eq!(result.steps, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_is_an_error() {
        let client = Scripted::new(vec![calls(&[("c1", "slow")])]);
        let agent = Agent::new(client, slow_tools(), AgentConfig::default());
        let ctx = Context::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = agent.run(&ctx, "go").await.unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_results_keep_call_order() {
        let tools = FunctionRegistry::new()
            .with_tool("wait", "Sleep for N ms", |_ctx, args| async move {
                let ms: u64 = args.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(format!("waited {}", ms))
            });
        let response = ChatResponse {
            tool_calls: vec![
                ToolCall::new("a", "wait", "300"),
                ToolCall::new("b", "wait", "100"),
                ToolCall::new("c", "wait", "200"),
            ],
            ..Default::default()
        };
        let client = Scripted::new(vec![response, text("done")]);
        let agent = Agent::new(
            client,
            Arc::new(tools),
            AgentConfig::default().with_parallel_tool_calls(true),
        );

        let started = tokio::time::Instant::now();
        let result = agent.run(&Context::new(), "go").await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(600));
        let ids: Vec<_> = tool_messages(&result).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stream_emits_lifecycle_events() {
        let client = Scripted::new(vec![calls(&[("c1", "echo")]), text("final")]);
        let agent = Arc::new(
            Agent::new(client, echo_tools(), AgentConfig::default().with_approval_required("echo"))
                .with_name("helper")
                .with_approver(Arc::new(AutoApprove)),
        );

        let (events, output) = agent.run_stream(Context::new(), "go").collect().await;
        let result = output.unwrap().unwrap();
        assert!(result.is_completed());

        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::StepStart,
                EventType::ToolCallRequested,
                EventType::ToolCallApproved,
                EventType::ToolCallStarted,
                EventType::ToolResult,
                EventType::StepComplete,
                EventType::StepStart,
                EventType::StreamDelta,
                EventType::StepComplete,
                EventType::AgentComplete,
            ]
        );
        let last = events.last().unwrap();
        assert_eq!(last.termination, Some(Termination::Completed));
        assert_eq!(last.usage.map(|u| u.total()), Some(40));
        assert_eq!(events[0].iteration, Some(1));
        assert!(events.iter().all(|e| e.step_name.as_deref() == Some("helper")));
    }

    #[tokio::test]
    async fn test_stream_failure_emits_error_event() {
        let tools = FunctionRegistry::new().with_tool("explode", "Explode", |_ctx, _args| async move {
            Err(ToolError::Fatal("boom".to_string()))
        });
        let client = Scripted::new(vec![calls(&[("c1", "explode")])]);
        let agent = Arc::new(Agent::new(client, Arc::new(tools), AgentConfig::default()));

        let (events, output) = agent.run_stream(Context::new(), "go").collect().await;

        assert!(output.unwrap().is_err());
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.termination, Some(Termination::Error));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_any_request() {
        let client = Scripted::new(vec![text("unreachable")]);
        let agent = Agent::new(client.clone(), echo_tools(), AgentConfig::default().with_max_steps(0));

        let err = agent.run(&Context::new(), "hi").await.unwrap_err();

        assert!(matches!(err, ExecutionError::Config(_)));
        assert!(client.seen.lock().unwrap().is_empty());
    }
}
