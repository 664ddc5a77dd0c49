//! エージェントをワークフローに組み込むステップ [`AgentStep`]

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::runner::Agent;
use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::Step;
use crate::event::{Event, EventSink, EventType};
use crate::state::State;

/// State から入力を読み、エージェントの応答を書き戻すステップ
///
/// エージェントが [`Termination::Completed`](crate::agent::Termination::Completed)
/// 以外で終了した場合は [`ExecutionError::AgentTerminated`] で失敗します。
pub struct AgentStep {
    name: String,
    agent: Arc<Agent>,
    input_key: String,
    output_key: Option<String>,
}

impl AgentStep {
    pub fn new(name: impl Into<String>, agent: Arc<Agent>, input_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent,
            input_key: input_key.into(),
            output_key: None,
        }
    }

    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = Some(output_key.into());
        self
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        if !state.has(&self.input_key) {
            return Err(ExecutionError::Validation(format!(
                "入力キー '{}' が State にありません",
                self.input_key
            )));
        }

        let input = state.get_string(&self.input_key);
        let messages = self.agent.initial_messages(&input);
        let result = self.agent.execute(ctx, messages, events).await?;

        if !result.is_completed() {
            return Err(ExecutionError::AgentTerminated {
                agent: self.name.clone(),
                termination: result.termination,
            });
        }

        if let Some(key) = &self.output_key {
            state.set(key.as_str(), result.response.clone());
        }
        Ok(StepResult::new(result.response).with_usage(result.usage))
    }
}

#[async_trait]
impl Step for AgentStep {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, Termination};
    use crate::error::ProviderError;
    use crate::provider::{ChatClient, ChatOptions, ChatResponse, Message, TokenUsage};
    use crate::tool::{FunctionRegistry, ToolCall};

    /// 常に同じ応答を返すクライアント
    struct Fixed(ChatResponse);

    #[async_trait]
    impl ChatClient for Fixed {
        async fn chat(
            &self,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn agent(response: ChatResponse, max_steps: u32) -> Arc<Agent> {
        let tools = FunctionRegistry::new().with_tool("noop", "No-op", |_ctx, _args| async move {
            Ok(String::new())
        });
        Arc::new(Agent::new(
            Arc::new(Fixed(response)),
            Arc::new(tools),
            AgentConfig::default().with_max_steps(max_steps),
        ))
    }

    #[tokio::test]
    async fn test_agent_step_writes_response() {
        let response = ChatResponse {
            content: "answer".to_string(),
            usage: TokenUsage::new(3, 4),
            ..Default::default()
        };
        let step = AgentStep::new("ask", agent(response, 3), "question").with_output_key("answer");
        let mut state = State::new();
        state.set("question", "why?");

        let result = step.run(&Context::new(), &mut state).await.unwrap();

        assert_eq!(state.get_string("answer"), "answer");
        assert_eq!(result.usage.total(), 7);
    }

    #[tokio::test]
    async fn test_agent_step_fails_when_not_completed() {
        let response = ChatResponse {
            tool_calls: vec![ToolCall::new("1", "noop", "{}")],
            ..Default::default()
        };
        let step = AgentStep::new("ask", agent(response, 2), "question");
        let mut state = State::new();
        state.set("question", "loop forever");

        let err = step.run(&Context::new(), &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::AgentTerminated { termination: Termination::MaxSteps, .. }
        ));
    }

    #[tokio::test]
    async fn test_agent_step_requires_input_key() {
        let step = AgentStep::new("ask", agent(ChatResponse::default(), 1), "question");
        let err = step.run(&Context::new(), &mut State::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
    }
}
