mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use melted_flow::agent::{Agent, AgentConfig, AgentStep, ApprovalDecision, FnApprover, Termination};
use melted_flow::context::{Context, ContextError};
use melted_flow::engine::{ExecutionError, PromptStep, Step, Workflow};
use melted_flow::error::{ProviderError, ToolError};
use melted_flow::event::EventType;
use melted_flow::provider::Role;
use melted_flow::state::State;
use melted_flow::tool::ToolCall;

use common::{example_settings, fast_retry, file_tools, text, tool_calls, ScriptedClient};

fn tool_replies(messages: &[melted_flow::provider::Message]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.content.clone()))
        .collect()
}

/// 設定ファイルの既定値（承認・並列実行あり）でエージェントを構築
fn configured_agent(client: Arc<ScriptedClient>, deletions: Arc<AtomicUsize>) -> Agent {
    let config = example_settings()
        .agent_config()
        .with_system_prompt("あなたはファイル整理アシスタントです。")
        .with_retry(fast_retry(3));
    Agent::new(client, Arc::new(file_tools(deletions)), config)
}

#[tokio::test]
async fn test_single_turn_completion() {
    let client = ScriptedClient::new(vec![text("整理は不要です")]);
    let agent = configured_agent(client.clone(), Arc::new(AtomicUsize::new(0)));

    let result = agent.run(&Context::new(), "ホームを整理して").await.unwrap();

    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.response, "整理は不要です");
    assert_eq!(result.steps, 1);
    assert_eq!(client.calls(), 1);

    let request = &client.requests()[0];
    assert_eq!(request[0].role, Role::System);
    assert_eq!(request[1].content, "ホームを整理して");
}

#[tokio::test]
async fn test_approval_rejection_is_reported_to_model() {
    let deletions = Arc::new(AtomicUsize::new(0));
    let client = ScriptedClient::new(vec![
        tool_calls(&[("c1", "read_file", "a.txt"), ("c2", "delete_file", "a.txt")]),
        text("削除は拒否されました"),
    ]);
    let agent = configured_agent(client.clone(), Arc::clone(&deletions)).with_approver(Arc::new(
        FnApprover::new(|call: &ToolCall| {
            if call.arguments.ends_with(".tmp") {
                ApprovalDecision::Approve
            } else {
                ApprovalDecision::reject("only temporary files may be deleted")
            }
        }),
    ));

    let result = agent.run(&Context::new(), "a.txt を消して").await.unwrap();

    assert!(result.is_completed());
    assert_eq!(deletions.load(Ordering::SeqCst), 0);
    assert_eq!(
        tool_replies(&result.messages),
        vec![
            ("c1".to_string(), "contents of a.txt".to_string()),
            (
                "c2".to_string(),
                "tool call rejected: only temporary files may be deleted".to_string()
            ),
        ]
    );
    // 2回目のリクエストでは拒否結果だけがエラーとして区別される
    let second = &client.requests()[1];
    let flags: Vec<_> = second
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.is_error))
        .collect();
    assert_eq!(flags, vec![("c1".to_string(), false), ("c2".to_string(), true)]);
}

#[tokio::test]
async fn test_missing_approver_rejections_are_flagged_as_errors() {
    let deletions = Arc::new(AtomicUsize::new(0));
    let client = ScriptedClient::new(vec![
        tool_calls(&[("c1", "delete_file", "a.txt"), ("c2", "delete_file", "b.txt")]),
        text("削除できませんでした"),
    ]);
    let agent = configured_agent(client.clone(), Arc::clone(&deletions));

    let result = agent.run(&Context::new(), "消して").await.unwrap();

    assert!(result.is_completed());
    assert_eq!(deletions.load(Ordering::SeqCst), 0);
    let rejected: Vec<_> = client.requests()[1]
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.is_error, m.content.clone()))
        .collect();
    assert_eq!(
        rejected,
        vec![
            (true, "tool call rejected: no approver configured".to_string()),
            (true, "tool call rejected: no approver configured".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_stream_single_turn_has_one_step_pair() {
    let client = ScriptedClient::new(vec![text("整理は不要です")]);
    let agent = Arc::new(configured_agent(client, Arc::new(AtomicUsize::new(0))));

    let (events, output) = agent.run_stream(Context::new(), "ホームを整理して").collect().await;
    let result = output.unwrap().unwrap();

    assert!(result.is_completed());
    let count = |kind: EventType| events.iter().filter(|e| e.event_type == kind).count();
    assert_eq!(count(EventType::StepStart), 1);
    assert_eq!(count(EventType::StepComplete), 1);
    assert_eq!(count(EventType::ToolCallRequested), 0);

    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::AgentComplete);
    assert_eq!(last.termination, Some(Termination::Completed));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_preserves_call_order() {
    let client = ScriptedClient::new(vec![
        tool_calls(&[
            ("slow", "sleep_ms", "300"),
            ("quick", "sleep_ms", "10"),
            ("read", "read_file", "b.txt"),
        ]),
        text("done"),
    ]);
    let agent = configured_agent(client, Arc::new(AtomicUsize::new(0)));

    let started = tokio::time::Instant::now();
    let result = agent.run(&Context::new(), "go").await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(320));
    let ids: Vec<_> = tool_replies(&result.messages).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["slow", "quick", "read"]);
}

#[tokio::test]
async fn test_max_steps_reached() {
    let replies = (0..5)
        .map(|i| tool_calls(&[(format!("c{}", i).as_str(), "read_file", "x")]))
        .collect();
    let client = ScriptedClient::new(replies);
    let agent = Agent::new(
        client.clone(),
        Arc::new(file_tools(Arc::new(AtomicUsize::new(0)))),
        AgentConfig::default().with_max_steps(3),
    );

    let result = agent.run(&Context::new(), "loop").await.unwrap();

    assert_eq!(result.termination, Termination::MaxSteps);
    assert_eq!(result.steps, 3);
    assert_eq!(client.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_llm_errors_are_retried() {
    let client = ScriptedClient::new(vec![
        Err(ProviderError::Api { status: 503, message: "overloaded".to_string() }),
        text("recovered"),
    ]);
    let agent = configured_agent(client.clone(), Arc::new(AtomicUsize::new(0)));

    let result = agent.run(&Context::new(), "hi").await.unwrap();

    assert_eq!(result.response, "recovered");
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_permanent_llm_error_aborts() {
    let client = ScriptedClient::new(vec![Err(ProviderError::AuthenticationError("bad key".to_string()))]);
    let agent = configured_agent(client.clone(), Arc::new(AtomicUsize::new(0)));

    let err = agent.run(&Context::new(), "hi").await.unwrap_err();

    assert!(matches!(err, ExecutionError::Provider(ProviderError::AuthenticationError(_))));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_fatal_tool_error_aborts() {
    let client = ScriptedClient::new(vec![tool_calls(&[("c1", "crash", "")]), text("unreachable")]);
    let agent = configured_agent(client.clone(), Arc::new(AtomicUsize::new(0)));

    let err = agent.run(&Context::new(), "go").await.unwrap_err();

    assert!(matches!(err, ExecutionError::ToolFailed(ToolError::Fatal(_))));
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_becomes_error_result() {
    let client = ScriptedClient::new(vec![tool_calls(&[("c1", "sleep_ms", "120000")]), text("gave up")]);
    let agent = configured_agent(client, Arc::new(AtomicUsize::new(0)));

    let result = agent.run(&Context::new(), "wait").await.unwrap();

    assert!(result.is_completed());
    assert_eq!(
        tool_replies(&result.messages),
        vec![("c1".to_string(), "tool call timed out".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_parent_deadline_is_an_error() {
    let client = ScriptedClient::new(vec![tool_calls(&[("c1", "sleep_ms", "10000")])]);
    let agent = configured_agent(client, Arc::new(AtomicUsize::new(0)));

    let ctx = Context::new().with_timeout(Duration::from_secs(1));
    let err = agent.run(&ctx, "wait").await.unwrap_err();

    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
}

#[tokio::test]
async fn test_agent_step_inside_streaming_workflow() {
    let client = ScriptedClient::new(vec![
        text("a.txt を読む"),
        tool_calls(&[("c1", "read_file", "a.txt")]),
        text("a.txt の内容を確認しました"),
    ]);
    let agent = Arc::new(configured_agent(client.clone(), Arc::new(AtomicUsize::new(0))).with_name("worker"));

    let workflow = Workflow::new(
        "plan_and_act",
        vec![
            Arc::new(PromptStep::new("plan", client, "{{goal}} の計画").with_output_key("plan")) as Arc<dyn Step>,
            Arc::new(AgentStep::new("act", agent, "plan").with_output_key("report")),
        ],
    );

    let mut state = State::new();
    state.set("goal", "ファイル確認");
    let (events, output) = workflow.run_stream(Context::new(), state).collect().await;
    let (state, result) = output.unwrap();

    assert!(result.is_ok());
    assert_eq!(state.get_string("report"), "a.txt の内容を確認しました");

    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds.first(), Some(&EventType::WorkflowStart));
    assert_eq!(kinds.last(), Some(&EventType::WorkflowComplete));
    assert!(kinds.contains(&EventType::ToolCallStarted));
    assert!(kinds.contains(&EventType::AgentComplete));
    assert!(!kinds.contains(&EventType::Error));

    let deltas: String = events
        .iter()
        .filter(|e| e.event_type == EventType::StreamDelta)
        .filter_map(|e| e.delta.clone())
        .collect();
    assert!(deltas.contains("a.txt の内容を確認しました"));
}

#[tokio::test]
async fn test_agent_step_fails_on_max_steps() {
    let client = ScriptedClient::new(vec![tool_calls(&[("c1", "read_file", "x")])]);
    let agent = Arc::new(Agent::new(
        client,
        Arc::new(file_tools(Arc::new(AtomicUsize::new(0)))),
        AgentConfig::default().with_max_steps(1),
    ));
    let workflow = Workflow::new(
        "single",
        vec![Arc::new(AgentStep::new("act", agent, "task")) as Arc<dyn Step>],
    );

    let mut state = State::new();
    state.set("task", "do it");
    let err = workflow.run(&Context::new(), &mut state).await.unwrap_err();

    assert!(matches!(
        err.root_cause(),
        ExecutionError::AgentTerminated { termination: Termination::MaxSteps, .. }
    ));
}
