//! ツール呼び出しステップ [`ToolStep`]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::Step;
use crate::state::State;
use crate::tool::ToolRegistry;

type ArgsBuilder = dyn Fn(&State) -> Result<String, ExecutionError> + Send + Sync;

enum Arguments {
    Static(String),
    Build(Arc<ArgsBuilder>),
}

/// レジストリのツールを1回呼び出すステップ
///
/// ツールの出力はJSONとして解釈できればJSON値、できなければ文字列として
/// `output_key` に書き込みます。ツールがエラー結果を返した場合は
/// [`ExecutionError::Tool`] で失敗します。
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::engine::ToolStep;
/// use melted_flow::tool::ToolRegistry;
///
/// # fn build(registry: Arc<dyn ToolRegistry>) -> ToolStep {
/// ToolStep::new("lookup", registry, "search")
///     .with_args_builder(|state| {
///         Ok(serde_json::json!({ "query": state.get_string("question") }).to_string())
///     })
///     .with_output_key("search_result")
/// # }
/// ```
pub struct ToolStep {
    name: String,
    registry: Arc<dyn ToolRegistry>,
    tool_name: String,
    arguments: Arguments,
    output_key: Option<String>,
}

impl ToolStep {
    /// 引数 `{}` でツールを呼び出すステップを生成
    pub fn new(name: impl Into<String>, registry: Arc<dyn ToolRegistry>, tool_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry,
            tool_name: tool_name.into(),
            arguments: Arguments::Static("{}".to_string()),
            output_key: None,
        }
    }

    /// 固定の引数（JSON文字列）
    pub fn with_args(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Arguments::Static(arguments.into());
        self
    }

    /// State から引数を組み立てる関数
    pub fn with_args_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&State) -> Result<String, ExecutionError> + Send + Sync + 'static,
    {
        self.arguments = Arguments::Build(Arc::new(builder));
        self
    }

    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = Some(output_key.into());
        self
    }
}

#[async_trait]
impl Step for ToolStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
        let arguments = match &self.arguments {
            Arguments::Static(args) => args.clone(),
            Arguments::Build(builder) => builder(state)?,
        };

        debug!(step = %self.name, tool = %self.tool_name, "Executing tool");
        let output = ctx
            .run(async {
                self.registry
                    .execute(ctx, &self.tool_name, &arguments)
                    .await
                    .map_err(ExecutionError::from)
            })
            .await?;

        if output.is_error {
            return Err(ExecutionError::Tool {
                tool_name: self.tool_name.clone(),
                message: output.content,
            });
        }

        let value = serde_json::from_str::<Value>(&output.content)
            .unwrap_or(Value::String(output.content));
        if let Some(key) = &self.output_key {
            state.set(key.as_str(), value.clone());
        }
        Ok(StepResult::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::tool::{FunctionRegistry, ToolOutput};

    fn registry() -> Arc<dyn ToolRegistry> {
        let mut registry = FunctionRegistry::new();
        registry.register("echo", "引数をそのまま返す", |_ctx, args: String| async move { Ok(args) });
        registry.register("plain", "テキストを返す", |_ctx, _args| async move {
            Ok("not json".to_string())
        });
        registry.register_raw(
            "soft_fail",
            "エラー結果を返す",
            serde_json::json!({ "type": "object" }),
            |_ctx, _args| async move { Ok(ToolOutput::error("quota exceeded")) },
        );
        registry.register("missing_arg", "ハンドラーエラー", |_ctx, _args| async move {
            Err(ToolError::InvalidArguments("query is required".to_string()))
        });
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_json_output_is_parsed() {
        let step = ToolStep::new("echo_step", registry(), "echo")
            .with_args_builder(|state| Ok(format!(r#"{{"n":{}}}"#, state.get_int("n"))))
            .with_output_key("echoed");

        let mut state = State::new();
        state.set("n", 7);
        let result = step.run(&Context::new(), &mut state).await.unwrap();

        assert_eq!(result.output["n"], 7);
        assert_eq!(state.get_object("echoed")["n"], 7);
    }

    #[tokio::test]
    async fn test_text_output_is_kept_as_string() {
        let step = ToolStep::new("plain_step", registry(), "plain").with_output_key("out");
        let mut state = State::new();

        step.run(&Context::new(), &mut state).await.unwrap();
        assert_eq!(state.get_string("out"), "not json");
    }

    #[tokio::test]
    async fn test_error_result_fails_step() {
        let step = ToolStep::new("soft", registry(), "soft_fail");
        let err = step.run(&Context::new(), &mut State::new()).await.unwrap_err();

        match err {
            ExecutionError::Tool { tool_name, message } => {
                assert_eq!(tool_name, "soft_fail");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("Expected Tool error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_and_unknown_tool() {
        let step = ToolStep::new("bad_args", registry(), "missing_arg");
        let err = step.run(&Context::new(), &mut State::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ToolFailed(ToolError::InvalidArguments(_))));

        let step = ToolStep::new("unknown", registry(), "nope");
        let err = step.run(&Context::new(), &mut State::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ToolFailed(ToolError::NotFound(_))));
    }
}
