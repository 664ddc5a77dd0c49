//! ステップ全体をリトライする [`RetryStep`]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::Step;
use crate::event::EventSink;
use crate::retry::{retry_with_events, RetryConfig, RetryEvent};
use crate::state::State;

/// 内側のステップをリトライ実行のポリシーで繰り返すステップ
///
/// 各試行は入力 State の新しい複製で実行され、成功した試行の State だけが
/// 呼び出し元に反映されます。失敗した試行の書き込みは残りません。
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::engine::{RetryStep, Step};
/// use melted_flow::retry::RetryConfig;
///
/// # fn build(fetch: Arc<dyn Step>) -> RetryStep {
/// RetryStep::new(fetch, RetryConfig::for_tools())
/// # }
/// ```
pub struct RetryStep {
    name: String,
    inner: Arc<dyn Step>,
    config: RetryConfig,
    retry_events: Option<mpsc::Sender<RetryEvent>>,
}

impl RetryStep {
    /// 内側のステップと同じ名前で生成
    pub fn new(inner: Arc<dyn Step>, config: RetryConfig) -> Self {
        Self {
            name: inner.name().to_string(),
            inner,
            config,
            retry_events: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// リトライの進行状況の通知先（満杯時は破棄）
    pub fn with_retry_events(mut self, tx: mpsc::Sender<RetryEvent>) -> Self {
        self.retry_events = Some(tx);
        self
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let snapshot = state.clone();
        let inner = self.inner.as_ref();

        let (committed, result) = retry_with_events(ctx, &self.config, self.retry_events.as_ref(), || {
            let mut attempt_state = snapshot.clone();
            async move {
                let result = match events {
                    Some(sink) => inner.run_streaming(ctx, &mut attempt_state, sink).await?,
                    None => inner.run(ctx, &mut attempt_state).await?,
                };
                Ok::<_, ExecutionError>((attempt_state, result))
            }
        })
        .await?;

        *state = committed;
        Ok(result)
    }
}

#[async_trait]
impl Step for RetryStep {
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
        self.execute(ctx, state, Some(events)).await
    }
}
