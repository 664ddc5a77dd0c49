//! 反復オペレーター [`Loop`]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::{run_child, Step};
use crate::event::{Event, EventSink, EventType};
use crate::provider::TokenUsage;
use crate::state::State;

/// ループの終了条件
pub type UntilFn = dyn Fn(&State) -> bool + Send + Sync;

/// 終了条件を満たすまで本体を繰り返すオペレーター
///
/// 各反復の前に `<ループ名>.iteration` へ1始まりの反復番号を書き込み、
/// 反復の後に終了条件を評価します。`max_iterations` 回で条件を満たさなければ
/// [`ExecutionError::MaxIterationsExceeded`] で失敗します。
///
/// # 例
///
/// ```rust
/// use std::sync::Arc;
/// use melted_flow::engine::{FuncStep, Loop, StepResult};
///
/// let body = Arc::new(FuncStep::from_fn("refine", |state| {
///     let score = state.get_int("score") + 30;
///     state.set("score", score);
///     Ok(StepResult::new(score))
/// }));
///
/// let refine = Loop::new("refine_loop", body, |state| state.get_int("score") >= 90, 5);
/// ```
pub struct Loop {
    name: String,
    body: Arc<dyn Step>,
    until: Arc<UntilFn>,
    max_iterations: u32,
}

impl Loop {
    pub fn new<F>(name: impl Into<String>, body: Arc<dyn Step>, until: F, max_iterations: u32) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body,
            until: Arc::new(until),
            max_iterations,
        }
    }

    /// 反復番号を書き込む State のキー
    pub fn counter_key(&self) -> String {
        format!("{}.iteration", self.name)
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let counter_key = self.counter_key();
        let mut usage = TokenUsage::default();
        let mut output = Value::Null;

        for iteration in 1..=self.max_iterations {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }

            state.set(counter_key.as_str(), iteration);
            if let Some(sink) = events {
                sink.emit(Event::for_step(EventType::LoopIteration, &self.name).with_iteration(iteration))
                    .await;
            }

            let result = run_child(self.body.as_ref(), ctx, state, events).await?;
            usage += result.usage;
            output = result.output;

            if (self.until)(state) {
                debug!(loop_name = %self.name, iteration, "Loop condition satisfied");
                return Ok(StepResult { output, usage });
            }
        }

        debug!(loop_name = %self.name, max_iterations = self.max_iterations, "Loop exhausted");
        Err(ExecutionError::MaxIterationsExceeded {
            loop_name: self.name.clone(),
            max_iterations: self.max_iterations,
        })
    }
}

#[async_trait]
impl Step for Loop {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FuncStep;

    fn incrementer() -> Arc<dyn Step> {
        Arc::new(FuncStep::from_fn("inc", |state| {
            let n = state.get_int("n") + 1;
            state.set("n", n);
            Ok(StepResult::new(n).with_usage(TokenUsage::new(1, 1)))
        }))
    }

    #[tokio::test]
    async fn test_stops_when_condition_holds() {
        let looped = Loop::new("count", incrementer(), |state| state.get_int("n") >= 2, 5);
        let mut state = State::new();

        let result = looped.run(&Context::new(), &mut state).await.unwrap();
        assert_eq!(result.output, 2);
        assert_eq!(result.usage.total(), 4);
        assert_eq!(state.get_int("count.iteration"), 2);
    }

    /// 条件を満たさない本体は3回実行され、カウンターは3で止まる
    #[tokio::test]
    async fn test_exhaustion_after_max_iterations() {
        let looped = Loop::new("never", incrementer(), |_| false, 3);
        let mut state = State::new();

        let err = looped.run(&Context::new(), &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::MaxIterationsExceeded { ref loop_name, max_iterations: 3 } if loop_name == "never"
        ));
        assert_eq!(state.get_int("n"), 3);
        assert_eq!(state.get_int(&looped.counter_key()), 3);
    }

    #[tokio::test]
    async fn test_iteration_events() {
        let looped = Loop::new("count", incrementer(), |state| state.get_int("n") >= 2, 5);
        let (sink, mut rx) = EventSink::channel(32);

        looped.run_streaming(&Context::new(), &mut State::new(), &sink).await.unwrap();
        drop(sink);

        let mut iterations = Vec::new();
        while let Some(event) = rx.recv().await {
            if event.event_type == EventType::LoopIteration {
                iterations.push(event.iteration.unwrap());
            }
        }
        assert_eq!(iterations, vec![1, 2]);
    }
}
