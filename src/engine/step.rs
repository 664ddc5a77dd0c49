//! ステップの抽象化
//!
//! # 責務
//!
//! - 合成可能な最小の実行単位 [`Step`] トレイトの定義
//! - ステップをバックグラウンドで実行しイベントを流す [`run_stream`]
//!
//! 全てのオペレーター（Chain・Parallel・Router・Loop 等）も [`Step`] を実装するため、
//! 任意に入れ子にできます。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::event::{Event, EventSink, EventStream, EventType, EVENT_BUFFER_SIZE};
use crate::state::State;

/// 実行可能なステップ
///
/// # 実装例
///
/// ```rust
/// use async_trait::async_trait;
/// use melted_flow::context::Context;
/// use melted_flow::engine::{ExecutionError, Step, StepResult};
/// use melted_flow::state::State;
///
/// struct Greet;
///
/// #[async_trait]
/// impl Step for Greet {
///     fn name(&self) -> &str {
///         "greet"
///     }
///
///     async fn run(&self, _ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
///         let greeting = format!("こんにちは、{}さん", state.get_string("user"));
///         state.set("greeting", greeting.clone());
///         Ok(StepResult::new(greeting))
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// ステップ名（イベントやエラーに使用）
    fn name(&self) -> &str;

    /// ステップを実行
    ///
    /// # 引数
    ///
    /// - `ctx`: キャンセル・デッドラインを運ぶコンテキスト
    /// - `state`: ワークフロー実行中の状態（読み書き可能）
    ///
    /// # 戻り値
    ///
    /// - `Ok(StepResult)`: 出力とトークン使用量
    /// - `Err(ExecutionError)`: 実行失敗
    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError>;

    /// イベントを発行しながらステップを実行
    ///
    /// デフォルト実装は [`Step::run`] を StepStart / StepComplete で挟みます。
    /// 失敗時のエラーイベントは [`run_stream`] が最上位で1度だけ発行します。
    async fn run_streaming(
        &self,
        ctx: &Context,
        state: &mut State,
        events: &EventSink,
    ) -> Result<StepResult, ExecutionError> {
        events.emit(Event::for_step(EventType::StepStart, self.name())).await;
        let result = self.run(ctx, state).await?;
        events
            .emit(Event::for_step(EventType::StepComplete, self.name()).with_usage(result.usage))
            .await;
        Ok(result)
    }
}

/// ステップの最終出力（状態と実行結果）
pub type StepOutcome = (State, Result<StepResult, ExecutionError>);

/// ステップをバックグラウンドタスクで実行し、イベントストリームを返す
///
/// 呼び出しは即座に戻ります。ストリームは必ず終端イベントで終わります。
/// 失敗時は [`EventType::Error`] を1件発行し、成功時にルートのステップが終端イベントで
/// 終えていなければ [`EventType::WorkflowComplete`] を補います。
/// [`EventStream::finish`] で最終状態と結果を取得できます。
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::context::Context;
/// use melted_flow::engine::{run_stream, Step};
/// use melted_flow::state::State;
///
/// # async fn example(step: Arc<dyn Step>) {
/// let mut stream = run_stream(step, Context::new(), State::new());
/// while let Some(event) = stream.next().await {
///     println!("{:?}", event.event_type);
/// }
/// let (state, result) = stream.finish().await.expect("task panicked");
/// # }
/// ```
pub fn run_stream(step: Arc<dyn Step>, ctx: Context, state: State) -> EventStream<StepOutcome> {
    let (sink, rx) = EventSink::channel(EVENT_BUFFER_SIZE);

    let handle = tokio::spawn(async move {
        let mut state = state;
        let result = step.run_streaming(&ctx, &mut state, &sink).await;
        match &result {
            Ok(output) if !sink.ends_with_terminal() => {
                sink.emit(Event::for_step(EventType::WorkflowComplete, step.name()).with_usage(output.usage))
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(step = step.name(), error = %e, "Step stream finished with error");
                sink.emit(Event::error(step.name(), e)).await;
            }
        }
        (state, result)
    });

    EventStream::new(rx, handle)
}

/// コンテキストと競合させて子ステップを実行
///
/// `events` が指定されていればストリーミング実行します。
pub(crate) async fn run_child(
    step: &dyn Step,
    ctx: &Context,
    state: &mut State,
    events: Option<&EventSink>,
) -> Result<StepResult, ExecutionError> {
    match events {
        Some(sink) => ctx.run(step.run_streaming(ctx, state, sink)).await,
        None => ctx.run(step.run(ctx, state)).await,
    }
}
