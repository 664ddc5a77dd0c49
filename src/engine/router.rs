//! 条件分岐オペレーター [`Router`]

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::{run_child, Step};
use crate::event::{Event, EventSink, EventType};
use crate::state::State;

/// 既定ルートの名前
pub const DEFAULT_ROUTE: &str = "default";

/// ルートの条件
pub type RouteCondition = dyn Fn(&Context, &State) -> bool + Send + Sync;

/// 条件と実行するステップの組
#[derive(Clone)]
pub struct Route {
    name: String,
    condition: Arc<RouteCondition>,
    step: Arc<dyn Step>,
}

impl Route {
    pub fn new<F>(name: impl Into<String>, condition: F, step: Arc<dyn Step>) -> Self
    where
        F: Fn(&Context, &State) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            step,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 最初に条件を満たしたルートのステップを実行するオペレーター
///
/// どのルートも一致しない場合は既定のステップ（ルート名 `"default"`）を実行します。
/// 子ステップのエラーはそのまま返します。
///
/// # 例
///
/// ```rust
/// use std::sync::Arc;
/// use melted_flow::engine::{FuncStep, Router, Step, StepResult};
///
/// let escalate: Arc<dyn Step> = Arc::new(FuncStep::from_fn("escalate", |_| Ok(StepResult::new("human"))));
/// let reply: Arc<dyn Step> = Arc::new(FuncStep::from_fn("reply", |_| Ok(StepResult::new("bot"))));
///
/// let router = Router::new("triage", reply)
///     .with_route("urgent", |_ctx, state| state.get_int("priority") >= 8, escalate);
/// ```
pub struct Router {
    name: String,
    routes: Vec<Route>,
    default: Arc<dyn Step>,
}

impl Router {
    pub fn new(name: impl Into<String>, default: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            default,
        }
    }

    /// ルートを末尾に追加（先に追加したルートが優先）
    pub fn with_route<F>(mut self, name: impl Into<String>, condition: F, step: Arc<dyn Step>) -> Self
    where
        F: Fn(&Context, &State) -> bool + Send + Sync + 'static,
    {
        self.routes.push(Route::new(name, condition, step));
        self
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// 実行するルート名とステップを選択
    pub fn select(&self, ctx: &Context, state: &State) -> (&str, &Arc<dyn Step>) {
        self.routes
            .iter()
            .find(|route| (route.condition)(ctx, state))
            .map(|route| (route.name.as_str(), &route.step))
            .unwrap_or((DEFAULT_ROUTE, &self.default))
    }
}

#[async_trait]
impl Step for Router {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
        let (route, step) = self.select(ctx, state);
        debug!(router = %self.name, route, step = step.name(), "Route selected");
        run_child(step.as_ref(), ctx, state, None).await
    }

    async fn run_streaming(
        &self,
        ctx: &Context,
        state: &mut State,
        events: &EventSink,
    ) -> Result<StepResult, ExecutionError> {
        let (route, step) = self.select(ctx, state);
        debug!(router = %self.name, route, step = step.name(), "Route selected");
        events
            .emit(Event::for_step(EventType::RouteSelected, &self.name).with_route(route))
            .await;
        run_child(step.as_ref(), ctx, state, Some(events)).await
    }
}
