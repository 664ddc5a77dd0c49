//! 任意の関数をステップとして実行する [`FuncStep`]

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::Step;
use crate::state::State;

type StepFn = dyn for<'a> Fn(&'a Context, &'a mut State) -> BoxFuture<'a, Result<StepResult, ExecutionError>>
    + Send
    + Sync;

/// 非同期クロージャを包むステップ
///
/// # 例
///
/// ```rust
/// use futures::FutureExt;
/// use melted_flow::engine::{FuncStep, StepResult};
///
/// let double = FuncStep::new("double", |_ctx, state| {
///     async move {
///         let n = state.get_int("n");
///         state.set("n", n * 2);
///         Ok(StepResult::new(n * 2))
///     }
///     .boxed()
/// });
///
/// let count = FuncStep::from_fn("count", |state| Ok(StepResult::new(state.len())));
/// ```
#[derive(Clone)]
pub struct FuncStep {
    name: String,
    func: Arc<StepFn>,
}

impl FuncStep {
    /// 非同期クロージャからステップを生成
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut State) -> BoxFuture<'a, Result<StepResult, ExecutionError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// 同期関数からステップを生成
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut State) -> Result<StepResult, ExecutionError> + Send + Sync + 'static,
    {
        Self::new(name, move |_ctx, state| {
            let result = func(state);
            async move { result }.boxed()
        })
    }
}

#[async_trait]
impl Step for FuncStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, state: &mut State) -> Result<StepResult, ExecutionError> {
        (self.func)(ctx, state).await
    }
}
