//! 並列実行オペレーター [`Parallel`]
//!
//! # 実行フロー
//!
//! 1. 各ブランチに親 State の独立した複製を渡し、ブランチごとにタスクを起動
//!    （`max_concurrency` が正ならセマフォで同時実行数を制限）
//! 2. 全ブランチの完了を待機（兄弟ブランチの失敗で他をキャンセルしない）
//! 3. 呼び出し元のタスクで集約関数を1度だけ呼び出し、親 State に反映
//!
//! Parallel が失敗するのは集約関数がエラーを返した場合と、
//! コンテキストが終了した場合のみです。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::{run_child, Step};
use crate::event::{Event, EventSink, EventType};
use crate::provider::TokenUsage;
use crate::state::State;

/// 並列実行の設定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// 同時実行数の上限（0 は無制限）
    pub max_concurrency: usize,

    /// 全体のタイムアウト
    pub timeout: Option<Duration>,
}

/// 成功したブランチの結果と最終状態
#[derive(Debug, Clone)]
pub struct BranchSuccess {
    pub result: StepResult,
    pub state: State,
}

/// 全ブランチの実行結果
#[derive(Debug, Default)]
pub struct BranchResults {
    /// ブランチ名（宣言順）
    pub names: Vec<String>,

    /// 成功したブランチ
    pub successes: HashMap<String, BranchSuccess>,

    /// 失敗したブランチ
    pub errors: HashMap<String, ExecutionError>,
}

impl BranchResults {
    /// 成功したブランチを宣言順に列挙
    pub fn ordered_successes(&self) -> impl Iterator<Item = (&str, &BranchSuccess)> {
        self.names
            .iter()
            .filter_map(|name| self.successes.get(name).map(|success| (name.as_str(), success)))
    }

    /// 失敗したブランチ名（宣言順）
    pub fn failed_names(&self) -> Vec<&str> {
        self.names
            .iter()
            .filter(|name| self.errors.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// 全てのブランチが失敗したか
    pub fn all_failed(&self) -> bool {
        self.successes.is_empty() && !self.errors.is_empty()
    }

    fn merge_into(&self, state: &mut State) {
        for (_, success) in self.ordered_successes() {
            state.merge(&success.state);
        }
    }

    fn describe_errors(&self) -> String {
        self.failed_names()
            .into_iter()
            .filter_map(|name| self.errors.get(name).map(|err| format!("{}: {}", name, err)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 集約関数
///
/// 親 State と全ブランチの結果を受け取り、親 State に結果を反映します。
pub type Aggregator = dyn Fn(&mut State, &BranchResults) -> Result<(), ExecutionError> + Send + Sync;

/// 成功した全ブランチの State を宣言順にマージし、1つでも失敗があればエラー
pub fn merge_all(state: &mut State, results: &BranchResults) -> Result<(), ExecutionError> {
    if !results.errors.is_empty() {
        return Err(ExecutionError::Aggregation(format!(
            "{}個のブランチが失敗しました: {}",
            results.errors.len(),
            results.describe_errors()
        )));
    }
    results.merge_into(state);
    Ok(())
}

/// 成功したブランチの State をマージし、失敗は無視する（全て失敗した場合のみエラー）
pub fn merge_successes(state: &mut State, results: &BranchResults) -> Result<(), ExecutionError> {
    if results.all_failed() {
        return Err(ExecutionError::Aggregation(format!(
            "全てのブランチが失敗しました: {}",
            results.describe_errors()
        )));
    }
    results.merge_into(state);
    Ok(())
}

/// ブランチを並行実行するオペレーター
///
/// 出力はブランチ名をキー、ブランチの出力を値とするJSONオブジェクトです。
/// 同名のブランチは `name[index]` に改名されます。
///
/// # 例
///
/// ```rust
/// use std::sync::Arc;
/// use melted_flow::engine::{merge_successes, FuncStep, Parallel, Step, StepResult};
///
/// let fan_out = Parallel::new(
///     "fan_out",
///     vec![
///         Arc::new(FuncStep::from_fn("left", |s| { s.set("left", 1); Ok(StepResult::new(1)) })) as Arc<dyn Step>,
///         Arc::new(FuncStep::from_fn("right", |s| { s.set("right", 2); Ok(StepResult::new(2)) })),
///     ],
/// )
/// .with_max_concurrency(2)
/// .with_aggregator(merge_successes);
/// ```
pub struct Parallel {
    name: String,
    branches: Vec<Arc<dyn Step>>,
    aggregator: Arc<Aggregator>,
    config: ParallelConfig,
}

impl Parallel {
    /// 既定の集約関数 [`merge_all`] で生成
    pub fn new(name: impl Into<String>, branches: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            branches,
            aggregator: Arc::new(merge_all),
            config: ParallelConfig::default(),
        }
    }

    pub fn with_aggregator<F>(mut self, aggregator: F) -> Self
    where
        F: Fn(&mut State, &BranchResults) -> Result<(), ExecutionError> + Send + Sync + 'static,
    {
        self.aggregator = Arc::new(aggregator);
        self
    }

    pub fn with_config(mut self, config: ParallelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    fn branch_names(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for branch in &self.branches {
            *counts.entry(branch.name()).or_default() += 1;
        }

        self.branches
            .iter()
            .enumerate()
            .map(|(index, branch)| {
                if counts.get(branch.name()).copied().unwrap_or(0) > 1 {
                    format!("{}[{}]", branch.name(), index)
                } else {
                    branch.name().to_string()
                }
            })
            .collect()
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let ctx = ctx.with_optional_timeout(self.config.timeout);
        let semaphore = (self.config.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_concurrency)));
        let names = self.branch_names();

        debug!(
            parallel = %self.name,
            branches = self.branches.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting parallel branches"
        );

        let handles: Vec<_> = self
            .branches
            .iter()
            .map(|branch| {
                let branch = Arc::clone(branch);
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let events = events.cloned();
                let mut branch_state = state.clone();

                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => {
                            let acquired = tokio::select! {
                                biased;
                                err = ctx.done() => Err(err),
                                permit = semaphore.acquire_owned() => Ok(permit.ok()),
                            };
                            match acquired {
                                Ok(permit) => permit,
                                Err(err) => return (branch_state, Err(ExecutionError::from(err))),
                            }
                        }
                        None => None,
                    };

                    let result = run_child(branch.as_ref(), &ctx, &mut branch_state, events.as_ref()).await;
                    (branch_state, result)
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let mut results = BranchResults {
            names: names.clone(),
            ..Default::default()
        };
        for (name, outcome) in names.into_iter().zip(joined) {
            match outcome {
                Ok((branch_state, Ok(result))) => {
                    results.successes.insert(
                        name,
                        BranchSuccess {
                            result,
                            state: branch_state,
                        },
                    );
                }
                Ok((_, Err(err))) => {
                    warn!(parallel = %self.name, branch = %name, error = %err, "Branch failed");
                    results.errors.insert(name, err);
                }
                Err(join_err) => {
                    warn!(parallel = %self.name, branch = %name, error = %join_err, "Branch panicked");
                    let task = format!("parallel branch '{}'", name);
                    results.errors.insert(name, ExecutionError::Panicked { task });
                }
            }
        }

        (self.aggregator)(state, &results)?;

        let mut output = Map::new();
        let mut usage = TokenUsage::default();
        for (name, success) in results.ordered_successes() {
            output.insert(name.to_string(), success.result.output.clone());
            usage += success.result.usage;
        }
        debug!(
            parallel = %self.name,
            succeeded = results.successes.len(),
            failed = results.errors.len(),
            "Parallel branches aggregated"
        );

        Ok(StepResult {
            output: Value::Object(output),
            usage,
        })
    }
}

#[async_trait]
impl Step for Parallel {
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
        events.emit(Event::for_step(EventType::ParallelStart, &self.name)).await;
        let result = self.execute(ctx, state, Some(events)).await?;
        events
            .emit(Event::for_step(EventType::ParallelComplete, &self.name).with_usage(result.usage))
            .await;
        Ok(result)
    }
}
