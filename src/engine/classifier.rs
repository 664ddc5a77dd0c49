//! LLM による分類で分岐するオペレーター [`ClassifierRouter`]
//!
//! # 実行フロー
//!
//! 1. `input_key` の値を入力として、カテゴリ一覧を列挙したシステムプロンプトで1回だけ LLM を呼び出す
//! 2. 応答を正規化（前後の空白・引用符・句読点を除去し、最初の単語を小文字化）。
//!    カテゴリ名も同じ規則で1語に正規化して保持する
//! 3. ラベルを `<ルーター名>.category` に書き込み、対応するステップに委譲
//!
//! 未知のラベルはフォールバックのステップがあればそれを実行し、
//! なければ [`ExecutionError::NoRoute`] で失敗します。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::result::{ExecutionError, StepResult};
use crate::engine::step::{run_child, Step};
use crate::event::{Event, EventSink, EventType};
use crate::provider::{ChatClient, ChatOptions, Message, TokenUsage};
use crate::retry::{retry, RetryConfig};
use crate::state::State;

struct Category {
    description: String,
    step: Arc<dyn Step>,
}

/// LLM の分類結果でステップを選択するルーター
///
/// # 例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use melted_flow::engine::{ClassifierRouter, Step};
/// use melted_flow::provider::ChatClient;
///
/// # fn build(client: Arc<dyn ChatClient>, billing: Arc<dyn Step>, tech: Arc<dyn Step>, human: Arc<dyn Step>) -> ClassifierRouter {
/// ClassifierRouter::new("support", client, "ticket")
///     .with_category("billing", "請求・支払いに関する問い合わせ", billing)
///     .with_category("technical", "製品の不具合や使い方", tech)
///     .with_fallback(human)
/// # }
/// ```
pub struct ClassifierRouter {
    name: String,
    client: Arc<dyn ChatClient>,
    input_key: String,
    categories: BTreeMap<String, Category>,
    fallback: Option<Arc<dyn Step>>,
    instructions: Option<String>,
    options: ChatOptions,
    retry: Option<RetryConfig>,
}

impl ClassifierRouter {
    pub fn new(name: impl Into<String>, client: Arc<dyn ChatClient>, input_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            input_key: input_key.into(),
            categories: BTreeMap::new(),
            fallback: None,
            instructions: None,
            options: ChatOptions::default(),
            retry: None,
        }
    }

    /// カテゴリを追加
    ///
    /// ラベルは応答と同じ規則で正規化され、単語間の空白は `_` に置き換えて
    /// 1語として保持します（`"Customer Service"` は `customer_service`）。
    /// プロンプトにも正規化後のラベルが列挙されます。
    pub fn with_category(
        mut self,
        label: &str,
        description: impl Into<String>,
        step: Arc<dyn Step>,
    ) -> Self {
        self.categories.insert(
            category_label(label),
            Category {
                description: description.into(),
                step,
            },
        );
        self
    }

    /// 未知のラベルに対して実行するステップ
    pub fn with_fallback(mut self, step: Arc<dyn Step>) -> Self {
        self.fallback = Some(step);
        self
    }

    /// システムプロンプトの先頭に加える指示
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// State に書き込む分類ラベルのキー
    pub fn category_key(&self) -> String {
        format!("{}.category", self.name)
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        if let Some(instructions) = &self.instructions {
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "Classify the user's input into exactly one of the following categories.\n\
             Reply with the category name only, without any explanation.\n\nCategories:\n",
        );
        for (label, category) in &self.categories {
            if category.description.is_empty() {
                prompt.push_str(&format!("- {}\n", label));
            } else {
                prompt.push_str(&format!("- {}: {}\n", label, category.description));
            }
        }
        prompt
    }

    async fn classify(&self, ctx: &Context, state: &State) -> Result<(String, TokenUsage), ExecutionError> {
        let messages = vec![
            Message::system(self.system_prompt()),
            Message::user(state.get_string(&self.input_key)),
        ];
        let policy = self.retry.clone().unwrap_or_else(RetryConfig::no_retry);

        let response = retry(ctx, &policy, || self.client.chat(&messages, &self.options)).await?;
        Ok((normalize_label(&response.content), response.usage))
    }

    fn select<'a>(&'a self, label: &'a str) -> Result<(&'a str, &'a Arc<dyn Step>), ExecutionError> {
        if let Some((known, category)) = self.categories.get_key_value(label) {
            return Ok((known.as_str(), &category.step));
        }
        match &self.fallback {
            Some(step) => {
                warn!(router = %self.name, label, "Unknown category, using fallback");
                Ok((label, step))
            }
            None => Err(ExecutionError::NoRoute {
                router: self.name.clone(),
                label: label.to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &Context,
        state: &mut State,
        events: Option<&EventSink>,
    ) -> Result<StepResult, ExecutionError> {
        let (label, usage) = self.classify(ctx, state).await?;
        state.set(self.category_key(), label.clone());

        let (route, step) = self.select(&label)?;
        debug!(router = %self.name, route, step = step.name(), "Category selected");
        if let Some(sink) = events {
            sink.emit(Event::for_step(EventType::RouteSelected, &self.name).with_route(route))
                .await;
        }

        let mut result = run_child(step.as_ref(), ctx, state, events).await?;
        result.usage += usage;
        Ok(result)
    }
}

#[async_trait]
impl Step for ClassifierRouter {
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

/// LLM の応答を分類ラベルに正規化
///
/// 前後の空白を除去し、最初の単語から引用符・句読点を取り除いて小文字化します。
///
/// # 例
///
/// ```rust
/// use melted_flow::engine::classifier::normalize_label;
///
/// assert_eq!(normalize_label("  \"Billing\".\n"), "billing");
/// assert_eq!(normalize_label("technical - the user reports a crash"), "technical");
/// ```
pub fn normalize_label(reply: &str) -> String {
    let is_noise = |c: char| !(c.is_alphanumeric() || c == '_' || c == '-');

    reply
        .split_whitespace()
        .map(|word| word.trim_matches(is_noise))
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_lowercase()
}

/// カテゴリ名を応答と照合できる1語のラベルに変換
fn category_label(label: &str) -> String {
    normalize_label(&label.split_whitespace().collect::<Vec<_>>().join("_"))
}
