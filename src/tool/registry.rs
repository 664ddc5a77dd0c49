//! ツールレジストリ
//!
//! # 責務
//!
//! - ツールの実行インターフェース [`ToolRegistry`] を定義
//! - 非同期クロージャを登録できるインメモリ実装 [`FunctionRegistry`] を提供
//!
//! 引数と結果はシリアライズ済みの文字列として扱い、
//! レジストリは構造を解釈せずにそのまま受け渡します。
//!
//! # 使用例
//!
//! ```rust
//! use melted_flow::context::Context;
//! use melted_flow::tool::{FunctionRegistry, ToolRegistry};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = FunctionRegistry::new()
//!     .with_tool("echo", "Echo the arguments", |_ctx, args| async move { Ok(args) });
//!
//! let output = registry.execute(&Context::new(), "echo", "hi").await.unwrap();
//! assert_eq!(output.content, "hi");
//! assert_eq!(registry.names(), vec!["echo"]);
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use super::types::ToolOutput;

/// ツール実行のインターフェース
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// 名前を指定してツールを実行
    ///
    /// # 戻り値
    ///
    /// - `Ok(ToolOutput)`: 実行完了（`is_error` はツール自身が報告したエラー）
    /// - `Err(ToolError)`: ツールが見つからない、または実行に失敗
    async fn execute(
        &self,
        ctx: &Context,
        name: &str,
        arguments: &str,
    ) -> Result<ToolOutput, ToolError>;

    /// 登録されているツール名
    fn names(&self) -> Vec<String>;

    /// モデルに公開するツール定義
    ///
    /// デフォルトでは説明とスキーマを持たない定義を名前から生成します。
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .map(|name| ToolDefinition {
                name,
                description: String::new(),
                parameters: serde_json::json!({ "type": "object" }),
            })
            .collect()
    }
}

type ToolHandler =
    Arc<dyn Fn(Context, String) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// 非同期クロージャを登録するインメモリのツールレジストリ
#[derive(Default)]
pub struct FunctionRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl FunctionRegistry {
    /// 空のレジストリを生成
    pub fn new() -> Self {
        Self::default()
    }

    /// ツールを登録（同名のツールは置き換え）
    ///
    /// ハンドラーが返した文字列は成功結果として扱われます。
    pub fn register<F, Fut>(&mut self, name: &str, description: &str, handler: F)
    where
        F: Fn(Context, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |ctx: Context, args: String| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
                let fut = handler(ctx, args);
                Box::pin(async move { fut.await.map(ToolOutput::ok) })
            },
        );
        self.insert(name, description, serde_json::json!({ "type": "object" }), handler);
    }

    /// 引数スキーマと [`ToolOutput`] を返すハンドラーを登録
    pub fn register_raw<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        handler: F,
    ) where
        F: Fn(Context, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |ctx: Context, args: String| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
                Box::pin(handler(ctx, args))
            },
        );
        self.insert(name, description, parameters, handler);
    }

    /// ビルダー形式の [`FunctionRegistry::register`]
    pub fn with_tool<F, Fut>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Context, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        self.register(name, description, handler);
        self
    }

    /// 登録数
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn insert(
        &mut self,
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        handler: ToolHandler,
    ) {
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters,
                },
                handler,
            },
        );
    }
}

#[async_trait]
impl ToolRegistry for FunctionRegistry {
    async fn execute(
        &self,
        ctx: &Context,
        name: &str,
        arguments: &str,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        (tool.handler)(ctx.clone(), arguments.to_string()).await
    }

    fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition.clone()).collect()
    }
}
