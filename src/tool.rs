//! ツール呼び出しの型とレジストリ
//!
//! # モジュール構成
//!
//! - `types` - [`ToolCall`]、[`ToolResult`]、[`ToolOutput`]
//! - `registry` - [`ToolRegistry`] トレイトとインメモリ実装 [`FunctionRegistry`]

pub mod types;
pub mod registry;

// 公開APIの再エクスポート
pub use types::{ToolCall, ToolOutput, ToolResult};
pub use registry::{FunctionRegistry, ToolRegistry};
