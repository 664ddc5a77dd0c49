//! ツール呼び出しの承認
//!
//! [`AgentConfig::require_approval`](crate::agent::AgentConfig::require_approval)
//! に含まれるツールは、実行前に [`Approver`] の判断を仰ぎます。
//! 承認者が設定されていない場合は拒否として扱います。

use async_trait::async_trait;

use crate::context::Context;
use crate::tool::ToolCall;

/// 承認者が設定されていない場合の拒否理由
pub const NO_APPROVER_REASON: &str = "no approver configured";

/// 承認の判断
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// 実行を許可
    Approve,

    /// 実行を拒否
    Reject {
        /// 拒否の理由（モデルに返される）
        reason: String,
    },
}

impl ApprovalDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// ツール呼び出しの承認者
///
/// # 実装例
///
/// ```rust
/// use async_trait::async_trait;
/// use melted_flow::agent::{ApprovalDecision, Approver};
/// use melted_flow::context::Context;
/// use melted_flow::tool::ToolCall;
///
/// struct ReadOnly;
///
/// #[async_trait]
/// impl Approver for ReadOnly {
///     async fn approve(&self, _ctx: &Context, call: &ToolCall) -> ApprovalDecision {
///         if call.name.starts_with("read_") {
///             ApprovalDecision::Approve
///         } else {
///             ApprovalDecision::reject("read-only session")
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, ctx: &Context, call: &ToolCall) -> ApprovalDecision;
}

/// 全てのツール呼び出しを承認
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn approve(&self, _ctx: &Context, _call: &ToolCall) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

/// 同期関数による承認者
pub struct FnApprover<F> {
    decide: F,
}

impl<F> FnApprover<F>
where
    F: Fn(&ToolCall) -> ApprovalDecision + Send + Sync,
{
    pub fn new(decide: F) -> Self {
        Self { decide }
    }
}

#[async_trait]
impl<F> Approver for FnApprover<F>
where
    F: Fn(&ToolCall) -> ApprovalDecision + Send + Sync,
{
    async fn approve(&self, _ctx: &Context, call: &ToolCall) -> ApprovalDecision {
        (self.decide)(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_approver() {
        let approver = FnApprover::new(|call: &ToolCall| {
            if call.name == "rm" {
                ApprovalDecision::reject("destructive")
            } else {
                ApprovalDecision::Approve
            }
        });
        let ctx = Context::new();

        assert!(approver.approve(&ctx, &ToolCall::new("1", "ls", "{}")).await.is_approved());
        assert_eq!(
            approver.approve(&ctx, &ToolCall::new("2", "rm", "{}")).await,
            ApprovalDecision::reject("destructive")
        );
        assert!(AutoApprove.approve(&ctx, &ToolCall::new("3", "rm", "{}")).await.is_approved());
    }
}
