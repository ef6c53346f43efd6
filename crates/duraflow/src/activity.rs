//! The activity contract.

use async_trait::async_trait;
use serde_json::Value;

/// A side-effecting operation invoked by the engine on behalf of a workflow
/// body.
///
/// Activities are black boxes to the engine. The engine's only obligations
/// are to invoke [`handle`](Self::handle) at most once per successful
/// completion across all replays, to checkpoint the returned value in the
/// workflow's history, and to fail the workflow if the handler errors.
///
/// # Delivery semantics
///
/// "At most once" is from the engine's perspective: a worker that dies after
/// the side effect but before the checkpoint commits will re-enter the
/// activity on the next replay. Activities that talk to external systems
/// should therefore be idempotent.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use duraflow::Activity;
/// use serde_json::{Value, json};
///
/// struct ChargeCard {
///     customer: String,
///     amount_cents: u64,
/// }
///
/// #[async_trait]
/// impl Activity for ChargeCard {
///     async fn handle(&self) -> anyhow::Result<Value> {
///         // call the payment provider here
///         Ok(json!({ "customer": self.customer, "charged": self.amount_cents }))
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync {
    /// Perform the side effect and return a JSON-serializable result.
    ///
    /// An `Err` terminates the workflow: the orchestrator marks it failed
    /// and appends nothing.
    async fn handle(&self) -> anyhow::Result<Value>;
}
