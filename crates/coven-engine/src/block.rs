use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// A typed unit of work composed into a ritual pipeline.
///
/// Capabilities are static declarations scored against the ambient tags
/// when the router picks the next hop; tags themselves are added at
/// runtime through [`crate::tags`].
#[async_trait]
pub trait Block<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn invoke(&self, input: I, cancel: &CancellationToken) -> Result<O, BoxError>;

    /// Capabilities this block claims to serve.
    fn capabilities(&self) -> &[&'static str] {
        &[]
    }
}
