use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// A pure, total, cancel-aware transform.
///
/// Total: every valid input produces a value — filtering happens
/// upstream, not here. Pure: no I/O. Implementations must propagate
/// cancellation rather than swallow it.
#[async_trait]
pub trait Transmuter<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn transmute(&self, input: I, cancel: &CancellationToken) -> Result<O, BoxError>;
}

/// Lifts an infallible closure into a [`Transmuter`].
pub struct FnTransmuter<F>(F);

impl<F> FnTransmuter<F> {
    pub fn new(map: F) -> Self {
        Self(map)
    }
}

#[async_trait]
impl<I, O, F> Transmuter<I, O> for FnTransmuter<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync,
{
    async fn transmute(&self, input: I, _cancel: &CancellationToken) -> Result<O, BoxError> {
        Ok((self.0)(input))
    }
}

/// Result of a batch transmutation: one output plus an optional chunk the
/// batcher chose not to consume, carried into the next window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch<C, O> {
    pub output: O,
    pub remainder: Option<C>,
}

impl<C, O> Batch<C, O> {
    /// Every chunk was consumed.
    pub fn complete(output: O) -> Self {
        Self {
            output,
            remainder: None,
        }
    }

    /// The trailing `remainder` seeds the next window.
    pub fn with_remainder(output: O, remainder: C) -> Self {
        Self {
            output,
            remainder: Some(remainder),
        }
    }
}

/// Folds an ordered chunk sequence into one output.
///
/// Transmutation must be deterministic on the same input: windowing
/// consumers commit their bookmark only after emission and will re-feed
/// the same chunks after a restart.
#[async_trait]
pub trait BatchTransmuter<C, O>: Send + Sync
where
    C: Send + 'static,
    O: Send + 'static,
{
    async fn transmute(
        &self,
        chunks: Vec<C>,
        cancel: &CancellationToken,
    ) -> Result<Batch<C, O>, BoxError>;
}

/// Two independent transmuters paired by direction, with no shared state.
pub struct BidirectionalTransmuter<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    afferent: Box<dyn Transmuter<A, B>>,
    efferent: Box<dyn Transmuter<B, A>>,
}

impl<A, B> BidirectionalTransmuter<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    pub fn new(
        afferent: impl Transmuter<A, B> + 'static,
        efferent: impl Transmuter<B, A> + 'static,
    ) -> Self {
        Self {
            afferent: Box::new(afferent),
            efferent: Box::new(efferent),
        }
    }

    /// Inbound direction: A to B.
    pub async fn afferent(&self, input: A, cancel: &CancellationToken) -> Result<B, BoxError> {
        self.afferent.transmute(input, cancel).await
    }

    /// Outbound direction: B to A.
    pub async fn efferent(&self, input: B, cancel: &CancellationToken) -> Result<A, BoxError> {
        self.efferent.transmute(input, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn fn_transmuter_maps_infallibly() {
        let double = FnTransmuter::new(|n: u32| n * 2);
        let cancel = CancellationToken::new();

        assert_eq!(double.transmute(21, &cancel).await.unwrap(), 42);
    }

    #[test_log::test(tokio::test)]
    async fn bidirectional_directions_are_independent() {
        let pair: BidirectionalTransmuter<String, usize> = BidirectionalTransmuter::new(
            FnTransmuter::new(|s: String| s.len()),
            FnTransmuter::new(|n: usize| "x".repeat(n)),
        );
        let cancel = CancellationToken::new();

        assert_eq!(pair.afferent("four".into(), &cancel).await.unwrap(), 4);
        assert_eq!(pair.efferent(3, &cancel).await.unwrap(), "xxx");
    }

    #[test]
    fn batch_constructors_carry_the_remainder() {
        let complete: Batch<String, usize> = Batch::complete(7);
        assert_eq!(complete.remainder, None);

        let partial = Batch::with_remainder(7, "tail".to_string());
        assert_eq!(partial.remainder.as_deref(), Some("tail"));
    }
}
