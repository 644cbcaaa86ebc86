use std::any::{Any, TypeId, type_name};
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::block::Block;
use crate::error::{BoxError, RitualError};
use crate::tags::{ACTIVE_TAGS, TagSet};

type AnyValue = Box<dyn Any + Send>;
type BlockFuture = Pin<Box<dyn Future<Output = Result<AnyValue, BoxError>> + Send>>;
type BlockFn = Box<dyn Fn(AnyValue, CancellationToken) -> BlockFuture + Send + Sync>;

struct RegisteredBlock {
    name: String,
    input: TypeId,
    output_name: &'static str,
    capabilities: Vec<&'static str>,
    trick: Option<usize>,
    run: BlockFn,
}

/// Mutable staging area for a ritual's topology. [`RitualBuilder::done`]
/// freezes it; all routing lookups resolve against the frozen value.
#[derive(Default)]
pub struct RitualBuilder {
    blocks: Vec<RegisteredBlock>,
    tricks: Vec<String>,
    current_trick: Option<usize>,
}

impl RitualBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block. Registration order is the routing tie-breaker:
    /// among equally scored candidates, the earliest wins.
    pub fn block<I, O, B>(&mut self, name: impl Into<String>, block: B) -> &mut Self
    where
        I: Send + 'static,
        O: Send + 'static,
        B: Block<I, O> + 'static,
    {
        let block = Arc::new(block);
        let capabilities = block.capabilities().to_vec();
        let run: BlockFn = Box::new(move |input, cancel| {
            let block = block.clone();
            Box::pin(async move {
                let input = match input.downcast::<I>() {
                    Ok(input) => *input,
                    Err(_) => return Err(BoxError::from("router dispatched a mismatched input")),
                };
                let output = block.invoke(input, &cancel).await?;
                Ok(Box::new(output) as AnyValue)
            })
        });
        self.blocks.push(RegisteredBlock {
            name: name.into(),
            input: TypeId::of::<I>(),
            output_name: type_name::<O>(),
            capabilities,
            trick: self.current_trick,
            run,
        });
        self
    }

    /// Open a nested scope. After any member of the trick produces a hop,
    /// the next selection is restricted to this trick's members, for
    /// exactly one hop.
    pub fn trick(&mut self, name: impl Into<String>, configure: impl FnOnce(&mut Self)) -> &mut Self {
        let id = self.tricks.len();
        self.tricks.push(name.into());
        let enclosing = self.current_trick.replace(id);
        configure(self);
        self.current_trick = enclosing;
        self
    }

    /// Freeze the topology with its declared output type.
    pub fn done<O: Send + 'static>(self) -> Ritual {
        Ritual {
            blocks: self.blocks,
            output: TypeId::of::<O>(),
            output_name: type_name::<O>(),
        }
    }
}

/// Immutable, frozen ritual topology.
pub struct Ritual {
    blocks: Vec<RegisteredBlock>,
    output: TypeId,
    output_name: &'static str,
}

impl Ritual {
    /// Route `input` hop by hop until the declared output type is
    /// produced and no block consumes it.
    ///
    /// Each hop selects among the blocks whose input type equals the
    /// current value's runtime type — restricted to one trick's members
    /// when the previous hop came from that trick — scored by the number
    /// of active tags matching a block's capabilities, with registration
    /// order breaking ties.
    pub async fn invoke<I, O>(&self, input: I, cancel: &CancellationToken) -> Result<O, RitualError>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        if TypeId::of::<O>() != self.output {
            return Err(RitualError::OutputMismatch {
                actual: type_name::<O>(),
                declared: self.output_name,
            });
        }

        let tags = TagSet::default();
        let mut current: AnyValue = Box::new(input);
        let mut current_type = TypeId::of::<I>();
        let mut current_type_name = type_name::<I>();
        let mut restriction: Option<usize> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(RitualError::Cancelled);
            }

            let selected = self.select(current_type, restriction, &tags);
            let Some(block) = selected else {
                if current_type == self.output {
                    return current
                        .downcast::<O>()
                        .map(|output| *output)
                        .map_err(|_| RitualError::OutputMismatch {
                            actual: current_type_name,
                            declared: self.output_name,
                        });
                }
                return Err(RitualError::NoRoute {
                    type_name: current_type_name,
                });
            };

            debug!(block = %block.name, "routing hop");
            let hop = (block.run)(current, cancel.clone());
            let output = ACTIVE_TAGS
                .scope(tags.clone(), hop)
                .await
                .map_err(|source| RitualError::Block {
                    block: block.name.clone(),
                    source,
                })?;

            current_type = (*output).type_id();
            current_type_name = block.output_name;
            current = output;
            restriction = block.trick;
        }
    }

    fn select(
        &self,
        input: TypeId,
        restriction: Option<usize>,
        tags: &TagSet,
    ) -> Option<&RegisteredBlock> {
        let active = tags.lock().clone();
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.input == input)
            .filter(|(_, block)| restriction.is_none_or(|trick| block.trick == Some(trick)))
            .min_by_key(|(index, block)| {
                let score = block
                    .capabilities
                    .iter()
                    .filter(|capability| active.contains(**capability))
                    .count();
                (Reverse(score), *index)
            })
            .map(|(_, block)| block)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::tags;

    #[derive(Debug, PartialEq)]
    struct Request(String);
    #[derive(Debug, PartialEq)]
    struct Count(usize);
    #[derive(Debug, PartialEq)]
    struct Reply(String);

    /// Counts words and optionally raises a tag for later hops.
    struct CountBlock {
        raise: Option<&'static str>,
    }

    #[async_trait]
    impl Block<Request, Count> for CountBlock {
        async fn invoke(&self, input: Request, _cancel: &CancellationToken) -> Result<Count, BoxError> {
            if let Some(tag) = self.raise {
                tags::add(tag);
            }
            Ok(Count(input.0.split_whitespace().count()))
        }
    }

    /// Renders a reply with a fixed prefix; claims the given capabilities.
    struct RenderBlock {
        prefix: &'static str,
        capabilities: &'static [&'static str],
    }

    #[async_trait]
    impl Block<Count, Reply> for RenderBlock {
        async fn invoke(&self, input: Count, _cancel: &CancellationToken) -> Result<Reply, BoxError> {
            Ok(Reply(format!("{}:{}", self.prefix, input.0)))
        }

        fn capabilities(&self) -> &[&'static str] {
            self.capabilities
        }
    }

    struct FailingBlock;

    #[async_trait]
    impl Block<Request, Count> for FailingBlock {
        async fn invoke(&self, _input: Request, _cancel: &CancellationToken) -> Result<Count, BoxError> {
            Err("no words today".into())
        }
    }

    #[test_log::test(tokio::test)]
    async fn routes_a_typed_chain_to_the_declared_output() {
        let mut builder = RitualBuilder::new();
        builder.block("count", CountBlock { raise: None });
        builder.block(
            "render",
            RenderBlock {
                prefix: "plain",
                capabilities: &[],
            },
        );
        let ritual = builder.done::<Reply>();

        let reply = ritual
            .invoke::<Request, Reply>(Request("two words".into()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, Reply("plain:2".into()));
    }

    #[test_log::test(tokio::test)]
    async fn tags_steer_selection_over_registration_order() {
        let mut builder = RitualBuilder::new();
        builder.block("count", CountBlock { raise: Some("fancy") });
        builder.block(
            "plain",
            RenderBlock {
                prefix: "plain",
                capabilities: &[],
            },
        );
        builder.block(
            "fancy",
            RenderBlock {
                prefix: "fancy",
                capabilities: &["fancy"],
            },
        );
        let ritual = builder.done::<Reply>();

        let reply = ritual
            .invoke::<Request, Reply>(Request("hello".into()), &CancellationToken::new())
            .await
            .unwrap();

        // "plain" registered first, but the active tag matches "fancy".
        assert_eq!(reply, Reply("fancy:1".into()));
    }

    #[test_log::test(tokio::test)]
    async fn registration_order_breaks_score_ties() {
        let mut builder = RitualBuilder::new();
        builder.block("count", CountBlock { raise: None });
        builder.block(
            "first",
            RenderBlock {
                prefix: "first",
                capabilities: &[],
            },
        );
        builder.block(
            "second",
            RenderBlock {
                prefix: "second",
                capabilities: &[],
            },
        );
        let ritual = builder.done::<Reply>();

        let reply = ritual
            .invoke::<Request, Reply>(Request("hi".into()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, Reply("first:1".into()));
    }

    #[test_log::test(tokio::test)]
    async fn trick_members_restrict_the_next_hop() {
        let mut builder = RitualBuilder::new();
        builder.block(
            "outside",
            RenderBlock {
                prefix: "outside",
                capabilities: &[],
            },
        );
        builder.trick("inner", |trick| {
            trick.block("count", CountBlock { raise: None });
            trick.block(
                "member",
                RenderBlock {
                    prefix: "member",
                    capabilities: &[],
                },
            );
        });
        let ritual = builder.done::<Reply>();

        let reply = ritual
            .invoke::<Request, Reply>(Request("restricted hop".into()), &CancellationToken::new())
            .await
            .unwrap();

        // "outside" is registered earlier, but the Count hop was produced
        // inside the trick, so only trick members are candidates.
        assert_eq!(reply, Reply("member:2".into()));
    }

    #[test_log::test(tokio::test)]
    async fn unconsumed_non_output_value_is_a_routing_error() {
        let mut builder = RitualBuilder::new();
        builder.block("count", CountBlock { raise: None });
        let ritual = builder.done::<Reply>();

        let error = ritual
            .invoke::<Request, Reply>(Request("stuck".into()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, RitualError::NoRoute { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn block_failure_names_the_block() {
        let mut builder = RitualBuilder::new();
        builder.block("failing", FailingBlock);
        let ritual = builder.done::<Count>();

        let error = ritual
            .invoke::<Request, Count>(Request("x".into()), &CancellationToken::new())
            .await
            .unwrap_err();

        match error {
            RitualError::Block { block, source } => {
                assert_eq!(block, "failing");
                assert_eq!(source.to_string(), "no words today");
            }
            other => panic!("expected block failure, got {other}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn declared_output_type_is_enforced() {
        let builder = RitualBuilder::new();
        let ritual = builder.done::<Reply>();

        let error = ritual
            .invoke::<Request, Count>(Request("x".into()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, RitualError::OutputMismatch { .. }));
    }

    #[test]
    #[should_panic(expected = "outside a running block body")]
    fn tag_access_outside_a_block_panics() {
        tags::add("loose");
    }
}
