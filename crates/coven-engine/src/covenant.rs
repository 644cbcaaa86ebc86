use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};

use coven_types::{CovenantEntry, CovenantSink, CovenantSource};

use crate::error::{CovenantError, CovenantOffence};
use crate::transmute::{BatchTransmuter, Transmuter};
use crate::window::{ShatterPolicy, WindowPolicy};

/// A type participating in a covenant graph. Identity is the `TypeId`;
/// the short type name is carried for offence messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    fn of<T: 'static>() -> Self {
        let full = type_name::<T>();
        Self {
            id: TypeId::of::<T>(),
            name: full.rsplit("::").next().unwrap_or(full),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Transform,
    Window,
    Junction,
}

/// One declared edge with its registered component, retrievable by the
/// assembly that wires the validated pipeline.
pub struct Stage {
    kind: StageKind,
    input: TypeRef,
    outputs: Vec<TypeRef>,
    component: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("kind", &self.kind)
            .field("input", &self.input)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn input_name(&self) -> &'static str {
        self.input.name
    }

    pub fn output_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outputs.iter().map(|output| output.name)
    }

    /// Downcast the registered component back to its concrete type:
    /// the transmuter of a transform, the [`WindowStage`] of a window,
    /// the [`JunctionConfig`] of a junction.
    pub fn component<S: 'static>(&self) -> Option<&S> {
        self.component.downcast_ref()
    }
}

/// Declared window edge: the policy/batcher pair (and optional shatter)
/// registered for a chunk-to-output window.
pub struct WindowStage<C, O> {
    pub policy: Box<dyn WindowPolicy<C>>,
    pub batcher: Box<dyn BatchTransmuter<C, O>>,
    pub shatter: Option<Box<dyn ShatterPolicy<O>>>,
}

struct JunctionRoute<A> {
    output: TypeRef,
    predicate: Box<dyn Fn(&A) -> bool + Send + Sync>,
}

/// Fan-out declaration: predicated routes to output types, with an
/// optional fallback for entries matching no route.
pub struct JunctionConfig<A> {
    routes: Vec<JunctionRoute<A>>,
    fallback: Option<TypeRef>,
}

impl<A: 'static> JunctionConfig<A> {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
        }
    }

    /// Entries matching the predicate route to output type `B`.
    pub fn route<B: CovenantEntry + 'static>(
        mut self,
        predicate: impl Fn(&A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.routes.push(JunctionRoute {
            output: TypeRef::of::<B>(),
            predicate: Box::new(predicate),
        });
        self
    }

    /// Entries matching no route produce `B` instead.
    pub fn fallback<B: CovenantEntry + 'static>(mut self) -> Self {
        self.fallback = Some(TypeRef::of::<B>());
        self
    }

    /// Name of the output type the entry routes to: the first matching
    /// route, else the fallback, else `None`.
    pub fn route_for(&self, entry: &A) -> Option<&'static str> {
        self.routes
            .iter()
            .find(|route| (route.predicate)(entry))
            .map(|route| route.output.name)
            .or(self.fallback.map(|fallback| fallback.name))
    }

    fn output_refs(&self) -> Vec<TypeRef> {
        self.routes
            .iter()
            .map(|route| route.output)
            .chain(self.fallback)
            .collect()
    }
}

impl<A: 'static> Default for JunctionConfig<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable staging area for a covenant's typed graph.
///
/// Only types carrying covenant markers participate; draft protocol
/// variants stay outside the graph. [`CovenantBuilder::validate`] runs
/// every check once, before execution starts — an invalid graph never
/// runs.
pub struct CovenantBuilder {
    name: String,
    sources: Vec<TypeRef>,
    sinks: Vec<TypeRef>,
    stages: Vec<Stage>,
}

impl CovenantBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            sinks: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Declare that `T` enters the covenant from outside.
    pub fn source<T: CovenantSource + 'static>(mut self) -> Self {
        self.sources.push(TypeRef::of::<T>());
        self
    }

    /// Declare that `T` leaves the covenant to outside.
    pub fn sink<T: CovenantSink + 'static>(mut self) -> Self {
        self.sinks.push(TypeRef::of::<T>());
        self
    }

    /// Register a 1:1 transform edge from `A` to `B`.
    pub fn transform<A, B>(mut self, transmuter: impl Transmuter<A, B> + 'static) -> Self
    where
        A: CovenantEntry + Send + 'static,
        B: CovenantEntry + Send + 'static,
    {
        self.stages.push(Stage {
            kind: StageKind::Transform,
            input: TypeRef::of::<A>(),
            outputs: vec![TypeRef::of::<B>()],
            component: Box::new(transmuter),
        });
        self
    }

    /// Register a window-and-emit edge from chunk type `C` to `O`.
    pub fn window<C, O>(
        self,
        policy: impl WindowPolicy<C> + 'static,
        batcher: impl BatchTransmuter<C, O> + 'static,
    ) -> Self
    where
        C: CovenantEntry + Send + 'static,
        O: CovenantEntry + Send + 'static,
    {
        self.push_window::<C, O>(WindowStage {
            policy: Box::new(policy),
            batcher: Box::new(batcher),
            shatter: None,
        })
    }

    /// [`CovenantBuilder::window`] with a shatter splitting each output.
    pub fn shattered_window<C, O>(
        self,
        policy: impl WindowPolicy<C> + 'static,
        batcher: impl BatchTransmuter<C, O> + 'static,
        shatter: impl ShatterPolicy<O> + 'static,
    ) -> Self
    where
        C: CovenantEntry + Send + 'static,
        O: CovenantEntry + Send + 'static,
    {
        self.push_window::<C, O>(WindowStage {
            policy: Box::new(policy),
            batcher: Box::new(batcher),
            shatter: Some(Box::new(shatter)),
        })
    }

    fn push_window<C, O>(mut self, stage: WindowStage<C, O>) -> Self
    where
        C: CovenantEntry + Send + 'static,
        O: CovenantEntry + Send + 'static,
    {
        self.stages.push(Stage {
            kind: StageKind::Window,
            input: TypeRef::of::<C>(),
            outputs: vec![TypeRef::of::<O>()],
            component: Box::new(stage),
        });
        self
    }

    /// Register a fan-out edge from `A` to the configured route types.
    pub fn junction<A: CovenantEntry + Send + Sync + 'static>(
        mut self,
        config: JunctionConfig<A>,
    ) -> Self {
        self.stages.push(Stage {
            kind: StageKind::Junction,
            input: TypeRef::of::<A>(),
            outputs: config.output_refs(),
            component: Box::new(config),
        });
        self
    }

    /// Run every validation check, aggregating all offences into one
    /// error. A covenant is closed when every produced type is consumed
    /// or sunk, every consumed type is produced or sourced, every source
    /// reaches a sink (and every sink is reached), and no type is
    /// double-booked.
    pub fn validate(self) -> Result<Covenant, CovenantError> {
        let mut offences = Vec::new();

        let source_ids: HashSet<TypeId> = self.sources.iter().map(|t| t.id).collect();
        let sink_ids: HashSet<TypeId> = self.sinks.iter().map(|t| t.id).collect();
        let consumed_ids: HashSet<TypeId> = self.stages.iter().map(|s| s.input.id).collect();

        // Produced types in declaration order, deduplicated: source
        // declarations count as produced.
        let mut produced = Vec::new();
        let mut produced_ids = HashSet::new();
        let declared_outputs = self
            .stages
            .iter()
            .flat_map(|stage| stage.outputs.iter().copied());
        for type_ref in self.sources.iter().copied().chain(declared_outputs) {
            if produced_ids.insert(type_ref.id) {
                produced.push(type_ref);
            }
        }

        // Check 1: no dead letters.
        for type_ref in &produced {
            if !consumed_ids.contains(&type_ref.id) && !sink_ids.contains(&type_ref.id) {
                offences.push(CovenantOffence::DeadLetter {
                    type_name: type_ref.name,
                });
            }
        }

        // Check 2: no orphan consumers.
        let mut reported = HashSet::new();
        for stage in &self.stages {
            if reported.insert(stage.input.id) && !produced_ids.contains(&stage.input.id) {
                offences.push(CovenantOffence::OrphanConsumer {
                    type_name: stage.input.name,
                });
            }
        }

        // Check 3: reachability, both directions.
        let mut adjacency: HashMap<TypeId, Vec<TypeId>> = HashMap::new();
        for stage in &self.stages {
            adjacency
                .entry(stage.input.id)
                .or_default()
                .extend(stage.outputs.iter().map(|output| output.id));
        }
        let mut reached_from_any = HashSet::new();
        for source in &self.sources {
            let reached = reachable_from(source.id, &adjacency);
            if !reached.iter().any(|id| sink_ids.contains(id)) {
                offences.push(CovenantOffence::SourceReachesNoSink {
                    type_name: source.name,
                });
            }
            reached_from_any.extend(reached);
        }
        for sink in &self.sinks {
            if !reached_from_any.contains(&sink.id) {
                offences.push(CovenantOffence::UnreachableSink {
                    type_name: sink.name,
                });
            }
        }

        // Check 4: no double-booking.
        let mut routed_sinks = HashSet::new();
        let mut transform_counts: HashMap<TypeId, usize> = HashMap::new();
        for stage in &self.stages {
            match stage.kind {
                StageKind::Transform | StageKind::Junction => {
                    if sink_ids.contains(&stage.input.id) && routed_sinks.insert(stage.input.id) {
                        offences.push(CovenantOffence::RoutedSink {
                            type_name: stage.input.name,
                        });
                    }
                }
                StageKind::Window => {}
            }
            if stage.kind == StageKind::Transform {
                let seen = transform_counts.entry(stage.input.id).or_insert(0);
                *seen += 1;
                if *seen == 2 {
                    offences.push(CovenantOffence::DuplicateTransform {
                        type_name: stage.input.name,
                    });
                }
            }
            if stage.kind == StageKind::Junction && stage.outputs.is_empty() {
                offences.push(CovenantOffence::EmptyJunction {
                    type_name: stage.input.name,
                });
            }
        }

        if offences.is_empty() {
            Ok(Covenant {
                name: self.name,
                stages: self.stages,
            })
        } else {
            Err(CovenantError {
                covenant: self.name,
                offences,
            })
        }
    }
}

fn reachable_from(start: TypeId, adjacency: &HashMap<TypeId, Vec<TypeId>>) -> HashSet<TypeId> {
    let mut reached = HashSet::from([start]);
    let mut frontier = vec![start];
    while let Some(node) = frontier.pop() {
        for next in adjacency.get(&node).into_iter().flatten() {
            if reached.insert(*next) {
                frontier.push(*next);
            }
        }
    }
    reached
}

/// A validated, closed covenant graph.
#[derive(Debug)]
pub struct Covenant {
    name: String,
    stages: Vec<Stage>,
}

impl Covenant {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared edges, in registration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
