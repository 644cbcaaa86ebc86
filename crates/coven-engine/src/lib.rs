//! The Coven runtime: daemons with journaled lifecycles, execution
//! scopes, typed block pipelines with tag routing, streaming windowing,
//! composite outer/inner bridges and covenant validation — all
//! coordinating through the append-only journals of `coven-journal`.

pub mod block;
pub mod composite;
pub mod covenant;
pub mod daemon;
pub mod error;
pub mod router;
pub mod scope;
pub mod tags;
pub mod transmute;
pub mod window;

#[cfg(test)]
mod fixtures;

pub use block::Block;
pub use composite::{AssembleFn, CompositeDaemon, Manifest, Projection, VariantProjection};
pub use covenant::{Covenant, CovenantBuilder, JunctionConfig, Stage, StageKind, WindowStage};
pub use daemon::{ContractDaemon, Daemon};
pub use error::{
    BoxError, CovenantError, CovenantOffence, DaemonError, RitualError, ScopeError,
};
pub use router::{Ritual, RitualBuilder};
pub use scope::{ExecutionScope, ScopeBuilder, ServiceMap};
pub use transmute::{Batch, BatchTransmuter, BidirectionalTransmuter, FnTransmuter, Transmuter};
pub use window::{ShatterPolicy, WindowDaemon, WindowPolicy, WindowView};
