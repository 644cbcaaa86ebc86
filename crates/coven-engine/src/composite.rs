use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use coven_journal::{JournalError, MemoryScrivener, Scrivener};
use coven_types::{DaemonStatus, Entry, FromEntry};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::daemon::{ContractDaemon, Daemon};
use crate::error::{BoxError, DaemonError};
use crate::scope::{ExecutionScope, ScopeBuilder, ServiceMap};
use crate::transmute::Transmuter;

/// Projects a consumed entry of one journal into an entry of another.
///
/// `None` means this projection does not consume the variant; manifests
/// try their projections in declaration order and take the first match.
#[async_trait]
pub trait Projection<A: Entry, B: Entry>: Send + Sync {
    async fn project(
        &self,
        entry: &A,
        cancel: &CancellationToken,
    ) -> Result<Option<B>, BoxError>;
}

/// Projection selecting variant `V` of the consumed sum and mapping it
/// through a transmuter.
pub struct VariantProjection<V, M> {
    transmuter: M,
    _variant: PhantomData<fn() -> V>,
}

impl<V, M> VariantProjection<V, M> {
    pub fn new(transmuter: M) -> Self {
        Self {
            transmuter,
            _variant: PhantomData,
        }
    }
}

#[async_trait]
impl<A, B, V, M> Projection<A, B> for VariantProjection<V, M>
where
    A: Entry,
    B: Entry,
    V: FromEntry<A> + Sync,
    M: Transmuter<V, B>,
{
    async fn project(
        &self,
        entry: &A,
        cancel: &CancellationToken,
    ) -> Result<Option<B>, BoxError> {
        match V::from_entry(entry) {
            Some(variant) => Ok(Some(self.transmuter.transmute(variant, cancel).await?)),
            None => Ok(None),
        }
    }
}

/// Declares what a composite consumes and how entries project between
/// the outer and inner journals.
pub struct Manifest<O: Entry, I: Entry> {
    inward: Vec<Box<dyn Projection<O, I>>>,
    outward: Vec<Box<dyn Projection<I, O>>>,
}

impl<O: Entry, I: Entry> Manifest<O, I> {
    pub fn new() -> Self {
        Self {
            inward: Vec::new(),
            outward: Vec::new(),
        }
    }

    /// Consume outer draft variant `V`, projecting it onto the inner
    /// journal.
    pub fn inward<V>(mut self, transmuter: impl Transmuter<V, I> + 'static) -> Self
    where
        V: FromEntry<O> + Sync,
    {
        self.inward
            .push(Box::new(VariantProjection::<V, _>::new(transmuter)));
        self
    }

    /// Project inner fixed variant `V` back onto the outer journal.
    pub fn outward<V>(mut self, transmuter: impl Transmuter<V, O> + 'static) -> Self
    where
        V: FromEntry<I> + Sync,
    {
        self.outward
            .push(Box::new(VariantProjection::<V, _>::new(transmuter)));
        self
    }

    async fn project_inward(
        &self,
        entry: &O,
        cancel: &CancellationToken,
    ) -> Result<Option<I>, BoxError> {
        for projection in &self.inward {
            if let Some(inner) = projection.project(entry, cancel).await? {
                return Ok(Some(inner));
            }
        }
        Ok(None)
    }

    async fn project_outward(
        &self,
        entry: &I,
        cancel: &CancellationToken,
    ) -> Result<Option<O>, BoxError> {
        for projection in &self.outward {
            if let Some(outer) = projection.project(entry, cancel).await? {
                return Ok(Some(outer));
            }
        }
        Ok(None)
    }
}

impl<O: Entry, I: Entry> Default for Manifest<O, I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the inner daemons once the inner scope's services exist. The
/// inner journal is already registered in the map it receives.
pub type AssembleFn = Box<dyn Fn(&ServiceMap) -> Vec<Arc<dyn Daemon>> + Send + Sync>;

struct CompositeRuntime {
    scope: Arc<ExecutionScope>,
    pump_cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

/// Bridges an outer journal to a scoped inner journal of daemons.
///
/// On start the inner scope is created before any inner daemon is
/// constructed: daemons resolve the scope-local inner journal from the
/// service map. Two pumps then run until shutdown — outer drafts
/// matching the manifest's declared variants project inward, inner fixed
/// entries project outward. Pump-boundary errors are recorded through
/// `fail` and stop that pump.
pub struct CompositeDaemon<O: Entry, I: Entry> {
    contract: Arc<ContractDaemon>,
    outer: Arc<dyn Scrivener<O>>,
    manifest: Arc<Manifest<O, I>>,
    assemble: AssembleFn,
    runtime: Mutex<Option<CompositeRuntime>>,
}

impl<O: Entry, I: Entry> CompositeDaemon<O, I> {
    pub fn new(
        name: impl Into<String>,
        outer: Arc<dyn Scrivener<O>>,
        manifest: Manifest<O, I>,
        assemble: impl Fn(&ServiceMap) -> Vec<Arc<dyn Daemon>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            contract: Arc::new(ContractDaemon::new(name)),
            outer,
            manifest: Arc::new(manifest),
            assemble: Box::new(assemble),
            runtime: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<O: Entry, I: Entry> Daemon for CompositeDaemon<O, I> {
    fn contract(&self) -> &ContractDaemon {
        &self.contract
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        let current = self.contract.status();
        if current == DaemonStatus::Running {
            return Ok(());
        }
        if let Err(source) = current.check_transition(DaemonStatus::Running) {
            return Err(DaemonError::InvalidTransition {
                name: self.contract.name().to_string(),
                source,
            });
        }

        // The inner scope's services exist before any inner daemon is
        // constructed, so daemons see the scope-local journal.
        let inner: Arc<MemoryScrivener<I>> = Arc::new(MemoryScrivener::new());
        let mut services = ServiceMap::new();
        services.insert(inner.clone());
        let daemons = (self.assemble)(&services);

        let mut builder = ScopeBuilder::new().services(services);
        for daemon in daemons {
            builder = builder.daemon(daemon);
        }
        let scope = builder.build();
        scope
            .begin(cancel)
            .await
            .map_err(|source| DaemonError::Scope {
                source: Box::new(source),
            })?;

        let pump_cancel = cancel.child_token();
        let pumps = vec![
            tokio::spawn(inward_pump(
                self.contract.clone(),
                self.outer.clone(),
                inner.clone(),
                self.manifest.clone(),
                pump_cancel.clone(),
            )),
            tokio::spawn(outward_pump(
                self.contract.clone(),
                self.outer.clone(),
                inner,
                self.manifest.clone(),
                pump_cancel.clone(),
            )),
        ];
        *self.runtime.lock() = Some(CompositeRuntime {
            scope,
            pump_cancel,
            pumps,
        });

        self.contract.transition(DaemonStatus::Running).await?;
        Ok(())
    }

    async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        let runtime = self.runtime.lock().take();
        let Some(runtime) = runtime else {
            self.contract.transition(DaemonStatus::Completed).await?;
            return Ok(());
        };

        runtime.pump_cancel.cancel();
        for pump in runtime.pumps {
            let _ = pump.await;
        }
        let teardown = runtime.scope.end(cancel).await;
        self.contract.transition(DaemonStatus::Completed).await?;
        teardown.map_err(|source| DaemonError::Scope {
            source: Box::new(source),
        })
    }
}

/// Outer drafts matching declared variants project onto the inner journal.
async fn inward_pump<O: Entry, I: Entry>(
    contract: Arc<ContractDaemon>,
    outer: Arc<dyn Scrivener<O>>,
    inner: Arc<MemoryScrivener<I>>,
    manifest: Arc<Manifest<O, I>>,
    cancel: CancellationToken,
) {
    let pump = async {
        let mut cursor = 0;
        loop {
            let record = match outer.next_after(cursor, &cancel).await {
                Ok(record) => record,
                Err(JournalError::Cancelled) => return Ok(()),
                Err(error) => return Err(BoxError::from(error)),
            };
            cursor = record.position;
            if !record.entry.is_draft() {
                continue;
            }
            if let Some(projected) = manifest.project_inward(&record.entry, &cancel).await? {
                inner.append(projected).await?;
            }
        }
    };
    record_pump_exit(&contract, "inward", pump.await).await;
}

/// Inner fixed entries project back onto the outer journal.
async fn outward_pump<O: Entry, I: Entry>(
    contract: Arc<ContractDaemon>,
    outer: Arc<dyn Scrivener<O>>,
    inner: Arc<MemoryScrivener<I>>,
    manifest: Arc<Manifest<O, I>>,
    cancel: CancellationToken,
) {
    let pump = async {
        let mut cursor = 0;
        loop {
            let record = match inner.next_after(cursor, &cancel).await {
                Ok(record) => record,
                Err(JournalError::Cancelled) => return Ok(()),
                Err(error) => return Err(BoxError::from(error)),
            };
            cursor = record.position;
            if record.entry.is_draft() {
                continue;
            }
            if let Some(projected) = manifest.project_outward(&record.entry, &cancel).await? {
                outer.append(projected).await?;
            }
        }
    };
    record_pump_exit(&contract, "outward", pump.await).await;
}

async fn record_pump_exit(contract: &ContractDaemon, pump: &str, exit: Result<(), BoxError>) {
    if let Err(error) = exit {
        let summary = format!("{pump} pump failed: {error}");
        if let Err(record_error) = contract.fail(summary).await {
            warn!(daemon = %contract.name(), error = %record_error, "failed to record pump failure");
        }
    }
}
