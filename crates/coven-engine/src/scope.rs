use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use coven_journal::JournalError;
use coven_types::DaemonStatus;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::daemon::Daemon;
use crate::error::{DaemonError, RitualError, ScopeError};
use crate::router::Ritual;

/// Type-keyed map of scope-local services, frozen when the scope builds.
#[derive(Default)]
pub struct ServiceMap {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Send + Sync + 'static>(&mut self, service: Arc<S>) {
        self.services.insert(TypeId::of::<S>(), service);
    }

    pub fn get<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.services
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|service| service.downcast::<S>().ok())
    }
}

struct DaemonSpec {
    daemon: Arc<dyn Daemon>,
    await_ready: bool,
}

/// Mutable staging area for an execution scope.
#[derive(Default)]
pub struct ScopeBuilder {
    services: ServiceMap,
    daemons: Vec<DaemonSpec>,
}

impl ScopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service<S: Send + Sync + 'static>(mut self, service: Arc<S>) -> Self {
        self.services.insert(service);
        self
    }

    /// Replace the service map wholesale. Composites build theirs before
    /// any inner daemon is constructed.
    pub fn services(mut self, services: ServiceMap) -> Self {
        self.services = services;
        self
    }

    /// Register a daemon. Start order is registration order; shutdown is
    /// the reverse.
    pub fn daemon(mut self, daemon: Arc<dyn Daemon>) -> Self {
        self.daemons.push(DaemonSpec {
            daemon,
            await_ready: false,
        });
        self
    }

    /// Register a daemon and wait for it to reach Running before the next
    /// registered daemon starts (dependency order).
    pub fn daemon_awaiting_ready(mut self, daemon: Arc<dyn Daemon>) -> Self {
        self.daemons.push(DaemonSpec {
            daemon,
            await_ready: true,
        });
        self
    }

    pub fn build(self) -> Arc<ExecutionScope> {
        Arc::new(ExecutionScope {
            services: self.services,
            daemons: self.daemons,
            cancel: CancellationToken::new(),
            phase: AtomicU8::new(PHASE_IDLE),
        })
    }
}

const PHASE_IDLE: u8 = 0;
const PHASE_BEGUN: u8 = 1;
const PHASE_ENDED: u8 = 2;

tokio::task_local! {
    static CURRENT_SCOPE: Arc<ExecutionScope>;
}

/// The lifetime of a single ritual invocation.
///
/// Owns the scoped services and daemons: `begin` starts daemons in
/// registration order, `end` shuts them down in reverse on every exit
/// path and aggregates failures. The running scope is exposed through an
/// ambient task-local binding, set and cleared in the same synchronous
/// frame that brackets the ritual body.
pub struct ExecutionScope {
    services: ServiceMap,
    daemons: Vec<DaemonSpec>,
    cancel: CancellationToken,
    phase: AtomicU8,
}

impl ExecutionScope {
    pub fn services(&self) -> &ServiceMap {
        &self.services
    }

    pub fn daemons(&self) -> impl Iterator<Item = &Arc<dyn Daemon>> {
        self.daemons.iter().map(|spec| &spec.daemon)
    }

    /// Cancellation governing work scoped to this ritual invocation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The scope executing the current block body, if any.
    pub fn current() -> Option<Arc<ExecutionScope>> {
        CURRENT_SCOPE.try_with(|scope| scope.clone()).ok()
    }

    /// Start daemons in registration order, optionally waiting for each
    /// to reach Running before the next starts.
    pub async fn begin(&self, cancel: &CancellationToken) -> Result<(), ScopeError> {
        if self.phase.load(Ordering::Acquire) == PHASE_ENDED {
            return Err(ScopeError::Disposed);
        }
        self.phase.store(PHASE_BEGUN, Ordering::Release);
        for spec in &self.daemons {
            debug!(daemon = %spec.daemon.name(), "starting scoped daemon");
            spec.daemon
                .start(cancel)
                .await
                .map_err(|source| ScopeError::Start {
                    name: spec.daemon.name().to_string(),
                    source,
                })?;
            if spec.await_ready {
                spec.daemon
                    .contract()
                    .wait_for(DaemonStatus::Running, cancel)
                    .await
                    .map_err(|source| ScopeError::Start {
                        name: spec.daemon.name().to_string(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Shut daemons down in reverse registration order, propagating the
    /// original cancellation. Every shutdown runs even when earlier ones
    /// fail; cancellations are tolerated, other failures aggregate.
    pub async fn end(&self, cancel: &CancellationToken) -> Result<(), ScopeError> {
        if self.phase.swap(PHASE_ENDED, Ordering::AcqRel) == PHASE_ENDED {
            return Ok(());
        }
        self.cancel.cancel();
        let mut failures = Vec::new();
        for spec in self.daemons.iter().rev() {
            debug!(daemon = %spec.daemon.name(), "shutting down scoped daemon");
            match spec.daemon.shutdown(cancel).await {
                Ok(()) => {}
                Err(DaemonError::Journal(JournalError::Cancelled)) => {}
                Err(error) => {
                    warn!(daemon = %spec.daemon.name(), %error, "scoped daemon shutdown failed");
                    failures.push((spec.daemon.name().to_string(), error));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScopeError::Shutdown { failures })
        }
    }

    /// Bracket a full ritual invocation: begin the scope, route the input
    /// in a spawned task (so a panicking block body still reaches
    /// teardown), then end the scope on every exit path.
    pub async fn run<I, O>(self: Arc<Self>, ritual: Arc<Ritual>, input: I) -> Result<O, RitualError>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        if let Err(begin_error) = self.begin(&self.cancel).await {
            // Daemons started before the failure still get their shutdown.
            let _ = self.end(&self.cancel).await;
            return Err(begin_error.into());
        }

        let body = {
            let scope = self.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(CURRENT_SCOPE.scope(scope, async move {
                ritual.invoke::<I, O>(input, &cancel).await
            }))
        };
        let result = match body.await {
            Ok(result) => result,
            Err(join_error) => Err(RitualError::Panicked {
                detail: join_error.to_string(),
            }),
        };

        let teardown = self.end(&self.cancel).await;
        match (result, teardown) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(scope_error)) => Err(scope_error.into()),
            (Err(ritual_error), _) => Err(ritual_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::daemon::ContractDaemon;

    /// Records start/shutdown order into a shared log.
    struct TracedDaemon {
        contract: ContractDaemon,
        log: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    impl TracedDaemon {
        fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                contract: ContractDaemon::new(name),
                log,
                fail_shutdown: false,
            })
        }

        fn failing_shutdown(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                contract: ContractDaemon::new(name),
                log,
                fail_shutdown: true,
            })
        }
    }

    #[async_trait]
    impl Daemon for TracedDaemon {
        fn contract(&self) -> &ContractDaemon {
            &self.contract
        }

        async fn start(&self, _cancel: &CancellationToken) -> Result<(), DaemonError> {
            if self.contract.transition(DaemonStatus::Running).await? {
                self.log.lock().push(format!("start:{}", self.name()));
            }
            Ok(())
        }

        async fn shutdown(&self, _cancel: &CancellationToken) -> Result<(), DaemonError> {
            if self.contract.transition(DaemonStatus::Completed).await? {
                self.log.lock().push(format!("stop:{}", self.name()));
            }
            if self.fail_shutdown {
                return Err(DaemonError::Journal(JournalError::Disposed));
            }
            Ok(())
        }
    }

    #[test_log::test(tokio::test)]
    async fn daemons_start_in_order_and_stop_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = ScopeBuilder::new()
            .daemon_awaiting_ready(TracedDaemon::new("a", log.clone()))
            .daemon(TracedDaemon::new("b", log.clone()))
            .build();
        let cancel = CancellationToken::new();

        scope.begin(&cancel).await.unwrap();
        scope.end(&cancel).await.unwrap();

        similar_asserts::assert_eq!(
            log.lock().clone(),
            vec!["start:a", "start:b", "stop:b", "stop:a"]
        );
    }

    #[test_log::test(tokio::test)]
    async fn end_runs_every_shutdown_and_aggregates_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = ScopeBuilder::new()
            .daemon(TracedDaemon::new("a", log.clone()))
            .daemon(TracedDaemon::failing_shutdown("bad", log.clone()))
            .daemon(TracedDaemon::new("c", log.clone()))
            .build();
        let cancel = CancellationToken::new();

        scope.begin(&cancel).await.unwrap();
        let error = scope.end(&cancel).await.unwrap_err();

        match error {
            ScopeError::Shutdown { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "bad");
            }
            other => panic!("expected shutdown aggregate, got {other}"),
        }
        // The failing daemon did not prevent 'a' from shutting down.
        assert!(log.lock().iter().any(|line| line == "stop:a"));
    }

    #[test_log::test(tokio::test)]
    async fn ended_scope_is_disposed() {
        let scope = ScopeBuilder::new().build();
        let cancel = CancellationToken::new();

        scope.begin(&cancel).await.unwrap();
        scope.end(&cancel).await.unwrap();

        assert!(matches!(
            scope.begin(&cancel).await,
            Err(ScopeError::Disposed)
        ));
        // end stays idempotent after disposal
        scope.end(&cancel).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn services_resolve_by_type() {
        let scope = ScopeBuilder::new()
            .service(Arc::new(String::from("scoped")))
            .build();

        let service = scope.services().get::<String>().unwrap();
        assert_eq!(*service, "scoped");
        assert!(scope.services().get::<u32>().is_none());
    }

    #[test]
    fn current_is_none_outside_a_running_scope() {
        assert!(ExecutionScope::current().is_none());
    }

    mod rituals {
        use super::*;
        use crate::block::Block;
        use crate::error::BoxError;
        use crate::router::RitualBuilder;

        #[derive(Debug, PartialEq)]
        struct Ping;
        #[derive(Debug, PartialEq)]
        struct Pong(String);

        /// Reads a scope-local service through the ambient binding.
        struct ProbeBlock;

        #[async_trait]
        impl Block<Ping, Pong> for ProbeBlock {
            async fn invoke(
                &self,
                _input: Ping,
                _cancel: &CancellationToken,
            ) -> Result<Pong, BoxError> {
                let scope = ExecutionScope::current().ok_or("no ambient scope")?;
                let greeting = scope
                    .services()
                    .get::<String>()
                    .ok_or("missing scoped service")?;
                Ok(Pong(greeting.to_string()))
            }
        }

        struct PanickingBlock;

        #[async_trait]
        impl Block<Ping, Pong> for PanickingBlock {
            async fn invoke(
                &self,
                _input: Ping,
                _cancel: &CancellationToken,
            ) -> Result<Pong, BoxError> {
                panic!("block body exploded");
            }
        }

        #[test_log::test(tokio::test)]
        async fn run_brackets_daemons_around_the_routed_body() {
            let log = Arc::new(Mutex::new(Vec::new()));
            let scope = ScopeBuilder::new()
                .service(Arc::new(String::from("from the scope")))
                .daemon(TracedDaemon::new("d", log.clone()))
                .build();

            let mut builder = RitualBuilder::new();
            builder.block("probe", ProbeBlock);
            let ritual = Arc::new(builder.done::<Pong>());

            let pong = scope.run::<Ping, Pong>(ritual, Ping).await.unwrap();

            assert_eq!(pong, Pong("from the scope".into()));
            similar_asserts::assert_eq!(log.lock().clone(), vec!["start:d", "stop:d"]);
        }

        #[test_log::test(tokio::test)]
        async fn panicking_block_still_reaches_teardown() {
            let log = Arc::new(Mutex::new(Vec::new()));
            let scope = ScopeBuilder::new()
                .daemon(TracedDaemon::new("d", log.clone()))
                .build();

            let mut builder = RitualBuilder::new();
            builder.block("panicking", PanickingBlock);
            let ritual = Arc::new(builder.done::<Pong>());

            let error = scope.run::<Ping, Pong>(ritual, Ping).await.unwrap_err();

            assert!(matches!(error, RitualError::Panicked { .. }));
            similar_asserts::assert_eq!(log.lock().clone(), vec!["start:d", "stop:d"]);
        }
    }
}
