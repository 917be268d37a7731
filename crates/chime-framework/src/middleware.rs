//! Ordered middleware chains.
//!
//! A [`Middleware`] is an ordered list of [`Stage`]s sharing one mutable
//! context. Each stage returns a [`Flow`]:
//!
//! | Flow | Effect |
//! |------|--------|
//! | `Continue` | run the next stage |
//! | `Finished` | stop here; not an error |
//! | `Faulted(fault)` | emit an `Error` event, then stop |
//!
//! A panicking stage is treated like `Faulted`. Either way the fault stays
//! inside the chain: [`execute`](Middleware::execute) always hands the
//! context back, and callers tell the outcomes apart only through what the
//! stages wrote into it.
//!
//! # Example
//!
//! ```rust,ignore
//! robot.response_middleware(|ctx: &mut ResponseContext| {
//!     if ctx.plaintext {
//!         ctx.strings.iter_mut().for_each(|s| *s = s.to_uppercase());
//!     }
//!     Flow::Continue
//! });
//! ```
//!
//! # Tower Integration
//!
//! `Middleware<C>` implements `tower::Service<C>`, so a chain can be driven
//! with `ServiceExt::oneshot` or wrapped in tower layers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tower::Service;
use tracing::{debug, trace};

use crate::context::ChainContext;
use crate::error::{ChainFault, RobotError, RobotResult};
use crate::event::{EventBus, RobotEvent};

/// What a stage tells the chain executor.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Run the next stage.
    Continue,
    /// Stop the chain without error.
    Finished,
    /// Stop the chain and report the fault.
    Faulted(ChainFault),
}

impl Flow {
    /// Builds a `Faulted` flow from any displayable error.
    pub fn fault(err: impl fmt::Display) -> Self {
        Self::Faulted(ChainFault::stage(err.to_string()))
    }
}

/// One step of a middleware chain.
///
/// Synchronous closures `Fn(&mut C) -> Flow` implement `Stage` directly.
/// Stages that need to await implement the trait on their own type.
#[async_trait]
pub trait Stage<C>: Send + Sync {
    /// Runs the stage against the shared context.
    async fn run(&self, ctx: &mut C) -> Flow;
}

#[async_trait]
impl<C, F> Stage<C> for F
where
    C: Send + 'static,
    F: Fn(&mut C) -> Flow + Send + Sync,
{
    async fn run(&self, ctx: &mut C) -> Flow {
        self(ctx)
    }
}

/// A shared stage trait object.
pub type BoxedStage<C> = Arc<dyn Stage<C>>;

// =============================================================================
// Middleware
// =============================================================================

struct MiddlewareInner<C> {
    name: &'static str,
    stages: RwLock<Vec<BoxedStage<C>>>,
    events: Arc<EventBus>,
}

/// An ordered chain of stages over context type `C`.
///
/// Cloning is cheap and shares the stage list.
pub struct Middleware<C> {
    inner: Arc<MiddlewareInner<C>>,
}

impl<C> Clone for Middleware<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ChainContext + 'static> Middleware<C> {
    /// Creates an empty chain that reports faults on `events`.
    pub fn new(name: &'static str, events: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(MiddlewareInner {
                name,
                stages: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    /// Returns the chain name (e.g. `"receive"`).
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Appends a stage.
    pub fn register<S>(&self, stage: S)
    where
        S: Stage<C> + 'static,
    {
        self.register_boxed(Arc::new(stage));
    }

    /// Appends an already shared stage.
    pub fn register_boxed(&self, stage: BoxedStage<C>) {
        self.inner.stages.write().push(stage);
    }

    /// Resolves `name` through `catalog` and appends the stage.
    pub fn register_named(&self, catalog: &StageCatalog<C>, name: &str) -> RobotResult<()> {
        let stage = catalog.resolve(name)?;
        self.register_boxed(stage);
        Ok(())
    }

    /// Returns the number of registered stages.
    pub fn len(&self) -> usize {
        self.inner.stages.read().len()
    }

    /// Returns `true` if no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.stages.read().is_empty()
    }

    /// Runs every stage in registration order and returns the context.
    ///
    /// The stage list is snapshotted first, so stages registered while the
    /// chain runs only take effect on the next execution.
    pub async fn execute(&self, mut ctx: C) -> C {
        let stages = self.inner.stages.read().clone();

        for (index, stage) in stages.iter().enumerate() {
            let flow = AssertUnwindSafe(stage.run(&mut ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Flow::Faulted(ChainFault::from_panic("middleware stage", payload))
                });

            match flow {
                Flow::Continue => {}
                Flow::Finished => {
                    trace!(chain = self.inner.name, index, "Middleware chain finished early");
                    break;
                }
                Flow::Faulted(fault) => {
                    debug!(
                        chain = self.inner.name,
                        index,
                        error = %fault,
                        "Middleware stage faulted"
                    );
                    self.inner.events.emit(&RobotEvent::Error {
                        fault,
                        response: ctx.response().cloned(),
                    });
                    break;
                }
            }
        }

        ctx
    }
}

impl<C> fmt::Debug for Middleware<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.inner.name)
            .field("stages", &self.inner.stages.read().len())
            .finish()
    }
}

impl<C: ChainContext + 'static> Service<C> for Middleware<C> {
    type Response = C;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<C, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: C) -> Self::Future {
        let chain = self.clone();
        Box::pin(async move { Ok(chain.execute(ctx).await) })
    }
}

// =============================================================================
// StageCatalog
// =============================================================================

/// Stages registered under names, for chains assembled from configuration.
pub struct StageCatalog<C> {
    stages: HashMap<String, BoxedStage<C>>,
}

impl<C> Default for StageCatalog<C> {
    fn default() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }
}

impl<C: Send + 'static> StageCatalog<C> {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `stage` under `name`, replacing any previous entry.
    pub fn insert<S>(&mut self, name: impl Into<String>, stage: S)
    where
        S: Stage<C> + 'static,
    {
        self.stages.insert(name.into(), Arc::new(stage));
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up the stage registered under `name`.
    pub fn resolve(&self, name: &str) -> RobotResult<BoxedStage<C>> {
        self.stages
            .get(name)
            .cloned()
            .ok_or_else(|| RobotError::InvalidStage {
                name: name.to_string(),
            })
    }
}

impl<C> fmt::Debug for StageCatalog<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageCatalog")
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct TestCtx {
        log: Vec<&'static str>,
        reached_end: bool,
    }

    impl ChainContext for TestCtx {
        fn response(&self) -> Option<&Response> {
            None
        }
    }

    fn error_counter(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |event| {
            if matches!(event, RobotEvent::Error { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    fn step(tag: &'static str) -> impl Fn(&mut TestCtx) -> Flow + Send + Sync {
        move |ctx: &mut TestCtx| {
            ctx.log.push(tag);
            Flow::Continue
        }
    }

    fn end(ctx: &mut TestCtx) -> Flow {
        ctx.reached_end = true;
        Flow::Continue
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let chain = Middleware::new("test", Arc::new(EventBus::new()));
        chain.register(step("a"));
        chain.register(step("b"));
        chain.register(step("c"));
        chain.register(end);

        let ctx = chain.execute(TestCtx::default()).await;
        assert_eq!(ctx.log, vec!["a", "b", "c"]);
        assert!(ctx.reached_end);
    }

    #[tokio::test]
    async fn test_finish_truncates_without_error() {
        let bus = Arc::new(EventBus::new());
        let errors = error_counter(&bus);
        let chain = Middleware::new("test", bus);
        chain.register(step("a"));
        chain.register(|_: &mut TestCtx| Flow::Finished);
        chain.register(step("b"));
        chain.register(end);

        let ctx = chain.execute(TestCtx::default()).await;
        assert_eq!(ctx.log, vec!["a"]);
        assert!(!ctx.reached_end);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fault_emits_one_error_and_truncates() {
        let bus = Arc::new(EventBus::new());
        let errors = error_counter(&bus);
        let chain = Middleware::new("test", bus);
        chain.register(step("a"));
        chain.register(|_: &mut TestCtx| Flow::fault("bad input"));
        chain.register(end);

        let ctx = chain.execute(TestCtx::default()).await;
        assert_eq!(ctx.log, vec!["a"]);
        assert!(!ctx.reached_end);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_stage_is_contained() {
        let bus = Arc::new(EventBus::new());
        let errors = error_counter(&bus);
        let chain = Middleware::new("test", bus);
        chain.register(|_: &mut TestCtx| -> Flow { panic!("stage bug") });
        chain.register(end);

        let ctx = chain.execute(TestCtx::default()).await;
        assert!(!ctx.reached_end);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    struct Nested {
        inner: Middleware<TestCtx>,
    }

    #[async_trait]
    impl Stage<TestCtx> for Nested {
        async fn run(&self, ctx: &mut TestCtx) -> Flow {
            tokio::task::yield_now().await;
            let inner = self.inner.execute(TestCtx::default()).await;
            ctx.log.extend(inner.log);
            Flow::Continue
        }
    }

    #[tokio::test]
    async fn test_nested_chains_use_independent_contexts() {
        let bus = Arc::new(EventBus::new());
        let inner = Middleware::new("inner", bus.clone());
        inner.register(step("inner"));
        inner.register(end);

        let outer = Middleware::new("outer", bus);
        outer.register(step("outer"));
        outer.register(Nested { inner });

        let ctx = outer.execute(TestCtx::default()).await;
        assert_eq!(ctx.log, vec!["outer", "inner"]);
        assert!(!ctx.reached_end);
    }

    #[test]
    fn test_chain_as_tower_service() {
        let chain = Middleware::new("test", Arc::new(EventBus::new()));
        chain.register(step("svc"));

        let ctx = tokio_test::block_on(chain.oneshot(TestCtx::default())).unwrap();
        assert_eq!(ctx.log, vec!["svc"]);
    }

    #[tokio::test]
    async fn test_catalog_resolution() {
        let mut catalog = StageCatalog::<TestCtx>::new();
        catalog.insert("audit", step("audit"));
        assert_eq!(catalog.names(), vec!["audit"]);

        let chain = Middleware::new("test", Arc::new(EventBus::new()));
        chain.register_named(&catalog, "audit").unwrap();
        let err = chain.register_named(&catalog, "missing").unwrap_err();
        assert!(matches!(err, RobotError::InvalidStage { ref name } if name == "missing"));
        assert_eq!(chain.len(), 1);

        let ctx = chain.execute(TestCtx::default()).await;
        assert_eq!(ctx.log, vec!["audit"]);
    }
}
