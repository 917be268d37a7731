//! Runtime orchestration: configuration in, a running robot out.
//!
//! The runtime owns what a deployment decides by configuration: which
//! adapter the robot runs on, which named middleware stages are installed,
//! how logging is set up. Application code registers the candidates; the
//! configuration picks among them.
//!
//! ```rust,ignore
//! use chime_runtime::ChimeRuntime;
//!
//! let runtime = ChimeRuntime::builder()
//!     .adapter("shell", |_config| Ok(Arc::new(ShellAdapter::new()) as BoxedAdapter))
//!     .response_stage("shout", |ctx: &mut ResponseContext| { ... })
//!     .build()?;
//!
//! let robot = runtime.robot()?;
//! robot.hear("ping", (), |res: Response| async move { res.send(["PONG"]).await })?;
//!
//! runtime.run().await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chime_core::{AdapterResult, BoxedAdapter};
use chime_framework::{
    ListenerContext, ReceiveContext, ResponseContext, Robot, Stage, StageCatalog,
};
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{ChimeConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Builds an adapter from the loaded configuration.
pub type AdapterFactory = Arc<dyn Fn(&ChimeConfig) -> AdapterResult<BoxedAdapter> + Send + Sync>;

/// Owns the configuration, the adapter factories and the stage catalogs,
/// and builds the robot from them once.
pub struct ChimeRuntime {
    config: ChimeConfig,
    adapters: HashMap<String, AdapterFactory>,
    receive_stages: StageCatalog<ReceiveContext>,
    listener_stages: StageCatalog<ListenerContext>,
    response_stages: StageCatalog<ResponseContext>,
    robot: Mutex<Option<Robot>>,
}

impl ChimeRuntime {
    /// Starts a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The validated configuration.
    pub fn config(&self) -> &ChimeConfig {
        &self.config
    }

    /// Names of the registered adapter factories, sorted.
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns the robot, building it on first call.
    ///
    /// The adapter is resolved by `robot.adapter`; configured middleware names
    /// are looked up in the registered catalogs and installed in order.
    pub fn robot(&self) -> RuntimeResult<Robot> {
        let mut slot = self.robot.lock();
        if let Some(robot) = slot.as_ref() {
            return Ok(robot.clone());
        }

        let robot = self.build_robot()?;
        *slot = Some(robot.clone());
        Ok(robot)
    }

    fn build_robot(&self) -> RuntimeResult<Robot> {
        let wanted = &self.config.robot.adapter;
        let factory = self
            .adapters
            .get(wanted)
            .ok_or_else(|| RuntimeError::AdapterNotFound {
                name: wanted.clone(),
                available: self.adapter_names(),
            })?;
        let adapter = factory(&self.config)?;
        debug!(adapter = adapter.name(), "Adapter loaded");

        let mut builder = Robot::builder(adapter)
            .name(self.config.robot.name.clone())
            .autosave(self.config.brain.autosave)
            .autosave_interval(self.config.brain.autosave_interval());
        if let Some(alias) = &self.config.robot.alias {
            builder = builder.alias(alias.clone());
        }
        let robot = builder.build();

        let middleware = &self.config.middleware;
        for name in &middleware.receive {
            robot
                .receive_chain()
                .register_named(&self.receive_stages, name)?;
        }
        for name in &middleware.listener {
            robot
                .listener_chain()
                .register_named(&self.listener_stages, name)?;
        }
        for name in &middleware.response {
            robot
                .response_chain()
                .register_named(&self.response_stages, name)?;
        }

        info!(
            robot = %robot.name(),
            adapter = %wanted,
            receive = middleware.receive.len(),
            listener = middleware.listener.len(),
            response = middleware.response.len(),
            "Robot constructed"
        );
        Ok(robot)
    }

    /// Runs the robot until its adapter stops or Ctrl+C/SIGTERM arrives,
    /// then shuts it down.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Chime runtime is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown trigger.
    ///
    /// An adapter failure is still followed by shutdown, then returned.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let robot = self.robot()?;

        let outcome = tokio::select! {
            result = robot.run() => {
                debug!("Adapter finished");
                result
            }
            () = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        let closed = robot.shutdown().await;
        outcome?;
        closed?;
        Ok(())
    }
}

impl std::fmt::Debug for ChimeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChimeRuntime")
            .field("config", &self.config)
            .field("adapters", &self.adapter_names())
            .field("receive_stages", &self.receive_stages)
            .field("listener_stages", &self.listener_stages)
            .field("response_stages", &self.response_stages)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C, running until the adapter stops");
            std::future::pending::<()>().await;
        }
    }
}

/// Builder for [`ChimeRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<ChimeConfig>,
    adapters: HashMap<String, AdapterFactory>,
    receive_stages: StageCatalog<ReceiveContext>,
    listener_stages: StageCatalog<ListenerContext>,
    response_stages: StageCatalog<ResponseContext>,
}

impl RuntimeBuilder {
    /// Creates a builder that searches the working and user config directories.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            adapters: HashMap::new(),
            receive_stages: StageCatalog::new(),
            listener_stages: StageCatalog::new(),
            response_stages: StageCatalog::new(),
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Selects the profile file layered under the main file.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a directory to search for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Ignores `CHIME_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a configuration over the loaded sources.
    pub fn merge(mut self, config: ChimeConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as-is; no files or environment are read.
    pub fn config(mut self, config: ChimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers an adapter factory under `name`.
    pub fn adapter<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ChimeConfig) -> AdapterResult<BoxedAdapter> + Send + Sync + 'static,
    {
        self.adapters.insert(name.into(), Arc::new(factory));
        self
    }

    /// Makes a receive stage installable as `middleware.receive = ["<name>"]`.
    pub fn receive_stage<S>(mut self, name: impl Into<String>, stage: S) -> Self
    where
        S: Stage<ReceiveContext> + 'static,
    {
        self.receive_stages.insert(name, stage);
        self
    }

    /// Makes a listener stage installable as `middleware.listener = ["<name>"]`.
    pub fn listener_stage<S>(mut self, name: impl Into<String>, stage: S) -> Self
    where
        S: Stage<ListenerContext> + 'static,
    {
        self.listener_stages.insert(name, stage);
        self
    }

    /// Makes a response stage installable as `middleware.response = ["<name>"]`.
    pub fn response_stage<S>(mut self, name: impl Into<String>, stage: S) -> Self
    where
        S: Stage<ResponseContext> + 'static,
    {
        self.response_stages.insert(name, stage);
        self
    }

    /// Loads and validates the configuration, then initializes logging.
    pub fn build(self) -> RuntimeResult<ChimeRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        validate_config(&config)?;

        logging::init_from_config(&config.logging);
        info!(
            robot = %config.robot.name,
            adapter = %config.robot.adapter,
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        Ok(ChimeRuntime {
            config,
            adapters: self.adapters,
            receive_stages: self.receive_stages,
            listener_stages: self.listener_stages,
            response_stages: self.response_stages,
            robot: Mutex::new(None),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chime_core::{Adapter, AdapterContext, AdapterError, Envelope, Message};
    use chime_framework::{Flow, RobotError};

    use super::*;

    /// Delivers one line, then stays up until shut down unless `finite`.
    #[derive(Default)]
    struct LoopbackAdapter {
        sent: parking_lot::Mutex<Vec<String>>,
        closed: AtomicBool,
        finite: bool,
    }

    #[async_trait]
    impl Adapter for LoopbackAdapter {
        fn name(&self) -> &str {
            "loopback"
        }

        async fn send(&self, _envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
            self.sent.lock().extend_from_slice(strings);
            Ok(())
        }

        async fn run(&self, ctx: AdapterContext) -> AdapterResult<()> {
            let user = ctx.sink().user_for_id("u1", Default::default());
            ctx.sink().receive(Message::text(user, "hal ping", "1")).await;
            if !self.finite {
                ctx.shutdown_token().cancelled().await;
            }
            Ok(())
        }

        async fn close(&self) -> AdapterResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(adapter: &str) -> ChimeConfig {
        let mut config = ChimeConfig::default();
        config.robot.name = "hal".to_string();
        config.robot.adapter = adapter.to_string();
        config.brain.autosave = false;
        config
    }

    fn runtime_with(config: ChimeConfig, adapter: Arc<LoopbackAdapter>) -> RuntimeBuilder {
        ChimeRuntime::builder()
            .config(config)
            .adapter("loopback", move |_| Ok(adapter.clone() as BoxedAdapter))
    }

    #[test]
    fn test_unknown_adapter() {
        let runtime = runtime_with(config("irc"), Arc::default()).build().unwrap();
        match runtime.robot() {
            Err(RuntimeError::AdapterNotFound { name, available }) => {
                assert_eq!(name, "irc");
                assert_eq!(available, vec!["loopback".to_string()]);
            }
            other => panic!("expected AdapterNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_adapter_factory_failure() {
        let runtime = ChimeRuntime::builder()
            .config(config("broken"))
            .adapter("broken", |_| Err(AdapterError::internal("no credentials")))
            .build()
            .unwrap();
        assert!(matches!(
            runtime.robot(),
            Err(RuntimeError::Robot(RobotError::Adapter(_)))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config("loopback");
        bad.robot.alias = Some("hal".to_string());
        let result = runtime_with(bad, Arc::default()).build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_robot_built_once_with_configured_middleware() {
        let mut config = config("loopback");
        config.robot.alias = Some("/".to_string());
        config.middleware.receive = vec!["trace".to_string()];
        config.middleware.response = vec!["shout".to_string(), "trace".to_string()];

        let runtime = runtime_with(config, Arc::default())
            .receive_stage("trace", |_: &mut ReceiveContext| Flow::Continue)
            .response_stage("shout", |_: &mut ResponseContext| Flow::Continue)
            .response_stage("trace", |_: &mut ResponseContext| Flow::Continue)
            .build()
            .unwrap();

        let robot = runtime.robot().unwrap();
        assert_eq!(robot.name(), "hal");
        assert_eq!(robot.alias(), Some("/"));
        assert_eq!(robot.receive_chain().len(), 1);
        assert!(robot.listener_chain().is_empty());
        assert_eq!(robot.response_chain().len(), 2);

        // Same robot on every call.
        robot.add_command("hal ping - pong");
        assert_eq!(runtime.robot().unwrap().help_commands().len(), 1);
    }

    #[test]
    fn test_unknown_stage_name() {
        let mut config = config("loopback");
        config.middleware.listener = vec!["audit".to_string()];

        let runtime = runtime_with(config, Arc::default()).build().unwrap();
        assert!(matches!(
            runtime.robot(),
            Err(RuntimeError::Robot(RobotError::InvalidStage { name })) if name == "audit"
        ));
    }

    #[tokio::test]
    async fn test_run_until_adapter_finishes() {
        let adapter = Arc::new(LoopbackAdapter {
            finite: true,
            ..Default::default()
        });
        let runtime = runtime_with(config("loopback"), adapter.clone())
            .build()
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        runtime
            .robot()
            .unwrap()
            .respond("ping", (), move |res: chime_framework::Response| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    res.send(["PONG"]).await
                }
            })
            .unwrap();

        runtime.run_until(std::future::pending()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*adapter.sent.lock(), vec!["PONG".to_string()]);
        assert!(adapter.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_until_shutdown_trigger() {
        let adapter = Arc::new(LoopbackAdapter::default());
        let runtime = runtime_with(config("loopback"), adapter.clone())
            .build()
            .unwrap();

        runtime
            .run_until(tokio::time::sleep(std::time::Duration::from_millis(20)))
            .await
            .unwrap();

        assert!(adapter.closed.load(Ordering::SeqCst));
        assert!(runtime.robot().unwrap().shutdown_token().is_cancelled());
    }
}
