//! The robot: listener registry and message dispatcher.
//!
//! # Receive Pipeline
//!
//! ```text
//! adapter ──▶ receive(message)
//!               │
//!               ├─▶ receive middleware   { response }
//!               ├─▶ for each listener, in registration order:
//!               │      listener.call(message, listener middleware)
//!               │      stop after a match that left the message done
//!               │
//!               └─▶ nothing matched?
//!                      ├─ not a catch-all → receive(CatchAll(message))
//!                      └─ already a catch-all → stop
//! ```
//!
//! A listener that panics (matcher included) is reported on the `Error`
//! event and the pass moves on to the next listener.
//!
//! # Example
//!
//! ```rust,ignore
//! let robot = Robot::builder(Arc::new(ShellAdapter::new()))
//!     .name("chime")
//!     .alias("/")
//!     .build();
//!
//! robot.respond(r"ping$", (), |res: Response| async move {
//!     res.reply(["PONG"]).await
//! })?;
//!
//! robot.run().await?;
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chime_core::{
    AdapterContext, AdapterResult, BoxedAdapter, DataStore, Envelope, Message, MessageSink,
    StoreHandle, User,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info};

use crate::brain::{Brain, DEFAULT_SAVE_INTERVAL};
use crate::context::{ListenerContext, ReceiveContext, ResponseContext};
use crate::error::{ChainFault, RobotResult};
use crate::event::{EventBus, RobotEvent};
use crate::listener::{Callback, Listener, ListenerOptions, MatchResult};
use crate::middleware::{Middleware, Stage};
use crate::pattern::response_pattern;
use crate::response::Response;

/// Default robot name.
pub const DEFAULT_NAME: &str = "chime";

/// A handler for faults reported on the `Error` event.
pub type ErrorHandler = Arc<dyn Fn(&ChainFault, Option<&Response>) + Send + Sync>;

// =============================================================================
// RobotBuilder
// =============================================================================

/// Builder for [`Robot`].
pub struct RobotBuilder {
    adapter: BoxedAdapter,
    name: String,
    alias: Option<String>,
    autosave: bool,
    autosave_interval: Duration,
}

impl RobotBuilder {
    /// Sets the robot's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets an alias `respond` listeners also answer to.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into()).filter(|a| !a.is_empty());
        self
    }

    /// Enables or disables brain autosave.
    pub fn autosave(mut self, enabled: bool) -> Self {
        self.autosave = enabled;
        self
    }

    /// Sets the brain autosave period.
    pub fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Builds the robot.
    pub fn build(self) -> Robot {
        let events = Arc::new(EventBus::new());
        let datastore = StoreHandle::new();

        let brain = Brain::new(Arc::clone(&events), datastore.clone());
        brain.set_auto_save(self.autosave);
        brain.set_save_interval(self.autosave_interval);

        let error_handlers: Arc<RwLock<Vec<ErrorHandler>>> = Arc::default();
        let handlers = Arc::clone(&error_handlers);
        events.subscribe(move |event| {
            if let RobotEvent::Error { fault, response } = event {
                invoke_error_handlers(&handlers, fault, response.as_ref());
            }
        });

        Robot {
            inner: Arc::new(RobotInner {
                receive_chain: Middleware::new("receive", Arc::clone(&events)),
                listener_chain: Middleware::new("listener", Arc::clone(&events)),
                response_chain: Middleware::new("response", Arc::clone(&events)),
                name: self.name,
                alias: self.alias,
                adapter: self.adapter,
                events,
                brain,
                datastore,
                listeners: RwLock::new(Vec::new()),
                error_handlers,
                commands: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

fn invoke_error_handlers(
    handlers: &RwLock<Vec<ErrorHandler>>,
    fault: &ChainFault,
    response: Option<&Response>,
) {
    error!(
        error = %fault,
        message = ?response.map(|r| r.message().to_string()),
        "Dispatch error"
    );

    let handlers = handlers.read().clone();
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(fault, response))).is_err() {
            error!("Error handler panicked");
        }
    }
}

// =============================================================================
// Robot
// =============================================================================

struct RobotInner {
    name: String,
    alias: Option<String>,
    adapter: BoxedAdapter,
    events: Arc<EventBus>,
    brain: Brain,
    datastore: StoreHandle,
    listeners: RwLock<Vec<Arc<Listener>>>,
    receive_chain: Middleware<ReceiveContext>,
    listener_chain: Middleware<ListenerContext>,
    response_chain: Middleware<ResponseContext>,
    error_handlers: Arc<RwLock<Vec<ErrorHandler>>>,
    commands: RwLock<Vec<String>>,
    shutdown: CancellationToken,
}

/// The dispatcher. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Robot {
    inner: Arc<RobotInner>,
}

impl Robot {
    /// Starts building a robot on top of `adapter`.
    pub fn builder(adapter: BoxedAdapter) -> RobotBuilder {
        RobotBuilder {
            adapter,
            name: DEFAULT_NAME.to_string(),
            alias: None,
            autosave: true,
            autosave_interval: DEFAULT_SAVE_INTERVAL,
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Returns the robot's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the robot's alias.
    pub fn alias(&self) -> Option<&str> {
        self.inner.alias.as_deref()
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &BoxedAdapter {
        &self.inner.adapter
    }

    /// Returns the brain.
    pub fn brain(&self) -> &Brain {
        &self.inner.brain
    }

    /// Returns the event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Returns the datastore slot users persist through.
    pub fn datastore(&self) -> &StoreHandle {
        &self.inner.datastore
    }

    /// Attaches the datastore.
    pub fn set_datastore(&self, store: Arc<dyn DataStore>) {
        self.inner.datastore.attach(store);
    }

    /// Returns the token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    // ─── Events ───────────────────────────────────────────────────────────────

    /// Subscribes to every event on the robot's bus.
    pub fn on<F>(&self, subscriber: F)
    where
        F: Fn(&RobotEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(subscriber);
    }

    /// Publishes an event on the robot's bus.
    pub fn emit(&self, event: &RobotEvent) {
        self.inner.events.emit(event);
    }

    /// Registers a handler for dispatch faults.
    ///
    /// Handlers run in registration order after the fault is logged. A
    /// panicking handler does not keep the next ones from running.
    pub fn error<F>(&self, handler: F)
    where
        F: Fn(&ChainFault, Option<&Response>) + Send + Sync + 'static,
    {
        self.inner.error_handlers.write().push(Arc::new(handler));
    }

    // ─── Listeners ────────────────────────────────────────────────────────────

    /// Registers a listener with a custom matcher.
    pub fn listen<M, C>(&self, matcher: M, options: impl Into<ListenerOptions>, callback: C)
    where
        M: Fn(&Message) -> Option<MatchResult> + Send + Sync + 'static,
        C: Callback,
    {
        self.add_listener(Listener::new(matcher, callback, options.into()));
    }

    /// Registers a listener for text messages starting with a match of `pattern`.
    pub fn hear<C: Callback>(
        &self,
        pattern: &str,
        options: impl Into<ListenerOptions>,
        callback: C,
    ) -> RobotResult<()> {
        let regex = Regex::new(pattern)?;
        self.add_listener(Listener::text(regex, callback, options.into()));
        Ok(())
    }

    /// Registers a listener for text messages addressed to the robot.
    pub fn respond<C: Callback>(
        &self,
        pattern: &str,
        options: impl Into<ListenerOptions>,
        callback: C,
    ) -> RobotResult<()> {
        let regex = self.response_pattern(pattern)?;
        self.add_listener(Listener::text(regex, callback, options.into()));
        Ok(())
    }

    /// Registers a listener for users entering a room.
    pub fn enter<C: Callback>(&self, options: impl Into<ListenerOptions>, callback: C) {
        self.listen(
            |m: &Message| m.is_enter().then(MatchResult::hit),
            options,
            callback,
        );
    }

    /// Registers a listener for users leaving a room.
    pub fn leave<C: Callback>(&self, options: impl Into<ListenerOptions>, callback: C) {
        self.listen(
            |m: &Message| m.is_leave().then(MatchResult::hit),
            options,
            callback,
        );
    }

    /// Registers a listener for topic changes.
    pub fn topic<C: Callback>(&self, options: impl Into<ListenerOptions>, callback: C) {
        self.listen(
            |m: &Message| m.is_topic().then(MatchResult::hit),
            options,
            callback,
        );
    }

    /// Registers a listener for messages no other listener matched.
    ///
    /// The callback's response carries the original message, not the
    /// catch-all wrapper.
    pub fn catch_all<C: Callback>(&self, options: impl Into<ListenerOptions>, callback: C) {
        self.listen(
            |m: &Message| m.is_catch_all().then(MatchResult::hit),
            options,
            Unwrapped(callback),
        );
    }

    /// Returns the registered listeners.
    pub fn listeners(&self) -> Vec<Arc<Listener>> {
        self.inner.listeners.read().clone()
    }

    /// Builds a pattern that requires the robot's name or alias as a prefix.
    pub fn response_pattern(&self, pattern: &str) -> RobotResult<Regex> {
        Ok(response_pattern(self.name(), self.alias(), pattern)?)
    }

    fn add_listener(&self, listener: Listener) {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    // ─── Middleware ───────────────────────────────────────────────────────────

    /// Appends a stage to the receive chain.
    pub fn receive_middleware<S: Stage<ReceiveContext> + 'static>(&self, stage: S) {
        self.inner.receive_chain.register(stage);
    }

    /// Appends a stage to the listener chain.
    pub fn listener_middleware<S: Stage<ListenerContext> + 'static>(&self, stage: S) {
        self.inner.listener_chain.register(stage);
    }

    /// Appends a stage to the response chain.
    pub fn response_middleware<S: Stage<ResponseContext> + 'static>(&self, stage: S) {
        self.inner.response_chain.register(stage);
    }

    /// Returns the receive chain.
    pub fn receive_chain(&self) -> Middleware<ReceiveContext> {
        self.inner.receive_chain.clone()
    }

    /// Returns the listener chain.
    pub fn listener_chain(&self) -> Middleware<ListenerContext> {
        self.inner.listener_chain.clone()
    }

    /// Returns the response chain.
    pub fn response_chain(&self) -> Middleware<ResponseContext> {
        self.inner.response_chain.clone()
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────────

    /// Dispatches an inbound message.
    ///
    /// Returns `true` if a listener matched. When nothing matched, the
    /// message is dispatched once more wrapped in a catch-all.
    pub async fn receive(&self, message: Message) -> bool {
        let mut message = Arc::new(message);

        loop {
            let span = debug_span!(
                "receive",
                kind = message.kind_name(),
                room = message.room().unwrap_or_default()
            );
            let (matched, seen) = self.dispatch(message).instrument(span).await;
            if matched {
                return true;
            }
            if seen.is_catch_all() {
                debug!("No listener handled the catch-all message");
                return false;
            }

            debug!("No listeners executed, falling back to catch-all");
            message = Arc::new(Message::catch_all(seen));
        }
    }

    async fn dispatch(&self, message: Arc<Message>) -> (bool, Arc<Message>) {
        let response = Response::new(self.clone(), message, None);
        let ctx = self
            .inner
            .receive_chain
            .execute(ReceiveContext::new(response))
            .await;
        let message = Arc::clone(ctx.response.message());

        let mut matched = false;
        for listener in self.listeners() {
            let outcome = AssertUnwindSafe(listener.call(
                self,
                &message,
                &self.inner.listener_chain,
            ))
            .catch_unwind()
            .await;

            match outcome {
                Ok(true) => {
                    matched = true;
                    if message.is_done() {
                        break;
                    }
                }
                Ok(false) => {}
                Err(payload) => {
                    let fault = ChainFault::from_panic("listener", payload);
                    let response = Response::new(self.clone(), Arc::clone(&message), None);
                    self.emit(&RobotEvent::Error {
                        fault,
                        response: Some(response),
                    });
                }
            }
        }

        (matched, message)
    }

    /// Sends `strings` through the adapter, bypassing response middleware.
    pub async fn send(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.inner.adapter.send(envelope, strings).await
    }

    /// Replies through the adapter, bypassing response middleware.
    pub async fn reply(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.inner.adapter.reply(envelope, strings).await
    }

    /// Posts `strings` to `room`.
    pub async fn message_room(&self, room: &str, strings: &[String]) -> AdapterResult<()> {
        self.inner.adapter.send(&Envelope::room(room), strings).await
    }

    // ─── Help ─────────────────────────────────────────────────────────────────

    /// Adds a line to the help listing.
    pub fn add_command(&self, command: impl Into<String>) {
        self.inner.commands.write().push(command.into());
    }

    /// Returns the help listing, sorted.
    pub fn help_commands(&self) -> Vec<String> {
        let mut commands = self.inner.commands.read().clone();
        commands.sort();
        commands
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Emits `Running`, then runs the adapter until it stops.
    ///
    /// An adapter error is returned as-is; callers treat it as fatal.
    pub async fn run(&self) -> RobotResult<()> {
        info!(
            robot = %self.inner.name,
            adapter = self.inner.adapter.name(),
            "Robot running"
        );
        self.emit(&RobotEvent::Running);

        let sink: Arc<dyn MessageSink> = Arc::new(self.clone());
        let ctx = AdapterContext::new(sink, self.inner.shutdown.clone());
        self.inner.adapter.run(ctx).await?;
        Ok(())
    }

    /// Closes the adapter and the brain.
    pub async fn shutdown(&self) -> RobotResult<()> {
        self.inner.shutdown.cancel();
        let closed = self.inner.adapter.close().await;
        self.inner.brain.close();
        info!(robot = %self.inner.name, "Robot shut down");
        Ok(closed?)
    }
}

#[async_trait]
impl MessageSink for Robot {
    async fn receive(&self, message: Message) -> bool {
        Robot::receive(self, message).await
    }

    fn user_for_id(&self, id: &str, attributes: Map<String, Value>) -> Arc<User> {
        self.inner.brain.user_for_id(id, attributes)
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("name", &self.inner.name)
            .field("alias", &self.inner.alias)
            .field("adapter", &self.inner.adapter.name())
            .field("listeners", &self.inner.listeners.read().len())
            .finish_non_exhaustive()
    }
}

/// Hands catch-all callbacks the wrapped message.
struct Unwrapped<C>(C);

impl<C: Callback> Callback for Unwrapped<C> {
    fn call(&self, mut response: Response) -> BoxFuture<'static, Option<ChainFault>> {
        response.unwrap_catch_all();
        self.0.call(response)
    }
}
