//! Listeners: matcher and callback pairs tried against inbound messages.
//!
//! A [`Listener`] owns a matcher (`&Message -> Option<MatchResult>`) and an
//! async callback receiving a [`Response`]. Text listeners specialize the
//! matcher to a regex over text-family messages; their captures become the
//! [`MatchResult`] exposed as `response.matched()`.
//!
//! # Callback Return Types
//!
//! Callbacks are async closures `Fn(Response) -> impl Future` returning
//! either `()` or `Result<(), E>` for any displayable `E`. An `Err` is
//! reported through the robot's `Error` event, like a panic would be.
//!
//! ```rust,ignore
//! robot.hear(r"(?i)ping", (), |res: Response| async move {
//!     res.send(["PONG"]).await
//! })?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chime_core::{AdapterError, Message};
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ListenerContext;
use crate::error::ChainFault;
use crate::event::RobotEvent;
use crate::middleware::Middleware;
use crate::response::Response;
use crate::robot::Robot;

// =============================================================================
// MatchResult
// =============================================================================

/// What a matcher found in a message.
///
/// Regex matchers fill the positional groups (group 0 is the whole match)
/// and the named groups. Custom matchers usually return [`MatchResult::hit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl MatchResult {
    /// A match without captured data.
    pub fn hit() -> Self {
        Self::default()
    }

    /// Builds a match from a set of positional groups.
    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(|g| g.map(Into::into)).collect(),
            named: HashMap::new(),
        }
    }

    /// Copies the captures of `regex` into an owned match.
    pub fn from_captures(regex: &Regex, captures: &Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Self { groups, named }
    }

    /// Returns positional group `index`, if it participated in the match.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Returns the named group `name`.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Returns all positional groups.
    pub fn groups(&self) -> &[Option<String>] {
        &self.groups
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Values a listener callback may return.
pub trait CallbackResult: Send + 'static {
    /// Converts the value into a fault, if it represents one.
    fn into_fault(self) -> Option<ChainFault>;
}

impl CallbackResult for () {
    fn into_fault(self) -> Option<ChainFault> {
        None
    }
}

impl<E: fmt::Display + Send + 'static> CallbackResult for Result<(), E> {
    fn into_fault(self) -> Option<ChainFault> {
        let err = self.err()?;
        let message = err.to_string();
        let err: Box<dyn Any + Send> = Box::new(err);
        Some(match err.downcast::<AdapterError>() {
            Ok(adapter) => ChainFault::Adapter(*adapter),
            Err(_) => ChainFault::listener(message),
        })
    }
}

/// A listener callback.
///
/// Implemented for every `Fn(Response) -> Fut` where `Fut` resolves to a
/// [`CallbackResult`].
pub trait Callback: Send + Sync + 'static {
    /// Invokes the callback.
    fn call(&self, response: Response) -> BoxFuture<'static, Option<ChainFault>>;
}

impl<F, Fut, R> Callback for F
where
    F: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: CallbackResult,
{
    fn call(&self, response: Response) -> BoxFuture<'static, Option<ChainFault>> {
        let fut = self(response);
        Box::pin(async move { fut.await.into_fault() })
    }
}

/// A shared matcher function.
pub type MatcherFn = Arc<dyn Fn(&Message) -> Option<MatchResult> + Send + Sync>;

// =============================================================================
// ListenerOptions
// =============================================================================

/// Listener options: an optional id plus free-form metadata.
///
/// Listener middleware reads these, e.g. to rate-limit by listener id.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Identifier for the listener.
    pub id: Option<String>,
    /// Arbitrary metadata.
    pub metadata: Map<String, Value>,
}

impl ListenerOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listener id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<()> for ListenerOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<&str> for ListenerOptions {
    fn from(id: &str) -> Self {
        Self::new().id(id)
    }
}

// =============================================================================
// Listener
// =============================================================================

/// A registered matcher and callback.
pub struct Listener {
    matcher: MatcherFn,
    callback: Arc<dyn Callback>,
    options: ListenerOptions,
    pattern: Option<Regex>,
}

impl Listener {
    /// Creates a listener with a custom matcher.
    pub fn new<M, C>(matcher: M, callback: C, options: ListenerOptions) -> Self
    where
        M: Fn(&Message) -> Option<MatchResult> + Send + Sync + 'static,
        C: Callback,
    {
        Self {
            matcher: Arc::new(matcher),
            callback: Arc::new(callback),
            options,
            pattern: None,
        }
    }

    /// Creates a text listener: `pattern` is tested against the text of
    /// text-family messages. A match must start at the beginning of the text.
    pub fn text<C>(pattern: Regex, callback: C, options: ListenerOptions) -> Self
    where
        C: Callback,
    {
        let regex = pattern.clone();
        let matcher = move |message: &Message| {
            let text = message.text_content()?;
            regex
                .captures(text)
                .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
                .map(|caps| MatchResult::from_captures(&regex, &caps))
        };
        Self {
            matcher: Arc::new(matcher),
            callback: Arc::new(callback),
            options,
            pattern: Some(pattern),
        }
    }

    /// Returns the listener id.
    pub fn id(&self) -> Option<&str> {
        self.options.id.as_deref()
    }

    /// Returns the listener options.
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Returns the regex of a text listener.
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    /// Runs the matcher alone.
    pub fn matches(&self, message: &Message) -> Option<MatchResult> {
        (self.matcher)(message)
    }

    /// Tries the listener against `message`.
    ///
    /// Returns `false` if the matcher did not match. Otherwise runs the
    /// listener middleware, then the callback with the (possibly rewritten)
    /// response, and returns `true` even when the callback faulted.
    pub async fn call(
        self: &Arc<Self>,
        robot: &Robot,
        message: &Arc<Message>,
        middleware: &Middleware<ListenerContext>,
    ) -> bool {
        let Some(matched) = self.matches(message) else {
            return false;
        };

        if let Some(pattern) = &self.pattern {
            debug!(
                message = %message,
                pattern = %pattern,
                listener = ?self.options.id,
                "Message matched text listener"
            );
        }

        let response = Response::new(robot.clone(), Arc::clone(message), Some(matched));
        let ctx = middleware
            .execute(ListenerContext::new(Arc::clone(self), response))
            .await;
        let response = ctx.response;

        let fault = AssertUnwindSafe(self.callback.call(response.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Some(ChainFault::from_panic("listener callback", payload)));

        if let Some(fault) = fault {
            debug!(listener = ?self.options.id, error = %fault, "Listener callback failed");
            robot.emit(&RobotEvent::Error {
                fault,
                response: Some(response),
            });
        }

        true
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("options", &self.options)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAdapter, text_message};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_text_listener_captures() {
        let re = Regex::new(r"(?P<verb>deploy) (\w+)( now)?").unwrap();
        let listener = Listener::text(re, |_res: Response| async {}, ListenerOptions::new());

        let matched = listener
            .matches(&text_message("u1", "deploy api please"))
            .unwrap();
        assert_eq!(matched.get(0), Some("deploy api"));
        assert_eq!(matched.get(2), Some("api"));
        assert_eq!(matched.get(3), None);
        assert_eq!(matched.name("verb"), Some("deploy"));
        assert_eq!(matched.groups().len(), 4);
    }

    #[test]
    fn test_text_listener_matches_from_start() {
        let re = Regex::new("ping").unwrap();
        let listener = Listener::text(re, |_res: Response| async {}, ListenerOptions::new());

        assert!(listener.matches(&text_message("u1", "ping me")).is_some());
        assert!(listener.matches(&text_message("u1", "say ping")).is_none());
    }

    #[test]
    fn test_adapter_errors_keep_their_origin() {
        let fault = Err::<(), _>(AdapterError::send_failed("offline")).into_fault();
        assert!(matches!(fault, Some(ChainFault::Adapter(_))));

        let fault = Err::<(), _>("plain failure").into_fault();
        assert!(matches!(fault, Some(ChainFault::Listener(ref m)) if m == "plain failure"));
        assert!(Ok::<(), String>(()).into_fault().is_none());
    }

    #[test]
    fn test_text_listener_ignores_non_text() {
        let re = Regex::new(".*").unwrap();
        let listener = Listener::text(re, |_res: Response| async {}, "any".into());
        let enter = Message::enter(text_message("u1", "").user().clone());

        assert!(listener.matches(&enter).is_none());
        assert_eq!(listener.id(), Some("any"));
    }

    #[tokio::test]
    async fn test_call_without_match_is_false() {
        let (robot, _adapter) = TestAdapter::robot();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let listener = Arc::new(Listener::new(
            |_: &Message| None,
            move |_res: Response| {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            },
            ListenerOptions::new(),
        ));

        let message = Arc::new(text_message("u1", "hello"));
        let matched = listener
            .call(&robot, &message, &robot.listener_chain())
            .await;

        assert!(!matched);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_callback_still_counts_as_match() {
        let (robot, _adapter) = TestAdapter::robot();
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        robot.error(move |_fault, response| {
            assert!(response.is_some());
            e.fetch_add(1, Ordering::SeqCst);
        });

        let listener = Arc::new(Listener::new(
            |_: &Message| Some(MatchResult::hit()),
            |_res: Response| async { Err::<(), _>("callback exploded") },
            ListenerOptions::new(),
        ));

        let message = Arc::new(text_message("u1", "hello"));
        assert!(
            listener
                .call(&robot, &message, &robot.listener_chain())
                .await
        );
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_runs_after_listener_middleware() {
        let (robot, _adapter) = TestAdapter::robot();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o = order.clone();
        robot.listener_middleware(move |ctx: &mut ListenerContext| {
            o.lock().push(format!("middleware:{}", ctx.listener.id().unwrap_or("-")));
            crate::middleware::Flow::Continue
        });

        let o = order.clone();
        let listener = Arc::new(Listener::new(
            |_: &Message| Some(MatchResult::hit()),
            move |_res: Response| {
                let o = o.clone();
                async move { o.lock().push("callback".to_string()) }
            },
            "greeter".into(),
        ));

        let message = Arc::new(text_message("u1", "hello"));
        listener
            .call(&robot, &message, &robot.listener_chain())
            .await;

        assert_eq!(*order.lock(), vec!["middleware:greeter", "callback"]);
    }

    #[tokio::test]
    async fn test_faulting_listener_middleware_still_matches() {
        let (robot, _adapter) = TestAdapter::robot();
        let errors = Arc::new(AtomicUsize::new(0));
        let with_response = Arc::new(AtomicUsize::new(0));
        let (e, w) = (errors.clone(), with_response.clone());
        robot.error(move |_fault, response| {
            e.fetch_add(1, Ordering::SeqCst);
            if response.is_some() {
                w.fetch_add(1, Ordering::SeqCst);
            }
        });
        robot.listener_middleware(|_ctx: &mut ListenerContext| {
            crate::middleware::Flow::fault("rate limited")
        });

        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        robot
            .hear("hello", ListenerOptions::new(), move |_res: Response| {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert!(robot.receive(text_message("u1", "hello")).await);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(with_response.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
