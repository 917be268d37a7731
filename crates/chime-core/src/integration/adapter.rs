//! Adapter trait and context.
//!
//! An adapter bridges one chat platform with the robot. Outbound, the robot
//! calls the adapter's action methods with an [`Envelope`] and the strings to
//! deliver. Inbound, the adapter builds [`Message`]s and pushes them through
//! the [`MessageSink`] found in its [`AdapterContext`].
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Adapter for ShellAdapter {
//!     fn name(&self) -> &str { "shell" }
//!
//!     async fn send(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
//!         for line in strings {
//!             println!("{line}");
//!         }
//!         Ok(())
//!     }
//!
//!     async fn run(&self, ctx: AdapterContext) -> AdapterResult<()> {
//!         let user = ctx.sink().user_for_id("1", Map::new());
//!         ctx.sink().receive(Message::text(user, "hello", "1")).await;
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::AdapterResult;
use crate::foundation::message::{Envelope, Message};
use crate::foundation::user::User;

/// The inbound side of the robot, as seen by an adapter.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Dispatches a message through the robot.
    ///
    /// Returns `true` if at least one listener matched.
    async fn receive(&self, message: Message) -> bool;

    /// Looks up (or creates) the user with `id`, merging `attributes`.
    fn user_for_id(&self, id: &str, attributes: Map<String, Value>) -> Arc<User>;
}

/// Context handed to [`Adapter::run`].
#[derive(Clone)]
pub struct AdapterContext {
    sink: Arc<dyn MessageSink>,
    shutdown: CancellationToken,
}

impl AdapterContext {
    /// Creates a new adapter context.
    pub fn new(sink: Arc<dyn MessageSink>, shutdown: CancellationToken) -> Self {
        Self { sink, shutdown }
    }

    /// Returns the sink inbound messages are pushed into.
    pub fn sink(&self) -> &Arc<dyn MessageSink> {
        &self.sink
    }

    /// Returns the token cancelled when the robot shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// The core adapter trait.
///
/// Only [`name`](Adapter::name), [`send`](Adapter::send) and
/// [`run`](Adapter::run) are required. `emote` falls back to `send`; the
/// remaining actions report [`AdapterError::Unsupported`] unless overridden.
///
/// [`AdapterError::Unsupported`]: crate::error::AdapterError::Unsupported
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns the adapter name (e.g., "shell").
    fn name(&self) -> &str;

    /// Posts `strings` to the envelope's room.
    async fn send(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()>;

    /// Posts `strings` as emotes. Defaults to [`send`](Adapter::send).
    async fn emote(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.send(envelope, strings).await
    }

    /// Posts `strings` addressed to the envelope's user.
    async fn reply(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        let _ = (envelope, strings);
        Err(crate::error::AdapterError::Unsupported { action: "reply" })
    }

    /// Sets the room topic.
    async fn topic(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        let _ = (envelope, strings);
        Err(crate::error::AdapterError::Unsupported { action: "topic" })
    }

    /// Plays a sound in the room.
    async fn play(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        let _ = (envelope, strings);
        Err(crate::error::AdapterError::Unsupported { action: "play" })
    }

    /// Connects to the platform and feeds inbound messages to the sink.
    ///
    /// Resolves when the adapter stops, either on its own or after the
    /// context's shutdown token was cancelled.
    async fn run(&self, ctx: AdapterContext) -> AdapterResult<()>;

    /// Releases platform resources.
    async fn close(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// A shared adapter trait object.
pub type BoxedAdapter = Arc<dyn Adapter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Adapter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, _envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
            self.sent.lock().extend(strings.iter().cloned());
            Ok(())
        }

        async fn run(&self, _ctx: AdapterContext) -> AdapterResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_emote_defaults_to_send() {
        let adapter = Recorder::default();
        adapter
            .emote(&Envelope::room("general"), &["waves".to_string()])
            .await
            .unwrap();
        assert_eq!(*adapter.sent.lock(), vec!["waves".to_string()]);
    }

    #[tokio::test]
    async fn test_optional_actions_are_unsupported() {
        let adapter = Recorder::default();
        let err = adapter
            .play(&Envelope::room("general"), &["trombone".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported { action: "play" }));
        assert!(adapter.close().await.is_ok());
    }
}
