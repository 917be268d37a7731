//! Inbound messages and outbound envelopes.
//!
//! Adapters construct one [`Message`] per inbound chat event. The kind is a
//! tagged variant ([`MessageKind`]); the fields every kind shares (the
//! sender, the room, and the `done` flag) live on [`Message`] itself.
//!
//! ```text
//! Message { user, room, done, kind }
//! ├── Text     { text, id }   ─┐ text family
//! ├── Topic    { text, id }   ─┘
//! ├── Enter
//! ├── Leave
//! └── CatchAll { wrapped }    (emitted by the robot when no listener matched)
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::user::User;

/// The kind of an inbound message.
#[derive(Debug)]
pub enum MessageKind {
    /// A chat line.
    Text {
        /// The message body.
        text: String,
        /// Adapter-specific message id.
        id: String,
    },
    /// A user joined the room.
    Enter,
    /// A user left the room.
    Leave,
    /// The room topic changed.
    Topic {
        /// The new topic.
        text: String,
        /// Adapter-specific message id.
        id: String,
    },
    /// Wraps a message no listener matched.
    CatchAll(Arc<Message>),
}

/// An inbound chat event.
///
/// `room` is copied from the user at construction time. The `done` flag is
/// set at most once, through [`finish`](Self::finish), and stops the robot
/// from offering the message to further listeners.
#[derive(Debug)]
pub struct Message {
    user: Arc<User>,
    room: Option<String>,
    done: AtomicBool,
    kind: MessageKind,
}

impl Message {
    fn with_kind(user: Arc<User>, kind: MessageKind) -> Self {
        let room = user.room();
        Self {
            user,
            room,
            done: AtomicBool::new(false),
            kind,
        }
    }

    /// Creates a text message.
    pub fn text(user: Arc<User>, text: impl Into<String>, id: impl Into<String>) -> Self {
        Self::with_kind(
            user,
            MessageKind::Text {
                text: text.into(),
                id: id.into(),
            },
        )
    }

    /// Creates a topic-change message.
    pub fn topic(user: Arc<User>, text: impl Into<String>, id: impl Into<String>) -> Self {
        Self::with_kind(
            user,
            MessageKind::Topic {
                text: text.into(),
                id: id.into(),
            },
        )
    }

    /// Creates an enter (join) message.
    pub fn enter(user: Arc<User>) -> Self {
        Self::with_kind(user, MessageKind::Enter)
    }

    /// Creates a leave (part) message.
    pub fn leave(user: Arc<User>) -> Self {
        Self::with_kind(user, MessageKind::Leave)
    }

    /// Wraps an unmatched message in a catch-all.
    pub fn catch_all(message: Arc<Message>) -> Self {
        Self::with_kind(Arc::clone(&message.user), MessageKind::CatchAll(message))
    }

    /// Returns the sender.
    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// Returns the room the message arrived in.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Returns the message kind.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Returns a short name for the kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Text { .. } => "text",
            MessageKind::Enter => "enter",
            MessageKind::Leave => "leave",
            MessageKind::Topic { .. } => "topic",
            MessageKind::CatchAll(_) => "catch_all",
        }
    }

    /// Returns the text of a text-family message.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text, .. } | MessageKind::Topic { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Returns the adapter message id of a text-family message.
    pub fn id(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { id, .. } | MessageKind::Topic { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Returns `true` for text and topic messages.
    pub fn is_text_family(&self) -> bool {
        self.text_content().is_some()
    }

    /// Returns `true` for topic messages.
    pub fn is_topic(&self) -> bool {
        matches!(self.kind, MessageKind::Topic { .. })
    }

    /// Returns `true` for enter messages.
    pub fn is_enter(&self) -> bool {
        matches!(self.kind, MessageKind::Enter)
    }

    /// Returns `true` for leave messages.
    pub fn is_leave(&self) -> bool {
        matches!(self.kind, MessageKind::Leave)
    }

    /// Returns `true` for catch-all wrappers.
    pub fn is_catch_all(&self) -> bool {
        matches!(self.kind, MessageKind::CatchAll(_))
    }

    /// Returns the wrapped message of a catch-all.
    pub fn wrapped(&self) -> Option<&Arc<Message>> {
        match &self.kind {
            MessageKind::CatchAll(inner) => Some(inner),
            _ => None,
        }
    }

    /// Marks the message as fully handled.
    pub fn finish(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the message has been finished.
    ///
    /// A catch-all is also done when the message it wraps was finished.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst) || self.wrapped().is_some_and(|inner| inner.is_done())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Text { text, .. } | MessageKind::Topic { text, .. } => f.write_str(text),
            MessageKind::CatchAll(inner) => write!(f, "{inner}"),
            MessageKind::Enter => write!(f, "<{} entered>", self.user.name()),
            MessageKind::Leave => write!(f, "<{} left>", self.user.name()),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Addressing information for an outbound action.
///
/// Envelopes built from a message carry the room, the sender and the message;
/// [`Envelope::room`] builds a room-only envelope for unsolicited sends.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Target room.
    pub room: Option<String>,
    /// The user being answered.
    pub user: Option<Arc<User>>,
    /// The message being answered.
    pub message: Option<Arc<Message>>,
}

impl Envelope {
    /// Builds an envelope answering `message`.
    pub fn for_message(message: &Arc<Message>) -> Self {
        Self {
            room: message.room().map(str::to_string),
            user: Some(Arc::clone(message.user())),
            message: Some(Arc::clone(message)),
        }
    }

    /// Builds a room-only envelope.
    pub fn room(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_in(room: &str) -> Arc<User> {
        let user = User::new("u1");
        user.set_attr("room", room);
        Arc::new(user)
    }

    #[test]
    fn test_room_copied_at_construction() {
        let user = user_in("general");
        let msg = Message::text(Arc::clone(&user), "hi", "m1");
        user.set_attr("room", "random");

        assert_eq!(msg.room(), Some("general"));
    }

    #[test]
    fn test_text_family() {
        let user = user_in("general");
        let text = Message::text(Arc::clone(&user), "hello", "1");
        let topic = Message::topic(Arc::clone(&user), "new topic", "2");
        let enter = Message::enter(Arc::clone(&user));

        assert!(text.is_text_family());
        assert!(topic.is_text_family() && topic.is_topic());
        assert!(!enter.is_text_family());
        assert_eq!(topic.text_content(), Some("new topic"));
        assert_eq!(enter.id(), None);
    }

    #[test]
    fn test_catch_all_done_follows_inner() {
        let inner = Arc::new(Message::text(user_in("general"), "hello", "1"));
        let wrapper = Message::catch_all(Arc::clone(&inner));

        assert!(wrapper.is_catch_all());
        assert_eq!(wrapper.room(), Some("general"));
        assert!(!wrapper.is_done());

        inner.finish();
        assert!(wrapper.is_done());
        assert_eq!(wrapper.to_string(), "hello");
    }

    #[test]
    fn test_envelope_for_message() {
        let msg = Arc::new(Message::text(user_in("general"), "hi", "1"));
        let envelope = Envelope::for_message(&msg);

        assert_eq!(envelope.room.as_deref(), Some("general"));
        assert_eq!(envelope.user.as_ref().map(|u| u.id()), Some("u1"));
        assert!(Envelope::room("ops").user.is_none());
    }
}
