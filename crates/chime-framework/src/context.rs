//! Contexts shared by the stages of one chain execution.
//!
//! Each chain has its own context type:
//!
//! - [`ReceiveContext`]: the receive chain, run once per inbound message.
//!   Stages may replace `response` to rewrite the message listeners see.
//! - [`ListenerContext`]: the listener chain, run once per matching listener
//!   before its callback.
//! - [`ResponseContext`]: the response chain, run once per outbound action.
//!   Stages may rewrite `strings` or switch `method`.
//!
//! Besides their typed fields, all contexts carry a [`StateMap`] where
//! stages leave values for later stages, keyed by type.
//!
//! ```rust,ignore
//! struct Tagged(&'static str);
//!
//! robot.receive_middleware(|ctx: &mut ReceiveContext| {
//!     ctx.state_mut().set_state(Tagged("audited"));
//!     Flow::Continue
//! });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::listener::Listener;
use crate::response::Response;

/// Contexts that can expose the response in flight.
///
/// The chain executor uses this to attach the response to `Error` events.
pub trait ChainContext: Send {
    /// Returns the in-flight response, if the context carries one.
    fn response(&self) -> Option<&Response>;
}

// =============================================================================
// StateMap
// =============================================================================

/// Type-keyed storage for values stages pass along the chain.
#[derive(Default)]
pub struct StateMap {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl StateMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value. Only one value per type; later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a reference to the stored value of type `T`.
    pub fn get_state<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the stored value of type `T`.
    pub fn get_state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns the value of type `T`.
    pub fn take_state<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for StateMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMap")
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// ReceiveContext
// =============================================================================

/// Context of the receive chain.
#[derive(Debug)]
pub struct ReceiveContext {
    /// The response wrapping the inbound message.
    pub response: Response,
    state: StateMap,
}

impl ReceiveContext {
    /// Creates a receive context.
    pub fn new(response: Response) -> Self {
        Self {
            response,
            state: StateMap::new(),
        }
    }

    /// Returns the stage state.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Returns the stage state mutably.
    pub fn state_mut(&mut self) -> &mut StateMap {
        &mut self.state
    }
}

impl ChainContext for ReceiveContext {
    fn response(&self) -> Option<&Response> {
        Some(&self.response)
    }
}

// =============================================================================
// ListenerContext
// =============================================================================

/// Context of the listener chain.
#[derive(Debug)]
pub struct ListenerContext {
    /// The listener that matched.
    pub listener: Arc<Listener>,
    /// The response handed to the listener's callback.
    pub response: Response,
    state: StateMap,
}

impl ListenerContext {
    /// Creates a listener context.
    pub fn new(listener: Arc<Listener>, response: Response) -> Self {
        Self {
            listener,
            response,
            state: StateMap::new(),
        }
    }

    /// Returns the stage state.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Returns the stage state mutably.
    pub fn state_mut(&mut self) -> &mut StateMap {
        &mut self.state
    }
}

impl ChainContext for ListenerContext {
    fn response(&self) -> Option<&Response> {
        Some(&self.response)
    }
}

// =============================================================================
// ResponseContext
// =============================================================================

/// An outbound adapter action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Post to the room.
    Send,
    /// Post as an emote.
    Emote,
    /// Post addressed to the user.
    Reply,
    /// Change the room topic.
    Topic,
    /// Play a sound.
    Play,
}

impl Method {
    /// Returns the action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Emote => "emote",
            Self::Reply => "reply",
            Self::Topic => "topic",
            Self::Play => "play",
        }
    }

    /// Returns `true` for text-bearing actions.
    pub fn is_plaintext(&self) -> bool {
        !matches!(self, Self::Play)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of the response chain.
#[derive(Debug)]
pub struct ResponseContext {
    /// The response the action was called on.
    pub response: Response,
    /// The adapter method that will be invoked.
    pub method: Method,
    /// `false` for payloads that are not rewritable text.
    pub plaintext: bool,
    /// The strings to deliver.
    pub strings: Vec<String>,
    state: StateMap,
}

impl ResponseContext {
    /// Creates a response context for `method`.
    pub fn new(response: Response, method: Method, strings: Vec<String>) -> Self {
        Self {
            response,
            method,
            plaintext: method.is_plaintext(),
            strings,
            state: StateMap::new(),
        }
    }

    /// Returns the stage state.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Returns the stage state mutably.
    pub fn state_mut(&mut self) -> &mut StateMap {
        &mut self.state
    }
}

impl ChainContext for ResponseContext {
    fn response(&self) -> Option<&Response> {
        Some(&self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_state_map_roundtrip() {
        let mut state = StateMap::new();
        assert!(!state.has_state::<Counter>());

        state.set_state(Counter(1));
        state.get_state_mut::<Counter>().unwrap().0 += 1;
        assert_eq!(state.get_state::<Counter>(), Some(&Counter(2)));

        state.set_state(Counter(10));
        assert_eq!(state.len(), 1);
        assert_eq!(state.take_state::<Counter>(), Some(Counter(10)));
        assert!(state.is_empty());
    }

    #[test]
    fn test_method_plaintext() {
        assert!(Method::Send.is_plaintext());
        assert!(Method::Topic.is_plaintext());
        assert!(!Method::Play.is_plaintext());
        assert_eq!(Method::Emote.to_string(), "emote");
    }
}
