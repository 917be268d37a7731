//! # Chime Framework
//!
//! The message dispatch pipeline of the Chime chat-bot runtime.
//!
//! This layer provides:
//! - Ordered middleware chains with short-circuit and fault containment
//!   ([`Middleware`], [`Stage`], [`Flow`])
//! - Listeners and the matching policy ([`Listener`], [`MatchResult`])
//! - The outbound [`Response`] path through the response chain
//! - A typed per-robot event bus ([`EventBus`], [`RobotEvent`])
//! - The [`Brain`]: private data, user registry, autosave and reconciliation
//! - The [`Robot`] dispatcher tying everything to an adapter
//!
//! ```text
//! adapter ─▶ Robot::receive ─▶ receive chain ─▶ listeners ─▶ listener chain ─▶ callback
//!                                                                                │
//! adapter ◀─ response chain ◀─ Response::send ◀──────────────────────────────────┘
//! ```

pub mod brain;
pub mod context;
pub mod error;
pub mod event;
pub mod listener;
pub mod middleware;
pub mod pattern;
pub mod response;
pub mod robot;

pub use brain::{Brain, DEFAULT_SAVE_INTERVAL};
pub use context::{
    ChainContext, ListenerContext, Method, ReceiveContext, ResponseContext, StateMap,
};
pub use error::{ChainFault, RobotError, RobotResult};
pub use event::{EventBus, RobotEvent, Subscriber};
pub use listener::{
    Callback, CallbackResult, Listener, ListenerOptions, MatchResult, MatcherFn,
};
pub use middleware::{BoxedStage, Flow, Middleware, Stage, StageCatalog};
pub use pattern::response_pattern;
pub use response::Response;
pub use robot::{DEFAULT_NAME, ErrorHandler, Robot, RobotBuilder};
