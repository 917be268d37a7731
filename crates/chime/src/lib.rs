//! # Chime
//!
//! A chat-bot framework: adapters deliver messages, listeners answer them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  receive   ┌───────────────┐   first match   ┌───────────────────┐
//! │ Adapter │──────────▶│ receive chain │───────────────▶│ listener chain    │──▶ callback
//! └─────────┘            └───────────────┘                 └───────────────────┘      │
//!      ▲                                                                              │
//!      └──────────────────────── response chain ◀──────── Response::send ◀────────────┘
//! ```
//!
//! - **Adapter**: a chat protocol; feeds messages in, delivers strings out
//! - **Middleware**: three ordered chains of stages that can rewrite, stop or fault
//! - **Listeners**: matcher plus callback; the first match wins unless it lets others run
//! - **Brain**: users and private data, persisted through `Persist`/`Loaded` events
//! - **Runtime**: configuration, logging and the process lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ChimeRuntime::builder()
//!         .adapter("shell", |_| Ok(Arc::new(MyShell::default()) as BoxedAdapter))
//!         .build()?;
//!
//!     let robot = runtime.robot()?;
//!     robot.respond("ping", (), |res: Response| async move { res.reply(["PONG"]).await })?;
//!     robot.catch_all((), |res: Response| async move { res.send(["?"]).await });
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): `chime.toml` configuration files
//! - `yaml-config`: `chime.yaml` configuration files
//! - `json-log`: `logging.format = "json"`

pub use chime_core as core;
pub use chime_framework as framework;
pub use chime_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use chime::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use chime_runtime::{ChimeConfig, ChimeRuntime, RuntimeError};

    // Robot and the objects callbacks receive
    pub use chime_framework::{
        Brain, ChainFault, ListenerOptions, MatchResult, Response, Robot, RobotError,
        RobotEvent,
    };

    // Middleware
    pub use chime_framework::{
        Flow, ListenerContext, Method, ReceiveContext, ResponseContext, Stage,
    };

    // Adapter side
    pub use chime_core::{
        Adapter, AdapterContext, AdapterError, AdapterResult, BoxedAdapter, Envelope, Message,
        MessageKind, User,
    };
}
