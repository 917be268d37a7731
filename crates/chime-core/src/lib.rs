//! # Chime Core
//!
//! Foundation types shared by every layer of the Chime chat-bot runtime.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Users**: identity plus an open attribute bag ([`User`])
//! - **Messages**: inbound chat events ([`Message`], [`MessageKind`]) and
//!   outbound addressing ([`Envelope`])
//!
//! ### Integration Layer
//!
//! - **Adapters**: chat platform bridges ([`Adapter`], [`MessageSink`])
//! - **Datastores**: durable key/value backends ([`DataStore`], [`StoreHandle`])
//!
//! ```text
//! ┌─────────────┐  Message   ┌────────────┐  Envelope + strings  ┌─────────────┐
//! │   Adapter   │──────────▶│   Robot    │────────────────────▶│   Adapter   │
//! │  (inbound)  │            │ (dispatch) │                      │ (outbound)  │
//! └─────────────┘            └────────────┘                      └─────────────┘
//! ```

pub mod error;
pub mod foundation;
pub mod integration;

pub use error::{AdapterError, AdapterResult, StoreError, StoreResult};

pub use foundation::{Envelope, Message, MessageKind, User, value_to_string};

pub use integration::{
    Adapter, AdapterContext, BoxedAdapter, DataStore, MemoryDataStore, MessageSink, StoreHandle,
    StoreTable,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::error::*;
    pub use super::foundation::*;
    pub use super::integration::*;
}
