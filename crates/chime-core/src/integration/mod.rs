//! Integration layer: interfaces to chat platforms and durable storage.

pub mod adapter;
pub mod datastore;

pub use adapter::{Adapter, AdapterContext, BoxedAdapter, MessageSink};
pub use datastore::{DataStore, MemoryDataStore, StoreHandle, StoreTable};
