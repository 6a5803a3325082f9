//! Shared type definitions for the opflow data resolution and container
//! execution layers.
//!
//! Nothing in this crate performs I/O. The types here are the vocabulary passed
//! between the engine, its providers, peer nodes, and container daemons.

pub mod container;
pub mod data;
pub mod event;

pub use container::{ContainerCall, ContainerImage};
pub use data::{Creds, DirEntry, GetDataRequest, ListDescendantsRequest};
pub use event::{Event, EventKind, EventSender, publish};
