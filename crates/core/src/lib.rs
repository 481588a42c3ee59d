//! Client-side remote snapshot synchronization and merge engine.
//!
//! Keeps local application collections consistent with a single remote
//! JSON document shared across devices. The application wires in its
//! persistence and UI through the traits in [`store`], then drives the
//! feature through [`SyncService`].

mod apply;
mod conflict;
mod engine;
mod errors;
mod merge;
mod model;
mod scheduler;
mod store;
mod tracker;
mod vault;

#[cfg(test)]
mod testutil;

pub use apply::*;
pub use conflict::*;
pub use engine::*;
pub use errors::*;
pub use merge::*;
pub use model::*;
pub use scheduler::*;
pub use store::*;
pub use tracker::*;
pub use vault::*;
