//! HTTP implementation of the core `RemoteDocumentStore` trait against the
//! blob-document REST API.

mod client;

pub use client::*;
