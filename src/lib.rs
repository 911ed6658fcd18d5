//! Upload, download, delete and shareable links for files kept in an
//! object store.
//!
//! [`ObjectStore`] is the entry point. It builds keys from folder and file
//! names, picks a canned ACL from the caller's [`AccessIntent`], renders
//! https direct links, resolves links back to (bucket, key), and issues
//! time-limited signed links, all on top of an injected [`StorageClient`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use errors::{MalformedUrl, StoreError, StoreResult};
pub use models::{
    access::{AccessIntent, AccessLevel},
    link::{DirectLink, SignedLink},
};
pub use services::{
    key_builder::{ObjectKey, build_key},
    link_codec::LinkCodec,
    object_store::{DownloadedFile, ObjectStore},
    storage_client::StorageClient,
};
