//! The metadata layer: a durable key/value store in provider object
//! storage, where logical resources are paths inside a per-tenant
//! bucket. It is the daemon's source of truth about tenant-owned
//! resources, decoupled from the provider's mutable view.
//!
//! Consistency model: [`Item`] serializes writers within one daemon
//! process; across daemons the store is write-last-wins, under the
//! one-daemon-per-tenant deployment assumption.

mod bucket;
mod folder;
mod item;

pub use bucket::{Bucket, DirBucket, MemBucket};
pub use folder::Folder;
pub use item::Item;
