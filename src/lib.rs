//! The client half of a server-rendered live view protocol.
//!
//! A [`LiveSocket`] owns a [`Document`], joins every view found in it over a [`Transport`] and keeps
//! the document in sync with the diffs the server sends, while routing user events back.
//! It never performs I/O by itself: the host feeds it events and results through `dispatch_*` and `on_*`.
//!
//! On `wasm32`, [`Mirror`] replays every change onto a browser DOM subtree.

#![doc(html_root_url = "https://docs.rs/live-dom/0.0.1")]
#![warn(clippy::pedantic)]

pub mod config;
pub mod consts;
pub mod document;
pub mod dom;
pub mod error;
pub mod hook;
pub mod html;
pub mod morph;
pub mod patch;
pub mod rendered;
pub mod selector;
pub mod socket;
pub mod transport;
mod tree;
pub mod view;

#[cfg(target_arch = "wasm32")]
pub mod load;
#[cfg(target_arch = "wasm32")]
pub mod mirror;

pub use config::Config;
pub use document::{Document, Mutation, NodeId};
pub use error::{DiffError, SocketError};
pub use hook::{Hook, HookContext, HookPush, HookRegistry};
pub use patch::{DomPatch, PatchListener};
pub use rendered::{Cid, Diff, RenderTree};
pub use selector::{Selector, SelectorError};
pub use socket::{KeyEventKind, LiveSocket};
pub use transport::{FetchId, HistoryEntry, HistoryEntryType, HistoryKind, MemoryStorage, Navigation, PageLoading, PageLoadingKind, PushId, Reply, Storage, Transport};
pub use view::View;

#[cfg(target_arch = "wasm32")]
pub use mirror::Mirror;
