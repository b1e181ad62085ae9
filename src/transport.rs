//! The seams to the outside world.
//!
//! A [`LiveSocket`](`crate::LiveSocket`) never performs I/O itself. It calls into these traits and
//! is told about their results later, through its `on_*` methods.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Identifies an outstanding request on the [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PushId(pub u64);

/// Identifies an outstanding [`Navigation::fetch_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchId(pub u64);

/// The server's answer to a join, push or leave.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
	Ok(Value),
	Error(Value),
	/// No reply arrived within the push's timeout.
	Timeout,
}

/// A multiplexed channel connection. Each view joins its own topic.
///
/// Replies to a join may be delivered more than once, since a channel rejoins on its own after an error.
pub trait Transport {
	fn join(&mut self, topic: &str, params: Value) -> PushId;
	fn push(&mut self, topic: &str, event: &str, payload: Value, timeout_ms: u32) -> PushId;
	fn leave(&mut self, topic: &str) -> PushId;
	fn is_connected(&self) -> bool;
	fn disconnect(&mut self);
}

/// How a navigation lands in the session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
	Push,
	Replace,
}

impl HistoryKind {
	/// Anything but `"replace"` pushes.
	#[must_use]
	pub fn parse(kind: Option<&str>) -> Self {
		match kind {
			Some("replace") => Self::Replace,
			_ => Self::Push,
		}
	}
}

/// Whether a history entry was created by patching the main view or by replacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEntryType {
	Patch,
	Redirect,
}

/// The state stored with a history entry, handed back on `popstate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
	#[serde(rename = "type")]
	pub kind: HistoryEntryType,
	/// The main view's id at the time.
	pub id: String,
	#[serde(default)]
	pub root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoadingKind {
	Initial,
	Patch,
	Redirect,
	/// An element with `phx-page-loading` pushed an event.
	Element,
	Error,
}

/// Start and stop notifications for page loading indicators. They are always paired, except for [`PageLoadingKind::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLoading {
	Start { kind: PageLoadingKind, to: Option<String> },
	Stop { kind: PageLoadingKind, to: Option<String> },
}

/// The browser's location, history and page loads.
pub trait Navigation {
	/// The current location.
	fn href(&self) -> String;
	/// `to` is `None` for replacing the current entry's state only.
	fn push_history_entry(&mut self, kind: HistoryKind, entry: HistoryEntry, to: Option<&str>);
	/// Records `href` as the current location. Returns `false` if it already was.
	fn current_location_changed(&mut self, href: &str) -> bool;
	/// Fetches the document at `url` with a live-link header. The result is reported through
	/// [`LiveSocket::on_document_fetched`](`crate::LiveSocket::on_document_fetched`).
	fn fetch_document(&mut self, url: &str) -> FetchId;
	/// Full page load of `to`, with `flash` carried along if present.
	fn redirect(&mut self, to: &str, flash: Option<&str>);
	/// Full page load after `delay_ms`. `to` is `None` for reloading the current location.
	fn reload_after(&mut self, delay_ms: u32, to: Option<&str>);
	fn page_loading(&mut self, event: PageLoading);
}

/// Per-tab key-value storage, used to count consecutive failed joins.
pub trait Storage {
	fn get_local(&self, namespace: &str, subkey: &str) -> Option<Value>;
	fn set_local(&mut self, namespace: &str, subkey: &str, value: Value);
	fn remove_local(&mut self, namespace: &str, subkey: &str);
}

/// Replaces the value at `namespace`/`subkey` (or `initial` where there is none) with `update`'s result, which is returned.
pub fn update_local(storage: &mut dyn Storage, namespace: &str, subkey: &str, initial: Value, update: impl FnOnce(Value) -> Value) -> Value {
	let current = storage.get_local(namespace, subkey).unwrap_or(initial);
	let next = update(current);
	trace!(namespace, subkey, %next, "Updating local storage");
	storage.set_local(namespace, subkey, next.clone());
	next
}

/// A [`Storage`] that lives as long as the socket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStorage {
	values: HashMap<String, Value>,
}

impl MemoryStorage {
	fn key(namespace: &str, subkey: &str) -> String {
		format!("phx:live-socket:{}:{}", namespace, subkey)
	}
}

impl Storage for MemoryStorage {
	fn get_local(&self, namespace: &str, subkey: &str) -> Option<Value> {
		self.values.get(&Self::key(namespace, subkey)).cloned()
	}

	fn set_local(&mut self, namespace: &str, subkey: &str, value: Value) {
		self.values.insert(Self::key(namespace, subkey), value);
	}

	fn remove_local(&mut self, namespace: &str, subkey: &str) {
		self.values.remove(&Self::key(namespace, subkey));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	#[test]
	fn update_local_counts_up() {
		let mut storage = MemoryStorage::default();
		let increment = |count: Value| json!(count.as_u64().unwrap_or(0) + 1);
		assert_eq!(update_local(&mut storage, "View", "reloads", json!(0), increment), json!(1));
		assert_eq!(update_local(&mut storage, "View", "reloads", json!(0), increment), json!(2));
		assert_eq!(storage.get_local("Other", "reloads"), None);
		storage.remove_local("View", "reloads");
		assert_eq!(storage.get_local("View", "reloads"), None);
	}

	#[test]
	fn history_entries_use_the_wire_names() {
		let entry = HistoryEntry { kind: HistoryEntryType::Patch, id: "phx-1".to_owned(), root: true };
		assert_eq!(serde_json::to_value(&entry).unwrap(), json!({ "type": "patch", "id": "phx-1", "root": true }));
		let parsed: HistoryEntry = serde_json::from_value(json!({ "type": "redirect", "id": "phx-2" })).unwrap();
		assert_eq!(parsed, HistoryEntry { kind: HistoryEntryType::Redirect, id: "phx-2".to_owned(), root: false });
		assert_eq!(HistoryKind::parse(Some("replace")), HistoryKind::Replace);
		assert_eq!(HistoryKind::parse(None), HistoryKind::Push);
	}
}
