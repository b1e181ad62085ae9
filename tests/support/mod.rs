#![allow(dead_code)]

use live_dom::{Config, Document, FetchId, HistoryEntry, HistoryKind, LiveSocket, MemoryStorage, Navigation, PageLoading, PushId, Reply, Storage, Transport};
use serde_json::{json, Value};
use std::{cell::RefCell, rc::Rc};

pub const BASE: &str = "http://example.com/";

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
	Join { topic: String, params: Value },
	Push { topic: String, event: String, payload: Value },
	Leave { topic: String },
}

#[derive(Debug, Default)]
pub struct Wire {
	next_id: u64,
	pub sent: Vec<(PushId, Sent)>,
	pub disconnects: usize,
}

impl Wire {
	fn send(&mut self, sent: Sent) -> PushId {
		self.next_id += 1;
		let id = PushId(self.next_id);
		self.sent.push((id, sent));
		id
	}
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport(pub Rc<RefCell<Wire>>);

impl Transport for MockTransport {
	fn join(&mut self, topic: &str, params: Value) -> PushId {
		self.0.borrow_mut().send(Sent::Join { topic: topic.to_owned(), params })
	}

	fn push(&mut self, topic: &str, event: &str, payload: Value, _timeout_ms: u32) -> PushId {
		self.0.borrow_mut().send(Sent::Push { topic: topic.to_owned(), event: event.to_owned(), payload })
	}

	fn leave(&mut self, topic: &str) -> PushId {
		self.0.borrow_mut().send(Sent::Leave { topic: topic.to_owned() })
	}

	fn is_connected(&self) -> bool {
		true
	}

	fn disconnect(&mut self) {
		self.0.borrow_mut().disconnects += 1;
	}
}

#[derive(Debug)]
pub struct Browser {
	pub href: String,
	pub history: Vec<(HistoryKind, HistoryEntry, Option<String>)>,
	pub fetches: Vec<(FetchId, String)>,
	pub redirects: Vec<(String, Option<String>)>,
	pub reloads: Vec<(u32, Option<String>)>,
	pub loading: Vec<PageLoading>,
}

impl Default for Browser {
	fn default() -> Self {
		Self {
			href: BASE.to_owned(),
			history: Vec::new(),
			fetches: Vec::new(),
			redirects: Vec::new(),
			reloads: Vec::new(),
			loading: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct MockNavigation(pub Rc<RefCell<Browser>>);

impl Navigation for MockNavigation {
	fn href(&self) -> String {
		self.0.borrow().href.clone()
	}

	fn push_history_entry(&mut self, kind: HistoryKind, entry: HistoryEntry, to: Option<&str>) {
		self.0.borrow_mut().history.push((kind, entry, to.map(str::to_owned)));
	}

	fn current_location_changed(&mut self, href: &str) -> bool {
		let mut browser = self.0.borrow_mut();
		if browser.href == href {
			return false;
		}
		browser.href = href.to_owned();
		true
	}

	fn fetch_document(&mut self, url: &str) -> FetchId {
		let mut browser = self.0.borrow_mut();
		let id = FetchId(browser.fetches.len() as u64 + 1);
		browser.fetches.push((id, url.to_owned()));
		id
	}

	fn redirect(&mut self, to: &str, flash: Option<&str>) {
		self.0.borrow_mut().redirects.push((to.to_owned(), flash.map(str::to_owned)));
	}

	fn reload_after(&mut self, delay_ms: u32, to: Option<&str>) {
		self.0.borrow_mut().reloads.push((delay_ms, to.map(str::to_owned)));
	}

	fn page_loading(&mut self, event: PageLoading) {
		self.0.borrow_mut().loading.push(event);
	}
}

/// Outlives a socket, like the browser's local storage.
#[derive(Debug, Clone, Default)]
pub struct SharedStorage(pub Rc<RefCell<MemoryStorage>>);

impl Storage for SharedStorage {
	fn get_local(&self, namespace: &str, subkey: &str) -> Option<Value> {
		self.0.borrow().get_local(namespace, subkey)
	}

	fn set_local(&mut self, namespace: &str, subkey: &str, value: Value) {
		self.0.borrow_mut().set_local(namespace, subkey, value);
	}

	fn remove_local(&mut self, namespace: &str, subkey: &str) {
		self.0.borrow_mut().remove_local(namespace, subkey);
	}
}

pub struct Harness {
	pub socket: LiveSocket,
	pub wire: Rc<RefCell<Wire>>,
	pub browser: Rc<RefCell<Browser>>,
}

impl Harness {
	pub fn new(html: &str) -> Self {
		Self::with_storage(html, MemoryStorage::default())
	}

	pub fn with_storage(html: &str, storage: impl Storage + 'static) -> Self {
		let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).with_test_writer().try_init();
		let transport = MockTransport::default();
		let navigation = MockNavigation::default();
		let wire = Rc::clone(&transport.0);
		let browser = Rc::clone(&navigation.0);
		let socket = LiveSocket::new(Document::from_html(html), transport, navigation, Config::default()).with_storage(storage);
		Self { socket, wire, browser }
	}

	/// A single main view, connected.
	pub fn main(id: &str, name: &str) -> Self {
		Self::main_with_storage(id, name, MemoryStorage::default())
	}

	pub fn main_with_storage(id: &str, name: &str, storage: impl Storage + 'static) -> Self {
		let mut harness = Self::with_storage(&format!(r#"<div id="{}" data-phx-view="{}" data-phx-session="session-{}" data-phx-main="true"></div>"#, id, name, id), storage);
		harness.socket.connect().unwrap();
		harness
	}

	pub fn sent(&self) -> Vec<(PushId, Sent)> {
		self.wire.borrow().sent.clone()
	}

	pub fn join_id(&self, topic: &str) -> PushId {
		self.sent()
			.into_iter()
			.rev()
			.find_map(|(id, sent)| matches!(&sent, Sent::Join { topic: t, .. } if t == topic).then(|| id))
			.unwrap_or_else(|| panic!("no join of {}", topic))
	}

	/// Pushes with `event` in order.
	pub fn pushes(&self, event: &str) -> Vec<(PushId, Value)> {
		self.sent()
			.into_iter()
			.filter_map(|(id, sent)| match sent {
				Sent::Push { event: e, payload, .. } if e == event => Some((id, payload)),
				_ => None,
			})
			.collect()
	}

	pub fn last_push(&self, event: &str) -> (PushId, Value) {
		self.pushes(event).pop().unwrap_or_else(|| panic!("no {:?} push", event))
	}

	pub fn reply_join(&mut self, topic: &str, rendered: Value) {
		let id = self.join_id(topic);
		self.socket.on_reply(id, Reply::Ok(json!({ "rendered": rendered })));
	}

	pub fn el(&self, id: &str) -> live_dom::NodeId {
		self.socket.document().element_by_id(id).unwrap_or_else(|| panic!("no element #{}", id))
	}

	pub fn inner(&self, id: &str) -> String {
		self.socket.document().inner_html(self.el(id))
	}
}
