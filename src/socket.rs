//! The socket: owns the document and every root view, and routes events, replies and messages to them.

use crate::{
	config::Config,
	consts::{CONSECUTIVE_RELOADS, PHX_CAPTURE_CLICK, PHX_CHANGE, PHX_CLICK, PHX_KEY, PHX_LINK_STATE, PHX_LIVE_LINK, PHX_MAIN, PHX_PARENT_ID, PHX_ROOT_ID, PHX_SUBMIT, PHX_TARGET},
	document::{Document, NodeId},
	dom,
	error::SocketError,
	hook::{self, Hook, HookEvent, HookPush, HookRegistry, ViewHooks},
	patch::BusyRef,
	rendered::Cid,
	selector::Selector,
	transport::{update_local, FetchId, HistoryEntry, HistoryEntryType, HistoryKind, MemoryStorage, Navigation, PageLoading, PageLoadingKind, PushId, Reply, Storage, Transport},
	tree::SessionTree,
	view::View,
};
use core::mem;
use hashbrown::HashMap;
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

/// What to do once a navigation has landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterNavigation {
	Nothing,
	HistoryPatch(HistoryKind),
	HistoryRedirect(HistoryKind),
	ReplaceRootHistory,
}

/// Continuation of a push, run when its reply arrives.
#[derive(Debug)]
pub(crate) enum OnReply {
	Nothing,
	RestoreFocus,
	/// The last form recovery push of a rejoin completes the join.
	CompleteJoin { live_patch: Option<Value>, html: String },
	LinkPatch { href: String, link_ref: u64, then: AfterNavigation },
	PruneCids(Vec<Cid>),
}

#[derive(Debug)]
pub(crate) struct PushContext {
	pub root_id: String,
	pub view_id: String,
	pub cid: Option<Cid>,
	pub busy_ref: Option<BusyRef>,
	pub loading: Option<PageLoading>,
	pub then: OnReply,
}

#[derive(Debug)]
pub(crate) enum Pending {
	/// Kept until the view is destroyed, since a rejoin replies again.
	Join { root_id: String, view_id: String },
	Push(PushContext),
	Leave { view_id: String, view_name: String, hooks: ViewHooks },
}

/// Effects that reach beyond a single session tree.
#[derive(Debug)]
pub(crate) enum SocketOp {
	Redirect { to: String, flash: Option<String> },
	LivePatch { to: String, kind: HistoryKind },
	LiveRedirect { to: String, kind: HistoryKind, flash: Option<String> },
	RootJoined { root_id: String, join_count: u32 },
	ReplaceMain { href: String, flash: Option<String>, then: AfterNavigation, link_ref: Option<u64> },
	LinkPatched { href: String, then: AfterNavigation },
	/// Continues replaying a view's deferred updates.
	ResumeUpdates { root_id: String, view_id: String },
}

/// State shared by all session trees.
pub(crate) struct Runtime {
	pub document: Document,
	pub transport: Box<dyn Transport>,
	pub navigation: Box<dyn Navigation>,
	pub storage: Box<dyn Storage>,
	pub hooks: HookRegistry,
	pub config: Config,
	pub pending: HashMap<PushId, Pending>,
	pub next_hook_id: u32,
	link_ref: u64,
	pub pending_link: Option<String>,
	pub href: String,
	pub main: Option<String>,
	prev_active: Option<NodeId>,
	pub hook_pushes: Vec<HookPush>,
	pub ops: Vec<SocketOp>,
}

impl Runtime {
	/// Invalidates any other pending navigation.
	pub fn set_pending_link(&mut self, href: &str) -> u64 {
		self.link_ref += 1;
		self.pending_link = Some(href.to_owned());
		self.link_ref
	}

	/// Returns `false` if another navigation started after `link_ref`'s.
	pub fn commit_pending_link(&mut self, link_ref: u64) -> bool {
		if self.link_ref != link_ref {
			debug!(link_ref, current = self.link_ref, "Dropping stale navigation");
			return false;
		}
		if let Some(href) = self.pending_link.take() {
			self.href = href;
		}
		true
	}

	pub fn redirect(&mut self, to: &str, flash: Option<&str>) {
		self.transport.disconnect();
		self.navigation.redirect(to, flash);
	}

	/// Reloads after a random delay, which grows once a view has failed to join too often in a row.
	pub fn reload_with_jitter(&mut self, view_name: &str) {
		self.transport.disconnect();
		let [a, b] = self.config.reload_jitter_ms;
		let mut delay = rand::thread_rng().gen_range(a.min(b)..=a.max(b));
		let tries = update_local(&mut *self.storage, view_name, CONSECUTIVE_RELOADS, json!(0), |count| json!(count.as_u64().unwrap_or(0) + 1))
			.as_u64()
			.unwrap_or_default();
		info!(view_name, tries, "Encountered consecutive reloads");
		if tries > u64::from(self.config.max_reloads) {
			warn!("Exceeded {} consecutive reloads. Entering failsafe mode.", self.config.max_reloads);
			delay = self.config.failsafe_jitter_ms;
		}
		let to = self.pending_link.clone();
		self.navigation.reload_after(delay, to.as_deref());
	}

	/// Absolute-path urls are resolved against the current location.
	pub fn expand_url(&self, to: &str) -> String {
		if !to.starts_with('/') {
			return to.to_owned();
		}
		match Url::parse(&self.navigation.href()).and_then(|base| base.join(to)) {
			Ok(url) => url.into(),
			Err(error) => {
				warn!("Can't expand {:?}: {}", to, error);
				to.to_owned()
			}
		}
	}

	pub fn blur_active_element(&mut self) {
		self.prev_active = self.document.active_element();
		self.document.blur();
	}

	pub fn restore_previously_active_focus(&mut self) {
		if let Some(prev_active) = self.prev_active {
			self.document.focus(prev_active);
		}
	}

	pub fn drop_active_element(&mut self, view_id: &str) {
		if self.prev_active.map_or(false, |prev_active| crate::view::owns_element(&self.document, view_id, prev_active)) {
			self.prev_active = None;
		}
	}
}

enum JoinCallback {
	ReplaceMain { href: String, link_ref: u64, old_el: NodeId, then: AfterNavigation },
}

struct PendingFetch {
	href: String,
	flash: Option<String>,
	then: AfterNavigation,
	link_ref: u64,
	old_el: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
	Down,
	Up,
}

impl KeyEventKind {
	fn event(self) -> &'static str {
		match self {
			Self::Down => "keydown",
			Self::Up => "keyup",
		}
	}
}

/// Sans-IO client of the live view protocol.
///
/// Host code feeds it DOM events (`dispatch_*`) and transport results (`on_*`). Every entry point
/// runs to completion, including any hook callbacks and pushes it causes.
pub struct LiveSocket {
	rt: Runtime,
	roots: Vec<SessionTree>,
	fetches: HashMap<FetchId, PendingFetch>,
	join_callbacks: HashMap<String, JoinCallback>,
}

fn find_tree<'a>(roots: &'a mut [SessionTree], root_id: &str) -> Option<&'a mut SessionTree> {
	roots.iter_mut().find(|tree| tree.root_id() == root_id)
}

fn find_view_tree<'a>(roots: &'a mut [SessionTree], view_id: &str) -> Option<&'a mut SessionTree> {
	roots.iter_mut().find(|tree| tree.view(view_id).is_some())
}

/// A view reached through an element, and the element to resolve its component from.
struct Owner {
	root_id: String,
	view_id: String,
	target_ctx: NodeId,
}

impl LiveSocket {
	#[must_use]
	pub fn new(document: Document, transport: impl Transport + 'static, navigation: impl Navigation + 'static, config: Config) -> Self {
		let href = navigation.href();
		Self {
			rt: Runtime {
				document,
				transport: Box::new(transport),
				navigation: Box::new(navigation),
				storage: Box::new(MemoryStorage::default()),
				hooks: HookRegistry::default(),
				config,
				pending: HashMap::new(),
				next_hook_id: 0,
				link_ref: 0,
				pending_link: None,
				href,
				main: None,
				prev_active: None,
				hook_pushes: Vec::new(),
				ops: Vec::new(),
			},
			roots: Vec::new(),
			fetches: HashMap::new(),
			join_callbacks: HashMap::new(),
		}
	}

	#[must_use]
	pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
		self.rt.storage = Box::new(storage);
		self
	}

	pub fn register_hook(&mut self, name: &str, factory: impl Fn() -> Box<dyn Hook> + 'static) {
		self.rt.hooks.register(name, factory);
	}

	#[must_use]
	pub fn document(&self) -> &Document {
		&self.rt.document
	}

	/// For host-side changes such as focus and typed input.
	pub fn document_mut(&mut self) -> &mut Document {
		&mut self.rt.document
	}

	#[must_use]
	pub fn config(&self) -> &Config {
		&self.rt.config
	}

	/// The socket's notion of the current location, which lags behind during navigation.
	#[must_use]
	pub fn href(&self) -> &str {
		&self.rt.href
	}

	#[must_use]
	pub fn has_pending_link(&self) -> bool {
		self.rt.pending_link.is_some()
	}

	#[must_use]
	pub fn main_view_id(&self) -> Option<&str> {
		self.rt.main.as_deref()
	}

	#[must_use]
	pub fn view(&self, view_id: &str) -> Option<&View> {
		self.roots.iter().find_map(|tree| tree.view(view_id))
	}

	pub fn views(&self) -> impl Iterator<Item = &View> {
		self.roots.iter().flat_map(SessionTree::views)
	}

	/// Joins every root view in the document.
	///
	/// # Errors
	///
	/// Iff there is no root view.
	#[instrument(skip(self))]
	pub fn connect(&mut self) -> Result<(), SocketError> {
		let document = &self.rt.document;
		let root_els = document.filter_elements(document.root(), |document, node| dom::is_phx_view(document, node) && !document.has_attribute(node, PHX_PARENT_ID));
		if root_els.is_empty() {
			return Err(SocketError::NoRootView);
		}
		for el in root_els {
			let is_known = self.rt.document.id_of(el).map_or(false, |id| self.roots.iter().any(|tree| tree.root_id() == id));
			if is_known {
				continue;
			}
			let is_main = self.rt.document.attribute(el, PHX_MAIN).map_or(false, |main| !main.is_empty() && main != "false");
			let href = self.rt.href.clone();
			if let Some(root_id) = self.join_root_view(el, href, None) {
				if is_main {
					self.rt.main = Some(root_id);
				}
			}
		}
		self.flush();
		Ok(())
	}

	pub fn disconnect(&mut self) {
		self.rt.transport.disconnect();
	}

	fn join_root_view(&mut self, el: NodeId, href: String, flash: Option<String>) -> Option<String> {
		let view = View::from_element(&self.rt.document, el, None, None, Some(href), flash)?;
		let root_id = view.id().to_owned();
		let mut tree = SessionTree::new(view);
		tree.join(&mut self.rt, &root_id);
		self.roots.push(tree);
		Some(root_id)
	}

	/// Delivers the result of a join, push or leave.
	#[instrument(skip(self, reply))]
	pub fn on_reply(&mut self, push_id: PushId, reply: Reply) {
		match self.rt.pending.remove(&push_id) {
			None => debug!("Reply to unknown or finished push"),
			Some(Pending::Join { root_id, view_id }) => {
				self.rt.pending.insert(push_id, Pending::Join { root_id: root_id.clone(), view_id: view_id.clone() });
				if let Some(tree) = find_tree(&mut self.roots, &root_id) {
					tree.on_join_reply(&mut self.rt, &view_id, reply);
				}
			}
			Some(Pending::Push(push)) => match find_tree(&mut self.roots, &push.root_id) {
				Some(tree) => tree.on_push_reply(&mut self.rt, push, reply),
				None => trace!(view_id = %push.view_id, "Reply for a destroyed view"),
			},
			Some(Pending::Leave { view_id, view_name, mut hooks }) => {
				hook::trigger_all(&mut hooks, HookEvent::Destroyed, &self.rt.document, (&view_id, &view_name), &mut self.rt.hook_pushes);
			}
		}
		self.flush();
	}

	/// Delivers a server message on `topic`.
	#[instrument(skip(self, payload))]
	pub fn on_message(&mut self, topic: &str, event: &str, payload: Value) {
		let view_id = match topic.strip_prefix("lv:") {
			Some(view_id) => view_id,
			None => return warn!("Message on unknown topic"),
		};
		match find_view_tree(&mut self.roots, view_id) {
			Some(tree) => tree.handle_message(&mut self.rt, view_id, event, payload),
			None => debug!("Message for unknown view"),
		}
		self.flush();
	}

	/// The channel of `topic` crashed. It rejoins by itself, replying to the original join again.
	#[instrument(skip(self))]
	pub fn on_channel_error(&mut self, topic: &str, reason: &str) {
		if let Some(view_id) = topic.strip_prefix("lv:") {
			if let Some(tree) = find_view_tree(&mut self.roots, view_id) {
				tree.on_error(&mut self.rt, view_id, reason);
			}
		}
		self.flush();
	}

	#[instrument(skip(self))]
	pub fn on_channel_close(&mut self, topic: &str, reason: &str) {
		if let Some(view_id) = topic.strip_prefix("lv:") {
			if let Some(tree) = find_view_tree(&mut self.roots, view_id) {
				tree.on_close(&mut self.rt, view_id, reason);
			}
		}
		self.flush();
	}

	/// Delivers the result of a [`Navigation::fetch_document`].
	#[instrument(skip(self, html))]
	pub fn on_document_fetched(&mut self, fetch_id: FetchId, status: u16, html: &str) {
		let fetch = match self.fetches.remove(&fetch_id) {
			Some(fetch) => fetch,
			None => return warn!("Unknown fetch"),
		};
		if status != 200 {
			debug!(status, "Live navigation failed. Redirecting.");
			self.rt.redirect(&fetch.href, None);
			return;
		}

		let fragment = self.rt.document.parse_fragment(html);
		let el = self.rt.document.element_children(fragment).into_iter().next().filter(|&el| dom::is_phx_view(&self.rt.document, el));
		if let Some(el) = el {
			self.rt.document.detach(el);
		}
		self.rt.document.free(fragment);
		let el = match el {
			Some(el) => el,
			None => {
				debug!("Fetched document is not a view. Redirecting.");
				self.rt.redirect(&fetch.href, None);
				return;
			}
		};

		if let Some(root_id) = self.join_root_view(el, fetch.href.clone(), fetch.flash) {
			self.join_callbacks.insert(
				root_id,
				JoinCallback::ReplaceMain {
					href: fetch.href,
					link_ref: fetch.link_ref,
					old_el: fetch.old_el,
					then: fetch.then,
				},
			);
		}
		self.flush();
	}

	/// A click on or within `el`.
	///
	/// # Errors
	///
	/// Iff a `phx-target` can't be resolved.
	pub fn dispatch_click(&mut self, el: NodeId, meta: Map<String, Value>) -> Result<(), SocketError> {
		if !self.rt.transport.is_connected() {
			return Ok(());
		}
		let capture = self.rt.config.binding(PHX_CAPTURE_CLICK);
		let document = &self.rt.document;
		let capture_target = if document.has_attribute(el, &capture) {
			Some(el)
		} else {
			document.filter_elements(el, |document, node| document.has_attribute(node, &capture)).into_iter().next()
		};
		if let Some(target) = capture_target {
			self.push_bound_event("click", target, &capture, meta.clone())?;
		}

		let click = self.rt.config.binding(PHX_CLICK);
		if let Some(target) = dom::closest_phx_binding(&self.rt.document, el, &click, None, None) {
			self.push_bound_event("click", target, &click, meta)?;
		}
		self.flush();
		Ok(())
	}

	/// A key event on `el`. Falls back to `phx-window-*` bindings if `el` has none.
	///
	/// # Errors
	///
	/// Iff a `phx-target` can't be resolved.
	pub fn dispatch_key(&mut self, el: NodeId, kind: KeyEventKind, key: &str, mut meta: Map<String, Value>) -> Result<(), SocketError> {
		meta.insert("key".to_owned(), json!(key));
		self.dispatch_bound(kind.event(), el, meta, Some(key), true)
	}

	/// # Errors
	///
	/// Iff a `phx-target` can't be resolved.
	pub fn dispatch_focus(&mut self, el: NodeId) -> Result<(), SocketError> {
		self.dispatch_bound("focus", el, Map::new(), None, false)
	}

	/// # Errors
	///
	/// Iff a `phx-target` can't be resolved.
	pub fn dispatch_blur(&mut self, el: NodeId) -> Result<(), SocketError> {
		self.dispatch_bound("blur", el, Map::new(), None, false)
	}

	fn dispatch_bound(&mut self, event: &str, el: NodeId, meta: Map<String, Value>, key: Option<&str>, window_bindings: bool) -> Result<(), SocketError> {
		if !self.rt.transport.is_connected() {
			return Ok(());
		}
		let binding = self.rt.config.binding(event);
		let targets = if self.rt.document.attribute(el, &binding).map_or(false, |event| !event.is_empty()) {
			vec![(el, binding)]
		} else if window_bindings {
			let window_binding = self.rt.config.binding(&format!("window-{}", event));
			let document = &self.rt.document;
			document
				.filter_elements(document.root(), |document, node| document.has_attribute(node, &window_binding))
				.into_iter()
				.map(|node| (node, window_binding.clone()))
				.collect()
		} else {
			Vec::new()
		};

		let phx_key = self.rt.config.binding(PHX_KEY);
		for (target, binding) in targets {
			if let (Some(key), Some(match_key)) = (key, self.rt.document.attribute(target, &phx_key)) {
				if !match_key.eq_ignore_ascii_case(key) {
					continue;
				}
			}
			self.push_bound_event(event, target, &binding, meta.clone())?;
		}
		self.flush();
		Ok(())
	}

	fn push_bound_event(&mut self, kind: &str, target: NodeId, binding: &str, meta: Map<String, Value>) -> Result<(), SocketError> {
		let phx_event = match self.rt.document.attribute(target, binding) {
			Some(phx_event) if !phx_event.is_empty() => phx_event.to_owned(),
			_ => return Ok(()),
		};
		for owner in self.within_owners(target)? {
			if let Some(tree) = find_tree(&mut self.roots, &owner.root_id) {
				tree.push_event(&mut self.rt, &owner.view_id, kind, target, Some(owner.target_ctx), &phx_event, meta.clone());
			}
		}
		Ok(())
	}

	/// `input` changed.
	///
	/// # Errors
	///
	/// Iff the form's `phx-target` can't be resolved.
	pub fn dispatch_input(&mut self, input: NodeId) -> Result<(), SocketError> {
		let phx_change = self.rt.config.binding(PHX_CHANGE);
		let document = &self.rt.document;
		let form = dom::form_of(document, input);
		let phx_event = document
			.attribute(input, &phx_change)
			.filter(|event| !event.is_empty())
			.or_else(|| form.and_then(|form| document.attribute(form, &phx_change)))
			.filter(|event| !event.is_empty())
			.map(str::to_owned);
		let phx_event = match phx_event {
			Some(phx_event) => phx_event,
			None => return Ok(()),
		};
		let target_name = document.attribute(input, "name").unwrap_or_default().to_owned();

		for owner in self.within_owners(form.unwrap_or(input))? {
			if let Some(privates) = self.rt.document.privates_mut(input) {
				privates.has_focused = true;
			}
			if let Some(tree) = find_tree(&mut self.roots, &owner.root_id) {
				tree.push_input(&mut self.rt, &owner.view_id, input, Some(owner.target_ctx), &phx_event, &target_name, OnReply::Nothing);
			}
		}
		self.flush();
		Ok(())
	}

	/// `form` is being submitted. Returns whether it is handled here, in which case the host must prevent the native submit.
	///
	/// # Errors
	///
	/// Iff the form's `phx-target` can't be resolved.
	pub fn dispatch_submit(&mut self, form: NodeId) -> Result<bool, SocketError> {
		let phx_event = match self.rt.document.attribute(form, &self.rt.config.binding(PHX_SUBMIT)) {
			Some(phx_event) if !phx_event.is_empty() => phx_event.to_owned(),
			_ => return Ok(false),
		};
		for owner in self.within_owners(form)? {
			if let Some(tree) = find_tree(&mut self.roots, &owner.root_id) {
				tree.submit_form(&mut self.rt, &owner.view_id, form, Some(owner.target_ctx), &phx_event);
			}
		}
		self.flush();
		Ok(true)
	}

	/// A click on or within a live link. Returns whether it is handled here, in which case the host must prevent the default navigation.
	///
	/// # Errors
	///
	/// Iff the link type is neither `patch` nor `redirect`.
	pub fn dispatch_live_link(&mut self, el: NodeId) -> Result<bool, SocketError> {
		let document = &self.rt.document;
		let target = match dom::closest_phx_binding(document, el, PHX_LIVE_LINK, None, None) {
			Some(target) => target,
			None => return Ok(false),
		};
		let kind = document.attribute(target, PHX_LIVE_LINK).unwrap_or_default().to_owned();
		if kind.is_empty() || !self.rt.transport.is_connected() || self.rt.main.is_none() {
			return Ok(false);
		}
		let href = document.attribute(target, "href").unwrap_or_default();
		let href = match Url::parse(&self.rt.navigation.href()).and_then(|base| base.join(href)) {
			Ok(url) => String::from(url),
			Err(_) => href.to_owned(),
		};
		let link_state = HistoryKind::parse(document.attribute(target, PHX_LINK_STATE));
		if self.rt.pending_link.as_deref() == Some(href.as_str()) {
			return Ok(true);
		}
		match kind.as_str() {
			"patch" => self.push_history_patch(&href, link_state, Some(target)),
			"redirect" => self.history_redirect(href, link_state, None),
			_ => return Err(SocketError::InvalidLinkType(kind)),
		}
		self.flush();
		Ok(true)
	}

	/// The user navigated through the session history to `href`.
	#[instrument(skip(self))]
	pub fn dispatch_popstate(&mut self, href: &str, state: Option<HistoryEntry>) {
		if !self.rt.navigation.current_location_changed(href) {
			return;
		}
		let main = self.rt.main.clone();
		let main_is_connected = main.as_deref().and_then(|main| self.view(main)).map_or(false, |main| !main.is_join_pending() && self.rt.transport.is_connected());
		let is_main_patch = matches!((&state, &main), (Some(HistoryEntry { kind: HistoryEntryType::Patch, id, .. }), Some(main)) if id == main);
		match main {
			Some(main) if main_is_connected && is_main_patch => {
				if let Some(tree) = find_view_tree(&mut self.roots, &main) {
					tree.push_link_patch(&mut self.rt, &main, href, None, AfterNavigation::Nothing);
				}
			}
			_ => {
				let then = if state.map_or(false, |state| state.root) { AfterNavigation::ReplaceRootHistory } else { AfterNavigation::Nothing };
				self.replace_main(href.to_owned(), None, then, None);
			}
		}
		self.flush();
	}

	/// Pushes `event` to view `view_id` as if a hook had, or to the owner(s) of `target`.
	///
	/// # Errors
	///
	/// Iff the view doesn't exist or `target` can't be resolved.
	pub fn push_hook_event(&mut self, view_id: &str, target: Option<&str>, event: &str, payload: Value) -> Result<(), SocketError> {
		self.deliver_hook_push(HookPush {
			view_id: view_id.to_owned(),
			target: target.map(str::to_owned),
			event: event.to_owned(),
			payload,
		})?;
		self.flush();
		Ok(())
	}

	fn deliver_hook_push(&mut self, push: HookPush) -> Result<(), SocketError> {
		match &push.target {
			None => {
				let tree = find_view_tree(&mut self.roots, &push.view_id).ok_or_else(|| SocketError::UnknownView(push.view_id.clone()))?;
				tree.push_hook_event(&mut self.rt, &push.view_id, None, &push.event, push.payload);
			}
			Some(target) => {
				for owner in self.within_targets(Some(&push.view_id), None, target)? {
					if let Some(tree) = find_tree(&mut self.roots, &owner.root_id) {
						tree.push_hook_event(&mut self.rt, &owner.view_id, Some(owner.target_ctx), &push.event, push.payload.clone());
					}
				}
			}
		}
		Ok(())
	}

	fn owner(&self, el: NodeId) -> Option<(String, String)> {
		let document = &self.rt.document;
		let view_el = dom::closest_view(document, el)?;
		let view_id = document.id_of(view_el)?;
		let tree = match document.attribute(view_el, PHX_ROOT_ID) {
			Some(root_id) => self.roots.iter().find(|tree| tree.root_id() == root_id),
			None => self.roots.iter().find(|tree| tree.view(view_id).is_some()),
		}?;
		tree.view(view_id).map(|view| (tree.root_id().to_owned(), view.id().to_owned()))
	}

	fn within_owners(&self, el: NodeId) -> Result<Vec<Owner>, SocketError> {
		match self.rt.document.attribute(el, &self.rt.config.binding(PHX_TARGET)) {
			Some(target) if !target.is_empty() => self.within_targets(None, Some(el), target),
			_ => {
				let (root_id, view_id) = self.owner(el).ok_or_else(|| SocketError::NoOwner(format!("{:?}", el)))?;
				Ok(vec![Owner { root_id, view_id, target_ctx: el }])
			}
		}
	}

	/// A component id targets `el`'s (or `view_id`'s) component, anything else is a selector over the whole document.
	fn within_targets(&self, view_id: Option<&str>, el: Option<NodeId>, target: &str) -> Result<Vec<Owner>, SocketError> {
		let document = &self.rt.document;
		let targets = if let Ok(cid) = target.parse::<Cid>() {
			let view_el = view_id.and_then(|view_id| self.view(view_id)).and_then(View::el);
			let target_el = el.or_else(|| view_el.and_then(|view_el| dom::find_first_component_node(document, view_el, cid)));
			vec![target_el.ok_or_else(|| SocketError::TargetNotFound(target.to_owned()))?]
		} else {
			let selector = Selector::parse(target)?;
			let targets = document.query_all(document.root(), &selector);
			if targets.is_empty() {
				return Err(SocketError::TargetNotFound(target.to_owned()));
			}
			targets
		};
		Ok(targets
			.into_iter()
			.filter_map(|target_ctx| self.owner(target_ctx).map(|(root_id, view_id)| Owner { root_id, view_id, target_ctx }))
			.collect())
	}

	fn push_history_patch(&mut self, href: &str, kind: HistoryKind, target_el: Option<NodeId>) {
		let main = match self.rt.main.clone() {
			Some(main) => main,
			None => return,
		};
		self.rt.navigation.page_loading(PageLoading::Start { kind: PageLoadingKind::Patch, to: Some(href.to_owned()) });
		if let Some(tree) = find_view_tree(&mut self.roots, &main) {
			tree.push_link_patch(&mut self.rt, &main, href, target_el, AfterNavigation::HistoryPatch(kind));
		}
	}

	fn history_patch(&mut self, href: &str, kind: HistoryKind) {
		let link_ref = self.rt.set_pending_link(href);
		if !self.rt.commit_pending_link(link_ref) {
			return;
		}
		if let Some(main) = self.rt.main.clone() {
			self.rt.navigation.push_history_entry(kind, HistoryEntry { kind: HistoryEntryType::Patch, id: main, root: false }, Some(href));
		}
		self.rt.navigation.current_location_changed(href);
	}

	fn history_redirect(&mut self, href: String, kind: HistoryKind, flash: Option<String>) {
		self.rt.navigation.page_loading(PageLoading::Start { kind: PageLoadingKind::Redirect, to: Some(href.clone()) });
		self.replace_main(href, flash, AfterNavigation::HistoryRedirect(kind), None);
	}

	/// Tears down the main view and fetches `href` to join in its place.
	#[instrument(skip(self))]
	fn replace_main(&mut self, href: String, flash: Option<String>, then: AfterNavigation, link_ref: Option<u64>) {
		let link_ref = link_ref.unwrap_or_else(|| self.rt.set_pending_link(&href));
		let main = self.rt.main.clone();
		let old_el = match main.as_deref().and_then(|main| self.view(main)).and_then(View::el) {
			Some(old_el) => old_el,
			None => {
				warn!("No main view to replace. Redirecting.");
				return self.rt.redirect(&href, flash.as_deref());
			}
		};
		if let Some(main) = main {
			if let Some(tree) = find_tree(&mut self.roots, &main) {
				tree.show_loader(&mut self.rt, &main);
				tree.destroy(&mut self.rt, &main);
			}
		}
		let fetch_id = self.rt.navigation.fetch_document(&href);
		self.fetches.insert(fetch_id, PendingFetch { href, flash, then, link_ref, old_el });
	}

	fn after_navigation(&mut self, href: &str, then: AfterNavigation) {
		let main = self.rt.main.clone().unwrap_or_default();
		match then {
			AfterNavigation::Nothing => (),
			AfterNavigation::HistoryPatch(kind) => {
				self.history_patch(href, kind);
				self.rt.navigation.page_loading(PageLoading::Stop { kind: PageLoadingKind::Patch, to: Some(href.to_owned()) });
			}
			AfterNavigation::HistoryRedirect(kind) => {
				self.rt.navigation.push_history_entry(kind, HistoryEntry { kind: HistoryEntryType::Redirect, id: main, root: false }, Some(href));
				self.rt.navigation.current_location_changed(href);
				self.rt.navigation.page_loading(PageLoading::Stop { kind: PageLoadingKind::Redirect, to: Some(href.to_owned()) });
			}
			AfterNavigation::ReplaceRootHistory => {
				self.rt.navigation.push_history_entry(HistoryKind::Replace, HistoryEntry { kind: HistoryEntryType::Patch, id: main, root: true }, None);
			}
		}
	}

	fn on_root_joined(&mut self, root_id: &str, join_count: u32) {
		if join_count != 1 {
			return;
		}
		let JoinCallback::ReplaceMain { href, link_ref, old_el, then } = match self.join_callbacks.remove(root_id) {
			Some(callback) => callback,
			None => return,
		};
		if !self.rt.commit_pending_link(link_ref) {
			if let Some(tree) = find_tree(&mut self.roots, root_id) {
				tree.destroy(&mut self.rt, root_id);
			}
			return;
		}
		let new_el = match self.view(root_id).and_then(View::el) {
			Some(new_el) => new_el,
			None => return error!(root_id, "New main view has no element"),
		};
		if self.rt.document.parent(old_el).is_some() {
			self.rt.document.replace_with(old_el, new_el);
			self.rt.document.free(old_el);
		} else {
			error!("The previous main view element is gone. The new one stays detached.");
		}
		self.rt.main = Some(root_id.to_owned());
		self.after_navigation(&href, then);
		self.apply_all_pending_updates();
	}

	/// Updates deferred by a navigation wait for it to complete.
	fn apply_all_pending_updates(&mut self) {
		for tree in &mut self.roots {
			tree.apply_all_pending_updates(&mut self.rt);
		}
	}

	fn apply(&mut self, op: SocketOp) {
		trace!(?op, "Applying");
		match op {
			SocketOp::Redirect { to, flash } => self.rt.redirect(&to, flash.as_deref()),
			SocketOp::LivePatch { to, kind } => self.history_patch(&to, kind),
			SocketOp::LiveRedirect { to, kind, flash } => self.history_redirect(to, kind, flash),
			SocketOp::RootJoined { root_id, join_count } => self.on_root_joined(&root_id, join_count),
			SocketOp::ReplaceMain { href, flash, then, link_ref } => self.replace_main(href, flash, then, link_ref),
			SocketOp::LinkPatched { href, then } => {
				self.after_navigation(&href, then);
				self.apply_all_pending_updates();
			}
			SocketOp::ResumeUpdates { root_id, view_id } => {
				if let Some(tree) = find_tree(&mut self.roots, &root_id) {
					tree.apply_pending_updates(&mut self.rt, &view_id);
				}
			}
		}
	}

	/// Runs everything queued by the last entry point, until nothing is left.
	fn flush(&mut self) {
		loop {
			let pushes = mem::take(&mut self.rt.hook_pushes);
			let ops = mem::take(&mut self.rt.ops);
			if pushes.is_empty() && ops.is_empty() {
				break;
			}
			for push in pushes {
				if let Err(error) = self.deliver_hook_push(push) {
					error!("Hook push failed: {}", error);
				}
			}
			for op in ops {
				self.apply(op);
			}
		}
		self.roots.retain(|tree| !tree.is_empty());
	}
}
