//! A root view and its nested views, joined and patched as one.
//!
//! On the first join, nested views discovered in the root's markup are joined too, and no join
//! patch is applied before every view of the tree has joined. Their patches are then applied
//! parent first. Later joins (after reconnecting) apply right away.

use crate::{
	consts::{
		CONSECUTIVE_RELOADS, PHX_AUTO_RECOVER, PHX_CHANGE, PHX_CONNECTED_CLASS, PHX_DISABLED, PHX_DISABLE_WITH, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS, PHX_HOOK, PHX_PAGE_LOADING, PHX_READONLY, PHX_ROOT_ID, PHX_SESSION, PHX_STATIC, PHX_UPDATE,
	},
	document::{Document, NodeId},
	dom,
	hook::{self, HookEvent, HookPush, HookRegistry, ViewHook},
	patch::{self, BusyRef, DomPatch, PatchListener},
	rendered::{Cid, Diff, RenderTree},
	socket::{AfterNavigation, OnReply, Pending, PushContext, Runtime, SocketOp},
	transport::{HistoryKind, PageLoading, PageLoadingKind, Reply},
	view::{PendingUpdate, View},
	Config,
};
use core::mem;
use hashbrown::{HashMap, HashSet};
use serde_json::{json, Map, Value};
use tracing::{debug, error, instrument, trace, warn};

/// A join patch waiting for the rest of the tree to join.
#[derive(Debug)]
struct JoinPatch {
	view_id: String,
	live_patch: Option<Value>,
	html: String,
}

#[derive(Debug)]
pub(crate) struct SessionTree {
	root_id: String,
	views: HashMap<String, View>,
	/// Child view ids by parent view id, in join order.
	children: HashMap<String, Vec<String>>,
	join_patches: Vec<JoinPatch>,
}

impl SessionTree {
	pub fn new(root: View) -> Self {
		let root_id = root.id().to_owned();
		let mut views = HashMap::new();
		views.insert(root_id.clone(), root);
		Self {
			root_id,
			views,
			children: HashMap::new(),
			join_patches: Vec::new(),
		}
	}

	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	pub fn view(&self, view_id: &str) -> Option<&View> {
		self.views.get(view_id)
	}

	pub fn views(&self) -> impl Iterator<Item = &View> {
		self.views.values()
	}

	/// Whether the root view is gone.
	pub fn is_empty(&self) -> bool {
		!self.views.contains_key(&self.root_id)
	}

	/// Whether `view_id` or any of its ancestors is still joining.
	fn is_join_pending(&self, view_id: &str) -> bool {
		let mut current = self.views.get(view_id);
		while let Some(view) = current {
			if view.join_pending {
				return true;
			}
			current = view.parent_id.as_deref().and_then(|parent_id| self.views.get(parent_id));
		}
		false
	}

	fn trigger_all(&mut self, rt: &mut Runtime, view_id: &str, event: HookEvent) {
		if let Some(view) = self.views.get_mut(view_id) {
			hook::trigger_all(&mut view.hooks, event, &rt.document, (&view.id, &view.name), &mut rt.hook_pushes);
		}
	}

	pub fn show_loader(&mut self, rt: &mut Runtime, view_id: &str) {
		self.trigger_all(rt, view_id, HookEvent::Disconnected);
		if let Some(view) = self.views.get(view_id) {
			view.set_container_classes(&mut rt.document, &[PHX_DISCONNECTED_CLASS]);
		}
	}

	fn hide_loader(&self, rt: &mut Runtime, view_id: &str) {
		if let Some(view) = self.views.get(view_id) {
			view.set_container_classes(&mut rt.document, &[PHX_CONNECTED_CLASS]);
		}
	}

	/// Sends the join of `view_id`.
	#[instrument(skip(self, rt))]
	pub fn join(&mut self, rt: &mut Runtime, view_id: &str) {
		let root_id = self.root_id.clone();
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		if view.is_root() {
			let to = view.href.clone();
			rt.navigation.page_loading(PageLoading::Start { kind: PageLoadingKind::Initial, to: to.clone() });
			view.stop_loading = Some(PageLoading::Stop { kind: PageLoadingKind::Initial, to });
		}
		view.set_container_classes(&mut rt.document, &[PHX_DISCONNECTED_CLASS]);

		let params = view.join_params(&rt.document, &rt.config);
		let push_id = rt.transport.join(&view.topic(), params);
		view.join_push = Some(push_id);
		rt.pending.insert(push_id, Pending::Join { root_id, view_id: view_id.to_owned() });
		debug!("Joining");
	}

	pub fn on_join_reply(&mut self, rt: &mut Runtime, view_id: &str, reply: Reply) {
		match reply {
			Reply::Ok(response) => self.on_join(rt, view_id, &response),
			Reply::Error(response) => self.on_join_error(rt, view_id, &response),
			Reply::Timeout => self.on_join_error(rt, view_id, &json!({ "reason": "timeout" })),
		}
	}

	#[instrument(skip(self, rt, response))]
	fn on_join(&mut self, rt: &mut Runtime, view_id: &str, response: &Value) {
		let diff = match response.get("rendered").map(Diff::from_json) {
			Some(Ok(diff)) => diff,
			Some(Err(error)) => {
				error!("Invalid join rendering: {}", error);
				return self.on_join_error(rt, view_id, response);
			}
			None => {
				error!("Join reply without rendering");
				return self.on_join_error(rt, view_id, response);
			}
		};
		let live_patch = response.get("live_patch").filter(|live_patch| !live_patch.is_null()).cloned();

		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		view.join_count += 1;
		view.child_joins = 0;
		view.join_pending = true;
		view.flash = None;
		debug!(join_count = view.join_count, "Joined");

		if let Some(title) = diff.title() {
			rt.document.put_title(title);
		}
		rt.storage.remove_local(&view.name, CONSECUTIVE_RELOADS);
		view.rendered = Some(RenderTree::new(&view.id, &diff));
		let html = view.render_container(&rt.document, None).unwrap_or_default();
		view.drop_pending_refs(&mut rt.document);

		let forms = view.forms_for_recovery(&rt.document, &html, &rt.config);
		if forms.is_empty() {
			return self.on_join_complete(rt, view_id, live_patch, html);
		}
		debug!(count = forms.len(), "Recovering forms");
		let mut completion = Some(OnReply::CompleteJoin { live_patch, html });
		let last = forms.len() - 1;
		for (i, form) in forms.into_iter().enumerate() {
			let then = if i == last { completion.take().unwrap_or(OnReply::Nothing) } else { OnReply::Nothing };
			self.push_form_recovery(rt, view_id, form, then);
		}
	}

	fn on_join_error(&mut self, rt: &mut Runtime, view_id: &str, response: &Value) {
		let view = match self.views.get(view_id) {
			Some(view) => view,
			None => return,
		};
		if response.get("redirect").map_or(false, |redirect| !redirect.is_null()) || response.get("live_redirect").map_or(false, |redirect| !redirect.is_null()) {
			rt.transport.leave(&view.topic());
		}
		if let Some(redirect) = response.get("redirect").filter(|redirect| !redirect.is_null()) {
			return Self::on_redirect(rt, redirect);
		}
		if let Some(redirect) = response.get("live_redirect").filter(|redirect| !redirect.is_null()) {
			return Self::on_live_redirect(rt, redirect);
		}
		let reason = response.get("reason").cloned().unwrap_or_default();
		warn!(view_id, %reason, "Unable to join");
		let name = view.name.clone();
		rt.reload_with_jitter(&name);
	}

	fn on_join_complete(&mut self, rt: &mut Runtime, view_id: &str, live_patch: Option<Value>, html: String) {
		let (join_count, parent_id, el) = match self.views.get(view_id) {
			Some(view) => (view.join_count, view.parent_id.clone(), view.el),
			None => return,
		};
		let parent_ready = parent_id.as_deref().and_then(|parent_id| self.views.get(parent_id)).map_or(false, |parent| !parent.join_pending);
		if join_count > 1 || parent_ready {
			return self.apply_join_patch(rt, view_id, live_patch, html);
		}

		// Nested views are only known from the markup at this point.
		let mut template = Document::new();
		let fragment = template.parse_fragment(&html);
		let mut new_children = false;
		for child_el in dom::find_phx_children(&template, fragment, view_id) {
			let child = View::from_element(&template, child_el, Some(&self.root_id), self.views.get(view_id), None, None);
			if let Some(mut child) = child {
				child.el = None;
				let existing_static = el
					.and_then(|el| rt.document.element_by_id_within(el, child.id()))
					.and_then(|existing| rt.document.attribute(existing, PHX_STATIC))
					.filter(|token| !token.is_empty());
				if let Some(token) = existing_static {
					child.inherit_static(token.to_owned());
				}
				new_children |= self.join_child(rt, view_id, child);
			}
		}

		let join_patch = JoinPatch { view_id: view_id.to_owned(), live_patch, html };
		if new_children {
			self.join_patches.push(join_patch);
			return;
		}
		match parent_id {
			Some(parent_id) => {
				self.join_patches.push(join_patch);
				self.ack_join(rt, &parent_id);
			}
			None => {
				self.on_all_child_joins_complete(rt);
				self.apply_join_patch(rt, view_id, join_patch.live_patch, join_patch.html);
			}
		}
	}

	/// Registers and joins `child`, unless a view with its id exists already.
	fn join_child(&mut self, rt: &mut Runtime, parent_id: &str, child: View) -> bool {
		if self.views.contains_key(child.id()) {
			return false;
		}
		let child_id = child.id().to_owned();
		self.children.entry(parent_id.to_owned()).or_default().push(child_id.clone());
		self.views.insert(child_id.clone(), child);
		self.join(rt, &child_id);
		if let Some(parent) = self.views.get_mut(parent_id) {
			parent.child_joins += 1;
		}
		true
	}

	fn ack_join(&mut self, rt: &mut Runtime, view_id: &str) {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		view.child_joins = view.child_joins.saturating_sub(1);
		if view.child_joins > 0 {
			return;
		}
		match view.parent_id.clone() {
			Some(parent_id) => self.ack_join(rt, &parent_id),
			None => self.on_all_child_joins_complete(rt),
		}
	}

	fn on_all_child_joins_complete(&mut self, rt: &mut Runtime) {
		let join_count = self.views.get(&self.root_id).map_or(0, |root| root.join_count);
		trace!(root_id = %self.root_id, join_count, "All views joined");
		rt.ops.push(SocketOp::RootJoined { root_id: self.root_id.clone(), join_count });
		for join_patch in mem::take(&mut self.join_patches) {
			if self.views.get(&join_patch.view_id).map_or(false, |view| !view.destroyed) {
				self.apply_join_patch(rt, &join_patch.view_id, join_patch.live_patch, join_patch.html);
			}
		}
	}

	fn dom_patch(&self, rt: &Runtime, view_id: &str, el: NodeId, html: String, target_cid: Option<Cid>, patch_ref: Option<BusyRef>) -> DomPatch {
		DomPatch::new(view_id, &self.root_id, el, html, target_cid, patch_ref)
			.binding_prefix(&rt.config.binding_prefix)
			.debug(rt.config.debug)
	}

	#[instrument(skip(self, rt, live_patch, html))]
	fn apply_join_patch(&mut self, rt: &mut Runtime, view_id: &str, live_patch: Option<Value>, html: String) {
		let root_el = self.views.get(&self.root_id).and_then(View::el);
		let (el, join_count) = {
			let view = match self.views.get_mut(view_id) {
				Some(view) => view,
				None => return,
			};
			if !view.is_root() {
				view.el = root_el
					.and_then(|root_el| rt.document.element_by_id_within(root_el, &view.id))
					.or_else(|| rt.document.element_by_id(&view.id));
			}
			match view.el {
				Some(el) => {
					view.join_pending = false;
					(el, view.join_count)
				}
				None => return error!("View element is missing from the document"),
			}
		};
		rt.document.set_attribute(el, PHX_ROOT_ID, &self.root_id);

		let patch = self.dom_patch(rt, view_id, el, html, None, None);
		patch.mark_prunable_content_for_removal(&mut rt.document);
		self.perform_patch(rt, view_id, &patch);
		self.join_new_children(rt, view_id);
		self.mount_hooks(rt, view_id, el);
		self.apply_pending_updates(rt, view_id);

		if let Some(live_patch) = live_patch {
			self.on_live_patch(rt, view_id, &live_patch);
		}
		self.hide_loader(rt, view_id);
		if join_count > 1 {
			self.trigger_all(rt, view_id, HookEvent::Reconnected);
		}
		if let Some(stop) = self.views.get_mut(view_id).and_then(|view| view.stop_loading.take()) {
			rt.navigation.page_loading(stop);
		}
	}

	fn mount_hooks(&mut self, rt: &mut Runtime, view_id: &str, el: NodeId) {
		let phx_hook = rt.config.binding(PHX_HOOK);
		let hooked = rt.document.filter_elements(el, |document, node| document.has_attribute(node, &phx_hook));
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		let mut tracker = PatchTracker::new(view, &rt.hooks, &mut rt.next_hook_id, &mut rt.hook_pushes, &rt.config);
		for node in hooked {
			tracker.mount(&mut rt.document, node);
		}
	}

	/// Joins placeholders in the view's element that aren't tracked yet.
	fn join_new_children(&mut self, rt: &mut Runtime, view_id: &str) {
		let el = match self.views.get(view_id).and_then(View::el) {
			Some(el) => el,
			None => return,
		};
		for child_el in dom::find_phx_children(&rt.document, el, view_id) {
			let child = View::from_element(&rt.document, child_el, Some(&self.root_id), self.views.get(view_id), None, None);
			if let Some(child) = child {
				self.join_child(rt, view_id, child);
			}
		}
	}

	/// Returns whether nested view placeholders were added.
	fn perform_patch(&mut self, rt: &mut Runtime, view_id: &str, patch: &DomPatch) -> bool {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return false,
		};
		let mut tracker = PatchTracker::new(view, &rt.hooks, &mut rt.next_hook_id, &mut rt.hook_pushes, &rt.config);
		patch.perform(&mut rt.document, &mut tracker);
		let PatchTracker {
			children_added,
			destroyed_cids,
			discarded_sessions,
			..
		} = tracker;

		for session in discarded_sessions {
			self.destroy(rt, &session);
		}
		self.maybe_push_components_destroyed(rt, view_id, destroyed_cids);
		children_added
	}

	/// Replays the view's deferred diffs and messages in arrival order.
	///
	/// Stops after an update that queued a socket op, so that the op (a navigation, say) takes effect before the rest.
	pub fn apply_pending_updates(&mut self, rt: &mut Runtime, view_id: &str) {
		if self.is_join_pending(view_id) {
			return;
		}
		let mut updates = match self.views.get_mut(view_id) {
			Some(view) => mem::take(&mut view.pending_updates),
			None => return,
		}
		.into_iter();
		while let Some(update) = updates.next() {
			let ops = rt.ops.len();
			match update {
				PendingUpdate::Diff { diff, cid, busy_ref } => self.update(rt, view_id, diff, cid, busy_ref),
				PendingUpdate::Message { event, payload } => self.handle_message(rt, view_id, &event, payload),
			}
			if rt.ops.len() > ops && !updates.as_slice().is_empty() {
				if let Some(view) = self.views.get_mut(view_id) {
					trace!(remaining = updates.len(), "Applying socket ops before the remaining updates");
					view.pending_updates.extend(updates);
					rt.ops.push(SocketOp::ResumeUpdates { root_id: self.root_id.clone(), view_id: view_id.to_owned() });
				}
				return;
			}
		}
	}

	/// Replays deferred updates of every view, parents first.
	pub fn apply_all_pending_updates(&mut self, rt: &mut Runtime) {
		let mut queue = vec![self.root_id.clone()];
		while let Some(view_id) = queue.pop() {
			self.apply_pending_updates(rt, &view_id);
			queue.extend(self.children.get(&view_id).into_iter().flatten().rev().cloned());
		}
	}

	/// Merges `diff` and patches the view.
	///
	/// `cid_ack` restricts the patch to that component, as for the reply to an event pushed to it.
	#[instrument(skip(self, rt, diff))]
	pub fn update(&mut self, rt: &mut Runtime, view_id: &str, diff: Diff, cid_ack: Option<Cid>, busy_ref: Option<BusyRef>) {
		if diff.is_empty() && busy_ref.is_none() {
			return;
		}
		if let Some(title) = diff.title() {
			rt.document.put_title(title);
		}
		let has_queued = self.views.get(view_id).map_or(false, |view| !view.pending_updates.is_empty());
		if has_queued || self.is_join_pending(view_id) || rt.pending_link.is_some() {
			if let Some(view) = self.views.get_mut(view_id) {
				trace!("Deferring update");
				view.pending_updates.push(PendingUpdate::Diff { diff, cid: cid_ack, busy_ref });
			}
			return;
		}

		let el = {
			let view = match self.views.get_mut(view_id) {
				Some(view) => view,
				None => return,
			};
			match (view.el, view.rendered.as_mut()) {
				(Some(el), Some(rendered)) => {
					rendered.merge(&diff);
					el
				}
				_ => return warn!("Can't update a view that hasn't joined"),
			}
		};

		let is_changed = |cid: Cid| diff.component(cid).map_or(false, |component| !component.is_empty());
		let mut children_added = false;
		if let Some(cid) = cid_ack {
			if is_changed(cid) {
				children_added = self.component_patch(rt, view_id, el, cid, busy_ref);
			}
		} else if diff.is_component_only() {
			for cid in dom::find_parent_cids(&rt.document, el, &diff.component_cids()) {
				if is_changed(cid) {
					children_added |= self.component_patch(rt, view_id, el, cid, busy_ref);
				}
			}
		} else if !diff.is_empty() {
			let only_cids = diff.component_cids().into_iter().collect::<HashSet<_>>();
			let html = self.views.get(view_id).and_then(|view| view.render_container(&rt.document, Some(&only_cids)));
			if let Some(html) = html {
				let patch = self.dom_patch(rt, view_id, el, html, None, busy_ref);
				children_added = self.perform_patch(rt, view_id, &patch);
			}
		}

		if rt.document.contains_node(el) {
			patch::undo_refs(&mut rt.document, busy_ref, el);
		}
		if children_added {
			self.join_new_children(rt, view_id);
		}
	}

	fn component_patch(&mut self, rt: &mut Runtime, view_id: &str, el: NodeId, cid: Cid, busy_ref: Option<BusyRef>) -> bool {
		let view = match self.views.get(view_id) {
			Some(view) => view,
			None => return false,
		};
		let patch = match view.rendered() {
			Some(rendered) if rendered.occurrences(cid) > 1 => {
				trace!(cid, "Component is rendered more than once. Patching the view with only it.");
				let only_cids = [cid].into_iter().collect::<HashSet<_>>();
				match view.render_container(&rt.document, Some(&only_cids)) {
					Some(html) => self.dom_patch(rt, view_id, el, html, None, busy_ref),
					None => return false,
				}
			}
			Some(rendered) => self.dom_patch(rt, view_id, el, rendered.component_to_html(cid), Some(cid), busy_ref),
			None => return false,
		};
		self.perform_patch(rt, view_id, &patch)
	}

	/// Reports components with no elements left. Each is reported once until the server acknowledges it.
	fn maybe_push_components_destroyed(&mut self, rt: &mut Runtime, view_id: &str, destroyed_cids: Vec<Cid>) {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		let el = match view.el {
			Some(el) => el,
			None => return,
		};
		let cids = destroyed_cids
			.into_iter()
			.filter(|&cid| !view.cids_being_destroyed.contains(&cid) && dom::find_component_nodes(&rt.document, el, cid).is_empty())
			.collect::<Vec<_>>();
		if cids.is_empty() {
			return;
		}
		debug!(?cids, "Components destroyed");
		view.cids_being_destroyed.extend(cids.iter().copied());
		self.push_with_reply(rt, view_id, None, "cids_destroyed", json!({ "cids": cids }), None, OnReply::PruneCids(cids));
	}

	/// Pushes `event` on the view's channel. `busy` is the action ref and the first element it was put on.
	#[allow(clippy::too_many_arguments)]
	fn push_with_reply(&mut self, rt: &mut Runtime, view_id: &str, busy: Option<(BusyRef, NodeId)>, event: &str, mut payload: Value, cid: Option<Cid>, then: OnReply) {
		let view = match self.views.get(view_id) {
			Some(view) => view,
			None => return,
		};
		let mut loading = None;
		if let Some((_, el)) = busy {
			if rt.document.has_attribute(el, &rt.config.binding(PHX_PAGE_LOADING)) {
				rt.navigation.page_loading(PageLoading::Start { kind: PageLoadingKind::Element, to: None });
				loading = Some(PageLoading::Stop { kind: PageLoadingKind::Element, to: None });
			}
		}
		if let (Some(cid), Value::Object(payload)) = (cid, &mut payload) {
			payload.insert("cid".to_owned(), json!(cid));
		}
		if cfg!(feature = "dangerous-logging") {
			trace!(%payload, "Pushing {}", event);
		}
		let push_id = rt.transport.push(&view.topic(), event, payload, rt.config.push_timeout_ms);
		rt.pending.insert(
			push_id,
			Pending::Push(PushContext {
				root_id: self.root_id.clone(),
				view_id: view_id.to_owned(),
				cid,
				busy_ref: busy.map(|(busy_ref, _)| busy_ref),
				loading,
				then,
			}),
		);
	}

	#[instrument(skip(self, rt, push, reply), fields(view_id = %push.view_id))]
	pub fn on_push_reply(&mut self, rt: &mut Runtime, push: PushContext, reply: Reply) {
		let PushContext { view_id, cid, busy_ref, loading, then, .. } = push;
		if !self.views.contains_key(&view_id) {
			return trace!("Reply for a destroyed view");
		}
		match reply {
			Reply::Ok(response) => {
				let diff = response.get("diff").filter(|diff| !diff.is_null());
				if diff.is_some() || busy_ref.is_some() {
					match diff.map_or_else(|| Ok(Diff::default()), Diff::from_json) {
						Ok(diff) => self.update(rt, &view_id, diff, cid, busy_ref),
						Err(error) => error!("Invalid diff in reply: {}", error),
					}
				}
				if let Some(redirect) = response.get("redirect").filter(|value| !value.is_null()) {
					Self::on_redirect(rt, redirect);
				}
				if let Some(live_patch) = response.get("live_patch").filter(|value| !value.is_null()) {
					self.on_live_patch(rt, &view_id, live_patch);
				}
				if let Some(live_redirect) = response.get("live_redirect").filter(|value| !value.is_null()) {
					Self::on_live_redirect(rt, live_redirect);
				}
				if let Some(loading) = loading {
					rt.navigation.page_loading(loading);
				}
				self.on_reply(rt, &view_id, then, &response);
			}
			Reply::Error(response) => {
				let reason = response.get("reason").cloned().unwrap_or_default();
				warn!(%reason, "Push failed");
				if let Some(loading) = loading {
					rt.navigation.page_loading(loading);
				}
				self.on_failed_reply(rt, &view_id, then);
			}
			Reply::Timeout => {
				warn!("Push timed out");
				if let Some(loading) = loading {
					rt.navigation.page_loading(loading);
				}
				if busy_ref.is_some() || matches!(then, OnReply::LinkPatch { .. }) {
					let href = rt.navigation.href();
					return rt.redirect(&href, None);
				}
				self.on_failed_reply(rt, &view_id, then);
			}
		}
	}

	fn on_reply(&mut self, rt: &mut Runtime, view_id: &str, then: OnReply, response: &Value) {
		match then {
			OnReply::Nothing => (),
			OnReply::RestoreFocus => rt.restore_previously_active_focus(),
			OnReply::CompleteJoin { live_patch, html } => self.on_join_complete(rt, view_id, live_patch, html),
			OnReply::LinkPatch { href, link_ref, then } => {
				if response.get("link_redirect").map_or(false, |redirect| redirect.as_bool().unwrap_or(!redirect.is_null())) {
					rt.ops.push(SocketOp::ReplaceMain { href, flash: None, then, link_ref: Some(link_ref) });
				} else if rt.commit_pending_link(link_ref) {
					if let Some(view) = self.views.get_mut(view_id) {
						view.href = Some(href.clone());
					}
					self.apply_pending_updates(rt, view_id);
					self.hide_loader(rt, view_id);
					self.trigger_all(rt, view_id, HookEvent::Reconnected);
					rt.ops.push(SocketOp::LinkPatched { href, then });
				}
			}
			OnReply::PruneCids(cids) => {
				if let Some(view) = self.views.get_mut(view_id) {
					for cid in &cids {
						view.cids_being_destroyed.remove(cid);
					}
					if let Some(rendered) = &mut view.rendered {
						rendered.prune_cids(&cids);
					}
				}
			}
		}
	}

	fn on_failed_reply(&mut self, rt: &mut Runtime, view_id: &str, then: OnReply) {
		match then {
			OnReply::CompleteJoin { live_patch, html } => {
				warn!("Form recovery failed. Completing the join regardless.");
				self.on_join_complete(rt, view_id, live_patch, html);
			}
			OnReply::PruneCids(cids) => {
				if let Some(view) = self.views.get_mut(view_id) {
					for cid in &cids {
						view.cids_being_destroyed.remove(cid);
					}
				}
			}
			OnReply::Nothing | OnReply::RestoreFocus | OnReply::LinkPatch { .. } => (),
		}
	}

	/// Handles a server message. Messages other than diffs wait for the view to join and for earlier deferred updates.
	#[instrument(skip(self, rt, payload))]
	pub fn handle_message(&mut self, rt: &mut Runtime, view_id: &str, event: &str, payload: Value) {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		if (view.join_pending || !view.pending_updates.is_empty()) && event != "diff" {
			trace!("Deferring message");
			view.pending_updates.push(PendingUpdate::Message { event: event.to_owned(), payload });
			return;
		}
		match event {
			"diff" => match Diff::from_json(&payload) {
				Ok(diff) => self.update(rt, view_id, diff, None, None),
				Err(error) => error!("Invalid diff: {}", error),
			},
			"redirect" => Self::on_redirect(rt, &payload),
			"live_patch" => self.on_live_patch(rt, view_id, &payload),
			"live_redirect" => Self::on_live_redirect(rt, &payload),
			"session" => match (view.el, payload.get("token").and_then(Value::as_str)) {
				(Some(el), Some(token)) => rt.document.set_attribute(el, PHX_SESSION, token),
				_ => warn!("Can't update session token"),
			},
			_ => debug!("Ignoring message"),
		}
	}

	fn on_redirect(rt: &mut Runtime, redirect: &Value) {
		match redirect.get("to").and_then(Value::as_str) {
			Some(to) => rt.ops.push(SocketOp::Redirect {
				to: to.to_owned(),
				flash: redirect.get("flash").and_then(Value::as_str).map(str::to_owned),
			}),
			None => warn!("Redirect without destination"),
		}
	}

	fn on_live_patch(&mut self, rt: &mut Runtime, view_id: &str, live_patch: &Value) {
		let to = match live_patch.get("to").and_then(Value::as_str) {
			Some(to) => rt.expand_url(to),
			None => return warn!("Live patch without destination"),
		};
		if let Some(view) = self.views.get_mut(view_id) {
			view.href = Some(to.clone());
		}
		let kind = HistoryKind::parse(live_patch.get("kind").and_then(Value::as_str));
		rt.ops.push(SocketOp::LivePatch { to, kind });
	}

	fn on_live_redirect(rt: &mut Runtime, live_redirect: &Value) {
		let to = match live_redirect.get("to").and_then(Value::as_str) {
			Some(to) => rt.expand_url(to),
			None => return warn!("Live redirect without destination"),
		};
		rt.ops.push(SocketOp::LiveRedirect {
			to,
			kind: HistoryKind::parse(live_redirect.get("kind").and_then(Value::as_str)),
			flash: live_redirect.get("flash").and_then(Value::as_str).map(str::to_owned),
		});
	}

	/// Whether losing the view's channel now reloads the page instead.
	fn reloads_on_close(&self, rt: &Runtime, view_id: &str, reason: &str) -> bool {
		self.views.get(view_id).map_or(false, |view| !view.destroyed && (view.join_pending || (rt.pending_link.is_some() && reason != "leave")))
	}

	/// The view's channel closed.
	pub fn on_close(&mut self, rt: &mut Runtime, view_id: &str, reason: &str) {
		let view = match self.views.get(view_id) {
			Some(view) if !view.destroyed => view,
			_ => return,
		};
		if self.reloads_on_close(rt, view_id, reason) {
			let name = view.name.clone();
			return rt.reload_with_jitter(&name);
		}
		self.destroy_all_children(rt, view_id);
		rt.drop_active_element(view_id);
		rt.document.blur();
	}

	/// The view's channel crashed.
	pub fn on_error(&mut self, rt: &mut Runtime, view_id: &str, reason: &str) {
		let reloading = self.reloads_on_close(rt, view_id, reason);
		self.on_close(rt, view_id, reason);
		if reloading {
			return warn!(view_id, reason, "View crashed. Reloading.");
		}
		error!(view_id, reason, "View crashed");
		if rt.main.as_deref() == Some(view_id) {
			let to = self.views.get(view_id).and_then(|view| view.href.clone());
			rt.navigation.page_loading(PageLoading::Start { kind: PageLoadingKind::Error, to });
		}
		self.show_loader(rt, view_id);
		if let Some(view) = self.views.get(view_id) {
			view.set_container_classes(&mut rt.document, &[PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS]);
		}
	}

	fn destroy_all_children(&mut self, rt: &mut Runtime, view_id: &str) {
		for child_id in self.children.get(view_id).cloned().unwrap_or_default() {
			self.destroy(rt, &child_id);
		}
	}

	/// Destroys `view_id` and its descendants and leaves their channels. Hooks get `destroyed` once the leave is replied to.
	#[instrument(skip(self, rt))]
	pub fn destroy(&mut self, rt: &mut Runtime, view_id: &str) {
		self.destroy_all_children(rt, view_id);
		let mut view = match self.views.remove(view_id) {
			Some(view) => view,
			None => return,
		};
		view.destroyed = true;
		self.children.remove(view_id);
		if let Some(siblings) = view.parent_id.as_deref().and_then(|parent_id| self.children.get_mut(parent_id)) {
			siblings.retain(|id| id != view_id);
		}
		self.join_patches.retain(|join_patch| join_patch.view_id != view_id);

		if let Some(el) = view.el.filter(|&el| rt.document.contains_node(el)) {
			if dom::is_phx_child(&rt.document, el) {
				rt.document.set_attribute(el, PHX_SESSION, "");
			}
		}
		if let Some(join_push) = view.join_push {
			rt.pending.remove(&join_push);
		}
		let push_id = rt.transport.leave(&view.topic());
		rt.pending.insert(
			push_id,
			Pending::Leave {
				view_id: view.id.clone(),
				view_name: view.name.clone(),
				hooks: mem::take(&mut view.hooks),
			},
		);
		debug!("Destroyed");
	}

	pub fn push_event(&mut self, rt: &mut Runtime, view_id: &str, kind: &str, el: NodeId, target_ctx: Option<NodeId>, phx_event: &str, meta: Map<String, Value>) {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		let busy_ref = view.put_ref(&mut rt.document, &[el], kind, &rt.config);
		let value = View::extract_meta(&rt.document, el, meta, &rt.config);
		let cid = view.target_component_id(&rt.document, el, target_ctx, &rt.config);
		let payload = json!({ "type": kind, "event": phx_event, "value": value });
		self.push_with_reply(rt, view_id, Some((busy_ref, el)), "event", payload, cid, OnReply::Nothing);
	}

	#[allow(clippy::too_many_arguments)]
	pub fn push_input(&mut self, rt: &mut Runtime, view_id: &str, input: NodeId, target_ctx: Option<NodeId>, phx_event: &str, target_name: &str, then: OnReply) {
		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		let form = dom::form_of(&rt.document, input);
		let value = form.map(|form| dom::serialize_form(&rt.document, form, &[("_target", target_name)])).unwrap_or_default();
		let cid = form.and_then(|form| view.target_component_id(&rt.document, form, target_ctx, &rt.config));
		let mut busy = vec![input];
		busy.extend(form);
		let busy_ref = view.put_ref(&mut rt.document, &busy, "change", &rt.config);
		let payload = json!({ "type": "form", "event": phx_event, "value": value });
		self.push_with_reply(rt, view_id, Some((busy_ref, input)), "event", payload, cid, then);
	}

	/// Replays a form's state after a rejoin, so the server can restore it.
	fn push_form_recovery(&mut self, rt: &mut Runtime, view_id: &str, form: NodeId, then: OnReply) {
		let phx_event = [rt.config.binding(PHX_AUTO_RECOVER), rt.config.binding(PHX_CHANGE)]
			.iter()
			.find_map(|binding| rt.document.attribute(form, binding).filter(|event| !event.is_empty()))
			.map(str::to_owned);
		let input = rt
			.document
			.filter_elements(form, |document, node| matches!(document.tag_name(node), Some("input" | "select" | "textarea" | "button")))
			.into_iter()
			.next();
		match (phx_event, input) {
			(Some(phx_event), Some(input)) => {
				let target_name = rt.document.attribute(input, "name").unwrap_or_default().to_owned();
				self.push_input(rt, view_id, input, Some(form), &phx_event, &target_name, then);
			}
			_ => {
				warn!("Can't recover a form without inputs");
				self.on_failed_reply(rt, view_id, then);
			}
		}
	}

	pub fn submit_form(&mut self, rt: &mut Runtime, view_id: &str, form: NodeId, target_ctx: Option<NodeId>, phx_event: &str) {
		if let Some(privates) = rt.document.privates_mut(form) {
			privates.has_submitted = true;
		}
		rt.blur_active_element();

		let view = match self.views.get_mut(view_id) {
			Some(view) => view,
			None => return,
		};
		// Serialized before the controls are disabled.
		let value = dom::serialize_form(&rt.document, form, &[]);
		let cid = view.target_component_id(&rt.document, form, target_ctx, &rt.config);

		let phx_update = rt.config.binding(PHX_UPDATE);
		let disable_with = rt.config.binding(PHX_DISABLE_WITH);
		let document = &rt.document;
		let is_ignored = |node: NodeId| dom::closest_phx_binding(document, node, &phx_update, Some("ignore"), Some(form)).is_some();
		let controls = document.filter_elements(form, |document, node| matches!(document.tag_name(node), Some("input" | "select" | "textarea" | "button")));
		let disables = controls.iter().copied().filter(|&node| document.has_attribute(node, &disable_with)).collect::<Vec<_>>();
		let buttons = controls.iter().copied().filter(|&node| document.tag_name(node) == Some("button") && !is_ignored(node)).collect::<Vec<_>>();
		let inputs = controls.iter().copied().filter(|&node| document.tag_name(node) != Some("button") && !is_ignored(node)).collect::<Vec<_>>();

		for &button in &buttons {
			let disabled = rt.document.has_attribute(button, "disabled");
			rt.document.set_attribute(button, PHX_DISABLED, &disabled.to_string());
			rt.document.set_attribute(button, "disabled", "");
		}
		for &input in &inputs {
			let readonly = rt.document.has_attribute(input, "readonly");
			rt.document.set_attribute(input, PHX_READONLY, &readonly.to_string());
			rt.document.set_attribute(input, "readonly", "");
		}
		rt.document.set_attribute(form, &rt.config.binding(PHX_PAGE_LOADING), "");

		let mut busy = vec![form];
		busy.extend(disables);
		busy.extend(buttons);
		busy.extend(inputs);
		let busy_ref = view.put_ref(&mut rt.document, &busy, "submit", &rt.config);
		let payload = json!({ "type": "form", "event": phx_event, "value": value });
		self.push_with_reply(rt, view_id, Some((busy_ref, form)), "event", payload, cid, OnReply::RestoreFocus);
	}

	pub fn push_hook_event(&mut self, rt: &mut Runtime, view_id: &str, target_ctx: Option<NodeId>, event: &str, payload: Value) {
		let cid = match self.views.get(view_id) {
			Some(view) => view.closest_component_id(&rt.document, target_ctx),
			None => return,
		};
		let payload = json!({ "type": "hook", "event": event, "value": payload });
		self.push_with_reply(rt, view_id, None, "event", payload, cid, OnReply::Nothing);
	}

	/// Navigates within the view, keeping its channel.
	pub fn push_link_patch(&mut self, rt: &mut Runtime, view_id: &str, href: &str, target_el: Option<NodeId>, then: AfterNavigation) {
		let is_loading = match self.views.get(view_id) {
			Some(view) => view.is_loading(&rt.document),
			None => return,
		};
		if !is_loading {
			self.show_loader(rt, view_id);
		}
		let link_ref = rt.set_pending_link(href);
		let busy = match (self.views.get_mut(view_id), target_el) {
			(Some(view), Some(target_el)) => Some((view.put_ref(&mut rt.document, &[target_el], "click", &rt.config), target_el)),
			_ => None,
		};
		let payload = json!({ "url": href });
		self.push_with_reply(
			rt,
			view_id,
			busy,
			"link",
			payload,
			None,
			OnReply::LinkPatch {
				href: href.to_owned(),
				link_ref,
				then,
			},
		);
	}
}

/// Hook and component bookkeeping of one patch.
struct PatchTracker<'a> {
	view: &'a mut View,
	registry: &'a HookRegistry,
	next_hook_id: &'a mut u32,
	pushes: &'a mut Vec<HookPush>,
	phx_hook: String,
	phx_update: String,
	updated_hooks: HashSet<u32>,
	destroyed_cids: Vec<Cid>,
	children_added: bool,
	discarded_sessions: Vec<String>,
}

impl<'a> PatchTracker<'a> {
	fn new(view: &'a mut View, registry: &'a HookRegistry, next_hook_id: &'a mut u32, pushes: &'a mut Vec<HookPush>, config: &Config) -> Self {
		Self {
			view,
			registry,
			next_hook_id,
			pushes,
			phx_hook: config.binding(PHX_HOOK),
			phx_update: config.binding(PHX_UPDATE),
			updated_hooks: HashSet::new(),
			destroyed_cids: Vec::new(),
			children_added: false,
			discarded_sessions: Vec::new(),
		}
	}

	fn hook_id(&self, document: &Document, node: NodeId) -> Option<u32> {
		document.privates(node).and_then(|privates| privates.hook_id).filter(|hook_id| self.view.hooks.contains_key(hook_id))
	}

	fn trigger(&mut self, document: &Document, hook_id: u32, event: HookEvent) {
		hook::trigger(&mut self.view.hooks, hook_id, event, document, (&self.view.id, &self.view.name), self.pushes);
	}

	/// Binds a new hook to `node` if it names one and isn't bound yet.
	fn mount(&mut self, document: &mut Document, node: NodeId) {
		if document.privates(node).map_or(true, |privates| privates.hook_id.is_some()) {
			return;
		}
		let name = match document.attribute(node, &self.phx_hook) {
			Some(name) if !name.is_empty() => name.to_owned(),
			_ => return,
		};
		if !self.view.owns_element(document, node) {
			return;
		}
		let hook = match self.registry.create(&name) {
			Some(hook) => hook,
			None => return error!("Unknown hook found for {:?}", name),
		};
		let hook_id = *self.next_hook_id;
		*self.next_hook_id += 1;
		if let Some(privates) = document.privates_mut(node) {
			privates.hook_id = Some(hook_id);
		}
		self.view.hooks.insert(hook_id, ViewHook::new(node, &name, hook));
		self.trigger(document, hook_id, HookEvent::Mounted);
	}
}

fn data_attributes(document: &Document, node: NodeId) -> Vec<(String, String)> {
	let mut data = document.attributes(node).iter().filter(|(name, _)| name.starts_with("data-")).cloned().collect::<Vec<_>>();
	data.sort();
	data
}

impl PatchListener for PatchTracker<'_> {
	fn after_added(&mut self, document: &mut Document, node: NodeId) {
		if document.is_element(node) {
			self.mount(document, node);
		}
	}

	fn before_updated(&mut self, document: &mut Document, from: NodeId, to: NodeId) {
		let hook_id = match self.hook_id(document, from) {
			Some(hook_id) => hook_id,
			None => return,
		};
		let is_ignored = document.attribute(from, &self.phx_update) == Some("ignore");
		if !document.is_equal_node(from, to) && !(is_ignored && data_attributes(document, from) == data_attributes(document, to)) {
			self.updated_hooks.insert(hook_id);
			self.trigger(document, hook_id, HookEvent::BeforeUpdate);
		}
	}

	fn after_updated(&mut self, document: &mut Document, node: NodeId) {
		if let Some(hook_id) = self.hook_id(document, node).filter(|hook_id| self.updated_hooks.contains(hook_id)) {
			self.trigger(document, hook_id, HookEvent::Updated);
		}
	}

	fn before_discarded(&mut self, document: &mut Document, node: NodeId) {
		if let Some(hook_id) = self.hook_id(document, node) {
			self.trigger(document, hook_id, HookEvent::BeforeDestroy);
		}
	}

	fn after_discarded(&mut self, document: &mut Document, node: NodeId) {
		if let Some(cid) = dom::component_id(document, node) {
			if !self.destroyed_cids.contains(&cid) {
				self.destroyed_cids.push(cid);
			}
		}
		if let Some(hook_id) = self.hook_id(document, node) {
			self.trigger(document, hook_id, HookEvent::Destroyed);
			self.view.hooks.remove(&hook_id);
		}
	}

	fn nested_session_added(&mut self, _document: &mut Document, _node: NodeId) {
		self.children_added = true;
	}

	fn nested_session_discarded(&mut self, document: &mut Document, node: NodeId) {
		if let Some(id) = document.id_of(node) {
			self.discarded_sessions.push(id.to_owned());
		}
	}
}
