//! The reconciler: policy on top of [`morph`](`crate::morph::morph`).
//!
//! A [`DomPatch`] applies one rendering of a view (or of one of its components) to the view's
//! container. Per node pair, in this order:
//!
//! 1. Elements marked [`PHX_REMOVE`] are discarded, even inside append/prepend containers.
//! 2. Elements with `phx-update="ignore"` only get their attributes merged.
//! 3. Elements still busy with a newer (or equal) action ref than the patch's are left alone.
//! 4. Nested view placeholders get their attributes merged but their bookkeeping kept, and are never diffed into.
//! 5. The focused form control keeps its value.
//! 6. Children of append/prepend containers are kept, and afterwards put back in their previous order.

use crate::{
	consts::{
		PHX_COMPONENT, PHX_CONNECTED_CLASS, PHX_DISABLED, PHX_DISABLE_WITH_RESTORE, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS, PHX_EVENT_CLASSES, PHX_FEEDBACK_FOR,
		PHX_NO_FEEDBACK_CLASS, PHX_PARENT_ID, PHX_READONLY, PHX_REF, PHX_REMOVE, PHX_ROOT_ID, PHX_SKIP, PHX_STATIC, PHX_UPDATE,
	},
	document::{Document, NodeId},
	dom,
	morph::{self, merge_attributes, MorphHandler},
	rendered::Cid,
};
use tracing::{debug, instrument, trace, warn};

/// Action ref, allocated per view in increasing order.
pub type BusyRef = u64;

const CONNECTION_CLASSES: &[&str] = &[PHX_CONNECTED_CLASS, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS];

/// Callbacks of a [`DomPatch`], in document order.
///
/// `before_*` and `*_discarded` fire during the structural pass.
/// `after_added` and `after_updated` fire once the patch is complete and focus has been restored.
#[allow(unused_variables)]
pub trait PatchListener {
	/// `node` is not inserted yet.
	fn before_added(&mut self, document: &mut Document, node: NodeId) {}
	fn after_added(&mut self, document: &mut Document, node: NodeId) {}
	/// `to` is the detached new version of `from`.
	fn before_updated(&mut self, document: &mut Document, from: NodeId, to: NodeId) {}
	fn after_updated(&mut self, document: &mut Document, node: NodeId) {}
	fn before_discarded(&mut self, document: &mut Document, node: NodeId) {}
	/// `node` is already detached.
	fn after_discarded(&mut self, document: &mut Document, node: NodeId) {}
	/// A placeholder of a view nested in the patched one was inserted.
	fn nested_session_added(&mut self, document: &mut Document, node: NodeId) {}
	/// A placeholder of a nested view is about to be removed.
	fn nested_session_discarded(&mut self, document: &mut Document, node: NodeId) {}
}

/// Ignores all callbacks.
impl PatchListener for () {}

#[derive(Debug, Clone)]
pub struct DomPatch {
	view_id: String,
	root_id: String,
	container: NodeId,
	html: String,
	target_cid: Option<Cid>,
	patch_ref: Option<BusyRef>,
	phx_update: String,
	phx_feedback_for: String,
	debug: bool,
}

impl DomPatch {
	/// `html` is the container's new rendering wrapped in any single element or, if `target_cid` is given, that component's rendering.
	#[must_use]
	pub fn new(view_id: &str, root_id: &str, container: NodeId, html: String, target_cid: Option<Cid>, patch_ref: Option<BusyRef>) -> Self {
		Self {
			view_id: view_id.to_owned(),
			root_id: root_id.to_owned(),
			container,
			html,
			target_cid,
			patch_ref,
			phx_update: format!("phx-{}", PHX_UPDATE),
			phx_feedback_for: format!("phx-{}", PHX_FEEDBACK_FOR),
			debug: false,
		}
	}

	#[must_use]
	pub fn binding_prefix(mut self, prefix: &str) -> Self {
		self.phx_update = format!("{}{}", prefix, PHX_UPDATE);
		self.phx_feedback_for = format!("{}{}", prefix, PHX_FEEDBACK_FOR);
		self
	}

	/// Check for duplicate ids after each patch.
	#[must_use]
	pub fn debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	/// Marks all children of append/prepend containers for removal.
	///
	/// Used when a view (re)joins, since the full rendering then contains every child that should stay.
	pub fn mark_prunable_content_for_removal(&self, document: &mut Document) {
		let phx_update = &self.phx_update;
		let prunable = document.filter_elements(self.container, |document, node| {
			document.parent(node).map_or(false, |parent| dom::is_phx_update(document, parent, phx_update, &["append", "prepend"]))
		});
		for node in prunable {
			document.set_attribute(node, PHX_REMOVE, "");
		}
	}

	/// Where a component patch is applied: the component's single root element, or the parent of its multiple roots.
	fn target_cid_container(&self, document: &Document, cid: Cid) -> Option<NodeId> {
		let nodes = dom::find_component_nodes(document, self.container, cid);
		match nodes.as_slice() {
			[] => None,
			[single] => Some(*single),
			[first, ..] => document.parent(*first),
		}
	}

	/// Builds the detached tree to morph `target` into. The second value is the node to free afterwards.
	fn build_diff_tree(&self, document: &mut Document, target: NodeId) -> Option<(NodeId, NodeId)> {
		let cid = match self.target_cid {
			Some(cid) if dom::component_id(document, target) != Some(cid) => cid,
			// Full patch or single-root component.
			_ => {
				let fragment = document.parse_fragment(&self.html);
				return match document.element_children(fragment).first() {
					Some(&tree) => Some((tree, fragment)),
					None => {
						warn!("Patch markup contains no element");
						document.free(fragment);
						None
					}
				};
			}
		};

		// Multiple component roots: splice the new roots into a copy of their parent.
		let container = document.clone_node(target, true)?;
		let (first, rest) = match dom::find_component_nodes(document, container, cid).split_first() {
			Some((&first, rest)) => (first, rest.to_vec()),
			None => {
				document.free(container);
				return None;
			}
		};
		for node in rest {
			document.free(node);
		}
		for child in document.element_children(container) {
			if dom::component_id(document, child) != Some(cid) {
				document.set_attribute(child, PHX_SKIP, "");
				document.clear_children(child);
			}
		}
		let parent = document.parent(first).unwrap_or(container);
		let fragment = document.parse_fragment(&self.html);
		for node in document.children(fragment).to_vec() {
			document.insert_before(parent, node, Some(first));
		}
		document.free(fragment);
		document.free(first);
		Some((container, container))
	}

	/// Applies the patch. Returns `false` if nothing was done, which happens for component patches whose component isn't in the container.
	#[instrument(skip(self, document, listener), fields(view_id = %self.view_id, target_cid = ?self.target_cid, patch_ref = ?self.patch_ref))]
	pub fn perform(&self, document: &mut Document, listener: &mut dyn PatchListener) -> bool {
		let target = match self.target_cid {
			Some(cid) => match self.target_cid_container(document, cid) {
				Some(target) => target,
				None => {
					trace!("Component {} not found. Skipping patch.", cid);
					return false;
				}
			},
			None => self.container,
		};

		if cfg!(feature = "dangerous-logging") {
			trace!(html = %self.html, "Patching");
		}

		let focused = document.active_element();
		let selection = focused.filter(|&focused| dom::is_textual_input(document, focused)).and_then(|_| document.selection());

		let (diff_tree, scratch) = match self.build_diff_tree(document, target) {
			Some(built) => built,
			None => return false,
		};

		listener.before_added(document, self.container);
		listener.before_updated(document, self.container, self.container);

		let mut handler = PatchHandler {
			patch: self,
			listener: &mut *listener,
			target,
			focused,
			added: Vec::new(),
			updates: Vec::new(),
			append_prepend_updates: Vec::new(),
		};
		let children_only = !document.has_attribute(target, PHX_COMPONENT);
		morph::morph(document, target, diff_tree, children_only, &mut handler);
		let PatchHandler { added, updates, append_prepend_updates, .. } = handler;

		if document.contains_node(scratch) {
			document.free(scratch);
		}

		if self.debug {
			dom::detect_duplicate_ids(document);
		}

		for (container_id, ids_before) in append_prepend_updates {
			let container = match document.element_by_id_within(self.container, &container_id) {
				Some(container) => container,
				None => continue,
			};
			let is_append = document.attribute(container, &self.phx_update) == Some("append");
			if is_append {
				for id in ids_before.iter().rev() {
					if let Some(child) = document.element_by_id_within(container, id) {
						let first = document.first_child(container);
						document.insert_before(container, child, first);
					}
				}
			} else {
				for id in &ids_before {
					if let Some(child) = document.element_by_id_within(container, id) {
						document.append_child(container, child);
					}
				}
			}
		}

		if let Some(focused) = focused.filter(|&focused| document.is_connected(focused) && dom::is_textual_input(document, focused)) {
			if document.has_attribute(focused, "readonly") {
				document.blur();
			} else {
				document.focus(focused);
				if let Some((start, end)) = selection {
					document.set_selection(start, end);
				}
			}
		}

		for node in added {
			listener.after_added(document, node);
		}
		for node in updates {
			listener.after_updated(document, node);
		}
		true
	}
}

/// Clears or carries forward the busy state of `from` for a patch with `patch_ref`.
///
/// Returns whether `from` may be patched.
pub fn sync_pending_ref(document: &mut Document, patch_ref: Option<BusyRef>, from: NodeId, to: NodeId) -> bool {
	let busy_ref = match document.attribute(from, PHX_REF) {
		Some(busy_ref) => busy_ref.parse::<BusyRef>().ok(),
		None => return true,
	};

	match (patch_ref, busy_ref) {
		(Some(patch_ref), Some(busy_ref)) if patch_ref >= busy_ref => {
			clear_busy_state(document, from);
			if to != from {
				clear_busy_state(document, to);
			}
			true
		}
		_ => {
			for class in PHX_EVENT_CLASSES {
				if document.has_class(from, class) {
					document.add_class(to, class);
				}
			}
			if let Some(busy_ref) = document.attribute(from, PHX_REF).map(str::to_owned) {
				document.set_attribute(to, PHX_REF, &busy_ref);
			}
			false
		}
	}
}

fn clear_busy_state(document: &mut Document, node: NodeId) {
	document.remove_attribute(node, PHX_REF);
	for (stored, attribute) in [(PHX_READONLY, "readonly"), (PHX_DISABLED, "disabled")] {
		if let Some(original) = document.attribute(node, stored).map(str::to_owned) {
			if original == "true" {
				document.set_attribute(node, attribute, "");
			} else {
				document.remove_attribute(node, attribute);
			}
			document.remove_attribute(node, stored);
		}
	}
	for class in PHX_EVENT_CLASSES {
		document.remove_class(node, class);
	}
	if let Some(text) = document.attribute(node, PHX_DISABLE_WITH_RESTORE).map(str::to_owned) {
		document.set_inner_text(node, &text);
		document.remove_attribute(node, PHX_DISABLE_WITH_RESTORE);
	}
}

/// Clears or keeps the busy state of every element under `container` for a patch with `patch_ref`.
pub fn undo_refs(document: &mut Document, patch_ref: Option<BusyRef>, container: NodeId) {
	for node in document.filter_elements(container, |document, node| document.has_attribute(node, PHX_REF)) {
		sync_pending_ref(document, patch_ref, node, node);
	}
}

struct PatchHandler<'a> {
	patch: &'a DomPatch,
	listener: &'a mut dyn PatchListener,
	target: NodeId,
	focused: Option<NodeId>,
	added: Vec<NodeId>,
	updates: Vec<NodeId>,
	append_prepend_updates: Vec<(String, Vec<String>)>,
}

impl PatchHandler<'_> {
	/// Hides errors of fields the user hasn't interacted with yet.
	fn discard_error(&self, document: &mut Document, node: NodeId) {
		let field = match document.attribute(node, &self.patch.phx_feedback_for) {
			Some(field) if !field.is_empty() => field.to_owned(),
			_ => return,
		};
		let input = match document.element_by_id_within(self.target, &field) {
			Some(input) => input,
			None => return,
		};
		let has_focused = document.privates(input).map_or(false, |privates| privates.has_focused);
		let has_submitted = dom::form_of(document, input).and_then(|form| document.privates(form)).map_or(false, |privates| privates.has_submitted);
		if !(has_focused || has_submitted) {
			document.add_class(node, PHX_NO_FEEDBACK_CLASS);
		}
	}

	fn is_skipped(document: &Document, node: NodeId) -> bool {
		document.has_attribute(node, PHX_SKIP)
	}

	/// A `multiple` select or one with changed options can't keep its state through an attribute merge.
	fn force_focused_select_update(document: &Document, from: NodeId, to: NodeId) -> bool {
		document.tag_name(from) == Some("select") && (document.has_attribute(from, "multiple") || document.inner_html(from) != document.inner_html(to))
	}

	fn merge_focused_input(document: &mut Document, from: NodeId, to: NodeId) {
		if document.tag_name(from) != Some("select") {
			merge_attributes(document, from, to, &["value"]);
		}
		if document.has_attribute(to, "readonly") {
			document.set_attribute(from, "readonly", "");
		} else {
			document.remove_attribute(from, "readonly");
		}
	}

	fn merge_nested_session(&self, document: &mut Document, from: NodeId, to: NodeId) {
		let previous_static = document.attribute(from, PHX_STATIC).map(str::to_owned);
		let connection_classes = CONNECTION_CLASSES.iter().copied().filter(|class| document.has_class(from, class)).collect::<Vec<_>>();
		merge_attributes(document, from, to, &[]);
		match previous_static {
			Some(previous_static) => document.set_attribute(from, PHX_STATIC, &previous_static),
			None => document.remove_attribute(from, PHX_STATIC),
		}
		document.set_attribute(from, PHX_ROOT_ID, &self.patch.root_id);
		for class in connection_classes {
			document.add_class(from, class);
		}
	}

	fn track_append_prepend(&mut self, document: &Document, from: NodeId, to: NodeId) {
		let is_append = document.attribute(to, &self.patch.phx_update) == Some("append");
		let ids_before = document.element_children(from).into_iter().filter_map(|child| document.id_of(child).map(str::to_owned)).collect::<Vec<_>>();
		let new_ids = document.element_children(to).into_iter().filter_map(|child| document.id_of(child)).collect::<Vec<_>>();
		let resent = new_ids.iter().filter(|id| ids_before.iter().any(|before| before == *id)).count();
		if is_append && resent == 0 {
			return;
		}
		if is_append {
			debug!(
				"{} child id(s) of {:?} were sent again in an append. They keep their previous position.",
				resent,
				document.id_of(to).unwrap_or_default()
			);
		}
		match document.id_of(to) {
			Some(id) => self.append_prepend_updates.push((id.to_owned(), ids_before)),
			None => warn!("A phx-update container without id can't be reordered"),
		}
	}
}

impl MorphHandler for PatchHandler<'_> {
	fn before_node_added(&mut self, document: &mut Document, node: NodeId) -> bool {
		self.discard_error(document, node);
		self.listener.before_added(document, node);
		true
	}

	fn node_added(&mut self, document: &mut Document, node: NodeId) {
		if dom::is_phx_child(document, node) && document.attribute(node, PHX_PARENT_ID) == Some(self.patch.view_id.as_str()) {
			self.listener.nested_session_added(document, node);
		}
		self.added.push(node);
	}

	fn before_element_updated(&mut self, document: &mut Document, from: NodeId, to: NodeId) -> bool {
		if Self::is_skipped(document, to) {
			return false;
		}

		if document.attribute(from, &self.patch.phx_update) == Some("ignore") {
			self.listener.before_updated(document, from, to);
			merge_attributes(document, from, to, &[]);
			self.updates.push(from);
			return false;
		}

		if !sync_pending_ref(document, self.patch.patch_ref, from, to) {
			trace!("{:?} is busy with a newer ref. Leaving it as is.", from);
			return false;
		}

		if dom::is_phx_child(document, to) {
			self.merge_nested_session(document, from, to);
			return false;
		}

		self.discard_error(document, to);

		let is_focused_form_input = self.focused == Some(from) && dom::is_form_input(document, from);
		if is_focused_form_input && !Self::force_focused_select_update(document, from, to) {
			self.listener.before_updated(document, from, to);
			Self::merge_focused_input(document, from, to);
			self.updates.push(from);
			return false;
		}

		if dom::is_phx_update(document, to, &self.patch.phx_update, &["append", "prepend"]) {
			self.track_append_prepend(document, from, to);
		}
		self.listener.before_updated(document, from, to);
		true
	}

	fn element_updated(&mut self, _document: &mut Document, node: NodeId) {
		self.updates.push(node);
	}

	fn before_node_discarded(&mut self, document: &mut Document, node: NodeId) -> bool {
		if document.has_attribute(node, PHX_REMOVE) {
			return true;
		}
		if document.parent(node).map_or(false, |parent| dom::is_phx_update(document, parent, &self.patch.phx_update, &["append", "prepend"])) {
			return false;
		}
		if Self::is_skipped(document, node) {
			return false;
		}
		self.listener.before_discarded(document, node);
		if dom::is_phx_child(document, node) {
			self.listener.nested_session_discarded(document, node);
		}
		true
	}

	fn node_discarded(&mut self, document: &mut Document, node: NodeId) {
		self.listener.after_discarded(document, node);
	}
}
