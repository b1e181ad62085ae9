//! A keyed tree morph.
//!
//! [`morph`] transforms one element's subtree into the shape of another, matching element children
//! by their `id` attribute and otherwise by position. Matched nodes are updated in place and moved
//! where needed, so their identity (focus, hooks, private state) survives the patch.
//!
//! All policy lives in the [`MorphHandler`]: it may veto additions, updates and removals.

use crate::document::{Document, NodeId, NodeKind};
use core::mem;
use hashbrown::HashMap;
use tracing::{error, instrument, trace, trace_span};

/// Hook points of a [`morph`], invoked synchronously in document order.
///
/// All methods default to doing nothing and allowing the change.
#[allow(unused_variables)]
pub trait MorphHandler {
	/// `node` is from the new tree and not yet inserted. Return `false` to leave it out.
	fn before_node_added(&mut self, document: &mut Document, node: NodeId) -> bool {
		true
	}

	/// Called for an inserted node and then for each of its descendants.
	fn node_added(&mut self, document: &mut Document, node: NodeId) {}

	/// Return `false` to leave `from` (attributes and children) as it is.
	fn before_element_updated(&mut self, document: &mut Document, from: NodeId, to: NodeId) -> bool {
		true
	}

	/// `node`'s attributes were updated. Its children are morphed afterwards.
	fn element_updated(&mut self, document: &mut Document, node: NodeId) {}

	/// Return `false` to keep `node`.
	fn before_node_discarded(&mut self, document: &mut Document, node: NodeId) -> bool {
		true
	}

	/// Called for a removed node and then for each of its descendants.
	fn node_discarded(&mut self, document: &mut Document, node: NodeId) {}
}

/// Morphs `from` into the shape of `to`. Both must be elements.
///
/// With `children_only`, `from` itself is left untouched. Otherwise an element with a different
/// tag name is replaced with a new one, which is returned.
///
/// Nodes removed from `from`'s subtree are freed, as is anything left over of `to`'s subtree
/// except `to` itself.
#[instrument(skip(document, handler))]
pub fn morph<H: MorphHandler + ?Sized>(document: &mut Document, from: NodeId, to: NodeId, children_only: bool, handler: &mut H) -> NodeId {
	let from_tag = document.tag_name(from).map(str::to_owned);
	let to_tag = document.tag_name(to).map(str::to_owned);
	let (from_tag, to_tag) = match (from_tag, to_tag) {
		(Some(from_tag), Some(to_tag)) => (from_tag, to_tag),
		_ => {
			error!("Can only morph an element into another element ({:?} into {:?})", from, to);
			return from;
		}
	};

	let mut morph = Morph {
		document,
		handler,
		lookup: HashMap::new(),
		keyed_removals: Vec::new(),
		removed: Vec::new(),
	};
	morph.index_tree(from);

	let mut morphed = from;
	if !children_only && from_tag != to_tag {
		trace!("Replacing <{}> with <{}>", from_tag, to_tag);
		morph.handler.node_discarded(morph.document, from);
		morphed = morph.document.create_element(&to_tag);
		morph.document.move_children(from, morphed);
	}

	morph.morph_element(morphed, to, children_only);

	for key in mem::take(&mut morph.keyed_removals) {
		if let Some(&node) = morph.lookup.get(&key) {
			let parent = morph.document.parent(node);
			morph.remove_node(node, parent, false);
		}
	}

	if morphed != from {
		morph.document.replace_with(from, morphed);
		morph.removed.push(from);
	}

	for node in mem::take(&mut morph.removed) {
		if node != to && morph.document.contains_node(node) && morph.document.parent(node).is_none() {
			morph.document.free(node);
		}
	}

	morphed
}

/// Makes `target`'s attributes equal to `source`'s, except that attributes named in `exclude` are not copied over.
pub fn merge_attributes(document: &mut Document, target: NodeId, source: NodeId, exclude: &[&str]) {
	for (name, value) in document.attributes(source).to_vec() {
		if !exclude.contains(&name.as_str()) {
			document.set_attribute(target, &name, &value);
		}
	}
	let stale = document.attributes(target).iter().filter(|(name, _)| !document.has_attribute(source, name)).map(|(name, _)| name.clone()).collect::<Vec<_>>();
	for name in stale {
		document.remove_attribute(target, &name);
	}
}

struct Morph<'a, H: ?Sized> {
	document: &'a mut Document,
	handler: &'a mut H,
	/// Keyed elements of the old tree that haven't been matched yet.
	lookup: HashMap<String, NodeId>,
	/// Removal of keyed elements is deferred until the end, since they may still be matched further on.
	keyed_removals: Vec<String>,
	removed: Vec<NodeId>,
}

impl<'a, H: MorphHandler + ?Sized> Morph<'a, H> {
	fn key(&self, node: NodeId) -> Option<String> {
		self.document.id_of(node).map(str::to_owned)
	}

	fn same_tag(&self, a: NodeId, b: NodeId) -> bool {
		matches!((self.document.tag_name(a), self.document.tag_name(b)), (Some(a), Some(b)) if a == b)
	}

	fn index_tree(&mut self, root: NodeId) {
		for node in self.document.descendants(root) {
			if let Some(key) = self.key(node) {
				self.lookup.insert(key, node);
			}
		}
	}

	fn remove_node(&mut self, node: NodeId, parent: Option<NodeId>, skip_keyed: bool) {
		if !self.handler.before_node_discarded(self.document, node) {
			return trace!("Kept {:?}", node);
		}
		if parent.is_some() {
			self.document.detach(node);
			self.removed.push(node);
		}
		self.handler.node_discarded(self.document, node);
		self.walk_discarded_children(node, skip_keyed);
	}

	fn walk_discarded_children(&mut self, node: NodeId, skip_keyed: bool) {
		if !self.document.is_element(node) {
			return;
		}
		for child in self.document.children(node).to_vec() {
			match self.key(child).filter(|_| skip_keyed) {
				Some(key) => self.keyed_removals.push(key),
				None => {
					self.handler.node_discarded(self.document, child);
					self.walk_discarded_children(child, skip_keyed);
				}
			}
		}
	}

	fn remove_or_defer(&mut self, node: NodeId, key: Option<&String>, parent: NodeId) {
		match key {
			Some(key) => self.keyed_removals.push(key.clone()),
			None => self.remove_node(node, Some(parent), true),
		}
	}

	fn handle_node_added(&mut self, node: NodeId) {
		self.handler.node_added(self.document, node);
		let mut child = self.document.first_child(node);
		while let Some(current) = child {
			let next = self.document.next_sibling(current);
			let unmatched = self.key(current).and_then(|key| self.lookup.get(&key).copied()).filter(|&unmatched| self.same_tag(current, unmatched));
			match unmatched {
				Some(unmatched) => {
					self.document.replace_with(current, unmatched);
					self.morph_element(unmatched, current, false);
					self.removed.push(current);
				}
				None => self.handle_node_added(current),
			}
			child = next;
		}
	}

	fn morph_element(&mut self, from: NodeId, to: NodeId, children_only: bool) {
		if let Some(key) = self.key(to) {
			self.lookup.remove(&key);
		}

		if !children_only {
			if !self.handler.before_element_updated(self.document, from, to) {
				return;
			}
			merge_attributes(self.document, from, to, &[]);
			self.handler.element_updated(self.document, from);
		}

		if self.document.tag_name(from) == Some("textarea") {
			let value = self.document.inner_text(to);
			if self.document.inner_text(from) != value {
				if value.is_empty() {
					self.document.clear_children(from);
				} else {
					self.document.set_inner_text(from, &value);
				}
			}
		} else {
			self.morph_children(from, to);
		}
	}

	#[allow(clippy::too_many_lines)]
	fn morph_children(&mut self, from_el: NodeId, to_el: NodeId) {
		let span = trace_span!("morph_children", ?from_el, ?to_el);
		let _enter = span.enter();

		let mut to_child = self.document.first_child(to_el);
		let mut from_child = self.document.first_child(from_el);

		'outer: while let Some(to_node) = to_child {
			let to_next = self.document.next_sibling(to_node);
			let to_key = self.key(to_node);

			while let Some(mut from_node) = from_child {
				let from_next = self.document.next_sibling(from_node);
				let from_key = self.key(from_node);
				let from_kind = self.document.kind(from_node);

				let mut compatible = false;
				if from_kind == self.document.kind(to_node) {
					match from_kind {
						Some(NodeKind::Element) => {
							let mut incompatible = false;
							match &to_key {
								Some(to_key) if Some(to_key) != from_key.as_ref() => match self.lookup.get(to_key).copied() {
									// Removing the current node will line up the match on the next iteration.
									Some(matching) if from_next == Some(matching) => incompatible = true,
									Some(matching) => {
										self.document.insert_before(from_el, matching, Some(from_node));
										self.remove_or_defer(from_node, from_key.as_ref(), from_el);
										from_node = matching;
									}
									None => incompatible = true,
								},
								Some(_) => (),
								None => incompatible = from_key.is_some(),
							}

							compatible = !incompatible && self.same_tag(from_node, to_node);
							if compatible {
								self.morph_element(from_node, to_node, false);
							}
						}
						Some(NodeKind::Text | NodeKind::Comment) => {
							compatible = true;
							let data = self.document.text(to_node).unwrap_or_default().to_owned();
							self.document.set_text(from_node, &data);
						}
						_ => (),
					}
				}

				if compatible {
					to_child = to_next;
					from_child = from_next;
					continue 'outer;
				}

				self.remove_or_defer(from_node, from_key.as_ref(), from_el);
				from_child = from_next;
			}

			// No more old children: either a keyed element from elsewhere is moved here, or the new node is inserted.
			let matching = to_key.and_then(|key| self.lookup.get(&key).copied()).filter(|&matching| self.same_tag(matching, to_node));
			if let Some(matching) = matching {
				self.document.append_child(from_el, matching);
				self.morph_element(matching, to_node, false);
			} else if self.handler.before_node_added(self.document, to_node) {
				self.document.append_child(from_el, to_node);
				self.handle_node_added(to_node);
			}

			to_child = to_next;
			from_child = None;
		}

		while let Some(from_node) = from_child {
			let from_next = self.document.next_sibling(from_node);
			let from_key = self.key(from_node);
			self.remove_or_defer(from_node, from_key.as_ref(), from_el);
			from_child = from_next;
		}
	}
}
