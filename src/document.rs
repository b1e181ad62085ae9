//! An arena-backed document tree.
//!
//! The reconciler is granted exclusive, synchronous access to a [`Document`] for each patch.
//! Nodes are addressed by [`NodeId`]s, which stay valid until the node is explicitly [freed](`Document::free`),
//! so detached subtrees (parsed fragments, cloned containers) can live next to the attached tree.
//! Freed slots are reused. A stale [`NodeId`] carries an older generation and resolves to nothing.

use crate::{html, selector::Selector};
use tracing::{error, trace};

/// Addresses a node within one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
	index: usize,
	generation: u32,
}

impl NodeId {
	#[must_use]
	pub fn index(self) -> usize {
		self.index
	}

	#[must_use]
	pub fn generation(self) -> u32 {
		self.generation
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Document,
	Fragment,
	Element,
	Text,
	Comment,
}

/// Client-side state attached to an element that is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Privates {
	pub hook_id: Option<u32>,
	pub has_focused: bool,
	pub has_submitted: bool,
}

#[derive(Debug, Clone)]
enum Data {
	Document,
	Fragment,
	Element { tag: String, attributes: Vec<(String, String)>, privates: Privates },
	Text(String),
	Comment(String),
}

#[derive(Debug, Clone)]
struct Slot {
	data: Data,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

/// A single structural change, recorded while the journal is enabled.
///
/// Replaying the journal in order onto another tree (see `mirror` on `wasm32`) reproduces every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
	CreateElement { node: NodeId, tag: String },
	CreateText { node: NodeId, data: String },
	CreateComment { node: NodeId, data: String },
	Insert { parent: NodeId, node: NodeId, before: Option<NodeId> },
	Detach { node: NodeId },
	SetAttribute { node: NodeId, name: String, value: String },
	RemoveAttribute { node: NodeId, name: String },
	SetData { node: NodeId, data: String },
	Free { node: NodeId },
}

#[derive(Debug)]
struct Entry {
	generation: u32,
	slot: Option<Slot>,
}

#[derive(Debug)]
pub struct Document {
	slots: Vec<Entry>,
	free: Vec<usize>,
	root: NodeId,
	active: Option<NodeId>,
	selection: Option<(usize, usize)>,
	journal: Option<Vec<Mutation>>,
}

impl Default for Document {
	fn default() -> Self {
		Self::new()
	}
}

impl Document {
	#[must_use]
	pub fn new() -> Self {
		Self {
			slots: vec![Entry { generation: 0, slot: Some(Slot { data: Data::Document, parent: None, children: Vec::new() }) }],
			free: Vec::new(),
			root: NodeId { index: 0, generation: 0 },
			active: None,
			selection: None,
			journal: None,
		}
	}

	/// Parses `html` and appends it to the document node.
	#[must_use]
	pub fn from_html(html: &str) -> Self {
		let mut document = Self::new();
		let root = document.root;
		let fragment = document.parse_fragment(html);
		document.move_children(fragment, root);
		document.free(fragment);
		document
	}

	#[must_use]
	pub fn root(&self) -> NodeId {
		self.root
	}

	/// Starts recording [`Mutation`]s. Nodes that already exist are not replayed.
	pub fn enable_journal(&mut self) {
		self.journal.get_or_insert_with(Vec::new);
	}

	pub fn take_journal(&mut self) -> Vec<Mutation> {
		self.journal.as_mut().map(core::mem::take).unwrap_or_default()
	}

	fn record(&mut self, mutation: impl FnOnce() -> Mutation) {
		if let Some(journal) = &mut self.journal {
			journal.push(mutation());
		}
	}

	fn slot(&self, id: NodeId) -> Option<&Slot> {
		self.slots.get(id.index).filter(|entry| entry.generation == id.generation).and_then(|entry| entry.slot.as_ref())
	}

	fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
		self.slots.get_mut(id.index).filter(|entry| entry.generation == id.generation).and_then(|entry| entry.slot.as_mut())
	}

	fn alloc(&mut self, data: Data) -> NodeId {
		let slot = Some(Slot { data, parent: None, children: Vec::new() });
		if let Some(index) = self.free.pop() {
			let entry = &mut self.slots[index];
			entry.generation = entry.generation.wrapping_add(1);
			entry.slot = slot;
			return NodeId { index, generation: entry.generation };
		}
		self.slots.push(Entry { generation: 0, slot });
		NodeId { index: self.slots.len() - 1, generation: 0 }
	}

	/// The number of node slots, live or free.
	#[must_use]
	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	pub fn create_element(&mut self, tag: &str) -> NodeId {
		let tag = tag.to_ascii_lowercase();
		let id = self.alloc(Data::Element { tag: tag.clone(), attributes: Vec::new(), privates: Privates::default() });
		self.record(|| Mutation::CreateElement { node: id, tag });
		id
	}

	pub fn create_text(&mut self, data: &str) -> NodeId {
		let id = self.alloc(Data::Text(data.to_owned()));
		self.record(|| Mutation::CreateText { node: id, data: data.to_owned() });
		id
	}

	pub fn create_comment(&mut self, data: &str) -> NodeId {
		let id = self.alloc(Data::Comment(data.to_owned()));
		self.record(|| Mutation::CreateComment { node: id, data: data.to_owned() });
		id
	}

	pub fn create_fragment(&mut self) -> NodeId {
		self.alloc(Data::Fragment)
	}

	/// Parses `html` into a new detached fragment node.
	pub fn parse_fragment(&mut self, html: &str) -> NodeId {
		let fragment = self.create_fragment();
		html::parse_into(self, fragment, html);
		fragment
	}

	#[must_use]
	pub fn contains_node(&self, id: NodeId) -> bool {
		self.slot(id).is_some()
	}

	#[must_use]
	pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
		self.slot(id).map(|slot| match slot.data {
			Data::Document => NodeKind::Document,
			Data::Fragment => NodeKind::Fragment,
			Data::Element { .. } => NodeKind::Element,
			Data::Text(_) => NodeKind::Text,
			Data::Comment(_) => NodeKind::Comment,
		})
	}

	#[must_use]
	pub fn is_element(&self, id: NodeId) -> bool {
		self.kind(id) == Some(NodeKind::Element)
	}

	/// Lowercase tag name of an element.
	#[must_use]
	pub fn tag_name(&self, id: NodeId) -> Option<&str> {
		match &self.slot(id)?.data {
			Data::Element { tag, .. } => Some(tag),
			_ => None,
		}
	}

	#[must_use]
	pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
		match self.slot(id).map(|slot| &slot.data) {
			Some(Data::Element { attributes, .. }) => attributes,
			_ => &[],
		}
	}

	#[must_use]
	pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
		self.attributes(id).iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
	}

	#[must_use]
	pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
		self.attribute(id, name).is_some()
	}

	pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
		let changed = match self.slot_mut(id).map(|slot| &mut slot.data) {
			Some(Data::Element { attributes, .. }) => match attributes.iter_mut().find(|(n, _)| n == name) {
				Some((_, existing)) if existing == value => false,
				Some((_, existing)) => {
					value.clone_into(existing);
					true
				}
				None => {
					attributes.push((name.to_owned(), value.to_owned()));
					true
				}
			},
			_ => return error!("Tried to set attribute {:?} on a non-element node {:?}", name, id),
		};
		if changed {
			self.record(|| Mutation::SetAttribute { node: id, name: name.to_owned(), value: value.to_owned() });
		}
	}

	pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
		let removed = match self.slot_mut(id).map(|slot| &mut slot.data) {
			Some(Data::Element { attributes, .. }) => {
				let before = attributes.len();
				attributes.retain(|(n, _)| n != name);
				before != attributes.len()
			}
			_ => false,
		};
		if removed {
			self.record(|| Mutation::RemoveAttribute { node: id, name: name.to_owned() });
		}
	}

	#[must_use]
	pub fn id_of(&self, id: NodeId) -> Option<&str> {
		self.attribute(id, "id").filter(|id| !id.is_empty())
	}

	#[must_use]
	pub fn has_class(&self, id: NodeId, class: &str) -> bool {
		self.attribute(id, "class").map_or(false, |classes| classes.split_ascii_whitespace().any(|c| c == class))
	}

	pub fn add_class(&mut self, id: NodeId, class: &str) {
		if self.has_class(id, class) {
			return;
		}
		let classes = match self.attribute(id, "class") {
			Some(classes) if !classes.trim().is_empty() => format!("{} {}", classes.trim(), class),
			_ => class.to_owned(),
		};
		self.set_attribute(id, "class", &classes);
	}

	/// Removes `class`, and the whole attribute if no class is left.
	pub fn remove_class(&mut self, id: NodeId, class: &str) {
		let classes = match self.attribute(id, "class") {
			Some(classes) => classes.split_ascii_whitespace().filter(|c| *c != class).collect::<Vec<_>>().join(" "),
			None => return,
		};
		if classes.is_empty() {
			self.remove_attribute(id, "class");
		} else {
			self.set_attribute(id, "class", &classes);
		}
	}

	#[must_use]
	pub fn privates(&self, id: NodeId) -> Option<&Privates> {
		match &self.slot(id)?.data {
			Data::Element { privates, .. } => Some(privates),
			_ => None,
		}
	}

	pub fn privates_mut(&mut self, id: NodeId) -> Option<&mut Privates> {
		match &mut self.slot_mut(id)?.data {
			Data::Element { privates, .. } => Some(privates),
			_ => None,
		}
	}

	/// Data of a text or comment node.
	#[must_use]
	pub fn text(&self, id: NodeId) -> Option<&str> {
		match &self.slot(id)?.data {
			Data::Text(data) | Data::Comment(data) => Some(data),
			_ => None,
		}
	}

	pub fn set_text(&mut self, id: NodeId, value: &str) {
		match self.slot_mut(id).map(|slot| &mut slot.data) {
			Some(Data::Text(data) | Data::Comment(data)) => {
				if data == value {
					return;
				}
				value.clone_into(data);
			}
			_ => return error!("Tried to set character data of {:?}, which is not a text or comment node", id),
		}
		self.record(|| Mutation::SetData { node: id, data: value.to_owned() });
	}

	#[must_use]
	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id)?.parent
	}

	#[must_use]
	pub fn children(&self, id: NodeId) -> &[NodeId] {
		self.slot(id).map_or(&[], |slot| &slot.children)
	}

	#[must_use]
	pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
		self.children(id).iter().copied().filter(|&child| self.is_element(child)).collect()
	}

	#[must_use]
	pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
		self.children(id).first().copied()
	}

	#[must_use]
	pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
		let parent = self.parent(id)?;
		let siblings = self.children(parent);
		let index = siblings.iter().position(|&sibling| sibling == id)?;
		siblings.get(index + 1).copied()
	}

	/// Whether `id` is attached to the document node.
	#[must_use]
	pub fn is_connected(&self, id: NodeId) -> bool {
		self.contains(self.root, id)
	}

	/// Whether `node` is `ancestor` or one of its descendants.
	#[must_use]
	pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
		let mut current = Some(node);
		while let Some(id) = current {
			if id == ancestor {
				return true;
			}
			current = self.parent(id);
		}
		false
	}

	/// Removes `id` from its parent, if any. The node stays allocated.
	pub fn detach(&mut self, id: NodeId) {
		let parent = match self.slot(id).and_then(|slot| slot.parent) {
			Some(parent) => parent,
			None => return,
		};
		if let Some(slot) = self.slot_mut(parent) {
			slot.children.retain(|&child| child != id);
		}
		if let Some(slot) = self.slot_mut(id) {
			slot.parent = None;
		}
		if self.active.map_or(false, |active| self.contains(id, active)) {
			trace!("Focused element was detached. Blurring.");
			self.blur();
		}
		self.record(|| Mutation::Detach { node: id });
	}

	/// Inserts `node` into `parent` before `before`, or at the end if `before` is [`None`].
	/// `node` is moved if it already has a parent.
	pub fn insert_before(&mut self, parent: NodeId, node: NodeId, before: Option<NodeId>) {
		if node == parent || self.contains(node, parent) {
			return error!("Refusing to insert {:?} into its own subtree", node);
		}
		let was_active = self.active.filter(|&active| self.contains(node, active));
		self.detach(node);
		let slot = match self.slot_mut(parent) {
			Some(slot) => slot,
			None => return error!("Tried to insert into freed node {:?}", parent),
		};
		let index = before.and_then(|before| slot.children.iter().position(|&child| child == before)).unwrap_or(slot.children.len());
		slot.children.insert(index, node);
		if let Some(slot) = self.slot_mut(node) {
			slot.parent = Some(parent);
		}
		self.record(|| Mutation::Insert { parent, node, before });
		// Moving a node within the document keeps it focused.
		if let Some(active) = was_active {
			if self.is_connected(active) {
				self.active = Some(active);
			}
		}
	}

	pub fn append_child(&mut self, parent: NodeId, node: NodeId) {
		self.insert_before(parent, node, None);
	}

	/// Moves all children of `from` to the end of `to`.
	pub fn move_children(&mut self, from: NodeId, to: NodeId) {
		for child in self.children(from).to_vec() {
			self.append_child(to, child);
		}
	}

	/// Puts `new` where `old` is and detaches `old`.
	pub fn replace_with(&mut self, old: NodeId, new: NodeId) {
		if let Some(parent) = self.parent(old) {
			self.insert_before(parent, new, Some(old));
			self.detach(old);
		}
	}

	/// Detaches and deallocates `id` and its subtree.
	pub fn free(&mut self, id: NodeId) {
		if id == self.root {
			return error!("Refusing to free the document node");
		}
		self.detach(id);
		let mut stack = vec![id];
		while let Some(id) = stack.pop() {
			let entry = match self.slots.get_mut(id.index) {
				Some(entry) if entry.generation == id.generation => entry,
				_ => continue,
			};
			if let Some(slot) = entry.slot.take() {
				self.free.push(id.index);
				stack.extend(slot.children);
				self.record(|| Mutation::Free { node: id });
			}
		}
	}

	pub fn clone_node(&mut self, id: NodeId, deep: bool) -> Option<NodeId> {
		let data = self.slot(id)?.data.clone();
		let clone = match data {
			Data::Document | Data::Fragment => self.create_fragment(),
			Data::Text(text) => self.create_text(&text),
			Data::Comment(text) => self.create_comment(&text),
			Data::Element { tag, attributes, privates } => {
				let clone = self.create_element(&tag);
				for (name, value) in &attributes {
					self.set_attribute(clone, name, value);
				}
				if let Some(p) = self.privates_mut(clone) {
					*p = privates;
				}
				clone
			}
		};
		if deep {
			for child in self.children(id).to_vec() {
				if let Some(child) = self.clone_node(child, true) {
					self.append_child(clone, child);
				}
			}
		}
		Some(clone)
	}

	/// Structural equality: kind, tag, attributes (in order) and children.
	#[must_use]
	pub fn is_equal_node(&self, a: NodeId, b: NodeId) -> bool {
		let (slot_a, slot_b) = match (self.slot(a), self.slot(b)) {
			(Some(a), Some(b)) => (a, b),
			_ => return false,
		};
		let same_data = match (&slot_a.data, &slot_b.data) {
			(Data::Text(a), Data::Text(b)) | (Data::Comment(a), Data::Comment(b)) => a == b,
			(Data::Element { tag: t_a, attributes: a_a, .. }, Data::Element { tag: t_b, attributes: a_b, .. }) => t_a == t_b && a_a == a_b,
			(Data::Fragment, Data::Fragment) | (Data::Document, Data::Document) => true,
			_ => false,
		};
		same_data
			&& slot_a.children.len() == slot_b.children.len()
			&& slot_a.children.iter().zip(&slot_b.children).all(|(&a, &b)| self.is_equal_node(a, b))
	}

	/// All descendants of `id` in document order, excluding `id`.
	#[must_use]
	pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
		let mut result = Vec::new();
		let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
		while let Some(node) = stack.pop() {
			result.push(node);
			stack.extend(self.children(node).iter().rev().copied());
		}
		result
	}

	#[must_use]
	pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
		selector.matches(self, id)
	}

	/// Descendant elements of `scope` matching `selector`, in document order.
	#[must_use]
	pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
		self.descendants(scope).into_iter().filter(|&node| self.is_element(node) && selector.matches(self, node)).collect()
	}

	/// Descendant elements of `scope` for which `predicate` holds, in document order.
	pub fn filter_elements(&self, scope: NodeId, mut predicate: impl FnMut(&Self, NodeId) -> bool) -> Vec<NodeId> {
		self.descendants(scope).into_iter().filter(|&node| self.is_element(node) && predicate(self, node)).collect()
	}

	/// The closest inclusive ancestor element of `id` for which `predicate` holds.
	pub fn closest(&self, id: NodeId, mut predicate: impl FnMut(&Self, NodeId) -> bool) -> Option<NodeId> {
		let mut current = Some(id);
		while let Some(node) = current {
			if self.is_element(node) && predicate(self, node) {
				return Some(node);
			}
			current = self.parent(node);
		}
		None
	}

	/// Finds an attached element by its `id` attribute.
	#[must_use]
	pub fn element_by_id(&self, element_id: &str) -> Option<NodeId> {
		self.element_by_id_within(self.root, element_id)
	}

	/// Finds an element by its `id` attribute within `scope` (inclusive).
	#[must_use]
	pub fn element_by_id_within(&self, scope: NodeId, element_id: &str) -> Option<NodeId> {
		if self.id_of(scope) == Some(element_id) {
			return Some(scope);
		}
		self.descendants(scope).into_iter().find(|&node| self.id_of(node) == Some(element_id))
	}

	#[must_use]
	pub fn inner_html(&self, id: NodeId) -> String {
		let mut buffer = String::new();
		for &child in self.children(id) {
			html::serialize_into(self, child, &mut buffer);
		}
		buffer
	}

	#[must_use]
	pub fn outer_html(&self, id: NodeId) -> String {
		let mut buffer = String::new();
		html::serialize_into(self, id, &mut buffer);
		buffer
	}

	/// Replaces the children of `id` with parsed `html`.
	pub fn set_inner_html(&mut self, id: NodeId, html: &str) {
		self.clear_children(id);
		let fragment = self.parse_fragment(html);
		self.move_children(fragment, id);
		self.free(fragment);
	}

	pub fn clear_children(&mut self, id: NodeId) {
		for child in self.children(id).to_vec() {
			self.free(child);
		}
	}

	/// Concatenated text content.
	#[must_use]
	pub fn inner_text(&self, id: NodeId) -> String {
		self.descendants(id).into_iter().filter(|&node| self.kind(node) == Some(NodeKind::Text)).filter_map(|node| self.text(node)).collect()
	}

	/// Replaces the children of `id` with a single text node.
	pub fn set_inner_text(&mut self, id: NodeId, text: &str) {
		self.clear_children(id);
		let node = self.create_text(text);
		self.append_child(id, node);
	}

	#[must_use]
	pub fn active_element(&self) -> Option<NodeId> {
		self.active
	}

	pub fn focus(&mut self, id: NodeId) {
		if self.is_element(id) && self.is_connected(id) {
			if self.active != Some(id) {
				self.selection = None;
			}
			self.active = Some(id);
		}
	}

	pub fn blur(&mut self) {
		self.active = None;
		self.selection = None;
	}

	#[must_use]
	pub fn selection(&self) -> Option<(usize, usize)> {
		self.selection
	}

	/// Sets the selection range of the focused element.
	pub fn set_selection(&mut self, start: usize, end: usize) {
		if self.active.is_some() {
			self.selection = Some((start, end));
		}
	}

	/// Sets the document title from the first `<title>`, honouring its `data-prefix`/`data-suffix`.
	pub fn put_title(&mut self, title: &str) {
		let root = self.root;
		let element = match self.filter_elements(root, |document, node| document.tag_name(node) == Some("title")).into_iter().next() {
			Some(element) => element,
			None => return trace!("No <title> element to update."),
		};
		let text = format!(
			"{}{}{}",
			self.attribute(element, "data-prefix").unwrap_or_default(),
			title,
			self.attribute(element, "data-suffix").unwrap_or_default()
		);
		self.set_inner_text(element, &text);
	}

	#[must_use]
	pub fn title(&self) -> Option<String> {
		self.filter_elements(self.root, |document, node| document.tag_name(node) == Some("title")).into_iter().next().map(|title| self.inner_text(title))
	}
}
