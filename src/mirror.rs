//! Keeps a browser DOM subtree in sync with a [`Document`] by replaying its [`Mutation`] journal.

use crate::{
	document::{Document, Mutation, NodeId},
	load::{load_child_nodes, Bindings},
};
use tracing::{error, trace, trace_span};
use wasm_bindgen::JsCast;
use web_sys::{CharacterData, Element, Node};

pub struct Mirror {
	owner_document: web_sys::Document,
	bindings: Bindings,
}

impl Mirror {
	/// Loads the children of `root` into a new [`Document`] and starts journaling it.
	///
	/// Returns [`None`] iff `root` has no owner document.
	#[must_use]
	pub fn load(root: &Element) -> Option<(Document, Self)> {
		let owner_document = root.owner_document()?;
		let mut document = Document::new();
		let mut bindings = Bindings::new();
		let document_root = document.root();
		load_child_nodes(&mut document, document_root, &root.child_nodes(), &mut bindings);
		bindings.insert(document_root, root.clone().into());
		document.enable_journal();
		Some((document, Self { owner_document, bindings }))
	}

	#[must_use]
	pub fn node(&self, id: NodeId) -> Option<&Node> {
		self.bindings.get(&id)
	}

	/// Finds the [`NodeId`] of a browser node, like an event target.
	#[must_use]
	pub fn find(&self, node: &Node) -> Option<NodeId> {
		self.bindings.iter().find(|(_, bound)| bound.is_same_node(Some(node))).map(|(&id, _)| id)
	}

	/// Replays all changes made to `document` since the last call.
	pub fn apply(&mut self, document: &mut Document) {
		let journal = document.take_journal();
		let span = trace_span!("Mirror::apply", mutations = journal.len());
		let _enter = span.enter();
		for mutation in journal {
			self.replay(mutation);
		}
	}

	/// Parsed fragments are never journaled, so their browser counterparts are created on first use.
	fn parent_node(&mut self, id: NodeId) -> Node {
		let owner_document = &self.owner_document;
		self.bindings.entry(id).or_insert_with(|| owner_document.create_document_fragment().into()).clone()
	}

	fn replay(&mut self, mutation: Mutation) {
		if cfg!(feature = "dangerous-logging") {
			trace!(?mutation, "Replaying");
		}
		match mutation {
			Mutation::CreateElement { node, tag } => match self.owner_document.create_element(&tag) {
				Ok(element) => {
					self.bindings.insert(node, element.into());
				}
				Err(error) => error!("Failed to create <{}>: {:?}", tag, error),
			},
			Mutation::CreateText { node, data } => {
				self.bindings.insert(node, self.owner_document.create_text_node(&data).into());
			}
			Mutation::CreateComment { node, data } => {
				self.bindings.insert(node, self.owner_document.create_comment(&data).into());
			}
			Mutation::Insert { parent, node, before } => {
				let parent = self.parent_node(parent);
				let node = match self.bindings.get(&node) {
					Some(node) => node,
					None => return error!("Tried to insert unknown node {:?}", node),
				};
				let before = before.and_then(|before| self.bindings.get(&before));
				if let Err(error) = parent.insert_before(node, before) {
					error!("Failed to insert the node: {:?}", error);
				}
			}
			Mutation::Detach { node } => {
				if let Some(node) = self.bindings.get(&node) {
					if let Some(parent) = node.parent_node() {
						if let Err(error) = parent.remove_child(node) {
							error!("Failed to remove the node: {:?}", error);
						}
					}
				}
			}
			Mutation::SetAttribute { node, name, value } => match self.bindings.get(&node).and_then(|node| node.dyn_ref::<Element>()) {
				Some(element) => {
					if let Err(error) = element.set_attribute(&name, &value) {
						error!("Failed to set attribute {:?}: {:?}", name, error);
					}
				}
				None => error!("Expected an element to set {:?} on but found {:?}", name, node),
			},
			Mutation::RemoveAttribute { node, name } => {
				if let Some(element) = self.bindings.get(&node).and_then(|node| node.dyn_ref::<Element>()) {
					if let Err(error) = element.remove_attribute(&name) {
						error!("Failed to remove attribute {:?}: {:?}", name, error);
					}
				}
			}
			Mutation::SetData { node, data } => match self.bindings.get(&node).and_then(|node| node.dyn_ref::<CharacterData>()) {
				Some(character_data) => character_data.set_data(&data),
				None => error!("Expected character data at {:?}", node),
			},
			Mutation::Free { node } => {
				self.bindings.remove(&node);
			}
		}
	}
}
