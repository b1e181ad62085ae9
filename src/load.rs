//! Imports an existing browser DOM subtree into a [`Document`].

use crate::document::{Document, NodeId};
use hashbrown::HashMap;
use tracing::warn;
use wasm_bindgen::JsCast;
use web_sys::{Comment, Element, NamedNodeMap, Node, NodeList, Text};

/// Browser nodes by the [`NodeId`] they were loaded as.
pub type Bindings = HashMap<NodeId, Node>;

/// Appends copies of `child_nodes` to `parent`, recording each pairing in `bindings`.
///
/// Node kinds other than elements, text and comments are skipped.
pub fn load_child_nodes(document: &mut Document, parent: NodeId, child_nodes: &NodeList, bindings: &mut Bindings) {
	for i in 0..child_nodes.length() {
		let child = match child_nodes.item(i) {
			Some(child) => child,
			None => continue,
		};
		let node = if let Some(element) = child.dyn_ref::<Element>() {
			load_element(document, element, bindings)
		} else if let Some(text) = child.dyn_ref::<Text>() {
			document.create_text(&text.data())
		} else if let Some(comment) = child.dyn_ref::<Comment>() {
			document.create_comment(&comment.data())
		} else {
			warn!("Skipping unrecognised child node: {:?}", child);
			continue;
		};
		document.append_child(parent, node);
		bindings.insert(node, child);
	}
}

/// Loads `element` and its subtree as a detached node.
pub fn load_element(document: &mut Document, element: &Element, bindings: &mut Bindings) -> NodeId {
	let node = document.create_element(&element.tag_name());
	load_attributes(document, node, &element.attributes());
	load_child_nodes(document, node, &element.child_nodes(), bindings);
	node
}

pub fn load_attributes(document: &mut Document, node: NodeId, attributes: &NamedNodeMap) {
	for i in 0..attributes.length() {
		if let Some(attribute) = attributes.item(i) {
			document.set_attribute(node, &attribute.name(), &attribute.value());
		}
	}
}
