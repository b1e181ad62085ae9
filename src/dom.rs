//! Protocol-level queries over a [`Document`].

use crate::{
	consts::{CHECKABLE_INPUTS, FOCUSABLE_INPUTS, PHX_COMPONENT, PHX_PARENT_ID, PHX_VIEW},
	document::{Document, NodeId},
	rendered::Cid,
};
use hashbrown::HashSet;
use tracing::error;

#[must_use]
pub fn component_id(document: &Document, node: NodeId) -> Option<Cid> {
	document.attribute(node, PHX_COMPONENT).and_then(|cid| cid.parse().ok())
}

/// Elements of component `cid` within `scope` (exclusive), in document order.
#[must_use]
pub fn find_component_nodes(document: &Document, scope: NodeId, cid: Cid) -> Vec<NodeId> {
	document.filter_elements(scope, |document, node| component_id(document, node) == Some(cid))
}

#[must_use]
pub fn find_first_component_node(document: &Document, scope: NodeId, cid: Cid) -> Option<NodeId> {
	find_component_nodes(document, scope, cid).into_iter().next()
}

/// Of `cids`, those whose elements aren't nested within the elements of another one of `cids`.
///
/// Patching these covers every component in `cids`.
#[must_use]
pub fn find_parent_cids(document: &Document, scope: NodeId, cids: &[Cid]) -> Vec<Cid> {
	let mut parents = cids.iter().copied().collect::<HashSet<_>>();
	for &cid in cids {
		for node in find_component_nodes(document, scope, cid) {
			for child in document.filter_elements(node, |document, child| document.has_attribute(child, PHX_COMPONENT)) {
				if let Some(child_cid) = component_id(document, child) {
					parents.remove(&child_cid);
				}
			}
		}
	}
	cids.iter().copied().filter(|cid| parents.contains(cid)).collect()
}

/// Nested view placeholders within `scope` that belong to view `parent_id`.
#[must_use]
pub fn find_phx_children(document: &Document, scope: NodeId, parent_id: &str) -> Vec<NodeId> {
	document.filter_elements(scope, |document, node| document.has_attribute(node, PHX_VIEW) && document.attribute(node, PHX_PARENT_ID) == Some(parent_id))
}

#[must_use]
pub fn is_phx_child(document: &Document, node: NodeId) -> bool {
	document.attribute(node, PHX_PARENT_ID).map_or(false, |parent| !parent.is_empty())
}

#[must_use]
pub fn is_phx_view(document: &Document, node: NodeId) -> bool {
	document.has_attribute(node, PHX_VIEW)
}

/// The closest inclusive ancestor that is a view element.
#[must_use]
pub fn closest_view(document: &Document, node: NodeId) -> Option<NodeId> {
	document.closest(node, is_phx_view)
}

/// The closest inclusive ancestor of `node` carrying `binding`, without leaving `node`'s view or crossing `border`.
///
/// With `value`, the binding must also have that value.
#[must_use]
pub fn closest_phx_binding(document: &Document, node: NodeId, binding: &str, value: Option<&str>, border: Option<NodeId>) -> Option<NodeId> {
	let mut current = Some(node);
	while let Some(element) = current.filter(|&element| document.is_element(element)) {
		if Some(element) == border {
			return None;
		}
		match document.attribute(element, binding) {
			Some(found) if value.map_or(true, |value| value == found) => return Some(element),
			_ => (),
		}
		if is_phx_view(document, element) {
			return None;
		}
		current = document.parent(element);
	}
	None
}

/// Whether `node` has `binding` set to one of `kinds`.
#[must_use]
pub fn is_phx_update(document: &Document, node: NodeId, binding: &str, kinds: &[&str]) -> bool {
	document.attribute(node, binding).map_or(false, |kind| kinds.contains(&kind))
}

#[must_use]
pub fn is_form_input(document: &Document, node: NodeId) -> bool {
	matches!(document.tag_name(node), Some("input" | "select" | "textarea"))
}

fn input_type(document: &Document, node: NodeId) -> Option<String> {
	match document.tag_name(node)? {
		"input" => Some(document.attribute(node, "type").unwrap_or("text").to_ascii_lowercase()),
		"textarea" => Some("textarea".to_owned()),
		_ => None,
	}
}

/// Text-like controls whose selection is restored after a patch.
#[must_use]
pub fn is_textual_input(document: &Document, node: NodeId) -> bool {
	input_type(document, node).map_or(false, |kind| FOCUSABLE_INPUTS.contains(&kind.as_str()))
}

#[must_use]
pub fn is_checkable_input(document: &Document, node: NodeId) -> bool {
	document.tag_name(node) == Some("input") && input_type(document, node).map_or(false, |kind| CHECKABLE_INPUTS.contains(&kind.as_str()))
}

/// The form an input belongs to.
#[must_use]
pub fn form_of(document: &Document, node: NodeId) -> Option<NodeId> {
	document.closest(node, |document, ancestor| document.tag_name(ancestor) == Some("form"))
}

/// The value a control would submit, if it has one.
#[must_use]
pub fn control_value(document: &Document, node: NodeId) -> Option<String> {
	match document.tag_name(node)? {
		"textarea" => Some(document.inner_text(node)),
		"select" => {
			let options = document.filter_elements(node, |document, option| document.tag_name(option) == Some("option"));
			options
				.iter()
				.find(|&&option| document.has_attribute(option, "selected"))
				.or_else(|| options.first())
				.map(|&option| document.attribute(option, "value").map_or_else(|| document.inner_text(option), str::to_owned))
		}
		"input" | "button" | "option" => document.attribute(node, "value").map(str::to_owned).or_else(|| {
			// Browsers default the value of checkboxes and radio buttons to "on".
			is_checkable_input(document, node).then(|| "on".to_owned())
		}),
		_ => None,
	}
}

/// The `name=value` pairs of a form's successful controls, in document order.
#[must_use]
pub fn form_entries(document: &Document, form: NodeId) -> Vec<(String, String)> {
	let mut entries = Vec::new();
	for control in document.filter_elements(form, |document, node| matches!(document.tag_name(node), Some("input" | "select" | "textarea"))) {
		let name = match document.attribute(control, "name") {
			Some(name) if !name.is_empty() => name.to_owned(),
			_ => continue,
		};
		if document.has_attribute(control, "disabled") {
			continue;
		}
		let kind = input_type(document, control).unwrap_or_default();
		if matches!(kind.as_str(), "submit" | "button" | "reset" | "image" | "file") {
			continue;
		}
		if is_checkable_input(document, control) && !document.has_attribute(control, "checked") {
			continue;
		}
		if let Some(value) = control_value(document, control) {
			entries.push((name, value));
		}
	}
	entries
}

/// Url-encodes a form's entries followed by `meta`.
#[must_use]
pub fn serialize_form(document: &Document, form: NodeId, meta: &[(&str, &str)]) -> String {
	let mut serializer = url::form_urlencoded::Serializer::new(String::new());
	for (name, value) in form_entries(document, form) {
		serializer.append_pair(&name, &value);
	}
	for (name, value) in meta {
		serializer.append_pair(name, value);
	}
	serializer.finish()
}

/// Logs every element id that occurs more than once in the attached document.
pub fn detect_duplicate_ids(document: &Document) {
	let mut ids = HashSet::new();
	for node in document.filter_elements(document.root(), |document, node| document.id_of(node).is_some()) {
		if let Some(id) = document.id_of(node) {
			if !ids.insert(id) {
				error!("Multiple IDs detected: {}. Ensure unique element ids.", id);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn parent_cids_skip_nested_components() {
		let document = Document::from_html(
			r#"<div id="v"><div data-phx-component="1"><p data-phx-component="2"></p></div><div data-phx-component="3"></div></div>"#,
		);
		let view = document.element_by_id("v").unwrap();
		assert_eq!(find_parent_cids(&document, view, &[2, 1, 3]), vec![1, 3]);
		assert_eq!(find_parent_cids(&document, view, &[2]), vec![2]);
	}

	#[test]
	fn bindings_are_looked_up_within_the_view() {
		let document = Document::from_html(
			r#"<div id="outer" phx-click="outer"><div id="v" data-phx-view="V"><a id="a" phx-click="go"><b id="b"></b></a><i id="i"></i></div></div>"#,
		);
		let id = |id| document.element_by_id(id).unwrap();
		assert_eq!(closest_phx_binding(&document, id("b"), "phx-click", None, None), Some(id("a")));
		assert_eq!(closest_phx_binding(&document, id("b"), "phx-click", Some("other"), None), None);
		assert_eq!(closest_phx_binding(&document, id("b"), "phx-click", None, Some(id("a"))), None);
		assert_eq!(closest_phx_binding(&document, id("i"), "phx-click", None, None), None);
	}

	#[test]
	fn form_serialization() {
		let document = Document::from_html(
			r#"<form id="f"><input name="a" value="x y"><input type="checkbox" name="c"><input type="checkbox" name="d" checked><textarea name="t">hi</textarea><select name="s"><option value="1">One</option><option selected>Two</option></select><input name="off" value="n" disabled><button name="b" value="v">Go</button></form>"#,
		);
		let form = document.element_by_id("f").unwrap();
		assert_eq!(serialize_form(&document, form, &[("_target", "a")]), "a=x+y&d=on&t=hi&s=Two&_target=a");
	}
}
