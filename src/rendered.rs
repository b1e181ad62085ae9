//! The diff-tree a view keeps of its server-rendered markup.
//!
//! A [`Diff`] arrives as JSON and is merged into a [`RenderTree`], which can then be serialized
//! as a whole or one component at a time.

use crate::{
	consts::{COMPONENTS, DYNAMICS, PHX_COMPONENT, PHX_SKIP, STATIC, TITLE},
	document::{Document, NodeKind},
	error::DiffError,
};
use hashbrown::{HashMap, HashSet};
use serde_json::{Map, Value};
use std::collections::{btree_map::Entry, BTreeMap};
use tracing::{error, instrument, trace, warn};

/// Component id.
pub type Cid = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Literal(String),
	/// Expands to the component's markup from the side-table.
	Component(Cid),
	/// `statics.len() - 1` slots interleaved with `statics`. Missing slots render as empty text.
	Template { statics: Vec<String>, slots: BTreeMap<usize, Node> },
	/// `statics` repeated once per item, each item filling the slots in order.
	List { statics: Vec<String>, items: Vec<Vec<Node>> },
}

/// One position of a [`Diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffNode {
	/// Carries statics (or is a scalar) and replaces whatever was at this position.
	Replace(Node),
	/// No statics, so this is merged key by key.
	///
	/// `items`, if present, always replace the list items wholesale.
	Patch { slots: BTreeMap<usize, DiffNode>, items: Option<Vec<Vec<Node>>> },
}

impl DiffNode {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Patch { slots, items: None } if slots.is_empty())
	}

	/// What this becomes where there is nothing to merge into.
	fn to_node(&self) -> Node {
		match self {
			Self::Replace(node) => node.clone(),
			Self::Patch { items: Some(items), .. } => Node::List { statics: Vec::new(), items: items.clone() },
			Self::Patch { slots, items: None } => Node::Template {
				statics: Vec::new(),
				slots: slots.iter().map(|(&i, slot)| (i, slot.to_node())).collect(),
			},
		}
	}
}

/// An incremental update of a [`RenderTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
	title: Option<String>,
	root: Option<DiffNode>,
	components: BTreeMap<Cid, DiffNode>,
}

impl Diff {
	/// # Errors
	///
	/// Iff `value` doesn't follow the diff wire format.
	#[instrument(skip(value))]
	pub fn from_json(value: &Value) -> Result<Self, DiffError> {
		let object = value.as_object().ok_or_else(|| DiffError::NotAnObject { path: String::new() })?;

		let title = match object.get(TITLE) {
			None => None,
			Some(Value::String(title)) => Some(title.clone()),
			Some(_) => return Err(DiffError::InvalidTitle),
		};

		let mut components = BTreeMap::new();
		match object.get(COMPONENTS) {
			None => (),
			Some(Value::Object(table)) => {
				for (key, component) in table {
					let cid = key.parse::<Cid>().map_err(|_| DiffError::InvalidComponentId { key: key.clone() })?;
					let path = format!("{}.{}", COMPONENTS, key);
					let component = match component {
						Value::Object(component) => parse_object(component, &path)?,
						_ => return Err(DiffError::NotAnObject { path }),
					};
					components.insert(cid, component);
				}
			}
			Some(_) => return Err(DiffError::NotAnObject { path: COMPONENTS.to_owned() }),
		}

		let has_root = object.keys().any(|key| key != TITLE && key != COMPONENTS);
		let root = if has_root { Some(parse_object(object, "")?) } else { None };

		Ok(Self { title, root, components })
	}

	/// Whether this diff carries nothing at all, not even a title.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.title.is_none() && self.root.is_none() && self.components.is_empty()
	}

	/// Whether only components (and possibly the title) change.
	#[must_use]
	pub fn is_component_only(&self) -> bool {
		self.root.is_none() && !self.components.is_empty()
	}

	#[must_use]
	pub fn component_cids(&self) -> Vec<Cid> {
		self.components.keys().copied().collect()
	}

	#[must_use]
	pub fn component(&self, cid: Cid) -> Option<&DiffNode> {
		self.components.get(&cid)
	}

	#[must_use]
	pub fn title(&self) -> Option<&str> {
		self.title.as_deref()
	}
}

fn join_path(path: &str, key: &str) -> String {
	if path.is_empty() {
		key.to_owned()
	} else {
		format!("{}.{}", path, key)
	}
}

fn parse_value(value: &Value, path: &str) -> Result<DiffNode, DiffError> {
	Ok(DiffNode::Replace(match value {
		Value::Object(object) => return parse_object(object, path),
		Value::String(text) => Node::Literal(text.clone()),
		Value::Number(number) => match number.as_u64().and_then(|n| Cid::try_from(n).ok()) {
			Some(cid) => Node::Component(cid),
			None => Node::Literal(number.to_string()),
		},
		Value::Bool(value) => Node::Literal(value.to_string()),
		Value::Null => Node::Literal(String::new()),
		Value::Array(_) => return Err(DiffError::NotAnObject { path: path.to_owned() }),
	}))
}

fn parse_object(object: &Map<String, Value>, path: &str) -> Result<DiffNode, DiffError> {
	let statics = match object.get(STATIC) {
		None => None,
		Some(Value::Array(statics)) => Some(
			statics
				.iter()
				.map(|s| s.as_str().map(str::to_owned))
				.collect::<Option<Vec<_>>>()
				.ok_or_else(|| DiffError::InvalidStatics { path: path.to_owned() })?,
		),
		Some(_) => return Err(DiffError::InvalidStatics { path: path.to_owned() }),
	};

	let items = match object.get(DYNAMICS) {
		None => None,
		Some(Value::Array(items)) => {
			let mut parsed = Vec::with_capacity(items.len());
			for (i, item) in items.iter().enumerate() {
				let item = item.as_array().ok_or_else(|| DiffError::InvalidDynamics { path: path.to_owned() })?;
				let item_path = join_path(path, &format!("{}.{}", DYNAMICS, i));
				parsed.push(item.iter().map(|value| parse_value(value, &item_path).map(|node| node.to_node())).collect::<Result<Vec<_>, _>>()?);
			}
			Some(parsed)
		}
		Some(_) => return Err(DiffError::InvalidDynamics { path: path.to_owned() }),
	};

	let mut slots = BTreeMap::new();
	for (key, value) in object {
		if let Ok(index) = key.parse::<usize>() {
			slots.insert(index, parse_value(value, &join_path(path, key))?);
		} else if ![STATIC, DYNAMICS, COMPONENTS, TITLE].contains(&key.as_str()) {
			trace!("Ignoring unknown diff key {:?} at `{}`", key, path);
		}
	}

	Ok(match statics {
		Some(statics) => DiffNode::Replace(match items {
			Some(items) => Node::List { statics, items },
			None => Node::Template { statics, slots: slots.iter().map(|(&i, slot)| (i, slot.to_node())).collect() },
		}),
		None => DiffNode::Patch { slots, items },
	})
}

fn merge_node(target: &mut Node, diff: &DiffNode) {
	let (slots, items) = match diff {
		DiffNode::Replace(node) => return *target = node.clone(),
		DiffNode::Patch { slots, items } => (slots, items),
	};

	let (statics, mut target_slots) = match core::mem::replace(target, Node::Literal(String::new())) {
		Node::Template { statics, slots } => (statics, slots),
		// Stale items are dropped so they aren't rendered with the new template.
		Node::List { statics, .. } => (statics, BTreeMap::new()),
		Node::Literal(_) | Node::Component(_) => {
			warn!("Merging a diff without statics into a position that has no template");
			return *target = diff.to_node();
		}
	};

	*target = match items {
		Some(items) => Node::List { statics, items: items.clone() },
		None => {
			for (&i, slot) in slots {
				match target_slots.entry(i) {
					Entry::Occupied(entry) => merge_node(entry.into_mut(), slot),
					Entry::Vacant(entry) => {
						entry.insert(slot.to_node());
					}
				}
			}
			Node::Template { statics, slots: target_slots }
		}
	};
}

/// The merged render state of one view.
#[derive(Debug, Clone)]
pub struct RenderTree {
	view_id: String,
	root: Node,
	components: BTreeMap<Cid, Node>,
}

impl RenderTree {
	#[must_use]
	pub fn new(view_id: &str, diff: &Diff) -> Self {
		let mut tree = Self {
			view_id: view_id.to_owned(),
			root: Node::Template { statics: Vec::new(), slots: BTreeMap::new() },
			components: BTreeMap::new(),
		};
		tree.merge(diff);
		tree
	}

	/// A diff with statics at the top replaces the root template.
	/// Components are always merged one by one.
	pub fn merge(&mut self, diff: &Diff) {
		if let Some(root) = &diff.root {
			merge_node(&mut self.root, root);
		}
		for (&cid, component) in &diff.components {
			match self.components.entry(cid) {
				Entry::Occupied(entry) => merge_node(entry.into_mut(), component),
				Entry::Vacant(entry) => {
					entry.insert(component.to_node());
				}
			}
		}
	}

	#[must_use]
	pub fn has_component(&self, cid: Cid) -> bool {
		self.components.contains_key(&cid)
	}

	pub fn prune_cids(&mut self, cids: &[Cid]) {
		for cid in cids {
			self.components.remove(cid);
		}
	}

	/// Serializes the whole tree.
	///
	/// If `only_cids` is given, every other component is rendered as an emptied [`PHX_SKIP`] placeholder.
	#[must_use]
	#[instrument(skip(self, only_cids), fields(view_id = %self.view_id))]
	pub fn to_html(&self, only_cids: Option<&HashSet<Cid>>) -> String {
		let mut buffer = String::new();
		self.write_node(&self.root, &mut buffer, only_cids, &mut Walk::default());
		buffer
	}

	/// Serializes a single component with its root elements tagged.
	#[must_use]
	#[instrument(skip(self), fields(view_id = %self.view_id))]
	pub fn component_to_html(&self, cid: Cid) -> String {
		self.component_html(cid, None, &mut Walk::default())
	}

	/// How often `cid` is rendered, including from within other components.
	#[must_use]
	pub fn occurrences(&self, cid: Cid) -> usize {
		self.count_occurrences(&self.root, cid, &mut Vec::new())
	}

	fn count_occurrences(&self, node: &Node, cid: Cid, stack: &mut Vec<Cid>) -> usize {
		match node {
			Node::Literal(_) => 0,
			&Node::Component(inner) => {
				if stack.contains(&inner) {
					return 0;
				}
				let nested = self.components.get(&inner).map_or(0, |component| {
					stack.push(inner);
					let nested = self.count_occurrences(component, cid, stack);
					stack.pop();
					nested
				});
				usize::from(inner == cid) + nested
			}
			Node::Template { slots, .. } => slots.values().map(|slot| self.count_occurrences(slot, cid, stack)).sum(),
			Node::List { items, .. } => items.iter().flatten().map(|slot| self.count_occurrences(slot, cid, stack)).sum(),
		}
	}

	fn write_node(&self, node: &Node, buffer: &mut String, only_cids: Option<&HashSet<Cid>>, walk: &mut Walk) {
		match node {
			Node::Literal(text) => buffer.push_str(text),
			&Node::Component(cid) => buffer.push_str(&self.component_html(cid, only_cids, walk)),
			Node::Template { statics, slots } => {
				let (first, rest) = match statics.split_first() {
					Some(split) => split,
					None => return,
				};
				buffer.push_str(first);
				for (i, text) in rest.iter().enumerate() {
					if let Some(slot) = slots.get(&i) {
						self.write_node(slot, buffer, only_cids, walk);
					}
					buffer.push_str(text);
				}
			}
			Node::List { statics, items } => {
				let (first, rest) = match statics.split_first() {
					Some(split) => split,
					None => return,
				};
				for item in items {
					buffer.push_str(first);
					for (i, text) in rest.iter().enumerate() {
						if let Some(slot) = item.get(i) {
							self.write_node(slot, buffer, only_cids, walk);
						}
						buffer.push_str(text);
					}
				}
			}
		}
	}

	fn component_html(&self, cid: Cid, only_cids: Option<&HashSet<Cid>>, walk: &mut Walk) -> String {
		let component = match self.components.get(&cid) {
			Some(component) => component,
			None => {
				error!("No component for CID {}", cid);
				return String::new();
			}
		};
		if walk.stack.contains(&cid) {
			error!("Component {} contains itself", cid);
			return String::new();
		}
		let occurrence = walk.occurrences.entry(cid).or_insert(0);
		let id_prefix = match *occurrence {
			0 => format!("{}-{}", self.view_id, cid),
			n => format!("{}-{}-{}", self.view_id, cid, n),
		};
		*occurrence += 1;

		let mut markup = String::new();
		walk.stack.push(cid);
		self.write_node(component, &mut markup, only_cids, walk);
		walk.stack.pop();

		let mut scratch = Document::new();
		let fragment = scratch.parse_fragment(&markup);
		let skip = only_cids.map_or(false, |cids| !cids.contains(&cid));
		let cid_text = cid.to_string();

		for (i, child) in scratch.children(fragment).to_vec().into_iter().enumerate() {
			if scratch.kind(child) == Some(NodeKind::Element) {
				scratch.set_attribute(child, PHX_COMPONENT, &cid_text);
				if scratch.id_of(child).is_none() {
					scratch.set_attribute(child, "id", &format!("{}-{}", id_prefix, i));
				}
				if skip {
					scratch.set_attribute(child, PHX_SKIP, "");
					scratch.clear_children(child);
				}
				continue;
			}

			let text = scratch.text(child).unwrap_or_default().to_owned();
			if text.trim().is_empty() {
				scratch.free(child);
			} else {
				if cfg!(feature = "dangerous-logging") {
					error!("Only HTML element tags are allowed at the root of components. Got: {:?} within component {}", text.trim(), cid);
				} else {
					error!("Only HTML element tags are allowed at the root of components (component {}).", cid);
				}
				let span = scratch.create_element("span");
				scratch.set_inner_text(span, &text);
				scratch.set_attribute(span, PHX_COMPONENT, &cid_text);
				scratch.replace_with(child, span);
				scratch.free(child);
			}
		}

		scratch.inner_html(fragment)
	}
}

/// State of one serialization pass.
#[derive(Default)]
struct Walk {
	/// Components being serialized, innermost last.
	stack: Vec<Cid>,
	/// Root ids of a component's later occurrences carry their occurrence number.
	occurrences: HashMap<Cid, usize>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	fn diff(value: Value) -> Diff {
		Diff::from_json(&value).unwrap()
	}

	#[test]
	fn nested_template() {
		let tree = RenderTree::new("v", &diff(json!({ "s": ["<div>", "</div>"], "0": { "s": ["Hi ", "!"], "0": "Ada" } })));
		assert_eq!(tree.to_html(None), "<div>Hi Ada!</div>");
	}

	#[test]
	fn patch_without_dynamics_turns_list_into_template() {
		let mut tree = RenderTree::new("v", &diff(json!({ "s": ["", ""], "0": { "s": ["<i>", "</i>"], "d": [["a"], ["b"]] } })));
		assert_eq!(tree.to_html(None), "<i>a</i><i>b</i>");
		tree.merge(&diff(json!({ "0": { "0": "c" } })));
		assert_eq!(tree.to_html(None), "<i>c</i>");
	}

	#[test]
	fn scalars() {
		let tree = RenderTree::new("v", &diff(json!({ "s": ["", "|", "|", "|", ""], "0": 1.5, "1": true, "2": -3, "3": null })));
		assert_eq!(tree.to_html(None), "1.5|true|-3|");
	}

	#[test]
	fn component_roots_are_stamped() {
		let tree = RenderTree::new(
			"v",
			&diff(json!({ "s": ["", ""], "0": 1, "c": { "1": { "s": [" <p>a</p>text<p id=\"own\">b</p>"] } } })),
		);
		assert_eq!(
			tree.to_html(None),
			r#"<p data-phx-component="1" id="v-1-1">a</p><span data-phx-component="1">text</span><p id="own" data-phx-component="1">b</p>"#
		);
	}

	#[test]
	fn repeated_components_get_their_own_root_ids() {
		let tree = RenderTree::new("v", &diff(json!({ "s": ["", "", ""], "0": { "s": ["", ""], "0": 2 }, "1": 2, "c": { "2": { "s": ["<b>x</b>"] } } })));
		assert_eq!(tree.occurrences(2), 2);
		assert_eq!(tree.occurrences(3), 0);
		assert_eq!(tree.to_html(None), r#"<b data-phx-component="2" id="v-2-0">x</b><b data-phx-component="2" id="v-2-1-0">x</b>"#);
		assert_eq!(tree.component_to_html(2), r#"<b data-phx-component="2" id="v-2-0">x</b>"#);
	}

	#[test]
	fn missing_component_renders_empty() {
		let tree = RenderTree::new("v", &diff(json!({ "s": ["<a>", "</a>"], "0": 9 })));
		assert_eq!(tree.to_html(None), "<a></a>");
	}

	#[test]
	fn invalid_diffs() {
		assert_eq!(Diff::from_json(&json!([])), Err(DiffError::NotAnObject { path: String::new() }));
		assert_eq!(Diff::from_json(&json!({ "s": [1] })), Err(DiffError::InvalidStatics { path: String::new() }));
		assert_eq!(Diff::from_json(&json!({ "c": { "x": {} } })), Err(DiffError::InvalidComponentId { key: "x".to_owned() }));
		assert_eq!(Diff::from_json(&json!({ "0": { "d": [1] } })), Err(DiffError::InvalidDynamics { path: "0".to_owned() }));
	}

	#[test]
	fn classification() {
		let only = diff(json!({ "title": "t", "c": { "2": { "0": "x" } } }));
		assert!(only.is_component_only());
		assert_eq!(only.component_cids(), vec![2]);
		assert_eq!(only.title(), Some("t"));
		assert!(!diff(json!({ "0": "x", "c": { "2": {} } })).is_component_only());
		assert!(diff(json!({})).is_empty());
		assert!(diff(json!({ "c": { "2": {} } })).component(2).unwrap().is_empty());
	}
}
