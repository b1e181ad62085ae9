use crate::{
	config::Config,
	consts::{
		PHX_AUTO_RECOVER, PHX_CHANGE, PHX_COMPONENT, PHX_CONNECTED_CLASS, PHX_DISABLE_WITH, PHX_DISABLE_WITH_RESTORE, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS, PHX_PARENT_ID, PHX_REF,
		PHX_SESSION, PHX_STATIC, PHX_TARGET, PHX_TRACK_STATIC, PHX_VALUE, PHX_VIEW,
	},
	document::{Document, NodeId},
	dom,
	hook::ViewHooks,
	patch::BusyRef,
	rendered::{Cid, Diff, RenderTree},
	transport::{PageLoading, PushId},
};
use hashbrown::HashSet;
use serde_json::{json, Map, Value};
use tracing::{error, trace};

/// A diff or message that arrived while the view couldn't be patched. Replayed in arrival order.
#[derive(Debug, Clone)]
pub(crate) enum PendingUpdate {
	Diff { diff: Diff, cid: Option<Cid>, busy_ref: Option<BusyRef> },
	Message { event: String, payload: Value },
}

/// One server-backed view session.
///
/// Views are owned by their session tree and only handed out for inspection.
#[derive(Debug)]
pub struct View {
	pub(crate) id: String,
	pub(crate) root_id: String,
	pub(crate) parent_id: Option<String>,
	pub(crate) name: String,
	/// `None` while a nested view is only known from its parent's markup.
	pub(crate) el: Option<NodeId>,
	session: String,
	static_token: Option<String>,
	pub(crate) href: Option<String>,
	pub(crate) flash: Option<String>,
	pub(crate) join_count: u32,
	pub(crate) child_joins: u32,
	pub(crate) join_pending: bool,
	pub(crate) destroyed: bool,
	next_ref: BusyRef,
	pub(crate) pending_updates: Vec<PendingUpdate>,
	pub(crate) hooks: ViewHooks,
	pub(crate) rendered: Option<RenderTree>,
	pub(crate) join_push: Option<PushId>,
	/// Sent once the root view's first join patch is applied.
	pub(crate) stop_loading: Option<PageLoading>,
	/// Reported to the server but not yet acknowledged.
	pub(crate) cids_being_destroyed: HashSet<Cid>,
}

impl View {
	/// Reads a view's identity from its element. Returns `None` if the element lacks an id.
	pub(crate) fn from_element(document: &Document, el: NodeId, root_id: Option<&str>, parent: Option<&View>, href: Option<String>, flash: Option<String>) -> Option<Self> {
		let id = match document.id_of(el) {
			Some(id) if !id.is_empty() => id.to_owned(),
			_ => {
				error!("View element {:?} has no id", el);
				return None;
			}
		};
		Some(Self {
			root_id: root_id.map_or_else(|| id.clone(), str::to_owned),
			parent_id: parent.map(|parent| parent.id.clone()),
			name: document.attribute(el, PHX_VIEW).unwrap_or_default().to_owned(),
			el: Some(el),
			session: document.attribute(el, PHX_SESSION).unwrap_or_default().to_owned(),
			static_token: document.attribute(el, PHX_STATIC).map(str::to_owned),
			href,
			flash,
			join_count: parent.map_or(0, |parent| parent.join_count.saturating_sub(1)),
			child_joins: 0,
			join_pending: true,
			destroyed: false,
			next_ref: 0,
			pending_updates: Vec::new(),
			hooks: ViewHooks::new(),
			rendered: None,
			join_push: None,
			stop_loading: None,
			cids_being_destroyed: HashSet::new(),
			id,
		})
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn root_id(&self) -> &str {
		&self.root_id
	}

	#[must_use]
	pub fn parent_id(&self) -> Option<&str> {
		self.parent_id.as_deref()
	}

	/// The `data-phx-view` name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn el(&self) -> Option<NodeId> {
		self.el
	}

	#[must_use]
	pub fn href(&self) -> Option<&str> {
		self.href.as_deref()
	}

	#[must_use]
	pub fn join_count(&self) -> u32 {
		self.join_count
	}

	/// Only this view's own state. Nested views also wait for their ancestors.
	#[must_use]
	pub fn is_join_pending(&self) -> bool {
		self.join_pending
	}

	#[must_use]
	pub fn is_root(&self) -> bool {
		self.parent_id.is_none()
	}

	#[must_use]
	pub fn rendered(&self) -> Option<&RenderTree> {
		self.rendered.as_ref()
	}

	#[must_use]
	pub fn hook_count(&self) -> usize {
		self.hooks.len()
	}

	/// Takes over the static token of an element rendered before this view was known.
	pub(crate) fn inherit_static(&mut self, token: String) {
		self.static_token = Some(token);
	}

	pub(crate) fn topic(&self) -> String {
		format!("lv:{}", self.id)
	}

	/// The element's current session token, which the server may have replaced since the view was created.
	pub(crate) fn session(&self, document: &Document) -> String {
		self.el
			.and_then(|el| document.attribute(el, PHX_SESSION))
			.map_or_else(|| self.session.clone(), str::to_owned)
	}

	fn static_token(&self, document: &Document) -> Option<String> {
		self.el.and_then(|el| document.attribute(el, PHX_STATIC)).map(str::to_owned).or_else(|| self.static_token.clone())
	}

	fn connect_params(&self, document: &Document, config: &Config) -> Map<String, Value> {
		let mut params = config.connect_params.clone();
		let track_static = config.binding(PHX_TRACK_STATIC);
		let manifest = document
			.filter_elements(document.root(), |document, node| document.has_attribute(node, &track_static))
			.into_iter()
			.filter_map(|node| document.attribute(node, "src").or_else(|| document.attribute(node, "href")).map(str::to_owned))
			.collect::<Vec<_>>();
		if !manifest.is_empty() {
			params.insert("_track_static".to_owned(), json!(manifest));
		}
		params.insert("_mounts".to_owned(), json!(self.join_count));
		params
	}

	pub(crate) fn join_params(&self, document: &Document, config: &Config) -> Value {
		let mut params = Map::new();
		if let Some(href) = &self.href {
			params.insert("url".to_owned(), json!(href));
		}
		params.insert("params".to_owned(), Value::Object(self.connect_params(document, config)));
		params.insert("session".to_owned(), json!(self.session(document)));
		params.insert("static".to_owned(), json!(self.static_token(document)));
		if let Some(flash) = &self.flash {
			params.insert("flash".to_owned(), json!(flash));
		}
		Value::Object(params)
	}

	/// Replaces the container's connection classes with `classes`.
	pub(crate) fn set_container_classes(&self, document: &mut Document, classes: &[&str]) {
		if let Some(el) = self.el.filter(|&el| document.contains_node(el)) {
			for class in [PHX_CONNECTED_CLASS, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS] {
				document.remove_class(el, class);
			}
			for class in classes {
				document.add_class(el, class);
			}
		}
	}

	pub(crate) fn is_loading(&self, document: &Document) -> bool {
		self.el.map_or(false, |el| document.has_class(el, PHX_DISCONNECTED_CLASS))
	}

	/// The full (`only` is `None`) or restricted rendering, wrapped in the container's tag.
	pub(crate) fn render_container(&self, document: &Document, only_cids: Option<&HashSet<Cid>>) -> Option<String> {
		let rendered = self.rendered.as_ref()?;
		let tag = self.el.and_then(|el| document.tag_name(el)).unwrap_or("div");
		Some(format!("<{tag}>{}</{tag}>", rendered.to_html(only_cids), tag = tag))
	}

	/// Marks `elements` as busy with a new action ref, which is returned.
	pub(crate) fn put_ref(&mut self, document: &mut Document, elements: &[NodeId], event: &str, config: &Config) -> BusyRef {
		self.next_ref += 1;
		let busy_ref = self.next_ref;
		let loading_class = format!("phx-{}-loading", event);
		let disable_with = config.binding(PHX_DISABLE_WITH);
		let ref_value = busy_ref.to_string();
		for &el in elements {
			document.add_class(el, &loading_class);
			document.set_attribute(el, PHX_REF, &ref_value);
			if let Some(text) = document.attribute(el, &disable_with).map(str::to_owned) {
				if document.attribute(el, PHX_DISABLE_WITH_RESTORE).map_or(true, str::is_empty) {
					let original = document.inner_text(el);
					document.set_attribute(el, PHX_DISABLE_WITH_RESTORE, &original);
				}
				document.set_inner_text(el, &text);
			}
		}
		trace!(view_id = %self.id, busy_ref, "Put ref");
		busy_ref
	}

	/// `phx-value-*` attributes and the element's value on top of `meta`.
	pub(crate) fn extract_meta(document: &Document, el: NodeId, mut meta: Map<String, Value>, config: &Config) -> Map<String, Value> {
		let prefix = config.binding(PHX_VALUE);
		for (name, value) in document.attributes(el) {
			if let Some(key) = name.strip_prefix(&prefix) {
				meta.insert(key.to_owned(), json!(value));
			}
		}
		let value = dom::control_value(document, el).or_else(|| matches!(document.tag_name(el), Some("input" | "button")).then(String::new));
		if let Some(value) = value {
			meta.insert("value".to_owned(), json!(value));
			if dom::is_checkable_input(document, el) && !document.has_attribute(el, "checked") {
				meta.remove("value");
			}
		}
		meta
	}

	pub(crate) fn owns_element(&self, document: &Document, el: NodeId) -> bool {
		owns_element(document, &self.id, el)
	}

	/// The component of `target_ctx`, if it belongs to this view.
	pub(crate) fn closest_component_id(&self, document: &Document, target_ctx: Option<NodeId>) -> Option<Cid> {
		let component = document.closest(target_ctx?, |document, node| document.has_attribute(node, PHX_COMPONENT))?;
		if self.owns_element(document, component) {
			dom::component_id(document, component)
		} else {
			None
		}
	}

	/// Only elements with a `phx-target` address a component.
	pub(crate) fn target_component_id(&self, document: &Document, target: NodeId, target_ctx: Option<NodeId>, config: &Config) -> Option<Cid> {
		match document.attribute(target, &config.binding(PHX_TARGET)) {
			Some(binding) if !binding.is_empty() => self.closest_component_id(document, target_ctx),
			_ => None,
		}
	}

	/// Removes stale busy markers, which can't be cleared once the view has rejoined.
	pub(crate) fn drop_pending_refs(&self, document: &mut Document) {
		if let Some(el) = self.el {
			for node in document.filter_elements(el, |document, node| document.has_attribute(node, PHX_REF)) {
				document.remove_attribute(node, PHX_REF);
			}
		}
	}

	/// Forms that still exist in `html` and whose input should be replayed to the server after a rejoin.
	pub(crate) fn forms_for_recovery(&self, document: &Document, html: &str, config: &Config) -> Vec<NodeId> {
		let el = match self.el {
			Some(el) if self.join_count > 1 => el,
			_ => return Vec::new(),
		};
		let phx_change = config.binding(PHX_CHANGE);
		let auto_recover = config.binding(PHX_AUTO_RECOVER);

		let mut template = Document::new();
		let fragment = template.parse_fragment(html);

		document
			.filter_elements(el, |document, node| document.tag_name(node) == Some("form") && document.has_attribute(node, &phx_change))
			.into_iter()
			.filter(|&form| self.owns_element(document, form))
			.filter(|&form| document.attribute(form, &auto_recover) != Some("ignore"))
			.filter(|&form| {
				let event = document.attribute(form, &phx_change);
				template
					.filter_elements(fragment, |template, node| template.tag_name(node) == Some("form") && template.attribute(node, &phx_change) == event)
					.first()
					.is_some()
			})
			.collect()
	}
}

/// Whether `el` is (in) the element of view `view_id` rather than one of its nested views, or is the placeholder of a direct child.
pub(crate) fn owns_element(document: &Document, view_id: &str, el: NodeId) -> bool {
	document.attribute(el, PHX_PARENT_ID) == Some(view_id) || dom::closest_view(document, el).and_then(|view| document.id_of(view)) == Some(view_id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn view(document: &Document) -> View {
		let el = document.element_by_id("v").unwrap();
		View::from_element(document, el, None, None, Some("http://localhost/".to_owned()), None).unwrap()
	}

	#[test]
	fn join_params_carry_mounts_and_static_manifest() {
		let document = Document::from_html(
			r#"<link phx-track-static href="/app.css"><script phx-track-static src="/app.js"></script><div id="v" data-phx-view="V" data-phx-session="S" data-phx-static="T"></div>"#,
		);
		let mut config = Config::default();
		config.connect_params.insert("token".to_owned(), json!("x"));
		assert_eq!(
			view(&document).join_params(&document, &config),
			json!({
				"url": "http://localhost/",
				"params": { "token": "x", "_track_static": ["/app.css", "/app.js"], "_mounts": 0 },
				"session": "S",
				"static": "T",
			})
		);
	}

	#[test]
	fn put_ref_marks_elements_busy() {
		let mut document = Document::from_html(r#"<div id="v" data-phx-view="V"><button id="b" phx-disable-with="Saving...">Save</button></div>"#);
		let mut view = view(&document);
		let button = document.element_by_id("b").unwrap();
		assert_eq!(view.put_ref(&mut document, &[button], "click", &Config::default()), 1);
		assert_eq!(view.put_ref(&mut document, &[button], "click", &Config::default()), 2);
		assert_eq!(
			document.outer_html(button),
			r#"<button id="b" phx-disable-with="Saving..." class="phx-click-loading" data-phx-ref="2" data-phx-disable-with-restore="Save">Saving...</button>"#
		);
	}

	#[test]
	fn meta_includes_values() {
		let document = Document::from_html(
			r#"<div id="v" data-phx-view="V"><a id="a" phx-value-id="7" phx-value-kind="x"></a><input id="c" type="checkbox" value="yes"><button id="b"></button></div>"#,
		);
		let config = Config::default();
		let meta = |id: &str| Value::Object(View::extract_meta(&document, document.element_by_id(id).unwrap(), Map::new(), &config));
		assert_eq!(meta("a"), json!({ "id": "7", "kind": "x" }));
		assert_eq!(meta("c"), json!({}));
		assert_eq!(meta("b"), json!({ "value": "" }));
	}

	#[test]
	fn ownership_stops_at_nested_views() {
		let document = Document::from_html(r#"<div id="v" data-phx-view="V"><p id="own"></p><div id="c" data-phx-view="C" data-phx-parent-id="v"><p id="theirs"></p></div></div>"#);
		let view = view(&document);
		assert!(view.owns_element(&document, document.element_by_id("own").unwrap()));
		assert!(view.owns_element(&document, document.element_by_id("c").unwrap()));
		assert!(!view.owns_element(&document, document.element_by_id("theirs").unwrap()));
	}
}
