//! Client-side lifecycle callbacks bound to elements via `phx-hook`.
//!
//! Register a factory per hook name on the socket. Whenever an element carrying that name is
//! mounted by its owning view, a fresh [`Hook`] is created and stays bound to that element until it
//! is removed or the view is destroyed.

use crate::{
	document::{Document, NodeId},
	rendered::Cid,
};
use core::fmt::{self, Debug, Formatter};
use hashbrown::HashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{trace, trace_span, warn};

/// Per-mount callbacks. All default to doing nothing.
///
/// The element is available as [`HookContext::el`], with read access to the whole document.
#[allow(unused_variables)]
pub trait Hook {
	/// The element was added to the document, or was present when its view joined.
	fn mounted(&mut self, context: &mut HookContext<'_>) {}
	/// The element is about to be updated by a patch that actually changes it.
	fn before_update(&mut self, context: &mut HookContext<'_>) {}
	fn updated(&mut self, context: &mut HookContext<'_>) {}
	fn before_destroy(&mut self, context: &mut HookContext<'_>) {}
	/// The element is gone, or its view was left. The element may already be freed.
	fn destroyed(&mut self, context: &mut HookContext<'_>) {}
	fn disconnected(&mut self, context: &mut HookContext<'_>) {}
	fn reconnected(&mut self, context: &mut HookContext<'_>) {}
}

type HookFactory = Box<dyn Fn() -> Box<dyn Hook>>;

/// Hook factories by name.
#[derive(Default)]
pub struct HookRegistry {
	factories: HashMap<String, HookFactory>,
}

impl Debug for HookRegistry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.factories.keys()).finish()
	}
}

impl HookRegistry {
	/// Replaces any previous factory of the same name.
	pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn Hook> + 'static) {
		if self.factories.insert(name.to_owned(), Box::new(factory)).is_some() {
			warn!("Replaced hook {:?}", name);
		}
	}

	#[must_use]
	pub fn create(&self, name: &str) -> Option<Box<dyn Hook>> {
		self.factories.get(name).map(|factory| factory())
	}

	#[must_use]
	pub fn contains(&self, name: &str) -> bool {
		self.factories.contains_key(name)
	}
}

/// An event pushed by a hook. It is sent once the current callback returns.
#[derive(Debug, Clone, PartialEq)]
pub struct HookPush {
	pub view_id: String,
	/// `phx-target`-style target: a component id or a selector. `None` pushes to the hook's own view.
	pub target: Option<String>,
	pub event: String,
	pub payload: Value,
}

/// What a [`Hook`] callback can see and do.
pub struct HookContext<'a> {
	pub el: NodeId,
	pub view_id: &'a str,
	pub view_name: &'a str,
	pub document: &'a Document,
	pushes: &'a mut Vec<HookPush>,
}

impl<'a> HookContext<'a> {
	pub(crate) fn new(el: NodeId, view_id: &'a str, view_name: &'a str, document: &'a Document, pushes: &'a mut Vec<HookPush>) -> Self {
		Self {
			el,
			view_id,
			view_name,
			document,
			pushes,
		}
	}

	/// Pushes `event` to the hook's view.
	pub fn emit(&mut self, event: &str, payload: Value) {
		self.push(None, event, payload);
	}

	/// Pushes `event` to the owner(s) of `target`, which is either a component id or a selector.
	pub fn emit_to(&mut self, target: &str, event: &str, payload: Value) {
		self.push(Some(target.to_owned()), event, payload);
	}

	/// Pushes `event` to component `cid` of the hook's view.
	pub fn emit_to_component(&mut self, cid: Cid, event: &str, payload: Value) {
		self.emit_to(&cid.to_string(), event, payload);
	}

	fn push(&mut self, target: Option<String>, event: &str, payload: Value) {
		self.pushes.push(HookPush {
			view_id: self.view_id.to_owned(),
			target,
			event: event.to_owned(),
			payload,
		});
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookEvent {
	Mounted,
	BeforeUpdate,
	Updated,
	BeforeDestroy,
	Destroyed,
	Disconnected,
	Reconnected,
}

/// A mounted hook.
pub(crate) struct ViewHook {
	pub el: NodeId,
	pub name: String,
	hook: Box<dyn Hook>,
}

impl Debug for ViewHook {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ViewHook").field("el", &self.el).field("name", &self.name).finish_non_exhaustive()
	}
}

impl ViewHook {
	pub fn new(el: NodeId, name: &str, hook: Box<dyn Hook>) -> Self {
		Self { el, name: name.to_owned(), hook }
	}

	pub fn trigger(&mut self, event: HookEvent, context: &mut HookContext<'_>) {
		let span = trace_span!("hook", name = %self.name, ?event, el = ?self.el);
		let _enter = span.enter();
		trace!("Triggering");
		let hook = &mut self.hook;
		match event {
			HookEvent::Mounted => hook.mounted(context),
			HookEvent::BeforeUpdate => hook.before_update(context),
			HookEvent::Updated => hook.updated(context),
			HookEvent::BeforeDestroy => hook.before_destroy(context),
			HookEvent::Destroyed => hook.destroyed(context),
			HookEvent::Disconnected => hook.disconnected(context),
			HookEvent::Reconnected => hook.reconnected(context),
		}
	}
}

/// The hooks of one view by hook id.
pub(crate) type ViewHooks = BTreeMap<u32, ViewHook>;

/// Triggers `event` on hook `hook_id`, if it is still mounted.
pub(crate) fn trigger(hooks: &mut ViewHooks, hook_id: u32, event: HookEvent, document: &Document, view: (&str, &str), pushes: &mut Vec<HookPush>) {
	if let Some(hook) = hooks.get_mut(&hook_id) {
		let mut context = HookContext::new(hook.el, view.0, view.1, document, pushes);
		hook.trigger(event, &mut context);
	}
}

/// Triggers `event` on every hook in `hooks`, in mount order.
pub(crate) fn trigger_all(hooks: &mut ViewHooks, event: HookEvent, document: &Document, view: (&str, &str), pushes: &mut Vec<HookPush>) {
	for hook in hooks.values_mut() {
		let mut context = HookContext::new(hook.el, view.0, view.1, document, pushes);
		hook.trigger(event, &mut context);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;
	use std::{cell::RefCell, rc::Rc};

	struct Counter(Rc<RefCell<Vec<&'static str>>>);

	impl Hook for Counter {
		fn mounted(&mut self, context: &mut HookContext<'_>) {
			self.0.borrow_mut().push("mounted");
			context.emit("hello", json!({ "from": context.document.id_of(context.el) }));
		}

		fn destroyed(&mut self, context: &mut HookContext<'_>) {
			self.0.borrow_mut().push("destroyed");
			context.emit_to_component(3, "bye", Value::Null);
		}
	}

	#[test]
	fn registry_creates_fresh_hooks() {
		let log = Rc::new(RefCell::new(Vec::new()));
		let mut registry = HookRegistry::default();
		let factory_log = Rc::clone(&log);
		registry.register("Counter", move || Box::new(Counter(Rc::clone(&factory_log))));
		assert!(registry.contains("Counter"));
		assert!(registry.create("Missing").is_none());

		let document = Document::from_html(r#"<p id="el"></p>"#);
		let el = document.element_by_id("el").unwrap();
		let mut hooks = ViewHooks::new();
		hooks.insert(0, ViewHook::new(el, "Counter", registry.create("Counter").unwrap()));

		let mut pushes = Vec::new();
		trigger(&mut hooks, 0, HookEvent::Mounted, &document, ("v", "V"), &mut pushes);
		trigger(&mut hooks, 1, HookEvent::Mounted, &document, ("v", "V"), &mut pushes);
		trigger_all(&mut hooks, HookEvent::Destroyed, &document, ("v", "V"), &mut pushes);

		assert_eq!(*log.borrow(), vec!["mounted", "destroyed"]);
		assert_eq!(
			pushes,
			vec![
				HookPush { view_id: "v".to_owned(), target: None, event: "hello".to_owned(), payload: json!({ "from": "el" }) },
				HookPush { view_id: "v".to_owned(), target: Some("3".to_owned()), event: "bye".to_owned(), payload: Value::Null },
			]
		);
	}
}
