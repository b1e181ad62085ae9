mod support;

use live_dom::{Hook, HookContext};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{cell::RefCell, rc::Rc};
use support::Harness;

type Log = Rc<RefCell<Vec<String>>>;

struct Clock {
	log: Log,
}

impl Clock {
	fn record(&self, event: &str, context: &HookContext<'_>) {
		let text = context.document.inner_text(context.el);
		self.log.borrow_mut().push(format!("{} {}", event, text));
	}
}

impl Hook for Clock {
	fn mounted(&mut self, context: &mut HookContext<'_>) {
		self.record("mounted", context);
		context.emit("ready", json!({ "at": context.document.id_of(context.el) }));
	}

	fn before_update(&mut self, context: &mut HookContext<'_>) {
		self.record("before_update", context);
	}

	fn updated(&mut self, context: &mut HookContext<'_>) {
		self.record("updated", context);
	}

	fn before_destroy(&mut self, context: &mut HookContext<'_>) {
		self.record("before_destroy", context);
	}

	fn destroyed(&mut self, _context: &mut HookContext<'_>) {
		self.log.borrow_mut().push("destroyed".to_owned());
	}

	fn disconnected(&mut self, context: &mut HookContext<'_>) {
		self.record("disconnected", context);
	}

	fn reconnected(&mut self, context: &mut HookContext<'_>) {
		self.record("reconnected", context);
	}
}

fn clock_harness() -> (Harness, Log) {
	let mut h = Harness::new(r#"<div id="root" data-phx-view="Clock" data-phx-session="s" data-phx-main="true"></div>"#);
	let log = Log::default();
	let factory_log = Rc::clone(&log);
	h.socket.register_hook("Clock", move || Box::new(Clock { log: Rc::clone(&factory_log) }));
	h.socket.connect().unwrap();
	(h, log)
}

#[test]
fn hooks_follow_their_element() {
	let (mut h, log) = clock_harness();
	h.reply_join("lv:root", json!({ "s": [r#"<span id="clock" phx-hook="Clock">"#, "</span>"], "0": "1" }));
	assert_eq!(h.socket.view("root").unwrap().hook_count(), 1);
	assert_eq!(h.last_push("event").1, json!({ "type": "hook", "event": "ready", "value": { "at": "clock" } }));

	h.socket.on_message("lv:root", "diff", json!({ "0": "2" }));
	// Unchanged elements don't count as updated.
	h.socket.on_message("lv:root", "diff", json!({ "0": "2" }));
	h.socket.on_message("lv:root", "diff", json!({ "s": ["<p>gone</p>"] }));

	assert_eq!(*log.borrow(), ["mounted 1", "before_update 1", "updated 2", "before_destroy 2", "destroyed"]);
	assert_eq!(h.socket.view("root").unwrap().hook_count(), 0);
}

#[test]
fn hooks_see_disconnects_and_reconnects() {
	let (mut h, log) = clock_harness();
	h.reply_join("lv:root", json!({ "s": [r#"<span id="clock" phx-hook="Clock">tick</span>"#] }));
	h.socket.on_channel_error("lv:root", "crashed");
	h.reply_join("lv:root", json!({ "s": [r#"<span id="clock" phx-hook="Clock">tick</span>"#] }));

	assert_eq!(*log.borrow(), ["mounted tick", "disconnected tick", "reconnected tick"]);
	assert_eq!(h.socket.view("root").unwrap().hook_count(), 1);
}

#[test]
fn unknown_hooks_are_ignored() {
	let (mut h, log) = clock_harness();
	h.reply_join("lv:root", json!({ "s": [r#"<span id="x" phx-hook="Missing">x</span>"#] }));
	assert!(log.borrow().is_empty());
	assert_eq!(h.socket.view("root").unwrap().hook_count(), 0);
}

#[test]
fn hook_events_can_target_selectors() {
	let (mut h, _log) = clock_harness();
	h.reply_join(
		"lv:root",
		json!({ "s": ["", ""], "0": 3, "c": { "3": { "s": [r#"<div id="panel" class="panel">panel</div>"#] } } }),
	);
	h.socket.push_hook_event("root", Some(".panel"), "open", json!({ "now": true })).unwrap();
	assert_eq!(h.last_push("event").1, json!({ "type": "hook", "event": "open", "value": { "now": true }, "cid": 3 }));

	assert!(h.socket.push_hook_event("root", Some("#nowhere"), "open", json!({})).is_err());
	assert!(h.socket.push_hook_event("nope", None, "open", json!({})).is_err());
}
