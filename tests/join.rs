mod support;

use live_dom::{PageLoading, PageLoadingKind, Reply};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{Harness, Sent, SharedStorage, BASE};

#[test]
fn join_renders_and_diffs_update() {
	let mut h = Harness::main("root", "Greeter");
	assert!(h.socket.document().has_class(h.el("root"), "phx-disconnected"));
	assert_eq!(
		h.sent()[0].1,
		Sent::Join {
			topic: "lv:root".to_owned(),
			params: json!({ "url": BASE, "params": { "_mounts": 0 }, "session": "session-root", "static": null }),
		}
	);

	h.reply_join("lv:root", json!({ "s": ["<p>Hi ", "!</p>"], "0": "Ada" }));
	assert_eq!(h.inner("root"), "<p>Hi Ada!</p>");
	let root = h.el("root");
	let document = h.socket.document();
	assert!(document.has_class(root, "phx-connected"));
	assert!(!document.has_class(root, "phx-disconnected"));
	assert_eq!(document.attribute(root, "data-phx-root-id"), Some("root"));
	assert!(!h.socket.view("root").unwrap().is_join_pending());

	h.socket.on_message("lv:root", "diff", json!({ "0": "Grace" }));
	assert_eq!(h.inner("root"), "<p>Hi Grace!</p>");

	assert_eq!(
		h.browser.borrow().loading,
		vec![
			PageLoading::Start { kind: PageLoadingKind::Initial, to: Some(BASE.to_owned()) },
			PageLoading::Stop { kind: PageLoadingKind::Initial, to: Some(BASE.to_owned()) },
		]
	);
}

#[test]
fn messages_wait_for_the_join() {
	let mut h = Harness::main("root", "Greeter");
	h.socket.on_message("lv:root", "session", json!({ "token": "renewed" }));
	assert_eq!(h.socket.document().attribute(h.el("root"), "data-phx-session"), Some("session-root"));

	h.reply_join("lv:root", json!({ "s": ["ok"] }));
	assert_eq!(h.socket.document().attribute(h.el("root"), "data-phx-session"), Some("renewed"));
}

const CHILDREN: &str = concat!(
	r#"<div id="a" data-phx-view="A" data-phx-session="sa" data-phx-parent-id="root"></div>"#,
	r#"<div id="b" data-phx-view="B" data-phx-session="sb" data-phx-parent-id="root"></div>"#,
);

#[test]
fn nothing_is_patched_before_every_child_joined() {
	for [first, second] in [["a", "b"], ["b", "a"]] {
		let mut h = Harness::main("root", "Root");
		h.reply_join("lv:root", json!({ "s": [CHILDREN] }));
		assert!(h.socket.document().element_by_id("a").is_none());
		assert!(h.socket.view("root").unwrap().is_join_pending());
		assert_eq!(h.socket.views().count(), 3);

		h.reply_join(&format!("lv:{}", first), json!({ "s": [format!("<p>{}</p>", first)] }));
		assert!(h.socket.document().element_by_id("a").is_none(), "patched after joining {}", first);
		assert!(h.socket.view("root").unwrap().is_join_pending());

		h.reply_join(&format!("lv:{}", second), json!({ "s": [format!("<p>{}</p>", second)] }));
		assert_eq!(h.inner("a"), "<p>a</p>");
		assert_eq!(h.inner("b"), "<p>b</p>");
		for id in ["root", "a", "b"] {
			let view = h.socket.view(id).unwrap();
			assert!(!view.is_join_pending(), "{} is still joining", id);
			assert_eq!(view.join_count(), 1);
		}
		assert_eq!(h.socket.view("a").unwrap().parent_id(), Some("root"));
	}
}

#[test]
fn removed_children_are_left() {
	let mut h = Harness::main("root", "Root");
	h.reply_join("lv:root", json!({ "s": ["", ""], "0": { "s": [CHILDREN] } }));
	h.reply_join("lv:a", json!({ "s": ["a"] }));
	h.reply_join("lv:b", json!({ "s": ["b"] }));

	h.socket.on_message("lv:root", "diff", json!({ "0": { "s": [r#"<div id="a" data-phx-view="A" data-phx-session="sa" data-phx-parent-id="root"></div>"#] } }));
	assert!(h.socket.document().element_by_id("b").is_none());
	assert!(h.socket.view("b").is_none());
	assert!(h.socket.view("a").is_some());
	assert!(h.sent().iter().any(|(_, sent)| *sent == Sent::Leave { topic: "lv:b".to_owned() }));
}

#[test]
fn failed_join_reloads_with_jitter() {
	let mut h = Harness::main("root", "Root");
	let join = h.join_id("lv:root");
	h.socket.on_reply(join, Reply::Error(json!({ "reason": "unauthorized" })));

	let reloads = h.browser.borrow().reloads.clone();
	assert_eq!(reloads.len(), 1);
	assert!((1000..=3000).contains(&reloads[0].0));
	assert_eq!(reloads[0].1, None);
	assert_eq!(h.wire.borrow().disconnects, 1);
}

#[test]
fn repeated_join_failures_enter_failsafe_mode() {
	let storage = SharedStorage::default();
	let fail = || {
		let mut h = Harness::main_with_storage("root", "Root", storage.clone());
		let join = h.join_id("lv:root");
		h.socket.on_reply(join, Reply::Error(json!({ "reason": "crashed" })));
		let reloads = h.browser.borrow().reloads.clone();
		assert_eq!(reloads.len(), 1);
		reloads[0].0
	};

	for attempt in 1..=10 {
		let delay = fail();
		assert!((1000..=3000).contains(&delay), "attempt {} waited {}ms", attempt, delay);
	}
	assert_eq!(fail(), 30_000);
	assert_eq!(fail(), 30_000);

	let mut h = Harness::main_with_storage("root", "Root", storage.clone());
	h.reply_join("lv:root", json!({ "s": ["ok"] }));
	assert!(h.browser.borrow().reloads.is_empty());
	assert!((1000..=3000).contains(&fail()));
}

#[test]
fn crashing_while_joining_only_reloads() {
	let mut h = Harness::main("root", "Root");
	let loading = h.browser.borrow().loading.len();
	h.socket.on_channel_error("lv:root", "crashed");

	assert_eq!(h.browser.borrow().reloads.len(), 1);
	assert_eq!(h.browser.borrow().loading.len(), loading);
	assert!(!h.socket.document().has_class(h.el("root"), "phx-error"));
}

#[test]
fn updates_queued_during_the_join_keep_their_order() {
	let mut h = Harness::main("root", "Root");
	h.socket.on_message("lv:root", "diff", json!({ "0": "A" }));
	h.socket.on_message("lv:root", "live_redirect", json!({ "to": "/other", "kind": "push" }));
	h.socket.on_message("lv:root", "diff", json!({ "0": "B" }));
	assert!(h.browser.borrow().fetches.is_empty());

	h.reply_join("lv:root", json!({ "s": ["<p>", "</p>"], "0": "x" }));
	assert_eq!(h.inner("root"), "<p>A</p>");
	let fetches = h.browser.borrow().fetches.iter().map(|(_, url)| url.clone()).collect::<Vec<_>>();
	assert_eq!(fetches, vec![format!("{}other", BASE)]);
	assert!(h.socket.view("root").is_none());
	assert!(h.socket.has_pending_link());
}

#[test]
fn join_redirects() {
	let mut h = Harness::main("root", "Root");
	let join = h.join_id("lv:root");
	h.socket.on_reply(join, Reply::Error(json!({ "redirect": { "to": "/login", "flash": "f" } })));

	assert_eq!(h.browser.borrow().redirects, vec![("/login".to_owned(), Some("f".to_owned()))]);
	assert!(h.sent().iter().any(|(_, sent)| *sent == Sent::Leave { topic: "lv:root".to_owned() }));
}
