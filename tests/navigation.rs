mod support;

use live_dom::{HistoryEntry, HistoryEntryType, HistoryKind, Reply};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{Harness, Sent};

const LINKS: &str = r#"<a id="to-a" data-phx-link="patch" href="/a">A</a><a id="to-b" data-phx-link="patch" href="/b">B</a><a id="away" data-phx-link="redirect" href="/other">Away</a>"#;

fn linked() -> Harness {
	let mut h = Harness::main("root", "Page");
	h.reply_join("lv:root", json!({ "s": [LINKS] }));
	h
}

#[test]
fn only_the_latest_patch_navigation_lands() {
	let mut h = linked();
	assert!(h.socket.dispatch_live_link(h.el("to-a")).unwrap());
	assert!(h.socket.dispatch_live_link(h.el("to-b")).unwrap());
	let links = h.pushes("link");
	assert_eq!(links.len(), 2);
	assert_eq!(links[0].1, json!({ "url": "http://example.com/a" }));
	assert_eq!(links[1].1, json!({ "url": "http://example.com/b" }));
	assert!(h.socket.has_pending_link());

	h.socket.on_reply(links[0].0, Reply::Ok(json!({})));
	assert!(h.browser.borrow().history.is_empty());
	assert_eq!(h.socket.href(), "http://example.com/");

	h.socket.on_reply(links[1].0, Reply::Ok(json!({})));
	assert_eq!(
		h.browser.borrow().history,
		vec![(
			HistoryKind::Push,
			HistoryEntry { kind: HistoryEntryType::Patch, id: "root".to_owned(), root: false },
			Some("http://example.com/b".to_owned()),
		)]
	);
	assert_eq!(h.socket.href(), "http://example.com/b");
	assert_eq!(h.browser.borrow().href, "http://example.com/b");
	assert!(!h.socket.has_pending_link());
	assert_eq!(h.socket.view("root").unwrap().href(), Some("http://example.com/b"));
	assert!(h.socket.document().has_class(h.el("root"), "phx-connected"));
}

#[test]
fn diffs_wait_for_a_pending_navigation() {
	let mut h = Harness::main("root", "Page");
	h.reply_join("lv:root", json!({ "s": [r#"<a id="to-a" data-phx-link="patch" href="/a">A</a><span id="text">"#, "</span>"], "0": "before" }));
	h.socket.dispatch_live_link(h.el("to-a")).unwrap();

	h.socket.on_message("lv:root", "diff", json!({ "0": "after" }));
	assert_eq!(h.inner("text"), "before");

	let (link, _) = h.last_push("link");
	h.socket.on_reply(link, Reply::Ok(json!({})));
	assert_eq!(h.inner("text"), "after");
	assert_eq!(h.socket.document().attribute(h.el("to-a"), "data-phx-ref"), None);
}

#[test]
fn redirect_links_replace_the_main_view() {
	let mut h = linked();
	assert!(h.socket.dispatch_live_link(h.el("away")).unwrap());
	assert!(h.socket.view("root").is_none());
	assert!(h.sent().iter().any(|(_, sent)| *sent == Sent::Leave { topic: "lv:root".to_owned() }));
	let (fetch, url) = h.browser.borrow().fetches[0].clone();
	assert_eq!(url, "http://example.com/other");

	h.socket.on_document_fetched(fetch, 200, r#"<div id="next" data-phx-view="Next" data-phx-session="sn" data-phx-main="true"></div>"#);
	// The old view stays in place until the new one has joined.
	assert!(h.socket.document().element_by_id("root").is_some());
	h.reply_join("lv:next", json!({ "s": ["<p>next</p>"] }));

	assert!(h.socket.document().element_by_id("root").is_none());
	assert_eq!(h.inner("next"), "<p>next</p>");
	assert_eq!(h.socket.main_view_id(), Some("next"));
	assert_eq!(
		h.browser.borrow().history.last().cloned(),
		Some((
			HistoryKind::Push,
			HistoryEntry { kind: HistoryEntryType::Redirect, id: "next".to_owned(), root: false },
			Some("http://example.com/other".to_owned()),
		))
	);
}

#[test]
fn failed_fetches_fall_back_to_a_full_page_load() {
	let mut h = linked();
	h.socket.dispatch_live_link(h.el("away")).unwrap();
	let (fetch, _) = h.browser.borrow().fetches[0].clone();
	h.socket.on_document_fetched(fetch, 500, "");
	assert_eq!(h.browser.borrow().redirects, vec![("http://example.com/other".to_owned(), None)]);
}

#[test]
fn server_patches_update_history() {
	let mut h = linked();
	h.socket.on_message("lv:root", "live_patch", json!({ "to": "/search?q=x", "kind": "replace" }));
	assert_eq!(
		h.browser.borrow().history,
		vec![(
			HistoryKind::Replace,
			HistoryEntry { kind: HistoryEntryType::Patch, id: "root".to_owned(), root: false },
			Some("http://example.com/search?q=x".to_owned()),
		)]
	);
	assert_eq!(h.socket.href(), "http://example.com/search?q=x");
}

#[test]
fn timed_out_navigation_reloads_the_page() {
	let mut h = linked();
	h.socket.dispatch_live_link(h.el("to-a")).unwrap();
	let (link, _) = h.last_push("link");
	h.socket.on_reply(link, Reply::Timeout);
	assert_eq!(h.browser.borrow().redirects, vec![("http://example.com/".to_owned(), None)]);
}
