mod support;

use live_dom::{PageLoading, PageLoadingKind, Reply};
use pretty_assertions::assert_eq;
use serde_json::{json, Map};
use support::Harness;

fn child_ids(h: &Harness, id: &str) -> Vec<String> {
	let document = h.socket.document();
	document.element_children(h.el(id)).into_iter().filter_map(|child| document.id_of(child).map(str::to_owned)).collect()
}

#[test]
fn replies_only_clear_their_own_busy_state() {
	let mut h = Harness::main("root", "Counter");
	h.reply_join("lv:root", json!({ "s": [r#"<button id="b" phx-click="inc">"#, "</button>"], "0": "0" }));

	for _ in 0..5 {
		h.socket.dispatch_click(h.el("b"), Map::new()).unwrap();
	}
	let pushes = h.pushes("event");
	assert_eq!(pushes.len(), 5);
	assert_eq!(pushes[0].1, json!({ "type": "click", "event": "inc", "value": { "value": "" } }));
	let button = h.el("b");
	assert_eq!(h.socket.document().attribute(button, "data-phx-ref"), Some("5"));
	assert!(h.socket.document().has_class(button, "phx-click-loading"));

	h.socket.on_reply(pushes[2].0, Reply::Ok(json!({ "diff": { "0": "3" } })));
	assert_eq!(h.socket.document().attribute(button, "data-phx-ref"), Some("5"));
	assert!(h.socket.document().has_class(button, "phx-click-loading"));
	assert_eq!(h.socket.document().inner_text(button), "0");

	h.socket.on_reply(pushes[4].0, Reply::Ok(json!({ "diff": { "0": "5" } })));
	assert_eq!(h.inner("root"), r#"<button id="b" phx-click="inc">5</button>"#);
}

#[test]
fn failed_pushes_leave_the_document_alone() {
	let mut h = Harness::main("root", "Counter");
	h.reply_join("lv:root", json!({ "s": [r#"<button id="b" phx-click="inc">"#, "</button>"], "0": "0" }));
	h.socket.dispatch_click(h.el("b"), Map::new()).unwrap();
	let (push, _) = h.last_push("event");

	h.socket.on_reply(push, Reply::Error(json!({ "reason": "unmatched topic" })));
	assert_eq!(h.socket.document().inner_text(h.el("b")), "0");
	assert!(h.browser.borrow().redirects.is_empty());
	assert!(h.browser.borrow().reloads.is_empty());
}

#[test]
fn repeated_diffs_reuse_document_nodes() {
	let mut h = Harness::main("root", "Clock");
	h.reply_join("lv:root", json!({ "s": [r#"<ul id="l"><li>"#, "</li><li>", "</li></ul>"], "0": "0", "1": "0" }));
	h.socket.on_message("lv:root", "diff", json!({ "0": "1", "1": "1" }));
	let capacity = h.socket.document().capacity();

	for tick in 2..200 {
		h.socket.on_message("lv:root", "diff", json!({ "0": tick.to_string(), "1": (tick * 2).to_string() }));
	}
	assert_eq!(h.inner("l"), "<li>199</li><li>398</li>");
	assert_eq!(h.socket.document().capacity(), capacity);
}

#[test]
fn appended_children_keep_their_order() {
	let mut h = Harness::main("root", "List");
	h.reply_join(
		"lv:root",
		json!({
			"s": [r#"<ul id="list" phx-update="append">"#, "</ul>"],
			"0": { "s": [r#"<li id=""#, r#"">"#, "</li>"], "d": [["a", "A"], ["b", "B"], ["c", "C"]] },
		}),
	);
	assert_eq!(child_ids(&h, "list"), ["a", "b", "c"]);

	h.socket.on_message("lv:root", "diff", json!({ "0": { "d": [["d", "D"]] } }));
	assert_eq!(child_ids(&h, "list"), ["a", "b", "c", "d"]);

	h.socket.on_message("lv:root", "diff", json!({ "0": { "d": [["b", "B2"]] } }));
	assert_eq!(child_ids(&h, "list"), ["a", "b", "c", "d"]);
	assert_eq!(h.inner("b"), "B2");
}

#[test]
fn removed_components_are_reported_once() {
	let mut h = Harness::main("root", "Page");
	h.reply_join("lv:root", json!({ "s": ["<div>", "</div>"], "0": 7, "c": { "7": { "s": ["<p>seven</p>"] } } }));
	assert_eq!(h.inner("root"), r#"<div><p data-phx-component="7" id="root-7-0">seven</p></div>"#);

	h.socket.on_message("lv:root", "diff", json!({ "0": "" }));
	h.socket.on_message("lv:root", "diff", json!({ "0": "" }));
	let destroyed = h.pushes("cids_destroyed");
	assert_eq!(destroyed.len(), 1);
	assert_eq!(destroyed[0].1, json!({ "cids": [7] }));
	assert!(h.socket.view("root").unwrap().rendered().unwrap().has_component(7));

	h.socket.on_reply(destroyed[0].0, Reply::Ok(json!({})));
	assert!(!h.socket.view("root").unwrap().rendered().unwrap().has_component(7));
}

#[test]
fn components_rendered_twice_are_reported_once_both_are_gone() {
	let mut h = Harness::main("root", "Page");
	h.reply_join("lv:root", json!({ "s": ["<div>", "", "</div>"], "0": 7, "1": 7, "c": { "7": { "s": ["<p>", "</p>"], "0": "seven" } } }));
	assert_eq!(
		h.inner("root"),
		r#"<div><p data-phx-component="7" id="root-7-0">seven</p><p data-phx-component="7" id="root-7-1-0">seven</p></div>"#
	);

	h.socket.on_message("lv:root", "diff", json!({ "c": { "7": { "0": "eight" } } }));
	assert_eq!(h.inner("root-7-0"), "eight");
	assert_eq!(h.inner("root-7-1-0"), "eight");

	h.socket.on_message("lv:root", "diff", json!({ "1": "" }));
	assert!(h.pushes("cids_destroyed").is_empty());
	assert_eq!(h.inner("root"), r#"<div><p data-phx-component="7" id="root-7-0">eight</p></div>"#);

	h.socket.on_message("lv:root", "diff", json!({ "0": "" }));
	let destroyed = h.pushes("cids_destroyed");
	assert_eq!(destroyed.len(), 1);
	assert_eq!(destroyed[0].1, json!({ "cids": [7] }));
}

#[test]
fn component_replies_patch_only_that_component() {
	let mut h = Harness::main("root", "Page");
	h.reply_join(
		"lv:root",
		json!({
			"s": ["", "", ""],
			"0": 1,
			"1": 2,
			"c": {
				"1": { "s": [r#"<p id="one">"#, "</p>"], "0": "a" },
				"2": { "s": [r#"<p id="two" phx-click="bump" phx-target="2">"#, "</p>"], "0": "b" },
			},
		}),
	);
	h.socket.dispatch_click(h.el("two"), Map::new()).unwrap();
	let (push, payload) = h.last_push("event");
	assert_eq!(payload["cid"], json!(2));

	h.socket.on_reply(push, Reply::Ok(json!({ "diff": { "c": { "1": { "0": "A" }, "2": { "0": "B" } } } })));
	assert_eq!(h.inner("one"), "a");
	assert_eq!(h.inner("two"), "B");

	h.socket.on_message("lv:root", "diff", json!({ "c": { "1": { "0": "A" } } }));
	assert_eq!(h.inner("one"), "A");
}

#[test]
fn focused_input_keeps_what_was_typed() {
	let mut h = Harness::main("root", "Search");
	h.reply_join("lv:root", json!({ "s": [r#"<form id="f" phx-change="validate"><input id="q" name="q" value=""#, r#""></form>"#], "0": "" }));

	let input = h.el("q");
	h.socket.document_mut().set_attribute(input, "value", "hel");
	h.socket.document_mut().focus(input);
	h.socket.dispatch_input(input).unwrap();
	let (push, payload) = h.last_push("event");
	assert_eq!(payload, json!({ "type": "form", "event": "validate", "value": "q=hel&_target=q" }));
	assert!(h.socket.document().has_class(h.el("f"), "phx-change-loading"));

	h.socket.on_reply(push, Reply::Ok(json!({ "diff": { "0": "HEL" } })));
	let document = h.socket.document();
	assert_eq!(document.attribute(input, "value"), Some("hel"));
	assert_eq!(document.active_element(), Some(input));
	assert_eq!(document.attribute(input, "data-phx-ref"), None);
	assert!(!document.has_class(h.el("f"), "phx-change-loading"));
}

#[test]
fn submit_disables_controls_until_the_reply() {
	let mut h = Harness::main("root", "Form");
	h.reply_join(
		"lv:root",
		json!({ "s": [r#"<form id="f" phx-submit="save"><input id="name" name="name" value="x"><button id="go" phx-disable-with="Saving...">Save</button></form>"#] }),
	);

	assert!(h.socket.dispatch_submit(h.el("f")).unwrap());
	let (push, payload) = h.last_push("event");
	assert_eq!(payload, json!({ "type": "form", "event": "save", "value": "name=x" }));
	{
		let document = h.socket.document();
		let (name, go) = (h.el("name"), h.el("go"));
		assert_eq!(document.attribute(name, "readonly"), Some(""));
		assert_eq!(document.attribute(name, "data-phx-readonly"), Some("false"));
		assert_eq!(document.attribute(go, "disabled"), Some(""));
		assert_eq!(document.inner_text(go), "Saving...");
	}

	h.socket.on_reply(push, Reply::Ok(json!({})));
	let document = h.socket.document();
	let (name, go) = (h.el("name"), h.el("go"));
	assert_eq!(document.attribute(name, "readonly"), None);
	assert_eq!(document.attribute(name, "data-phx-readonly"), None);
	assert_eq!(document.attribute(go, "disabled"), None);
	assert_eq!(document.inner_text(go), "Save");
	assert!(h.browser.borrow().loading.ends_with(&[
		PageLoading::Start { kind: PageLoadingKind::Element, to: None },
		PageLoading::Stop { kind: PageLoadingKind::Element, to: None },
	]));
}

#[test]
fn rendering_from_scratch_after_a_crash() {
	let mut h = Harness::main("root", "Page");
	h.reply_join("lv:root", json!({ "s": ["<p>", "</p>"], "0": "one" }));
	h.socket.on_channel_error("lv:root", "crashed");
	let root = h.el("root");
	assert!(h.socket.document().has_class(root, "phx-error"));
	assert!(h.socket.document().has_class(root, "phx-disconnected"));

	// The channel rejoins by itself and replies to the original join again.
	h.reply_join("lv:root", json!({ "s": ["<p>", "</p>"], "0": "two" }));
	assert_eq!(h.inner("root"), "<p>two</p>");
	assert!(h.socket.document().has_class(root, "phx-connected"));
	assert!(!h.socket.document().has_class(root, "phx-error"));
	assert_eq!(h.socket.view("root").unwrap().join_count(), 2);
}
