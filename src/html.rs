//! Markup parsing into and serialization out of a [`Document`].
//!
//! This only needs to understand markup produced by the server-side renderer,
//! so it implements the tokenization rules that matter for well-formed fragments:
//! comments, void elements, raw text elements, quoted and unquoted attributes and character references.
//! There are no implied end tags and no foster parenting.

use crate::document::{Document, NodeId, NodeKind};
use tracing::{trace, warn};

const VOID_ELEMENTS: &[&str] = &["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr"];

/// Content is not parsed as markup until the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Content is neither decoded nor escaped.
const UNESCAPED_ELEMENTS: &[&str] = &["script", "style"];

#[must_use]
pub fn is_void_element(tag: &str) -> bool {
	VOID_ELEMENTS.contains(&tag)
}

/// Parses `html` and appends the resulting nodes to `parent`.
pub fn parse_into(document: &mut Document, parent: NodeId, html: &str) {
	let mut stack = vec![parent];
	let mut rest = html;

	while !rest.is_empty() {
		let current = *stack.last().unwrap_or(&parent);

		if let Some(after) = rest.strip_prefix("<!--") {
			let (comment, remaining) = match after.find("-->") {
				Some(end) => (&after[..end], &after[end + 3..]),
				None => (after, ""),
			};
			let node = document.create_comment(comment);
			document.append_child(current, node);
			rest = remaining;
		} else if rest.starts_with("<!") || rest.starts_with("<?") {
			// Doctype or processing instruction.
			rest = rest.find('>').map_or("", |end| &rest[end + 1..]);
		} else if let Some(after) = rest.strip_prefix("</") {
			let end = after.find('>').unwrap_or(after.len());
			let name = after[..end].trim().to_ascii_lowercase();
			rest = after.get(end + 1..).unwrap_or("");
			match stack.iter().rposition(|&open| open != parent && document.tag_name(open) == Some(name.as_str())) {
				Some(index) => stack.truncate(index),
				None => trace!("Ignoring unmatched end tag </{}>", name),
			}
		} else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
			let (tag, attributes, self_closing, remaining) = parse_start_tag(&rest[1..]);
			rest = remaining;
			let element = document.create_element(&tag);
			for (name, value) in attributes {
				if !document.has_attribute(element, &name) {
					document.set_attribute(element, &name, &value);
				}
			}
			document.append_child(current, element);
			let tag = document.tag_name(element).unwrap_or_default().to_owned();
			if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
				let (content, remaining) = split_raw_text(rest, &tag);
				if !content.is_empty() {
					let text = if UNESCAPED_ELEMENTS.contains(&tag.as_str()) { content.to_owned() } else { decode_entities(content) };
					let node = document.create_text(&text);
					document.append_child(element, node);
				}
				rest = remaining;
			} else if !self_closing && !is_void_element(&tag) {
				stack.push(element);
			}
		} else {
			let end = find_text_end(rest);
			let node = document.create_text(&decode_entities(&rest[..end]));
			document.append_child(current, node);
			rest = &rest[end..];
		}
	}

	if stack.len() > 1 {
		trace!("{} element(s) left unclosed at end of input", stack.len() - 1);
	}
}

/// Text runs until a `<` that starts markup.
fn find_text_end(rest: &str) -> usize {
	let bytes = rest.as_bytes();
	let mut i = 0;
	while let Some(offset) = rest[i..].find('<') {
		let at = i + offset;
		match bytes.get(at + 1) {
			Some(b'!' | b'/' | b'?') => return at.max(if at == 0 { 1 } else { 0 }),
			Some(c) if c.is_ascii_alphabetic() => return at.max(if at == 0 { 1 } else { 0 }),
			_ => i = at + 1,
		}
	}
	rest.len()
}

fn split_raw_text<'a>(rest: &'a str, tag: &str) -> (&'a str, &'a str) {
	let lower = rest.to_ascii_lowercase();
	let closing = format!("</{}", tag);
	match lower.find(&closing) {
		Some(start) => {
			let after = &rest[start..];
			let end = after.find('>').map_or(after.len(), |end| end + 1);
			(&rest[..start], &after[end..])
		}
		None => (rest, ""),
	}
}

/// Parses after the opening `<` up to and including the closing `>`.
fn parse_start_tag(source: &str) -> (String, Vec<(String, String)>, bool, &str) {
	let name_end = source.find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/').unwrap_or(source.len());
	let tag = source[..name_end].to_ascii_lowercase();
	let mut attributes = Vec::new();
	let mut rest = &source[name_end..];
	let mut self_closing = false;

	loop {
		rest = rest.trim_start();
		if let Some(after) = rest.strip_prefix("/>") {
			self_closing = true;
			rest = after;
			break;
		}
		if let Some(after) = rest.strip_prefix('>') {
			rest = after;
			break;
		}
		if let Some(after) = rest.strip_prefix('/') {
			rest = after;
			continue;
		}
		if rest.is_empty() {
			warn!("Unterminated start tag <{}>", tag);
			break;
		}

		let name_end = rest.find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '>' || c == '/').unwrap_or(rest.len()).max(1);
		let name = rest[..name_end].to_ascii_lowercase();
		rest = rest[name_end..].trim_start();

		let value = if let Some(after) = rest.strip_prefix('=') {
			let after = after.trim_start();
			match after.chars().next() {
				Some(quote @ ('"' | '\'')) => {
					let body = &after[1..];
					let end = body.find(quote).unwrap_or(body.len());
					rest = body.get(end + 1..).unwrap_or("");
					decode_entities(&body[..end])
				}
				_ => {
					let end = after.find(|c: char| c.is_ascii_whitespace() || c == '>').unwrap_or(after.len());
					rest = &after[end..];
					decode_entities(&after[..end])
				}
			}
		} else {
			String::new()
		};
		attributes.push((name, value));
	}

	(tag, attributes, self_closing, rest)
}

#[must_use]
pub fn decode_entities(source: &str) -> String {
	if !source.contains('&') {
		return source.to_owned();
	}
	let mut output = String::with_capacity(source.len());
	let mut rest = source;
	while let Some(start) = rest.find('&') {
		output.push_str(&rest[..start]);
		rest = &rest[start..];
		let decoded = rest.find(';').filter(|&end| end <= 10).and_then(|end| {
			let entity = &rest[1..end];
			let c = match entity {
				"amp" => Some('&'),
				"lt" => Some('<'),
				"gt" => Some('>'),
				"quot" => Some('"'),
				"apos" => Some('\''),
				"nbsp" => Some('\u{a0}'),
				_ => entity
					.strip_prefix("#x")
					.or_else(|| entity.strip_prefix("#X"))
					.and_then(|hex| u32::from_str_radix(hex, 16).ok())
					.or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
					.and_then(char::from_u32),
			}?;
			Some((c, end))
		});
		match decoded {
			Some((c, end)) => {
				output.push(c);
				rest = &rest[end + 1..];
			}
			None => {
				output.push('&');
				rest = &rest[1..];
			}
		}
	}
	output.push_str(rest);
	output
}

pub fn escape_text(text: &str, buffer: &mut String) {
	for c in text.chars() {
		match c {
			'&' => buffer.push_str("&amp;"),
			'<' => buffer.push_str("&lt;"),
			'>' => buffer.push_str("&gt;"),
			c => buffer.push(c),
		}
	}
}

pub fn escape_attribute(value: &str, buffer: &mut String) {
	for c in value.chars() {
		match c {
			'&' => buffer.push_str("&amp;"),
			'"' => buffer.push_str("&quot;"),
			c => buffer.push(c),
		}
	}
}

/// Serializes `node` (outer markup for elements) into `buffer`.
pub fn serialize_into(document: &Document, node: NodeId, buffer: &mut String) {
	match document.kind(node) {
		Some(NodeKind::Text) => {
			let text = document.text(node).unwrap_or_default();
			let raw = document.parent(node).and_then(|parent| document.tag_name(parent)).map_or(false, |tag| UNESCAPED_ELEMENTS.contains(&tag));
			if raw {
				buffer.push_str(text);
			} else {
				escape_text(text, buffer);
			}
		}
		Some(NodeKind::Comment) => {
			buffer.push_str("<!--");
			buffer.push_str(document.text(node).unwrap_or_default());
			buffer.push_str("-->");
		}
		Some(NodeKind::Element) => {
			let tag = document.tag_name(node).unwrap_or_default();
			buffer.push('<');
			buffer.push_str(tag);
			for (name, value) in document.attributes(node) {
				buffer.push(' ');
				buffer.push_str(name);
				buffer.push_str("=\"");
				escape_attribute(value, buffer);
				buffer.push('"');
			}
			buffer.push('>');
			if !is_void_element(tag) {
				for &child in document.children(node) {
					serialize_into(document, child, buffer);
				}
				buffer.push_str("</");
				buffer.push_str(tag);
				buffer.push('>');
			}
		}
		Some(NodeKind::Document | NodeKind::Fragment) => {
			for &child in document.children(node) {
				serialize_into(document, child, buffer);
			}
		}
		None => warn!("Tried to serialize freed node {:?}", node),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn round_trip(html: &str) -> String {
		let mut document = Document::new();
		let fragment = document.parse_fragment(html);
		document.inner_html(fragment)
	}

	#[test]
	fn elements_attributes_and_text() {
		assert_eq!(
			round_trip(r#"<div id=a class='x y' hidden>Hi &amp; <b>bye</b><br/><input value="1 &quot;2&quot;"></div>"#),
			r#"<div id="a" class="x y" hidden="">Hi &amp; <b>bye</b><br><input value="1 &quot;2&quot;"></div>"#
		);
	}

	#[test]
	fn comments_and_raw_text() {
		assert_eq!(round_trip("<!-- c --><script>if (a < b) {}</script><textarea>&lt;x&gt;</textarea>"), "<!-- c --><script>if (a < b) {}</script><textarea>&lt;x&gt;</textarea>");
	}

	#[test]
	fn stray_less_than_is_text() {
		assert_eq!(round_trip("1 < 2 <p>ok</p>"), "1 &lt; 2 <p>ok</p>");
	}

	#[test]
	fn numeric_references() {
		assert_eq!(decode_entities("&#65;&#x42;&bogus;&"), "AB&bogus;&");
	}
}
