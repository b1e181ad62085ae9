//! A small CSS selector subset.
//!
//! Supported: type selectors, `#id`, `.class`, `[attr]`, `[attr=value]` (optionally quoted), `*`,
//! the descendant combinator (whitespace) and selector lists (`,`).

use crate::document::{Document, NodeId};
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector(Vec<Complex>);

/// Compound selectors joined by descendant combinators, rightmost last.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex(Vec<Compound>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
	tag: Option<String>,
	id: Option<String>,
	classes: Vec<String>,
	attributes: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
	pub selector: String,
	pub position: usize,
}

impl fmt::Display for SelectorError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unsupported selector {:?} at byte {}", self.selector, self.position)
	}
}

impl std::error::Error for SelectorError {}

impl Selector {
	/// # Errors
	///
	/// Iff `source` uses syntax outside the supported subset.
	pub fn parse(source: &str) -> Result<Self, SelectorError> {
		let error = |position| SelectorError { selector: source.to_owned(), position };
		let mut groups = Vec::new();
		for group in source.split(',') {
			let offset = group.as_ptr() as usize - source.as_ptr() as usize;
			let mut compounds = Vec::new();
			for part in group.split_ascii_whitespace() {
				let part_offset = part.as_ptr() as usize - source.as_ptr() as usize;
				compounds.push(parse_compound(part).map_err(|at| error(part_offset + at))?);
			}
			if compounds.is_empty() {
				return Err(error(offset));
			}
			groups.push(Complex(compounds));
		}
		Ok(Self(groups))
	}

	/// Matches elements carrying attribute `name`, with `value` if given.
	#[must_use]
	pub fn attribute(name: &str, value: Option<&str>) -> Self {
		Self(vec![Complex(vec![Compound {
			attributes: vec![(name.to_owned(), value.map(str::to_owned))],
			..Compound::default()
		}])])
	}

	#[must_use]
	pub fn matches(&self, document: &Document, node: NodeId) -> bool {
		self.0.iter().any(|complex| complex.matches(document, node))
	}
}

impl Complex {
	fn matches(&self, document: &Document, node: NodeId) -> bool {
		let (last, ancestors) = match self.0.split_last() {
			Some(split) => split,
			None => return false,
		};
		if !last.matches(document, node) {
			return false;
		}
		let mut current = document.parent(node);
		for compound in ancestors.iter().rev() {
			loop {
				match current {
					None => return false,
					Some(ancestor) => {
						current = document.parent(ancestor);
						if compound.matches(document, ancestor) {
							break;
						}
					}
				}
			}
		}
		true
	}
}

impl Compound {
	fn matches(&self, document: &Document, node: NodeId) -> bool {
		let tag = match document.tag_name(node) {
			Some(tag) => tag,
			None => return false,
		};
		self.tag.as_deref().map_or(true, |expected| expected.eq_ignore_ascii_case(tag))
			&& self.id.as_deref().map_or(true, |id| document.id_of(node) == Some(id))
			&& self.classes.iter().all(|class| document.has_class(node, class))
			&& self.attributes.iter().all(|(name, value)| match (document.attribute(node, name), value) {
				(Some(actual), Some(expected)) => actual == expected,
				(Some(_), None) => true,
				(None, _) => false,
			})
	}
}

fn is_name_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_name(source: &str, start: usize) -> (&str, usize) {
	let end = source[start..].find(|c: char| !is_name_char(c)).map_or(source.len(), |len| start + len);
	(&source[start..end], end)
}

fn parse_compound(source: &str) -> Result<Compound, usize> {
	let mut compound = Compound::default();
	let mut i = 0;
	if source.starts_with('*') {
		i = 1;
	} else {
		let (tag, end) = take_name(source, 0);
		if !tag.is_empty() {
			compound.tag = Some(tag.to_ascii_lowercase());
			i = end;
		}
	}
	while i < source.len() {
		match source.as_bytes()[i] {
			b'#' => {
				let (id, end) = take_name(source, i + 1);
				if id.is_empty() {
					return Err(i);
				}
				compound.id = Some(id.to_owned());
				i = end;
			}
			b'.' => {
				let (class, end) = take_name(source, i + 1);
				if class.is_empty() {
					return Err(i);
				}
				compound.classes.push(class.to_owned());
				i = end;
			}
			b'[' => {
				let close = source[i..].find(']').ok_or(i)? + i;
				let inner = &source[i + 1..close];
				let attribute = match inner.split_once('=') {
					Some((name, value)) => {
						let value = value.trim_matches(|c| c == '"' || c == '\'');
						(name.trim().to_ascii_lowercase(), Some(value.to_owned()))
					}
					None => (inner.trim().to_ascii_lowercase(), None),
				};
				if attribute.0.is_empty() {
					return Err(i);
				}
				compound.attributes.push(attribute);
				i = close + 1;
			}
			_ => return Err(i),
		}
	}
	Ok(compound)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compound_and_descendant() {
		let document = Document::from_html(r#"<div class="a b" data-phx-component="1"><p id="x" data-k='v'>t</p></div><p id="y"></p>"#);
		let x = document.element_by_id("x").unwrap();
		let y = document.element_by_id("y").unwrap();
		let selector = Selector::parse(r#"[data-phx-component="1"] p[data-k=v]"#).unwrap();
		assert!(selector.matches(&document, x));
		assert!(!selector.matches(&document, y));
		assert!(Selector::parse("div.a.b, #y").unwrap().matches(&document, y));
		assert_eq!(document.query_all(document.root(), &Selector::parse("p").unwrap()), vec![x, y]);
	}

	#[test]
	fn rejects_pseudo_classes() {
		assert!(Selector::parse("a:hover").is_err());
		assert!(Selector::parse("").is_err());
	}
}
