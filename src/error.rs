use crate::selector::SelectorError;
use thiserror::Error;

/// A diff message that doesn't follow the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
	#[error("expected a JSON object at `{path}`")]
	NotAnObject { path: String },
	#[error("statics at `{path}` must be an array of strings")]
	InvalidStatics { path: String },
	#[error("dynamics at `{path}` must be an array of arrays")]
	InvalidDynamics { path: String },
	#[error("component id {key:?} is not a non-negative integer")]
	InvalidComponentId { key: String },
	#[error("the title must be a string")]
	InvalidTitle,
}

#[derive(Debug, Error)]
pub enum SocketError {
	/// The only fatal condition: there is nothing to connect.
	#[error("no root view element found in the document")]
	NoRootView,
	#[error("no view with id {0:?}")]
	UnknownView(String),
	#[error("no phx-target's found matching {0:?}")]
	TargetNotFound(String),
	#[error("expected data-phx-link to be \"patch\" or \"redirect\", got: {0:?}")]
	InvalidLinkType(String),
	#[error("element {0:?} is not owned by any view")]
	NoOwner(String),
	#[error(transparent)]
	Selector(#[from] SelectorError),
	#[error(transparent)]
	Diff(#[from] DiffError),
}
