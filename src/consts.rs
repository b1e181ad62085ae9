//! Attribute, class and key names of the markup and wire protocol.
//!
//! Names without a `data-` prefix are bindings and get prefixed with [`Config::binding_prefix`](`crate::Config::binding_prefix`) at runtime.

pub const CONSECUTIVE_RELOADS: &str = "consecutive-reloads";

pub const PHX_VIEW: &str = "data-phx-view";
pub const PHX_COMPONENT: &str = "data-phx-component";
pub const PHX_LIVE_LINK: &str = "data-phx-link";
pub const PHX_LINK_STATE: &str = "data-phx-link-state";
pub const PHX_REF: &str = "data-phx-ref";
pub const PHX_SKIP: &str = "data-phx-skip";
pub const PHX_REMOVE: &str = "data-phx-remove";
pub const PHX_PARENT_ID: &str = "data-phx-parent-id";
pub const PHX_MAIN: &str = "data-phx-main";
pub const PHX_ROOT_ID: &str = "data-phx-root-id";
pub const PHX_SESSION: &str = "data-phx-session";
pub const PHX_STATIC: &str = "data-phx-static";
pub const PHX_READONLY: &str = "data-phx-readonly";
pub const PHX_DISABLED: &str = "data-phx-disabled";
pub const PHX_DISABLE_WITH_RESTORE: &str = "data-phx-disable-with-restore";

pub const PHX_CONNECTED_CLASS: &str = "phx-connected";
pub const PHX_DISCONNECTED_CLASS: &str = "phx-disconnected";
pub const PHX_ERROR_CLASS: &str = "phx-error";
pub const PHX_NO_FEEDBACK_CLASS: &str = "phx-no-feedback";

pub const PHX_EVENT_CLASSES: &[&str] = &[
	"phx-click-loading",
	"phx-change-loading",
	"phx-submit-loading",
	"phx-keydown-loading",
	"phx-keyup-loading",
	"phx-blur-loading",
	"phx-focus-loading",
];

// Binding suffixes.
pub const PHX_TRACK_STATIC: &str = "track-static";
pub const PHX_PAGE_LOADING: &str = "page-loading";
pub const PHX_FEEDBACK_FOR: &str = "feedback-for";
pub const PHX_DISABLE_WITH: &str = "disable-with";
pub const PHX_HOOK: &str = "hook";
pub const PHX_UPDATE: &str = "update";
pub const PHX_KEY: &str = "key";
pub const PHX_TARGET: &str = "target";
pub const PHX_AUTO_RECOVER: &str = "auto-recover";
pub const PHX_CHANGE: &str = "change";
pub const PHX_SUBMIT: &str = "submit";
pub const PHX_CLICK: &str = "click";
pub const PHX_CAPTURE_CLICK: &str = "capture-click";
pub const PHX_VALUE: &str = "value-";

pub const CHECKABLE_INPUTS: &[&str] = &["checkbox", "radio"];
pub const FOCUSABLE_INPUTS: &[&str] = &["text", "textarea", "number", "email", "password", "search", "tel", "url", "date", "time"];

// Diff keys.
pub const STATIC: &str = "s";
pub const DYNAMICS: &str = "d";
pub const COMPONENTS: &str = "c";
pub const TITLE: &str = "title";
