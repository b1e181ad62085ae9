use serde::Deserialize;
use serde_json::{Map, Value};

/// Socket-wide settings.
///
/// Deserializes from a partial JSON object, with missing fields taking their [`Default`] value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Prefix of all binding attributes, like `phx-click`.
	pub binding_prefix: String,
	/// Delay before a joining or navigating view is shown as disconnected.
	///
	/// There are no timers in this crate, so any non-zero value applies the loading classes right away.
	pub loader_timeout_ms: u32,
	/// Passed along with every event push. The transport reports [`Reply::Timeout`](`crate::Reply::Timeout`) when it elapses.
	pub push_timeout_ms: u32,
	/// Inclusive range of the random delay before reloading after a failed join.
	pub reload_jitter_ms: [u32; 2],
	/// Consecutive failed joins (per view name) after which [`failsafe_jitter_ms`](`Config::failsafe_jitter_ms`) is used instead.
	pub max_reloads: u32,
	pub failsafe_jitter_ms: u32,
	/// Sent in the `params` of every join, before `_mounts` and `_track_static` are added.
	pub connect_params: Map<String, Value>,
	/// Logs duplicate element ids after each patch.
	pub debug: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			binding_prefix: "phx-".to_owned(),
			loader_timeout_ms: 1,
			push_timeout_ms: 30_000,
			reload_jitter_ms: [1000, 3000],
			max_reloads: 10,
			failsafe_jitter_ms: 30_000,
			connect_params: Map::new(),
			debug: false,
		}
	}
}

impl Config {
	/// # Errors
	///
	/// Iff `value` is not an object or a field has the wrong type.
	pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
		serde_json::from_value(value)
	}

	/// The full attribute name of binding `kind`.
	#[must_use]
	pub fn binding(&self, kind: &str) -> String {
		format!("{}{}", self.binding_prefix, kind)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn partial_json_keeps_defaults() {
		let config = Config::from_json(json!({ "binding_prefix": "lv-", "connect_params": { "token": "t" } })).unwrap();
		assert_eq!(config.binding("click"), "lv-click");
		assert_eq!(config.max_reloads, 10);
		assert_eq!(config.connect_params["token"], "t");
		assert!(Config::from_json(json!({ "max_reloads": "many" })).is_err());
	}
}
