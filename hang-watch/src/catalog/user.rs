use serde::{Deserialize, Serialize};

/// User metadata for the broadcaster.
///
/// Passed through for UI layers; the watch pipeline does not consume it.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
	#[serde(default)]
	pub name: Option<String>,

	#[serde(default)]
	pub avatar: Option<String>,
}
