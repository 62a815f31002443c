use serde::{Deserialize, Serialize};

/// Chat sidecar track metadata.
///
/// Sidecars are passed through so catalogs round-trip; the watch pipeline does
/// not consume them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
	/// The name of the chat track within the broadcast.
	pub track: String,
}
