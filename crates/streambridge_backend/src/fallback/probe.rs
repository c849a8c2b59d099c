#![forbid(unsafe_code)]

//! Name-alternatives field extraction over backend-native payloads.
//!
//! The companion component renames members across versions, so every
//! logical field is read through an ordered candidate list: first
//! successful extraction wins, absence of all candidates yields the
//! documented default. Extraction never panics; a malformed value on
//! one candidate just moves on to the next.

use serde_json::Value;
use streambridge_domain::{BackendKind, ChatEvent, SenderRoles, UNKNOWN_SENDER};

/// Candidate member names per logical field.
pub const SENDER_NAME: &[&str] = &["DisplayName", "UserName", "Name"];
pub const MESSAGE_TEXT: &[&str] = &["Message", "Text", "Content"];
pub const IS_BROADCASTER: &[&str] = &["IsBroadcaster", "Broadcaster"];
pub const IS_MODERATOR: &[&str] = &["IsModerator", "IsMod", "Moderator"];
pub const IS_SUBSCRIBER: &[&str] = &["IsSubscriber", "Subscriber"];
pub const IS_VIP: &[&str] = &["IsVip", "Vip"];
pub const BITS: &[&str] = &["Bits", "BitsAmount", "CheerAmount"];
pub const FROM_REDEMPTION: &[&str] = &["IsRedemption", "FromReward", "RewardRedeemed"];

/// First candidate that extracts as a non-empty string.
pub fn probe_str(obj: &Value, candidates: &[&str]) -> Option<String> {
	for name in candidates {
		let Some(v) = obj.get(name) else {
			continue;
		};
		if let Some(s) = v.as_str() {
			if !s.is_empty() {
				return Some(s.to_string());
			}
			continue;
		}
		// Numbers are accepted where the component serializes ids as
		// numerics; other shapes move on to the next candidate.
		if v.is_number() {
			return Some(v.to_string());
		}
	}
	None
}

/// First candidate that extracts as a boolean; `false` when none do.
pub fn probe_bool(obj: &Value, candidates: &[&str]) -> bool {
	for name in candidates {
		let Some(v) = obj.get(name) else {
			continue;
		};
		if let Some(b) = v.as_bool() {
			return b;
		}
		if let Some(n) = v.as_i64() {
			return n != 0;
		}
		if let Some(s) = v.as_str() {
			match s.trim().to_ascii_lowercase().as_str() {
				"1" | "true" | "yes" | "on" => return true,
				"0" | "false" | "no" | "off" => return false,
				_ => continue,
			}
		}
	}
	false
}

/// First candidate that extracts as a non-negative integer; `0` when
/// none do.
pub fn probe_u64(obj: &Value, candidates: &[&str]) -> u64 {
	for name in candidates {
		let Some(v) = obj.get(name) else {
			continue;
		};
		if let Some(n) = v.as_u64() {
			return n;
		}
		if let Some(s) = v.as_str()
			&& let Ok(n) = s.trim().parse::<u64>()
		{
			return n;
		}
	}
	0
}

/// Run the full field-extraction algorithm against a backend-native
/// message payload.
///
/// Worst case is a degraded event with every field defaulted; the one
/// reason to return `None` is empty message text.
pub fn chat_event_from_payload(message: &Value) -> Option<ChatEvent> {
	let text = probe_str(message, MESSAGE_TEXT).unwrap_or_default();
	if text.trim().is_empty() {
		return None;
	}

	let sender = probe_str(message, SENDER_NAME).unwrap_or_else(|| UNKNOWN_SENDER.to_string());

	Some(ChatEvent {
		origin: BackendKind::Fallback,
		sender,
		text,
		roles: SenderRoles {
			broadcaster: probe_bool(message, IS_BROADCASTER),
			moderator: probe_bool(message, IS_MODERATOR),
			subscriber: probe_bool(message, IS_SUBSCRIBER),
			vip: probe_bool(message, IS_VIP),
		},
		bits: probe_u64(message, BITS),
		from_redemption: probe_bool(message, FROM_REDEMPTION),
		native: Some(message.clone()),
	})
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::json;

	use super::*;

	#[test]
	fn display_name_wins_over_user_name() {
		let obj = json!({ "DisplayName": "Streamer", "UserName": "streamer_login" });
		assert_eq!(probe_str(&obj, SENDER_NAME).as_deref(), Some("Streamer"));
	}

	#[test]
	fn user_name_used_when_display_name_absent() {
		let obj = json!({ "UserName": "streamer_login" });
		assert_eq!(probe_str(&obj, SENDER_NAME).as_deref(), Some("streamer_login"));
	}

	#[test]
	fn sender_defaults_to_unknown() {
		let obj = json!({ "Message": "hi" });
		let ev = chat_event_from_payload(&obj).expect("event with text");
		assert_eq!(ev.sender, UNKNOWN_SENDER);
	}

	#[test]
	fn malformed_candidate_falls_through_to_next() {
		let obj = json!({ "DisplayName": { "nested": true }, "UserName": "login" });
		assert_eq!(probe_str(&obj, SENDER_NAME).as_deref(), Some("login"));
	}

	#[test]
	fn bool_and_int_defaults() {
		let obj = json!({ "Message": "hi" });
		let ev = chat_event_from_payload(&obj).expect("event with text");
		assert!(!ev.roles.moderator);
		assert!(!ev.roles.broadcaster);
		assert!(!ev.from_redemption);
		assert_eq!(ev.bits, 0);
	}

	#[test]
	fn stringly_typed_flags_and_amounts_parse() {
		let obj = json!({
			"Message": "cheer!",
			"IsMod": "true",
			"Bits": "500",
			"FromReward": 1,
		});
		let ev = chat_event_from_payload(&obj).expect("event with text");
		assert!(ev.roles.moderator);
		assert_eq!(ev.bits, 500);
		assert!(ev.from_redemption);
	}

	#[test]
	fn empty_text_yields_no_event() {
		assert!(chat_event_from_payload(&json!({ "Message": "" })).is_none());
		assert!(chat_event_from_payload(&json!({ "DisplayName": "x" })).is_none());
		assert!(chat_event_from_payload(&json!(null)).is_none());
	}

	#[test]
	fn native_payload_is_retained() {
		let obj = json!({ "Message": "hi", "MessageId": "abc-123" });
		let ev = chat_event_from_payload(&obj).expect("event with text");
		assert_eq!(ev.native, Some(obj));
	}

	fn arb_json(depth: u32) -> impl Strategy<Value = serde_json::Value> {
		let leaf = prop_oneof![
			Just(serde_json::Value::Null),
			any::<bool>().prop_map(serde_json::Value::from),
			any::<i64>().prop_map(serde_json::Value::from),
			"[a-zA-Z0-9 !]{0,16}".prop_map(serde_json::Value::from),
		];
		leaf.prop_recursive(depth, 32, 8, |inner| {
			prop::collection::btree_map("[A-Za-z]{1,12}", inner, 0..8)
				.prop_map(|m| serde_json::Value::Object(m.into_iter().collect()))
		})
	}

	proptest! {
		#[test]
		fn extraction_never_panics(payload in arb_json(3)) {
			let _ = chat_event_from_payload(&payload);
			let _ = probe_str(&payload, SENDER_NAME);
			let _ = probe_bool(&payload, IS_MODERATOR);
			let _ = probe_u64(&payload, BITS);
		}

		#[test]
		fn extracted_text_is_never_empty(payload in arb_json(3)) {
			if let Some(ev) = chat_event_from_payload(&payload) {
				prop_assert!(!ev.text.trim().is_empty());
				prop_assert!(!ev.sender.is_empty());
			}
		}
	}
}
