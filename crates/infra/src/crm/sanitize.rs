use serde_json::{Map, Value as JsonValue};
use tracing::warn;

/// Remove top-level keys the CRM must never receive. Matching ignores ASCII
/// case. Returns the removed keys; a blocked key is a warning, never an error.
pub fn strip_blocked_fields(data: &mut Map<String, JsonValue>, blocked: &[String]) -> Vec<String> {
    let removed: Vec<String> = data
        .keys()
        .filter(|key| blocked.iter().any(|b| b.eq_ignore_ascii_case(key)))
        .cloned()
        .collect();

    for key in &removed {
        data.remove(key);
        warn!(field = %key, "stripped blocked field from CRM payload");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocked() -> Vec<String> {
        vec!["password".into(), "creditCard".into()]
    }

    #[test]
    fn blocked_keys_are_removed_case_insensitively() {
        let JsonValue::Object(mut data) = json!({
            "email": "a@b.c",
            "Password": "hunter2",
            "creditcard": "4111",
            "plan": "pro"
        }) else {
            unreachable!()
        };

        let mut removed = strip_blocked_fields(&mut data, &blocked());
        removed.sort();

        assert_eq!(removed, vec!["Password".to_string(), "creditcard".to_string()]);
        assert_eq!(data.len(), 2);
        assert!(data.contains_key("email"));
        assert!(data.contains_key("plan"));
    }

    #[test]
    fn clean_payload_is_untouched() {
        let JsonValue::Object(mut data) = json!({ "email": "a@b.c" }) else {
            unreachable!()
        };
        assert!(strip_blocked_fields(&mut data, &blocked()).is_empty());
        assert_eq!(data.len(), 1);
    }
}
