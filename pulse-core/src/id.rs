//! Entity identifier generation.
//!
//! Format: `{prefix}-{unix_millis}-{suffix}` where `suffix` is 7 lowercase
//! hex characters taken from a v4 UUID. Unique within one process lifetime,
//! not across restarts, and not suitable as a secret.

use chrono::Utc;
use uuid::Uuid;

/// Length of the random suffix.
const SUFFIX_LEN: usize = 7;

/// Generate a new identifier such as `proposal-1718000000000-4f9a1c2`.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &random[..SUFFIX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_has_prefix_and_three_parts() {
        let id = generate_id("proposal");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "proposal");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
    }

    #[test]
    fn test_ids_unique_in_tight_loop() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_id("comment")).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
