use chrono::Utc;
use uuid::Uuid;

/// Generates a human-readable request code, e.g. `EXP-20250314-9F3A21C0`.
///
/// The date prefix keeps codes sortable for humans; the uuid suffix keeps
/// them unique without a database round trip.
pub fn generate_request_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("EXP-{date}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_the_expected_shape() {
        let code = generate_request_code();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "EXP");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn consecutive_codes_differ() {
        assert_ne!(generate_request_code(), generate_request_code());
    }
}
