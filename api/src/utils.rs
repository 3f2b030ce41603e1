use chrono::Local;
use uuid::Uuid;

/// Session ids are the local start time, as the chat logs have always been
/// named, plus a short random suffix so two sessions opened in the same second
/// stay distinct.
pub fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        &suffix[..6]
    )
}

/// Reduce an identifier to characters that are safe in a file name.
pub fn sanitize_file_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        // 2025-01-31_09-15-00_ab12cd
        assert_eq!(id.len(), 26);
        assert_eq!(&id[4..5], "-");
        assert_eq!(&id[10..11], "_");
        assert_ne!(new_session_id(), id);
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("alice"), "alice");
        assert_eq!(sanitize_file_component("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_component("a b@c"), "a_b_c");
        assert_eq!(sanitize_file_component("   "), "anonymous");
        assert_eq!(sanitize_file_component(".."), "anonymous");
    }
}
