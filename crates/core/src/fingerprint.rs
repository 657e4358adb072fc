use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fingerprint of captured content for duplicate detection
///
/// SHA256 of normalized text. Normalization:
/// - lowercase
/// - drop everything except alphanumerics and whitespace
/// - collapse whitespace runs to one space, trim
///
/// Whitespace and punctuation differences between two fetches of the same
/// page therefore do not produce a second record.
pub fn content_fingerprint(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    sha256_hex(&normalized)
}

/// Dedupe key for a URL capture request: `sha256(user_id + url)`
pub fn capture_dedupe_key(user_id: Uuid, url: &str) -> String {
    sha256_hex(&format!("{user_id}{}", url.trim()))
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_same_fingerprint() {
        let text = "Rust 1.80 released with LazyCell";
        assert_eq!(content_fingerprint(text), content_fingerprint(text));
    }

    #[test]
    fn test_formatting_changes_same_fingerprint() {
        assert_eq!(
            content_fingerprint("Rust 1.80 released,  with LazyCell!"),
            content_fingerprint("  rust 180 released with\nlazycell ")
        );
    }

    #[test]
    fn test_different_text_different_fingerprint() {
        assert_ne!(
            content_fingerprint("Rust 1.80 released"),
            content_fingerprint("Rust 1.81 released")
        );
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = content_fingerprint("x");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_capture_dedupe_key_is_per_user() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let url = "https://a.example/x";
        assert_eq!(capture_dedupe_key(a, url), capture_dedupe_key(a, url));
        assert_ne!(capture_dedupe_key(a, url), capture_dedupe_key(b, url));
    }
}
