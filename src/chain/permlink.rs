//! Permlink synthesis for new posts

/// Chain limit on permlink length
pub const MAX_PERMLINK_LEN: usize = 255;

/// Slug used when a title has no usable characters
const EMPTY_TITLE_SLUG: &str = "post";

/// Lower-case a title into a hyphenated slug of `[a-z0-9-]`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_hyphen = false;

    for ch in lowered.chars() {
        if ch.is_whitespace() {
            pending_hyphen = true;
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        }
    }

    slug.trim_matches('-').to_string()
}

/// Encode a number in lower-case base 36
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Build a permlink from a title and a millisecond timestamp
pub fn permlink_at(title: &str, timestamp_ms: u64) -> String {
    let suffix = to_base36(timestamp_ms);
    let mut slug = slugify(title);
    if slug.is_empty() {
        slug = EMPTY_TITLE_SLUG.to_string();
    }

    let budget = MAX_PERMLINK_LEN.saturating_sub(suffix.len() + 1);
    if slug.len() > budget {
        // slug is ASCII so byte truncation is safe
        slug.truncate(budget);
        slug = slug.trim_end_matches('-').to_string();
    }

    format!("{}-{}", slug, suffix)
}

/// Build a permlink for a title using the current time
pub fn generate_permlink(title: &str) -> String {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    permlink_at(title, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World! "), "hello-world");
        assert_eq!(slugify("  Night   shift\tdrivers "), "night-shift-drivers");
        assert_eq!(slugify("Ünïcode ride 42"), "ncode-ride-42");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("-already-slugged-"), "already-slugged");
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn test_permlink_shape() {
        let permlink = permlink_at("Hello, World! ", 1_700_000_000_000);
        assert_eq!(permlink, "hello-world-loyw3v28");

        let (slug, suffix) = permlink.rsplit_once('-').unwrap();
        assert_eq!(slug, "hello-world");
        assert!(!suffix.is_empty());
    }

    #[test]
    fn test_distinct_times_give_distinct_permlinks() {
        let a = permlink_at("Hello, World! ", 1_700_000_000_000);
        let b = permlink_at("Hello, World! ", 1_700_000_000_001);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_title_and_length_limit() {
        assert_eq!(permlink_at("???", 36), "post-10");

        let long_title = "word ".repeat(200);
        let permlink = permlink_at(&long_title, 1_700_000_000_000);
        assert!(permlink.len() <= MAX_PERMLINK_LEN);
        assert!(!permlink.contains("--"));
        assert!(permlink.ends_with("-loyw3v28"));
    }

    #[test]
    fn test_generate_permlink_uses_clock() {
        let permlink = generate_permlink("Shift report");
        assert!(permlink.starts_with("shift-report-"));
    }
}
