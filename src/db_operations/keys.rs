use crate::error::{PearError, PearResult};

/// Separator between composite key segments.
const SEPARATOR: char = '\u{0}';

/// Joins key segments into one composite tree key. Segments may be empty
/// (an empty record key marks a collection-wide row) but must not contain the
/// separator.
pub fn compose_key(segments: &[&str]) -> PearResult<String> {
    if let Some(bad) = segments.iter().find(|s| s.contains(SEPARATOR)) {
        return Err(PearError::InvalidInput(format!(
            "key segment {:?} contains a NUL byte",
            bad
        )));
    }
    let mut key = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(segment);
    }
    Ok(key)
}

/// Composite key prefix that matches every key starting with `segments`.
pub fn prefix_key(segments: &[&str]) -> PearResult<String> {
    let mut key = compose_key(segments)?;
    key.push(SEPARATOR);
    Ok(key)
}

/// Splits a composite key back into its segments.
pub fn split_key(key: &str) -> Vec<&str> {
    key.split(SEPARATOR).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_and_splits() {
        let key = compose_key(&["did:plc:a", "app.posts", ""]).unwrap();
        assert_eq!(split_key(&key), vec!["did:plc:a", "app.posts", ""]);
        let prefix = prefix_key(&["did:plc:a"]).unwrap();
        assert!(key.starts_with(&prefix));
        // a DID that merely starts with the same characters must not match
        let other = compose_key(&["did:plc:ab", "app.posts", ""]).unwrap();
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn rejects_separator_in_segment() {
        assert!(compose_key(&["bad\u{0}segment"]).is_err());
    }
}
