//! Canonical path key normalization (spec §3.7, §8.2: `PathKey.normalize`
//! round-trips through `parse`).

/// The root path key for a storage, with no object components yet.
pub fn root(storage_id: u32) -> String {
    format!("/storage/{storage_id}")
}

/// Joins a child name onto a parent's path key.
pub fn join(parent_path_key: &str, name: &str) -> String {
    format!("{parent_path_key}/{name}")
}

/// Builds the canonical path key for `storage_id` and the given ordered
/// path components (spec §8.2 `PathKey.normalize(storage, components)`).
pub fn normalize(storage_id: u32, components: &[String]) -> String {
    let mut key = root(storage_id);
    for c in components {
        key = join(&key, c);
    }
    key
}

/// Inverse of [`normalize`]: splits a path key back into `(storage_id,
/// components)`. Returns `None` for anything not shaped like a path key
/// this module produced.
pub fn parse(path_key: &str) -> Option<(u32, Vec<String>)> {
    let rest = path_key.strip_prefix("/storage/")?;
    let mut parts = rest.splitn(2, '/');
    let storage_id: u32 = parts.next()?.parse().ok()?;
    let components = match parts.next() {
        Some(tail) if !tail.is_empty() => tail.split('/').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Some((storage_id, components))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_then_parse_round_trips() {
        let pk = normalize(7, &["DCIM".to_string(), "Camera".to_string(), "img.jpg".to_string()]);
        assert_eq!(pk, "/storage/7/DCIM/Camera/img.jpg");
        let (storage, components) = parse(&pk).unwrap();
        assert_eq!(storage, 7);
        assert_eq!(normalize(storage, &components), pk);
    }

    #[test]
    fn root_path_key_parses_to_empty_components() {
        let pk = root(3);
        let (storage, components) = parse(&pk).unwrap();
        assert_eq!(storage, 3);
        assert!(components.is_empty());
        assert_eq!(normalize(storage, &components), pk);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_eq!(parse("not-a-path-key"), None);
    }
}
