//! Stable chunk identity: fingerprints, chunk keys, point IDs

use uuid::Uuid;

/// Namespace for deriving vector point IDs from chunk keys (UUID v5).
/// Fixed for the lifetime of the index format; changing it orphans every
/// existing point.
pub const POINT_NAMESPACE: Uuid = Uuid::from_bytes([
    0xc5, 0xb7, 0x0f, 0xb1, 0x3c, 0x2d, 0x4e, 0x8a, 0x9f, 0x41, 0x7a, 0x6d, 0x2b, 0x9e, 0x5c,
    0x13,
]);

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a 32-bit fingerprint over chunk text
pub fn fnv1a32(text: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Chunk key string: `"<absPath>#<lineStart>-<lineEnd>#<fnv32hex>"`.
/// Public and stable; the UUID v5 name for the point ID.
pub fn chunk_key(abs_path: &str, line_start: usize, line_end: usize, fingerprint: u32) -> String {
    format!("{abs_path}#{line_start}-{line_end}#{fingerprint:08x}")
}

/// Derive the point ID for a chunk key
pub fn point_id(key: &str) -> Uuid {
    Uuid::new_v5(&POINT_NAMESPACE, key.as_bytes())
}

/// Normalize a project-relative path: backslashes become slashes and a
/// leading `./` is stripped.
pub fn normalize_rel_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    forward
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(forward)
}

/// Normalize an editor guid: lowercased, braces stripped
pub fn normalize_guid(guid: &str) -> String {
    guid.trim_matches(|c| c == '{' || c == '}').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a32_vectors() {
        assert_eq!(fnv1a32(""), 0x811c_9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_chunk_key_format() {
        let key = chunk_key("/proj/Assets/S.cs", 1, 80, 0xbf9c_f968);
        assert_eq!(key, "/proj/Assets/S.cs#1-80#bf9cf968");
    }

    #[test]
    fn test_point_id_deterministic() {
        let key = chunk_key("/proj/Assets/S.cs", 1, 80, 42);
        assert_eq!(point_id(&key), point_id(&key));

        let other = chunk_key("/proj/Assets/T.cs", 1, 80, 42);
        assert_ne!(point_id(&key), point_id(&other));
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("Assets\\src\\S.cs"), "Assets/src/S.cs");
        assert_eq!(normalize_rel_path("./Assets/S.cs"), "Assets/S.cs");
        assert_eq!(normalize_rel_path("Assets/S.cs"), "Assets/S.cs");
    }

    #[test]
    fn test_normalize_guid() {
        assert_eq!(normalize_guid("{ABCDEF01}"), "abcdef01");
        assert_eq!(normalize_guid("AbCd"), "abcd");
    }
}
