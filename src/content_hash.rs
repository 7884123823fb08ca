//! SHA-256 digests used as dedup keys for images and coordinate layouts.

use sha2::{Digest, Sha256};

use crate::app_response::AppResponse;
use crate::library_model::Point;

/// Hex-encoded SHA-256 of raw image bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical serialization of a coordinate array: compact JSON, `x` before `y`.
///
/// Signed zeros are folded to `0.0`, so arrays that compare equal serialize equally.
pub fn canonical_coordinates(coords: &[Point]) -> Result<String, AppResponse> {
    let normalized: Vec<Point> = coords
        .iter()
        .map(|p| Point::new(p.x + 0.0, p.y + 0.0))
        .collect();
    Ok(serde_json::to_string(&normalized)?)
}

/// Digest of a coordinate array. Equal arrays (same values, same order) always share it.
pub fn hash_coordinates(coords: &[Point]) -> Result<String, AppResponse> {
    let canonical = canonical_coordinates(coords)?;
    Ok(hash_bytes(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_bytes(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_coordinates_independent_of_construction() {
        let built: Vec<Point> = (0..3).map(|i| Point::new(i as f64 * 10.0, 5.0)).collect();
        let parsed: Vec<Point> =
            serde_json::from_str(r#"[ {"y": 5, "x": 0}, {"x": 10.0, "y": 5.0}, {"x": 20, "y": 5} ]"#)
                .unwrap();
        assert_eq!(
            hash_coordinates(&built).unwrap(),
            hash_coordinates(&parsed).unwrap()
        );
    }

    #[test]
    fn test_order_matters() {
        let a = vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)];
        let b = vec![Point::new(2.0, 2.0), Point::new(1.0, 1.0)];
        assert_ne!(hash_coordinates(&a).unwrap(), hash_coordinates(&b).unwrap());
    }

    #[test]
    fn test_negative_zero_hashes_like_zero() {
        let negative = vec![Point::new(-0.0, 1.0), Point::new(2.0, -0.0)];
        let positive = vec![Point::new(0.0, 1.0), Point::new(2.0, 0.0)];
        assert_eq!(negative, positive);
        assert_eq!(
            hash_coordinates(&negative).unwrap(),
            hash_coordinates(&positive).unwrap()
        );
        assert_eq!(
            canonical_coordinates(&negative).unwrap(),
            r#"[{"x":0.0,"y":1.0},{"x":2.0,"y":0.0}]"#
        );
    }

    #[test]
    fn test_canonical_form_is_compact() {
        let json = canonical_coordinates(&[Point::new(1.5, 2.0)]).unwrap();
        assert_eq!(json, r#"[{"x":1.5,"y":2.0}]"#);
    }
}
