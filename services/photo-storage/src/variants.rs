//! Photo variant table and object key derivation.
//!
//! The variant table is a fixed, process-wide constant: key derivation and
//! URL cache correctness both assume it never changes at runtime.

/// Shared key namespace for every stored photo object.
pub const KEY_NAMESPACE: &str = "businesses/";

/// Name of the full-size variant (re-encode only, no resize).
pub const ORIGINAL: &str = "original";

/// A named photo rendition with fixed target bounds and JPEG quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    /// Variant name, embedded in the object key suffix
    pub name: &'static str,
    /// Maximum output width in pixels (None = keep source width)
    pub max_width: Option<u32>,
    /// Maximum output height in pixels (None = keep source height)
    pub max_height: Option<u32>,
    /// JPEG quality (0-100)
    pub quality: u8,
}

/// The five canonical variants derived from every upload.
pub const VARIANTS: [VariantSpec; 5] = [
    VariantSpec {
        name: "thumbnail",
        max_width: Some(150),
        max_height: Some(150),
        quality: 70,
    },
    VariantSpec {
        name: "small",
        max_width: Some(320),
        max_height: Some(320),
        quality: 80,
    },
    VariantSpec {
        name: "medium",
        max_width: Some(800),
        max_height: Some(800),
        quality: 85,
    },
    VariantSpec {
        name: "large",
        max_width: Some(1600),
        max_height: Some(1600),
        quality: 90,
    },
    VariantSpec {
        name: ORIGINAL,
        max_width: None,
        max_height: None,
        quality: 95,
    },
];

/// Look up a variant by name. Unknown names are a caller error and are
/// rejected before any processing or network work.
pub fn get(name: &str) -> Option<&'static VariantSpec> {
    VARIANTS.iter().find(|v| v.name == name)
}

/// Derive the storage key for a (business, photo, variant) triple.
/// Format: `businesses/{business_id}/photos/{photo_id}{variant_suffix}.jpg`
///
/// The derivation is pure: re-uploading the same triple always yields the
/// identical key, so the new object overwrites the prior one in storage.
/// The `original` variant carries no suffix.
pub fn object_key(business_id: &str, photo_id: &str, variant: &str) -> String {
    let suffix = if variant == ORIGINAL {
        String::new()
    } else {
        format!("-{variant}")
    };

    format!(
        "{KEY_NAMESPACE}{business}/photos/{photo}{suffix}.jpg",
        business = sanitize_path_component(business_id),
        photo = sanitize_path_component(photo_id),
    )
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
