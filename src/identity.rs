//! Cache identity derivation.
//!
//! An identity is `{sha256(source_path \0 canonical_spec)}-{source_mtime}.{ext}`.
//!
//! - The hash covers *what* was asked of *which* file. The spec is
//!   serialized canonically (fixed key order, sorted extra tokens) so token
//!   order in the URL never produces a second artifact.
//! - The source's modification time sits in the clear after the hash.
//!   Touching or replacing the source changes the identity, so stale
//!   artifacts are never served again; they are simply no longer reachable.
//!   There is no purge step.
//! - The extension names the output encoding.

use crate::params::TransformSpec;
use sha2::{Digest, Sha256};

/// Stable serialization of a spec.
///
/// JSON with fields in declaration order; `Option::None` becomes `null`.
pub fn canonical_spec(spec: &TransformSpec) -> String {
    // Serializing a struct of plain fields and a string set cannot fail.
    serde_json::to_string(spec).unwrap_or_default()
}

/// Derive the artifact file name for a (source, spec, version) triple.
pub fn derive_key(
    source_path: &str,
    spec: &TransformSpec,
    source_modified: i64,
    extension: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_spec(spec).as_bytes());
    format!("{:x}-{}.{}", hasher.finalize(), source_modified, extension)
}
