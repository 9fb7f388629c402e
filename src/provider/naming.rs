//! Deterministic backend identifiers.

use camino::Utf8Path;
use sha2::{Digest, Sha256};

const PREFIX: &str = "opencodespace";
const CONTAINER_HASH_LEN: usize = 12;
const APP_SUFFIX_LEN: usize = 6;
// Remote app names are DNS labels (63 chars); leave room for prefix and suffix.
const APP_SLUG_MAX: usize = 40;

/// Hex SHA-256 over `parts`, separated by NUL so `("ab", "c")` and
/// `("a", "bc")` differ.
#[must_use]
pub fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.into_iter().enumerate() {
        if index > 0 {
            hasher.update([0_u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Local container name: `opencodespace-<hash(project path, provider)>`.
#[must_use]
pub fn container_name(project_path: &Utf8Path, provider: &str) -> String {
    let hash = digest([project_path.as_str(), provider]);
    format!("{PREFIX}-{}", prefix_of(&hash, CONTAINER_HASH_LEN))
}

/// Remote application name: `opencodespace-<slug>-<suffix>`.
///
/// The slug comes from the project name; the suffix from the project path,
/// so two users with a project called `api` do not collide.
#[must_use]
pub fn app_name(project_name: &str, project_path: &Utf8Path) -> String {
    let full_slug = slugify(project_name);
    let slug = full_slug
        .get(..APP_SLUG_MAX)
        .unwrap_or(full_slug.as_str())
        .trim_end_matches('-');
    let hash = digest([project_path.as_str()]);
    let suffix = prefix_of(&hash, APP_SUFFIX_LEN);
    if slug.is_empty() {
        return format!("{PREFIX}-{suffix}");
    }
    format!("{PREFIX}-{slug}-{suffix}")
}

/// Lowercase ASCII slug with single dashes between words.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_owned()
}

fn prefix_of(hash: &str, len: usize) -> &str {
    hash.get(..len).unwrap_or(hash)
}
