//! Slugs and random tokens

use rand::{distr::Alphanumeric, Rng};

/// Turn a display name into a URL segment.
///
/// ASCII letters and digits are lowercased and kept, non-ASCII letters are
/// kept as is, everything else collapses into single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Random `[A-Za-z0-9]` token of `len` characters
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random lowercase token, used where the value ends up in a URL
pub fn random_slug(len: usize) -> String {
    random_token(len).to_lowercase()
}
