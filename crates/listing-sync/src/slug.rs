//! Slug derivation for mirror items.
//!
//! The slug is the only key shared by both collections when a source record
//! has no stored mirror reference, so every comparison and every create must
//! go through [`slugify`].

/// Derive a URL-safe slug from a display name.
///
/// Lowercases the name, replaces each run of whitespace with a single hyphen
/// and drops every character outside `[a-z0-9-_]`. Surrounding whitespace is
/// trimmed first, so a blank name yields an empty slug and `" Loft"` yields
/// `loft`, not `-loft`. Items created earlier under a hyphen-prefixed slug
/// no longer match by slug; they are found through the stored reference.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                slug.push('-');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
            slug.push(c);
        }
    }

    slug
}

/// Slug for a record whose base slug is empty or already taken by another
/// source record in the same cycle.
#[must_use]
pub fn disambiguate(base: &str, record_id: &str) -> String {
    let suffix = slugify(record_id);
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}
