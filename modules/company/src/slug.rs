//! URL slugs derived from company names

/// Slug used when a name has no usable characters
pub const FALLBACK_SLUG: &str = "company";

/// Lowercase, keep ASCII letters, digits and dashes, turn whitespace runs
/// into single dashes, collapse repeated dashes and trim them off the ends.
pub fn generate_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());

    for c in name.to_lowercase().chars() {
        let next = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else if c == '-' || c.is_whitespace() {
            '-'
        } else {
            continue;
        };

        if next == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(next);
    }

    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Second-choice slug after a collision: `<slug>-<user_id>`
pub fn disambiguate(slug: &str, user_id: i64) -> String {
    format!("{slug}-{user_id}")
}
