//! Reserved-word name mangling
//!
//! Starlink parameter and component names are case-insensitive and can
//! collide with reserved identifiers (`IN`, `TYPE`, `LOOP`, ...). Callers
//! append [`RESERVED_MARKER`] to such names; the marker is stripped before a
//! keyword reaches the external program and added back when a container
//! component becomes a record field.

/// Marker appended to names that collide with reserved identifiers
pub const RESERVED_MARKER: char = '_';

/// Strict and reserved Rust keywords
const RESERVED: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl",
    "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub",
    "ref", "return", "self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// Check whether a (lower-case) name is a reserved identifier
pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Name of a keyword parameter as the external program expects it
///
/// Lower-cases the name and strips one trailing marker, so `In_` and `IN`
/// both become `in`.
pub fn parameter_name(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.strip_suffix(RESERVED_MARKER) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => lower,
    }
}

/// Record field name for a container component
pub fn field_name(name: &str) -> String {
    let mut lower = name.to_lowercase();
    if is_reserved(&lower) {
        lower.push(RESERVED_MARKER);
    }
    lower
}
