//! Helpers for rendering names and operators inside diagnostics.
//!
//! Colored terminal output is the concern of the surrounding tool; in
//! this crate the highlight markers degrade to single quotes, which is
//! also what the tool prints when not attached to a terminal.

/// Style bits passed through the `format` methods of names, targets
/// and dependencies.
pub type Style = u32;

/// The rendered text is embedded next to other markup (a flag prefix,
/// brackets) and already stands out on its own.
pub const S_MARKERS: Style = 1 << 0;

/// Characters that may appear in a name without making its rendering
/// ambiguous inside a message.
fn is_harmless(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'+' | b'-' | b'.' | b'/' | b'_' | b'~')
}

/// Whether a name must be quoted to be unambiguous in a message. Empty
/// names always need quotes, otherwise they would vanish.
pub fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s.bytes().any(|c| !is_harmless(c))
}

/// A single operator character, quoted for a message.
pub fn char_format_word(c: char) -> String {
    format!("'{}'", c)
}

/// A name, quoted for a message.
pub fn name_format_word(s: &str) -> String {
    format!("'{}'", s)
}

/// A name preceded by an operator prefix, quoted as one word, e.g.
/// `'>A'` or `'$X'`.
pub fn prefix_format_word(s: &str, prefix: &str) -> String {
    format!("'{}{}'", prefix, s)
}

/// A variable dependency, quoted for a message, e.g. `'$[CFLAGS]'`.
pub fn dynamic_variable_format_word(s: &str) -> String {
    format!("'$[{}]'", s)
}
