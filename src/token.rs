//! The token interface consumed by the parser.
//!
//! Tokens are produced by the tokenizer, which lives outside of this
//! crate; the parser only needs the tagged values defined here plus a
//! place for diagnostics past the end of the input.

use crate::name::PlaceName;
use crate::place::Place;
use crate::text::{char_format_word, name_format_word};

/// A `{ ... }` block: a shell command, or hardcoded content when it
/// follows `=`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// The place of the opening brace.
    pub place: Place,
    /// The text between the braces, with the outer indentation
    /// stripped by the tokenizer.
    pub text: String,
}

impl Command {
    pub fn new(text: impl Into<String>, place: Place) -> Self {
        Command {
            place,
            text: text.into(),
        }
    }
}

/// The payload of one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// A single operator character, e.g. `:` or `[`.
    Operator(char),
    /// A possibly parametrized name.
    Name(PlaceName),
    /// A `{ ... }` block.
    Command(Command),
}

/// One token of Stu syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Where the token starts.
    pub place: Place,
}

impl Token {
    pub fn operator(op: char, place: Place) -> Self {
        Token {
            kind: TokenKind::Operator(op),
            place,
        }
    }

    pub fn name(name: PlaceName) -> Self {
        let place = name.place.clone();
        Token {
            kind: TokenKind::Name(name),
            place,
        }
    }

    pub fn command(command: Command) -> Self {
        let place = command.place.clone();
        Token {
            kind: TokenKind::Command(command),
            place,
        }
    }

    /// Describe the start of the token for a message, e.g.
    /// `expected a filename, not '('`.
    pub fn format_start_word(&self) -> String {
        match &self.kind {
            TokenKind::Operator(op) => char_format_word(*op),
            TokenKind::Name(name) => name_format_word(&name.name.raw()),
            TokenKind::Command(_) => char_format_word('{'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_words() {
        let place = Place::in_source("main.stu", 1, 1);
        assert_eq!("'('", Token::operator('(', place.clone()).format_start_word());
        assert_eq!(
            "'A'",
            Token::name(PlaceName::literal("A", place.clone())).format_start_word()
        );
        assert_eq!(
            "'{'",
            Token::command(Command::new("echo", place)).format_start_word()
        );
    }
}
