//! Source positions attached to targets, dependencies and diagnostics.
//!
//! Everything the parser produces carries the place of its declaration
//! so that errors can point back into the Stu source, even when they
//! are only detected much later, e.g. during instantiation.

use std::fmt;

/// Where something was declared.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Place {
    /// No place. Used for placed flags that are not set and for nodes
    /// that do not carry a position of their own.
    #[default]
    Empty,

    /// A position in a Stu source file. Line and column are 1-based;
    /// the column is counted in characters.
    InSource {
        file: String,
        line: usize,
        column: usize,
    },

    /// A target named on the command line.
    Argv,
}

/// The empty place, for handing out references where a node has no
/// place of its own.
pub static PLACE_EMPTY: Place = Place::Empty;

impl Place {
    pub fn in_source(file: impl Into<String>, line: usize, column: usize) -> Self {
        Place::InSource {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Place::Empty)
    }

    /// Write one place-annotated diagnostic line to standard error.
    pub fn print(&self, message: &str) {
        if self.is_empty() {
            eprintln!("{}", message);
        } else {
            eprintln!("{}: {}", self, message);
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Empty => Ok(()),
            Place::InSource { file, line, column } => {
                write!(f, "{}:{}:{}", file, line, column)
            }
            Place::Argv => write!(f, "<command line>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_in_source() {
        let place = Place::in_source("main.stu", 3, 14);
        assert_eq!("main.stu:3:14", place.to_string());
    }

    #[test]
    fn display_argv() {
        assert_eq!("<command line>", Place::Argv.to_string());
    }

    #[test]
    fn empty_is_default() {
        assert!(Place::default().is_empty());
        assert_eq!("", Place::Empty.to_string());
    }
}
