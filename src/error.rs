//! Error types shared by the dependency algebra and the parser.
//!
//! There are two kinds of errors. Logical errors describe wrong user
//! input: bad grammar, invalid flag combinations, duplicate parameters
//! and the like. Fatal errors are resource limits, at the moment only
//! the dynamic-nesting depth. Internal invariant violations are
//! programmer errors and abort via assertions instead.

use crate::place::Place;

/// Exit status of the whole tool after a logical error.
pub const ERROR_LOGICAL: i32 = 1;
/// Exit status of the whole tool after a fatal error.
pub const ERROR_FATAL: i32 = 4;

pub type Result<T> = std::result::Result<T, Error>;

/// How severe an error is. Determines the exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// The user input is wrong.
    Logical,
    /// A resource limit was hit; unconditionally propagated to the top
    /// level.
    Fatal,
}

impl Severity {
    pub fn exit_status(self) -> i32 {
        match self {
            Severity::Logical => ERROR_LOGICAL,
            Severity::Fatal => ERROR_FATAL,
        }
    }
}

/// One place-annotated line of a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub place: Place,
    pub text: String,
}

/// An error with a chain of place-annotated messages. The first
/// annotation is the primary message, the following ones add context,
/// e.g. where a shadowed redirection was first declared.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.annotations))]
pub struct Error {
    severity: Severity,
    annotations: Vec<Annotation>,
}

/// The multi-line rendering of a diagnostic chain.
fn render(annotations: &[Annotation]) -> String {
    let mut lines = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        if annotation.place.is_empty() {
            lines.push(annotation.text.clone());
        } else {
            lines.push(format!("{}: {}", annotation.place, annotation.text));
        }
    }
    lines.join("\n")
}

impl Error {
    /// A logical error with its primary place and message.
    pub fn logical(place: Place, text: impl Into<String>) -> Self {
        Error {
            severity: Severity::Logical,
            annotations: vec![Annotation {
                place,
                text: text.into(),
            }],
        }
    }

    /// A fatal error. Fatal errors do not point into the source.
    pub fn fatal(text: impl Into<String>) -> Self {
        Error {
            severity: Severity::Fatal,
            annotations: vec![Annotation {
                place: Place::Empty,
                text: text.into(),
            }],
        }
    }

    /// Append a context line to the diagnostic chain.
    pub fn note(mut self, place: Place, text: impl Into<String>) -> Self {
        self.annotations.push(Annotation {
            place,
            text: text.into(),
        });
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn exit_status(&self) -> i32 {
        self.severity.exit_status()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// The primary message, without its place.
    pub fn message(&self) -> &str {
        &self.annotations[0].text
    }

    /// Print all annotation lines to standard error.
    pub fn emit(&self) {
        for annotation in &self.annotations {
            annotation.place.print(&annotation.text);
        }
    }
}
