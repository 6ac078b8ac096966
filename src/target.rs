//! Target kinds and the target types at the different levels of
//! concreteness: plain, parametrized, and parametrized with places.

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::name::{ParamName, PlaceName};
use crate::place::Place;
use crate::text::Style;

/// Whether a target is backed by a file or is a transient node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaseKind {
    Transient,
    File,
}

/// The kind of a target, together with its dynamic nesting depth.
///
/// Collapsing `[[X]]` into a single target yields the FILE kind at
/// depth 2. Targets written in rules always have depth zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetKind {
    base: BaseKind,
    depth: u32,
}

impl TargetKind {
    pub const FILE: TargetKind = TargetKind {
        base: BaseKind::File,
        depth: 0,
    };
    pub const TRANSIENT: TargetKind = TargetKind {
        base: BaseKind::Transient,
        depth: 0,
    };

    pub fn base(self) -> BaseKind {
        self.base
    }

    pub fn depth(self) -> u32 {
        self.depth
    }

    pub fn is_dynamic(self) -> bool {
        self.depth > 0
    }

    pub fn is_file(self) -> bool {
        self.base == BaseKind::File
    }

    pub fn is_transient(self) -> bool {
        self.base == BaseKind::Transient
    }

    /// The same kind, one dynamic level deeper.
    pub fn dynamic(self) -> TargetKind {
        TargetKind {
            base: self.base,
            depth: self.depth + 1,
        }
    }
}

/// An unparametrized target, as used in messages and by the executor's
/// rule index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub kind: TargetKind,
    pub name: String,
}

impl Target {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Target {
            kind,
            name: name.into(),
        }
    }

    pub fn format_word(&self) -> String {
        format!("'{}'", self)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.kind.depth() {
            write!(f, "[")?;
        }
        if self.kind.is_transient() {
            write!(f, "@")?;
        }
        write!(f, "{}", self.name)?;
        for _ in 0..self.kind.depth() {
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A possibly parametrized target, without places.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamTarget {
    pub kind: TargetKind,
    pub name: ParamName,
}

impl ParamTarget {
    pub fn new(kind: TargetKind, name: ParamName) -> Self {
        ParamTarget { kind, name }
    }

    /// The same target, one dynamic level deeper.
    pub fn dynamic(self) -> ParamTarget {
        ParamTarget {
            kind: self.kind.dynamic(),
            name: self.name,
        }
    }

    /// Collapse into an unparametrized [Target].
    pub fn unparametrized(&self) -> Target {
        Target::new(self.kind, self.name.unparametrized())
    }
}

/// A parametrized target together with the place it was declared at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceParamTarget {
    pub kind: TargetKind,
    pub name: PlaceName,
    /// The place of the target; for transient targets this is the `@`.
    pub place: Place,
}

impl PlaceParamTarget {
    pub fn new(kind: TargetKind, name: PlaceName, place: Place) -> Self {
        PlaceParamTarget { kind, name, place }
    }

    pub fn instantiate(&self, mapping: &BTreeMap<SmolStr, String>) -> PlaceParamTarget {
        PlaceParamTarget {
            kind: self.kind,
            name: self.name.instantiate(mapping),
            place: self.place.clone(),
        }
    }

    pub fn param_target(&self) -> ParamTarget {
        ParamTarget::new(self.kind, self.name.name.clone())
    }

    /// Collapse into an unparametrized [Target].
    pub fn unparametrized(&self) -> Target {
        Target::new(self.kind, self.name.name.unparametrized())
    }

    /// Render for a diagnostic; `quotes` is set when the caller needs
    /// to add quotes around the result.
    pub fn format(&self, style: Style, quotes: &mut bool) -> String {
        let name = self.name.format(style, quotes);
        if self.kind.is_transient() {
            format!("@{}", name)
        } else {
            name
        }
    }

    pub fn format_word(&self) -> String {
        let mut quotes = true;
        let text = self.format(0, &mut quotes);
        format!("'{}'", text)
    }

    pub fn format_out(&self) -> String {
        let mut quotes = false;
        self.format(0, &mut quotes)
    }
}
