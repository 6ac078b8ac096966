//! The dependency tree: a recursive value representing everything that
//! can stand on the right-hand side of a rule.
//!
//! A dependency is direct (a single target), dynamic (`[X]`), compound
//! (a parenthesized group) or concatenated (`a*b`). Compound and
//! concatenated nodes make a dependency complex; everything else is
//! simple. All variants carry their immediate flags and, for the
//! placed flags, the place of the modifier that set them. Inner nodes
//! may carry further flags of their own.

use std::collections::BTreeMap;

use smol_str::SmolStr;

use crate::error::{Error, Result};
use crate::flags::{
    flags_format, Flags, C_PLACED, F_RESULT_ONLY, F_VARIABLE,
};
use crate::place::{Place, PLACE_EMPTY};
use crate::target::{ParamTarget, PlaceParamTarget};
use crate::text::{char_format_word, dynamic_variable_format_word, Style, S_MARKERS};

/// Immediate flags of a dependency edge, together with the place of
/// each placed flag. The place of a flag that is not set is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub flags: Flags,
    pub places: [Place; C_PLACED],
}

impl FlagSet {
    pub fn new(flags: Flags) -> Self {
        FlagSet {
            flags,
            places: Default::default(),
        }
    }

    /// Whether all the given flag bits are set.
    pub fn has(&self, flags: Flags) -> bool {
        self.flags & flags == flags
    }

    pub fn add(&mut self, flags: Flags) {
        self.flags |= flags;
    }

    pub fn place(&self, i: usize) -> &Place {
        assert!(i < C_PLACED);
        &self.places[i]
    }

    pub fn set_place(&mut self, i: usize, place: Place) {
        assert!(i < C_PLACED);
        self.places[i] = place;
    }

    /// OR in another edge's flags. For each placed flag set in `other`,
    /// its place is copied over unless a place is already present here,
    /// or `overwrite_places` is given.
    pub fn add_from(&mut self, other: &FlagSet, overwrite_places: bool) {
        for i in 0..C_PLACED {
            if other.flags & (1 << i) != 0 && (overwrite_places || self.places[i].is_empty()) {
                self.places[i] = other.places[i].clone();
            }
        }
        self.flags |= other.flags;
    }
}

/// A dependency on a single parametrized target. Dynamic dependencies
/// are represented by [DynamicDependency] instead, so the target kind
/// here is never dynamic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectDependency {
    pub flags: FlagSet,
    pub target: PlaceParamTarget,
    /// The place where the dependency is declared. Usually the place
    /// of the target.
    pub place: Place,
    /// With the variable flag, the explicit variable name from
    /// `$[name = VAR]`. The variable defaults to the filename itself.
    pub variable_name: Option<SmolStr>,
}

impl DirectDependency {
    pub fn new(flags: Flags, target: PlaceParamTarget) -> Self {
        let place = target.place.clone();
        Self::with_place(flags, target, place)
    }

    /// Use an explicit dependency place instead of the target's.
    pub fn with_place(flags: Flags, target: PlaceParamTarget, place: Place) -> Self {
        let dep = DirectDependency {
            flags: FlagSet::new(flags),
            target,
            place,
            variable_name: None,
        };
        dep.check();
        dep
    }

    /// A variable dependency, with an optional explicit variable name.
    pub fn variable(flags: Flags, target: PlaceParamTarget, variable_name: Option<SmolStr>) -> Self {
        let place = target.place.clone();
        let dep = DirectDependency {
            flags: FlagSet::new(flags | F_VARIABLE),
            target,
            place,
            variable_name,
        };
        dep.check();
        dep
    }

    fn check(&self) {
        assert!(!self.target.kind.is_dynamic());
        if self.variable_name.is_some() {
            assert!(self.flags.has(F_VARIABLE));
        }
        if self.flags.has(F_VARIABLE) {
            assert!(self.target.kind.is_file());
        }
    }
}

/// A dynamic dependency: build the child, then read its result as
/// further dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicDependency {
    pub flags: FlagSet,
    pub child: Box<Dependency>,
}

impl DynamicDependency {
    pub fn new(flags: Flags, child: Dependency) -> Self {
        Self::with_flag_set(FlagSet::new(flags), child)
    }

    pub fn with_flag_set(flags: FlagSet, child: Dependency) -> Self {
        assert!(!flags.has(F_RESULT_ONLY));
        assert!(!flags.has(F_VARIABLE));
        DynamicDependency {
            flags,
            child: Box::new(child),
        }
    }
}

/// An ordered group of dependencies that acts as a unit, corresponding
/// to a parenthesized list in the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompoundDependency {
    pub flags: FlagSet,
    /// The place of the group, usually the opening parenthesis.
    pub place: Place,
    pub children: Vec<Dependency>,
}

impl CompoundDependency {
    pub fn new(place: Place) -> Self {
        CompoundDependency {
            flags: FlagSet::default(),
            place,
            children: Vec::new(),
        }
    }

    pub fn with_children(children: Vec<Dependency>, place: Place) -> Self {
        CompoundDependency {
            flags: FlagSet::default(),
            place,
            children,
        }
    }

    pub fn push(&mut self, dep: Dependency) {
        self.children.push(dep);
    }
}

/// The concatenation `a*b*c` of dependencies. Has no place of its own;
/// the place of the first child is used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConcatenatedDependency {
    pub flags: FlagSet,
    pub children: Vec<Dependency>,
}

impl ConcatenatedDependency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dep: Dependency) {
        self.children.push(dep);
    }
}

/// A dependency, simple or complex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dependency {
    Direct(DirectDependency),
    Dynamic(DynamicDependency),
    Compound(CompoundDependency),
    Concatenated(ConcatenatedDependency),
}

impl Dependency {
    /// The immediate flags of this node.
    pub fn flag_set(&self) -> &FlagSet {
        match self {
            Dependency::Direct(d) => &d.flags,
            Dependency::Dynamic(d) => &d.flags,
            Dependency::Compound(d) => &d.flags,
            Dependency::Concatenated(d) => &d.flags,
        }
    }

    pub fn flag_set_mut(&mut self) -> &mut FlagSet {
        match self {
            Dependency::Direct(d) => &mut d.flags,
            Dependency::Dynamic(d) => &mut d.flags,
            Dependency::Compound(d) => &mut d.flags,
            Dependency::Concatenated(d) => &mut d.flags,
        }
    }

    pub fn flags(&self) -> Flags {
        self.flag_set().flags
    }

    /// Whether the node has all the given flags.
    pub fn has_flags(&self, flags: Flags) -> bool {
        self.flag_set().has(flags)
    }

    /// Set the given flag bits on this node.
    pub fn add_flags(&mut self, flags: Flags) {
        self.flag_set_mut().add(flags);
    }

    /// OR in another edge's flags and placed-flag places, see
    /// [FlagSet::add_from].
    pub fn add_flags_from(&mut self, other: &FlagSet, overwrite_places: bool) {
        self.flag_set_mut().add_from(other, overwrite_places);
    }

    /// Where the dependency as a whole is declared.
    pub fn place(&self) -> &Place {
        match self {
            Dependency::Direct(d) => &d.place,
            Dependency::Dynamic(d) => d.child.place(),
            Dependency::Compound(d) => &d.place,
            Dependency::Concatenated(d) => {
                d.children.first().map(Dependency::place).unwrap_or(&PLACE_EMPTY)
            }
        }
    }

    /// The place of a single placed flag.
    pub fn place_flag(&self, i: usize) -> &Place {
        self.flag_set().place(i)
    }

    pub fn set_place_flag(&mut self, i: usize, place: Place) {
        self.flag_set_mut().set_place(i, place);
    }

    /// Substitute free parameters with the given values, returning a
    /// fresh tree. A variable dependency whose substituted name gains
    /// a `=` is a logical error, as the name could no longer be told
    /// apart from an assignment when passed to the shell.
    pub fn instantiate(&self, mapping: &BTreeMap<SmolStr, String>) -> Result<Dependency> {
        match self {
            Dependency::Direct(d) => {
                let target = d.target.instantiate(mapping);
                if d.flags.has(F_VARIABLE)
                    && target.name.name.texts().iter().any(|t| t.contains('='))
                {
                    return Err(Error::logical(
                        d.place.clone(),
                        format!(
                            "dynamic variable {} must not be instantiated with parameter value that contains {}",
                            dynamic_variable_format_word(&target.name.name.raw()),
                            char_format_word('=')
                        ),
                    ));
                }
                Ok(Dependency::Direct(DirectDependency {
                    flags: d.flags.clone(),
                    target,
                    place: d.place.clone(),
                    variable_name: d.variable_name.clone(),
                }))
            }
            Dependency::Dynamic(d) => Ok(Dependency::Dynamic(DynamicDependency {
                flags: d.flags.clone(),
                child: Box::new(d.child.instantiate(mapping)?),
            })),
            Dependency::Compound(d) => {
                let mut children = Vec::with_capacity(d.children.len());
                for child in &d.children {
                    children.push(child.instantiate(mapping)?);
                }
                Ok(Dependency::Compound(CompoundDependency {
                    flags: d.flags.clone(),
                    place: d.place.clone(),
                    children,
                }))
            }
            Dependency::Concatenated(d) => {
                let mut children = Vec::with_capacity(d.children.len());
                for child in &d.children {
                    children.push(child.instantiate(mapping)?);
                }
                Ok(Dependency::Concatenated(ConcatenatedDependency {
                    flags: d.flags.clone(),
                    children,
                }))
            }
        }
    }

    /// Whether no target below this node has parameters.
    pub fn is_unparametrized(&self) -> bool {
        match self {
            Dependency::Direct(d) => d.target.name.name.is_unparametrized(),
            Dependency::Dynamic(d) => d.child.is_unparametrized(),
            Dependency::Compound(d) => d.children.iter().all(Dependency::is_unparametrized),
            Dependency::Concatenated(d) => d.children.iter().all(Dependency::is_unparametrized),
        }
    }

    /// A simple dependency is neither compound nor concatenated.
    pub fn is_simple(&self) -> bool {
        matches!(self, Dependency::Direct(_) | Dependency::Dynamic(_))
    }

    pub fn is_simple_recursively(&self) -> bool {
        match self {
            Dependency::Direct(_) => true,
            Dependency::Dynamic(d) => d.child.is_simple_recursively(),
            Dependency::Compound(_) | Dependency::Concatenated(_) => false,
        }
    }

    /// Collapse the dependency into a single target, ignoring all
    /// flags. Each dynamic level increments the target kind's depth.
    /// Only defined for simple dependencies.
    pub fn single_target(&self) -> ParamTarget {
        match self {
            Dependency::Direct(d) => d.target.param_target(),
            Dependency::Dynamic(d) => d.child.single_target().dynamic(),
            Dependency::Compound(_) | Dependency::Concatenated(_) => {
                panic!("single_target on a complex dependency")
            }
        }
    }

    /// Render for a diagnostic. The returned text carries its own
    /// inner quoting; `quotes` is set when the caller still needs to
    /// quote the result as a whole.
    pub fn format(&self, style: Style, quotes: &mut bool) -> String {
        match self {
            Dependency::Direct(d) => {
                let f = flags_format(d.flags.flags & !F_VARIABLE);
                let style = if f.is_empty() { style } else { style | S_MARKERS };
                let mut inner_quotes = false;
                let t = d.target.format(style, &mut inner_quotes);
                let t = if inner_quotes { format!("'{}'", t) } else { t };
                *quotes = false;
                let variable = d.flags.has(F_VARIABLE);
                format!(
                    "{}{}{}{}",
                    f,
                    if variable { "$[" } else { "" },
                    t,
                    if variable { "]" } else { "" }
                )
            }
            Dependency::Dynamic(d) => {
                // Brackets delimit the child already; any outer
                // quoting is discarded.
                *quotes = false;
                let mut inner_quotes = false;
                let s = d.child.format(S_MARKERS, &mut inner_quotes);
                let s = if inner_quotes { format!("'{}'", s) } else { s };
                format!("[{}]", s)
            }
            Dependency::Compound(d) => {
                // The inbound quotes flag is left alone; parentheses
                // suppress outer quoting.
                let mut inner_quotes = false;
                let parts: Vec<String> = d
                    .children
                    .iter()
                    .map(|c| c.format(style, &mut inner_quotes))
                    .collect();
                format!("({})", parts.join(", "))
            }
            Dependency::Concatenated(d) => {
                let parts: Vec<String> = d
                    .children
                    .iter()
                    .map(|c| c.format(style, quotes))
                    .collect();
                parts.join("*")
            }
        }
    }

    /// Render as one highlighted word for a message.
    pub fn format_word(&self) -> String {
        match self {
            Dependency::Direct(d) => {
                let f = flags_format(d.flags.flags & !F_VARIABLE);
                let style = if f.is_empty() { 0 } else { S_MARKERS };
                let mut quotes = true;
                let t = d.target.format(style, &mut quotes);
                let variable = d.flags.has(F_VARIABLE);
                format!(
                    "{}{}'{}'{}",
                    f,
                    if variable { "$[" } else { "" },
                    t,
                    if variable { "]" } else { "" }
                )
            }
            Dependency::Dynamic(d) => {
                let mut quotes = false;
                let s = d.child.format(S_MARKERS, &mut quotes);
                let s = if quotes { format!("'{}'", s) } else { s };
                format!("[{}]", s)
            }
            Dependency::Compound(d) => {
                let parts: Vec<String> =
                    d.children.iter().map(Dependency::format_word).collect();
                format!("({})", parts.join(", "))
            }
            Dependency::Concatenated(d) => {
                let parts: Vec<String> =
                    d.children.iter().map(Dependency::format_word).collect();
                parts.join("*")
            }
        }
    }

    /// Render as plain text, without quoting or highlighting.
    pub fn format_out(&self) -> String {
        match self {
            Dependency::Direct(d) => {
                let variable = d.flags.has(F_VARIABLE);
                format!(
                    "{}{}{}{}",
                    flags_format(d.flags.flags & !F_VARIABLE),
                    if variable { "$[" } else { "" },
                    d.target.format_out(),
                    if variable { "]" } else { "" }
                )
            }
            Dependency::Dynamic(d) => {
                format!("{}[{}]", flags_format(d.flags.flags), d.child.format_out())
            }
            Dependency::Compound(d) => {
                let parts: Vec<String> =
                    d.children.iter().map(Dependency::format_out).collect();
                format!("({})", parts.join(", "))
            }
            Dependency::Concatenated(d) => {
                let parts: Vec<String> =
                    d.children.iter().map(Dependency::format_out).collect();
                parts.join("*")
            }
        }
    }

    /// Split this dependency into simple, possibly dynamic-wrapped
    /// dependencies, appending them to `out`.
    ///
    /// A compound node merges its own flags into each child (keeping
    /// existing placed-flag places) and dissolves. A dynamic node
    /// splits its child and wraps each result in a fresh dynamic node
    /// with the original flags and places. Concatenations cannot be
    /// split yet and produce an error.
    pub fn split_compound(self, out: &mut Vec<Dependency>) -> Result<()> {
        match self {
            Dependency::Direct(_) => {
                out.push(self);
                Ok(())
            }
            Dependency::Dynamic(d) => {
                let mut children = Vec::new();
                d.child.split_compound(&mut children)?;
                for child in children {
                    out.push(Dependency::Dynamic(DynamicDependency::with_flag_set(
                        d.flags.clone(),
                        child,
                    )));
                }
                Ok(())
            }
            Dependency::Compound(d) => {
                for mut child in d.children {
                    child.add_flags_from(&d.flags, false);
                    child.split_compound(out)?;
                }
                Ok(())
            }
            Dependency::Concatenated(_) => Err(Error::fatal(
                "concatenation of dependencies is not yet implemented",
            )),
        }
    }
}
