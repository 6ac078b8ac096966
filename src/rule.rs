//! Rules: the binding of target patterns to the way they are built.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use bstr::BString;
use smol_str::SmolStr;

use crate::dep::Dependency;
use crate::error::Result;
use crate::name::PlaceName;
use crate::place::Place;
use crate::target::PlaceParamTarget;
use crate::token::Command;

/// How a rule produces its targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleBody {
    /// A shell command block.
    Command(Command),

    /// Literal content assigned with `= { ... }`, inserted into the
    /// output file as is. Only valid for a single file target without
    /// output redirection.
    Hardcoded(BString),

    /// A copy rule, `target = source;`. `exclam` is the place of a `!`
    /// modifier requesting the copy be made regardless of timestamps.
    Copy {
        source: PlaceName,
        exclam: Option<Place>,
    },

    /// `;`: the rule has no command and only declares dependencies.
    Declaration,
}

/// A rule binds one or more target patterns, sharing one parameter
/// set, to dependencies and a body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    /// The targets. Never empty.
    pub targets: Vec<PlaceParamTarget>,
    pub deps: Vec<Dependency>,
    pub body: RuleBody,
    /// Index into `targets` of the file receiving the command's
    /// standard output, if `>` was used.
    pub output_redirect: Option<usize>,
    /// Filename pattern connected to the command's standard input, if
    /// `<` was used.
    pub input: Option<PlaceName>,
}

impl Rule {
    pub fn new(
        targets: Vec<PlaceParamTarget>,
        deps: Vec<Dependency>,
        body: RuleBody,
        output_redirect: Option<usize>,
        input: Option<PlaceName>,
    ) -> Self {
        assert!(!targets.is_empty());
        match &body {
            RuleBody::Hardcoded(_) => {
                debug_assert_eq!(1, targets.len());
                debug_assert!(targets[0].kind.is_file());
                debug_assert!(output_redirect.is_none());
                debug_assert!(input.is_none());
            }
            RuleBody::Copy { .. } => {
                debug_assert_eq!(1, targets.len());
                debug_assert!(targets[0].kind.is_file());
                debug_assert!(output_redirect.is_none());
                debug_assert!(input.is_none());
            }
            RuleBody::Declaration => {
                debug_assert!(output_redirect.is_none());
                debug_assert!(input.is_none());
            }
            RuleBody::Command(_) => {}
        }
        if let Some(i) = output_redirect {
            debug_assert!(targets[i].kind.is_file());
        }
        Rule {
            targets,
            deps,
            body,
            output_redirect,
            input,
        }
    }

    /// Where the rule is declared: the place of its first target.
    pub fn place(&self) -> &Place {
        &self.targets[0].place
    }

    /// The parameter set shared by all targets.
    pub fn parameters(&self) -> BTreeSet<SmolStr> {
        self.targets[0]
            .name
            .name
            .parameters()
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_parametrized(&self) -> bool {
        !self.targets[0].name.name.is_unparametrized()
    }

    /// Substitute the rule's parameters, producing the concrete rule
    /// the executor runs. The command text itself is not substituted;
    /// parameters reach the command as environment variables.
    pub fn instantiate(&self, mapping: &BTreeMap<SmolStr, String>) -> Result<Rule> {
        let targets = self
            .targets
            .iter()
            .map(|t| t.instantiate(mapping))
            .collect();
        let mut deps = Vec::with_capacity(self.deps.len());
        for dep in &self.deps {
            deps.push(dep.instantiate(mapping)?);
        }
        let body = match &self.body {
            RuleBody::Copy { source, exclam } => RuleBody::Copy {
                source: source.instantiate(mapping),
                exclam: exclam.clone(),
            },
            other => other.clone(),
        };
        let input = self.input.as_ref().map(|name| name.instantiate(mapping));
        Ok(Rule {
            targets,
            deps,
            body,
            output_redirect: self.output_redirect,
            input,
        })
    }

    /// Plain rendering for verbose output.
    pub fn format_out(&self) -> String {
        let targets: Vec<String> = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if self.output_redirect == Some(i) {
                    format!(">{}", t.format_out())
                } else {
                    t.format_out()
                }
            })
            .collect();
        let mut ret = targets.join(" ");
        if !self.deps.is_empty() {
            ret.push_str(": ");
            let deps: Vec<String> = self.deps.iter().map(Dependency::format_out).collect();
            ret.push_str(&deps.join(" "));
        }
        match &self.body {
            RuleBody::Command(_) => ret.push_str(" { ... }"),
            RuleBody::Hardcoded(_) => ret.push_str(" = { ... }"),
            RuleBody::Copy { source, .. } => {
                ret.push_str(" = ");
                ret.push_str(&source.format_out());
                ret.push(';');
            }
            RuleBody::Declaration => ret.push(';'),
        }
        ret
    }
}
