//! Parametrized names: the interleaving of literal text and
//! `$parameter` placeholders that makes up target and dependency
//! names.

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::place::Place;
use crate::text::{needs_quotes, Style};

/// A name that may contain `$parameter` placeholders.
///
/// Stored as alternating literal texts and parameter names; there is
/// always exactly one more text than parameters, and the texts at the
/// edges may be empty. `a.$X.$Y` is stored as
/// `texts = ["a.", ".", ""]`, `parameters = ["X", "Y"]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamName {
    texts: Vec<String>,
    parameters: Vec<SmolStr>,
}

impl Default for ParamName {
    fn default() -> Self {
        ParamName {
            texts: vec![String::new()],
            parameters: Vec::new(),
        }
    }
}

impl ParamName {
    /// A name consisting of a single literal text.
    pub fn literal(text: impl Into<String>) -> Self {
        ParamName {
            texts: vec![text.into()],
            parameters: Vec::new(),
        }
    }

    /// Build a name from its interleaved parts. There must be exactly
    /// one more text than parameters.
    pub fn new(texts: Vec<String>, parameters: Vec<SmolStr>) -> Self {
        assert_eq!(texts.len(), parameters.len() + 1);
        ParamName { texts, parameters }
    }

    /// The number of parameters.
    pub fn n(&self) -> usize {
        self.parameters.len()
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn parameters(&self) -> &[SmolStr] {
        &self.parameters
    }

    pub fn is_unparametrized(&self) -> bool {
        self.parameters.is_empty()
    }

    /// The single text of a name without parameters.
    pub fn unparametrized(&self) -> &str {
        assert!(self.is_unparametrized());
        &self.texts[0]
    }

    pub fn last_text(&self) -> &str {
        self.texts.last().unwrap()
    }

    /// The name as it appears in source, with `$parameter`
    /// placeholders.
    pub fn raw(&self) -> String {
        let mut ret = self.texts[0].clone();
        for (i, parameter) in self.parameters.iter().enumerate() {
            ret.push('$');
            ret.push_str(parameter);
            ret.push_str(&self.texts[i + 1]);
        }
        ret
    }

    /// Substitute parameters with the values given in `mapping`.
    /// Parameters without an entry remain in place, so instantiation
    /// with partial mappings composes.
    pub fn instantiate(&self, mapping: &BTreeMap<SmolStr, String>) -> ParamName {
        let mut texts = vec![self.texts[0].clone()];
        let mut parameters = Vec::new();
        for (i, parameter) in self.parameters.iter().enumerate() {
            match mapping.get(parameter) {
                Some(value) => {
                    let last = texts.last_mut().unwrap();
                    last.push_str(value);
                    last.push_str(&self.texts[i + 1]);
                }
                None => {
                    parameters.push(parameter.clone());
                    texts.push(self.texts[i + 1].clone());
                }
            }
        }
        ParamName { texts, parameters }
    }

    /// Two adjacent parameters with no literal character between them,
    /// if the name has any. Such a name cannot be matched
    /// unambiguously.
    pub fn unseparated_parameters(&self) -> Option<(&SmolStr, &SmolStr)> {
        for i in 1..self.texts.len() - 1 {
            if self.texts[i].is_empty() {
                return Some((&self.parameters[i - 1], &self.parameters[i]));
            }
        }
        None
    }

    /// A parameter that appears twice, if the name has one.
    pub fn duplicate_parameter(&self) -> Option<&SmolStr> {
        for (i, parameter) in self.parameters.iter().enumerate() {
            if self.parameters[i + 1..].contains(parameter) {
                return Some(parameter);
            }
        }
        None
    }

    /// Append literal text to the end of the name.
    pub fn append_text(&mut self, text: &str) {
        self.texts.last_mut().unwrap().push_str(text);
    }

    /// Append a parameter to the end of the name.
    pub fn append_parameter(&mut self, parameter: SmolStr) {
        self.parameters.push(parameter);
        self.texts.push(String::new());
    }

    /// Append a whole name.
    pub fn append(&mut self, other: &ParamName) {
        self.texts.last_mut().unwrap().push_str(&other.texts[0]);
        for (i, parameter) in other.parameters.iter().enumerate() {
            self.parameters.push(parameter.clone());
            self.texts.push(other.texts[i + 1].clone());
        }
    }

    /// Render the name for a diagnostic. Sets `quotes` when the
    /// rendering needs surrounding quotes to be unambiguous; the caller
    /// adds them.
    pub fn format(&self, _style: Style, quotes: &mut bool) -> String {
        let mut ret = String::new();
        ret.push_str(&self.texts[0]);
        for (i, parameter) in self.parameters.iter().enumerate() {
            ret.push_str("${");
            ret.push_str(parameter);
            ret.push('}');
            ret.push_str(&self.texts[i + 1]);
        }
        *quotes |= self.texts.iter().any(|t| needs_quotes(t)) || ret.is_empty();
        ret
    }

    /// Render the name as one quoted word.
    pub fn format_word(&self) -> String {
        let mut quotes = true;
        let text = self.format(0, &mut quotes);
        format!("'{}'", text)
    }

    /// Render the name as plain text without quoting.
    pub fn format_out(&self) -> String {
        let mut quotes = false;
        self.format(0, &mut quotes)
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_out())
    }
}

/// A [ParamName] together with the place it was written at, and one
/// place per parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceName {
    pub name: ParamName,
    /// The place of the name as a whole.
    pub place: Place,
    /// The places of the individual parameters.
    pub places: Vec<Place>,
}

impl PlaceName {
    /// A name consisting of a single literal text.
    pub fn literal(text: impl Into<String>, place: Place) -> Self {
        PlaceName {
            name: ParamName::literal(text),
            place,
            places: Vec::new(),
        }
    }

    pub fn new(name: ParamName, place: Place, places: Vec<Place>) -> Self {
        assert_eq!(name.n(), places.len());
        PlaceName { name, place, places }
    }

    /// Substitute parameters, keeping the place of the name and the
    /// places of the parameters that remain.
    pub fn instantiate(&self, mapping: &BTreeMap<SmolStr, String>) -> PlaceName {
        let places = self
            .name
            .parameters()
            .iter()
            .zip(&self.places)
            .filter(|(parameter, _)| !mapping.contains_key(parameter.as_str()))
            .map(|(_, place)| place.clone())
            .collect();
        PlaceName {
            name: self.name.instantiate(mapping),
            place: self.place.clone(),
            places,
        }
    }

    pub fn format(&self, style: Style, quotes: &mut bool) -> String {
        self.name.format(style, quotes)
    }

    pub fn format_word(&self) -> String {
        self.name.format_word()
    }

    pub fn format_out(&self) -> String {
        self.name.format_out()
    }
}
