//! The recursive descent parser: turns a token stream into rules or
//! dependency expressions.
//!
//! Operator precedence, high to low. Only prefix and circumfix
//! operators exist, so precedence is trivial:
//!
//! * `@name` transient dependency; the argument can only be a name
//! * `<name` input redirection; no `()`, `[]`, `$[]` or `@` inside
//! * `!x` `?x` `&x` timestamp-ignoring, optional, trivial
//! * `[x]` dynamic dependency; no `$[]` inside
//! * `(x)` grouping
//! * `$[x]` variable dependency
//!
//! Incompatible flag combinations such as `!` with `?` are not checked
//! here: they can also arise through dynamic dependencies and are
//! diagnosed where the dependencies are used.

use std::collections::BTreeSet;

use bstr::BString;
use smol_str::SmolStr;
use tracing::{debug, instrument};

use crate::dep::{Dependency, DirectDependency, DynamicDependency};
use crate::error::{Error, Result};
use crate::flags::{
    F_OPTIONAL, F_PERSISTENT, F_TRIVIAL, F_VARIABLE, I_OPTIONAL, I_PERSISTENT, I_TRIVIAL,
};
use crate::name::PlaceName;
use crate::place::Place;
use crate::rule::{Rule, RuleBody};
use crate::target::{PlaceParamTarget, Target, TargetKind};
use crate::text::{char_format_word, name_format_word, prefix_format_word};
use crate::token::{Command, Token, TokenKind};

/// Runtime toggles consulted while parsing.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    /// Treat optional dependencies (`?`) as ordinary ones.
    pub nonoptional: bool,
    /// Treat trivial dependencies (`&`) as ordinary ones.
    pub nontrivial: bool,
}

/// Parse a complete rule list. Trailing tokens that do not start a
/// rule are an error.
#[instrument(skip_all)]
pub fn parse_rule_list(
    tokens: &[Token],
    place_end: &Place,
    options: ParseOptions,
) -> Result<Vec<Rule>> {
    let mut parser = Parser::new(tokens, place_end, options);
    let rules = parser.rule_list()?;
    if let Some(token) = parser.peek() {
        return Err(Error::logical(
            token.place.clone(),
            format!("expected a rule, not {}", token.format_start_word()),
        ));
    }
    debug!(rules = rules.len(), "parsed rule list");
    Ok(rules)
}

/// Parse a standalone dependency list, as read from a dynamic
/// dependency's file. Also returns the input redirection filename if
/// one appeared.
#[instrument(skip_all)]
pub fn parse_dependency_list(
    tokens: &[Token],
    place_end: &Place,
    options: ParseOptions,
) -> Result<(Vec<Dependency>, Option<PlaceName>)> {
    let mut parser = Parser::new(tokens, place_end, options);
    let mut deps = Vec::new();
    let mut input = InputRedirect::default();
    parser.expression_list(&mut deps, &mut input, &[])?;
    if let Some(token) = parser.peek() {
        return Err(Error::logical(
            token.place.clone(),
            format!("expected a dependency, not {}", token.format_start_word()),
        ));
    }
    Ok((deps, input.name))
}

/// Parse a dependency as given on the command line outside of options,
/// e.g. `?[@x]`. Bracket prefixes become dynamic wrappers; `!` and `?`
/// add their flags.
pub fn target_dependency(text: &str) -> Result<Dependency> {
    let place = Place::Argv;
    if text.is_empty() {
        return Err(Error::logical(
            place,
            format!("{}: name must not be empty", name_format_word(text)),
        ));
    }

    let bytes = text.as_bytes();
    let mut end = bytes.len();
    let mut closing: i32 = 0;
    while end > 0 && bytes[end - 1] == b']' {
        closing += 1;
        end -= 1;
    }

    let mut q = 0;
    while q < end && matches!(bytes[q], b'[' | b'!' | b'?') {
        q += 1;
    }

    let mut begin_name = q;
    let mut kind = TargetKind::FILE;
    if begin_name != end && bytes[begin_name] == b'@' {
        kind = TargetKind::TRANSIENT;
        begin_name += 1;
    }

    if begin_name == end {
        return Err(Error::logical(
            place,
            format!("{}: name must not be empty", name_format_word(text)),
        ));
    }

    let name_text = &text[begin_name..end];
    if name_text.contains('[') || name_text.contains(']') {
        return Err(Error::logical(
            place,
            format!(
                "{}: unbalanced brackets {}",
                name_format_word(text),
                name_format_word("[]")
            ),
        ));
    }

    let name = PlaceName::literal(name_text, place.clone());
    let mut ret = Dependency::Direct(DirectDependency::new(
        0,
        PlaceParamTarget::new(kind, name, place.clone()),
    ));

    for i in (0..q).rev() {
        match bytes[i] {
            b'!' => {
                ret.add_flags(F_PERSISTENT);
                ret.set_place_flag(I_PERSISTENT, place.clone());
            }
            b'?' => {
                ret.add_flags(F_OPTIONAL);
                ret.set_place_flag(I_OPTIONAL, place.clone());
            }
            b'[' => {
                ret = Dependency::Dynamic(DynamicDependency::new(0, ret));
                closing -= 1;
            }
            _ => unreachable!(),
        }
    }

    if closing != 0 {
        return Err(Error::logical(
            place,
            format!(
                "{}: unbalanced brackets {}",
                name_format_word(text),
                name_format_word("[]")
            ),
        ));
    }

    Ok(ret)
}

/// The `<` input redirection seen so far while parsing one rule.
#[derive(Default)]
struct InputRedirect {
    /// The input filename, once one has been parsed.
    name: Option<PlaceName>,
    /// The place of the `<` operator.
    place: Place,
}

/// A location within a token list.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// The place just after the last token, for diagnostics at the end
    /// of the input.
    place_end: &'a Place,
    options: ParseOptions,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], place_end: &'a Place, options: ParseOptions) -> Self {
        Parser {
            tokens,
            pos: 0,
            place_end,
            options,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> &'a Token {
        let token = &self.tokens[self.pos];
        self.pos += 1;
        token
    }

    /// Whether the next token is the given operator.
    fn is_operator(&self, op: char) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Operator(c), .. }) if *c == op)
    }

    /// The next token's name payload, without advancing.
    fn peek_name(&self) -> Option<&'a PlaceName> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Name(name),
                ..
            }) => Some(name),
            _ => None,
        }
    }

    /// The returned rules may not have unique targets; that is checked
    /// by the rule index later.
    fn rule_list(&mut self) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        while let Some(rule) = self.rule()? {
            rules.push(rule);
        }
        Ok(rules)
    }

    /// Parse one rule. Returns None, without having consumed tokens,
    /// when no rule starts here.
    fn rule(&mut self) -> Result<Option<Rule>> {
        let pos_begin = self.pos;

        // Place of '>', if output is redirected.
        let mut place_output: Option<Place> = None;
        // Index of the target that has the output.
        let mut redirect_index: Option<usize> = None;

        let mut targets: Vec<PlaceParamTarget> = Vec::new();

        loop {
            let mut place_output_new: Option<Place> = None;
            if self.is_operator('>') {
                place_output_new = Some(self.advance().place.clone());
            }

            let place_target = self.peek().map(|t| t.place.clone()).unwrap_or_default();

            let mut kind = TargetKind::FILE;
            if self.is_operator('@') {
                let place_at = self.advance().place.clone();
                let name = match self.peek() {
                    None => {
                        return Err(Error::logical(
                            self.place_end.clone(),
                            "expected the name of transient target",
                        )
                        .note(place_at, format!("after {}", char_format_word('@'))));
                    }
                    Some(Token {
                        kind: TokenKind::Name(name),
                        ..
                    }) => name,
                    Some(token) => {
                        return Err(Error::logical(
                            token.place.clone(),
                            format!(
                                "expected the name of transient target, not {}",
                                token.format_start_word()
                            ),
                        )
                        .note(place_at, format!("after {}", char_format_word('@'))));
                    }
                };
                if let Some(place_out) = &place_output_new {
                    let target = Target::new(TargetKind::TRANSIENT, name.name.raw());
                    return Err(Error::logical(
                        place_at,
                        format!("transient target {} is invalid", target.format_word()),
                    )
                    .note(
                        place_out.clone(),
                        format!("after output redirection using {}", char_format_word('>')),
                    ));
                }
                kind = TargetKind::TRANSIENT;
            }

            let name = match self.peek_name() {
                Some(name) => {
                    let name = name.clone();
                    self.advance();
                    name
                }
                None => {
                    if let Some(place_out) = place_output_new {
                        let err = match self.peek() {
                            None => Error::logical(self.place_end.clone(), "expected a filename"),
                            Some(token) => Error::logical(
                                token.place.clone(),
                                format!("expected a filename, not {}", token.format_start_word()),
                            ),
                        };
                        return Err(err.note(
                            place_out,
                            format!("after output redirection using {}", char_format_word('>')),
                        ));
                    }
                    break;
                }
            };

            if let Some(place_out) = place_output_new {
                if let Some(place_previous) = &place_output {
                    let previous = &targets[redirect_index.unwrap()];
                    return Err(Error::logical(
                        place_out,
                        format!(
                            "there must not be a second output redirection {}",
                            prefix_format_word(&name.name.raw(), ">")
                        ),
                    )
                    .note(
                        place_previous.clone(),
                        format!(
                            "shadowing previous output redirection {}",
                            prefix_format_word(previous.name.name.unparametrized(), ">")
                        ),
                    ));
                }
                if name.name.n() != 0 {
                    return Err(Error::logical(
                        place_target.clone(),
                        format!(
                            "target {} with output redirection using {} must not be parametrized",
                            name.format_word(),
                            char_format_word('>')
                        ),
                    ));
                }
                place_output = Some(place_out);
                redirect_index = Some(targets.len());
            }

            if let Some((param_1, param_2)) = name.name.unseparated_parameters() {
                return Err(Error::logical(
                    place_target.clone(),
                    format!(
                        "the two parameters {} and {} in the name {} must be separated by at least one character",
                        prefix_format_word(param_1, "$"),
                        prefix_format_word(param_2, "$"),
                        name.format_word()
                    ),
                ));
            }

            if let Some(duplicate) = name.name.duplicate_parameter() {
                return Err(Error::logical(
                    place_target.clone(),
                    format!(
                        "target {} must not contain duplicate parameter {}",
                        name.format_word(),
                        prefix_format_word(duplicate, "$")
                    ),
                ));
            }

            targets.push(PlaceParamTarget::new(kind, name, place_target));
        }

        if targets.is_empty() {
            debug_assert_eq!(pos_begin, self.pos);
            return Ok(None);
        }

        // All targets must carry the same set of parameters.
        let parameters_first: BTreeSet<&SmolStr> =
            targets[0].name.name.parameters().iter().collect();
        for target in &targets[1..] {
            let parameters: BTreeSet<&SmolStr> = target.name.name.parameters().iter().collect();
            if parameters != parameters_first {
                return Err(Error::logical(
                    target.place.clone(),
                    format!("parameters of target {} differ", target.format_word()),
                )
                .note(
                    targets[0].place.clone(),
                    format!(
                        "from parameters of target {} in rule with multiple targets",
                        targets[0].format_word()
                    ),
                ));
            }
        }

        if self.at_end() {
            let last = targets.last().unwrap();
            return Err(Error::logical(
                self.place_end.clone(),
                format!(
                    "expected a command, {}, {}, or {}",
                    char_format_word(':'),
                    char_format_word(';'),
                    char_format_word('=')
                ),
            )
            .note(
                last.place.clone(),
                format!("after target {}", last.format_word()),
            ));
        }

        let mut deps: Vec<Dependency> = Vec::new();
        let mut input = InputRedirect::default();
        let mut had_colon = false;

        if self.is_operator(':') {
            had_colon = true;
            self.advance();
            self.expression_list(&mut deps, &mut input, &targets)?;
        }

        if self.at_end() {
            let err = if had_colon {
                Error::logical(
                    self.place_end.clone(),
                    format!("expected a dependency, a command, or {}", char_format_word(';')),
                )
            } else {
                Error::logical(
                    self.place_end.clone(),
                    format!(
                        "expected a command, {}, {}, or {}",
                        char_format_word(';'),
                        char_format_word(':'),
                        char_format_word('=')
                    ),
                )
            };
            return Err(err.note(
                targets[0].place.clone(),
                format!("for target {}", targets[0].format_word()),
            ));
        }

        // Remains None when the rule has no command.
        let mut command: Option<Command> = None;
        // When command is set, whether it is hardcoded content rather
        // than a command to run.
        let mut is_hardcode = false;
        // Place of ';'.
        let mut place_nocommand = Place::Empty;
        // Place of '='.
        let mut place_equal = Place::Empty;

        match self.peek() {
            Some(Token {
                kind: TokenKind::Command(c),
                ..
            }) => {
                command = Some(c.clone());
                self.advance();
            }

            Some(token) if !had_colon && matches!(token.kind, TokenKind::Operator('=')) => {
                place_equal = self.advance().place.clone();

                match self.peek() {
                    None => {
                        return Err(Error::logical(
                            self.place_end.clone(),
                            format!("expected a filename or {}", char_format_word('{')),
                        )
                        .note(place_equal, format!("after {}", char_format_word('='))));
                    }

                    Some(Token {
                        kind: TokenKind::Command(c),
                        ..
                    }) => {
                        // Hardcoded content.
                        let c = c.clone();
                        self.advance();
                        if targets.len() != 1 {
                            return Err(Error::logical(
                                place_equal,
                                format!(
                                    "there must not be assigned content using {}",
                                    char_format_word('=')
                                ),
                            )
                            .note(
                                targets[0].place.clone(),
                                format!(
                                    "in rule for {}... with multiple targets",
                                    targets[0].format_word()
                                ),
                            ));
                        }
                        if targets[0].kind.is_transient() {
                            return Err(Error::logical(
                                place_equal,
                                format!(
                                    "there must not be assigned content using {}",
                                    char_format_word('=')
                                ),
                            )
                            .note(
                                targets[0].place.clone(),
                                format!("for transient target {}", targets[0].format_word()),
                            ));
                        }
                        // Redirected output is checked below.
                        command = Some(c);
                        is_hardcode = true;
                    }

                    _ => {
                        let mut place_flag_exclam: Option<Place> = None;
                        while self.is_operator('!') {
                            place_flag_exclam = Some(self.advance().place.clone());
                        }

                        if let Some(source) = self.peek_name() {
                            let source = source.clone();
                            self.advance();
                            return self
                                .finish_copy_rule(
                                    targets,
                                    place_equal,
                                    source,
                                    place_flag_exclam,
                                    place_output,
                                )
                                .map(Some);
                        }

                        match self.peek() {
                            Some(token) if matches!(token.kind, TokenKind::Operator('?')) => {
                                return Err(Error::logical(
                                    token.place.clone(),
                                    format!(
                                        "optional dependency using {} must not be used",
                                        char_format_word('?')
                                    ),
                                )
                                .note(
                                    place_equal,
                                    format!(
                                        "in copy rule using {} for target {}",
                                        char_format_word('='),
                                        targets[0].format_word()
                                    ),
                                ));
                            }
                            Some(token) if matches!(token.kind, TokenKind::Operator('&')) => {
                                return Err(Error::logical(
                                    token.place.clone(),
                                    format!(
                                        "trivial dependency using {} must not be used",
                                        char_format_word('&')
                                    ),
                                )
                                .note(
                                    place_equal,
                                    format!(
                                        "in copy rule using {} for target {}",
                                        char_format_word('='),
                                        targets[0].format_word()
                                    ),
                                ));
                            }
                            Some(token) => {
                                return Err(Error::logical(
                                    token.place.clone(),
                                    format!(
                                        "expected a filename or {}, not {}",
                                        char_format_word('{'),
                                        token.format_start_word()
                                    ),
                                )
                                .note(place_equal, format!("after {}", char_format_word('='))));
                            }
                            None => {
                                return Err(Error::logical(
                                    self.place_end.clone(),
                                    format!("expected a filename or {}", char_format_word('{')),
                                )
                                .note(place_equal, format!("after {}", char_format_word('='))));
                            }
                        }
                    }
                }
            }

            Some(token) if matches!(token.kind, TokenKind::Operator(';')) => {
                place_nocommand = self.advance().place.clone();
            }

            Some(token) => {
                let err = if had_colon {
                    Error::logical(
                        token.place.clone(),
                        format!(
                            "expected a dependency, a command, or {}, not {}",
                            char_format_word(';'),
                            token.format_start_word()
                        ),
                    )
                } else {
                    Error::logical(
                        token.place.clone(),
                        format!(
                            "expected a command, {}, {}, or {}, not {}",
                            char_format_word(':'),
                            char_format_word(';'),
                            char_format_word('='),
                            token.format_start_word()
                        ),
                    )
                };
                return Err(err.note(
                    targets[0].place.clone(),
                    format!("for target {}", targets[0].format_word()),
                ));
            }

            None => unreachable!(),
        }

        // Cases where output redirection is not possible.
        if let Some(place_out) = &place_output {
            debug_assert!(targets[redirect_index.unwrap()].kind.is_file());

            if command.is_none() {
                return Err(Error::logical(
                    place_out.clone(),
                    format!(
                        "output redirection using {} must not be used",
                        char_format_word('>')
                    ),
                )
                .note(
                    place_nocommand,
                    format!("in rule for {} without a command", targets[0].format_word()),
                ));
            }
            if is_hardcode {
                return Err(Error::logical(
                    place_out.clone(),
                    format!(
                        "output redirection using {} must not be used",
                        char_format_word('>')
                    ),
                )
                .note(
                    place_equal,
                    format!(
                        "in rule for {} with assigned content using {}",
                        targets[0].format_word(),
                        char_format_word('=')
                    ),
                ));
            }
        }

        // Cases where input redirection is not possible.
        if input.name.is_some() {
            if command.is_none() {
                return Err(Error::logical(
                    input.place.clone(),
                    format!(
                        "input redirection using {} must not be used",
                        char_format_word('<')
                    ),
                )
                .note(
                    place_nocommand,
                    format!("in rule for {} without a command", targets[0].format_word()),
                ));
            }
            debug_assert!(!is_hardcode);
        }

        let body = match command {
            Some(c) if is_hardcode => RuleBody::Hardcoded(BString::from(c.text.into_bytes())),
            Some(c) => RuleBody::Command(c),
            None => RuleBody::Declaration,
        };
        let rule = Rule::new(targets, deps, body, redirect_index, input.name);
        debug!(targets = rule.targets.len(), deps = rule.deps.len(), "parsed rule");
        Ok(Some(rule))
    }

    /// The tail of a copy rule, after `= source` has been read.
    fn finish_copy_rule(
        &mut self,
        targets: Vec<PlaceParamTarget>,
        place_equal: Place,
        mut source: PlaceName,
        place_flag_exclam: Option<Place>,
        place_output: Option<Place>,
    ) -> Result<Rule> {
        // The source may only use parameters that the target also has.
        let parameters: BTreeSet<&SmolStr> = targets[0].name.name.parameters().iter().collect();
        for (j, parameter) in source.name.parameters().iter().enumerate() {
            if !parameters.contains(parameter) {
                return Err(Error::logical(
                    source.places[j].clone(),
                    format!(
                        "parameter {} must not appear in copied file {}",
                        prefix_format_word(parameter, "$"),
                        source.format_word()
                    ),
                )
                .note(
                    targets[0].place.clone(),
                    format!(
                        "because it does not appear in target {}",
                        targets[0].format_word()
                    ),
                ));
            }
        }

        match self.peek() {
            None => {
                return Err(Error::logical(
                    self.place_end.clone(),
                    format!("expected {}", char_format_word(';')),
                )
                .note(
                    source.place.clone(),
                    format!("after copy dependency {}", source.format_word()),
                ));
            }
            Some(token) if !matches!(token.kind, TokenKind::Operator(';')) => {
                return Err(Error::logical(
                    token.place.clone(),
                    format!("expected {}", char_format_word(';')),
                )
                .note(
                    source.place.clone(),
                    format!("after copy dependency {}", source.format_word()),
                ));
            }
            _ => {
                self.advance();
            }
        }

        if let Some(place_out) = place_output {
            return Err(Error::logical(
                place_out,
                format!(
                    "output redirection using {} must not be used",
                    char_format_word('>')
                ),
            )
            .note(
                place_equal,
                format!(
                    "in copy rule using {} for target {}",
                    char_format_word('='),
                    targets[0].format_word()
                ),
            ));
        }

        if targets.len() != 1 {
            return Err(Error::logical(
                place_equal,
                format!("there must not be a copy rule using {}", char_format_word('=')),
            )
            .note(
                targets[0].place.clone(),
                format!("for multiple targets {}...", targets[0].format_word()),
            ));
        }

        if !targets[0].kind.is_file() {
            debug_assert!(targets[0].kind.is_transient());
            return Err(Error::logical(
                place_equal,
                format!("copy rule using {} cannot be used", char_format_word('=')),
            )
            .note(
                targets[0].place.clone(),
                format!("with transient target {}", targets[0].format_word()),
            ));
        }

        // A source ending in a slash copies the target's basename.
        append_copy(&mut source, &targets[0].name);

        Ok(Rule::new(
            targets,
            Vec::new(),
            RuleBody::Copy {
                source,
                exclam: place_flag_exclam,
            },
            None,
            None,
        ))
    }

    /// Parse expressions as long as any are found, appending to `ret`.
    /// Returns whether `ret` is non-empty.
    fn expression_list(
        &mut self,
        ret: &mut Vec<Dependency>,
        input: &mut InputRedirect,
        targets: &[PlaceParamTarget],
    ) -> Result<bool> {
        while !self.at_end() {
            let mut item = Vec::new();
            if !self.expression(&mut item, input, targets)? {
                break;
            }
            ret.append(&mut item);
        }
        Ok(!ret.is_empty())
    }

    /// Parse one expression, which may yield multiple dependencies.
    /// Returns whether anything was read.
    fn expression(
        &mut self,
        ret: &mut Vec<Dependency>,
        input: &mut InputRedirect,
        targets: &[PlaceParamTarget],
    ) -> Result<bool> {
        debug_assert!(ret.is_empty());

        // '(' expression* ')'
        if self.is_operator('(') {
            let place_paren = self.advance().place.clone();
            self.expression_list(ret, input, targets)?;
            match self.peek() {
                Some(token) if matches!(token.kind, TokenKind::Operator(')')) => {
                    self.advance();
                }
                Some(token) => {
                    return Err(Error::logical(
                        token.place.clone(),
                        format!("expected {}", char_format_word(')')),
                    )
                    .note(place_paren, format!("after opening {}", char_format_word('('))));
                }
                None => {
                    return Err(Error::logical(
                        self.place_end.clone(),
                        format!("expected {}", char_format_word(')')),
                    )
                    .note(place_paren, format!("after opening {}", char_format_word('('))));
                }
            }
            return Ok(true);
        }

        // '[' expression* ']'
        if self.is_operator('[') {
            let place_bracket = self.advance().place.clone();
            let mut inner = Vec::new();
            self.expression_list(&mut inner, input, targets)?;
            match self.peek() {
                Some(token) if matches!(token.kind, TokenKind::Operator(']')) => {
                    self.advance();
                }
                Some(token) => {
                    return Err(Error::logical(
                        token.place.clone(),
                        format!("expected {}", char_format_word(']')),
                    )
                    .note(
                        place_bracket,
                        format!("after opening {}", char_format_word('[')),
                    ));
                }
                None => {
                    return Err(Error::logical(
                        self.place_end.clone(),
                        format!("expected {}", char_format_word(']')),
                    )
                    .note(
                        place_bracket,
                        format!("after opening {}", char_format_word('[')),
                    ));
                }
            }
            for child in inner {
                // A variable dependency cannot appear within a dynamic
                // dependency.
                if child.has_flags(F_VARIABLE) {
                    return Err(Error::logical(
                        child.place().clone(),
                        format!("variable dependency {} must not appear", child.format_word()),
                    )
                    .note(
                        place_bracket,
                        format!(
                            "within dynamic dependency started by {}",
                            char_format_word('[')
                        ),
                    ));
                }
                ret.push(Dependency::Dynamic(DynamicDependency::new(0, child)));
            }
            return Ok(true);
        }

        // '!' expression
        if self.is_operator('!') {
            let place_exclam = self.advance().place.clone();
            if !self.expression(ret, input, targets)? {
                return Err(self
                    .expected_dependency()
                    .note(place_exclam, format!("after {}", char_format_word('!'))));
            }
            for dep in ret.iter_mut() {
                dep.add_flags(F_PERSISTENT);
                dep.set_place_flag(I_PERSISTENT, place_exclam.clone());
            }
            return Ok(true);
        }

        // '?' expression
        if self.is_operator('?') {
            let place_question = self.advance().place.clone();
            if !self.expression(ret, input, targets)? {
                return Err(self
                    .expected_dependency()
                    .note(place_question, format!("after {}", char_format_word('?'))));
            }
            if !self.options.nonoptional {
                // Input redirection and optionality cannot be used at
                // the same time. Input redirection cannot appear in
                // dynamic dependencies, so checking here is enough.
                if input.name.is_some() {
                    return Err(Error::logical(
                        input.place.clone(),
                        format!(
                            "input redirection using {} must not be used",
                            char_format_word('<')
                        ),
                    )
                    .note(
                        place_question,
                        format!(
                            "in conjunction with optional dependencies using {}",
                            char_format_word('?')
                        ),
                    ));
                }
                for dep in ret.iter_mut() {
                    dep.add_flags(F_OPTIONAL);
                    dep.set_place_flag(I_OPTIONAL, place_question.clone());
                }
            }
            return Ok(true);
        }

        // '&' expression
        if self.is_operator('&') {
            let place_ampersand = self.advance().place.clone();
            if !self.expression(ret, input, targets)? {
                return Err(self
                    .expected_dependency()
                    .note(place_ampersand, format!("after {}", char_format_word('&'))));
            }
            for dep in ret.iter_mut() {
                if !self.options.nontrivial {
                    dep.add_flags(F_TRIVIAL);
                }
                dep.set_place_flag(I_TRIVIAL, place_ampersand.clone());
            }
            return Ok(true);
        }

        if let Some(dep) = self.variable_dependency(input, targets)? {
            ret.push(dep);
            return Ok(true);
        }

        if let Some(dep) = self.redirect_dependency(input, targets)? {
            ret.push(dep);
            return Ok(true);
        }

        Ok(false)
    }

    fn expected_dependency(&self) -> Error {
        match self.peek() {
            None => Error::logical(self.place_end.clone(), "expected a dependency"),
            Some(token) => Error::logical(
                token.place.clone(),
                format!("expected a dependency, not {}", token.format_start_word()),
            ),
        }
    }

    /// `$[` flags* `<`? filename (`=` varname)? `]`
    fn variable_dependency(
        &mut self,
        input: &mut InputRedirect,
        targets: &[PlaceParamTarget],
    ) -> Result<Option<Dependency>> {
        if !self.is_operator('$') {
            return Ok(None);
        }
        let place_dollar = self.tokens[self.pos].place.clone();
        match self.tokens.get(self.pos + 1) {
            None => {
                self.advance();
                return Err(Error::logical(
                    self.place_end.clone(),
                    format!("expected {}", char_format_word('[')),
                )
                .note(place_dollar, format!("after {}", char_format_word('$'))));
            }
            Some(token) if !matches!(token.kind, TokenKind::Operator('[')) => {
                return Ok(None);
            }
            _ => {}
        }
        self.advance();
        self.advance();

        let mut flags = F_VARIABLE;

        let mut place_flag_last: Option<Place> = None;
        let mut flag_last = '\0';
        loop {
            let op = match self.peek() {
                Some(Token {
                    kind: TokenKind::Operator(c @ ('!' | '?' | '&')),
                    ..
                }) => *c,
                _ => break,
            };
            let place_op = self.advance().place.clone();
            flag_last = op;
            match op {
                '!' => {
                    place_flag_last = Some(place_op);
                    flags |= F_PERSISTENT;
                }
                '?' => {
                    if !self.options.nonoptional {
                        return Err(Error::logical(
                            place_op,
                            format!(
                                "optional dependency using {} must not appear",
                                char_format_word('?')
                            ),
                        )
                        .note(place_dollar, "within dynamic variable declaration"));
                    }
                }
                '&' => {
                    place_flag_last = Some(place_op);
                    if !self.options.nontrivial {
                        flags |= F_TRIVIAL;
                    }
                }
                _ => unreachable!(),
            }
        }

        let mut has_input = false;
        if self.is_operator('<') {
            input.place = self.advance().place.clone();
            has_input = true;
        }

        // Name of the file whose content becomes the variable.
        let name = match self.peek_name() {
            Some(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            None => {
                let err = match self.peek() {
                    None => Error::logical(self.place_end.clone(), "expected a filename"),
                    Some(token) => Error::logical(
                        token.place.clone(),
                        format!("expected a filename, not {}", token.format_start_word()),
                    ),
                };
                let err = if has_input {
                    err.note(input.place.clone(), format!("after {}", char_format_word('<')))
                } else if let Some(place_flag) = place_flag_last {
                    err.note(place_flag, format!("after {}", char_format_word(flag_last)))
                } else {
                    err.note(place_dollar, format!("after {}", name_format_word("$[")))
                };
                return Err(err);
            }
        };

        if has_input {
            if let Some(previous) = &input.name {
                let err = Error::logical(
                    name.place.clone(),
                    format!(
                        "there must not be a second input redirection {}",
                        prefix_format_word(&name.name.raw(), "<")
                    ),
                )
                .note(
                    previous.place.clone(),
                    format!(
                        "shadowing previous input redirection {}",
                        prefix_format_word(&previous.name.raw(), "<")
                    ),
                );
                return Err(note_targets(err, targets));
            }
        }

        // The filename must not contain '='; it could not be passed in
        // the environment otherwise.
        for text in name.name.texts() {
            if text.contains('=') {
                return Err(Error::logical(
                    name.place.clone(),
                    format!(
                        "name of variable dependency {} must not contain {}",
                        name.format_word(),
                        char_format_word('=')
                    ),
                ));
            }
        }

        if self.at_end() {
            return Err(Error::logical(
                self.place_end.clone(),
                format!("expected {}", char_format_word(']')),
            )
            .note(
                place_dollar.clone(),
                format!("after opening {}", name_format_word("$[")),
            ));
        }

        // Explicit variable name.
        let mut variable_name: Option<SmolStr> = None;
        if self.is_operator('=') {
            let place_equal = self.advance().place.clone();
            let renamed = match self.peek_name() {
                Some(renamed) => {
                    let renamed = renamed.clone();
                    self.advance();
                    renamed
                }
                None => {
                    let err = match self.peek() {
                        None => Error::logical(self.place_end.clone(), "expected a filename"),
                        Some(token) => Error::logical(
                            token.place.clone(),
                            format!("expected a filename, not {}", token.format_start_word()),
                        ),
                    };
                    return Err(err.note(
                        place_equal,
                        format!(
                            "after {} in variable dependency {}",
                            char_format_word('='),
                            name.format_word()
                        ),
                    ));
                }
            };
            if renamed.name.n() != 0 {
                return Err(Error::logical(
                    renamed.place.clone(),
                    format!("variable name {} must be unparametrized", renamed.format_word()),
                ));
            }
            if renamed.name.unparametrized().contains('=') {
                return Err(Error::logical(
                    renamed.place.clone(),
                    format!(
                        "name of variable dependency {} must not contain {}",
                        renamed.format_word(),
                        char_format_word('=')
                    ),
                ));
            }
            variable_name = Some(SmolStr::from(renamed.name.unparametrized()));
        }

        match self.peek() {
            Some(token) if matches!(token.kind, TokenKind::Operator(']')) => {
                self.advance();
            }
            Some(token) => {
                return Err(Error::logical(
                    token.place.clone(),
                    format!("expected {}", char_format_word(']')),
                )
                .note(
                    place_dollar.clone(),
                    format!("after opening {}", name_format_word("$[")),
                ));
            }
            None => {
                return Err(Error::logical(
                    self.place_end.clone(),
                    format!("expected {}", char_format_word(']')),
                )
                .note(
                    place_dollar.clone(),
                    format!("after opening {}", name_format_word("$[")),
                ));
            }
        }

        if has_input {
            input.name = Some(name.clone());
        }

        // The place of the variable dependency as a whole is the
        // dollar sign.
        let target = PlaceParamTarget::new(TargetKind::FILE, name, place_dollar);
        Ok(Some(Dependency::Direct(DirectDependency::variable(
            flags,
            target,
            variable_name,
        ))))
    }

    /// `<`? `@`? name
    fn redirect_dependency(
        &mut self,
        input: &mut InputRedirect,
        targets: &[PlaceParamTarget],
    ) -> Result<Option<Dependency>> {
        let mut has_input = false;
        if self.is_operator('<') {
            input.place = self.advance().place.clone();
            has_input = true;
        }

        let mut place_at: Option<Place> = None;
        if self.is_operator('@') {
            let place = self.peek().unwrap().place.clone();
            if has_input {
                return Err(Error::logical(
                    place,
                    format!("expected a filename, not {}", char_format_word('@')),
                )
                .note(
                    input.place.clone(),
                    format!("after input redirection using {}", char_format_word('<')),
                ));
            }
            self.advance();
            place_at = Some(place);
        }

        let name = match self.peek_name() {
            Some(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            None => {
                if has_input {
                    let err = match self.peek() {
                        None => Error::logical(self.place_end.clone(), "expected a filename"),
                        Some(token) => {
                            Error::logical(token.place.clone(), "expected a filename")
                        }
                    };
                    return Err(err.note(
                        input.place.clone(),
                        format!("after input redirection using {}", char_format_word('<')),
                    ));
                }
                if let Some(place_at) = place_at {
                    let err = match self.peek() {
                        None => Error::logical(
                            self.place_end.clone(),
                            "expected the name of a transient target",
                        ),
                        Some(token) => Error::logical(
                            token.place.clone(),
                            format!(
                                "expected the name of a transient target, not {}",
                                token.format_start_word()
                            ),
                        ),
                    };
                    return Err(err.note(place_at, format!("after {}", char_format_word('@'))));
                }
                return Ok(None);
            }
        };

        if has_input {
            if let Some(previous) = &input.name {
                let err = Error::logical(
                    name.place.clone(),
                    format!(
                        "there must not be a second input redirection {}",
                        prefix_format_word(&name.name.raw(), "<")
                    ),
                )
                .note(
                    previous.place.clone(),
                    format!(
                        "shadowing previous input redirection {}",
                        prefix_format_word(&previous.name.raw(), "<")
                    ),
                );
                return Err(note_targets(err, targets));
            }
            input.name = Some(name.clone());
        }

        let (kind, place) = match place_at {
            Some(place_at) => (TargetKind::TRANSIENT, place_at),
            None => (TargetKind::FILE, name.place.clone()),
        };
        Ok(Some(Dependency::Direct(DirectDependency::new(
            0,
            PlaceParamTarget::new(kind, name, place),
        ))))
    }
}

/// Add the "for target(s) ..." context of the surrounding rule, when
/// there is one.
fn note_targets(err: Error, targets: &[PlaceParamTarget]) -> Error {
    match targets {
        [] => err,
        [target] => {
            let place = target.place.clone();
            let text = format!("for target {}", target.format_word());
            err.note(place, text)
        }
        [target, ..] => {
            let place = target.place.clone();
            let text = format!("for targets {}...", target.format_word());
            err.note(place, text)
        }
    }
}

/// If `to` ends in `/`, append to it the part of `from` after its last
/// slash, or all of `from` if it contains no slash. Parameters are not
/// scanned for slashes.
fn append_copy(to: &mut PlaceName, from: &PlaceName) {
    if !to.name.last_text().ends_with('/') {
        return;
    }

    for i in (0..from.name.texts().len()).rev() {
        let text = &from.name.texts()[i];
        if let Some(j) = text.rfind('/') {
            // The found slash is not appended; `to` already ends in
            // one.
            to.name.append_text(&text[j + 1..]);
            for k in i..from.name.n() {
                to.name.append_parameter(from.name.parameters()[k].clone());
                to.places.push(from.places[k].clone());
                to.name.append_text(&from.name.texts()[k + 1]);
            }
            return;
        }
    }

    to.name.append(&from.name);
    to.places.extend(from.places.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dep::Dependency;
    use crate::error::Severity;
    use crate::flags::{F_OPTIONAL, F_PERSISTENT, F_TRIVIAL, F_VARIABLE};
    use crate::name::ParamName;
    use pretty_assertions::assert_eq;

    enum Tk {
        Op(char),
        Name(&'static str),
        Cmd(&'static str),
    }

    fn pl(column: usize) -> Place {
        Place::in_source("test.stu", 1, column)
    }

    fn end_place() -> Place {
        Place::in_source("test.stu", 2, 1)
    }

    fn tokens(spec: &[Tk]) -> Vec<Token> {
        spec.iter()
            .enumerate()
            .map(|(i, tk)| {
                let place = pl(i + 1);
                match tk {
                    Tk::Op(c) => Token::operator(*c, place),
                    Tk::Name(s) => Token::name(PlaceName::literal(*s, place)),
                    Tk::Cmd(s) => Token::command(Command::new(*s, place)),
                }
            })
            .collect()
    }

    fn rules(spec: &[Tk]) -> Result<Vec<Rule>> {
        parse_rule_list(&tokens(spec), &end_place(), ParseOptions::default())
    }

    fn rules_with(spec: &[Tk], options: ParseOptions) -> Result<Vec<Rule>> {
        parse_rule_list(&tokens(spec), &end_place(), options)
    }

    /// A parametrized name token at the given column.
    fn param_name_token(texts: &[&str], parameters: &[&str], column: usize) -> Token {
        let name = ParamName::new(
            texts.iter().map(|t| t.to_string()).collect(),
            parameters.iter().map(|p| SmolStr::from(*p)).collect(),
        );
        let places = (0..parameters.len()).map(|i| pl(column * 10 + i)).collect();
        Token::name(PlaceName::new(name, pl(column), places))
    }

    #[test]
    fn empty_input_yields_no_rules() {
        assert_eq!(Vec::<Rule>::new(), rules(&[]).unwrap());
    }

    #[test]
    fn simple_rule() {
        let rules = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Name("B"), Tk::Op(';')]).unwrap();
        assert_eq!(1, rules.len());
        let rule = &rules[0];
        assert_eq!(1, rule.targets.len());
        assert_eq!(
            Target::new(TargetKind::FILE, "A"),
            rule.targets[0].unparametrized()
        );
        assert_eq!(1, rule.deps.len());
        match &rule.deps[0] {
            Dependency::Direct(d) => {
                assert_eq!(0, d.flags.flags);
                assert_eq!(Target::new(TargetKind::FILE, "B"), d.target.unparametrized());
            }
            other => panic!("expected a direct dependency, got {:?}", other),
        }
        assert!(matches!(rule.body, RuleBody::Declaration));
        assert_eq!(None, rule.output_redirect);
        assert_eq!(None, rule.input);
    }

    #[test]
    fn optional_dynamic() {
        let rules = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('?'),
            Tk::Op('['),
            Tk::Name("B"),
            Tk::Op(']'),
            Tk::Op(';'),
        ])
        .unwrap();
        assert_eq!(1, rules[0].deps.len());
        match &rules[0].deps[0] {
            Dependency::Dynamic(d) => {
                // The optional flag lands on the dynamic wrapper, with
                // the place of the '?'.
                assert_eq!(F_OPTIONAL, d.flags.flags);
                assert_eq!(&pl(3), d.flags.place(I_OPTIONAL));
                match &*d.child {
                    Dependency::Direct(child) => assert_eq!(0, child.flags.flags),
                    other => panic!("expected a direct child, got {:?}", other),
                }
            }
            other => panic!("expected a dynamic dependency, got {:?}", other),
        }
    }

    #[test]
    fn variable_dependency_with_rename_and_input() {
        let rules = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('$'),
            Tk::Op('['),
            Tk::Op('<'),
            Tk::Name("f"),
            Tk::Op('='),
            Tk::Name("VAR"),
            Tk::Op(']'),
            Tk::Cmd("echo $VAR"),
        ])
        .unwrap();
        let rule = &rules[0];
        assert!(matches!(rule.body, RuleBody::Command(_)));
        assert_eq!("f", rule.input.as_ref().unwrap().name.unparametrized());
        match &rule.deps[0] {
            Dependency::Direct(d) => {
                assert_eq!(F_VARIABLE, d.flags.flags);
                assert!(d.target.kind.is_file());
                assert_eq!("f", d.target.name.name.unparametrized());
                assert_eq!(Some(&SmolStr::from("VAR")), d.variable_name.as_ref());
                // The dependency's place is the dollar sign.
                assert_eq!(&pl(3), &d.place);
            }
            other => panic!("expected a direct dependency, got {:?}", other),
        }
    }

    #[test]
    fn copy_rule_appends_target_after_slash() {
        let rules = rules(&[
            Tk::Name("dir/out"),
            Tk::Op('='),
            Tk::Name("src/"),
            Tk::Op(';'),
        ])
        .unwrap();
        match &rules[0].body {
            RuleBody::Copy { source, exclam } => {
                assert_eq!("src/out", source.name.unparametrized());
                assert_eq!(&None, exclam);
            }
            other => panic!("expected a copy body, got {:?}", other),
        }
    }

    #[test]
    fn copy_rule_with_exclam() {
        let rules = rules(&[
            Tk::Name("out"),
            Tk::Op('='),
            Tk::Op('!'),
            Tk::Name("src"),
            Tk::Op(';'),
        ])
        .unwrap();
        match &rules[0].body {
            RuleBody::Copy { source, exclam } => {
                assert_eq!("src", source.name.unparametrized());
                assert_eq!(&Some(pl(3)), exclam);
            }
            other => panic!("expected a copy body, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_output_redirection() {
        let err = rules(&[
            Tk::Op('>'),
            Tk::Name("A"),
            Tk::Op('>'),
            Tk::Name("B"),
            Tk::Op(':'),
            Tk::Name("C"),
            Tk::Cmd("cat C"),
        ])
        .unwrap_err();
        assert_eq!(Severity::Logical, err.severity());
        let annotations = err.annotations();
        assert_eq!(
            "there must not be a second output redirection '>B'",
            annotations[0].text
        );
        assert_eq!(pl(3), annotations[0].place);
        assert_eq!(
            "shadowing previous output redirection '>A'",
            annotations[1].text
        );
        assert_eq!(pl(1), annotations[1].place);
    }

    #[test]
    fn output_redirection_recorded() {
        let rules = rules(&[
            Tk::Op('>'),
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Name("B"),
            Tk::Cmd("cat B"),
        ])
        .unwrap();
        assert_eq!(Some(0), rules[0].output_redirect);
    }

    #[test]
    fn transient_target() {
        let rules = rules(&[
            Tk::Op('@'),
            Tk::Name("all"),
            Tk::Op(':'),
            Tk::Name("B"),
            Tk::Op(';'),
        ])
        .unwrap();
        let target = &rules[0].targets[0];
        assert!(target.kind.is_transient());
        // The target's place is the '@'.
        assert_eq!(pl(1), target.place);
    }

    #[test]
    fn output_redirection_on_transient_fails() {
        let err = rules(&[
            Tk::Op('>'),
            Tk::Op('@'),
            Tk::Name("x"),
            Tk::Op(':'),
            Tk::Name("B"),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert_eq!("transient target '@x' is invalid", err.message());
        assert_eq!(
            "after output redirection using '>'",
            err.annotations()[1].text
        );
    }

    #[test]
    fn parametrized_output_redirection_fails() {
        let toks = vec![
            Token::operator('>', pl(1)),
            param_name_token(&["a.", ""], &["X"], 2),
            Token::operator(':', pl(3)),
            Token::name(PlaceName::literal("B", pl(4))),
            Token::command(Command::new("true", pl(5))),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert!(err.message().contains("must not be parametrized"));
    }

    #[test]
    fn differing_parameter_sets_fail() {
        let toks = vec![
            param_name_token(&["a.", ""], &["X"], 1),
            param_name_token(&["b.", ""], &["Y"], 2),
            Token::operator(';', pl(3)),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert!(err.message().starts_with("parameters of target"));
        assert!(err.annotations()[1]
            .text
            .contains("in rule with multiple targets"));
    }

    #[test]
    fn duplicate_parameter_fails() {
        let toks = vec![
            param_name_token(&["a.", ".", ""], &["X", "X"], 1),
            Token::operator(';', pl(2)),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert!(err
            .message()
            .contains("must not contain duplicate parameter '$X'"));
    }

    #[test]
    fn unseparated_parameters_fail() {
        let toks = vec![
            param_name_token(&["a.", "", ""], &["X", "Y"], 1),
            Token::operator(';', pl(2)),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert!(err
            .message()
            .contains("must be separated by at least one character"));
    }

    #[test]
    fn persistent_flag_applies_to_each_dependency() {
        let rules = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('!'),
            Tk::Op('('),
            Tk::Name("B"),
            Tk::Name("C"),
            Tk::Op(')'),
            Tk::Op(';'),
        ])
        .unwrap();
        let deps = &rules[0].deps;
        assert_eq!(2, deps.len());
        for dep in deps {
            assert!(dep.has_flags(F_PERSISTENT));
            assert_eq!(&pl(3), dep.place_flag(I_PERSISTENT));
        }
    }

    #[test]
    fn parenthesized_groups_are_flattened() {
        let rules = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('('),
            Tk::Name("B"),
            Tk::Op('('),
            Tk::Name("C"),
            Tk::Op(')'),
            Tk::Op(')'),
            Tk::Name("D"),
            Tk::Op(';'),
        ])
        .unwrap();
        let names: Vec<String> = rules[0].deps.iter().map(Dependency::format_out).collect();
        assert_eq!(vec!["B", "C", "D"], names);
    }

    #[test]
    fn empty_parens_yield_nothing() {
        let rules = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('('), Tk::Op(')'), Tk::Op(';')])
            .unwrap();
        assert!(rules[0].deps.is_empty());
    }

    #[test]
    fn nonoptional_strips_question_mark() {
        let rules = rules_with(
            &[Tk::Name("A"), Tk::Op(':'), Tk::Op('?'), Tk::Name("B"), Tk::Op(';')],
            ParseOptions {
                nonoptional: true,
                nontrivial: false,
            },
        )
        .unwrap();
        let dep = &rules[0].deps[0];
        assert_eq!(0, dep.flags());
        assert!(dep.place_flag(I_OPTIONAL).is_empty());
    }

    #[test]
    fn nontrivial_strips_flag_but_keeps_place() {
        let rules = rules_with(
            &[Tk::Name("A"), Tk::Op(':'), Tk::Op('&'), Tk::Name("B"), Tk::Op(';')],
            ParseOptions {
                nonoptional: false,
                nontrivial: true,
            },
        )
        .unwrap();
        let dep = &rules[0].deps[0];
        assert!(!dep.has_flags(F_TRIVIAL));
        assert_eq!(&pl(3), dep.place_flag(I_TRIVIAL));
    }

    #[test]
    fn trivial_flag_applies() {
        let rules = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('&'), Tk::Name("B"), Tk::Op(';')])
            .unwrap();
        assert!(rules[0].deps[0].has_flags(F_TRIVIAL));
    }

    #[test]
    fn variable_dependency_inside_dynamic_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('['),
            Tk::Op('$'),
            Tk::Op('['),
            Tk::Name("V"),
            Tk::Op(']'),
            Tk::Op(']'),
            Tk::Op(';'),
        ])
        .unwrap_err();
        assert!(err.message().starts_with("variable dependency"));
        assert!(err.message().ends_with("must not appear"));
        assert_eq!(
            "within dynamic dependency started by '['",
            err.annotations()[1].text
        );
    }

    #[test]
    fn optional_inside_variable_dependency_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('$'),
            Tk::Op('['),
            Tk::Op('?'),
            Tk::Name("V"),
            Tk::Op(']'),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert_eq!(
            "optional dependency using '?' must not appear",
            err.message()
        );
        assert_eq!(
            "within dynamic variable declaration",
            err.annotations()[1].text
        );
    }

    #[test]
    fn parametrized_variable_name_fails() {
        let toks = vec![
            Token::name(PlaceName::literal("A", pl(1))),
            Token::operator(':', pl(2)),
            Token::operator('$', pl(3)),
            Token::operator('[', pl(4)),
            Token::name(PlaceName::literal("f", pl(5))),
            Token::operator('=', pl(6)),
            param_name_token(&["v.", ""], &["X"], 7),
            Token::operator(']', pl(8)),
            Token::command(Command::new("true", pl(9))),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert!(err.message().contains("must be unparametrized"));
    }

    #[test]
    fn equals_sign_in_variable_filename_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('$'),
            Tk::Op('['),
            Tk::Name("a=b"),
            Tk::Op(']'),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert!(err.message().contains("must not contain '='"));
    }

    #[test]
    fn input_redirection_recorded() {
        let rules = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('<'),
            Tk::Name("in"),
            Tk::Cmd("tr a-z A-Z"),
        ])
        .unwrap();
        let rule = &rules[0];
        assert_eq!("in", rule.input.as_ref().unwrap().name.unparametrized());
        // The dependency itself is an ordinary file dependency.
        match &rule.deps[0] {
            Dependency::Direct(d) => assert_eq!(0, d.flags.flags),
            other => panic!("expected a direct dependency, got {:?}", other),
        }
    }

    #[test]
    fn second_input_redirection_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('<'),
            Tk::Name("f"),
            Tk::Op('<'),
            Tk::Name("g"),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert_eq!(
            "there must not be a second input redirection '<g'",
            err.message()
        );
        assert_eq!(
            "shadowing previous input redirection '<f'",
            err.annotations()[1].text
        );
        assert_eq!("for target 'A'", err.annotations()[2].text);
    }

    #[test]
    fn input_redirection_without_command_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('<'), Tk::Name("in"), Tk::Op(';')])
            .unwrap_err();
        assert_eq!(
            "input redirection using '<' must not be used",
            err.message()
        );
        assert_eq!(
            "in rule for 'A' without a command",
            err.annotations()[1].text
        );
    }

    #[test]
    fn input_redirection_with_optional_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('<'),
            Tk::Name("f"),
            Tk::Op('?'),
            Tk::Name("B"),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert_eq!(
            "input redirection using '<' must not be used",
            err.message()
        );
        assert_eq!(
            "in conjunction with optional dependencies using '?'",
            err.annotations()[1].text
        );
    }

    #[test]
    fn input_redirection_of_transient_fails() {
        let err = rules(&[
            Tk::Name("A"),
            Tk::Op(':'),
            Tk::Op('<'),
            Tk::Op('@'),
            Tk::Name("x"),
            Tk::Cmd("true"),
        ])
        .unwrap_err();
        assert_eq!("expected a filename, not '@'", err.message());
    }

    #[test]
    fn output_redirection_without_command_fails() {
        let err = rules(&[Tk::Op('>'), Tk::Name("A"), Tk::Op(':'), Tk::Name("B"), Tk::Op(';')])
            .unwrap_err();
        assert_eq!(
            "output redirection using '>' must not be used",
            err.message()
        );
        assert_eq!(
            "in rule for 'A' without a command",
            err.annotations()[1].text
        );
    }

    #[test]
    fn output_redirection_with_hardcoded_content_fails() {
        let err = rules(&[Tk::Op('>'), Tk::Name("A"), Tk::Op('='), Tk::Cmd("content")])
            .unwrap_err();
        assert_eq!(
            "output redirection using '>' must not be used",
            err.message()
        );
        assert_eq!(
            "in rule for 'A' with assigned content using '='",
            err.annotations()[1].text
        );
    }

    #[test]
    fn hardcoded_content() {
        let rules = rules(&[Tk::Name("A"), Tk::Op('='), Tk::Cmd("hello\n")]).unwrap();
        match &rules[0].body {
            RuleBody::Hardcoded(content) => assert_eq!(&BString::from("hello\n"), content),
            other => panic!("expected hardcoded content, got {:?}", other),
        }
    }

    #[test]
    fn hardcoded_content_for_multiple_targets_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Name("B"), Tk::Op('='), Tk::Cmd("x")]).unwrap_err();
        assert_eq!(
            "there must not be assigned content using '='",
            err.message()
        );
        assert_eq!(
            "in rule for 'A'... with multiple targets",
            err.annotations()[1].text
        );
    }

    #[test]
    fn hardcoded_content_for_transient_fails() {
        let err = rules(&[Tk::Op('@'), Tk::Name("x"), Tk::Op('='), Tk::Cmd("x")]).unwrap_err();
        assert_eq!(
            "there must not be assigned content using '='",
            err.message()
        );
        assert_eq!("for transient target '@x'", err.annotations()[1].text);
    }

    #[test]
    fn copy_rule_for_transient_fails() {
        let err = rules(&[Tk::Op('@'), Tk::Name("x"), Tk::Op('='), Tk::Name("src"), Tk::Op(';')])
            .unwrap_err();
        assert_eq!("copy rule using '=' cannot be used", err.message());
        assert_eq!("with transient target '@x'", err.annotations()[1].text);
    }

    #[test]
    fn copy_rule_for_multiple_targets_fails() {
        let err = rules(&[
            Tk::Name("a"),
            Tk::Name("b"),
            Tk::Op('='),
            Tk::Name("src"),
            Tk::Op(';'),
        ])
        .unwrap_err();
        assert_eq!("there must not be a copy rule using '='", err.message());
    }

    #[test]
    fn copy_rule_with_optional_source_fails() {
        let err = rules(&[Tk::Name("a"), Tk::Op('='), Tk::Op('?'), Tk::Name("src"), Tk::Op(';')])
            .unwrap_err();
        assert_eq!(
            "optional dependency using '?' must not be used",
            err.message()
        );
    }

    #[test]
    fn copy_rule_with_foreign_parameter_fails() {
        let toks = vec![
            Token::name(PlaceName::literal("out", pl(1))),
            Token::operator('=', pl(2)),
            param_name_token(&["src.", ""], &["X"], 3),
            Token::operator(';', pl(4)),
        ];
        let err = parse_rule_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert_eq!(
            "parameter '$X' must not appear in copied file 'src.${X}'",
            err.message()
        );
        assert_eq!(
            "because it does not appear in target 'out'",
            err.annotations()[1].text
        );
    }

    #[test]
    fn missing_body_fails() {
        let err = rules(&[Tk::Name("A")]).unwrap_err();
        assert_eq!("expected a command, ':', ';', or '='", err.message());
        assert_eq!(end_place(), err.annotations()[0].place);
        assert_eq!("after target 'A'", err.annotations()[1].text);
    }

    #[test]
    fn missing_body_after_colon_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Name("B")]).unwrap_err();
        assert_eq!("expected a dependency, a command, or ';'", err.message());
        assert_eq!("for target 'A'", err.annotations()[1].text);
    }

    #[test]
    fn unclosed_paren_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('('), Tk::Name("B")]).unwrap_err();
        assert_eq!("expected ')'", err.message());
        assert_eq!("after opening '('", err.annotations()[1].text);
    }

    #[test]
    fn unclosed_bracket_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('['), Tk::Name("B")]).unwrap_err();
        assert_eq!("expected ']'", err.message());
        assert_eq!("after opening '['", err.annotations()[1].text);
    }

    #[test]
    fn flag_without_operand_fails() {
        let err = rules(&[Tk::Name("A"), Tk::Op(':'), Tk::Op('!'), Tk::Op(';')]).unwrap_err();
        assert_eq!("expected a dependency, not ';'", err.message());
        assert_eq!("after '!'", err.annotations()[1].text);
    }

    #[test]
    fn trailing_token_fails() {
        let err = rules(&[Tk::Op(':')]).unwrap_err();
        assert_eq!("expected a rule, not ':'", err.message());
    }

    #[test]
    fn dependency_list_parses_without_rule_context() {
        let toks = tokens(&[Tk::Name("a"), Tk::Op('['), Tk::Name("b"), Tk::Op(']')]);
        let (deps, input) =
            parse_dependency_list(&toks, &end_place(), ParseOptions::default()).unwrap();
        assert_eq!(2, deps.len());
        assert!(matches!(deps[0], Dependency::Direct(_)));
        assert!(matches!(deps[1], Dependency::Dynamic(_)));
        assert_eq!(None, input);
    }

    #[test]
    fn dependency_list_rejects_trailing_tokens() {
        let toks = tokens(&[Tk::Name("a"), Tk::Op(';')]);
        let err =
            parse_dependency_list(&toks, &end_place(), ParseOptions::default()).unwrap_err();
        assert_eq!("expected a dependency, not ';'", err.message());
    }

    mod target_dependency {
        use super::*;
        use crate::flags::{I_OPTIONAL, I_PERSISTENT};
        use pretty_assertions::assert_eq;

        #[test]
        fn plain_file() {
            let dep = target_dependency("A").unwrap();
            match &dep {
                Dependency::Direct(d) => {
                    assert_eq!(0, d.flags.flags);
                    assert_eq!(Target::new(TargetKind::FILE, "A"), d.target.unparametrized());
                    assert_eq!(Place::Argv, d.place);
                }
                other => panic!("expected a direct dependency, got {:?}", other),
            }
        }

        #[test]
        fn transient() {
            let dep = target_dependency("@all").unwrap();
            assert!(dep.single_target().kind.is_transient());
        }

        #[test]
        fn dynamic_nesting() {
            let dep = target_dependency("[[a]]").unwrap();
            assert_eq!(2, dep.single_target().kind.depth());
            assert_eq!("[[a]]", dep.format_out());
        }

        #[test]
        fn flags_apply_outside_in() {
            // The '!' is outside the bracket, so it lands on the
            // dynamic wrapper.
            let dep = target_dependency("![a]").unwrap();
            match &dep {
                Dependency::Dynamic(d) => {
                    assert!(d.flags.has(F_PERSISTENT));
                    assert_eq!(&Place::Argv, d.flags.place(I_PERSISTENT));
                    assert!(matches!(&*d.child, Dependency::Direct(_)));
                }
                other => panic!("expected a dynamic dependency, got {:?}", other),
            }

            // The '?' is inside the bracket, so it lands on the leaf.
            let dep = target_dependency("[?a]").unwrap();
            match &dep {
                Dependency::Dynamic(d) => {
                    assert_eq!(0, d.flags.flags);
                    assert!(d.child.has_flags(F_OPTIONAL));
                    assert_eq!(&Place::Argv, d.child.place_flag(I_OPTIONAL));
                }
                other => panic!("expected a dynamic dependency, got {:?}", other),
            }
        }

        #[test]
        fn empty_name_fails() {
            let err = target_dependency("").unwrap_err();
            assert!(err.message().ends_with("name must not be empty"));
            let err = target_dependency("@").unwrap_err();
            assert!(err.message().ends_with("name must not be empty"));
            let err = target_dependency("[]").unwrap_err();
            assert!(err.message().ends_with("name must not be empty"));
        }

        #[test]
        fn unbalanced_brackets_fail() {
            for text in ["a[b", "[a", "a]"] {
                let err = target_dependency(text).unwrap_err();
                assert_eq!(Severity::Logical, err.severity());
                assert!(err.message().contains("unbalanced brackets"));
            }
        }
    }
}
