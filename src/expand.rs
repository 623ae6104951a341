//! The shell-style variable expander.
//!
//! [`Expander`] is a pure function from `(template, lookup, options)` to an
//! expanded string: it knows nothing about scopes, layers, or recursive
//! rendering. A caller supplies a [`Lookup`] implementation; the
//! [`crate::render`] module supplies one that recurses back into a
//! [`crate::Renderer`], but a plain [`MapLookup`] is enough for grammar
//! tests and simple standalone use.
use crate::error::ExpandError;
use std::collections::HashMap;

const ESCAPE_CHAR: char = '\\';

/// How `$$` is expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidValue {
    /// Substitute the current process id.
    Enabled,
    /// Leave `$$` as two literal dollar signs.
    Disabled,
    /// Substitute this literal string instead of the process id.
    Literal(String),
}

impl Default for PidValue {
    fn default() -> Self {
        PidValue::Enabled
    }
}

/// The result of a single [`Lookup::get`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The name resolved to this value.
    Found(String),
    /// No layer (or backing map) has this name.
    Missing,
}

impl LookupResult {
    fn into_option(self) -> Option<String> {
        match self {
            LookupResult::Found(v) => Some(v),
            LookupResult::Missing => None,
        }
    }
}

impl From<Option<String>> for LookupResult {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) => LookupResult::Found(v),
            None => LookupResult::Missing,
        }
    }
}

/// Backing store the expander asks for variable values.
///
/// Implementations decide what "not found" means for their domain; the
/// expander only sees [`LookupResult::Missing`] and applies its own
/// strict/default handling.
pub trait Lookup {
    /// Look up `name`.
    fn get(&mut self, name: &str) -> LookupResult;

    /// Write `name = value` into the backing store, if it is mutable.
    ///
    /// Returns `false` when the backing store cannot be written to, which
    /// makes the `${NAME:=default}` modifier behave like `${NAME:-default}`
    /// unwritable backing store.
    fn set(&mut self, _name: &str, _value: &str) -> bool {
        false
    }
}

/// A simple, non-recursive [`Lookup`] backed by an in-memory map.
///
/// Useful for grammar tests and for callers who just want shell-style
/// expansion without the layered store.
#[derive(Debug, Default, Clone)]
pub struct MapLookup {
    data: HashMap<String, String>,
    mutable: bool,
}

impl MapLookup {
    /// Create a read-only MapLookup from an existing map.
    pub fn new(data: HashMap<String, String>) -> Self {
        Self {
            data,
            mutable: false,
        }
    }

    /// Create a MapLookup whose `=` modifier is allowed to write back.
    pub fn new_mutable(data: HashMap<String, String>) -> Self {
        Self {
            data,
            mutable: true,
        }
    }

    /// The underlying map, after any writes the expander made.
    pub fn into_inner(self) -> HashMap<String, String> {
        self.data
    }
}

impl Lookup for MapLookup {
    fn get(&mut self, name: &str) -> LookupResult {
        self.data.get(name).cloned().into()
    }

    fn set(&mut self, name: &str, value: &str) -> bool {
        if !self.mutable {
            return false;
        }
        self.data.insert(name.to_string(), value.to_string());
        true
    }
}

/// Reads the `EXPANDVARS_RECOVER_NULL` environment variable.
///
/// Named after the variable the `expandvars` Python library reads, so
/// existing deployments that set it keep working. Read explicitly by
/// callers that want it (e.g.
/// at [`crate::LayerStore`] construction) rather than implicitly inside
/// [`Expander::new`], to avoid a hidden global read on every expansion.
pub fn recover_null_from_env() -> Option<String> {
    std::env::var("EXPANDVARS_RECOVER_NULL").ok()
}

/// Expands `$VAR`, `${VAR}`, and their modifiers against a [`Lookup`].
#[derive(Debug, Clone)]
pub struct Expander {
    var_symbol: char,
    strict: bool,
    pid_value: PidValue,
    recover_null: Option<String>,
}

impl Default for Expander {
    fn default() -> Self {
        Self {
            var_symbol: '$',
            strict: false,
            pid_value: PidValue::default(),
            recover_null: None,
        }
    }
}

impl Expander {
    /// Create a new Expander with default options: `$` as the variable
    /// symbol, strict mode off, and pid expansion enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an Expander with `recover_null` seeded from the
    /// `EXPANDVARS_RECOVER_NULL` environment variable, read once here rather
    /// than inside every [`Expander::expand`] call, avoiding a hidden
    /// global re-read at every expansion.
    pub fn from_env() -> Self {
        match recover_null_from_env() {
            Some(value) => Self::new().with_recover_null(value),
            None => Self::new(),
        }
    }

    /// Set the character that begins a variable reference.
    pub fn with_var_symbol(mut self, symbol: char) -> Self {
        self.var_symbol = symbol;
        self
    }

    /// Enable or disable strict mode: unset references with no default
    /// raise [`ExpandError::UnboundVariable`] instead of expanding to `""`.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Configure how `$$` is expanded.
    pub fn with_pid_value(mut self, pid_value: PidValue) -> Self {
        self.pid_value = pid_value;
        self
    }

    /// Set a fallback used instead of failing on a strict-mode miss.
    pub fn with_recover_null(mut self, value: impl Into<String>) -> Self {
        self.recover_null = Some(value.into());
        self
    }

    #[inline]
    pub fn var_symbol(&self) -> char {
        self.var_symbol
    }

    #[inline]
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Quick check for whether `text` contains anything the expander would
    /// act on, so callers can skip expansion entirely for plain strings.
    pub fn has_markers(&self, text: &str) -> bool {
        text.contains(self.var_symbol) || text.contains(ESCAPE_CHAR)
    }

    /// Expand `template` against `lookup`.
    pub fn expand(&self, template: &str, lookup: &mut dyn Lookup) -> Result<String, ExpandError> {
        let chars: Vec<char> = template.chars().collect();
        match expand_rec(&chars, self, lookup) {
            Ok(s) => Ok(s),
            // These three syntax errors should carry the full, un-sliced
            // template text rather than whichever inner slice first raised;
            // the outermost frame always runs last during unwind, so
            // overwriting here once is enough.
            Err(ExpandError::MissingClosingBrace(_)) => {
                Err(ExpandError::MissingClosingBrace(template.to_string()))
            }
            Err(ExpandError::MissingEscapedChar(_)) => {
                Err(ExpandError::MissingEscapedChar(template.to_string()))
            }
            Err(ExpandError::BadSubstitution(_)) => {
                Err(ExpandError::BadSubstitution(template.to_string()))
            }
            Err(other) => Err(other),
        }
    }
}

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand_rec(
    chars: &[char],
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    if chars.is_empty() {
        return Ok(String::new());
    }

    let mut buff = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == opts.var_symbol {
            let tail = expand_var(&chars[i + 1..], opts, lookup)?;
            buff.push_str(&tail);
            return Ok(buff);
        }
        if c == ESCAPE_CHAR {
            let tail = escape(&chars[i + 1..], opts, lookup)?;
            buff.push_str(&tail);
            return Ok(buff);
        }
        buff.push(c);
    }
    Ok(buff)
}

fn escape(chars: &[char], opts: &Expander, lookup: &mut dyn Lookup) -> Result<String, ExpandError> {
    if chars.is_empty() {
        return Err(ExpandError::MissingEscapedChar(String::new()));
    }
    if chars.len() == 1 {
        return Ok(chars[0].to_string());
    }
    if chars[0] == opts.var_symbol {
        let tail = expand_rec(&chars[1..], opts, lookup)?;
        return Ok(format!("{}{}", chars[0], tail));
    }
    if chars[0] == ESCAPE_CHAR {
        if chars[1] == opts.var_symbol {
            let tail = expand_rec(&chars[1..], opts, lookup)?;
            return Ok(format!("{ESCAPE_CHAR}{tail}"));
        }
        if chars[1] == ESCAPE_CHAR {
            let tail = escape(&chars[2..], opts, lookup)?;
            return Ok(format!("{ESCAPE_CHAR}{tail}"));
        }
    }
    let tail = expand_rec(&chars[1..], opts, lookup)?;
    Ok(format!("{ESCAPE_CHAR}{}{tail}", chars[0]))
}

fn expand_var(
    chars: &[char],
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    let var_symbol = opts.var_symbol;

    if chars.is_empty() {
        return Ok(var_symbol.to_string());
    }

    if chars[0] == ESCAPE_CHAR {
        let tail = escape(&chars[1..], opts, lookup)?;
        return Ok(format!("{var_symbol}{tail}"));
    }

    if chars[0] == var_symbol {
        let mut times = 2usize;
        for &c in &chars[1..] {
            if c != var_symbol {
                break;
            }
            times += 1;
        }

        if times == 2 {
            match &opts.pid_value {
                PidValue::Enabled => {
                    let tail = expand_rec(&chars[1..], opts, lookup)?;
                    return Ok(format!("{}{tail}", std::process::id()));
                }
                PidValue::Literal(value) => {
                    let tail = expand_rec(&chars[1..], opts, lookup)?;
                    return Ok(format!("{value}{tail}"));
                }
                PidValue::Disabled => {}
            }
        }

        let symbols: String = std::iter::repeat(var_symbol).take(times).collect();
        let tail = expand_rec(&chars[times - 1..], opts, lookup)?;
        return Ok(format!("{symbols}{tail}"));
    }

    if chars[0] == '{' {
        return expand_modifier_var(&chars[1..], opts, lookup);
    }

    for (n, &c) in chars.iter().enumerate() {
        if is_valid_char(c) {
            continue;
        }
        if n > 0 {
            let name: String = chars[..n].iter().collect();
            let value = getenv(&name, false, None, opts, lookup)?;
            let tail = expand_rec(&chars[n..], opts, lookup)?;
            return Ok(format!("{value}{tail}"));
        }
        let tail = expand_rec(chars, opts, lookup)?;
        return Ok(format!("{var_symbol}{tail}"));
    }

    let name: String = chars.iter().collect();
    getenv(&name, false, None, opts, lookup)
}

fn expand_modifier_var(
    chars: &[char],
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    if chars.len() <= 1 {
        return Err(ExpandError::BadSubstitution(chars.iter().collect()));
    }

    let (indirect, chars) = if chars[0] == '!' {
        (true, &chars[1..])
    } else {
        (false, chars)
    };

    for (i, &c) in chars.iter().enumerate() {
        if is_valid_char(c) {
            continue;
        }
        let name: String = chars[..i].iter().collect();
        if c == '}' {
            let value = getenv(&name, indirect, None, opts, lookup)?;
            let tail = expand_rec(&chars[i + 1..], opts, lookup)?;
            return Ok(format!("{value}{tail}"));
        }
        let skip = if c == ':' { i + 1 } else { i };
        return expand_advanced(&name, &chars[skip..], indirect, opts, lookup);
    }

    Err(ExpandError::MissingClosingBrace(chars.iter().collect()))
}

fn expand_advanced(
    var: &str,
    chars: &[char],
    indirect: bool,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    if chars.is_empty() {
        return Err(ExpandError::MissingClosingBrace(var.to_string()));
    }

    let mut depth = 1i32;
    let mut modifier_chars: Vec<char> = Vec::new();
    let mut consumed = chars.len();
    let mut closed = false;

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '{' => {
                depth += 1;
                modifier_chars.push(c);
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    consumed = i + 1;
                    closed = true;
                    break;
                }
                modifier_chars.push(c);
            }
            other => modifier_chars.push(other),
        }
    }

    if !closed || depth != 0 {
        return Err(ExpandError::MissingClosingBrace(var.to_string()));
    }

    let rest = &chars[consumed..];
    let modifier = expand_rec(&modifier_chars, opts, lookup)?;

    if modifier.is_empty() {
        return Err(ExpandError::BadSubstitution(var.to_string()));
    }

    let mut modifier_chars: Vec<char> = modifier.chars().collect();
    let head = modifier_chars.remove(0);
    let body: String = modifier_chars.iter().collect();

    let value = match head {
        '-' => expand_default(var, &body, false, indirect, opts, lookup)?,
        '=' => expand_default(var, &body, true, indirect, opts, lookup)?,
        '+' => expand_substitute(var, &body, lookup),
        '?' => expand_strict(var, &body, opts, lookup)?,
        _ => expand_offset(var, &modifier, opts, lookup)?,
    };

    let tail = expand_rec(rest, opts, lookup)?;
    Ok(format!("{value}{tail}"))
}

fn expand_default(
    var: &str,
    default_value: &str,
    set: bool,
    indirect: bool,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    if set {
        let unset_or_empty = match lookup.get(var) {
            LookupResult::Found(v) => v.is_empty(),
            LookupResult::Missing => true,
        };
        if unset_or_empty {
            // The write targets the outer name, not an indirected name,
            // and is a no-op against a read-only backing store (the
            // modifier then behaves like `-`).
            lookup.set(var, default_value);
        }
    }
    getenv(var, indirect, Some(default_value), opts, lookup)
}

fn expand_substitute(var: &str, alt: &str, lookup: &mut dyn Lookup) -> String {
    match lookup.get(var) {
        LookupResult::Found(value) if !value.is_empty() => alt.to_string(),
        _ => String::new(),
    }
}

fn expand_strict(
    var: &str,
    message: &str,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    if let LookupResult::Found(value) = lookup.get(var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    if let Some(recover) = &opts.recover_null {
        return Ok(recover.clone());
    }
    let message = if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    };
    Err(ExpandError::ParameterNullOrNotSet {
        var: var.to_string(),
        message,
    })
}

fn expand_offset(
    var: &str,
    modifier: &str,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    let chars: Vec<char> = modifier.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == ':' {
            let offset_str: String = chars[..i].iter().collect();
            let offset = parse_offset(&offset_str);
            let length_part: String = chars[i + 1..].iter().collect();
            return expand_length(var, &length_part, offset, opts, lookup);
        }
    }
    let offset_str: String = chars.iter().collect();
    let offset = parse_offset(offset_str.trim());
    let value = getenv(var, false, None, opts, lookup)?;
    Ok(value.chars().skip(offset).collect())
}

fn expand_length(
    var: &str,
    modifier: &str,
    offset: usize,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    let length_str = modifier.trim();

    let length: Option<usize> = if length_str.is_empty() {
        None
    } else if let Ok(n) = length_str.parse::<i64>() {
        if n < 0 {
            return Err(ExpandError::NegativeSubstring {
                var: var.to_string(),
                expr: length_str.to_string(),
            });
        }
        Some(n as usize)
    } else if length_str.chars().all(is_valid_char) {
        // Non-integer but identifier-shaped: the original treats this as
        // "no length given" rather than an error (only truly malformed
        // operands like "1.5" raise `OperandExpected`).
        None
    } else {
        return Err(ExpandError::OperandExpected {
            var: var.to_string(),
            operand: length_str.to_string(),
        });
    };

    let width = length.map(|len| offset + len).unwrap_or(0);
    let value = getenv(var, false, None, opts, lookup)?;

    if width <= offset {
        return Ok(String::new());
    }
    Ok(value.chars().skip(offset).take(width - offset).collect())
}

/// Non-negative integer parse; blank or unparseable offsets are `0`.
///
/// Offsets are always non-negative; unlike length, a negative offset has no
/// defined error here, so one is simply clamped to `0` rather than
/// reproducing Python's from-the-end slice semantics.
fn parse_offset(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    s.parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .unwrap_or(0)
}

fn getenv(
    var: &str,
    indirect: bool,
    default: Option<&str>,
    opts: &Expander,
    lookup: &mut dyn Lookup,
) -> Result<String, ExpandError> {
    let mut value = lookup.get(var).into_option();
    if indirect {
        if let Some(name) = &value {
            value = lookup.get(name).into_option();
        }
    }

    if let Some(value) = &value {
        if !value.is_empty() {
            return Ok(value.clone());
        }
    }

    if let Some(default) = default {
        return Ok(default.to_string());
    }

    if opts.strict {
        if let Some(recover) = &opts.recover_null {
            return Ok(recover.clone());
        }
        return Err(ExpandError::UnboundVariable(var.to_string()));
    }

    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> MapLookup {
        MapLookup::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn expand(template: &str, mut lookup: MapLookup) -> String {
        Expander::new().expand(template, &mut lookup).unwrap()
    }

    #[test]
    fn test_verbatim_four_dollars() {
        assert_eq!(expand("$$$$", lookup(&[])), "$$$$");
    }

    #[test]
    fn test_pid_literal() {
        let result = Expander::new()
            .with_pid_value(PidValue::Literal("X".to_string()))
            .expand("$$", &mut lookup(&[]))
            .unwrap();
        assert_eq!(result, "X");
    }

    #[test]
    fn test_default_modifier() {
        assert_eq!(expand("${A:-def}", lookup(&[])), "def");
        assert_eq!(expand("${A:-def}", lookup(&[("A", "x")])), "x");
    }

    #[test]
    fn test_assign_default_mutates_lookup() {
        let mut map = MapLookup::new_mutable(HashMap::new());
        let result = Expander::new().expand("${A:=def}", &mut map).unwrap();
        assert_eq!(result, "def");
        assert_eq!(map.into_inner().get("A"), Some(&"def".to_string()));
    }

    #[test]
    fn test_assign_default_noop_on_immutable_lookup() {
        // `=` behaves like `-` when the backing store can't be written.
        assert_eq!(expand("${A:=def}", lookup(&[])), "def");
    }

    #[test]
    fn test_alternate_modifier() {
        assert_eq!(expand("${A:+alt}", lookup(&[("A", "x")])), "alt");
        assert_eq!(expand("${A:+alt}", lookup(&[])), "");
    }

    #[test]
    fn test_strict_error_modifier_raises() {
        let err = Expander::new()
            .expand("${A:?msg}", &mut lookup(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ExpandError::ParameterNullOrNotSet {
                var: "A".to_string(),
                message: Some("msg".to_string())
            }
        );
    }

    #[test]
    fn test_indirect_reference() {
        assert_eq!(expand("${!P}", lookup(&[("P", "Q"), ("Q", "hi")])), "hi");
    }

    #[test]
    fn test_offset_and_length() {
        assert_eq!(expand("${A:1:3}", lookup(&[("A", "abcdef")])), "bcd");
    }

    #[test]
    fn test_offset_only_on_unset_var_is_empty() {
        assert_eq!(expand("${X:2}", lookup(&[])), "");
    }

    #[test]
    fn test_escape_dollar() {
        assert_eq!(expand("\\$A", lookup(&[])), "$A");
    }

    #[test]
    fn test_escape_backslash() {
        assert_eq!(expand("\\\\", lookup(&[])), "\\");
    }

    #[test]
    fn test_escape_other_char_is_literal() {
        assert_eq!(expand("\\c", lookup(&[])), "\\c");
    }

    #[test]
    fn test_bare_dollar_before_non_identifier() {
        assert_eq!(expand("$ rest", lookup(&[])), "$ rest");
    }

    #[test]
    fn test_strict_mode_unbound_variable() {
        let err = Expander::new()
            .with_strict(true)
            .expand("$MISSING", &mut lookup(&[]))
            .unwrap_err();
        assert_eq!(err, ExpandError::UnboundVariable("MISSING".to_string()));
    }

    #[test]
    fn test_strict_mode_recover_null() {
        let result = Expander::new()
            .with_strict(true)
            .with_recover_null("fallback")
            .expand("$MISSING", &mut lookup(&[]))
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_missing_closing_brace_keeps_full_template() {
        let err = Expander::new()
            .expand("${var_without_closing", &mut lookup(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ExpandError::MissingClosingBrace("${var_without_closing".to_string())
        );
    }

    #[test]
    fn test_negative_length_errors() {
        let err = Expander::new()
            .expand("${A:0:-1}", &mut lookup(&[("A", "abc")]))
            .unwrap_err();
        assert_eq!(
            err,
            ExpandError::NegativeSubstring {
                var: "A".to_string(),
                expr: "-1".to_string()
            }
        );
    }

    #[test]
    fn test_operand_expected_for_malformed_length() {
        let err = Expander::new()
            .expand("${A:0:1.5}", &mut lookup(&[("A", "abc")]))
            .unwrap_err();
        assert_eq!(
            err,
            ExpandError::OperandExpected {
                var: "A".to_string(),
                operand: "1.5".to_string()
            }
        );
    }

    #[test]
    fn test_nested_modifier_is_expanded_first() {
        assert_eq!(
            expand("${A:-${B}}", lookup(&[("B", "fallback")])),
            "fallback"
        );
    }

    #[test]
    fn test_mixed_escapes_and_pid() {
        assert_eq!(
            expand("$$literal_${base}_$$another", lookup(&[("base", "value")])),
            format!("{}literal_value_{}another", std::process::id(), std::process::id())
        );
    }

    #[test]
    fn test_has_markers() {
        let expander = Expander::new();
        assert!(expander.has_markers("$A"));
        assert!(expander.has_markers("\\x"));
        assert!(!expander.has_markers("plain text"));
    }
}
