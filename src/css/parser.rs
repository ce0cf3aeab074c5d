//! Resilient CSS parsing.
//!
//! The scanner respects strings, comments and bracket nesting, keeps
//! non-standard fragments as raw nodes, and only rejects input whose brace
//! structure cannot be reconciled — that is the signal the pipeline uses
//! to discard a stylesheet entirely.

use thiserror::Error;

use super::{
    Declaration, DeclarationBlockRule, GroupRule, NodeSeq, Rule, StatementRule, StyleRule,
    Stylesheet, ValueToken,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CssParseError {
    #[error("unbalanced braces in stylesheet")]
    UnbalancedBraces,
    #[error("unexpected closing brace at top level")]
    UnexpectedClosingBrace,
}

/// Parse a complete stylesheet.
pub fn parse_stylesheet(text: &str) -> Result<Stylesheet, CssParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut position = 0;
    let rules = parse_rules(&chars, &mut position, 0)?;
    Ok(Stylesheet { rules })
}

/// Parse a declaration list (the contents of a `style` attribute).
pub fn parse_declarations(text: &str) -> NodeSeq<Declaration> {
    let mut declarations = NodeSeq::new();
    for piece in split_top_level(text, ';') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let Some(colon) = find_top_level(piece, ':') else {
            continue;
        };
        let property = piece[..colon].trim().to_string();
        let mut value_text = piece[colon + 1..].trim().to_string();
        let mut important = false;
        let lowered = value_text.to_ascii_lowercase();
        if let Some(position) = lowered.rfind("!important") {
            if lowered[position + "!important".len()..].trim().is_empty() {
                value_text.truncate(position);
                let trimmed = value_text.trim_end().len();
                value_text.truncate(trimmed);
                important = true;
            }
        }
        if property.is_empty() {
            continue;
        }
        declarations.push(Declaration {
            property,
            value: tokenize_value(&value_text),
            important,
        });
    }
    declarations
}

const GROUP_AT_RULES: [&str; 5] = ["media", "supports", "document", "layer", "container"];

fn parse_rules(
    chars: &[char],
    position: &mut usize,
    depth: usize,
) -> Result<NodeSeq<Rule>, CssParseError> {
    let mut rules = NodeSeq::new();
    loop {
        skip_whitespace(chars, position);
        if *position >= chars.len() {
            if depth > 0 {
                return Err(CssParseError::UnbalancedBraces);
            }
            return Ok(rules);
        }
        match chars[*position] {
            '}' => {
                if depth > 0 {
                    *position += 1;
                    return Ok(rules);
                }
                return Err(CssParseError::UnexpectedClosingBrace);
            }
            '/' if peek(chars, *position + 1) == Some('*') => {
                skip_comment(chars, position);
            }
            '/' if peek(chars, *position + 1) == Some('/') => {
                // Non-standard line comment, kept raw so compression can
                // strip it later.
                let start = *position;
                while *position < chars.len() && chars[*position] != '\n' {
                    *position += 1;
                }
                rules.push(Rule::Raw(chars[start..*position].iter().collect()));
            }
            _ => {
                let (prelude, terminator) = read_prelude(chars, position);
                let prelude = prelude.trim().to_string();
                match terminator {
                    PreludeEnd::Semicolon | PreludeEnd::Eof => {
                        if prelude.is_empty() {
                            continue;
                        }
                        if let Some(rest) = prelude.strip_prefix('@') {
                            let (name, rule_prelude) = split_at_name(rest);
                            rules.push(Rule::Statement(StatementRule {
                                name,
                                prelude: rule_prelude,
                            }));
                        } else {
                            rules.push(Rule::Raw(prelude));
                        }
                    }
                    PreludeEnd::BlockOpen => {
                        if let Some(rest) = prelude.strip_prefix('@') {
                            let (name, rule_prelude) = split_at_name(rest);
                            if is_group_at_rule(&name) {
                                let nested = parse_rules(chars, position, depth + 1)?;
                                rules.push(Rule::Group(GroupRule {
                                    name,
                                    prelude: rule_prelude,
                                    rules: nested,
                                }));
                            } else {
                                let body = read_block_text(chars, position)?;
                                rules.push(Rule::DeclarationBlock(DeclarationBlockRule {
                                    name,
                                    prelude: rule_prelude,
                                    declarations: parse_declarations(&body),
                                }));
                            }
                        } else {
                            let body = read_block_text(chars, position)?;
                            rules.push(Rule::Style(StyleRule {
                                prelude,
                                declarations: parse_declarations(&body),
                            }));
                        }
                    }
                    PreludeEnd::BlockClose => {
                        if !prelude.is_empty() {
                            rules.push(Rule::Raw(prelude));
                        }
                        if depth > 0 {
                            *position += 1;
                            return Ok(rules);
                        }
                        return Err(CssParseError::UnexpectedClosingBrace);
                    }
                }
            }
        }
    }
}

fn is_group_at_rule(name: &str) -> bool {
    let name = name.to_lowercase();
    GROUP_AT_RULES.contains(&name.as_str()) || name.ends_with("keyframes")
}

fn split_at_name(rest: &str) -> (String, String) {
    let boundary = rest
        .char_indices()
        .find(|(_, character)| character.is_whitespace())
        .map(|(index, _)| index)
        .unwrap_or(rest.len());
    let name = rest[..boundary].to_string();
    let prelude = rest[boundary..].trim().to_string();
    (name, prelude)
}

enum PreludeEnd {
    BlockOpen,
    BlockClose,
    Semicolon,
    Eof,
}

/// Read selector/at-rule text up to `{`, `;` or an unconsumed `}`.
fn read_prelude(chars: &[char], position: &mut usize) -> (String, PreludeEnd) {
    let mut text = String::new();
    let mut paren_depth = 0usize;
    while *position < chars.len() {
        let character = chars[*position];
        match character {
            '/' if peek(chars, *position + 1) == Some('*') => {
                skip_comment(chars, position);
                continue;
            }
            '"' | '\'' => {
                text.push_str(&read_string(chars, position));
                continue;
            }
            '(' | '[' => paren_depth += 1,
            ')' | ']' => paren_depth = paren_depth.saturating_sub(1),
            '{' if paren_depth == 0 => {
                *position += 1;
                return (text, PreludeEnd::BlockOpen);
            }
            '}' if paren_depth == 0 => {
                return (text, PreludeEnd::BlockClose);
            }
            ';' if paren_depth == 0 => {
                *position += 1;
                return (text, PreludeEnd::Semicolon);
            }
            _ => {}
        }
        text.push(character);
        *position += 1;
    }
    (text, PreludeEnd::Eof)
}

/// Consume the raw text of a block, starting just inside `{`, up to and
/// including the matching `}`.
fn read_block_text(chars: &[char], position: &mut usize) -> Result<String, CssParseError> {
    let mut text = String::new();
    let mut brace_depth = 0usize;
    while *position < chars.len() {
        let character = chars[*position];
        match character {
            '/' if peek(chars, *position + 1) == Some('*') => {
                skip_comment(chars, position);
                continue;
            }
            '"' | '\'' => {
                text.push_str(&read_string(chars, position));
                continue;
            }
            '{' => brace_depth += 1,
            '}' => {
                if brace_depth == 0 {
                    *position += 1;
                    return Ok(text);
                }
                brace_depth -= 1;
            }
            _ => {}
        }
        text.push(character);
        *position += 1;
    }
    Err(CssParseError::UnbalancedBraces)
}

fn read_string(chars: &[char], position: &mut usize) -> String {
    let quote = chars[*position];
    let mut text = String::new();
    text.push(quote);
    *position += 1;
    while *position < chars.len() {
        let character = chars[*position];
        text.push(character);
        *position += 1;
        if character == '\\' {
            if let Some(escaped) = peek(chars, *position) {
                text.push(escaped);
                *position += 1;
            }
            continue;
        }
        if character == quote {
            break;
        }
    }
    text
}

fn skip_comment(chars: &[char], position: &mut usize) {
    *position += 2;
    while *position < chars.len() {
        if chars[*position] == '*' && peek(chars, *position + 1) == Some('/') {
            *position += 2;
            return;
        }
        *position += 1;
    }
}

fn skip_whitespace(chars: &[char], position: &mut usize) {
    while *position < chars.len() && chars[*position].is_whitespace() {
        *position += 1;
    }
}

fn peek(chars: &[char], position: usize) -> Option<char> {
    chars.get(position).copied()
}

/// Split on `separator` occurrences that sit outside strings, comments and
/// parentheses.
fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut position = 0;
    let mut paren_depth = 0usize;
    while position < chars.len() {
        let character = chars[position];
        match character {
            '/' if peek(&chars, position + 1) == Some('*') => {
                skip_comment(&chars, &mut position);
                continue;
            }
            '"' | '\'' => {
                current.push_str(&read_string(&chars, &mut position));
                continue;
            }
            '(' | '[' => paren_depth += 1,
            ')' | ']' => paren_depth = paren_depth.saturating_sub(1),
            _ => {}
        }
        if character == separator && paren_depth == 0 {
            pieces.push(std::mem::take(&mut current));
        } else {
            current.push(character);
        }
        position += 1;
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Index of the first `needle` outside strings and parentheses.
fn find_top_level(text: &str, needle: char) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut position = 0;
    let mut byte_offset = 0;
    let mut paren_depth = 0usize;
    while position < chars.len() {
        let character = chars[position];
        match character {
            '"' | '\'' => {
                let literal = read_string(&chars, &mut position);
                byte_offset += literal.len();
                continue;
            }
            '(' | '[' => paren_depth += 1,
            ')' | ']' => paren_depth = paren_depth.saturating_sub(1),
            _ => {}
        }
        if character == needle && paren_depth == 0 {
            return Some(byte_offset);
        }
        byte_offset += character.len_utf8();
        position += 1;
    }
    None
}

/// Break a declaration value into tokens, lifting `url()` and `var()` out
/// of the raw text.
pub(super) fn tokenize_value(text: &str) -> Vec<ValueToken> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut raw = String::new();
    let mut position = 0;
    while position < chars.len() {
        let character = chars[position];
        if character == '"' || character == '\'' {
            raw.push_str(&read_string(&chars, &mut position));
            continue;
        }
        if let Some(url) = try_read_function(&chars, &mut position, "url", &raw) {
            flush_raw(&mut tokens, &mut raw);
            tokens.push(ValueToken::Url(unquote(url.trim())));
            continue;
        }
        if let Some(inner) = try_read_function(&chars, &mut position, "var", &raw) {
            flush_raw(&mut tokens, &mut raw);
            tokens.push(ValueToken::Var(inner.trim().to_string()));
            continue;
        }
        raw.push(character);
        position += 1;
    }
    flush_raw(&mut tokens, &mut raw);
    tokens
}

fn try_read_function(
    chars: &[char],
    position: &mut usize,
    name: &str,
    raw_so_far: &str,
) -> Option<String> {
    // Only match at an identifier boundary, so `format(` never swallows a
    // `url(` lookalike inside a longer name.
    if let Some(previous) = raw_so_far.chars().last() {
        if previous.is_alphanumeric() || previous == '-' || previous == '_' {
            return None;
        }
    }
    let name_chars: Vec<char> = name.chars().collect();
    for (offset, expected) in name_chars.iter().enumerate() {
        let found = peek(chars, *position + offset)?;
        if !found.eq_ignore_ascii_case(expected) {
            return None;
        }
    }
    if peek(chars, *position + name_chars.len()) != Some('(') {
        return None;
    }
    let mut cursor = *position + name_chars.len() + 1;
    let mut inner = String::new();
    let mut paren_depth = 0usize;
    while cursor < chars.len() {
        let character = chars[cursor];
        if character == '"' || character == '\'' {
            inner.push_str(&read_string(chars, &mut cursor));
            continue;
        }
        match character {
            '(' => paren_depth += 1,
            ')' => {
                if paren_depth == 0 {
                    *position = cursor + 1;
                    return Some(inner);
                }
                paren_depth -= 1;
            }
            _ => {}
        }
        inner.push(character);
        cursor += 1;
    }
    None
}

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 {
        let first = trimmed.chars().next().unwrap_or_default();
        let last = trimmed.chars().last().unwrap_or_default();
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn flush_raw(tokens: &mut Vec<ValueToken>, raw: &mut String) {
    if !raw.is_empty() {
        tokens.push(ValueToken::Raw(std::mem::take(raw)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_rule_roundtrip() {
        let sheet = parse_stylesheet("div { color: red; }").unwrap();
        assert_eq!(sheet.generate(), "div{color:red}");
    }

    #[test]
    fn url_tokens_are_lifted() {
        let sheet = parse_stylesheet("div{background:center url('a.png') no-repeat}").unwrap();
        let Rule::Style(rule) = sheet.rules.get(0).unwrap() else {
            panic!("expected style rule");
        };
        let declaration = rule.declarations.get(0).unwrap();
        assert!(declaration.value.iter().any(|token| matches!(
            token,
            ValueToken::Url(url) if url == "a.png"
        )));
        assert_eq!(declaration.value_text(), "center url(\"a.png\") no-repeat");
    }

    #[test]
    fn media_groups_nest() {
        let sheet =
            parse_stylesheet("@media print{p{display:none}}@charset \"utf-8\";").unwrap();
        assert!(matches!(sheet.rules.get(0), Some(Rule::Group(group)) if group.name == "media"));
        assert!(matches!(
            sheet.rules.get(1),
            Some(Rule::Statement(statement)) if statement.name == "charset"
        ));
    }

    #[test]
    fn font_face_is_a_declaration_block() {
        let sheet = parse_stylesheet(
            "@font-face{font-family:'X';src:url(x.woff2) format('woff2')}",
        )
        .unwrap();
        let Some(Rule::DeclarationBlock(block)) = sheet.rules.get(0) else {
            panic!("expected declaration block");
        };
        assert_eq!(block.name, "font-face");
        assert_eq!(block.declarations.len(), 2);
    }

    #[test]
    fn important_is_detected() {
        let declarations = parse_declarations("color: red !important; margin: 0");
        let first = declarations.get(0).unwrap();
        assert!(first.important);
        assert_eq!(first.value_text(), "red");
        assert!(!declarations.get(1).unwrap().important);
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert_eq!(
            parse_stylesheet("div{color:red").unwrap_err(),
            CssParseError::UnbalancedBraces
        );
        assert_eq!(
            parse_stylesheet("}").unwrap_err(),
            CssParseError::UnexpectedClosingBrace
        );
    }

    #[test]
    fn semicolons_inside_strings_do_not_split() {
        let declarations = parse_declarations("content:'a;b';color:red");
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations.get(0).unwrap().value_text(), "'a;b'");
    }

    #[test]
    fn keyframes_parse_as_groups() {
        let sheet = parse_stylesheet("@keyframes spin{0%{opacity:0}100%{opacity:1}}").unwrap();
        let Some(Rule::Group(group)) = sheet.rules.get(0) else {
            panic!("expected group");
        };
        assert_eq!(group.prelude, "spin");
        assert_eq!(group.rules.len(), 2);
    }
}
