//! CSS syntax tree.
//!
//! A deliberately small model: enough structure for the pipeline to walk
//! rules, rewrite `url()` tokens in place, drop unused rules and serialize
//! back to text. Rules and declarations live in a [`NodeSeq`], an ordered
//! sequence with stable indices and O(1) removal, so a traversal can
//! collect indices first and remove entries without invalidating anything
//! it still holds.

mod parser;

pub use parser::{CssParseError, parse_declarations, parse_stylesheet};

/// Ordered node sequence with tombstone removal. Indices handed out by
/// [`NodeSeq::indices`] stay valid across removals; removed slots are
/// skipped by iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSeq<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for NodeSeq<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> NodeSeq<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn push(&mut self, value: T) {
        self.slots.push(Some(value));
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// O(1); the slot is tombstoned, later indices are unaffected.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (index, value)))
    }

    /// Snapshot of the occupied indices, for traversals that remove.
    pub fn indices(&self) -> Vec<usize> {
        self.iter().map(|(index, _)| index).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> FromIterator<T> for NodeSeq<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self { slots: iter.into_iter().map(Some).collect() }
    }
}

/// One component of a declaration value. `url()` and `var()` occurrences
/// are first-class so the inliner can rewrite them in place; everything
/// else is verbatim text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueToken {
    Url(String),
    Var(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: Vec<ValueToken>,
    pub important: bool,
}

impl Declaration {
    /// The serialized value text, without property name or priority.
    pub fn value_text(&self) -> String {
        let mut text = String::new();
        for token in &self.value {
            match token {
                ValueToken::Url(url) => {
                    text.push_str("url(\"");
                    text.push_str(&url.replace('\\', "\\\\").replace('"', "\\\""));
                    text.push_str("\")");
                }
                ValueToken::Var(inner) => {
                    text.push_str("var(");
                    text.push_str(inner);
                    text.push(')');
                }
                ValueToken::Raw(raw) => text.push_str(raw),
            }
        }
        text
    }
}

/// A selector-qualified rule: `prelude { declarations }`.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub prelude: String,
    pub declarations: NodeSeq<Declaration>,
}

/// A grouping at-rule with nested rules: `@media`, `@supports`, …
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRule {
    pub name: String,
    pub prelude: String,
    pub rules: NodeSeq<Rule>,
}

/// An at-rule whose block holds declarations: `@font-face`, `@page`, …
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationBlockRule {
    pub name: String,
    pub prelude: String,
    pub declarations: NodeSeq<Declaration>,
}

/// A blockless at-rule: `@charset`, `@namespace`, unresolved `@import`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRule {
    pub name: String,
    pub prelude: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Style(StyleRule),
    Group(GroupRule),
    DeclarationBlock(DeclarationBlockRule),
    Statement(StatementRule),
    /// Unparseable or non-standard fragment, preserved verbatim.
    Raw(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: NodeSeq<Rule>,
}

/// Address of one value token inside a stylesheet: the path of rule
/// indices (groups then the final declaration-bearing rule), then the
/// declaration and token indices. Stable across tombstone removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLoc {
    pub rule_path: Vec<usize>,
    pub declaration: usize,
    pub token: usize,
}

impl Stylesheet {
    pub fn generate(&self) -> String {
        generate_rules(&self.rules)
    }

    /// Mutable access to the token addressed by `loc`.
    pub fn token_mut(&mut self, loc: &TokenLoc) -> Option<&mut ValueToken> {
        let mut rules = &mut self.rules;
        let (last, groups) = loc.rule_path.split_last()?;
        for index in groups {
            match rules.get_mut(*index)? {
                Rule::Group(group) => rules = &mut group.rules,
                _ => return None,
            }
        }
        let declarations = match rules.get_mut(*last)? {
            Rule::Style(rule) => &mut rule.declarations,
            Rule::DeclarationBlock(rule) => &mut rule.declarations,
            _ => return None,
        };
        declarations.get_mut(loc.declaration)?.value.get_mut(loc.token)
    }
}

pub fn generate_rules(rules: &NodeSeq<Rule>) -> String {
    let mut text = String::new();
    for (_, rule) in rules.iter() {
        match rule {
            Rule::Style(style) => {
                text.push_str(&style.prelude);
                text.push('{');
                text.push_str(&generate_declarations(&style.declarations));
                text.push('}');
            }
            Rule::Group(group) => {
                push_at_prelude(&mut text, &group.name, &group.prelude);
                text.push('{');
                text.push_str(&generate_rules(&group.rules));
                text.push('}');
            }
            Rule::DeclarationBlock(block) => {
                push_at_prelude(&mut text, &block.name, &block.prelude);
                text.push('{');
                text.push_str(&generate_declarations(&block.declarations));
                text.push('}');
            }
            Rule::Statement(statement) => {
                push_at_prelude(&mut text, &statement.name, &statement.prelude);
                text.push(';');
            }
            Rule::Raw(raw) => {
                text.push_str(raw);
                text.push('\n');
            }
        }
    }
    text
}

pub fn generate_declarations(declarations: &NodeSeq<Declaration>) -> String {
    let mut parts = Vec::new();
    for (_, declaration) in declarations.iter() {
        let mut part = String::new();
        part.push_str(&declaration.property);
        part.push(':');
        part.push_str(&declaration.value_text());
        if declaration.important {
            part.push_str(" !important");
        }
        parts.push(part);
    }
    parts.join(";")
}

fn push_at_prelude(text: &mut String, name: &str, prelude: &str) {
    text.push('@');
    text.push_str(name);
    if !prelude.is_empty() {
        text.push(' ');
        text.push_str(prelude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_seq_indices_survive_removal() {
        let mut seq: NodeSeq<u32> = [10, 20, 30].into_iter().collect();
        let indices = seq.indices();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(seq.remove(1), Some(20));
        assert_eq!(seq.get(2), Some(&30));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![10, 30]);
    }

    #[test]
    fn declaration_value_serialization() {
        let declaration = Declaration {
            property: "background".into(),
            value: vec![
                ValueToken::Raw("center ".into()),
                ValueToken::Url("http://x/a.png".into()),
            ],
            important: true,
        };
        assert_eq!(declaration.value_text(), "center url(\"http://x/a.png\")");
        let seq: NodeSeq<Declaration> = [declaration].into_iter().collect();
        assert_eq!(
            generate_declarations(&seq),
            "background:center url(\"http://x/a.png\") !important"
        );
    }

    #[test]
    fn token_mut_navigates_groups() {
        let mut sheet = parse_stylesheet("@media screen{div{background:url(a.png)}}").unwrap();
        let loc = TokenLoc { rule_path: vec![0, 0], declaration: 0, token: 0 };
        match sheet.token_mut(&loc) {
            Some(token @ ValueToken::Url(_)) => *token = ValueToken::Var("--sf-img-1".into()),
            other => panic!("unexpected token {other:?}"),
        }
        assert_eq!(sheet.generate(), "@media screen{div{background:var(--sf-img-1)}}");
    }
}
