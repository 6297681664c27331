//! Model stylesheets — CSS-like LLM routing rules.
//!
//! A graph may carry a `model_stylesheet` attribute assigning models,
//! providers, and reasoning effort to nodes by selector:
//!
//! ```text
//! * { llm_model: gpt-5.2; }
//! .review { llm_model: claude-opus-4.6; reasoning_effort: high; }
//! #fix_bugs { llm_provider: anthropic; }
//! ```
//!
//! Selectors are `*` (all nodes), `.class` (nodes with that class tag), and
//! `#node_id`. Rules apply in specificity order (`*`, then `.class`, then
//! `#id`), and never overwrite attributes the author set explicitly.

use crate::error::{PipelineError, Result};
use crate::graph::{AttrValue, Graph};

/// A stylesheet selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Class(String),
    Id(String),
}

impl Selector {
    fn specificity(&self) -> u8 {
        match self {
            Selector::All => 0,
            Selector::Class(_) => 1,
            Selector::Id(_) => 2,
        }
    }
}

/// A `key: value;` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub key: String,
    pub value: String,
}

/// One `selector { declarations }` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
}

/// A parsed stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

/// Parse stylesheet source.
pub fn parse_stylesheet(source: &str) -> Result<Stylesheet> {
    let mut rules = Vec::new();
    let mut rest = source.trim();
    while !rest.is_empty() {
        let open = rest.find('{').ok_or_else(|| {
            PipelineError::Validation(format!("stylesheet: expected '{{' near '{}'", excerpt(rest)))
        })?;
        let selector_text = rest[..open].trim();
        let selector = parse_selector(selector_text)?;
        let close = rest[open..].find('}').ok_or_else(|| {
            PipelineError::Validation(format!(
                "stylesheet: unclosed rule for selector '{selector_text}'"
            ))
        })? + open;
        let body = &rest[open + 1..close];
        let declarations = parse_declarations(body, selector_text)?;
        rules.push(Rule {
            selector,
            declarations,
        });
        rest = rest[close + 1..].trim_start();
    }
    Ok(Stylesheet { rules })
}

fn parse_selector(text: &str) -> Result<Selector> {
    if text == "*" {
        Ok(Selector::All)
    } else if let Some(class) = text.strip_prefix('.') {
        if class.is_empty() {
            return Err(PipelineError::Validation(
                "stylesheet: empty class selector".to_string(),
            ));
        }
        Ok(Selector::Class(class.to_string()))
    } else if let Some(id) = text.strip_prefix('#') {
        if id.is_empty() {
            return Err(PipelineError::Validation(
                "stylesheet: empty id selector".to_string(),
            ));
        }
        Ok(Selector::Id(id.to_string()))
    } else {
        Err(PipelineError::Validation(format!(
            "stylesheet: invalid selector '{text}'"
        )))
    }
}

fn parse_declarations(body: &str, selector: &str) -> Result<Vec<Declaration>> {
    let mut declarations = Vec::new();
    for line in body.split(';') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            PipelineError::Validation(format!(
                "stylesheet: malformed declaration '{line}' in rule '{selector}'"
            ))
        })?;
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        if key.is_empty() || value.is_empty() {
            return Err(PipelineError::Validation(format!(
                "stylesheet: malformed declaration '{line}' in rule '{selector}'"
            )));
        }
        declarations.push(Declaration {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(declarations)
}

fn excerpt(text: &str) -> String {
    text.chars().take(24).collect()
}

/// Apply a stylesheet to a graph. Rules run in ascending specificity so an
/// `#id` rule beats a `.class` rule which beats `*`; explicit node
/// attributes always win.
pub fn apply_stylesheet(graph: &mut Graph, stylesheet: &Stylesheet) {
    let mut ordered: Vec<&Rule> = stylesheet.rules.iter().collect();
    ordered.sort_by_key(|rule| rule.selector.specificity());

    let node_ids: Vec<String> = graph.node_ids().to_vec();
    for rule in ordered {
        for node_id in &node_ids {
            let node = match graph.node_mut(node_id) {
                Some(n) => n,
                None => continue,
            };
            let matches = match &rule.selector {
                Selector::All => true,
                Selector::Class(class) => node.class() == Some(class.as_str()),
                Selector::Id(id) => &node.id == id,
            };
            if !matches {
                continue;
            }
            for decl in &rule.declarations {
                if node.explicit_keys.contains(&decl.key) {
                    continue;
                }
                node.attrs
                    .insert(decl.key.clone(), AttrValue::String(decl.value.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const SHEET: &str = r#"
        * { llm_model: base-model; }
        .review { llm_model: review-model; reasoning_effort: high; }
        #special { llm_provider: anthropic; }
    "#;

    #[test]
    fn test_parse_stylesheet() {
        let sheet = parse_stylesheet(SHEET).unwrap();
        assert_eq!(sheet.rules.len(), 3);
        assert_eq!(sheet.rules[0].selector, Selector::All);
        assert_eq!(sheet.rules[1].selector, Selector::Class("review".into()));
        assert_eq!(sheet.rules[2].selector, Selector::Id("special".into()));
        assert_eq!(sheet.rules[1].declarations.len(), 2);
    }

    #[test]
    fn test_specificity_and_explicit_precedence() {
        let mut graph = parse(
            r#"digraph X {
                plain
                reviewed [class="review"]
                special
                pinned [llm_model="pinned-model"]
            }"#,
        )
        .unwrap();
        let sheet = parse_stylesheet(SHEET).unwrap();
        apply_stylesheet(&mut graph, &sheet);

        assert_eq!(graph.node("plain").unwrap().llm_model(), Some("base-model"));
        assert_eq!(
            graph.node("reviewed").unwrap().llm_model(),
            Some("review-model")
        );
        assert_eq!(
            graph.node("reviewed").unwrap().reasoning_effort(),
            Some("high")
        );
        assert_eq!(
            graph.node("special").unwrap().llm_provider(),
            Some("anthropic")
        );
        // The `*` rule still reaches #special for keys its rule leaves unset.
        assert_eq!(graph.node("special").unwrap().llm_model(), Some("base-model"));
        // Explicit author attribute is never overwritten.
        assert_eq!(graph.node("pinned").unwrap().llm_model(), Some("pinned-model"));
    }

    #[test]
    fn test_malformed_stylesheets() {
        assert!(parse_stylesheet("* { llm_model }").is_err());
        assert!(parse_stylesheet("review { x: y; }").is_err());
        assert!(parse_stylesheet("* { x: y; ").is_err());
        assert!(parse_stylesheet(". { x: y; }").is_err());
    }

    #[test]
    fn test_empty_stylesheet() {
        assert!(parse_stylesheet("").unwrap().rules.is_empty());
    }
}
