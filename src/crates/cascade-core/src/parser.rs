//! Recursive-descent parser producing a [`Graph`] from pipeline source.
//!
//! Handles graph/node/edge attribute blocks, chained edges
//! (`a -> b -> c [attrs]` yields one edge per hop, each with the same
//! explicit attributes), and subgraphs with scoped default frames. Inside a
//! subgraph, a top-level `label = "…"` becomes the subgraph label and a class
//! derived from it is auto-applied to contained nodes that did not set
//! `class` themselves.

use crate::error::{PipelineError, Result};
use crate::graph::{parse_duration_str, AttrValue, Edge, Graph, Node, Subgraph};
use crate::lexer::{tokenize, Token, TokenKind};
use std::collections::HashMap;

/// Parse pipeline source into a [`Graph`].
pub fn parse(source: &str) -> Result<Graph> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_graph()
}

/// Scoped default frame: node defaults and edge defaults.
#[derive(Debug, Clone, Default)]
struct DefaultsFrame {
    node: HashMap<String, AttrValue>,
    edge: HashMap<String, AttrValue>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    frames: Vec<DefaultsFrame>,
    /// Stack of open subgraph indexes into `graph.subgraphs`.
    open_subgraphs: Vec<usize>,
    anon_subgraphs: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            frames: vec![DefaultsFrame::default()],
            open_subgraphs: Vec::new(),
            anon_subgraphs: 0,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> PipelineError {
        let token = self.peek();
        PipelineError::parse(token.line, token.column, message)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if &self.peek().kind == kind {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {kind:?}, found {:?}", self.peek().kind)))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn frame(&self) -> &DefaultsFrame {
        self.frames.last().expect("frame stack is never empty")
    }

    fn frame_mut(&mut self) -> &mut DefaultsFrame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    fn parse_graph(mut self) -> Result<Graph> {
        self.expect(&TokenKind::Digraph)?;
        let id = match self.bump() {
            Token {
                kind: TokenKind::Ident(name),
                ..
            } => name,
            Token {
                kind: TokenKind::Str(name),
                ..
            } => name,
            token => {
                return Err(PipelineError::parse(
                    token.line,
                    token.column,
                    "expected graph identifier after 'digraph'",
                ))
            }
        };
        let mut graph = Graph::new(id);
        self.expect(&TokenKind::LBrace)?;
        self.parse_statements(&mut graph)?;
        self.expect(&TokenKind::RBrace)?;
        if self.peek().kind != TokenKind::Eof {
            return Err(self.error_here("trailing input after graph body"));
        }
        Ok(graph)
    }

    fn parse_statements(&mut self, graph: &mut Graph) -> Result<()> {
        loop {
            match &self.peek().kind {
                TokenKind::RBrace | TokenKind::Eof => return Ok(()),
                TokenKind::Semicolon => {
                    self.bump();
                }
                TokenKind::GraphKw => {
                    self.bump();
                    let attrs = self.parse_attr_block()?;
                    self.apply_scope_attrs(graph, attrs);
                }
                TokenKind::NodeKw => {
                    self.bump();
                    let attrs = self.parse_attr_block()?;
                    self.frame_mut().node.extend(attrs);
                }
                TokenKind::EdgeKw => {
                    self.bump();
                    let attrs = self.parse_attr_block()?;
                    self.frame_mut().edge.extend(attrs);
                }
                TokenKind::Subgraph => self.parse_subgraph(graph)?,
                TokenKind::Ident(_) | TokenKind::Str(_) => self.parse_node_or_edge(graph)?,
                other => {
                    let message = format!("unexpected token {other:?}");
                    return Err(self.error_here(message));
                }
            }
        }
    }

    /// Apply a `graph [...]` block or bare `key = value` at the current
    /// scope. At subgraph scope, `label` is captured on the subgraph.
    fn apply_scope_attrs(&mut self, graph: &mut Graph, attrs: Vec<(String, AttrValue)>) {
        if let Some(&idx) = self.open_subgraphs.last() {
            let sg = &mut graph.subgraphs[idx];
            for (key, value) in attrs {
                if key == "label" {
                    sg.label = Some(value.to_text());
                } else {
                    sg.attrs.insert(key, value);
                }
            }
        } else {
            for (key, value) in attrs {
                graph.attrs.insert(key, value);
            }
        }
    }

    fn parse_subgraph(&mut self, graph: &mut Graph) -> Result<()> {
        self.expect(&TokenKind::Subgraph)?;
        let id = match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                name
            }
            TokenKind::Str(name) => {
                let name = name.clone();
                self.bump();
                name
            }
            _ => {
                self.anon_subgraphs += 1;
                format!("subgraph_{}", self.anon_subgraphs)
            }
        };
        self.expect(&TokenKind::LBrace)?;

        // Fresh frame inheriting the parent's defaults.
        let inherited = self.frame().clone();
        self.frames.push(inherited);
        graph.subgraphs.push(Subgraph {
            id,
            ..Default::default()
        });
        self.open_subgraphs.push(graph.subgraphs.len() - 1);

        self.parse_statements(graph)?;
        self.expect(&TokenKind::RBrace)?;

        let frame = self.frames.pop().expect("subgraph frame");
        let idx = self.open_subgraphs.pop().expect("open subgraph");
        let sg = &mut graph.subgraphs[idx];
        sg.node_defaults = frame.node;
        sg.edge_defaults = frame.edge;

        // Auto-apply the label-derived class to contained nodes.
        if let Some(class) = sg.derived_class() {
            let node_ids = sg.node_ids.clone();
            for node_id in node_ids {
                if let Some(node) = graph.node_mut(&node_id) {
                    node.set_default_attr("class", AttrValue::String(class.clone()));
                }
            }
        }
        Ok(())
    }

    fn parse_node_or_edge(&mut self, graph: &mut Graph) -> Result<()> {
        let first = self.parse_name()?;

        // Bare `key = value` at graph or subgraph scope.
        if self.eat(&TokenKind::Equals) {
            let value = self.parse_value()?;
            self.apply_scope_attrs(graph, vec![(first, value)]);
            return Ok(());
        }

        if self.peek().kind == TokenKind::Arrow {
            let mut chain = vec![first];
            while self.eat(&TokenKind::Arrow) {
                chain.push(self.parse_name()?);
            }
            let attrs = if self.peek().kind == TokenKind::LBracket {
                self.parse_attr_block()?
            } else {
                Vec::new()
            };
            for endpoint in &chain {
                self.ensure_node(graph, endpoint);
            }
            let edge_defaults = self.frame().edge.clone();
            for pair in chain.windows(2) {
                let mut edge = Edge::new(pair[0].clone(), pair[1].clone());
                for (key, value) in &attrs {
                    edge.set_explicit_attr(key.clone(), value.clone());
                }
                for (key, value) in &edge_defaults {
                    edge.set_default_attr(key.clone(), value.clone());
                }
                graph.add_edge(edge);
            }
            return Ok(());
        }

        // Node declaration with optional attribute block.
        let attrs = if self.peek().kind == TokenKind::LBracket {
            self.parse_attr_block()?
        } else {
            Vec::new()
        };
        self.ensure_node(graph, &first);
        let node_defaults = self.frame().node.clone();
        let node = graph
            .node_mut(&first)
            .expect("node was just ensured to exist");
        for (key, value) in attrs {
            node.set_explicit_attr(key, value);
        }
        for (key, value) in node_defaults {
            node.set_default_attr(key, value);
        }
        Ok(())
    }

    /// Create the node if missing, applying the active default frame and
    /// recording subgraph membership.
    fn ensure_node(&mut self, graph: &mut Graph, id: &str) {
        if !graph.has_node(id) {
            let mut node = Node::new(id);
            for (key, value) in &self.frame().node {
                node.set_default_attr(key.clone(), value.clone());
            }
            graph.add_node(node);
            if let Some(&idx) = self.open_subgraphs.last() {
                graph.subgraphs[idx].node_ids.push(id.to_string());
            }
        }
    }

    fn parse_name(&mut self) -> Result<String> {
        match self.bump() {
            Token {
                kind: TokenKind::Ident(name),
                ..
            } => Ok(name),
            Token {
                kind: TokenKind::Str(name),
                ..
            } => Ok(name),
            token => Err(PipelineError::parse(
                token.line,
                token.column,
                format!("expected identifier, found {:?}", token.kind),
            )),
        }
    }

    fn parse_attr_block(&mut self) -> Result<Vec<(String, AttrValue)>> {
        self.expect(&TokenKind::LBracket)?;
        let mut attrs = Vec::new();
        loop {
            if self.eat(&TokenKind::RBracket) {
                return Ok(attrs);
            }
            let key = self.parse_name()?;
            self.expect(&TokenKind::Equals)?;
            let value = self.parse_value()?;
            attrs.push((key, value));
            // Separators between attributes are optional.
            while self.eat(&TokenKind::Comma) || self.eat(&TokenKind::Semicolon) {}
        }
    }

    fn parse_value(&mut self) -> Result<AttrValue> {
        match self.bump() {
            Token {
                kind: TokenKind::Str(s),
                ..
            } => Ok(AttrValue::String(s)),
            Token {
                kind: TokenKind::Int(i),
                ..
            } => Ok(AttrValue::Integer(i)),
            Token {
                kind: TokenKind::Float(f),
                ..
            } => Ok(AttrValue::Float(f)),
            Token {
                kind: TokenKind::Ident(word),
                ..
            } => Ok(coerce_bareword(word)),
            token => Err(PipelineError::parse(
                token.line,
                token.column,
                format!("expected attribute value, found {:?}", token.kind),
            )),
        }
    }
}

/// Coerce an unquoted value: duration, boolean, otherwise string.
fn coerce_bareword(word: String) -> AttrValue {
    if let Some(duration) = parse_duration_str(&word) {
        return AttrValue::Duration(duration);
    }
    match word.as_str() {
        "true" => AttrValue::Boolean(true),
        "false" => AttrValue::Boolean(false),
        _ => AttrValue::String(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_minimal_graph() {
        let graph = parse(
            r#"digraph X {
                graph [goal="G"]
                s [shape=entry]; t [prompt="P"]; e [shape=terminal];
                s -> t -> e
            }"#,
        )
        .unwrap();

        assert_eq!(graph.id, "X");
        assert_eq!(graph.goal(), Some("G"));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].from, "s");
        assert_eq!(graph.edges[0].to, "t");
        assert_eq!(graph.edges[1].from, "t");
        assert_eq!(graph.edges[1].to, "e");
        assert_eq!(graph.node("t").unwrap().prompt(), Some("P"));
    }

    #[test]
    fn test_chained_edge_shares_explicit_attrs() {
        let graph = parse(
            r#"digraph X {
                a -> b -> c [condition="outcome=success", weight=3]
            }"#,
        )
        .unwrap();
        assert_eq!(graph.edges.len(), 2);
        for edge in &graph.edges {
            assert_eq!(edge.condition(), "outcome=success");
            assert_eq!(edge.weight(), 3);
            assert!(edge.explicit_keys.contains("condition"));
        }
    }

    #[test]
    fn test_node_defaults_scoped_to_subgraph() {
        let graph = parse(
            r#"digraph X {
                node [max_retries=1]
                outer [shape=entry]
                subgraph review {
                    node [max_retries=5]
                    inner
                }
                after
                outer -> inner -> after
            }"#,
        )
        .unwrap();
        assert_eq!(graph.node("outer").unwrap().max_retries(), Some(1));
        assert_eq!(graph.node("inner").unwrap().max_retries(), Some(5));
        // Subgraph frame popped: `after` sees the outer default again.
        assert_eq!(graph.node("after").unwrap().max_retries(), Some(1));
    }

    #[test]
    fn test_subgraph_label_captured_and_class_derived() {
        let graph = parse(
            r#"digraph X {
                subgraph cluster_review {
                    label = "Code Review"
                    r1; r2 [class="custom"]
                }
            }"#,
        )
        .unwrap();
        let sg = &graph.subgraphs[0];
        assert_eq!(sg.label.as_deref(), Some("Code Review"));
        // Label does not leak to graph attributes.
        assert!(!graph.attrs.contains_key("label"));
        assert_eq!(graph.node("r1").unwrap().class(), Some("code-review"));
        // Explicit class is preserved.
        assert_eq!(graph.node("r2").unwrap().class(), Some("custom"));
    }

    #[test]
    fn test_explicit_attr_overrides_default() {
        let graph = parse(
            r#"digraph X {
                node [fidelity="compact"]
                a [fidelity="full"]
                b
            }"#,
        )
        .unwrap();
        assert_eq!(
            graph.node("a").unwrap().attrs.get("fidelity").unwrap().as_str(),
            Some("full")
        );
        assert!(graph.node("a").unwrap().explicit_keys.contains("fidelity"));
        assert_eq!(
            graph.node("b").unwrap().attrs.get("fidelity").unwrap().as_str(),
            Some("compact")
        );
        assert!(!graph.node("b").unwrap().explicit_keys.contains("fidelity"));
    }

    #[test]
    fn test_value_coercion() {
        let graph = parse(
            r#"digraph X {
                n [timeout=90s, retries=3, ratio=0.5, gate=true, name=plain]
            }"#,
        )
        .unwrap();
        let node = graph.node("n").unwrap();
        assert_eq!(
            node.attrs.get("timeout"),
            Some(&AttrValue::Duration(Duration::from_secs(90)))
        );
        assert_eq!(node.attrs.get("retries"), Some(&AttrValue::Integer(3)));
        assert_eq!(node.attrs.get("ratio"), Some(&AttrValue::Float(0.5)));
        assert_eq!(node.attrs.get("gate"), Some(&AttrValue::Boolean(true)));
        assert_eq!(
            node.attrs.get("name"),
            Some(&AttrValue::String("plain".into()))
        );
    }

    #[test]
    fn test_bare_graph_scope_kv() {
        let graph = parse(r#"digraph X { goal = "Ship" }"#).unwrap();
        assert_eq!(graph.goal(), Some("Ship"));
    }

    #[test]
    fn test_edge_defaults_applied() {
        let graph = parse(
            r#"digraph X {
                edge [fidelity="truncate"]
                a -> b
                c -> d [fidelity="full"]
            }"#,
        )
        .unwrap();
        assert_eq!(graph.edges[0].attrs.get("fidelity").unwrap().as_str(), Some("truncate"));
        assert_eq!(graph.edges[1].attrs.get("fidelity").unwrap().as_str(), Some("full"));
    }

    #[test]
    fn test_unexpected_token_is_error() {
        assert!(parse("graph X { a }").is_err());
        assert!(parse("digraph X { a -> }").is_err());
        assert!(parse("digraph X { a [x] }").is_err());
    }
}
