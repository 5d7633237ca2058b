//! Shared test helpers for integration tests

use cinnabar::ast::{printer, Node};

/// Render a node and collapse whitespace runs to single spaces, so tests
/// can assert on fragments without caring about indentation
pub fn render_flat(node: &Node) -> String {
    let text = printer::render(node).expect("render failed");
    normalize(&text)
}

/// Collapse whitespace runs to single spaces
#[allow(dead_code)]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
