//! Renderer from synthesized trees to JavaScript text
//!
//! This is the crate's observation point: generated fragments expand their
//! substitution maps here, and label references resolve to the case indices
//! assigned during finalization. The output is deterministic for a given
//! tree, which is what the snapshot-style tests rely on.

use rustc_hash::FxHashMap;

use super::{FunctionKind, Node, NodeKind};
use crate::error::{Error, Result};

/// Configuration options for rendering
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Indentation unit for nested statements
    pub indent: String,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            indent: "    ".to_string(),
        }
    }
}

/// Render a node with default options
pub fn render(node: &Node) -> Result<String> {
    render_with_options(node, &PrintOptions::default())
}

/// Render a node with the given options
pub fn render_with_options(node: &Node, options: &PrintOptions) -> Result<String> {
    let mut printer = Printer::new(options);
    if is_statement_position(node) {
        printer.write_statement(node)?;
    } else {
        printer.write_expression(node)?;
    }
    Ok(printer.out)
}

/// Render a node in expression position (no trailing newline or semicolon)
pub fn render_expression(node: &Node, options: &PrintOptions) -> Result<String> {
    let mut printer = Printer::new(options);
    printer.write_expression(node)?;
    Ok(printer.out)
}

fn is_statement_position(node: &Node) -> bool {
    node.is_statement()
        || matches!(
            node.kind(),
            NodeKind::CaseClause { .. } | NodeKind::Generated { .. }
        )
}

struct Printer<'a> {
    out: String,
    depth: usize,
    options: &'a PrintOptions,
}

impl<'a> Printer<'a> {
    fn new(options: &'a PrintOptions) -> Self {
        Self {
            out: String::new(),
            depth: 0,
            options,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(&self.options.indent);
        }
    }

    fn write_statement(&mut self, node: &Node) -> Result<()> {
        match node.kind() {
            NodeKind::ExpressionStatement(expression) => {
                self.indent();
                self.write_expression(expression)?;
                self.out.push_str(";\n");
            }
            NodeKind::ReturnStatement(argument) => {
                self.indent();
                self.out.push_str("return");
                if let Some(argument) = argument {
                    self.out.push(' ');
                    self.write_expression(argument)?;
                }
                self.out.push_str(";\n");
            }
            NodeKind::ThrowStatement(argument) => {
                self.indent();
                self.out.push_str("throw ");
                self.write_expression(argument)?;
                self.out.push_str(";\n");
            }
            NodeKind::IfStatement {
                condition,
                then_branch,
            } => {
                self.indent();
                self.out.push_str("if (");
                self.write_expression(condition)?;
                self.out.push_str(") {\n");
                self.depth += 1;
                self.write_statement(then_branch)?;
                self.depth -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            NodeKind::Block(statements) => {
                self.indent();
                self.out.push_str("{\n");
                self.depth += 1;
                for statement in statements {
                    self.write_statement(statement)?;
                }
                self.depth -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            NodeKind::VariableStatement(declarations) => {
                self.indent();
                self.out.push_str("var ");
                for (i, declaration) in declarations.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_expression(declaration)?;
                }
                self.out.push_str(";\n");
            }
            NodeKind::CaseClause { index, statements } => {
                self.indent();
                self.out.push_str(&format!("case {}: {{\n", index));
                self.depth += 1;
                for statement in statements.borrow().iter() {
                    self.write_statement(statement)?;
                }
                self.depth -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            NodeKind::SwitchStatement {
                discriminant,
                cases,
            } => {
                self.indent();
                self.out.push_str("switch (");
                self.write_expression(discriminant)?;
                self.out.push_str(") {\n");
                self.depth += 1;
                for case in cases {
                    self.write_statement(case)?;
                }
                self.depth -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            NodeKind::Function { .. } => {
                self.indent();
                self.write_function(node)?;
                self.out.push('\n');
            }
            NodeKind::Generated {
                template,
                substitutions,
            } => {
                self.indent();
                let expanded = expand_template(template, substitutions, self.options)?;
                self.out.push_str(&expanded);
                self.out.push('\n');
            }
            // An expression handed to us in statement position.
            _ => {
                self.indent();
                self.write_expression(node)?;
                self.out.push_str(";\n");
            }
        }
        Ok(())
    }

    fn write_expression(&mut self, node: &Node) -> Result<()> {
        match node.kind() {
            NodeKind::Identifier(name) => self.out.push_str(name),
            NodeKind::StringLiteral(value) => self.out.push_str(&escape_string(value)),
            NodeKind::NumberLiteral(value) => self.out.push_str(&format_number(*value)),
            NodeKind::NullLiteral => self.out.push_str("null"),
            NodeKind::Raw(text) => self.out.push_str(text),
            NodeKind::Generated {
                template,
                substitutions,
            } => {
                let expanded = expand_template(template, substitutions, self.options)?;
                self.out.push_str(&expanded);
            }
            NodeKind::GeneratedLabel { label, numbers } => {
                let resolved = numbers
                    .borrow()
                    .get(label)
                    .copied()
                    .ok_or_else(|| Error::unresolved_label(label.id()))?;
                self.out.push_str(&resolved.to_string());
            }
            NodeKind::ArrayLiteral(elements) => {
                self.out.push('[');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_expression(element)?;
                }
                self.out.push(']');
            }
            NodeKind::Assignment { target, value } => {
                self.write_expression(target)?;
                self.out.push_str(" = ");
                self.write_expression(value)?;
            }
            NodeKind::Not(operand) => {
                self.out.push_str("!(");
                self.write_expression(operand)?;
                self.out.push(')');
            }
            NodeKind::PropertyAccess { object, name } => {
                self.write_expression(object)?;
                self.out.push('.');
                self.out.push_str(name);
            }
            NodeKind::Call { callee, arguments } => {
                self.write_expression(callee)?;
                self.write_arguments(arguments)?;
            }
            NodeKind::New { callee, arguments } => {
                self.out.push_str("new ");
                self.write_expression(callee)?;
                self.write_arguments(arguments)?;
            }
            NodeKind::Parameter { name, flags } => {
                if flags.rest {
                    self.out.push_str("...");
                }
                self.write_expression(name)?;
            }
            NodeKind::Function { .. } => self.write_function(node)?,
            _ => {
                return Err(Error::InternalError(
                    "statement node in expression position".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn write_arguments(&mut self, arguments: &[Node]) -> Result<()> {
        self.out.push('(');
        for (i, argument) in arguments.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write_expression(argument)?;
        }
        self.out.push(')');
        Ok(())
    }

    fn write_function(&mut self, node: &Node) -> Result<()> {
        let NodeKind::Function {
            kind,
            name,
            parameters,
            body,
        } = node.kind()
        else {
            return Err(Error::InternalError(
                "write_function called on a non-function node".to_string(),
            ));
        };

        match kind {
            FunctionKind::Declaration | FunctionKind::Expression => {
                self.out.push_str("function ");
                if let Some(name) = name {
                    self.write_expression(name)?;
                }
            }
            FunctionKind::Method => {
                if let Some(name) = name {
                    self.write_expression(name)?;
                }
            }
            FunctionKind::Getter => {
                self.out.push_str("get ");
                if let Some(name) = name {
                    self.write_expression(name)?;
                }
            }
            FunctionKind::Arrow => {}
        }

        self.out.push('(');
        for (i, parameter) in parameters.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write_expression(parameter)?;
        }
        self.out.push(')');

        if matches!(kind, FunctionKind::Arrow) {
            self.out.push_str(" => {\n");
        } else {
            self.out.push_str(" {\n");
        }
        self.depth += 1;
        for statement in body {
            self.write_statement(statement)?;
        }
        self.depth -= 1;
        self.indent();
        self.out.push('}');
        Ok(())
    }
}

/// Expand `{name}` placeholders against the substitution map.
///
/// Only brace contents that look like an identifier are treated as
/// placeholders; anything else (object literals, blocks in raw JS text)
/// passes through verbatim.
fn expand_template(
    template: &str,
    substitutions: &FxHashMap<String, Node>,
    options: &PrintOptions,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('}') {
            let key = &after[..end];
            if is_placeholder_name(key) {
                let node = substitutions
                    .get(key)
                    .ok_or_else(|| Error::unknown_substitution(key))?;
                out.push_str(&render_expression(node, options)?);
                rest = &after[end + 1..];
                continue;
            }
        }
        out.push('{');
        rest = after;
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Format a number the way JavaScript prints it (integral values without a
/// fractional part)
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
