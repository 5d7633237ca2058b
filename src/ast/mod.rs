//! Synthesized output tree for the lowering pass
//!
//! This module defines the node surface the lowering core consumes and
//! synthesizes. The node set is deliberately small: it covers exactly the
//! fragments a lowered state machine is made of, plus "generated" nodes:
//! deferred text fragments and label references that are resolved when the
//! tree is rendered.
//!
//! Nodes are cheap-clone handles over shared data. Two clones of the same
//! `Node` refer to the same underlying node, which is what lets a case
//! clause keep receiving statements after it has been pushed into the
//! output, and what lets a label reference resolve to its final case index
//! long after it was created.

pub mod printer;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

pub use crate::error::SourceLocation;

use crate::lowering::Label;

/// A span in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start location
    pub start: SourceLocation,
    /// End location
    pub end: SourceLocation,
}

impl Span {
    /// Create a new span
    pub fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one covering both
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: if self.start.offset < other.start.offset {
                self.start
            } else {
                other.start
            },
            end: if self.end.offset > other.end.offset {
                self.end
            } else {
                other.end
            },
        }
    }
}

/// Shared table mapping labels to their final switch-case indices.
///
/// Filled in during finalization; label reference nodes hold a handle to
/// this table and read through it at render time, which is how forward
/// label references resolve.
pub type LabelNumbers = Rc<RefCell<FxHashMap<Label, usize>>>;

/// The outer shape of a built function node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `function name(...) { ... }` at statement position
    Declaration,
    /// `name(...) { ... }` inside a class or object literal
    Method,
    /// `get name() { ... }`
    Getter,
    /// `function (...) { ... }` at expression position
    Expression,
    /// `(...) => { ... }`
    Arrow,
}

/// Modifier flags for a parameter declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterFlags {
    /// Rest parameter (`...name`)
    pub rest: bool,
}

/// A synthesized node
///
/// Cheap to clone; clones share identity with the original.
#[derive(Debug, Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

#[derive(Debug)]
struct NodeInner {
    kind: NodeKind,
    span: RefCell<Option<Span>>,
    parent: RefCell<Weak<NodeInner>>,
}

/// The kind of a synthesized node
#[derive(Debug)]
pub enum NodeKind {
    /// An identifier reference
    Identifier(String),
    /// A string literal
    StringLiteral(String),
    /// A numeric literal
    NumberLiteral(f64),
    /// The `null` literal
    NullLiteral,
    /// Raw expression text passed through verbatim
    Raw(String),
    /// A deferred text fragment with `{name}` placeholders
    Generated {
        /// Template text; `{name}` placeholders are replaced at render time
        template: String,
        /// Substitution map consulted for each placeholder
        substitutions: FxHashMap<String, Node>,
    },
    /// A label reference resolved to its case index at render time
    GeneratedLabel {
        /// The raw label handle
        label: Label,
        /// The shared case-number table
        numbers: LabelNumbers,
    },
    /// `[a, b, c]`
    ArrayLiteral(Vec<Node>),
    /// `target = value` (expression)
    Assignment { target: Node, value: Node },
    /// `!(operand)`
    Not(Node),
    /// `object.name`
    PropertyAccess { object: Node, name: String },
    /// `callee(arguments...)`
    Call { callee: Node, arguments: Vec<Node> },
    /// `new callee(arguments...)`
    New { callee: Node, arguments: Vec<Node> },
    /// `expression;`
    ExpressionStatement(Node),
    /// `return;` or `return argument;`
    ReturnStatement(Option<Node>),
    /// `throw argument;`
    ThrowStatement(Node),
    /// `if (condition) { then_branch }`
    IfStatement { condition: Node, then_branch: Node },
    /// `{ statements... }`
    Block(Vec<Node>),
    /// `var a, b;`
    VariableStatement(Vec<Node>),
    /// One arm of the state-machine switch
    ///
    /// The statement buffer is shared with the assembler, which keeps
    /// appending through its own handle after the clause is created.
    CaseClause {
        index: usize,
        statements: Rc<RefCell<Vec<Node>>>,
    },
    /// `switch (discriminant) { cases... }`
    SwitchStatement { discriminant: Node, cases: Vec<Node> },
    /// A parameter declaration
    Parameter { name: Node, flags: ParameterFlags },
    /// A function in one of the [`FunctionKind`] shapes
    Function {
        kind: FunctionKind,
        name: Option<Node>,
        parameters: Vec<Node>,
        body: Vec<Node>,
    },
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                kind,
                span: RefCell::new(None),
                parent: RefCell::new(Weak::new()),
            }),
        }
    }

    /// The node's kind
    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    /// The span stamped on this node, if any
    pub fn span(&self) -> Option<Span> {
        *self.inner.span.borrow()
    }

    /// Stamp a span on this node
    pub fn set_span(&self, span: Span) {
        *self.inner.span.borrow_mut() = Some(span);
    }

    /// The parent this node was attached to, if still alive
    pub fn parent(&self) -> Option<Node> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| Node { inner })
    }

    /// Attach this node to a parent (used when statements are pushed into
    /// a case clause, so later passes can walk ancestors)
    pub fn set_parent(&self, parent: &Node) {
        *self.inner.parent.borrow_mut() = Rc::downgrade(&parent.inner);
    }

    /// Do two handles refer to the same node?
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Is this a statement-kind node?
    pub fn is_statement(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::ExpressionStatement(_)
                | NodeKind::ReturnStatement(_)
                | NodeKind::ThrowStatement(_)
                | NodeKind::IfStatement { .. }
                | NodeKind::Block(_)
                | NodeKind::VariableStatement(_)
                | NodeKind::SwitchStatement { .. }
                | NodeKind::Function {
                    kind: FunctionKind::Declaration,
                    ..
                }
        )
    }

    /// Is this a pre-wrapped generated fragment?
    pub fn is_generated(&self) -> bool {
        matches!(self.kind(), NodeKind::Generated { .. })
    }
}

/// Constructor functions for synthesized nodes
///
/// The lowering core synthesizes exclusively through these; callers use
/// them to hand opaque statements and expressions to the recorder.
pub mod factory {
    use super::*;

    /// An identifier reference
    pub fn ident(name: impl Into<String>) -> Node {
        Node::new(NodeKind::Identifier(name.into()))
    }

    /// A string literal
    pub fn string(value: impl Into<String>) -> Node {
        Node::new(NodeKind::StringLiteral(value.into()))
    }

    /// A numeric literal
    pub fn number(value: f64) -> Node {
        Node::new(NodeKind::NumberLiteral(value))
    }

    /// The `null` literal
    pub fn null() -> Node {
        Node::new(NodeKind::NullLiteral)
    }

    /// Raw expression text passed through verbatim
    pub fn raw(text: impl Into<String>) -> Node {
        Node::new(NodeKind::Raw(text.into()))
    }

    /// A deferred text fragment with `{name}` placeholders
    pub fn template<I, K>(text: impl Into<String>, substitutions: I) -> Node
    where
        I: IntoIterator<Item = (K, Node)>,
        K: Into<String>,
    {
        let substitutions = substitutions
            .into_iter()
            .map(|(key, node)| (key.into(), node))
            .collect();
        Node::new(NodeKind::Generated {
            template: text.into(),
            substitutions,
        })
    }

    /// A label reference that prints its resolved case index
    pub fn generated_label(label: Label, numbers: LabelNumbers) -> Node {
        Node::new(NodeKind::GeneratedLabel { label, numbers })
    }

    /// An array literal
    pub fn array(elements: Vec<Node>) -> Node {
        Node::new(NodeKind::ArrayLiteral(elements))
    }

    /// An assignment expression
    pub fn assign(target: Node, value: Node) -> Node {
        Node::new(NodeKind::Assignment { target, value })
    }

    /// A logical-not expression
    pub fn not(operand: Node) -> Node {
        Node::new(NodeKind::Not(operand))
    }

    /// A property access
    pub fn prop(object: Node, name: impl Into<String>) -> Node {
        Node::new(NodeKind::PropertyAccess {
            object,
            name: name.into(),
        })
    }

    /// A call expression
    pub fn call(callee: Node, arguments: Vec<Node>) -> Node {
        Node::new(NodeKind::Call { callee, arguments })
    }

    /// A new expression
    pub fn new_expr(callee: Node, arguments: Vec<Node>) -> Node {
        Node::new(NodeKind::New { callee, arguments })
    }

    /// An expression statement
    pub fn expr_statement(expression: Node) -> Node {
        Node::new(NodeKind::ExpressionStatement(expression))
    }

    /// A return statement
    pub fn return_statement(argument: Option<Node>) -> Node {
        Node::new(NodeKind::ReturnStatement(argument))
    }

    /// A throw statement
    pub fn throw_statement(argument: Node) -> Node {
        Node::new(NodeKind::ThrowStatement(argument))
    }

    /// An if statement with a single-statement consequent
    pub fn if_statement(condition: Node, then_branch: Node) -> Node {
        Node::new(NodeKind::IfStatement {
            condition,
            then_branch,
        })
    }

    /// A block of statements
    pub fn block(statements: Vec<Node>) -> Node {
        Node::new(NodeKind::Block(statements))
    }

    /// A `var` statement declaring the given identifiers
    pub fn variable_statement(declarations: Vec<Node>) -> Node {
        Node::new(NodeKind::VariableStatement(declarations))
    }

    /// A switch-case clause over a shared statement buffer
    pub fn case_clause(index: usize, statements: Rc<RefCell<Vec<Node>>>) -> Node {
        Node::new(NodeKind::CaseClause { index, statements })
    }

    /// A switch statement
    pub fn switch_statement(discriminant: Node, cases: Vec<Node>) -> Node {
        Node::new(NodeKind::SwitchStatement { discriminant, cases })
    }

    /// A parameter declaration
    pub fn parameter(name: Node, flags: ParameterFlags) -> Node {
        Node::new(NodeKind::Parameter { name, flags })
    }

    /// A function node in one of the [`FunctionKind`] shapes
    pub fn function(
        kind: FunctionKind,
        name: Option<Node>,
        parameters: Vec<Node>,
        body: Vec<Node>,
    ) -> Node {
        Node::new(NodeKind::Function {
            kind,
            name,
            parameters,
            body,
        })
    }
}
