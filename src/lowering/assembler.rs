//! Switch-body assembler
//!
//! Finalization replays the opcode log and the block-event log in lockstep
//! and produces the ordered case clauses of the state machine. Label
//! references are not resolved here: emitted fragments hold label handles
//! that read the case-number table at render time, so forward references
//! settle once the whole pass has run.

use std::cell::RefCell;
use std::rc::Rc;

use super::blocks::{BlockAction, BlockEvent, BlockScope};
use super::opcode::{Opcode, Operation};
use super::{Label, STATE_IDENT};
use crate::ast::{factory, LabelNumbers, Node, Span};

/// State for one finalization pass over a recorded function
pub(crate) struct Assembler {
    operations: Vec<Operation>,
    labels: Vec<Option<usize>>,
    label_numbers: LabelNumbers,
    block_events: Vec<BlockEvent>,
    has_protected_regions: bool,

    /// Accumulated case clauses
    clauses: Vec<Node>,
    /// Statement buffer aliased by the open clause
    statements: Option<Rc<RefCell<Vec<Node>>>>,
    /// The open clause, for parent-linking written statements
    current_clause: Option<Node>,
    /// Cursor over the block-event log
    block_index: usize,
    /// Last written statement transferred control out of the case
    instruction_was_abrupt: bool,
    /// Last written statement completed the state machine
    instruction_was_completion: bool,
}

impl Assembler {
    pub(crate) fn new(
        operations: Vec<Operation>,
        labels: Vec<Option<usize>>,
        label_numbers: LabelNumbers,
        block_events: Vec<BlockEvent>,
        has_protected_regions: bool,
    ) -> Self {
        Self {
            operations,
            labels,
            label_numbers,
            block_events,
            has_protected_regions,
            clauses: Vec::new(),
            statements: None,
            current_clause: None,
            block_index: 0,
            instruction_was_abrupt: false,
            instruction_was_completion: false,
        }
    }

    /// Run the pass and return the case clauses in label-index order
    pub(crate) fn assemble(mut self) -> Vec<Node> {
        let operations = std::mem::take(&mut self.operations);
        let count = operations.len();

        for (index, operation) in operations.iter().enumerate() {
            self.flush_labels(index);
            self.flush_blocks(index);
            // Operations between an abrupt/completing statement and the
            // next label are unreachable within this case.
            if self.instruction_was_abrupt || self.instruction_was_completion {
                continue;
            }
            self.write_operation(operation);
        }

        self.flush_labels(count);
        self.flush_blocks(count);

        // A trailing abrupt operation resumes at the next case index, which
        // must exist even though no label was marked there.
        if self.instruction_was_abrupt && !self.instruction_was_completion {
            self.open_clause();
        }
        if !self.instruction_was_completion {
            self.write_statement(inline_return(None), None);
        }
        self.clauses
    }

    /// Bind every label marked at this position and open a new case for them
    fn flush_labels(&mut self, index: usize) {
        let mut bound_any = false;
        for slot in 0..self.labels.len() {
            if self.labels[slot] == Some(index) {
                let label = Label::from_index(slot);
                self.label_numbers
                    .borrow_mut()
                    .insert(label, self.clauses.len());
                bound_any = true;
            }
        }
        if bound_any {
            self.open_clause();
        }
    }

    /// Start a new case clause. If the previous case could still fall off
    /// its end, patch it to resume at the new label.
    fn open_clause(&mut self) {
        let next_index = self.clauses.len();
        if let Some(previous) = &self.statements {
            if !self.instruction_was_abrupt && !self.instruction_was_completion {
                previous
                    .borrow_mut()
                    .push(factory::expr_statement(factory::assign(
                        state_prop("label"),
                        factory::number(next_index as f64),
                    )));
            }
        }

        let buffer: Rc<RefCell<Vec<Node>>> = Rc::new(RefCell::new(Vec::new()));
        if next_index == 0 && self.has_protected_regions {
            buffer
                .borrow_mut()
                .push(factory::expr_statement(factory::assign(
                    state_prop("trys"),
                    factory::array(Vec::new()),
                )));
        }

        let clause = factory::case_clause(next_index, buffer.clone());
        self.clauses.push(clause.clone());
        self.current_clause = Some(clause);
        self.statements = Some(buffer);
        self.instruction_was_abrupt = false;
        self.instruction_was_completion = false;
    }

    fn ensure_clause(&mut self) {
        if self.statements.is_none() {
            self.open_clause();
        }
    }

    /// Process block events up to and including this position. Opening an
    /// exception block registers its protected region with the runtime;
    /// everything else existed only to serve in-recording queries.
    fn flush_blocks(&mut self, index: usize) {
        while self.block_index < self.block_events.len()
            && self.block_events[self.block_index].offset <= index
        {
            let event = self.block_events[self.block_index].clone();
            self.block_index += 1;
            if event.action != BlockAction::Open {
                continue;
            }
            let registration = match &*event.block.borrow() {
                BlockScope::Exception {
                    start_label,
                    catch_label,
                    finally_label,
                    end_label,
                    ..
                } => Some(self.protected_region_registration(
                    *start_label,
                    *catch_label,
                    *finally_label,
                    *end_label,
                )),
                _ => None,
            };
            if let Some(statement) = registration {
                self.write_statement(statement, None);
            }
        }
    }

    /// `__state.trys.push([start, catch?, finally?, end]);`
    fn protected_region_registration(
        &self,
        start_label: Label,
        catch_label: Option<Label>,
        finally_label: Option<Label>,
        end_label: Label,
    ) -> Node {
        let slot = |label: Option<Label>| match label {
            Some(label) => factory::generated_label(label, self.label_numbers.clone()),
            None => factory::null(),
        };
        factory::expr_statement(factory::call(
            factory::prop(state_prop("trys"), "push"),
            vec![factory::array(vec![
                factory::generated_label(start_label, self.label_numbers.clone()),
                slot(catch_label),
                slot(finally_label),
                slot(Some(end_label)),
            ])],
        ))
    }

    fn write_operation(&mut self, operation: &Operation) {
        match &operation.opcode {
            Opcode::Statement(node) => {
                let statement = if node.is_statement() || node.is_generated() {
                    node.clone()
                } else {
                    factory::expr_statement(node.clone())
                };
                self.write_statement(statement, operation.span);
            }
            Opcode::Assign(target, value) => {
                let statement =
                    factory::expr_statement(factory::assign(target.clone(), value.clone()));
                self.write_statement(statement, operation.span);
            }
            Opcode::Break(label) => {
                let statement = inline_break(*label, &self.label_numbers);
                self.write_statement(statement, operation.span);
                self.instruction_was_abrupt = true;
            }
            Opcode::BrTrue(label, condition) => {
                let jump = inline_break(*label, &self.label_numbers);
                let statement = factory::if_statement(condition.clone(), jump);
                self.write_statement(statement, operation.span);
            }
            Opcode::BrFalse(label, condition) => {
                let jump = inline_break(*label, &self.label_numbers);
                let statement = factory::if_statement(factory::not(condition.clone()), jump);
                self.write_statement(statement, operation.span);
            }
            Opcode::Yield(expression) => {
                let statement = inline_yield(expression.clone());
                self.write_statement(statement, operation.span);
                self.instruction_was_abrupt = true;
            }
            Opcode::Return(expression) => {
                let statement = inline_return(expression.clone());
                self.write_statement(statement, operation.span);
                self.instruction_was_completion = true;
            }
            Opcode::Throw(expression) => {
                let statement = factory::throw_statement(expression.clone());
                self.write_statement(statement, operation.span);
                self.instruction_was_completion = true;
            }
            Opcode::Endfinally => {
                let statement = inline_endfinally();
                self.write_statement(statement, operation.span);
                self.instruction_was_abrupt = true;
            }
        }
    }

    fn write_statement(&mut self, statement: Node, span: Option<Span>) {
        debug_assert!(
            !self.instruction_was_abrupt && !self.instruction_was_completion,
            "statement written into a terminated case"
        );
        self.ensure_clause();
        if let Some(span) = span {
            if statement.span().is_none() {
                statement.set_span(span);
            }
        }
        if let Some(clause) = &self.current_clause {
            statement.set_parent(clause);
        }
        self.statements
            .as_ref()
            .expect("clause buffer missing after ensure_clause")
            .borrow_mut()
            .push(statement);
    }
}

/// `return ["break", L];`
pub(crate) fn inline_break(label: Label, numbers: &LabelNumbers) -> Node {
    factory::return_statement(Some(factory::array(vec![
        factory::string("break"),
        factory::generated_label(label, numbers.clone()),
    ])))
}

/// `return ["return", e];` or `return ["return"];`
pub(crate) fn inline_return(expression: Option<Node>) -> Node {
    let mut elements = vec![factory::string("return")];
    if let Some(expression) = expression {
        elements.push(expression);
    }
    factory::return_statement(Some(factory::array(elements)))
}

/// `return ["yield", e];` or `return ["yield"];`
fn inline_yield(expression: Option<Node>) -> Node {
    let mut elements = vec![factory::string("yield")];
    if let Some(expression) = expression {
        elements.push(expression);
    }
    factory::return_statement(Some(factory::array(elements)))
}

/// `return ["endfinally"];`
fn inline_endfinally() -> Node {
    factory::return_statement(Some(factory::array(vec![factory::string("endfinally")])))
}

fn state_prop(name: &str) -> Node {
    factory::prop(factory::ident(STATE_IDENT), name)
}
