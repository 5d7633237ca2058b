//! Block-scope tracking for the lowering pass
//!
//! Two structures are maintained in lockstep. The live stack answers
//! break/continue target queries while the caller is still recording; the
//! event log is the only record finalization replays. One block object can
//! appear on the stack and twice in the log (once opened, once closed), so
//! blocks are shared handles.

use std::cell::RefCell;
use std::rc::Rc;

use super::Label;
use crate::ast::Node;

/// Progress of an exception block through its regions.
///
/// Strictly increasing over the block's life: a catch region cannot open
/// after a finally region, and nothing follows `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExceptionState {
    Try,
    Catch,
    Finally,
    Done,
}

/// An active or closed block scope
#[derive(Debug)]
pub enum BlockScope {
    /// A protected try/catch/finally region
    Exception {
        state: ExceptionState,
        start_label: Label,
        catch_label: Option<Label>,
        /// The caught-value binding is carried by the assignment opcode
        /// recorded when the catch region opens; this slot stays empty.
        catch_variable: Option<Node>,
        finally_label: Option<Label>,
        end_label: Label,
    },
    /// Synthetic outermost block hosting top-level labelled statements
    ScriptBreak {
        break_label: Label,
        label_text: Option<String>,
    },
    /// A breakable region (loop or labelled statement)
    Break {
        break_label: Label,
        label_text: Option<String>,
    },
    /// Script-level variant of [`BlockScope::Continue`]
    ScriptContinue {
        break_label: Label,
        continue_label: Label,
        label_text: Option<String>,
    },
    /// A loop body: breakable, with a separate continue target
    Continue {
        break_label: Label,
        continue_label: Label,
        label_text: Option<String>,
    },
}

impl BlockScope {
    /// Short name used in assertion messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            BlockScope::Exception { .. } => "exception",
            BlockScope::ScriptBreak { .. } => "script-break",
            BlockScope::Break { .. } => "break",
            BlockScope::ScriptContinue { .. } => "script-continue",
            BlockScope::Continue { .. } => "continue",
        }
    }

    fn supports_break(&self) -> bool {
        !matches!(self, BlockScope::Exception { .. })
    }

    fn supports_continue(&self) -> bool {
        matches!(
            self,
            BlockScope::Continue { .. } | BlockScope::ScriptContinue { .. }
        )
    }

    fn break_label(&self) -> Option<Label> {
        match self {
            BlockScope::Exception { .. } => None,
            BlockScope::ScriptBreak { break_label, .. }
            | BlockScope::Break { break_label, .. }
            | BlockScope::ScriptContinue { break_label, .. }
            | BlockScope::Continue { break_label, .. } => Some(*break_label),
        }
    }

    fn continue_label(&self) -> Option<Label> {
        match self {
            BlockScope::ScriptContinue { continue_label, .. }
            | BlockScope::Continue { continue_label, .. } => Some(*continue_label),
            _ => None,
        }
    }

    fn label_text(&self) -> Option<&str> {
        match self {
            BlockScope::Exception { .. } => None,
            BlockScope::ScriptBreak { label_text, .. }
            | BlockScope::Break { label_text, .. }
            | BlockScope::ScriptContinue { label_text, .. }
            | BlockScope::Continue { label_text, .. } => label_text.as_deref(),
        }
    }

    fn matches_query(&self, label_text: Option<&str>) -> bool {
        match label_text {
            None => true,
            Some(text) => self.label_text() == Some(text),
        }
    }
}

/// Shared handle to a block scope
pub type BlockRef = Rc<RefCell<BlockScope>>;

/// Whether a block event opened or closed its block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    Open,
    Close,
}

/// One entry in the block event log
#[derive(Debug, Clone)]
pub struct BlockEvent {
    /// Open or close
    pub action: BlockAction,
    /// Operation count at the time the event was recorded
    pub offset: usize,
    /// The block the event refers to
    pub block: BlockRef,
}

/// Resolve a break target against the live stack, innermost first.
///
/// An unlabelled query takes the nearest break-supporting block; a labelled
/// query takes the nearest block carrying that label text. `None` means the
/// break is illegal where it stands (or refers to an outer synthetic scope)
/// and the caller should diagnose it.
pub(crate) fn find_break_target(stack: &[BlockRef], label_text: Option<&str>) -> Option<Label> {
    for block in stack.iter().rev() {
        let block = block.borrow();
        if block.supports_break() && block.matches_query(label_text) {
            return block.break_label();
        }
    }
    None
}

/// Resolve a continue target against the live stack, innermost first.
pub(crate) fn find_continue_target(stack: &[BlockRef], label_text: Option<&str>) -> Option<Label> {
    for block in stack.iter().rev() {
        let block = block.borrow();
        if block.supports_continue() && block.matches_query(label_text) {
            return block.continue_label();
        }
    }
    None
}
