//! Cinnabar: control-flow lowering for generators and async functions
//!
//! Cinnabar compiles structured source functions containing suspending
//! constructs (yield-producing generators, await-based async functions) and
//! structured exception handling into flat, label-addressed state machines.
//! The output is a function whose body is a single switch over a label
//! register; suspension and resumption are delegated to two small runtime
//! helpers (`__generator`, `__awaiter`) whose calling convention the
//! lowered code targets.
//!
//! # Features
//!
//! - Opcode recorder driven imperatively by a statement visitor
//! - Break/continue block tracking with labelled-target resolution
//! - Protected-region (try/catch/finally) tracking for the runtime unwinder
//! - Switch-body assembly with fall-through fix-ups and dead-code gating
//! - Generator and async output templates for every function shape
//!
//! # Quick Start
//!
//! ```
//! use cinnabar::ast::{factory, printer, FunctionKind};
//! use cinnabar::{CodeGenerator, Opcode};
//!
//! let mut generator = CodeGenerator::new();
//! generator.emit(Opcode::Yield(Some(factory::number(42.0))));
//! let function = generator.build_generator_function(
//!     FunctionKind::Declaration,
//!     Some(factory::ident("answer")),
//!     None,
//! );
//! let js = printer::render(&function).unwrap();
//! assert!(js.contains("return __generator(function (__state)"));
//! assert!(js.contains("return [\"yield\", 42];"));
//! ```
//!
//! # Module Overview
//!
//! The lowering pipeline flows: visitor calls → [`lowering`] (record) →
//! finalization (assemble) → [`ast`] output tree → [`ast::printer`]
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`lowering`], [`ast`], [`error`](Error) |
//! | **Output** | [`ast::printer`] |

pub mod ast;
pub mod lowering;

mod error;

pub use error::{Error, Result};
pub use lowering::{CodeGenerator, Label, Opcode};

/// Cinnabar version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
