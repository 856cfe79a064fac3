//! asl-translate: AST-to-IR translator for a workflow DSL.
//!
//! Takes source text for a Python-like host language, parses it into an
//! AST, and lowers it into an in-memory state-machine graph modeled on the
//! Amazon States Language. The crate stops at the in-memory IR: rendering
//! that IR to ASL JSON, packaging task bundles, and CLI/file-discovery
//! concerns all live outside this crate.
//!
//! Pipeline: `parser::parse_module` -> `project::assemble` ->
//! `visitor::lower_statements` (per state machine) -> `linker::link` ->
//! `decorator::process`, all orchestrated by `project::compile_project`.

pub mod ast;
pub mod choice;
pub mod decorator;
pub mod diagnostics;
pub mod fragment;
pub mod linker;
pub mod parser;
pub mod project;
pub mod task;
pub mod visitor;

pub use ast::{Expr, Module, Span, Stmt};
pub use diagnostics::{Diagnostic, DiagnosticCode, Severity, SourceSpan};
pub use fragment::{State, StateKey, StateMachine};
pub use parser::parse_module;
pub use project::{compile_project, CompileOutput, Project};
pub use task::{Service, TaskDefinition};
