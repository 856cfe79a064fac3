//! Project Assembler (§3 `Project`, §6 "External Interfaces"): the single
//! forward scan over a parsed `Module` that classifies every top-level
//! item, builds the `task_defs` table before any state machine is
//! compiled (task classes must be fully known up front so `ReferenceError`
//! can be raised deterministically), then compiles each top-level function
//! into a `StateMachine` independently.
//!
//! Diagnostics accumulate in a flat sink. A hard error while building one
//! task definition or one state machine aborts only that item (§7); the
//! rest of the project is still returned.

use std::collections::HashMap;

use crate::ast::{self, Item, Module};
use crate::decorator;
use crate::diagnostics::{Diagnostic, SourceSpan};
use crate::fragment::StateMachine;
use crate::parser;
use crate::task::{self, TaskDefinition};
use crate::visitor::{self, Resolver};

/// The fully compiled project: every successfully-built state machine and
/// task definition. Entries that failed to compile are simply absent; the
/// corresponding diagnostic in `CompileOutput::diagnostics` explains why.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub state_machines: HashMap<String, StateMachine>,
    pub task_defs: HashMap<String, TaskDefinition>,
}

/// The result of `compile_project`: the (possibly partial) project plus
/// every diagnostic raised while building it.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub project: Project,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses `source`, builds every task definition, then compiles every
/// top-level function into a state machine. Never panics and never
/// returns early on a single bad item; it always produces the best
/// `Project` it can plus a full diagnostics list (§7 "the caller decides
/// whether to proceed").
pub fn compile_project(source: &str) -> CompileOutput {
    let mut diagnostics = Vec::new();

    let module: Module = match parser::parse_module(source) {
        Ok(module) => module,
        Err(err) => {
            diagnostics.push(err.into_diagnostic(source));
            return CompileOutput {
                project: Project::default(),
                diagnostics,
            };
        }
    };

    let mut task_defs = HashMap::new();
    let mut functions: HashMap<String, ast::FunctionDef> = HashMap::new();

    for item in &module.items {
        match item {
            Item::Class(class) => match task::from_class_def(class, source) {
                Ok(def) => {
                    task_defs.insert(def.name.clone(), def);
                }
                Err(diag) => diagnostics.push(with_span(diag, source, class.span)),
            },
            Item::Function(function) => {
                functions.insert(function.name.clone(), function.clone());
            }
        }
    }

    let resolver = Resolver {
        tasks: &task_defs,
        functions: &functions,
    };

    let mut state_machines = HashMap::new();
    for function in functions.values() {
        match compile_state_machine(&resolver, function, source) {
            Ok(machine) => {
                state_machines.insert(machine.name.clone(), machine);
            }
            Err(diag) => diagnostics.push(with_span(diag, source, function.span)),
        }
    }

    CompileOutput {
        project: Project {
            state_machines,
            task_defs,
        },
        diagnostics,
    }
}

fn compile_state_machine(
    resolver: &Resolver,
    function: &ast::FunctionDef,
    source: &str,
) -> Result<StateMachine, Diagnostic> {
    let effects = decorator::process(&function.decorators, &function.name)?;
    let (start_key, states) = visitor::lower_function_body(resolver, &function.body)?;
    Ok(StateMachine {
        name: function.name.clone(),
        start_key,
        states,
        schedule_expression: effects.schedule_expression,
        subscription: effects.subscription,
        exported: effects.exported,
    })
}

fn with_span(diag: Diagnostic, source: &str, span: ast::Span) -> Diagnostic {
    if diag.span.is_some() || span.is_synthetic() {
        diag
    } else {
        diag.with_span(SourceSpan::from_span(source, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_compiles_to_an_empty_project() {
        let out = compile_project("");
        assert!(out.diagnostics.is_empty());
        assert!(out.project.state_machines.is_empty());
        assert!(out.project.task_defs.is_empty());
    }

    #[test]
    fn one_bad_task_does_not_block_other_items() {
        let source = r#"
class BadTask:
    service = "not-a-real-service"

class GoodTask:
    service = "lambda"

def main():
    GoodTask(key="do_good")
"#;
        let out = compile_project(source);
        assert!(out.project.task_defs.contains_key("GoodTask"));
        assert!(!out.project.task_defs.contains_key("BadTask"));
        assert!(out.project.state_machines.contains_key("main"));
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn a_state_machine_referencing_an_undefined_task_is_skipped_not_fatal() {
        let source = r#"
def main():
    Missing(key="x")

def other():
    pass
"#;
        let out = compile_project(source);
        assert!(!out.project.state_machines.contains_key("main"));
        assert!(out.project.state_machines.contains_key("other"));
        assert_eq!(out.diagnostics.len(), 1);
    }
}
