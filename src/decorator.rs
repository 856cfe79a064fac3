//! Decorator Processor (§4.5): reads a state-machine function's decorator
//! list and turns it into the `StateMachine` metadata fields that are not
//! part of the fragment graph itself — scheduling, SNS subscription, and
//! export eligibility.
//!
//! Exactly three decorators are recognized. Anything else is a
//! `DecoratorError`, since an unrecognized decorator on a state-machine
//! function most likely means a typo the author would want surfaced, not
//! silently ignored.

use crate::ast::{Decorator, Expr, Literal};
use crate::diagnostics::{decorator_error, Diagnostic};
use crate::fragment::{Subscription, SubscriptionStatus};

/// The decorator-derived metadata for one state-machine function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoratorEffects {
    pub schedule_expression: Option<String>,
    pub subscription: Option<Subscription>,
    /// Set by `schedule`, `subscribe`, and bare `export()`; also true for
    /// a function literally named `main` (§4.5 "eligible for direct
    /// execution").
    pub exported: bool,
}

fn literal_str(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Literal(Literal::Str(s), _) => Some(s.as_str()),
        _ => None,
    }
}

fn kwarg<'a>(decorator: &'a Decorator, name: &str) -> Option<&'a Expr> {
    decorator.kwargs.iter().find(|k| k.name == name).map(|k| &k.value)
}

fn process_schedule(decorator: &Decorator, effects: &mut DecoratorEffects) -> Result<(), Diagnostic> {
    let expression = kwarg(decorator, "expression")
        .and_then(literal_str)
        .ok_or_else(|| decorator_error("schedule(...) requires expression=\"...\""))?;
    if expression.trim().is_empty() {
        return Err(decorator_error("schedule(...)'s expression must not be empty"));
    }
    effects.schedule_expression = Some(expression.to_string());
    effects.exported = true;
    Ok(())
}

fn process_subscribe(decorator: &Decorator, effects: &mut DecoratorEffects) -> Result<(), Diagnostic> {
    let project = kwarg(decorator, "project")
        .and_then(literal_str)
        .ok_or_else(|| decorator_error("subscribe(...) requires project=\"...\""))?
        .to_string();
    let state_machine = kwarg(decorator, "state_machine")
        .and_then(literal_str)
        .unwrap_or("main")
        .to_string();
    let raw_status = kwarg(decorator, "status")
        .and_then(literal_str)
        .unwrap_or("success");
    let status = match raw_status {
        "success" => SubscriptionStatus::Success,
        "failure" => SubscriptionStatus::Failure,
        other => {
            return Err(decorator_error(format!(
                "subscribe(...)'s status must be 'success' or 'failure', got '{other}'"
            )))
        }
    };
    let topic_arn_import_value = kwarg(decorator, "topic_arn_import_value")
        .and_then(literal_str)
        .map(String::from);

    effects.subscription = Some(Subscription {
        project,
        state_machine,
        status,
        topic_arn_import_value,
    });
    effects.exported = true;
    Ok(())
}

/// Applies a state-machine function's decorator list in source order,
/// rejecting any decorator that is not `schedule`, `subscribe`, or
/// `export`. Later decorators overwrite earlier ones of the same kind
/// (§4.5 notes decorators are not required to be unique, there is simply
/// no use case for repeating one).
pub fn process(decorators: &[Decorator], fn_name: &str) -> Result<DecoratorEffects, Diagnostic> {
    let mut effects = DecoratorEffects {
        exported: fn_name == "main",
        ..Default::default()
    };
    for decorator in decorators {
        match decorator.name.as_str() {
            "schedule" => process_schedule(decorator, &mut effects)?,
            "subscribe" => process_subscribe(decorator, &mut effects)?,
            "export" => effects.exported = true,
            other => {
                return Err(decorator_error(format!(
                    "unrecognized decorator '@{other}'"
                )))
            }
        }
    }
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Kwarg, Span};

    fn span() -> Span {
        Span::synthetic()
    }

    fn str_kwarg(name: &str, value: &str) -> Kwarg {
        Kwarg {
            name: name.to_string(),
            value: Expr::Literal(Literal::Str(value.to_string()), span()),
        }
    }

    fn decorator(name: &str, kwargs: Vec<Kwarg>) -> Decorator {
        Decorator {
            name: name.to_string(),
            args: vec![],
            kwargs,
            span: span(),
        }
    }

    #[test]
    fn no_decorators_and_non_main_name_is_not_exported() {
        let effects = process(&[], "helper").unwrap();
        assert!(!effects.exported);
        assert!(effects.schedule_expression.is_none());
    }

    #[test]
    fn main_is_always_exported() {
        let effects = process(&[], "main").unwrap();
        assert!(effects.exported);
    }

    #[test]
    fn schedule_sets_expression_and_exports() {
        let d = decorator("schedule", vec![str_kwarg("expression", "rate(1 hour)")]);
        let effects = process(&[d], "run_nightly").unwrap();
        assert_eq!(effects.schedule_expression.as_deref(), Some("rate(1 hour)"));
        assert!(effects.exported);
    }

    #[test]
    fn schedule_with_empty_expression_is_an_error() {
        let d = decorator("schedule", vec![str_kwarg("expression", "")]);
        assert!(process(&[d], "run_nightly").is_err());
    }

    #[test]
    fn subscribe_requires_a_valid_status() {
        let d = decorator(
            "subscribe",
            vec![
                str_kwarg("project", "billing"),
                str_kwarg("state_machine", "charge"),
                str_kwarg("status", "pending"),
            ],
        );
        let err = process(&[d], "on_charge").unwrap_err();
        assert_eq!(err.code, crate::diagnostics::DiagnosticCode::DecoratorError);
    }

    #[test]
    fn subscribe_succeeds_with_optional_topic_arn() {
        let d = decorator(
            "subscribe",
            vec![
                str_kwarg("project", "billing"),
                str_kwarg("state_machine", "charge"),
                str_kwarg("status", "failure"),
            ],
        );
        let effects = process(&[d], "on_failure").unwrap();
        let sub = effects.subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Failure);
        assert!(sub.topic_arn_import_value.is_none());
        assert!(effects.exported);
    }

    #[test]
    fn subscribe_defaults_state_machine_to_main_and_status_to_success() {
        let d = decorator("subscribe", vec![str_kwarg("project", "billing")]);
        let effects = process(&[d], "on_success").unwrap();
        let sub = effects.subscription.unwrap();
        assert_eq!(sub.state_machine, "main");
        assert_eq!(sub.status, SubscriptionStatus::Success);
    }

    #[test]
    fn unrecognized_decorator_is_rejected() {
        let d = decorator("memoize", vec![]);
        let err = process(&[d], "run").unwrap_err();
        assert_eq!(err.code, crate::diagnostics::DiagnosticCode::DecoratorError);
    }
}
