//! Expression Compiler (§4.3): lowers a boolean/comparison expression from
//! the host AST into a typed ASL choice-operator tree.
//!
//! Timestamp literals have no representation in `ast::Literal` at all (the
//! parser never produces one — see §1 Non-goals), so there is no dedicated
//! rejection path for them here: an unsupported operand shape simply falls
//! through to `SyntaxUnsupported`.

use serde::{Deserialize, Serialize};

use crate::ast::{BoolOpKind, CastKind, CmpOp, Expr, IndexKey, Literal};
use crate::diagnostics::{syntax_unsupported, Diagnostic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChoiceOperator {
    StringEquals,
    StringLessThan,
    StringGreaterThan,
    StringLessThanEquals,
    StringGreaterThanEquals,
    NumericEquals,
    NumericLessThan,
    NumericGreaterThan,
    NumericLessThanEquals,
    NumericGreaterThanEquals,
    BooleanEquals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChoiceLiteral {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// A compiled choice predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChoiceRule {
    And(Vec<ChoiceRule>),
    Or(Vec<ChoiceRule>),
    Not(Box<ChoiceRule>),
    Compare {
        variable: String,
        operator: ChoiceOperator,
        value: ChoiceLiteral,
    },
    IsNull {
        variable: String,
        is_null: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InferredType {
    Str,
    Num,
    Bool,
}

enum Operand<'a> {
    Variable {
        path: &'a [IndexKey],
        cast: Option<CastKind>,
    },
    Literal(&'a Literal),
}

fn classify(expr: &Expr) -> Option<Operand<'_>> {
    match expr {
        Expr::DataRef(path, _) => Some(Operand::Variable { path, cast: None }),
        Expr::Cast { kind, arg, .. } => match arg.as_ref() {
            Expr::DataRef(path, _) => Some(Operand::Variable {
                path,
                cast: Some(*kind),
            }),
            _ => None,
        },
        Expr::Literal(lit, _) => Some(Operand::Literal(lit)),
        _ => None,
    }
}

fn render_variable(path: &[IndexKey]) -> String {
    let mut s = String::from("$");
    for seg in path {
        s.push_str(&seg.to_path_segment());
    }
    s
}

fn flip(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::LtEq => CmpOp::GtEq,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::GtEq => CmpOp::LtEq,
        other => other,
    }
}

fn cast_type(kind: CastKind) -> InferredType {
    match kind {
        CastKind::Str => InferredType::Str,
        CastKind::Int | CastKind::Float => InferredType::Num,
        CastKind::Bool => InferredType::Bool,
    }
}

fn literal_type(lit: &Literal) -> Option<InferredType> {
    match lit {
        Literal::Str(_) => Some(InferredType::Str),
        Literal::Int(_) => Some(InferredType::Num),
        Literal::Float(_) => Some(InferredType::Num),
        Literal::Bool(_) => Some(InferredType::Bool),
        Literal::None => None,
    }
}

fn literal_value(lit: &Literal) -> Option<ChoiceLiteral> {
    match lit {
        Literal::Str(s) => Some(ChoiceLiteral::Str(s.clone())),
        Literal::Int(i) => Some(ChoiceLiteral::Num(*i as f64)),
        Literal::Float(f) => Some(ChoiceLiteral::Num(*f)),
        Literal::Bool(b) => Some(ChoiceLiteral::Bool(*b)),
        Literal::None => None,
    }
}

/// The operator mapping table (§4.3): `(host op, inferred type) -> ASL op`.
/// Ordering operators are undefined for booleans.
fn map_operator(op: CmpOp, ty: InferredType) -> Result<ChoiceOperator, Diagnostic> {
    use ChoiceOperator::*;
    use InferredType::*;
    let op = match (op, ty) {
        (CmpOp::Eq, Str) => StringEquals,
        (CmpOp::Eq, Num) => NumericEquals,
        (CmpOp::Eq, Bool) => BooleanEquals,
        (CmpOp::Lt, Str) => StringLessThan,
        (CmpOp::Lt, Num) => NumericLessThan,
        (CmpOp::LtEq, Str) => StringLessThanEquals,
        (CmpOp::LtEq, Num) => NumericLessThanEquals,
        (CmpOp::Gt, Str) => StringGreaterThan,
        (CmpOp::Gt, Num) => NumericGreaterThan,
        (CmpOp::GtEq, Str) => StringGreaterThanEquals,
        (CmpOp::GtEq, Num) => NumericGreaterThanEquals,
        (CmpOp::NotEq, _) => return Err(syntax_unsupported("internal: NotEq must be handled by the caller via Not{..}")),
        (CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq, Bool) => {
            return Err(syntax_unsupported("ordering comparisons are not defined for booleans"))
        }
        (CmpOp::Is | CmpOp::IsNot, _) => {
            return Err(syntax_unsupported("internal: Is/IsNot must be handled by the caller"))
        }
    };
    Ok(op)
}

fn compile_compare(left: &Expr, op: CmpOp, right: &Expr) -> Result<ChoiceRule, Diagnostic> {
    // `is None` / `== None` compile to a bare `IsNull: true`; `is not None` /
    // `!= None` compile to `Not` wrapping `IsNull: true`, per §4.3's
    // operator table ("is not None -> wrapped in Not, IsNull: true").
    let none_check = |other: &Expr, negate: bool| -> Option<Result<ChoiceRule, Diagnostic>> {
        match classify(other) {
            Some(Operand::Variable { path, .. }) => {
                let is_null = ChoiceRule::IsNull {
                    variable: render_variable(path),
                    is_null: true,
                };
                Some(Ok(if negate {
                    ChoiceRule::Not(Box::new(is_null))
                } else {
                    is_null
                }))
            }
            _ => Some(Err(syntax_unsupported(
                "a None comparison must have a data reference on the other side",
            ))),
        }
    };
    if matches!(right, Expr::Literal(Literal::None, _)) {
        let is_eq = matches!(op, CmpOp::Eq | CmpOp::Is);
        let not_equal = matches!(op, CmpOp::NotEq | CmpOp::IsNot);
        if is_eq || not_equal {
            return none_check(left, not_equal).unwrap();
        }
    }
    if matches!(left, Expr::Literal(Literal::None, _)) {
        let is_eq = matches!(op, CmpOp::Eq | CmpOp::Is);
        let not_equal = matches!(op, CmpOp::NotEq | CmpOp::IsNot);
        if is_eq || not_equal {
            return none_check(right, not_equal).unwrap();
        }
    }
    if matches!(op, CmpOp::Is | CmpOp::IsNot) {
        return Err(syntax_unsupported("'is' is only supported against None"));
    }

    let (variable_path, cast, literal, op) = match (classify(left), classify(right)) {
        (Some(Operand::Variable { path, cast }), Some(Operand::Literal(lit))) => {
            (path, cast, lit, op)
        }
        (Some(Operand::Literal(lit)), Some(Operand::Variable { path, cast })) => {
            (path, cast, lit, flip(op))
        }
        (Some(Operand::Variable { .. }), Some(Operand::Variable { cast: None, .. }))
        | (Some(Operand::Variable { cast: None, .. }), Some(Operand::Variable { .. })) => {
            return Err(syntax_unsupported(
                "comparing two data references requires an explicit cast on at least one side",
            ))
        }
        (Some(Operand::Variable { .. }), Some(Operand::Variable { .. })) => {
            return Err(syntax_unsupported(
                "comparing two data references is not representable as an ASL choice rule",
            ))
        }
        _ => {
            return Err(syntax_unsupported(
                "a comparison must have exactly one data reference operand",
            ))
        }
    };

    let ty = cast
        .map(cast_type)
        .or_else(|| literal_type(literal))
        .unwrap_or(InferredType::Str);

    let value = literal_value(literal).ok_or_else(|| {
        syntax_unsupported("comparison literal has no representable value for this operator")
    })?;

    if matches!(op, CmpOp::NotEq) {
        let inner_op = map_operator(CmpOp::Eq, ty)?;
        return Ok(ChoiceRule::Not(Box::new(ChoiceRule::Compare {
            variable: render_variable(variable_path),
            operator: inner_op,
            value,
        })));
    }

    let operator = map_operator(op, ty)?;
    Ok(ChoiceRule::Compare {
        variable: render_variable(variable_path),
        operator,
        value,
    })
}

/// Lowers an expression into a choice predicate tree. Only the grammar in
/// §4.3 is accepted; anything else is `SyntaxUnsupported`.
pub fn compile_expr(expr: &Expr) -> Result<ChoiceRule, Diagnostic> {
    match expr {
        Expr::BoolOp { op, values, .. } => {
            let mut compiled = Vec::with_capacity(values.len());
            for v in values {
                compiled.push(compile_expr(v)?);
            }
            let rule = match op {
                BoolOpKind::And => ChoiceRule::And(compiled),
                BoolOpKind::Or => ChoiceRule::Or(compiled),
            };
            Ok(flatten_rule(rule))
        }
        Expr::UnaryNot { operand, .. } => Ok(ChoiceRule::Not(Box::new(compile_expr(operand)?))),
        Expr::Compare { left, op, right, .. } => compile_compare(left, *op, right),
        _ => Err(syntax_unsupported(
            "expression is not a valid choice predicate",
        )),
    }
}

/// Merges nested homogeneous `And`/`Or` trees (§4.3 "Flattening is
/// applied").
pub fn flatten_rule(rule: ChoiceRule) -> ChoiceRule {
    match rule {
        ChoiceRule::And(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children.into_iter().map(flatten_rule) {
                match child {
                    ChoiceRule::And(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            ChoiceRule::And(flat)
        }
        ChoiceRule::Or(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children.into_iter().map(flatten_rule) {
                match child {
                    ChoiceRule::Or(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            ChoiceRule::Or(flat)
        }
        ChoiceRule::Not(inner) => ChoiceRule::Not(Box::new(flatten_rule(*inner))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use pretty_assertions::assert_eq;

    fn data_ref(keys: &[&str]) -> Expr {
        Expr::DataRef(
            keys.iter().map(|k| IndexKey::Str(k.to_string())).collect(),
            Span::synthetic(),
        )
    }

    fn int_lit(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v), Span::synthetic())
    }

    fn str_lit(v: &str) -> Expr {
        Expr::Literal(Literal::Str(v.to_string()), Span::synthetic())
    }

    #[test]
    fn numeric_greater_than() {
        let expr = Expr::Compare {
            left: Box::new(data_ref(&["n"])),
            op: CmpOp::Gt,
            right: Box::new(int_lit(0)),
            span: Span::synthetic(),
        };
        let rule = compile_expr(&expr).unwrap();
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['n']".to_string(),
                operator: ChoiceOperator::NumericGreaterThan,
                value: ChoiceLiteral::Num(0.0),
            }
        );
    }

    #[test]
    fn literal_first_flips_operator() {
        let expr = Expr::Compare {
            left: Box::new(str_lit("x")),
            op: CmpOp::LtEq,
            right: Box::new(data_ref(&["name"])),
            span: Span::synthetic(),
        };
        let rule = compile_expr(&expr).unwrap();
        assert_eq!(
            rule,
            ChoiceRule::Compare {
                variable: "$['name']".to_string(),
                operator: ChoiceOperator::StringGreaterThanEquals,
                value: ChoiceLiteral::Str("x".to_string()),
            }
        );
    }

    #[test]
    fn is_not_none_becomes_negated_is_null() {
        let expr = Expr::Compare {
            left: Box::new(data_ref(&["x"])),
            op: CmpOp::IsNot,
            right: Box::new(Expr::Literal(Literal::None, Span::synthetic())),
            span: Span::synthetic(),
        };
        let rule = compile_expr(&expr).unwrap();
        assert_eq!(
            rule,
            ChoiceRule::Not(Box::new(ChoiceRule::IsNull {
                variable: "$['x']".to_string(),
                is_null: true,
            }))
        );
    }

    #[test]
    fn and_flattening_merges_nested_and() {
        let inner = ChoiceRule::And(vec![
            ChoiceRule::IsNull { variable: "$['a']".into(), is_null: true },
            ChoiceRule::IsNull { variable: "$['b']".into(), is_null: true },
        ]);
        let outer = ChoiceRule::And(vec![
            inner,
            ChoiceRule::IsNull { variable: "$['c']".into(), is_null: true },
        ]);
        let flat = flatten_rule(outer);
        match flat {
            ChoiceRule::And(items) => assert_eq!(items.len(), 3),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn two_data_refs_without_cast_is_rejected() {
        let expr = Expr::Compare {
            left: Box::new(data_ref(&["a"])),
            op: CmpOp::Eq,
            right: Box::new(data_ref(&["b"])),
            span: Span::synthetic(),
        };
        assert!(compile_expr(&expr).is_err());
    }

    #[test]
    fn cast_overrides_literal_type() {
        let expr = Expr::Compare {
            left: Box::new(Expr::Cast {
                kind: CastKind::Str,
                arg: Box::new(data_ref(&["n"])),
                span: Span::synthetic(),
            }),
            op: CmpOp::Eq,
            right: Box::new(int_lit(5)),
            span: Span::synthetic(),
        };
        // literal is numeric but the cast forces string semantics; the
        // literal value itself is still carried through as a number since
        // the AST has no implicit stringification of a numeric literal.
        let rule = compile_expr(&expr).unwrap();
        match rule {
            ChoiceRule::Compare { operator, .. } => {
                assert_eq!(operator, ChoiceOperator::StringEquals)
            }
            _ => panic!("expected Compare"),
        }
    }

}
