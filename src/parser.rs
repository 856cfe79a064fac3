//! Source Reader (§2, §6): turns the project's source text into an
//! `ast::Module`.
//!
//! The host grammar is line/indentation based, the way the scripting
//! language it is embedded in is. Indentation and block structure are
//! walked explicitly over a pre-split line table rather than through nom —
//! nom's combinators don't carry dedent state across lines on their own.
//! Nom only appears one level down, at the expression sub-grammar: literals,
//! casts, data refs, calls, and the boolean/comparison operators all parse
//! through ordinary combinators, matching how the rest of this crate's
//! nom-based parsing reads.
//!
//! A `ParseError` here means the source never produced a valid AST at all
//! (§6 "a `ParseError` aborts the whole project"); everything past that
//! point is a `Diagnostic` flowing through the usual sink.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, none_of, space0, space1};
use nom::combinator::{map, opt, recognize, value};
use nom::error::{ErrorKind, ParseError as NomParseError, VerboseError};
use nom::multi::many0;
use nom::sequence::{pair, preceded};
use nom::IResult;

use crate::ast::{
    BoolOpKind, CastKind, ClassDef, ClassMember, CmpOp, Decorator, Expr, ExceptHandler,
    FunctionDef, IndexKey, Item, Kwarg, Literal, Module, Span, Stmt, Target,
};
use crate::diagnostics::{Diagnostic, DiagnosticCode};

type PErr<'a> = VerboseError<&'a str>;
type PResult<'a> = IResult<&'a str, Expr, PErr<'a>>;

/// Why `parse_module` failed. Always carries a best-effort span; synthetic
/// ones (no source counterpart) are simply dropped when rendering a
/// `Diagnostic`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn into_diagnostic(self, source: &str) -> Diagnostic {
        let diag = Diagnostic::error(DiagnosticCode::SyntaxError, self.message);
        if self.span.is_synthetic() {
            diag
        } else {
            diag.with_span(crate::diagnostics::SourceSpan::from_span(source, self.span))
        }
    }
}

/// Parses `source` into a `Module`. The only public entry point into this
/// module (§6).
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let lines = lex_lines(source)?;
    let mut cur = Cursor {
        lines: &lines,
        pos: 0,
    };
    let mut items = Vec::new();
    while let Some(line) = cur.peek() {
        if line.indent != 0 {
            return Err(ParseError::new(
                "unexpected indentation at module scope",
                Span::new(line.text_start, line.text_end),
            ));
        }
        items.push(parse_item(&mut cur, source)?);
    }
    Ok(Module { items })
}

// =============================================================================
// Line lexer: indentation, comment-stripping, logical-line splitting.
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    indent: usize,
    text: &'a str,
    text_start: usize,
    text_end: usize,
    line_start: usize,
    line_end: usize,
}

fn strip_comment(s: &str) -> &str {
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = in_str {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                c if c == q => in_str = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            '#' => return &s[..i],
            _ => {}
        }
    }
    s
}

fn lex_lines(source: &str) -> Result<Vec<Line<'_>>, ParseError> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for raw in source.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();

        let mut content = raw;
        if let Some(s) = content.strip_suffix('\n') {
            content = s;
        }
        if let Some(s) = content.strip_suffix('\r') {
            content = s;
        }
        let line_end = line_start + content.len();

        let code = strip_comment(content);
        let trimmed_start = code.trim_start();
        if trimmed_start.trim_end().is_empty() {
            continue;
        }
        let indent = code.len() - trimmed_start.len();
        if code[..indent].contains('\t') {
            return Err(ParseError::new(
                "tabs are not supported for indentation; use spaces",
                Span::new(line_start, line_start + indent),
            ));
        }
        let text = trimmed_start.trim_end();
        let text_start = line_start + indent;
        let text_end = text_start + text.len();

        lines.push(Line {
            indent,
            text,
            text_start,
            text_end,
            line_start,
            line_end,
        });
    }
    Ok(lines)
}

struct Cursor<'a, 'b> {
    lines: &'b [Line<'a>],
    pos: usize,
}

impl<'a, 'b> Cursor<'a, 'b> {
    fn peek(&self) -> Option<&'b Line<'a>> {
        self.lines.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'b Line<'a>> {
        let line = self.lines.get(self.pos);
        self.pos += 1;
        line
    }

    fn last_end(&self) -> usize {
        self.lines[self.pos - 1].line_end
    }
}

fn expect_deeper_indent(cur: &Cursor, indent: usize) -> Result<usize, ParseError> {
    match cur.peek() {
        Some(line) if line.indent > indent => Ok(line.indent),
        Some(line) => Err(ParseError::new(
            "expected an indented block",
            Span::new(line.text_start, line.text_end),
        )),
        None => Err(ParseError::new(
            "expected an indented block, found end of input",
            Span::synthetic(),
        )),
    }
}

// =============================================================================
// Module-level items: classes and functions.
// =============================================================================

fn is_function_header(text: &str) -> bool {
    text.starts_with("def ") || text.starts_with("async def ")
}

fn parse_item(cur: &mut Cursor, source: &str) -> Result<Item, ParseError> {
    let mut decorators = Vec::new();
    while let Some(line) = cur.peek() {
        if line.text.starts_with('@') {
            let dec_line = cur.bump().unwrap();
            decorators.push(parse_decorator(source, dec_line)?);
        } else {
            break;
        }
    }

    let line = cur.peek().ok_or_else(|| {
        ParseError::new(
            "expected a class or function definition after a decorator",
            Span::synthetic(),
        )
    })?;

    if line.text.starts_with("class ") {
        if !decorators.is_empty() {
            return Err(ParseError::new(
                "decorators are not supported on class definitions",
                Span::new(line.text_start, line.text_end),
            ));
        }
        Ok(Item::Class(parse_class(cur, source)?))
    } else if is_function_header(line.text) {
        Ok(Item::Function(parse_function(cur, source, decorators)?))
    } else {
        Err(ParseError::new(
            format!("expected 'class' or 'def', found '{}'", line.text),
            Span::new(line.text_start, line.text_end),
        ))
    }
}

fn parse_decorator<'a>(source: &'a str, line: &Line<'a>) -> Result<Decorator, ParseError> {
    let text = line
        .text
        .strip_prefix('@')
        .ok_or_else(|| ParseError::new("expected '@'", Span::new(line.text_start, line.text_end)))?;
    match parse_full_expr(source, text)? {
        Expr::Name(name, span) => Ok(Decorator {
            name,
            args: vec![],
            kwargs: vec![],
            span,
        }),
        Expr::Call {
            func,
            args,
            kwargs,
            span,
        } => {
            let name = func.as_name().map(str::to_string).ok_or_else(|| {
                ParseError::new("a decorator must name a function directly", span)
            })?;
            Ok(Decorator {
                name,
                args,
                kwargs,
                span,
            })
        }
        other => Err(ParseError::new(
            "a decorator must be a bare name or a call",
            other.span(),
        )),
    }
}

fn parse_class_header(text: &str) -> Result<String, ParseError> {
    let rest = text
        .strip_prefix("class ")
        .ok_or_else(|| ParseError::new("expected 'class'", Span::synthetic()))?;
    let rest = rest.trim_end_matches(':').trim();
    let name = match rest.find('(') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    Ok(name.trim().to_string())
}

fn parse_class(cur: &mut Cursor, source: &str) -> Result<ClassDef, ParseError> {
    let header = cur.bump().unwrap();
    let name = parse_class_header(header.text)?;
    let header_indent = header.indent;
    let body_indent = expect_deeper_indent(cur, header_indent)?;

    let mut members = Vec::new();
    let mut last_end = header.text_end;
    while let Some(line) = cur.peek() {
        if line.indent < body_indent {
            break;
        }
        if line.indent > body_indent {
            return Err(ParseError::new(
                "unexpected indentation in class body",
                Span::new(line.text_start, line.text_end),
            ));
        }
        if is_function_header(line.text) {
            let func = parse_function(cur, source, vec![])?;
            last_end = func.span.end;
            members.push(ClassMember::Method(func));
        } else {
            let assign_line = cur.bump().unwrap();
            let (member_name, value) = parse_class_assign(source, assign_line)?;
            last_end = assign_line.text_end;
            members.push(ClassMember::Assign {
                name: member_name,
                value,
                span: Span::new(assign_line.text_start, assign_line.text_end),
            });
        }
    }

    Ok(ClassDef {
        name,
        body: members,
        span: Span::new(header.line_start, last_end),
    })
}

fn find_top_level_eq(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_str: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_str {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_str = Some(c);
                i += 1;
            }
            b'=' => {
                let prev_is_cmp = i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>');
                let next_is_eq = i + 1 < bytes.len() && bytes[i + 1] == b'=';
                if !prev_is_cmp && !next_is_eq {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn parse_class_assign<'a>(source: &'a str, line: &Line<'a>) -> Result<(String, Expr), ParseError> {
    let text = line.text;
    let eq = find_top_level_eq(text).ok_or_else(|| {
        ParseError::new(
            "expected 'name = value' in class body",
            Span::new(line.text_start, line.text_end),
        )
    })?;
    let name = text[..eq].trim().to_string();
    let value_text = text[eq + 1..].trim();
    let value = parse_full_expr(source, value_text)?;
    Ok((name, value))
}

fn parse_function_header(text: &str) -> Result<(String, Vec<String>), ParseError> {
    let text = text.strip_prefix("async ").unwrap_or(text);
    let rest = text
        .strip_prefix("def ")
        .ok_or_else(|| ParseError::new("expected 'def'", Span::synthetic()))?;
    let open = rest
        .find('(')
        .ok_or_else(|| ParseError::new("expected '(' in function header", Span::synthetic()))?;
    let name = rest[..open].trim().to_string();
    let after_open = &rest[open + 1..];
    let close = after_open
        .rfind(')')
        .ok_or_else(|| ParseError::new("expected ')' in function header", Span::synthetic()))?;
    let params_str = &after_open[..close];
    let params = if params_str.trim().is_empty() {
        vec![]
    } else {
        params_str
            .split(',')
            .map(|p| p.trim().split(':').next().unwrap_or("").trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    Ok((name, params))
}

fn parse_function(
    cur: &mut Cursor,
    source: &str,
    decorators: Vec<Decorator>,
) -> Result<FunctionDef, ParseError> {
    let header = cur.bump().unwrap();
    let (name, params) = parse_function_header(header.text)?;
    let header_indent = header.indent;

    match cur.peek() {
        Some(line) if line.indent > header_indent => {
            let body_indent = line.indent;
            let body_start = line.line_start;
            let body = parse_block(cur, body_indent, source)?;
            let body_end = cur.last_end();
            Ok(FunctionDef {
                name,
                params,
                decorators,
                body,
                span: Span::new(header.line_start, body_end),
                body_span: Span::new(body_start, body_end),
            })
        }
        _ => Ok(FunctionDef {
            name,
            params,
            decorators,
            body: vec![],
            span: Span::new(header.line_start, header.text_end),
            body_span: Span::new(header.text_end, header.text_end),
        }),
    }
}

// =============================================================================
// Statement-level grammar.
// =============================================================================

fn parse_block(cur: &mut Cursor, indent: usize, source: &str) -> Result<Vec<Stmt>, ParseError> {
    let mut stmts = Vec::new();
    while let Some(line) = cur.peek() {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(ParseError::new(
                "unexpected indentation",
                Span::new(line.text_start, line.text_end),
            ));
        }
        stmts.push(parse_stmt(cur, source)?);
    }
    if stmts.is_empty() {
        return Err(ParseError::new("expected an indented block", Span::synthetic()));
    }
    Ok(stmts)
}

fn parse_stmt(cur: &mut Cursor, source: &str) -> Result<Stmt, ParseError> {
    let line = *cur.peek().unwrap();
    let text = line.text;

    if text == "pass" {
        cur.bump();
        return Ok(Stmt::Pass {
            span: Span::new(line.text_start, line.text_end),
        });
    }
    if text.starts_with("if ") && text.ends_with(':') {
        return parse_if(cur, source, line.indent);
    }
    if text.starts_with("try")
        && text.ends_with(':')
        && text["try".len()..text.len() - 1].trim().is_empty()
    {
        return parse_try(cur, source, line.indent);
    }
    if text.starts_with("with ") && text.ends_with(':') {
        return parse_with(cur, source, line.indent);
    }
    if let Some(rest) = text.strip_prefix("raise") {
        cur.bump();
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(ParseError::new(
                "raise requires an exception expression",
                Span::new(line.text_start, line.text_end),
            ));
        }
        let exc = parse_full_expr(source, rest)?;
        return Ok(Stmt::Raise {
            exc,
            span: Span::new(line.text_start, line.text_end),
        });
    }
    if let Some(rest) = text.strip_prefix("return") {
        cur.bump();
        let rest = rest.trim();
        let value = if rest.is_empty() {
            None
        } else {
            Some(parse_full_expr(source, rest)?)
        };
        return Ok(Stmt::Return {
            value,
            span: Span::new(line.text_start, line.text_end),
        });
    }
    if text.starts_with("data[") {
        return parse_data_assignment(cur, source);
    }

    cur.bump();
    let expr = parse_full_expr(source, text)?;
    Ok(Stmt::ExprStmt(expr, Span::new(line.text_start, line.text_end)))
}

fn parse_data_assignment(cur: &mut Cursor, source: &str) -> Result<Stmt, ParseError> {
    let line = cur.bump().unwrap();
    let text = line.text;
    let (target, rest) = parse_data_target_prefix(source, text)?;
    let rest_trim = rest.trim_start();

    for op in ["+=", "-=", "*=", "/="] {
        if let Some(value_text) = rest_trim.strip_prefix(op) {
            let value = parse_full_expr(source, value_text.trim())?;
            return Ok(Stmt::AugAssign {
                target,
                op: op.to_string(),
                value,
                span: Span::new(line.text_start, line.text_end),
            });
        }
    }
    if let Some(after_eq) = rest_trim.strip_prefix('=') {
        if !after_eq.starts_with('=') {
            let value = parse_full_expr(source, after_eq.trim())?;
            return Ok(Stmt::Assign {
                target,
                value,
                span: Span::new(line.text_start, line.text_end),
            });
        }
    }
    Err(ParseError::new(
        "expected '=' (or an augmented assignment operator) after a data[...] target",
        Span::new(line.text_start, line.text_end),
    ))
}

fn parse_data_target_prefix<'a>(
    source: &'a str,
    text: &'a str,
) -> Result<(Target, &'a str), ParseError> {
    match parse_data_ref(source, text) {
        Ok((rest, Expr::DataRef(path, span))) => Ok((Target { path, span }, rest)),
        _ => Err(ParseError::new(
            "expected a data[...] target",
            Span::new(offset_of(source, text), offset_of(source, text)),
        )),
    }
}

fn extract_condition<'a>(text: &'a str, kw: &str) -> Result<&'a str, ParseError> {
    let rest = text
        .strip_prefix(kw)
        .ok_or_else(|| ParseError::new("expected a keyword", Span::synthetic()))?;
    let cond = rest
        .strip_suffix(':')
        .ok_or_else(|| ParseError::new("expected ':' at the end of this header", Span::synthetic()))?;
    Ok(cond.trim())
}

fn parse_if(cur: &mut Cursor, source: &str, indent: usize) -> Result<Stmt, ParseError> {
    let header = cur.bump().unwrap();
    let cond_text = extract_condition(header.text, "if ")?;
    let test = parse_full_expr(source, cond_text)?;
    let body_indent = expect_deeper_indent(cur, indent)?;
    let body = parse_block(cur, body_indent, source)?;
    let (orelse, end) = parse_else_chain(cur, source, indent, header.text_end)?;
    Ok(Stmt::If {
        test,
        body,
        orelse,
        span: Span::new(header.line_start, end),
    })
}

/// Parses a trailing `elif`/`else` chain at the same indent as the original
/// `if`. An `elif` is represented, as in the host language's own AST, as a
/// single nested `If` inside `orelse` — `compile_if` in `visitor.rs` later
/// flattens that nesting back into one `Choice` state's branch list.
fn parse_else_chain(
    cur: &mut Cursor,
    source: &str,
    indent: usize,
    default_end: usize,
) -> Result<(Vec<Stmt>, usize), ParseError> {
    let line = match cur.peek() {
        Some(line) if line.indent == indent => line,
        _ => return Ok((vec![], default_end)),
    };

    if line.text.starts_with("elif ") && line.text.ends_with(':') {
        let header = cur.bump().unwrap();
        let cond_text = extract_condition(header.text, "elif ")?;
        let test = parse_full_expr(source, cond_text)?;
        let body_indent = expect_deeper_indent(cur, indent)?;
        let body = parse_block(cur, body_indent, source)?;
        let (orelse, end) = parse_else_chain(cur, source, indent, header.text_end)?;
        let nested = Stmt::If {
            test,
            body,
            orelse,
            span: Span::new(header.line_start, end),
        };
        return Ok((vec![nested], end));
    }

    if line.text.starts_with("else") && line.text.ends_with(':') {
        let inner = line.text["else".len()..line.text.len() - 1].trim();
        if inner.is_empty() {
            cur.bump();
            let body_indent = expect_deeper_indent(cur, indent)?;
            let body = parse_block(cur, body_indent, source)?;
            let end = cur.last_end();
            return Ok((body, end));
        }
    }

    Ok((vec![], default_end))
}

fn parse_except_header(text: &str) -> Result<(Vec<String>, bool), ParseError> {
    if text == "except:" {
        return Ok((vec![], true));
    }
    let rest = text
        .strip_prefix("except")
        .ok_or_else(|| ParseError::new("expected 'except'", Span::synthetic()))?
        .trim_start();
    let inner = rest
        .strip_suffix(':')
        .ok_or_else(|| ParseError::new("an except clause must end with ':'", Span::synthetic()))?
        .trim();
    if inner.is_empty() {
        return Ok((vec![], true));
    }
    if let Some(tuple_inner) = inner.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let names = tuple_inner
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok((names, false))
    } else {
        Ok((vec![inner.to_string()], false))
    }
}

fn parse_try(cur: &mut Cursor, source: &str, indent: usize) -> Result<Stmt, ParseError> {
    let header = cur.bump().unwrap();
    let body_indent = expect_deeper_indent(cur, indent)?;
    let body = parse_block(cur, body_indent, source)?;

    let mut handlers = Vec::new();
    let mut last_end = header.text_end;
    while let Some(line) = cur.peek() {
        if line.indent != indent || !line.text.starts_with("except") {
            break;
        }
        let except_line = cur.bump().unwrap();
        let (exc_types, is_bare) = parse_except_header(except_line.text)?;
        let handler_body_indent = expect_deeper_indent(cur, indent)?;
        let handler_body = parse_block(cur, handler_body_indent, source)?;
        last_end = cur.last_end();
        handlers.push(ExceptHandler {
            exc_types,
            is_bare,
            body: handler_body,
            span: Span::new(except_line.text_start, except_line.text_end),
        });
    }
    if handlers.is_empty() {
        return Err(ParseError::new(
            "try requires at least one except clause",
            Span::new(header.text_start, header.text_end),
        ));
    }

    Ok(Stmt::Try {
        body,
        handlers,
        span: Span::new(header.line_start, last_end),
    })
}

fn parse_with(cur: &mut Cursor, source: &str, indent: usize) -> Result<Stmt, ParseError> {
    let header = cur.bump().unwrap();
    let rest = header.text.strip_prefix("with ").ok_or_else(|| {
        ParseError::new("expected 'with'", Span::new(header.text_start, header.text_end))
    })?;
    let expr_text = rest
        .strip_suffix(':')
        .ok_or_else(|| {
            ParseError::new(
                "a with header must end with ':'",
                Span::new(header.text_start, header.text_end),
            )
        })?
        .trim();
    let context_expr = parse_full_expr(source, expr_text)?;
    let body_indent = expect_deeper_indent(cur, indent)?;
    let body = parse_block(cur, body_indent, source)?;
    let end = cur.last_end();
    Ok(Stmt::With {
        context_expr,
        body,
        span: Span::new(header.line_start, end),
    })
}

// =============================================================================
// Expression grammar (nom combinators).
// =============================================================================

fn offset_of(source: &str, s: &str) -> usize {
    s.as_ptr() as usize - source.as_ptr() as usize
}

fn span_between(source: &str, start_slice: &str, end_slice: &str) -> Span {
    Span::new(offset_of(source, start_slice), offset_of(source, end_slice))
}

fn nom_err(input: &str) -> nom::Err<PErr<'_>> {
    nom::Err::Error(PErr::from_error_kind(input, ErrorKind::Verify))
}

fn parse_full_expr(source: &str, text: &str) -> Result<Expr, ParseError> {
    match parse_expr(source, text) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(ParseError::new(
            format!("unexpected trailing input: '{}'", rest.trim()),
            Span::new(offset_of(source, rest), offset_of(source, rest) + rest.trim().len()),
        )),
        Err(_) => Err(ParseError::new(
            format!("failed to parse expression: '{}'", text.trim()),
            Span::new(offset_of(source, text), offset_of(source, text) + text.trim_end().len()),
        )),
    }
}

fn word_boundary(input: &str) -> IResult<&str, (), PErr<'_>> {
    match input.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => Err(nom_err(input)),
        _ => Ok((input, ())),
    }
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str, PErr<'a>> {
    move |input: &'a str| {
        let (rest, matched) = tag(kw)(input)?;
        let (rest, _) = word_boundary(rest)?;
        Ok((rest, matched))
    }
}

fn parse_ident_raw(input: &str) -> IResult<&str, &str, PErr<'_>> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn parse_number_text(input: &str) -> IResult<&str, &str, PErr<'_>> {
    recognize(pair(opt(char('-')), pair(digit1, opt(pair(char('.'), digit1)))))(input)
}

fn parse_int_literal_raw(input: &str) -> IResult<&str, i64, PErr<'_>> {
    let (rest, text) = parse_number_text(input)?;
    if text.contains('.') {
        return Err(nom_err(input));
    }
    text.parse::<i64>()
        .map(|v| (rest, v))
        .map_err(|_| nom_err(input))
}

fn parse_float_literal_raw(input: &str) -> IResult<&str, f64, PErr<'_>> {
    let (rest, text) = parse_number_text(input)?;
    if !text.contains('.') {
        return Err(nom_err(input));
    }
    text.parse::<f64>()
        .map(|v| (rest, v))
        .map_err(|_| nom_err(input))
}

fn string_body(quote: char) -> impl Fn(&str) -> IResult<&str, String, PErr<'_>> {
    move |input: &str| {
        alt((
            map(tag(if quote == '"' { "\"\"" } else { "''" }), |_| String::new()),
            escaped_transform(
                none_of(match quote {
                    '"' => "\"\\",
                    _ => "'\\",
                }),
                '\\',
                alt((
                    value('\n', char('n')),
                    value('\t', char('t')),
                    value('\\', char('\\')),
                    value('"', char('"')),
                    value('\'', char('\'')),
                )),
            ),
        ))(input)
    }
}

fn parse_string_literal_raw(input: &str) -> IResult<&str, String, PErr<'_>> {
    alt((
        nom::sequence::delimited(char('"'), string_body('"'), char('"')),
        nom::sequence::delimited(char('\''), string_body('\''), char('\'')),
    ))(input)
}

fn parse_index_key(input: &str) -> IResult<&str, IndexKey, PErr<'_>> {
    alt((
        map(parse_string_literal_raw, IndexKey::Str),
        map(parse_int_literal_raw, IndexKey::Int),
    ))(input)
}

fn parse_data_ref<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (rest, ident) = parse_ident_raw(input)?;
    if ident != "data" {
        return Err(nom_err(input));
    }
    let mut rest = rest;
    let mut path = Vec::new();
    loop {
        let (after_ws, _) = space0::<_, PErr>(rest)?;
        match char::<_, PErr>('[')(after_ws) {
            Ok((after_bracket, _)) => {
                let (after_ws2, _) = space0::<_, PErr>(after_bracket)?;
                let (after_key, key) = parse_index_key(after_ws2)?;
                let (after_ws3, _) = space0::<_, PErr>(after_key)?;
                let (after_close, _) = char::<_, PErr>(']')(after_ws3)?;
                path.push(key);
                rest = after_close;
            }
            Err(_) => break,
        }
    }
    if path.is_empty() {
        return Err(nom_err(input));
    }
    let span = span_between(source, start, rest);
    Ok((rest, Expr::DataRef(path, span)))
}

fn parse_cast<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (rest, ident) = parse_ident_raw(input)?;
    let kind = CastKind::from_name(ident).ok_or_else(|| nom_err(input))?;
    let (rest, _) = char('(')(rest)?;
    let (rest, _) = space0::<_, PErr>(rest)?;
    let (rest, arg) = parse_data_ref(source, rest)?;
    let (rest, _) = space0::<_, PErr>(rest)?;
    let (rest, _) = char(')')(rest)?;
    let span = span_between(source, start, rest);
    Ok((
        rest,
        Expr::Cast {
            kind,
            arg: Box::new(arg),
            span,
        },
    ))
}

fn parse_literal<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (rest, lit) = alt((
        map(pair(tag("True"), word_boundary), |_| Literal::Bool(true)),
        map(pair(tag("False"), word_boundary), |_| Literal::Bool(false)),
        map(pair(tag("None"), word_boundary), |_| Literal::None),
        map(parse_string_literal_raw, Literal::Str),
        map(parse_float_literal_raw, Literal::Float),
        map(parse_int_literal_raw, Literal::Int),
    ))(input)?;
    let span = span_between(source, start, rest);
    Ok((rest, Expr::Literal(lit, span)))
}

fn parse_dict<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (rest, _) = char('{')(input)?;
    let (rest, _) = space0::<_, PErr>(rest)?;
    if let Ok((after_close, _)) = char::<_, PErr>('}')(rest) {
        let span = span_between(source, start, after_close);
        return Ok((
            after_close,
            Expr::Dict {
                entries: vec![],
                span,
            },
        ));
    }

    let mut entries = Vec::new();
    let mut rest = rest;
    loop {
        let key_start = rest;
        let (after_key, key_str) = parse_string_literal_raw(rest)?;
        let key_span = span_between(source, key_start, after_key);
        let key_expr = Expr::Literal(Literal::Str(key_str), key_span);
        let (after_ws, _) = space0::<_, PErr>(after_key)?;
        let (after_colon, _) = char::<_, PErr>(':')(after_ws)?;
        let (after_ws2, _) = space0::<_, PErr>(after_colon)?;
        let (after_val, val) = parse_expr(source, after_ws2)?;
        entries.push((key_expr, val));
        let (after_ws3, _) = space0::<_, PErr>(after_val)?;
        rest = after_ws3;
        if let Ok((after_comma, _)) = char::<_, PErr>(',')(rest) {
            let (after_ws4, _) = space0::<_, PErr>(after_comma)?;
            rest = after_ws4;
            continue;
        }
        break;
    }
    let (rest, _) = char('}')(rest)?;
    let span = span_between(source, start, rest);
    Ok((rest, Expr::Dict { entries, span }))
}

fn parse_arg_list<'a>(
    source: &'a str,
    input: &'a str,
) -> IResult<&'a str, (Vec<Expr>, Vec<Kwarg>), PErr<'a>> {
    let mut args = Vec::new();
    let mut kwargs = Vec::new();

    let (after_ws, _) = space0::<_, PErr>(input)?;
    if after_ws.starts_with(')') {
        return Ok((after_ws, (args, kwargs)));
    }

    let mut rest = after_ws;
    loop {
        let mut consumed_kwarg = false;
        if let Ok((after_name, name)) = parse_ident_raw(rest) {
            let (after_ws2, _) = space0::<_, PErr>(after_name)?;
            if let Ok((after_eq, _)) = char::<_, PErr>('=')(after_ws2) {
                if !after_eq.starts_with('=') {
                    let (after_ws3, _) = space0::<_, PErr>(after_eq)?;
                    let (after_val, val) = parse_expr(source, after_ws3)?;
                    kwargs.push(Kwarg {
                        name: name.to_string(),
                        value: val,
                    });
                    rest = after_val;
                    consumed_kwarg = true;
                }
            }
        }
        if !consumed_kwarg {
            let (after_val, val) = parse_expr(source, rest)?;
            args.push(val);
            rest = after_val;
        }

        let (after_ws, _) = space0::<_, PErr>(rest)?;
        rest = after_ws;
        if let Ok((after_comma, _)) = char::<_, PErr>(',')(rest) {
            let (after_ws, _) = space0::<_, PErr>(after_comma)?;
            rest = after_ws;
            continue;
        }
        break;
    }
    Ok((rest, (args, kwargs)))
}

fn parse_name_or_call<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (mut rest, ident) = parse_ident_raw(input)?;
    let mut expr = Expr::Name(ident.to_string(), span_between(source, start, rest));
    loop {
        if let Ok((after_dot, _)) = char::<_, PErr>('.')(rest) {
            let (after_attr, attr) = parse_ident_raw(after_dot)?;
            let span = span_between(source, start, after_attr);
            expr = Expr::Attribute {
                value: Box::new(expr),
                attr: attr.to_string(),
                span,
            };
            rest = after_attr;
            continue;
        }
        if let Ok((after_paren, _)) = char::<_, PErr>('(')(rest) {
            let (after_ws, _) = space0::<_, PErr>(after_paren)?;
            let (after_args, (args, kwargs)) = parse_arg_list(source, after_ws)?;
            let (after_ws2, _) = space0::<_, PErr>(after_args)?;
            let (after_close, _) = char::<_, PErr>(')')(after_ws2)?;
            let span = span_between(source, start, after_close);
            expr = Expr::Call {
                func: Box::new(expr),
                args,
                kwargs,
                span,
            };
            rest = after_close;
            continue;
        }
        break;
    }
    Ok((rest, expr))
}

fn parse_paren<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let (rest, _) = char('(')(input)?;
    let (rest, _) = space0::<_, PErr>(rest)?;
    let (rest, expr) = parse_expr(source, rest)?;
    let (rest, _) = space0::<_, PErr>(rest)?;
    let (rest, _) = char(')')(rest)?;
    Ok((rest, expr))
}

fn parse_operand<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    alt((
        |i| parse_cast(source, i),
        |i| parse_data_ref(source, i),
        |i| parse_literal(source, i),
        |i| parse_dict(source, i),
        |i| parse_name_or_call(source, i),
        |i| parse_paren(source, i),
    ))(input)
}

fn parse_cmp_op(input: &str) -> IResult<&str, CmpOp, PErr<'_>> {
    alt((
        map(tag("=="), |_| CmpOp::Eq),
        map(tag("!="), |_| CmpOp::NotEq),
        map(tag("<="), |_| CmpOp::LtEq),
        map(tag(">="), |_| CmpOp::GtEq),
        map(tag("<"), |_| CmpOp::Lt),
        map(tag(">"), |_| CmpOp::Gt),
        map(
            pair(keyword("is"), opt(preceded(space1, keyword("not")))),
            |(_, not)| if not.is_some() { CmpOp::IsNot } else { CmpOp::Is },
        ),
    ))(input)
}

fn parse_comparison<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (rest, left) = parse_operand(source, input)?;
    let (rest_ws, _) = space0::<_, PErr>(rest)?;
    match parse_cmp_op(rest_ws) {
        Ok((rest2, op)) => {
            let (rest2, _) = space0::<_, PErr>(rest2)?;
            let (rest3, right) = parse_operand(source, rest2)?;
            let span = span_between(source, start, rest3);
            Ok((
                rest3,
                Expr::Compare {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                    span,
                },
            ))
        }
        Err(_) => Ok((rest, left)),
    }
}

fn parse_not<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    if let Ok((rest, _)) = keyword("not")(input) {
        let (rest, _) = space1::<_, PErr>(rest)?;
        let (rest, operand) = parse_not(source, rest)?;
        let span = span_between(source, start, rest);
        return Ok((
            rest,
            Expr::UnaryNot {
                operand: Box::new(operand),
                span,
            },
        ));
    }
    parse_comparison(source, input)
}

fn parse_and<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (mut rest, first) = parse_not(source, input)?;
    let mut values = vec![first];
    loop {
        let (after_ws, _) = space0::<_, PErr>(rest)?;
        match keyword("and")(after_ws) {
            Ok((after_kw, _)) => {
                let (after_ws2, _) = space0::<_, PErr>(after_kw)?;
                let (next_rest, v) = parse_not(source, after_ws2)?;
                values.push(v);
                rest = next_rest;
            }
            Err(_) => break,
        }
    }
    if values.len() == 1 {
        Ok((rest, values.pop().unwrap()))
    } else {
        let span = span_between(source, start, rest);
        Ok((
            rest,
            Expr::BoolOp {
                op: BoolOpKind::And,
                values,
                span,
            },
        ))
    }
}

fn parse_or<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    let start = input;
    let (mut rest, first) = parse_and(source, input)?;
    let mut values = vec![first];
    loop {
        let (after_ws, _) = space0::<_, PErr>(rest)?;
        match keyword("or")(after_ws) {
            Ok((after_kw, _)) => {
                let (after_ws2, _) = space0::<_, PErr>(after_kw)?;
                let (next_rest, v) = parse_and(source, after_ws2)?;
                values.push(v);
                rest = next_rest;
            }
            Err(_) => break,
        }
    }
    if values.len() == 1 {
        Ok((rest, values.pop().unwrap()))
    } else {
        let span = span_between(source, start, rest);
        Ok((
            rest,
            Expr::BoolOp {
                op: BoolOpKind::Or,
                values,
                span,
            },
        ))
    }
}

fn parse_expr<'a>(source: &'a str, input: &'a str) -> PResult<'a> {
    parse_or(source, input)
}
