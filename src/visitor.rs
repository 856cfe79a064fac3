//! Statement Visitor (§4.1): walks the statement list of a state-machine
//! function body in document order, emitting fragments and linking them
//! as it goes via the primitives in `linker`.
//!
//! Dispatch is explicit: one match arm per recognized `ast::Stmt` shape
//! (Design Note "AST visitor pattern"), not a generic trait-object walk.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{self, Expr, IndexKey, Kwarg, Literal, Stmt};
use crate::choice;
use crate::diagnostics::{reference_error, shape_error, syntax_unsupported, Diagnostic};
use crate::fragment::{
    Catch, ChoiceBranch, ChoiceState, FailState, MapState, ParallelState, PassState,
    Retry, State, StateKey, SubMachine, SucceedState, TaskState, WaitSpec, WaitState,
};
use crate::linker::{self, KeyCounter};
use crate::task::TaskDefinition;

/// Read-only view of the rest of the project the visitor needs to
/// resolve references (§7 ReferenceError): task classes, and the other
/// module-level functions that can be named as Map iterators or Parallel
/// branches.
pub struct Resolver<'a> {
    pub tasks: &'a HashMap<String, TaskDefinition>,
    pub functions: &'a HashMap<String, ast::FunctionDef>,
}

/// The in-progress state of one sub-machine being built: the current
/// `states` table, its key counter, and the diagnostics raised while
/// building it. A fresh `VisitorCtx` is created for the top-level
/// function and for each Map iterator / Parallel branch (their own
/// isolated key namespace, Design Note "Nested sub-machines").
pub struct VisitorCtx<'a> {
    pub resolver: &'a Resolver<'a>,
    pub states: BTreeMap<String, State>,
    pub counter: KeyCounter,
}

impl<'a> VisitorCtx<'a> {
    pub fn new(resolver: &'a Resolver<'a>) -> Self {
        Self {
            resolver,
            states: BTreeMap::new(),
            counter: KeyCounter::new(),
        }
    }
}

/// The result of compiling one statement (or a nested block that acts
/// like one, e.g. an `if` chain): where control enters, and the set of
/// states whose `Next` is still dangling and must be linked to whatever
/// follows.
struct EmitUnit {
    entry: StateKey,
    exits: Vec<StateKey>,
}

fn emit(ctx: &mut VisitorCtx, prefix: &'static str, state: State) -> Result<EmitUnit, Diagnostic> {
    let key = ctx.counter.next(prefix);
    tracing::trace!(key = key.as_str(), "synthesized a state key");
    emit_with_key(ctx, key, state)
}

fn emit_with_key(
    ctx: &mut VisitorCtx,
    key: StateKey,
    state: State,
) -> Result<EmitUnit, Diagnostic> {
    linker::insert_unique(&mut ctx.states, &key, state)?;
    Ok(EmitUnit {
        entry: key.clone(),
        exits: vec![key],
    })
}

/// Compiles an ordered list of statements into one `EmitUnit`, linking
/// consecutive statements to each other immediately (their relative order
/// fully determines that edge). `pass` statements are no-ops and do not
/// contribute a unit. An empty-after-filtering body is a `ShapeError` —
/// callers that allow an empty body (the top-level function) special-case
/// it themselves instead of calling this helper.
fn compile_block(ctx: &mut VisitorCtx, stmts: &[Stmt]) -> Result<EmitUnit, Diagnostic> {
    let mut units = Vec::new();
    for stmt in stmts {
        if matches!(stmt, Stmt::Pass { .. }) {
            continue;
        }
        units.push(compile_stmt(ctx, stmt)?);
    }
    if units.is_empty() {
        return Err(shape_error("a block must contain at least one statement"));
    }
    let entry = units[0].entry.clone();
    for pair in units.windows(2) {
        linker::link_sequential(&mut ctx.states, &pair[0].exits, &pair[1].entry);
    }
    let exits = units.last().unwrap().exits.clone();
    Ok(EmitUnit { entry, exits })
}

fn kwarg<'a>(kwargs: &'a [Kwarg], name: &str) -> Option<&'a Expr> {
    kwargs.iter().find(|k| k.name == name).map(|k| &k.value)
}

fn literal_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Literal(Literal::Int(i), _) => Some(*i),
        _ => None,
    }
}

fn literal_float(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Literal(Literal::Float(f), _) => Some(*f),
        Expr::Literal(Literal::Int(i), _) => Some(*i as f64),
        _ => None,
    }
}

fn literal_str(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Literal(Literal::Str(s), _) => Some(s.as_str()),
        _ => None,
    }
}

fn render_path(path: &[IndexKey]) -> String {
    let mut s = String::from("$");
    for seg in path {
        s.push_str(&seg.to_path_segment());
    }
    s
}

fn json_of_literal(lit: &Literal) -> serde_json::Value {
    match lit {
        Literal::Str(s) => serde_json::Value::String(s.clone()),
        Literal::Int(i) => serde_json::Value::from(*i),
        Literal::Float(f) => serde_json::Value::from(*f),
        Literal::Bool(b) => serde_json::Value::Bool(*b),
        Literal::None => serde_json::Value::Null,
    }
}

fn json_of_expr(expr: &Expr) -> Result<serde_json::Value, Diagnostic> {
    match expr {
        Expr::Literal(lit, _) => Ok(json_of_literal(lit)),
        Expr::Dict { entries, .. } => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = literal_str(k)
                    .ok_or_else(|| shape_error("dict literal keys must be string literals"))?
                    .to_string();
                map.insert(key, json_of_expr(v)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        _ => Err(shape_error(
            "only literal and dict-literal values are supported as Pass results",
        )),
    }
}

fn call_func_name(expr: &Expr) -> Option<&str> {
    expr.as_call().and_then(|(func, ..)| func.as_name())
}

/// `TaskClass(arg?, key=..., timeout=...)` lowering shared by the
/// subscript-assignment and bare-expression statement shapes.
fn compile_task_call(
    ctx: &mut VisitorCtx,
    call: &Expr,
    result_path: Option<String>,
) -> Result<EmitUnit, Diagnostic> {
    let (func, args, kwargs) = call
        .as_call()
        .ok_or_else(|| shape_error("expected a task call"))?;
    let class_name = func
        .as_name()
        .ok_or_else(|| shape_error("task call must name a task class directly"))?;
    let task_def = ctx
        .resolver
        .tasks
        .get(class_name)
        .ok_or_else(|| reference_error("task class", class_name))?;

    // §4.1: "If `arg` is a subscript on `data`, `input_path` = that JSON
    // path; otherwise `$`."
    let input_path = args.first().map(|arg| match arg.as_data_ref() {
        Some(path) => render_path(path),
        None => "$".to_string(),
    });

    let mut result_path = result_path;
    if result_path.is_some() && !task_def.service.allows_result_path() {
        // Design Note (a): assigning a result from a value-less service is
        // a warning, not a hard error; ResultPath becomes null.
        tracing::warn!(
            task_class = class_name,
            service = task_def.service.as_str(),
            "result_path assignment on a service that cannot return a value; dropping it"
        );
        result_path = None;
    }

    let explicit_key = kwarg(kwargs, "key")
        .and_then(literal_str)
        .map(StateKey::new);
    let timeout = kwarg(kwargs, "timeout")
        .and_then(literal_int)
        .map(|v| v as u32)
        .unwrap_or(task_def.timeout);

    for kw in kwargs {
        if !matches!(kw.name.as_str(), "key" | "timeout") {
            return Err(shape_error(format!(
                "unexpected argument '{}' at task call site",
                kw.name
            )));
        }
    }

    let state = State::Task(TaskState {
        comment: None,
        task_class: class_name.to_string(),
        resource: task_def.service.compute_resource(task_def),
        result_path,
        input_path,
        timeout_seconds: timeout,
        heartbeat_seconds: task_def.heartbeat_interval,
        retry: vec![],
        catch: vec![],
        next: None,
    });

    match explicit_key {
        Some(key) => emit_with_key(ctx, key, state),
        None => emit(ctx, "Task", state),
    }
}

fn compile_wait(ctx: &mut VisitorCtx, kwargs: &[Kwarg]) -> Result<EmitUnit, Diagnostic> {
    let seconds = kwarg(kwargs, "seconds");
    let timestamp = kwarg(kwargs, "timestamp");
    let spec = match (seconds, timestamp) {
        (Some(s), None) => match s {
            Expr::DataRef(path, _) => WaitSpec::SecondsPath(render_path(path)),
            _ => WaitSpec::Seconds(
                literal_int(s).ok_or_else(|| shape_error("wait(seconds=...) must be an integer or data reference"))? as u64,
            ),
        },
        (None, Some(t)) => match t {
            Expr::DataRef(path, _) => WaitSpec::TimestampPath(render_path(path)),
            _ => WaitSpec::Timestamp(
                literal_str(t)
                    .ok_or_else(|| shape_error("wait(timestamp=...) must be a string or data reference"))?
                    .to_string(),
            ),
        },
        (Some(_), Some(_)) => {
            return Err(shape_error("wait() accepts exactly one of seconds or timestamp"))
        }
        (None, None) => {
            return Err(shape_error("wait() requires seconds or timestamp"))
        }
    };
    emit(
        ctx,
        "Wait",
        State::Wait(WaitState {
            comment: None,
            spec,
            next: None,
        }),
    )
}

fn compile_map(
    ctx: &mut VisitorCtx,
    args: &[Expr],
    kwargs: &[Kwarg],
) -> Result<EmitUnit, Diagnostic> {
    let items_expr = args
        .first()
        .ok_or_else(|| shape_error("map() requires an items expression"))?;
    let items_path = render_path(
        items_expr
            .as_data_ref()
            .ok_or_else(|| shape_error("map()'s items argument must be a data reference"))?,
    );
    let iterator_name = args
        .get(1)
        .and_then(|e| e.as_name())
        .ok_or_else(|| shape_error("map()'s iterator argument must name a function"))?;
    let iterator_fn = ctx
        .resolver
        .functions
        .get(iterator_name)
        .ok_or_else(|| reference_error("iterator function", iterator_name))?;
    let max_concurrency = kwarg(kwargs, "max_concurrency")
        .and_then(literal_int)
        .map(|v| v as u32);

    let iterator = compile_sub_machine(ctx.resolver, &iterator_fn.body)?;

    emit(
        ctx,
        "Map",
        State::Map(MapState {
            comment: None,
            items_path,
            max_concurrency,
            iterator,
            next: None,
        }),
    )
}

fn compile_parallel(ctx: &mut VisitorCtx, args: &[Expr]) -> Result<EmitUnit, Diagnostic> {
    if args.is_empty() {
        return Err(shape_error("parallel() requires at least one branch function"));
    }
    let mut branches = Vec::with_capacity(args.len());
    for arg in args {
        let name = arg.as_name().ok_or_else(|| {
            reference_error(
                "branch function",
                call_func_name(arg).unwrap_or("<non-function argument>"),
            )
        })?;
        let branch_fn = ctx
            .resolver
            .functions
            .get(name)
            .ok_or_else(|| reference_error("branch function", name))?;
        branches.push(compile_sub_machine(ctx.resolver, &branch_fn.body)?);
    }
    emit(
        ctx,
        "Parallel",
        State::Parallel(ParallelState {
            comment: None,
            branches,
            next: None,
        }),
    )
}

/// Compiles a function body into a fully-linked, isolated sub-machine
/// (Map iterator or Parallel branch): its own `states` table and key
/// counter (Design Note "Nested sub-machines").
fn compile_sub_machine(resolver: &Resolver, body: &[Stmt]) -> Result<SubMachine, Diagnostic> {
    let mut ctx = VisitorCtx::new(resolver);
    let unit = compile_function_body(&mut ctx, body)?;
    linker::finalize(&mut ctx.states, &unit.exits);
    linker::check_edges_resolve(&ctx.states)?;
    Ok(SubMachine {
        start_key: unit.entry,
        states: ctx.states,
    })
}

/// Compiles the top-level body of a state-machine function or a nested
/// sub-machine's body: like `compile_block`, but an empty body is legal
/// and synthesizes a single `Succeed` state (Boundary behavior: "Empty
/// function body ⇒ one Succeed state").
fn compile_function_body(ctx: &mut VisitorCtx, stmts: &[Stmt]) -> Result<EmitUnit, Diagnostic> {
    let meaningful: Vec<&Stmt> = stmts.iter().filter(|s| !matches!(s, Stmt::Pass { .. })).collect();
    if meaningful.is_empty() {
        let unit = emit(
            ctx,
            "Succeed",
            State::Succeed(SucceedState { comment: None }),
        )?;
        return Ok(EmitUnit {
            entry: unit.entry,
            exits: vec![],
        });
    }
    let owned: Vec<Stmt> = meaningful.into_iter().cloned().collect();
    compile_block(ctx, &owned)
}

/// Compiles an `if`/`elif`/`else` chain into a single `Choice` state
/// (§4.1). The parser represents an `elif` as in the host language's own
/// AST: a single nested `If` as the sole statement of `orelse`. This walk
/// flattens that nesting back into one ordered `branches` list instead of
/// emitting a chain of nested `Choice` states joined by `default` edges.
fn compile_if(
    ctx: &mut VisitorCtx,
    test: &Expr,
    body: &[Stmt],
    orelse: &[Stmt],
) -> Result<EmitUnit, Diagnostic> {
    let mut arms: Vec<(&Expr, &[Stmt])> = vec![(test, body)];
    let mut else_body = orelse;
    while else_body.len() == 1 {
        match &else_body[0] {
            Stmt::If { test: t2, body: b2, orelse: o2, .. } => {
                arms.push((t2, b2));
                else_body = o2;
            }
            _ => break,
        }
    }

    let mut exits = Vec::new();
    let mut branches = Vec::with_capacity(arms.len());
    for (arm_test, arm_body) in arms {
        let rule = choice::compile_expr(arm_test)?;
        let unit = compile_block(ctx, arm_body)?;
        exits.extend(unit.exits);
        branches.push(ChoiceBranch {
            rule,
            next: unit.entry,
        });
    }

    let default_key = if else_body.is_empty() {
        // Boundary behavior: no else => Default points at the
        // continuation, modeled as a transparent synthesized Pass that
        // joins the dangling-exit list like any other statement.
        let placeholder = emit(
            ctx,
            "Pass",
            State::Pass(PassState {
                comment: Some("implicit else".to_string()),
                result: None,
                result_path: None,
                next: None,
            }),
        )?;
        exits.push(placeholder.entry.clone());
        placeholder.entry
    } else {
        let else_unit = compile_block(ctx, else_body)?;
        exits.extend(else_unit.exits);
        else_unit.entry
    };

    let choice_key = ctx.counter.next("Choice");
    let state = State::Choice(ChoiceState {
        comment: None,
        branches,
        default: default_key,
    });
    linker::insert_unique(&mut ctx.states, &choice_key, state)?;

    Ok(EmitUnit {
        entry: choice_key,
        exits,
    })
}

fn compile_try(
    ctx: &mut VisitorCtx,
    body: &[Stmt],
    handlers: &[ast::ExceptHandler],
) -> Result<EmitUnit, Diagnostic> {
    let try_unit = compile_block(ctx, body)?;
    let mut catches = Vec::with_capacity(handlers.len());
    let mut exits = try_unit.exits.clone();
    for handler in handlers {
        let handler_unit = compile_block(ctx, &handler.body)?;
        let errors = if handler.is_bare {
            vec!["States.ALL".to_string()]
        } else {
            handler.exc_types.clone()
        };
        catches.push(Catch {
            errors,
            next: handler_unit.entry,
        });
        exits.extend(handler_unit.exits);
    }

    match ctx.states.get_mut(try_unit.entry.as_str()) {
        Some(State::Task(t)) => t.catch = catches,
        _ => {
            return Err(shape_error(
                "try/except requires a task call as the first statement of the try body",
            ))
        }
    }

    Ok(EmitUnit {
        entry: try_unit.entry,
        exits,
    })
}

fn retry_from_call(kwargs: &[Kwarg]) -> Retry {
    let mut retry = Retry::defaults();
    if let Some(v) = kwarg(kwargs, "max_attempts").and_then(literal_int) {
        retry.max_attempts = v as u32;
    }
    if let Some(v) = kwarg(kwargs, "interval").and_then(literal_int) {
        retry.interval_seconds = v as u32;
    }
    if let Some(v) = kwarg(kwargs, "backoff_rate").and_then(literal_float) {
        retry.backoff_rate = v;
    }
    retry
}

fn compile_with_retry(
    ctx: &mut VisitorCtx,
    context_expr: &Expr,
    body: &[Stmt],
) -> Result<EmitUnit, Diagnostic> {
    let (func, _args, kwargs) = context_expr
        .as_call()
        .ok_or_else(|| shape_error("with block must call retry(...)"))?;
    if func.as_name() != Some("retry") {
        return Err(syntax_unsupported(
            "only 'with retry(...)' context managers are supported",
        ));
    }
    if body.len() != 1 {
        return Err(shape_error("retry() must wrap exactly one statement"));
    }
    let unit = compile_stmt(ctx, &body[0])?;
    let retry = retry_from_call(kwargs);
    match ctx.states.get_mut(unit.entry.as_str()) {
        Some(State::Task(t)) => t.retry.push(retry),
        _ => return Err(shape_error("retry() must wrap a single task call")),
    }
    Ok(unit)
}

fn compile_raise(ctx: &mut VisitorCtx, exc: &Expr) -> Result<EmitUnit, Diagnostic> {
    let (func, args, _kwargs) = exc
        .as_call()
        .ok_or_else(|| shape_error("raise requires a call to an exception class"))?;
    let error = func
        .as_name()
        .ok_or_else(|| shape_error("raise target must be a plain exception class name"))?
        .to_string();
    let cause = args.first().and_then(|a| a.as_str_literal()).map(String::from);
    let unit = emit(
        ctx,
        "Fail",
        State::Fail(FailState {
            comment: None,
            error,
            cause,
        }),
    )?;
    Ok(EmitUnit { entry: unit.entry, exits: vec![] })
}

fn compile_stop_execution(ctx: &mut VisitorCtx, kwargs: &[Kwarg]) -> Result<EmitUnit, Diagnostic> {
    let error = kwarg(kwargs, "error")
        .and_then(literal_str)
        .ok_or_else(|| shape_error("context.stop_execution requires error=..."))?
        .to_string();
    let cause = kwarg(kwargs, "cause").and_then(literal_str).map(String::from);
    let unit = emit(
        ctx,
        "Fail",
        State::Fail(FailState {
            comment: None,
            error,
            cause,
        }),
    )?;
    Ok(EmitUnit { entry: unit.entry, exits: vec![] })
}

fn is_stop_execution(func: &Expr) -> bool {
    matches!(func, Expr::Attribute { value, attr, .. }
        if attr == "stop_execution" && value.as_name() == Some("context"))
}

fn is_data_update(func: &Expr) -> bool {
    matches!(func, Expr::Attribute { value, attr, .. }
        if attr == "update" && value.as_name() == Some("data"))
}

fn compile_stmt(ctx: &mut VisitorCtx, stmt: &Stmt) -> Result<EmitUnit, Diagnostic> {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            let result_path = render_path(&target.path);
            if let Some((func, ..)) = value.as_call() {
                if func.as_name().is_some() {
                    return compile_task_call(ctx, value, Some(result_path));
                }
            }
            let result = json_of_expr(value)?;
            emit(
                ctx,
                "Pass",
                State::Pass(PassState {
                    comment: None,
                    result: Some(result),
                    result_path: Some(result_path),
                    next: None,
                }),
            )
        }
        Stmt::ExprStmt(expr, _) => {
            let (func, args, kwargs) = expr
                .as_call()
                .ok_or_else(|| syntax_unsupported("expression statement is not a recognized call"))?;
            if is_data_update(func) {
                let dict = args.first().ok_or_else(|| {
                    shape_error("data.update(...) requires a dict literal argument")
                })?;
                let result = json_of_expr(dict)?;
                return emit(
                    ctx,
                    "Pass",
                    State::Pass(PassState {
                        comment: None,
                        result: Some(result),
                        result_path: Some("$".to_string()),
                        next: None,
                    }),
                );
            }
            if is_stop_execution(func) {
                return compile_stop_execution(ctx, kwargs);
            }
            match func.as_name() {
                Some("wait") => compile_wait(ctx, kwargs),
                Some("map") => compile_map(ctx, args, kwargs),
                Some("parallel") => compile_parallel(ctx, args),
                Some(_) => compile_task_call(ctx, expr, None),
                None => Err(syntax_unsupported("unsupported call shape")),
            }
        }
        Stmt::If { test, body, orelse, .. } => compile_if(ctx, test, body, orelse),
        Stmt::Try { body, handlers, .. } => compile_try(ctx, body, handlers),
        Stmt::With { context_expr, body, .. } => compile_with_retry(ctx, context_expr, body),
        Stmt::Raise { exc, .. } => compile_raise(ctx, exc),
        Stmt::Return { .. } => {
            let unit = emit(
                ctx,
                "Succeed",
                State::Succeed(SucceedState { comment: None }),
            )?;
            Ok(EmitUnit { entry: unit.entry, exits: vec![] })
        }
        Stmt::Pass { .. } => unreachable!("filtered out by compile_block/compile_function_body"),
        Stmt::AugAssign { .. } => Err(syntax_unsupported(
            "augmented assignment is not a recognized state-machine statement",
        )),
    }
}

/// Lowers a state-machine function's body into a finalized `(start_key,
/// states)` pair. Top-level entry point used by `project::compile_project`.
pub fn lower_function_body(
    resolver: &Resolver,
    body: &[Stmt],
) -> Result<(StateKey, BTreeMap<String, State>), Diagnostic> {
    let mut ctx = VisitorCtx::new(resolver);
    let unit = compile_function_body(&mut ctx, body)?;
    linker::finalize(&mut ctx.states, &unit.exits);
    linker::check_edges_resolve(&ctx.states)?;
    tracing::debug!(
        start_key = unit.entry.as_str(),
        state_count = ctx.states.len(),
        "finished lowering a state machine body"
    );
    Ok((unit.entry, ctx.states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ClassDef, ClassMember, CmpOp, Decorator, FunctionDef, Span, Target};
    use crate::diagnostics::DiagnosticCode;
    use crate::fragment::Next;
    use crate::task::from_class_def;

    fn span() -> Span {
        Span::synthetic()
    }

    fn name(n: &str) -> Expr {
        Expr::Name(n.to_string(), span())
    }

    fn data_ref(keys: &[&str]) -> Expr {
        Expr::DataRef(keys.iter().map(|k| IndexKey::Str(k.to_string())).collect(), span())
    }

    fn call(func: Expr, args: Vec<Expr>, kwargs: Vec<(&str, Expr)>) -> Expr {
        Expr::Call {
            func: Box::new(func),
            args,
            kwargs: kwargs
                .into_iter()
                .map(|(k, v)| Kwarg { name: k.to_string(), value: v })
                .collect(),
            span: span(),
        }
    }

    fn make_task(name: &str, service: &str) -> TaskDefinition {
        let class = ClassDef {
            name: name.to_string(),
            body: vec![ClassMember::Assign {
                name: "service".to_string(),
                value: Expr::Literal(Literal::Str(service.to_string()), span()),
                span: span(),
            }],
            span: span(),
        };
        from_class_def(&class, "").unwrap()
    }

    #[test]
    fn empty_body_emits_one_succeed_state() {
        let tasks = HashMap::new();
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let (start, states) = lower_function_body(&resolver, &[]).unwrap();
        assert_eq!(states.len(), 1);
        assert!(matches!(states.get(start.as_str()).unwrap(), State::Succeed(_)));
    }

    #[test]
    fn subscript_assignment_to_a_lambda_task() {
        let mut tasks = HashMap::new();
        tasks.insert("Foo".to_string(), make_task("Foo", "lambda"));
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::Assign {
            target: Target { path: vec![IndexKey::Str("r".into())], span: span() },
            value: call(name("Foo"), vec![], vec![("key", Expr::Literal(Literal::Str("do_foo".into()), span()))]),
            span: span(),
        }];
        let (start, states) = lower_function_body(&resolver, &stmts).unwrap();
        assert_eq!(start.as_str(), "do_foo");
        match states.get("do_foo").unwrap() {
            State::Task(t) => {
                assert_eq!(t.result_path.as_deref(), Some("$['r']"));
                assert_eq!(t.next, Some(Next::End));
            }
            _ => panic!("expected task"),
        }
    }

    #[test]
    fn non_data_ref_positional_arg_defaults_input_path_to_root() {
        let mut tasks = HashMap::new();
        tasks.insert("Foo".to_string(), make_task("Foo", "lambda"));
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::ExprStmt(
            call(name("Foo"), vec![Expr::Literal(Literal::Str("literal-arg".into()), span())], vec![]),
            span(),
        )];
        let (start, states) = lower_function_body(&resolver, &stmts).unwrap();
        match states.get(start.as_str()).unwrap() {
            State::Task(t) => assert_eq!(t.input_path.as_deref(), Some("$")),
            _ => panic!("expected task"),
        }
    }

    #[test]
    fn ecs_result_path_is_dropped() {
        let mut tasks = HashMap::new();
        tasks.insert(
            "Job".to_string(),
            make_task_with_cpu_mem("Job", "ecs", 256, 512),
        );
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::Assign {
            target: Target { path: vec![IndexKey::Str("r".into())], span: span() },
            value: call(name("Job"), vec![], vec![]),
            span: span(),
        }];
        let (_start, states) = lower_function_body(&resolver, &stmts).unwrap();
        let task = states.values().find_map(|s| match s {
            State::Task(t) => Some(t),
            _ => None,
        }).unwrap();
        assert_eq!(task.result_path, None);
    }

    fn make_task_with_cpu_mem(name: &str, service: &str, cpu: i64, memory: i64) -> TaskDefinition {
        let class = ClassDef {
            name: name.to_string(),
            body: vec![
                ClassMember::Assign { name: "service".to_string(), value: Expr::Literal(Literal::Str(service.to_string()), span()), span: span() },
                ClassMember::Assign { name: "cpu".to_string(), value: Expr::Literal(Literal::Int(cpu), span()), span: span() },
                ClassMember::Assign { name: "memory".to_string(), value: Expr::Literal(Literal::Int(memory), span()), span: span() },
            ],
            span: span(),
        };
        from_class_def(&class, "").unwrap()
    }

    #[test]
    fn if_with_no_else_default_targets_continuation() {
        let mut tasks = HashMap::new();
        tasks.insert("Bad".to_string(), make_task("Bad", "lambda"));
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::If {
            test: Expr::Compare {
                left: Box::new(data_ref(&["n"])),
                op: CmpOp::Gt,
                right: Box::new(Expr::Literal(Literal::Int(0), span())),
                span: span(),
            },
            body: vec![Stmt::Return { value: None, span: span() }],
            orelse: vec![Stmt::Raise {
                exc: call(name("Bad"), vec![Expr::Literal(Literal::Str("x".into()), span())], vec![]),
                span: span(),
            }],
            span: span(),
        }];
        let (start, states) = lower_function_body(&resolver, &stmts).unwrap();
        match states.get(start.as_str()).unwrap() {
            State::Choice(c) => {
                assert_eq!(c.branches.len(), 1);
                assert!(states.contains_key(c.default.as_str()));
            }
            _ => panic!("expected choice"),
        }
    }

    #[test]
    fn unknown_task_reference_is_an_error() {
        let tasks = HashMap::new();
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::ExprStmt(call(name("Missing"), vec![], vec![]), span())];
        let err = lower_function_body(&resolver, &stmts).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ReferenceError);
    }

    #[test]
    fn retry_wrapping_two_statements_is_shape_error() {
        let mut tasks = HashMap::new();
        tasks.insert("Foo".to_string(), make_task("Foo", "lambda"));
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::With {
            context_expr: call(name("retry"), vec![], vec![("max_attempts", Expr::Literal(Literal::Int(5), span()))]),
            body: vec![
                Stmt::ExprStmt(call(name("Foo"), vec![], vec![]), span()),
                Stmt::ExprStmt(call(name("Foo"), vec![], vec![]), span()),
            ],
            span: span(),
        }];
        let err = lower_function_body(&resolver, &stmts).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ShapeError);
    }

    #[test]
    fn map_over_items_with_a_defined_iterator() {
        let mut tasks = HashMap::new();
        tasks.insert("Baz".to_string(), make_task("Baz", "lambda"));
        let mut functions = HashMap::new();
        functions.insert(
            "iter".to_string(),
            FunctionDef {
                name: "iter".to_string(),
                params: vec![],
                decorators: vec![],
                body: vec![Stmt::ExprStmt(call(name("Baz"), vec![], vec![]), span())],
                span: span(),
                body_span: span(),
            },
        );
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let stmts = vec![Stmt::ExprStmt(
            call(name("map"), vec![data_ref(&["items"]), name("iter")], vec![]),
            span(),
        )];
        let (start, states) = lower_function_body(&resolver, &stmts).unwrap();
        match states.get(start.as_str()).unwrap() {
            State::Map(m) => {
                assert_eq!(m.items_path, "$['items']");
                assert_eq!(m.iterator.states.len(), 1);
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn unused_decorator_type_import_guard() {
        let _: Option<Decorator> = None;
    }

    #[test]
    fn elif_chain_flattens_into_one_choice_with_ordered_branches() {
        let tasks = HashMap::new();
        let functions = HashMap::new();
        let resolver = Resolver { tasks: &tasks, functions: &functions };
        let cmp = |op: CmpOp, n: i64| Expr::Compare {
            left: Box::new(data_ref(&["n"])),
            op,
            right: Box::new(Expr::Literal(Literal::Int(n), span())),
            span: span(),
        };
        // if data["n"] > 10: return
        // elif data["n"] > 0: return
        // else: return
        let stmts = vec![Stmt::If {
            test: cmp(CmpOp::Gt, 10),
            body: vec![Stmt::Return { value: None, span: span() }],
            orelse: vec![Stmt::If {
                test: cmp(CmpOp::Gt, 0),
                body: vec![Stmt::Return { value: None, span: span() }],
                orelse: vec![Stmt::Return { value: None, span: span() }],
                span: span(),
            }],
            span: span(),
        }];
        let (start, states) = lower_function_body(&resolver, &stmts).unwrap();
        match states.get(start.as_str()).unwrap() {
            State::Choice(c) => {
                assert_eq!(c.branches.len(), 2, "elif must join the same Choice, not nest a second one");
                assert!(states.contains_key(c.default.as_str()));
            }
            _ => panic!("expected a single choice state"),
        }
        // Exactly one Choice state in the whole sub-machine: the elif did
        // not spawn its own nested Choice.
        let choice_count = states.values().filter(|s| matches!(s, State::Choice(_))).count();
        assert_eq!(choice_count, 1);
    }
}

#[cfg(test)]
mod end_to_end_tests {
    //! §8 "End-to-end scenarios": literal DSL source through
    //! `project::compile_project`, asserted against the expected IR shape.
    use crate::fragment::{Next, State};
    use crate::project::compile_project;
    use pretty_assertions::assert_eq;

    #[test]
    fn scenario_1_lambda_task_with_result_path() {
        let source = r#"
class Foo:
    service = "lambda"

def main(data):
    data["r"] = Foo(key="do_foo")
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        assert_eq!(machine.start_key.as_str(), "do_foo");
        match machine.states.get("do_foo").unwrap() {
            State::Task(t) => {
                assert_eq!(t.task_class, "Foo");
                assert!(t.resource.contains("Foo"));
                assert_eq!(t.result_path.as_deref(), Some("$['r']"));
                assert_eq!(t.next, Some(Next::End));
            }
            _ => panic!("expected a task state"),
        }
    }

    #[test]
    fn scenario_2_if_else_raises_choice_succeed_fail() {
        let source = r#"
class Bad:
    service = "lambda"

def main(data):
    if data["n"] > 0:
        return
    else:
        raise Bad("x")
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        match machine.states.get(machine.start_key.as_str()).unwrap() {
            State::Choice(c) => {
                assert_eq!(c.branches.len(), 1);
                match machine.states.get(c.branches[0].next.as_str()).unwrap() {
                    State::Succeed(_) => {}
                    _ => panic!("expected the then-branch to reach Succeed"),
                }
                match machine.states.get(c.default.as_str()).unwrap() {
                    State::Fail(f) => {
                        assert_eq!(f.error, "Bad");
                        assert_eq!(f.cause.as_deref(), Some("x"));
                    }
                    _ => panic!("expected the default branch to reach Fail"),
                }
            }
            _ => panic!("expected a choice state"),
        }
    }

    #[test]
    fn scenario_3_map_over_items_with_an_iterator_function() {
        let source = r#"
class Baz:
    service = "lambda"

def iter(data):
    Baz()

def main(data):
    map(data["items"], iter)
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        match machine.states.get(machine.start_key.as_str()).unwrap() {
            State::Map(m) => {
                assert_eq!(m.items_path, "$['items']");
                assert_eq!(m.next, Some(Next::End));
                assert_eq!(m.iterator.states.len(), 1);
                match m.iterator.states.get(m.iterator.start_key.as_str()).unwrap() {
                    State::Task(t) => assert_eq!(t.task_class, "Baz"),
                    _ => panic!("expected the iterator body to be a single task"),
                }
            }
            _ => panic!("expected a map state"),
        }
    }

    #[test]
    fn scenario_4_with_retry_attaches_a_retry_clause() {
        let source = r#"
class Foo:
    service = "lambda"

def main(data):
    with retry(max_attempts=5, interval=10):
        Foo()
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        match machine.states.get(machine.start_key.as_str()).unwrap() {
            State::Task(t) => {
                assert_eq!(t.retry.len(), 1);
                let retry = &t.retry[0];
                assert_eq!(retry.errors, vec!["States.ALL".to_string()]);
                assert_eq!(retry.interval_seconds, 10);
                assert_eq!(retry.max_attempts, 5);
                assert_eq!(retry.backoff_rate, 2.0);
            }
            _ => panic!("expected a task state"),
        }
    }

    #[test]
    fn scenario_5_try_except_with_a_typed_and_a_bare_handler() {
        let source = r#"
class Foo:
    service = "lambda"

class Handler:
    service = "lambda"

class Generic:
    service = "lambda"

def main(data):
    try:
        Foo()
    except KeyError:
        Handler()
    except:
        Generic()
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        match machine.states.get(machine.start_key.as_str()).unwrap() {
            State::Task(t) => {
                assert_eq!(t.catch.len(), 2);
                assert_eq!(t.catch[0].errors, vec!["KeyError".to_string()]);
                assert_eq!(t.catch[1].errors, vec!["States.ALL".to_string()]);
                assert!(machine.states.contains_key(t.catch[0].next.as_str()));
                assert!(machine.states.contains_key(t.catch[1].next.as_str()));
            }
            _ => panic!("expected a task state"),
        }
    }

    #[test]
    fn scenario_6_schedule_decorator_sets_expression_and_exports() {
        let source = r#"
@schedule(expression="rate(1 hour)")
def main(data):
    pass
"#;
        let out = compile_project(source);
        assert!(out.diagnostics.is_empty());
        let machine = out.project.state_machines.get("main").unwrap();
        assert_eq!(machine.schedule_expression.as_deref(), Some("rate(1 hour)"));
        assert!(machine.exported);
    }
}
