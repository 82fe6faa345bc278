use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Closure, Value};
use crate::builtinops::{Arity, Output, find_special_form, install_builtins, stdout_output};
use crate::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};

/// Evaluation depth carried through every nested evaluation.
///
/// Built-ins that call back into procedures (`apply`, `map`) receive the
/// context of their own call, so the depth keeps counting across the native
/// boundary instead of starting over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    depth: usize,
    max_depth: usize,
}

impl CallContext {
    pub fn new(max_depth: usize) -> Self {
        CallContext {
            depth: 0,
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Context for a nested evaluation one level down
    pub fn deeper(self) -> Self {
        CallContext {
            depth: self.depth + 1,
            ..self
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.depth >= self.max_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.max_depth
            )));
        }
        Ok(())
    }

    /// Invoke a procedure value from native code
    pub fn call(&self, procedure: &Value, args: Vec<Value>) -> Result<Value, Error> {
        apply_procedure(procedure, args, self.deeper())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        CallContext::new(MAX_EVAL_DEPTH)
    }
}

struct Scope {
    bindings: HashMap<String, Value>,
    parent: Option<Environment>,
}

/// Environment for variable bindings
///
/// A handle to one scope in a chain of scopes. Cloning the handle shares the
/// scope: closures keep their defining scope alive and observe later
/// `define`/`set!` in it.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

// Scopes compare by identity; comparing contents could recurse through closures.
impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = self.0.borrow();
        let mut names: Vec<_> = scope.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &scope.parent.is_some())
            .finish()
    }
}

impl Environment {
    /// A root scope with no bindings
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// New scope binding `params` to `args` positionally, child of `outer`.
    ///
    /// Only as many pairs as the shorter sequence holds are bound.
    pub fn create(params: &[String], args: Vec<Value>, outer: &Environment) -> Self {
        let env = Environment::with_parent(outer);
        {
            let mut scope = env.0.borrow_mut();
            for (param, arg) in params.iter().zip(args) {
                scope.bindings.insert(param.clone(), arg);
            }
        }
        env
    }

    /// Bind `name` in this scope, replacing any existing binding here
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Find the innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let mut current = self.clone();
        loop {
            let parent = {
                let scope = current.0.borrow();
                if let Some(value) = scope.bindings.get(name) {
                    return Ok(value.clone());
                }
                scope.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Rebind `name` in the innermost scope that already defines it
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut current = self.clone();
        loop {
            let parent = {
                let mut scope = current.0.borrow_mut();
                if let Some(slot) = scope.bindings.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                scope.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Register a custom builtin function working directly on evaluated arguments.
    ///
    /// This is the low-level API. For most new code prefer
    /// [`Environment::register_builtin_operation`], which converts arguments
    /// and checks their count.
    ///
    /// # Example
    /// ```
    /// use poy::evaluator::create_global_env;
    /// use poy::ast::Value;
    /// use poy::Error;
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::from(args.len()))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("count-args", count_args);
    /// // Now (count-args 1 2 3) evaluates to 3
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        let wrapped: Rc<OperationFn> =
            Rc::new(move |args: Vec<Value>, _ctx: CallContext| func(&args));
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: wrapped,
            },
        );
    }

    /// Register a strongly-typed Rust function as a builtin operation using
    /// automatic argument extraction and result conversion.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> Result<i64, Error> { Ok(a + b) }
    /// env.register_builtin_operation::<(i64, i64), _>("add", add);
    /// ```
    ///
    /// Supported parameter types are those implementing
    /// [`crate::intooperation::FromParam`]. Arity is enforced from the
    /// signature; conversion failures yield `TypeError`.
    pub fn register_builtin_operation<Args, F>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: func.into_operation(),
            },
        );
    }

    /// Register a variadic builtin operation with explicit arity metadata.
    ///
    /// The last parameter of `func` is a `Vec<T>` collecting the remaining
    /// arguments. The provided [`Arity`] is validated on every call, since
    /// minimum and maximum counts are not derivable from the signature.
    pub fn register_variadic_builtin_operation<Args, F>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        let inner = func.into_variadic_operation();
        let checked = move |args: Vec<Value>, ctx: CallContext| -> Result<Value, Error> {
            arity.validate(args.len())?;
            inner(args, ctx)
        };
        let wrapped: Rc<OperationFn> = Rc::new(checked);
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func: wrapped,
            },
        );
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let scope = self.0.borrow();
        let mut bindings: HashMap<String, Value> = match &scope.parent {
            Some(parent) => parent.get_all_bindings().into_iter().collect(),
            None => HashMap::new(),
        };

        // Local bindings shadow the parent's
        for (name, value) in &scope.bindings {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_context(expr, env, CallContext::default())
}

/// Evaluate an expression at the depth recorded in `ctx`
pub fn eval_with_context(
    expr: &Value,
    env: &Environment,
    ctx: CallContext,
) -> Result<Value, Error> {
    ctx.check()?;
    match expr {
        Value::Symbol(name) => env.lookup(name),

        // Self-evaluating forms
        Value::Number(_)
        | Value::Float(_)
        | Value::Bool(_)
        | Value::BuiltinFunction { .. }
        | Value::Function(_)
        | Value::Unspecified => Ok(expr.clone()),

        Value::List(elements) => {
            eval_list(elements, expr, env, ctx).map_err(|err| add_context(err, expr))
        }
    }
}

const CONTEXT_MARKER: &str = "\n  Context: ";

/// Attach the failing expression to application errors, innermost only
fn add_context(error: Error, expr: &Value) -> Error {
    match error {
        Error::EvalError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::EvalError(format!("{msg}{CONTEXT_MARKER}while evaluating: {expr}"))
        }
        Error::TypeError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::TypeError(format!("{msg}{CONTEXT_MARKER}while evaluating: {expr}"))
        }
        other => other,
    }
}

fn eval_args(args: &[Value], env: &Environment, ctx: CallContext) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_context(arg, env, ctx))
        .collect()
}

/// Evaluate a list expression: a special form or a procedure application
fn eval_list(
    elements: &[Value],
    whole: &Value,
    env: &Environment,
    ctx: CallContext,
) -> Result<Value, Error> {
    // Special forms are recognised by their head symbol before any lookup
    if let [Value::Symbol(head), operands @ ..] = elements
        && let Some(form) = find_special_form(head)
    {
        form.arity
            .validate(operands.len())
            .map_err(|err| match err {
                Error::ArityError { expected, got, .. } => {
                    Error::arity_error_with_expr(expected, got, whole.to_string())
                }
                other => other,
            })?;
        return (form.eval)(operands, env, ctx);
    }

    match elements {
        [] => Err(Error::EvalError("cannot evaluate empty list".to_owned())),

        [func_expr, arg_exprs @ ..] => {
            let func = eval_with_context(func_expr, env, ctx.deeper())?;
            let args = eval_args(arg_exprs, env, ctx.deeper())?;
            apply_procedure(&func, args, ctx.deeper())
        }
    }
}

/// Apply an evaluated procedure to evaluated arguments
pub fn apply_procedure(
    procedure: &Value,
    args: Vec<Value>,
    ctx: CallContext,
) -> Result<Value, Error> {
    match procedure {
        Value::BuiltinFunction { id, func } => {
            trace!(builtin = %id, argc = args.len(), "calling builtin");
            func(args, ctx)
        }
        Value::Function(closure) => apply_closure(closure, args, ctx),
        other => Err(Error::TypeError(format!(
            "cannot apply non-procedure: {other}"
        ))),
    }
}

fn apply_closure(closure: &Closure, args: Vec<Value>, ctx: CallContext) -> Result<Value, Error> {
    if closure.params.len() != args.len() {
        debug!(
            params = closure.params.len(),
            args = args.len(),
            "argument count mismatch; binding the shorter sequence only"
        );
    }
    trace!(depth = ctx.depth(), params = ?closure.params, "invoking closure");

    let scope = Environment::create(&closure.params, args, &closure.env);
    eval_with_context(&closure.body, &scope, ctx)
}

/// Evaluate quote special form
pub(crate) fn eval_quote(
    args: &[Value],
    _env: &Environment,
    _ctx: CallContext,
) -> Result<Value, Error> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

/// Evaluate if special form; only the selected branch is evaluated
pub(crate) fn eval_if(args: &[Value], env: &Environment, ctx: CallContext) -> Result<Value, Error> {
    match args {
        [test, consequent, alternative] => {
            let branch = if eval_with_context(test, env, ctx.deeper())?.is_truthy() {
                consequent
            } else {
                alternative
            };
            eval_with_context(branch, env, ctx.deeper())
        }
        _ => Err(Error::arity_error(3, args.len())),
    }
}

/// Evaluate define special form
pub(crate) fn eval_define(
    args: &[Value],
    env: &Environment,
    ctx: CallContext,
) -> Result<Value, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_context(expr, env, ctx.deeper())?;
            env.define(name.as_str(), value);
            Ok(Value::Unspecified)
        }
        [_, _] => Err(Error::TypeError("define requires a symbol".to_owned())),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Evaluate set! special form
pub(crate) fn eval_set(
    args: &[Value],
    env: &Environment,
    ctx: CallContext,
) -> Result<Value, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_context(expr, env, ctx.deeper())?;
            env.assign(name, value)?;
            Ok(Value::Unspecified)
        }
        [_, _] => Err(Error::TypeError("set! requires a symbol".to_owned())),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Evaluate lambda special form
pub(crate) fn eval_lambda(
    args: &[Value],
    env: &Environment,
    _ctx: CallContext,
) -> Result<Value, Error> {
    match args {
        [Value::List(param_list), body] => {
            let mut params: Vec<String> = Vec::with_capacity(param_list.len());
            for param in param_list {
                match param {
                    Value::Symbol(name) => {
                        if params.contains(name) {
                            return Err(Error::EvalError(format!(
                                "Duplicate parameter name: {name}"
                            )));
                        }
                        params.push(name.clone());
                    }
                    _ => {
                        return Err(Error::TypeError(
                            "lambda parameters must be symbols".to_owned(),
                        ));
                    }
                }
            }

            // Only fixed parameter lists: `(lambda args body)` is not a variadic form here.
            Ok(Value::Function(Rc::new(Closure {
                params,
                body: body.clone(),
                env: env.clone(),
            })))
        }
        [_, _] => Err(Error::TypeError(
            "lambda parameters must be a list".to_owned(),
        )),
        _ => Err(Error::arity_error(2, args.len())),
    }
}

/// Create a global environment with built-in functions writing to stdout
pub fn create_global_env() -> Environment {
    create_global_env_with_output(stdout_output())
}

/// Create a global environment whose output procedures write to `output`
pub fn create_global_env_with_output(output: Output) -> Environment {
    let env = Environment::new();
    install_builtins(&env, output);
    env
}
