//! An owned interpreter instance.
//!
//! Each [`Interpreter`] owns its own global environment, so independent
//! instances never observe each other's definitions.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tracing::trace;

use crate::ast::Value;
use crate::evaluator::{
    CallContext, Environment, create_global_env, create_global_env_with_output, eval_with_context,
};
use crate::reader::{ParseConfig, parse_with_config};
use crate::{Error, MAX_EVAL_DEPTH};

/// Interpreter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Nesting limit for evaluation; exceeding it is an evaluation error
    pub max_eval_depth: usize,
    pub parse: ParseConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_eval_depth: MAX_EVAL_DEPTH,
            parse: ParseConfig::default(),
        }
    }
}

/// Reads and evaluates lines against a private global environment
pub struct Interpreter {
    env: Environment,
    config: InterpreterConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter::with_config(InterpreterConfig::default())
    }

    /// Interpreter whose output procedures write to stdout
    pub fn with_config(config: InterpreterConfig) -> Self {
        Interpreter {
            env: create_global_env(),
            config,
        }
    }

    /// Interpreter whose output procedures (`print`, `putchars`) write to `output`
    pub fn with_output(config: InterpreterConfig, output: impl Write + 'static) -> Self {
        Interpreter {
            env: create_global_env_with_output(Rc::new(RefCell::new(output))),
            config,
        }
    }

    /// Parse one line and evaluate its first expression
    pub fn eval_str(&mut self, line: &str) -> Result<Value, Error> {
        trace!(line, "read");
        let expr = parse_with_config(line, &self.config.parse)?;
        self.eval(&expr)
    }

    /// Evaluate an already-parsed expression in the global environment
    pub fn eval(&mut self, expr: &Value) -> Result<Value, Error> {
        eval_with_context(expr, &self.env, CallContext::new(self.config.max_eval_depth))
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    /// Writer whose contents stay readable after it is handed to an interpreter
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_eval_str_sequence() {
        let mut interp = Interpreter::new();
        assert!(matches!(
            interp.eval_str("(define r 10)").unwrap(),
            Value::Unspecified
        ));
        assert_eq!(interp.eval_str("(* r r)").unwrap(), val(100));
        assert_eq!(interp.eval_str("(quote (a b))").unwrap().to_string(), "(a b)");
        assert!(matches!(
            interp.eval_str("(car").unwrap_err(),
            Error::SyntaxError(_)
        ));
    }

    #[test]
    fn test_instances_are_isolated() {
        let mut a = Interpreter::new();
        let mut b = Interpreter::new();
        a.eval_str("(define shared 1)").unwrap();
        a.eval_str("(define car cdr)").unwrap();

        assert_eq!(a.eval_str("shared").unwrap(), val(1));
        assert_eq!(
            b.eval_str("shared").unwrap_err(),
            Error::UnboundSymbol("shared".into())
        );
        assert_eq!(b.eval_str("(car (list 1 2))").unwrap(), val(1));
        assert_ne!(a.environment(), b.environment());
    }

    #[test]
    fn test_output_goes_to_configured_writer() {
        let buffer = SharedBuffer::default();
        let mut interp = Interpreter::with_output(InterpreterConfig::default(), buffer.clone());

        let result = interp.eval_str("(print 1 2.5 (quote (a b)))").unwrap();
        assert!(matches!(result, Value::Unspecified));
        interp.eval_str("(putchars (quote hi))").unwrap();
        assert_eq!(buffer.contents(), "1 2.5 (a b)\nhi");
    }

    #[test]
    fn test_configured_depth_limit() {
        let config = InterpreterConfig {
            max_eval_depth: 20,
            ..InterpreterConfig::default()
        };
        let mut interp = Interpreter::with_config(config);
        assert_eq!(interp.config().max_eval_depth, 20);

        interp
            .eval_str("(define down (lambda (n) (if (= n 0) (quote done) (down (- n 1)))))")
            .unwrap();
        assert_eq!(interp.eval_str("(down 2)").unwrap(), sym("done"));
        let err = interp.eval_str("(down 50)").unwrap_err();
        assert!(err.to_string().contains("depth"), "got: {err}");

        // The interpreter stays usable after a depth error
        assert_eq!(interp.eval_str("(+ 1 1)").unwrap(), val(2));
    }

    #[test]
    fn test_lenient_spacing() {
        let strict = Interpreter::new().eval_str("(+  1 2)");
        assert!(matches!(strict, Err(Error::UnboundSymbol(_))));

        let config = InterpreterConfig {
            parse: ParseConfig {
                skip_empty_tokens: true,
            },
            ..InterpreterConfig::default()
        };
        assert_eq!(
            Interpreter::with_config(config).eval_str("(+  1 2)").unwrap(),
            val(3)
        );
    }
}
