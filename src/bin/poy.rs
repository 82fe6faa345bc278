//! Poy command-line.
//!
//! Without file arguments it drops into an interactive read-evaluate-print
//! loop. With arguments, every line of every file is evaluated in one
//! interpreter session, so later files see earlier definitions.

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use poy::ast::Value;
use poy::evaluator::Environment;
use poy::{Error, Interpreter, InterpreterConfig, MAX_EVAL_DEPTH, ParseConfig};

/// A minimal Lisp-style expression interpreter.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Source files to evaluate line by line instead of starting the REPL.
    files: Vec<PathBuf>,

    /// Ignore empty tokens produced by repeated, leading or trailing spaces.
    #[arg(short, long)]
    lenient_spacing: bool,

    /// Maximum evaluation depth before an expression is rejected.
    #[arg(long, default_value_t = MAX_EVAL_DEPTH)]
    max_depth: usize,

    /// Log interpreter internals to stderr (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = InterpreterConfig {
        max_eval_depth: args.max_depth,
        parse: ParseConfig {
            skip_empty_tokens: args.lenient_spacing,
        },
    };
    let mut interp = Interpreter::with_config(config);

    if args.files.is_empty() {
        run_prompt(&mut interp)
    } else {
        run_all_files(&mut interp, &args.files)
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a result the way the prompt shows it; `Unspecified` prints nothing
fn show(value: &Value) {
    if !matches!(value, Value::Unspecified) {
        println!("{value}");
    }
}

fn run_all_files(interp: &mut Interpreter, paths: &[PathBuf]) -> Result<(), anyhow::Error> {
    for path in paths {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        for (lineno, line) in source.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match interp.eval_str(line) {
                Ok(value) => show(&value),
                Err(Error::Exit(code)) => process::exit(code),
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("{}:{}: evaluation failed", path.display(), lineno + 1)
                    });
                }
            }
        }
    }
    Ok(())
}

fn run_prompt(interp: &mut Interpreter) -> Result<(), anyhow::Error> {
    println!("Poy expression evaluator");
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()
        .map_err(|e| anyhow::anyhow!("could not initialize line editor: {e}"))?;

    loop {
        match rl.readline("poy> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());

                match line.trim() {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(interp.environment());
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                // Spacing is significant, so the line is evaluated untrimmed.
                match interp.eval_str(&line) {
                    Ok(value) => show(&value),
                    Err(Error::Exit(code)) => process::exit(code),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(anyhow::anyhow!("failed to read line: {err}")),
        }
    }

    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Tokens are separated by single spaces; parentheses stand alone.");
    println!();
    println!("Special forms: quote, if, define, set!, lambda");
    println!("Examples:");
    println!("  (define sq (lambda (x) (* x x)))");
    println!("  (sq 5)");
    println!("  (map sq (list 1 2 3))");
    println!("  (quote (a b c))");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();
    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        for row in builtins.chunks(4) {
            let line: String = row.iter().map(|name| format!("  {name:<15}")).collect();
            println!("{}", line.trim_end());
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("Values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
