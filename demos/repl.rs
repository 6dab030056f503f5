use std::process;
use std::rc::Rc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use scheme_engine::ast::{Procedure, Value};
use scheme_engine::scheme::parse_program;
use scheme_engine::{EvalConfig, Environment, Error, create_global_env, evaluate_with_config};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    init_tracing();

    let config = match eval_config_from_env() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    };

    let env = create_global_env();
    env.register_builtin_operation::<_, ()>("help", print_help);

    let status = match std::env::args().nth(1) {
        Some(path) => run_file(&path, &env, &config),
        None => {
            run_repl(&env, &config);
            0
        }
    };

    // Top-level closures keep the global frame alive through their captured env
    env.clear();
    process::exit(status);
}

/// Log filter comes from `SCHEME_LOG`, e.g. `SCHEME_LOG=scheme_engine=debug`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("SCHEME_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn eval_config_from_env() -> Result<EvalConfig, String> {
    match std::env::var("SCHEME_MAX_DEPTH") {
        Ok(raw) => raw
            .parse::<usize>()
            .map(EvalConfig::with_max_depth)
            .map_err(|err| format!("Invalid SCHEME_MAX_DEPTH '{raw}': {err}")),
        Err(_) => Ok(EvalConfig::default()),
    }
}

fn eval_source(source: &str, env: &Rc<Environment>, config: &EvalConfig) -> Result<Value, Error> {
    let mut result = Value::Unspecified;
    for form in parse_program(source)? {
        result = evaluate_with_config(&form, env, config)?;
    }
    Ok(result)
}

fn run_file(path: &str, env: &Rc<Environment>, config: &EvalConfig) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read {path}: {err}");
            return 1;
        }
    };

    match eval_source(&source, env, config) {
        Ok(Value::Unspecified) => 0,
        Ok(result) => {
            println!("{result}");
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

fn run_repl(env: &Rc<Environment>, config: &EvalConfig) {
    println!("Scheme Engine REPL");
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };

    // Accumulates lines until they form complete expressions
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "scheme> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(command);

                    match command {
                        ":help" => {
                            let _ = print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    let _ = rl.add_history_entry(line.trim());
                }

                pending.push_str(&line);
                pending.push('\n');

                match eval_source(&pending, env, config) {
                    Err(Error::ParseError(err)) if err.is_incomplete() => continue,
                    Ok(Value::Unspecified) => {}
                    Ok(result) => println!("{result}"),
                    Err(err) => println!("Error: {err}"),
                }
                pending.clear();
            }
            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() -> Result<Value, Error> {
    println!("Scheme Engine commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Cancel a multi-line expression");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  quote if cond define lambda begin let and or");
    println!();
    println!("Examples:");
    println!("  (define (square x) (* x x))");
    println!("  (square 12)");
    println!("  (cons 1 '(2 3))");
    println!("  (cond ((< 1 0) 'neg) (else 'non-neg))");
    println!();
    println!("Environment variables:");
    println!("  SCHEME_LOG        - tracing filter, e.g. scheme_engine=debug");
    println!("  SCHEME_MAX_DEPTH  - bound on non-tail evaluation depth");
    println!();

    Ok(Value::Unspecified)
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
            Value::Procedure(Procedure::Primitive(_)) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        for row in builtins.chunks(4) {
            for name in row {
                print!("  {name:<15}");
            }
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
