use std::panic;
use std::process;

use lispy::value::{Function, Value};
use lispy::{Config, Interpreter};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

fn main() {
    init_tracing();

    let files: Vec<String> = std::env::args().skip(1).collect();
    let result = panic::catch_unwind(|| {
        if files.is_empty() {
            run_repl();
        } else {
            run_files(&files);
        }
    });

    if let Err(panic_info) = result {
        eprintln!("lispy encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Log to stderr, only when `RUST_LOG` is set (e.g. `RUST_LOG=lispy=trace`)
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(EnvFilter::from_default_env())
            .init();
    }
}

/// Load each file in order; a failing file is reported and the next one still runs
fn run_files(files: &[String]) {
    let mut lispy = Interpreter::new(Config::default());
    for file in files {
        let result = lispy.load_file(file);
        if result.is_error() {
            println!("{result}");
        }
    }
}

fn run_repl() {
    println!("Lispy Version 0.1.0");
    println!("Type :help for commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            process::exit(1);
        }
    };
    let mut lispy = Interpreter::new(Config::default());

    loop {
        match rl.readline("lispy> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                // Handle special commands
                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&lispy);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match lispy.eval_source(line) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
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

fn print_help() {
    println!("Lispy Interpreter:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Syntax:");
    println!("  Numbers: 42, -5        Strings: \"hello\\n\"      Comments: ; to end of line");
    println!("  (...) is evaluated     {{...}} is a literal list");
    println!();
    println!("Builtins:");
    println!("  Lists: list, head, tail, join, eval");
    println!("  Arithmetic: +, -, *, /, %, ^");
    println!("  Comparison: >, <, >=, <=, ==, !=");
    println!("  Conditionals: if");
    println!("  Definitions: def (global), = (local), \\ (lambda)");
    println!("  Host: load, print, error");
    println!();
    println!("Examples:");
    println!("  + 1 2 3");
    println!("  def {{add}} (\\ {{x y}} {{+ x y}})");
    println!("  (add 1) 2");
    println!("  (\\ {{x & xs}} {{xs}}) 1 2 3");
    println!();
}

fn print_environment(lispy: &Interpreter) {
    let bindings = lispy.env().get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Function(Function::Native(_)) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
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
