use miniscm::evaluator::Binding;
use miniscm::scheme::ParseConfig;
use miniscm::{Interpreter, InterpreterConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG=miniscm=debug shows definitions and depth exhaustion
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run_repl() {
        eprintln!("The REPL encountered an unexpected error and must exit.");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run_repl() -> Result<(), ReadlineError> {
    println!("Scheme Interpreter");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let session = Interpreter::with_config(InterpreterConfig {
        parse: ParseConfig {
            handle_comments: true,
        },
        ..InterpreterConfig::default()
    });

    loop {
        match rl.readline("scheme> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&session.bindings());
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match session.evaluate_source(line) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Language:");
    println!("  Numbers: 42, -5 (64-bit integers)");
    println!("  Booleans: #t, #f");
    println!("  Arithmetic: +, -, *, /");
    println!("  Comparison: =, <, >");
    println!("  Logic: and, or, not");
    println!("  Definitions: (define x 5), (define (square n) (* n n))");
    println!("  Mutation: (set! x 6)");
    println!("  Comments: ; to end of line");
    println!();
}

fn print_environment(bindings: &[Binding]) {
    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let (builtins, user_defined): (Vec<&Binding>, Vec<&Binding>) =
        bindings.iter().partition(|b| b.kind == "builtin");

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        for row in builtins.chunks(4) {
            for binding in row {
                print!("  {:<15}", binding.name);
            }
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for binding in user_defined {
            println!("  {binding}");
        }
    }
}
