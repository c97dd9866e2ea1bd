//! Vortex CLI and REPL
//!
//! Usage:
//!   vortex check <file.vx>...   - Report diagnostics
//!   vortex run <file.vx>        - Analyze and print the outcome
//!   vortex console <file.vx>    - Run a console app
//!   vortex repl                 - Start interactive REPL
//!   vortex help                 - Show help message

use std::env;
use std::path::Path;
use std::process;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use vortex::console::{random_action, run_console_app, SessionEnd, TerminalIo};
use vortex::{
    compile, init_tracing, CompileOptions, Compilation, FsReader, Level, MemoryReader, Outcome,
    MAIN_FILE, VERSION,
};

const DEFAULT_STEP_LIMIT: u64 = 3_000_000;

struct Options {
    step_limit: Option<u64>,
    verbose: bool,
    files: Vec<String>,
}

fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    let options = match parse_options(&args[2..]) {
        Ok(options) => options,
        Err(message) => fail(&message),
    };

    match args[1].as_str() {
        "check" => check(&options),
        "run" => run(&options),
        "console" => console(&options),
        "repl" => run_repl(&options),
        "help" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-v" => println!("Vortex {}", VERSION),
        other => {
            eprintln!("{}: unknown command '{}'", "error".red(), other);
            print_help();
            process::exit(1);
        }
    }
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        step_limit: Some(DEFAULT_STEP_LIMIT),
        verbose: false,
        files: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" => options.verbose = true,
            "--step-limit" => {
                let value = iter.next().ok_or("--step-limit needs a value")?;
                options.step_limit = match value.as_str() {
                    "none" => None,
                    n => Some(n.parse().map_err(|_| format!("invalid step limit '{}'", n))?),
                };
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{}'", flag)),
            file => options.files.push(file.to_string()),
        }
    }

    Ok(options)
}

fn fail(message: &str) -> ! {
    eprintln!("{}: {}", "error".red(), message);
    process::exit(1);
}

fn print_help() {
    println!("{}", "Vortex".cyan().bold());
    println!("Static analysis for the Vortex language");
    println!("{} {}\n", "Version".cyan(), VERSION);
    println!("{}", "USAGE:".yellow());
    println!("  vortex check <file.vx>...   Report diagnostics for each file");
    println!("  vortex run <file.vx>        Analyze a program and print its outcome");
    println!("  vortex console <file.vx>    Run a console app ({{reduce, render}})");
    println!("  vortex repl                 Start interactive REPL");
    println!("  vortex help                 Show this help message");
    println!("  vortex version              Show version\n");
    println!("{}", "FLAGS:".yellow());
    println!(
        "  --step-limit <N|none>       Evaluation steps per file (default {})",
        DEFAULT_STEP_LIMIT
    );
    println!("  --verbose                   Also show info notes\n");
    println!("{}", "LANGUAGE FEATURES:".yellow());
    println!("  x := 10                     Create a variable");
    println!("  x = x + 1                   Assign to an existing variable");
    println!("  func f(a) => a * 2          Hoisted function");
    println!("  [a, {{b}}] := [1, {{b: 2}}]     Destructuring");
    println!("  xs:map(func(x) => x + 1)    Methods");
    println!("  import lib                  Import ./lib.vx");
}

fn compile_options(options: &Options) -> CompileOptions {
    CompileOptions {
        step_limit: options.step_limit,
    }
}

/// Compile files from disk, rooted at the first file's package.
fn compile_files(options: &Options) -> Compilation {
    let Some(first) = options.files.first() else {
        fail("missing file argument");
    };

    let (reader, first_entry) = match FsReader::discover(Path::new(first)) {
        Ok(found) => found,
        Err(e) => fail(&format!("cannot read file '{}': {}", first, e)),
    };

    let mut entries = vec![first_entry];
    for file in &options.files[1..] {
        match reader.canonical(Path::new(file)) {
            Ok(entry) => entries.push(entry),
            Err(e) => fail(&format!("cannot read file '{}': {}", file, e)),
        }
    }

    compile(&entries, &reader, &compile_options(options))
}

fn print_notes(compilation: &Compilation, verbose: bool) {
    let level = if verbose { Level::Info } else { Level::Warn };
    eprint!("{}", compilation.render_notes(level));
}

fn check(options: &Options) {
    let compilation = compile_files(options);
    print_notes(&compilation, options.verbose);

    if compilation.has_errors() {
        process::exit(1);
    }
}

fn run(options: &Options) {
    let compilation = compile_files(options);
    eprint!("{}", compilation.render_notes(Level::Error));

    for entry in &compilation.package.entries {
        if let Some(outcome) = compilation.outcome(entry) {
            println!("{}", outcome.long_string());
        }
    }

    if compilation.has_errors() {
        process::exit(1);
    }
}

fn console(options: &Options) {
    let mut compilation = compile_files(options);
    eprint!("{}", compilation.render_notes(Level::Error));

    let entry = compilation.package.entries[0].clone();
    let app = match compilation.outcome(&entry) {
        Some(Outcome::Value(app)) => app.clone(),
        _ => process::exit(1),
    };

    let mut io = match TerminalIo::new() {
        Ok(io) => io,
        Err(e) => fail(&e.to_string()),
    };

    match run_console_app(&mut compilation.analyzer, &app, random_action(), &mut io) {
        Ok(SessionEnd::Closed) => {}
        Ok(SessionEnd::Threw(note)) => {
            eprint!("{}", note.render(compilation.source(&note.pos.file)));
            process::exit(1);
        }
        Err(e) => fail(&e.to_string()),
    }
}

fn run_repl(options: &Options) {
    println!(
        "{} {} - {}",
        "Vortex".cyan().bold(),
        VERSION.cyan(),
        "static analysis REPL".dimmed()
    );
    println!("Type {} to exit, {} for help\n", "exit".yellow(), "help".yellow());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => fail(&format!("failed to create REPL: {}", e)),
    };

    // Statements accepted so far; every line is analyzed after them.
    let mut history: Vec<String> = Vec::new();

    loop {
        match rl.readline(&format!("{} ", "vx>".green().bold())) {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    "exit" | "quit" => {
                        println!("{}", "Goodbye!".cyan());
                        break;
                    }
                    "help" => {
                        print_repl_help();
                        continue;
                    }
                    "clear" => {
                        history.clear();
                        println!("{}", "State cleared.".dimmed());
                        continue;
                    }
                    _ => {}
                }

                let statement = !line.starts_with("return")
                    && (line.ends_with(';') || line.ends_with('}'));
                let tail = if statement {
                    format!("{}\nreturn null;", line)
                } else {
                    format!("return {};", line.trim_start_matches("return").trim_end_matches(';'))
                };

                let mut source = history.join("\n");
                source.push('\n');
                source.push_str(&tail);

                let reader = MemoryReader::new().with(MAIN_FILE, source);
                let compilation =
                    compile(&[MAIN_FILE.to_string()], &reader, &compile_options(options));

                if compilation.has_errors() {
                    eprint!("{}", compilation.render_notes(Level::Error));
                    continue;
                }

                match compilation.outcome(MAIN_FILE) {
                    Some(outcome) if outcome.is_exception() => {
                        println!("{}", outcome.long_string().red());
                    }
                    Some(_) if statement => history.push(line.to_string()),
                    Some(outcome) => println!("{} {}", "=>".dimmed(), outcome.long_string().cyan()),
                    None => {}
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "error".red(), err);
                break;
            }
        }
    }
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit   Exit the REPL");
    println!("  clear        Forget earlier statements");
    println!("  help         Show this help\n");
    println!("{}", "Input:".yellow());
    println!("  x := [1, 2, 3];          Statements end in ';' and are kept");
    println!("  x:map(func(v) => v * 2)  Expressions are analyzed and shown");
}
