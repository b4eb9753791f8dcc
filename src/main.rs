use std::io::{self, BufRead, Write};
use std::process::exit;

use clap::Parser as ClapParser;
use quill::report::render_compile_errors;
use quill::{InterpretError, InterpretResult, Interpreter, VmConfig};
use tracing_subscriber::EnvFilter;

/// Exit status for an input file that can't be read.
const EXIT_IO_ERROR: i32 = 74;

fn main() {
    let opt = Opt::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = VmConfig {
        stress_gc: opt.stress_gc,
        trace_execution: opt.trace,
        ..VmConfig::default()
    };
    let mut interpreter = Interpreter::new(config);

    let input = if let Some(e) = opt.eval {
        e
    } else if let Some(f) = opt.file.or(opt.path) {
        match std::fs::read_to_string(&f) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Could not read file \"{}\": {}", f, e);
                exit(EXIT_IO_ERROR);
            }
        }
    } else {
        repl(&mut interpreter);
        return;
    };

    if opt.compile_only {
        match interpreter.compile_only(&input) {
            Ok(listing) => print!("{}", listing),
            Err(errors) => {
                eprintln!("{}", render_compile_errors(&input, &errors));
                exit(InterpretResult::CompileError.exit_code());
            }
        }
        return;
    }

    let stdout = io::stdout();
    let result = interpreter.interpret(&input, &mut stdout.lock());
    report(&input, &result);
    exit(InterpretResult::from(&result).exit_code());
}

/// Read and run one line at a time against the same interpreter.
fn repl(interpreter: &mut Interpreter) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin = stdin.lock();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = stdout.lock().flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        }

        let result = interpreter.interpret(&line, &mut stdout.lock());
        report(&line, &result);
    }
}

fn report(source: &str, result: &Result<(), InterpretError>) {
    match result {
        Ok(()) => {}
        Err(InterpretError::Compile(errors)) => {
            eprintln!("{}", render_compile_errors(source, errors))
        }
        Err(e @ InterpretError::Runtime(_)) => eprintln!("{}", e),
    }
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Opt {
    /// Only compile the input. Outputs the disassembled bytecode.
    #[clap(long)]
    compile_only: bool,

    /// Collect garbage before every allocation.
    #[clap(long)]
    stress_gc: bool,

    /// Log every executed instruction. Shown with `QUILL_LOG=trace`.
    #[clap(long)]
    trace: bool,

    /// Evaluate the given string as a Quill program.
    #[clap(short, long)]
    eval: Option<String>,

    /// Evaluate the given file as a Quill program.
    #[clap(short, long)]
    file: Option<String>,

    /// Evaluate the given file as a Quill program. Starts a REPL if no input is given.
    path: Option<String>,
}
