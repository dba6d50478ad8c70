use std::{env, fs, io::Read as _, process::ExitCode, time::Instant};

use hybris::{ast, eval, extern_abi, ops, vm::Vm, GcLimits};

const USAGE: &str = "\
usage: hybris [options] [path]

Runs a Hybris script read from `path`, or from stdin if no path is given.

options:
  -h, --help       print this message and exit
  -g, --gc <NNN[K|M]>  set the GC byte-budget threshold (default 1M)
  -t, --time       print wall-clock time taken after the run
  -s, --trace      print a trace line for every call, return, and collection
";

struct Options {
    path: Option<String>,
    gc: GcLimits,
    time: bool,
    trace: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut path = None;
    let mut gc = GcLimits::default();
    let mut time = false;
    let mut trace = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            "-t" | "--time" => time = true,
            "-s" | "--trace" => trace = true,
            "-g" | "--gc" => {
                i += 1;
                let raw = args.get(i).ok_or_else(|| "-g/--gc requires a value".to_string())?;
                gc = GcLimits::parse(raw).map_err(|err| err.to_string())?;
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(format!("unrecognized option '{other}'"));
            }
            other => path = Some(other.to_string()),
        }
        i += 1;
    }

    Ok(Options { path, gc, time, trace })
}

fn read_source(path: Option<&str>) -> Result<String, String> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|err| format!("error reading {path}: {err}")),
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source).map_err(|err| format!("error reading stdin: {err}"))?;
            Ok(source)
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let source = match read_source(options.path.as_deref()) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let program = match hybris_syntax::parse(&source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("syntax error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(options.gc);
    if options.trace {
        vm = vm.with_tracer(Box::new(hybris::tracer::StderrTracer));
    }
    extern_abi::install_stdlib(&mut vm);

    let start = Instant::now();
    let outcome = run(&mut vm, &program);
    let elapsed = start.elapsed();

    let code = match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    };

    if options.time {
        eprintln!("time taken: {elapsed:?}");
    }
    code
}

/// Runs `program` to completion, surfacing any uncaught script exception
/// (still `throwing` on the global frame once `run_program` returns) as a
/// display-formatted error string rather than a Rust panic (§4.H).
fn run(vm: &mut Vm, program: &ast::Node) -> Result<(), String> {
    let result = eval::run_program(vm, program).map_err(|err| err.to_string())?;
    if vm.globals.state.throwing {
        let thrown = vm.globals.state.thrown_value.unwrap_or(result);
        return Err(ops::to_display_string(&vm.heap, thrown));
    }
    Ok(())
}
