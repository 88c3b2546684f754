use clap::Parser as ClapParser;
use log::debug;
use std::{fs, process};

use object::Value;
use vm::{disasm, os_message, with_vm_stack, Outcome, Unwind, Vm, VmSettings};

/// Exit status for an uncaught exception.
const EXIT_EXCEPTION: i32 = 1;
/// Exit status for an internal fault (`EX_SOFTWARE`).
const EXIT_FAULT: i32 = 70;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input source files to execute in order
    #[arg(required = false, help = "The .rb files to execute")]
    files: Vec<String>,

    /// Source text run after the files
    #[arg(short = 'e', value_name = "CODE", help = "Evaluate CODE")]
    eval: Vec<String>,

    /// Print bytecode and constants instead of executing
    #[arg(long, help = "Dump bytecode + constant pool for inputs")]
    dump_bytecode: bool,

    #[arg(long, default_value_t = VmSettings::default().max_frames, help = "Maximum call depth")]
    max_frames: usize,

    #[arg(long, help = "Skip loading the Ruby prelude")]
    no_prelude: bool,

    #[arg(long, help = "Print dispatch and inline cache counters on exit")]
    stats: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let status = match with_vm_stack(cli.max_frames, move || run(cli)) {
        Ok(status) => status,
        Err(err) => {
            eprintln!("garnet: cannot start interpreter thread: {}", os_message(&err));
            EXIT_FAULT
        }
    };
    process::exit(status);
}

fn run(cli: Cli) -> i32 {
    let mut vm = Vm::new(VmSettings {
        max_frames: cli.max_frames,
        load_prelude: !cli.no_prelude,
        ..VmSettings::default()
    });

    let scripts: Vec<(String, String)> = cli
        .eval
        .iter()
        .enumerate()
        .map(|(i, code)| {
            let name = if cli.eval.len() == 1 {
                "-e".to_string()
            } else {
                format!("-e:{}", i + 1)
            };
            (name, code.clone())
        })
        .collect();

    if cli.dump_bytecode {
        for filename in &cli.files {
            let source = match fs::read_to_string(filename) {
                Ok(source) => source,
                Err(err) => {
                    eprintln!("garnet: {}: {filename}", os_message(&err));
                    process::exit(EXIT_EXCEPTION);
                }
            };
            dump(&vm, filename, &source);
        }
        for (name, source) in &scripts {
            dump(&vm, name, source);
        }
        return 0;
    }

    let mut status = 0;
    for filename in &cli.files {
        debug!("loading {filename}");
        let result = vm.load(filename);
        if let Some(code) = report(&vm, result) {
            status = code;
            break;
        }
    }
    if status == 0 {
        for (name, source) in &scripts {
            let result = vm.eval(source, name);
            if let Some(code) = report(&vm, result) {
                status = code;
                break;
            }
        }
    }

    if let Err(err) = vm.flush() {
        eprintln!("garnet: {}", os_message(&err));
    }
    if cli.stats {
        let stats = &vm.stats;
        eprintln!(
            "resolutions: {}\ndispatches: {}\ncache hits: {}\ncache misses: {}",
            stats.resolutions, stats.dispatches, stats.cache_hits, stats.cache_misses
        );
    }
    status
}

fn dump(vm: &Vm, filename: &str, source: &str) {
    match vm.compile(source, filename) {
        Ok(block) => print!("{}", disasm::dump_block(&block, &vm.symbols)),
        Err(err) => {
            eprintln!("{filename}:{}: {}", err.line(), err.message());
            process::exit(EXIT_EXCEPTION);
        }
    }
}

/// Print an abnormal outcome, returning the exit status it maps to.
fn report(vm: &Vm, result: Outcome<Value>) -> Option<i32> {
    match result {
        Ok(_) => None,
        Err(Unwind::Fault(fault)) => {
            eprintln!("garnet: internal error: {fault}");
            Some(EXIT_FAULT)
        }
        Err(unwind) => {
            match unwind.as_exception() {
                Some(exception) => eprintln!("{}", vm.format_exception(exception)),
                None => eprintln!("garnet: unexpected {unwind:?}"),
            }
            Some(EXIT_EXCEPTION)
        }
    }
}
