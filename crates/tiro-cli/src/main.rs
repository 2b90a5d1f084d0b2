//! Command line driver: compile a file, optionally disassemble the module
//! or invoke an exported zero-argument function.
//!
//! Exit codes: 0 on success, 1 on compile or runtime errors, 2 on usage
//! errors. Diagnostics go to standard output with `[line:column]` prefixes.

use std::{env, fs, path::Path, process::ExitCode};

use tiro::{compile_module, dump_module, StringTable, Vm};

struct Options {
    file: String,
    disassemble: bool,
    invoke: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut file = None;
    let mut disassemble = false;
    let mut invoke = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--disassemble" => disassemble = true,
            "--invoke" => {
                let name = iter.next().ok_or("--invoke requires a function name")?;
                invoke = Some(name.clone());
            }
            "--help" | "-h" => {
                return Err(usage());
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}\n{}", usage()));
            }
            other => {
                if file.replace(other.to_owned()).is_some() {
                    return Err("only one input file is supported".to_owned());
                }
            }
        }
    }

    match file {
        Some(file) => Ok(Options {
            file,
            disassemble,
            invoke,
        }),
        None => Err(usage()),
    }
}

fn usage() -> String {
    "usage: tiro FILE [--disassemble] [--invoke NAME]".to_owned()
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let source = match fs::read_to_string(&options.file) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("error: cannot read {}: {error}", options.file);
            return ExitCode::from(2);
        }
    };

    let module_name = Path::new(&options.file)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main");

    let mut strings = StringTable::new();
    let result = compile_module(module_name, &source, &mut strings);
    print!("{}", result.diagnostics.render(&source));
    let Some(module) = result.module else {
        return ExitCode::FAILURE;
    };

    if options.disassemble {
        print!("{}", dump_module(&module, &strings));
    }

    if let Some(name) = options.invoke {
        let mut vm = Vm::new(strings);
        let loaded = match vm.load(&module) {
            Ok(loaded) => loaded,
            Err(error) => {
                println!("error: {error}");
                return ExitCode::FAILURE;
            }
        };
        match vm.invoke(loaded, &name, &[]) {
            Ok(value) => println!("{}", vm.render(value)),
            Err(error) => {
                println!("error: {error}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
