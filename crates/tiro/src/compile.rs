//! The compilation pipeline: source text to a linked bytecode module.
//!
//! Lexical and syntactic errors are recovered locally so one run reports as
//! many problems as possible; the pipeline stops before IR construction once
//! any error-severity diagnostic exists.

use crate::{
    bytecode::{gen::generate_object, link, module::BytecodeModule},
    diagnostics::Diagnostics,
    ir::{dce::remove_unused_insts, gen::generate_module},
    parser::parse_file,
    semantics::{check_structure, resolve_symbols},
    span::Span,
    strings::StringTable,
};

/// Result of one compilation: the module (when no errors occurred) plus all
/// collected diagnostics (warnings survive successful compiles).
#[derive(Debug)]
pub struct Compilation {
    pub module: Option<BytecodeModule>,
    pub diagnostics: Diagnostics,
}

impl Compilation {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.module.is_some()
    }
}

/// Compiles one source file into a linked module named `name`.
pub fn compile_module(name: &str, source: &str, strings: &mut StringTable) -> Compilation {
    let mut diagnostics = Diagnostics::new();

    let mut file = parse_file(source, strings, &mut diagnostics);
    let table = resolve_symbols(&mut file, strings, &mut diagnostics);
    check_structure(&mut file, &table, strings, &mut diagnostics);
    if diagnostics.has_errors() {
        return Compilation {
            module: None,
            diagnostics,
        };
    }

    let module_name = strings.insert(name);
    let mut module_ir = generate_module(&file, module_name, source, &table, strings, &mut diagnostics);
    if diagnostics.has_errors() {
        return Compilation {
            module: None,
            diagnostics,
        };
    }

    for func in &mut module_ir.functions {
        remove_unused_insts(func);
    }

    let object = generate_object(&module_ir);
    match link::link(object) {
        Ok(module) => Compilation {
            module: Some(module),
            diagnostics,
        },
        Err(error) => {
            diagnostics.error(Span::at(0), error.to_string());
            Compilation {
                module: None,
                diagnostics,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_source_compiles() {
        let mut strings = StringTable::new();
        let result = compile_module("demo", "export func main() { return 1 + 2; }", &mut strings);
        assert!(result.succeeded(), "{}", result.diagnostics.render(""));
        assert!(!result.diagnostics.has_errors());
    }

    #[test]
    fn broken_source_reports_and_stops() {
        let mut strings = StringTable::new();
        let result = compile_module("demo", "func f( { return 1; }", &mut strings);
        assert!(!result.succeeded());
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn multiple_errors_surface_in_one_run() {
        let mut strings = StringTable::new();
        let source = "func f() { var x = ; }\nfunc g() { return y; }";
        let result = compile_module("demo", source, &mut strings);
        assert!(!result.succeeded());
        assert!(result.diagnostics.error_count() >= 2);
    }
}
