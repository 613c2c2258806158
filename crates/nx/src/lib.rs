//! `nx`: lexer, parser, resolver, bytecode compiler, and stack VM for the `nx` scripting
//! language. [`run_source`] wires the whole pipeline together for a single source file;
//! `nx-cli` is the only consumer that needs anything below that.

pub mod ast;
pub mod chunk;
pub mod class;
pub mod compiler;
pub mod error;
pub mod heap;
pub mod intern;
pub mod module;
pub mod natives;
pub mod object;
pub mod parser;
pub mod resolve;
pub mod scanner;
pub mod table;
pub mod token;
pub mod tracer;
pub mod value;
pub mod vm;

use error::{CompileError, ExitCode, RunError};
use vm::{ResourceLimits, Vm};

/// The outcome of running one source file: either its top-level return value, or a
/// diagnosis of what stage failed, already mapped to the exit code the CLI reports.
pub enum RunOutcome {
    Ok(value::Value),
    CompileError(String),
    Uncaught(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunOutcome::Ok(_) => ExitCode::Ok,
            RunOutcome::CompileError(_) => ExitCode::CompileError,
            RunOutcome::Uncaught(_) => ExitCode::UncaughtException,
        }
    }
}

/// Parses, resolves, and compiles `source` against `vm`'s heap/interns, rendering any
/// diagnostic into a single string (the `test` subcommand needs to tell a compile failure
/// apart from a runtime one; [`RunError`] alone can't distinguish them).
pub fn compile_source(source: &str, file_name: &str, vm: &mut Vm) -> Result<std::rc::Rc<object::ObjFunction>, String> {
    let (root, mut errors) = parser::Parser::new(source).parse();
    let resolve_errors = resolve::Resolver::new().resolve(&root);
    errors.diagnostics.extend(resolve_errors.diagnostics);
    if !errors.is_empty() {
        return Err(errors.render(source, file_name));
    }
    compile(&root, vm).map_err(|e| e.render(source, file_name))
}

fn compile(root: &ast::Root, vm: &mut Vm) -> Result<std::rc::Rc<object::ObjFunction>, CompileError> {
    let globals = vm.main_module;
    compiler::Compiler::new(vm.heap_mut(), vm.interns_mut(), globals).compile(root)
}

/// Parses, resolves, and compiles `source`, then runs it to completion on a fresh [`Vm`]
/// rooted at `cwd` (so its own imports resolve relative to the file's directory).
pub fn run_source(source: &str, file_name: &str, cwd: std::path::PathBuf, limits: ResourceLimits, tracer: Box<dyn tracer::VmTracer>) -> RunOutcome {
    let mut vm = Vm::new(limits);
    vm.cwd = cwd;
    vm.tracer = tracer;
    run_on(source, file_name, &mut vm)
}

/// Used by callers that already have a running [`Vm`] (`repl` reuses one VM across lines).
pub fn run_on(source: &str, file_name: &str, vm: &mut Vm) -> RunOutcome {
    let function = match compile_source(source, file_name, vm) {
        Ok(f) => f,
        Err(rendered) => return RunOutcome::CompileError(rendered),
    };
    match vm.interpret(function) {
        Ok(value) => RunOutcome::Ok(value),
        Err(RunError::Exception(exc)) => RunOutcome::Uncaught(exc.render_trace(file_name)),
        Err(RunError::Internal(e)) => RunOutcome::Uncaught(e.to_string()),
    }
}
