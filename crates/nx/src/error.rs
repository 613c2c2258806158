//! The three-tier error model: compile-time diagnostics, runtime exceptions, and
//! internal invariant violations. Grounded in the shape of the teacher's
//! `exception_private.rs`/`repl_error.rs` split — a `strum`-derived error-kind enum plus
//! a result alias — but with the nx-specific three tiers instead of Python's exception
//! hierarchy.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

pub use crate::ast::SourceSpan;

pub type RunResult<T> = Result<T, RunError>;

/// A single scanner/parser/resolver diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub span: SourceSpan,
    pub message: String,
}

/// All diagnostics collected while compiling one source file. The scanner, parser, and
/// resolver all append to the same `CompileError` rather than bailing on the first one,
/// so a single `run` invocation can report every syntax error at once.
#[derive(Debug, Clone, Default)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn push(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic { span, message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Renders each diagnostic as `line N: message` followed by a caret line under the
    /// offending span, matching the teacher's single-line-context error printing.
    pub fn render(&self, source: &str, file_name: &str) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            let line_text = source.lines().nth((d.span.line.saturating_sub(1)) as usize).unwrap_or("");
            let _ = fmt::Write::write_fmt(
                &mut out,
                format_args!("{file_name}:{}: error: {}\n  {line_text}\n", d.span.line, d.message),
            );
            let col = line_start_offset(source, d.span.line).map(|start| d.span.start.saturating_sub(start)).unwrap_or(0);
            out.push_str("  ");
            out.push_str(&" ".repeat(col as usize));
            out.push_str("^\n");
        }
        out
    }
}

fn line_start_offset(source: &str, line: u32) -> Option<u32> {
    let mut current = 1u32;
    let mut offset = 0u32;
    if line == 1 {
        return Some(0);
    }
    for b in source.bytes() {
        offset += 1;
        if b == b'\n' {
            current += 1;
            if current == line {
                return Some(offset);
            }
        }
    }
    None
}

/// The kind of uncaught runtime error, used only to pick an exit code; the user-facing
/// message lives on the thrown [`crate::value::Value`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum RuntimeErrorKind {
    TypeError,
    NameError,
    IndexError,
    ArityError,
    ImportError,
    AttributeError,
    RecursionError,
    UserThrown,
}

/// One frame of the stack trace captured at `throw`/panic time. Newest first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function_name: String,
    pub span: SourceSpan,
}

/// A runtime exception: the thrown value rendered to a display string plus the call
/// stack captured at the moment of the throw.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl Exception {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), trace: Vec::new() }
    }

    /// Renders `at <fn>(<file>:<line>)` frames, newest first, matching the teacher's
    /// frame-walk traceback style.
    pub fn render_trace(&self, file_name: &str) -> String {
        let mut out = format!("uncaught error: {}\n", self.message);
        for frame in &self.trace {
            out.push_str(&format!("  at {}({file_name}:{})\n", frame.function_name, frame.span.line));
        }
        out
    }
}

/// An invariant violation inside the interpreter itself: a malformed opcode stream, an
/// allocator failure, a stack-size assertion. Never constructible from nx source code.
#[derive(Debug, Clone)]
pub struct InternalError {
    pub message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal error: {}", self.message)
    }
}

/// Error type threaded through the VM's own `Result`-returning internals. Adapted at the
/// native-function ABI boundary into the error-slot/flag contract that native functions
/// actually use when called from bytecode.
#[derive(Debug, Clone)]
pub enum RunError {
    Exception(Exception),
    Internal(InternalError),
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        RunError::Exception(exc)
    }
}

impl From<InternalError> for RunError {
    fn from(err: InternalError) -> Self {
        RunError::Internal(err)
    }
}

impl RunError {
    pub fn type_error(message: impl Into<String>) -> Self {
        RunError::Exception(Exception::new(RuntimeErrorKind::TypeError, message))
    }

    pub fn name_error(name: &str) -> Self {
        RunError::Exception(Exception::new(RuntimeErrorKind::NameError, format!("name '{name}' is not defined")))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        RunError::Exception(Exception::new(RuntimeErrorKind::IndexError, message))
    }

    pub fn arity_error(name: &str, expected: usize, got: usize) -> Self {
        RunError::Exception(Exception::new(
            RuntimeErrorKind::ArityError,
            format!("{name}() expected {expected} argument(s), got {got}"),
        ))
    }

    pub fn import_error(message: impl Into<String>) -> Self {
        RunError::Exception(Exception::new(RuntimeErrorKind::ImportError, message))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        RunError::Exception(Exception::new(
            RuntimeErrorKind::AttributeError,
            format!("'{type_name}' has no property '{attr}'"),
        ))
    }

    pub fn recursion_error() -> Self {
        RunError::Exception(Exception::new(RuntimeErrorKind::RecursionError, "stack overflow"))
    }
}

/// Process exit codes, matching the contract in the CLI's external interface section:
/// 0 success, 1 general failure (also used by `test` for a failing run), 2 compile error,
/// 3 uncaught runtime exception, 64 bad CLI usage, 70 internal error, 74 I/O error,
/// 75 resource-limit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    TestFailure = 1,
    CompileError = 2,
    UncaughtException = 3,
    BadCliUsage = 64,
    InternalError = 70,
    IoError = 74,
    ResourceLimit = 75,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_renders_caret_under_span() {
        let mut err = CompileError::default();
        err.push(SourceSpan { start: 4, end: 5, line: 1 }, "unexpected character");
        let rendered = err.render("let @ = 1", "test.nx");
        assert!(rendered.contains("unexpected character"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(ExitCode::Ok.code(), 0);
        assert_eq!(ExitCode::UncaughtException.code(), 1);
        assert_eq!(ExitCode::InternalError.code(), 70);
        assert_eq!(ExitCode::ResourceLimit.code(), 75);
    }
}
