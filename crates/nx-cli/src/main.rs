//! `nx`'s command-line front end: three subcommands, argv hand-parsed the way the
//! teacher's own CLI does (`ouros-cli/src/main.rs` has no CLI-parsing crate either — the
//! surface here is just as small: `run`, `test`, `repl`, a handful of boolean flags).

use std::cell::RefCell;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use nx::error::ExitCode as NxExitCode;
use nx::tracer::{NoopTracer, StderrTracer};
use nx::vm::{ResourceLimits, Vm};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match args.first().map(String::as_str) {
        Some("run") => cmd_run(&args[1..]),
        Some("test") => cmd_test(&args[1..]),
        Some("repl") => cmd_repl(&args[1..]),
        _ => {
            eprintln!("usage: nx run <path> [--trace] [--gc-stress]");
            eprintln!("       nx test <dir> [--verbose]");
            eprintln!("       nx repl [--trace]");
            NxExitCode::BadCliUsage
        }
    };
    ExitCode::from(code.code() as u8)
}

fn cmd_run(rest: &[String]) -> NxExitCode {
    let mut path = None;
    let mut trace = false;
    let mut gc_stress = false;
    for a in rest {
        match a.as_str() {
            "--trace" => trace = true,
            "--gc-stress" => gc_stress = true,
            other if path.is_none() => path = Some(other.to_string()),
            other => {
                eprintln!("error: unexpected argument '{other}'");
                return NxExitCode::BadCliUsage;
            }
        }
    }
    let Some(path) = path else {
        eprintln!("error: 'run' requires a file path");
        return NxExitCode::BadCliUsage;
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading '{path}': {e}");
            return NxExitCode::IoError;
        }
    };

    let mut limits = ResourceLimits::default();
    limits.gc_stress = gc_stress;
    let tracer: Box<dyn nx::tracer::VmTracer> = if trace { Box::new(StderrTracer::new()) } else { Box::new(NoopTracer) };
    let cwd = Path::new(&path).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let file_name = Path::new(&path).file_name().and_then(|n| n.to_str()).unwrap_or(&path).to_string();

    match nx::run_source(&source, &file_name, cwd, limits, tracer) {
        nx::RunOutcome::Ok(_) => NxExitCode::Ok,
        nx::RunOutcome::CompileError(msg) => {
            eprint!("{msg}");
            NxExitCode::CompileError
        }
        nx::RunOutcome::Uncaught(msg) => {
            eprint!("{msg}");
            NxExitCode::UncaughtException
        }
    }
}

fn cmd_repl(rest: &[String]) -> NxExitCode {
    let trace = rest.iter().any(|a| a == "--trace");
    let tracer: Box<dyn nx::tracer::VmTracer> = if trace { Box::new(StderrTracer::new()) } else { Box::new(NoopTracer) };
    let mut vm = Vm::new(ResourceLimits::default());
    vm.tracer = tracer;

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("nx> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match nx::run_on(trimmed, "<repl>", &mut vm) {
            nx::RunOutcome::Ok(value) => {
                if !matches!(value, nx::value::Value::Nil) {
                    if let Ok(s) = vm.stringify(value) {
                        println!("{s}");
                    }
                }
            }
            nx::RunOutcome::CompileError(msg) => eprint!("{msg}"),
            nx::RunOutcome::Uncaught(msg) => eprint!("{msg}"),
        }
    }
    NxExitCode::Ok
}

/// A `print`-sink shared between the VM under test and the comparator, so `Vm::output`
/// (a `Box<dyn Write>`) can be read back after `interpret` returns.
#[derive(Clone, Default)]
struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl std::io::Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One `// [Expect ...]` / `// [ExpectCompileError ...]` / `// [ExpectRuntimeError ...]`
/// tag parsed out of a `.spec.sl` file's trailing line comment.
enum Tag {
    Output(String),
    CompileError(String),
    RuntimeError(String),
}

fn parse_tags(source: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    for line in source.lines() {
        let Some(comment_at) = line.find("//") else { continue };
        let comment = line[comment_at + 2..].trim();
        let Some(open) = comment.find('[') else { continue };
        let Some(close) = comment.rfind(']') else { continue };
        if close <= open {
            continue;
        }
        let body = comment[open + 1..close].trim();
        if let Some(text) = body.strip_prefix("Expect ") {
            tags.push(Tag::Output(text.trim().to_string()));
        } else if let Some(text) = body.strip_prefix("ExpectCompileError") {
            tags.push(Tag::CompileError(text.trim().to_string()));
        } else if let Some(text) = body.strip_prefix("ExpectRuntimeError") {
            tags.push(Tag::RuntimeError(text.trim().to_string()));
        }
    }
    tags
}

struct TestResult {
    path: PathBuf,
    failure: Option<String>,
}

fn run_one_test(path: &Path) -> TestResult {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => return TestResult { path: path.to_path_buf(), failure: Some(format!("cannot read file: {e}")) },
    };
    let tags = parse_tags(&source);
    let expect_compile_error = tags.iter().find_map(|t| match t {
        Tag::CompileError(s) => Some(s.clone()),
        _ => None,
    });
    let expect_runtime_error = tags.iter().find_map(|t| match t {
        Tag::RuntimeError(s) => Some(s.clone()),
        _ => None,
    });
    let expected_lines: Vec<&str> = tags
        .iter()
        .filter_map(|t| match t {
            Tag::Output(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("test").to_string();
    let mut vm = Vm::new(ResourceLimits::default());
    vm.cwd = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let captured = CapturedOutput::default();
    vm.output = Box::new(captured.clone());

    let function = match nx::compile_source(&source, &file_name, &mut vm) {
        Ok(f) => f,
        Err(msg) => {
            return match expect_compile_error {
                Some(expected) if msg.contains(&expected) => TestResult { path: path.to_path_buf(), failure: None },
                Some(expected) => TestResult {
                    path: path.to_path_buf(),
                    failure: Some(format!("expected compile error containing '{expected}', got:\n{msg}")),
                },
                None => TestResult { path: path.to_path_buf(), failure: Some(format!("unexpected compile error:\n{msg}")) },
            };
        }
    };
    if let Some(expected) = &expect_compile_error {
        return TestResult {
            path: path.to_path_buf(),
            failure: Some(format!("expected compile error containing '{expected}', but compiled cleanly")),
        };
    }

    match vm.interpret(function) {
        Ok(_) => {
            if let Some(expected) = expect_runtime_error {
                return TestResult {
                    path: path.to_path_buf(),
                    failure: Some(format!("expected runtime error containing '{expected}', but ran to completion")),
                };
            }
        }
        Err(nx::error::RunError::Exception(exc)) => {
            return match expect_runtime_error {
                Some(expected) if exc.message.contains(&expected) => TestResult { path: path.to_path_buf(), failure: None },
                Some(expected) => TestResult {
                    path: path.to_path_buf(),
                    failure: Some(format!("expected runtime error containing '{expected}', got '{}'", exc.message)),
                },
                None => TestResult { path: path.to_path_buf(), failure: Some(format!("uncaught error: {}", exc.message)) },
            };
        }
        Err(nx::error::RunError::Internal(e)) => {
            return TestResult { path: path.to_path_buf(), failure: Some(e.to_string()) };
        }
    }

    let actual = captured.0.borrow();
    let actual_text = String::from_utf8_lossy(&actual);
    let actual_lines: Vec<&str> = actual_text.lines().collect();
    if actual_lines.len() != expected_lines.len() {
        return TestResult {
            path: path.to_path_buf(),
            failure: Some(format!("expected {} output line(s), got {}:\n{actual_text}", expected_lines.len(), actual_lines.len())),
        };
    }
    for (i, (actual_line, expected_line)) in actual_lines.iter().zip(expected_lines.iter()).enumerate() {
        if actual_line != expected_line {
            return TestResult {
                path: path.to_path_buf(),
                failure: Some(format!("line {}: expected '{expected_line}', got '{actual_line}'", i + 1)),
            };
        }
    }
    TestResult { path: path.to_path_buf(), failure: None }
}

fn discover_spec_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            discover_spec_files(&path, out);
        } else if path.to_str().map(|s| s.ends_with(".spec.sl") || s.ends_with(".spec.nx")).unwrap_or(false) {
            out.push(path);
        }
    }
}

fn cmd_test(rest: &[String]) -> NxExitCode {
    let verbose = rest.iter().any(|a| a == "--verbose");
    let Some(dir) = rest.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("error: 'test' requires a directory");
        return NxExitCode::BadCliUsage;
    };
    let dir = PathBuf::from(dir);
    let mut files = Vec::new();
    discover_spec_files(&dir, &mut files);
    files.sort();

    let mut passed = 0;
    let mut failed = 0;
    for path in &files {
        let result = run_one_test(path);
        match &result.failure {
            None => {
                passed += 1;
                if verbose {
                    println!("ok   {}", result.path.display());
                }
            }
            Some(reason) => {
                failed += 1;
                println!("FAIL {}", result.path.display());
                println!("     {reason}");
            }
        }
    }
    println!("{passed} passed, {failed} failed, {} total", files.len());
    if failed > 0 {
        NxExitCode::TestFailure
    } else {
        NxExitCode::Ok
    }
}
