//! End-to-end language tests: source text in, captured `print` output out. Each test
//! exercises one of the scenarios walked through by `interpret`'s own module docs
//! (closures, inheritance, exceptions, destructuring, slicing, imports).

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;

use nx::vm::{ResourceLimits, Vm};

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl std::io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> String {
    let mut vm = Vm::new(ResourceLimits::default());
    let sink = Sink::default();
    vm.output = Box::new(sink.clone());
    match nx::run_on(source, "test.nx", &mut vm) {
        nx::RunOutcome::Ok(_) => {}
        nx::RunOutcome::CompileError(msg) => panic!("compile error:\n{msg}"),
        nx::RunOutcome::Uncaught(msg) => panic!("uncaught error:\n{msg}"),
    }
    String::from_utf8(sink.0.borrow().clone()).unwrap()
}

#[test]
fn closures_capture_and_mutate_shared_upvalue() {
    let out = run(
        r#"
        fn make_counter() {
            let count = 0
            ret fn() {
                count = count + 1
                ret count
            }
        }
        let counter = make_counter()
        print counter()
        print counter()
        print counter()
        "#,
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn two_closures_from_the_same_call_do_not_share_state() {
    let out = run(
        r#"
        fn make_counter() {
            let count = 0
            ret fn() {
                count = count + 1
                ret count
            }
        }
        let a = make_counter()
        let b = make_counter()
        print a()
        print a()
        print b()
        "#,
    );
    assert_eq!(out, "1\n2\n1\n");
}

#[test]
fn inheritance_dispatches_overrides_and_base_invoke_reaches_parent() {
    let out = run(
        r#"
        cls Animal {
            ctor(name) { this.name = name }
            speak() { ret this.name + " makes a sound" }
        }
        cls Dog < Animal {
            speak() { ret base.speak() + ", specifically a bark" }
        }
        let d = Dog("Rex")
        print d.speak()
        "#,
    );
    assert_eq!(out, "Rex makes a sound, specifically a bark\n");
}

#[test]
fn try_catch_binds_the_thrown_value_as_error() {
    let out = run(
        r#"
        fn risky(x) {
            if x < 0 { throw "negative: " + x.to_str() }
            ret x * 2
        }
        try {
            print risky(-5)
        } catch {
            print "caught: " + error
        }
        try {
            print risky(5)
        } catch {
            print "caught: " + error
        }
        "#,
    );
    assert_eq!(out, "caught: negative: -5\n10\n");
}

#[test]
fn destructuring_binds_positions_and_a_rest_seq() {
    let out = run(
        r#"
        let [first, second, ...rest] = [1, 2, 3, 4, 5]
        print first
        print second
        print rest
        "#,
    );
    assert_eq!(out, "1\n2\n[3, 4, 5]\n");
}

#[test]
fn object_destructuring_binds_named_fields() {
    let out = run(
        r#"
        let {x, y} = {x: 10, y: 20}
        print x
        print y
        "#,
    );
    assert_eq!(out, "10\n20\n");
}

#[test]
fn slice_semantics_cover_seq_and_str() {
    let out = run(
        r#"
        let nums = [10, 20, 30, 40, 50]
        print nums[1..3]
        print nums[..2]
        print nums[3..]
        let s = "hello world"
        print s[0..5]
        print s[6..]
        "#,
    );
    assert_eq!(out, "[20, 30]\n[10, 20]\n[40, 50]\nhello\nworld\n");
}

#[test]
fn module_import_resolves_relative_to_importer_cwd_and_exposes_bindings() {
    let dir = std::env::temp_dir().join(format!("nx-import-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("mathy.sl"),
        r#"
        fn double(x) { ret x * 2 }
        const PI = 3
        "#,
    )
    .unwrap();

    let source = r#"
        import mathy: double, PI from "mathy.sl"
        print double(21)
        print PI
        "#;

    let mut vm = Vm::new(ResourceLimits::default());
    vm.cwd = dir.clone();
    let sink = Sink::default();
    vm.output = Box::new(sink.clone());
    match nx::run_on(source, "importer.nx", &mut vm) {
        nx::RunOutcome::Ok(_) => {}
        nx::RunOutcome::CompileError(msg) => panic!("compile error:\n{msg}"),
        nx::RunOutcome::Uncaught(msg) => panic!("uncaught error:\n{msg}"),
    }
    let out = String::from_utf8(sink.0.borrow().clone()).unwrap();
    assert_eq!(out, "42\n3\n");

    std::fs::remove_dir_all(&dir).ok();
}
