//! `Json.stringify`/`Json.parse`, grounded in `original_source/native_module_json.c`'s
//! `stringify_value`/`stringify_obj`/`stringify_seq` recursion and its escape rules (`\n`,
//! `"`, `'`, `\\`). `parse` is a deliberate stub — the C original never implemented it
//! either, so nx keeps the same `nil` result rather than inventing new semantics.

use crate::error::{RunError, RunResult};
use crate::intern::StringId;
use crate::object::{HeapData, NativeFn, ObjString};
use crate::value::Value;
use crate::vm::Vm;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Nil)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out
}

fn wrap(open: char, close: char, parts: &[String], indent: i64, depth: i64) -> String {
    if parts.is_empty() {
        return format!("{open}{close}");
    }
    if indent <= 0 {
        return format!("{open}{}{close}", parts.join(","));
    }
    let inner = " ".repeat((indent * (depth + 1)) as usize);
    let outer = " ".repeat((indent * depth) as usize);
    let mut out = String::new();
    out.push(open);
    out.push('\n');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(',');
            out.push('\n');
        }
        out.push_str(&inner);
        out.push_str(part);
    }
    out.push('\n');
    out.push_str(&outer);
    out.push(close);
    out
}

fn stringify_value(vm: &mut Vm, value: Value, indent: i64, depth: i64) -> RunResult<String> {
    match value {
        Value::Nil => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => {
            let mut buf = ryu::Buffer::new();
            Ok(buf.format(f).to_string())
        }
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Str(s) => Ok(format!("\"{}\"", escape(&s.chars))),
            HeapData::Seq(s) => {
                let items = s.items.clone();
                stringify_items(vm, &items, indent, depth)
            }
            HeapData::Tuple(t) => {
                let items = t.items.clone();
                stringify_items(vm, &items, indent, depth)
            }
            HeapData::Object(o) => {
                let entries: Vec<(StringId, Value)> = o.fields.iter().collect();
                stringify_entries(vm, &entries, indent, depth)
            }
            // A value JSON has no representation for (a class, a function, ...). The C
            // original substitutes a literal "???" to keep the output parseable-if-wrong
            // rather than aborting the whole stringify — kept here on purpose.
            _ => Ok("\"???\"".to_string()),
        },
        _ => Ok("\"???\"".to_string()),
    }
}

fn stringify_items(vm: &mut Vm, items: &[Value], indent: i64, depth: i64) -> RunResult<String> {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(stringify_value(vm, *item, indent, depth + 1)?);
    }
    Ok(wrap('[', ']', &parts, indent, depth))
}

fn stringify_entries(vm: &mut Vm, entries: &[(StringId, Value)], indent: i64, depth: i64) -> RunResult<String> {
    let mut parts = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let key_str = vm.interns().get(*key).to_string();
        let value_str = stringify_value(vm, *value, indent, depth + 1)?;
        let sep = if indent > 0 { ": " } else { ":" };
        parts.push(format!("\"{}\"{sep}{value_str}", escape(&key_str)));
    }
    Ok(wrap('{', '}', &parts, indent, depth))
}

pub const NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", |vm, args| {
        let s = vm.stringify(arg(args, 0))?;
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Str(ObjString::new(s)))))
    }),
    ("class", |vm, args| match vm.class_of(arg(args, 0)) {
        Some(id) => Ok(Value::Ref(id)),
        None => Ok(Value::Nil),
    }),
    ("stringify", |vm, args| {
        let indent = match arg(args, 2) {
            Value::Int(i) => i,
            Value::Nil => 0,
            _ => return Err(RunError::type_error("Json.stringify expects an int indent")),
        };
        let rendered = stringify_value(vm, arg(args, 1), indent, 0)?;
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Str(ObjString::new(rendered)))))
    }),
    ("parse", |_vm, _args| Ok(Value::Nil)),
];
