//! Import resolution (`IMPORT`/`IMPORT_FROM`).
//!
//! Path candidate construction follows §4.7's rules literally: a bare `import name` joins
//! `name` onto the importing module's working directory; `import name from "path"` joins
//! `path` onto the cwd first and only falls back to treating `path` as given verbatim if the
//! joined candidate doesn't exist. Modules are cached by their logical `name`, so importing
//! the same name twice from different call sites returns the same module object.

use std::path::{Path, PathBuf};

use crate::compiler::Compiler;
use crate::error::RunError;
use crate::heap::HeapId;
use crate::intern::StringId;
use crate::object::{HeapData, ObjObject};
use crate::table::HashTable;
use crate::value::Value;
use crate::vm::Vm;

const EXTENSIONS: [&str; 2] = ["sl", "nx"];

/// Converts `path`'s separators to the platform separator and drops empty components
/// (collapsing consecutive separators and stripping a leading separator).
fn normalize(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.replace('\\', "/").split('/') {
        if !component.is_empty() {
            out.push(component);
        }
    }
    out
}

fn with_each_extension(stem: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    EXTENSIONS.iter().map(move |ext| stem.with_extension(ext))
}

fn find_existing(stem: &Path) -> Option<PathBuf> {
    with_each_extension(stem).find(|candidate| candidate.is_file())
}

fn resolve_path(cwd: &Path, name: &str, path: Option<&str>) -> Option<PathBuf> {
    match path {
        None => find_existing(&cwd.join(normalize(name))),
        Some(path) => {
            let joined = cwd.join(normalize(path));
            find_existing(&joined).or_else(|| find_existing(Path::new(path)))
        }
    }
}

/// `IMPORT name` / `IMPORT_FROM name path`: resolves, compiles (if not already cached), and
/// pushes the resulting module object. Destructured bindings are compiled as ordinary
/// `GET_PROPERTY`s on the pushed module by [`crate::compiler::Compiler::compile_import`], a
/// synthetic `"*"` property among them for the rest-binding — populated below.
pub fn import(vm: &mut Vm, name: StringId, path: Option<StringId>) -> Result<(), RunError> {
    let logical_name = vm.interns.get(name).to_string();
    if let Some(&module_id) = vm.modules.get(&logical_name) {
        vm.push(Value::Ref(module_id));
        return Ok(());
    }

    let path_str = path.map(|p| vm.interns.get(p).to_string());
    let file_path = resolve_path(&vm.cwd, &logical_name, path_str.as_deref())
        .ok_or_else(|| RunError::import_error(format!("module '{logical_name}' not found")))?;
    let display_name = file_path.file_name().and_then(|n| n.to_str()).unwrap_or(&logical_name).to_string();

    let source = std::fs::read_to_string(&file_path)
        .map_err(|e| RunError::import_error(format!("cannot read '{}': {e}", file_path.display())))?;

    let (root, mut errors) = crate::parser::Parser::new(&source).parse();
    let resolve_errors = crate::resolve::Resolver::new().resolve(&root);
    errors.diagnostics.extend(resolve_errors.diagnostics);
    if !errors.is_empty() {
        return Err(RunError::import_error(errors.render(&source, &display_name)));
    }

    // Allocated before compiling so every `ObjFunction` this module produces can carry a
    // `globals` back-pointer to its own module rather than whatever module ends up calling it.
    let module_id = vm.heap.allocate(HeapData::Module(HashTable::new()));
    vm.modules.insert(logical_name, module_id);
    let native_modules = vm.native_modules;
    native_modules.install_globals(&mut vm.heap, &mut vm.interns, module_id);

    let function = Compiler::new(&mut vm.heap, &mut vm.interns, module_id)
        .compile(&root)
        .map_err(|e| RunError::import_error(e.render(&source, &display_name)))?;
    vm.run_module_body(function, module_id)?;

    install_rest_binding(vm, module_id);
    vm.push(Value::Ref(module_id));
    Ok(())
}

/// Populates the module's synthetic `"*"` entry with an object wrapping a snapshot of every
/// name the module defines, for `import { a, ...rest } from "path"` bindings.
fn install_rest_binding(vm: &mut Vm, module_id: HeapId) {
    let entries: Vec<(StringId, Value)> = match vm.heap.get(module_id) {
        HeapData::Module(t) => t.iter().collect(),
        _ => unreachable!("import always allocates a Module"),
    };
    let mut rest_fields = HashTable::new();
    for (key, value) in entries {
        rest_fields.set(key, value);
    }
    let rest_id = vm.heap.allocate(HeapData::Object(ObjObject { fields: rest_fields, class_id: None }));
    let star = vm.interns.intern("*");
    if let HeapData::Module(t) = vm.heap.get_mut(module_id) {
        t.set(star, Value::Ref(rest_id));
    }
}
