//! Native modules: `File`, `Perf`, `Debug`, `Json`. Each is a dedicated [`ObjClass`] plus a
//! singleton instance bound to the module's global name, so a call like `File.read(...)`
//! dispatches through `INVOKE` exactly the way a user class instance's method call does
//! (see [`crate::class::BuiltinClasses`] for the same trick applied to primitive types).
//! A bare `ObjClass` value bound directly to the name would instead resolve through
//! [`crate::vm::Vm::class_of`]'s generic `Class` arm and never reach these natives.

mod debug;
mod file;
mod json;
mod perf;

use crate::heap::{Heap, HeapId};
use crate::intern::Interns;
use crate::object::{HeapData, ObjClass, ObjObject};
use crate::table::HashTable;
use crate::value::Value;

#[derive(Clone, Copy)]
pub struct NativeModules {
    pub file: HeapId,
    pub perf: HeapId,
    pub debug: HeapId,
    pub json: HeapId,
}

impl NativeModules {
    pub fn install(heap: &mut Heap, interns: &mut Interns) -> Self {
        let mut make = |name: &str, natives: &'static [(&'static str, crate::object::NativeFn)]| {
            let name_id = interns.intern(name);
            let class_id = heap.allocate(HeapData::Class(ObjClass { name: name_id, natives: Some(natives), ..ObjClass::default() }));
            heap.allocate(HeapData::Object(ObjObject { fields: HashTable::new(), class_id: Some(class_id) }))
        };
        let file = make("File", file::NATIVES);
        file::install_constants(heap, interns, file);
        Self { file, perf: make("Perf", perf::NATIVES), debug: make("Debug", debug::NATIVES), json: make("Json", json::NATIVES) }
    }

    /// Binds each singleton into `globals` under its module name, the way `main.sl`'s
    /// implicit top-level module sees `File`/`Perf`/`Debug`/`Json` without importing them.
    pub fn install_globals(&self, heap: &mut Heap, interns: &mut Interns, globals: HeapId) {
        let bindings = [("File", self.file), ("Perf", self.perf), ("Debug", self.debug), ("Json", self.json)];
        for (name, instance) in bindings {
            let name_id = interns.intern(name);
            if let HeapData::Module(t) = heap.get_mut(globals) {
                t.set(name_id, Value::Ref(instance));
            }
        }
    }
}
