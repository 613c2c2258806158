//! `TRY`/`THROW` unwinding.
//!
//! A `TRY` handler is just a [`Value::InternalHandler`] marker sitting on the shared value
//! stack at the point the try block begins. Throwing walks frames from the top, looking
//! for the nearest marker at or above that frame's `slots_base`; if none is found in a
//! frame, the frame is discarded (as if it returned) and the search continues in the
//! caller, exactly the "handler value scan" the VM's exception design names.

use crate::error::{Exception, RunError, RuntimeErrorKind};
use crate::value::Value;

use super::Vm;

fn find_handler(vm: &Vm, frame_base: usize) -> Option<(usize, usize)> {
    for i in (frame_base..vm.stack.len()).rev() {
        if let Value::InternalHandler(target) = vm.stack[i] {
            return Some((i, target as usize));
        }
    }
    None
}

/// Unwinds looking for a handler for `value`. If none exists anywhere on the call stack,
/// builds an uncaught [`RunError::Exception`] tagged with `kind_if_uncaught`.
pub fn throw_with_kind(vm: &mut Vm, value: Value, kind_if_uncaught: RuntimeErrorKind) -> Result<(), RunError> {
    let trace = vm.capture_trace();
    loop {
        if vm.frames.is_empty() {
            let message = vm.stringify(value).unwrap_or_else(|_| "<unprintable>".to_string());
            let mut exc = Exception::new(kind_if_uncaught, message);
            exc.trace = trace;
            return Err(RunError::Exception(exc));
        }
        let frame_base = vm.frames.last().unwrap().slots_base;
        if let Some((marker_index, target)) = find_handler(vm, frame_base) {
            vm.stack.truncate(marker_index);
            vm.push(value);
            vm.frames.last_mut().unwrap().ip = target;
            return Ok(());
        }
        let frame = vm.frames.pop().unwrap();
        vm.close_upvalues_from(frame.slots_base);
        vm.stack.truncate(frame.slots_base);
    }
}

/// Entry point for the `THROW` opcode: a bare user `throw expr`.
pub fn throw(vm: &mut Vm, value: Value) -> Result<(), RunError> {
    throw_with_kind(vm, value, RuntimeErrorKind::UserThrown)
}
