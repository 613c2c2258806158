//! VM execution tracing.
//!
//! The interpreter holds its tracer as `Box<dyn VmTracer>` rather than a generic type
//! parameter, so swapping tracers is a runtime choice (`--trace`, `--gc-stress`) rather than
//! a monomorphization axis. [`NoopTracer`] is the default and does nothing at either hook.

use std::collections::HashMap;

/// Hook points the VM calls into during execution.
///
/// Both methods have default no-op bodies, so a tracer only needs to override the hook it
/// cares about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before every opcode dispatch. The hottest hook in the VM — keep overrides cheap.
    fn on_instruction(&mut self, _frame_depth: usize, _ip: usize) {}

    /// Called after a garbage collection cycle completes.
    fn on_gc_cycle(&mut self, _cycles: u64, _live: usize) {}
}

/// Does nothing. The production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints a human-readable execution log to stderr, one line per instruction plus a line per
/// GC cycle. Backs the CLI's `--trace` flag.
#[derive(Debug, Default)]
pub struct StderrTracer {
    count: u64,
}

impl StderrTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, frame_depth: usize, ip: usize) {
        self.count += 1;
        eprintln!("[{:>8}] ip={ip:<6} frames={frame_depth}", self.count);
    }

    fn on_gc_cycle(&mut self, cycles: u64, live: usize) {
        eprintln!("  --- gc cycle {cycles}, {live} live objects ---");
    }
}

/// Counts instructions per call depth and tracks GC cycle count, without the per-instruction
/// stderr write of [`StderrTracer`]. Used by the CLI's `--verbose` summary line.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    total_instructions: u64,
    max_frame_depth: usize,
    frame_depth_counts: HashMap<usize, u64>,
    gc_cycles: u64,
    last_live: usize,
}

impl ProfilingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> ProfilingReport {
        ProfilingReport {
            total_instructions: self.total_instructions,
            max_frame_depth: self.max_frame_depth,
            gc_cycles: self.gc_cycles,
            last_live: self.last_live,
        }
    }
}

impl VmTracer for ProfilingTracer {
    fn on_instruction(&mut self, frame_depth: usize, _ip: usize) {
        self.total_instructions += 1;
        self.max_frame_depth = self.max_frame_depth.max(frame_depth);
        *self.frame_depth_counts.entry(frame_depth).or_insert(0) += 1;
    }

    fn on_gc_cycle(&mut self, cycles: u64, live: usize) {
        self.gc_cycles = cycles;
        self.last_live = live;
    }
}

#[derive(Debug)]
pub struct ProfilingReport {
    pub total_instructions: u64,
    pub max_frame_depth: usize,
    pub gc_cycles: u64,
    pub last_live: usize,
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "instructions: {}", self.total_instructions)?;
        writeln!(f, "max call depth: {}", self.max_frame_depth)?;
        writeln!(f, "gc cycles: {}", self.gc_cycles)?;
        write!(f, "live objects at last collection: {}", self.last_live)
    }
}
