//! Callback seams into the host debugger.
//!
//! The core never renders output, stores breakpoints, or walks symbol tables
//! itself; it calls back through these traits. Both are injected as trait
//! objects at session construction so tests can substitute recorders.

use crate::coords::Coords;

/// A resolved source position for a virtual PC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub filename: String,
    pub line: u32,
}

/// Host-debugger services the core invokes.
pub trait HostDebugger {
    // --- Breakpoints ---------------------------------------------------------------------------

    /// A new ELF image appeared in `context_id`; re-resolve pending breakpoints against it.
    fn resolve_breakpoints(&mut self, context_id: u64, module_id: u64, elf_image: u64, elf_size: u64);

    /// The context is going away; breakpoints resolved against its modules revert to pending.
    fn unresolve_breakpoints(&mut self, context_id: u64);

    /// Plant a launch breakpoint at `pc`, anchored to `context_id`.
    fn insert_auto_breakpoint(&mut self, context_id: u64, pc: u64);

    /// Remove every auto breakpoint anchored to `context_id`.
    fn remove_auto_breakpoints(&mut self, context_id: u64);

    fn remove_all_breakpoints(&mut self);
    fn insert_all_breakpoints(&mut self);

    // --- Symbols -------------------------------------------------------------------------------

    fn find_source_line(&self, virtual_pc: u64) -> Option<SourceLine>;

    /// Re-read the debugger runtime symbols after a module load.
    fn update_runtime_symbols(&mut self);

    // --- Host threads --------------------------------------------------------------------------

    fn current_thread(&self) -> u32;

    /// Seat the host debugger on `tid`. A miss (thread already gone) is the
    /// host's to swallow; the core does not observe a result.
    fn switch_to_thread(&mut self, tid: u32);

    // --- ELF images ----------------------------------------------------------------------------

    fn load_elf_image(&mut self, module_id: u64, elf_image: u64, elf_size: u64);
    fn unload_elf_image(&mut self, module_id: u64);

    // --- Focus plumbing ------------------------------------------------------------------------

    /// Refresh the user-visible convenience variables from the new focus.
    fn update_convenience_variables(&mut self, coords: &Coords);

    /// Re-print the frame under the (new) focus.
    fn print_frame(&mut self);

    /// Drop the current source line and display state (a kernel finished).
    fn clear_current_source(&mut self);
}

/// Tabular/text output sink, in the host UI's native row/field protocol.
///
/// The presenter computes column widths itself and passes them through
/// `table_header`; the sink only renders.
pub trait UiSink {
    fn table_begin(&mut self, title: &str, num_columns: usize, num_rows: usize);
    fn table_header(&mut self, width: usize, label: &str);
    fn table_body(&mut self);
    fn row_begin(&mut self);
    fn field_string(&mut self, name: &str, value: &str);
    fn field_int(&mut self, name: &str, value: u64);
    fn row_end(&mut self);
    fn table_end(&mut self);
    fn text(&mut self, msg: &str);
    fn message(&mut self, msg: &str);
}
