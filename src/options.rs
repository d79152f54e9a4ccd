//! Debugger options pushed in by the host.
//!
//! These mirror the host-side `set cuda ...` knobs; the host rewrites the
//! whole block whenever a setting changes. Nothing here is persisted.

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Print a banner on every context create/destroy/push/pop event.
    pub show_context_events: bool,
    /// Auto-breakpoint on every application kernel launch.
    pub break_on_launch_application: bool,
    /// Auto-breakpoint on every system kernel launch.
    pub break_on_launch_system: bool,
    /// Refuse to debug a device that is currently driving a display.
    pub gpu_busy_check: bool,
    /// Software preemption widens single-step invalidation to the whole device.
    pub software_preemption: bool,
    /// Kernel launch notifications may be deferred; kernels are then
    /// registered lazily on first warp sighting.
    pub defer_kernel_launch_notifications: bool,
    /// Collapse contiguous rows in the blocks/threads info views.
    pub coalescing: bool,
    /// Verbose tracing of the notification channel.
    pub debug_notifications: bool,
}
