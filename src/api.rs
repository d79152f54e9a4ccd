use crate::error::Result;
use std::fmt;

// ===============================================================================================
// Wire Types
// ===============================================================================================

/// A CUDA 3-dimensional index (grid dimension, block dimension, block index, thread index).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CuDim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl CuDim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Number of points in a grid/block of this dimension.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl fmt::Display for CuDim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Device exception reported for a lane.
///
/// Warp-scoped exceptions are reported on every lane of the faulting warp,
/// device-scoped ones on every lane of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CudaException {
    #[default]
    None,
    LaneIllegalAddress,
    LaneMisalignedAddress,
    LaneUserStackOverflow,
    LaneSyscallError,
    WarpIllegalInstruction,
    WarpOutOfRangeAddress,
    WarpMisalignedAddress,
    WarpInvalidAddressSpace,
    WarpInvalidPc,
    WarpHardwareStackOverflow,
    WarpAssert,
    DeviceIllegalAddress,
    DeviceHardwareStackOverflow,
}

impl fmt::Display for CudaException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::LaneIllegalAddress => "Lane Illegal Address",
            Self::LaneMisalignedAddress => "Lane Misaligned Address",
            Self::LaneUserStackOverflow => "Lane User Stack Overflow",
            Self::LaneSyscallError => "Lane Syscall Error",
            Self::WarpIllegalInstruction => "Warp Illegal Instruction",
            Self::WarpOutOfRangeAddress => "Warp Out Of Range Address",
            Self::WarpMisalignedAddress => "Warp Misaligned Address",
            Self::WarpInvalidAddressSpace => "Warp Invalid Address Space",
            Self::WarpInvalidPc => "Warp Invalid PC",
            Self::WarpHardwareStackOverflow => "Warp Hardware Stack Overflow",
            Self::WarpAssert => "Warp Assert",
            Self::DeviceIllegalAddress => "Device Illegal Address",
            Self::DeviceHardwareStackOverflow => "Device Hardware Stack Overflow",
        };
        f.write_str(name)
    }
}

/// Memory segment blamed by the memcheck error address report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemorySegment {
    #[default]
    Unknown,
    Global,
    Shared,
    Local,
}

/// Attach/detach progress of the debug session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachState {
    #[default]
    NotStarted,
    InProgress,
    AppReady,
    DetachInProgress,
    DetachComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelType {
    Application,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOrigin {
    Cpu,
    Gpu,
}

impl fmt::Display for KernelOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
        })
    }
}

/// Launch record returned by `get_grid_info` for a grid the debugger has not
/// seen a `KernelReady` event for (deferred launch notifications).
#[derive(Debug, Clone, Copy)]
pub struct GridInfo {
    pub context_id: u64,
    pub module_id: u64,
    pub grid_dim: CuDim3,
    pub block_dim: CuDim3,
    pub kind: KernelType,
    pub parent_grid_id: u64,
    pub origin: KernelOrigin,
    pub entry_pc: u64,
    pub tid: u32,
}

// ===============================================================================================
// Event Queue
// ===============================================================================================

/// Which of the two event queues to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventQueueKind {
    Sync,
    Async,
}

/// One event popped from the debug-API queue.
///
/// `Invalid` is the end-of-queue marker, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CudaEvent {
    CtxCreate {
        dev: u32,
        context_id: u64,
        tid: u32,
    },
    CtxDestroy {
        dev: u32,
        context_id: u64,
        tid: u32,
    },
    CtxPush {
        dev: u32,
        context_id: u64,
        tid: u32,
    },
    CtxPop {
        dev: u32,
        context_id: u64,
        tid: u32,
    },
    ElfImageLoaded {
        dev: u32,
        context_id: u64,
        module_id: u64,
        handle: u64,
        size: u64,
    },
    KernelReady {
        dev: u32,
        context_id: u64,
        module_id: u64,
        grid_id: u64,
        tid: u32,
        entry_pc: u64,
        grid_dim: CuDim3,
        block_dim: CuDim3,
        kind: KernelType,
        parent_grid_id: u64,
        origin: KernelOrigin,
    },
    KernelFinished {
        dev: u32,
        grid_id: u64,
    },
    InternalError {
        code: u64,
    },
    Timeout,
    AttachComplete,
    DetachComplete,
    Invalid,
}

// ===============================================================================================
// Debug-API Port
// ===============================================================================================

/// The capability set the core consumes from the low-level hardware debug API.
///
/// Implementations wrap the actual driver interface (local shared library or
/// remote protocol stub); the core never talks to hardware directly. All
/// reads are synchronous. Lane-scoped reads require the lane to be valid,
/// warp-scoped reads require the warp to be valid; the mirror asserts this
/// before calling down.
pub trait DebugApi {
    // --- Device descriptors --------------------------------------------------------------------

    fn get_num_devices(&mut self) -> Result<u32>;
    fn get_num_sms(&mut self, dev: u32) -> Result<u32>;
    fn get_num_warps(&mut self, dev: u32) -> Result<u32>;
    fn get_num_lanes(&mut self, dev: u32) -> Result<u32>;
    fn get_num_registers(&mut self, dev: u32) -> Result<u32>;
    fn get_device_type(&mut self, dev: u32) -> Result<String>;
    fn get_sm_type(&mut self, dev: u32) -> Result<String>;

    // --- Warp / lane state ---------------------------------------------------------------------

    fn read_valid_warps(&mut self, dev: u32, sm: u32) -> Result<u64>;
    fn read_broken_warps(&mut self, dev: u32, sm: u32) -> Result<u64>;
    fn read_valid_lanes(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32>;
    fn read_active_lanes(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32>;
    fn read_grid_id(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64>;
    fn read_block_idx(&mut self, dev: u32, sm: u32, wp: u32) -> Result<CuDim3>;
    fn read_thread_idx(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<CuDim3>;
    fn read_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64>;
    fn read_virtual_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64>;
    fn read_lane_exception(&mut self, dev: u32, sm: u32, wp: u32, ln: u32)
    -> Result<CudaException>;
    fn read_register(&mut self, dev: u32, sm: u32, wp: u32, ln: u32, regno: u32) -> Result<u32>;
    fn read_call_depth(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u32>;
    fn read_syscall_call_depth(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u32>;
    fn read_virtual_return_address(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64>;
    fn read_device_exception_state(&mut self, dev: u32) -> Result<u64>;
    fn memcheck_read_error_address(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
    ) -> Result<(u64, MemorySegment)>;

    // --- Execution control ---------------------------------------------------------------------

    /// Single-steps one warp. Returns the mask of warps that actually stepped;
    /// the hardware may step more warps than requested.
    fn single_step_warp(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64>;
    fn suspend_device(&mut self, dev: u32) -> Result<()>;
    fn resume_device(&mut self, dev: u32) -> Result<()>;

    // --- Launch / event / attach ---------------------------------------------------------------

    fn get_grid_info(&mut self, dev: u32, grid_id: u64) -> Result<GridInfo>;
    fn get_next_sync_event(&mut self) -> Result<CudaEvent>;
    fn get_next_async_event(&mut self) -> Result<CudaEvent>;
    fn get_attach_state(&mut self) -> AttachState;
    fn set_attach_state(&mut self, state: AttachState);

    /// True when the device is currently scanned out to a display. Only
    /// consulted when the host enables the GPU busy check.
    fn device_is_driving_display(&mut self, _dev: u32) -> Result<bool> {
        Ok(false)
    }

    // --- Remote transport batching -------------------------------------------------------------
    //
    // A remote transport may prefetch whole-SM or whole-warp attribute sets in
    // one round trip. The mirror calls each hook at most once per SM (or warp)
    // per stop, before the first per-point read; a failure falls through to
    // per-point fetches.

    fn is_remote(&self) -> bool {
        false
    }

    fn update_grid_ids_in_sm(&mut self, _dev: u32, _sm: u32) -> Result<()> {
        Ok(())
    }

    fn update_block_idxs_in_sm(&mut self, _dev: u32, _sm: u32) -> Result<()> {
        Ok(())
    }

    fn update_thread_idxs_in_warp(&mut self, _dev: u32, _sm: u32, _wp: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim3_display_and_count() {
        let d = CuDim3::new(2, 3, 4);
        assert_eq!(d.to_string(), "(2,3,4)");
        assert_eq!(d.count(), 24);
        assert_eq!(CuDim3::default().count(), 0);
    }

    #[test]
    fn exception_names() {
        assert_eq!(CudaException::None.to_string(), "None");
        assert_eq!(
            CudaException::WarpIllegalInstruction.to_string(),
            "Warp Illegal Instruction"
        );
    }
}
