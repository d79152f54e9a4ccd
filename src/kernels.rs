//! Process-wide registry of running kernels, keyed by (device, grid id).
//!
//! Kernel ids are handed out from a monotonically increasing counter and
//! never reused within a session. Warps refer to kernels by grid id only;
//! the registry resolves those references on demand, so no cycle exists
//! between the mirror and the registry.

use crate::api::{CuDim3, KernelOrigin, KernelType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    pub kernel_id: u64,
    pub dev_id: u32,
    pub grid_id: u64,
    pub context_id: u64,
    pub module_id: u64,
    pub grid_dim: CuDim3,
    pub block_dim: CuDim3,
    pub kind: KernelType,
    pub parent_grid_id: u64,
    pub origin: KernelOrigin,
    pub entry_pc: u64,
    /// Host thread that reported the launch; focus switches re-seat it.
    pub launch_tid: u32,
}

impl Kernel {
    /// Pre-formatted `"(gx,gy,gz)x(bx,by,bz)"` dimensions string.
    #[must_use]
    pub fn dimensions_string(&self) -> String {
        format!("{}x{}", self.grid_dim, self.block_dim)
    }
}

/// Arguments for registering a kernel (one record per launch).
#[derive(Debug, Clone, Copy)]
pub struct KernelLaunch {
    pub dev_id: u32,
    pub grid_id: u64,
    pub context_id: u64,
    pub module_id: u64,
    pub grid_dim: CuDim3,
    pub block_dim: CuDim3,
    pub kind: KernelType,
    pub parent_grid_id: u64,
    pub origin: KernelOrigin,
    pub entry_pc: u64,
    pub launch_tid: u32,
}

#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: Vec<Kernel>,
    next_id: u64,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a launch and returns the assigned kernel id.
    ///
    /// At most one kernel may be present per (device, grid id) pair.
    pub fn start_kernel(&mut self, launch: KernelLaunch) -> u64 {
        debug_assert!(
            self.find_by_grid_id(launch.dev_id, launch.grid_id).is_none(),
            "kernel already registered for dev {} grid {}",
            launch.dev_id,
            launch.grid_id
        );
        let kernel_id = self.next_id;
        self.next_id += 1;
        self.kernels.push(Kernel {
            kernel_id,
            dev_id: launch.dev_id,
            grid_id: launch.grid_id,
            context_id: launch.context_id,
            module_id: launch.module_id,
            grid_dim: launch.grid_dim,
            block_dim: launch.block_dim,
            kind: launch.kind,
            parent_grid_id: launch.parent_grid_id,
            origin: launch.origin,
            entry_pc: launch.entry_pc,
            launch_tid: launch.launch_tid,
        });
        kernel_id
    }

    /// Unregisters the kernel. Host-side display cleanup is the caller's.
    pub fn terminate_kernel(&mut self, dev_id: u32, grid_id: u64) -> Option<Kernel> {
        let pos = self
            .kernels
            .iter()
            .position(|k| k.dev_id == dev_id && k.grid_id == grid_id)?;
        Some(self.kernels.remove(pos))
    }

    pub fn find_by_grid_id(&self, dev_id: u32, grid_id: u64) -> Option<&Kernel> {
        self.kernels
            .iter()
            .find(|k| k.dev_id == dev_id && k.grid_id == grid_id)
    }

    pub fn find_by_kernel_id(&self, kernel_id: u64) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.kernel_id == kernel_id)
    }

    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
