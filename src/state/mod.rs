//! Data model of the device state mirror.
//!
//! The hierarchy mirrors the hardware: system → device → SM → warp → lane.
//! Every dynamic attribute is a [`Cached`] slot filled lazily from the debug
//! API and dropped wholesale when the device resumes. Static descriptors
//! (type strings, unit counts) are latched once per session and survive
//! resume. The getter implementations live in the sibling modules
//! (`device`, `warp`, `lane`) as `Session` methods; this module only holds
//! the containers and their invalidation rules.

mod device;
mod lane;
mod warp;

use crate::api::{CuDim3, CudaException};
use crate::contexts::ContextRegistry;
use crate::utils::Cached;

// ===============================================================================================
// Lane
// ===============================================================================================

#[derive(Debug, Default, Clone)]
pub struct LaneState {
    pub(crate) thread_idx: Cached<CuDim3>,
    pub(crate) pc: Cached<u64>,
    pub(crate) virtual_pc: Cached<u64>,
    pub(crate) exception: Cached<CudaException>,
    pub(crate) timestamp: Cached<u64>,
}

impl LaneState {
    pub(crate) fn invalidate(&mut self) {
        *self = Self::default();
    }
}

// ===============================================================================================
// Warp
// ===============================================================================================

#[derive(Debug, Default, Clone)]
pub struct WarpState {
    pub(crate) grid_id: Cached<u64>,
    /// Kernel id resolved from `grid_id`; refreshed lazily, never owning.
    pub(crate) kernel_id: Cached<u64>,
    pub(crate) block_idx: Cached<CuDim3>,
    pub(crate) valid_lanes: Cached<u32>,
    pub(crate) active_lanes: Cached<u32>,
    pub(crate) timestamp: Cached<u64>,
    /// Thread indices for this warp were batch-fetched over the remote transport.
    pub(crate) thread_idxs_prefetched: bool,
    pub(crate) lanes: Vec<LaneState>,
}

impl WarpState {
    pub(crate) fn sized(num_lanes: u32) -> Self {
        Self {
            lanes: vec![LaneState::default(); num_lanes as usize],
            ..Self::default()
        }
    }

    /// Drops every cached attribute; the lane array keeps its shape.
    pub(crate) fn invalidate(&mut self) {
        self.grid_id.invalidate();
        self.kernel_id.invalidate();
        self.block_idx.invalidate();
        self.valid_lanes.invalidate();
        self.active_lanes.invalidate();
        self.timestamp.invalidate();
        self.thread_idxs_prefetched = false;
        for lane in &mut self.lanes {
            lane.invalidate();
        }
    }
}

// ===============================================================================================
// SM
// ===============================================================================================

#[derive(Debug, Default, Clone)]
pub struct SmState {
    pub(crate) valid_warps: Cached<u64>,
    pub(crate) broken_warps: Cached<u64>,
    pub(crate) grid_ids_prefetched: bool,
    pub(crate) block_idxs_prefetched: bool,
    pub(crate) warps: Vec<WarpState>,
}

impl SmState {
    pub(crate) fn sized(num_warps: u32, num_lanes: u32) -> Self {
        Self {
            warps: vec![WarpState::sized(num_lanes); num_warps as usize],
            ..Self::default()
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid_warps.invalidate();
        self.broken_warps.invalidate();
        self.grid_ids_prefetched = false;
        self.block_idxs_prefetched = false;
        for warp in &mut self.warps {
            warp.invalidate();
        }
    }

    /// Invalidates one warp. Both SM masks go absent with it: a stale mask
    /// would otherwise claim validity the warp no longer has.
    pub(crate) fn invalidate_warp(&mut self, wp: u32) {
        if let Some(warp) = self.warps.get_mut(wp as usize) {
            warp.invalidate();
        }
        self.valid_warps.invalidate();
        self.broken_warps.invalidate();
    }
}

// ===============================================================================================
// Device
// ===============================================================================================

#[derive(Debug)]
pub struct DeviceState {
    pub(crate) dev_id: u32,
    pub(crate) device_type: Cached<String>,
    pub(crate) sm_type: Cached<String>,
    pub(crate) num_sms: Cached<u32>,
    pub(crate) num_warps: Cached<u32>,
    pub(crate) num_lanes: Cached<u32>,
    pub(crate) num_registers: Cached<u32>,
    /// Coarse device validity: any warp valid.
    pub(crate) valid: Cached<bool>,
    pub(crate) suspended: bool,
    /// One-shot per suspension: lane exceptions were pre-filtered from the
    /// device exception bitmap.
    pub(crate) exception_state_filtered: bool,
    pub(crate) sms: Vec<SmState>,
    pub(crate) contexts: ContextRegistry,
}

impl DeviceState {
    pub(crate) fn new(dev_id: u32) -> Self {
        Self {
            dev_id,
            device_type: Cached::absent(),
            sm_type: Cached::absent(),
            num_sms: Cached::absent(),
            num_warps: Cached::absent(),
            num_lanes: Cached::absent(),
            num_registers: Cached::absent(),
            valid: Cached::absent(),
            suspended: false,
            exception_state_filtered: false,
            sms: Vec::new(),
            contexts: ContextRegistry::new(),
        }
    }

    /// Resume-time invalidation: the whole dynamic subtree goes absent,
    /// static descriptors stay.
    pub(crate) fn invalidate(&mut self) {
        self.valid.invalidate();
        self.exception_state_filtered = false;
        for sm in &mut self.sms {
            sm.invalidate();
        }
    }
}

// ===============================================================================================
// System
// ===============================================================================================

#[derive(Debug, Default)]
pub struct CudaSystem {
    pub(crate) num_devices: Cached<u32>,
    pub(crate) devices: Vec<DeviceState>,
    /// Bitmask of devices currently suspended.
    pub(crate) suspended_mask: u64,
}

impl CudaSystem {
    pub(crate) fn device(&self, dev: u32) -> &DeviceState {
        &self.devices[dev as usize]
    }

    pub(crate) fn device_mut(&mut self, dev: u32) -> &mut DeviceState {
        &mut self.devices[dev as usize]
    }
}
