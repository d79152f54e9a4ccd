//! SM- and warp-level mirror operations.

use crate::api::CuDim3;
use crate::error::{Error, Result};
use crate::kernels::KernelLaunch;
use crate::session::Session;
use crate::utils::{bit_set, lowest_set_bit};

impl Session {
    // ===========================================================================================
    // SM Masks
    // ===========================================================================================

    pub fn sm_get_valid_warps_mask(&mut self, dev: u32, sm: u32) -> Result<u64> {
        self.device_ensure_shape(dev)?;
        let Self { api, system, .. } = self;
        system.device_mut(dev).sms[sm as usize]
            .valid_warps
            .get_or_fetch(|| api.read_valid_warps(dev, sm))
    }

    pub fn sm_get_broken_warps_mask(&mut self, dev: u32, sm: u32) -> Result<u64> {
        let valid = self.sm_get_valid_warps_mask(dev, sm)?;
        let Self { api, system, .. } = self;
        let broken = system.device_mut(dev).sms[sm as usize]
            .broken_warps
            .get_or_fetch(|| api.read_broken_warps(dev, sm))?;
        debug_assert_eq!(broken & !valid, 0, "broken warp outside the valid mask");
        Ok(broken)
    }

    pub fn warp_is_valid(&mut self, dev: u32, sm: u32, wp: u32) -> Result<bool> {
        Ok(bit_set(self.sm_get_valid_warps_mask(dev, sm)?, wp))
    }

    pub fn warp_is_broken(&mut self, dev: u32, sm: u32, wp: u32) -> Result<bool> {
        Ok(bit_set(self.sm_get_broken_warps_mask(dev, sm)?, wp))
    }

    fn warp_check_valid(&mut self, dev: u32, sm: u32, wp: u32) -> Result<()> {
        if cfg!(debug_assertions) {
            assert!(
                self.warp_is_valid(dev, sm, wp)?,
                "warp getter on invalid warp ({dev},{sm},{wp})"
            );
        }
        Ok(())
    }

    // ===========================================================================================
    // Remote Batching
    // ===========================================================================================

    fn sm_prefetch_grid_ids(&mut self, dev: u32, sm: u32) -> Result<()> {
        if !self.api.is_remote() {
            return Ok(());
        }
        self.device_ensure_shape(dev)?;
        if self.system.device(dev).sms[sm as usize].grid_ids_prefetched {
            return Ok(());
        }
        if self.sm_get_valid_warps_mask(dev, sm)? == 0 {
            return Ok(());
        }
        self.system.device_mut(dev).sms[sm as usize].grid_ids_prefetched = true;
        if let Err(e) = self.api.update_grid_ids_in_sm(dev, sm) {
            tracing::trace!(target: "cudbg::state", dev, sm, error = %e, "bulk grid-id fetch failed; per-warp reads");
        }
        Ok(())
    }

    fn sm_prefetch_block_idxs(&mut self, dev: u32, sm: u32) -> Result<()> {
        if !self.api.is_remote() {
            return Ok(());
        }
        self.device_ensure_shape(dev)?;
        if self.system.device(dev).sms[sm as usize].block_idxs_prefetched {
            return Ok(());
        }
        if self.sm_get_valid_warps_mask(dev, sm)? == 0 {
            return Ok(());
        }
        self.system.device_mut(dev).sms[sm as usize].block_idxs_prefetched = true;
        if let Err(e) = self.api.update_block_idxs_in_sm(dev, sm) {
            tracing::trace!(target: "cudbg::state", dev, sm, error = %e, "bulk block-idx fetch failed; per-warp reads");
        }
        Ok(())
    }

    // ===========================================================================================
    // Warp Attributes
    // ===========================================================================================

    pub fn warp_get_grid_id(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        self.device_ensure_shape(dev)?;
        self.warp_check_valid(dev, sm, wp)?;
        self.sm_prefetch_grid_ids(dev, sm)?;
        let Self { api, system, .. } = self;
        system.device_mut(dev).sms[sm as usize].warps[wp as usize]
            .grid_id
            .get_or_fetch(|| api.read_grid_id(dev, sm, wp))
    }

    pub fn warp_get_block_idx(&mut self, dev: u32, sm: u32, wp: u32) -> Result<CuDim3> {
        self.device_ensure_shape(dev)?;
        self.warp_check_valid(dev, sm, wp)?;
        self.sm_prefetch_block_idxs(dev, sm)?;
        let Self { api, system, .. } = self;
        system.device_mut(dev).sms[sm as usize].warps[wp as usize]
            .block_idx
            .get_or_fetch(|| api.read_block_idx(dev, sm, wp))
    }

    /// Resolves the warp's kernel (by id). When launch notifications are
    /// deferred and no kernel is registered for the warp's grid yet, the
    /// record is synthesised from `get_grid_info` first; callers must be
    /// prepared for the kernel registry to mutate during this read.
    pub fn warp_get_kernel(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        let grid_id = self.warp_get_grid_id(dev, sm, wp)?;
        if let Some(k) = self.system.device(dev).sms[sm as usize].warps[wp as usize]
            .kernel_id
            .get()
        {
            return Ok(k);
        }
        if self.kernels.find_by_grid_id(dev, grid_id).is_none()
            && self.options.defer_kernel_launch_notifications
        {
            let info = self.api.get_grid_info(dev, grid_id)?;
            self.kernels.start_kernel(KernelLaunch {
                dev_id: dev,
                grid_id,
                context_id: info.context_id,
                module_id: info.module_id,
                grid_dim: info.grid_dim,
                block_dim: info.block_dim,
                kind: info.kind,
                parent_grid_id: info.parent_grid_id,
                origin: info.origin,
                entry_pc: info.entry_pc,
                launch_tid: info.tid,
            });
        }
        let kernel_id = self
            .kernels
            .find_by_grid_id(dev, grid_id)
            .ok_or_else(|| Error::Api(format!("no kernel registered for device {dev} grid {grid_id}")))?
            .kernel_id;
        self.system.device_mut(dev).sms[sm as usize].warps[wp as usize]
            .kernel_id
            .latch(kernel_id);
        Ok(kernel_id)
    }

    /// The warp's stop timestamp is latched on the first valid-lanes read.
    pub fn warp_get_valid_lanes_mask(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        self.device_ensure_shape(dev)?;
        self.warp_check_valid(dev, sm, wp)?;
        let clock = self.clock;
        let Self { api, system, .. } = self;
        let warp = &mut system.device_mut(dev).sms[sm as usize].warps[wp as usize];
        let mask = warp.valid_lanes.get_or_fetch(|| api.read_valid_lanes(dev, sm, wp))?;
        if !warp.timestamp.is_present() {
            warp.timestamp.latch(clock);
        }
        Ok(mask)
    }

    pub fn warp_get_active_lanes_mask(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        let valid = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        let Self { api, system, .. } = self;
        let active = system.device_mut(dev).sms[sm as usize].warps[wp as usize]
            .active_lanes
            .get_or_fetch(|| api.read_active_lanes(dev, sm, wp))?;
        debug_assert_eq!(active & !valid, 0, "active lane outside the valid mask");
        Ok(active)
    }

    /// Valid but predicated-off lanes.
    pub fn warp_get_divergent_lanes_mask(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        let valid = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        Ok(valid & !active)
    }

    pub fn warp_get_lowest_active_lane(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        lowest_set_bit(u64::from(active))
            .ok_or_else(|| Error::Api(format!("warp ({dev},{sm},{wp}) has no active lanes")))
    }

    pub fn warp_get_active_pc(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        let ln = self.warp_get_lowest_active_lane(dev, sm, wp)?;
        self.lane_get_pc(dev, sm, wp, ln)
    }

    pub fn warp_get_active_virtual_pc(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        let ln = self.warp_get_lowest_active_lane(dev, sm, wp)?;
        self.lane_get_virtual_pc(dev, sm, wp, ln)
    }

    pub fn warp_get_timestamp(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        Ok(self.system.device(dev).sms[sm as usize].warps[wp as usize]
            .timestamp
            .get()
            .unwrap_or_default())
    }

    // ===========================================================================================
    // Single Step
    // ===========================================================================================

    /// Single-steps one warp and invalidates exactly what moved.
    ///
    /// Under software preemption the hardware may migrate warps, so the whole
    /// device is invalidated. Likewise when the hardware reports that warps
    /// other than the requested one stepped. Otherwise only the stepped warps
    /// and the containing SM's masks are dropped.
    pub fn warp_single_step(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        self.device_ensure_shape(dev)?;
        let stepped = self.api.single_step_warp(dev, sm, wp)?;
        if self.options.software_preemption {
            self.system.device_mut(dev).invalidate();
        } else if stepped & !(1u64 << wp) != 0 {
            tracing::warn!(
                target: "cudbg::state",
                dev, sm, wp, stepped,
                "single step moved other warps; invalidating the whole device"
            );
            self.system.device_mut(dev).invalidate();
        } else {
            let smst = &mut self.system.device_mut(dev).sms[sm as usize];
            for w in 0..u64::BITS {
                if bit_set(stepped, w) {
                    smst.invalidate_warp(w);
                }
            }
        }
        Ok(stepped)
    }

    // ===========================================================================================
    // Kernel Aggregation
    // ===========================================================================================

    /// Mask of SMs running at least one warp of the kernel.
    pub fn kernel_compute_sms_mask(&mut self, kernel_id: u64) -> Result<u64> {
        let Some(k) = self.kernels.find_by_kernel_id(kernel_id) else {
            return Ok(0);
        };
        let (dev, grid_id) = (k.dev_id, k.grid_id);
        let num_sms = self.device_get_num_sms(dev)?;
        let mut mask = 0u64;
        for sm in 0..num_sms {
            let valid = self.sm_get_valid_warps_mask(dev, sm)?;
            for wp in 0..u64::BITS {
                if bit_set(valid, wp) && self.warp_get_grid_id(dev, sm, wp)? == grid_id {
                    mask |= 1 << sm;
                    break;
                }
            }
        }
        Ok(mask)
    }
}
