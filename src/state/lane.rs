//! Lane-level mirror operations.
//!
//! PC, virtual PC, thread index, exception, and the stop timestamp are
//! cached per lane. Registers, call depths, return addresses, and memcheck
//! error reports are read through to the port on every call; the host
//! regcache above this layer already de-duplicates register traffic.

use crate::api::{CuDim3, CudaException, MemorySegment};
use crate::error::Result;
use crate::session::Session;
use crate::utils::bit_set;

impl Session {
    // ===========================================================================================
    // Validity
    // ===========================================================================================

    /// The lane's stop timestamp is latched on the first validity check.
    pub fn lane_is_valid(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<bool> {
        let mask = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        let clock = self.clock;
        let lane = &mut self.system.device_mut(dev).sms[sm as usize].warps[wp as usize].lanes
            [ln as usize];
        if !lane.timestamp.is_present() {
            lane.timestamp.latch(clock);
        }
        Ok(bit_set(u64::from(mask), ln))
    }

    pub fn lane_is_active(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<bool> {
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        Ok(bit_set(u64::from(active), ln))
    }

    pub fn lane_is_divergent(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<bool> {
        let divergent = self.warp_get_divergent_lanes_mask(dev, sm, wp)?;
        Ok(bit_set(u64::from(divergent), ln))
    }

    /// Sizes the subtree and asserts the lane is usable before a read.
    fn lane_check_valid(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<()> {
        let mask = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        debug_assert!(
            bit_set(u64::from(mask), ln),
            "lane getter on invalid lane ({dev},{sm},{wp},{ln})"
        );
        Ok(())
    }

    // ===========================================================================================
    // Cached Attributes
    // ===========================================================================================

    pub fn lane_get_thread_idx(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<CuDim3> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        self.warp_prefetch_thread_idxs(dev, sm, wp)?;
        let Self { api, system, .. } = self;
        system.device_mut(dev).sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .thread_idx
            .get_or_fetch(|| api.read_thread_idx(dev, sm, wp, ln))
    }

    fn warp_prefetch_thread_idxs(&mut self, dev: u32, sm: u32, wp: u32) -> Result<()> {
        if !self.api.is_remote() {
            return Ok(());
        }
        let warp = &mut self.system.device_mut(dev).sms[sm as usize].warps[wp as usize];
        if warp.thread_idxs_prefetched {
            return Ok(());
        }
        warp.thread_idxs_prefetched = true;
        if let Err(e) = self.api.update_thread_idxs_in_warp(dev, sm, wp) {
            tracing::trace!(target: "cudbg::state", dev, sm, wp, error = %e, "bulk thread-idx fetch failed; per-lane reads");
        }
        Ok(())
    }

    /// One port read serves every active lane of the warp: active lanes move
    /// in lock-step, so the fetched PC is propagated into each of their
    /// cache slots. Divergent lanes keep their own PCs.
    pub fn lane_get_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        if let Some(pc) = self.system.device(dev).sms[sm as usize].warps[wp as usize].lanes
            [ln as usize]
            .pc
            .get()
        {
            return Ok(pc);
        }
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        let pc = self.api.read_pc(dev, sm, wp, ln)?;
        let warp = &mut self.system.device_mut(dev).sms[sm as usize].warps[wp as usize];
        if bit_set(u64::from(active), ln) {
            for l in 0..warp.lanes.len() {
                if bit_set(u64::from(active), l as u32) {
                    warp.lanes[l].pc.latch(pc);
                }
            }
        } else {
            warp.lanes[ln as usize].pc.latch(pc);
        }
        Ok(pc)
    }

    /// Same propagation rule as [`Session::lane_get_pc`].
    pub fn lane_get_virtual_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        if let Some(pc) = self.system.device(dev).sms[sm as usize].warps[wp as usize].lanes
            [ln as usize]
            .virtual_pc
            .get()
        {
            return Ok(pc);
        }
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        let vpc = self.api.read_virtual_pc(dev, sm, wp, ln)?;
        let warp = &mut self.system.device_mut(dev).sms[sm as usize].warps[wp as usize];
        if bit_set(u64::from(active), ln) {
            for l in 0..warp.lanes.len() {
                if bit_set(u64::from(active), l as u32) {
                    warp.lanes[l].virtual_pc.latch(vpc);
                }
            }
        } else {
            warp.lanes[ln as usize].virtual_pc.latch(vpc);
        }
        Ok(vpc)
    }

    pub fn lane_get_exception(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<CudaException> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        let Self { api, system, .. } = self;
        system.device_mut(dev).sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .exception
            .get_or_fetch(|| api.read_lane_exception(dev, sm, wp, ln))
    }

    pub fn lane_get_timestamp(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64> {
        self.lane_is_valid(dev, sm, wp, ln)?;
        Ok(self.system.device(dev).sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .timestamp
            .get()
            .unwrap_or_default())
    }

    // ===========================================================================================
    // Read-Through Attributes
    // ===========================================================================================

    pub fn lane_get_register(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
        regno: u32,
    ) -> Result<u32> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        self.api.read_register(dev, sm, wp, ln, regno)
    }

    pub fn lane_get_call_depth(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u32> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        self.api.read_call_depth(dev, sm, wp, ln)
    }

    pub fn lane_get_syscall_call_depth(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u32> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        self.api.read_syscall_call_depth(dev, sm, wp, ln)
    }

    pub fn lane_get_virtual_return_address(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
    ) -> Result<u64> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        self.api.read_virtual_return_address(dev, sm, wp, ln)
    }

    pub fn lane_get_memcheck_error_address(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
    ) -> Result<u64> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        Ok(self.api.memcheck_read_error_address(dev, sm, wp, ln)?.0)
    }

    pub fn lane_get_memcheck_error_address_segment(
        &mut self,
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
    ) -> Result<MemorySegment> {
        self.lane_check_valid(dev, sm, wp, ln)?;
        Ok(self.api.memcheck_read_error_address(dev, sm, wp, ln)?.1)
    }
}
