//! System- and device-level mirror operations.

use crate::api::CudaException;
use crate::error::Result;
use crate::session::Session;
use crate::state::SmState;
use crate::utils::bit_set;

impl Session {
    // ===========================================================================================
    // System
    // ===========================================================================================

    pub fn system_get_num_devices(&mut self) -> Result<u32> {
        let Self { api, system, .. } = self;
        system.num_devices.get_or_fetch(|| api.get_num_devices())
    }

    /// Bitmask of devices currently suspended.
    pub fn system_get_suspended_devices_mask(&self) -> u64 {
        self.system.suspended_mask
    }

    // ===========================================================================================
    // Static Descriptors
    // ===========================================================================================

    pub fn device_get_num_sms(&mut self, dev: u32) -> Result<u32> {
        let Self { api, system, .. } = self;
        system.device_mut(dev).num_sms.get_or_fetch(|| api.get_num_sms(dev))
    }

    pub fn device_get_num_warps(&mut self, dev: u32) -> Result<u32> {
        let Self { api, system, .. } = self;
        system.device_mut(dev).num_warps.get_or_fetch(|| api.get_num_warps(dev))
    }

    pub fn device_get_num_lanes(&mut self, dev: u32) -> Result<u32> {
        let Self { api, system, .. } = self;
        system.device_mut(dev).num_lanes.get_or_fetch(|| api.get_num_lanes(dev))
    }

    pub fn device_get_num_registers(&mut self, dev: u32) -> Result<u32> {
        let Self { api, system, .. } = self;
        system
            .device_mut(dev)
            .num_registers
            .get_or_fetch(|| api.get_num_registers(dev))
    }

    pub fn device_get_device_type(&mut self, dev: u32) -> Result<String> {
        let Self { api, system, .. } = self;
        system
            .device_mut(dev)
            .device_type
            .get_or_fetch(|| api.get_device_type(dev))
    }

    pub fn device_get_sm_type(&mut self, dev: u32) -> Result<String> {
        let Self { api, system, .. } = self;
        system.device_mut(dev).sm_type.get_or_fetch(|| api.get_sm_type(dev))
    }

    /// Sizes the SM/warp/lane arrays from the device descriptors. Shape is
    /// established once and survives resume invalidation.
    pub(crate) fn device_ensure_shape(&mut self, dev: u32) -> Result<()> {
        if !self.system.device(dev).sms.is_empty() {
            return Ok(());
        }
        let num_sms = self.device_get_num_sms(dev)?;
        let num_warps = self.device_get_num_warps(dev)?;
        let num_lanes = self.device_get_num_lanes(dev)?;
        let d = self.system.device_mut(dev);
        d.sms = vec![SmState::sized(num_warps, num_lanes); num_sms as usize];
        Ok(())
    }

    // ===========================================================================================
    // Dynamic State
    // ===========================================================================================

    /// True iff any warp on the device is valid. A device with no GPU
    /// context cannot be running anything and is reported invalid without
    /// touching the port.
    pub fn device_is_valid(&mut self, dev: u32) -> Result<bool> {
        if let Some(v) = self.system.device(dev).valid.get() {
            return Ok(v);
        }
        if self.system.device(dev).contexts.is_empty() {
            return Ok(false);
        }
        self.device_ensure_shape(dev)?;
        let num_sms = self.device_get_num_sms(dev)?;
        let mut valid = false;
        for sm in 0..num_sms {
            if self.sm_get_valid_warps_mask(dev, sm)? != 0 {
                valid = true;
                break;
            }
        }
        Ok(self.system.device_mut(dev).valid.latch(valid))
    }

    /// Recomputed on demand from warp validity; deliberately not cached.
    pub fn device_get_active_sms_mask(&mut self, dev: u32) -> Result<u64> {
        self.device_ensure_shape(dev)?;
        let num_sms = self.device_get_num_sms(dev)?;
        let mut mask = 0u64;
        for sm in 0..num_sms {
            if self.sm_get_valid_warps_mask(dev, sm)? != 0 {
                mask |= 1 << sm;
            }
        }
        Ok(mask)
    }

    // ===========================================================================================
    // Suspend / Resume
    // ===========================================================================================

    /// Suspends the device so its state can be read. No-op on a device
    /// without any GPU context.
    pub fn device_suspend(&mut self, dev: u32) -> Result<()> {
        if self.system.device(dev).contexts.is_empty() {
            return Ok(());
        }
        self.api.suspend_device(dev)?;
        self.system.device_mut(dev).suspended = true;
        self.system.suspended_mask |= 1 << dev;
        tracing::trace!(target: "cudbg::state", dev, "device suspended");
        Ok(())
    }

    /// Resumes the device. Every cached attribute below the device goes
    /// absent first; the next read after the next stop refetches.
    pub fn device_resume(&mut self, dev: u32) -> Result<()> {
        if !self.system.device(dev).suspended {
            return Ok(());
        }
        self.system.device_mut(dev).invalidate();
        self.api.resume_device(dev)?;
        self.system.device_mut(dev).suspended = false;
        self.system.suspended_mask &= !(1u64 << dev);
        tracing::trace!(target: "cudbg::state", dev, "device resumed");
        Ok(())
    }

    // ===========================================================================================
    // Exception Pre-Filtering
    // ===========================================================================================

    /// One-shot per suspension: reads the device's per-SM exception bitmap
    /// and latches `exception = None` for every lane of every SM outside it,
    /// so those lanes never pay a per-lane exception read.
    pub fn device_filter_exception_state(&mut self, dev: u32) -> Result<()> {
        if self.system.device(dev).exception_state_filtered {
            return Ok(());
        }
        self.device_ensure_shape(dev)?;
        let num_sms = self.device_get_num_sms(dev)?;
        let bitmap = self.api.read_device_exception_state(dev)?;
        let d = self.system.device_mut(dev);
        for sm in 0..num_sms {
            if bit_set(bitmap, sm) {
                continue;
            }
            for warp in &mut d.sms[sm as usize].warps {
                for lane in &mut warp.lanes {
                    lane.exception.latch(CudaException::None);
                }
            }
        }
        d.exception_state_filtered = true;
        Ok(())
    }
}
