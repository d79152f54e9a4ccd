//! Hierarchical iterators over the mirror, filtered by a coordinate mask.
//!
//! Physical kinds visit points in device → SM → warp → lane order; logical
//! kinds in kernel → block (z,y,x) → thread (z,y,x) order. The point set is
//! snapshotted when the iterator is built, so membership reflects the mirror
//! exactly as of `start` and is unaffected by later cache churn.

use crate::coords::{compare_logical, compare_physical, CoordValue, Coords};
use crate::error::Result;
use crate::session::Session;
use crate::utils::bit_set;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Devices,
    Sms,
    Warps,
    Lanes,
    Kernels,
    Blocks,
    Threads,
}

/// Whether to visit every slot the hardware has, or only valid ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    All,
    Valid,
}

/// A materialised, ordered set of coordinate points.
#[derive(Debug, Clone, Default)]
pub struct CoordIterator {
    points: Vec<Coords>,
    pos: usize,
}

impl CoordIterator {
    pub fn start(&mut self) {
        self.pos = 0;
    }

    pub fn end(&self) -> bool {
        self.pos >= self.points.len()
    }

    pub fn next(&mut self) {
        if !self.end() {
            self.pos += 1;
        }
    }

    pub fn get_current(&self) -> Option<&Coords> {
        self.points.get(self.pos)
    }

    pub fn size(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Coords] {
        &self.points
    }
}

fn has_logical_constraint(filter: &Coords) -> bool {
    filter.kernel_id.is_val()
        || filter.grid_id.is_val()
        || filter.block_idx.is_val()
        || filter.thread_idx.is_val()
}

impl Session {
    /// Builds an iterator of `kind` over every point matching `filter`.
    ///
    /// The filter must not contain `Current` cells; substitute them first.
    pub fn iterate(
        &mut self,
        kind: IteratorKind,
        filter: &Coords,
        select: Select,
    ) -> Result<CoordIterator> {
        let points = match kind {
            IteratorKind::Kernels => self.kernel_points(filter),
            IteratorKind::Devices | IteratorKind::Sms | IteratorKind::Warps | IteratorKind::Lanes => {
                let lane_depth =
                    matches!(kind, IteratorKind::Lanes) || filter.ln.is_val() || filter.thread_idx.is_val();
                let scanned = self.scan_points(filter, lane_depth, select)?;
                reduce_physical(scanned, kind)
            }
            IteratorKind::Blocks | IteratorKind::Threads => {
                let lane_depth = matches!(kind, IteratorKind::Threads);
                let scanned = self.scan_points(filter, lane_depth, Select::Valid)?;
                reduce_logical(scanned, kind)
            }
        };
        Ok(CoordIterator { points, pos: 0 })
    }

    fn kernel_points(&mut self, filter: &Coords) -> Vec<Coords> {
        let mut points: Vec<Coords> = self
            .kernels
            .kernels()
            .filter(|k| {
                filter.dev.matches(k.dev_id)
                    && filter.kernel_id.matches(k.kernel_id)
                    && filter.grid_id.matches(k.grid_id)
            })
            .map(|k| {
                let mut c = Coords::wildcard();
                c.dev = CoordValue::Val(k.dev_id);
                c.kernel_id = CoordValue::Val(k.kernel_id);
                c.grid_id = CoordValue::Val(k.grid_id);
                c
            })
            .collect();
        points.sort_by_key(|c| c.kernel_id.val());
        points
    }

    /// Walks the mirror down to warp (or lane) depth, producing one fully
    /// populated point per entity that matches `filter`.
    fn scan_points(
        &mut self,
        filter: &Coords,
        lane_depth: bool,
        select: Select,
    ) -> Result<Vec<Coords>> {
        let logical = has_logical_constraint(filter);
        let num_devices = self.system_get_num_devices()?;
        let mut out = Vec::new();

        for dev in 0..num_devices {
            if !filter.dev.matches(dev) {
                continue;
            }
            let dev_valid = self.device_is_valid(dev)?;
            if !dev_valid && (select == Select::Valid || logical) {
                continue;
            }
            if !dev_valid {
                // nothing below is readable; emit bare physical slots
                self.push_shape_points(dev, filter, lane_depth, &mut out)?;
                continue;
            }
            let num_sms = self.device_get_num_sms(dev)?;
            let num_warps = self.device_get_num_warps(dev)?;
            for sm in 0..num_sms {
                if !filter.sm.matches(sm) {
                    continue;
                }
                let valid_warps = self.sm_get_valid_warps_mask(dev, sm)?;
                for wp in 0..num_warps {
                    if !filter.wp.matches(wp) {
                        continue;
                    }
                    if !bit_set(valid_warps, wp) {
                        if select == Select::All && !logical {
                            push_bare(dev, sm, wp, lane_depth, self.device_get_num_lanes(dev)?, filter, &mut out);
                        }
                        continue;
                    }
                    let kernel_id = self.warp_get_kernel(dev, sm, wp)?;
                    let grid_id = self.warp_get_grid_id(dev, sm, wp)?;
                    let block_idx = self.warp_get_block_idx(dev, sm, wp)?;
                    if !filter.kernel_id.matches(kernel_id)
                        || !filter.grid_id.matches(grid_id)
                        || !filter.block_idx.matches(block_idx)
                    {
                        continue;
                    }

                    if !lane_depth {
                        let mut c = Coords::wildcard();
                        c.dev = CoordValue::Val(dev);
                        c.sm = CoordValue::Val(sm);
                        c.wp = CoordValue::Val(wp);
                        c.kernel_id = CoordValue::Val(kernel_id);
                        c.grid_id = CoordValue::Val(grid_id);
                        c.block_idx = CoordValue::Val(block_idx);
                        out.push(c);
                        continue;
                    }

                    let valid_lanes = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
                    let num_lanes = self.device_get_num_lanes(dev)?;
                    for ln in 0..num_lanes {
                        if !filter.ln.matches(ln) {
                            continue;
                        }
                        if !bit_set(u64::from(valid_lanes), ln) {
                            if select == Select::All && !logical {
                                let mut c = Coords::wildcard();
                                c.dev = CoordValue::Val(dev);
                                c.sm = CoordValue::Val(sm);
                                c.wp = CoordValue::Val(wp);
                                c.ln = CoordValue::Val(ln);
                                out.push(c);
                            }
                            continue;
                        }
                        let thread_idx = self.lane_get_thread_idx(dev, sm, wp, ln)?;
                        if !filter.thread_idx.matches(thread_idx) {
                            continue;
                        }
                        out.push(Coords::fully_defined(
                            dev, sm, wp, ln, kernel_id, grid_id, block_idx, thread_idx,
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    fn push_shape_points(
        &mut self,
        dev: u32,
        filter: &Coords,
        lane_depth: bool,
        out: &mut Vec<Coords>,
    ) -> Result<()> {
        let num_sms = self.device_get_num_sms(dev)?;
        let num_warps = self.device_get_num_warps(dev)?;
        let num_lanes = self.device_get_num_lanes(dev)?;
        for sm in 0..num_sms {
            if !filter.sm.matches(sm) {
                continue;
            }
            for wp in 0..num_warps {
                if !filter.wp.matches(wp) {
                    continue;
                }
                push_bare(dev, sm, wp, lane_depth, num_lanes, filter, out);
            }
        }
        Ok(())
    }
}

fn push_bare(
    dev: u32,
    sm: u32,
    wp: u32,
    lane_depth: bool,
    num_lanes: u32,
    filter: &Coords,
    out: &mut Vec<Coords>,
) {
    if !lane_depth {
        let mut c = Coords::wildcard();
        c.dev = CoordValue::Val(dev);
        c.sm = CoordValue::Val(sm);
        c.wp = CoordValue::Val(wp);
        out.push(c);
        return;
    }
    for ln in 0..num_lanes {
        if !filter.ln.matches(ln) {
            continue;
        }
        let mut c = Coords::wildcard();
        c.dev = CoordValue::Val(dev);
        c.sm = CoordValue::Val(sm);
        c.wp = CoordValue::Val(wp);
        c.ln = CoordValue::Val(ln);
        out.push(c);
    }
}

/// Projects scanned points down to the iterator kind's level, deduplicating
/// the physical-major sequence.
fn reduce_physical(points: Vec<Coords>, kind: IteratorKind) -> Vec<Coords> {
    let mut out: Vec<Coords> = Vec::with_capacity(points.len());
    for mut p in points {
        match kind {
            IteratorKind::Devices => {
                p.sm = CoordValue::Wildcard;
                p.wp = CoordValue::Wildcard;
                p.ln = CoordValue::Wildcard;
                p.kernel_id = CoordValue::Wildcard;
                p.grid_id = CoordValue::Wildcard;
                p.block_idx = CoordValue::Wildcard;
                p.thread_idx = CoordValue::Wildcard;
            }
            IteratorKind::Sms => {
                p.wp = CoordValue::Wildcard;
                p.ln = CoordValue::Wildcard;
                p.kernel_id = CoordValue::Wildcard;
                p.grid_id = CoordValue::Wildcard;
                p.block_idx = CoordValue::Wildcard;
                p.thread_idx = CoordValue::Wildcard;
            }
            IteratorKind::Warps => {
                p.ln = CoordValue::Wildcard;
                p.thread_idx = CoordValue::Wildcard;
            }
            _ => {}
        }
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Sorts scanned points logically and deduplicates blocks.
fn reduce_logical(mut points: Vec<Coords>, kind: IteratorKind) -> Vec<Coords> {
    if kind == IteratorKind::Blocks {
        for p in &mut points {
            p.ln = CoordValue::Wildcard;
            p.thread_idx = CoordValue::Wildcard;
        }
    }
    points.sort_by(|a, b| compare_logical(a, b).then_with(|| compare_physical(a, b)));
    points.dedup_by(|a, b| {
        kind == IteratorKind::Blocks && a.kernel_id == b.kernel_id && a.block_idx == b.block_idx
    });
    points
}
