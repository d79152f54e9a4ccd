//! The coordinate algebra shared by filters, iterators, and focus switching.
//!
//! A coordinate is an 8-tuple: four physical cells (device, SM, warp, lane)
//! and four logical cells (kernel id, grid id, block index, thread index).
//! Each cell is either a concrete value, a wildcard, "current" (to be
//! substituted from the focus), or invalid. Block and thread indices are
//! 3-vectors treated atomically: the grammar only ever produces whole
//! triples, and substitution never mixes components from two sources.

pub mod parser;

use crate::api::CuDim3;
use bitflags::bitflags;
use std::cmp::Ordering;
use std::fmt;

// ===============================================================================================
// Cells
// ===============================================================================================

/// One cell of a coordinate tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordValue<T> {
    Val(T),
    Wildcard,
    Current,
    Invalid,
}

impl<T: Copy + PartialEq> CoordValue<T> {
    pub fn val(&self) -> Option<T> {
        match self {
            Self::Val(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_val(&self) -> bool {
        matches!(self, Self::Val(_))
    }

    /// True when this cell does not constrain `concrete`.
    ///
    /// `Current` never matches: it must have been substituted away before a
    /// coordinate is compared against real points.
    pub fn matches(&self, concrete: T) -> bool {
        match self {
            Self::Val(v) => *v == concrete,
            Self::Wildcard => true,
            Self::Current | Self::Invalid => false,
        }
    }
}

fn cmp_cell<T: Copy + Ord>(a: &CoordValue<T>, b: &CoordValue<T>) -> Ordering {
    fn rank<T>(c: &CoordValue<T>) -> u8 {
        match c {
            CoordValue::Val(_) => 0,
            CoordValue::Wildcard => 1,
            CoordValue::Current => 2,
            CoordValue::Invalid => 3,
        }
    }
    match (a, b) {
        (CoordValue::Val(x), CoordValue::Val(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

bitflags! {
    /// Requirements for `Coords::check_fully_defined`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequireFlags: u8 {
        /// The physical cells (dev, sm, warp, lane) must be concrete.
        const PHYSICAL = 1 << 0;
        /// The logical cells (kernel, grid, block, thread) must be concrete.
        const LOGICAL = 1 << 1;
        /// Tolerate wildcards in required cells; "current" still fails.
        const ALLOW_PARTIAL = 1 << 2;
    }
}

// ===============================================================================================
// Coordinates
// ===============================================================================================

/// A full coordinate tuple plus an overall usability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coords {
    pub valid: bool,
    pub dev: CoordValue<u32>,
    pub sm: CoordValue<u32>,
    pub wp: CoordValue<u32>,
    pub ln: CoordValue<u32>,
    pub kernel_id: CoordValue<u64>,
    pub grid_id: CoordValue<u64>,
    pub block_idx: CoordValue<CuDim3>,
    pub thread_idx: CoordValue<CuDim3>,
}

impl Coords {
    pub const fn wildcard() -> Self {
        Self {
            valid: true,
            dev: CoordValue::Wildcard,
            sm: CoordValue::Wildcard,
            wp: CoordValue::Wildcard,
            ln: CoordValue::Wildcard,
            kernel_id: CoordValue::Wildcard,
            grid_id: CoordValue::Wildcard,
            block_idx: CoordValue::Wildcard,
            thread_idx: CoordValue::Wildcard,
        }
    }

    pub const fn invalid() -> Self {
        Self {
            valid: false,
            dev: CoordValue::Invalid,
            sm: CoordValue::Invalid,
            wp: CoordValue::Invalid,
            ln: CoordValue::Invalid,
            kernel_id: CoordValue::Invalid,
            grid_id: CoordValue::Invalid,
            block_idx: CoordValue::Invalid,
            thread_idx: CoordValue::Invalid,
        }
    }

    /// Every cell deferred to the focus.
    pub const fn current() -> Self {
        Self {
            valid: true,
            dev: CoordValue::Current,
            sm: CoordValue::Current,
            wp: CoordValue::Current,
            ln: CoordValue::Current,
            kernel_id: CoordValue::Current,
            grid_id: CoordValue::Current,
            block_idx: CoordValue::Current,
            thread_idx: CoordValue::Current,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub const fn fully_defined(
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
        kernel_id: u64,
        grid_id: u64,
        block_idx: CuDim3,
        thread_idx: CuDim3,
    ) -> Self {
        Self {
            valid: true,
            dev: CoordValue::Val(dev),
            sm: CoordValue::Val(sm),
            wp: CoordValue::Val(wp),
            ln: CoordValue::Val(ln),
            kernel_id: CoordValue::Val(kernel_id),
            grid_id: CoordValue::Val(grid_id),
            block_idx: CoordValue::Val(block_idx),
            thread_idx: CoordValue::Val(thread_idx),
        }
    }

    /// Substitutes every `Current` cell from `focus`.
    ///
    /// Cells on the dominant axis take the focus value; cells on the other
    /// axis relax to `Wildcard`, since pinning them would over-constrain the
    /// resolution that follows. With no focus at all every `Current` becomes
    /// `Wildcard`.
    #[must_use]
    pub fn evaluate_current(&self, focus: Option<&Coords>, physical_dominates: bool) -> Self {
        fn subst<T: Copy + PartialEq>(
            cell: CoordValue<T>,
            focus_cell: Option<CoordValue<T>>,
            dominant: bool,
        ) -> CoordValue<T> {
            if cell != CoordValue::Current {
                return cell;
            }
            match focus_cell {
                Some(f) if dominant && f.is_val() => f,
                _ => CoordValue::Wildcard,
            }
        }

        Self {
            valid: self.valid,
            dev: subst(self.dev, focus.map(|f| f.dev), physical_dominates),
            sm: subst(self.sm, focus.map(|f| f.sm), physical_dominates),
            wp: subst(self.wp, focus.map(|f| f.wp), physical_dominates),
            ln: subst(self.ln, focus.map(|f| f.ln), physical_dominates),
            kernel_id: subst(self.kernel_id, focus.map(|f| f.kernel_id), !physical_dominates),
            grid_id: subst(self.grid_id, focus.map(|f| f.grid_id), !physical_dominates),
            block_idx: subst(self.block_idx, focus.map(|f| f.block_idx), !physical_dominates),
            thread_idx: subst(self.thread_idx, focus.map(|f| f.thread_idx), !physical_dominates),
        }
    }

    /// True when every cell the caller requires is concrete.
    #[must_use]
    pub fn check_fully_defined(&self, flags: RequireFlags) -> bool {
        fn ok<T: Copy + PartialEq>(cell: &CoordValue<T>, partial: bool) -> bool {
            match cell {
                CoordValue::Val(_) => true,
                CoordValue::Wildcard => partial,
                CoordValue::Current | CoordValue::Invalid => false,
            }
        }

        if !self.valid {
            return false;
        }
        let partial = flags.contains(RequireFlags::ALLOW_PARTIAL);
        if flags.contains(RequireFlags::PHYSICAL)
            && !(ok(&self.dev, partial)
                && ok(&self.sm, partial)
                && ok(&self.wp, partial)
                && ok(&self.ln, partial))
        {
            return false;
        }
        if flags.contains(RequireFlags::LOGICAL)
            && !(ok(&self.kernel_id, partial)
                && ok(&self.grid_id, partial)
                && ok(&self.block_idx, partial)
                && ok(&self.thread_idx, partial))
        {
            return false;
        }
        true
    }

    /// True when every concrete cell of `self` is honoured by `point`.
    ///
    /// Wildcard cells of `self` never constrain; a `Current` or `Invalid`
    /// cell matches nothing (requests are substituted before matching).
    #[must_use]
    pub fn matches_point(&self, point: &Coords) -> bool {
        fn m<T: Copy + PartialEq>(cell: &CoordValue<T>, point_cell: &CoordValue<T>) -> bool {
            match (cell, point_cell) {
                (CoordValue::Val(a), CoordValue::Val(b)) => a == b,
                (CoordValue::Val(_), _) => false,
                (CoordValue::Wildcard, _) => true,
                (CoordValue::Current | CoordValue::Invalid, _) => false,
            }
        }
        m(&self.dev, &point.dev)
            && m(&self.sm, &point.sm)
            && m(&self.wp, &point.wp)
            && m(&self.ln, &point.ln)
            && m(&self.kernel_id, &point.kernel_id)
            && m(&self.grid_id, &point.grid_id)
            && m(&self.block_idx, &point.block_idx)
            && m(&self.thread_idx, &point.thread_idx)
    }
}

// ===============================================================================================
// Ordering & Successors
// ===============================================================================================

/// Total order over the logical cells, in the display/iteration sequence
/// (kernel, block.z, block.y, block.x, thread.z, thread.y, thread.x).
#[must_use]
pub fn compare_logical(a: &Coords, b: &Coords) -> Ordering {
    fn dim_key(c: &CoordValue<CuDim3>) -> [CoordValue<u32>; 3] {
        match c {
            CoordValue::Val(d) => [
                CoordValue::Val(d.z),
                CoordValue::Val(d.y),
                CoordValue::Val(d.x),
            ],
            CoordValue::Wildcard => [CoordValue::Wildcard; 3],
            CoordValue::Current => [CoordValue::Current; 3],
            CoordValue::Invalid => [CoordValue::Invalid; 3],
        }
    }

    let ab = dim_key(&a.block_idx);
    let bb = dim_key(&b.block_idx);
    let at = dim_key(&a.thread_idx);
    let bt = dim_key(&b.thread_idx);

    cmp_cell(&a.kernel_id, &b.kernel_id)
        .then_with(|| ab.iter().zip(&bb).map(|(x, y)| cmp_cell(x, y)).find(|o| o.is_ne()).unwrap_or(Ordering::Equal))
        .then_with(|| at.iter().zip(&bt).map(|(x, y)| cmp_cell(x, y)).find(|o| o.is_ne()).unwrap_or(Ordering::Equal))
}

/// Physical order: (dev, sm, warp, lane).
#[must_use]
pub fn compare_physical(a: &Coords, b: &Coords) -> Ordering {
    cmp_cell(&a.dev, &b.dev)
        .then_with(|| cmp_cell(&a.sm, &b.sm))
        .then_with(|| cmp_cell(&a.wp, &b.wp))
        .then_with(|| cmp_cell(&a.ln, &b.ln))
}

/// Row-major successor of `d` inside `bounds` (x fastest). `None` past the end.
#[must_use]
pub fn dim3_successor(d: CuDim3, bounds: CuDim3) -> Option<CuDim3> {
    let mut n = d;
    n.x += 1;
    if n.x >= bounds.x {
        n.x = 0;
        n.y += 1;
        if n.y >= bounds.y {
            n.y = 0;
            n.z += 1;
            if n.z >= bounds.z {
                return None;
            }
        }
    }
    Some(n)
}

impl Coords {
    /// Advances the block index to its successor in `grid_dim`, resetting the
    /// thread index. Returns false at the end of the grid.
    pub fn increment_block(&mut self, grid_dim: CuDim3) -> bool {
        let Some(block) = self.block_idx.val() else {
            return false;
        };
        match dim3_successor(block, grid_dim) {
            Some(next) => {
                self.block_idx = CoordValue::Val(next);
                self.thread_idx = CoordValue::Val(CuDim3::default());
                true
            }
            None => false,
        }
    }

    /// Advances the thread index to its successor, wrapping into the next
    /// block. Returns false past the last thread of the last block.
    pub fn increment_thread(&mut self, grid_dim: CuDim3, block_dim: CuDim3) -> bool {
        let Some(thread) = self.thread_idx.val() else {
            return false;
        };
        match dim3_successor(thread, block_dim) {
            Some(next) => {
                self.thread_idx = CoordValue::Val(next);
                true
            }
            None => self.increment_block(grid_dim),
        }
    }
}

// ===============================================================================================
// Distances (nearest-match resolution)
// ===============================================================================================

impl Coords {
    /// Componentwise distance of `point`'s physical cells from this request,
    /// compared lexicographically. Non-concrete request cells contribute 0.
    #[must_use]
    pub fn physical_distance(&self, point: &Coords) -> [u64; 4] {
        fn d(cell: &CoordValue<u32>, point_cell: &CoordValue<u32>) -> u64 {
            match (cell.val(), point_cell.val()) {
                (Some(a), Some(b)) => u64::from(a.abs_diff(b)),
                _ => 0,
            }
        }
        [
            d(&self.dev, &point.dev),
            d(&self.sm, &point.sm),
            d(&self.wp, &point.wp),
            d(&self.ln, &point.ln),
        ]
    }

    /// Logical counterpart over (kernel, block.z..x, thread.z..x).
    #[must_use]
    pub fn logical_distance(&self, point: &Coords) -> [u64; 7] {
        fn d64(cell: &CoordValue<u64>, point_cell: &CoordValue<u64>) -> u64 {
            match (cell.val(), point_cell.val()) {
                (Some(a), Some(b)) => a.abs_diff(b),
                _ => 0,
            }
        }
        fn dim(cell: &CoordValue<CuDim3>, point_cell: &CoordValue<CuDim3>) -> [u64; 3] {
            match (cell.val(), point_cell.val()) {
                (Some(a), Some(b)) => [
                    u64::from(a.z.abs_diff(b.z)),
                    u64::from(a.y.abs_diff(b.y)),
                    u64::from(a.x.abs_diff(b.x)),
                ],
                _ => [0; 3],
            }
        }
        let b = dim(&self.block_idx, &point.block_idx);
        let t = dim(&self.thread_idx, &point.thread_idx);
        [
            d64(&self.kernel_id, &point.kernel_id),
            b[0], b[1], b[2], t[0], t[1], t[2],
        ]
    }
}

// ===============================================================================================
// Candidates
// ===============================================================================================

/// Slot kinds filled by the nearest-match resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    ExactPhysical = 0,
    ExactLogical = 1,
    ClosestPhysical = 2,
    ClosestLogical = 3,
}

pub const CK_MAX: usize = 4;

/// One slot per `CandidateKind`, as filled by `Session::find_valid_coords`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateSet {
    slots: [Option<Coords>; CK_MAX],
}

impl CandidateSet {
    pub fn get(&self, kind: CandidateKind) -> Option<&Coords> {
        self.slots[kind as usize].as_ref()
    }

    pub fn set(&mut self, kind: CandidateKind, coords: Coords) {
        self.slots[kind as usize] = Some(coords);
    }
}

// ===============================================================================================
// Display
// ===============================================================================================

impl fmt::Display for Coords {
    /// The long-form focus string: concrete cells only, logical first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        let mut put = |f: &mut fmt::Formatter<'_>, part: String| -> fmt::Result {
            write!(f, "{sep}{part}")?;
            sep = ", ";
            Ok(())
        };

        if !self.valid {
            return f.write_str("invalid coordinates");
        }
        if let Some(v) = self.kernel_id.val() {
            put(f, format!("kernel {v}"))?;
        }
        if let Some(v) = self.grid_id.val() {
            put(f, format!("grid {v}"))?;
        }
        if let Some(v) = self.block_idx.val() {
            put(f, format!("block {v}"))?;
        }
        if let Some(v) = self.thread_idx.val() {
            put(f, format!("thread {v}"))?;
        }
        if let Some(v) = self.dev.val() {
            put(f, format!("device {v}"))?;
        }
        if let Some(v) = self.sm.val() {
            put(f, format!("sm {v}"))?;
        }
        if let Some(v) = self.wp.val() {
            put(f, format!("warp {v}"))?;
        }
        if let Some(v) = self.ln.val() {
            put(f, format!("lane {v}"))?;
        }
        Ok(())
    }
}
