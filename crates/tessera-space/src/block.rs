//! Regular n-d block decomposition.

use smallvec::SmallVec;
use tessera_core::{GridError, Pid, Point, Rect, Topology};

/// A rectangular world split into a grid of near-equal blocks.
///
/// Axis `d` of the world is cut into `grid[d]` contiguous chunks. When the
/// extent does not divide evenly the leading chunks take one extra cell,
/// so chunk sizes differ by at most one. Pids enumerate the block grid in
/// row-major order: in a 2×2 grid, pid 0 is the top-left block, pid 1 the
/// top-right, pid 2 bottom-left and pid 3 bottom-right.
///
/// The world is not periodic: halo cells that fall outside the world have
/// no owner and are never exchanged.
///
/// # Examples
///
/// ```
/// use tessera_core::{Pid, Rect, Topology};
/// use tessera_space::BlockPartition;
///
/// let world = Rect::from_shape(&[10, 10]).unwrap();
/// let topo = BlockPartition::new(world, &[2, 2], &[1, 1]).unwrap();
/// assert_eq!(topo.processor_count(), 4);
/// assert_eq!(topo.pid_of(&[7, 2]), Some(Pid(2)));
/// assert_eq!(topo.neighbors(Pid(0)), vec![Pid(1), Pid(2), Pid(3)]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPartition {
    world: Rect,
    grid: Point,
    /// Per axis, `grid[d] + 1` absolute cut positions.
    cuts: Vec<Vec<i32>>,
    margin: Point,
    bounds: Vec<Rect>,
    neighbors: Vec<Vec<Pid>>,
    revision: u64,
}

impl BlockPartition {
    /// Decompose `world` into `grid[d]` blocks along each axis, with a
    /// halo of `margin[d]` cells.
    ///
    /// Fails if the slices disagree on dimensionality, if any axis has
    /// fewer cells than blocks, or if any margin is negative.
    pub fn new(world: Rect, grid: &[i32], margin: &[i32]) -> Result<Self, GridError> {
        let ndim = world.ndim();
        for found in [grid.len(), margin.len()] {
            if found != ndim {
                return Err(GridError::DimensionMismatch {
                    expected: ndim,
                    found,
                });
            }
        }
        for d in 0..ndim {
            if grid[d] < 1 {
                return Err(GridError::InvalidRegion {
                    reason: format!("axis {d} needs at least one block, got {}", grid[d]),
                });
            }
            if grid[d] > world.size()[d] {
                return Err(GridError::InvalidRegion {
                    reason: format!(
                        "cannot split {} cells into {} blocks on axis {d}",
                        world.size()[d],
                        grid[d]
                    ),
                });
            }
            if margin[d] < 0 {
                return Err(GridError::InvalidRegion {
                    reason: format!("negative margin {} on axis {d}", margin[d]),
                });
            }
        }

        let cuts: Vec<Vec<i32>> = (0..ndim)
            .map(|d| axis_cuts(world.origin()[d], world.size()[d], grid[d]))
            .collect();

        let grid_rect = Rect::from_shape(grid)?;
        let mut bounds = Vec::with_capacity(grid_rect.area());
        for block in grid_rect.points() {
            let min: Point = (0..ndim).map(|d| cuts[d][block[d] as usize]).collect();
            let max: Point = (0..ndim)
                .map(|d| cuts[d][block[d] as usize + 1])
                .collect();
            bounds.push(Rect::from_corners(&min, &max)?);
        }

        let neighbors = (0..bounds.len())
            .map(|p| {
                let halo = bounds[p].expand(margin);
                (0..bounds.len())
                    .filter(|&q| q != p && bounds[q].intersect(&halo).is_some())
                    .map(|q| Pid(q as u32))
                    .collect()
            })
            .collect();

        tracing::debug!(
            world = %world,
            grid = ?grid,
            margin = ?margin,
            partitions = bounds.len(),
            "built block partition"
        );

        Ok(Self {
            world,
            grid: SmallVec::from_slice(grid),
            cuts,
            margin: SmallVec::from_slice(margin),
            bounds,
            neighbors,
            revision: 0,
        })
    }

    /// Tag this geometry with a revision number.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Number of blocks along each axis.
    pub fn grid(&self) -> &[i32] {
        &self.grid
    }
}

/// Cut positions splitting `len` cells starting at `origin` into `parts`
/// chunks whose sizes differ by at most one.
fn axis_cuts(origin: i32, len: i32, parts: i32) -> Vec<i32> {
    let base = len / parts;
    let rem = len % parts;
    let mut cuts = Vec::with_capacity(parts as usize + 1);
    let mut cursor = origin;
    cuts.push(cursor);
    for i in 0..parts {
        cursor += base + i32::from(i < rem);
        cuts.push(cursor);
    }
    cuts
}

impl Topology for BlockPartition {
    fn ndim(&self) -> usize {
        self.world.ndim()
    }

    fn processor_count(&self) -> usize {
        self.bounds.len()
    }

    fn bounds(&self, pid: Pid) -> Option<Rect> {
        self.bounds.get(pid.index()).cloned()
    }

    fn world_bounds(&self) -> Rect {
        self.world.clone()
    }

    fn neighbors(&self, pid: Pid) -> Vec<Pid> {
        self.neighbors.get(pid.index()).cloned().unwrap_or_default()
    }

    fn pid_of(&self, point: &[i32]) -> Option<Pid> {
        if !self.world.contains(point) {
            return None;
        }
        let mut pid = 0usize;
        for (d, &p) in point.iter().enumerate() {
            // First cut is the world origin, so the partition point is >= 1.
            let block = self.cuts[d].partition_point(|&c| c <= p) - 1;
            pid = pid * self.grid[d] as usize + block;
        }
        Some(Pid(pid as u32))
    }

    fn margin(&self) -> &[i32] {
        &self.margin
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn all_bounds(&self) -> Vec<Rect> {
        self.bounds.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance;
    use proptest::prelude::*;

    fn world(shape: &[i32]) -> Rect {
        Rect::from_shape(shape).unwrap()
    }

    #[test]
    fn axis_cuts_spread_remainder() {
        assert_eq!(axis_cuts(0, 10, 3), vec![0, 4, 7, 10]);
        assert_eq!(axis_cuts(5, 4, 4), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn pids_are_row_major_over_blocks() {
        let t = BlockPartition::new(world(&[10, 10]), &[2, 2], &[1, 1]).unwrap();
        assert_eq!(t.bounds(Pid(0)), Some(Rect::new(&[0, 0], &[5, 5]).unwrap()));
        assert_eq!(t.bounds(Pid(1)), Some(Rect::new(&[0, 5], &[5, 5]).unwrap()));
        assert_eq!(t.bounds(Pid(2)), Some(Rect::new(&[5, 0], &[5, 5]).unwrap()));
        assert_eq!(t.bounds(Pid(3)), Some(Rect::new(&[5, 5], &[5, 5]).unwrap()));
        assert_eq!(t.bounds(Pid(4)), None);
    }

    #[test]
    fn pid_of_outside_world_is_none() {
        let t = BlockPartition::new(world(&[10, 10]), &[2, 2], &[1, 1]).unwrap();
        assert_eq!(t.pid_of(&[-1, 0]), None);
        assert_eq!(t.pid_of(&[10, 3]), None);
        assert_eq!(t.pid_of(&[3]), None);
    }

    #[test]
    fn zero_margin_has_no_neighbors() {
        let t = BlockPartition::new(world(&[8, 8]), &[2, 2], &[0, 0]).unwrap();
        for p in 0..4 {
            assert!(t.neighbors(Pid(p)).is_empty());
        }
    }

    #[test]
    fn strip_decomposition_neighbors() {
        let t = BlockPartition::new(world(&[12, 4]), &[4, 1], &[1, 0]).unwrap();
        assert_eq!(t.neighbors(Pid(0)), vec![Pid(1)]);
        assert_eq!(t.neighbors(Pid(1)), vec![Pid(0), Pid(2)]);
        assert_eq!(t.neighbors(Pid(3)), vec![Pid(2)]);
    }

    #[test]
    fn wide_margin_reaches_past_adjacent_block() {
        let t = BlockPartition::new(world(&[6]), &[3], &[3]).unwrap();
        assert_eq!(t.neighbors(Pid(0)), vec![Pid(1), Pid(2)]);
    }

    #[test]
    fn offset_world_origin() {
        let w = Rect::new(&[-4, 10], &[8, 8]).unwrap();
        let t = BlockPartition::new(w, &[2, 2], &[1, 1]).unwrap();
        assert_eq!(t.pid_of(&[-4, 10]), Some(Pid(0)));
        assert_eq!(t.pid_of(&[3, 17]), Some(Pid(3)));
        compliance::run_full_compliance(&t);
    }

    #[test]
    fn new_rejects_too_many_blocks() {
        assert!(matches!(
            BlockPartition::new(world(&[3, 3]), &[4, 1], &[0, 0]),
            Err(GridError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn new_rejects_negative_margin() {
        assert!(BlockPartition::new(world(&[3, 3]), &[1, 1], &[-1, 0]).is_err());
    }

    #[test]
    fn new_rejects_dimension_mismatch() {
        assert!(matches!(
            BlockPartition::new(world(&[3, 3]), &[1], &[0, 0]),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn compliance_2x2() {
        let t = BlockPartition::new(world(&[10, 10]), &[2, 2], &[1, 1]).unwrap();
        compliance::run_full_compliance(&t);
    }

    #[test]
    fn compliance_uneven_3d() {
        let t = BlockPartition::new(world(&[7, 5, 4]), &[3, 2, 2], &[1, 2, 0]).unwrap();
        compliance::run_full_compliance(&t);
    }

    proptest! {
        #[test]
        fn every_point_has_exactly_one_owner(
            rows in 1i32..12, cols in 1i32..12,
            gr in 1i32..4, gc in 1i32..4,
            mr in 0i32..3, mc in 0i32..3,
        ) {
            let gr = gr.min(rows);
            let gc = gc.min(cols);
            let t = BlockPartition::new(world(&[rows, cols]), &[gr, gc], &[mr, mc]).unwrap();
            for p in t.world_bounds().points() {
                let owner = t.pid_of(&p);
                prop_assert!(owner.is_some());
                let holders = t.all_bounds().iter().filter(|b| b.contains(&p)).count();
                prop_assert_eq!(holders, 1);
                let owner_bounds = t.bounds(owner.unwrap()).unwrap();
                prop_assert!(owner_bounds.contains(&p));
            }
        }
    }
}
