//! Topology trait compliance test helpers.
//!
//! These functions verify that a Topology implementation satisfies the
//! invariants required by the trait contract. Reused by every topology's
//! test module.

use tessera_core::{Pid, Topology};

/// Assert that the bounds of all partitions tile the world exactly.
pub fn assert_bounds_tile_world(topo: &dyn Topology) {
    let world = topo.world_bounds();
    let all = topo.all_bounds();
    assert_eq!(all.len(), topo.processor_count());
    let total: usize = all.iter().map(|b| b.area()).sum();
    assert_eq!(total, world.area(), "partition areas do not sum to world area");
    for (i, a) in all.iter().enumerate() {
        assert!(world.contains_rect(a), "partition {i} bounds {a} escape world {world}");
        for (j, b) in all.iter().enumerate().skip(i + 1) {
            assert!(
                a.intersect(b).is_none(),
                "partitions {i} ({a}) and {j} ({b}) overlap"
            );
        }
    }
}

/// Assert that `pid_of` agrees with `bounds` for every world point.
pub fn assert_pid_of_matches_bounds(topo: &dyn Topology) {
    for p in topo.world_bounds().points() {
        let pid = topo
            .pid_of(&p)
            .unwrap_or_else(|| panic!("world point {p:?} has no owner"));
        let bounds = topo.bounds(pid).expect("owner pid has bounds");
        assert!(bounds.contains(&p), "pid_of({p:?}) = {pid} but bounds are {bounds}");
    }
}

/// Assert that neighbor lists are sorted, exclude self, are symmetric,
/// and contain exactly the partitions intersecting the halo.
pub fn assert_neighbors_consistent(topo: &dyn Topology) {
    for p in 0..topo.processor_count() as u32 {
        let pid = Pid(p);
        let nbrs = topo.neighbors(pid);
        assert!(nbrs.windows(2).all(|w| w[0] < w[1]), "neighbors of {pid} not sorted");
        assert!(!nbrs.contains(&pid), "{pid} lists itself as a neighbor");
        let halo = topo.bounds(pid).unwrap().expand(topo.margin());
        for q in 0..topo.processor_count() as u32 {
            let other = Pid(q);
            if other == pid {
                continue;
            }
            let touches = topo.bounds(other).unwrap().intersect(&halo).is_some();
            assert_eq!(
                nbrs.contains(&other),
                touches,
                "neighbor relation {pid} -> {other} disagrees with halo overlap"
            );
            if touches {
                assert!(
                    topo.neighbors(other).contains(&pid),
                    "neighbor relation {pid} -> {other} is not symmetric"
                );
            }
        }
    }
}

/// Run all compliance checks.
pub fn run_full_compliance(topo: &dyn Topology) {
    assert_bounds_tile_world(topo);
    assert_pid_of_matches_bounds(topo);
    assert_neighbors_consistent(topo);
}
