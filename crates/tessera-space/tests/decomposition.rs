use tessera_core::{Pid, Rect, Topology};
use tessera_space::BlockPartition;

#[test]
fn four_by_one_strips_cover_world_in_order() {
    let world = Rect::from_shape(&[9, 3]).unwrap();
    let t = BlockPartition::new(world, &[4, 1], &[1, 0]).unwrap();
    let rows: Vec<(i32, i32)> = t
        .all_bounds()
        .iter()
        .map(|b| (b.origin()[0], b.size()[0]))
        .collect();
    assert_eq!(rows, vec![(0, 3), (3, 2), (5, 2), (7, 2)]);
    assert_eq!(t.pid_of(&[4, 0]), Some(Pid(1)));
    assert_eq!(t.pid_of(&[8, 2]), Some(Pid(3)));
}

#[test]
fn revision_is_carried() {
    let world = Rect::from_shape(&[4, 4]).unwrap();
    let t = BlockPartition::new(world, &[2, 2], &[1, 1])
        .unwrap()
        .with_revision(7);
    assert_eq!(t.revision(), 7);
    assert_eq!(t.grid(), &[2, 2]);
}

#[test]
fn topology_is_object_safe() {
    let world = Rect::from_shape(&[4, 4]).unwrap();
    let t: Box<dyn Topology> = Box::new(BlockPartition::new(world, &[1, 2], &[0, 1]).unwrap());
    assert_eq!(t.processor_count(), 2);
    assert_eq!(t.margin(), &[0, 1]);
    assert_eq!(t.neighbors(Pid(1)), vec![Pid(0)]);
}
