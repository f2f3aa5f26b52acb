use glam::{Mat4, Vec3};
use hecs::World;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wgpu_deferred::renderer::frustum::{Containment, Frustum};
use wgpu_deferred::renderer::sorters::{cull, sort_back_to_front, AlphaSorter, CullSorter, SortEntry};
use wgpu_deferred::scene::bounds::BoundingSphere;

const EPSILON: f32 = 1e-5;

fn camera_frustum() -> Frustum {
    let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 12.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 40.0);
    Frustum::from_view_proj(&(projection * view))
}

fn random_entries(world: &mut World, rng: &mut SmallRng, count: usize) -> Vec<SortEntry> {
    (0..count)
        .map(|_| {
            let center = Vec3::new(
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-60.0..20.0),
            );
            // Every tenth sphere is degenerate.
            let radius = if rng.gen_ratio(1, 10) {
                0.0
            } else {
                rng.gen_range(0.1..4.0)
            };
            SortEntry {
                entity: world.spawn(()),
                bounds: BoundingSphere::new(center, radius),
            }
        })
        .collect()
}

#[test]
fn culling_keeps_exactly_the_spheres_touching_the_frustum() {
    let mut world = World::new();
    let mut rng = SmallRng::seed_from_u64(7);
    let frustum = camera_frustum();
    let entries = random_entries(&mut world, &mut rng, 500);

    let mut expected: Vec<_> = entries
        .iter()
        .filter(|entry| {
            entry.bounds.is_valid() && frustum.contains_sphere(&entry.bounds) != Containment::Outside
        })
        .map(|entry| entry.entity)
        .collect();
    let mut kept: Vec<_> = cull(entries, &frustum).into_iter().map(|entry| entry.entity).collect();

    expected.sort();
    kept.sort();
    assert!(!kept.is_empty());
    assert_eq!(kept, expected);
}

#[test]
fn alpha_order_is_a_back_to_front_permutation() {
    let mut world = World::new();
    let mut rng = SmallRng::seed_from_u64(42);
    let entries = random_entries(&mut world, &mut rng, 200);
    let viewpoint = Vec3::new(1.0, 2.0, 3.0);

    let sorted = sort_back_to_front(&entries, viewpoint);
    assert_eq!(sorted.len(), entries.len());
    for pair in sorted.windows(2) {
        assert!(pair[0].distance >= pair[1].distance);
    }
    for entry in &sorted {
        assert!((entry.distance - entry.bounds.center.distance(viewpoint)).abs() < EPSILON);
    }

    let mut input: Vec<_> = entries.iter().map(|entry| entry.entity).collect();
    let mut output: Vec<_> = sorted.iter().map(|entry| entry.entity).collect();
    input.sort();
    output.sort();
    assert_eq!(input, output);
}

#[test]
fn sorters_chain_off_thread() {
    let mut world = World::new();
    let near = world.spawn(());
    let far = world.spawn(());
    let behind = world.spawn(());
    let candidates = vec![
        SortEntry {
            entity: near,
            bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, 5.0), 1.0),
        },
        SortEntry {
            entity: far,
            bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, -20.0), 1.0),
        },
        SortEntry {
            entity: behind,
            bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, 80.0), 1.0),
        },
    ];

    let mut cull_sorter = CullSorter::new();
    let mut alpha_sorter = AlphaSorter::new();
    cull_sorter.begin_sort_async(candidates, camera_frustum());
    let visible = cull_sorter.wait().unwrap();
    assert_eq!(visible.len(), 2);

    alpha_sorter.begin_sort_async(visible, Vec3::new(0.0, 2.0, 12.0));
    let order: Vec<_> = alpha_sorter
        .wait_then(|sorted| sorted.iter().map(|entry| entry.entity).collect())
        .unwrap();
    assert_eq!(order, vec![far, near]);
}
