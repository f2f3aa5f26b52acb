//! Background visibility sorting.
//!
//! Each sorter starts its work on the rayon pool and hands the result back on
//! the render thread through [`AsyncSort::wait_then`]. A sort that has been
//! started always runs to completion.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use glam::Vec3;
use hecs::Entity;
use rayon::prelude::*;

use crate::error::{RenderError, RenderResult};
use crate::renderer::frustum::{Containment, Frustum};
use crate::scene::bounds::BoundingSphere;

/// An entity with its world-space bounds, as gathered from the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortEntry {
    pub entity: Entity,
    pub bounds: BoundingSphere,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaSortEntry {
    pub entity: Entity,
    pub bounds: BoundingSphere,
    pub distance: f32,
}

enum SortState<T> {
    Idle,
    Pending(Receiver<Vec<T>>),
    Ready(Arc<[T]>),
}

/// Shared begin/wait machinery for the sorters.
pub struct AsyncSort<T> {
    name: &'static str,
    state: SortState<T>,
}

impl<T: Send + Sync + 'static> AsyncSort<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            state: SortState::Idle,
        }
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> Vec<T> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        rayon::spawn(move || {
            // The receiver may be gone if the sorter was reset mid-frame.
            let _ = sender.send(job());
        });
        self.state = SortState::Pending(receiver);
    }

    /// Blocks until the current sort finishes and returns its result.
    pub fn wait(&mut self) -> RenderResult<Arc<[T]>> {
        match std::mem::replace(&mut self.state, SortState::Idle) {
            SortState::Idle => Err(RenderError::usage(format!(
                "{} waited on before a sort was started",
                self.name
            ))),
            SortState::Pending(receiver) => {
                let result: Arc<[T]> = receiver
                    .recv()
                    .map_err(|_| RenderError::usage(format!("{} job was lost", self.name)))?
                    .into();
                self.state = SortState::Ready(Arc::clone(&result));
                Ok(result)
            }
            SortState::Ready(result) => {
                self.state = SortState::Ready(Arc::clone(&result));
                Ok(result)
            }
        }
    }

    /// Blocks until the sort finishes, then runs `continuation` with the result.
    pub fn wait_then<R>(&mut self, continuation: impl FnOnce(&[T]) -> R) -> RenderResult<R> {
        let result = self.wait()?;
        Ok(continuation(&result))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, SortState::Pending(_))
    }

    /// Drops any finished result. A pending job is joined first.
    pub fn reset(&mut self) {
        if let SortState::Pending(receiver) = std::mem::replace(&mut self.state, SortState::Idle) {
            let _ = receiver.recv();
        }
    }
}

/// Keeps entities whose bounds are at least partially inside a frustum.
pub struct CullSorter {
    sort: AsyncSort<SortEntry>,
}

impl Default for CullSorter {
    fn default() -> Self {
        Self {
            sort: AsyncSort::new("cull sorter"),
        }
    }
}

impl CullSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_sort_async(&mut self, candidates: Vec<SortEntry>, frustum: Frustum) {
        self.sort.spawn(move || cull(candidates, &frustum));
    }

    pub fn wait(&mut self) -> RenderResult<Arc<[SortEntry]>> {
        self.sort.wait()
    }

    pub fn wait_then<R>(&mut self, continuation: impl FnOnce(&[SortEntry]) -> R) -> RenderResult<R> {
        self.sort.wait_then(continuation)
    }

    pub fn reset(&mut self) {
        self.sort.reset();
    }
}

pub fn cull(candidates: Vec<SortEntry>, frustum: &Frustum) -> Vec<SortEntry> {
    candidates
        .into_par_iter()
        .filter(|entry| {
            if !entry.bounds.is_valid() {
                log::trace!("Skipping entity {:?} with degenerate bounds", entry.entity);
                return false;
            }
            frustum.contains_sphere(&entry.bounds) != Containment::Outside
        })
        .collect()
}

/// Orders entities back to front from a viewpoint.
pub struct AlphaSorter {
    sort: AsyncSort<AlphaSortEntry>,
}

impl Default for AlphaSorter {
    fn default() -> Self {
        Self {
            sort: AsyncSort::new("alpha sorter"),
        }
    }
}

impl AlphaSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_sort_async(&mut self, entries: Arc<[SortEntry]>, viewpoint: Vec3) {
        self.sort.spawn(move || sort_back_to_front(&entries, viewpoint));
    }

    pub fn wait(&mut self) -> RenderResult<Arc<[AlphaSortEntry]>> {
        self.sort.wait()
    }

    pub fn wait_then<R>(&mut self, continuation: impl FnOnce(&[AlphaSortEntry]) -> R) -> RenderResult<R> {
        self.sort.wait_then(continuation)
    }

    pub fn reset(&mut self) {
        self.sort.reset();
    }
}

pub fn sort_back_to_front(entries: &[SortEntry], viewpoint: Vec3) -> Vec<AlphaSortEntry> {
    let mut sorted: Vec<AlphaSortEntry> = entries
        .par_iter()
        .map(|entry| AlphaSortEntry {
            entity: entry.entity,
            bounds: entry.bounds,
            distance: entry.bounds.center.distance(viewpoint),
        })
        .collect();
    sorted.par_sort_by(|a, b| b.distance.total_cmp(&a.distance));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    fn entities(count: usize) -> Vec<Entity> {
        let mut world = hecs::World::new();
        (0..count).map(|_| world.spawn(())).collect()
    }

    #[test]
    fn waiting_before_begin_is_a_usage_error() {
        let mut sorter = CullSorter::new();
        assert!(matches!(sorter.wait(), Err(RenderError::Usage(_))));
    }

    #[test]
    fn cull_skips_degenerate_bounds() {
        let frustum = Frustum::from_view_proj(&Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, -10.0, 10.0));
        let ids = entities(3);
        let candidates = vec![
            SortEntry {
                entity: ids[0],
                bounds: BoundingSphere::new(Vec3::ZERO, 1.0),
            },
            SortEntry {
                entity: ids[1],
                bounds: BoundingSphere::new(Vec3::ZERO, 0.0),
            },
            SortEntry {
                entity: ids[2],
                bounds: BoundingSphere::new(Vec3::new(f32::NAN, 0.0, 0.0), 1.0),
            },
        ];

        let mut sorter = CullSorter::new();
        sorter.begin_sort_async(candidates, frustum);
        let visible = sorter
            .wait_then(|visible| visible.iter().map(|entry| entry.entity).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(visible, vec![ids[0]]);
    }

    #[test]
    fn result_stays_available_after_the_first_wait() {
        let ids = entities(2);
        let entries: Arc<[SortEntry]> = ids
            .iter()
            .enumerate()
            .map(|(i, &entity)| SortEntry {
                entity,
                bounds: BoundingSphere::new(Vec3::new(0.0, 0.0, -(i as f32) * 5.0), 1.0),
            })
            .collect();

        let mut sorter = AlphaSorter::new();
        sorter.begin_sort_async(entries, Vec3::ZERO);
        let first = sorter.wait().unwrap();
        let second = sorter.wait().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].entity, ids[1]);
        assert_eq!(first[1].entity, ids[0]);
    }
}
