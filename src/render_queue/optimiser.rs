//! Periodic removal of render queue buckets that have stopped receiving instances
//!
//! Every check interval, each model entry with nothing queued has its timeout
//! counter incremented. Every optimise interval, entries that were empty for
//! every check since the last optimisation are removed and all other counters
//! reset. The optimiser must only run between frames, after rendering and
//! before [`RenderQueue::reset`].

use super::RenderQueue;

pub const DEFAULT_CHECK_INTERVAL_MS: u32 = 1000;
pub const DEFAULT_OPTIMISE_INTERVAL_MS: u32 = 10000;

const MIN_CHECK_INTERVAL_MS: u32 = 10;
const MIN_OPTIMISE_INTERVAL_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderQueueOptimiserConfig {
    pub check_interval_ms: u32,
    pub optimise_interval_ms: u32,
}

impl Default for RenderQueueOptimiserConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            optimise_interval_ms: DEFAULT_OPTIMISE_INTERVAL_MS,
        }
    }
}

/// What a call to [`RenderQueueOptimiser::run`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimiserAction {
    Idle,
    Checked,
    Optimised { removed: usize },
}

#[derive(Debug, Clone)]
pub struct RenderQueueOptimiser {
    check_interval_ms: u32,
    optimise_interval_ms: u32,
    last_check_ms: u64,
    last_optimised_ms: u64,
    checks_performed: u32,
}

impl Default for RenderQueueOptimiser {
    fn default() -> Self {
        Self::new(RenderQueueOptimiserConfig::default())
    }
}

impl RenderQueueOptimiser {
    pub fn new(config: RenderQueueOptimiserConfig) -> Self {
        let mut optimiser = Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            optimise_interval_ms: DEFAULT_OPTIMISE_INTERVAL_MS,
            last_check_ms: 0,
            last_optimised_ms: 0,
            checks_performed: 0,
        };
        optimiser.set_check_interval(config.check_interval_ms);
        optimiser.set_optimise_interval(config.optimise_interval_ms);
        optimiser
    }

    pub fn check_interval(&self) -> u32 {
        self.check_interval_ms
    }

    pub fn optimise_interval(&self) -> u32 {
        self.optimise_interval_ms
    }

    pub fn checks_performed(&self) -> u32 {
        self.checks_performed
    }

    pub fn set_check_interval(&mut self, interval_ms: u32) {
        self.check_interval_ms = interval_ms.max(MIN_CHECK_INTERVAL_MS);
    }

    pub fn set_optimise_interval(&mut self, interval_ms: u32) {
        self.optimise_interval_ms = interval_ms.max(MIN_OPTIMISE_INTERVAL_MS);
    }

    /// Restart both timers from `now_ms`
    pub fn reset_timers(&mut self, now_ms: u64) {
        self.last_check_ms = now_ms;
        self.last_optimised_ms = now_ms;
        self.checks_performed = 0;
    }

    pub fn is_ready(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_check_ms) >= self.check_interval_ms as u64
    }

    /// Perform a check or an optimisation pass if one is due
    pub fn run(&mut self, now_ms: u64, queue: &mut RenderQueue) -> OptimiserAction {
        if !self.is_ready(now_ms) {
            return OptimiserAction::Idle;
        }
        self.last_check_ms = now_ms;

        if now_ms.saturating_sub(self.last_optimised_ms) < self.optimise_interval_ms as u64 {
            self.check(queue);
            OptimiserAction::Checked
        } else {
            let removed = self.optimise(now_ms, queue);
            OptimiserAction::Optimised { removed }
        }
    }

    /// Increment the timeout counter of every empty model entry
    pub fn check(&mut self, queue: &mut RenderQueue) {
        queue.increment_empty_timeouts();
        self.checks_performed += 1;
    }

    /// Remove entries that were empty at every check since the last optimisation
    pub fn optimise(&mut self, now_ms: u64, queue: &mut RenderQueue) -> usize {
        let removed = if self.checks_performed == 0 {
            0
        } else {
            queue.remove_timed_out(self.checks_performed)
        };

        if removed > 0 {
            log::debug!(
                "Render queue optimiser removed {} idle model entries after {} checks",
                removed,
                self.checks_performed
            );
        }

        self.checks_performed = 0;
        self.last_optimised_ms = now_ms;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::render_queue::{RenderInstance, RenderTechnique};
    use crate::resources::{Mesh, ModelBuffer, ModelId};
    use glam::Mat4;
    use std::sync::Arc;

    fn model(device: &mut RecordingDevice, id: u32) -> Arc<ModelBuffer> {
        Arc::new(ModelBuffer::from_mesh(device, ModelId(id), &Mesh::cube()).unwrap())
    }

    #[test]
    fn intervals_are_clamped() {
        let optimiser = RenderQueueOptimiser::new(RenderQueueOptimiserConfig {
            check_interval_ms: 1,
            optimise_interval_ms: 5,
        });
        assert_eq!(optimiser.check_interval(), 10);
        assert_eq!(optimiser.optimise_interval(), 100);

        let defaults = RenderQueueOptimiser::default();
        assert_eq!(defaults.check_interval(), 1000);
        assert_eq!(defaults.optimise_interval(), 10000);
    }

    #[test]
    fn entries_idle_for_every_check_are_removed() {
        let mut device = RecordingDevice::new();
        let busy = model(&mut device, 1);
        let idle = model(&mut device, 2);
        let mut queue = RenderQueue::default();
        let mut optimiser = RenderQueueOptimiser::default();

        queue.submit(RenderTechnique::Light, &busy, RenderInstance::new(Mat4::IDENTITY), None);
        queue.submit(RenderTechnique::Light, &idle, RenderInstance::new(Mat4::IDENTITY), None);
        queue.reset();

        for frame in 1..=3u64 {
            queue.submit(RenderTechnique::Light, &busy, RenderInstance::new(Mat4::IDENTITY), None);
            assert_eq!(optimiser.run(frame * 1000, &mut queue), OptimiserAction::Checked);
            queue.reset();
        }

        queue.submit(RenderTechnique::Light, &busy, RenderInstance::new(Mat4::IDENTITY), None);
        assert_eq!(
            optimiser.run(10_000, &mut queue),
            OptimiserAction::Optimised { removed: 1 }
        );
        assert!(queue.model_entry(RenderTechnique::Light, ModelId(1)).is_some());
        assert!(queue.model_entry(RenderTechnique::Light, ModelId(2)).is_none());
        assert_eq!(queue.model_count(RenderTechnique::Light), 1);
        assert_eq!(optimiser.checks_performed(), 0);
    }

    #[test]
    fn entry_used_once_between_optimisations_survives() {
        let mut device = RecordingDevice::new();
        let occasional = model(&mut device, 5);
        let mut queue = RenderQueue::default();
        let mut optimiser = RenderQueueOptimiser::default();

        queue.submit(RenderTechnique::Light, &occasional, RenderInstance::new(Mat4::IDENTITY), None);
        optimiser.run(1000, &mut queue);
        queue.reset();
        optimiser.run(2000, &mut queue);

        assert_eq!(optimiser.optimise(10_000, &mut queue), 0);
        assert!(queue.model_entry(RenderTechnique::Light, ModelId(5)).is_some());
    }

    #[test]
    fn optimise_without_checks_only_resets_timer() {
        let mut device = RecordingDevice::new();
        let m = model(&mut device, 1);
        let mut queue = RenderQueue::default();
        queue.submit(RenderTechnique::Light, &m, RenderInstance::new(Mat4::IDENTITY), None);
        queue.reset();

        let mut optimiser = RenderQueueOptimiser::default();
        assert_eq!(optimiser.optimise(500, &mut queue), 0);
        assert_eq!(queue.model_count(RenderTechnique::Light), 1);
    }

    #[test]
    fn run_is_idle_before_check_interval() {
        let mut queue = RenderQueue::default();
        let mut optimiser = RenderQueueOptimiser::default();
        optimiser.reset_timers(5000);
        assert_eq!(optimiser.run(5500, &mut queue), OptimiserAction::Idle);
        assert_eq!(optimiser.run(6000, &mut queue), OptimiserAction::Checked);
    }

    #[test]
    fn index_stays_valid_after_removal() {
        let mut device = RecordingDevice::new();
        let a = model(&mut device, 1);
        let b = model(&mut device, 2);
        let c = model(&mut device, 3);
        let mut queue = RenderQueue::default();
        let mut optimiser = RenderQueueOptimiser::default();

        for m in [&a, &b, &c] {
            queue.submit(RenderTechnique::Light, m, RenderInstance::new(Mat4::IDENTITY), None);
        }
        queue.reset();
        queue.submit(RenderTechnique::Light, &c, RenderInstance::new(Mat4::IDENTITY), None);
        optimiser.check(&mut queue);
        assert_eq!(optimiser.optimise(20_000, &mut queue), 2);

        queue.submit(RenderTechnique::Light, &c, RenderInstance::new(Mat4::IDENTITY), None);
        let entry = queue.model_entry(RenderTechnique::Light, ModelId(3)).unwrap();
        assert_eq!(entry.instance_count(), 2);
    }
}
