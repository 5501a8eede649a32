//! Render queue
//!
//! Per-frame draw submissions are accumulated into buckets keyed by
//! (technique, model, material) so that each bucket can be drawn with a handful
//! of instanced draw calls. Techniques that need back-to-front ordering for
//! alpha blending also keep a flat list of entries that is sorted by camera
//! distance before drawing.
//!
//! Buckets are cleared, not removed, between frames: instance storage keeps its
//! capacity and bucket indices stay stable. Only the [`RenderQueueOptimiser`]
//! removes buckets, and only between frames.

mod instance;
mod optimiser;
mod processor;
mod technique;

pub use instance::*;
pub use optimiser::*;
pub use processor::*;
pub use technique::*;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::resources::{MaterialId, ModelBuffer, ModelId, SharedMaterial};

/// Default maximum number of instances drawn by a single draw call
pub const DEFAULT_INSTANCED_RENDER_LIMIT: usize = 1000;

/// Fade alpha below which an instance is treated as invisible
pub const FADE_EPSILON: f32 = 1e-6;

/// Instances of one model with one material
#[derive(Debug)]
pub struct MaterialBucket {
    material: Option<SharedMaterial>,
    material_id: Option<MaterialId>,
    instances: Vec<RenderInstance>,
    shadow_casters: usize,
}

impl MaterialBucket {
    fn new(material: Option<SharedMaterial>, material_id: Option<MaterialId>) -> Self {
        Self {
            material,
            material_id,
            instances: Vec::new(),
            shadow_casters: 0,
        }
    }

    pub fn material(&self) -> Option<&SharedMaterial> {
        self.material.as_ref()
    }

    pub fn material_id(&self) -> Option<MaterialId> {
        self.material_id
    }

    pub fn instances(&self) -> &[RenderInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.instances.capacity()
    }

    pub fn shadow_casters(&self) -> usize {
        self.shadow_casters
    }

    fn push(&mut self, instance: RenderInstance) {
        if instance.is_shadow_caster() {
            self.shadow_casters += 1;
        }
        self.instances.push(instance);
    }

    fn clear(&mut self) {
        self.instances.clear();
        self.shadow_casters = 0;
    }
}

/// All material buckets for one model within one technique.
///
/// Slot 0 always exists and holds instances with the default material.
#[derive(Debug)]
pub struct ModelEntry {
    model: Arc<ModelBuffer>,
    slots: Vec<MaterialBucket>,
    timeout_counter: u32,
}

impl ModelEntry {
    fn new(model: Arc<ModelBuffer>) -> Self {
        Self {
            model,
            slots: vec![MaterialBucket::new(None, None)],
            timeout_counter: 0,
        }
    }

    pub fn model(&self) -> &Arc<ModelBuffer> {
        &self.model
    }

    pub fn slots(&self) -> &[MaterialBucket] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn instance_count(&self) -> usize {
        self.slots.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_empty())
    }

    fn slot_for(&mut self, material: Option<&SharedMaterial>) -> usize {
        let Some(material) = material else {
            return 0;
        };
        let id = material.read().id();
        if let Some(index) = self
            .slots
            .iter()
            .skip(1)
            .position(|s| s.material_id == Some(id))
        {
            return index + 1;
        }
        self.new_render_slot(material.clone(), id)
    }

    fn new_render_slot(&mut self, material: SharedMaterial, id: MaterialId) -> usize {
        self.slots.push(MaterialBucket::new(Some(material), Some(id)));
        self.slots.len() - 1
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}

/// Entry in the back-to-front list of a technique
#[derive(Debug, Clone)]
pub struct ZSortedEntry {
    pub model: Arc<ModelBuffer>,
    pub material: Option<SharedMaterial>,
    pub material_id: Option<MaterialId>,
    pub instance: RenderInstance,
    pub distance_sq: f32,
}

impl ZSortedEntry {
    fn batches_with(&self, other: &ZSortedEntry) -> bool {
        self.model.id == other.model.id && self.material_id == other.material_id
    }
}

#[derive(Debug, Default)]
struct TechniqueQueue {
    models: Vec<ModelEntry>,
    model_index: HashMap<ModelId, usize>,
    zsorted: Vec<ZSortedEntry>,
    zsorted_ordered: bool,
}

impl TechniqueQueue {
    fn entry_for(&mut self, model: &Arc<ModelBuffer>) -> &mut ModelEntry {
        let index = match self.model_index.get(&model.id) {
            Some(&index) => index,
            None => {
                self.models.push(ModelEntry::new(model.clone()));
                let index = self.models.len() - 1;
                self.model_index.insert(model.id, index);
                index
            }
        };
        &mut self.models[index]
    }

    fn rebuild_index(&mut self) {
        self.model_index = self
            .models
            .iter()
            .enumerate()
            .map(|(i, m)| (m.model.id, i))
            .collect();
    }
}

/// One instanced draw: a model, its material and up to the instance limit of instances
#[derive(Debug, Clone, Copy)]
pub struct InstanceBatch<'a> {
    pub model: &'a Arc<ModelBuffer>,
    pub material: Option<&'a SharedMaterial>,
    pub instances: &'a [RenderInstance],
}

/// Contiguous run of z-sorted entries sharing model and material
#[derive(Debug, Clone, Copy)]
pub struct ZSortedBatch<'a> {
    pub model: &'a Arc<ModelBuffer>,
    pub material: Option<&'a SharedMaterial>,
    pub entries: &'a [ZSortedEntry],
}

/// Iterator over the z-sorted list of a technique, split into draw batches
pub struct ZSortedBatches<'a> {
    entries: &'a [ZSortedEntry],
    limit: usize,
}

impl<'a> Iterator for ZSortedBatches<'a> {
    type Item = ZSortedBatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.entries.first()?;
        let run = self
            .entries
            .iter()
            .take(self.limit)
            .take_while(|e| e.batches_with(first))
            .count();
        let (batch, rest) = self.entries.split_at(run);
        self.entries = rest;
        Some(ZSortedBatch {
            model: &first.model,
            material: first.material.as_ref(),
            entries: batch,
        })
    }
}

/// Submission counters for the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: usize,
    pub zsorted: usize,
}

pub struct RenderQueue {
    techniques: Vec<TechniqueQueue>,
    instance_limit: usize,
    stats: QueueStats,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INSTANCED_RENDER_LIMIT)
    }
}

impl RenderQueue {
    pub fn new(instance_limit: usize) -> Self {
        Self {
            techniques: (0..RenderTechnique::COUNT)
                .map(|_| TechniqueQueue::default())
                .collect(),
            instance_limit: instance_limit.max(1),
            stats: QueueStats::default(),
        }
    }

    pub fn instance_limit(&self) -> usize {
        self.instance_limit
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    fn queue(&self, technique: RenderTechnique) -> &TechniqueQueue {
        &self.techniques[technique.index()]
    }

    fn queue_mut(&mut self, technique: RenderTechnique) -> &mut TechniqueQueue {
        &mut self.techniques[technique.index()]
    }

    /// Queue an instance into the (technique, model, material) bucket
    pub fn submit(
        &mut self,
        technique: RenderTechnique,
        model: &Arc<ModelBuffer>,
        instance: RenderInstance,
        material: Option<&SharedMaterial>,
    ) {
        let entry = self.queue_mut(technique).entry_for(model);
        let slot = entry.slot_for(material);
        entry.slots[slot].push(instance);
        self.stats.submitted += 1;
    }

    /// Queue an instance for back-to-front rendering, keyed by its distance to the camera
    pub fn submit_zsorted(
        &mut self,
        technique: RenderTechnique,
        model: &Arc<ModelBuffer>,
        instance: RenderInstance,
        material: Option<&SharedMaterial>,
        camera_position: Vec3,
    ) {
        let distance_sq = instance.position().distance_squared(camera_position);
        let instance = instance.with_sort_key(sort_key_from_distance_sq(distance_sq));
        let material_id = material.map(|m| m.read().id());

        let queue = self.queue_mut(technique);
        queue.zsorted.push(ZSortedEntry {
            model: model.clone(),
            material: material.cloned(),
            material_id,
            instance,
            distance_sq,
        });
        queue.zsorted_ordered = false;
        self.stats.submitted += 1;
        self.stats.zsorted += 1;
    }

    /// Queue a lit instance tinted by a highlight colour
    pub fn submit_highlighted(
        &mut self,
        model: &Arc<ModelBuffer>,
        world: Mat4,
        colour: Vec4,
        material: Option<&SharedMaterial>,
    ) {
        let instance = RenderInstance::new(world).with_params(colour);
        self.submit(RenderTechnique::LightHighlight, model, instance, material);
    }

    /// Queue an alpha-faded instance; alpha below the fade epsilon is not rendered
    pub fn submit_faded(
        &mut self,
        model: &Arc<ModelBuffer>,
        world: Mat4,
        alpha: f32,
        material: Option<&SharedMaterial>,
        camera_position: Vec3,
    ) {
        if alpha < FADE_EPSILON {
            return;
        }
        let instance = RenderInstance::new(world).with_params(Vec4::splat(alpha));
        self.submit_zsorted(RenderTechnique::LightFade, model, instance, material, camera_position);
    }

    /// Queue a highlighted instance that is also fading; alpha goes in `params.w`
    pub fn submit_highlight_faded(
        &mut self,
        model: &Arc<ModelBuffer>,
        world: Mat4,
        colour: Vec4,
        alpha: f32,
        material: Option<&SharedMaterial>,
        camera_position: Vec3,
    ) {
        if alpha < FADE_EPSILON {
            return;
        }
        let instance = RenderInstance::new(world).with_params(colour.truncate().extend(alpha));
        self.submit_zsorted(
            RenderTechnique::LightHighlightFade,
            model,
            instance,
            material,
            camera_position,
        );
    }

    /// Non-empty buckets of a technique, split into batches of at most the instance limit
    pub fn drain(&self, technique: RenderTechnique) -> impl Iterator<Item = InstanceBatch<'_>> {
        let limit = self.instance_limit;
        self.queue(technique).models.iter().flat_map(move |entry| {
            entry
                .slots
                .iter()
                .filter(|slot| !slot.is_empty())
                .flat_map(move |slot| {
                    slot.instances.chunks(limit).map(move |chunk| InstanceBatch {
                        model: &entry.model,
                        material: slot.material.as_ref(),
                        instances: chunk,
                    })
                })
        })
    }

    /// Order the z-sorted list farthest-first. Ties keep submission order.
    pub fn sort_zsorted(&mut self, technique: RenderTechnique) {
        let queue = self.queue_mut(technique);
        if !queue.zsorted_ordered {
            queue
                .zsorted
                .sort_by(|a, b| b.distance_sq.total_cmp(&a.distance_sq));
            queue.zsorted_ordered = true;
        }
    }

    /// Z-sorted entries in descending camera distance, grouped into contiguous
    /// runs of the same model and material
    pub fn drain_zsorted(&mut self, technique: RenderTechnique) -> ZSortedBatches<'_> {
        self.sort_zsorted(technique);
        ZSortedBatches {
            entries: &self.queue(technique).zsorted,
            limit: self.instance_limit,
        }
    }

    /// Buckets of a technique holding at least one shadow caster
    pub fn shadow_caster_buckets(
        &self,
        technique: RenderTechnique,
    ) -> impl Iterator<Item = (&Arc<ModelBuffer>, &MaterialBucket)> {
        self.queue(technique).models.iter().flat_map(|entry| {
            entry
                .slots
                .iter()
                .filter(|slot| slot.shadow_casters > 0)
                .map(move |slot| (&entry.model, slot))
        })
    }

    pub fn is_technique_empty(&self, technique: RenderTechnique) -> bool {
        let queue = self.queue(technique);
        queue.zsorted.is_empty() && queue.models.iter().all(|m| m.is_empty())
    }

    pub fn instance_count(&self, technique: RenderTechnique) -> usize {
        let queue = self.queue(technique);
        queue.zsorted.len()
            + queue
                .models
                .iter()
                .map(|m| m.instance_count())
                .sum::<usize>()
    }

    pub fn zsorted_count(&self, technique: RenderTechnique) -> usize {
        self.queue(technique).zsorted.len()
    }

    pub fn model_entry(&self, technique: RenderTechnique, model: ModelId) -> Option<&ModelEntry> {
        let queue = self.queue(technique);
        queue.model_index.get(&model).map(|&i| &queue.models[i])
    }

    pub fn model_count(&self, technique: RenderTechnique) -> usize {
        self.queue(technique).models.len()
    }

    /// Clear all instance counts for the next frame, keeping allocated storage
    pub fn reset(&mut self) {
        for queue in &mut self.techniques {
            for entry in &mut queue.models {
                entry.clear();
            }
            queue.zsorted.clear();
            queue.zsorted_ordered = true;
        }
        self.stats = QueueStats::default();
    }

    /// Bump the timeout counter of every model entry with nothing queued
    pub(crate) fn increment_empty_timeouts(&mut self) {
        for queue in &mut self.techniques {
            for entry in queue.models.iter_mut().filter(|e| e.is_empty()) {
                entry.timeout_counter += 1;
            }
        }
    }

    /// Remove entries whose timeout reached `checks`, reset the rest. Returns removed count.
    pub(crate) fn remove_timed_out(&mut self, checks: u32) -> usize {
        let mut removed = 0;
        for queue in &mut self.techniques {
            let before = queue.models.len();
            queue.models.retain(|e| e.timeout_counter != checks);
            removed += before - queue.models.len();
            for entry in &mut queue.models {
                entry.timeout_counter = 0;
            }
            if queue.models.len() != before {
                queue.rebuild_index();
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::resources::{Material, Mesh};
    use glam::Mat4;

    fn make_model(device: &mut RecordingDevice, id: u32) -> Arc<ModelBuffer> {
        Arc::new(ModelBuffer::from_mesh(device, ModelId(id), &Mesh::cube()).unwrap())
    }

    fn at(x: f32, y: f32, z: f32) -> RenderInstance {
        RenderInstance::new(Mat4::from_translation(Vec3::new(x, y, z)))
    }

    #[test]
    fn default_material_uses_slot_zero() {
        let mut device = RecordingDevice::new();
        let model = make_model(&mut device, 1);
        let material = Material::new(MaterialId(7), "m").shared();
        let mut queue = RenderQueue::default();

        queue.submit(RenderTechnique::Light, &model, at(0.0, 0.0, 0.0), None);
        queue.submit(RenderTechnique::Light, &model, at(1.0, 0.0, 0.0), Some(&material));
        queue.submit(RenderTechnique::Light, &model, at(2.0, 0.0, 0.0), Some(&material));

        let entry = queue.model_entry(RenderTechnique::Light, ModelId(1)).unwrap();
        assert_eq!(entry.slot_count(), 2);
        assert_eq!(entry.slots()[0].len(), 1);
        assert!(entry.slots()[0].material().is_none());
        assert_eq!(entry.slots()[1].len(), 2);
        assert_eq!(entry.slots()[1].material_id(), Some(MaterialId(7)));
    }

    #[test]
    fn shadow_casters_are_counted() {
        let mut device = RecordingDevice::new();
        let model = make_model(&mut device, 1);
        let mut queue = RenderQueue::default();

        queue.submit(
            RenderTechnique::Light,
            &model,
            at(0.0, 0.0, 0.0).with_flags(InstanceFlags::SHADOW_CASTER),
            None,
        );
        queue.submit(RenderTechnique::Light, &model, at(1.0, 0.0, 0.0), None);

        let buckets: Vec<_> = queue.shadow_caster_buckets(RenderTechnique::Light).collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].1.shadow_casters(), 1);
    }

    #[test]
    fn reset_clears_counts_but_keeps_capacity() {
        let mut device = RecordingDevice::new();
        let model = make_model(&mut device, 1);
        let mut queue = RenderQueue::default();

        for i in 0..50 {
            queue.submit(RenderTechnique::Light, &model, at(i as f32, 0.0, 0.0), None);
        }
        let capacity_before = queue
            .model_entry(RenderTechnique::Light, ModelId(1))
            .unwrap()
            .slots()[0]
            .capacity();

        queue.reset();

        let entry = queue.model_entry(RenderTechnique::Light, ModelId(1)).unwrap();
        assert_eq!(entry.instance_count(), 0);
        assert!(entry.slots()[0].capacity() >= capacity_before);
        assert_eq!(queue.drain(RenderTechnique::Light).count(), 0);
        assert!(queue.is_technique_empty(RenderTechnique::Light));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn large_buckets_split_at_instance_limit() {
        let mut device = RecordingDevice::new();
        let model = make_model(&mut device, 1);
        let mut queue = RenderQueue::new(4);

        for i in 0..10 {
            queue.submit(RenderTechnique::Light, &model, at(i as f32, 0.0, 0.0), None);
        }

        let sizes: Vec<_> = queue
            .drain(RenderTechnique::Light)
            .map(|b| b.instances.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        // Insertion order preserved across the split
        let xs: Vec<_> = queue
            .drain(RenderTechnique::Light)
            .flat_map(|b| b.instances.iter().map(|i| i.position().x))
            .collect();
        assert_eq!(xs, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn zsorted_drain_is_back_to_front() {
        let mut device = RecordingDevice::new();
        let a = make_model(&mut device, 1);
        let b = make_model(&mut device, 2);
        let mut queue = RenderQueue::default();
        let camera = Vec3::ZERO;

        let submissions = [(&a, 3.0), (&b, 9.0), (&a, 1.0), (&b, 5.0), (&a, 7.0), (&a, 7.5)];
        for (model, z) in submissions {
            queue.submit_zsorted(RenderTechnique::LightFade, model, at(0.0, 0.0, z), None, camera);
        }

        let distances: Vec<f32> = queue
            .drain_zsorted(RenderTechnique::LightFade)
            .flat_map(|batch| batch.entries.iter().map(|e| e.distance_sq))
            .collect();
        assert_eq!(distances.len(), submissions.len());
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn zsorted_groups_adjacent_runs_of_the_same_model() {
        let mut device = RecordingDevice::new();
        let a = make_model(&mut device, 1);
        let b = make_model(&mut device, 2);
        let mut queue = RenderQueue::default();

        // Sorted order: A(10) A(9) B(5) A(1)
        for (model, z) in [(&a, 1.0), (&b, 5.0), (&a, 10.0), (&a, 9.0)] {
            queue.submit_zsorted(
                RenderTechnique::LightFade,
                model,
                at(0.0, 0.0, z),
                None,
                Vec3::ZERO,
            );
        }

        let runs: Vec<(ModelId, usize)> = queue
            .drain_zsorted(RenderTechnique::LightFade)
            .map(|batch| (batch.model.id, batch.entries.len()))
            .collect();
        assert_eq!(runs, vec![(ModelId(1), 2), (ModelId(2), 1), (ModelId(1), 1)]);
    }

    #[test]
    fn zsorted_runs_split_at_instance_limit() {
        let mut device = RecordingDevice::new();
        let a = make_model(&mut device, 1);
        let mut queue = RenderQueue::new(2);

        for z in 0..5 {
            queue.submit_zsorted(
                RenderTechnique::LightFade,
                &a,
                at(0.0, 0.0, z as f32),
                None,
                Vec3::ZERO,
            );
        }

        let sizes: Vec<_> = queue
            .drain_zsorted(RenderTechnique::LightFade)
            .map(|b| b.entries.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn zsorted_sort_key_recorded() {
        let mut device = RecordingDevice::new();
        let a = make_model(&mut device, 1);
        let mut queue = RenderQueue::default();
        queue.submit_zsorted(
            RenderTechnique::LightFade,
            &a,
            at(0.0, 3.0, 4.0),
            None,
            Vec3::ZERO,
        );
        let batch = queue
            .drain_zsorted(RenderTechnique::LightFade)
            .next()
            .unwrap();
        assert_eq!(batch.entries[0].distance_sq, 25.0);
        assert_eq!(
            batch.entries[0].instance.sort_key,
            sort_key_from_distance_sq(25.0)
        );
        assert_eq!(queue.stats().zsorted, 1);
    }

    #[test]
    fn effect_helpers_route_to_their_techniques() {
        let mut device = RecordingDevice::new();
        let a = make_model(&mut device, 1);
        let mut queue = RenderQueue::default();
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);

        queue.submit_highlighted(&a, Mat4::IDENTITY, red, None);
        queue.submit_faded(&a, Mat4::IDENTITY, 0.25, None, Vec3::Z);
        queue.submit_faded(&a, Mat4::IDENTITY, 0.0, None, Vec3::Z);
        queue.submit_highlight_faded(&a, Mat4::IDENTITY, red, 0.5, None, Vec3::Z);

        let highlight = queue.model_entry(RenderTechnique::LightHighlight, ModelId(1)).unwrap();
        assert_eq!(highlight.slots()[0].instances()[0].params, red);
        assert_eq!(queue.zsorted_count(RenderTechnique::LightFade), 1);

        let faded = queue.drain_zsorted(RenderTechnique::LightFade).next().unwrap();
        assert_eq!(faded.entries[0].instance.params, Vec4::splat(0.25));

        let both = queue
            .drain_zsorted(RenderTechnique::LightHighlightFade)
            .next()
            .unwrap();
        assert_eq!(both.entries[0].instance.params, Vec4::new(1.0, 0.0, 0.0, 0.5));
    }
}
