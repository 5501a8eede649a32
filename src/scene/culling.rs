//! Frustum culling and environment traversal
//!
//! Environments are walked by recursive binary subdivision of their element
//! grid. Each sector is tested against the frustum with a bounding sphere; a
//! culled sector removes its whole subtree, and visible 1x1x1 sectors have
//! their contents submitted to the render queue.

use std::sync::Arc;

use glam::{IVec3, Mat4, Vec3, Vec4};

use crate::render_queue::{RenderInstance, RenderQueue, RenderTechnique, FADE_EPSILON};
use crate::resources::{ModelBuffer, SharedMaterial};
use crate::scene::{
    Camera, Environment, Frustum, SimulationState, Tile, TileGeometry, DEFAULT_ELEMENT_SCALE,
};

/// Size of the precomputed sector radius table
pub const ELEMENT_RADIUS_CACHE_SIZE: usize = 1000;

/// Per-environment traversal constants, computed once per environment per frame
#[derive(Debug, Clone, Copy)]
pub struct TraversalContext {
    /// World position of element (0, 0, 0)
    pub zero_point: Vec3,
    /// World-space step for +x, +z (vertical) and +y element moves
    pub basis: [Vec3; 3],
}

impl TraversalContext {
    pub fn new(environment: &Environment, element_scale: f32) -> Self {
        let zero_point = environment.zero_point_world().transform_point3(Vec3::ZERO);
        let orientation = environment.orientation();
        Self {
            zero_point,
            basis: [
                orientation * Vec3::new(element_scale, 0.0, 0.0),
                orientation * Vec3::new(0.0, element_scale, 0.0),
                orientation * Vec3::new(0.0, 0.0, element_scale),
            ],
        }
    }

    /// World-space centre of a sector; grid y/z swap onto world z/y
    pub fn sector_centre(&self, start: IVec3, size: IVec3) -> Vec3 {
        let m = start.as_vec3() + size.as_vec3() * 0.5;
        self.zero_point + self.basis[0] * m.x + self.basis[1] * m.z + self.basis[2] * m.y
    }
}

/// Midpoint at which a sector dimension is split; ceiling for odd sizes
pub fn split_midpoint(size: IVec3) -> IVec3 {
    let half = |s: i32| if s & 1 == 1 { (s + 1) / 2 } else { s / 2 };
    IVec3::new(half(size.x), half(size.y), half(size.z))
}

/// Counters for one frame of culling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    pub sectors_tested: u32,
    pub sectors_culled: u32,
    pub elements_rendered: u32,
    pub tiles_rendered: u32,
    pub objects_rendered: u32,
    pub terrain_rendered: u32,
    pub sections_rendered: u32,
}

/// Items already rendered this traversal, kept sorted for binary search
#[derive(Debug, Default)]
struct RenderedItems {
    tiles: Vec<usize>,
    objects: Vec<usize>,
    terrain: Vec<usize>,
}

/// Insert into a sorted vector; false if already present
fn insert_if_absent(items: &mut Vec<usize>, id: usize) -> bool {
    match items.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            items.insert(pos, id);
            true
        }
    }
}

pub struct SpatialCuller {
    frustum: Frustum,
    element_scale: f32,
    radius_cache: Vec<f32>,
    stats: CullStats,
}

impl Default for SpatialCuller {
    fn default() -> Self {
        Self::new(DEFAULT_ELEMENT_SCALE)
    }
}

impl SpatialCuller {
    pub fn new(element_scale: f32) -> Self {
        let radius_cache = (0..=ELEMENT_RADIUS_CACHE_SIZE)
            .map(|n| Self::compute_radius(n, element_scale))
            .collect();
        Self {
            frustum: Frustum::default(),
            element_scale,
            radius_cache,
            stats: CullStats::default(),
        }
    }

    fn compute_radius(elements: usize, element_scale: f32) -> f32 {
        let half_extent = elements as f32 * element_scale * 0.5;
        (3.0 * half_extent * half_extent).sqrt()
    }

    pub fn element_scale(&self) -> f32 {
        self.element_scale
    }

    /// Radius of the sphere enclosing a cube of `elements` elements per side
    pub fn element_bounding_radius(&self, elements: i32) -> f32 {
        let n = elements.max(0) as usize;
        match self.radius_cache.get(n) {
            Some(r) => *r,
            None => Self::compute_radius(n, self.element_scale),
        }
    }

    /// Rebuild the frustum for this frame; must precede any visibility test
    pub fn construct_frustum(&mut self, view: Mat4, projection: Mat4) {
        self.frustum = Frustum::new(view, projection);
        self.stats = CullStats::default();
    }

    /// Frustum for a camera; jitter is excluded so culling is stable across frames
    pub fn construct_frustum_from_camera(&mut self, camera: &Camera) {
        self.construct_frustum(camera.view_matrix(), camera.unjittered_projection_matrix());
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn stats(&self) -> CullStats {
        self.stats
    }

    pub fn test_sphere(&self, centre: Vec3, radius: f32) -> bool {
        self.frustum.intersects_sphere(centre, radius)
    }

    /// Visit every visible 1x1x1 cell of the sector `[start, start + size)`
    pub fn traverse_environment_sector(
        &mut self,
        context: &TraversalContext,
        start: IVec3,
        size: IVec3,
        visit: &mut dyn FnMut(IVec3),
    ) {
        if size.x <= 0 || size.y <= 0 || size.z <= 0 {
            return;
        }

        let centre = context.sector_centre(start, size);
        let radius = self.element_bounding_radius(size.max_element());
        self.stats.sectors_tested += 1;
        if !self.test_sphere(centre, radius) {
            self.stats.sectors_culled += 1;
            return;
        }

        if size == IVec3::ONE {
            visit(start);
            return;
        }

        let mid = split_midpoint(size);
        let sp = start + mid;
        let rem = size - mid;

        let octants = [
            (start, mid),
            (IVec3::new(sp.x, start.y, start.z), IVec3::new(rem.x, mid.y, mid.z)),
            (IVec3::new(start.x, sp.y, start.z), IVec3::new(mid.x, rem.y, mid.z)),
            (IVec3::new(sp.x, sp.y, start.z), IVec3::new(rem.x, rem.y, mid.z)),
            (IVec3::new(start.x, start.y, sp.z), IVec3::new(mid.x, mid.y, rem.z)),
            (IVec3::new(sp.x, start.y, sp.z), IVec3::new(rem.x, mid.y, rem.z)),
            (IVec3::new(start.x, sp.y, sp.z), IVec3::new(mid.x, rem.y, rem.z)),
            (sp, rem),
        ];
        for (octant_start, octant_size) in octants {
            self.traverse_environment_sector(context, octant_start, octant_size, visit);
        }
    }

    /// Submit the visible interior of an environment to the render queue
    pub fn render_environment(
        &mut self,
        environment: &Environment,
        queue: &mut RenderQueue,
        camera_position: Vec3,
    ) {
        let context = TraversalContext::new(environment, self.element_scale);
        let mut rendered = RenderedItems::default();
        let mut visible = Vec::new();

        self.traverse_environment_sector(
            &context,
            IVec3::ZERO,
            environment.size(),
            &mut |location| visible.push(location),
        );

        for location in visible {
            self.render_element_contents(environment, location, queue, camera_position, &mut rendered);
        }
    }

    /// Submit visible hull sections of an environment; returns whether any were visible
    pub fn render_environment_hull(
        &mut self,
        environment: &Environment,
        queue: &mut RenderQueue,
        hull_rendering_disabled: bool,
    ) -> bool {
        let zero_point_world = environment.zero_point_world();
        let mut any_visible = false;
        for section in environment.sections() {
            let world = zero_point_world * section.world;
            if !self.test_sphere(world.transform_point3(Vec3::ZERO), section.radius) {
                continue;
            }
            any_visible = true;
            if !hull_rendering_disabled {
                queue.submit(RenderTechnique::Light, &section.model, RenderInstance::new(world), None);
                self.stats.sections_rendered += 1;
            }
        }
        any_visible
    }

    fn render_element_contents(
        &mut self,
        environment: &Environment,
        location: IVec3,
        queue: &mut RenderQueue,
        camera_position: Vec3,
        rendered: &mut RenderedItems,
    ) {
        let Some(element) = environment.element(location) else {
            return;
        };
        if element.simulation_state() != SimulationState::FullSimulation {
            return;
        }
        self.stats.elements_rendered += 1;
        let zero_point_world = environment.zero_point_world();

        for &id in element.tiles() {
            if !insert_if_absent(&mut rendered.tiles, id) {
                continue;
            }
            if let Some(tile) = environment.tiles().get(id) {
                let world = zero_point_world * tile.world;
                if submit_tile(queue, tile, world, camera_position) {
                    self.stats.tiles_rendered += 1;
                }
            }
        }

        for &id in element.objects() {
            if !insert_if_absent(&mut rendered.objects, id) {
                continue;
            }
            let Some(object) = environment.objects().get(id) else {
                continue;
            };
            let world = zero_point_world * object.world;
            if !self.test_sphere(world.transform_point3(Vec3::ZERO), object.radius) {
                continue;
            }
            queue.submit(RenderTechnique::Light, &object.model, RenderInstance::new(world), None);
            self.stats.objects_rendered += 1;
        }

        for &id in element.terrain() {
            if !insert_if_absent(&mut rendered.terrain, id) {
                continue;
            }
            let Some(terrain) = environment.terrain().get(id) else {
                continue;
            };
            let Some(model) = &terrain.model else {
                continue;
            };
            let world = zero_point_world * terrain.world;
            queue.submit(RenderTechnique::Light, model, RenderInstance::new(world), None);
            self.stats.terrain_rendered += 1;
        }

        log::trace!("Rendered contents of element {:?} in {}", location, environment.code());
    }
}

fn submit_model(
    queue: &mut RenderQueue,
    model: &Arc<ModelBuffer>,
    world: Mat4,
    material: Option<&SharedMaterial>,
    fade_alpha: Option<f32>,
    highlight: Option<Vec4>,
    camera_position: Vec3,
) {
    match (fade_alpha, highlight) {
        (Some(alpha), _) => queue.submit_faded(model, world, alpha, material, camera_position),
        (None, Some(colour)) => queue.submit_highlighted(model, world, colour, material),
        (None, None) => queue.submit(RenderTechnique::Light, model, RenderInstance::new(world), material),
    }
}

/// Queue a tile by its effect state; false if it was rejected as fully faded
fn submit_tile(queue: &mut RenderQueue, tile: &Tile, world: Mat4, camera_position: Vec3) -> bool {
    if let Some(alpha) = tile.fade_alpha {
        if alpha < FADE_EPSILON {
            return false;
        }
    }

    let material = tile.material.as_ref();
    match &tile.geometry {
        TileGeometry::Single(model) => submit_model(
            queue,
            model,
            world,
            material,
            tile.fade_alpha,
            tile.highlight,
            camera_position,
        ),
        TileGeometry::Compound(parts) => {
            // Compound tiles propagate fade but not highlight to their parts
            for part in parts {
                let part_world = Mat4::from_translation(part.offset) * world * part.rotation;
                submit_model(
                    queue,
                    &part.model,
                    part_world,
                    material,
                    tile.fade_alpha,
                    None,
                    camera_position,
                );
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::resources::{Mesh, ModelId};
    use crate::scene::{EnvironmentObject, HullSection, TerrainObject};
    use std::collections::HashSet;

    fn wide_open_culler() -> SpatialCuller {
        let mut culler = SpatialCuller::default();
        // Camera far back looking at the origin with a wide frustum
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5000.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(2.5, 1.0, 1.0, 100_000.0);
        culler.construct_frustum(view, projection);
        culler
    }

    fn model(device: &mut RecordingDevice, id: u32) -> Arc<ModelBuffer> {
        Arc::new(ModelBuffer::from_mesh(device, ModelId(id), &Mesh::cube()).unwrap())
    }

    #[test]
    fn midpoint_rounds_up_for_odd_sizes() {
        assert_eq!(split_midpoint(IVec3::new(1, 2, 3)), IVec3::new(1, 1, 2));
        assert_eq!(split_midpoint(IVec3::new(7, 8, 40)), IVec3::new(4, 4, 20));
    }

    #[test]
    fn subdivision_visits_every_cell_exactly_once() {
        let mut culler = wide_open_culler();
        let env = Environment::new("grid", IVec3::ONE);
        let context = TraversalContext::new(&env, 0.001);

        for size in [
            IVec3::new(1, 1, 1),
            IVec3::new(2, 1, 1),
            IVec3::new(3, 5, 7),
            IVec3::new(40, 20, 3),
            IVec3::new(9, 1, 16),
        ] {
            let mut visited = Vec::new();
            culler.traverse_environment_sector(&context, IVec3::ZERO, size, &mut |l| visited.push(l));

            let unique: HashSet<_> = visited.iter().copied().collect();
            assert_eq!(visited.len(), (size.x * size.y * size.z) as usize, "{:?}", size);
            assert_eq!(unique.len(), visited.len(), "duplicate visits for {:?}", size);
            assert!(visited
                .iter()
                .all(|l| l.cmpge(IVec3::ZERO).all() && l.cmplt(size).all()));
        }
    }

    #[test]
    fn degenerate_sizes_are_no_ops() {
        let mut culler = wide_open_culler();
        let env = Environment::new("grid", IVec3::ONE);
        let context = TraversalContext::new(&env, DEFAULT_ELEMENT_SCALE);
        let mut visited = 0;
        culler.traverse_environment_sector(&context, IVec3::ZERO, IVec3::new(4, 0, 4), &mut |_| visited += 1);
        culler.traverse_environment_sector(&context, IVec3::ZERO, IVec3::new(-1, 2, 2), &mut |_| visited += 1);
        assert_eq!(visited, 0);
        assert_eq!(culler.stats().sectors_tested, 0);
    }

    #[test]
    fn culled_sector_skips_subtree() {
        let mut culler = SpatialCuller::default();
        // Looking away from the environment
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, -100.0), Vec3::new(0.0, 0.0, -200.0), Vec3::Y);
        culler.construct_frustum(view, Mat4::perspective_rh(1.0, 1.0, 1.0, 1000.0));

        let env = Environment::new("behind", IVec3::new(8, 8, 8));
        let context = TraversalContext::new(&env, DEFAULT_ELEMENT_SCALE);
        let mut visited = 0;
        culler.traverse_environment_sector(&context, IVec3::ZERO, env.size(), &mut |_| visited += 1);

        assert_eq!(visited, 0);
        assert_eq!(culler.stats().sectors_tested, 1);
        assert_eq!(culler.stats().sectors_culled, 1);
    }

    #[test]
    fn radius_table_matches_formula() {
        let culler = SpatialCuller::new(10.0);
        assert_eq!(culler.element_bounding_radius(0), 0.0);
        assert!((culler.element_bounding_radius(2) - 300.0f32.sqrt()).abs() < 1e-4);
        let beyond = culler.element_bounding_radius(2000);
        assert!((beyond - (3.0f32 * 10000.0 * 10000.0).sqrt()).abs() < 1e-1);
    }

    #[test]
    fn sector_centre_swaps_grid_y_and_z() {
        let env = Environment::new("grid", IVec3::new(4, 4, 4));
        let context = TraversalContext::new(&env, 10.0);
        let centre = context.sector_centre(IVec3::new(0, 2, 0), IVec3::ONE);
        assert_eq!(centre, Vec3::new(5.0, 5.0, 25.0));
    }

    #[test]
    fn spanning_items_render_once_and_require_full_simulation() {
        let mut device = RecordingDevice::new();
        let tile_model = model(&mut device, 1);
        let object_model = model(&mut device, 2);
        let terrain_model = model(&mut device, 3);

        let mut env = Environment::new("ship", IVec3::new(4, 4, 2));
        let span = [IVec3::new(0, 0, 0), IVec3::new(1, 0, 0), IVec3::new(1, 1, 0)];
        env.add_tile(Tile::new(tile_model.clone(), Mat4::IDENTITY), &span);
        env.add_object(
            EnvironmentObject {
                model: object_model.clone(),
                world: Mat4::from_translation(Vec3::new(5.0, 0.0, 5.0)),
                radius: 2.0,
            },
            &span,
        );
        env.add_terrain(
            TerrainObject {
                model: Some(terrain_model.clone()),
                world: Mat4::IDENTITY,
                extent: Vec3::ONE,
            },
            &span,
        );

        let mut culler = wide_open_culler();
        let mut queue = RenderQueue::default();

        culler.render_environment(&env, &mut queue, Vec3::ZERO);
        assert_eq!(queue.instance_count(RenderTechnique::Light), 0);

        env.set_simulation_state(SimulationState::FullSimulation);
        culler.render_environment(&env, &mut queue, Vec3::ZERO);

        let count = |id: u32| {
            queue
                .model_entry(RenderTechnique::Light, ModelId(id))
                .map(|e| e.instance_count())
                .unwrap_or(0)
        };
        assert_eq!(count(1), 1);
        assert_eq!(count(2), 1);
        assert_eq!(count(3), 1);
        assert_eq!(culler.stats().tiles_rendered, 1);
    }

    #[test]
    fn tile_effects_select_technique() {
        let mut device = RecordingDevice::new();
        let m = model(&mut device, 1);
        let mut env = Environment::new("ship", IVec3::new(3, 1, 1));
        env.set_simulation_state(SimulationState::FullSimulation);

        let mut faded = Tile::new(m.clone(), Mat4::IDENTITY);
        faded.fade_alpha = Some(0.5);
        let mut invisible = Tile::new(m.clone(), Mat4::IDENTITY);
        invisible.fade_alpha = Some(0.0);
        let mut highlighted = Tile::new(m.clone(), Mat4::IDENTITY);
        highlighted.highlight = Some(Vec4::new(1.0, 0.0, 0.0, 1.0));

        env.add_tile(faded, &[IVec3::new(0, 0, 0)]);
        env.add_tile(invisible, &[IVec3::new(1, 0, 0)]);
        env.add_tile(highlighted, &[IVec3::new(2, 0, 0)]);

        let mut culler = wide_open_culler();
        let mut queue = RenderQueue::default();
        culler.render_environment(&env, &mut queue, Vec3::new(0.0, 0.0, 100.0));

        assert_eq!(queue.zsorted_count(RenderTechnique::LightFade), 1);
        assert_eq!(queue.instance_count(RenderTechnique::LightHighlight), 1);
        assert_eq!(queue.instance_count(RenderTechnique::Light), 0);
        assert_eq!(culler.stats().tiles_rendered, 2);
    }

    #[test]
    fn hull_sections_respect_disable_flag() {
        let mut device = RecordingDevice::new();
        let m = model(&mut device, 9);
        let mut env = Environment::new("ship", IVec3::new(2, 2, 2));
        env.add_section(HullSection {
            model: m,
            world: Mat4::IDENTITY,
            radius: 10.0,
        });

        let mut culler = wide_open_culler();
        let mut queue = RenderQueue::default();
        assert!(culler.render_environment_hull(&env, &mut queue, true));
        assert_eq!(queue.instance_count(RenderTechnique::Light), 0);
        assert!(culler.render_environment_hull(&env, &mut queue, false));
        assert_eq!(queue.instance_count(RenderTechnique::Light), 1);
    }
}
