//! Environments: 3D grids of fixed-size elements holding tiles, objects and terrain
//!
//! Element coordinates are `(x, y, z)` in grid space with `z` the vertical
//! (deck) axis. The zero-point world transform places element (0, 0, 0) in the
//! world; tile, object and terrain transforms are relative to it.

use std::sync::Arc;

use glam::{IVec3, Mat4, Quat, Vec3, Vec4};

use crate::resources::{ModelBuffer, SharedMaterial};

/// World-space edge length of one element
pub const DEFAULT_ELEMENT_SCALE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SimulationState {
    #[default]
    None,
    Strategic,
    Tactical,
    FullSimulation,
}

/// One grid cell of an environment
#[derive(Debug, Clone)]
pub struct Element {
    location: IVec3,
    health: f32,
    simulation_state: SimulationState,
    outer_hull: bool,
    tiles: Vec<usize>,
    objects: Vec<usize>,
    terrain: Vec<usize>,
}

impl Element {
    fn new(location: IVec3) -> Self {
        Self {
            location,
            health: 1.0,
            simulation_state: SimulationState::None,
            outer_hull: false,
            tiles: Vec::new(),
            objects: Vec::new(),
            terrain: Vec::new(),
        }
    }

    pub fn location(&self) -> IVec3 {
        self.location
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= 0.0
    }

    pub fn simulation_state(&self) -> SimulationState {
        self.simulation_state
    }

    pub fn is_outer_hull_element(&self) -> bool {
        self.outer_hull
    }

    pub fn tiles(&self) -> &[usize] {
        &self.tiles
    }

    pub fn objects(&self) -> &[usize] {
        &self.objects
    }

    pub fn terrain(&self) -> &[usize] {
        &self.terrain
    }
}

/// Model placed inside a compound tile
#[derive(Debug, Clone)]
pub struct CompoundModelPart {
    pub model: Arc<ModelBuffer>,
    pub rotation: Mat4,
    pub offset: Vec3,
}

#[derive(Debug, Clone)]
pub enum TileGeometry {
    Single(Arc<ModelBuffer>),
    Compound(Vec<CompoundModelPart>),
}

/// A tile (room, corridor, fitting) spanning one or more elements
#[derive(Debug, Clone)]
pub struct Tile {
    pub geometry: TileGeometry,
    /// Relative to the environment zero point
    pub world: Mat4,
    pub material: Option<SharedMaterial>,
    /// Active fade alpha, if the tile is fading in or out
    pub fade_alpha: Option<f32>,
    pub highlight: Option<Vec4>,
}

impl Tile {
    pub fn new(model: Arc<ModelBuffer>, world: Mat4) -> Self {
        Self {
            geometry: TileGeometry::Single(model),
            world,
            material: None,
            fade_alpha: None,
            highlight: None,
        }
    }

    pub fn compound(parts: Vec<CompoundModelPart>, world: Mat4) -> Self {
        Self {
            geometry: TileGeometry::Compound(parts),
            world,
            material: None,
            fade_alpha: None,
            highlight: None,
        }
    }
}

/// Dynamic object inside an environment (actor, item)
#[derive(Debug, Clone)]
pub struct EnvironmentObject {
    pub model: Arc<ModelBuffer>,
    /// Relative to the environment zero point
    pub world: Mat4,
    pub radius: f32,
}

/// Static terrain inside an environment
#[derive(Debug, Clone)]
pub struct TerrainObject {
    pub model: Option<Arc<ModelBuffer>>,
    /// Relative to the environment zero point
    pub world: Mat4,
    /// Collision half-extents, rendered as debug boxes on request
    pub extent: Vec3,
}

/// Exterior hull section, rendered unless hull rendering is disabled
#[derive(Debug, Clone)]
pub struct HullSection {
    pub model: Arc<ModelBuffer>,
    /// Relative to the environment zero point
    pub world: Mat4,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct Environment {
    code: String,
    size: IVec3,
    elements: Vec<Element>,
    tiles: Vec<Tile>,
    objects: Vec<EnvironmentObject>,
    terrain: Vec<TerrainObject>,
    sections: Vec<HullSection>,
    zero_point_world: Mat4,
    orientation: Quat,
}

impl Environment {
    /// Create an environment with every element intact and unsimulated
    pub fn new(code: &str, size: IVec3) -> Self {
        let size = size.max(IVec3::ZERO);
        let mut elements = Vec::with_capacity((size.x * size.y * size.z) as usize);
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    elements.push(Element::new(IVec3::new(x, y, z)));
                }
            }
        }

        let mut environment = Self {
            code: code.to_string(),
            size,
            elements,
            tiles: Vec::new(),
            objects: Vec::new(),
            terrain: Vec::new(),
            sections: Vec::new(),
            zero_point_world: Mat4::IDENTITY,
            orientation: Quat::IDENTITY,
        };
        environment.update_outer_hull();
        environment
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn size(&self) -> IVec3 {
        self.size
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    fn index(&self, location: IVec3) -> Option<usize> {
        if location.cmplt(IVec3::ZERO).any() || location.cmpge(self.size).any() {
            return None;
        }
        Some((location.x + location.y * self.size.x + location.z * self.size.x * self.size.y) as usize)
    }

    pub fn element(&self, location: IVec3) -> Option<&Element> {
        self.index(location).map(|i| &self.elements[i])
    }

    pub fn zero_point_world(&self) -> Mat4 {
        self.zero_point_world
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn set_placement(&mut self, zero_point_world: Mat4, orientation: Quat) {
        self.zero_point_world = zero_point_world;
        self.orientation = orientation;
    }

    pub fn set_simulation_state(&mut self, state: SimulationState) {
        for element in &mut self.elements {
            element.simulation_state = state;
        }
    }

    pub fn set_element_simulation_state(&mut self, location: IVec3, state: SimulationState) {
        if let Some(i) = self.index(location) {
            self.elements[i].simulation_state = state;
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile_mut(&mut self, id: usize) -> Option<&mut Tile> {
        self.tiles.get_mut(id)
    }

    pub fn objects(&self) -> &[EnvironmentObject] {
        &self.objects
    }

    pub fn terrain(&self) -> &[TerrainObject] {
        &self.terrain
    }

    pub fn sections(&self) -> &[HullSection] {
        &self.sections
    }

    pub fn add_section(&mut self, section: HullSection) {
        self.sections.push(section);
    }

    /// Add a tile linked to every listed element; out-of-range locations are ignored
    pub fn add_tile(&mut self, tile: Tile, locations: &[IVec3]) -> usize {
        let id = self.tiles.len();
        self.tiles.push(tile);
        for location in locations {
            if let Some(i) = self.index(*location) {
                self.elements[i].tiles.push(id);
            }
        }
        id
    }

    pub fn add_object(&mut self, object: EnvironmentObject, locations: &[IVec3]) -> usize {
        let id = self.objects.len();
        self.objects.push(object);
        for location in locations {
            if let Some(i) = self.index(*location) {
                self.elements[i].objects.push(id);
            }
        }
        id
    }

    pub fn add_terrain(&mut self, terrain: TerrainObject, locations: &[IVec3]) -> usize {
        let id = self.terrain.len();
        self.terrain.push(terrain);
        for location in locations {
            if let Some(i) = self.index(*location) {
                self.elements[i].terrain.push(id);
            }
        }
        id
    }

    /// Set element health and refresh the outer-hull flags around it
    pub fn set_element_health(&mut self, location: IVec3, health: f32) {
        let Some(i) = self.index(location) else {
            return;
        };
        self.elements[i].health = health;
        self.refresh_outer_hull_around(location);
    }

    pub fn destroy_element(&mut self, location: IVec3) {
        self.set_element_health(location, 0.0);
    }

    const NEIGHBOURS: [IVec3; 6] = [
        IVec3::new(-1, 0, 0),
        IVec3::new(1, 0, 0),
        IVec3::new(0, -1, 0),
        IVec3::new(0, 1, 0),
        IVec3::new(0, 0, -1),
        IVec3::new(0, 0, 1),
    ];

    fn compute_outer_hull(&self, location: IVec3) -> bool {
        let Some(element) = self.element(location) else {
            return false;
        };
        if element.is_destroyed() {
            return false;
        }
        Self::NEIGHBOURS.iter().any(|offset| match self.element(location + *offset) {
            None => true,
            Some(neighbour) => neighbour.is_destroyed(),
        })
    }

    fn refresh_outer_hull_around(&mut self, location: IVec3) {
        for offset in std::iter::once(IVec3::ZERO).chain(Self::NEIGHBOURS) {
            let target = location + offset;
            if let Some(i) = self.index(target) {
                self.elements[i].outer_hull = self.compute_outer_hull(target);
            }
        }
    }

    /// Recompute the outer-hull flag of every element
    pub fn update_outer_hull(&mut self) {
        for i in 0..self.elements.len() {
            let location = self.elements[i].location;
            self.elements[i].outer_hull = self.compute_outer_hull(location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undamaged_hull_is_the_grid_boundary() {
        let size = IVec3::new(40, 20, 3);
        let env = Environment::new("test", size);
        assert_eq!(env.element_count(), 40 * 20 * 3);

        for element in env.elements() {
            let l = element.location();
            let boundary = l.x == 0
                || l.y == 0
                || l.z == 0
                || l.x == size.x - 1
                || l.y == size.y - 1
                || l.z == size.z - 1;
            assert_eq!(element.is_outer_hull_element(), boundary, "{:?}", l);
        }
    }

    #[test]
    fn destroying_corner_moves_hull_inwards() {
        let mut env = Environment::new("test", IVec3::new(40, 20, 3));
        env.destroy_element(IVec3::new(0, 0, 0));

        let corner = env.element(IVec3::new(0, 0, 0)).unwrap();
        assert!(corner.is_destroyed());
        assert!(!corner.is_outer_hull_element());
        for l in [IVec3::new(1, 0, 0), IVec3::new(0, 1, 0), IVec3::new(0, 0, 1)] {
            assert!(env.element(l).unwrap().is_outer_hull_element(), "{:?}", l);
        }
    }

    #[test]
    fn destroying_inner_element_exposes_its_neighbours() {
        let mut env = Environment::new("test", IVec3::new(40, 20, 3));
        let target = IVec3::new(10, 10, 1);
        assert!(!env.element(IVec3::new(9, 10, 1)).unwrap().is_outer_hull_element());

        env.destroy_element(target);

        assert!(!env.element(target).unwrap().is_outer_hull_element());
        let hull = [
            IVec3::new(9, 10, 1),
            IVec3::new(11, 10, 1),
            IVec3::new(10, 9, 1),
            IVec3::new(10, 11, 1),
            IVec3::new(10, 10, 0),
            IVec3::new(10, 10, 2),
        ];
        for l in hull {
            assert!(env.element(l).unwrap().is_outer_hull_element(), "{:?}", l);
        }
        // Diagonal neighbours are unaffected
        assert!(!env.element(IVec3::new(9, 9, 1)).unwrap().is_outer_hull_element());
    }

    #[test]
    fn element_lookup_is_bounds_checked() {
        let env = Environment::new("test", IVec3::new(2, 2, 2));
        assert!(env.element(IVec3::new(1, 1, 1)).is_some());
        assert!(env.element(IVec3::new(2, 0, 0)).is_none());
        assert!(env.element(IVec3::new(0, -1, 0)).is_none());
        assert_eq!(
            env.element(IVec3::new(1, 0, 1)).unwrap().location(),
            IVec3::new(1, 0, 1)
        );
    }
}
