//! World-space triangle geometry consumed by the plane analyzer and the SDF baker.
//!
//! Meshes are plain snapshots: positions are already in world space, so a
//! transform has to be baked in with [`Mesh::transformed`] before handing the
//! mesh over. Nothing here tracks later changes to the source object.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a box from its corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first, first);
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    /// Grow the box to contain `point`.
    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow the box to contain `other`.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Expand uniformly by `padding` on every side.
    pub fn expanded(&self, padding: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(padding), self.max + Vec3::splat(padding))
    }

    /// Edge lengths.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Length of the main diagonal.
    #[inline]
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Whether `point` lies inside or on the box.
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// One world-space triangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Unnormalized face normal (length = twice the area).
    pub fn scaled_normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a)
    }
}

/// A triangle mesh with world-space positions.
///
/// Without indices, consecutive position triples form triangles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    positions: Vec<Vec3>,
    indices: Option<Vec<u32>>,
}

impl Mesh {
    /// Non-indexed mesh: every three positions form a triangle.
    pub fn from_positions(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            indices: None,
        }
    }

    /// Indexed mesh.
    pub fn indexed(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices: Some(indices),
        }
    }

    /// Flat rectangle of the given size in the XZ plane, centered at the origin.
    ///
    /// The winding makes the derived surface normal point along +Y.
    pub fn quad(width: f32, height: f32) -> Self {
        let hw = width * 0.5;
        let hh = height * 0.5;
        Self::indexed(
            vec![
                Vec3::new(-hw, 0.0, hh),
                Vec3::new(hw, 0.0, hh),
                Vec3::new(hw, 0.0, -hh),
                Vec3::new(-hw, 0.0, -hh),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    /// Closed axis-aligned box with outward-facing triangles.
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> Self {
        let positions = (0..8)
            .map(|i| {
                let sign = Vec3::new(
                    if i & 1 == 0 { -1.0 } else { 1.0 },
                    if i & 2 == 0 { -1.0 } else { 1.0 },
                    if i & 4 == 0 { -1.0 } else { 1.0 },
                );
                center + sign * half_extents
            })
            .collect();

        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -Z
            4, 5, 6, 5, 7, 6, // +Z
            0, 1, 4, 1, 5, 4, // -Y
            2, 6, 3, 3, 6, 7, // +Y
            0, 4, 2, 2, 4, 6, // -X
            1, 3, 5, 3, 7, 5, // +X
        ];

        Self::indexed(positions, indices)
    }

    /// Axis-aligned cube with the given edge length.
    pub fn cube(center: Vec3, edge: f32) -> Self {
        Self::cuboid(center, Vec3::splat(edge * 0.5))
    }

    /// Copy of this mesh with `transform` baked into every position.
    pub fn transformed(&self, transform: Mat4) -> Self {
        Self {
            positions: self
                .positions
                .iter()
                .map(|&p| transform.transform_point3(p))
                .collect(),
            indices: self.indices.clone(),
        }
    }

    /// World-space vertex positions.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Triangle indices, if the mesh is indexed.
    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Whether the mesh has no vertices.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// World bounding box, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Iterate triangles in world space.
    ///
    /// Trailing indices/positions that do not complete a triangle, and indices
    /// pointing past the vertex list, are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        let corners: Box<dyn Iterator<Item = [usize; 3]> + '_> = match &self.indices {
            Some(indices) => Box::new(
                indices
                    .chunks_exact(3)
                    .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize]),
            ),
            None => Box::new((0..self.positions.len() / 3).map(|t| [t * 3, t * 3 + 1, t * 3 + 2])),
        };

        corners.filter_map(move |[a, b, c]| {
            Some(Triangle::new(
                *self.positions.get(a)?,
                *self.positions.get(b)?,
                *self.positions.get(c)?,
            ))
        })
    }
}

/// A collection of world-space meshes, e.g. everything the smoke can hit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    meshes: Vec<Mesh>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mesh (builder style).
    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    /// Add a mesh.
    pub fn push(&mut self, mesh: Mesh) {
        self.meshes.push(mesh);
    }

    /// All meshes in insertion order.
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Every triangle of every mesh, flattened.
    pub fn triangles(&self) -> Vec<Triangle> {
        self.meshes.iter().flat_map(|m| m.triangles()).collect()
    }

    /// World bounding box of all meshes.
    pub fn bounds(&self) -> Option<Aabb> {
        self.meshes
            .iter()
            .filter_map(Mesh::bounds)
            .reduce(|a, b| a.union(&b))
    }
}

impl From<Mesh> for Scene {
    fn from(mesh: Mesh) -> Self {
        Scene::new().with_mesh(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_points() {
        let bounds = Aabb::from_points([
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 3.0, 0.5),
            Vec3::new(0.0, 0.0, -4.0),
        ])
        .unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, -4.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(Aabb::from_points(std::iter::empty::<Vec3>()).is_none());
    }

    #[test]
    fn test_aabb_expanded() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE).expanded(0.5);
        assert_eq!(bounds.min, Vec3::splat(-0.5));
        assert_eq!(bounds.max, Vec3::splat(1.5));
        assert!((bounds.center() - Vec3::splat(0.5)).length() < 1e-6);
    }

    #[test]
    fn test_cube_triangle_count() {
        let cube = Mesh::cube(Vec3::ZERO, 1.0);
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.triangles().count(), 12);
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = Mesh::cube(Vec3::ZERO, 1.0);
        for tri in cube.triangles() {
            let centroid = (tri.a + tri.b + tri.c) / 3.0;
            assert!(tri.scaled_normal().dot(centroid) > 0.0);
        }
    }

    #[test]
    fn test_non_indexed_triangles_skip_tail() {
        let mesh = Mesh::from_positions(vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z]);
        assert_eq!(mesh.triangles().count(), 1);
    }

    #[test]
    fn test_out_of_range_indices_skipped() {
        let mesh = Mesh::indexed(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2, 0, 1, 9]);
        assert_eq!(mesh.triangles().count(), 1);
    }

    #[test]
    fn test_transformed_bakes_translation() {
        let mesh = Mesh::quad(2.0, 2.0).transformed(Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)));
        let bounds = mesh.bounds().unwrap();
        assert!((bounds.min.y - 3.0).abs() < 1e-6);
        assert!((bounds.max.y - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_scene_bounds_union() {
        let scene = Scene::new()
            .with_mesh(Mesh::cube(Vec3::ZERO, 1.0))
            .with_mesh(Mesh::cube(Vec3::new(3.0, 0.0, 0.0), 1.0));
        let bounds = scene.bounds().unwrap();
        assert!((bounds.min.x + 0.5).abs() < 1e-6);
        assert!((bounds.max.x - 3.5).abs() < 1e-6);
        assert_eq!(scene.triangles().len(), 24);
    }
}
