//! Coordinate frame derivation for the emitting surface.
//!
//! The smoke rises from an arbitrary planar mesh: a floor tile, a tilted roof,
//! a wall. [`PlaneFrame::from_mesh`] turns that mesh into an orthonormal basis
//! plus in-plane extents, which every later stage uses to seed particles, to
//! project them into density-field coordinates and to steer the rise force.
//!
//! # Axes
//!
//! | Axis | Meaning |
//! |------|---------|
//! | `basis_x` | First mesh edge (vertex 0 to vertex 1) |
//! | `basis_y` | Surface normal, the rise direction |
//! | `basis_z` | Second in-plane axis, re-orthogonalized against `basis_x` |

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::mesh::Mesh;

/// Minimum distance a third point must keep from both anchor vertices.
const DISTINCT_POINT_EPSILON: f32 = 1e-6;

/// Orthonormal frame and extents of a planar surface.
///
/// Baked once from a mesh snapshot; later changes to the mesh are not tracked.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneFrame {
    /// Center of the mesh's world bounding box.
    pub origin: Vec3,
    /// In-plane axis along the first edge.
    pub basis_x: Vec3,
    /// Surface normal.
    pub basis_y: Vec3,
    /// In-plane axis perpendicular to `basis_x`.
    pub basis_z: Vec3,
    /// Extent along `basis_x`.
    pub width: f32,
    /// Extent along `basis_z`.
    pub height: f32,
}

impl PlaneFrame {
    /// Derive the frame of a world-space planar mesh.
    ///
    /// Vertex 0 and 1 fix `basis_x`. The third point is the first remaining
    /// vertex far enough from both; line-like meshes fall back to the bounding
    /// box max corner. Extents come from projecting every vertex, so rotated or
    /// non-rectangular outlines still get tight spans.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] if the mesh is empty, has a single vertex, or does
    /// not span a plane.
    pub fn from_mesh(mesh: &Mesh) -> Result<Self, ConfigurationError> {
        let positions = mesh.positions();
        let bounds = mesh.bounds().ok_or(ConfigurationError::NoGeometry)?;
        if positions.len() < 2 {
            return Err(ConfigurationError::TooFewVertices(positions.len()));
        }

        let a = positions[0];
        let b = positions[1];
        let c = positions[2..]
            .iter()
            .copied()
            .find(|p| p.distance(a) > DISTINCT_POINT_EPSILON && p.distance(b) > DISTINCT_POINT_EPSILON)
            .unwrap_or(bounds.max);

        let ab = b - a;
        let basis_x = ab
            .try_normalize()
            .ok_or(ConfigurationError::DegeneratePlane("first two vertices coincide"))?;
        let basis_y = ab
            .cross(c - a)
            .try_normalize()
            .ok_or(ConfigurationError::DegeneratePlane("vertices are collinear"))?;
        let basis_z = basis_y
            .cross(basis_x)
            .try_normalize()
            .ok_or(ConfigurationError::DegeneratePlane("basis collapsed"))?;

        let (mut min, mut max) = (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY));
        for p in positions {
            let projected = Vec2::new(p.dot(basis_x), p.dot(basis_z));
            min = min.min(projected);
            max = max.max(projected);
        }
        let span = max - min;

        Ok(Self {
            origin: bounds.center(),
            basis_x,
            basis_y,
            basis_z,
            width: span.x,
            height: span.y,
        })
    }

    /// Plane-local 2D coordinate of a world point, normalized so the surface
    /// covers `[0, 1]` on both axes with the origin at `(0.5, 0.5)`.
    pub fn project_normalized(&self, point: Vec3) -> Vec2 {
        let local = point - self.origin;
        Vec2::new(
            local.dot(self.basis_x) / self.width.max(f32::EPSILON) + 0.5,
            local.dot(self.basis_z) / self.height.max(f32::EPSILON) + 0.5,
        )
    }

    /// Signed distance of a world point above the surface along the normal.
    pub fn elevation(&self, point: Vec3) -> f32 {
        (point - self.origin).dot(self.basis_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Quat};

    fn assert_orthonormal(frame: &PlaneFrame) {
        let axes = [frame.basis_x, frame.basis_y, frame.basis_z];
        for (i, a) in axes.iter().enumerate() {
            assert!((a.length() - 1.0).abs() < 1e-5, "axis {} not unit: {}", i, a.length());
            for b in axes.iter().skip(i + 1) {
                assert!(a.dot(*b).abs() < 1e-5, "axes not orthogonal: {} . {}", a, b);
            }
        }
    }

    // ========== Frame derivation ==========

    #[test]
    fn test_unit_square_frame() {
        let mesh = Mesh::from_positions(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ]);
        let frame = PlaneFrame::from_mesh(&mesh).unwrap();

        assert!((frame.width - 1.0).abs() < 1e-5);
        assert!((frame.height - 1.0).abs() < 1e-5);
        assert!((frame.origin - Vec3::new(0.5, 0.0, 0.5)).length() < 1e-5);
        assert!((frame.basis_x - Vec3::X).length() < 1e-5);
        assert!(frame.basis_y.cross(Vec3::Y).length() < 1e-5);
        assert_orthonormal(&frame);
    }

    #[test]
    fn test_quad_normal_points_up() {
        let frame = PlaneFrame::from_mesh(&Mesh::quad(2.0, 3.0)).unwrap();
        assert!((frame.basis_y - Vec3::Y).length() < 1e-5);
        assert!((frame.width - 2.0).abs() < 1e-5);
        assert!((frame.height - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_rotated_scaled_plane_is_orthonormal() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::new(3.0, 1.0, 0.25),
            Quat::from_euler(glam::EulerRot::XYZ, 0.7, -1.3, 2.1),
            Vec3::new(5.0, -2.0, 8.0),
        );
        let mesh = Mesh::quad(4.0, 1.5).transformed(transform);
        let frame = PlaneFrame::from_mesh(&mesh).unwrap();

        assert_orthonormal(&frame);
        for p in mesh.positions() {
            assert!(frame.elevation(*p).abs() < 1e-3);
        }
    }

    #[test]
    fn test_extents_cover_rotated_outline() {
        // Diamond outline: first edge runs diagonally.
        let mesh = Mesh::from_positions(vec![
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 0.0),
        ]);
        let frame = PlaneFrame::from_mesh(&mesh).unwrap();
        assert_orthonormal(&frame);
        let side = 2.0_f32.sqrt();
        assert!((frame.width - side).abs() < 1e-4);
        assert!((frame.height - side).abs() < 1e-4);
        for p in mesh.positions() {
            let uv = frame.project_normalized(*p);
            assert!(uv.x > -1e-4 && uv.x < 1.0 + 1e-4);
            assert!(uv.y > -1e-4 && uv.y < 1.0 + 1e-4);
        }
    }

    #[test]
    fn test_duplicate_vertices_skipped_for_third_point() {
        let mesh = Mesh::from_positions(vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.0, 0.0, 2.0),
        ]);
        let frame = PlaneFrame::from_mesh(&mesh).unwrap();
        assert_orthonormal(&frame);
        assert!(frame.basis_y.cross(Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_line_like_mesh_uses_bounds_corner() {
        // Only two distinct points plus a duplicate; bbox max (1, 0, 0.5) breaks the tie.
        let mesh = Mesh::from_positions(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.5),
            Vec3::new(1.0, 0.0, 0.5),
        ]);
        // Max corner is collinear with A and B here, so no plane exists.
        assert!(matches!(
            PlaneFrame::from_mesh(&mesh),
            Err(ConfigurationError::DegeneratePlane(_))
        ));

        let mesh = Mesh::from_positions(vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)]);
        assert!(PlaneFrame::from_mesh(&mesh).is_ok());

        // Two vertices only: fallback corner (1, 0, 0) equals B, still degenerate.
        let mesh = Mesh::from_positions(vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)]);
        assert!(PlaneFrame::from_mesh(&mesh).is_err());

        // Two vertices whose bbox max differs from both gives a usable frame.
        let mesh = Mesh::from_positions(vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 0.0, 0.0)]);
        let frame = PlaneFrame::from_mesh(&mesh).unwrap();
        assert_orthonormal(&frame);
    }

    // ========== Failures ==========

    #[test]
    fn test_empty_mesh_is_configuration_error() {
        let err = PlaneFrame::from_mesh(&Mesh::default()).unwrap_err();
        assert_eq!(err, ConfigurationError::NoGeometry);
    }

    #[test]
    fn test_single_vertex_is_configuration_error() {
        let err = PlaneFrame::from_mesh(&Mesh::from_positions(vec![Vec3::ONE])).unwrap_err();
        assert_eq!(err, ConfigurationError::TooFewVertices(1));
    }

    #[test]
    fn test_project_normalized_center() {
        let frame = PlaneFrame::from_mesh(&Mesh::quad(2.0, 2.0)).unwrap();
        let uv = frame.project_normalized(Vec3::new(0.0, 0.7, 0.0));
        assert!((uv - Vec2::splat(0.5)).length() < 1e-6);
    }
}
