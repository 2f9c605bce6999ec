//! Point and ray queries against single triangles.

use glam::Vec3;

use crate::mesh::Triangle;

/// Hits closer than this to the ray origin are ignored.
const RAY_EPSILON: f32 = 1e-6;

/// Closest point on a triangle to `p`.
///
/// Classifies `p` against the Voronoi regions of the three vertices, the
/// three edges and the face, so the result is exact for every region.
pub fn closest_point_on_triangle(p: Vec3, tri: &Triangle) -> Vec3 {
    let (a, b, c) = (tri.a, tri.b, tri.c);
    let ab = b - a;
    let ac = c - a;

    // Vertex A
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    // Vertex B
    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    // Edge AB
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    // Vertex C
    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    // Edge AC
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    // Edge BC
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    // Face
    let denom = va + vb + vc;
    if denom.abs() <= f32::MIN_POSITIVE {
        // Degenerate sliver: fall back to the nearest vertex.
        return [a, b, c]
            .into_iter()
            .min_by(|x, y| x.distance_squared(p).total_cmp(&y.distance_squared(p)))
            .unwrap_or(a);
    }
    let v = vb / denom;
    let w = vc / denom;
    a + ab * v + ac * w
}

/// Unsigned distance from `p` to a triangle.
#[inline]
pub fn distance_to_triangle(p: Vec3, tri: &Triangle) -> f32 {
    closest_point_on_triangle(p, tri).distance(p)
}

/// Ray/triangle intersection (Möller–Trumbore).
///
/// Returns the ray parameter of the hit, or `None` for misses, hits behind
/// the origin and rays parallel to the triangle.
pub fn ray_triangle_intersect(origin: Vec3, dir: Vec3, tri: &Triangle) -> Option<f32> {
    let e1 = tri.b - tri.a;
    let e2 = tri.c - tri.a;
    let h = dir.cross(e2);
    let det = e1.dot(h);
    if det.abs() < 1e-12 {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - tri.a;
    let u = s.dot(h) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(q) * inv_det;
    (t > RAY_EPSILON).then_some(t)
}
