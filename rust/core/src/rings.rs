// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring measurements used by the hole filter.

use nalgebra::{Point3, Vector3};

/// Planar area of a ring.
///
/// Uses the shoelace formula generalised to 3D (Newell's method): the length of
/// the summed cross products. For a horizontal ring this is exactly the XY
/// shoelace area; for tilted or vertical rings (window openings in walls) it
/// is the true area rather than a collapsed projection.
pub fn ring_area(points: &[Point3<f64>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    // Anchor at the first point to keep the products small for georeferenced input.
    let origin = points[0];
    let mut sum = Vector3::<f64>::zeros();
    for i in 0..n {
        let a = points[i] - origin;
        let b = points[(i + 1) % n] - origin;
        sum += a.cross(&b);
    }

    sum.norm() * 0.5
}

/// Shoelace area over the two horizontal axes (X, Y).
pub fn horizontal_area(points: &[Point3<f64>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    let origin = points[0];
    let mut twice = 0.0;
    for i in 0..n {
        let a = points[i] - origin;
        let b = points[(i + 1) % n] - origin;
        twice += a.x * b.y - b.x * a.y;
    }

    twice.abs() * 0.5
}

/// Drop a trailing point that repeats the first one.
pub fn open_ring<T: PartialEq>(ring: &mut Vec<T>) -> bool {
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(side: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(100_000.0, 400_000.0, 5.0),
            Point3::new(100_000.0 + side, 400_000.0, 5.0),
            Point3::new(100_000.0 + side, 400_000.0 + side, 5.0),
            Point3::new(100_000.0, 400_000.0 + side, 5.0),
        ]
    }

    #[test]
    fn test_square_hole_area() {
        for side in [0.5, 1.0, 3.0, 12.25] {
            let ring = square(side);
            assert!((ring_area(&ring) - side * side).abs() < 1e-9);
            assert!((horizontal_area(&ring) - side * side).abs() < 1e-9);
        }
    }

    #[test]
    fn test_vertical_ring_area() {
        // A 2 x 1.5 window in the XZ plane has no horizontal footprint
        let ring = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 1.5),
            Point3::new(0.0, 0.0, 1.5),
        ];
        assert_relative_eq!(ring_area(&ring), 3.0, epsilon = 1e-12);
        assert_relative_eq!(horizontal_area(&ring), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_ring_area() {
        assert_eq!(ring_area(&square(1.0)[..2]), 0.0);
    }

    #[test]
    fn test_open_ring() {
        let mut ring = vec![1, 2, 3, 1];
        assert!(open_ring(&mut ring));
        assert_eq!(ring, vec![1, 2, 3]);
        assert!(!open_ring(&mut ring));
    }
}
