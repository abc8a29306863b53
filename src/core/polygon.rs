use serde::{Deserialize, Serialize};

/// Areas below this are treated as empty (line or point contacts)
pub const AREA_EPSILON: f64 = 1e-12;

/// Axis-aligned bounds `(min_x, min_y, max_x, max_y)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Simple polygon stored as an open ring (the closing vertex is implicit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        Self { vertices }
    }

    /// Pixel quadrilateral in `ll -> lu -> uu -> ul` order
    pub fn quad(ll: (f64, f64), lu: (f64, f64), uu: (f64, f64), ul: (f64, f64)) -> Self {
        Self::new(vec![ll, lu, uu, ul])
    }

    /// Axis-aligned rectangle, counter-clockwise
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
        ])
    }

    /// Shoelace area; positive for counter-clockwise rings
    pub fn signed_area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            let (x0, y0) = self.vertices[i];
            let (x1, y1) = self.vertices[(i + 1) % n];
            acc += x0 * y1 - x1 * y0;
        }
        acc / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for &(x, y) in &self.vertices {
            b.min_x = b.min_x.min(x);
            b.min_y = b.min_y.min(y);
            b.max_x = b.max_x.max(x);
            b.max_y = b.max_y.max(y);
        }
        b
    }

    /// At least three finite vertices enclosing a non-zero area
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
            && self
                .vertices
                .iter()
                .all(|(x, y)| x.is_finite() && y.is_finite())
            && self.area() > AREA_EPSILON
    }

    /// Apply a coordinate transform to every vertex
    pub fn map_vertices<F>(&self, f: F) -> Polygon
    where
        F: Fn(f64, f64) -> (f64, f64),
    {
        Polygon::new(self.vertices.iter().map(|&(x, y)| f(x, y)).collect())
    }

    /// Sutherland-Hodgman intersection with a convex polygon; `self` may be
    /// any simple polygon. Returns `None` when the overlap has no area.
    pub fn intersection_convex(&self, convex: &Polygon) -> Option<Polygon> {
        if convex.vertices.len() < 3 || self.vertices.len() < 3 {
            return None;
        }
        // Clip edges must run counter-clockwise so "inside" is to the left
        let clip: Vec<(f64, f64)> = if convex.signed_area() < 0.0 {
            convex.vertices.iter().rev().copied().collect()
        } else {
            convex.vertices.clone()
        };

        let mut output = self.vertices.clone();
        let n = clip.len();
        for i in 0..n {
            if output.is_empty() {
                return None;
            }
            let a = clip[i];
            let b = clip[(i + 1) % n];
            let input = std::mem::take(&mut output);
            let m = input.len();
            for j in 0..m {
                let current = input[j];
                let previous = input[(j + m - 1) % m];
                let cur_in = side(a, b, current) >= 0.0;
                let prev_in = side(a, b, previous) >= 0.0;
                if cur_in {
                    if !prev_in {
                        output.push(segment_intersection(a, b, previous, current));
                    }
                    output.push(current);
                } else if prev_in {
                    output.push(segment_intersection(a, b, previous, current));
                }
            }
        }

        let result = Polygon::new(output);
        if result.area() > AREA_EPSILON {
            Some(result)
        } else {
            None
        }
    }
}

/// Cross product sign of `p` relative to the directed line `a -> b`
fn side(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Intersection of segment `p -> q` with the infinite line through `a -> b`
fn segment_intersection(
    a: (f64, f64),
    b: (f64, f64),
    p: (f64, f64),
    q: (f64, f64),
) -> (f64, f64) {
    let sp = side(a, b, p);
    let sq = side(a, b, q);
    let denom = sp - sq;
    if denom.abs() < f64::MIN_POSITIVE {
        return q;
    }
    let t = sp / denom;
    (p.0 + t * (q.0 - p.0), p.1 + t * (q.1 - p.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_square_area() {
        let sq = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(sq.area(), 1.0);
        assert!(sq.signed_area() > 0.0);
    }

    #[test]
    fn test_half_overlap() {
        let pixel = Polygon::rectangle(0.5, 0.0, 1.5, 1.0);
        let cell = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        let intx = pixel.intersection_convex(&cell).unwrap();
        assert_relative_eq!(intx.area(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_clockwise_clip_polygon() {
        let pixel = Polygon::rectangle(0.25, 0.25, 0.75, 0.75);
        let mut cell = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        cell.vertices.reverse();
        let intx = pixel.intersection_convex(&cell).unwrap();
        assert_relative_eq!(intx.area(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_edge_contact_is_empty() {
        let pixel = Polygon::rectangle(1.0, 0.0, 2.0, 1.0);
        let cell = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        assert!(pixel.intersection_convex(&cell).is_none());
    }

    #[test]
    fn test_rotated_diamond_in_square() {
        // Diamond with vertices on the square's edge midpoints has half its area
        let diamond = Polygon::new(vec![(0.5, 0.0), (1.0, 0.5), (0.5, 1.0), (0.0, 0.5)]);
        let cell = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        let intx = diamond.intersection_convex(&cell).unwrap();
        assert_relative_eq!(intx.area(), 0.5, epsilon = 1e-12);

        let corner = Polygon::rectangle(0.0, 0.0, 0.5, 0.5);
        let piece = diamond.intersection_convex(&corner).unwrap();
        assert_relative_eq!(piece.area(), 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_polygon_invalid() {
        let line = Polygon::quad((0.0, 0.0), (0.0, 1.0), (0.0, 1.0), (0.0, 0.0));
        assert!(!line.is_valid());
        let nan = Polygon::rectangle(0.0, 0.0, f64::NAN, 1.0);
        assert!(!nan.is_valid());
    }
}
