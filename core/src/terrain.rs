//! Terrain model for the lander simulation.
//!
//! The world is a vertical 2-D slice: `x` runs horizontally from `0` to the world width and `y`
//! points up from the bottom of the world. The ground is a polyline whose vertices are sorted by
//! `x` and span the full width. Range sensors measure distance to the ground by casting rays
//! against every polyline segment and keeping the closest hit.
use nalgebra::{Point2, Vector2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;

/// Fraction of the world height that the highest terrain vertex may reach
pub const MAX_TERRAIN_HEIGHT_FRACTION: f64 = 0.25;

/// Ground polyline with vertices sorted by ascending `x`.
#[derive(Clone, Debug, PartialEq)]
pub struct Terrain {
    vertices: Vec<Point2<f64>>,
}

/// CSV row for a single terrain vertex
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainVertex {
    pub x: f64,
    pub y: f64,
}

impl Terrain {
    /// Build a terrain from explicit vertices.
    ///
    /// # Errors
    /// Returns an error if fewer than two vertices are given, a coordinate is not finite, or the
    /// vertices are not sorted by `x`.
    pub fn from_points(vertices: Vec<Point2<f64>>) -> Result<Self, Box<dyn Error>> {
        if vertices.len() < 2 {
            return Err("terrain requires at least two vertices".into());
        }
        if vertices
            .iter()
            .any(|v| !(v.x.is_finite() && v.y.is_finite()))
        {
            return Err("terrain vertices must be finite".into());
        }
        if vertices.windows(2).any(|pair| pair[1].x < pair[0].x) {
            return Err("terrain vertices must be sorted by x".into());
        }
        Ok(Terrain { vertices })
    }

    /// Generate a random terrain spanning `[0, width]`.
    ///
    /// Each vertex is placed at a rounded uniform `x` in `[0, width]` and a rounded uniform height
    /// in `[0, 0.25 * height]`. The first and last vertices are pinned to the world edges before
    /// the vertices are sorted by `x`.
    pub fn generate<R: Rng + ?Sized>(
        width: f64,
        height: f64,
        num_points: usize,
        rng: &mut R,
    ) -> Result<Self, Box<dyn Error>> {
        if num_points < 2 {
            return Err("terrain requires at least two vertices".into());
        }
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(format!("invalid world size {width} x {height}").into());
        }
        let max_height = height * MAX_TERRAIN_HEIGHT_FRACTION;
        let min_height = 0.0;
        let mut vertices: Vec<Point2<f64>> = (0..num_points)
            .map(|_| {
                let x = (rng.random::<f64>() * width).round();
                let y = (rng.random::<f64>() * (max_height - min_height) + min_height).round();
                Point2::new(x, y)
            })
            .collect();
        vertices[0].x = 0.0;
        vertices[num_points - 1].x = width;
        vertices.sort_by(|a, b| a.x.total_cmp(&b.x));
        Terrain::from_points(vertices)
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    /// Ground height at horizontal position `x` by linear interpolation.
    ///
    /// Returns `None` outside the horizontal extent of the terrain.
    pub fn height_at(&self, x: f64) -> Option<f64> {
        let first = self.vertices.first()?;
        let last = self.vertices.last()?;
        if x < first.x || x > last.x {
            return None;
        }
        self.vertices.windows(2).find_map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            if x < a.x || x > b.x {
                return None;
            }
            let span = b.x - a.x;
            if span == 0.0 {
                Some(a.y.max(b.y))
            } else {
                Some(a.y + (b.y - a.y) * (x - a.x) / span)
            }
        })
    }

    /// Distance from `origin` to the nearest terrain segment along a ray at `angle` (radians,
    /// counter-clockwise from +x). `None` if the ray misses the terrain.
    pub fn distance_along(&self, origin: &Point2<f64>, angle: f64) -> Option<f64> {
        self.vertices
            .windows(2)
            .filter_map(|pair| raycast(origin, angle, &pair[0], &pair[1]))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Write the vertices to a CSV file with `x,y` columns.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let mut writer = csv::Writer::from_path(path)?;
        for v in &self.vertices {
            writer.serialize(TerrainVertex { x: v.x, y: v.y })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a terrain previously written with [`Terrain::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut vertices = Vec::new();
        for row in reader.deserialize() {
            let vertex: TerrainVertex = row?;
            vertices.push(Point2::new(vertex.x, vertex.y));
        }
        Terrain::from_points(vertices)
    }
}

/// Distance from `origin` along a ray at `angle` to the segment `[segment_start, segment_end)`.
///
/// The ray only extends forward from `origin`. The segment is half-open so that a ray through a
/// shared vertex is counted once. Rays parallel to the segment never hit it.
pub fn raycast(
    origin: &Point2<f64>,
    angle: f64,
    segment_start: &Point2<f64>,
    segment_end: &Point2<f64>,
) -> Option<f64> {
    // cos/sin of axis-aligned angles are off by ~1e-16; snap so vertex hits stay on one segment
    let direction = Vector2::new(angle.cos(), angle.sin()).map(|c| {
        if c.abs() < f64::EPSILON { 0.0 } else { c }
    });
    let edge = segment_end - segment_start;
    let denominator = cross(&direction, &edge);
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    let to_start = segment_start - origin;
    let distance = cross(&to_start, &edge) / denominator;
    let t = cross(&to_start, &direction) / denominator;
    if distance >= 0.0 && (0.0..1.0).contains(&t) {
        Some(distance)
    } else {
        None
    }
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::PI;

    fn flat(height: f64) -> Terrain {
        Terrain::from_points(vec![Point2::new(0.0, height), Point2::new(100.0, height)]).unwrap()
    }

    #[test]
    fn raycast_straight_down_hits_flat_ground() {
        let d = raycast(
            &Point2::new(50.0, 80.0),
            3.0 * PI / 2.0,
            &Point2::new(0.0, 20.0),
            &Point2::new(100.0, 20.0),
        )
        .unwrap();
        assert_approx_eq!(d, 60.0, 1e-9);
    }

    #[test]
    fn raycast_slanted_ray_measures_hypotenuse() {
        // 45 degrees down and to the right from (0, 10) reaches y = 0 at x = 10
        let d = raycast(
            &Point2::new(0.0, 10.0),
            7.0 * PI / 4.0,
            &Point2::new(-50.0, 0.0),
            &Point2::new(50.0, 0.0),
        )
        .unwrap();
        assert_approx_eq!(d, 10.0 * 2.0f64.sqrt(), 1e-9);
    }

    #[test]
    fn raycast_ignores_segments_behind_the_origin() {
        // ground is below but the ray points up
        let hit = raycast(
            &Point2::new(50.0, 80.0),
            PI / 2.0,
            &Point2::new(0.0, 20.0),
            &Point2::new(100.0, 20.0),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn raycast_misses_outside_segment_and_parallel() {
        let start = Point2::new(0.0, 0.0);
        let end = Point2::new(10.0, 0.0);
        assert!(raycast(&Point2::new(20.0, 5.0), 3.0 * PI / 2.0, &start, &end).is_none());
        assert!(raycast(&Point2::new(0.0, 5.0), 0.0, &start, &end).is_none());
        // half-open: the end vertex belongs to the next segment
        assert!(raycast(&Point2::new(10.0, 5.0), 3.0 * PI / 2.0, &start, &end).is_none());
        assert!(raycast(&Point2::new(5.0, 5.0), 3.0 * PI / 2.0, &start, &end).is_some());
    }

    #[test]
    fn ray_through_shared_vertex_hits_exactly_one_segment() {
        let left = (Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
        let right = (Point2::new(10.0, 0.0), Point2::new(20.0, 3.0));
        let origin = Point2::new(10.0, 5.0);
        let down = 3.0 * PI / 2.0;
        assert!(raycast(&origin, down, &left.0, &left.1).is_none());
        let d = raycast(&origin, down, &right.0, &right.1).unwrap();
        assert_approx_eq!(d, 5.0, 1e-12);

        let terrain = Terrain::from_points(vec![left.0, left.1, right.1]).unwrap();
        let hits = terrain
            .vertices()
            .windows(2)
            .filter(|pair| raycast(&origin, down, &pair[0], &pair[1]).is_some())
            .count();
        assert_eq!(hits, 1);
        assert_approx_eq!(terrain.distance_along(&origin, down).unwrap(), 5.0, 1e-12);
    }

    #[test]
    fn distance_along_picks_closest_segment() {
        let terrain = Terrain::from_points(vec![
            Point2::new(0.0, 0.0),
            Point2::new(40.0, 0.0),
            Point2::new(50.0, 30.0),
            Point2::new(60.0, 0.0),
            Point2::new(100.0, 0.0),
        ])
        .unwrap();
        // horizontal ray at y = 15 heading right hits the rising flank of the peak at x = 45
        let d = terrain
            .distance_along(&Point2::new(10.0, 15.0), 0.0)
            .unwrap();
        assert_approx_eq!(d, 35.0, 1e-9);
        assert!(
            terrain
                .distance_along(&Point2::new(10.0, 50.0), PI / 2.0)
                .is_none()
        );
    }

    #[test]
    fn generated_terrain_spans_world_and_is_sorted() {
        let mut rng = StdRng::seed_from_u64(17);
        let terrain = Terrain::generate(800.0, 600.0, 10, &mut rng).unwrap();
        let v = terrain.vertices();
        assert_eq!(v.len(), 10);
        assert_eq!(v[0].x, 0.0);
        assert_eq!(v[9].x, 800.0);
        assert!(v.windows(2).all(|p| p[0].x <= p[1].x));
        assert!(v.iter().all(|p| p.y >= 0.0 && p.y <= 150.0 && p.y == p.y.round()));
    }

    #[test]
    fn generate_rejects_degenerate_worlds() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Terrain::generate(800.0, 600.0, 1, &mut rng).is_err());
        assert!(Terrain::generate(0.0, 600.0, 5, &mut rng).is_err());
    }

    #[test]
    fn from_points_validates_ordering() {
        assert!(Terrain::from_points(vec![Point2::new(0.0, 0.0)]).is_err());
        assert!(
            Terrain::from_points(vec![Point2::new(5.0, 0.0), Point2::new(1.0, 0.0)]).is_err()
        );
        assert!(
            Terrain::from_points(vec![Point2::new(0.0, f64::NAN), Point2::new(1.0, 0.0)]).is_err()
        );
    }

    #[test]
    fn height_at_interpolates() {
        let terrain = Terrain::from_points(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 0.0),
        ])
        .unwrap();
        assert_approx_eq!(terrain.height_at(5.0).unwrap(), 5.0, 1e-12);
        assert_approx_eq!(terrain.height_at(15.0).unwrap(), 5.0, 1e-12);
        assert!(terrain.height_at(-1.0).is_none());
        assert!(terrain.height_at(21.0).is_none());
        assert_approx_eq!(flat(7.0).height_at(100.0).unwrap(), 7.0, 1e-12);
    }

    #[test]
    fn terrain_csv_round_trip() {
        let mut rng = StdRng::seed_from_u64(2);
        let terrain = Terrain::generate(400.0, 300.0, 6, &mut rng).unwrap();
        let path = std::env::temp_dir().join("lander_pf_terrain_test.csv");
        terrain.to_csv(&path).unwrap();
        let read = Terrain::from_csv(&path).unwrap();
        assert_eq!(terrain, read);
        let _ = std::fs::remove_file(&path);
    }
}
