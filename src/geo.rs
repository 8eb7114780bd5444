// src/geo.rs
//! Planar geometry helpers for area-of-interest filtering and WKT rendering.
//! Coordinates are `(lon, lat)` treated as plain x/y; no projection.

use crate::event::{Geometry, PolygonCoords, Position, Ring};

pub type Coord = (f64, f64);

fn lon_lat(p: &Position) -> Option<Coord> {
    match p.as_slice() {
        [lon, lat, ..] => Some((*lon, *lat)),
        _ => None,
    }
}

/// Representative point of an event geometry.
///
/// Point → its coordinates. Polygon / MultiPolygon → first vertex of the
/// (first) outer ring, a cheap deterministic proxy rather than a centroid.
/// `None` for unsupported or empty geometry.
pub fn representative_point(geom: &Geometry) -> Option<Coord> {
    match geom {
        Geometry::Point(p) => lon_lat(p),
        Geometry::Polygon(rings) => rings.first()?.first().and_then(lon_lat),
        Geometry::MultiPolygon(polys) => polys.first()?.first()?.first().and_then(lon_lat),
        Geometry::Unsupported { .. } => None,
    }
}

/// Ray casting (even-odd rule) against a single ring. Fewer than three
/// vertices never contain anything.
pub fn point_in_ring(pt: Coord, ring: &Ring) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let (x, y) = pt;
    let mut inside = false;
    for i in 0..n {
        let (Some((x1, y1)), Some((x2, y2))) = (lon_lat(&ring[i]), lon_lat(&ring[(i + 1) % n]))
        else {
            return false;
        };
        if (y1 > y) != (y2 > y) {
            let x_cross = (x2 - x1) * (y - y1) / (y2 - y1) + x1;
            if x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Inside the outer ring and outside every hole.
pub fn point_in_polygon(pt: Coord, polygon: &PolygonCoords) -> bool {
    let Some((outer, holes)) = polygon.split_first() else {
        return false;
    };
    point_in_ring(pt, outer) && !holes.iter().any(|hole| point_in_ring(pt, hole))
}

pub fn point_in_multipolygon(pt: Coord, polygons: &[PolygonCoords]) -> bool {
    polygons.iter().any(|poly| point_in_polygon(pt, poly))
}

/// AOI containment. Only Polygon and MultiPolygon areas can contain a point;
/// anything else fails closed.
pub fn aoi_contains(aoi: &Geometry, pt: Coord) -> bool {
    match aoi {
        Geometry::Polygon(poly) => point_in_polygon(pt, poly),
        Geometry::MultiPolygon(polys) => point_in_multipolygon(pt, polys),
        Geometry::Point(_) | Geometry::Unsupported { .. } => false,
    }
}

fn ring_wkt(ring: &Ring) -> String {
    ring.iter()
        .filter_map(lon_lat)
        .map(|(x, y)| format!("{x} {y}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compact WKT: outer ring only, first polygon only for MultiPolygon.
pub fn to_wkt(geom: &Geometry) -> Option<String> {
    match geom {
        Geometry::Point(p) => lon_lat(p).map(|(x, y)| format!("POINT ({x} {y})")),
        Geometry::Polygon(rings) => rings
            .first()
            .map(|outer| format!("POLYGON (({}))", ring_wkt(outer))),
        Geometry::MultiPolygon(polys) => polys
            .first()
            .and_then(|p| p.first())
            .map(|outer| format!("MULTIPOLYGON ((({})))", ring_wkt(outer))),
        Geometry::Unsupported { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Ring {
        vec![
            vec![x0, y0],
            vec![x1, y0],
            vec![x1, y1],
            vec![x0, y1],
            vec![x0, y0],
        ]
    }

    #[test]
    fn inside_square_without_holes() {
        let poly = vec![square(0.0, 0.0, 10.0, 10.0)];
        assert!(point_in_polygon((5.0, 5.0), &poly));
        assert!(!point_in_polygon((15.0, 5.0), &poly));
    }

    #[test]
    fn hole_excludes_point() {
        let poly = vec![square(0.0, 0.0, 10.0, 10.0), square(4.0, 4.0, 6.0, 6.0)];
        assert!(!point_in_polygon((5.0, 5.0), &poly));
        assert!(point_in_polygon((2.0, 2.0), &poly));
    }

    #[test]
    fn outside_outer_ring_is_never_contained() {
        // A "hole" outside the outer ring must not flip anything.
        let poly = vec![square(0.0, 0.0, 10.0, 10.0), square(20.0, 20.0, 30.0, 30.0)];
        assert!(!point_in_polygon((25.0, 25.0), &poly));
    }

    #[test]
    fn multipolygon_is_union() {
        let polys = vec![
            vec![square(0.0, 0.0, 1.0, 1.0)],
            vec![square(10.0, 10.0, 11.0, 11.0)],
        ];
        assert!(point_in_multipolygon((10.5, 10.5), &polys));
        assert!(!point_in_multipolygon((5.0, 5.0), &polys));
    }

    #[test]
    fn degenerate_ring_contains_nothing() {
        let ring = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        assert!(!point_in_ring((0.5, 0.5), &ring));
    }

    #[test]
    fn representative_point_uses_first_outer_vertex() {
        let g = Geometry::Polygon(vec![square(3.0, 4.0, 5.0, 6.0)]);
        assert_eq!(representative_point(&g), Some((3.0, 4.0)));
        let m = Geometry::MultiPolygon(vec![vec![square(-1.0, -2.0, 0.0, 0.0)]]);
        assert_eq!(representative_point(&m), Some((-1.0, -2.0)));
        let p = Geometry::Point(vec![7.0, 8.0, 12.0]);
        assert_eq!(representative_point(&p), Some((7.0, 8.0)));
    }

    #[test]
    fn point_aoi_fails_closed() {
        let aoi = Geometry::Point(vec![0.0, 0.0]);
        assert!(!aoi_contains(&aoi, (0.0, 0.0)));
    }

    #[test]
    fn wkt_rendering() {
        assert_eq!(
            to_wkt(&Geometry::Point(vec![1.5, -2.0])).as_deref(),
            Some("POINT (1.5 -2)")
        );
        let w = to_wkt(&Geometry::Polygon(vec![square(0.0, 0.0, 1.0, 1.0)])).unwrap();
        assert_eq!(w, "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))");
    }
}
