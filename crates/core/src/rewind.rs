//! Ring winding correction for polygonal geometries.
//!
//! Orientation follows the shoelace sum over consecutive vertex pairs of
//! `(x_i - x_j) * (y_j + y_i)` where `j` is the previous vertex. A positive
//! sum is clockwise for `[x, y]` = `[lon, lat]` axes.
//!
//! Collection-level rewinding validates every geometry before touching any
//! of them, so a failed call leaves the collection unchanged.

use crate::error::{Error, Result};
use crate::geojson::{Feature, FeatureCollection, Geometry, Position, Ring};

fn xy(position: &[f64]) -> (f64, f64) {
    (
        position.first().copied().unwrap_or_default(),
        position.get(1).copied().unwrap_or_default(),
    )
}

/// Shoelace sum of a ring. Positive means clockwise, zero means degenerate.
pub fn signed_area(ring: &[Position]) -> f64 {
    let n = ring.len();
    if n == 0 {
        return 0.0;
    }

    let mut area = 0.0;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = xy(&ring[i]);
        let (xj, yj) = xy(&ring[j]);
        area += (xi - xj) * (yj + yi);
        j = i;
    }
    area
}

/// Wind `ring` clockwise or counter-clockwise, in place.
///
/// Rings with fewer than four positions or zero area have no orientation
/// and are left untouched. Reversal keeps the start vertex in place because
/// the ring is closed.
pub fn rewind_ring(ring: &mut [Position], clockwise: bool) {
    if ring.len() < 4 {
        return;
    }

    let area = signed_area(ring);
    if area == 0.0 {
        return;
    }

    if (area > 0.0) != clockwise {
        ring.reverse();
    }
}

/// Wind the exterior ring per `outer_clockwise` and every hole the opposite way.
pub fn rewind_rings(rings: &mut [Ring], outer_clockwise: bool) {
    let Some((exterior, holes)) = rings.split_first_mut() else {
        return;
    };

    rewind_ring(exterior, outer_clockwise);
    for hole in holes {
        rewind_ring(hole, !outer_clockwise);
    }
}

fn check_rings(rings: &[Ring]) -> Result<()> {
    for ring in rings {
        if let Some(position) = ring.iter().find(|p| p.len() < 2) {
            return Err(Error::InvalidGeometry(format!(
                "position has {} coordinate(s), expected at least 2",
                position.len()
            )));
        }
    }
    Ok(())
}

fn check_geometry(geometry: &Geometry) -> Result<()> {
    match geometry {
        Geometry::Polygon { coordinates } => check_rings(coordinates),
        Geometry::MultiPolygon { coordinates } => {
            coordinates.iter().try_for_each(|p| check_rings(p))
        }
        other => Err(Error::UnsupportedGeometry(other.type_name().to_string())),
    }
}

fn apply(geometry: &mut Geometry, outer_clockwise: bool) {
    match geometry {
        Geometry::Polygon { coordinates } => rewind_rings(coordinates, outer_clockwise),
        Geometry::MultiPolygon { coordinates } => {
            for polygon in coordinates {
                rewind_rings(polygon, outer_clockwise);
            }
        }
        _ => {}
    }
}

fn feature_geometry(feature: &Feature) -> Result<&Geometry> {
    feature
        .geometry
        .as_ref()
        .ok_or_else(|| Error::InvalidGeometry("feature has no geometry".to_string()))
}

/// Rewind a Polygon or MultiPolygon. Any other type is rejected.
pub fn rewind_geometry(geometry: &mut Geometry, outer_clockwise: bool) -> Result<()> {
    check_geometry(geometry)?;
    apply(geometry, outer_clockwise);
    Ok(())
}

/// Rewind the geometry of a feature. A feature without geometry is invalid.
pub fn rewind_feature(feature: &mut Feature, outer_clockwise: bool) -> Result<()> {
    check_geometry(feature_geometry(feature)?)?;
    if let Some(geometry) = feature.geometry.as_mut() {
        apply(geometry, outer_clockwise);
    }
    Ok(())
}

/// Rewind every feature, or none of them if any geometry is rejected.
pub fn rewind_feature_collection(fc: &mut FeatureCollection, outer_clockwise: bool) -> Result<()> {
    for feature in &fc.features {
        check_geometry(feature_geometry(feature)?)?;
    }

    for feature in &mut fc.features {
        if let Some(geometry) = feature.geometry.as_mut() {
            apply(geometry, outer_clockwise);
        }
    }
    Ok(())
}
