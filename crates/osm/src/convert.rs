//! Conversion of a full relation into a GeoJSON feature collection.
//!
//! The relation becomes one feature whose geometry is assembled from its
//! `outer` and `inner` member ways. Member ways are joined end to end into
//! closed rings and every inner ring is placed in the outer ring containing
//! it. Tagged ways and tagged nodes of the set become features of their own.

use serde_json::{Map, Value};
use subarea_core::{Feature, FeatureCollection, Geometry, Position, Ring, Tags};
use tracing::debug;

use crate::error::ConvertError;
use crate::model::{ElementType, FullRelation, Node};

/// Turns a fetched relation into features.
pub trait Converter: Send + Sync {
    fn convert(&self, full: &FullRelation) -> Result<FeatureCollection, ConvertError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsmConverter;

impl Converter for OsmConverter {
    fn convert(&self, full: &FullRelation) -> Result<FeatureCollection, ConvertError> {
        let mut features = vec![relation_feature(full)?];

        let mut ways: Vec<_> = full.ways.values().filter(|w| !w.tags.is_empty()).collect();
        ways.sort_by_key(|w| w.id);
        for way in ways {
            let Ok(coordinates) = resolve(way.id, &way.nodes, full) else {
                debug!(way = way.id, "skipping way with unresolved nodes");
                continue;
            };
            let geometry = if way.is_closed() {
                Geometry::Polygon {
                    coordinates: vec![coordinates],
                }
            } else if coordinates.len() >= 2 {
                Geometry::LineString { coordinates }
            } else {
                continue;
            };
            features.push(
                Feature::new(format!("way/{}", way.id), geometry)
                    .with_properties(properties(&way.tags)),
            );
        }

        let mut nodes: Vec<_> = full.nodes.values().filter(|n| !n.tags.is_empty()).collect();
        nodes.sort_by_key(|n| n.id);
        for node in nodes {
            features.push(
                Feature::new(
                    format!("node/{}", node.id),
                    Geometry::Point {
                        coordinates: position(node),
                    },
                )
                .with_properties(properties(&node.tags)),
            );
        }

        Ok(FeatureCollection::new(features))
    }
}

fn relation_feature(full: &FullRelation) -> Result<Feature, ConvertError> {
    let id = full.id();
    let mut outer_segments = Vec::new();
    let mut inner_segments = Vec::new();

    for member in &full.relation.members {
        if member.kind != ElementType::Way {
            continue;
        }
        let Some(way) = full.ways.get(&member.reference) else {
            debug!(relation = %id, way = member.reference, "member way not in response");
            continue;
        };
        if way.nodes.len() < 2 {
            continue;
        }
        // Resolve early so a dangling node reference names its way.
        resolve(way.id, &way.nodes, full)?;

        match member.role.as_str() {
            "outer" | "" => outer_segments.push(way.nodes.clone()),
            "inner" => inner_segments.push(way.nodes.clone()),
            _ => {}
        }
    }

    let outers = join_rings(outer_segments)
        .into_iter()
        .map(|ring| resolve(id.get(), &ring, full))
        .collect::<Result<Vec<_>, _>>()?;
    if outers.is_empty() {
        return Err(ConvertError::NoRings(id));
    }
    let inners = join_rings(inner_segments)
        .into_iter()
        .map(|ring| resolve(id.get(), &ring, full))
        .collect::<Result<Vec<_>, _>>()?;

    let mut polygons: Vec<Vec<Ring>> = outers.into_iter().map(|outer| vec![outer]).collect();
    for inner in inners {
        let Some(probe) = inner.first() else { continue };
        match polygons.iter_mut().find(|p| contains(&p[0], probe)) {
            Some(polygon) => polygon.push(inner),
            None => debug!(relation = %id, "dropping inner ring outside every outer ring"),
        }
    }

    let geometry = if polygons.len() == 1 {
        Geometry::Polygon {
            coordinates: polygons.remove(0),
        }
    } else {
        Geometry::MultiPolygon {
            coordinates: polygons,
        }
    };

    Ok(Feature::new(id.feature_id(), geometry).with_properties(properties(&full.relation.tags)))
}

/// Join node sequences sharing end points into closed rings. Sequences that
/// cannot be closed are dropped.
fn join_rings(segments: Vec<Vec<i64>>) -> Vec<Vec<i64>> {
    let mut pending: Vec<Vec<i64>> = segments.into_iter().rev().collect();
    let mut rings = Vec::new();

    while let Some(mut current) = pending.pop() {
        loop {
            if current.len() >= 4 && current.first() == current.last() {
                rings.push(current);
                break;
            }
            let Some(&tail) = current.last() else { break };
            let Some(index) = pending
                .iter()
                .rposition(|s| s.first() == Some(&tail) || s.last() == Some(&tail))
            else {
                debug!(nodes = current.len(), "unclosed ring");
                break;
            };
            let mut next = pending.remove(index);
            if next.first() != Some(&tail) {
                next.reverse();
            }
            current.extend(next.into_iter().skip(1));
        }
    }
    rings
}

fn position(node: &Node) -> Position {
    vec![node.lon, node.lat]
}

fn resolve(way: i64, node_ids: &[i64], full: &FullRelation) -> Result<Vec<Position>, ConvertError> {
    node_ids
        .iter()
        .map(|node| {
            full.nodes
                .get(node)
                .map(position)
                .ok_or(ConvertError::MissingNode { way, node: *node })
        })
        .collect()
}

/// Even-odd ray casting test.
fn contains(ring: &[Position], point: &[f64]) -> bool {
    let (px, py) = (point[0], point[1]);
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn properties(tags: &Tags) -> Map<String, Value> {
    tags.iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}
