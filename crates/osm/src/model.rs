//! OSM API v0.6 JSON element model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subarea_core::{EntityId, Tags};

use crate::error::RemoteError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Way {
    pub id: i64,
    #[serde(default)]
    pub nodes: Vec<i64>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

impl Way {
    pub fn is_closed(&self) -> bool {
        self.nodes.len() >= 4 && self.nodes.first() == self.nodes.last()
    }
}

/// A typed reference from a relation to another element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "type")]
    pub kind: ElementType,
    #[serde(rename = "ref")]
    pub reference: i64,
    #[serde(default)]
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

impl Relation {
    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.id)
    }

    /// Relation members carrying `role`, in declaration order.
    pub fn members_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Member> {
        self.members
            .iter()
            .filter(move |m| m.kind == ElementType::Relation && m.role == role)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

/// Top-level body of every `*.json` API response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Document {
    /// Take the relation `id` out of the document.
    pub fn into_relation(self, id: EntityId) -> Result<Relation, RemoteError> {
        self.elements
            .into_iter()
            .find_map(|element| match element {
                Element::Relation(r) if r.id == id.get() => Some(r),
                _ => None,
            })
            .ok_or(RemoteError::MissingRelation(id))
    }

    /// Index the document around the relation `id`.
    pub fn into_full(self, id: EntityId) -> Result<FullRelation, RemoteError> {
        let mut nodes = HashMap::new();
        let mut ways = HashMap::new();
        let mut relations = HashMap::new();
        for element in self.elements {
            match element {
                Element::Node(n) => {
                    nodes.insert(n.id, n);
                }
                Element::Way(w) => {
                    ways.insert(w.id, w);
                }
                Element::Relation(r) => {
                    relations.insert(r.id, r);
                }
            }
        }

        let relation = relations
            .remove(&id.get())
            .ok_or(RemoteError::MissingRelation(id))?;

        Ok(FullRelation {
            relation,
            nodes,
            ways,
            relations,
        })
    }
}

/// A relation together with every element it references directly, as
/// returned by `relation/{id}/full`.
#[derive(Clone, Debug, PartialEq)]
pub struct FullRelation {
    pub relation: Relation,
    pub nodes: HashMap<i64, Node>,
    pub ways: HashMap<i64, Way>,
    /// Member relations, without their own members resolved.
    pub relations: HashMap<i64, Relation>,
}

impl FullRelation {
    pub fn id(&self) -> EntityId {
        self.relation.entity_id()
    }

    /// Rewrite the tags of every relation in the set.
    pub fn map_relation_tags(&mut self, mut f: impl FnMut(&Tags) -> Tags) {
        self.relation.tags = f(&self.relation.tags);
        for relation in self.relations.values_mut() {
            relation.tags = f(&relation.tags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parent() -> serde_json::Value {
        json!({
            "version": "0.6",
            "generator": "test",
            "elements": [{
                "type": "relation",
                "id": 123,
                "timestamp": "2024-01-01T00:00:00Z",
                "members": [
                    {"type": "relation", "ref": 10, "role": "subarea"},
                    {"type": "node", "ref": 5, "role": "admin_centre"},
                    {"type": "relation", "ref": 20, "role": "subarea"},
                    {"type": "way", "ref": 7, "role": "outer"}
                ],
                "tags": {"name": "Parent", "type": "boundary"}
            }]
        })
    }

    #[test]
    fn parses_relation_document() {
        let doc: Document = serde_json::from_value(parent()).unwrap();
        let relation = doc.into_relation(EntityId::new(123)).unwrap();

        assert_eq!(relation.members.len(), 4);
        assert_eq!(relation.members[1].kind, ElementType::Node);
        assert_eq!(relation.tags.get("name").map(String::as_str), Some("Parent"));

        let subareas: Vec<i64> = relation
            .members_with_role("subarea")
            .map(|m| m.reference)
            .collect();
        assert_eq!(subareas, vec![10, 20]);
    }

    #[test]
    fn subarea_role_on_non_relation_is_ignored() {
        let doc: Document = serde_json::from_value(json!({
            "elements": [{
                "type": "relation",
                "id": 1,
                "members": [
                    {"type": "way", "ref": 2, "role": "subarea"},
                    {"type": "relation", "ref": 3, "role": "subarea"},
                    {"type": "node", "ref": 4, "role": "subarea"}
                ]
            }]
        }))
        .unwrap();
        let relation = doc.into_relation(EntityId::new(1)).unwrap();

        let subareas: Vec<i64> = relation
            .members_with_role("subarea")
            .map(|m| m.reference)
            .collect();
        assert_eq!(subareas, vec![3]);
    }

    #[test]
    fn missing_relation_is_an_error() {
        let doc: Document = serde_json::from_value(parent()).unwrap();
        assert!(matches!(
            doc.into_relation(EntityId::new(999)),
            Err(RemoteError::MissingRelation(id)) if id == EntityId::new(999)
        ));
    }

    #[test]
    fn full_document_is_indexed() {
        let doc: Document = serde_json::from_value(json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 1.0, "lon": 2.0},
                {"type": "node", "id": 2, "lat": 1.5, "lon": 2.5, "tags": {"name": "x"}},
                {"type": "way", "id": 3, "nodes": [1, 2, 1]},
                {"type": "relation", "id": 4, "members": [{"type": "way", "ref": 3, "role": "outer"}]},
                {"type": "relation", "id": 5, "members": []}
            ]
        }))
        .unwrap();
        let full = doc.into_full(EntityId::new(4)).unwrap();

        assert_eq!(full.id(), EntityId::new(4));
        assert_eq!(full.nodes.len(), 2);
        assert_eq!(full.ways[&3].nodes, vec![1, 2, 1]);
        assert!(full.relations.contains_key(&5));
        assert!(!full.relations.contains_key(&4));
    }

    #[test]
    fn closed_way_needs_four_nodes() {
        let way = |nodes: Vec<i64>| Way {
            id: 1,
            nodes,
            tags: Tags::new(),
        };
        assert!(way(vec![1, 2, 3, 1]).is_closed());
        assert!(!way(vec![1, 2, 1]).is_closed());
        assert!(!way(vec![1, 2, 3, 4]).is_closed());
    }
}
