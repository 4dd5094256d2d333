//! Names and encodings of the attribute streams each element store declares.

use crate::storage::column::ColumnKind;
use crate::types::ElementKind;

/// Vertex streams.
pub mod vertex {
    /// Semantic identifier.
    pub const ID: &str = "vertex.id";
    /// Location.
    pub const LOCATION: &str = "vertex.location";
    /// Source tags.
    pub const TAGS: &str = "vertex.tags";
    /// Changeset of the last edit.
    pub const CHANGESET: &str = "vertex.changeset";
    /// Revision number of the source node.
    pub const REVISION: &str = "vertex.revision";
    /// Edit timestamp in unix seconds.
    pub const TIMESTAMP: &str = "vertex.timestamp";
    /// Id of the last editing user.
    pub const USER: &str = "vertex.user";
}

/// Edge streams.
pub mod edge {
    /// Semantic identifier.
    pub const ID: &str = "edge.id";
    /// Index of the start vertex.
    pub const FROM: &str = "edge.from";
    /// Index of the end vertex.
    pub const TO: &str = "edge.to";
    /// Full geometry including both endpoints.
    pub const SHAPE: &str = "edge.shape";
    /// Street name.
    pub const NAME: &str = "edge.name";
    /// Length in centimetres.
    pub const LENGTH: &str = "edge.length";
    /// Speed limit in km/h.
    pub const SPEED: &str = "edge.speed_kph";
    /// Grade in percent.
    pub const GRADE: &str = "edge.grade";
    /// Bit flags, see [`crate::storage::graph::EdgeFlags`].
    pub const FLAGS: &str = "edge.flags";
}

/// Place streams.
pub mod place {
    /// Semantic identifier.
    pub const ID: &str = "place.id";
    /// Location.
    pub const LOCATION: &str = "place.location";
    /// Display name.
    pub const NAME: &str = "place.name";
    /// Population, when known.
    pub const POPULATION: &str = "place.population";
    /// Source tags.
    pub const TAGS: &str = "place.tags";
}

/// Turn relation streams.
pub mod relation {
    /// Semantic identifier.
    pub const ID: &str = "relation.id";
    /// Restriction kind code.
    pub const KIND: &str = "relation.kind";
    /// Index of the edge the turn starts on.
    pub const FROM: &str = "relation.from";
    /// Index of the vertex the turn passes.
    pub const VIA: &str = "relation.via";
    /// Index of the edge the turn ends on.
    pub const TO: &str = "relation.to";
}

const VERTEX: &[(&str, ColumnKind)] = &[
    (vertex::ID, ColumnKind::Long),
    (vertex::LOCATION, ColumnKind::Point),
    (vertex::TAGS, ColumnKind::Tags),
    (vertex::CHANGESET, ColumnKind::Long),
    (vertex::REVISION, ColumnKind::Int),
    (vertex::TIMESTAMP, ColumnKind::Long),
    (vertex::USER, ColumnKind::Long),
];

const EDGE: &[(&str, ColumnKind)] = &[
    (edge::ID, ColumnKind::Long),
    (edge::FROM, ColumnKind::Int),
    (edge::TO, ColumnKind::Int),
    (edge::SHAPE, ColumnKind::Shape),
    (edge::NAME, ColumnKind::Text),
    (edge::LENGTH, ColumnKind::Long),
    (edge::SPEED, ColumnKind::Int),
    (edge::GRADE, ColumnKind::Percent),
    (edge::FLAGS, ColumnKind::Byte),
];

const PLACE: &[(&str, ColumnKind)] = &[
    (place::ID, ColumnKind::Long),
    (place::LOCATION, ColumnKind::Point),
    (place::NAME, ColumnKind::Text),
    (place::POPULATION, ColumnKind::Long),
    (place::TAGS, ColumnKind::Tags),
];

const RELATION: &[(&str, ColumnKind)] = &[
    (relation::ID, ColumnKind::Long),
    (relation::KIND, ColumnKind::Byte),
    (relation::FROM, ColumnKind::Int),
    (relation::VIA, ColumnKind::Int),
    (relation::TO, ColumnKind::Int),
];

/// Streams declared for `kind`, id stream first.
pub fn declared(kind: ElementKind) -> &'static [(&'static str, ColumnKind)] {
    match kind {
        ElementKind::Vertex => VERTEX,
        ElementKind::Edge => EDGE,
        ElementKind::Place => PLACE,
        ElementKind::Relation => RELATION,
    }
}

/// Name of the id stream of `kind`.
pub fn id_stream(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Vertex => vertex::ID,
        ElementKind::Edge => edge::ID,
        ElementKind::Place => place::ID,
        ElementKind::Relation => relation::ID,
    }
}

/// Declared encoding of a stream name, if it belongs to the schema.
pub fn kind_of(name: &str) -> Option<ColumnKind> {
    let kind = ElementKind::of_stream(name)?;
    declared(kind)
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, k)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stream_is_prefixed_by_its_kind() {
        for kind in ElementKind::ALL {
            let streams = declared(kind);
            assert_eq!(streams[0].0, id_stream(kind));
            assert_eq!(streams[0].1, ColumnKind::Long);
            for (name, _) in streams {
                assert_eq!(ElementKind::of_stream(name), Some(kind), "{name}");
            }
        }
        assert_eq!(kind_of(edge::GRADE), Some(ColumnKind::Percent));
        assert_eq!(kind_of("edge.unknown"), None);
    }
}
