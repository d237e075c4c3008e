//! Metadata nodes describing the header of each equipment source file.

use super::RowQuads;
use crate::ids::NodeIds;
use crate::quad::{NQuad, TYPE_PREDICATE};

pub const METADATA_TYPE: &str = "metadata";

/// `metadata` node for equipment file `source` with one
/// `metadata.attributes` value per header column.
pub fn equipment_metadata_quads(ids: &NodeIds, source: &str, columns: &[String]) -> RowQuads {
    let (uid, _) = ids.uid_for_xid(&format!("metadata_equipment_{source}"));
    let mut quads = Vec::with_capacity(columns.len() + 3);
    quads.push(NQuad::string(&uid, TYPE_PREDICATE, METADATA_TYPE));
    quads.push(NQuad::string(&uid, "metadata.type", "equipment"));
    quads.push(NQuad::string(&uid, "metadata.source", source));
    quads.extend(
        columns
            .iter()
            .map(|c| NQuad::string(&uid, "metadata.attributes", c)),
    );
    RowQuads { quads, uid }
}
