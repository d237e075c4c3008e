//! Equipment rows, driven by an [`EquipmentType`] instead of a fixed table.

use std::path::Path;

use super::{push_converted, ConvertContext, RowQuads};
use crate::csv_file::find_column_index;
use crate::equipment_type::{Attribute, EquipmentType};
use crate::error::{LoaderError, Result};
use crate::quad::NQuad;

/// Column layout of one equipment file resolved against its type.
#[derive(Debug, Clone)]
pub struct EquipmentMapping {
    type_name: String,
    pk_idx: usize,
    /// Attribute for each column, `None` when unmapped.
    attrs: Vec<Option<Attribute>>,
}

impl EquipmentMapping {
    pub fn new(eq_type: &EquipmentType, columns: &[String], path: &Path) -> Result<Self> {
        let pk = eq_type.primary_key_attribute()?;
        let pk_idx = find_column_index(&pk.mapped_to, columns).ok_or_else(|| {
            LoaderError::MissingColumn {
                path: path.to_path_buf(),
                column: pk.mapped_to.clone(),
            }
        })?;

        let mut attrs = vec![None; columns.len()];
        for attr in &eq_type.attributes {
            match find_column_index(&attr.mapped_to, columns) {
                Some(idx) => attrs[idx] = Some(attr.clone()),
                None => tracing::warn!(
                    file = %path.display(),
                    attribute = %attr.name,
                    column = %attr.mapped_to,
                    "attribute column not found"
                ),
            }
        }
        for (column, attr) in columns.iter().zip(&attrs) {
            if attr.is_none() {
                tracing::info!(file = %path.display(), column = %column, "no mapping for csv column");
            }
        }

        Ok(Self {
            type_name: eq_type.type_name.clone(),
            pk_idx,
            attrs,
        })
    }

    pub fn pk_idx(&self) -> usize {
        self.pk_idx
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Triples for one row; `None` when the primary key is missing or empty.
    pub fn convert_row(&self, ctx: &ConvertContext, row: &[String]) -> Option<RowQuads> {
        let Some(pk) = row.get(self.pk_idx).filter(|pk| !pk.is_empty()) else {
            tracing::error!(eq_type = %self.type_name, cells = row.len(), "primary key is empty, skipping row");
            return None;
        };

        let mut quads = Vec::with_capacity(row.len() + 3);
        let (uid, defining) = ctx.ids.uid_for_type(pk, "equipment", "equipment.id", pk);
        quads.extend(defining);
        quads.push(NQuad::string(&uid, "equipment.type", &self.type_name));

        for (idx, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let Some(Some(attr)) = self.attrs.get(idx) else {
                continue;
            };
            if attr.is_identifier {
                continue;
            }
            if attr.is_parent_identifier {
                let (parent, defining) = ctx.ids.uid_for_type(cell, "equipment", "equipment.id", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&uid, "equipment.parent", &parent));
                continue;
            }
            let predicate = format!("equipment.{}.{}", self.type_name, attr.name);
            push_converted(&mut quads, &uid, &predicate, attr.data_type.conv(), cell);
        }

        Some(RowQuads { quads, uid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::{ctx, facts_of, strings};
    use crate::equipment_type::default_equipment_types;
    use crate::quad::{Object, Value};

    fn server_type() -> EquipmentType {
        default_equipment_types()
            .into_iter()
            .find(|t| t.type_name == "server")
            .unwrap()
    }

    #[test]
    fn test_server_row() {
        let ctx = ctx();
        let cols = strings(&[
            "server_hostname",
            "server_processorsNumber",
            "corefactor_oracle",
            "parent_id",
            "comment",
        ]);
        let mapping = EquipmentMapping::new(&server_type(), &cols, Path::new("equipment_server.csv")).unwrap();
        assert_eq!(mapping.pk_idx(), 0);

        let row = strings(&["srv-1", "4", "0.5", "cluster-1", "ignored"]);
        let rq = mapping.convert_row(&ctx, &row).unwrap();
        let (srv, _) = ctx.ids.uid_for_xid("srv-1");
        let (cluster, _) = ctx.ids.uid_for_xid("cluster-1");

        let facts = facts_of(&rq, &srv);
        assert!(facts.contains(&("equipment.type".into(), "server".into())));
        assert!(facts.contains(&("equipment.id".into(), "srv-1".into())));
        assert!(facts.contains(&("equipment.parent".into(), cluster)));
        assert!(rq.quads.iter().any(|q| q.predicate == "equipment.server.ServerProcessorsNumber"
            && q.object == Object::Value(Value::Int(4))));
        assert!(rq.quads.iter().any(|q| q.predicate == "equipment.server.OracleCoreFactor"
            && q.object == Object::Value(Value::Float(0.5))));
        assert!(rq.quads.iter().all(|q| q.object_str() != Some("ignored")));
    }

    #[test]
    fn test_bad_number_and_empty_cells() {
        let ctx = ctx();
        let cols = strings(&["server_hostname", "server_coresNumber", "server_model"]);
        let mapping = EquipmentMapping::new(&server_type(), &cols, Path::new("f.csv")).unwrap();
        let rq = mapping.convert_row(&ctx, &strings(&["srv-1", "eight", ""])).unwrap();
        assert!(rq
            .quads
            .iter()
            .any(|q| q.predicate == "equipment.server.ServerCoresNumber.failure"));
        assert!(rq.quads.iter().all(|q| q.predicate != "equipment.server.ServerCoresNumber"));
        assert!(rq.quads.iter().all(|q| q.predicate != "equipment.server.ServerModel"));
    }

    #[test]
    fn test_empty_primary_key_skips_row() {
        let ctx = ctx();
        let cols = strings(&["server_hostname", "server_model"]);
        let mapping = EquipmentMapping::new(&server_type(), &cols, Path::new("f.csv")).unwrap();
        assert!(mapping.convert_row(&ctx, &strings(&["", "x"])).is_none());
        assert!(mapping.convert_row(&ctx, &[]).is_none());
    }

    #[test]
    fn test_missing_primary_key_column_fails_file() {
        let cols = strings(&["hostname"]);
        let err = EquipmentMapping::new(&server_type(), &cols, Path::new("f.csv")).unwrap_err();
        assert!(matches!(err, LoaderError::MissingColumn { column, .. } if column == "server_hostname"));
    }
}
