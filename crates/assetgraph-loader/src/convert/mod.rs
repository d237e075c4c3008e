//! Row converters
//!
//! One pure function per entity kind turns a CSV row into graph triples:
//!
//! ```text
//!   header:  SWIDTag ; Name   ; Editor ; IdEquipment
//!   row:     P1      ; Orcl   ; Oracle ; SRV-1
//!
//!   0x1 type_name          "product"
//!   0x1 product.swidtag    "P1"
//!   0x1 product.name       "Orcl"
//!   0x2 editor.product     0x1        (editor node "editor_Oracle")
//!   0x1 product.editor     "Oracle"
//!   0x1 product.equipment  0x3        (equipment node "SRV-1")
//! ```
//!
//! Column names missing from a kind's predicate table are kept as predicates
//! (whitespace replaced by `_`). Numeric cells that fail to parse produce a
//! `<predicate>.failure` triple holding the raw text instead of failing the row.

mod acqrights;
mod applications;
pub mod equipment;
mod instances;
pub mod metadata;
mod products;
mod users;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ids::NodeIds;
use crate::quad::{NQuad, Value};

pub use acqrights::acquired_rights_quads_for_row;
pub use applications::applications_quads_for_row;
pub use instances::instances_quads_for_row;
pub use products::products_quads_for_row;
pub use users::users_quads_for_row;

/// Triples produced for one row and the uid of the row's primary node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowQuads {
    pub quads: Vec<NQuad>,
    pub uid: String,
}

/// Everything a converter needs besides the row itself.
#[derive(Clone)]
pub struct ConvertContext {
    pub ids: NodeIds,
    pub schemas: Arc<Schemas>,
}

impl ConvertContext {
    pub fn new(ids: NodeIds, schemas: Arc<Schemas>) -> Self {
        Self { ids, schemas }
    }
}

/// `(ctx, columns, scope, row, primary_key_idx) -> triples`; `None` skips the row.
pub type RowConverter = fn(&ConvertContext, &[String], &str, &[String], usize) -> Option<RowQuads>;

// ============================================================================
// Cell conversion
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataConv {
    Str,
    Int,
    Float,
}

impl DataConv {
    /// Convert a cell. Thousands separators (`,`) are stripped before numeric
    /// parsing.
    pub fn convert(self, raw: &str) -> Result<Value, String> {
        match self {
            DataConv::Str => Ok(Value::Str(raw.to_string())),
            DataConv::Int => {
                let cleaned = raw.replace(',', "");
                cleaned
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| format!("data: {cleaned}, error: {e}"))
            }
            DataConv::Float => {
                let cleaned = raw.replace(',', "");
                cleaned
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|e| format!("data: {cleaned}, error: {e}"))
            }
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DataConv::Str)
    }
}

/// Push the converted cell, or a `<predicate>.failure` triple carrying `raw`.
pub(crate) fn push_converted(
    quads: &mut Vec<NQuad>,
    subject: &str,
    predicate: &str,
    conv: DataConv,
    raw: &str,
) {
    match conv.convert(raw) {
        Ok(value) => quads.push(NQuad::value(subject, predicate, value)),
        Err(reason) => {
            tracing::warn!(subject, predicate, value = raw, %reason, "cell conversion failed");
            quads.push(NQuad::value(
                subject,
                &format!("{predicate}.failure"),
                Value::Default(raw.to_string()),
            ));
        }
    }
}

/// Predicate for a column with no schema entry.
pub fn fallback_predicate(column: &str) -> String {
    column
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

// ============================================================================
// Predicate tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaNode {
    pub predicate: &'static str,
    pub conv: DataConv,
}

const fn node(predicate: &'static str, conv: DataConv) -> SchemaNode {
    SchemaNode { predicate, conv }
}

/// Column name → predicate tables for the static entity kinds. Built once,
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct Schemas {
    pub products: HashMap<&'static str, &'static str>,
    pub applications: HashMap<&'static str, &'static str>,
    pub instances: HashMap<&'static str, &'static str>,
    pub users: HashMap<&'static str, &'static str>,
    pub acq_rights: HashMap<&'static str, SchemaNode>,
}

impl Default for Schemas {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Schemas {
    pub fn builtin() -> Self {
        let products = HashMap::from([
            ("Name", "product.name"),
            ("Version", "product.version"),
            ("Category", "product.category"),
            ("Editor", "product.editor"),
            ("SWIDTag", "product.swidtag"),
            ("IsOptionOf", "product.child"),
            ("IdEquipment", "product.equipment"),
        ]);
        let applications = HashMap::from([
            ("IdApplication", "application.id"),
            ("Name", "application.name"),
            ("Version", "application.version"),
            ("Owner", "application.owner"),
            ("IdInstance", "application.instance"),
            ("SWIDTag", "application.product"),
        ]);
        let instances = HashMap::from([
            ("IdInstance", "instance.id"),
            ("Environment", "instance.environment"),
            ("SWIDTag", "instance.product"),
            ("IdEquipment", "instance.equipment"),
            ("IdApplication", "application.id"),
        ]);
        let users = HashMap::from([
            ("NbUsers", "users.count"),
            ("IdEquipment", "equipment.users"),
            ("SWIDTag", "product.users"),
        ]);
        let acq_rights = HashMap::from([
            ("Entity", node("acqRights.entity", DataConv::Str)),
            ("SKU", node("acqRights.SKU", DataConv::Str)),
            ("SWIDTag", node("acqRights.swidtag", DataConv::Str)),
            ("Product name", node("acqRights.productName", DataConv::Str)),
            ("Editor", node("acqRights.editor", DataConv::Str)),
            ("Metric", node("acqRights.metric", DataConv::Str)),
            ("Acquired licenses number", node("acqRights.numOfAcqLicences", DataConv::Int)),
            (
                "Licenses under maintenance number",
                node("acqRights.numOfLicencesUnderMaintenance", DataConv::Int),
            ),
            ("AVG Unit Price", node("acqRights.averageUnitPrice", DataConv::Float)),
            (
                "AVG Maintenant Unit Price",
                node("acqRights.averageMaintenantUnitPrice", DataConv::Float),
            ),
            ("Total purchase cost", node("acqRights.totalPurchaseCost", DataConv::Float)),
            ("Total maintenance cost", node("acqRights.totalMaintenanceCost", DataConv::Float)),
            ("Total cost", node("acqRights.totalCost", DataConv::Float)),
            ("updated", node("updated", DataConv::Str)),
            ("created", node("created", DataConv::Str)),
        ]);

        Self {
            products,
            applications,
            instances,
            users,
            acq_rights,
        }
    }
}

/// Resolve a column through `table`, falling back to the column name.
pub(crate) fn predicate_for(table: &HashMap<&'static str, &'static str>, column: &str) -> String {
    match table.get(column) {
        Some(p) => (*p).to_string(),
        None => fallback_predicate(column),
    }
}

// ============================================================================
// Static entity kinds
// ============================================================================

/// Entity kinds loaded from plain CSV through the static-data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticKind {
    Products,
    Applications,
    Instances,
    AcquiredRights,
    Users,
}

impl StaticKind {
    pub const ALL: [StaticKind; 5] = [
        StaticKind::Products,
        StaticKind::Applications,
        StaticKind::Instances,
        StaticKind::AcquiredRights,
        StaticKind::Users,
    ];

    /// Column that must be present in the header for the file to load.
    pub fn xid_column(self) -> &'static str {
        match self {
            StaticKind::Products => "SWIDTag",
            StaticKind::Applications => "IdApplication",
            StaticKind::Instances => "IdInstance",
            StaticKind::AcquiredRights => "SKU",
            StaticKind::Users => "NbUsers",
        }
    }

    pub fn converter(self) -> RowConverter {
        match self {
            StaticKind::Products => products_quads_for_row,
            StaticKind::Applications => applications_quads_for_row,
            StaticKind::Instances => instances_quads_for_row,
            StaticKind::AcquiredRights => acquired_rights_quads_for_row,
            StaticKind::Users => users_quads_for_row,
        }
    }
}

impl fmt::Display for StaticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StaticKind::Products => "products",
            StaticKind::Applications => "applications",
            StaticKind::Instances => "instances",
            StaticKind::AcquiredRights => "acquired rights",
            StaticKind::Users => "users",
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn ctx() -> ConvertContext {
        ConvertContext::new(NodeIds::in_memory(), Arc::new(Schemas::builtin()))
    }

    pub fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    /// `(predicate, object)` pairs for quads whose subject is `uid`.
    pub fn facts_of(rq: &RowQuads, uid: &str) -> Vec<(String, String)> {
        rq.quads
            .iter()
            .filter(|q| q.subject == uid)
            .map(|q| {
                let obj = q
                    .object_id()
                    .map(str::to_string)
                    .or_else(|| q.object_str().map(str::to_string))
                    .unwrap_or_else(|| format!("{:?}", q.object));
                (q.predicate.clone(), obj)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversion_strips_thousands_separators() {
        assert_eq!(DataConv::Int.convert("1,250"), Ok(Value::Int(1250)));
        assert_eq!(DataConv::Float.convert("12,345.5"), Ok(Value::Float(12345.5)));
        assert!(DataConv::Int.convert("12.5").is_err());
        assert!(DataConv::Float.convert("n/a").is_err());
    }

    #[test]
    fn test_fallback_predicate_replaces_whitespace() {
        assert_eq!(fallback_predicate(" Contract  ref "), "Contract__ref");
        assert_eq!(fallback_predicate("Cost\tCenter"), "Cost_Center");
        assert_eq!(fallback_predicate("plain"), "plain");
    }

    #[test]
    fn test_push_converted_emits_failure_sibling() {
        let mut quads = Vec::new();
        push_converted(&mut quads, "0x1", "acqRights.totalCost", DataConv::Float, "abc");
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].predicate, "acqRights.totalCost.failure");
        assert_eq!(quads[0].object, crate::quad::Object::Value(Value::Default("abc".into())));
    }
}
