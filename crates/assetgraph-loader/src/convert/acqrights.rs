use super::{fallback_predicate, push_converted, ConvertContext, RowQuads};
use crate::quad::NQuad;

pub fn acquired_rights_quads_for_row(
    ctx: &ConvertContext,
    columns: &[String],
    _scope: &str,
    row: &[String],
    xid_idx: usize,
) -> Option<RowQuads> {
    let sku = row.get(xid_idx)?;
    let mut quads = Vec::with_capacity(row.len() + 3);
    let (acq_uid, defining) = ctx.ids.uid_for_type(sku, "acqRights", "acqRights.SKU", sku);
    quads.extend(defining);

    for (column, cell) in columns.iter().zip(row) {
        let Some(schema) = ctx.schemas.acq_rights.get(column.as_str()) else {
            tracing::debug!(column = %column, "no acquired rights predicate for column");
            quads.push(NQuad::string(&acq_uid, &fallback_predicate(column), cell));
            continue;
        };

        match schema.predicate {
            "acqRights.swidtag" => {
                if cell.is_empty() {
                    continue;
                }
                quads.push(NQuad::string(&acq_uid, schema.predicate, cell));
                let (uid, defining) = ctx.ids.uid_for_type(cell, "product", "product.swidtag", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&uid, "product.acqRights", &acq_uid));
            }
            predicate => {
                if schema.conv.is_numeric() && cell.is_empty() {
                    continue;
                }
                push_converted(&mut quads, &acq_uid, predicate, schema.conv, cell);
            }
        }
    }

    Some(RowQuads {
        quads,
        uid: acq_uid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::{ctx, facts_of, strings};
    use crate::quad::{Object, Value};

    fn value_of(rq: &RowQuads, predicate: &str) -> Option<Object> {
        rq.quads
            .iter()
            .find(|q| q.subject == rq.uid && q.predicate == predicate)
            .map(|q| q.object.clone())
    }

    #[test]
    fn test_acquired_rights_typed_columns() {
        let ctx = ctx();
        let cols = strings(&[
            "SKU",
            "SWIDTag",
            "Metric",
            "Acquired licenses number",
            "AVG Unit Price",
            "Total cost",
        ]);
        let row = strings(&["SKU-1", "P1", "oracle.processor", "1,200", "10.5", "oops"]);
        let rq = acquired_rights_quads_for_row(&ctx, &cols, "France", &row, 0).unwrap();

        assert_eq!(
            value_of(&rq, "acqRights.numOfAcqLicences"),
            Some(Object::Value(Value::Int(1200)))
        );
        assert_eq!(
            value_of(&rq, "acqRights.averageUnitPrice"),
            Some(Object::Value(Value::Float(10.5)))
        );
        assert_eq!(value_of(&rq, "acqRights.totalCost"), None);
        assert_eq!(
            value_of(&rq, "acqRights.totalCost.failure"),
            Some(Object::Value(Value::Default("oops".into())))
        );
        assert_eq!(
            value_of(&rq, "acqRights.metric"),
            Some(Object::Value(Value::Str("oracle.processor".into())))
        );

        let (prod, _) = ctx.ids.uid_for_xid("P1");
        assert!(facts_of(&rq, &prod).contains(&("product.acqRights".into(), rq.uid.clone())));
    }

    #[test]
    fn test_unknown_acquired_rights_column_is_kept() {
        let ctx = ctx();
        let cols = strings(&["SKU", "Contract Number"]);
        let row = strings(&["SKU-1", "C-77"]);
        let rq = acquired_rights_quads_for_row(&ctx, &cols, "France", &row, 0).unwrap();
        assert!(facts_of(&rq, &rq.uid).contains(&("Contract_Number".into(), "C-77".into())));
    }

    #[test]
    fn test_empty_numeric_cell_is_skipped() {
        let ctx = ctx();
        let cols = strings(&["SKU", "Total cost"]);
        let row = strings(&["SKU-1", ""]);
        let rq = acquired_rights_quads_for_row(&ctx, &cols, "France", &row, 0).unwrap();
        assert!(rq.quads.iter().all(|q| !q.predicate.starts_with("acqRights.totalCost")));
    }
}
