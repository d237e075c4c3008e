use super::{predicate_for, ConvertContext, RowQuads};
use crate::quad::NQuad;

pub fn applications_quads_for_row(
    ctx: &ConvertContext,
    columns: &[String],
    _scope: &str,
    row: &[String],
    xid_idx: usize,
) -> Option<RowQuads> {
    let app_id = row.get(xid_idx)?;
    let mut quads = Vec::with_capacity(row.len() + 3);
    let (app_uid, defining) =
        ctx.ids
            .uid_for_type(&format!("app_{app_id}"), "application", "application.id", app_id);
    quads.extend(defining);

    for (column, cell) in columns.iter().zip(row) {
        let predicate = predicate_for(&ctx.schemas.applications, column);
        match predicate.as_str() {
            "application.product" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) = ctx.ids.uid_for_type(cell, "product", "product.swidtag", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&app_uid, &predicate, &uid));
            }
            _ => quads.push(NQuad::string(&app_uid, &predicate, cell)),
        }
    }

    Some(RowQuads {
        quads,
        uid: app_uid,
    })
}
