use super::{predicate_for, ConvertContext, RowQuads};
use crate::quad::NQuad;

pub fn products_quads_for_row(
    ctx: &ConvertContext,
    columns: &[String],
    _scope: &str,
    row: &[String],
    xid_idx: usize,
) -> Option<RowQuads> {
    let swidtag = row.get(xid_idx)?;
    let mut quads = Vec::with_capacity(row.len() + 3);
    let (prod_uid, defining) = ctx
        .ids
        .uid_for_type(swidtag, "product", "product.swidtag", swidtag);
    quads.extend(defining);

    for (column, cell) in columns.iter().zip(row) {
        let predicate = predicate_for(&ctx.schemas.products, column);
        match predicate.as_str() {
            "product.child" => {
                if cell.is_empty() {
                    continue;
                }
                // The row's product is an option of the product named in the cell.
                let (uid, defining) = ctx.ids.uid_for_type(cell, "product", "product.swidtag", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&uid, &predicate, &prod_uid));
            }
            "product.equipment" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) = ctx.ids.uid_for_type(cell, "equipment", "equipment.id", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&prod_uid, "product.equipment", &uid));
            }
            "product.editor" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) =
                    ctx.ids
                        .uid_for_type(&format!("editor_{cell}"), "editor", "editor.name", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&uid, "editor.product", &prod_uid));
                quads.push(NQuad::string(&prod_uid, "product.editor", cell));
            }
            _ => quads.push(NQuad::string(&prod_uid, &predicate, cell)),
        }
    }

    Some(RowQuads {
        quads,
        uid: prod_uid,
    })
}
