use super::{predicate_for, push_converted, ConvertContext, DataConv, RowQuads};
use crate::quad::NQuad;

/// A users row needs at least the product, the equipment and the count.
const MIN_USERS_CELLS: usize = 3;

pub fn users_quads_for_row(
    ctx: &ConvertContext,
    columns: &[String],
    _scope: &str,
    row: &[String],
    _xid_idx: usize,
) -> Option<RowQuads> {
    if row.len() < MIN_USERS_CELLS {
        return None;
    }

    let mut quads = Vec::with_capacity(row.len() + 6);
    let mut product: Option<(String, &str)> = None;
    let mut equipment: Option<(String, &str)> = None;
    let mut count = "";

    for (column, cell) in columns.iter().zip(row) {
        match predicate_for(&ctx.schemas.users, column).as_str() {
            "product.users" if !cell.is_empty() => {
                let (uid, defining) = ctx.ids.uid_for_type(cell, "product", "product.swidtag", cell);
                quads.extend(defining);
                product = Some((uid, cell.as_str()));
            }
            "equipment.users" if !cell.is_empty() => {
                let (uid, defining) = ctx.ids.uid_for_type(cell, "equipment", "equipment.id", cell);
                quads.extend(defining);
                equipment = Some((uid, cell.as_str()));
            }
            "users.count" => count = cell,
            _ => {}
        }
    }

    let swidtag = product.as_ref().map_or("", |(_, s)| *s);
    let equip_id = equipment.as_ref().map_or("", |(_, e)| *e);
    let users_xid = format!("user_{swidtag}_{equip_id}");
    let (users_uid, defining) =
        ctx.ids
            .uid_for_type(&users_xid, "instance_users", "users.id", &users_xid);
    quads.extend(defining);

    match &product {
        Some((prod_uid, _)) => quads.push(NQuad::edge(prod_uid, "product.users", &users_uid)),
        None => tracing::debug!(users = %users_xid, "users row without product"),
    }
    match &equipment {
        Some((equip_uid, _)) => quads.push(NQuad::edge(equip_uid, "equipment.users", &users_uid)),
        None => tracing::debug!(users = %users_xid, "users row without equipment"),
    }

    push_converted(&mut quads, &users_uid, "users.count", DataConv::Int, count);

    Some(RowQuads {
        quads,
        uid: users_uid,
    })
}
