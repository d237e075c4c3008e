use super::{predicate_for, ConvertContext, RowQuads};
use crate::quad::NQuad;

pub fn instances_quads_for_row(
    ctx: &ConvertContext,
    columns: &[String],
    _scope: &str,
    row: &[String],
    xid_idx: usize,
) -> Option<RowQuads> {
    let inst_id = row.get(xid_idx)?;
    let mut quads = Vec::with_capacity(row.len() + 3);
    let (inst_uid, defining) =
        ctx.ids
            .uid_for_type(&format!("inst_{inst_id}"), "instance", "instance.id", inst_id);
    quads.extend(defining);

    for (column, cell) in columns.iter().zip(row) {
        let predicate = predicate_for(&ctx.schemas.instances, column);
        match predicate.as_str() {
            "instance.product" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) = ctx.ids.uid_for_type(cell, "product", "product.swidtag", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&inst_uid, &predicate, &uid));
            }
            "application.id" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) = ctx.ids.uid_for_type(
                    &format!("app_{cell}"),
                    "application",
                    "application.id",
                    cell,
                );
                quads.extend(defining);
                quads.push(NQuad::edge(&uid, "application.instance", &inst_uid));
            }
            "instance.equipment" => {
                if cell.is_empty() {
                    continue;
                }
                let (uid, defining) = ctx.ids.uid_for_type(cell, "equipment", "equipment.id", cell);
                quads.extend(defining);
                quads.push(NQuad::edge(&inst_uid, "instance.equipment", &uid));
            }
            _ => quads.push(NQuad::string(&inst_uid, &predicate, cell)),
        }
    }

    Some(RowQuads {
        quads,
        uid: inst_uid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::{ctx, facts_of, strings};

    #[test]
    fn test_instance_links_application_product_and_equipment() {
        let ctx = ctx();
        let cols = strings(&["IdInstance", "Environment", "SWIDTag", "IdApplication", "IdEquipment"]);
        let row = strings(&["I1", "Production", "P1", "42", "SRV-1"]);
        let rq = instances_quads_for_row(&ctx, &cols, "France", &row, 0).unwrap();

        let (inst, _) = ctx.ids.uid_for_xid("inst_I1");
        let (app, _) = ctx.ids.uid_for_xid("app_42");
        let (prod, _) = ctx.ids.uid_for_xid("P1");
        let (srv, _) = ctx.ids.uid_for_xid("SRV-1");
        assert_eq!(rq.uid, inst);

        let facts = facts_of(&rq, &inst);
        assert!(facts.contains(&("type_name".into(), "instance".into())));
        assert!(facts.contains(&("instance.id".into(), "I1".into())));
        assert!(facts.contains(&("instance.environment".into(), "Production".into())));
        assert!(facts.contains(&("instance.product".into(), prod)));
        assert!(facts.contains(&("instance.equipment".into(), srv)));

        let app_facts = facts_of(&rq, &app);
        assert!(app_facts.contains(&("application.instance".into(), inst.clone())));
        assert!(app_facts.contains(&("application.id".into(), "42".into())));
    }
}
