//! Auto-sell repository: the per-run set of liquidated item stacks.

use std::collections::BTreeMap;

use rusqlite::{Connection, params};
use tracing::instrument;

use crate::errors::{LedgerError, Result};
use crate::ids::RunKey;
use crate::sqlite::row_helpers::get;
use crate::types::ItemStack;

const TABLE: &str = "auto_sell_items";

/// Auto-sell repository; stateless, every method takes `&Connection`.
pub(crate) struct AutoSellRepo;

impl AutoSellRepo {
    /// Replace a run's auto-sell set. Stacks sharing item and titles are
    /// folded into one row; a folded quantity past `u32::MAX` is
    /// `InvalidArgument` and nothing is written.
    #[instrument(skip(conn, items), fields(count = items.len()))]
    pub(crate) fn replace(conn: &Connection, run: &RunKey, items: &[ItemStack]) -> Result<()> {
        let folded = fold_stacks(items)?;
        let _ = conn.execute(
            "DELETE FROM auto_sell_items WHERE run_id = ?1",
            params![run.as_str()],
        )?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO auto_sell_items (run_id, item_id, super_rare_title_id, normal_title_id,
             quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for ((item_id, super_rare_title_id, normal_title_id), quantity) in folded {
            let _ = stmt.execute(params![
                run.as_str(),
                item_id,
                super_rare_title_id,
                normal_title_id,
                quantity,
            ])?;
        }
        Ok(())
    }

    pub(crate) fn list(conn: &Connection, run: &RunKey) -> Result<Vec<ItemStack>> {
        let mut stmt = conn.prepare(
            "SELECT item_id, super_rare_title_id, normal_title_id, quantity
             FROM auto_sell_items WHERE run_id = ?1
             ORDER BY item_id, super_rare_title_id, normal_title_id",
        )?;
        let mut rows = stmt.query(params![run.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ItemStack {
                item_id: get(row, "item_id", TABLE)?,
                super_rare_title_id: get(row, "super_rare_title_id", TABLE)?,
                normal_title_id: get(row, "normal_title_id", TABLE)?,
                quantity: get(row, "quantity", TABLE)?,
            });
        }
        Ok(out)
    }
}

fn fold_stacks(items: &[ItemStack]) -> Result<BTreeMap<(u16, u8, u8), u32>> {
    let mut folded = BTreeMap::new();
    for item in items {
        let key = (item.item_id, item.super_rare_title_id, item.normal_title_id);
        let quantity: &mut u32 = folded.entry(key).or_default();
        *quantity = quantity.checked_add(item.quantity).ok_or_else(|| {
            LedgerError::InvalidArgument(format!(
                "auto-sold quantity of item {} overflows u32",
                item.item_id
            ))
        })?;
    }
    Ok(folded)
}
