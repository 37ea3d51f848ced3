use super::{clamp_u32, SqliteStore};
use anyhow::{Context, Result};
use defipoly_core_types::{SetCooldownRow, StealCooldownRow};
use rusqlite::{params, OptionalExtension, Row};

fn set_cooldown_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, i64, i64, Option<i64>, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_set_cooldown(
    (wallet_address, set_id, last_purchase_timestamp, cooldown_duration, last_property, count): (
        String,
        i64,
        i64,
        i64,
        Option<i64>,
        i64,
    ),
) -> SetCooldownRow {
    SetCooldownRow {
        wallet_address,
        set_id: clamp_u32(set_id) as u8,
        last_purchase_timestamp,
        cooldown_duration,
        last_purchased_property_id: last_property.map(|id| clamp_u32(id) as u8),
        properties_count: clamp_u32(count),
    }
}

impl SqliteStore {
    pub fn set_cooldowns_for_wallet(&self, wallet: &str) -> Result<Vec<SetCooldownRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT wallet_address, set_id, last_purchase_timestamp, cooldown_duration,
                        last_purchased_property_id, properties_count
                 FROM player_set_cooldowns
                 WHERE wallet_address = ?1
                 ORDER BY set_id",
            )
            .context("failed preparing set cooldowns query")?;
        let rows: Vec<_> = stmt
            .query_map(params![wallet], set_cooldown_from_row)
            .context("failed querying set cooldowns")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading set cooldown rows")?;
        Ok(rows.into_iter().map(into_set_cooldown).collect())
    }

    /// Absent row means the wallet has never bought into the set, which the
    /// evaluator treats as no cooldown.
    pub fn set_cooldown(&self, wallet: &str, set_id: u8) -> Result<Option<SetCooldownRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wallet_address, set_id, last_purchase_timestamp, cooldown_duration,
                        last_purchased_property_id, properties_count
                 FROM player_set_cooldowns
                 WHERE wallet_address = ?1 AND set_id = ?2",
                params![wallet, set_id],
                set_cooldown_from_row,
            )
            .optional()
            .context("failed querying set cooldown")?;
        Ok(row.map(into_set_cooldown))
    }

    pub fn steal_cooldowns_for_wallet(&self, wallet: &str) -> Result<Vec<StealCooldownRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT wallet_address, property_id, last_steal_timestamp, cooldown_duration
                 FROM player_steal_cooldowns
                 WHERE wallet_address = ?1
                 ORDER BY property_id",
            )
            .context("failed preparing steal cooldowns query")?;
        let rows: Vec<(String, i64, i64, i64)> = stmt
            .query_map(params![wallet], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .context("failed querying steal cooldowns")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading steal cooldown rows")?;
        Ok(rows
            .into_iter()
            .map(
                |(wallet_address, property_id, last_steal_timestamp, cooldown_duration)| {
                    StealCooldownRow {
                        wallet_address,
                        property_id: clamp_u32(property_id) as u8,
                        last_steal_timestamp,
                        cooldown_duration,
                    }
                },
            )
            .collect())
    }

    pub fn steal_cooldown(
        &self,
        wallet: &str,
        property_id: u8,
    ) -> Result<Option<StealCooldownRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wallet_address, property_id, last_steal_timestamp, cooldown_duration
                 FROM player_steal_cooldowns
                 WHERE wallet_address = ?1 AND property_id = ?2",
                params![wallet, property_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("failed querying steal cooldown")?;
        Ok(row.map(
            |(wallet_address, property_id, last_steal_timestamp, cooldown_duration): (
                String,
                i64,
                i64,
                i64,
            )| StealCooldownRow {
                wallet_address,
                property_id: clamp_u32(property_id) as u8,
                last_steal_timestamp,
                cooldown_duration,
            },
        ))
    }
}
