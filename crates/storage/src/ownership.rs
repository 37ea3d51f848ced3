use super::{clamp_u32, parse_utc, SqliteStore};
use anyhow::{Context, Result};
use defipoly_core_types::{OwnershipRow, PropertyOwnerRow};
use rusqlite::params;

impl SqliteStore {
    pub fn ownership_for_wallet(&self, wallet: &str) -> Result<Vec<OwnershipRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT wallet_address, property_id, slots_owned, slots_shielded,
                        shield_expiry, steal_protection_expiry, purchase_timestamp, last_updated
                 FROM property_ownership
                 WHERE wallet_address = ?1 AND slots_owned > 0
                 ORDER BY property_id",
            )
            .context("failed preparing ownership query")?;

        let raw: Vec<(String, i64, i64, i64, i64, i64, i64, String)> = stmt
            .query_map(params![wallet], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .context("failed querying ownership")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading ownership rows")?;

        raw.into_iter()
            .map(
                |(
                    wallet_address,
                    property_id,
                    slots_owned,
                    slots_shielded,
                    shield_expiry,
                    steal_protection_expiry,
                    purchase_timestamp,
                    last_updated,
                )| {
                    Ok(OwnershipRow {
                        wallet_address,
                        property_id: clamp_u32(property_id) as u8,
                        slots_owned: clamp_u32(slots_owned),
                        slots_shielded: clamp_u32(slots_shielded),
                        shield_expiry,
                        steal_protection_expiry,
                        purchase_timestamp,
                        last_updated: parse_utc("property_ownership.last_updated", &last_updated)?,
                    })
                },
            )
            .collect()
    }

    /// Every wallet currently holding slots of a property, with shield
    /// coverage evaluated against `now_ts` so expired shields count as open.
    pub fn property_owners(
        &self,
        property_id: u8,
        exclude_wallet: Option<&str>,
        now_ts: i64,
    ) -> Result<Vec<PropertyOwnerRow>> {
        self.query_property_owners(property_id, exclude_wallet, false, now_ts)
    }

    /// Owners an attacker may currently hit: excludes the attacker itself,
    /// wallets under steal protection, and fully shielded positions.
    pub fn steal_targets(
        &self,
        property_id: u8,
        attacker: &str,
        now_ts: i64,
    ) -> Result<Vec<PropertyOwnerRow>> {
        self.query_property_owners(property_id, Some(attacker), true, now_ts)
    }

    fn query_property_owners(
        &self,
        property_id: u8,
        exclude_wallet: Option<&str>,
        stealable_only: bool,
        now_ts: i64,
    ) -> Result<Vec<PropertyOwnerRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT wallet_address, slots_owned, slots_shielded,
                        shield_expiry, steal_protection_expiry
                 FROM property_ownership
                 WHERE property_id = ?1 AND slots_owned > 0
                 ORDER BY slots_owned DESC, wallet_address",
            )
            .context("failed preparing property owners query")?;

        let raw: Vec<(String, i64, i64, i64, i64)> = stmt
            .query_map(params![property_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })
            .context("failed querying property owners")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading property owner rows")?;

        let mut owners = Vec::with_capacity(raw.len());
        for (wallet_address, slots_owned, slots_shielded, shield_expiry, protection_expiry) in raw {
            if exclude_wallet == Some(wallet_address.as_str()) {
                continue;
            }
            let slots_owned = clamp_u32(slots_owned);
            let effective_shielded = if shield_expiry > now_ts {
                clamp_u32(slots_shielded).min(slots_owned)
            } else {
                0
            };
            let unshielded_slots = slots_owned - effective_shielded;
            if stealable_only && (unshielded_slots == 0 || protection_expiry > now_ts) {
                continue;
            }
            owners.push(PropertyOwnerRow {
                wallet_address,
                slots_owned,
                effective_shielded,
                unshielded_slots,
                shield_expiry,
                steal_protection_expiry: protection_expiry,
            });
        }
        Ok(owners)
    }
}
