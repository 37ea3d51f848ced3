use super::{clamp_u32, clamp_u64, parse_utc, u64_to_sql_i64, SqliteStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use defipoly_core_types::{ActionFeedRow, ActionKind, ActionRecord, ApplyActionOutcome};
use rusqlite::{params, Connection, OptionalExtension};

impl SqliteStore {
    /// Applies one settled game transaction to the mirror atomically.
    ///
    /// The `game_actions` signature ledger is the dedup gate: if the
    /// signature was seen before, nothing else changes and `Duplicate` is
    /// returned. Otherwise ownership, cooldowns, stats and derived
    /// aggregates all move in the same `BEGIN IMMEDIATE` transaction, so a
    /// crash can never leave a half-applied action behind.
    pub fn apply_action(
        &self,
        record: &ActionRecord,
        steal_protection_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<ApplyActionOutcome> {
        validate_action(record)?;
        let now_rfc = now.to_rfc3339();

        self.with_immediate_write_tx(|conn| {
            let inserted = insert_action_ledger_on_conn(conn, record, &now_rfc)?;
            if !inserted {
                return Ok(ApplyActionOutcome::Duplicate);
            }

            match record.kind {
                ActionKind::Buy => apply_buy_on_conn(conn, record, &now_rfc)?,
                ActionKind::Sell => apply_sell_on_conn(conn, record, &now_rfc)?,
                ActionKind::StealSuccess => {
                    apply_steal_success_on_conn(conn, record, steal_protection_seconds, &now_rfc)?
                }
                ActionKind::StealFailed => apply_steal_cooldown_on_conn(conn, record, &now_rfc)?,
                ActionKind::Shield => apply_shield_on_conn(conn, record, &now_rfc)?,
                ActionKind::Claim => {}
            }

            bump_player_stats_on_conn(conn, record, &now_rfc)?;
            recompute_derived_stats_on_conn(conn, &record.player, &now_rfc)?;
            if record.kind == ActionKind::StealSuccess {
                if let Some(target) = record.target.as_deref() {
                    recompute_derived_stats_on_conn(conn, target, &now_rfc)?;
                }
            }

            Ok(ApplyActionOutcome::Applied)
        })
        .with_context(|| format!("failed applying action signature={}", record.signature))
    }

    pub fn list_recent_actions(&self, limit: u32) -> Result<Vec<ActionFeedRow>> {
        self.query_action_feed(
            "SELECT id, tx_signature, action_type, player_address, property_id, target_address,
                    amount, slots, block_time, recorded_at
             FROM game_actions
             ORDER BY block_time DESC, id DESC
             LIMIT ?1",
            params![limit],
        )
    }

    pub fn list_actions_by_player(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActionFeedRow>> {
        self.query_action_feed(
            "SELECT id, tx_signature, action_type, player_address, property_id, target_address,
                    amount, slots, block_time, recorded_at
             FROM game_actions
             WHERE player_address = ?1 OR target_address = ?1
             ORDER BY block_time DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            params![wallet, limit, offset],
        )
    }

    pub fn list_actions_by_property(
        &self,
        property_id: u8,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActionFeedRow>> {
        self.query_action_feed(
            "SELECT id, tx_signature, action_type, player_address, property_id, target_address,
                    amount, slots, block_time, recorded_at
             FROM game_actions
             WHERE property_id = ?1
             ORDER BY block_time DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            params![property_id, limit, offset],
        )
    }

    fn query_action_feed(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ActionFeedRow>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed preparing action feed query")?;
        let raw: Vec<RawActionRow> = stmt
            .query_map(params, |row| {
                Ok(RawActionRow {
                    id: row.get(0)?,
                    tx_signature: row.get(1)?,
                    action_type: row.get(2)?,
                    player_address: row.get(3)?,
                    property_id: row.get(4)?,
                    target_address: row.get(5)?,
                    amount: row.get(6)?,
                    slots: row.get(7)?,
                    block_time: row.get(8)?,
                    recorded_at: row.get(9)?,
                })
            })
            .context("failed querying action feed")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading action feed rows")?;

        raw.into_iter().map(RawActionRow::into_feed_row).collect()
    }
}

struct RawActionRow {
    id: i64,
    tx_signature: String,
    action_type: String,
    player_address: String,
    property_id: Option<i64>,
    target_address: Option<String>,
    amount: i64,
    slots: i64,
    block_time: i64,
    recorded_at: String,
}

impl RawActionRow {
    fn into_feed_row(self) -> Result<ActionFeedRow> {
        let kind: ActionKind = self
            .action_type
            .parse()
            .map_err(|message: String| anyhow!(message))
            .with_context(|| format!("bad action_type for signature={}", self.tx_signature))?;
        Ok(ActionFeedRow {
            id: self.id,
            tx_signature: self.tx_signature,
            kind,
            player_address: self.player_address,
            property_id: self.property_id.map(|id| clamp_u32(id) as u8),
            target_address: self.target_address,
            amount: clamp_u64(self.amount),
            slots: clamp_u32(self.slots),
            block_time: self.block_time,
            recorded_at: parse_utc("game_actions.recorded_at", &self.recorded_at)?,
        })
    }
}

fn required_property_id(record: &ActionRecord) -> Result<u8> {
    record
        .property_id
        .ok_or_else(|| anyhow!("action kind={} requires a property id", record.kind))
}

fn required_target(record: &ActionRecord) -> Result<&str> {
    record
        .target
        .as_deref()
        .ok_or_else(|| anyhow!("action kind={} requires a target wallet", record.kind))
}

fn validate_action(record: &ActionRecord) -> Result<()> {
    if record.signature.trim().is_empty() {
        return Err(anyhow!("action signature must not be empty"));
    }
    if record.player.trim().is_empty() {
        return Err(anyhow!("action player must not be empty"));
    }
    if record.block_time <= 0 {
        return Err(anyhow!(
            "action block_time must be positive, got {}",
            record.block_time
        ));
    }

    let needs_property = !matches!(record.kind, ActionKind::Claim);
    if needs_property {
        let property_id = required_property_id(record)?;
        if defipoly_board::property(property_id).is_none() {
            return Err(anyhow!("unknown property id: {}", property_id));
        }
    }

    let needs_slots = matches!(
        record.kind,
        ActionKind::Buy | ActionKind::Sell | ActionKind::StealSuccess | ActionKind::Shield
    );
    if needs_slots && record.slots == 0 {
        return Err(anyhow!("action kind={} requires slots >= 1", record.kind));
    }

    if record.kind == ActionKind::StealSuccess {
        let target = required_target(record)?;
        if target == record.player {
            return Err(anyhow!("steal target must differ from the attacker"));
        }
    }

    Ok(())
}

/// Returns false when the signature was already recorded.
fn insert_action_ledger_on_conn(
    conn: &Connection,
    record: &ActionRecord,
    now_rfc: &str,
) -> Result<bool> {
    let changed = conn
        .execute(
            "INSERT INTO game_actions(
                tx_signature, action_type, player_address, property_id,
                target_address, amount, slots, block_time, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(tx_signature) DO NOTHING",
            params![
                record.signature,
                record.kind.as_str(),
                record.player,
                record.property_id,
                record.target,
                u64_to_sql_i64("game_actions.amount", record.amount)?,
                record.slots,
                record.block_time,
                now_rfc,
            ],
        )
        .context("failed inserting game action ledger row")?;
    Ok(changed > 0)
}

fn apply_buy_on_conn(conn: &Connection, record: &ActionRecord, now_rfc: &str) -> Result<()> {
    let property_id = required_property_id(record)?;

    conn.execute(
        "INSERT INTO property_ownership(
            wallet_address, property_id, slots_owned, purchase_timestamp, last_updated
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(wallet_address, property_id) DO UPDATE SET
            slots_owned = slots_owned + excluded.slots_owned,
            purchase_timestamp = excluded.purchase_timestamp,
            last_updated = excluded.last_updated",
        params![
            record.player,
            property_id,
            record.slots,
            record.block_time,
            now_rfc
        ],
    )
    .context("failed upserting ownership for buy")?;

    conn.execute(
        "UPDATE properties_state
         SET available_slots = MAX(0, available_slots - ?1),
             last_synced = ?2
         WHERE property_id = ?3",
        params![record.slots, now_rfc, property_id],
    )
    .context("failed decrementing available slots for buy")?;

    refresh_set_cooldown_on_conn(conn, record, property_id, now_rfc)
}

fn apply_sell_on_conn(conn: &Connection, record: &ActionRecord, now_rfc: &str) -> Result<()> {
    let property_id = required_property_id(record)?;

    // Shield can never cover more slots than remain owned.
    conn.execute(
        "UPDATE property_ownership
         SET slots_owned = MAX(0, slots_owned - ?1),
             slots_shielded = MIN(slots_shielded, MAX(0, slots_owned - ?1)),
             last_updated = ?2
         WHERE wallet_address = ?3 AND property_id = ?4",
        params![record.slots, now_rfc, record.player, property_id],
    )
    .context("failed updating ownership for sell")?;

    conn.execute(
        "UPDATE properties_state
         SET available_slots = MIN(max_slots, available_slots + ?1),
             last_synced = ?2
         WHERE property_id = ?3",
        params![record.slots, now_rfc, property_id],
    )
    .context("failed returning available slots for sell")?;

    Ok(())
}

fn apply_steal_success_on_conn(
    conn: &Connection,
    record: &ActionRecord,
    steal_protection_seconds: i64,
    now_rfc: &str,
) -> Result<()> {
    let property_id = required_property_id(record)?;
    let target = required_target(record)?;
    let protection_expiry = record.block_time.saturating_add(steal_protection_seconds);

    // Victim loses the slots and gets a protection window on this property.
    conn.execute(
        "UPDATE property_ownership
         SET slots_owned = MAX(0, slots_owned - ?1),
             slots_shielded = MIN(slots_shielded, MAX(0, slots_owned - ?1)),
             steal_protection_expiry = ?2,
             last_updated = ?3
         WHERE wallet_address = ?4 AND property_id = ?5",
        params![record.slots, protection_expiry, now_rfc, target, property_id],
    )
    .context("failed updating victim ownership for steal")?;

    conn.execute(
        "INSERT INTO property_ownership(
            wallet_address, property_id, slots_owned, purchase_timestamp, last_updated
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(wallet_address, property_id) DO UPDATE SET
            slots_owned = slots_owned + excluded.slots_owned,
            last_updated = excluded.last_updated",
        params![
            record.player,
            property_id,
            record.slots,
            record.block_time,
            now_rfc
        ],
    )
    .context("failed upserting attacker ownership for steal")?;

    apply_steal_cooldown_on_conn(conn, record, now_rfc)
}

/// Both successful and failed steal attempts arm the per-property steal
/// cooldown, at half the property's purchase cooldown.
fn apply_steal_cooldown_on_conn(
    conn: &Connection,
    record: &ActionRecord,
    now_rfc: &str,
) -> Result<()> {
    let property_id = required_property_id(record)?;
    let duration = defipoly_board::steal_cooldown_seconds(property_id);
    conn.execute(
        "INSERT INTO player_steal_cooldowns(
            wallet_address, property_id, last_steal_timestamp, cooldown_duration, last_synced
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(wallet_address, property_id) DO UPDATE SET
            last_steal_timestamp = excluded.last_steal_timestamp,
            cooldown_duration = excluded.cooldown_duration,
            last_synced = excluded.last_synced",
        params![
            record.player,
            property_id,
            record.block_time,
            duration,
            now_rfc
        ],
    )
    .context("failed upserting steal cooldown")?;
    Ok(())
}

fn apply_shield_on_conn(conn: &Connection, record: &ActionRecord, now_rfc: &str) -> Result<()> {
    let property_id = required_property_id(record)?;
    let shield_expiry = record
        .shield_duration_seconds
        .map(|duration| record.block_time.saturating_add(duration));

    // Without an explicit duration the previous expiry is kept; the chain
    // sync owns the authoritative value in that case.
    conn.execute(
        "UPDATE property_ownership
         SET slots_shielded = MIN(?1, slots_owned),
             shield_expiry = COALESCE(?2, shield_expiry),
             last_updated = ?3
         WHERE wallet_address = ?4 AND property_id = ?5",
        params![
            record.slots,
            shield_expiry,
            now_rfc,
            record.player,
            property_id
        ],
    )
    .context("failed updating ownership for shield")?;
    Ok(())
}

fn refresh_set_cooldown_on_conn(
    conn: &Connection,
    record: &ActionRecord,
    property_id: u8,
    now_rfc: &str,
) -> Result<()> {
    let set_id = defipoly_board::property(property_id)
        .map(|p| p.set_id)
        .ok_or_else(|| anyhow!("unknown property id: {}", property_id))?;
    let duration = defipoly_board::set_cooldown_seconds(set_id);
    let holdings = holdings_for_wallet_on_conn(conn, &record.player)?;
    let owned_in_set = holdings
        .iter()
        .filter(|(id, slots)| {
            *slots > 0
                && defipoly_board::property(*id)
                    .map(|p| p.set_id == set_id)
                    .unwrap_or(false)
        })
        .count() as u32;

    conn.execute(
        "INSERT INTO player_set_cooldowns(
            wallet_address, set_id, last_purchase_timestamp, cooldown_duration,
            last_purchased_property_id, properties_count, last_synced
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(wallet_address, set_id) DO UPDATE SET
            last_purchase_timestamp = excluded.last_purchase_timestamp,
            cooldown_duration = excluded.cooldown_duration,
            last_purchased_property_id = excluded.last_purchased_property_id,
            properties_count = excluded.properties_count,
            last_synced = excluded.last_synced",
        params![
            record.player,
            set_id,
            record.block_time,
            duration,
            property_id,
            owned_in_set,
            now_rfc
        ],
    )
    .context("failed upserting set cooldown")?;
    Ok(())
}

fn bump_player_stats_on_conn(
    conn: &Connection,
    record: &ActionRecord,
    now_rfc: &str,
) -> Result<()> {
    ensure_stats_row_on_conn(conn, &record.player, now_rfc)?;

    let amount = u64_to_sql_i64("player_stats.amount", record.amount)?;
    let (column, spent, earned) = match record.kind {
        ActionKind::Buy => ("properties_bought", amount, 0),
        ActionKind::Sell => ("properties_sold", 0, amount),
        ActionKind::StealSuccess => ("successful_steals", amount, 0),
        ActionKind::StealFailed => ("failed_steals", amount, 0),
        ActionKind::Shield => ("shields_activated", amount, 0),
        ActionKind::Claim => ("rewards_claimed", 0, amount),
    };

    let sql = format!(
        "UPDATE player_stats
         SET total_actions = total_actions + 1,
             {column} = {column} + 1,
             total_spent = total_spent + ?1,
             total_earned = total_earned + ?2,
             last_action_time = ?3,
             last_claim_timestamp = CASE WHEN ?4 THEN ?3 ELSE last_claim_timestamp END,
             updated_at = ?5
         WHERE wallet_address = ?6"
    );
    conn.execute(
        &sql,
        params![
            spent,
            earned,
            record.block_time,
            record.kind == ActionKind::Claim,
            now_rfc,
            record.player
        ],
    )
    .context("failed bumping player stats")?;

    if record.kind == ActionKind::StealSuccess {
        if let Some(target) = record.target.as_deref() {
            ensure_stats_row_on_conn(conn, target, now_rfc)?;
            conn.execute(
                "UPDATE player_stats
                 SET times_stolen = times_stolen + 1,
                     updated_at = ?1
                 WHERE wallet_address = ?2",
                params![now_rfc, target],
            )
            .context("failed bumping victim stats")?;
        }
    }

    Ok(())
}

fn ensure_stats_row_on_conn(conn: &Connection, wallet: &str, now_rfc: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO player_stats(wallet_address, updated_at) VALUES (?1, ?2)
         ON CONFLICT(wallet_address) DO NOTHING",
        params![wallet, now_rfc],
    )
    .context("failed ensuring player stats row")?;
    Ok(())
}

pub(crate) fn holdings_for_wallet_on_conn(
    conn: &Connection,
    wallet: &str,
) -> Result<Vec<(u8, u32)>> {
    let mut stmt = conn
        .prepare(
            "SELECT property_id, slots_owned
             FROM property_ownership
             WHERE wallet_address = ?1 AND slots_owned > 0",
        )
        .context("failed preparing holdings query")?;
    let holdings = stmt
        .query_map(params![wallet], |row| {
            let property_id: i64 = row.get(0)?;
            let slots: i64 = row.get(1)?;
            Ok((clamp_u32(property_id) as u8, clamp_u32(slots)))
        })
        .context("failed querying holdings")?
        .collect::<rusqlite::Result<_>>()
        .context("failed reading holdings rows")?;
    Ok(holdings)
}

/// Refreshes the ownership-derived aggregates after any slot movement.
pub(crate) fn recompute_derived_stats_on_conn(
    conn: &Connection,
    wallet: &str,
    now_rfc: &str,
) -> Result<()> {
    let holdings = holdings_for_wallet_on_conn(conn, wallet)?;
    let total_slots = defipoly_board::total_slots(&holdings);
    let complete_sets = defipoly_board::complete_sets(&holdings);
    let daily_income = defipoly_board::daily_income(&holdings);

    ensure_stats_row_on_conn(conn, wallet, now_rfc)?;
    let (bought, steals, shields, earned): (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT properties_bought, successful_steals, shields_activated, total_earned
             FROM player_stats
             WHERE wallet_address = ?1",
            params![wallet],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .context("failed reading stats counters for recompute")?
        .unwrap_or_default();

    let score = defipoly_board::leaderboard_score(
        clamp_u64(earned),
        clamp_u32(bought),
        clamp_u32(steals),
        complete_sets,
        clamp_u32(shields),
    );

    conn.execute(
        "UPDATE player_stats
         SET total_slots_owned = ?1,
             complete_sets = ?2,
             daily_income = ?3,
             leaderboard_score = ?4,
             updated_at = ?5
         WHERE wallet_address = ?6",
        params![
            total_slots,
            complete_sets,
            u64_to_sql_i64("player_stats.daily_income", daily_income)?,
            u64_to_sql_i64("player_stats.leaderboard_score", score)?,
            now_rfc,
            wallet
        ],
    )
    .context("failed writing derived stats")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
    use defipoly_core_types::ApplyActionOutcome;
    use std::path::Path;
    use tempfile::tempdir;

    const PROTECTION: i64 = 6 * 3600;

    fn open_migrated(path: &Path) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(path)?;
        let migration_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        store.run_migrations(&migration_dir)?;
        store.seed_properties_state(test_now())?;
        Ok(store)
    }

    fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-04-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn buy(signature: &str, player: &str, property_id: u8, slots: u32, block_time: i64) -> ActionRecord {
        ActionRecord {
            signature: signature.to_string(),
            kind: ActionKind::Buy,
            player: player.to_string(),
            property_id: Some(property_id),
            target: None,
            amount: u64::from(slots) * 1_500_000_000_000,
            slots,
            shield_duration_seconds: None,
            block_time,
        }
    }

    #[test]
    fn buy_updates_ownership_cooldown_state_and_stats() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("buy.db"))?;
        let block_time = 1_760_000_000;

        let outcome = store.apply_action(&buy("sig-buy-1", "alice", 0, 3, block_time), PROTECTION, test_now())?;
        assert_eq!(outcome, ApplyActionOutcome::Applied);

        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership.len(), 1);
        assert_eq!(ownership[0].property_id, 0);
        assert_eq!(ownership[0].slots_owned, 3);
        assert_eq!(ownership[0].purchase_timestamp, block_time);

        let cooldowns = store.set_cooldowns_for_wallet("alice")?;
        assert_eq!(cooldowns.len(), 1);
        assert_eq!(cooldowns[0].set_id, 0);
        assert_eq!(cooldowns[0].last_purchase_timestamp, block_time);
        assert_eq!(cooldowns[0].cooldown_duration, 6 * 3600);
        assert_eq!(cooldowns[0].last_purchased_property_id, Some(0));
        assert_eq!(cooldowns[0].properties_count, 1);

        let state = store
            .property_state(0)?
            .context("expected seeded property state")?;
        assert_eq!(state.max_slots, 600);
        assert_eq!(state.available_slots, 597);

        let stats = store
            .player_stats("alice")?
            .context("expected stats row")?;
        assert_eq!(stats.total_actions, 1);
        assert_eq!(stats.properties_bought, 1);
        assert_eq!(stats.total_slots_owned, 3);
        assert_eq!(stats.complete_sets, 0);
        // 3 slots of Mediterranean: 3 * 1500 * 600bps = 270/day.
        assert_eq!(stats.daily_income, 270);
        assert_eq!(stats.last_action_time, block_time);
        Ok(())
    }

    #[test]
    fn duplicate_signature_is_ignored_without_side_effects() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("dup.db"))?;
        let record = buy("sig-dup-1", "alice", 0, 2, 1_760_000_000);

        assert_eq!(
            store.apply_action(&record, PROTECTION, test_now())?,
            ApplyActionOutcome::Applied
        );
        assert_eq!(
            store.apply_action(&record, PROTECTION, test_now())?,
            ApplyActionOutcome::Duplicate
        );

        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership[0].slots_owned, 2);
        let stats = store.player_stats("alice")?.context("stats")?;
        assert_eq!(stats.total_actions, 1);
        assert_eq!(stats.properties_bought, 1);
        Ok(())
    }

    #[test]
    fn parallel_appliers_agree_on_a_single_application() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let db_path = temp.path().join("race.db");
        drop(open_migrated(&db_path)?);

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(3));
        let spawn_applier = || {
            let path = db_path.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || -> Result<ApplyActionOutcome> {
                let store = SqliteStore::open(&path)?;
                barrier.wait();
                store.apply_action(&buy("sig-race-1", "alice", 0, 1, 1_760_000_000), PROTECTION, test_now())
            })
        };
        let worker_a = spawn_applier();
        let worker_b = spawn_applier();
        barrier.wait();

        let outcome_a = worker_a.join().expect("worker a panicked")?;
        let outcome_b = worker_b.join().expect("worker b panicked")?;
        let applied = [outcome_a, outcome_b]
            .iter()
            .filter(|outcome| **outcome == ApplyActionOutcome::Applied)
            .count();
        assert_eq!(applied, 1, "exactly one applier must win the signature");

        let store = SqliteStore::open(&db_path)?;
        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership[0].slots_owned, 1);
        Ok(())
    }

    #[test]
    fn sell_clamps_shielded_slots_to_remaining_ownership() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("sell.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(&buy("sig-s1", "alice", 5, 4, block_time), PROTECTION, test_now())?;
        store.apply_action(
            &ActionRecord {
                signature: "sig-s2".to_string(),
                kind: ActionKind::Shield,
                player: "alice".to_string(),
                property_id: Some(5),
                target: None,
                amount: 900_000_000_000,
                slots: 4,
                shield_duration_seconds: Some(24 * 3600),
                block_time: block_time + 10,
            },
            PROTECTION,
            test_now(),
        )?;
        store.apply_action(
            &ActionRecord {
                signature: "sig-s3".to_string(),
                kind: ActionKind::Sell,
                player: "alice".to_string(),
                property_id: Some(5),
                target: None,
                amount: 1_000_000_000_000,
                slots: 3,
                shield_duration_seconds: None,
                block_time: block_time + 20,
            },
            PROTECTION,
            test_now(),
        )?;

        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership[0].slots_owned, 1);
        assert_eq!(ownership[0].slots_shielded, 1);
        assert_eq!(ownership[0].shield_expiry, block_time + 10 + 24 * 3600);

        let state = store.property_state(5)?.context("state")?;
        assert_eq!(state.available_slots, 350 - 4 + 3);
        Ok(())
    }

    #[test]
    fn steal_success_moves_slots_and_protects_the_victim() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("steal.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(&buy("sig-t1", "victim", 8, 5, block_time), PROTECTION, test_now())?;
        store.apply_action(
            &ActionRecord {
                signature: "sig-t2".to_string(),
                kind: ActionKind::StealSuccess,
                player: "attacker".to_string(),
                property_id: Some(8),
                target: Some("victim".to_string()),
                amount: 500_000_000_000,
                slots: 2,
                shield_duration_seconds: None,
                block_time: block_time + 100,
            },
            PROTECTION,
            test_now(),
        )?;

        let victim = store.ownership_for_wallet("victim")?;
        assert_eq!(victim[0].slots_owned, 3);
        assert_eq!(victim[0].steal_protection_expiry, block_time + 100 + PROTECTION);

        let attacker = store.ownership_for_wallet("attacker")?;
        assert_eq!(attacker[0].slots_owned, 2);

        // St. James Place cools down at half of its 12h purchase cooldown.
        let cooldown = store
            .steal_cooldown("attacker", 8)?
            .context("expected steal cooldown")?;
        assert_eq!(cooldown.cooldown_duration, 6 * 3600);
        assert_eq!(cooldown.last_steal_timestamp, block_time + 100);

        let attacker_stats = store.player_stats("attacker")?.context("stats")?;
        assert_eq!(attacker_stats.successful_steals, 1);
        assert_eq!(attacker_stats.total_slots_owned, 2);
        let victim_stats = store.player_stats("victim")?.context("stats")?;
        assert_eq!(victim_stats.times_stolen, 1);
        assert_eq!(victim_stats.total_slots_owned, 3);
        Ok(())
    }

    #[test]
    fn failed_steal_still_arms_the_cooldown() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("steal-fail.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(
            &ActionRecord {
                signature: "sig-f1".to_string(),
                kind: ActionKind::StealFailed,
                player: "attacker".to_string(),
                property_id: Some(20),
                target: Some("victim".to_string()),
                amount: 100_000_000_000,
                slots: 0,
                shield_duration_seconds: None,
                block_time,
            },
            PROTECTION,
            test_now(),
        )?;

        let cooldown = store
            .steal_cooldown("attacker", 20)?
            .context("expected steal cooldown")?;
        assert_eq!(cooldown.cooldown_duration, 14 * 3600);

        let stats = store.player_stats("attacker")?.context("stats")?;
        assert_eq!(stats.failed_steals, 1);
        assert_eq!(stats.successful_steals, 0);
        assert!(store.ownership_for_wallet("attacker")?.is_empty());
        Ok(())
    }

    #[test]
    fn shield_covers_at_most_the_owned_slots() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("shield.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(&buy("sig-sh1", "alice", 2, 2, block_time), PROTECTION, test_now())?;
        store.apply_action(
            &ActionRecord {
                signature: "sig-sh2".to_string(),
                kind: ActionKind::Shield,
                player: "alice".to_string(),
                property_id: Some(2),
                target: None,
                amount: 770_000_000_000,
                slots: 10,
                shield_duration_seconds: Some(12 * 3600),
                block_time: block_time + 5,
            },
            PROTECTION,
            test_now(),
        )?;

        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership[0].slots_owned, 2);
        assert_eq!(ownership[0].slots_shielded, 2);
        assert_eq!(ownership[0].shield_expiry, block_time + 5 + 12 * 3600);

        let stats = store.player_stats("alice")?.context("stats")?;
        assert_eq!(stats.shields_activated, 1);
        Ok(())
    }

    #[test]
    fn shield_without_duration_keeps_the_previous_expiry() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("shield-renew.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(&buy("sig-sn1", "alice", 2, 3, block_time), PROTECTION, test_now())?;
        store.apply_action(
            &ActionRecord {
                signature: "sig-sn2".to_string(),
                kind: ActionKind::Shield,
                player: "alice".to_string(),
                property_id: Some(2),
                target: None,
                amount: 770_000_000_000,
                slots: 2,
                shield_duration_seconds: Some(12 * 3600),
                block_time: block_time + 5,
            },
            PROTECTION,
            test_now(),
        )?;

        // Re-shielding without a duration only moves the slot count.
        store.apply_action(
            &ActionRecord {
                signature: "sig-sn3".to_string(),
                kind: ActionKind::Shield,
                player: "alice".to_string(),
                property_id: Some(2),
                target: None,
                amount: 385_000_000_000,
                slots: 3,
                shield_duration_seconds: None,
                block_time: block_time + 500,
            },
            PROTECTION,
            test_now(),
        )?;

        let ownership = store.ownership_for_wallet("alice")?;
        assert_eq!(ownership[0].slots_shielded, 3);
        assert_eq!(ownership[0].shield_expiry, block_time + 5 + 12 * 3600);
        Ok(())
    }

    #[test]
    fn claim_accrues_earnings_and_moves_the_score() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("claim.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(
            &ActionRecord {
                signature: "sig-c1".to_string(),
                kind: ActionKind::Claim,
                player: "alice".to_string(),
                property_id: None,
                target: None,
                amount: 250_000_000_000,
                slots: 0,
                shield_duration_seconds: None,
                block_time,
            },
            PROTECTION,
            test_now(),
        )?;

        let stats = store.player_stats("alice")?.context("stats")?;
        assert_eq!(stats.rewards_claimed, 1);
        assert_eq!(stats.total_earned, 250_000_000_000);
        assert_eq!(stats.last_claim_timestamp, block_time);
        // 250 tokens earned, no activity multiplier yet.
        assert_eq!(stats.leaderboard_score, 250);
        Ok(())
    }

    #[test]
    fn completing_a_set_raises_derived_income_and_count() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("sets.db"))?;
        let block_time = 1_760_000_000;

        store.apply_action(&buy("sig-set1", "alice", 0, 1, block_time), PROTECTION, test_now())?;
        let stats = store.player_stats("alice")?.context("stats")?;
        assert_eq!(stats.complete_sets, 0);
        assert_eq!(stats.daily_income, 90);

        store.apply_action(&buy("sig-set2", "alice", 1, 1, block_time + 1), PROTECTION, test_now())?;
        let stats = store.player_stats("alice")?.context("stats")?;
        assert_eq!(stats.complete_sets, 1);
        assert_eq!(stats.daily_income, 234);

        let cooldowns = store.set_cooldowns_for_wallet("alice")?;
        assert_eq!(cooldowns[0].properties_count, 2);
        Ok(())
    }

    #[test]
    fn malformed_actions_are_rejected_before_any_write() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("invalid.db"))?;

        let mut missing_property = buy("sig-x1", "alice", 0, 1, 1_760_000_000);
        missing_property.property_id = None;
        assert!(store
            .apply_action(&missing_property, PROTECTION, test_now())
            .is_err());

        let unknown_property = buy("sig-x2", "alice", 99, 1, 1_760_000_000);
        assert!(store
            .apply_action(&unknown_property, PROTECTION, test_now())
            .is_err());

        let mut self_steal = buy("sig-x3", "alice", 0, 1, 1_760_000_000);
        self_steal.kind = ActionKind::StealSuccess;
        self_steal.target = Some("alice".to_string());
        assert!(store.apply_action(&self_steal, PROTECTION, test_now()).is_err());

        let mut missing_target = buy("sig-x4", "alice", 0, 1, 1_760_000_000);
        missing_target.kind = ActionKind::StealSuccess;
        missing_target.target = None;
        assert!(store
            .apply_action(&missing_target, PROTECTION, test_now())
            .is_err());

        let mut shield_without_property = buy("sig-x5", "alice", 0, 1, 1_760_000_000);
        shield_without_property.kind = ActionKind::Shield;
        shield_without_property.property_id = None;
        assert!(store
            .apply_action(&shield_without_property, PROTECTION, test_now())
            .is_err());

        assert!(store.list_recent_actions(10)?.is_empty());
        Ok(())
    }

    #[test]
    fn action_feed_returns_newest_first_and_filters() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("feed.db"))?;
        let base = 1_760_000_000;

        store.apply_action(&buy("sig-feed-1", "alice", 0, 1, base), PROTECTION, test_now())?;
        store.apply_action(&buy("sig-feed-2", "bob", 2, 1, base + 10), PROTECTION, test_now())?;
        store.apply_action(&buy("sig-feed-3", "alice", 2, 1, base + 20), PROTECTION, test_now())?;

        let recent = store.list_recent_actions(10)?;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].tx_signature, "sig-feed-3");
        assert_eq!(recent[2].tx_signature, "sig-feed-1");

        let alice = store.list_actions_by_player("alice", 10, 0)?;
        assert_eq!(alice.len(), 2);

        let oriental = store.list_actions_by_property(2, 10, 0)?;
        assert_eq!(oriental.len(), 2);
        assert_eq!(oriental[0].player_address, "alice");
        Ok(())
    }
}
