use super::{clamp_u32, clamp_u64, SqliteStore};
use anyhow::{Context, Result};
use defipoly_core_types::{LeaderboardRow, LeaderboardTotals, PlayerStatsRow};
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    pub fn player_stats(&self, wallet: &str) -> Result<Option<PlayerStatsRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wallet_address, total_actions, properties_bought, properties_sold,
                        successful_steals, failed_steals, times_stolen, shields_activated,
                        rewards_claimed, total_spent, total_earned, total_slots_owned,
                        complete_sets, daily_income, leaderboard_score, last_action_time,
                        last_claim_timestamp
                 FROM player_stats
                 WHERE wallet_address = ?1",
                params![wallet],
                |row| {
                    Ok(PlayerStatsRow {
                        wallet_address: row.get(0)?,
                        total_actions: row.get::<_, i64>(1).map(clamp_u32)?,
                        properties_bought: row.get::<_, i64>(2).map(clamp_u32)?,
                        properties_sold: row.get::<_, i64>(3).map(clamp_u32)?,
                        successful_steals: row.get::<_, i64>(4).map(clamp_u32)?,
                        failed_steals: row.get::<_, i64>(5).map(clamp_u32)?,
                        times_stolen: row.get::<_, i64>(6).map(clamp_u32)?,
                        shields_activated: row.get::<_, i64>(7).map(clamp_u32)?,
                        rewards_claimed: row.get::<_, i64>(8).map(clamp_u32)?,
                        total_spent: row.get::<_, i64>(9).map(clamp_u64)?,
                        total_earned: row.get::<_, i64>(10).map(clamp_u64)?,
                        total_slots_owned: row.get::<_, i64>(11).map(clamp_u32)?,
                        complete_sets: row.get::<_, i64>(12).map(clamp_u32)?,
                        daily_income: row.get::<_, i64>(13).map(clamp_u64)?,
                        leaderboard_score: row.get::<_, i64>(14).map(clamp_u64)?,
                        last_action_time: row.get(15)?,
                        last_claim_timestamp: row.get(16)?,
                    })
                },
            )
            .optional()
            .context("failed querying player stats")?;
        Ok(row)
    }

    /// Score-ordered page of the leaderboard with profile names joined in.
    /// Ranks are absolute, so page two starts where page one left off.
    pub fn leaderboard(&self, limit: u32, offset: u32) -> Result<Vec<LeaderboardRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT s.wallet_address, p.username, s.leaderboard_score, s.total_earned,
                        s.daily_income, s.complete_sets, s.total_slots_owned
                 FROM player_stats s
                 LEFT JOIN profiles p ON p.wallet_address = s.wallet_address
                 WHERE s.total_actions > 0
                 ORDER BY s.leaderboard_score DESC, s.total_earned DESC, s.wallet_address
                 LIMIT ?1 OFFSET ?2",
            )
            .context("failed preparing leaderboard query")?;

        let raw: Vec<(String, Option<String>, i64, i64, i64, i64, i64)> = stmt
            .query_map(params![limit, offset], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .context("failed querying leaderboard")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading leaderboard rows")?;

        Ok(raw
            .into_iter()
            .enumerate()
            .map(
                |(
                    index,
                    (wallet_address, username, score, earned, income, sets, slots),
                )| LeaderboardRow {
                    rank: offset + index as u32 + 1,
                    wallet_address,
                    username,
                    leaderboard_score: clamp_u64(score),
                    total_earned: clamp_u64(earned),
                    daily_income: clamp_u64(income),
                    complete_sets: clamp_u32(sets),
                    total_slots_owned: clamp_u32(slots),
                },
            )
            .collect())
    }

    pub fn leaderboard_totals(&self) -> Result<LeaderboardTotals> {
        let totals = self
            .conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(total_slots_owned), 0),
                        COALESCE(SUM(daily_income), 0),
                        COALESCE(SUM(total_earned), 0)
                 FROM player_stats",
                [],
                |row| {
                    Ok(LeaderboardTotals {
                        total_players: row.get::<_, i64>(0).map(clamp_u64)?,
                        total_slots_owned: row.get::<_, i64>(1).map(clamp_u64)?,
                        total_daily_income: row.get::<_, i64>(2).map(clamp_u64)?,
                        total_earned: row.get::<_, i64>(3).map(clamp_u64)?,
                    })
                },
            )
            .context("failed querying leaderboard totals")?;
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use defipoly_core_types::{ActionKind, ActionRecord, ProfileUpdate};
    use std::path::Path;
    use tempfile::tempdir;

    fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-04-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn open_migrated(path: &Path) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(path)?;
        let migration_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        store.run_migrations(&migration_dir)?;
        store.seed_properties_state(test_now())?;
        Ok(store)
    }

    fn claim(signature: &str, player: &str, amount: u64) -> ActionRecord {
        ActionRecord {
            signature: signature.to_string(),
            kind: ActionKind::Claim,
            player: player.to_string(),
            property_id: None,
            target: None,
            amount,
            slots: 0,
            shield_duration_seconds: None,
            block_time: 1_760_000_000,
        }
    }

    #[test]
    fn leaderboard_orders_by_score_and_pages_with_absolute_ranks() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("leaderboard.db"))?;

        store.apply_action(&claim("sig-l1", "third", 100_000_000_000), 0, test_now())?;
        store.apply_action(&claim("sig-l2", "first", 900_000_000_000), 0, test_now())?;
        store.apply_action(&claim("sig-l3", "second", 500_000_000_000), 0, test_now())?;
        store.upsert_profile(
            "first",
            &ProfileUpdate {
                username: Some("whale".to_string()),
                ..ProfileUpdate::default()
            },
            test_now(),
        )?;

        let page_one = store.leaderboard(2, 0)?;
        assert_eq!(page_one.len(), 2);
        assert_eq!(page_one[0].wallet_address, "first");
        assert_eq!(page_one[0].rank, 1);
        assert_eq!(page_one[0].username.as_deref(), Some("whale"));
        assert_eq!(page_one[1].wallet_address, "second");

        let page_two = store.leaderboard(2, 2)?;
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0].wallet_address, "third");
        assert_eq!(page_two[0].rank, 3);

        let totals = store.leaderboard_totals()?;
        assert_eq!(totals.total_players, 3);
        assert_eq!(totals.total_earned, 1_500_000_000_000);
        Ok(())
    }

    #[test]
    fn unknown_wallet_has_no_stats_row() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let store = open_migrated(&temp.path().join("no-stats.db"))?;
        assert!(store.player_stats("ghost")?.is_none());
        Ok(())
    }
}
