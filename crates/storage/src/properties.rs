use super::{clamp_u32, parse_utc, SqliteStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use defipoly_core_types::PropertyStateRow;
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    /// Seeds one availability row per catalog property. Existing rows are
    /// left untouched so restarts never reset live supply counts.
    pub fn seed_properties_state(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_rfc = now.to_rfc3339();
        let mut seeded = 0usize;
        for property in defipoly_board::PROPERTIES.iter() {
            let changed = self
                .conn
                .execute(
                    "INSERT INTO properties_state(property_id, available_slots, max_slots, last_synced)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(property_id) DO NOTHING",
                    params![property.id, property.max_slots, property.max_slots, now_rfc],
                )
                .with_context(|| format!("failed seeding property state id={}", property.id))?;
            seeded += changed;
        }
        Ok(seeded)
    }

    pub fn property_state(&self, property_id: u8) -> Result<Option<PropertyStateRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT property_id, available_slots, max_slots, last_synced
                 FROM properties_state
                 WHERE property_id = ?1",
                params![property_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed querying property state")?;

        row.map(|(property_id, available, max, last_synced)| {
            Ok(PropertyStateRow {
                property_id: clamp_u32(property_id) as u8,
                available_slots: clamp_u32(available),
                max_slots: clamp_u32(max),
                last_synced: parse_utc("properties_state.last_synced", &last_synced)?,
            })
        })
        .transpose()
    }

    pub fn all_property_states(&self) -> Result<Vec<PropertyStateRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT property_id, available_slots, max_slots, last_synced
                 FROM properties_state
                 ORDER BY property_id",
            )
            .context("failed preparing property states query")?;
        let raw: Vec<(i64, i64, i64, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .context("failed querying property states")?
            .collect::<rusqlite::Result<_>>()
            .context("failed reading property state rows")?;

        raw.into_iter()
            .map(|(property_id, available, max, last_synced)| {
                Ok(PropertyStateRow {
                    property_id: clamp_u32(property_id) as u8,
                    available_slots: clamp_u32(available),
                    max_slots: clamp_u32(max),
                    last_synced: parse_utc("properties_state.last_synced", &last_synced)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn seeding_is_idempotent_and_covers_the_whole_catalog() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let mut store = SqliteStore::open(&temp.path().join("seed.db"))?;
        let migration_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        store.run_migrations(&migration_dir)?;

        let now = DateTime::parse_from_rfc3339("2026-04-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        assert_eq!(
            store.seed_properties_state(now)?,
            defipoly_board::PROPERTY_COUNT
        );
        assert_eq!(store.seed_properties_state(now)?, 0);

        let states = store.all_property_states()?;
        assert_eq!(states.len(), defipoly_board::PROPERTY_COUNT);
        let boardwalk = store.property_state(21)?.context("boardwalk state")?;
        assert_eq!(boardwalk.max_slots, 40);
        assert_eq!(boardwalk.available_slots, 40);
        Ok(())
    }
}
