use super::{parse_utc, SqliteStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use defipoly_core_types::{ProfileRow, ProfileUpdate};
use rusqlite::{params, OptionalExtension};

pub const MAX_USERNAME_LENGTH: usize = 32;

impl SqliteStore {
    pub fn profile(&self, wallet: &str) -> Result<Option<ProfileRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wallet_address, username, avatar_seed, board_theme,
                        property_card_theme, corner_square_style, board_background, updated_at
                 FROM profiles
                 WHERE wallet_address = ?1",
                params![wallet],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .context("failed querying profile")?;

        row.map(
            |(
                wallet_address,
                username,
                avatar_seed,
                board_theme,
                property_card_theme,
                corner_square_style,
                board_background,
                updated_at,
            )| {
                Ok(ProfileRow {
                    wallet_address,
                    username,
                    avatar_seed,
                    board_theme,
                    property_card_theme,
                    corner_square_style,
                    board_background,
                    updated_at: parse_utc("profiles.updated_at", &updated_at)?,
                })
            },
        )
        .transpose()
    }

    /// Merges a partial profile write: absent fields keep their stored value,
    /// so a username-only update never wipes the wallet's theme choices.
    pub fn upsert_profile(
        &self,
        wallet: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<ProfileRow> {
        let username = update
            .username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        if let Some(name) = username {
            if name.len() > MAX_USERNAME_LENGTH {
                return Err(anyhow!(
                    "username exceeds {} characters: {}",
                    MAX_USERNAME_LENGTH,
                    name.len()
                ));
            }
        }

        let now_rfc = now.to_rfc3339();
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO profiles(
                    wallet_address, username, avatar_seed, board_theme,
                    property_card_theme, corner_square_style, board_background,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(wallet_address) DO UPDATE SET
                    username = COALESCE(excluded.username, username),
                    avatar_seed = COALESCE(excluded.avatar_seed, avatar_seed),
                    board_theme = COALESCE(excluded.board_theme, board_theme),
                    property_card_theme =
                        COALESCE(excluded.property_card_theme, property_card_theme),
                    corner_square_style =
                        COALESCE(excluded.corner_square_style, corner_square_style),
                    board_background = COALESCE(excluded.board_background, board_background),
                    updated_at = excluded.updated_at",
                params![
                    wallet,
                    username,
                    update.avatar_seed,
                    update.board_theme,
                    update.property_card_theme,
                    update.corner_square_style,
                    update.board_background,
                    now_rfc,
                ],
            )
        })
        .context("failed upserting profile")?;

        self.profile(wallet)?
            .ok_or_else(|| anyhow!("profile missing immediately after upsert: {wallet}"))
    }
}
