use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Settled on-chain event kinds this backend mirrors. Admin and
/// initialization instructions are filtered out before ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Buy,
    Sell,
    StealSuccess,
    StealFailed,
    Shield,
    Claim,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Buy => "buy",
            ActionKind::Sell => "sell",
            ActionKind::StealSuccess => "steal_success",
            ActionKind::StealFailed => "steal_failed",
            ActionKind::Shield => "shield",
            ActionKind::Claim => "claim",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "buy" => Ok(ActionKind::Buy),
            "sell" => Ok(ActionKind::Sell),
            "steal_success" => Ok(ActionKind::StealSuccess),
            "steal_failed" => Ok(ActionKind::StealFailed),
            "shield" => Ok(ActionKind::Shield),
            "claim" => Ok(ActionKind::Claim),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// A single externally-verified game transaction to be applied to the mirror.
///
/// `amount` is in base token units (lamport-scale); `block_time` is the
/// confirmed slot's unix timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub signature: String,
    pub kind: ActionKind,
    pub player: String,
    pub property_id: Option<u8>,
    pub target: Option<String>,
    pub amount: u64,
    pub slots: u32,
    pub shield_duration_seconds: Option<i64>,
    pub block_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyActionOutcome {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct OwnershipRow {
    pub wallet_address: String,
    pub property_id: u8,
    pub slots_owned: u32,
    pub slots_shielded: u32,
    pub shield_expiry: i64,
    pub steal_protection_expiry: i64,
    pub purchase_timestamp: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerStatsRow {
    pub wallet_address: String,
    pub total_actions: u32,
    pub properties_bought: u32,
    pub properties_sold: u32,
    pub successful_steals: u32,
    pub failed_steals: u32,
    pub times_stolen: u32,
    pub shields_activated: u32,
    pub rewards_claimed: u32,
    pub total_spent: u64,
    pub total_earned: u64,
    pub total_slots_owned: u32,
    pub complete_sets: u32,
    pub daily_income: u64,
    pub leaderboard_score: u64,
    pub last_action_time: i64,
    pub last_claim_timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct SetCooldownRow {
    pub wallet_address: String,
    pub set_id: u8,
    pub last_purchase_timestamp: i64,
    pub cooldown_duration: i64,
    pub last_purchased_property_id: Option<u8>,
    pub properties_count: u32,
}

#[derive(Debug, Clone)]
pub struct StealCooldownRow {
    pub wallet_address: String,
    pub property_id: u8,
    pub last_steal_timestamp: i64,
    pub cooldown_duration: i64,
}

#[derive(Debug, Clone)]
pub struct ActionFeedRow {
    pub id: i64,
    pub tx_signature: String,
    pub kind: ActionKind,
    pub player_address: String,
    pub property_id: Option<u8>,
    pub target_address: Option<String>,
    pub amount: u64,
    pub slots: u32,
    pub block_time: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PropertyStateRow {
    pub property_id: u8,
    pub available_slots: u32,
    pub max_slots: u32,
    pub last_synced: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub wallet_address: String,
    pub username: Option<String>,
    pub avatar_seed: Option<String>,
    pub board_theme: Option<String>,
    pub property_card_theme: Option<String>,
    pub corner_square_style: Option<String>,
    pub board_background: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Partial profile write: `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar_seed: Option<String>,
    pub board_theme: Option<String>,
    pub property_card_theme: Option<String>,
    pub corner_square_style: Option<String>,
    pub board_background: Option<String>,
}

/// One owner of a property as seen by steal-target queries. Shielded slots
/// count only while the shield is unexpired at evaluation time.
#[derive(Debug, Clone)]
pub struct PropertyOwnerRow {
    pub wallet_address: String,
    pub slots_owned: u32,
    pub effective_shielded: u32,
    pub unshielded_slots: u32,
    pub shield_expiry: i64,
    pub steal_protection_expiry: i64,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub rank: u32,
    pub wallet_address: String,
    pub username: Option<String>,
    pub leaderboard_score: u64,
    pub total_earned: u64,
    pub daily_income: u64,
    pub complete_sets: u32,
    pub total_slots_owned: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeaderboardTotals {
    pub total_players: u64,
    pub total_slots_owned: u64,
    pub total_daily_income: u64,
    pub total_earned: u64,
}
