//! Static board catalog and the pure game arithmetic derived from it.
//!
//! The catalog mirrors the on-chain property configuration and never changes
//! at runtime, so it lives here as `const` data rather than in sqlite.

use serde::Serialize;

mod cooldown;
mod income;

pub use cooldown::{expiry_active, CooldownWindow};
pub use income::{
    complete_sets, daily_income, leaderboard_score, roi_ratio, steal_win_rate, total_slots,
    Holding,
};

pub const SET_COUNT: u8 = 8;
pub const PROPERTY_COUNT: usize = 22;

/// Steal protection granted to the victim after a successful steal.
pub const DEFAULT_STEAL_PROTECTION_SECONDS: i64 = 6 * 3600;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Property {
    pub id: u8,
    pub name: &'static str,
    pub set_id: u8,
    pub tier: &'static str,
    pub max_slots: u32,
    pub max_per_player: u32,
    pub price: u64,
    pub yield_bps: u32,
    pub shield_cost_bps: u32,
    pub cooldown_hours: u32,
}

macro_rules! property {
    ($id:expr, $name:expr, $set:expr, $tier:expr, $max_slots:expr, $max_per_player:expr,
     $price:expr, $yield_bps:expr, $shield_cost_bps:expr, $cooldown_hours:expr) => {
        Property {
            id: $id,
            name: $name,
            set_id: $set,
            tier: $tier,
            max_slots: $max_slots,
            max_per_player: $max_per_player,
            price: $price,
            yield_bps: $yield_bps,
            shield_cost_bps: $shield_cost_bps,
            cooldown_hours: $cooldown_hours,
        }
    };
}

pub const PROPERTIES: [Property; PROPERTY_COUNT] = [
    property!(0, "Mediterranean Avenue", 0, "brown", 600, 50, 1_500, 600, 1_000, 6),
    property!(1, "Baltic Avenue", 0, "brown", 600, 50, 1_500, 600, 1_000, 6),
    property!(2, "Oriental Avenue", 1, "lightblue", 450, 40, 3_500, 650, 1_100, 8),
    property!(3, "Vermont Avenue", 1, "lightblue", 450, 40, 3_500, 650, 1_100, 8),
    property!(4, "Connecticut Avenue", 1, "lightblue", 450, 40, 3_500, 650, 1_100, 8),
    property!(5, "St. Charles Place", 2, "pink", 350, 30, 7_500, 700, 1_200, 10),
    property!(6, "States Avenue", 2, "pink", 350, 30, 7_500, 700, 1_200, 10),
    property!(7, "Virginia Avenue", 2, "pink", 350, 30, 7_500, 700, 1_200, 10),
    property!(8, "St. James Place", 3, "orange", 250, 25, 15_000, 750, 1_300, 12),
    property!(9, "Tennessee Avenue", 3, "orange", 250, 25, 15_000, 750, 1_300, 12),
    property!(10, "New York Avenue", 3, "orange", 250, 25, 15_000, 750, 1_300, 12),
    property!(11, "Kentucky Avenue", 4, "red", 180, 20, 30_000, 800, 1_400, 16),
    property!(12, "Indiana Avenue", 4, "red", 180, 20, 30_000, 800, 1_400, 16),
    property!(13, "Illinois Avenue", 4, "red", 180, 20, 30_000, 800, 1_400, 16),
    property!(14, "Atlantic Avenue", 5, "yellow", 120, 15, 60_000, 850, 1_500, 20),
    property!(15, "Ventnor Avenue", 5, "yellow", 120, 15, 60_000, 850, 1_500, 20),
    property!(16, "Marvin Gardens", 5, "yellow", 120, 15, 60_000, 850, 1_500, 20),
    property!(17, "Pacific Avenue", 6, "green", 80, 10, 120_000, 900, 1_600, 24),
    property!(18, "North Carolina Avenue", 6, "green", 80, 10, 120_000, 900, 1_600, 24),
    property!(19, "Pennsylvania Avenue", 6, "green", 80, 10, 120_000, 900, 1_600, 24),
    property!(20, "Park Place", 7, "darkblue", 40, 5, 240_000, 1_000, 1_700, 28),
    property!(21, "Boardwalk", 7, "darkblue", 40, 5, 240_000, 1_000, 1_700, 28),
];

/// Property ids grouped by color set, indexed by set id.
pub const PROPERTY_SETS: [&[u8]; SET_COUNT as usize] = [
    &[0, 1],
    &[2, 3, 4],
    &[5, 6, 7],
    &[8, 9, 10],
    &[11, 12, 13],
    &[14, 15, 16],
    &[17, 18, 19],
    &[20, 21],
];

/// Claim bonus in basis points awarded per completed set, indexed by set id.
pub const SET_BONUS_BPS: [u32; SET_COUNT as usize] =
    [3_000, 3_286, 3_571, 3_857, 4_143, 4_429, 4_714, 5_000];

pub fn property(id: u8) -> Option<&'static Property> {
    PROPERTIES.get(usize::from(id))
}

pub fn properties_in_set(set_id: u8) -> &'static [u8] {
    PROPERTY_SETS
        .get(usize::from(set_id))
        .copied()
        .unwrap_or(&[])
}

pub fn set_bonus_bps(set_id: u8) -> u32 {
    SET_BONUS_BPS
        .get(usize::from(set_id))
        .copied()
        .unwrap_or(4_000)
}

/// Purchase cooldown for a set, derived from its first property.
pub fn set_cooldown_seconds(set_id: u8) -> i64 {
    properties_in_set(set_id)
        .first()
        .and_then(|id| property(*id))
        .map(|p| i64::from(p.cooldown_hours) * 3_600)
        .unwrap_or(86_400)
}

/// Steal attempts cool down at half the purchase cooldown, matching the
/// on-chain program.
pub fn steal_cooldown_seconds(property_id: u8) -> i64 {
    property(property_id)
        .map(|p| i64::from(p.cooldown_hours) * 3_600 / 2)
        .unwrap_or(43_200)
}
