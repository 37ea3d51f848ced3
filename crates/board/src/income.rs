use super::{property, set_bonus_bps, SET_COUNT};

/// `(property_id, slots_owned)` pairs for one wallet. Zero-slot entries are
/// ignored everywhere.
pub type Holding = (u8, u32);

pub fn total_slots(holdings: &[Holding]) -> u32 {
    holdings.iter().map(|(_, slots)| *slots).sum()
}

/// Number of color sets in which the wallet owns at least one slot of every
/// member property.
pub fn complete_sets(holdings: &[Holding]) -> u32 {
    let mut owned_per_set = [0usize; SET_COUNT as usize];
    for (property_id, slots) in holdings {
        if *slots == 0 {
            continue;
        }
        if let Some(prop) = property(*property_id) {
            owned_per_set[usize::from(prop.set_id)] += 1;
        }
    }

    (0..SET_COUNT)
        .filter(|set_id| {
            let members = super::properties_in_set(*set_id).len();
            members > 0 && owned_per_set[usize::from(*set_id)] == members
        })
        .count() as u32
}

/// Daily yield in token base units: each slot earns `price * yield_bps / 10^4`
/// per day, and a completed set multiplies that set's base yield by
/// `1 + bonus_bps / 10^4`, mirroring the on-chain claim formula.
pub fn daily_income(holdings: &[Holding]) -> u64 {
    let mut set_base = [0u128; SET_COUNT as usize];
    let mut owned_per_set = [0usize; SET_COUNT as usize];

    for (property_id, slots) in holdings {
        if *slots == 0 {
            continue;
        }
        let Some(prop) = property(*property_id) else {
            continue;
        };
        let per_slot = u128::from(prop.price) * u128::from(prop.yield_bps) / 10_000;
        set_base[usize::from(prop.set_id)] += per_slot * u128::from(*slots);
        owned_per_set[usize::from(prop.set_id)] += 1;
    }

    let mut total: u128 = 0;
    for set_id in 0..SET_COUNT {
        let index = usize::from(set_id);
        let base = set_base[index];
        if base == 0 {
            continue;
        }
        let members = super::properties_in_set(set_id).len();
        total += if members > 0 && owned_per_set[index] == members {
            base * (10_000 + u128::from(set_bonus_bps(set_id))) / 10_000
        } else {
            base
        };
    }

    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Leaderboard ranking: tokens earned scaled by an activity multiplier.
/// `total_earned` is in base units (10^9 per token).
pub fn leaderboard_score(
    total_earned: u64,
    properties_bought: u32,
    successful_steals: u32,
    complete_sets: u32,
    shields_activated: u32,
) -> u64 {
    let earned_tokens = total_earned as f64 / 1e9;
    let activity = f64::from(properties_bought)
        + f64::from(successful_steals) * 3.0
        + f64::from(complete_sets) * 10.0
        + f64::from(shields_activated) * 2.0;
    (earned_tokens * (1.0 + activity / 50.0)).floor().max(0.0) as u64
}

pub fn roi_ratio(total_earned: u64, total_spent: u64) -> f64 {
    if total_spent == 0 {
        0.0
    } else {
        total_earned as f64 / total_spent as f64
    }
}

pub fn steal_win_rate(successful_steals: u32, failed_steals: u32) -> f64 {
    let attempts = successful_steals + failed_steals;
    if attempts == 0 {
        0.0
    } else {
        f64::from(successful_steals) / f64::from(attempts)
    }
}
