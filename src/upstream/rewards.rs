use crate::config::RewardConfig;
use crate::types::{RewardMetrics, TokenSupply, TransactionRecord};

/// Project reward-pool figures from supply and recent tracked-mint activity.
///
/// Daily volume is assumed, not observed: `supply * daily_turnover_rate`.
/// The observed figures come from `history` and are reported alongside.
pub fn derive_reward_metrics(
    supply: &TokenSupply,
    history: &[TransactionRecord],
    tracked_mint: &str,
    usd_rate: f64,
    rewards: &RewardConfig,
) -> RewardMetrics {
    let total_supply = supply.whole_tokens();
    let daily_volume = total_supply * rewards.daily_turnover_rate;
    let daily_fees = daily_volume * rewards.swap_fee_rate;
    let daily_reward_pool = daily_fees * rewards.lp_fee_share;

    let amounts: Vec<f64> = history
        .iter()
        .flat_map(|tx| tx.transfers_of(tracked_mint))
        .map(|t| t.amount.abs())
        .collect();
    let observed_volume: f64 = amounts.iter().sum();
    let average_transfer = if amounts.is_empty() {
        0.0
    } else {
        observed_volume / amounts.len() as f64
    };

    RewardMetrics {
        total_supply,
        daily_volume,
        daily_fees,
        daily_reward_pool,
        observed_volume,
        observed_transfers: amounts.len(),
        average_transfer,
        transaction_count: history.len(),
        usd_rate,
        daily_reward_pool_usd: daily_reward_pool * usd_rate,
    }
}
