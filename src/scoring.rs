// 🎯 Card Bonus Scorer
// Best applicable reward tier for one card in one merchant category

use serde::{Deserialize, Serialize};

use crate::card::CardProfile;

/// Reward a card earns for a purchase, derived fresh on every request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardValue {
    /// Earn amount used (points per dollar)
    pub amount: f64,

    /// Base earn currency label of the card
    pub currency: String,

    pub cash_convertible: bool,
    pub cash_conv_value: f64,

    /// Dollars of value per dollar spent
    pub value: f64,
}

impl RewardValue {
    /// Reward from the card's base earn rate alone
    pub fn base(card: &CardProfile) -> Self {
        RewardValue {
            amount: card.base_spend_amount,
            currency: card.base_spend_earn_currency.clone(),
            cash_convertible: card.base_spend_earn_is_cash,
            cash_conv_value: card.base_spend_earn_cash_value,
            value: card.value_per_dollar(card.base_spend_amount),
        }
    }

    /// Value as a percentage of spend (0.03 → 3.0)
    pub fn percent_back(&self) -> f64 {
        self.value * 100.0
    }
}

/// Best reward `card` earns in `category_id`.
///
/// Starts from the base rate and lets any matching bonus take over when its
/// multiplier is strictly larger than the amount currently held. The
/// comparison is on raw multipliers, not dollar values, and currency and
/// cash attributes stay those of the base earn.
pub fn score_card(card: &CardProfile, category_id: i64) -> RewardValue {
    let mut best = RewardValue::base(card);

    for bonus in card.bonuses_for(category_id) {
        if bonus.earn_multiplier > best.amount {
            best.amount = bonus.earn_multiplier;
            best.value = card.value_per_dollar(bonus.earn_multiplier);
        }
    }

    best
}
