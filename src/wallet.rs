// 👛 Wallet Selector
// Pick the single best card in a wallet for a purchase category

use serde::{Deserialize, Serialize};

use crate::card::CardProfile;
use crate::scoring::{score_card, RewardValue};

// ============================================================================
// SELECTION
// ============================================================================

/// Winning card for one category.
///
/// An empty `card_key` with a zero value is the "no card available" result,
/// not a card that happens to earn nothing. Check with [`is_empty`].
///
/// [`is_empty`]: WalletSelection::is_empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletSelection {
    pub card_key: String,
    pub card_name: String,
    pub reward: RewardValue,
}

impl WalletSelection {
    pub fn is_empty(&self) -> bool {
        self.card_key.is_empty()
    }

    pub fn value(&self) -> f64 {
        self.reward.value
    }
}

/// Score every card for `category_id` and keep the best.
///
/// Cards are visited in the order given. A card only replaces the current
/// best when its value is strictly greater, so on a tie the earlier card
/// stays selected. Cards that earn nothing never beat the empty selection.
pub fn select_best<'a, I>(cards: I, category_id: i64) -> WalletSelection
where
    I: IntoIterator<Item = &'a CardProfile>,
{
    let mut best = WalletSelection::default();

    for card in cards {
        let reward = score_card(card, category_id);
        if reward.value > best.reward.value {
            best = WalletSelection {
                card_key: card.card_key.clone(),
                card_name: card.card_name.clone(),
                reward,
            };
        }
    }

    best
}

// ============================================================================
// WALLET
// ============================================================================

/// The set of cards compared for a purchase decision, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wallet {
    cards: Vec<CardProfile>,
}

impl Wallet {
    pub fn new(cards: Vec<CardProfile>) -> Self {
        Wallet { cards }
    }

    pub fn cards(&self) -> &[CardProfile] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn select_best(&self, category_id: i64) -> WalletSelection {
        select_best(&self.cards, category_id)
    }
}
