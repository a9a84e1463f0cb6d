// 💳 Card Profiles - Static earning rules from the card catalog
// A card's reward profile plus the per-category bonus rules that override it

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Every unit of reward currency is worth one cent unless the card
/// publishes its own cash conversion value.
const CENT: Decimal = dec!(0.01);

// ============================================================================
// CARD PROFILE
// ============================================================================

/// Full catalog description of one credit card.
///
/// Field names follow the catalog's JSON (`cardKey`, `baseSpendAmount`, ...)
/// so a stored profile round-trips to the same document the API returned.
/// Only the `base_spend_*` fields and `bonus_rules` take part in scoring;
/// the rest is carried for display and persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CardProfile {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Catalog unique card key
    pub card_key: String,
    pub card_issuer: String,
    pub card_name: String,
    /// Network (e.g., Visa)
    pub card_network: String,
    /// Type (e.g., Personal)
    pub card_type: String,
    pub card_url: String,

    // ========================================================================
    // FEES & ELIGIBILITY
    // ========================================================================
    pub annual_fee: f64,
    /// Foreign transaction fee (%)
    pub fx_fee: f64,
    #[serde(with = "flag")]
    pub is_fx_fee: bool,
    pub credit_range: String,

    // ========================================================================
    // BASE EARN (used by scoring)
    // ========================================================================
    /// Points earned per dollar spent outside any bonus category
    pub base_spend_amount: f64,
    /// Redemption program (e.g., American Express Membership Rewards)
    pub base_spend_earn_type: String,
    pub base_spend_earn_category: String,
    /// rewards, miles, cashback, crypto, points
    pub base_spend_earn_currency: String,
    /// Issuer's subjective valuation of a point (not used for scoring)
    pub base_spend_earn_valuation: f64,
    /// Can points be converted to a statement credit?
    #[serde(with = "flag")]
    pub base_spend_earn_is_cash: bool,
    /// Cash value per point when convertible
    pub base_spend_earn_cash_value: f64,

    // ========================================================================
    // SIGN-UP OFFER
    // ========================================================================
    #[serde(with = "flag")]
    pub is_signup_bonus: bool,
    pub signup_bonus_amount: String,
    pub signup_bonus_type: String,
    pub signup_bonus_category: String,
    pub sign_up_bonus_item: String,
    pub signup_bonus_spend: f64,
    pub signup_bonus_length: f64,
    /// day, month, or year
    pub signup_bonus_length_period: String,
    pub signup_annual_fee: f64,
    #[serde(with = "flag")]
    pub is_signup_annual_fee_waived: bool,
    pub signup_statement_credit: f64,
    pub signup_bonus_desc: String,

    // ========================================================================
    // TRAVEL PERKS
    // ========================================================================
    pub trusted_traveler: String,
    #[serde(with = "flag")]
    pub is_trusted_traveler: bool,
    pub lounge_access: String,
    #[serde(with = "flag")]
    pub is_lounge_access: bool,
    pub free_hotel_night: String,
    #[serde(with = "flag")]
    pub is_free_hotel_night: bool,
    pub free_checked_bag: String,
    #[serde(with = "flag")]
    pub is_free_checked_bag: bool,

    /// Is the card currently open for applications?
    #[serde(with = "flag")]
    pub is_active: bool,

    #[serde(rename = "benefit")]
    pub benefits: Vec<Benefit>,

    #[serde(rename = "spendBonusCategory")]
    pub bonus_rules: Vec<BonusRule>,

    #[serde(rename = "annualSpend")]
    pub annual_spend: Vec<AnnualSpend>,
}

impl CardProfile {
    /// Dollars of value earned per dollar spent for `earn_amount` units.
    ///
    /// One unit is worth one cent. Cards whose currency can be cashed out use
    /// their own per-point cash value on top of that. The multiplication runs
    /// in exact decimal so repeated evaluations of the same pair agree bit for
    /// bit; the result only becomes an `f64` on the way out. Magnitudes beyond
    /// the 96-bit decimal range are computed in `f64` instead.
    pub fn value_per_dollar(&self, earn_amount: f64) -> f64 {
        let cash_value = self
            .base_spend_earn_is_cash
            .then_some(self.base_spend_earn_cash_value);

        // Non-finite input has no meaningful value
        if !earn_amount.is_finite() || cash_value.is_some_and(|v| !v.is_finite()) {
            return 0.0;
        }

        exact_value(earn_amount, cash_value)
            .and_then(|value| value.to_f64())
            .unwrap_or_else(|| {
                let mult = earn_amount * 0.01;
                cash_value.map_or(mult, |cash| cash * mult)
            })
    }

    /// Bonus rules that apply to a category, in catalog order
    pub fn bonuses_for(&self, category_id: i64) -> impl Iterator<Item = &BonusRule> {
        self.bonus_rules
            .iter()
            .filter(move |rule| rule.applies_to(category_id))
    }
}

/// `earn * 0.01 [* cash]` in decimal. `None` when an operand or the product
/// leaves the decimal range. Conversion keeps the shortest decimal that
/// round-trips the float (0.1 stays 0.1).
fn exact_value(earn_amount: f64, cash_value: Option<f64>) -> Option<Decimal> {
    let mult = Decimal::from_f64(earn_amount)?.checked_mul(CENT)?;
    match cash_value {
        Some(cash) => Decimal::from_f64(cash)?.checked_mul(mult),
        None => Some(mult),
    }
}

// ============================================================================
// BONUS RULES
// ============================================================================

/// One category-specific earn override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusRule {
    #[serde(rename = "spendBonusCategoryType")]
    pub category_type: String,

    /// e.g., Dining
    #[serde(rename = "spendBonusCategoryName")]
    pub category_name: String,

    /// Merchant category this bonus targets
    #[serde(rename = "spendBonusCategoryID")]
    pub category_id: i64,

    #[serde(rename = "spendBonusCategoryGroup")]
    pub category_group: String,

    /// e.g., All Dining
    #[serde(rename = "spendBonusSubcategoryGroup")]
    pub subcategory_group: String,

    #[serde(rename = "spendBonusDesc")]
    pub description: String,

    /// Points per dollar inside this category
    #[serde(rename = "earnMultiplier")]
    pub earn_multiplier: f64,

    #[serde(rename = "isDateLimit", with = "flag")]
    pub is_date_limit: bool,

    #[serde(rename = "limitBeginDate", skip_serializing_if = "Option::is_none")]
    pub limit_begin_date: Option<String>,

    #[serde(rename = "limitEndDate", skip_serializing_if = "Option::is_none")]
    pub limit_end_date: Option<String>,

    #[serde(rename = "isSpendLimit", with = "flag")]
    pub is_spend_limit: bool,

    #[serde(rename = "spendLimit")]
    pub spend_limit: f64,

    /// e.g., Year
    #[serde(rename = "spendLimitResetPeriod")]
    pub spend_limit_reset_period: String,
}

impl BonusRule {
    /// Exact category match. No wildcards, no parent categories.
    pub fn applies_to(&self, category_id: i64) -> bool {
        self.category_id == category_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Benefit {
    pub benefit_title: String,
    pub benefit_desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnualSpend {
    pub annual_spend_desc: String,
}

// ============================================================================
// 0/1 FLAGS
// ============================================================================

/// The catalog encodes yes/no answers as 0/1 integers.
/// Read either form, always write the integer back.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(value) => value == 1,
            Raw::Bool(value) => value,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
