//! Supplier markup rules. Each adapter owns exactly one rule; the rule is the
//! only thing that turns a quoted cost (or scraped retail) into the full
//! cost/retail/selling/margin price set.

use serde::{Deserialize, Serialize};

/// Round to cents. All persisted prices go through this.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MarkupRule {
    /// selling = cost * (1 + margin/100)
    FlatMargin { margin_pct: f64 },
    /// VAT applied on cost, then margin on the gross: effective percentage is
    /// vat + margin + vat*margin/100.
    CompoundVat { vat_pct: f64, margin_pct: f64 },
    /// The supplier only exposes a retail price; cost is back-computed from
    /// an assumed margin so downstream reporting still has a cost basis.
    RetailPassThrough { assumed_margin_pct: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSet {
    pub cost_price: f64,
    pub retail_price: f64,
    pub selling_price: f64,
    pub margin_percentage: f64,
}

impl MarkupRule {
    /// The single percentage that satisfies
    /// selling == cost * (1 + margin/100) for this rule.
    pub fn effective_margin_pct(&self) -> f64 {
        match *self {
            MarkupRule::FlatMargin { margin_pct } => margin_pct,
            MarkupRule::CompoundVat {
                vat_pct,
                margin_pct,
            } => vat_pct + margin_pct + vat_pct * margin_pct / 100.0,
            MarkupRule::RetailPassThrough { assumed_margin_pct } => assumed_margin_pct,
        }
    }

    /// Price set from a supplier-quoted cost price.
    pub fn from_cost(&self, cost: f64) -> PriceSet {
        let margin = self.effective_margin_pct();
        let selling = round2(cost * (1.0 + margin / 100.0));
        PriceSet {
            cost_price: round2(cost),
            retail_price: selling,
            selling_price: selling,
            margin_percentage: margin,
        }
    }

    /// Price set from a supplier-quoted retail price (pass-through rules).
    pub fn from_retail(&self, retail: f64) -> PriceSet {
        let margin = self.effective_margin_pct();
        let cost = round2(retail / (1.0 + margin / 100.0));
        PriceSet {
            cost_price: cost,
            retail_price: round2(retail),
            selling_price: round2(retail),
            margin_percentage: margin,
        }
    }
}
