//! Shared use-case classifier. Consumes name, category, brand and description
//! and decides which consultation bucket a product belongs to, plus whether
//! it should be excluded from consultation altogether (parts, consumables).

use crate::domain::UseCase;

const COMMERCIAL_MARKERS: &[&str] = &[
    "commercial",
    "horeca",
    "professional",
    "industrial",
    "2-group",
    "two group",
    "3-group",
    "three group",
    "plumbed",
    "high volume",
    "vending",
];

const HOME_MARKERS: &[&str] = &["home", "domestic", "household", "kitchen"];

const OFFICE_MARKERS: &[&str] = &["office", "workplace", "canteen", "pantry"];

/// Phrases that mark consumables/spares; these never belong in a product
/// consultation even though they are synced and sold.
const EXCLUDE_MARKERS: &[&str] = &[
    "spare part",
    "spare-part",
    "replacement part",
    "gasket",
    "o-ring",
    "descaler",
    "descaling",
    "cleaning tablet",
    "cleaner",
    "filter cartridge",
    "maintenance kit",
    "service kit",
];

const EXCLUDE_CATEGORIES: &[&str] = &["cleaning", "spare-parts", "parts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub use_case: UseCase,
    pub exclude_from_consultation: bool,
}

pub fn classify(name: &str, category: &str, brand: &str, description: &str) -> Classification {
    let haystack = format!("{} {} {} {}", name, category, brand, description).to_lowercase();
    let category_lc = category.to_lowercase();

    let exclude = EXCLUDE_CATEGORIES.iter().any(|c| category_lc == *c)
        || EXCLUDE_MARKERS.iter().any(|m| haystack.contains(m));

    // Commercial markers win over home markers: a "professional home barista"
    // machine gets consulted as commercial-capable.
    let use_case = if COMMERCIAL_MARKERS.iter().any(|m| haystack.contains(m)) {
        UseCase::Commercial
    } else if OFFICE_MARKERS.iter().any(|m| haystack.contains(m)) {
        UseCase::Office
    } else if HOME_MARKERS.iter().any(|m| haystack.contains(m)) {
        UseCase::Home
    } else {
        UseCase::Universal
    };

    Classification {
        use_case,
        exclude_from_consultation: exclude,
    }
}
