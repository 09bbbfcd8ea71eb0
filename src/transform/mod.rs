//! Canonical transformation helpers shared by all supplier adapters: brand and
//! category resolution, locale price-text normalization, and partial-data
//! warning detection. Pure functions, no I/O.

pub mod classify;
pub mod pricing;

use crate::domain::CanonicalProduct;

/// Curated brand keyword list, checked against product titles when the feed
/// carries no explicit vendor field. Order matters: longer/more specific
/// names first so "Rocket Espresso" beats "Rocket".
pub const BRAND_KEYWORDS: &[&str] = &[
    "La Marzocco",
    "Rocket Espresso",
    "Nuova Simonelli",
    "Victoria Arduino",
    "Moccamaster",
    "Mahlkonig",
    "Fiorenzato",
    "Bravilor",
    "Rancilio",
    "Profitec",
    "Bezzera",
    "Eureka",
    "Animo",
    "Rocket",
    "Lelit",
    "Jura",
    "ECM",
];

/// keyword → category slug lookup, applied over title + description.
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("espresso machine", "espresso-machines"),
    ("espressomachine", "espresso-machines"),
    ("grinder", "grinders"),
    ("filter coffee", "filter-coffee"),
    ("coffee brewer", "filter-coffee"),
    ("bean-to-cup", "filter-coffee"),
    ("water softener", "water-treatment"),
    ("water filter", "water-treatment"),
    ("tamper", "barista-tools"),
    ("milk pitcher", "barista-tools"),
    ("knock box", "barista-tools"),
    ("descaler", "cleaning"),
    ("cleaning tablet", "cleaning"),
    ("cleaner", "cleaning"),
    ("vending", "vending"),
];

pub const GENERIC_CATEGORY: &str = "general";

/// Explicit vendor field if present, else curated keyword scan of the title,
/// else the first title token.
pub fn resolve_brand(explicit: Option<&str>, title: &str) -> String {
    if let Some(b) = explicit {
        let b = b.trim();
        if !b.is_empty() {
            return b.to_string();
        }
    }
    let title_lc = title.to_lowercase();
    for kw in BRAND_KEYWORDS {
        if title_lc.contains(&kw.to_lowercase()) {
            return (*kw).to_string();
        }
    }
    title
        .split_whitespace()
        .next()
        .unwrap_or("Unknown")
        .to_string()
}

/// Explicit category if present, else keyword lookup, else generic bucket.
pub fn resolve_category(explicit: Option<&str>, title: &str, description: &str) -> String {
    if let Some(c) = explicit {
        let c = c.trim();
        if !c.is_empty() {
            return slugify(c);
        }
    }
    let haystack = format!("{} {}", title, description).to_lowercase();
    for (kw, slug) in CATEGORY_KEYWORDS {
        if haystack.contains(kw) {
            return (*slug).to_string();
        }
    }
    GENERIC_CATEGORY.to_string()
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_dash = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Normalize locale-formatted price text to a numeric value.
///
/// Handles both EU ("1.234,56", "12,50", "1.299,-") and US ("1,234.56")
/// separator conventions plus currency symbols. Returns None when no digits
/// survive (paywalled/price-on-request listings).
pub fn parse_locale_price(raw: &str) -> Option<f64> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    // Dutch ",-" suffix means "whole euros"
    if cleaned.ends_with(",-") || cleaned.ends_with(".-") {
        cleaned.truncate(cleaned.len() - 2);
    }
    cleaned.retain(|c| c != '-');
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            // Both present: whichever comes last is the decimal separator.
            let (dec, _thou) = if d > c { ('.', ',') } else { (',', '.') };
            let mut s = String::with_capacity(cleaned.len());
            let dec_pos = cleaned.rfind(dec).unwrap();
            for (i, ch) in cleaned.char_indices() {
                if ch.is_ascii_digit() {
                    s.push(ch);
                } else if i == dec_pos {
                    s.push('.');
                }
            }
            s
        }
        (None, Some(c)) => split_single_separator(&cleaned, c),
        (Some(d), None) => split_single_separator(&cleaned, d),
        (None, None) => cleaned,
    };
    normalized.parse::<f64>().ok()
}

/// Single separator: two trailing digits means decimal, otherwise thousands.
fn split_single_separator(s: &str, sep_pos: usize) -> String {
    let digits_after = s.len() - sep_pos - 1;
    let mut out: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits_after == 2 || digits_after == 1 {
        out.insert(out.len() - digits_after, '.');
    }
    out
}

/// Non-fatal anomaly detection, run on every record before persistence.
/// These become session warnings; the record is still stored.
pub fn partial_data_warnings(p: &CanonicalProduct) -> Vec<String> {
    let mut warnings = Vec::new();
    if p.selling_price <= 0.0 {
        warnings.push(format!(
            "[{}] zero or missing price for '{}'",
            p.supplier_sku, p.product_name
        ));
    }
    if p.images.is_empty() {
        warnings.push(format!("[{}] no product image", p.supplier_sku));
    }
    warnings
}
