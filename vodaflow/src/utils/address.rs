//! Address normalization.
//!
//! Portal addresses carry street, house number and free-form trailing notes
//! (shop names, prices). Matching and geocoding work on trimmed forms.

use regex::Regex;
use std::sync::LazyLock;

static HOUSE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[а-яА-ЯіїєґІЇЄҐa-zA-Z]?").unwrap());
static PROMO_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Близенько.*").unwrap());
static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+(\.\d+)?\s*грн\b").unwrap());
static SHOP_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)магаз(ин)?\b.*").unwrap());
static CHAIN_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(АТБ|Сільпо|Рукавичка|Фора|BILLA|FOZZY|VARUS).*").unwrap()
});
static STREET_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"вул\.|вулиця|улица|ул\.|проспект|пр\.|буд\.|будинок").unwrap()
});

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reduces an address to `street, number`.
///
/// Without a comma the whole trimmed value is kept. Without a house number
/// after the comma only the street part is kept.
#[must_use]
pub fn parse_address(address: &str) -> String {
    let Some((main, rest)) = address.split_once(',') else {
        return address.trim().to_string();
    };
    let main = main.trim();
    match HOUSE_NUMBER.find(rest) {
        Some(number) => format!("{main}, {}", number.as_str()),
        None => main.to_string(),
    }
}

/// Strips promotional noise from an address and keeps at most the first two
/// comma-separated parts.
#[must_use]
pub fn clean_address(raw: &str) -> String {
    let mut value = PROMO_TAIL.replace_all(raw, "").into_owned();
    value = PRICE.replace_all(&value, "").into_owned();
    value = SHOP_TAIL.replace_all(&value, "").into_owned();
    value = CHAIN_TAIL.replace_all(&value, "").into_owned();
    let value = collapse_whitespace(&value);

    let parts: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [street, number, ..] => format!("{street}, {number}"),
    }
}

/// Produces the geocoding cache key for an address.
#[must_use]
pub fn normalize_for_cache(address: &str) -> String {
    let lowered = address.trim().to_lowercase();
    collapse_whitespace(&STREET_WORDS.replace_all(&lowered, ""))
}
