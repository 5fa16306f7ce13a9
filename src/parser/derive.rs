//! Derivation rules for fields computed from other extracted fields.
//!
//! The stored value of a derived field must always equal what these rules
//! produce from the source field; the reconcile pass re-applies them to
//! repair historical rows.

use std::sync::LazyLock;

use regex::Regex;

static BEDROOMS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)br").unwrap());
static AREA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)ft2").unwrap());

/// Closed set of housing-type labels, kept sorted so the derived `type`
/// string is sorted by construction.
const HOUSING_TYPES: [&str; 9] = [
    "apartment",
    "condo",
    "cottage/cabin",
    "duplex",
    "flat",
    "house",
    "land",
    "loft",
    "townhouse",
];

const CATS_OK: &str = "cats are OK - purrr";
const DOGS_OK: &str = "dogs are OK - wooof";
const GARAGE_ATTACHED: &str = "attached garage";
const GARAGE_DETACHED: &str = "detached garage";
const FURNISHED: &str = "furnished";
const LAUNDRY_BLDG: &str = "laundry in bldg";
const LAUNDRY_SITE: &str = "laundry on site";
const WD_IN_UNIT: &str = "w/d in unit";

/// Bedroom count from a housing descriptor like "2br - 1000ft2".
/// First numeric run directly before "br" wins; no match means unknown.
pub fn get_bedrooms(housing: &str) -> Option<f64> {
    BEDROOMS_RE
        .captures(housing)
        .and_then(|caps| caps[1].parse().ok())
}

/// Floor area from the same descriptor, numeric run before "ft2".
pub fn get_area(housing: &str) -> Option<f64> {
    AREA_RE.captures(housing).and_then(|caps| caps[1].parse().ok())
}

/// Listing type: sorted, comma-joined intersection of the attribute list
/// with the closed housing-type set. Empty intersection is unknown.
pub fn get_type(attrs: &[String]) -> Option<String> {
    let found: Vec<&str> = HOUSING_TYPES
        .iter()
        .copied()
        .filter(|t| attrs.iter().any(|a| a == t))
        .collect();
    if found.is_empty() {
        None
    } else {
        Some(found.join(","))
    }
}

/// Boolean amenity flags, each true iff its exact label appears in the
/// attribute list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Amenities {
    pub catsok: bool,
    pub dogsok: bool,
    pub garagea: bool,
    pub garaged: bool,
    pub furnished: bool,
    pub laundryb: bool,
    pub laundrys: bool,
    pub wd: bool,
}

pub fn get_amenities(attrs: &[String]) -> Amenities {
    let has = |label: &str| attrs.iter().any(|a| a == label);
    Amenities {
        catsok: has(CATS_OK),
        dogsok: has(DOGS_OK),
        garagea: has(GARAGE_ATTACHED),
        garaged: has(GARAGE_DETACHED),
        furnished: has(FURNISHED),
        laundryb: has(LAUNDRY_BLDG),
        laundrys: has(LAUNDRY_SITE),
        wd: has(WD_IN_UNIT),
    }
}

/// Parsed price element text.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub text: String,
    pub value: Option<i64>,
}

/// Strip the currency symbol and thousands separators and parse the integer
/// amount. The original text is kept verbatim.
pub fn parse_price(raw: &str) -> Price {
    let text = raw.trim().to_string();
    let value = text.trim_start_matches('$').replace(',', "").parse().ok();
    Price { text, value }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bedrooms_full_descriptor() {
        assert_eq!(get_bedrooms("2br - 1000ft2"), Some(2.0));
    }

    #[test]
    fn bedrooms_no_area() {
        assert_eq!(get_bedrooms("1br"), Some(1.0));
    }

    #[test]
    fn bedrooms_studio_is_unknown() {
        assert_eq!(get_bedrooms("studio"), None);
    }

    #[test]
    fn area_from_descriptor() {
        assert_eq!(get_area("2br - 1000ft2"), Some(1000.0));
        assert_eq!(get_area("2br"), None);
    }

    #[test]
    fn price_with_thousands_separator() {
        let price = parse_price("$2,895");
        assert_eq!(price.text, "$2,895");
        assert_eq!(price.value, Some(2895));
    }

    #[test]
    fn price_unparseable_keeps_text() {
        let price = parse_price("contact us");
        assert_eq!(price.text, "contact us");
        assert_eq!(price.value, None);
    }

    #[test]
    fn type_intersection_is_sorted_and_joined() {
        let got = get_type(&attrs(&["w/d in unit", "house", "2br", "apartment"]));
        assert_eq!(got.as_deref(), Some("apartment,house"));
    }

    #[test]
    fn type_empty_intersection_is_unknown() {
        assert_eq!(get_type(&attrs(&["2br", "w/d in unit"])), None);
    }

    #[test]
    fn amenities_exact_labels_only() {
        let a = get_amenities(&attrs(&[
            "cats are OK - purrr",
            "w/d in unit",
            "laundry on site",
            "cats",
        ]));
        assert!(a.catsok);
        assert!(a.wd);
        assert!(a.laundrys);
        assert!(!a.dogsok);
        assert!(!a.laundryb);
        assert!(!a.furnished);
        assert!(!a.garagea);
        assert!(!a.garaged);
    }
}
