//! CSS-selector extraction from a raw listing page.
//!
//! The selector set is a fixed external contract with the source site; a
//! structural change there is a breaking dependency change, not a bug here.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::derive;
use super::ParseError;
use crate::listing::Listing;

static REMOVED: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".removed").unwrap());
static TITLE_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".postingtitle .postingtitletext").unwrap());
static TITLE_TEXT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#titletextonly").unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".price").unwrap());
static HOUSING: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".housing").unwrap());
static DISTRICT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("small").unwrap());
static THUMBS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#thumbs a[href]").unwrap());
static MAP: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#map").unwrap());
static MAP_ADDRESS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.mapaddress").unwrap());
static MAP_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.mapaddress a[href]").unwrap());
static ATTR_GROUPS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.attrgroup span").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#postingbody").unwrap());
static NOTICES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul.notices li").unwrap());

const REMOVAL_PHRASES: [&str; 2] = [
    "This posting has been flagged for removal",
    "This posting has been deleted by its author",
];

const QR_BOILERPLATE: &str = "QR Code Link to This Post";

/// Extract a normalized record from raw page HTML, or signal that the
/// posting is gone. Title and body are required once removal is ruled out.
pub fn parse_listing(html: &str) -> Result<Listing, ParseError> {
    let doc = Html::parse_document(html);

    if let Some(marker) = doc.select(&REMOVED).next() {
        let text = element_text(&marker);
        if REMOVAL_PHRASES.iter().any(|p| text.starts_with(p)) {
            return Err(ParseError::Removed(text));
        }
    }

    let title_block = doc
        .select(&TITLE_BLOCK)
        .next()
        .ok_or(ParseError::MissingSection("postingtitletext"))?;
    let title = title_block
        .select(&TITLE_TEXT)
        .next()
        .map(|el| element_text(&el))
        .ok_or(ParseError::MissingSection("titletextonly"))?;
    let posting_title = element_text(&title_block);

    let (price_text, price) = match title_block.select(&PRICE).next() {
        Some(el) => {
            let price = derive::parse_price(&element_text(&el));
            (Some(price.text), price.value)
        }
        None => (None, None),
    };

    let housing = title_block
        .select(&HOUSING)
        .next()
        .map(|el| element_text(&el))
        .map(|t| t.trim_matches(&['/', '-', ' '][..]).to_string())
        .filter(|t| !t.is_empty());

    let district = title_block
        .select(&DISTRICT)
        .next()
        .map(|el| element_text(&el))
        .map(|t| t.trim_matches(&['(', ')', ' '][..]).to_string())
        .filter(|t| !t.is_empty());

    let thumbs: Vec<String> = doc
        .select(&THUMBS)
        .filter_map(|a| a.value().attr("href"))
        .map(String::from)
        .collect();

    let (latitude, longitude) = match doc.select(&MAP).next() {
        Some(map) => (
            map.value().attr("data-latitude").and_then(|v| v.parse().ok()),
            map.value().attr("data-longitude").and_then(|v| v.parse().ok()),
        ),
        None => (None, None),
    };
    let map_address = doc
        .select(&MAP_ADDRESS)
        .next()
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty());
    let map_link = doc
        .select(&MAP_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(String::from);

    let attrs: Vec<String> = doc
        .select(&ATTR_GROUPS)
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
        .collect();

    let body_el = doc
        .select(&BODY)
        .next()
        .ok_or(ParseError::MissingSection("postingbody"))?;
    let body = body_text(&body_el);

    let notices: Vec<String> = doc
        .select(&NOTICES)
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
        .collect();

    let bedrooms = housing.as_deref().and_then(derive::get_bedrooms);
    let area = housing.as_deref().and_then(derive::get_area);
    let listing_type = derive::get_type(&attrs);
    let amenities = derive::get_amenities(&attrs);
    let nthumbs = thumbs.len() as i64;

    Ok(Listing {
        posting_title,
        title,
        price_text,
        price,
        housing,
        district,
        thumbs,
        nthumbs,
        latitude,
        longitude,
        map_address,
        map_link,
        attrs,
        body,
        notices,
        bedrooms,
        area,
        listing_type,
        catsok: amenities.catsok,
        dogsok: amenities.dogsok,
        garagea: amenities.garagea,
        garaged: amenities.garaged,
        furnished: amenities.furnished,
        laundryb: amenities.laundryb,
        laundrys: amenities.laundrys,
        wd: amenities.wd,
    })
}

/// Whitespace-normalized text of an element subtree.
fn element_text(el: &ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Body text keeps line structure and drops the QR boilerplate line.
fn body_text(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != QR_BOILERPLATE)
        .collect::<Vec<_>>()
        .join("\n")
}
