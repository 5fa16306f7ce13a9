use serde::{Deserialize, Serialize};

/// Normalized listing record extracted from one page.
///
/// Every schema field is always present in the serialized form (null where
/// the page had nothing), so consumers never branch on key presence. The
/// `bedrooms`/`area`/`type`/amenity fields are derived from `housing` and
/// `attrs` at extraction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Full text of the posting title block (price, housing, title, district).
    pub posting_title: String,
    /// Title text alone. Required: a page without it is schema drift.
    pub title: String,
    pub price_text: Option<String>,
    pub price: Option<i64>,
    pub housing: Option<String>,
    pub district: Option<String>,
    /// Absolute thumbnail URLs in document order.
    pub thumbs: Vec<String>,
    pub nthumbs: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub map_address: Option<String>,
    pub map_link: Option<String>,
    /// Flat attribute labels across all attribute groups, document order.
    pub attrs: Vec<String>,
    /// Posting body text. Required section.
    pub body: String,
    pub notices: Vec<String>,
    pub bedrooms: Option<f64>,
    pub area: Option<f64>,
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub catsok: bool,
    pub dogsok: bool,
    pub garagea: bool,
    pub garaged: bool,
    pub furnished: bool,
    pub laundryb: bool,
    pub laundrys: bool,
    pub wd: bool,
}

/// Message published to the downstream-processing queue after a successful
/// ingestion. Key names are the fixed wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMessage {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
    pub housing: Option<String>,
    pub bedrooms: Option<f64>,
    pub area: Option<f64>,
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub catsok: bool,
    pub dogsok: bool,
    pub garagea: bool,
    pub garaged: bool,
    pub furnished: bool,
    pub laundryb: bool,
    pub laundrys: bool,
    pub wd: bool,
    pub nthumbs: i64,
    pub price: Option<i64>,
    pub url: String,
}

impl ProcessorMessage {
    pub fn from_listing(listing: &Listing, url: &str) -> Self {
        Self {
            latitude: listing.latitude,
            longitude: listing.longitude,
            district: listing.district.clone(),
            housing: listing.housing.clone(),
            bedrooms: listing.bedrooms,
            area: listing.area,
            listing_type: listing.listing_type.clone(),
            catsok: listing.catsok,
            dogsok: listing.dogsok,
            garagea: listing.garagea,
            garaged: listing.garaged,
            furnished: listing.furnished,
            laundryb: listing.laundryb,
            laundrys: listing.laundrys,
            wd: listing.wd,
            nthumbs: listing.nthumbs,
            price: listing.price,
            url: url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Listing {
        Listing {
            posting_title: "$2,895 / 2br - 1000ft2 - Charming two bedroom (mission)".into(),
            title: "Charming two bedroom".into(),
            price_text: Some("$2,895".into()),
            price: Some(2895),
            housing: Some("2br - 1000ft2".into()),
            district: Some("mission".into()),
            thumbs: vec!["https://images.example.org/a.jpg".into()],
            nthumbs: 1,
            latitude: Some(37.773972),
            longitude: Some(-122.431297),
            map_address: Some("601 Dolores St".into()),
            map_link: None,
            attrs: vec!["2br".into(), "apartment".into()],
            body: "Sunny flat.".into(),
            notices: vec![],
            bedrooms: Some(2.0),
            area: Some(1000.0),
            listing_type: Some("apartment".into()),
            catsok: false,
            dogsok: false,
            garagea: false,
            garaged: false,
            furnished: false,
            laundryb: false,
            laundrys: false,
            wd: false,
        }
    }

    #[test]
    fn serializes_full_schema_with_nulls_present() {
        let mut listing = sample();
        listing.map_link = None;
        listing.district = None;
        let value = serde_json::to_value(&listing).unwrap();
        let obj = value.as_object().unwrap();
        // absent fields are explicit nulls, never missing keys
        assert!(obj.contains_key("map_link"));
        assert!(obj["map_link"].is_null());
        assert!(obj["district"].is_null());
        assert_eq!(obj["type"], serde_json::json!("apartment"));
    }

    #[test]
    fn processor_message_wire_keys() {
        let msg = ProcessorMessage::from_listing(&sample(), "https://sfbay.example.org/apa/1.html");
        let value = serde_json::to_value(&msg).unwrap();
        let obj = value.as_object().unwrap();
        let expected = [
            "latitude", "longitude", "district", "housing", "bedrooms", "area", "type", "catsok",
            "dogsok", "garagea", "garaged", "furnished", "laundryb", "laundrys", "wd", "nthumbs",
            "price", "url",
        ];
        for key in expected {
            assert!(obj.contains_key(key), "missing wire key {key}");
        }
        assert_eq!(obj.len(), expected.len());
        assert_eq!(obj["url"], serde_json::json!("https://sfbay.example.org/apa/1.html"));
        assert_eq!(obj["price"], serde_json::json!(2895));
    }
}
