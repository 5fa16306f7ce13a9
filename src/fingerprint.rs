//! Content-addressed identity for ingested items.
//!
//! Two fetches of byte-identical content collide on the same id no matter
//! when or from which URL they were observed; that collision is the dedup
//! contract.

use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// 16-byte digest of an arbitrary JSON value.
///
/// Objects hash each key's UTF-8 bytes followed by the digest of its value,
/// iterating keys in sorted order, so insertion order never affects the
/// result. Arrays hash element digests in sequence order, so order there
/// does matter. Scalars hash their canonical text: strings as-is, numbers
/// via their shortest decimal rendering, `true`/`false`/`null` literally.
pub fn content_hash(value: &Value) -> [u8; 16] {
    let mut hasher = Md5::new();
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                if let Some(child) = map.get(key) {
                    hasher.update(content_hash(child));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                hasher.update(content_hash(item));
            }
        }
        Value::String(s) => hasher.update(s.as_bytes()),
        Value::Number(n) => hasher.update(n.to_string().as_bytes()),
        Value::Bool(true) => hasher.update(b"true"),
        Value::Bool(false) => hasher.update(b"false"),
        Value::Null => hasher.update(b"null"),
    }
    hasher.finalize().into()
}

/// Identifier for an ingested item: hex digest of everything except the
/// crawl-volatile source URL. Call before stamping `id`/`added` so volatile
/// fields never feed the hash.
pub fn generate_id(item: &Map<String, Value>) -> String {
    let mut content = item.clone();
    content.remove("sourceUrl");
    hex::encode(content_hash(&Value::Object(content)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hex_hash(value: &Value) -> String {
        hex::encode(content_hash(value))
    }

    #[test]
    fn hash_str() {
        assert_eq!(hex_hash(&json!("a")), "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn hash_int() {
        assert_eq!(hex_hash(&json!(100500)), "e745a6bad4ffe5a1b35aac134ea148c7");
    }

    #[test]
    fn hash_float() {
        assert_eq!(hex_hash(&json!(1.056)), "a50a79a1862f5ae748ed507f45f244bc");
    }

    #[test]
    fn hash_list_order_sensitive() {
        assert_eq!(
            hex_hash(&json!(["a", 100500, 1.056])),
            "0023ec2e3fef8f649c130f22ea6b7820"
        );
        assert_eq!(
            hex_hash(&json!([100500, "a", 1.056])),
            "0943aa9c84423613b63eda3c18c02ce8"
        );
    }

    #[test]
    fn reversing_a_list_changes_the_hash() {
        let forward = json!(["x", "y", "z"]);
        let backward = json!(["z", "y", "x"]);
        assert_ne!(hex_hash(&forward), hex_hash(&backward));
    }

    #[test]
    fn hash_map_order_insensitive() {
        let expected = "e17234cd2697951f7e0116945d11d824";
        let a: Value =
            serde_json::from_str(r#"{"a": 100500, "b": 1056, "c": ["ba", "bu", "nm"]}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"c": ["ba", "bu", "nm"], "a": 100500, "b": 1056}"#).unwrap();
        assert_eq!(hex_hash(&a), expected);
        assert_eq!(hex_hash(&b), expected);
    }

    #[test]
    fn hash_deep_map() {
        let value = json!({
            "c": ["ba", "bu", "nm"],
            "a": 100500,
            "b": {
                "c": ["ba", "bu", "nm"],
                "a": {
                    "c": {
                        "c": ["ba", "bu", "nm"],
                        "a": 100500,
                        "b": {
                            "c": ["ba", "bu", "nm"],
                            "a": 100500,
                            "b": 1056,
                        },
                    },
                    "a": 100500,
                    "b": 1056,
                },
                "b": 1056,
            }
        });
        assert_eq!(hex_hash(&value), "e0614921e306095859c904e487c29f17");
    }

    #[test]
    fn id_ignores_source_url() {
        let base = json!({
            "sourceUrl": "https://sfbay.example.org/apa/1.html",
            "parsed_title": "Charming two bedroom",
            "parsed_price": 2895,
        });
        let other_url = json!({
            "sourceUrl": "https://sfbay.example.org/apa/2.html",
            "parsed_title": "Charming two bedroom",
            "parsed_price": 2895,
        });
        let a = generate_id(base.as_object().unwrap());
        let b = generate_id(other_url.as_object().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn id_changes_with_content() {
        let a = json!({ "sourceUrl": "u", "parsed_price": 2895 });
        let b = json!({ "sourceUrl": "u", "parsed_price": 2900 });
        assert_ne!(
            generate_id(a.as_object().unwrap()),
            generate_id(b.as_object().unwrap())
        );
    }
}
