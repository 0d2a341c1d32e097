//! Extraction of the anti-forgery token and the reservation ledger from page markup.

use std::collections::HashMap;

use regex::Regex;

use crate::scan_types::{HiddenLedger, ScanError};

/// Id of the element whose text holds the reservation ledger JSON
pub const HIDDEN_LEDGER_ELEMENT_ID: &str = "reservationHiddenData";

lazy_static::lazy_static! {
    static ref TAG_REGEX: Regex = Regex::new(r"(?is)<(meta|input)\b([^>]*)>").unwrap();
    static ref ATTR_REGEX: Regex = Regex::new(
        r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#
    ).unwrap();
    static ref LEDGER_REGEX: Regex = Regex::new(&format!(
        r#"(?is)<div\b[^>]*?\sid\s*=\s*(?:["']{id}["'][^>]*|{id}(?:\s[^>]*)?)>(.*?)</div>"#,
        id = HIDDEN_LEDGER_ELEMENT_ID
    )).unwrap();
}

/// Find the anti-forgery token; the meta tag wins over the hidden form field
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let mut from_input = None;

    for tag in TAG_REGEX.captures_iter(html) {
        let attrs = parse_attributes(&tag[2]);
        let token = match (tag[1].to_ascii_lowercase().as_str(), attrs.get("name")) {
            ("meta", Some(name)) if name == "csrf-token" => attrs.get("content"),
            ("input", Some(name)) if name == "_token" => {
                if from_input.is_none() {
                    from_input = attrs.get("value").cloned();
                }
                continue;
            }
            _ => continue,
        };

        if let Some(token) = token.filter(|token| !token.is_empty()) {
            return Some(token.clone());
        }
    }

    from_input.filter(|token| !token.is_empty())
}

/// Parse the ledger element; a missing element or bad JSON is an error the caller may absorb
pub fn extract_hidden_ledger(html: &str) -> Result<HiddenLedger, ScanError> {
    let captures = LEDGER_REGEX.captures(html).ok_or_else(|| {
        ScanError::DataFormat(format!("Element #{} not found", HIDDEN_LEDGER_ELEMENT_ID))
    })?;

    let text = html_escape::decode_html_entities(captures[1].trim());
    HiddenLedger::from_json_str(&text)
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTR_REGEX
        .captures_iter(raw)
        .map(|attr| {
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
                .unwrap_or_default();
            (attr[1].to_ascii_lowercase(), value)
        })
        .collect()
}
