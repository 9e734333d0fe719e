//! Field-name to column-name conversion: serde field keys (camelCase or snake_case) -> snake_case columns.

use serde_json::{Map, Value};

/// Convert a single identifier to snake_case.
/// e.g. "companyId" -> "company_id", "CompanyID" -> "company_id", "HTTPServer" -> "http_server"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let starts_word = match prev {
                None | Some('_') => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                // Run of capitals: the last one begins a new word when followed by lowercase.
                Some(_) => next.map(|n| n.is_lowercase()).unwrap_or(false),
            };
            if starts_word {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Rename keys of a JSON object in place using `rename`. Keys for which `rename` returns None are kept.
pub fn rename_object_keys<F>(obj: &mut Map<String, Value>, rename: F)
where
    F: Fn(&str) -> Option<String>,
{
    let keys: Vec<String> = obj.keys().cloned().collect();
    for k in keys {
        if let Some(new_key) = rename(&k) {
            if new_key != k {
                if let Some(v) = obj.remove(&k) {
                    obj.insert(new_key, v);
                }
            }
        }
    }
}
