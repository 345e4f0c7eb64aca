//! Slug derivation for path segments and staging file names.
//!
//! Page and group segments default to the "param case" form of a title:
//! words are split on any non-alphanumeric character and on lower→upper
//! case boundaries, lowercased, and joined with dashes.
//!
//! - `"2018 Toyota Camry"` → `"2018-toyota-camry"`
//! - `"Used Cars"` → `"used-cars"`
//! - `"2018 Ford F-150"` → `"2018-ford-f-150"`
//! - `"camelCaseTitle"` → `"camel-case-title"`
//!
//! The same function turns a full site path into the stem of its staging
//! file, so `/cars/2018-toyota-camry` is always rendered to
//! `index-cars-2018-toyota-camry.md` and reruns overwrite the same file.

/// Convert arbitrary text to a lowercase, dash-separated slug.
pub fn param_case(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            prev = None;
            continue;
        }
        // camelCase boundary: lowercase or digit followed by uppercase
        if let Some(p) = prev
            && c.is_uppercase()
            && (p.is_lowercase() || p.is_numeric())
            && !word.is_empty()
        {
            words.push(std::mem::take(&mut word));
        }
        word.extend(c.to_lowercase());
        prev = Some(c);
    }
    if !word.is_empty() {
        words.push(word);
    }
    words.join("-")
}

/// File name a page's rendered artifact is written to in the staging directory.
///
/// Derived from the site path only, so reruns are reproducible. The root
/// path has an empty slug and maps to plain `index.md`.
pub fn staging_file_name(site_path: &str) -> String {
    let slug = param_case(site_path);
    if slug.is_empty() {
        "index.md".to_string()
    } else {
        format!("index-{slug}.md")
    }
}
