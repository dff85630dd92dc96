//! Locating the JSON state blob inside a server-rendered page

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;

/// Upper bound on HTML we are willing to parse (8 MB)
pub(crate) const MAX_DOCUMENT_SIZE: usize = 8 * 1024 * 1024;

// Hardcoded selectors are parsed once; a parse failure is a compile-time bug.
static STATE_SCRIPT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "script#__UNIVERSAL_DATA_FOR_REHYDRATION__, script#SIGI_STATE, script#__NEXT_DATA__, \
         script[type='application/json'], script[type='application/ld+json']",
    )
    .expect("BUG: hardcoded state script selector is invalid")
});

static INLINE_SCRIPT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script:not([src])").expect("BUG: hardcoded CSS selector 'script:not([src])' is invalid")
});

/// `window.X = {...};` / `window['X'] = {...}` assignments
static WINDOW_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^\s*window(?:\.[\w$]+|\[['"][\w$]+['"]\])\s*=\s*(\{.*\})\s*;?\s*$"#)
        .expect("BUG: hardcoded window assignment regex is invalid")
});

/// First JSON object embedded in `html`
///
/// Dedicated state scripts are tried first, then inline scripts that assign
/// an object literal to a `window` property.
#[must_use]
pub fn extract_state(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);

    let from_state_script = document
        .select(&STATE_SCRIPT_SELECTOR)
        .filter_map(|script| {
            let text: String = script.text().collect();
            serde_json::from_str::<Value>(text.trim()).ok()
        })
        .find(Value::is_object);
    if from_state_script.is_some() {
        return from_state_script;
    }

    document.select(&INLINE_SCRIPT_SELECTOR).find_map(|script| {
        let text: String = script.text().collect();
        let captures = WINDOW_ASSIGNMENT.captures(&text)?;
        serde_json::from_str::<Value>(captures.get(1)?.as_str())
            .ok()
            .filter(Value::is_object)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_rehydration_script() {
        let html = r#"<html><head>
            <script src="/app.js"></script>
            <script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">{"a": {"b": 1}}</script>
        </head></html>"#;
        let state = extract_state(html).expect("state");
        assert_eq!(state["a"]["b"], 1);
    }

    #[test]
    fn falls_back_to_window_assignment() {
        let html = r#"<html><body><script>window['SIGI_STATE'] = {"user": {"id": "7"}};</script></body></html>"#;
        let state = extract_state(html).expect("state");
        assert_eq!(state["user"]["id"], "7");
    }

    #[test]
    fn plain_page_has_no_state() {
        assert!(extract_state("<html><body><p>captcha</p></body></html>").is_none());
    }
}
