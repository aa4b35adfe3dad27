//! WebAssembly bindings for DateSpoof

use wasm_bindgen::prelude::*;
use ds_core::{
    decision::{decide, injected_date, should_cleanup, should_reload},
    domain::{clear_caches, get_base_domain, is_whitelisted, parse_whitelist},
    settings::{sanitize_whitelist_input, SpoofSettings},
    time_source::{compute_target_time, tomorrow_iso, SystemTimeSource},
};

fn parse_settings(settings_json: &str) -> Option<SpoofSettings> {
    match SpoofSettings::from_json(settings_json) {
        Ok(settings) => Some(settings),
        Err(e) => {
            web_sys::console::warn_1(&JsValue::from_str(&format!("DateSpoof: {}", e)));
            None
        }
    }
}

/// Whether the override should be injected on a page at `hostname`.
/// Unreadable settings never inject.
#[wasm_bindgen]
pub fn should_inject(settings_json: &str, hostname: &str) -> bool {
    parse_settings(settings_json).is_some_and(|settings| decide(&settings, hostname))
}

/// Injection decision plus the date to hand to the page.
#[wasm_bindgen]
pub fn injection_plan(settings_json: &str, hostname: &str) -> JsValue {
    let result = js_sys::Object::new();
    let settings = parse_settings(settings_json).unwrap_or_default();
    let inject = decide(&settings, hostname);

    let _ = js_sys::Reflect::set(&result, &"inject".into(), &JsValue::from(inject));
    let date = match injected_date(&settings) {
        Some(date) if inject => JsValue::from_str(date),
        _ => JsValue::NULL,
    };
    let _ = js_sys::Reflect::set(&result, &"date".into(), &date);
    result.into()
}

#[wasm_bindgen]
pub fn is_whitelisted_js(hostname: &str, whitelist: &str) -> bool {
    is_whitelisted(hostname, whitelist)
}

#[wasm_bindgen]
pub fn get_base_domain_js(hostname: &str) -> String {
    get_base_domain(hostname)
}

#[wasm_bindgen]
pub fn parse_whitelist_js(whitelist: &str) -> js_sys::Array {
    parse_whitelist(whitelist)
        .into_iter()
        .map(|entry| JsValue::from_str(&entry))
        .collect()
}

/// Clean whitelist editor text before it is saved.
#[wasm_bindgen]
pub fn sanitize_whitelist_js(input: &str) -> String {
    sanitize_whitelist_input(input)
}

/// Epoch milliseconds the page clock should report for `date`
/// (`YYYY-MM-DD`), at the current local time of day. Falls back to
/// tomorrow.
#[wasm_bindgen]
pub fn target_time_js(date: Option<String>) -> f64 {
    let source = SystemTimeSource::new(chrono::Local);
    compute_target_time(date.as_deref(), &source) as f64
}

#[wasm_bindgen]
pub fn tomorrow_iso_js() -> String {
    tomorrow_iso(&SystemTimeSource::new(chrono::Local))
}

#[wasm_bindgen]
pub fn should_reload_js(url: &str, whitelist_enabled: bool, whitelist: &str) -> bool {
    should_reload(url, whitelist_enabled, whitelist)
}

#[wasm_bindgen]
pub fn should_cleanup_js(url: &str) -> bool {
    should_cleanup(url)
}

#[wasm_bindgen]
pub fn clear_caches_js() {
    clear_caches();
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    const SETTINGS: &str = r#"{
        "spoofEnabled": true,
        "spoofDate": "2026-03-15",
        "whitelistEnabled": true,
        "whitelistDomains": "example.com"
    }"#;

    #[wasm_bindgen_test]
    fn test_should_inject() {
        assert!(should_inject(SETTINGS, "www.example.com"));
        assert!(!should_inject(SETTINGS, "other.org"));
        assert!(!should_inject("not json", "www.example.com"));
    }

    #[wasm_bindgen_test]
    fn test_injection_plan_carries_date() {
        let plan = injection_plan(SETTINGS, "example.com");
        let date = js_sys::Reflect::get(&plan, &"date".into()).expect("date");
        assert_eq!(date.as_string().as_deref(), Some("2026-03-15"));

        let plan = injection_plan(SETTINGS, "other.org");
        let inject = js_sys::Reflect::get(&plan, &"inject".into()).expect("inject");
        assert_eq!(inject.as_bool(), Some(false));
    }

    #[wasm_bindgen_test]
    fn test_parse_whitelist_js() {
        let entries = parse_whitelist_js("Example.com\n..bad\n10.0.0.1\nfoo.org");
        assert_eq!(entries.length(), 2);
        assert_eq!(entries.get(0).as_string().as_deref(), Some("example.com"));
    }

    #[wasm_bindgen_test]
    fn test_sanitize_whitelist_js() {
        assert_eq!(sanitize_whitelist_js("a.com <b.org>\tc.net"), "a.com\nb.org\nc.net");
    }

    #[wasm_bindgen_test]
    fn test_target_time_is_finite() {
        let requested = target_time_js(Some("2030-01-20".to_string()));
        let fallback = target_time_js(None);
        assert!(requested.is_finite());
        assert!(requested > fallback);
    }
}
