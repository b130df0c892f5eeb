//! Reading the initial selection from the preview URL query.
//!
//! Accepted parameters:
//!
//! ```text
//! ?id=example-button--primary&viewMode=story&args=label:Hi,primary:!true&globals=theme:dark
//! ?path=/story/example-button--primary
//! ?selectedKind=Example/Button&selectedStory=Primary
//! ```

use crate::types::{Args, SelectionSpecifier, ViewMode};
use serde_json::Value;
use tracing::warn;

/// Selection and inputs parsed from a URL query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlState {
    pub specifier: Option<SelectionSpecifier>,
    pub view_mode: Option<ViewMode>,
    pub args: Args,
    pub globals: Args,
}

impl UrlState {
    /// The requested story, defaulting to the first one.
    pub fn specifier_or_any(&self) -> SelectionSpecifier {
        self.specifier.clone().unwrap_or(SelectionSpecifier::Any)
    }

    pub fn view_mode_or_default(&self) -> ViewMode {
        self.view_mode.unwrap_or_default()
    }
}

/// Parse a query string, with or without the leading `?`.
pub fn parse_url(query: &str) -> UrlState {
    let query = query.split_once('?').map_or(query, |(_, q)| q);
    let query = query.split('#').next().unwrap_or_default();

    let mut state = UrlState::default();
    let mut selected_kind = None;
    let mut selected_story = None;

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value);
        match key {
            "id" if !value.is_empty() => {
                state.specifier = Some(SelectionSpecifier::parse(&value));
            }
            "path" => {
                if let Some((mode, id)) = parse_path(&value) {
                    state.view_mode.get_or_insert(mode);
                    state.specifier = Some(SelectionSpecifier::parse(&id));
                }
            }
            "viewMode" => state.view_mode = Some(ViewMode::parse(&value)),
            "selectedKind" => selected_kind = Some(value),
            "selectedStory" => selected_story = Some(value),
            "args" => state.args = parse_pairs(&value),
            "globals" => state.globals = parse_pairs(&value),
            _ => {}
        }
    }

    if state.specifier.is_none() {
        if let (Some(title), Some(name)) = (selected_kind, selected_story) {
            state.specifier = Some(SelectionSpecifier::TitleAndName { title, name });
        }
    }

    state
}

fn parse_path(path: &str) -> Option<(ViewMode, String)> {
    let mut parts = path.trim_start_matches('/').splitn(2, '/');
    let mode = match parts.next()? {
        "story" => ViewMode::Story,
        "docs" => ViewMode::Docs,
        _ => return None,
    };
    let id = parts.next().filter(|id| !id.is_empty())?;
    Some((mode, id.to_string()))
}

/// Parse `key:value,key:value`. Invalid pairs are dropped with a warning.
pub fn parse_pairs(encoded: &str) -> Args {
    let mut args = Args::new();
    for pair in encoded.split(',').filter(|p| !p.is_empty()) {
        let Some((key, raw)) = pair.split_once(':') else {
            warn!(pair = %pair, "Dropping URL arg without a value");
            continue;
        };
        if !is_valid_key(key) {
            warn!(key = %key, "Dropping URL arg with invalid key");
            continue;
        }
        match parse_value(raw) {
            Some(value) => {
                args.insert(key.to_string(), value);
            }
            None => warn!(key = %key, value = %raw, "Dropping URL arg with invalid value"),
        }
    }
    args
}

fn parse_value(raw: &str) -> Option<Value> {
    match raw {
        "!true" => Some(Value::Bool(true)),
        "!false" => Some(Value::Bool(false)),
        "!null" => Some(Value::Null),
        _ if raw.starts_with('!') => None,
        _ if raw
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.' | '#')) =>
        {
            Some(Value::String(raw.to_string()))
        }
        _ => None,
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes are kept as-is.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match bytes.get(i + 1..i + 3).and_then(hex_byte) {
                Some(decoded) => {
                    out.push(decoded);
                    i += 2;
                }
                None => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    if !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let hex = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_id_and_view_mode() {
        let state = parse_url("?id=example-button--primary&viewMode=docs");
        assert_eq!(
            state.specifier,
            Some(SelectionSpecifier::Id("example-button--primary".into()))
        );
        assert_eq!(state.view_mode, Some(ViewMode::Docs));
    }

    #[test]
    fn test_parse_star_and_defaults() {
        let state = parse_url("id=*");
        assert_eq!(state.specifier, Some(SelectionSpecifier::Any));
        assert_eq!(state.view_mode_or_default(), ViewMode::Story);
        assert_eq!(parse_url("").specifier_or_any(), SelectionSpecifier::Any);
    }

    #[test]
    fn test_parse_path() {
        let state = parse_url("http://localhost:6006/iframe.html?path=/docs/intro--page");
        assert_eq!(state.specifier, Some(SelectionSpecifier::Id("intro--page".into())));
        assert_eq!(state.view_mode, Some(ViewMode::Docs));
    }

    #[test]
    fn test_parse_legacy_kind_and_story() {
        let state = parse_url("selectedKind=Example%2FButton&selectedStory=Primary+Large");
        assert_eq!(
            state.specifier,
            Some(SelectionSpecifier::TitleAndName {
                title: "Example/Button".into(),
                name: "Primary Large".into()
            })
        );
    }

    #[test]
    fn test_parse_args_and_globals() {
        let state = parse_url("id=a--1&args=label:Hello%20world,primary:!true,gone:!null,bad:%3Cscript%3E&globals=theme:dark");
        assert_eq!(
            json!(state.args),
            json!({ "label": "Hello world", "primary": true, "gone": null })
        );
        assert_eq!(json!(state.globals), json!({ "theme": "dark" }));
    }

    #[test]
    fn test_invalid_pairs_dropped() {
        let args = parse_pairs("noValue,:x,ok:1,weird:!undefined,x$y:2");
        assert_eq!(json!(args), json!({ "ok": "1" }));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%C3%A9"), "é");
    }
}
