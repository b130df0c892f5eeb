//! Static reader for component-story-format modules.
//!
//! This is not a JavaScript parser. It reads the default export and the named
//! exports of a module and picks out the statically known fields: string
//! literals, string arrays, and JSON-compatible object literals. Anything
//! dynamic (functions, identifiers, spreads) is skipped.

use super::{ComponentAnnotation, Extracted, StoryAnnotation};
use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static DEFAULT_EXPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s+default\s+").expect("valid regex"));

static LEADING_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_$][\w$]*)").expect("valid regex"));

static EXPORT_BINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=\n]+)?=\s*")
        .expect("valid regex")
});

static EXPORT_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)")
        .expect("valid regex")
});

static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s*\{([^}]*)\}").expect("valid regex"));

static NAME_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_$][\w$]*)\.(?:storyName|name)\s*=\s*").expect("valid regex")
});

static PARAMETERS_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_$][\w$]*)\.parameters\s*=\s*\{").expect("valid regex")
});

/// Default-export fields that shape extraction but are not part of the annotation.
struct Meta {
    annotation: ComponentAnnotation,
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

/// Parse module source into annotations.
pub fn parse_csf(source: &str) -> Result<Extracted, ExtractError> {
    let code = strip_comments(source);
    let meta = parse_default_export(&code)?;

    let mut found: Vec<(usize, StoryAnnotation)> = Vec::new();

    for caps in EXPORT_BINDING.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let mut story = StoryAnnotation {
            export_name: name.as_str().to_string(),
            ..Default::default()
        };
        if code[whole.end()..].starts_with('{') {
            let (object, _) = object_literal(&code, whole.end())?;
            apply_story_properties(&mut story, &object_properties(object));
        }
        found.push((whole.start(), story));
    }

    for caps in EXPORT_FUNCTION.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        found.push((
            whole.start(),
            StoryAnnotation {
                export_name: name.as_str().to_string(),
                ..Default::default()
            },
        ));
    }

    for caps in EXPORT_LIST.captures_iter(&code) {
        let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        for item in list.as_str().split(',') {
            let exported = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item.trim(),
            };
            if exported.is_empty() || exported == "default" {
                continue;
            }
            found.push((
                whole.start(),
                StoryAnnotation {
                    export_name: exported.to_string(),
                    ..Default::default()
                },
            ));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut stories: Vec<StoryAnnotation> = Vec::with_capacity(found.len());
    for (_, story) in found {
        if stories.iter().any(|s| s.export_name == story.export_name) {
            continue;
        }
        if let Some(meta) = &meta {
            if !is_story_export(&story.export_name, meta) {
                debug!(export = %story.export_name, "Skipping excluded export");
                continue;
            }
        }
        stories.push(story);
    }

    apply_assignments(&code, &mut stories)?;

    Ok(Extracted {
        component: meta.map(|m| m.annotation),
        stories,
    })
}

fn is_story_export(name: &str, meta: &Meta) -> bool {
    let included = meta
        .include
        .as_ref()
        .map_or(true, |names| names.iter().any(|n| n == name));
    included && !meta.exclude.iter().any(|n| n == name)
}

fn parse_default_export(code: &str) -> Result<Option<Meta>, ExtractError> {
    let Some(found) = DEFAULT_EXPORT.find(code) else {
        return Ok(None);
    };
    let rest = &code[found.end()..];

    let object_start = if rest.starts_with('{') {
        found.end()
    } else if let Some(ident) = LEADING_IDENT.captures(rest).and_then(|c| c.get(1)) {
        let ident = ident.as_str();
        let declaration = Regex::new(&format!(
            r"(?:const|let|var)\s+{}\s*(?::[^=\n]+)?=\s*\{{",
            regex::escape(ident)
        ))
        .map_err(|e| ExtractError::Parse(e.to_string()))?;
        match declaration.find(code) {
            Some(decl) => decl.end() - 1,
            None => {
                return Err(ExtractError::Parse(format!(
                    "default export '{ident}' is not a static object"
                )))
            }
        }
    } else {
        return Err(ExtractError::Parse(
            "default export is not an object literal".to_string(),
        ));
    };

    let (object, _) = object_literal(code, object_start)?;
    let mut meta = Meta {
        annotation: ComponentAnnotation::default(),
        include: None,
        exclude: Vec::new(),
    };

    for (key, value) in object_properties(object) {
        match key.as_str() {
            "title" => meta.annotation.title = leading_string_literal(&value),
            "id" => meta.annotation.id = leading_string_literal(&value),
            "tags" => meta.annotation.tags = string_array(&value).unwrap_or_default(),
            "includeStories" => meta.include = string_array(&value),
            "excludeStories" => meta.exclude = string_array(&value).unwrap_or_default(),
            _ => {}
        }
    }

    Ok(Some(meta))
}

fn apply_story_properties(story: &mut StoryAnnotation, properties: &[(String, String)]) {
    for (key, value) in properties {
        match key.as_str() {
            "name" | "storyName" => story.name = leading_string_literal(value),
            "tags" => story.tags = string_array(value).unwrap_or_default(),
            "parameters" => {
                if let Some(parameters) = json_object(value) {
                    set_parameters(story, parameters);
                }
            }
            _ => {}
        }
    }
}

fn set_parameters(story: &mut StoryAnnotation, mut parameters: Map<String, Value>) {
    if let Some(Value::String(id)) = parameters.remove("__id") {
        story.id = Some(id);
    }
    story.parameters.extend(parameters);
}

/// `Story.storyName = '...'` and `Story.parameters = {...}` after the export.
fn apply_assignments(code: &str, stories: &mut [StoryAnnotation]) -> Result<(), ExtractError> {
    for caps in NAME_ASSIGNMENT.captures_iter(code) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(story) = stories.iter_mut().find(|s| s.export_name == target.as_str()) {
            if let Some(name) = leading_string_literal(&code[whole.end()..]) {
                story.name = Some(name);
            }
        }
    }

    for caps in PARAMETERS_ASSIGNMENT.captures_iter(code) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(story) = stories.iter_mut().find(|s| s.export_name == target.as_str()) {
            let (object, _) = object_literal(code, whole.end() - 1)?;
            if let Some(parameters) = json_object(object) {
                set_parameters(story, parameters);
            }
        }
    }

    Ok(())
}

// =============================================================================
// Lexical helpers
// =============================================================================

/// Remove `//` and `/* */` comments outside string literals, keeping line breaks.
fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 2;
                    continue;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1).copied()) {
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        out.push('\n');
                    }
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            ('"' | '\'' | '`', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// The balanced `{ ... }` starting at byte `start`, and the byte after it.
fn object_literal(code: &str, start: usize) -> Result<(&str, usize), ExtractError> {
    let bytes = code.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return Err(ExtractError::Parse("expected '{' at start of object".to_string()));
    }

    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }

        match b {
            b'"' | b'\'' | b'`' => quote = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + 1;
                    return Ok((&code[start..end], end));
                }
            }
            _ => {}
        }
    }

    Err(ExtractError::Parse("unbalanced braces in object literal".to_string()))
}

/// Byte offsets of `sep` at nesting depth zero, outside string literals.
fn top_level_positions(s: &str, sep: u8) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in s.as_bytes().iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => quote = Some(b),
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => depth -= 1,
            _ if b == sep && depth == 0 => positions.push(i),
            _ => {}
        }
    }

    positions
}

fn split_top_level(s: &str, sep: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for pos in top_level_positions(s, sep) {
        parts.push(&s[last..pos]);
        last = pos + 1;
    }
    parts.push(&s[last..]);
    parts
}

/// `key: value` pairs of an object literal's top level. Spreads, shorthand
/// properties and methods are skipped.
fn object_properties(object: &str) -> Vec<(String, String)> {
    let trimmed = object.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);

    split_top_level(inner, b',')
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() || part.starts_with("...") {
                return None;
            }
            let colon = *top_level_positions(part, b':').first()?;
            let key = part[..colon].trim().trim_matches(|c| c == '\'' || c == '"');
            Some((key.to_string(), part[colon + 1..].trim().to_string()))
        })
        .collect()
}

/// A string literal at the start of `s` (template literals only without `${`).
fn leading_string_literal(s: &str) -> Option<String> {
    let s = s.trim_start();
    let quote = s.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;

    let mut out = String::new();
    let mut chars = s[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            },
            c if c == quote => return Some(out),
            '$' if quote == '`' && chars.clone().next() == Some('{') => return None,
            c => out.push(c),
        }
    }
    None
}

fn string_array(value: &str) -> Option<Vec<String>> {
    let inner = value.trim().strip_prefix('[')?.strip_suffix(']')?;
    split_top_level(inner, b',')
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(leading_string_literal)
        .collect()
}

fn json_object(value: &str) -> Option<Map<String, Value>> {
    let json = js_object_to_json(value.trim());
    match serde_json::from_str::<Map<String, Value>>(&json) {
        Ok(map) => Some(map),
        Err(e) => {
            debug!(error = %e, "Object literal is not static, skipping");
            None
        }
    }
}

/// Rewrite a JavaScript object literal as JSON: quote bare keys, use double
/// quotes, drop trailing commas.
fn js_object_to_json(js: &str) -> String {
    let chars: Vec<char> = js.chars().collect();
    let mut out = String::with_capacity(js.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() && chars[i] != c {
                    match chars[i] {
                        '\\' if i + 1 < chars.len() => {
                            if chars[i + 1] != '\'' {
                                out.push('\\');
                            }
                            out.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                    i += 1;
                }
                out.push('"');
                i += 1;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(&'}') | Some(&']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|c| !c.is_whitespace());
                if next == Some(&':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUTTON: &str = r#"
import { Button } from './Button';

// Stories for the button component.
export default {
  title: 'Example/Button',
  component: Button,
  tags: ['autodocs', "ui"],
  parameters: { layout: 'centered' },
};

export const Primary = {
  args: { primary: true, label: 'Button' },
};

/* export const Commented = {}; */
export const Secondary: Story = {
  name: 'Secondary Button',
  tags: ['experimental'],
  parameters: { backgrounds: { default: 'dark' }, },
};

export function Large() {
  return render({ size: 'large' });
}

export const Small = () => render({ size: 'small' });
Small.storyName = 'Tiny';
Small.parameters = { viewport: 'mobile' };
"#;

    #[test]
    fn test_parse_meta() {
        let extracted = parse_csf(BUTTON).unwrap();
        let meta = extracted.component.unwrap();
        assert_eq!(meta.title.as_deref(), Some("Example/Button"));
        assert_eq!(meta.id, None);
        assert_eq!(meta.tags, vec!["autodocs", "ui"]);
    }

    #[test]
    fn test_parse_stories_in_source_order() {
        let extracted = parse_csf(BUTTON).unwrap();
        let names: Vec<_> = extracted
            .stories
            .iter()
            .map(|s| s.export_name.as_str())
            .collect();
        assert_eq!(names, vec!["Primary", "Secondary", "Large", "Small"]);
    }

    #[test]
    fn test_parse_story_properties() {
        let extracted = parse_csf(BUTTON).unwrap();
        let secondary = &extracted.stories[1];
        assert_eq!(secondary.name.as_deref(), Some("Secondary Button"));
        assert_eq!(secondary.tags, vec!["experimental"]);
        assert_eq!(
            Value::Object(secondary.parameters.clone()),
            json!({ "backgrounds": { "default": "dark" } })
        );
    }

    #[test]
    fn test_parse_assignments() {
        let extracted = parse_csf(BUTTON).unwrap();
        let small = &extracted.stories[3];
        assert_eq!(small.name.as_deref(), Some("Tiny"));
        assert_eq!(small.parameters.get("viewport"), Some(&json!("mobile")));
    }

    #[test]
    fn test_meta_by_identifier() {
        let source = r#"
const meta: Meta = { title: 'Forms/Input', id: 'input', tags: [] };
export default meta;
export const Basic = {};
"#;
        let extracted = parse_csf(source).unwrap();
        let meta = extracted.component.unwrap();
        assert_eq!(meta.title.as_deref(), Some("Forms/Input"));
        assert_eq!(meta.id.as_deref(), Some("input"));
        assert_eq!(extracted.stories.len(), 1);
    }

    #[test]
    fn test_no_default_export() {
        let extracted = parse_csf("export const Only = {};").unwrap();
        assert!(extracted.component.is_none());
        assert_eq!(extracted.stories.len(), 1);
    }

    #[test]
    fn test_default_export_not_static() {
        let result = parse_csf("export default makeMeta();\nexport const A = {};");
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }

    #[test]
    fn test_exclude_and_include_stories() {
        let source = r#"
export default { title: 'A', excludeStories: ['helper'] };
export const helper = {};
export const Real = {};
"#;
        let extracted = parse_csf(source).unwrap();
        assert_eq!(extracted.stories.len(), 1);
        assert_eq!(extracted.stories[0].export_name, "Real");

        let source = r#"
export default { title: 'A', includeStories: ['Kept'] };
export const Kept = {};
export const Dropped = {};
"#;
        let extracted = parse_csf(source).unwrap();
        assert_eq!(extracted.stories.len(), 1);
        assert_eq!(extracted.stories[0].export_name, "Kept");
    }

    #[test]
    fn test_explicit_story_id() {
        let source = "export default { title: 'A' };\nexport const B = { parameters: { __id: 'custom--id' } };";
        let extracted = parse_csf(source).unwrap();
        assert_eq!(extracted.stories[0].id.as_deref(), Some("custom--id"));
        assert!(extracted.stories[0].parameters.is_empty());
    }

    #[test]
    fn test_export_list_with_alias() {
        let source = "export default { title: 'A' };\nconst x = {};\nexport { x as Renamed, y };";
        let extracted = parse_csf(source).unwrap();
        let names: Vec<_> = extracted
            .stories
            .iter()
            .map(|s| s.export_name.as_str())
            .collect();
        assert_eq!(names, vec!["Renamed", "y"]);
    }

    #[test]
    fn test_unbalanced_object_is_error() {
        let result = parse_csf("export default { title: 'A';");
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }

    #[test]
    fn test_js_object_to_json() {
        assert_eq!(
            js_object_to_json("{ a: 'x', b: [1, 2,], c: { d: true }, }"),
            r#"{ "a": "x", "b": [1, 2], "c": { "d": true } }"#
        );
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let code = strip_comments("const a = 'http://x'; // gone\nconst b = 1;");
        assert_eq!(code, "const a = 'http://x'; \nconst b = 1;");
    }
}
