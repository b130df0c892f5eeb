//! Story id and display-name derivation.

use crate::error::IdError;
use crate::model::StoryId;

/// Separator between the component part and the story part of an id.
pub const ID_SEPARATOR: &str = "--";

/// Lowercase `part` and collapse every run of non-alphanumeric characters
/// into a single `-`, trimming dashes at both ends.
pub fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut pending_dash = false;

    for c in part.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}

/// Build a story id from a component id (or title) and a story name.
pub fn to_id(kind: &str, name: &str) -> Result<StoryId, IdError> {
    let kind_part = sanitize(kind);
    if kind_part.is_empty() {
        return Err(IdError::EmptyPart {
            part: "kind",
            value: kind.to_string(),
        });
    }

    let name_part = sanitize(name);
    if name_part.is_empty() {
        return Err(IdError::EmptyPart {
            part: "name",
            value: name.to_string(),
        });
    }

    Ok(StoryId::new(format!("{kind_part}{ID_SEPARATOR}{name_part}")))
}

/// Turn an export identifier into a display name: `primaryButton` becomes
/// `Primary Button`, `__page` becomes `Page`.
pub fn story_name_from_export(export_name: &str) -> String {
    let chars: Vec<char> = export_name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(prev) = current.chars().last() {
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_alphabetic() && c.is_numeric())
                || (prev.is_numeric() && c.is_alphabetic())
                || (prev.is_uppercase() && c.is_uppercase() && next_is_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Example/Button"), "example-button");
        assert_eq!(sanitize("  Hello, World!  "), "hello-world");
        assert_eq!(sanitize("a--b__c"), "a-b-c");
        assert_eq!(sanitize("Ünïcode Title"), "ünïcode-title");
        assert_eq!(sanitize("///"), "");
    }

    #[test]
    fn test_to_id() {
        assert_eq!(to_id("b/c", "1").unwrap().as_str(), "b-c--1");
        assert_eq!(
            to_id("Example/Button", "Primary").unwrap().as_str(),
            "example-button--primary"
        );
    }

    #[test]
    fn test_to_id_rejects_empty_parts() {
        assert_eq!(
            to_id("!!!", "x"),
            Err(IdError::EmptyPart {
                part: "kind",
                value: "!!!".to_string()
            })
        );
        assert!(matches!(to_id("a", "  "), Err(IdError::EmptyPart { part: "name", .. })));
    }

    #[test]
    fn test_story_name_from_export() {
        assert_eq!(story_name_from_export("primaryButton"), "Primary Button");
        assert_eq!(story_name_from_export("Primary"), "Primary");
        assert_eq!(story_name_from_export("__page"), "Page");
        assert_eq!(story_name_from_export("Story1"), "Story 1");
        assert_eq!(story_name_from_export("withICONButton"), "With ICON Button");
        assert_eq!(story_name_from_export("snake_case_name"), "Snake Case Name");
    }
}
