//! Title resolution for story files.

use crate::model::StorySpecifier;

/// Resolve the title of a story file.
///
/// `import_path` is relative to the working directory (`./src/Button.stories.rs`).
/// A user title is kept and prefixed with the specifier's title prefix; without
/// one, the title is derived from the file's path below the specifier directory.
pub fn user_or_auto_title(
    specifier: &StorySpecifier,
    import_path: &str,
    user_title: Option<&str>,
) -> String {
    let prefix = specifier.title_prefix();

    if let Some(title) = user_title {
        let title = title.trim_matches('/');
        return if prefix.is_empty() {
            title.to_string()
        } else {
            format!("{prefix}/{title}")
        };
    }

    let relative = strip_directory(import_path, specifier.directory());
    let mut parts: Vec<String> = prefix
        .split('/')
        .chain(relative.split('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .map(str::to_string)
        .collect();

    if let Some(last) = parts.last_mut() {
        if let Some(dot) = last.find('.') {
            if dot > 0 {
                last.truncate(dot);
            }
        }
    }

    remove_redundant_filename(parts).join("/")
}

fn strip_directory<'a>(import_path: &'a str, directory: &str) -> &'a str {
    let path = import_path.trim_start_matches("./");
    let dir = directory.trim_start_matches("./");
    if dir == "." || dir.is_empty() {
        return path;
    }
    path.strip_prefix(dir)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(path)
}

/// Drop a trailing `index` segment, or a trailing segment that repeats its parent.
fn remove_redundant_filename(mut parts: Vec<String>) -> Vec<String> {
    let len = parts.len();
    if len == 0 {
        return parts;
    }
    let last = &parts[len - 1];
    let redundant = last == "index" || (len > 1 && parts[len - 2] == *last);
    if redundant {
        parts.pop();
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &str) -> StorySpecifier {
        StorySpecifier::new(dir, "**/*.stories.*")
    }

    #[test]
    fn test_user_title_kept() {
        assert_eq!(
            user_or_auto_title(&spec("./src"), "./src/x.stories.rs", Some("Example/Button")),
            "Example/Button"
        );
    }

    #[test]
    fn test_user_title_with_prefix() {
        let spec = spec("./src").with_title_prefix("Lib");
        assert_eq!(
            user_or_auto_title(&spec, "./src/x.stories.rs", Some("Button")),
            "Lib/Button"
        );
    }

    #[test]
    fn test_auto_title_from_path() {
        assert_eq!(
            user_or_auto_title(&spec("./src"), "./src/components/Button.stories.rs", None),
            "components/Button"
        );
    }

    #[test]
    fn test_auto_title_drops_index_and_repeats() {
        assert_eq!(
            user_or_auto_title(&spec("./src"), "./src/Button/index.stories.rs", None),
            "Button"
        );
        assert_eq!(
            user_or_auto_title(&spec("./src"), "./src/Button/Button.stories.rs", None),
            "Button"
        );
    }

    #[test]
    fn test_auto_title_with_prefix_and_root_dir() {
        let spec = spec(".").with_title_prefix("Design System");
        assert_eq!(
            user_or_auto_title(&spec, "./Card.stories.rs", None),
            "Design System/Card"
        );
    }
}
