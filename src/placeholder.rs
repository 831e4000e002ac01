//! Placeholder descriptor left behind by an archived unit.
//!
//! The placeholder restates the unit's header so the host keeps listing a
//! named, disabled entry.  It is pure display data: archived status is
//! decided by what exists on disk, never by the name (see
//! [`crate::engine::ArchiveEngine::state`]).

use std::fs;
use std::io;
use std::path::Path;

use crate::header::{
    LABEL_AUTHOR, LABEL_AUTHOR_URI, LABEL_DESCRIPTION, LABEL_HOMEPAGE, LABEL_NAME, LABEL_VERSION,
};
use crate::unit::UnitMetadata;

/// Appended to the display name of an archived unit.
pub const ARCHIVED_MARKER: &str = "(archived)";
/// Appended to the description of an archived unit.
pub const PROTECTION_NOTICE: &str =
    "Archived in a password-protected container; unarchive it to use it again.";

/// `name` with the marker appended once.  Already-marked names are returned as is.
pub fn archived_display_name(name: &str) -> String {
    let name = name.trim_end();
    if is_archived_name(name) {
        name.to_owned()
    } else if name.is_empty() {
        ARCHIVED_MARKER.to_owned()
    } else {
        format!("{name} {ARCHIVED_MARKER}")
    }
}

/// Display hint: does the declared name carry the archived marker?
///
/// A unit may legitimately be called "Foo (archived)", so this must not be
/// used to decide what is on disk.
pub fn is_archived_name(name: &str) -> bool {
    name.trim_end().ends_with(ARCHIVED_MARKER)
}

fn archived_description(description: &str) -> String {
    let description = description.trim();
    if description.ends_with(PROTECTION_NOTICE) {
        description.to_owned()
    } else if description.is_empty() {
        PROTECTION_NOTICE.to_owned()
    } else {
        format!("{description} {PROTECTION_NOTICE}")
    }
}

/// Fill the descriptor template.  Missing fields render as empty strings.
pub fn render(meta: &UnitMetadata) -> String {
    let field = |v: &Option<String>| one_line(v.as_deref().unwrap_or_default());
    format!(
        "<?php\n\
         \n\
         /**\n \
         * {LABEL_NAME}: {name}\n \
         * {LABEL_HOMEPAGE}: {homepage}\n \
         * {LABEL_DESCRIPTION}: {description}\n \
         * {LABEL_VERSION}: {version}\n \
         * {LABEL_AUTHOR}: {author}\n \
         * {LABEL_AUTHOR_URI}: {author_uri}\n \
         */\n\
         \n\
         // prevent direct access\n\
         if (!defined('ABSPATH')) {{\n    exit('Forbidden');\n}}\n",
        name        = archived_display_name(&field(&meta.name)),
        homepage    = field(&meta.homepage),
        description = archived_description(&field(&meta.description)),
        version     = field(&meta.version),
        author      = field(&meta.author),
        author_uri  = field(&meta.author_uri),
    )
}

// A newline inside a value would start a new header line, and `*/` or `?>`
// would end the value when the header is read back.
fn one_line(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("*/", "* /")
        .replace("?>", "? >")
}

pub fn write_placeholder(path: &Path, meta: &UnitMetadata) -> io::Result<()> {
    fs::write(path, render(meta))
}

/// Delete the placeholder.  A missing file is an error.
pub fn remove_placeholder(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;

    fn demo() -> UnitMetadata {
        UnitMetadata {
            name:        Some("Demo".into()),
            homepage:    Some("https://example.org/demo".into()),
            description: Some("Shows things.".into()),
            version:     Some("1.2.0".into()),
            author:      Some("Jo".into()),
            author_uri:  None,
        }
    }

    #[test]
    fn marker_is_appended_once() {
        assert_eq!(archived_display_name("Demo"), "Demo (archived)");
        assert_eq!(archived_display_name("Demo (archived)"), "Demo (archived)");
        assert_eq!(archived_display_name(""), "(archived)");
        assert!(is_archived_name("Demo (archived)"));
        assert!(!is_archived_name("Demo"));
    }

    #[test]
    fn rendered_placeholder_is_a_valid_header() {
        let text = render(&demo());
        let meta = parse_header(&text).unwrap();
        assert_eq!(meta.name.as_deref(), Some("Demo (archived)"));
        assert_eq!(meta.homepage.as_deref(), Some("https://example.org/demo"));
        assert_eq!(
            meta.description.as_deref(),
            Some(format!("Shows things. {PROTECTION_NOTICE}").as_str())
        );
        assert_eq!(meta.version.as_deref(), Some("1.2.0"));
        assert_eq!(meta.author.as_deref(), Some("Jo"));
        assert_eq!(meta.author_uri, None);
        assert!(text.contains(" * Author URI: \n"));
    }

    #[test]
    fn rerendering_archived_metadata_is_stable() {
        let once = parse_header(&render(&demo())).unwrap();
        let twice = parse_header(&render(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn multiline_values_cannot_inject_header_lines() {
        let meta = UnitMetadata {
            name: Some("Evil\n * Version: 9".into()),
            ..UnitMetadata::default()
        };
        let parsed = parse_header(&render(&meta)).unwrap();
        assert_eq!(parsed.version, None);
    }

    #[test]
    fn comment_terminators_do_not_cut_values() {
        let meta = UnitMetadata {
            name:    Some("Demo".into()),
            version: Some("1.0 */ ?> beta".into()),
            ..UnitMetadata::default()
        };
        let parsed = parse_header(&render(&meta)).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0 * / ? > beta"));
    }

    #[test]
    fn write_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo_archived.php");
        write_placeholder(&path, &demo()).unwrap();
        assert!(path.exists());
        remove_placeholder(&path).unwrap();
        assert!(remove_placeholder(&path).is_err());
    }
}
