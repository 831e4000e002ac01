//! Descriptor header parsing.
//!
//! The host lists a unit by reading `Label: value` lines near the top of its
//! entry file, e.g.
//!
//! ```text
//!  * Plugin Name: Demo
//!  * Version: 1.2.0
//! ```
//!
//! Only the first [`HEADER_SCAN_BYTES`] are inspected.  Labels match
//! case-insensitively and may be preceded by comment punctuation, or by
//! the opening `<?php` tag when the header shares its line.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::unit::UnitMetadata;

pub const HEADER_SCAN_BYTES: u64 = 8 * 1024;

// ── Labels ───────────────────────────────────────────────────────────────────

pub const LABEL_NAME:        &str = "Plugin Name";
pub const LABEL_HOMEPAGE:    &str = "Plugin URI";
pub const LABEL_DESCRIPTION: &str = "Description";
pub const LABEL_VERSION:     &str = "Version";
pub const LABEL_AUTHOR:      &str = "Author";
pub const LABEL_AUTHOR_URI:  &str = "Author URI";

fn header_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^(?:[ \t]*<\?php)?[ \t/*#@]*(Plugin Name|Plugin URI|Description|Version|Author URI|Author)[ \t]*:(.*)$")
            .expect("static header regex")
    })
}

/// Extract metadata from header text.  The first occurrence of a label wins.
/// Returns `None` when no `Plugin Name` is present, which is how the host
/// tells entry files apart from ordinary source files.
pub fn parse_header(text: &str) -> Option<UnitMetadata> {
    let mut meta = UnitMetadata::default();
    for caps in header_line().captures_iter(text) {
        let label = caps[1].to_ascii_lowercase();
        let value = clean_value(&caps[2]);
        let slot = match label.as_str() {
            "plugin name" => &mut meta.name,
            "plugin uri"  => &mut meta.homepage,
            "description" => &mut meta.description,
            "version"     => &mut meta.version,
            "author"      => &mut meta.author,
            "author uri"  => &mut meta.author_uri,
            _             => continue,
        };
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value);
        }
    }
    meta.name.as_ref()?;
    Some(meta)
}

/// Read the header of an entry file on disk.
pub fn read_header(path: &Path) -> io::Result<Option<UnitMetadata>> {
    let mut buf = Vec::new();
    File::open(path)?.take(HEADER_SCAN_BYTES).read_to_end(&mut buf)?;
    Ok(parse_header(&String::from_utf8_lossy(&buf)))
}

fn clean_value(raw: &str) -> String {
    // A `*/` or `?>` closes the comment; code after it is not part of the value.
    let end = ["*/", "?>"].iter().filter_map(|m| raw.find(m)).min().unwrap_or(raw.len());
    raw[..end].trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_docblock_header() {
        let text = "<?php\n/**\n * Plugin Name: Demo\n * Plugin URI: https://example.org/demo\n * Description: Shows things.\n * Version: 1.2.0\n * Author: Jo\n * Author URI: https://example.org\n */\n";
        let meta = parse_header(text).unwrap();
        assert_eq!(meta.name.as_deref(), Some("Demo"));
        assert_eq!(meta.homepage.as_deref(), Some("https://example.org/demo"));
        assert_eq!(meta.description.as_deref(), Some("Shows things."));
        assert_eq!(meta.version.as_deref(), Some("1.2.0"));
        // `Author` must not swallow the `Author URI` line.
        assert_eq!(meta.author.as_deref(), Some("Jo"));
        assert_eq!(meta.author_uri.as_deref(), Some("https://example.org"));
    }

    #[test]
    fn labels_are_case_insensitive_and_first_wins() {
        let text = "# plugin name: lower\n# Plugin Name: second\n";
        assert_eq!(parse_header(text).unwrap().name.as_deref(), Some("lower"));
    }

    #[test]
    fn files_without_a_name_are_not_units() {
        assert!(parse_header("<?php\n// Version: 3\n").is_none());
        assert!(parse_header(" * Plugin Name:   \n").is_none());
    }

    #[test]
    fn one_line_docblock_is_trimmed() {
        let meta = parse_header("/* Plugin Name: Tiny */").unwrap();
        assert_eq!(meta.name.as_deref(), Some("Tiny"));
    }

    #[test]
    fn header_on_the_opening_tag_line() {
        let meta = parse_header("<?php /* Plugin Name: Hello */ echo 1;\n").unwrap();
        assert_eq!(meta.name.as_deref(), Some("Hello"));

        let meta = parse_header("<?php /* Plugin Name: Hello */\n").unwrap();
        assert_eq!(meta.name.as_deref(), Some("Hello"));

        let meta = parse_header("  <?php // Version: 2\n * Plugin Name: Later\n").unwrap();
        assert_eq!(meta.version.as_deref(), Some("2"));
        assert_eq!(meta.name.as_deref(), Some("Later"));
    }
}
