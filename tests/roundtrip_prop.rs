use plugvault::unit::locate;
use plugvault::{ArchiveEngine, ErrorKind, Secret, UnitMetadata, UnitState};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Relative paths one or two levels deep.  Directory and file names use
/// different prefixes so a path is never both.
fn unit_files() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    let path = (proptest::option::of("d_[a-z]{1,5}"), "f_[a-z0-9]{1,6}(\\.[a-z]{1,3})?")
        .prop_map(|(dir, file)| match dir {
            Some(d) => format!("{d}/{file}"),
            None    => file,
        });
    proptest::collection::btree_map(path, proptest::collection::vec(any::<u8>(), 0..512), 0..8)
}

fn populate(root: &Path, files: &BTreeMap<String, Vec<u8>>) {
    fs::create_dir_all(root).unwrap();
    for (rel, data) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn archive_then_restore_is_identity(files in unit_files(), secret in "[ -~]{1,24}") {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        populate(&base.join("unit"), &files);

        let engine = ArchiveEngine::new(base, "php");
        let unit = locate("unit/unit.php", base).unwrap();
        let secret = Secret::new(secret);

        let archived = engine.archive(&unit, &UnitMetadata::default(), &secret).unwrap();
        let expected: Vec<&String> = files.keys().collect();
        let mut members: Vec<&String> = archived.members.iter().collect();
        members.sort();
        prop_assert_eq!(members, expected);
        prop_assert_eq!(engine.state("unit"), UnitState::Archived);

        engine.restore("unit_archived.php", &secret).unwrap();
        prop_assert_eq!(engine.state("unit"), UnitState::Unarchived);
        for (rel, data) in &files {
            prop_assert_eq!(&fs::read(base.join("unit").join(rel)).unwrap(), data);
        }
        prop_assert!(!base.join("unit_archived.zip").exists());
        prop_assert!(!base.join("unit_archived.php").exists());
    }

    #[test]
    fn any_other_secret_is_rejected(first in "[a-z]{1,12}", second in "[A-Z]{1,12}") {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        populate(&base.join("unit"), &BTreeMap::from([("f_main.php".to_string(), b"<?php".to_vec())]));

        let engine = ArchiveEngine::new(base, "php");
        let unit = locate("unit/unit.php", base).unwrap();
        engine.archive(&unit, &UnitMetadata::default(), &Secret::new(first)).unwrap();

        let err = engine.restore("unit_archived.php", &Secret::new(second)).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::DecryptFailed);
        prop_assert!(!base.join("unit").exists());
    }
}
