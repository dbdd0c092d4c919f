use std::io::{Read, Write};

use crate::structures::expire_table::{ExpireTable, LoadOptions, FILTER_MAGIC, TABLE_MAGIC};
use crate::types::error::{Error, PersistError};

use super::assert_permutation;

fn populated_table() -> ExpireTable {
    let table = ExpireTable::create_with_seed(128, 16, 0xDA7A).unwrap();
    for i in 0..50u32 {
        let key = format!("p{i}");
        let mut cell = table.find_or_insert(key.as_bytes());
        cell.fill(i as u8);
        cell[..4].copy_from_slice(&i.to_le_bytes());
    }
    table
}

#[test]
fn dump_load_roundtrip_preserves_every_record() {
    let table = populated_table();
    table.set_next_value(42);

    let mut image = Vec::new();
    table.dump(&mut image).unwrap();

    let loaded = ExpireTable::load(image.as_slice(), &LoadOptions::default()).unwrap();
    assert_eq!(loaded.capacity(), table.capacity());
    assert_eq!(loaded.value_size(), table.value_size());
    assert_eq!(loaded.seed(), table.seed());
    assert_eq!(loaded.next_value(), 42);

    for i in 0..50u32 {
        let key = format!("p{i}");
        let original = table.find(key.as_bytes()).unwrap();
        let reloaded = loaded.find(key.as_bytes()).unwrap();
        assert_eq!(&*original, &*reloaded, "value drift for {key}");
        assert_eq!(original.location(), reloaded.location());
    }
    assert_permutation(&loaded);
}

#[test]
fn dump_is_deterministic_and_roundtrips_bitwise() {
    let table = populated_table();
    let mut first = Vec::new();
    let mut second = Vec::new();
    table.dump(&mut first).unwrap();
    table.dump(&mut second).unwrap();
    assert_eq!(first, second);

    let loaded = ExpireTable::load(first.as_slice(), &LoadOptions::default()).unwrap();
    let mut redumped = Vec::new();
    loaded.dump(&mut redumped).unwrap();
    assert_eq!(first, redumped, "load followed by dump must be bitwise stable");
}

#[test]
fn image_starts_with_the_table_magic() {
    let table = ExpireTable::create(64, 8).unwrap();
    let mut image = Vec::new();
    table.dump(&mut image).unwrap();
    assert_eq!(&image[..12], &TABLE_MAGIC);
}

#[test]
fn sibling_filter_images_are_rejected_outright() {
    let mut image = Vec::new();
    image.extend_from_slice(&FILTER_MAGIC);
    image.extend_from_slice(&[0u8; 256]);
    // Even with the legacy escape hatch open, the sibling magic is a hard
    // error.
    let options = LoadOptions { allow_legacy: true };
    let err = ExpireTable::load(image.as_slice(), &options).unwrap_err();
    assert!(matches!(
        err,
        Error::Persistence(PersistError::SiblingMagic)
    ));
}

#[test]
fn headerless_images_need_explicit_opt_in() {
    let table = populated_table();
    let mut image = Vec::new();
    table.dump(&mut image).unwrap();
    // Strip the magic to fabricate a legacy dump.
    let legacy = image[12..].to_vec();

    let err = ExpireTable::load(legacy.as_slice(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Persistence(PersistError::BadMagic)));

    let options = LoadOptions { allow_legacy: true };
    let loaded = ExpireTable::load(legacy.as_slice(), &options).unwrap();
    assert!(loaded.find(b"p7").is_some());
}

#[test]
fn truncated_images_fail_cleanly() {
    let table = populated_table();
    let mut image = Vec::new();
    table.dump(&mut image).unwrap();

    for cut in [5, 20, image.len() / 2, image.len() - 1] {
        let err = ExpireTable::load(&image[..cut], &LoadOptions::default()).unwrap_err();
        assert!(
            matches!(err, Error::Persistence(PersistError::Truncated)),
            "cut at {cut} gave {err:?}"
        );
    }
}

#[test]
fn corrupt_geometry_is_rejected() {
    let table = populated_table();
    let mut image = Vec::new();
    table.dump(&mut image).unwrap();

    // The capacity field sits after magic (12), next_value (8) and
    // value_size (8). A non-power-of-two there must be refused.
    let mut broken = image.clone();
    broken[28..36].copy_from_slice(&100u64.to_ne_bytes());
    let err = ExpireTable::load(broken.as_slice(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Persistence(PersistError::Corrupt(_))));

    // An index mask that disagrees with the bucket count is also refused.
    let mut broken = image;
    broken[44..52].copy_from_slice(&0xFFu64.to_ne_bytes());
    let err = ExpireTable::load(broken.as_slice(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Persistence(PersistError::Corrupt(_))));
}

#[test]
fn geometry_check_applies_rounding_and_padding() {
    let table = populated_table();
    assert!(table.check_geometry(128, 16).is_ok());
    // Equivalent after rounding up and padding.
    assert!(table.check_geometry(100, 13).is_ok());
    assert!(table.check_geometry(128, 8).is_err());
    assert!(table.check_geometry(256, 16).is_err());
}

#[test]
fn file_roundtrip_through_tempdir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.img");

    let table = populated_table();
    let mut file = std::fs::File::create(&path).unwrap();
    let mut image = Vec::new();
    table.dump(&mut image).unwrap();
    file.write_all(&image).unwrap();
    drop(file);

    let loaded = ExpireTable::load_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.find(b"p3").unwrap()[..4], 3u32.to_le_bytes());

    let missing = dir.path().join("absent.img");
    assert!(ExpireTable::load_file(&missing, &LoadOptions::default()).is_err());
}

#[test]
fn value_payload_travels_behind_the_arena() {
    let table = populated_table();
    let mut image = Vec::new();
    table
        .dump_with(&mut image, |arena, writer| {
            // Serialize a checksum of the arena as the external payload.
            let sum: u64 = arena.iter().map(|&b| b as u64).sum();
            writer.write_all(&sum.to_ne_bytes())?;
            Ok(8)
        })
        .unwrap();

    let loaded = ExpireTable::load_with(
        image.as_slice(),
        &LoadOptions::default(),
        |arena, reader| {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            let sum: u64 = arena.iter().map(|&b| b as u64).sum();
            assert_eq!(u64::from_ne_bytes(buf), sum);
            Ok(8)
        },
    )
    .unwrap();
    assert!(loaded.find(b"p0").is_some());
}

#[test]
fn epoch_counter_survives_the_roundtrip() {
    let table = ExpireTable::create_with_seed(64, 4, 0xE0C).unwrap();
    // Enough inserts to tick the epoch several times.
    for i in 0..300u32 {
        table.find_or_insert(format!("t{i}").as_bytes());
    }
    let epoch_before = table.epoch.load(std::sync::atomic::Ordering::Relaxed);
    assert!(epoch_before > 1);

    let mut image = Vec::new();
    table.dump(&mut image).unwrap();
    let loaded = ExpireTable::load(image.as_slice(), &LoadOptions::default()).unwrap();
    let epoch_after = loaded.epoch.load(std::sync::atomic::Ordering::Relaxed);
    assert_eq!(epoch_before, epoch_after);
}
