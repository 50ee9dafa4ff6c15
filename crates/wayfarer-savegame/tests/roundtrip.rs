//! Property tests: whatever a save file holds survives encoding unchanged.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use wayfarer_core::{Bytecode, ObjectRef, Record, ScriptValue, Table};
use wayfarer_savegame::{SaveError, SaveFile, SaveHeader};

const OBJECTS: usize = 4;

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 _-]{0,12}"
}

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..2_000_000_000).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap())
}

fn scalar() -> impl Strategy<Value = ScriptValue> {
    prop_oneof![
        any::<bool>().prop_map(ScriptValue::Bool),
        (-1.0e9f64..1.0e9).prop_map(ScriptValue::Number),
        name().prop_map(ScriptValue::from),
        prop::collection::vec(any::<u8>(), 0..16)
            .prop_map(|code| ScriptValue::Function(Bytecode::new(code))),
        (0..OBJECTS).prop_map(|i| ScriptValue::Object(ObjectRef::Registry(i))),
        Just(ScriptValue::Object(ObjectRef::Player)),
    ]
}

fn table_of(value: impl Strategy<Value = ScriptValue>) -> impl Strategy<Value = Table> {
    prop::collection::vec((name(), value), 0..6).prop_map(|pairs| {
        let mut table = Table::new();
        for (key, value) in pairs {
            table.set(key.into(), value);
        }
        table
    })
}

fn value() -> impl Strategy<Value = ScriptValue> {
    scalar().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            table_of(inner.clone()).prop_map(ScriptValue::Table),
            (name(), table_of(inner))
                .prop_map(|(class, fields)| ScriptValue::Record(Record::new(class, fields))),
        ]
    })
}

fn header() -> impl Strategy<Value = SaveHeader> {
    (
        (name(), name(), name(), name(), name()),
        timestamp(),
        timestamp(),
        (-90.0f64..90.0, -180.0f64..180.0, -500.0f64..9000.0),
    )
        .prop_map(
            |((cartridge, player, device, id, save), created, saved, (lat, lon, alt))| SaveHeader {
                cartridge_name: cartridge,
                cartridge_created: created,
                player_name: player,
                device_name: device,
                device_id: id,
                save_name: save,
                saved_at: saved,
                latitude: lat,
                longitude: lon,
                altitude: alt,
            },
        )
}

fn save_file() -> impl Strategy<Value = SaveFile> {
    (
        header(),
        prop::collection::vec(name(), OBJECTS),
        table_of(value()),
        prop::collection::vec(table_of(value()), OBJECTS),
    )
        .prop_map(|(header, class_names, player, objects)| SaveFile {
            header,
            class_names,
            player,
            objects,
        })
}

proptest! {
    #[test]
    fn encode_decode_is_identity(file in save_file()) {
        let bytes = file.to_bytes().unwrap();
        let decoded = SaveFile::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, file);
    }

    #[test]
    fn every_strict_prefix_is_rejected(file in save_file(), cut in any::<prop::sample::Index>()) {
        let bytes = file.to_bytes().unwrap();
        let cut = cut.index(bytes.len());
        let err = SaveFile::from_bytes(&bytes[..cut]).unwrap_err();
        prop_assert!(
            matches!(err, SaveError::TruncatedFile | SaveError::InvalidFormat(_)),
            "unexpected error {err:?}"
        );
    }
}
