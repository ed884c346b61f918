mod common;

use std::fs;

use anyhow::Result;
use common::Fixture;
use gothic_store::ScriptData;
use tempfile::TempDir;

#[test]
fn script_values_survive_a_save_and_load() -> Result<()> {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.storage.set('quest.rats', 'done')
         gothic.storage.set('quest.kills', 12)
         gothic.storage.set('quest.ratio', 0.5)
         gothic.storage.set('quest.met_xardas', true)",
    );

    let data = fixture.engine.serialize();
    assert_eq!(data.len(), 4);
    let bytes = data.encode()?;
    let decoded = ScriptData::decode(&bytes)?;
    assert_eq!(decoded, data);

    let restored = Fixture::started();
    restored.engine.deserialize(&decoded);
    assert_eq!(
        restored.run(
            "return gothic.storage.get('quest.rats'), tonumber(gothic.storage.get('quest.kills')) + 1,
                    gothic.storage.get('quest.ratio'), gothic.storage.get('quest.met_xardas')"
        ),
        "done, 13, 0.5, true"
    );
    Ok(())
}

#[test]
fn deserialize_replaces_existing_values() {
    let fixture = Fixture::started();
    fixture.run("gothic.storage.set('stale', 'yes')");
    let mut data = ScriptData::new();
    data.global_data.insert("fresh".to_string(), "1".to_string());
    fixture.engine.deserialize(&data);
    assert_eq!(fixture.run("return gothic.storage.get('stale'), gothic.storage.get('fresh')"), "nil, 1");
    assert_eq!(fixture.engine.storage().keys(), vec!["fresh".to_string()]);
}

#[test]
fn storage_rejects_tables_and_removes_on_nil() {
    let fixture = Fixture::started();
    let rejected = fixture.attempt("gothic.storage.set('bag', {})");
    assert!(rejected.starts_with("false, "), "{rejected}");
    assert!(rejected.contains("cannot store a table under 'bag'"), "{rejected}");

    fixture.run("gothic.storage.set('door', 'open')");
    fixture.run("gothic.storage.set('door', nil)");
    assert!(fixture.engine.storage().is_empty());
    assert_eq!(
        fixture.run("gothic.storage.set('a', 1) gothic.storage.set('b', 2) return table.concat(gothic.storage.keys(), ',')"),
        "a,b"
    );
    assert_eq!(
        fixture.run("return gothic.storage.remove('a'), gothic.storage.remove('a')"),
        "true, false"
    );
}

#[test]
fn storage_outlives_the_lua_state() {
    let mut fixture = Fixture::started();
    fixture.run("gothic.storage.set('chapter', 2)");
    fixture.engine.shutdown();
    assert_eq!(fixture.engine.serialize().len(), 1);
    assert!(fixture.engine.initialize());
    assert_eq!(fixture.run("return gothic.storage.get('chapter')"), "2");
}

#[test]
fn save_files_round_trip_through_disk() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("script.sav");

    let fixture = Fixture::started();
    fixture.run("gothic.storage.set('ore', 300)");
    fixture.engine.serialize().write_to(fs::File::create(&path)?)?;

    let loaded = ScriptData::read_from(fs::File::open(&path)?)?;
    assert_eq!(loaded.global_data.get("ore").map(String::as_str), Some("300"));
    Ok(())
}
