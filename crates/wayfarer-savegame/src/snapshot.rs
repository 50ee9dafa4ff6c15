//! Moving state between a [`SaveFile`] and a live [`ScriptHost`].

use tracing::{debug, trace};
use wayfarer_core::{ObjectFactory, ObjectRef, ScriptError, ScriptHost, ScriptValue, Table};

use crate::errors::{Result, SaveError};
use crate::header::SaveHeader;
use crate::save_file::SaveFile;

impl SaveFile {
    /// Snapshot the player and every registry object of `host`.
    pub fn capture(host: &dyn ScriptHost, header: SaveHeader) -> Result<Self> {
        let count = host.object_count();
        let mut class_names = Vec::with_capacity(count);
        let mut objects = Vec::with_capacity(count);
        for index in 0..count {
            let object = ObjectRef::Registry(index);
            let missing = || SaveError::Script(ScriptError::ObjectNotFound(object));
            class_names.push(host.class_name(object).ok_or_else(missing)?);
            objects.push(host.fields(object).ok_or_else(missing)?);
        }
        let player = host
            .fields(ObjectRef::Player)
            .ok_or(SaveError::Script(ScriptError::ObjectNotFound(ObjectRef::Player)))?;

        debug!(objects = count, "object graph captured");
        Ok(Self {
            header,
            class_names,
            player,
            objects,
        })
    }

    /// Load this save into `host`.
    ///
    /// Runs in two phases. The first checks everything that can fail: class
    /// names of existing objects, prototypes for objects that must be created,
    /// every function blob and every back-reference. Only then is the graph
    /// mutated: missing objects are created from `factory` and each object's
    /// fields are replaced by the saved ones. Returns the number of objects
    /// created.
    pub fn apply(&self, host: &dyn ScriptHost, factory: &dyn ObjectFactory) -> Result<usize> {
        let live = host.object_count();
        let prototypes = self.validate(host, factory, live)?;

        for (offset, (class_name, prototype)) in prototypes.into_iter().enumerate() {
            let object = host.create_object(&class_name, prototype)?;
            trace!(
                %object,
                class = %class_name,
                expected = live + offset,
                "restored object created"
            );
        }

        replace_fields(host, ObjectRef::Player, &self.player)?;
        for (index, fields) in self.objects.iter().enumerate() {
            replace_fields(host, ObjectRef::Registry(index), fields)?;
        }

        let created = self.object_count().saturating_sub(live);
        debug!(objects = self.object_count(), created, "object graph restored");
        Ok(created)
    }

    fn validate(
        &self,
        host: &dyn ScriptHost,
        factory: &dyn ObjectFactory,
        live: usize,
    ) -> Result<Vec<(String, Table)>> {
        if self.objects.len() != self.class_names.len() {
            return Err(SaveError::InvalidFormat(format!(
                "{} class names for {} objects",
                self.class_names.len(),
                self.objects.len()
            )));
        }

        let mut prototypes = Vec::new();
        for (index, found) in self.class_names.iter().enumerate() {
            if index < live {
                let expected = host
                    .class_name(ObjectRef::Registry(index))
                    .unwrap_or_default();
                if &expected != found {
                    return Err(SaveError::ClassMismatch {
                        index,
                        expected,
                        found: found.clone(),
                    });
                }
            } else {
                prototypes.push((found.clone(), factory.prototype(found)?));
            }
        }

        let count = self.object_count();
        for table in std::iter::once(&self.player).chain(&self.objects) {
            check_table(host, table, count)?;
        }
        Ok(prototypes)
    }
}

fn check_table(host: &dyn ScriptHost, table: &Table, count: usize) -> Result<()> {
    for (key, value) in table.iter() {
        check_value(host, key, count)?;
        check_value(host, value, count)?;
    }
    Ok(())
}

fn check_value(host: &dyn ScriptHost, value: &ScriptValue, count: usize) -> Result<()> {
    match value {
        ScriptValue::Function(code) => host.load_function(code).map_err(SaveError::from),
        ScriptValue::Object(ObjectRef::Registry(index)) if *index >= count => Err(
            SaveError::UnresolvedReference(i64::try_from(*index).unwrap_or(i64::MAX)),
        ),
        ScriptValue::Table(table) => check_table(host, table, count),
        ScriptValue::Record(record) => check_table(host, &record.fields, count),
        _ => Ok(()),
    }
}

/// Make `fields` the complete field set of `object`, in saved order.
fn replace_fields(host: &dyn ScriptHost, object: ObjectRef, fields: &Table) -> Result<()> {
    if let Some(current) = host.fields(object) {
        for (key, _) in current.iter() {
            host.set_field(object, key.clone(), ScriptValue::Nil)?;
        }
    }
    for (key, value) in fields.iter() {
        host.set_field(object, key.clone(), value.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use wayfarer_core::{CartridgeInfo, ClassCatalog, FunctionTable, MemoryHost};

    fn host() -> MemoryHost {
        MemoryHost::new(FunctionTable::new().with("noop", |_, _, _| Ok(ScriptValue::Nil)))
    }

    fn header() -> SaveHeader {
        let created = Utc.with_ymd_and_hms(2011, 3, 4, 5, 6, 7).unwrap();
        SaveHeader::for_cartridge(&CartridgeInfo::new("Harbour", created))
    }

    fn catalog() -> ClassCatalog {
        ClassCatalog::new()
            .with_class("ZItem", Table::new().with("Visible", false))
            .with_class("ZTimer", Table::new().with("Duration", 30.0))
    }

    #[test]
    fn capture_reads_registry_and_player() {
        let host = host();
        let _ = host.insert_object("ZCartridge", Table::new().with("Name", "Harbour"));
        host.set_player_fields(Table::new().with("Name", "Ann"));

        let file = SaveFile::capture(&host, header()).unwrap();
        assert_eq!(file.class_names, vec!["ZCartridge".to_owned()]);
        assert_eq!(file.player.get_str("Name"), Some(&"Ann".into()));
    }

    #[test]
    fn apply_creates_missing_objects() {
        let source = host();
        let _ = source.insert_object("ZCartridge", Table::new());
        let _ = source.insert_object("ZItem", Table::new().with("Visible", true));
        let file = SaveFile::capture(&source, header()).unwrap();

        let target = host();
        let _ = target.insert_object("ZCartridge", Table::new().with("Stale", 1.0));
        let created = file.apply(&target, &catalog()).unwrap();

        assert_eq!(created, 1);
        assert_eq!(target.object_count(), 2);
        assert_eq!(target.class_name(ObjectRef::Registry(1)).as_deref(), Some("ZItem"));
        assert_eq!(
            target.get_field(ObjectRef::Registry(1), "Visible"),
            Some(ScriptValue::Bool(true))
        );
        assert!(target.get_field(ObjectRef::Registry(0), "Stale").is_none());
    }

    #[test]
    fn class_mismatch_leaves_graph_untouched() {
        let source = host();
        let _ = source.insert_object("ZItem", Table::new().with("Visible", true));
        let file = SaveFile::capture(&source, header()).unwrap();

        let target = host();
        let _ = target.insert_object("ZTimer", Table::new().with("Duration", 5.0));
        assert_matches!(
            file.apply(&target, &catalog()),
            Err(SaveError::ClassMismatch { index: 0, .. })
        );
        assert_eq!(
            target.get_field(ObjectRef::Registry(0), "Duration"),
            Some(ScriptValue::Number(5.0))
        );
    }

    #[test]
    fn unknown_class_and_bad_bytecode_are_rejected_before_mutation() {
        let mut file = SaveFile::capture(&host(), header()).unwrap();
        file.class_names.push("ZGhost".into());
        file.objects.push(Table::new());
        let target = host();
        assert_matches!(
            file.apply(&target, &catalog()),
            Err(SaveError::Script(ScriptError::UnknownClass(_)))
        );
        assert_eq!(target.object_count(), 0);

        let mut file = SaveFile::capture(&host(), header()).unwrap();
        file.player = Table::new()
            .with("Name", "Bob")
            .with("OnTick", MemoryHost::function("vanished"));
        assert_matches!(
            file.apply(&target, &catalog()),
            Err(SaveError::Script(ScriptError::InvalidBytecode(_)))
        );
        assert!(target.get_field(ObjectRef::Player, "Name").is_none());
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut file = SaveFile::capture(&host(), header()).unwrap();
        let inventory = Table::new().with("1", ObjectRef::Registry(3));
        file.player = Table::new().with("Inventory", inventory);
        assert_matches!(
            file.apply(&host(), &catalog()),
            Err(SaveError::UnresolvedReference(3))
        );
    }
}
