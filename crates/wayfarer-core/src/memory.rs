//! In-memory [`ScriptHost`] with native callbacks.
//!
//! [`MemoryHost`] keeps the object graph in plain Rust structures. Functions
//! are native closures registered once in a [`FunctionTable`]; a function
//! field holds [`Bytecode`] whose bytes are the table key, so "recompiling" a
//! blob is a table lookup. Embedders without a real engine and the test suites
//! of the other crates drive the runtime through it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::errors::ScriptError;
use crate::host::{ObjectFactory, ScriptHost};
use crate::object::ObjectRef;
use crate::value::{Bytecode, ScriptValue, Table};

/// A native function callable from [`MemoryHost::invoke`].
///
/// Receives the host, the bound `self` object (for self calls) and the
/// arguments. Callbacks may re-enter the host; no host lock is held while
/// they run.
pub type NativeFunction = Arc<
    dyn Fn(&MemoryHost, Option<ObjectRef>, &[ScriptValue]) -> Result<ScriptValue, ScriptError>
        + Send
        + Sync,
>;

// ─────────────────────────────────────────────────────────────────────────────
// FunctionTable
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit `{name → callback}` table, built once before the host is created.
#[derive(Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, NativeFunction>,
}

impl FunctionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&MemoryHost, Option<ObjectRef>, &[ScriptValue]) -> Result<ScriptValue, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        let _ = self.functions.insert(name.into(), Arc::new(function));
    }

    /// Builder-style [`FunctionTable::register`].
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&MemoryHost, Option<ObjectRef>, &[ScriptValue]) -> Result<ScriptValue, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, function);
        self
    }

    /// Look up a callback.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NativeFunction> {
        self.functions.get(name).cloned()
    }

    /// Whether a callback is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionTable").field("functions", &names).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryHost
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct MemoryObject {
    class_name: String,
    fields: Table,
}

/// Object graph held in memory.
pub struct MemoryHost {
    functions: FunctionTable,
    player: RwLock<MemoryObject>,
    objects: RwLock<Vec<MemoryObject>>,
}

impl MemoryHost {
    /// Class name given to the player object.
    pub const PLAYER_CLASS: &'static str = "Player";

    /// Create an empty host with the given callbacks.
    #[must_use]
    pub fn new(functions: FunctionTable) -> Self {
        Self {
            functions,
            player: RwLock::new(MemoryObject {
                class_name: Self::PLAYER_CLASS.to_owned(),
                fields: Table::new(),
            }),
            objects: RwLock::new(Vec::new()),
        }
    }

    /// Function value whose bytecode names a registered callback.
    #[must_use]
    pub fn function(name: &str) -> ScriptValue {
        ScriptValue::Function(Bytecode::new(name.as_bytes().to_vec()))
    }

    /// Append a registry object. Never fails for the in-memory host.
    pub fn insert_object(&self, class_name: &str, fields: Table) -> ObjectRef {
        let mut objects = self.objects.write();
        objects.push(MemoryObject {
            class_name: class_name.to_owned(),
            fields,
        });
        ObjectRef::Registry(objects.len() - 1)
    }

    /// Replace all player fields.
    pub fn set_player_fields(&self, fields: Table) {
        self.player.write().fields = fields;
    }

    fn with_object<T>(&self, object: ObjectRef, f: impl FnOnce(&MemoryObject) -> T) -> Option<T> {
        match object {
            ObjectRef::Player => Some(f(&self.player.read())),
            ObjectRef::Registry(index) => self.objects.read().get(index).map(f),
        }
    }

    fn resolve(&self, object: ObjectRef, name: &str) -> Result<NativeFunction, ScriptError> {
        let field = self
            .with_object(object, |o| o.fields.get_str(name).cloned())
            .ok_or(ScriptError::ObjectNotFound(object))?;

        let not_found = || ScriptError::FunctionNotFound {
            object,
            function: name.to_owned(),
        };
        let Some(ScriptValue::Function(bytecode)) = field else {
            return Err(not_found());
        };
        std::str::from_utf8(bytecode.as_bytes())
            .ok()
            .and_then(|key| self.functions.get(key))
            .ok_or_else(not_found)
    }
}

impl ScriptHost for MemoryHost {
    fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn class_name(&self, object: ObjectRef) -> Option<String> {
        self.with_object(object, |o| o.class_name.clone())
    }

    fn fields(&self, object: ObjectRef) -> Option<Table> {
        self.with_object(object, |o| o.fields.clone())
    }

    fn get_field(&self, object: ObjectRef, name: &str) -> Option<ScriptValue> {
        self.with_object(object, |o| o.fields.get_str(name).cloned())
            .flatten()
    }

    fn set_field(
        &self,
        object: ObjectRef,
        key: ScriptValue,
        value: ScriptValue,
    ) -> Result<(), ScriptError> {
        if let ScriptValue::Function(bytecode) = &value {
            self.load_function(bytecode)?;
        }
        match object {
            ObjectRef::Player => self.player.write().fields.set(key, value),
            ObjectRef::Registry(index) => {
                let mut objects = self.objects.write();
                let target = objects
                    .get_mut(index)
                    .ok_or(ScriptError::ObjectNotFound(object))?;
                target.fields.set(key, value);
            }
        }
        Ok(())
    }

    fn create_object(&self, class_name: &str, fields: Table) -> Result<ObjectRef, ScriptError> {
        let object = self.insert_object(class_name, fields);
        trace!(%object, class = class_name, "created object");
        Ok(object)
    }

    fn has_function(&self, object: ObjectRef, name: &str) -> bool {
        self.resolve(object, name).is_ok()
    }

    fn invoke(
        &self,
        object: ObjectRef,
        name: &str,
        bind_self: bool,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        let function = self.resolve(object, name)?;
        function(self, bind_self.then_some(object), &args)
    }

    fn load_function(&self, bytecode: &Bytecode) -> Result<(), ScriptError> {
        let key = std::str::from_utf8(bytecode.as_bytes())
            .map_err(|e| ScriptError::InvalidBytecode(e.to_string()))?;
        if self.functions.contains(key) {
            Ok(())
        } else {
            Err(ScriptError::InvalidBytecode(format!(
                "no native function named {key:?}"
            )))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ClassCatalog
// ─────────────────────────────────────────────────────────────────────────────

/// [`ObjectFactory`] backed by a fixed set of class prototypes.
#[derive(Clone, Debug, Default)]
pub struct ClassCatalog {
    classes: HashMap<String, Table>,
}

impl ClassCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class with its prototype fields.
    pub fn register(&mut self, class_name: impl Into<String>, prototype: Table) {
        let _ = self.classes.insert(class_name.into(), prototype);
    }

    /// Builder-style [`ClassCatalog::register`].
    #[must_use]
    pub fn with_class(mut self, class_name: impl Into<String>, prototype: Table) -> Self {
        self.register(class_name, prototype);
        self
    }
}

impl ObjectFactory for ClassCatalog {
    fn prototype(&self, class_name: &str) -> Result<Table, ScriptError> {
        self.classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownClass(class_name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn greeter_host() -> MemoryHost {
        let functions = FunctionTable::new().with("greet", |host, this, args| {
            let target = this.ok_or_else(|| ScriptError::runtime("greet", "self not bound"))?;
            host.set_field(target, "Greeting".into(), args.first().cloned().unwrap_or_default())?;
            Ok(ScriptValue::Nil)
        });
        MemoryHost::new(functions)
    }

    #[test]
    fn self_call_binds_target_and_reenters_host() {
        let host = greeter_host();
        let npc = host.insert_object(
            "ZCharacter",
            Table::new().with("OnGreet", MemoryHost::function("greet")),
        );

        let _ = host.invoke(npc, "OnGreet", true, vec!["hello".into()]).unwrap();
        assert_eq!(host.get_field(npc, "Greeting"), Some("hello".into()));
    }

    #[test]
    fn plain_call_does_not_bind_self() {
        let host = greeter_host();
        let npc = host.insert_object(
            "ZCharacter",
            Table::new().with("OnGreet", MemoryHost::function("greet")),
        );

        let err = host.invoke(npc, "OnGreet", false, vec![]).unwrap_err();
        assert_matches!(err, ScriptError::Runtime { .. });
    }

    #[test]
    fn unresolved_targets() {
        let host = greeter_host();
        let item = host.insert_object("ZItem", Table::new().with("Name", "Key"));

        assert!(!host.has_function(item, "Name"));
        assert!(!host.has_function(ObjectRef::Registry(9), "OnGreet"));
        assert_matches!(
            host.invoke(ObjectRef::Registry(9), "OnGreet", true, vec![]),
            Err(ScriptError::ObjectNotFound(_))
        );
        assert_matches!(
            host.invoke(item, "OnGreet", true, vec![]),
            Err(ScriptError::FunctionNotFound { .. })
        );
    }

    #[test]
    fn set_field_rejects_unknown_bytecode() {
        let host = greeter_host();
        let err = host
            .set_field(ObjectRef::Player, "OnLocation".into(), MemoryHost::function("missing"))
            .unwrap_err();
        assert_matches!(err, ScriptError::InvalidBytecode(_));
        assert!(host.get_field(ObjectRef::Player, "OnLocation").is_none());
    }

    #[test]
    fn class_names_and_counts() {
        let host = greeter_host();
        assert_eq!(host.object_count(), 0);
        let zone = host.create_object("Zone", Table::new()).unwrap();
        assert_eq!(host.object_count(), 1);
        assert_eq!(host.class_name(zone).as_deref(), Some("Zone"));
        assert_eq!(host.class_name(ObjectRef::Player).as_deref(), Some("Player"));
    }

    #[test]
    fn catalog_prototypes() {
        let catalog = ClassCatalog::new().with_class("ZItem", Table::new().with("Visible", true));
        let proto = catalog.prototype("ZItem").unwrap();
        assert_eq!(proto.get_str("Visible"), Some(&ScriptValue::Bool(true)));
        assert_matches!(
            catalog.prototype("ZGhost"),
            Err(ScriptError::UnknownClass(name)) if name == "ZGhost"
        );
    }
}
