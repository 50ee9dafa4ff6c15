//! Contracts the runtime needs from the scripting layer.
//!
//! The scripting engine is an external collaborator. The runtime only ever
//! touches script state through [`ScriptHost`], and only from the executor's
//! worker thread or while the executor is quiescent.

use crate::errors::ScriptError;
use crate::object::ObjectRef;
use crate::value::{Bytecode, ScriptValue, Table};

/// Access to the live script-object graph.
pub trait ScriptHost: Send + Sync {
    /// Number of objects in the registry (the player is not counted).
    fn object_count(&self) -> usize;

    /// Declared class name of an object.
    fn class_name(&self, object: ObjectRef) -> Option<String>;

    /// All fields of an object, in stable enumeration order.
    fn fields(&self, object: ObjectRef) -> Option<Table>;

    /// Read a string-keyed field.
    fn get_field(&self, object: ObjectRef, name: &str) -> Option<ScriptValue>;

    /// Write a field. A nil value clears it.
    fn set_field(
        &self,
        object: ObjectRef,
        key: ScriptValue,
        value: ScriptValue,
    ) -> Result<(), ScriptError>;

    /// Append a new registry object of `class_name` with initial `fields`.
    fn create_object(&self, class_name: &str, fields: Table) -> Result<ObjectRef, ScriptError>;

    /// Whether `name` currently resolves to a callable function on `object`.
    fn has_function(&self, object: ObjectRef, name: &str) -> bool;

    /// Invoke a named function resolved against `object`.
    ///
    /// With `bind_self` the object is passed as the implicit first argument.
    fn invoke(
        &self,
        object: ObjectRef,
        name: &str,
        bind_self: bool,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError>;

    /// Check that a bytecode blob can be recompiled into a function.
    fn load_function(&self, bytecode: &Bytecode) -> Result<(), ScriptError>;
}

/// Builds the initial state of objects the runtime has to construct itself,
/// e.g. registry objects declared by a save file that do not exist yet.
pub trait ObjectFactory: Send + Sync {
    /// Initial field table for a new instance of `class_name`.
    fn prototype(&self, class_name: &str) -> Result<Table, ScriptError>;
}
