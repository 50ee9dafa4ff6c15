//! # wayfarer-core
//!
//! Shared vocabulary for the Wayfarer cartridge player runtime.
//!
//! - **Objects**: [`ObjectRef`] addresses either the player or a registry slot
//! - **Values**: [`ScriptValue`], [`Table`], [`Record`], [`Bytecode`]
//! - **Host contract**: [`ScriptHost`] is everything the runtime needs from a
//!   scripting engine; [`ObjectFactory`] builds fresh objects on restore
//! - **Reference host**: [`MemoryHost`] with an explicit [`FunctionTable`]
//! - **Cartridge identity**: [`CartridgeInfo`], [`Position`]
//! - **Errors**: [`ScriptError`]
//! - **Logging**: [`logging::init_subscriber`] and the capture helpers used in tests

#![deny(unsafe_code)]

pub mod cartridge;
pub mod errors;
pub mod host;
pub mod logging;
pub mod memory;
pub mod object;
pub mod value;

pub use cartridge::{CartridgeInfo, Position};
pub use errors::ScriptError;
pub use host::{ObjectFactory, ScriptHost};
pub use memory::{ClassCatalog, FunctionTable, MemoryHost, NativeFunction};
pub use object::ObjectRef;
pub use value::{Bytecode, Record, ScriptValue, Table};
