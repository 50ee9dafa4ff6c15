//! # wayfarer-savegame
//!
//! Binary save format for a running session's object graph.
//!
//! A save file is a header (cartridge identity, player and device names,
//! timestamps, last position) followed by the class name of every registry
//! object, the player's field table and one field table per registry object.
//! All integers and floats are little-endian.
//!
//! - [`SaveFile`]: the decoded form, with [`SaveFile::write_to`] and
//!   [`SaveFile::read_from`]
//! - [`SaveFile::capture`] / [`SaveFile::apply`]: move state between a
//!   [`SaveFile`] and a live [`wayfarer_core::ScriptHost`]
//!
//! Capture and apply must only run while the script executor is idle.

#![deny(unsafe_code)]

mod codec;
pub mod errors;
pub mod format;
pub mod header;
pub mod save_file;
mod snapshot;

pub use errors::{Result, SaveError};
pub use format::{EPOCH_UNIX_SECONDS, PLAYER_OBJECT_INDEX, SIGNATURE, Tag};
pub use header::SaveHeader;
pub use save_file::SaveFile;
