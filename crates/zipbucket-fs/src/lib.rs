//! Local file placement for archive outputs.
//!
//! Bytes are written to a hidden staging file next to the destination and
//! moved into place only on [`StagedFile::commit`]. An uncommitted staging
//! file is removed when the handle is dropped, so a failed run never leaves a
//! half-written file under the requested name.

mod error;
mod staged;

pub use error::{Error, Result};
pub use staged::{StageOptions, StagedFile};
