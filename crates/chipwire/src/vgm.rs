//! VGM format handling: the versioned header and the command-stream
//! interpreter.
pub mod header;
pub mod stream;

pub use header::{VgmHeader, parse_vgm_header};
pub use stream::{CommandStream, Step, VgmStream};
