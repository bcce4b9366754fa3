pub mod decoder;
pub mod source;
pub mod types;


pub use decoder::{DecodeError, EventDecoder};
pub use source::{SpoolDirectorySource, StreamSource};
pub use types::*;
