//! Core types.

pub mod generation;
pub mod message;
pub mod model;
pub mod stream;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use model::*;
pub use stream::*;
pub use usage::*;
