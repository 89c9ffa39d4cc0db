pub mod common;
pub mod generation;
pub mod upload;

pub use common::*;
pub use generation::*;
pub use upload::*;
