pub mod common;
pub mod field;
pub mod invoice;
pub mod parsing;
pub mod template;

pub use common::*;
pub use field::*;
pub use invoice::*;
pub use template::*;
