pub mod context;
pub mod converter;
pub mod converters;
pub mod error;
pub mod registry;

pub use context::*;
pub use converter::*;
pub use error::*;
pub use registry::*;
