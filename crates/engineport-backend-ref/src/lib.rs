//! Reference acceleration backend: builds networks into JSON plans and runs
//! them on the CPU. Used by the tests and the CLI in place of a vendor
//! compiler.

pub mod builder;
pub mod driver;
pub mod interpreter;
pub mod plan;
pub mod runtime;

pub use builder::*;
pub use driver::*;
pub use plan::*;
pub use runtime::*;
