pub mod device_context;
pub mod device_list;
pub mod engine;
pub mod error;
pub mod registry;
pub mod request;
pub mod worker;

pub use device_context::*;
pub use device_list::*;
pub use engine::*;
pub use error::*;
pub use registry::*;
pub use request::*;
pub use worker::*;
