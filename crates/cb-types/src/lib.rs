pub mod address;
pub mod config;
pub mod errors;
pub mod model;
pub mod report;

pub use address::*;
pub use config::*;
pub use errors::*;
pub use model::*;
pub use report::*;
