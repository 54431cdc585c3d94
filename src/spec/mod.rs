//! Contract model: loading, meta-schema validation and operation assembly.

mod build;
mod load;
mod meta;
mod types;

pub use build::*;
pub use load::*;
pub use meta::ContractValidator;
pub use types::*;
