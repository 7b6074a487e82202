//! Configuration types and helpers.

mod defaults;
mod global;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use global::*;
