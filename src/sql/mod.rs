//! Safe SQL builder: identifiers from entity descriptors, values as parameters or escaped literals.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
