// crates/core/src/lib.rs
pub mod driver;
pub mod pacing;
pub mod progress;
pub mod site;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::*;
pub use pacing::*;
pub use progress::*;
pub use site::*;
