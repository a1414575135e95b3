pub mod addressing;
pub mod config;
pub mod tools;

mod error;
mod session;
mod utils;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use session::Session;
pub use utils::now_millis;

pub use chorale_types::*;
