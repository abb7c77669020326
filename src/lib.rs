//! tsqa - build, configure and run isolated proxy environments for
//! integration tests.

pub mod cli;
pub mod configs;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod fixture;
pub mod layout;
pub mod logging;
pub mod settings;

pub use error::{Error, Result};
