mod api;
mod server;
mod types;

pub use api::*;
pub use server::{jwt, SystemCredentials};
pub use types::*;
