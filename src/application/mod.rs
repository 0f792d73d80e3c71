// Application layer: use cases on top of the repository.

mod accounts;
mod error;
mod requests;
mod service;

pub use accounts::*;
pub use error::*;
pub use requests::*;
pub use service::*;
