pub mod error;
pub mod fetcher;
pub mod types;

pub use error::{Error, Result};
pub use fetcher::{FetchError, Fetcher};
pub use types::{Payload, Task};
