pub mod codec;
pub mod error;
pub mod journal;
pub mod presets;
pub mod request;
pub mod response;
pub mod settings;
pub mod store;

pub use error::{ClientError, ClientResult, ErrorKind, TransportCategory};
