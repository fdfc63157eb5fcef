pub mod config;
pub mod images;
pub mod session;
pub mod transport;

pub use session::{RunOptions, RunOutcome, Session};
pub use transport::{
    FailureClassifier, HttpSender, KeepAwake, NetworkFailureClassifier, NoopKeepAwake,
    ProcessKeepAwake, RawResponse, ReqwestSender, SendFailure, TransportPolicy, TransportState,
    VisibilitySignal,
};
