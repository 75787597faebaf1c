pub mod cancel;
pub mod observer;
pub mod session;
pub mod transport;

pub use cancel::{CancelManager, StopOutcome, StopReport};
pub use observer::{FnObserver, ObserverBridge, ProgressObserver};
pub use session::{PollPolicy, SessionClient, SessionRunner};
pub use transport::{CreatedSession, HttpTransport, SessionSummary, StatusResponse, Transport};
