// wearlink-api: remote store and serial device capabilities for the wearlink bridge

pub mod error;
pub mod firebase;
pub mod remote;
pub mod serial;
pub mod sse;

pub use error::Error;
pub use firebase::{FirebaseClient, FirebaseConfig};
pub use remote::{EventKind, RemoteEvent, RemoteLink, Subscription};
pub use serial::{SerialConfig, SerialHandle, SerialLink, TokioSerialLink};
