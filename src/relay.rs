pub use self::ingest::{PROCESS_POST_QUEUE, ProcessPostJob, RelayIngest, WebhookPostData};
pub use self::worker::RelayWorker;

pub mod ingest;
pub mod maintenance;
pub mod worker;
