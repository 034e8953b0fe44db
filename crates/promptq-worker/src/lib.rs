// Worker-side dispatch: the claim -> run -> resolve loop plus the heartbeat
// discipline that keeps this worker visible in the registry

pub mod dispatcher;
pub mod registration;

pub use dispatcher::Dispatcher;
pub use registration::{allocate_worker_id, heartbeat_loop};
