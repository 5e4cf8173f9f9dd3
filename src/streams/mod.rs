mod broadcaster;
mod event_log;

pub use broadcaster::{Broadcaster, Subscription};
pub use event_log::{AppendOutcome, EventLog, SessionEvents, SessionKey, SessionStatus};
