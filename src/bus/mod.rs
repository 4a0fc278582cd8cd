pub mod events;

pub use events::{Event, Intent, Message, OrderEvent, OrderEventKind, RawEvent};
