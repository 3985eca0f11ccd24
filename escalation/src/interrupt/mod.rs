//! Reply interrupts: parsing inbound user replies and applying them as
//! terminal transitions that pre-empt the next ladder step.

pub mod handler;
pub mod reply;

pub use handler::{InterruptHandler, InterruptOutcome};
pub use reply::{ReplyAction, ReplyEvent, ReplySource};
