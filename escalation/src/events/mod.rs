//! Escalation events
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Evaluator /  │────▶│  Event Bus   │────▶│  Subscribers │
//! │ Interrupts   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Events are informational. The tracker and its store stay the source of
//! truth; a subscriber that lags simply misses events.

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use types::{EscalationEvent, ResolutionCause};
