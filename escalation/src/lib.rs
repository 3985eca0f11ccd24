//! Nudge escalation engine
//!
//! Decides, for every tracked time-bound task and at every tick, whether the
//! next reminder channel must fire, and lets user replies cancel or redirect
//! an escalation before that happens.
//!
//! # Components
//!
//! - [`policy`]: priority → ladder of `(channel, offset)` steps, plus the
//!   auto-miss rule and timing previews
//! - [`state`]: task snapshots, the per-task-locked [`StateTracker`] and the
//!   [`TaskStore`] persistence collaborator
//! - [`dispatch`]: the uniform [`Dispatcher`] contract and the channel
//!   routing [`DispatchGateway`]
//! - [`evaluator`]: the pure [`decide`](evaluator::decide) function, the
//!   [`TickEvaluator`] and its [`TickLoop`]
//! - [`interrupt`]: reply parsing and the [`InterruptHandler`]
//! - [`events`], [`metrics`]: observation of what the engine did
//!
//! # Usage
//!
//! ```ignore
//! use nudge_escalation::{EngineConfig, EscalationEngine, DispatchGateway, LogDispatcher};
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let gateway = DispatchGateway::uniform(Arc::new(LogDispatcher), config.dispatch_timeout());
//! let engine = EscalationEngine::new(config, store, gateway, Arc::new(SystemClock))?;
//! engine.rehydrate().await?;
//! let handle = engine.tick_loop().spawn();
//! ```

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod interrupt;
pub mod metrics;
pub mod policy;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use dispatch::{
    DeliveryResult, DispatchGateway, DispatchPayload, Dispatcher, HttpDispatcher, LogDispatcher,
};
pub use engine::EscalationEngine;
pub use error::{EngineError, EngineResult};
pub use evaluator::{TaskOutcome, TickEvaluator, TickLoop, TickReport};
pub use events::{EscalationEvent, EventBus, ResolutionCause, SharedEventBus};
pub use interrupt::{InterruptHandler, InterruptOutcome, ReplyAction, ReplyEvent, ReplySource};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot, SharedEngineMetrics};
pub use policy::{Channel, Ladder, LadderStep, PolicyTable, Priority, TimingPreview};
pub use state::{
    HttpTaskStore, JsonFileTaskStore, MemoryTaskStore, SharedStateTracker, StateTracker,
    StoreError, TaskId, TaskSnapshot, TaskStatus, TaskStore,
};
