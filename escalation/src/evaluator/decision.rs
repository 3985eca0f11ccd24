//! Pure per-task decision: given a snapshot and the current instant, what
//! (if anything) is due.

use chrono::{DateTime, Duration, Utc};

use crate::policy::{Channel, Ladder};
use crate::state::TaskSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing due
    Idle,
    /// Fire the next unfired step
    Dispatch { step_index: usize, channel: Channel },
    /// Final step fired long enough ago with no acknowledgment
    AutoMiss,
}

/// Decide what is due for `task` at `now`.
///
/// - Only the next unfired step is ever considered, so steps fire in ladder
///   order and never twice.
/// - At most one step fires per instant: a step is held back while its
///   predecessor's send time is not strictly before `now`. Two ticks at the
///   same instant therefore dispatch nothing extra.
/// - `auto_miss_after` is the scaled auto-miss deadline from the scheduled
///   time, or `None` when the priority never auto-misses.
pub fn decide(
    task: &TaskSnapshot,
    ladder: &Ladder,
    auto_miss_after: Option<Duration>,
    now: DateTime<Utc>,
) -> Decision {
    if task.is_terminal() || now < task.scheduled_at {
        return Decision::Idle;
    }
    let elapsed = now - task.scheduled_at;

    match task.next_unfired(ladder) {
        Some((step_index, step)) => {
            if step_index > 0 {
                let previous = ladder.steps()[step_index - 1].channel;
                match task.sent_at(previous) {
                    Some(at) if at < now => {}
                    _ => return Decision::Idle,
                }
            }
            if step.scaled_wait(task.escalation_speed_multiplier) <= elapsed {
                Decision::Dispatch {
                    step_index,
                    channel: step.channel,
                }
            } else {
                Decision::Idle
            }
        }
        None => {
            let Some(deadline) = auto_miss_after else {
                return Decision::Idle;
            };
            match task.sent_at(ladder.final_step().channel) {
                Some(fired) if fired < now && elapsed >= deadline => Decision::AutoMiss,
                _ => Decision::Idle,
            }
        }
    }
}
