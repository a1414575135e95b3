//! Tool overlay state machine.
//!
//! `Idle -> Running -> {Paused <-> Running} -> Idle`. Idle is represented by the
//! absence of an `ActiveTool`. Transitions take the current wall-clock time so the
//! authoritative anchor/accumulated pair stays consistent for every viewer.

use crate::{Error, Result};
use chorale_types::{ActiveTool, RunState, Tool, ToolKind, ToolUpdate};

/// Start a tool, running from `now_ms`.
#[must_use]
pub fn start(tool: Tool, now_ms: u64) -> ActiveTool {
    ActiveTool {
        tool,
        run_state: RunState::Running,
        anchor_ms: Some(now_ms),
        accumulated_ms: 0,
        expired: false,
    }
}

fn update_name(update: &ToolUpdate) -> &'static str {
    match update {
        ToolUpdate::Pause => "pause",
        ToolUpdate::Resume => "resume",
        ToolUpdate::Reset => "reset",
        ToolUpdate::AddTime { .. } => "add_time",
        ToolUpdate::SetText { .. } => "set_text",
        ToolUpdate::SetMessages { .. } => "set_messages",
    }
}

fn not_applicable(update: &ToolUpdate, kind: ToolKind) -> Error {
    Error::InvalidToolUpdate(format!("{} does not apply to {kind}", update_name(update)))
}

/// Apply an update to a running or paused tool, returning the new tool state.
///
/// The input is left untouched so a rejected update changes nothing.
///
/// # Errors
///
/// Returns `InvalidToolUpdate` if the update doesn't apply to the tool's kind.
pub fn update(active: &ActiveTool, update: &ToolUpdate, now_ms: u64) -> Result<ActiveTool> {
    let mut next = active.clone();

    match update {
        ToolUpdate::Pause => {
            if next.run_state == RunState::Running {
                next.accumulated_ms = next.elapsed_ms(now_ms);
                next.anchor_ms = None;
                next.run_state = RunState::Paused;
            }
        }
        ToolUpdate::Resume => {
            if next.run_state == RunState::Paused {
                next.anchor_ms = Some(now_ms);
                next.run_state = RunState::Running;
            }
        }
        ToolUpdate::Reset => {
            next.accumulated_ms = 0;
            next.anchor_ms = match next.run_state {
                RunState::Running => Some(now_ms),
                RunState::Paused => None,
            };
            next.expired = false;
        }
        ToolUpdate::AddTime { ms } => {
            let elapsed = next.elapsed_ms(now_ms);
            let Tool::Countdown { duration_ms, .. } = &mut next.tool else {
                return Err(not_applicable(update, active.tool.kind()));
            };
            let adjusted = if *ms >= 0 {
                duration_ms.saturating_add(ms.unsigned_abs())
            } else {
                duration_ms.saturating_sub(ms.unsigned_abs())
            };
            // Shortening past the current elapsed time ends the countdown now
            *duration_ms = adjusted.max(elapsed);
            next.expired = next.remaining_ms(now_ms) == Some(0);
        }
        ToolUpdate::SetText { text } => {
            let Tool::Announcement { text: current } = &mut next.tool else {
                return Err(not_applicable(update, active.tool.kind()));
            };
            current.clone_from(text);
        }
        ToolUpdate::SetMessages { messages } => {
            let Tool::RotatingMessages {
                messages: current, ..
            } = &mut next.tool
            else {
                return Err(not_applicable(update, active.tool.kind()));
            };
            current.clone_from(messages);
        }
    }

    Ok(next)
}

/// Wall-clock millisecond at which a running countdown reaches zero.
#[must_use]
pub fn deadline_ms(active: &ActiveTool) -> Option<u64> {
    let Tool::Countdown { duration_ms, .. } = active.tool else {
        return None;
    };
    if active.expired || active.run_state != RunState::Running {
        return None;
    }
    let anchor = active.anchor_ms?;
    Some(anchor.saturating_add(duration_ms.saturating_sub(active.accumulated_ms)))
}

/// Mark a countdown expired if its time ran out. Returns whether anything changed.
pub fn expire(active: &mut ActiveTool, now_ms: u64) -> bool {
    if active.expired || active.remaining_ms(now_ms) != Some(0) {
        return false;
    }
    active.expired = true;
    true
}
