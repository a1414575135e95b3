//! Authoritative state for one broadcast.
//!
//! Every operation validates first and then commits exactly one [`Delta`]. The
//! committed delta is folded into the held state with the same merge viewers use
//! ([`SessionSnapshot::apply`]), so a viewer that applies every delta in order
//! always ends up with the state returned by [`Session::snapshot`].

use crate::addressing;
use crate::tools;
use crate::{Error, Result};
use chorale_types::{
    ActiveTool, Background, Change, Content, Cursor, Delta, Direction, DisplayMode, Mutation,
    NavigateTarget, SessionSnapshot, ThemeSlot, Tool, ToolUpdate,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Session {
    state: SessionSnapshot,
}

impl Session {
    #[must_use]
    pub fn new(pin: impl Into<String>) -> Self {
        Self {
            state: SessionSnapshot::new(pin),
        }
    }

    #[must_use]
    pub fn pin(&self) -> &str {
        &self.state.pin
    }

    /// Sequence number of the last committed delta
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.state.seq
    }

    #[must_use]
    pub fn state(&self) -> &SessionSnapshot {
        &self.state
    }

    /// Full state for a joining viewer.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.clone()
    }

    fn commit(&mut self, change: Change) -> Delta {
        let delta = Delta {
            seq: self.state.seq + 1,
            change,
        };
        self.state.apply(&delta);
        delta
    }

    /// Apply an operator mutation.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the underlying operation; the session is
    /// unchanged in that case.
    pub fn apply(&mut self, mutation: Mutation, now_ms: u64) -> Result<Delta> {
        match mutation {
            Mutation::SetContent { content } => self.set_active_content(content),
            Mutation::SetCursor {
                slide_index,
                is_blank,
                display_mode,
            } => self.set_cursor(slide_index, is_blank, display_mode),
            Mutation::SetBackground { background } => Ok(self.set_background(background)),
            Mutation::SetThemeOverride { slot, theme_id } => {
                Ok(self.set_theme_override(slot, theme_id))
            }
            Mutation::StartTool { tool } => Ok(self.start_tool(tool, now_ms)),
            Mutation::UpdateTool { update } => self.update_tool(&update, now_ms),
            Mutation::StopTool => Ok(self.stop_tool()),
            Mutation::Navigate { target } => self.navigate(&target),
        }
    }

    /// Replace the active content and rewind to its first slide.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContent` if the content has no slides.
    pub fn set_active_content(&mut self, content: Content) -> Result<Delta> {
        if content.slides().is_empty() {
            return Err(Error::InvalidContent("content has no slides".to_string()));
        }

        if let Some(arrangement) = content.arrangement() {
            let missing = addressing::validate_arrangement(arrangement, content.slides());
            if !missing.is_empty() {
                debug!(
                    "Arrangement '{}' references missing sections: {missing:?}",
                    arrangement.name
                );
            }
        }

        let display_mode = self.state.cursor.display_mode;
        let slide_codes = addressing::compute_slide_codes(content.slides());
        let combined_slides = addressing::compute_combined_slides(content.slides(), display_mode);

        Ok(self.commit(Change::ContentFrame {
            active_content: Some(content),
            cursor: Cursor {
                slide_index: 0,
                is_blank: false,
                display_mode,
                arrangement_position: None,
            },
            slide_codes: Some(slide_codes),
            combined_slides: Some(combined_slides),
        }))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.state.active_content.slides().len();
        if index >= len {
            return Err(Error::OutOfRange { index, len });
        }
        Ok(())
    }

    fn cursor_frame(&self, cursor: Cursor) -> Change {
        // Combined slides depend on the display mode, resend only when it changes
        let combined_slides = (cursor.display_mode != self.state.cursor.display_mode).then(|| {
            addressing::compute_combined_slides(
                self.state.active_content.slides(),
                cursor.display_mode,
            )
        });
        Change::ContentFrame {
            active_content: None,
            cursor,
            slide_codes: None,
            combined_slides,
        }
    }

    /// Move the cursor. Clears any active tool.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if the index is outside the current content.
    pub fn set_cursor(
        &mut self,
        slide_index: usize,
        is_blank: bool,
        display_mode: DisplayMode,
    ) -> Result<Delta> {
        self.check_index(slide_index)?;
        let change = self.cursor_frame(Cursor {
            slide_index,
            is_blank,
            display_mode,
            arrangement_position: None,
        });
        Ok(self.commit(change))
    }

    pub fn set_background(&mut self, background: Option<Background>) -> Delta {
        self.commit(Change::Background { background })
    }

    pub fn set_theme_override(&mut self, slot: ThemeSlot, theme_id: Option<String>) -> Delta {
        self.commit(Change::ThemeOverride { slot, theme_id })
    }

    /// Start a tool, replacing whatever tool was running. Content is left intact.
    pub fn start_tool(&mut self, tool: Tool, now_ms: u64) -> Delta {
        let active = tools::start(tool, now_ms);
        self.commit(Change::ToolFrame {
            active_tool: Some(active),
        })
    }

    /// # Errors
    ///
    /// Returns `NoActiveTool` when idle, `InvalidToolUpdate` when the update doesn't
    /// apply to the running tool.
    pub fn update_tool(&mut self, update: &ToolUpdate, now_ms: u64) -> Result<Delta> {
        let active = self.state.active_tool.as_ref().ok_or(Error::NoActiveTool)?;
        let next = tools::update(active, update, now_ms)?;
        Ok(self.commit(Change::ToolFrame {
            active_tool: Some(next),
        }))
    }

    pub fn stop_tool(&mut self) -> Delta {
        self.commit(Change::ToolFrame { active_tool: None })
    }

    /// Resolve a navigation target into a cursor move.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSlideCode` for a code that doesn't exist and `OutOfRange` for a
    /// program number past the end or a step with no content.
    pub fn navigate(&mut self, target: &NavigateTarget) -> Result<Delta> {
        let cursor = self.state.cursor;
        let (slide_index, arrangement_position) = match target {
            NavigateTarget::Code(code) => {
                let index = addressing::resolve_code(&self.state.slide_codes, code)
                    .ok_or_else(|| Error::UnknownSlideCode(code.clone()))?;
                (index, None)
            }
            NavigateTarget::Program(program) => {
                let len = self.state.active_content.slides().len();
                let index = addressing::resolve_program(len, *program).ok_or(Error::OutOfRange {
                    index: usize::try_from(*program).unwrap_or(usize::MAX),
                    len,
                })?;
                (index, None)
            }
            NavigateTarget::Step(direction) => self.step(*direction)?,
        };

        let change = self.cursor_frame(Cursor {
            slide_index,
            is_blank: false,
            display_mode: cursor.display_mode,
            arrangement_position,
        });
        Ok(self.commit(change))
    }

    /// Next/previous slide following the active arrangement when it resolves to
    /// something, otherwise the natural presentation units.
    fn step(&self, direction: Direction) -> Result<(usize, Option<usize>)> {
        let slides = self.state.active_content.slides();
        let cursor = self.state.cursor;

        let arrangement_order = self
            .state
            .active_content
            .arrangement()
            .map(|a| addressing::resolve_arrangement(a, slides).flat_order)
            .filter(|order| !order.is_empty());

        if let Some(order) = arrangement_order {
            let current = cursor
                .arrangement_position
                .filter(|&p| order.get(p) == Some(&cursor.slide_index))
                .or_else(|| order.iter().position(|&i| i == cursor.slide_index));
            let position = match current {
                Some(position) => addressing::advance(direction, position, &order),
                None => Some(0),
            };
            return position
                .and_then(|p| order.get(p).map(|&index| (index, Some(p))))
                .ok_or(Error::OutOfRange { index: 0, len: 0 });
        }

        let heads: Vec<usize> = addressing::presentation_units(slides, cursor.display_mode)
            .iter()
            .filter_map(|unit| unit.first().copied())
            .collect();
        let current = heads
            .iter()
            .rposition(|&head| head <= cursor.slide_index)
            .unwrap_or(0);
        addressing::advance(direction, current, &heads)
            .and_then(|p| heads.get(p).copied())
            .map(|index| (index, None))
            .ok_or(Error::OutOfRange {
                index: cursor.slide_index,
                len: slides.len(),
            })
    }

    /// Record a membership change.
    pub fn set_viewer_count(&mut self, viewer_count: usize) -> Delta {
        self.commit(Change::ViewerCount { viewer_count })
    }

    /// When the active countdown runs out, in wall-clock milliseconds.
    #[must_use]
    pub fn next_tool_deadline_ms(&self) -> Option<u64> {
        self.state.active_tool.as_ref().and_then(tools::deadline_ms)
    }

    /// Mark the active countdown expired once its deadline passed.
    pub fn expire_tool(&mut self, now_ms: u64) -> Option<Delta> {
        let mut active: ActiveTool = self.state.active_tool.clone()?;
        if !tools::expire(&mut active, now_ms) {
            return None;
        }
        Some(self.commit(Change::ToolFrame {
            active_tool: Some(active),
        }))
    }
}
