//! Shared types for Chorale session synchronization.
//!
//! This crate provides the types used across chorale-core, chorale-rpc,
//! chorale-daemon and chorale-cli. All types are serializable for RPC transport
//! and use camelCase field names on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Deserialize a Vec that may be null or missing (both become empty vec)
fn deserialize_null_as_empty_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

// ============================================================================
// Content
// ============================================================================

/// A single slide of a content item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    /// Section type such as "Verse1", "Chorus" or "Bridge"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse_type: Option<String>,

    /// Text in the original language
    #[serde(default)]
    pub original: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,

    /// Continues the previous slide (e.g. second half of a couplet).
    /// Presented together with its predecessor in original-only mode.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continuation: bool,
}

impl Slide {
    #[must_use]
    pub fn new(verse_type: impl Into<String>, original: impl Into<String>) -> Self {
        Self {
            verse_type: Some(verse_type.into()),
            original: original.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn untyped(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }

    #[must_use]
    pub fn continuing(mut self) -> Self {
        self.continuation = true;
        self
    }
}

/// One entry of an arrangement. References a section by verse type, never by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangementSection {
    pub verse_type: String,
}

/// User-defined performance order of a song's sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrangement {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub sections: Vec<ArrangementSection>,
}

impl Arrangement {
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            sections: sections
                .into_iter()
                .map(|verse_type| ArrangementSection {
                    verse_type: verse_type.into(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongContent {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_language: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub slides: Vec<Slide>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub arrangements: Vec<Arrangement>,
    /// Id of the arrangement used for step navigation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_arrangement: Option<String>,
}

impl SongContent {
    /// The selected arrangement, if the id refers to one of the song's arrangements
    #[must_use]
    pub fn arrangement(&self) -> Option<&Arrangement> {
        let id = self.active_arrangement.as_deref()?;
        self.arrangements.iter().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiblePassage {
    pub id: String,
    /// Human readable reference, e.g. "John 3:16-18"
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrayerContent {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub slides: Vec<Slide>,
}

/// Content shown by a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Song(SongContent),
    BiblePassage(BiblePassage),
    Prayer(PrayerContent),
    Presentation(Presentation),
    #[default]
    None,
}

impl Content {
    #[must_use]
    pub fn slides(&self) -> &[Slide] {
        match self {
            Content::Song(c) => &c.slides,
            Content::BiblePassage(c) => &c.slides,
            Content::Prayer(c) => &c.slides,
            Content::Presentation(c) => &c.slides,
            Content::None => &[],
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Content::Song(c) => Some(&c.id),
            Content::BiblePassage(c) => Some(&c.id),
            Content::Prayer(c) => Some(&c.id),
            Content::Presentation(c) => Some(&c.id),
            Content::None => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<ContentKind> {
        match self {
            Content::Song(_) => Some(ContentKind::Song),
            Content::BiblePassage(_) => Some(ContentKind::BiblePassage),
            Content::Prayer(_) => Some(ContentKind::Prayer),
            Content::Presentation(_) => Some(ContentKind::Presentation),
            Content::None => None,
        }
    }

    /// The active arrangement, only songs carry arrangements
    #[must_use]
    pub fn arrangement(&self) -> Option<&Arrangement> {
        match self {
            Content::Song(song) => song.arrangement(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Song,
    BiblePassage,
    Prayer,
    Presentation,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Song => "song",
            ContentKind::BiblePassage => "bible_passage",
            ContentKind::Prayer => "prayer",
            ContentKind::Presentation => "presentation",
        }
    }
}

impl FromStr for ContentKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "song" => Ok(ContentKind::Song),
            "bible_passage" | "bible" => Ok(ContentKind::BiblePassage),
            "prayer" => Ok(ContentKind::Prayer),
            "presentation" => Ok(ContentKind::Presentation),
            other => Err(ParseError(format!("unknown content kind: {other}"))),
        }
    }
}

// ============================================================================
// Cursor, background, themes
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Bilingual,
    OriginalOnly,
    TranslationOnly,
    Custom,
}

impl FromStr for DisplayMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bilingual" => Ok(DisplayMode::Bilingual),
            "original" | "original_only" => Ok(DisplayMode::OriginalOnly),
            "translation" | "translation_only" => Ok(DisplayMode::TranslationOnly),
            "custom" => Ok(DisplayMode::Custom),
            other => Err(ParseError(format!("unknown display mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub slide_index: usize,
    #[serde(default)]
    pub is_blank: bool,
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Position in the active arrangement's playback order, when navigating by arrangement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrangement_position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Background {
    Gradient { id: String },
    Color { value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPurpose {
    Viewer,
    Stage,
    Obs,
}

impl DisplayPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayPurpose::Viewer => "viewer",
            DisplayPurpose::Stage => "stage",
            DisplayPurpose::Obs => "obs",
        }
    }
}

/// Key of a theme override: a display purpose, optionally narrowed to one content kind.
///
/// Serialized as `"stage"` or `"stage:song"` so it can key a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ThemeSlot {
    pub purpose: DisplayPurpose,
    pub content_kind: Option<ContentKind>,
}

impl ThemeSlot {
    #[must_use]
    pub fn new(purpose: DisplayPurpose) -> Self {
        Self {
            purpose,
            content_kind: None,
        }
    }

    #[must_use]
    pub fn for_kind(purpose: DisplayPurpose, kind: ContentKind) -> Self {
        Self {
            purpose,
            content_kind: Some(kind),
        }
    }
}

impl fmt::Display for ThemeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.content_kind {
            Some(kind) => write!(f, "{}:{}", self.purpose.as_str(), kind.as_str()),
            None => write!(f, "{}", self.purpose.as_str()),
        }
    }
}

impl FromStr for ThemeSlot {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (purpose, kind) = match s.split_once(':') {
            Some((purpose, kind)) => (purpose, Some(kind.parse::<ContentKind>()?)),
            None => (s, None),
        };
        let purpose = match purpose {
            "viewer" => DisplayPurpose::Viewer,
            "stage" => DisplayPurpose::Stage,
            "obs" => DisplayPurpose::Obs,
            other => return Err(ParseError(format!("unknown display purpose: {other}"))),
        };
        Ok(Self {
            purpose,
            content_kind: kind,
        })
    }
}

impl From<ThemeSlot> for String {
    fn from(slot: ThemeSlot) -> Self {
        slot.to_string()
    }
}

impl TryFrom<String> for ThemeSlot {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Error returned when parsing a textual enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// Tool overlays
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Tool {
    Countdown {
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Stopwatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Clock {
        #[serde(default)]
        format_24h: bool,
        #[serde(default)]
        show_seconds: bool,
    },
    Announcement {
        text: String,
    },
    RotatingMessages {
        #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
        messages: Vec<String>,
        interval_ms: u64,
    },
}

impl Tool {
    #[must_use]
    pub fn kind(&self) -> ToolKind {
        match self {
            Tool::Countdown { .. } => ToolKind::Countdown,
            Tool::Stopwatch { .. } => ToolKind::Stopwatch,
            Tool::Clock { .. } => ToolKind::Clock,
            Tool::Announcement { .. } => ToolKind::Announcement,
            Tool::RotatingMessages { .. } => ToolKind::RotatingMessages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Countdown,
    Stopwatch,
    Clock,
    Announcement,
    RotatingMessages,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Countdown => "countdown",
            ToolKind::Stopwatch => "stopwatch",
            ToolKind::Clock => "clock",
            ToolKind::Announcement => "announcement",
            ToolKind::RotatingMessages => "rotating_messages",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Running,
    Paused,
}

/// A running or paused tool overlay.
///
/// Time is authoritative: `anchor_ms` is the wall-clock millisecond at which the
/// current running stretch began, `accumulated_ms` is the time counted before it.
/// Every viewer derives elapsed/remaining time from these two fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTool {
    pub tool: Tool,
    #[serde(default)]
    pub run_state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ms: Option<u64>,
    #[serde(default)]
    pub accumulated_ms: u64,
    /// Set once a countdown reaches zero
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expired: bool,
}

impl ActiveTool {
    #[must_use]
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let running = match (self.run_state, self.anchor_ms) {
            (RunState::Running, Some(anchor)) => now_ms.saturating_sub(anchor),
            _ => 0,
        };
        self.accumulated_ms.saturating_add(running)
    }

    /// Remaining countdown time; `None` for tools that don't count down
    #[must_use]
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self.tool {
            Tool::Countdown { duration_ms, .. } => {
                Some(duration_ms.saturating_sub(self.elapsed_ms(now_ms)))
            }
            _ => None,
        }
    }

    /// The message currently shown by a rotating-messages tool
    #[must_use]
    pub fn current_message(&self, now_ms: u64) -> Option<&str> {
        let Tool::RotatingMessages {
            messages,
            interval_ms,
        } = &self.tool
        else {
            return None;
        };
        if messages.is_empty() {
            return None;
        }
        let step = if *interval_ms == 0 {
            0
        } else {
            self.elapsed_ms(now_ms) / interval_ms
        };
        // Modulo keeps the index below messages.len()
        #[allow(clippy::cast_possible_truncation)]
        let index = (step % messages.len() as u64) as usize;
        messages.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolUpdate {
    Pause,
    Resume,
    /// Restart counting from zero, keeping the run state
    Reset,
    /// Extend (or shorten, when negative) a countdown
    AddTime {
        ms: i64,
    },
    SetText {
        text: String,
    },
    SetMessages {
        messages: Vec<String>,
    },
}

// ============================================================================
// Slide addressing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideCode {
    pub slide_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse_type: Option<String>,
    pub ordinal_within_type: usize,
    pub code: String,
}

/// Adjacent slides presented as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSlide {
    pub original_indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangementPlayback {
    pub flat_order: Vec<usize>,
    pub missing_sections: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

/// Where a `navigate` mutation should move the cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigateTarget {
    Step(Direction),
    /// Slide code such as "C2"
    Code(String),
    /// Program-change style numeric input (0-based slide number)
    Program(u32),
}

// ============================================================================
// Mutations, deltas, snapshots
// ============================================================================

/// An operator request to change session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Mutation {
    SetContent {
        content: Content,
    },
    SetCursor {
        slide_index: usize,
        #[serde(default)]
        is_blank: bool,
        #[serde(default)]
        display_mode: DisplayMode,
    },
    SetBackground {
        background: Option<Background>,
    },
    SetThemeOverride {
        slot: ThemeSlot,
        theme_id: Option<String>,
    },
    StartTool {
        tool: Tool,
    },
    UpdateTool {
        update: ToolUpdate,
    },
    StopTool,
    Navigate {
        target: NavigateTarget,
    },
}

impl Mutation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SetContent { .. } => "set_content",
            Mutation::SetCursor { .. } => "set_cursor",
            Mutation::SetBackground { .. } => "set_background",
            Mutation::SetThemeOverride { .. } => "set_theme_override",
            Mutation::StartTool { .. } => "start_tool",
            Mutation::UpdateTool { .. } => "update_tool",
            Mutation::StopTool => "stop_tool",
            Mutation::Navigate { .. } => "navigate",
        }
    }
}

/// The fields changed by one mutation or membership change.
///
/// `ContentFrame` and `ToolFrame` are mutually exclusive views of the output:
/// applying a content frame always clears the active tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Change {
    ContentFrame {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_content: Option<Content>,
        cursor: Cursor,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slide_codes: Option<Vec<SlideCode>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        combined_slides: Option<Vec<CombinedSlide>>,
    },
    ToolFrame {
        active_tool: Option<ActiveTool>,
    },
    Background {
        background: Option<Background>,
    },
    ThemeOverride {
        slot: ThemeSlot,
        theme_id: Option<String>,
    },
    ViewerCount {
        viewer_count: usize,
    },
}

/// A partial state update, numbered per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub seq: u64,
    #[serde(flatten)]
    pub change: Change,
}

/// Full session state handed to a joining viewer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub pin: String,
    /// Sequence number of the last delta folded into this snapshot
    pub seq: u64,
    #[serde(default)]
    pub active_content: Content,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub background: Option<Background>,
    #[serde(default)]
    pub theme_overrides: BTreeMap<ThemeSlot, String>,
    #[serde(default)]
    pub active_tool: Option<ActiveTool>,
    #[serde(default)]
    pub viewer_count: usize,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub slide_codes: Vec<SlideCode>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub combined_slides: Vec<CombinedSlide>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn new(pin: impl Into<String>) -> Self {
        Self {
            pin: pin.into(),
            ..Default::default()
        }
    }

    /// Merge a delta into this snapshot (viewer-side field merge).
    pub fn apply(&mut self, delta: &Delta) {
        self.seq = delta.seq;
        match &delta.change {
            Change::ContentFrame {
                active_content,
                cursor,
                slide_codes,
                combined_slides,
            } => {
                if let Some(content) = active_content {
                    self.active_content = content.clone();
                }
                self.cursor = *cursor;
                if let Some(codes) = slide_codes {
                    self.slide_codes.clone_from(codes);
                }
                if let Some(combined) = combined_slides {
                    self.combined_slides.clone_from(combined);
                }
                self.active_tool = None;
            }
            Change::ToolFrame { active_tool } => {
                self.active_tool.clone_from(active_tool);
            }
            Change::Background { background } => {
                self.background.clone_from(background);
            }
            Change::ThemeOverride { slot, theme_id } => match theme_id {
                Some(id) => {
                    self.theme_overrides.insert(*slot, id.clone());
                }
                None => {
                    self.theme_overrides.remove(slot);
                }
            },
            Change::ViewerCount { viewer_count } => {
                self.viewer_count = *viewer_count;
            }
        }
    }

    /// The slide currently on screen, `None` when blanked or out of range
    #[must_use]
    pub fn current_slide(&self) -> Option<&Slide> {
        if self.cursor.is_blank {
            return None;
        }
        self.active_content.slides().get(self.cursor.slide_index)
    }
}

/// Summary of a live session, as listed for control clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub pin: String,
    pub seq: u64,
    pub viewer_count: usize,
    pub operator_attached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Content {
        Content::Song(SongContent {
            id: "amazing-grace".to_string(),
            title: "Amazing Grace".to_string(),
            slides: vec![
                Slide::new("Verse1", "Amazing grace"),
                Slide::new("Chorus", "My chains are gone"),
            ],
            ..Default::default()
        })
    }

    #[test]
    fn test_content_is_tagged_by_kind() {
        let json = serde_json::to_value(song()).unwrap();
        assert_eq!(json["kind"], "song");
        assert_eq!(json["slides"][0]["verseType"], "Verse1");

        let none = serde_json::to_value(Content::None).unwrap();
        assert_eq!(none["kind"], "none");
    }

    #[test]
    fn test_content_slides_and_kind() {
        let content = song();
        assert_eq!(content.slides().len(), 2);
        assert_eq!(content.kind(), Some(ContentKind::Song));
        assert_eq!(content.id(), Some("amazing-grace"));
        assert!(Content::None.slides().is_empty());
        assert!(Content::None.kind().is_none());
    }

    #[test]
    fn test_slide_null_fields_default() {
        let slide: Slide = serde_json::from_str(r#"{"original":"Hallelujah"}"#).unwrap();
        assert!(slide.verse_type.is_none());
        assert!(!slide.continuation);

        let json = serde_json::to_string(&slide).unwrap();
        assert!(!json.contains("continuation"));
    }

    #[test]
    fn test_song_null_slides_become_empty() {
        let json = r#"{"kind":"song","id":"s","title":"T","slides":null,"arrangements":null}"#;
        let content: Content = serde_json::from_str(json).unwrap();
        assert!(content.slides().is_empty());
    }

    #[test]
    fn test_song_active_arrangement_lookup() {
        let mut song = SongContent {
            arrangements: vec![Arrangement::new("a1", "Short", ["Chorus"])],
            ..Default::default()
        };
        assert!(song.arrangement().is_none());

        song.active_arrangement = Some("a1".to_string());
        assert_eq!(song.arrangement().map(|a| a.name.as_str()), Some("Short"));

        song.active_arrangement = Some("missing".to_string());
        assert!(song.arrangement().is_none());
    }

    #[test]
    fn test_theme_slot_string_form() {
        let slot = ThemeSlot::for_kind(DisplayPurpose::Stage, ContentKind::Song);
        assert_eq!(slot.to_string(), "stage:song");
        assert_eq!("stage:song".parse::<ThemeSlot>().unwrap(), slot);
        assert_eq!(
            "obs".parse::<ThemeSlot>().unwrap(),
            ThemeSlot::new(DisplayPurpose::Obs)
        );
        assert!("projector".parse::<ThemeSlot>().is_err());
        assert!("viewer:hymn".parse::<ThemeSlot>().is_err());
    }

    #[test]
    fn test_theme_overrides_serialize_as_object() {
        let mut snapshot = SessionSnapshot::new("4821");
        snapshot
            .theme_overrides
            .insert(ThemeSlot::new(DisplayPurpose::Viewer), "dark".to_string());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["themeOverrides"]["viewer"], "dark");

        let back: SessionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_mutation_wire_shape() {
        let mutation = Mutation::SetCursor {
            slide_index: 3,
            is_blank: false,
            display_mode: DisplayMode::OriginalOnly,
        };
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["type"], "set_cursor");
        assert_eq!(json["slideIndex"], 3);
        assert_eq!(json["displayMode"], "original_only");

        let parsed: Mutation =
            serde_json::from_str(r#"{"type":"navigate","target":{"step":"next"}}"#).unwrap();
        assert_eq!(
            parsed,
            Mutation::Navigate {
                target: NavigateTarget::Step(Direction::Next)
            }
        );
    }

    #[test]
    fn test_delta_is_flat() {
        let delta = Delta {
            seq: 7,
            change: Change::ViewerCount { viewer_count: 3 },
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "viewer_count");
        assert_eq!(json["viewerCount"], 3);

        let back: Delta = serde_json::from_value(json).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn test_background_clear_serializes_null() {
        let change = Change::Background { background: None };
        let json = serde_json::to_value(&change).unwrap();
        assert!(json["background"].is_null());
    }

    #[test]
    fn test_apply_content_frame_clears_tool() {
        let mut snapshot = SessionSnapshot::new("1");
        snapshot.active_tool = Some(ActiveTool {
            tool: Tool::Announcement {
                text: "Welcome".to_string(),
            },
            run_state: RunState::Running,
            anchor_ms: Some(0),
            accumulated_ms: 0,
            expired: false,
        });

        snapshot.apply(&Delta {
            seq: 1,
            change: Change::ContentFrame {
                active_content: Some(song()),
                cursor: Cursor {
                    slide_index: 1,
                    ..Default::default()
                },
                slide_codes: None,
                combined_slides: None,
            },
        });

        assert!(snapshot.active_tool.is_none());
        assert_eq!(snapshot.seq, 1);
        assert_eq!(snapshot.current_slide().unwrap().original, "My chains are gone");
    }

    #[test]
    fn test_apply_theme_override_insert_and_remove() {
        let slot = ThemeSlot::new(DisplayPurpose::Stage);
        let mut snapshot = SessionSnapshot::new("1");
        snapshot.apply(&Delta {
            seq: 1,
            change: Change::ThemeOverride {
                slot,
                theme_id: Some("high-contrast".to_string()),
            },
        });
        assert_eq!(snapshot.theme_overrides.get(&slot).unwrap(), "high-contrast");

        snapshot.apply(&Delta {
            seq: 2,
            change: Change::ThemeOverride {
                slot,
                theme_id: None,
            },
        });
        assert!(snapshot.theme_overrides.is_empty());
    }

    #[test]
    fn test_blank_cursor_has_no_current_slide() {
        let mut snapshot = SessionSnapshot::new("1");
        snapshot.active_content = song();
        snapshot.cursor.is_blank = true;
        assert!(snapshot.current_slide().is_none());
    }

    #[test]
    fn test_countdown_time_arithmetic() {
        let mut tool = ActiveTool {
            tool: Tool::Countdown {
                duration_ms: 60_000,
                label: None,
            },
            run_state: RunState::Running,
            anchor_ms: Some(1_000),
            accumulated_ms: 5_000,
            expired: false,
        };
        assert_eq!(tool.elapsed_ms(11_000), 15_000);
        assert_eq!(tool.remaining_ms(11_000), Some(45_000));
        assert_eq!(tool.remaining_ms(100_000), Some(0));

        tool.run_state = RunState::Paused;
        tool.anchor_ms = None;
        assert_eq!(tool.elapsed_ms(999_999), 5_000);
    }

    #[test]
    fn test_rotating_message_selection() {
        let tool = ActiveTool {
            tool: Tool::RotatingMessages {
                messages: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                interval_ms: 1_000,
            },
            run_state: RunState::Running,
            anchor_ms: Some(0),
            accumulated_ms: 0,
            expired: false,
        };
        assert_eq!(tool.current_message(0), Some("a"));
        assert_eq!(tool.current_message(1_500), Some("b"));
        assert_eq!(tool.current_message(3_200), Some("a"));
        assert!(tool.remaining_ms(0).is_none());
    }

    #[test]
    fn test_tool_kind_display() {
        let tool = Tool::Clock {
            format_24h: true,
            show_seconds: false,
        };
        assert_eq!(tool.kind().to_string(), "clock");
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["kind"], "clock");
        assert_eq!(json["format24h"], true);
    }

    #[test]
    fn test_display_mode_parse() {
        assert_eq!(
            "original".parse::<DisplayMode>().unwrap(),
            DisplayMode::OriginalOnly
        );
        assert!("karaoke".parse::<DisplayMode>().is_err());
    }
}

/// Property-based tests for the viewer-side merge.
#[cfg(test)]
mod proptest_merge_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_change() -> impl Strategy<Value = Change> {
        prop_oneof![
            (0usize..50, any::<bool>()).prop_map(|(slide_index, is_blank)| {
                Change::ContentFrame {
                    active_content: None,
                    cursor: Cursor {
                        slide_index,
                        is_blank,
                        ..Default::default()
                    },
                    slide_codes: None,
                    combined_slides: None,
                }
            }),
            proptest::option::of("[a-z]{1,8}").prop_map(|id| Change::Background {
                background: id.map(|id| Background::Gradient { id }),
            }),
            (0usize..100).prop_map(|viewer_count| Change::ViewerCount { viewer_count }),
            proptest::option::of("[a-z ]{0,20}").prop_map(|text| Change::ToolFrame {
                active_tool: text.map(|text| ActiveTool {
                    tool: Tool::Announcement { text },
                    run_state: RunState::Running,
                    anchor_ms: Some(0),
                    accumulated_ms: 0,
                    expired: false,
                }),
            }),
        ]
    }

    proptest! {
        /// Applying the same delta twice leaves the snapshot unchanged (merge is idempotent).
        #[test]
        fn apply_is_idempotent(changes in proptest::collection::vec(arb_change(), 1..30)) {
            let mut snapshot = SessionSnapshot::new("p");
            for (i, change) in changes.into_iter().enumerate() {
                let delta = Delta { seq: i as u64 + 1, change };
                snapshot.apply(&delta);
                let once = snapshot.clone();
                snapshot.apply(&delta);
                prop_assert_eq!(&once, &snapshot);
            }
        }
    }
}
