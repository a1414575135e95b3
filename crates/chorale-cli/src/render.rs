//! Plain-text rendering of session state for the terminal.

use std::fmt::Write as _;

use chorale_core::addressing;
use chorale_core::{
    ActiveTool, Content, ContentKind, DisplayMode, RunState, SessionSnapshot, Slide, Tool,
};

#[must_use]
pub fn title(content: &Content) -> &str {
    match content {
        Content::Song(c) => &c.title,
        Content::BiblePassage(c) => &c.reference,
        Content::Prayer(c) => &c.title,
        Content::Presentation(c) => &c.title,
        Content::None => "(nothing)",
    }
}

/// What a display would show right now.
#[must_use]
pub fn describe(state: &SessionSnapshot, now_ms: u64) -> String {
    if let Some(tool) = &state.active_tool {
        return describe_tool(tool, now_ms);
    }

    let slides = state.active_content.slides();
    if slides.is_empty() {
        return "(no content)".to_string();
    }

    let index = state.cursor.slide_index;
    let code = state
        .slide_codes
        .get(index)
        .map_or("?", |c| c.code.as_str());
    if state.cursor.is_blank {
        return format!("[{code}] (blank)");
    }

    // A combined unit is shown as a whole
    let unit: &[usize] = state
        .combined_slides
        .iter()
        .find(|c| c.original_indices.contains(&index))
        .map_or(std::slice::from_ref(&index), |c| c.original_indices.as_slice());

    let mut out = format!("[{code}]");
    for slide in unit.iter().filter_map(|&i| slides.get(i)) {
        for line in slide_lines(slide, state.cursor.display_mode) {
            let _ = write!(out, "\n  {line}");
        }
    }
    out
}

fn slide_lines(slide: &Slide, mode: DisplayMode) -> Vec<&str> {
    let translation = slide.translation.as_deref();
    match mode {
        DisplayMode::OriginalOnly => vec![slide.original.as_str()],
        DisplayMode::TranslationOnly => vec![translation.unwrap_or(&slide.original)],
        DisplayMode::Bilingual | DisplayMode::Custom => {
            std::iter::once(slide.original.as_str()).chain(translation).collect()
        }
    }
}

fn describe_tool(active: &ActiveTool, now_ms: u64) -> String {
    let paused = if active.run_state == RunState::Paused {
        " (paused)"
    } else {
        ""
    };

    match &active.tool {
        Tool::Countdown { label, .. } => {
            let remaining = active.remaining_ms(now_ms).unwrap_or(0);
            let label = label.as_deref().unwrap_or("Countdown");
            if active.expired {
                format!("{label}: 00:00 (expired)")
            } else {
                format!("{label}: {}{paused}", clock_face(remaining))
            }
        }
        Tool::Stopwatch { label } => format!(
            "{}: {}{paused}",
            label.as_deref().unwrap_or("Stopwatch"),
            clock_face(active.elapsed_ms(now_ms))
        ),
        Tool::Clock {
            format_24h,
            show_seconds,
        } => {
            let format = match (*format_24h, *show_seconds) {
                (true, true) => "%H:%M:%S",
                (true, false) => "%H:%M",
                (false, true) => "%I:%M:%S %p",
                (false, false) => "%I:%M %p",
            };
            format!("Clock: {}", chrono::Local::now().format(format))
        }
        Tool::Announcement { text } => format!("Announcement: {text}"),
        Tool::RotatingMessages { .. } => format!(
            "Message: {}{paused}",
            active.current_message(now_ms).unwrap_or("")
        ),
    }
}

/// `mm:ss`, rounding partial seconds up so a countdown shows 00:01 until it ends
fn clock_face(ms: u64) -> String {
    let secs = ms.div_ceil(1000);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Offline addressing report for a content file.
#[must_use]
pub fn codes_report(content: &Content, mode: DisplayMode) -> String {
    let slides = content.slides();
    let codes = addressing::compute_slide_codes(slides);

    let kind = content.kind().map_or("none", ContentKind::as_str);
    let mut out = format!("{} ({kind}, {} slides)\n", title(content), slides.len());

    for (code, slide) in codes.iter().zip(slides) {
        let first_line = slide.original.lines().next().unwrap_or("");
        let _ = writeln!(out, "  {:<5} {first_line}", code.code);
    }

    let _ = writeln!(out, "\nPresentation units ({mode:?}):");
    for unit in addressing::presentation_units(slides, mode) {
        let names: Vec<&str> = unit
            .iter()
            .filter_map(|&i| codes.get(i).map(|c| c.code.as_str()))
            .collect();
        let _ = writeln!(out, "  {}", names.join(" + "));
    }

    if let Some(arrangement) = content.arrangement() {
        let playback = addressing::resolve_arrangement(arrangement, slides);
        let order: Vec<&str> = playback
            .flat_order
            .iter()
            .filter_map(|&i| codes.get(i).map(|c| c.code.as_str()))
            .collect();
        let _ = writeln!(out, "\nArrangement \"{}\":", arrangement.name);
        let _ = writeln!(out, "  {}", order.join(" "));
        if !playback.missing_sections.is_empty() {
            let _ = writeln!(
                out,
                "  missing sections: {}",
                playback.missing_sections.join(", ")
            );
        }
    }

    out
}
