//! Slide addressing: stable slide codes, combined slides and arrangement playback.
//!
//! Everything here is pure and total. Arrangements are user-authored and can fall
//! out of sync with the song they belong to, so unresolvable references are
//! reported as missing sections instead of failing.

use chorale_types::{
    Arrangement, ArrangementPlayback, CombinedSlide, Direction, DisplayMode, Slide, SlideCode,
};
use std::collections::HashMap;

/// Section kinds with a fixed code letter, keyed by normalized name
const KNOWN_KINDS: &[(&str, &str)] = &[
    ("verse", "V"),
    ("chorus", "C"),
    ("prechorus", "P"),
    ("bridge", "B"),
    ("intro", "I"),
    ("outro", "O"),
    ("tag", "T"),
    ("ending", "E"),
];

/// Section kind of a verse type: the name without its trailing number.
///
/// `"Verse 2"` and `"Verse2"` are both of kind `"Verse"`.
#[must_use]
pub fn section_kind(verse_type: &str) -> &str {
    verse_type
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_digit() || c.is_whitespace())
}

/// Code letters for a verse type, `None` when the verse type has no usable name.
fn code_prefix(verse_type: &str) -> Option<String> {
    let kind = section_kind(verse_type);
    let normalized: String = kind
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    if let Some((_, prefix)) = KNOWN_KINDS.iter().find(|(name, _)| *name == normalized) {
        return Some((*prefix).to_string());
    }

    let upper: String = kind.chars().filter(|c| c.is_uppercase()).collect();
    if !upper.is_empty() {
        return Some(upper);
    }
    kind.chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.to_uppercase().collect())
}

/// Compute a code for every slide in a single pass.
///
/// The ordinal counts occurrences of the same code prefix seen so far, so
/// `[Verse1, Verse1, Chorus, Bridge]` yields `V1 V2 C1 B1`. Slides without a usable
/// verse type get `#<position>` (1-based).
#[must_use]
pub fn compute_slide_codes(slides: &[Slide]) -> Vec<SlideCode> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut untyped = 0;

    slides
        .iter()
        .enumerate()
        .map(|(slide_index, slide)| {
            let prefix = slide.verse_type.as_deref().and_then(code_prefix);
            match prefix {
                Some(prefix) => {
                    let ordinal = counters.entry(prefix.clone()).or_insert(0);
                    *ordinal += 1;
                    SlideCode {
                        slide_index,
                        verse_type: slide.verse_type.clone(),
                        ordinal_within_type: *ordinal,
                        code: format!("{prefix}{ordinal}"),
                    }
                }
                None => {
                    untyped += 1;
                    SlideCode {
                        slide_index,
                        verse_type: None,
                        ordinal_within_type: untyped,
                        code: format!("#{}", slide_index + 1),
                    }
                }
            }
        })
        .collect()
}

fn same_section(a: &Slide, b: &Slide) -> bool {
    match (&a.verse_type, &b.verse_type) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (None, None) => true,
        _ => false,
    }
}

/// Group slides marked as continuations with their predecessor.
///
/// Only original-only mode combines slides; a group never crosses a verse type
/// boundary. Only groups of two or more slides are returned.
#[must_use]
pub fn compute_combined_slides(slides: &[Slide], mode: DisplayMode) -> Vec<CombinedSlide> {
    if mode != DisplayMode::OriginalOnly {
        return Vec::new();
    }

    presentation_units(slides, mode)
        .into_iter()
        .filter(|unit| unit.len() > 1)
        .map(|original_indices| CombinedSlide { original_indices })
        .collect()
}

/// Partition the slide list into the units shown on screen, in order.
///
/// Every slide index appears in exactly one unit.
#[must_use]
pub fn presentation_units(slides: &[Slide], mode: DisplayMode) -> Vec<Vec<usize>> {
    let mut units: Vec<Vec<usize>> = Vec::new();

    for (index, slide) in slides.iter().enumerate() {
        let joins_previous = mode == DisplayMode::OriginalOnly
            && slide.continuation
            && index > 0
            && same_section(&slides[index - 1], slide);

        match units.last_mut() {
            Some(unit) if joins_previous => unit.push(index),
            _ => units.push(vec![index]),
        }
    }

    units
}

fn matches_section(slide: &Slide, verse_type: &str) -> bool {
    slide
        .verse_type
        .as_deref()
        .is_some_and(|vt| vt.trim().eq_ignore_ascii_case(verse_type.trim()))
}

/// The first contiguous run of slides with the given verse type.
fn section_run(slides: &[Slide], verse_type: &str) -> Option<std::ops::Range<usize>> {
    let start = slides.iter().position(|s| matches_section(s, verse_type))?;
    let len = slides[start..]
        .iter()
        .take_while(|s| matches_section(s, verse_type))
        .count();
    Some(start..start + len)
}

/// Expand an arrangement into a flat playback order of slide indices.
///
/// Each section expands to the first contiguous run of matching slides. Sections
/// absent from the song are listed once in `missing_sections` and skipped.
#[must_use]
pub fn resolve_arrangement(arrangement: &Arrangement, slides: &[Slide]) -> ArrangementPlayback {
    let mut playback = ArrangementPlayback::default();

    for section in &arrangement.sections {
        match section_run(slides, &section.verse_type) {
            Some(run) => playback.flat_order.extend(run),
            None => {
                if !playback.missing_sections.contains(&section.verse_type) {
                    playback.missing_sections.push(section.verse_type.clone());
                }
            }
        }
    }

    playback
}

/// Verse types referenced by the arrangement that the song doesn't contain.
#[must_use]
pub fn validate_arrangement(arrangement: &Arrangement, slides: &[Slide]) -> Vec<String> {
    resolve_arrangement(arrangement, slides).missing_sections
}

/// Move one step through a flat playback order, clamping at both ends.
///
/// Takes and returns a position in `flat_order` (not a slide index). Returns
/// `None` only when the order is empty.
#[must_use]
pub fn advance(direction: Direction, position: usize, flat_order: &[usize]) -> Option<usize> {
    let last = flat_order.len().checked_sub(1)?;
    let position = position.min(last);
    Some(match direction {
        Direction::Next => (position + 1).min(last),
        Direction::Previous => position.saturating_sub(1),
    })
}

/// Resolve a slide code (case-insensitive, surrounding whitespace ignored).
#[must_use]
pub fn resolve_code(codes: &[SlideCode], input: &str) -> Option<usize> {
    let input = input.trim();
    codes
        .iter()
        .find(|c| c.code.eq_ignore_ascii_case(input))
        .map(|c| c.slide_index)
}

/// Map a 0-based program-change number to a slide index.
#[must_use]
pub fn resolve_program(slide_count: usize, program: u32) -> Option<usize> {
    usize::try_from(program).ok().filter(|&i| i < slide_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_kind_strips_number() {
        assert_eq!(section_kind("Verse1"), "Verse");
        assert_eq!(section_kind("Verse 12 "), "Verse");
        assert_eq!(section_kind("Chorus"), "Chorus");
        assert_eq!(section_kind("42"), "");
    }

    #[test]
    fn test_code_prefix_known_and_unknown() {
        assert_eq!(code_prefix("Pre-Chorus").as_deref(), Some("P"));
        assert_eq!(code_prefix("pre chorus 2").as_deref(), Some("P"));
        assert_eq!(code_prefix("Ending").as_deref(), Some("E"));
        assert_eq!(code_prefix("Spoken Word").as_deref(), Some("SW"));
        assert_eq!(code_prefix("vamp").as_deref(), Some("V"));
        assert_eq!(code_prefix("  ").as_deref(), None);
        assert_eq!(code_prefix("3").as_deref(), None);
    }

    #[test]
    fn test_advance_clamps() {
        let order = [2, 0, 1];
        assert_eq!(advance(Direction::Next, 0, &order), Some(1));
        assert_eq!(advance(Direction::Next, 2, &order), Some(2));
        assert_eq!(advance(Direction::Previous, 0, &order), Some(0));
        assert_eq!(advance(Direction::Previous, 9, &order), Some(1));
        assert_eq!(advance(Direction::Next, 0, &[]), None);
    }

    #[test]
    fn test_resolve_program() {
        assert_eq!(resolve_program(4, 0), Some(0));
        assert_eq!(resolve_program(4, 3), Some(3));
        assert_eq!(resolve_program(4, 4), None);
        assert_eq!(resolve_program(0, 0), None);
    }
}
