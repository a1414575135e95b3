//! Operator console commands typed on stdin while presenting.

use anyhow::{Context, Result, bail};
use chorale_core::{
    Direction, DisplayMode, Mutation, NavigateTarget, SessionSnapshot, Tool, ToolUpdate,
};

pub const HELP: &str = "\
Commands:
  n, p              next / previous slide
  go <code>         jump to a slide code (e.g. C1)
  slide <i>         jump to slide number i (1-based)
  blank, show       blank or restore the output
  mode <m>          bilingual | original | translation | custom
  countdown <secs>  start a countdown, optional label after the seconds
  clock             show the clock
  announce <text>   show an announcement
  pause, resume     pause or resume the running tool
  stop              dismiss the running tool
  help              show this help
  quit              leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mutate(Mutation),
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `None`.
///
/// Cursor commands keep whatever part of the cursor they don't touch, so the
/// caller passes its current view of the session.
pub fn parse(line: &str, state: &SessionSnapshot) -> Result<Option<Command>> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    let cursor = &state.cursor;
    let command = match word {
        "" => return Ok(None),
        "n" | "next" => navigate(NavigateTarget::Step(Direction::Next)),
        "p" | "prev" => navigate(NavigateTarget::Step(Direction::Previous)),
        "go" => {
            if rest.is_empty() {
                bail!("usage: go <code>");
            }
            navigate(NavigateTarget::Code(rest.to_string()))
        }
        "slide" => {
            let number: usize = rest
                .parse()
                .with_context(|| format!("not a slide number: {rest:?}"))?;
            let Some(slide_index) = number.checked_sub(1) else {
                bail!("slides are numbered from 1");
            };
            Command::Mutate(Mutation::SetCursor {
                slide_index,
                is_blank: false,
                display_mode: cursor.display_mode,
            })
        }
        "blank" | "show" => Command::Mutate(Mutation::SetCursor {
            slide_index: cursor.slide_index,
            is_blank: word == "blank",
            display_mode: cursor.display_mode,
        }),
        "mode" => {
            let display_mode: DisplayMode = rest.parse()?;
            Command::Mutate(Mutation::SetCursor {
                slide_index: cursor.slide_index,
                is_blank: cursor.is_blank,
                display_mode,
            })
        }
        "countdown" => {
            let (secs, label) = rest
                .split_once(char::is_whitespace)
                .map_or((rest, None), |(s, l)| (s, Some(l.trim().to_string())));
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("not a number of seconds: {secs:?}"))?;
            start(Tool::Countdown {
                duration_ms: secs.saturating_mul(1000),
                label,
            })
        }
        "clock" => start(Tool::Clock {
            format_24h: true,
            show_seconds: true,
        }),
        "announce" => {
            if rest.is_empty() {
                bail!("usage: announce <text>");
            }
            start(Tool::Announcement {
                text: rest.to_string(),
            })
        }
        "pause" => update(ToolUpdate::Pause),
        "resume" => update(ToolUpdate::Resume),
        "stop" => Command::Mutate(Mutation::StopTool),
        "help" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => bail!("unknown command: {other} (try 'help')"),
    };

    Ok(Some(command))
}

fn navigate(target: NavigateTarget) -> Command {
    Command::Mutate(Mutation::Navigate { target })
}

fn start(tool: Tool) -> Command {
    Command::Mutate(Mutation::StartTool { tool })
}

fn update(update: ToolUpdate) -> Command {
    Command::Mutate(Mutation::UpdateTool { update })
}
