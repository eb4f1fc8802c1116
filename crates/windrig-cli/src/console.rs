//! Operator console: command parsing and text rendering.

use std::fmt::Write as _;

use windrig_core::timeline::{format_offset, format_song_length};
use windrig_core::{
    Fingering, Instrument, LogLine, MusicFile, SignificantRest, StatusSnapshot, TimelineDocument,
    TimelineMetrics, TimerReading,
};

use crate::error::{Error, Result};

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Files(String),
    /// A file name, or a 1-based index into the last listing.
    Select(String),
    Timeline,
    /// Show a rest (`beats: None`) or set its duration.
    Rest { index: usize, beats: Option<f64> },
    CancelRest,
    Instrument(Instrument),
    Bpm(f64),
    Delay(u32),
    Check,
    Prepare,
    Start,
    Stop,
    Status,
    Fingerings,
    Finger(String),
    Pump(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  files [query]            list music files on the rig
  select <file|number>     select a file and load its timeline
  timeline                 show the loaded timeline
  rest <index> [beats]     show or change a rest's duration
  rest cancel              drop the open rest edit
  instrument <sks|sn>      choose the instrument
  bpm <value>              tempo override (0 = file tempo)
  delay <ms>               tonguing delay
  check                    look for a precomputed sequence
  prepare                  preprocess without starting
  start                    start the performance
  stop                     stop the performance
  status                   show session and rig status
  fingerings               list the fingering table
  finger <note>            press one note's fingering
  pump <command>           send a raw pump command
  help                     show this help
  quit                     exit (stops a running performance)";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "files" | "ls" => Command::Files(rest.to_string()),
        "select" | "open" => Command::Select(required(rest, "select <file|number>")?),
        "timeline" | "tl" => Command::Timeline,
        "rest" if rest.eq_ignore_ascii_case("cancel") => Command::CancelRest,
        "rest" => {
            let mut args = rest.split_whitespace();
            let index = args
                .next()
                .ok_or_else(|| usage("rest <index> [beats]"))?
                .parse::<usize>()
                .map_err(|_| usage("rest <index> [beats]: index must be a whole number"))?;
            let beats = match args.next() {
                Some(v) => Some(
                    v.parse::<f64>()
                        .map_err(|_| usage("rest <index> [beats]: beats must be a number"))?,
                ),
                None => None,
            };
            Command::Rest { index, beats }
        }
        "instrument" | "inst" => Command::Instrument(
            required(rest, "instrument <sks|sn>")?
                .parse()
                .map_err(Error::Usage)?,
        ),
        "bpm" => Command::Bpm(
            required(rest, "bpm <value>")?
                .parse()
                .map_err(|_| usage("bpm <value>: value must be a number"))?,
        ),
        "delay" => Command::Delay(
            required(rest, "delay <ms>")?
                .parse()
                .map_err(|_| usage("delay <ms>: ms must be a whole number"))?,
        ),
        "check" => Command::Check,
        "prepare" => Command::Prepare,
        "start" | "play" => Command::Start,
        "stop" => Command::Stop,
        "status" | "st" => Command::Status,
        "fingerings" => Command::Fingerings,
        "finger" => Command::Finger(required(rest, "finger <note>")?),
        "pump" => Command::Pump(required(rest, "pump <command>")?),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => {
            return Err(Error::Usage(format!(
                "unknown command '{}', type 'help' for a list",
                other
            )))
        }
    };
    Ok(Some(command))
}

fn required(arg: &str, form: &str) -> Result<String> {
    if arg.is_empty() {
        Err(usage(form))
    } else {
        Ok(arg.to_string())
    }
}

fn usage(form: &str) -> Error {
    Error::Usage(format!("usage: {}", form))
}

// =============================================================================
// Rendering
// =============================================================================

pub fn render_files(files: &[MusicFile]) -> String {
    if files.is_empty() {
        return "No music files found".to_string();
    }
    let mut out = String::new();
    for (i, file) in files.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {:<32} {:<24} {:>6.1} bpm {:>5} events",
            i + 1,
            file.filename,
            file.title,
            file.bpm,
            file.duration
        );
    }
    out.pop();
    out
}

pub fn render_metrics(metrics: &TimelineMetrics) -> String {
    format!(
        "{} events, {} rests, {} beats at {} bpm, length {}",
        metrics.total_events,
        metrics.rest_count,
        metrics.total_beats,
        metrics.bpm,
        format_song_length(metrics.duration_sec)
    )
}

pub fn render_timeline(doc: &TimelineDocument, metrics: &TimelineMetrics) -> String {
    let mut out = format!("{} ({} bpm)\n", doc.filename(), doc.bpm());
    for (i, event) in doc.events().iter().enumerate() {
        let marker = if event.is_rest() { "  rest" } else { "" };
        let _ = writeln!(out, "{:>5}  {:<6} {:>6}{}", i, event.symbol, event.beats, marker);
    }
    out.push_str(&render_metrics(metrics));
    out
}

pub fn render_rest_report(rests: &[SignificantRest]) -> String {
    if rests.is_empty() {
        return "No significant rests".to_string();
    }
    let mut out = format!("{} significant rest(s):", rests.len());
    for (i, rest) in rests.iter().enumerate() {
        let _ = write!(
            out,
            "\n  {}. {} - {}  {:.3}s  ({} beats)",
            i + 1,
            format_offset(rest.start_offset_sec),
            format_offset(rest.end_offset_sec),
            rest.duration_sec,
            rest.beats
        );
    }
    out
}

pub fn render_rig_status(status: &StatusSnapshot) -> String {
    let mut out = format!(
        "rig: {} {} {:.0}% note {}/{} elapsed {}",
        if status.is_playing { "playing" } else { "idle" },
        if status.current_file.is_empty() {
            "-"
        } else {
            &status.current_file
        },
        status.progress_percent,
        status.current_note,
        status.total_notes,
        if status.elapsed_time.is_empty() {
            "-"
        } else {
            &status.elapsed_time
        }
    );
    if !status.remaining_time.is_empty() {
        let _ = write!(out, " remaining {}", status.remaining_time);
    }
    if status.theoretical_duration_sec > 0.0 {
        let _ = write!(
            out,
            " (rig: {} expected, {} measured)",
            format_song_length(status.theoretical_duration_sec),
            format_song_length(status.actual_duration_sec)
        );
    }
    out
}

pub fn render_timer(reading: &TimerReading, theoretical_sec: f64) -> String {
    if theoretical_sec > 0.0 {
        format!(
            "timer: {} of {} drift {}",
            reading.elapsed_display(),
            format_song_length(theoretical_sec),
            reading.drift_display()
        )
    } else {
        format!("timer: {} drift {}", reading.elapsed_display(), reading.drift_display())
    }
}

pub fn render_fingerings(table: &[Fingering]) -> String {
    if table.is_empty() {
        return "Fingering table is empty".to_string();
    }
    let hand = |keys: &[String]| {
        if keys.is_empty() {
            "-".to_string()
        } else {
            keys.join(",")
        }
    };
    table
        .iter()
        .map(|f| format!("{:<6} L {:<20} R {}", f.note, hand(&f.left), hand(&f.right)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_log_line(line: &LogLine) -> String {
    format!("[{}] {} {}", line.timestamp, line.kind.to_uppercase(), line.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use windrig_core::TimelineEvent;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse("  start ").unwrap(), Some(Command::Start));
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("files").unwrap(), Some(Command::Files(String::new())));
        assert_eq!(
            parse("files moon river").unwrap(),
            Some(Command::Files("moon river".to_string()))
        );
        assert_eq!(
            parse("select song.json").unwrap(),
            Some(Command::Select("song.json".to_string()))
        );
        assert_eq!(parse("QUIT").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rest() {
        assert_eq!(
            parse("rest 2 1.5").unwrap(),
            Some(Command::Rest {
                index: 2,
                beats: Some(1.5)
            })
        );
        assert_eq!(
            parse("rest 4").unwrap(),
            Some(Command::Rest {
                index: 4,
                beats: None
            })
        );
        // Sign checks happen in the session, not the parser.
        assert_eq!(
            parse("rest 2 -1").unwrap(),
            Some(Command::Rest {
                index: 2,
                beats: Some(-1.0)
            })
        );
        assert_eq!(parse("rest cancel").unwrap(), Some(Command::CancelRest));
        assert!(parse("rest x").is_err());
        assert!(parse("rest").is_err());
    }

    #[test]
    fn test_parse_parameters() {
        assert_eq!(
            parse("instrument sks").unwrap(),
            Some(Command::Instrument(Instrument::Sks))
        );
        assert!(parse("instrument flute").is_err());
        assert_eq!(parse("bpm 72.5").unwrap(), Some(Command::Bpm(72.5)));
        assert_eq!(parse("delay 45").unwrap(), Some(Command::Delay(45)));
        assert!(parse("delay -3").is_err());
        assert!(parse("bpm").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse("dance").unwrap_err();
        assert!(err.to_string().contains("unknown command 'dance'"));
    }

    #[test]
    fn test_render_timeline_marks_rests() {
        let doc = TimelineDocument::new(
            "song.json",
            60.0,
            vec![
                TimelineEvent::new("C4", 2.0).unwrap(),
                TimelineEvent::new("NO", 1.0).unwrap(),
            ],
        )
        .unwrap();
        let text = render_timeline(&doc, &doc.metrics(0.0));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(!lines[1].contains("rest"));
        assert!(lines[2].ends_with("rest"));
        assert!(lines[3].contains("1 rests"));
    }

    #[test]
    fn test_render_rest_report() {
        let text = render_rest_report(&[SignificantRest {
            start_offset_sec: 1.0,
            end_offset_sec: 2.5,
            duration_sec: 1.5,
            beats: 1.5,
        }]);
        assert!(text.starts_with("1 significant rest(s):"));
        assert!(text.contains("0:01.000 - 0:02.500"));
        assert_eq!(render_rest_report(&[]), "No significant rests");
    }

    #[test]
    fn test_render_rig_status_with_rig_durations() {
        let status = StatusSnapshot {
            is_playing: true,
            current_file: "song_sn_60_30.exec.json".to_string(),
            progress_percent: 50.0,
            current_note: 4,
            total_notes: 8,
            elapsed_time: "00:06".to_string(),
            remaining_time: "00:06".to_string(),
            theoretical_duration_sec: 12.0,
            actual_duration_sec: 6.2,
            significant_rests: Vec::new(),
        };
        let text = render_rig_status(&status);
        assert!(text.starts_with("rig: playing song_sn_60_30.exec.json 50% note 4/8"));
        assert!(text.contains("remaining 00:06"));
        assert!(text.ends_with("(rig: 0:12 expected, 0:06 measured)"));

        let idle = render_rig_status(&StatusSnapshot::default());
        assert_eq!(idle, "rig: idle - 0% note 0/0 elapsed -");
    }

    #[test]
    fn test_render_fingerings_marks_open_hands() {
        let text = render_fingerings(&[Fingering {
            note: "C5".to_string(),
            left: Vec::new(),
            right: vec!["R1".to_string()],
        }]);
        assert!(text.contains("L -"));
        assert!(text.ends_with("R R1"));
    }
}
