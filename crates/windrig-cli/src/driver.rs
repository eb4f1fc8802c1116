//! Console driver.
//!
//! One cooperative loop multiplexes operator input, the status and log polls,
//! the local timer tick and the outstanding preprocessing job. Nothing runs in
//! parallel with the session controller; every handler gets `&mut` access in
//! turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, MissedTickBehavior};
use windrig_core::timeline::format_song_length;
use windrig_core::{
    CacheLookup, EditOutcome, JobPurpose, LogLine, MusicFile, ResolveJob, ResolveOutcome, RigApi,
    RigError, Selection, SessionController, SessionError, SessionState, StartPlan,
};

use crate::config::Intervals;
use crate::console::{self, Command};
use crate::error::Result;

/// How long shutdown waits for the rig to confirm a stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Tracks which rig log lines were already shown.
#[derive(Debug)]
struct LogFollower {
    seen: usize,
    enabled: bool,
}

impl LogFollower {
    fn new() -> Self {
        Self {
            seen: 0,
            enabled: true,
        }
    }

    /// Lines not shown yet. A shorter list means the rig cleared its log.
    fn fresh<'a>(&mut self, lines: &'a [LogLine]) -> &'a [LogLine] {
        if lines.len() < self.seen {
            self.seen = 0;
        }
        let fresh = &lines[self.seen..];
        self.seen = lines.len();
        fresh
    }
}

pub struct Driver {
    controller: SessionController<dyn RigApi>,
    intervals: Intervals,
    pending: Option<ResolveJob>,
    listing: Vec<MusicFile>,
    logs: LogFollower,
    output: Vec<String>,
}

impl Driver {
    pub fn new(controller: SessionController<dyn RigApi>, intervals: Intervals) -> Self {
        Self {
            controller,
            intervals,
            pending: None,
            listing: Vec::new(),
            logs: LogFollower::new(),
            output: Vec::new(),
        }
    }

    pub fn controller(&self) -> &SessionController<dyn RigApi> {
        &self.controller
    }

    /// Run until `quit`, end of input or Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        let mut status_tick = time::interval(self.controller.status_interval());
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut log_tick = time::interval(self.intervals.logs);
        log_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer_tick = time::interval(self.intervals.tick);
        timer_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        self.say("Type 'help' for commands");
        self.flush();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.handle_line(&line).await == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Reading input failed: {}", e);
                        break;
                    }
                },
                Some(outcome) = async {
                    match self.pending.as_mut() {
                        Some(job) => Some(job.await),
                        None => None,
                    }
                }, if self.pending.is_some() => {
                    self.pending = None;
                    self.on_resolved(outcome).await;
                }
                _ = status_tick.tick() => self.on_status_tick().await,
                _ = log_tick.tick(), if self.logs.enabled => self.on_log_tick().await,
                _ = timer_tick.tick(), if self.controller.timer_running() => {
                    self.controller.tick_timer(Instant::now());
                }
                _ = &mut shutdown => {
                    self.say("Interrupted");
                    break;
                }
            }
            self.flush();
        }

        self.shutdown().await;
        self.flush();
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        match console::parse(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => Flow::Continue,
            Err(e) => {
                self.say(e.to_string());
                Flow::Continue
            }
        }
    }

    /// Carry out one operator command.
    pub async fn execute(&mut self, command: Command) -> Flow {
        let api = Arc::clone(self.controller.api());
        match command {
            Command::Files(query) => match api.search_files(&query).await {
                Ok(files) => {
                    self.say(console::render_files(&files));
                    self.listing = files;
                }
                Err(e) => self.say(format!("File search failed: {}", e)),
            },
            Command::Select(arg) => self.select(&arg).await,
            Command::Timeline => {
                let text = match (self.controller.timeline(), self.controller.metrics()) {
                    (Some(doc), Some(metrics)) => console::render_timeline(doc, &metrics),
                    _ => "No file selected".to_string(),
                };
                self.say(text);
            }
            Command::Rest { index, beats: None } => match self.controller.begin_rest_edit(index) {
                Some(edit) => self.say(format!(
                    "Rest {} is {} beats, use 'rest {} <beats>' to change it",
                    edit.index, edit.current_beats, edit.index
                )),
                None => {
                    let reason = self.refused_edit(index);
                    self.say(reason);
                }
            },
            Command::Rest {
                index,
                beats: Some(beats),
            } => self.commit_rest(index, beats).await,
            Command::CancelRest => match self.controller.editing_rest() {
                Some(index) => {
                    self.controller.cancel_rest_edit();
                    self.say(format!("Edit of rest {} cancelled", index));
                }
                None => self.say("No rest edit open"),
            },
            Command::Instrument(instrument) => {
                let result = self.controller.set_instrument(instrument);
                self.after_parameter_change(
                    result,
                    format!("Instrument: {}", instrument.display_name()),
                )
                .await;
            }
            Command::Bpm(bpm) => {
                let result = self.controller.set_bpm(bpm);
                let notice = if bpm == 0.0 {
                    "Tempo: file tempo".to_string()
                } else {
                    format!("Tempo: {} bpm", bpm)
                };
                self.after_parameter_change(result, notice).await;
            }
            Command::Delay(ms) => {
                let result = self.controller.set_tonguing_delay(ms);
                self.after_parameter_change(result, format!("Tonguing delay: {} ms", ms))
                    .await;
            }
            Command::Check => self.check().await,
            Command::Prepare => match self.controller.begin_prepare() {
                Ok(job) => {
                    self.say(format!("Preprocessing {}...", job.key()));
                    self.pending = Some(job);
                }
                Err(e) => self.say(format!("Cannot prepare: {}", e)),
            },
            Command::Start => self.start().await,
            Command::Stop => match self.controller.user_stop().await {
                Ok(true) => self.say("Stopped"),
                Ok(false) => self.say("Nothing is playing"),
                Err(e) => self.say(format!("Stop failed, rig still playing: {}", e)),
            },
            Command::Status => self.show_status(),
            Command::Fingerings => {
                let instrument = self.controller.session().instrument;
                match api.fingerings(instrument).await {
                    Ok(table) => self.say(console::render_fingerings(&table)),
                    Err(e) => self.say(format!("Fingering table unavailable: {}", e)),
                }
            }
            Command::Finger(note) => {
                if self.controller.state() == SessionState::Playing {
                    self.say("Not while playing");
                } else {
                    let instrument = self.controller.session().instrument;
                    match api.send_fingering(&note, instrument).await {
                        Ok(message) => self.say(message),
                        Err(e) => self.say(format!("Fingering {} failed: {}", note, e)),
                    }
                }
            }
            Command::Pump(cmd) => match api.pump_debug(&cmd).await {
                Ok(reply) => match reply.response {
                    Some(response) => self.say(format!("{}: {}", reply.message, response)),
                    None => self.say(reply.message),
                },
                Err(e) => self.say(format!("Pump command failed: {}", e)),
            },
            Command::Help => self.say(console::HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// Resolve an operator's file reference. Names missing from the last
    /// listing are looked up on the rig so the cache gets the server path.
    async fn resolve_selection(&self, arg: &str) -> Selection {
        if let Ok(n) = arg.parse::<usize>() {
            if n >= 1 && n <= self.listing.len() {
                return Selection::from(&self.listing[n - 1]);
            }
        }
        if let Some(file) = self.listing.iter().find(|f| f.filename == arg) {
            return Selection::from(file);
        }
        match self.controller.api().search_files(arg).await {
            Ok(files) => files
                .iter()
                .find(|f| f.filename == arg)
                .map(Selection::from)
                .unwrap_or_else(|| Selection::named(arg)),
            Err(e) => {
                log::debug!("Lookup of {} failed, using the music folder: {}", arg, e);
                Selection::named(arg)
            }
        }
    }

    async fn select(&mut self, arg: &str) {
        let selection = self.resolve_selection(arg).await;

        let result = self
            .controller
            .select_file(selection)
            .await
            .map(|doc| doc.filename().to_string());
        match result {
            Ok(filename) => {
                self.say(format!("Selected {}", filename));
                if let Some(metrics) = self.controller.metrics() {
                    self.say(console::render_metrics(&metrics));
                }
                self.check().await;
            }
            Err(SessionError::Rig(RigError::NotFound(_))) => {
                self.say(format!("{} not found on the rig", arg));
            }
            Err(e) => self.say(format!("Cannot select {}: {}", arg, e)),
        }
    }

    fn refused_edit(&self, index: usize) -> String {
        if self.controller.state() == SessionState::Playing {
            "Timeline edits are locked while playing".to_string()
        } else if self.controller.timeline().is_none() {
            "No file selected".to_string()
        } else {
            format!("Event {} is not a rest", index)
        }
    }

    async fn commit_rest(&mut self, index: usize, beats: f64) {
        match self.controller.commit_rest_edit(index, beats).await {
            Ok(EditOutcome::Committed(metrics)) => self.say(format!(
                "Rest {} set to {} beats: {}",
                index,
                beats,
                console::render_metrics(&metrics)
            )),
            Ok(EditOutcome::Refused) => {
                let reason = self.refused_edit(index);
                self.say(reason);
            }
            Err(SessionError::Rig(e)) => {
                self.say(format!("Rest changed locally but not saved: {}", e))
            }
            Err(e) => self.say(format!("Rest edit rejected: {}", e)),
        }
    }

    async fn after_parameter_change(
        &mut self,
        result: std::result::Result<(), SessionError>,
        notice: String,
    ) {
        match result {
            Ok(()) => {
                self.say(notice);
                match self.controller.state() {
                    SessionState::Preprocessing => {
                        self.say("The running preprocessing no longer matches and will be discarded")
                    }
                    _ if self.controller.session().selection.is_some() => self.check().await,
                    _ => {}
                }
            }
            Err(SessionError::Busy(SessionState::Playing)) => {
                self.say("Parameters are locked while playing, stop first")
            }
            Err(e) => self.say(e.to_string()),
        }
    }

    async fn check(&mut self) {
        match self.controller.refresh_cache().await {
            Ok(CacheLookup::Hit(entry)) => self.say(format!(
                "Sequence ready: {} ({}, {} events)",
                entry.exec_file,
                format_song_length(entry.duration_sec),
                entry.total_events
            )),
            Ok(CacheLookup::Miss) => self.say("No precomputed sequence, start will preprocess"),
            Err(e) => self.say(format!("Cannot check: {}", e)),
        }
    }

    async fn start(&mut self) {
        match self.controller.begin_start() {
            Ok(StartPlan::Ready) => match self.controller.launch().await {
                Ok(()) => self.say_playing(),
                Err(e) => self.say(format!("Start failed: {}", e)),
            },
            Ok(StartPlan::Resolve(job)) => {
                self.say(format!("Preprocessing {}...", job.key()));
                self.pending = Some(job);
            }
            Err(e) => self.say(format!("Cannot start: {}", e)),
        }
    }

    async fn on_resolved(&mut self, outcome: ResolveOutcome) {
        let purpose = outcome.purpose;
        match (self.controller.finish_resolve(outcome).await, purpose) {
            (Ok(()), JobPurpose::Start) => {
                if self.controller.state() == SessionState::Playing {
                    self.say_playing();
                }
            }
            (Ok(()), JobPurpose::Prepare) => {
                let session = self.controller.session();
                let text = format!(
                    "Sequence ready: {} ({})",
                    session.exec_file.as_deref().unwrap_or("-"),
                    format_song_length(session.theoretical_duration_sec)
                );
                self.say(text);
            }
            (Err(e), JobPurpose::Start) => self.say(format!("Start failed: {}", e)),
            (Err(e), JobPurpose::Prepare) => self.say(format!("Prepare failed: {}", e)),
        }
    }

    fn say_playing(&mut self) {
        let session = self.controller.session();
        let text = format!(
            "Playing {} (expected {})",
            session.exec_file.as_deref().unwrap_or("-"),
            format_song_length(session.theoretical_duration_sec)
        );
        self.say(text);
    }

    fn show_status(&mut self) {
        let session = self.controller.session();
        let mut lines = vec![format!(
            "session: {} | {} | {} | {} | delay {} ms | sequence {}",
            session.state,
            session
                .selection
                .as_ref()
                .map(|s| s.filename.as_str())
                .unwrap_or("-"),
            session.instrument.display_name(),
            if session.bpm > 0.0 {
                format!("{} bpm", session.bpm)
            } else {
                "file tempo".to_string()
            },
            session.tonguing_delay_ms,
            session.exec_file.as_deref().unwrap_or("-")
        )];
        if let Some(metrics) = self.controller.metrics() {
            lines.push(console::render_metrics(&metrics));
        }
        lines.push(console::render_timer(
            &self.controller.timer_reading(),
            session.theoretical_duration_sec,
        ));
        lines.push(match self.controller.latest_status() {
            Some(status) => console::render_rig_status(status),
            None => "rig: no status yet".to_string(),
        });
        for line in lines {
            self.say(line);
        }
    }

    async fn on_status_tick(&mut self) {
        if self.controller.poll_status().await {
            let reading = self.controller.timer_reading();
            let theoretical = self.controller.session().theoretical_duration_sec;
            self.say("Performance finished");
            self.say(console::render_timer(&reading, theoretical));
            self.say(console::render_rest_report(self.controller.rest_report()));
        }
    }

    async fn on_log_tick(&mut self) {
        let api = Arc::clone(self.controller.api());
        match api.playback_logs().await {
            Ok(lines) => {
                for line in self.logs.fresh(&lines) {
                    self.say(console::render_log_line(line));
                }
            }
            Err(RigError::NotFound(_)) => {
                log::info!("Rig has no playback log feed, log polling disabled");
                self.logs.enabled = false;
            }
            Err(e) => log::debug!("Log poll failed: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(stop) = self.controller.teardown() {
            self.say("Stopping the running performance");
            self.flush();
            if time::timeout(STOP_GRACE, stop).await.is_err() {
                log::warn!("Rig did not confirm the stop within {:?}", STOP_GRACE);
            }
        }
        if self.pending.take().is_some() {
            log::info!("Abandoning outstanding preprocessing");
        }
    }

    fn say(&mut self, text: impl Into<String>) {
        self.output.push(text.into());
    }

    fn flush(&mut self) {
        for line in self.output.drain(..) {
            println!("{}", line);
        }
    }
}
