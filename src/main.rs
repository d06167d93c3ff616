use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::Receiver;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    terminal::{self, ClearType},
};
use keyglow::audio::{AudioOutput, MidiOutSink, list_midi_ports};
use keyglow::indicator::{IndicatorSink, SimulatedStrip};
use keyglow::ui::{KeyboardSink, NotationSink, UiCommand, UiState, ui_channel};
use keyglow::{
    AutoRelease, Library, NoteEventParser, PlaybackStatus, PlaybackUpdate, PlayerConfig,
    Scheduler, Sink, SinkSet, Song,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "keyglow=info";
const DEFAULT_CONFIG: &str = "keyglow.ron";

const FRAME: Duration = Duration::from_millis(16);
const SEEK_STEP_MS: u64 = 5000;
const SPEED_STEP: f64 = 0.25;
const SPEED_RANGE: (f64, f64) = (0.25, 4.0);

fn setup_tracing() {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::builder().parse_lossy(directives))
        .init();
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// MIDI file to play; a built-in run plays when omitted
    file: Option<PathBuf>,

    /// Playback speed factor
    #[arg(short, long)]
    speed: Option<f64>,

    /// Path to the RON config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Print the available MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing();
    let args = Cli::parse();

    if args.list_ports {
        for name in list_midi_ports()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = PlayerConfig::load_or_default(&args.config);
    let library = Library::new(NoteEventParser::new(config.parser.clone()));
    if let Some(path) = &args.file {
        library.load(path);
    }
    let song = library.current();

    let (ui_tx, ui_rx) = ui_channel();
    let hold = config.playback.highlight();
    let strip = SimulatedStrip::new(config.indicator.layout.len());
    let mut sinks: Vec<Arc<dyn Sink>> = vec![
        Arc::new(AutoRelease::new(KeyboardSink::new(ui_tx.clone()), hold)?),
        Arc::new(NotationSink::new(ui_tx)),
        Arc::new(AutoRelease::new(
            IndicatorSink::new(strip, &config.indicator)?,
            hold,
        )?),
    ];

    // the stream must outlive playback and stay on this thread
    let _audio = if config.audio.enabled {
        match AudioOutput::open(&config.audio) {
            Ok((output, sink)) => {
                sinks.push(Arc::new(AutoRelease::new(sink, hold)?));
                Some(output)
            }
            Err(e) => {
                warn!("audio disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    if let Some(filter) = &config.audio.midi_out_port {
        match MidiOutSink::connect(filter) {
            Ok(sink) => sinks.push(Arc::new(AutoRelease::new(sink, hold)?)),
            Err(e) => warn!("MIDI output disabled: {e}"),
        }
    }

    let scheduler = Scheduler::new(SinkSet::new(sinks), &config.playback);
    let metadata = &song.metadata;
    println!(
        "{} | {} events | {:.0} BPM | {}/{} | key {} | {}",
        song.title(),
        song.events.len(),
        metadata.bpm,
        metadata.time_signature.0,
        metadata.time_signature.1,
        metadata.key_signature,
        format_time(metadata.total_duration_ms),
    );
    println!("space play/stop | <- -> seek | + - speed | r reset | q quit");

    let mut host = Host {
        updates: scheduler.updates(),
        scheduler: &scheduler,
        speed: args.speed.unwrap_or(config.playback.default_speed),
        ui: UiState::new(config.indicator.layout),
        ui_rx,
        song,
    };

    terminal::enable_raw_mode()?;
    let result = host.run();
    terminal::disable_raw_mode()?;
    println!();
    result
}

struct Host<'a> {
    scheduler: &'a Scheduler,
    song: Arc<Song>,
    speed: f64,
    ui: UiState,
    ui_rx: Receiver<UiCommand>,
    updates: Receiver<PlaybackUpdate>,
}

impl Host<'_> {
    fn run(&mut self) -> Result<(), Box<dyn Error>> {
        loop {
            if event::poll(FRAME)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && !self.handle_key(key) {
                        break;
                    }
                }
            }

            for update in self.updates.try_iter() {
                match update {
                    PlaybackUpdate::Seeked { time_ms } => self.ui.scroll.jump_to(time_ms),
                    PlaybackUpdate::Completed => info!("end of song"),
                    _ => {}
                }
            }
            self.ui.drain(&self.ui_rx);
            self.ui.scroll.step();
            self.draw()?;
        }

        if self.scheduler.status().is_active() {
            self.scheduler.stop()?;
        }
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        let result = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Char(' ') => self.toggle(),
            KeyCode::Left => {
                let target = self.scheduler.current_time_ms().saturating_sub(SEEK_STEP_MS);
                self.scheduler.seek(target);
                Ok(())
            }
            KeyCode::Right => {
                let target = self.scheduler.current_time_ms() + SEEK_STEP_MS;
                self.scheduler.seek(target);
                Ok(())
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.change_speed(SPEED_STEP),
            KeyCode::Char('-') => self.change_speed(-SPEED_STEP),
            KeyCode::Char('r') => self.scheduler.reset().map(|()| self.ui.scroll.jump_to(0)),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("{e}");
        }
        true
    }

    fn toggle(&mut self) -> Result<(), keyglow::PlaybackError> {
        match self.scheduler.status() {
            status if status.is_active() => self.scheduler.stop(),
            status => {
                // resume where a stop left off, replay from the top after completion
                if status == PlaybackStatus::Stopped {
                    self.scheduler.seek(self.scheduler.current_time_ms());
                }
                self.scheduler.start(Arc::clone(&self.song.events), self.speed)
            }
        }
    }

    fn change_speed(&mut self, delta: f64) -> Result<(), keyglow::PlaybackError> {
        let speed = (self.speed + delta).clamp(SPEED_RANGE.0, SPEED_RANGE.1);
        self.scheduler.set_speed(speed)?;
        self.speed = speed;
        Ok(())
    }

    fn draw(&self) -> io::Result<()> {
        let mut out = io::stdout();
        queue!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine)
        )?;
        write!(
            out,
            "{:<9} {} / {} {:>3}% x{:.2} {}",
            format!("{:?}", self.scheduler.status()),
            format_time(self.ui.scroll.position_ms() as u64),
            format_time(self.song.metadata.total_duration_ms),
            self.ui.progress,
            self.speed,
            self.ui.keyboard.render(),
        )?;
        out.flush()
    }
}

fn format_time(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
