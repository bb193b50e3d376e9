//! Terminal host surface.
//!
//! Module output goes to stdout and stderr. Input events are typed on stdin:
//!
//! ```text
//! resize <width> <height>   change the surface size
//! open <path>               select a track file
//! drop <path>               drag and drop a track file
//! cancel                    dismiss a pending file dialog
//! ```
//!
//! While a file dialog is open, any other line is taken as the selected path.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use tile_bridge_common::SurfaceConfig;
use tile_bridge_core::{ConsoleLine, ConsoleStream};
use tile_bridge_host::{HostEvent, HostEventSender, HostSurface, SelectedFile};

/// A surface backed by the terminal.
#[derive(Debug)]
pub struct ConsoleSurface {
    size: Mutex<(u32, u32)>,
    dialog_open: AtomicBool,
}

impl ConsoleSurface {
    pub fn new(config: SurfaceConfig) -> Self {
        Self {
            size: Mutex::new((config.width, config.height)),
            dialog_open: AtomicBool::new(false),
        }
    }

    fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }
}

impl HostSurface for ConsoleSurface {
    fn surface_size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    fn open_file_dialog(&self) {
        self.dialog_open.store(true, Ordering::SeqCst);
        println!("Select a track file: type its path, or 'cancel'");
    }

    fn set_drag_highlight(&self, active: bool) {
        debug!(active, "Drop target highlight");
    }

    fn reset_file_input(&self) {
        self.dialog_open.store(false, Ordering::SeqCst);
    }

    fn print(&self, line: &ConsoleLine) {
        match line.stream {
            ConsoleStream::Stdout => println!("{}", line.text),
            ConsoleStream::Stderr => eprintln!("{}", line.text),
        }
    }
}

/// A parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Resize(u32, u32),
    Open(PathBuf),
    Drop(PathBuf),
    Cancel,
    Other(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let command = match word {
        "resize" => {
            let mut dims = rest.split_whitespace().map(str::parse::<u32>);
            match (dims.next(), dims.next(), dims.next()) {
                (Some(Ok(width)), Some(Ok(height)), None) => Command::Resize(width, height),
                _ => Command::Other(line.to_string()),
            }
        }
        "open" if !rest.is_empty() => Command::Open(PathBuf::from(rest)),
        "drop" if !rest.is_empty() => Command::Drop(PathBuf::from(rest)),
        "cancel" if rest.is_empty() => Command::Cancel,
        _ => Command::Other(line.to_string()),
    };
    Some(command)
}

/// Turn one stdin line into host events.
fn events_for(surface: &ConsoleSurface, command: Command) -> Vec<HostEvent> {
    let dialog_open = surface.dialog_open.load(Ordering::SeqCst);

    match command {
        Command::Resize(width, height) => {
            surface.resize(width, height);
            vec![HostEvent::Resize]
        }
        Command::Open(path) => vec![HostEvent::FileInputChanged(vec![
            SelectedFile::from_path(path),
        ])],
        Command::Drop(path) => vec![
            HostEvent::DragEnter,
            HostEvent::DragOver,
            HostEvent::Drop(vec![SelectedFile::from_path(path)]),
        ],
        Command::Cancel if dialog_open => vec![HostEvent::FileInputChanged(Vec::new())],
        Command::Other(line) if dialog_open => vec![HostEvent::FileInputChanged(vec![
            SelectedFile::from_path(line),
        ])],
        Command::Cancel | Command::Other(_) => Vec::new(),
    }
}

/// Read commands from stdin on a background thread until stdin closes or
/// the driver stops listening.
pub fn spawn_stdin_reader(surface: Arc<ConsoleSurface>, events: HostEventSender) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    return;
                }
            };
            let Some(command) = parse_command(&line) else {
                continue;
            };

            let events_for_line = events_for(&surface, command);
            if events_for_line.is_empty() {
                warn!(line = %line.trim(), "Unknown command");
            }
            for event in events_for_line {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    });
}
