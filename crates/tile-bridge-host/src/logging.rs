//! Module console output.
//!
//! Lines the module writes through the runtime `write` import are:
//! 1. Shown on the [`HostSurface`]
//! 2. Emitted via the `tracing` crate for observability

use tracing::{info, warn};

use crate::HostSurface;
use tile_bridge_core::{ConsoleLine, ConsoleStream};

/// Forwards module console output to the host.
pub struct ConsoleHost;

impl ConsoleHost {
    /// Emit one line.
    ///
    /// Standard output is traced at info level and standard error at warn.
    pub fn emit(surface: &dyn HostSurface, line: &ConsoleLine) {
        match line.stream {
            ConsoleStream::Stdout => info!(module_output = true, "{}", line.text),
            ConsoleStream::Stderr => warn!(module_output = true, "{}", line.text),
        }
        surface.print(line);
    }

    /// Emit every line in order.
    pub fn emit_all(surface: &dyn HostSurface, lines: &[ConsoleLine]) {
        for line in lines {
            Self::emit(surface, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSurface {
        printed: Mutex<Vec<ConsoleLine>>,
    }

    impl HostSurface for CapturingSurface {
        fn surface_size(&self) -> (u32, u32) {
            (640, 480)
        }
        fn open_file_dialog(&self) {}
        fn set_drag_highlight(&self, _active: bool) {}
        fn print(&self, line: &ConsoleLine) {
            self.printed.lock().push(line.clone());
        }
    }

    #[test]
    fn test_emit_all_keeps_order() {
        let surface = CapturingSurface::default();
        let lines = vec![
            ConsoleLine {
                stream: ConsoleStream::Stdout,
                text: "loading tiles".into(),
            },
            ConsoleLine {
                stream: ConsoleStream::Stderr,
                text: "bad track".into(),
            },
        ];

        ConsoleHost::emit_all(&surface, &lines);

        assert_eq!(*surface.printed.lock(), lines);
    }
}
