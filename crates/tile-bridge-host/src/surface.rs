//! The host surface and the events it produces.
//!
//! A [`HostSurface`] is whatever presents the module to the user: a window, a
//! terminal, or a recording double in tests. It answers size queries and
//! carries out the few presentation side effects the bridge needs. Input
//! arrives separately as [`HostEvent`]s on a channel the driver consumes.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use tile_bridge_core::ConsoleLine;

/// Presentation side of the host.
pub trait HostSurface: Send + Sync {
    /// Current drawable size in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Present a file picker. The selection comes back as
    /// [`HostEvent::FileInputChanged`].
    fn open_file_dialog(&self);

    /// Toggle the drop-target highlight.
    fn set_drag_highlight(&self, active: bool);

    /// Clear the file input so the same file can be chosen again.
    fn reset_file_input(&self) {}

    /// Show a line of module console output.
    fn print(&self, line: &ConsoleLine);
}

/// A file the user picked or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    /// Display name, used for the extension check.
    pub name: String,
    /// Where the contents can be read from.
    pub path: PathBuf,
}

impl SelectedFile {
    /// Describe a file on disk, naming it after its final path component.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path: path.to_path_buf(),
        }
    }
}

/// Input the host delivers to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The surface size changed; the driver queries [`HostSurface::surface_size`].
    Resize,
    /// A drag entered the surface.
    DragEnter,
    /// A drag moved over the surface.
    DragOver,
    /// A drag left the surface without dropping.
    DragLeave,
    /// Files were dropped on the surface.
    Drop(Vec<SelectedFile>),
    /// The file input changed, usually after [`HostSurface::open_file_dialog`].
    FileInputChanged(Vec<SelectedFile>),
}

/// Sending half handed to the host.
pub type HostEventSender = mpsc::UnboundedSender<HostEvent>;

/// Receiving half consumed by the driver.
pub type HostEventReceiver = mpsc::UnboundedReceiver<HostEvent>;

/// Create the channel host events travel on.
pub fn host_event_channel() -> (HostEventSender, HostEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_file_from_path() {
        let file = SelectedFile::from_path("/data/rides/morning.gpx");

        assert_eq!(file.name, "morning.gpx");
        assert_eq!(file.path, PathBuf::from("/data/rides/morning.gpx"));
    }

    #[tokio::test]
    async fn test_event_channel_keeps_order() {
        let (tx, mut rx) = host_event_channel();

        tx.send(HostEvent::DragEnter).unwrap();
        tx.send(HostEvent::Resize).unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(HostEvent::DragEnter));
        assert_eq!(rx.recv().await, Some(HostEvent::Resize));
        assert_eq!(rx.recv().await, None);
    }
}
