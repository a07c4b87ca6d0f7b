use feedline_atoms::media::PendingImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging,
}

#[derive(Debug, Clone)]
pub enum DragEvent {
    Enter,
    Over,
    Leave,
    Drop(Vec<PendingImage>),
}

/// Upload area that highlights while something is dragged over it.
#[derive(Debug, Default)]
pub struct DropZone {
    state: DragState,
}

impl DropZone {
    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        self.state == DragState::Dragging
    }

    /// Apply one drag event. A drop returns the first dropped file; the rest
    /// are ignored.
    pub fn handle(&mut self, event: DragEvent) -> Option<PendingImage> {
        match event {
            DragEvent::Enter | DragEvent::Over => {
                self.state = DragState::Dragging;
                None
            }
            DragEvent::Leave => {
                self.state = DragState::Idle;
                None
            }
            DragEvent::Drop(files) => {
                self.state = DragState::Idle;
                files.into_iter().next()
            }
        }
    }
}
