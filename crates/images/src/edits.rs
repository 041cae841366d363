use atlas::Rect;

/// A buffered request to overwrite `rect` of an image with `pixels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelEdit {
    pub pixels: Vec<u8>,
    pub rect: Rect,
}

/// Pixel edits waiting for the next source/destination bind or read-back.
#[derive(Debug, Default)]
pub struct PendingEdits {
    edits: Vec<PixelEdit>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, edit: PixelEdit) {
        self.edits.push(edit);
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Total payload size of the queued edits in bytes.
    pub fn payload_len(&self) -> usize {
        self.edits.iter().map(|edit| edit.pixels.len()).sum()
    }

    /// Hands every queued edit, in submission order, to `apply`.
    ///
    /// The queue is emptied before `apply` runs, so it ends up empty whether
    /// or not `apply` fails.
    pub fn drain_and_apply<E>(
        &mut self,
        apply: impl FnOnce(&[PixelEdit]) -> Result<(), E>,
    ) -> Result<(), E> {
        let edits = std::mem::take(&mut self.edits);
        apply(&edits)
    }
}
