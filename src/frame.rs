//! Frame buffer and the display handle patterns draw on.

use crate::Color;
use crate::error::SinkError;
use crate::sink::DeviceSink;

/// One color per logical pixel, row-major. Sized once, never resized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    cells: Vec<Color>,
}

impl FrameBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Color::BLACK; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }

    /// Write a pixel. Off-display coordinates are silently dropped; moving
    /// and trailing effects rely on that instead of clipping themselves.
    pub fn set(&mut self, x: i32, y: i32, color: Color) {
        if let Some(offset) = self.offset(x, y) {
            self.cells[offset] = color;
        }
    }

    /// Read a pixel; off-display reads are black.
    pub fn get(&self, x: i32, y: i32) -> Color {
        self.offset(x, y)
            .map_or(Color::BLACK, |offset| self.cells[offset])
    }

    pub fn fill(&mut self, color: Color) {
        self.cells.fill(color);
    }

    pub fn clear(&mut self) {
        self.fill(Color::BLACK);
    }

    /// Every pixel with its coordinate, row by row.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32, Color)> + '_ {
        self.cells.iter().enumerate().map(|(i, &color)| {
            ((i % self.width) as i32, (i / self.width) as i32, color)
        })
    }
}

/// Frame buffer plus the sink it is flushed to.
///
/// There is exactly one `Display`. The controller owns it while idle and
/// moves it into the running pattern's thread, so only one writer can ever
/// reach the strip.
pub struct Display {
    frame: FrameBuffer,
    sink: DeviceSink,
}

impl Display {
    pub fn new(sink: DeviceSink) -> Self {
        let layout = sink.layout();
        Self {
            frame: FrameBuffer::new(layout.width(), layout.height()),
            sink,
        }
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    pub fn sink(&self) -> &DeviceSink {
        &self.sink
    }

    /// Push every pixel of the frame buffer to the strip and flush.
    pub fn show(&mut self) -> Result<(), SinkError> {
        for (x, y, color) in self.frame.pixels() {
            self.sink.push(x, y, color);
        }
        self.sink.flush()
    }

    /// Clear the frame buffer and show the blank frame.
    pub fn blank(&mut self) -> Result<(), SinkError> {
        self.frame.clear();
        self.show()
    }

    /// Release the strip. See [`DeviceSink::shutdown`].
    pub fn shutdown(&mut self) {
        self.frame.clear();
        self.sink.shutdown();
    }
}
