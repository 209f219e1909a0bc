//! Display of annotated frames in a native window.

use std::time::Duration;

use anyhow::Context;
use minifb::{Key, WindowOptions};

use crate::image::{Image, Resolution};

/// Key that ends the main loop.
pub const EXIT_KEY: Key = Key::A;

/// Minimum time between two window updates.
const UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// A destination for annotated frames.
pub trait FrameSink {
    /// Presents `frame` and polls for user input.
    fn show(&mut self, frame: &Image) -> anyhow::Result<()>;

    /// Returns whether the user has asked to quit, either with the exit key or by closing the
    /// window.
    fn exit_requested(&self) -> bool;

    /// Closes the display. Closing it twice does nothing.
    fn close(&mut self);
}

/// A window showing one image at a time.
///
/// The native window is created when the first frame is shown, sized to fit it, and recreated
/// when the frame resolution changes.
pub struct Window {
    title: String,
    win: Option<minifb::Window>,
    resolution: Resolution,
    buffer: Vec<u32>,
    closed: bool,
}

impl Window {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            win: None,
            resolution: Resolution::new(0, 0),
            buffer: Vec::new(),
            closed: false,
        }
    }

    fn open(&mut self, resolution: Resolution) -> anyhow::Result<&mut minifb::Window> {
        if self.win.is_none() || self.resolution != resolution {
            let (width, height) = (resolution.width() as usize, resolution.height() as usize);
            let mut win = minifb::Window::new(
                &self.title,
                width,
                height,
                WindowOptions {
                    resize: false,
                    ..WindowOptions::default()
                },
            )
            .with_context(|| format!("failed to open {resolution} window '{}'", self.title))?;
            win.limit_update_rate(Some(UPDATE_INTERVAL));
            log::debug!("opened {resolution} window '{}'", self.title);

            self.resolution = resolution;
            self.win = Some(win);
        }
        Ok(self.win.as_mut().expect("window was just opened"))
    }
}

impl FrameSink for Window {
    fn show(&mut self, frame: &Image) -> anyhow::Result<()> {
        anyhow::ensure!(!self.closed, "window '{}' has been closed", self.title);

        fill_buffer(&mut self.buffer, frame);
        let res = frame.resolution();
        let buffer = std::mem::take(&mut self.buffer);
        let result = self.open(res).and_then(|win| {
            win.update_with_buffer(&buffer, res.width() as usize, res.height() as usize)
                .context("failed to update window")
        });
        self.buffer = buffer;
        result
    }

    fn exit_requested(&self) -> bool {
        match &self.win {
            Some(win) => !win.is_open() || win.is_key_down(EXIT_KEY),
            None => self.closed,
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.win.take().is_some() {
            log::debug!("closed window '{}'", self.title);
        }
    }
}

/// Converts `frame` to the `0RGB` pixel format expected by the window.
fn fill_buffer(buffer: &mut Vec<u32>, frame: &Image) {
    buffer.clear();
    buffer.extend(
        frame
            .data()
            .chunks_exact(4)
            .map(|px| u32::from_be_bytes([0, px[0], px[1], px[2]])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Color;

    #[test]
    fn buffer_is_0rgb() {
        let mut image = Image::new(2, 1);
        image.set(0, 0, Color::from_rgb8(0x12, 0x34, 0x56));
        image.set(1, 0, Color::BLUE);

        let mut buffer = vec![7; 10];
        fill_buffer(&mut buffer, &image);
        assert_eq!(buffer, [0x123456, 0x0000ff]);
        assert_eq!(buffer[0], Color::from_rgb8(0x12, 0x34, 0x56).to_0rgb());
    }

    #[test]
    fn unopened_window_does_not_request_exit() {
        let mut window = Window::new("Smart Vision System");
        assert!(!window.exit_requested());
        window.close();
        window.close();
        assert!(window.exit_requested());
        assert!(window.show(&Image::new(1, 1)).is_err());
    }
}
