/// One raster sample of the capture target.
///
/// Pixel data is tightly packed RGBA, row-major, 4 bytes per pixel:
///   [(y * width + x) * 4 + 0]  R
///   [(y * width + x) * 4 + 1]  G
///   [(y * width + x) * 4 + 2]  B
///   [(y * width + x) * 4 + 3]  A
///
/// `captured_at_ms` is Unix millis taken when the provider produced the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    pub captured_at_ms: i64,
}

const CHANNELS: usize = 4;

impl Frame {
    /// Wrap an RGBA buffer. Fails if the buffer length does not match the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>, captured_at_ms: i64) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            data,
            captured_at_ms,
        })
    }

    /// Transparent black frame. Zero dimensions are raised to 1 so the result is
    /// always a valid raster; callers fill it through `data_mut`.
    pub fn blank(width: u32, height: u32, captured_at_ms: i64) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * CHANNELS],
            captured_at_ms,
        }
    }

    /// A frame where every pixel has the same RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4], captured_at_ms: i64) -> Result<Self, FrameError> {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self::new(width, height, data, captured_at_ms)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// RGBA value at (x, y). Coordinates are clamped to the frame bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let idx = (y * self.width as usize + x) * CHANNELS;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Overwrite a rectangle with a solid colour. Parts outside the frame are ignored.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for py in y.min(self.height)..y_end {
            for px in x.min(self.width)..x_end {
                let idx = (py as usize * self.width as usize + px as usize) * CHANNELS;
                self.data[idx..idx + CHANNELS].copy_from_slice(&rgba);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_buffer_size() {
        let result = Frame::new(10, 10, vec![0; 10], 0);
        assert!(matches!(result, Err(FrameError::BufferSize { expected: 400, .. })));
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        assert!(Frame::new(0, 10, Vec::new(), 0).is_err());
    }

    #[test]
    fn filled_frame_has_uniform_pixels() {
        let frame = Frame::filled(4, 3, [10, 20, 30, 255], 42).unwrap();
        assert_eq!(frame.pixel_count(), 12);
        assert_eq!(frame.pixel(3, 2), [10, 20, 30, 255]);
        assert_eq!(frame.captured_at_ms, 42);
    }

    #[test]
    fn blank_raises_zero_dimensions() {
        let frame = Frame::blank(0, 0, 7);
        assert_eq!(frame.dimensions(), (1, 1));
        assert_eq!(frame.data().len(), 4);
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut frame = Frame::filled(8, 8, [255, 255, 255, 255], 0).unwrap();
        frame.fill_rect(6, 6, 10, 10, [0, 0, 0, 255]);
        assert_eq!(frame.pixel(7, 7), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(5, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn pixel_clamps_coordinates() {
        let mut frame = Frame::filled(2, 2, [0, 0, 0, 255], 0).unwrap();
        frame.fill_rect(1, 1, 1, 1, [9, 9, 9, 255]);
        assert_eq!(frame.pixel(100, 100), [9, 9, 9, 255]);
    }
}
