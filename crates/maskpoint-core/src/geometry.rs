//! Contain-fit mapping between display-canvas coordinates and image-pixel
//! coordinates.
//!
//! The image is scaled uniformly to fit inside the canvas and centered, which
//! leaves letterbox margins on one axis. All functions are pure; a transform
//! is just the fitted scale plus the destination rectangle.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Decoded image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

impl CanvasPoint {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in image-pixel space, fractional so sub-pixel prompt placement
/// survives the round trip to the server.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImagePoint {
    pub x: f64,
    pub y: f64,
}

impl ImagePoint {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn contains(&self, point: CanvasPoint) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x <= self.x + self.width
            && point.y <= self.y + self.height
    }
}

/// The fitted contain transform for one (canvas, image) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f64,
    pub dest: Rect,
    pub image: PixelSize,
}

impl ViewTransform {
    /// Computes the uniform contain fit. Returns `None` when either size has
    /// a non-positive dimension; callers must then treat any click as
    /// outside the image.
    #[must_use]
    pub fn fit(canvas: CanvasSize, image: PixelSize) -> Option<Self> {
        if canvas.width <= 0.0 || canvas.height <= 0.0 || image.width == 0 || image.height == 0 {
            return None;
        }
        let iw = f64::from(image.width);
        let ih = f64::from(image.height);
        let scale = (canvas.width / iw).min(canvas.height / ih);
        let dest_w = iw * scale;
        let dest_h = ih * scale;
        Some(Self {
            scale,
            dest: Rect {
                x: (canvas.width - dest_w) / 2.0,
                y: (canvas.height - dest_h) / 2.0,
                width: dest_w,
                height: dest_h,
            },
            image,
        })
    }

    #[must_use]
    pub fn dest_contains(&self, point: CanvasPoint) -> bool {
        self.dest.contains(point)
    }

    /// Click position to image pixel: clamp into the destination rectangle,
    /// undo the offset and scale, then clamp into `[0, w-1] x [0, h-1]`.
    #[must_use]
    pub fn canvas_to_image(&self, point: CanvasPoint) -> ImagePoint {
        let cx = point.x.clamp(self.dest.x, self.dest.x + self.dest.width);
        let cy = point.y.clamp(self.dest.y, self.dest.y + self.dest.height);
        let x = (cx - self.dest.x) / self.scale;
        let y = (cy - self.dest.y) / self.scale;
        ImagePoint {
            x: x.clamp(0.0, f64::from(self.image.width - 1)),
            y: y.clamp(0.0, f64::from(self.image.height - 1)),
        }
    }

    #[must_use]
    pub fn image_to_canvas(&self, point: ImagePoint) -> CanvasPoint {
        CanvasPoint {
            x: self.dest.x + point.x * self.scale,
            y: self.dest.y + point.y * self.scale,
        }
    }
}
