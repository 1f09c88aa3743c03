//! Pure mask compositor.
//!
//! Produces the display frame for the current state: the base image drawn
//! into its contain-fit destination rectangle, a uniform dim over that
//! rectangle, a punch-out to full brightness wherever the mask alpha is
//! nonzero, and filled-disc markers for the prompt points. The function is a
//! pure function of its inputs and can run every frame.
//!
//! The mask is resampled nearest-neighbor: it is a hard 0/255 raster, and a
//! filtering resample would invent translucent boundary pixels that the
//! punch-out step cannot classify.

use image::imageops::FilterType;
use image::{GrayImage, Rgba, RgbaImage, imageops};

use crate::geometry::{CanvasSize, ImagePoint, PixelSize, ViewTransform};
use crate::state::{PromptLabel, PromptPoint};

#[derive(Clone, Copy, Debug)]
pub struct ComposeOptions {
    /// Brightness retained outside the mask, 0.0..=1.0.
    pub dim_factor: f32,
    pub marker_radius: f64,
    pub foreground_color: Rgba<u8>,
    pub background_color: Rgba<u8>,
    pub outline_color: Rgba<u8>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            dim_factor: 0.35,
            marker_radius: 6.0,
            foreground_color: Rgba([52, 199, 89, 255]),
            background_color: Rgba([255, 69, 58, 255]),
            outline_color: Rgba([255, 255, 255, 230]),
        }
    }
}

/// Renders one frame. Returns `None` when the canvas or image has a
/// non-positive dimension.
#[must_use]
pub fn compose(
    canvas_width: u32,
    canvas_height: u32,
    base: &RgbaImage,
    mask: Option<&GrayImage>,
    prompts: &[PromptPoint],
    options: &ComposeOptions,
) -> Option<RgbaImage> {
    let transform = ViewTransform::fit(
        CanvasSize::new(f64::from(canvas_width), f64::from(canvas_height)),
        PixelSize::new(base.width(), base.height()),
    )?;

    let dest_w = (transform.dest.width.round() as u32).max(1);
    let dest_h = (transform.dest.height.round() as u32).max(1);
    let dest_x = transform.dest.x.round() as i64;
    let dest_y = transform.dest.y.round() as i64;

    let scaled = imageops::resize(base, dest_w, dest_h, FilterType::Triangle);

    let mut out = RgbaImage::from_pixel(canvas_width, canvas_height, Rgba([0, 0, 0, 255]));
    for (px, py, pixel) in scaled.enumerate_pixels() {
        let ox = dest_x + i64::from(px);
        let oy = dest_y + i64::from(py);
        if ox < 0 || oy < 0 || ox >= i64::from(canvas_width) || oy >= i64::from(canvas_height) {
            continue;
        }
        let included = mask.is_some_and(|m| mask_includes(m, px, py, dest_w, dest_h));
        let factor = if included { 1.0 } else { options.dim_factor };
        let [r, g, b, a] = pixel.0;
        out.put_pixel(
            ox as u32,
            oy as u32,
            Rgba([scale_channel(r, factor), scale_channel(g, factor), scale_channel(b, factor), a]),
        );
    }

    for prompt in prompts {
        let pos = transform.image_to_canvas(ImagePoint::new(prompt.x, prompt.y));
        let color = match prompt.label {
            PromptLabel::Foreground => options.foreground_color,
            PromptLabel::Background => options.background_color,
        };
        draw_disc(
            &mut out,
            pos.x,
            pos.y,
            options.marker_radius + 1.5,
            options.outline_color,
        );
        draw_disc(&mut out, pos.x, pos.y, options.marker_radius, color);
    }

    Some(out)
}

/// Nearest-neighbor lookup of the mask at a destination-rect pixel. The mask
/// resolution may differ from both the image and the destination rectangle.
fn mask_includes(mask: &GrayImage, px: u32, py: u32, dest_w: u32, dest_h: u32) -> bool {
    let mx = ((f64::from(px) + 0.5) / f64::from(dest_w) * f64::from(mask.width())) as u32;
    let my = ((f64::from(py) + 0.5) / f64::from(dest_h) * f64::from(mask.height())) as u32;
    let mx = mx.min(mask.width().saturating_sub(1));
    let my = my.min(mask.height().saturating_sub(1));
    mask.get_pixel(mx, my).0[0] != 0
}

fn scale_channel(value: u8, factor: f32) -> u8 {
    (f32::from(value) * factor).round().clamp(0.0, 255.0) as u8
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let r = (f64::from(dst[0]) * inv + f64::from(src[0]) * a)
        .round()
        .clamp(0.0, 255.0) as u8;
    let g = (f64::from(dst[1]) * inv + f64::from(src[1]) * a)
        .round()
        .clamp(0.0, 255.0) as u8;
    let b = (f64::from(dst[2]) * inv + f64::from(src[2]) * a)
        .round()
        .clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([r, g, b, out_a])
}

fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let max_x = img.width() as i32 - 1;
    let max_y = img.height() as i32 - 1;
    let min_x = ((cx - radius).floor() as i32).clamp(0, max_x);
    let hi_x = ((cx + radius).ceil() as i32).clamp(0, max_x);
    let min_y = ((cy - radius).floor() as i32).clamp(0, max_y);
    let hi_y = ((cy + radius).ceil() as i32).clamp(0, max_y);
    let r2 = radius * radius;
    for y in min_y..=hi_y {
        for x in min_x..=hi_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r2 {
                let dst = *img.get_pixel(x as u32, y as u32);
                img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_base(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
    }

    fn half_mask(w: u32, h: u32) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w / 2 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn mask_punches_out_dim_overlay() {
        let base = white_base(10, 10);
        let mask = half_mask(10, 10);
        let out = compose(10, 10, &base, Some(&mask), &[], &ComposeOptions::default()).unwrap();

        // Left half restored to full brightness, right half dimmed to 35%.
        assert_eq!(out.get_pixel(2, 5).0, [255, 255, 255, 255]);
        let dimmed = out.get_pixel(7, 5).0;
        assert_eq!(dimmed[0], 89);
        assert_eq!(dimmed[1], 89);
        assert_eq!(dimmed[2], 89);
    }

    #[test]
    fn without_mask_whole_dest_is_dimmed() {
        let base = white_base(8, 8);
        let out = compose(8, 8, &base, None, &[], &ComposeOptions::default()).unwrap();
        assert_eq!(out.get_pixel(4, 4).0[0], 89);
    }

    #[test]
    fn letterbox_margins_stay_black() {
        let base = white_base(10, 10);
        let out = compose(20, 10, &base, None, &[], &ComposeOptions::default()).unwrap();
        // Image occupies x in [5, 15); margins are canvas background.
        assert_eq!(out.get_pixel(0, 5).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(19, 5).0, [0, 0, 0, 255]);
        assert_ne!(out.get_pixel(10, 5).0, [0, 0, 0, 255]);
    }

    #[test]
    fn mask_at_different_resolution_is_resampled_nearest() {
        let base = white_base(10, 10);
        // 2x2 mask, only top-left quadrant included.
        let mut mask = GrayImage::new(2, 2);
        mask.put_pixel(0, 0, image::Luma([255]));
        let out = compose(10, 10, &base, Some(&mask), &[], &ComposeOptions::default()).unwrap();
        assert_eq!(out.get_pixel(2, 2).0[0], 255);
        assert_eq!(out.get_pixel(7, 2).0[0], 89);
        assert_eq!(out.get_pixel(2, 7).0[0], 89);
        assert_eq!(out.get_pixel(7, 7).0[0], 89);
    }

    #[test]
    fn prompt_markers_are_drawn_by_label() {
        let base = white_base(20, 20);
        let prompts = [
            PromptPoint::foreground(5.0, 5.0),
            PromptPoint::background(15.0, 15.0),
        ];
        let options = ComposeOptions {
            marker_radius: 2.0,
            ..Default::default()
        };
        let out = compose(20, 20, &base, None, &prompts, &options).unwrap();
        assert_eq!(out.get_pixel(5, 5).0, options.foreground_color.0);
        assert_eq!(out.get_pixel(15, 15).0, options.background_color.0);
    }

    #[test]
    fn compose_is_a_pure_function_of_its_inputs() {
        let base = white_base(12, 9);
        let mask = half_mask(12, 9);
        let prompts = [PromptPoint::foreground(3.0, 3.0)];
        let options = ComposeOptions::default();
        let first = compose(30, 20, &base, Some(&mask), &prompts, &options).unwrap();
        let second = compose(30, 20, &base, Some(&mask), &prompts, &options).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn degenerate_canvas_yields_none() {
        let base = white_base(10, 10);
        assert!(compose(0, 10, &base, None, &[], &ComposeOptions::default()).is_none());
        assert!(compose(10, 0, &base, None, &[], &ComposeOptions::default()).is_none());
    }
}
