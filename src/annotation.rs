use crate::detection::BoundingBox;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const GLYPH_SIZE: i32 = 8;
const LABEL_MARGIN: i32 = 2;

/// Draws the bounding box and its text label onto the frame in place. The
/// label sits above the box's top-left corner, or just inside the box when
/// there is no room above. Coordinates outside the frame are clipped, never
/// rejected.
pub fn annotate(frame: &mut RgbImage, bbox: &BoundingBox, label: &str) {
    draw_box(frame, bbox);

    let x = bbox.xmin as i32;
    let mut y = bbox.ymin as i32 - GLYPH_SIZE - LABEL_MARGIN;
    if y < 0 {
        y = bbox.ymin as i32 + LABEL_MARGIN;
    }
    draw_label(frame, x, y, label);
}

fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox) {
    let xmin = bbox.xmin.min(frame.width()) as i32;
    let ymin = bbox.ymin.min(frame.height()) as i32;
    let xmax = bbox.xmax.min(frame.width()) as i32;
    let ymax = bbox.ymax.min(frame.height()) as i32;

    // Two nested hollow rectangles give a 2-pixel border.
    for inset in 0..2 {
        let w = xmax - xmin - 2 * inset;
        let h = ymax - ymin - 2 * inset;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(xmin + inset, ymin + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(frame, rect, BOX_COLOR);
    }
}

fn draw_label(frame: &mut RgbImage, mut x: i32, y: i32, text: &str) {
    let width = frame.width() as i32;
    let height = frame.height() as i32;

    for ch in text.chars() {
        if let Some(glyph) = BASIC_FONTS.get(ch) {
            for (row, bits) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..8 {
                    if (bits >> col) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *frame.get_pixel_mut(px as u32, py as u32) = BOX_COLOR;
                        }
                    }
                }
            }
        }
        x += GLYPH_SIZE;
        if x >= width {
            break;
        }
    }
}
