//! Burn text labels into RGB frames with a built-in 5×7 bitmap font.

use image::{Rgb, RgbImage};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Horizontal gap between glyphs, in font pixels.
const GLYPH_SPACING: u32 = 1;

/// Label colour (green, as on the kiosk preview).
pub const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw `text` with its top-left corner at (`x`, `y`), each font pixel
/// scaled to a `scale`×`scale` block. Pixels outside the frame are clipped.
///
/// Letters are rendered upper-case; characters without a glyph leave a gap.
pub fn draw_text(frame: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + GLYPH_SPACING) * scale;

    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c.to_ascii_uppercase()) else {
            continue;
        };
        let origin_x = x.saturating_add(i as u32 * advance);
        if origin_x >= frame.width() {
            break;
        }
        for (gy, bits) in rows.iter().enumerate() {
            for gx in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - gx)) == 0 {
                    continue;
                }
                fill_block(frame, origin_x + gx * scale, y + gy as u32 * scale, scale, color);
            }
        }
    }
}

/// Pixel width of `text` when drawn at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    n * (GLYPH_WIDTH + GLYPH_SPACING) * scale.max(1)
}

fn fill_block(frame: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for py in y..y.saturating_add(size).min(frame.height()) {
        for px in x..x.saturating_add(size).min(frame.width()) {
            frame.put_pixel(px, py, color);
        }
    }
}

/// Row bitmaps (bit 4 = leftmost column) for the supported characters.
fn glyph(c: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '\'' => [0x04, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_pixels(img: &RgbImage) -> usize {
        img.pixels().filter(|p| **p == LABEL_COLOR).count()
    }

    #[test]
    fn test_draw_text_marks_pixels_near_origin() {
        let mut img = RgbImage::new(200, 100);
        draw_text(&mut img, 50, 50, "A1", 2, LABEL_COLOR);

        assert!(lit_pixels(&img) > 0);
        for (x, y, p) in img.enumerate_pixels() {
            if *p == LABEL_COLOR {
                assert!((50..50 + text_width("A1", 2)).contains(&x), "x={x}");
                assert!((50..50 + GLYPH_HEIGHT * 2).contains(&y), "y={y}");
            }
        }
    }

    #[test]
    fn test_lowercase_matches_uppercase() {
        let mut lower = RgbImage::new(64, 16);
        let mut upper = RgbImage::new(64, 16);
        draw_text(&mut lower, 0, 0, "kiosk", 1, LABEL_COLOR);
        draw_text(&mut upper, 0, 0, "KIOSK", 1, LABEL_COLOR);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_text_past_the_edge_is_clipped() {
        let mut img = RgbImage::new(20, 10);
        draw_text(&mut img, 15, 8, "2026-10-17 12:00:00", 3, LABEL_COLOR);
        assert!(lit_pixels(&img) <= 5 * 2);
    }

    #[test]
    fn test_unknown_glyph_leaves_gap() {
        let mut img = RgbImage::new(40, 10);
        draw_text(&mut img, 0, 0, "é", 1, LABEL_COLOR);
        assert_eq!(lit_pixels(&img), 0);
    }
}
