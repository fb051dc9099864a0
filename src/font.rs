//! Tiny 3x5 bitmap font for burning labels into frames.
//! Letters are rendered upper-case; unknown characters draw as a block.

use image::Rgb;

use crate::types::Frame;

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

/// Pixel width of `text` at `scale`, including one column of spacing per glyph.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale
}

pub fn text_height(scale: u32) -> u32 {
    GLYPH_H * scale
}

pub fn draw_text(frame: &mut Frame, x: u32, y: u32, text: &str, color: Rgb<u8>, scale: u32) {
    let mut cx = x;
    for c in text.chars() {
        draw_char(frame, cx, y, c, color, scale);
        cx = cx.saturating_add((GLYPH_W + 1) * scale);
    }
}

fn draw_char(frame: &mut Frame, x: u32, y: u32, c: char, color: Rgb<u8>, scale: u32) {
    let (width, height) = frame.dimensions();
    for (row, bits) in glyph(c).iter().enumerate() {
        for col in 0..GLYPH_W {
            if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let px = x + col * scale + dx;
                    let py = y + row as u32 * scale + dy;
                    if px < width && py < height {
                        frame.put_pixel(px, py, color);
                    }
                }
            }
        }
    }
}

/// Five rows, three bits each, most significant bit on the left.
fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [0x7, 0x5, 0x5, 0x5, 0x7],
        '1' => [0x2, 0x6, 0x2, 0x2, 0x7],
        '2' => [0x7, 0x1, 0x7, 0x4, 0x7],
        '3' => [0x7, 0x1, 0x7, 0x1, 0x7],
        '4' => [0x5, 0x5, 0x7, 0x1, 0x1],
        '5' => [0x7, 0x4, 0x7, 0x1, 0x7],
        '6' => [0x7, 0x4, 0x7, 0x5, 0x7],
        '7' => [0x7, 0x1, 0x2, 0x4, 0x4],
        '8' => [0x7, 0x5, 0x7, 0x5, 0x7],
        '9' => [0x7, 0x5, 0x7, 0x1, 0x7],
        'A' => [0x2, 0x5, 0x7, 0x5, 0x5],
        'B' => [0x6, 0x5, 0x6, 0x5, 0x6],
        'C' => [0x7, 0x4, 0x4, 0x4, 0x7],
        'D' => [0x6, 0x5, 0x5, 0x5, 0x6],
        'E' => [0x7, 0x4, 0x6, 0x4, 0x7],
        'F' => [0x7, 0x4, 0x6, 0x4, 0x4],
        'G' => [0x7, 0x4, 0x5, 0x5, 0x7],
        'H' => [0x5, 0x5, 0x7, 0x5, 0x5],
        'I' => [0x7, 0x2, 0x2, 0x2, 0x7],
        'J' => [0x1, 0x1, 0x1, 0x5, 0x7],
        'K' => [0x5, 0x5, 0x6, 0x5, 0x5],
        'L' => [0x4, 0x4, 0x4, 0x4, 0x7],
        'M' => [0x5, 0x7, 0x7, 0x5, 0x5],
        'N' => [0x6, 0x5, 0x5, 0x5, 0x5],
        'O' => [0x7, 0x5, 0x5, 0x5, 0x7],
        'P' => [0x7, 0x5, 0x7, 0x4, 0x4],
        'Q' => [0x7, 0x5, 0x5, 0x7, 0x1],
        'R' => [0x6, 0x5, 0x6, 0x5, 0x5],
        'S' => [0x3, 0x4, 0x2, 0x1, 0x6],
        'T' => [0x7, 0x2, 0x2, 0x2, 0x2],
        'U' => [0x5, 0x5, 0x5, 0x5, 0x7],
        'V' => [0x5, 0x5, 0x5, 0x5, 0x2],
        'W' => [0x5, 0x5, 0x7, 0x7, 0x5],
        'X' => [0x5, 0x5, 0x2, 0x5, 0x5],
        'Y' => [0x5, 0x5, 0x2, 0x2, 0x2],
        'Z' => [0x7, 0x1, 0x2, 0x4, 0x7],
        ' ' => [0x0, 0x0, 0x0, 0x0, 0x0],
        ':' => [0x0, 0x2, 0x0, 0x2, 0x0],
        '.' => [0x0, 0x0, 0x0, 0x0, 0x2],
        ',' => [0x0, 0x0, 0x0, 0x2, 0x4],
        '-' => [0x0, 0x0, 0x7, 0x0, 0x0],
        '_' => [0x0, 0x0, 0x0, 0x0, 0x7],
        '/' => [0x1, 0x1, 0x2, 0x4, 0x4],
        '%' => [0x5, 0x1, 0x2, 0x4, 0x5],
        '\'' => [0x2, 0x2, 0x0, 0x0, 0x0],
        '(' => [0x2, 0x4, 0x4, 0x4, 0x2],
        ')' => [0x2, 0x1, 0x1, 0x1, 0x2],
        _ => [0x7, 0x7, 0x7, 0x7, 0x7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("ABC", 1), 12);
        assert_eq!(text_width("ABC", 2), 24);
        assert_eq!(text_width("", 3), 0);
    }

    #[test]
    fn test_draw_text_clips_at_edges() {
        let mut frame = Frame::new(6, 4);
        draw_text(&mut frame, 4, 2, "HELLO", Rgb([255, 0, 0]), 2);
        // 'H' top-left pixel is set at (4, 2)
        assert_eq!(*frame.get_pixel(4, 2), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_space_draws_nothing() {
        let mut frame = Frame::new(8, 8);
        draw_text(&mut frame, 0, 0, "  ", Rgb([255, 255, 255]), 1);
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
