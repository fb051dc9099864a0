//! Burns the per-frame labels into the image for whoever displays it.

use image::Rgb;

use crate::font::{draw_text, text_height, text_width};
use crate::types::{BoundingBox, FocusState, Frame, FrameLabels};

const FOCUSED: Rgb<u8> = Rgb([0, 220, 0]);
const DISTRACTED: Rgb<u8> = Rgb([230, 30, 30]);
const TEXT: Rgb<u8> = Rgb([255, 255, 0]);
const SCALE: u32 = 2;
const MARGIN: u32 = 8;

pub fn focus_color(focus: FocusState) -> Rgb<u8> {
    match focus {
        FocusState::Focused => FOCUSED,
        FocusState::Distracted => DISTRACTED,
    }
}

/// Face box, emotion above it, gaze and focus lines in the top-left corner.
/// The emotion label is shifted left when it would run off the frame.
pub fn annotate(frame: &mut Frame, labels: &FrameLabels, face: Option<BoundingBox>) {
    let color = focus_color(labels.focus);
    let line = text_height(SCALE) + SCALE * 2;

    if let Some(bbox) = face {
        draw_rect(frame, bbox, color, 2);
        let y = bbox.y.saturating_sub(line);
        let room = frame.width().saturating_sub(text_width(&labels.emotion, SCALE));
        draw_text(frame, bbox.x.min(room), y, &labels.emotion, TEXT, SCALE);
    }

    draw_text(frame, MARGIN, MARGIN, &format!("GAZE: {}", labels.gaze), TEXT, SCALE);
    draw_text(frame, MARGIN, MARGIN + line, &format!("FOCUS: {}", labels.focus), color, SCALE);
}

pub fn draw_rect(frame: &mut Frame, bbox: BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (fw, fh) = frame.dimensions();
    if bbox.width == 0 || bbox.height == 0 {
        return;
    }
    let x1 = (bbox.x + bbox.width).min(fw);
    let y1 = (bbox.y + bbox.height).min(fh);
    for y in bbox.y..y1 {
        for x in bbox.x..x1 {
            let edge = x < bbox.x + thickness
                || x + thickness >= x1
                || y < bbox.y + thickness
                || y + thickness >= y1;
            if edge {
                frame.put_pixel(x, y, color);
            }
        }
    }
}
