//! Drawing of detection results onto frames.

use crate::face::FaceAnnotation;
use crate::hand::{HandAnnotation, LandmarkIdx, CONNECTIVITY};
use crate::image::draw::{self, FontSize};
use crate::image::{Color, Image};
use crate::system::Annotations;

const FACE_COLOR: Color = Color::GREEN;
const FACE_STROKE_WIDTH: u32 = 2;
const EMOTION_COLOR: Color = Color::BLUE;
/// Distance between the emotion label's baseline and the top of the face box.
const EMOTION_OFFSET: i32 = 10;

const LANDMARK_COLOR: Color = Color::RED;
const SKELETON_COLOR: Color = Color::WHITE;
const HAND_LABEL_COLOR: Color = Color::RED;
/// Offset of the hand label from the wrist landmark.
const HAND_LABEL_OFFSET: (i32, i32) = (-20, -20);

/// Draws all `annotations` onto `frame`.
///
/// With nothing to draw, `frame` is left untouched.
pub fn annotate(frame: &mut Image, annotations: &Annotations) {
    for face in &annotations.faces {
        draw_face(frame, face);
    }
    for hand in &annotations.hands {
        draw_hand(frame, hand);
    }
}

fn draw_face(frame: &mut Image, face: &FaceAnnotation) {
    draw::rect(frame, face.rect)
        .color(FACE_COLOR)
        .stroke_width(FACE_STROKE_WIDTH);

    if let Some(emotion) = &face.emotion {
        let (x, y, _, _) = face.rect.to_pixels();
        let label = emotion.to_string();
        draw::text(frame, x, y - EMOTION_OFFSET, &label)
            .color(EMOTION_COLOR)
            .font(FontSize::Large)
            .align_left()
            .align_bottom();
    }
}

fn draw_hand(frame: &mut Image, hand: &HandAnnotation) {
    let res = frame.resolution();
    let pixel = |idx| hand.landmarks.pixel_position(idx, res);

    for &(a, b) in CONNECTIVITY {
        let ((ax, ay), (bx, by)) = (pixel(a), pixel(b));
        draw::line(frame, ax, ay, bx, by)
            .color(SKELETON_COLOR)
            .stroke_width(2);
    }
    for lm in hand.landmarks.iter() {
        let x = (lm.x() * res.width() as f32) as i32;
        let y = (lm.y() * res.height() as f32) as i32;
        draw::marker(frame, x, y).color(LANDMARK_COLOR);
    }

    let (wx, wy) = pixel(LandmarkIdx::Wrist);
    let label = hand.label().to_string();
    draw::text(
        frame,
        wx + HAND_LABEL_OFFSET.0,
        wy + HAND_LABEL_OFFSET.1,
        &label,
    )
    .color(HAND_LABEL_COLOR)
    .font(FontSize::Large)
    .align_left()
    .align_bottom();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{Emotion, EmotionLabel};
    use crate::hand::HandLandmarks;
    use crate::image::Rect;

    fn count(frame: &Image, color: Color) -> usize {
        (0..frame.height())
            .flat_map(|y| (0..frame.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.get(x, y) == color)
            .count()
    }

    fn face(emotion: Option<EmotionLabel>) -> FaceAnnotation {
        FaceAnnotation {
            rect: Rect::from_top_left(40.0, 50.0, 30.0, 30.0),
            emotion,
        }
    }

    #[test]
    fn empty_annotations_leave_frame_untouched() {
        let mut frame = Image::new(32, 32);
        frame.set(3, 4, Color::WHITE);
        let before = frame.clone();
        annotate(&mut frame, &Annotations::default());
        assert!(frame == before);
    }

    #[test]
    fn face_box_is_green_and_two_pixels_wide() {
        let mut frame = Image::new(128, 128);
        let annotations = Annotations {
            faces: vec![face(None)],
            hands: Vec::new(),
        };
        annotate(&mut frame, &annotations);

        assert_eq!(frame.get(40, 50), FACE_COLOR);
        assert_eq!(frame.get(41, 51), FACE_COLOR);
        assert_ne!(frame.get(42, 52), FACE_COLOR);
        assert_eq!(frame.get(69, 79), FACE_COLOR);
        assert_eq!(count(&frame, EMOTION_COLOR), 0);
    }

    #[test]
    fn emotion_label_is_drawn_above_the_box() {
        let mut frame = Image::new(128, 128);
        let annotations = Annotations {
            faces: vec![face(Some(EmotionLabel::Detected(Emotion::Happy)))],
            hands: Vec::new(),
        };
        annotate(&mut frame, &annotations);

        let label_pixels = (0..frame.height())
            .flat_map(|y| (0..frame.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.get(x, y) == EMOTION_COLOR)
            .collect::<Vec<_>>();
        assert!(!label_pixels.is_empty());
        assert!(label_pixels.iter().all(|&(x, y)| x >= 40 && y <= 40));
    }

    #[test]
    fn hand_skeleton_and_label() {
        let mut positions = [[0.5, 0.5, 0.0]; 21];
        positions[LandmarkIdx::MiddleFingerTip as usize] = [0.5, 0.25, 0.0];
        let hand = HandAnnotation::new(HandLandmarks::from_positions(positions));

        let mut frame = Image::new(200, 200);
        let annotations = Annotations {
            faces: Vec::new(),
            hands: vec![hand],
        };
        annotate(&mut frame, &annotations);

        assert!(count(&frame, SKELETON_COLOR) > 0);
        assert_eq!(frame.get(100, 100), LANDMARK_COLOR);
        // The label ends 20 pixels above the wrist at (100, 100), below the fingertip marker.
        let label_pixels = (55..=80)
            .flat_map(|y| (0..200).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.get(x, y) == HAND_LABEL_COLOR)
            .count();
        assert!(label_pixels > 0);
    }
}
