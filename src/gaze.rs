use crate::types::{CalibrationBaseline, GazeLabel, GazeSample, Landmarks};

// Face-mesh indices (iris-refined topology).
pub const LEFT_PUPIL: usize = 468;
pub const RIGHT_PUPIL: usize = 473;
pub const LEFT_EYE_INNER: usize = 33;
pub const LEFT_EYE_OUTER: usize = 133;
pub const RIGHT_EYE_INNER: usize = 362;
pub const RIGHT_EYE_OUTER: usize = 263;
pub const LEFT_EYE_TOP: usize = 159;
pub const LEFT_EYE_BOTTOM: usize = 145;
pub const RIGHT_EYE_TOP: usize = 386;
pub const RIGHT_EYE_BOTTOM: usize = 374;

/// Offsets beyond these (in ratio units) count as looking away.
/// Empirical; horizontal is checked first.
pub const HORIZONTAL_THRESHOLD: f32 = 0.07;
pub const VERTICAL_THRESHOLD: f32 = 0.06;

/// Computes (vertical, horizontal) pupil ratios averaged over both eyes.
///
/// Returns `None` when any of the ten landmarks is missing or an eye span is
/// degenerate. Callers treat `None` as "unknown", never as an error.
pub fn extract_ratios(landmarks: &Landmarks) -> Option<GazeSample> {
    let left_h = ratio(
        landmarks.get(LEFT_PUPIL)?.x,
        landmarks.get(LEFT_EYE_INNER)?.x,
        landmarks.get(LEFT_EYE_OUTER)?.x,
    )?;
    let right_h = ratio(
        landmarks.get(RIGHT_PUPIL)?.x,
        landmarks.get(RIGHT_EYE_INNER)?.x,
        landmarks.get(RIGHT_EYE_OUTER)?.x,
    )?;
    let left_v = ratio(
        landmarks.get(LEFT_PUPIL)?.y,
        landmarks.get(LEFT_EYE_TOP)?.y,
        landmarks.get(LEFT_EYE_BOTTOM)?.y,
    )?;
    let right_v = ratio(
        landmarks.get(RIGHT_PUPIL)?.y,
        landmarks.get(RIGHT_EYE_TOP)?.y,
        landmarks.get(RIGHT_EYE_BOTTOM)?.y,
    )?;

    Some(GazeSample {
        vertical: (left_v + right_v) / 2.0,
        horizontal: (left_h + right_h) / 2.0,
    })
}

fn ratio(value: f32, start: f32, end: f32) -> Option<f32> {
    let span = end - start;
    if span == 0.0 || !span.is_finite() {
        return None;
    }
    let r = (value - start) / span;
    r.is_finite().then_some(r)
}

/// Buckets a raw sample against a baseline. First match wins.
pub fn classify_sample(sample: GazeSample, baseline: &CalibrationBaseline) -> GazeLabel {
    let delta_v = sample.vertical - baseline.vertical;
    let delta_h = sample.horizontal - baseline.horizontal;

    if delta_h < -HORIZONTAL_THRESHOLD {
        GazeLabel::LookingLeft
    } else if delta_h > HORIZONTAL_THRESHOLD {
        GazeLabel::LookingRight
    } else if delta_v < -VERTICAL_THRESHOLD {
        GazeLabel::LookingDown
    } else if delta_v > VERTICAL_THRESHOLD {
        GazeLabel::LookingUp
    } else {
        GazeLabel::EyeContact
    }
}

/// Calibration-relative gaze classifier.
#[derive(Debug, Clone, Default)]
pub struct GazeClassifier {
    baseline: Option<CalibrationBaseline>,
}

impl GazeClassifier {
    pub fn new(baseline: Option<CalibrationBaseline>) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.baseline.as_ref()
    }

    /// Replaces the baseline wholesale.
    pub fn set_baseline(&mut self, baseline: Option<CalibrationBaseline>) {
        self.baseline = baseline;
    }

    pub fn classify(&self, landmarks: Option<&Landmarks>) -> GazeLabel {
        let Some(landmarks) = landmarks.filter(|l| !l.is_empty()) else {
            return GazeLabel::Unknown;
        };
        let Some(sample) = extract_ratios(landmarks) else {
            return GazeLabel::Unknown;
        };
        match &self.baseline {
            Some(baseline) => classify_sample(sample, baseline),
            None => GazeLabel::Unknown,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Point3D;

    /// Builds a 478-point face whose eyes yield exactly the given ratios.
    pub(crate) fn face_with_ratios(vertical: f32, horizontal: f32) -> Landmarks {
        let mut points = vec![Point3D::new(0.5, 0.5); 478];
        // Left eye spans x 0.30..0.40, y 0.40..0.44
        points[LEFT_EYE_INNER] = Point3D::new(0.30, 0.42);
        points[LEFT_EYE_OUTER] = Point3D::new(0.40, 0.42);
        points[LEFT_EYE_TOP] = Point3D::new(0.35, 0.40);
        points[LEFT_EYE_BOTTOM] = Point3D::new(0.35, 0.44);
        points[LEFT_PUPIL] = Point3D::new(0.30 + 0.10 * horizontal, 0.40 + 0.04 * vertical);
        // Right eye spans x 0.60..0.70
        points[RIGHT_EYE_INNER] = Point3D::new(0.60, 0.42);
        points[RIGHT_EYE_OUTER] = Point3D::new(0.70, 0.42);
        points[RIGHT_EYE_TOP] = Point3D::new(0.65, 0.40);
        points[RIGHT_EYE_BOTTOM] = Point3D::new(0.65, 0.44);
        points[RIGHT_PUPIL] = Point3D::new(0.60 + 0.10 * horizontal, 0.40 + 0.04 * vertical);
        Landmarks::new(points)
    }

    fn centered() -> CalibrationBaseline {
        CalibrationBaseline::new(0.5, 0.5)
    }

    #[test]
    fn test_extract_ratios_averages_both_eyes() {
        let face = face_with_ratios(0.25, 0.75);
        let sample = extract_ratios(&face).expect("ratios");
        assert!((sample.vertical - 0.25).abs() < 1e-4, "vertical {}", sample.vertical);
        assert!((sample.horizontal - 0.75).abs() < 1e-4, "horizontal {}", sample.horizontal);
    }

    #[test]
    fn test_extract_ratios_missing_any_required_point() {
        let required = [
            LEFT_PUPIL,
            RIGHT_PUPIL,
            LEFT_EYE_INNER,
            LEFT_EYE_OUTER,
            RIGHT_EYE_INNER,
            RIGHT_EYE_OUTER,
            LEFT_EYE_TOP,
            LEFT_EYE_BOTTOM,
            RIGHT_EYE_TOP,
            RIGHT_EYE_BOTTOM,
        ];
        for idx in required {
            // Truncating just below the index removes it (and everything after)
            let mut face = face_with_ratios(0.5, 0.5);
            face.points.truncate(idx);
            assert!(extract_ratios(&face).is_none(), "index {} missing should yield None", idx);
        }
        // 468-point mesh without iris refinement has no pupils
        let mut face = face_with_ratios(0.5, 0.5);
        face.points.truncate(468);
        assert!(extract_ratios(&face).is_none());
    }

    #[test]
    fn test_extract_ratios_degenerate_span() {
        let mut face = face_with_ratios(0.5, 0.5);
        face.points[LEFT_EYE_OUTER].x = face.points[LEFT_EYE_INNER].x;
        assert!(extract_ratios(&face).is_none());

        let mut face = face_with_ratios(0.5, 0.5);
        face.points[RIGHT_EYE_BOTTOM].y = face.points[RIGHT_EYE_TOP].y;
        assert!(extract_ratios(&face).is_none());
    }

    #[test]
    fn test_classify_without_baseline_is_unknown() {
        let classifier = GazeClassifier::new(None);
        for (v, h) in [(0.5, 0.5), (0.0, 1.0), (0.9, 0.1)] {
            assert_eq!(classifier.classify(Some(&face_with_ratios(v, h))), GazeLabel::Unknown);
        }
    }

    #[test]
    fn test_classify_without_landmarks_is_unknown() {
        let classifier = GazeClassifier::new(Some(centered()));
        assert_eq!(classifier.classify(None), GazeLabel::Unknown);
        assert_eq!(classifier.classify(Some(&Landmarks::default())), GazeLabel::Unknown);
    }

    #[test]
    fn test_classify_directions() {
        let classifier = GazeClassifier::new(Some(centered()));
        let cases = [
            (0.5, 0.5, GazeLabel::EyeContact),
            (0.5, 0.40, GazeLabel::LookingLeft),
            (0.5, 0.60, GazeLabel::LookingRight),
            (0.40, 0.5, GazeLabel::LookingDown),
            (0.60, 0.5, GazeLabel::LookingUp),
            (0.55, 0.55, GazeLabel::EyeContact),
            (0.45, 0.45, GazeLabel::EyeContact),
        ];
        for (v, h, expected) in cases {
            assert_eq!(
                classifier.classify(Some(&face_with_ratios(v, h))),
                expected,
                "v={} h={}",
                v,
                h
            );
        }
    }

    #[test]
    fn test_horizontal_wins_over_vertical() {
        let baseline = centered();
        let sample = GazeSample { vertical: 0.9, horizontal: 0.1 };
        assert_eq!(classify_sample(sample, &baseline), GazeLabel::LookingLeft);
        let sample = GazeSample { vertical: 0.1, horizontal: 0.9 };
        assert_eq!(classify_sample(sample, &baseline), GazeLabel::LookingRight);
    }

    #[test]
    fn test_eye_contact_iff_within_both_thresholds() {
        let baseline = CalibrationBaseline::new(0.3, 0.6);
        let steps = [-0.2f32, -0.08, -0.065, -0.05, 0.0, 0.05, 0.065, 0.08, 0.2];
        for dv in steps {
            for dh in steps {
                let sample = GazeSample {
                    vertical: baseline.vertical + dv,
                    horizontal: baseline.horizontal + dh,
                };
                let inside = dh.abs() <= HORIZONTAL_THRESHOLD && dv.abs() <= VERTICAL_THRESHOLD;
                let label = classify_sample(sample, &baseline);
                assert_eq!(
                    label == GazeLabel::EyeContact,
                    inside,
                    "dv={} dh={} gave {}",
                    dv,
                    dh,
                    label
                );
            }
        }
    }

    #[test]
    fn test_calibrated_offset_baseline() {
        // A user whose resting gaze sits off-centre still gets Eye Contact
        let classifier = GazeClassifier::new(Some(CalibrationBaseline::new(0.62, 0.38)));
        assert_eq!(classifier.classify(Some(&face_with_ratios(0.62, 0.38))), GazeLabel::EyeContact);
        assert_eq!(classifier.classify(Some(&face_with_ratios(0.62, 0.5))), GazeLabel::LookingRight);
    }
}
