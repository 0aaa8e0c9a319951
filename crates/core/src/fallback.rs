//! Results computed locally from the collected samples, used when the backend has
//! nothing better to offer.

use crate::types::{AnalysisReport, EmotionSample, FrameSample, GazePoint};

/// Builds a gaze report from the session's frame samples.
///
/// Only frames without error and with at least one detected eye are analysed,
/// but the ratio in the summary is over every sample collected.
pub fn gaze_fallback(frames: &[FrameSample]) -> AnalysisReport {
    let total = frames.len();
    if total == 0 {
        return AnalysisReport::failed("No gaze data collected");
    }

    let valid: Vec<&FrameSample> = frames.iter().filter(|f| f.is_valid()).collect();
    let ratio = format!("{}/{} frames with eye detections", valid.len(), total);
    if valid.is_empty() {
        return AnalysisReport {
            summary: Some(format!("Local gaze analysis: {ratio}.")),
            error: Some("No valid frames with eye detections".to_string()),
            ..AnalysisReport::default()
        };
    }

    let share = valid.len() as f64 / total as f64 * 100.0;
    let average_eyes =
        valid.iter().filter_map(|f| f.eye_count).sum::<u32>() as f64 / valid.len() as f64;
    let points: Vec<GazePoint> = valid
        .iter()
        .filter_map(|f| f.gaze_points.as_ref())
        .flatten()
        .copied()
        .collect();

    let summary = format!("Local gaze analysis: {ratio} ({share:.1}%).");
    let (stats, interpretation) = match GazeSpread::of(&points) {
        Some(spread) => (
            format!(
                "Average eyes detected per valid frame: {average_eyes:.2}. \
                 Gaze centroid: ({:.3}, {:.3}). \
                 Gaze range: x {:.3}-{:.3}, y {:.3}-{:.3}. \
                 Gaze stability: {:.3}.",
                spread.centroid.x,
                spread.centroid.y,
                spread.min.x,
                spread.max.x,
                spread.min.y,
                spread.max.y,
                spread.stability,
            ),
            format!(
                "Gaze pattern suggests {}. Computed locally because the server report was unavailable.",
                attention_level(spread.stability)
            ),
        ),
        None => (
            format!(
                "Average eyes detected per valid frame: {average_eyes:.2}. No gaze points reported."
            ),
            "Eyes were detected but no gaze direction could be estimated.".to_string(),
        ),
    };

    AnalysisReport {
        summary: Some(summary),
        stats: Some(stats),
        interpretation: Some(interpretation),
        error: None,
    }
}

/// The most recent emotion sample without error, newest first.
pub fn latest_emotion(samples: &[EmotionSample]) -> AnalysisReport {
    samples
        .iter()
        .rev()
        .find(|s| s.error.is_none())
        .map(|s| AnalysisReport {
            summary: s.summary.clone(),
            stats: s.stats.clone(),
            interpretation: s.interpretation.clone(),
            error: None,
        })
        .unwrap_or_else(|| AnalysisReport::failed("No valid emotion data collected"))
}

fn attention_level(stability: f64) -> &'static str {
    if stability < 0.05 {
        "highly focused attention"
    } else if stability < 0.1 {
        "normal engagement"
    } else {
        "active visual exploration"
    }
}

struct GazeSpread {
    centroid: GazePoint,
    min: GazePoint,
    max: GazePoint,
    /// Mean of the x and y population standard deviations.
    stability: f64,
}

impl GazeSpread {
    fn of(points: &[GazePoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let centroid = GazePoint {
            x: points.iter().map(|p| p.x).sum::<f64>() / n,
            y: points.iter().map(|p| p.y).sum::<f64>() / n,
        };
        let (min, max) = points
            .iter()
            .fold((points[0], points[0]), |(min, max), p| {
                (
                    GazePoint {
                        x: min.x.min(p.x),
                        y: min.y.min(p.y),
                    },
                    GazePoint {
                        x: max.x.max(p.x),
                        y: max.y.max(p.y),
                    },
                )
            });
        let std_x = (points.iter().map(|p| (p.x - centroid.x).powi(2)).sum::<f64>() / n).sqrt();
        let std_y = (points.iter().map(|p| (p.y - centroid.y).powi(2)).sum::<f64>() / n).sqrt();

        Some(Self {
            centroid,
            min,
            max,
            stability: (std_x + std_y) / 2.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmotionAnalysis, GazeAnalysis, SessionId};
    use chrono::Utc;

    fn frame(eyes: u32, points: Vec<(f64, f64)>) -> FrameSample {
        FrameSample::success(
            SessionId::from("s"),
            Utc::now(),
            GazeAnalysis {
                eye_count: eyes,
                gaze_points: points.into_iter().map(|(x, y)| GazePoint { x, y }).collect(),
                error: None,
            },
        )
    }

    #[test]
    fn ratio_counts_every_sample() {
        let mut frames: Vec<FrameSample> = (0..4).map(|_| frame(2, vec![(0.5, 0.5)])).collect();
        frames.extend((0..3).map(|_| frame(0, vec![])));
        frames.extend(
            (0..3).map(|_| FrameSample::failure(SessionId::from("s"), Utc::now(), "timeout", None)),
        );

        let report = gaze_fallback(&frames);

        assert!(report.error.is_none());
        assert!(report.summary.unwrap().contains("4/10 frames with eye detections"));
        assert!(report.interpretation.unwrap().contains("highly focused"));
    }

    #[test]
    fn scattered_gaze_reads_as_exploration() {
        let frames = vec![frame(2, vec![(0.1, 0.1), (0.9, 0.9)])];

        let report = gaze_fallback(&frames);

        let stats = report.stats.unwrap();
        assert!(stats.contains("Gaze centroid: (0.500, 0.500)"), "{stats}");
        assert!(stats.contains("Average eyes detected per valid frame: 2.00"));
        assert!(report.interpretation.unwrap().contains("active visual exploration"));
    }

    #[test]
    fn no_samples_is_an_explicit_error() {
        let report = gaze_fallback(&[]);
        assert_eq!(report.error.as_deref(), Some("No gaze data collected"));
        assert!(report.summary.is_none());
    }

    #[test]
    fn only_invalid_samples_is_an_error_with_the_ratio() {
        let frames = vec![frame(0, vec![]), frame(0, vec![])];
        let report = gaze_fallback(&frames);
        assert_eq!(report.error.as_deref(), Some("No valid frames with eye detections"));
        assert!(report.summary.unwrap().contains("0/2 frames"));
    }

    #[test]
    fn newest_clean_emotion_sample_wins() {
        let id = SessionId::from("s");
        let analysis = |summary: &str| EmotionAnalysis {
            summary: summary.into(),
            stats: String::new(),
            interpretation: String::new(),
        };
        let samples = vec![
            EmotionSample::success(id.clone(), Utc::now(), analysis("older")),
            EmotionSample::success(id.clone(), Utc::now(), analysis("newer")),
            EmotionSample::failure(id, Utc::now(), "timeout", None),
        ];

        let report = latest_emotion(&samples);

        assert_eq!(report.summary.as_deref(), Some("newer"));
        assert!(report.error.is_none());
    }

    #[test]
    fn no_clean_emotion_sample_is_an_explicit_error() {
        let samples = vec![EmotionSample::failure(
            SessionId::from("s"),
            Utc::now(),
            "timeout",
            None,
        )];
        assert_eq!(
            latest_emotion(&samples).error.as_deref(),
            Some("No valid emotion data collected")
        );
    }
}
