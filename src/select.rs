//! Best-result selection and confidence display.
//!
//! Selection orders candidates by `(confidence or 0.0, text length)` and
//! keeps the maximum. Among candidates with equal keys the one enumerated
//! first wins, so repeated runs over the same results pick the same winner.
//!
//! Confidences stay in each backend's native scale everywhere except
//! [`display_confidence`], which is presentation-only.

use std::cmp::Ordering;

/// Anything that can compete for a run's summary.
pub trait Candidate {
    fn confidence(&self) -> Option<f64>;
    fn text(&self) -> &str;
}

/// Confidence used for ranking. NaN and infinities count as absent.
fn ranking_confidence<C: Candidate + ?Sized>(c: &C) -> f64 {
    c.confidence().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn key_cmp<C: Candidate + ?Sized>(a: &C, b: &C) -> Ordering {
    let ca = ranking_confidence(a);
    let cb = ranking_confidence(b);
    ca.total_cmp(&cb)
        .then_with(|| a.text().chars().count().cmp(&b.text().chars().count()))
}

/// Pick the best candidate, or `None` when there are none.
pub fn select_best<C: Candidate>(candidates: &[C]) -> Option<&C> {
    let mut iter = candidates.iter();
    let mut best = iter.next()?;
    for candidate in iter {
        if key_cmp(candidate, best) == Ordering::Greater {
            best = candidate;
        }
    }
    Some(best)
}

/// Normalise a raw confidence onto a percentage for display.
///
/// Values on a 0–1 scale are multiplied by 100; larger values are assumed to
/// be percentages already and are capped at 100.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw <= 1.0 {
        raw * 100.0
    } else {
        raw.min(100.0)
    }
}

/// Format a raw confidence as `"NN.NN%"`, or `None` when absent.
pub fn display_confidence(raw: Option<f64>) -> Option<String> {
    raw.map(|c| format!("{:.2}%", normalize_confidence(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Obs {
        id: u32,
        text: String,
        confidence: Option<f64>,
    }

    impl Candidate for Obs {
        fn confidence(&self) -> Option<f64> {
            self.confidence
        }
        fn text(&self) -> &str {
            &self.text
        }
    }

    fn obs(id: u32, text: &str, confidence: Option<f64>) -> Obs {
        Obs {
            id,
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn empty_selects_nothing() {
        let none: Vec<Obs> = vec![];
        assert!(select_best(&none).is_none());
    }

    #[test]
    fn single_result_is_selected() {
        let with = [obs(1, "abc", Some(0.4))];
        let without = [obs(2, "", None)];
        assert_eq!(select_best(&with).map(|o| o.id), Some(1));
        assert_eq!(select_best(&without).map(|o| o.id), Some(2));
    }

    #[test]
    fn higher_confidence_wins() {
        let results = [
            obs(1, "a long transcription", Some(71.0)),
            obs(2, "short", Some(92.5)),
            obs(3, "unscored but very very long", None),
        ];
        assert_eq!(select_best(&results).map(|o| o.id), Some(2));
    }

    #[test]
    fn longer_text_breaks_confidence_ties() {
        let results = [obs(1, "abc", Some(80.0)), obs(2, "abcdef", Some(80.0))];
        assert_eq!(select_best(&results).map(|o| o.id), Some(2));
    }

    #[test]
    fn missing_confidence_counts_as_zero() {
        let results = [obs(1, "abcdef", None), obs(2, "a", Some(0.0))];
        // Same confidence key; longer text wins.
        assert_eq!(select_best(&results).map(|o| o.id), Some(1));
    }

    #[test]
    fn full_ties_keep_first_enumerated() {
        let results = [
            obs(1, "same", Some(50.0)),
            obs(2, "same", Some(50.0)),
            obs(3, "same", Some(50.0)),
        ];
        assert_eq!(select_best(&results).map(|o| o.id), Some(1));
    }

    #[test]
    fn permutations_with_distinct_keys_agree() {
        let base = vec![
            obs(1, "aa", Some(10.0)),
            obs(2, "aaaa", Some(10.0)),
            obs(3, "a", Some(40.0)),
            obs(4, "aaaaaa", None),
        ];
        let expected = select_best(&base).map(|o| o.id);
        assert_eq!(expected, Some(3));

        let mut rotated = base.clone();
        for _ in 0..base.len() {
            rotated.rotate_left(1);
            assert_eq!(select_best(&rotated).map(|o| o.id), expected);
        }
        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(select_best(&reversed).map(|o| o.id), expected);
    }

    #[test]
    fn non_finite_confidence_counts_as_absent() {
        let results = [
            obs(1, "nan", Some(f64::NAN)),
            obs(2, "scored", Some(12.0)),
            obs(3, "infinite", Some(f64::INFINITY)),
        ];
        assert_eq!(select_best(&results).map(|o| o.id), Some(2));

        // With nothing finite, length decides.
        let results = [obs(1, "ab", Some(f64::NAN)), obs(2, "abc", None)];
        assert_eq!(select_best(&results).map(|o| o.id), Some(2));
    }

    #[test]
    fn display_normalisation() {
        assert_eq!(display_confidence(Some(0.87)).as_deref(), Some("87.00%"));
        assert_eq!(display_confidence(Some(95.2)).as_deref(), Some("95.20%"));
        assert_eq!(display_confidence(Some(150.0)).as_deref(), Some("100.00%"));
        assert_eq!(display_confidence(None), None);
    }

    #[test]
    fn normalisation_does_not_affect_selection() {
        // 0.9 displays as 90% but compares as 0.9 against a raw 45.0.
        let results = [obs(1, "x", Some(0.9)), obs(2, "x", Some(45.0))];
        assert_eq!(select_best(&results).map(|o| o.id), Some(2));
    }
}
