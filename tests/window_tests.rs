mod common;

use common::*;
use hrv_recovery::analysis::window::{SearchRegion, WindowClassification, WindowSelector};
use hrv_recovery::config::ArtifactConfig;
use hrv_recovery::preprocessing::artifacts::detect_artifacts;

#[test]
fn anti_persistent_recording_has_no_recovery_window() {
    init_logger();
    let series = anti_persistent(21, 40 * MINUTE_MS);
    let flags = detect_artifacts(&series, &ArtifactConfig::default());
    let selector = WindowSelector::default();

    assert_eq!(
        selector.find_best_window(&series, &flags, None, None).unwrap(),
        None
    );
    let search = selector
        .search(&series, &flags, &SearchRegion::full(&series))
        .unwrap();
    assert!(search.candidates_evaluated > 50);
    assert_eq!(search.organized_count, 0);
}

#[test]
fn organized_rhythm_yields_recovery_window() {
    init_logger();
    let series = organized_rhythm(4, 30 * MINUTE_MS);
    let flags = detect_artifacts(&series, &ArtifactConfig::default());
    let selector = WindowSelector::default();

    let window = selector
        .find_best_window(&series, &flags, None, None)
        .unwrap()
        .expect("an organized window");
    assert_eq!(window.classification, WindowClassification::OrganizedRecovery);
    let alpha1 = window.dfa_alpha1.unwrap();
    assert!((0.75..=1.0).contains(&alpha1), "alpha1 was {alpha1}");
    assert!(window.recovery_score.is_some());
    assert_eq!(window.end_ms - window.start_ms, 5 * MINUTE_MS);
}

#[test]
fn relative_position_matches_window_start() {
    let series = organized_rhythm(9, 60 * MINUTE_MS);
    let flags = detect_artifacts(&series, &ArtifactConfig::default());
    let (sleep, wake) = (10 * MINUTE_MS, 50 * MINUTE_MS);

    let window = WindowSelector::default()
        .find_best_window(&series, &flags, Some(sleep), Some(wake))
        .unwrap()
        .expect("an organized window");
    assert!(window.start_ms >= sleep);
    assert!(window.end_ms <= wake);

    let position = window.relative_position.unwrap();
    assert!((0.0..=1.0).contains(&position));
    let expected = (window.start_ms - sleep) as f64 / (wake - sleep) as f64;
    assert!((position - expected).abs() < 1e-12);
    assert_eq!(
        window.start_index,
        series.index_range(window.start_ms, window.end_ms).start
    );
    assert!(series.points()[window.start_index].t_ms >= window.start_ms);
}

#[test]
fn inverted_hints_search_whole_recording() {
    let series = organized_rhythm(9, 30 * MINUTE_MS);
    let flags = detect_artifacts(&series, &ArtifactConfig::default());
    let selector = WindowSelector::default();

    let unhinted = selector.find_best_window(&series, &flags, None, None).unwrap();
    let inverted = selector
        .find_best_window(&series, &flags, Some(20 * MINUTE_MS), Some(5 * MINUTE_MS))
        .unwrap();
    assert_eq!(unhinted, inverted);
}

#[test]
fn search_is_deterministic() {
    let (series, _) = night_with_recovery_segment(3);
    let flags = detect_artifacts(&series, &ArtifactConfig::default());
    let selector = WindowSelector::default();
    let region = SearchRegion::full(&series);

    let first = selector.search(&series, &flags, &region).unwrap();
    let second = selector.search(&series, &flags, &region).unwrap();
    assert_eq!(first, second);
}
