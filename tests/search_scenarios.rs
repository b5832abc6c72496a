mod common;

use common::{CountingScorer, FailingScorer, NoisyScorer, WeightScorer, gene_names};
use gsdecomp::config::{EvaluationPolicy, SearchConfig};
use gsdecomp::decide::GenerationMode;
use gsdecomp::pipeline::{SearchError, SearchRun};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn config(seed: u64) -> SearchConfig {
    SearchConfig {
        n_subsets: 5,
        exploration_ratio: 0.4,
        seed: Some(seed),
        threads: Some(2),
        ..SearchConfig::default()
    }
}

fn record_lines(dir: &Path, k: usize) -> Vec<String> {
    fs::read_to_string(dir.join(format!("scores_{k:03}.txt")))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn all_records(dir: &Path, n: usize) -> Vec<String> {
    (1..=n)
        .map(|k| fs::read_to_string(dir.join(format!("scores_{k:03}.txt"))).unwrap())
        .collect()
}

#[test]
fn five_features_are_enumerated_exhaustively() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("five", gene_names(5), dir.path()).unwrap();
    let summary = run.execute(&WeightScorer, &config(1)).unwrap();

    let counts: Vec<usize> = summary.iterations.iter().map(|it| it.candidates).collect();
    assert_eq!(counts, vec![5, 10, 10, 5, 1]);
    assert!(
        summary
            .iterations
            .iter()
            .all(|it| it.mode == GenerationMode::Exhaustive && !it.resumed)
    );

    for (k, expected) in [(1, 5), (2, 10), (3, 10), (4, 5), (5, 1)] {
        let lines = record_lines(dir.path(), k);
        assert_eq!(lines.len(), expected);
        for line in &lines {
            let (features, score) = line.split_once('\t').unwrap();
            assert_eq!(features.split(',').count(), k);
            assert_eq!(score.split_once('.').unwrap().1.len(), 3);
        }
    }
    let full = gene_names(5).iter().map(|g| common::weight(g)).sum::<f64>() / 5.0;
    assert_eq!(
        record_lines(dir.path(), 5),
        vec![format!("G00,G01,G02,G03,G04\t{full:.3}")]
    );
}

#[test]
fn middle_iterations_of_a_larger_universe_are_heuristic() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("eight", gene_names(8), dir.path()).unwrap();
    let summary = run.execute(&WeightScorer, &config(2)).unwrap();

    let modes: Vec<GenerationMode> = summary.iterations.iter().map(|it| it.mode).collect();
    use GenerationMode::{Exhaustive, Heuristic};
    assert_eq!(
        modes,
        vec![Exhaustive, Exhaustive, Exhaustive, Heuristic, Heuristic, Heuristic, Exhaustive, Exhaustive]
    );
    assert_eq!(summary.iterations[2].candidates, 56);

    // 5 elites + 2 exploration subsets, each grown by one of the remaining features.
    for k in 4..=6 {
        let it = &summary.iterations[k - 1];
        assert!(it.candidates <= 7 * (8 - k + 1), "iteration {k}: {}", it.candidates);
        let lines = record_lines(dir.path(), k);
        assert_eq!(lines.len(), it.candidates);
        let mut distinct = lines.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), lines.len());
    }
    assert_eq!(summary.iterations[6].candidates, 8);
    assert_eq!(summary.iterations[7].candidates, 1);
}

#[test]
fn interrupted_runs_resume_without_rescoring() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("resume", gene_names(8), dir.path()).unwrap();

    let crashing = FailingScorer {
        inner: WeightScorer,
        fails: |subset| subset.len() == 4,
    };
    let err = run.execute(&crashing, &config(9)).unwrap_err();
    assert!(matches!(
        err,
        SearchError::Evaluation { ref run, iteration: 4, .. } if run == "resume"
    ));
    assert!(dir.path().join("scores_003.txt").exists());
    assert!(!dir.path().join("scores_004.txt").exists());

    // A temporary file left by a killed writer must not be mistaken for a record.
    fs::write(dir.path().join("scores_004.txt.tmp"), "G00,G01\t0.").unwrap();

    let counting = CountingScorer::new(WeightScorer);
    let summary = run.execute(&counting, &config(9)).unwrap();
    for k in 1..=3 {
        assert_eq!(counting.calls_for_size(k), 0, "size {k} was rescored");
        assert!(summary.iterations[k - 1].resumed);
    }
    assert!(counting.calls_for_size(4) > 0);
    assert!(!summary.iterations[3].resumed);
    assert!(!dir.path().join("scores_004.txt.tmp").exists());

    let fresh = tempdir().unwrap();
    SearchRun::new("resume", gene_names(8), fresh.path())
        .unwrap()
        .execute(&WeightScorer, &config(9))
        .unwrap();
    assert_eq!(all_records(dir.path(), 8), all_records(fresh.path(), 8));
}

#[test]
fn completed_runs_are_not_rescored() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("done", gene_names(6), dir.path()).unwrap();
    run.execute(&WeightScorer, &config(4)).unwrap();

    let counting = CountingScorer::new(WeightScorer);
    let summary = run.execute(&counting, &config(4)).unwrap();
    assert_eq!(counting.calls(), 0);
    assert_eq!(summary.scored_iterations(), 0);
}

#[test]
fn same_seed_same_records() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let c = tempdir().unwrap();
    for dir in [&a, &b] {
        SearchRun::new("det", gene_names(7), dir.path())
            .unwrap()
            .execute(&NoisyScorer, &config(123))
            .unwrap();
    }
    SearchRun::new("det", gene_names(7), c.path())
        .unwrap()
        .execute(&NoisyScorer, &config(124))
        .unwrap();

    assert_eq!(all_records(a.path(), 7), all_records(b.path(), 7));
    assert_ne!(record_lines(a.path(), 1), record_lines(c.path(), 1));
}

#[test]
fn skip_policy_drops_failures_and_lists_them() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("skip", gene_names(5), dir.path()).unwrap();
    let scorer = FailingScorer {
        inner: WeightScorer,
        fails: |subset| subset.len() == 2 && subset.contains("G02"),
    };
    let summary = run
        .execute(
            &scorer,
            &SearchConfig {
                on_evaluation_error: EvaluationPolicy::Skip,
                ..config(5)
            },
        )
        .unwrap();

    let second = &summary.iterations[1];
    assert_eq!((second.candidates, second.skipped), (10, 4));
    let kept = record_lines(dir.path(), 2);
    assert_eq!(kept.len(), 6);
    assert!(kept.iter().all(|line| !line.contains("G02")));

    let skipped = fs::read_to_string(dir.path().join("skipped_002.txt")).unwrap();
    assert_eq!(skipped.lines().count(), 4);
    assert!(skipped.lines().all(|line| line.starts_with("G0") && line.contains("G02")));
    assert!(!dir.path().join("skipped_001.txt").exists());
    assert_eq!(summary.iterations.len(), 5);
}

#[test]
fn abort_policy_writes_nothing_for_the_failed_iteration() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("abort", gene_names(5), dir.path()).unwrap();
    let scorer = FailingScorer {
        inner: WeightScorer,
        fails: |subset| subset.len() == 2 && subset.contains("G02"),
    };
    let err = run.execute(&scorer, &config(5)).unwrap_err();
    assert!(matches!(err, SearchError::Evaluation { iteration: 2, .. }));
    assert!(dir.path().join("scores_001.txt").exists());
    assert!(!dir.path().join("scores_002.txt").exists());
}

#[test]
fn abort_policy_stops_scoring_after_the_first_failure() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("early", gene_names(5), dir.path()).unwrap();
    let scorer = CountingScorer::new(FailingScorer {
        inner: WeightScorer,
        fails: |subset| subset.len() == 2 && subset.contains("G02"),
    });
    let single_thread = SearchConfig {
        threads: Some(1),
        ..config(5)
    };

    let err = run.execute(&scorer, &single_thread).unwrap_err();
    assert!(matches!(
        err,
        SearchError::Evaluation { iteration: 2, ref subset, .. } if subset == "G00,G02"
    ));
    // G00,G01 scores, G00,G02 fails, the other eight pairs are never tried.
    assert_eq!(scorer.calls_for_size(2), 2);
}

#[test]
fn an_iteration_with_no_survivors_fails() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("hopeless", gene_names(3), dir.path()).unwrap();
    let scorer = FailingScorer {
        inner: WeightScorer,
        fails: |_| true,
    };
    let err = run
        .execute(
            &scorer,
            &SearchConfig {
                on_evaluation_error: EvaluationPolicy::Skip,
                ..config(1)
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::EmptyIteration {
            iteration: 1,
            skipped: 3,
            ..
        }
    ));
    assert!(!dir.path().join("scores_001.txt").exists());
}

#[test]
fn corrupt_checkpoints_fail_fast() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("corrupt", gene_names(5), dir.path()).unwrap();
    run.execute(
        &WeightScorer,
        &SearchConfig {
            max_iterations: Some(2),
            ..config(3)
        },
    )
    .unwrap();

    fs::remove_file(dir.path().join("scores_002.txt")).unwrap();
    fs::write(dir.path().join("scores_002.txt"), "G00\t0.500\n").unwrap();

    let counting = CountingScorer::new(WeightScorer);
    let err = run.execute(&counting, &config(3)).unwrap_err();
    assert!(matches!(err, SearchError::CorruptCheckpoint { iteration: 2, .. }));
    assert_eq!(counting.calls(), 0);
}

#[test]
fn a_single_feature_universe_has_one_iteration() {
    let dir = tempdir().unwrap();
    let run = SearchRun::new("solo", ["ONLY"], dir.path()).unwrap();
    let summary = run.execute(&WeightScorer, &config(0)).unwrap();
    assert_eq!(summary.iterations.len(), 1);
    assert_eq!(summary.iterations[0].best.as_ref().unwrap().subset.join(), "ONLY");
}

#[test]
fn unreadable_identifiers_fail_before_any_scoring() {
    let dir = tempdir().unwrap();
    let run_dir = dir.path().join("sep");
    let scorer = CountingScorer::new(WeightScorer);

    let outcome = SearchRun::new("sep", ["A,B", "C", "D", "E", "F", "G"], &run_dir)
        .and_then(|run| run.execute(&scorer, &config(1)));

    let err = outcome.unwrap_err();
    assert!(matches!(err, SearchError::InvalidFeature { .. }), "{err}");
    assert!(err.to_string().contains("'A,B'"));
    assert_eq!(scorer.calls(), 0);
    assert!(!run_dir.exists());
}
