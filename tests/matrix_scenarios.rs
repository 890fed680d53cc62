//! Build Matrix Scenarios
//!
//! End-to-end runs of the matrix against a temp project, with the scripted
//! toolchain standing in for idf.py. Every test checks that the project's
//! sdkconfig.defaults is back to its original content afterwards.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use lorahub_build::artifact::{ExportManifest, EXPORT_MANIFEST_FILE};
use lorahub_build::environment::{BaseGuard, EnvironmentError, DEFAULTS_FILE};
use lorahub_build::mock::{seed_project, synthetic_image, FailureConfig, ScriptedToolchain};
use lorahub_build::signal::CancellationCoordinator;
use lorahub_build::state::{MatrixState, RunStateData, VariantPhase, STATE_FILE};
use lorahub_build::summary::{Status, SUMMARY_FILE};
use lorahub_build::toolchain::BuildStep;
use lorahub_build::{
    Archiver, BuildEnvironment, BuildOutputSet, ConfigVariant, EnvironmentPaths, MatrixError,
    MatrixOptions, MatrixPipeline, MatrixSummary, VariantRegistry,
};
use tempfile::TempDir;

const BASE: &str = "CONFIG_BASE=y\nCONFIG_LOG_DEFAULT_LEVEL=3\n";

fn registry(names: &[&str]) -> VariantRegistry {
    VariantRegistry::new(
        names
            .iter()
            .map(|n| ConfigVariant::new(*n, format!("CONFIG_{}=y\n", n.to_uppercase())))
            .collect(),
    )
    .unwrap()
}

/// Pipeline archiving into the project directory itself
fn pipeline(project: &Path, names: &[&str], export_dir: Option<PathBuf>) -> MatrixPipeline {
    MatrixPipeline::new(
        registry(names),
        BuildEnvironment::new(EnvironmentPaths::in_project(project)),
        Archiver::new(BuildOutputSet::default(), project.join("sdkconfig")),
        MatrixOptions {
            build_tree: project.join("build"),
            archive_root: project.to_path_buf(),
            export_dir,
        },
    )
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    seed_project(dir.path(), BASE).unwrap();
    dir
}

fn active_config(project: &Path) -> String {
    fs::read_to_string(project.join(DEFAULTS_FILE)).unwrap()
}

// =============================================================================
// Scenario A: every variant succeeds
// =============================================================================

#[test]
fn test_all_variants_succeed() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha", "beta"], None).run(&mut tc).unwrap();

    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    assert!(dir.path().join("build_alpha").is_dir());
    assert!(dir.path().join("build_beta").is_dir());
    assert!(dir.path().join("sdkconfig.alpha").is_file());
    assert!(dir.path().join("sdkconfig.beta").is_file());
    assert_eq!(active_config(dir.path()), BASE);
    assert_eq!(report.summary.human_summary, "all 2 variants completed");
}

#[test]
fn test_composed_config_is_base_then_fragment() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    pipeline(dir.path(), &["alpha", "beta"], None).run(&mut tc).unwrap();

    let expected_alpha = format!("{}CONFIG_ALPHA=y\n", BASE);
    assert_eq!(tc.built_configs(), &[expected_alpha.clone(), format!("{}CONFIG_BETA=y\n", BASE)]);
    assert_eq!(
        fs::read_to_string(dir.path().join("sdkconfig.defaults.alpha")).unwrap(),
        expected_alpha
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("sdkconfig.alpha")).unwrap(),
        expected_alpha
    );
}

#[test]
fn test_archives_are_disjoint() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    pipeline(dir.path(), &["alpha", "beta"], None).run(&mut tc).unwrap();

    let alpha = fs::read_to_string(dir.path().join("build_alpha/lorahub.bin")).unwrap();
    let beta = fs::read_to_string(dir.path().join("build_beta/lorahub.bin")).unwrap();
    assert_eq!(alpha, synthetic_image("lorahub.bin", &format!("{}CONFIG_ALPHA=y\n", BASE)));
    assert!(!alpha.contains("CONFIG_BETA"));
    assert!(beta.contains("CONFIG_BETA"));
}

#[test]
fn test_rerun_replaces_archive() {
    let dir = project();
    fs::create_dir_all(dir.path().join("build_alpha")).unwrap();
    fs::write(dir.path().join("build_alpha/stale.bin"), b"old").unwrap();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    pipeline(dir.path(), &["alpha"], None).run(&mut tc).unwrap();

    assert!(!dir.path().join("build_alpha/stale.bin").exists());
    assert!(dir.path().join("build_alpha/lorahub.bin").is_file());
}

// =============================================================================
// Scenario B: the first build fails
// =============================================================================

#[test]
fn test_first_build_fails() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
        .failing(BuildStep::Build, FailureConfig::exit_code(2));

    let report = pipeline(dir.path(), &["alpha", "beta"], None).run(&mut tc).unwrap();

    assert_ne!(report.exit_code(), 0);
    assert_eq!(report.exit_code(), 50);
    assert!(matches!(report.error, Some(MatrixError::Build(_))));
    assert!(!dir.path().join("build_alpha").exists());
    assert!(!dir.path().join("sdkconfig.defaults.beta").exists());
    assert_eq!(tc.build_count(), 1);
    assert_eq!(active_config(dir.path()), BASE);

    let summary = &report.summary;
    assert_eq!(summary.stopped_at.as_deref(), Some("alpha"));
    assert_eq!(summary.variants[0].failed_phase, Some(VariantPhase::Build));
    assert_eq!(summary.variants[1].status, Status::Skipped);
    assert_eq!(summary.human_summary, "stopped at variant alpha (0 of 2 completed, 1 skipped)");
}

// =============================================================================
// Scenario C: a declared output is missing after a reported success
// =============================================================================

#[test]
fn test_missing_output_aborts() {
    let dir = project();
    let out = dir.path().join("out");
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
        .omitting("partition_table/partition-table.bin");

    let report = pipeline(dir.path(), &["alpha", "beta"], Some(out.clone()))
        .run(&mut tc)
        .unwrap();

    assert_eq!(report.exit_code(), 70);
    match &report.error {
        Some(MatrixError::Artifact(e)) => {
            assert_eq!(e.variant, "alpha");
            assert!(e.missing_path.ends_with("partition_table/partition-table.bin"));
        }
        other => panic!("expected Artifact error, got {:?}", other),
    }
    assert!(!dir.path().join("build_alpha").exists());
    assert!(!out.join("alpha_lorahub.bin").exists());
    assert!(!dir.path().join("sdkconfig.defaults.beta").exists());
    assert_eq!(report.summary.variants[0].failed_phase, Some(VariantPhase::Archive));
    assert!(report.manifest_path.is_none());
    assert_eq!(active_config(dir.path()), BASE);
}

// =============================================================================
// Fail-fast: a middle variant fails
// =============================================================================

#[test]
fn test_later_variants_never_touched() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
        .failing(BuildStep::Build, FailureConfig::exit_code(1).on_call(2));

    let report = pipeline(dir.path(), &["alpha", "beta", "gamma"], None)
        .run(&mut tc)
        .unwrap();

    assert_eq!(report.exit_code(), 50);
    assert_eq!(tc.build_count(), 2);
    assert!(dir.path().join("build_alpha").is_dir());
    assert!(!dir.path().join("build_beta").exists());
    assert!(!dir.path().join("sdkconfig.defaults.gamma").exists());
    assert!(!dir.path().join("build_gamma").exists());
    assert_eq!(active_config(dir.path()), BASE);

    let statuses: Vec<Status> = report.summary.variants.iter().map(|v| v.status).collect();
    assert_eq!(statuses, vec![Status::Success, Status::Failed, Status::Skipped]);
}

// =============================================================================
// Activate failure: the build-state file cannot be cleared
// =============================================================================

#[test]
fn test_activate_failure_aborts_and_restores() {
    let dir = project();
    fs::create_dir(dir.path().join("sdkconfig")).unwrap();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha", "beta", "gamma"], None)
        .run(&mut tc)
        .unwrap();

    assert_eq!(report.exit_code(), 10);
    assert!(matches!(
        report.error,
        Some(MatrixError::Environment(EnvironmentError::ClearState { .. }))
    ));
    assert!(tc.calls().is_empty());
    assert_eq!(report.summary.variants[0].failed_phase, Some(VariantPhase::Activate));
    assert_eq!(report.summary.variants[1].status, Status::Skipped);
    assert_eq!(report.summary.variants[2].status, Status::Skipped);
    assert!(!dir.path().join("sdkconfig.defaults.beta").exists());
    assert!(!dir.path().join("build_alpha").exists());
    assert_eq!(active_config(dir.path()), BASE);
}

// =============================================================================
// Variant names that collide with files the run maintains
// =============================================================================

#[test]
fn test_variant_named_base_is_refused() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let err = pipeline(dir.path(), &["alpha", "base"], None)
        .run(&mut tc)
        .unwrap_err();

    match &err {
        MatrixError::PathCollision { variant, path } => {
            assert_eq!(variant, "base");
            assert_eq!(path, &dir.path().join("sdkconfig.defaults.base"));
        }
        other => panic!("expected PathCollision, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
    assert!(tc.calls().is_empty());
    assert!(!dir.path().join("sdkconfig.defaults.base").exists());
    assert!(!dir.path().join(STATE_FILE).exists());
    assert_eq!(active_config(dir.path()), BASE);
}

#[test]
fn test_variant_named_defaults_is_refused() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let err = pipeline(dir.path(), &["defaults"], None)
        .run(&mut tc)
        .unwrap_err();

    match &err {
        MatrixError::PathCollision { variant, path } => {
            assert_eq!(variant, "defaults");
            assert_eq!(path, &dir.path().join(DEFAULTS_FILE));
        }
        other => panic!("expected PathCollision, got {:?}", other),
    }
    assert!(tc.calls().is_empty());
    assert_eq!(active_config(dir.path()), BASE);
}

#[test]
fn test_variant_named_tmp_keeps_record_and_archive() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["tmp"], None).run(&mut tc).unwrap();

    assert!(report.is_success());
    let composed = format!("{}CONFIG_TMP=y\n", BASE);
    assert_eq!(
        fs::read_to_string(dir.path().join("sdkconfig.defaults.tmp")).unwrap(),
        composed
    );
    assert_eq!(fs::read_to_string(dir.path().join("sdkconfig.tmp")).unwrap(), composed);
    assert_eq!(active_config(dir.path()), BASE);
}

// =============================================================================
// Run files
// =============================================================================

#[test]
fn test_state_and_summary_persisted() {
    let dir = project();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
        .failing(BuildStep::Build, FailureConfig::exit_code(1).on_call(2));

    let report = pipeline(dir.path(), &["alpha", "beta"], None).run(&mut tc).unwrap();

    let state = RunStateData::from_file(&dir.path().join(STATE_FILE)).unwrap();
    assert_eq!(state.state, MatrixState::Aborted);
    assert_eq!(state.run_id, report.summary.run_id);
    assert!(state.current.is_none());

    let summary = MatrixSummary::from_file(&dir.path().join(SUMMARY_FILE)).unwrap();
    assert_eq!(summary.exit_code, 50);
    assert_eq!(summary.stopped_at.as_deref(), Some("beta"));
    assert!(summary.base_restored);
}

// =============================================================================
// Exports
// =============================================================================

#[test]
fn test_exports_and_manifest() {
    let dir = project();
    let out = dir.path().join("out");
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha", "beta"], Some(out.clone()))
        .run(&mut tc)
        .unwrap();

    assert!(report.is_success());
    for variant in ["alpha", "beta"] {
        for name in ["bootloader.bin", "partition-table.bin", "lorahub.bin"] {
            assert!(out.join(format!("{}_{}", variant, name)).is_file(), "{} {}", variant, name);
        }
    }

    let path = report.manifest_path.expect("manifest written");
    assert_eq!(path, out.join(EXPORT_MANIFEST_FILE));
    let manifest = ExportManifest::from_file(&path).unwrap();
    assert_eq!(manifest.run_id, report.summary.run_id);
    assert_eq!(manifest.files.len(), 6);
    assert_eq!(manifest.for_variant("beta").count(), 3);
    assert_eq!(report.summary.variants[0].exported, 3);
    assert_eq!(
        report.exported_bytes,
        manifest.files.iter().map(|f| f.size).sum::<u64>()
    );
    assert!(report.exported_bytes > 0);
}

#[test]
fn test_unwritable_export_dir_is_a_warning() {
    let dir = project();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha"], Some(blocker.join("out")))
        .run(&mut tc)
        .unwrap();

    assert!(report.is_success());
    assert!(dir.path().join("build_alpha/lorahub.bin").is_file());
    assert!(dir.path().join("sdkconfig.alpha").is_file());
    let warnings: Vec<&str> = report.summary.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("export directory"));
    assert!(report.manifest_path.is_none());
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_interrupt_during_build_cancels_and_restores() {
    let dir = project();
    let coordinator = CancellationCoordinator::detached();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
        .interrupting_build(2, coordinator.clone());

    let report = pipeline(dir.path(), &["alpha", "beta", "gamma"], None)
        .with_cancellation(coordinator.clone())
        .run(&mut tc)
        .unwrap();

    assert_eq!(report.exit_code(), 80);
    assert!(matches!(report.error, Some(MatrixError::Cancelled { ref variant }) if variant == "beta"));
    assert_eq!(active_config(dir.path()), BASE);
    assert!(dir.path().join("build_alpha").is_dir());
    assert!(!dir.path().join("build_beta").exists());
    assert!(!dir.path().join("sdkconfig.defaults.gamma").exists());

    let summary = &report.summary;
    assert_eq!(summary.status, Status::Cancelled);
    assert_eq!(summary.variants[1].status, Status::Cancelled);
    assert_eq!(summary.variants[1].failed_phase, Some(VariantPhase::Build));
    assert!(summary.human_summary.starts_with("cancelled at variant beta"));

    let state = RunStateData::from_file(&dir.path().join(STATE_FILE)).unwrap();
    assert_eq!(state.state, MatrixState::Cancelled);
    assert!(coordinator.state().restore_point().is_none());
}

#[test]
fn test_cancel_before_start_builds_nothing() {
    let dir = project();
    let coordinator = CancellationCoordinator::detached();
    coordinator.request_cancel();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha", "beta"], None)
        .with_cancellation(coordinator)
        .run(&mut tc)
        .unwrap();

    assert_eq!(report.exit_code(), 80);
    assert!(tc.calls().is_empty());
    assert_eq!(report.summary.variants[0].status, Status::Cancelled);
    assert_eq!(report.summary.variants[1].status, Status::Skipped);
    assert_eq!(active_config(dir.path()), BASE);
}

// =============================================================================
// Base configuration round-trip
// =============================================================================

#[test]
fn test_restore_is_idempotent() {
    let dir = project();
    let mut env = BuildEnvironment::new(EnvironmentPaths::in_project(dir.path()));
    env.snapshot_base().unwrap();
    env.activate(&ConfigVariant::new("alpha", "CONFIG_ALPHA=y\n")).unwrap();

    env.restore_base().unwrap();
    let once = active_config(dir.path());
    env.restore_base().unwrap();

    assert_eq!(active_config(dir.path()), once);
    assert_eq!(once, BASE);
    env.verify_base().unwrap();
}

#[test]
fn test_guard_restores_on_panic() {
    let dir = project();
    let mut env = BuildEnvironment::new(EnvironmentPaths::in_project(dir.path()));
    env.snapshot_base().unwrap();
    let point = env.restore_point().unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = BaseGuard::new(point);
        env.activate(&ConfigVariant::new("alpha", "CONFIG_ALPHA=y\n")).unwrap();
        panic!("build tool blew up");
    }));

    assert!(result.is_err());
    assert_eq!(active_config(dir.path()), BASE);
}

#[test]
fn test_base_without_trailing_newline_round_trips() {
    let dir = TempDir::new().unwrap();
    seed_project(dir.path(), "CONFIG_BASE=y").unwrap();
    let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

    let report = pipeline(dir.path(), &["alpha"], None).run(&mut tc).unwrap();

    assert!(report.is_success());
    assert_eq!(tc.built_configs()[0], "CONFIG_BASE=yCONFIG_ALPHA=y\n");
    assert_eq!(active_config(dir.path()), "CONFIG_BASE=y");
}
