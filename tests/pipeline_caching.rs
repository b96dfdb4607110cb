// tests/pipeline_caching.rs

//! End-to-end pipeline tests against a fake transpiler: cache hits, edit
//! invalidation and error outcomes.

use std::error::Error;
use std::sync::Arc;

use lightfast_compiler::cache::CompilationCache;
use lightfast_compiler::compiler::CompilePipeline;
use lightfast_compiler::engine::CompileOutcome;

use lightfast_test_utils::builders::{agents_source, TempProject, TranspileOutputBuilder};
use lightfast_test_utils::fake_transpiler::FakeTranspiler;
use lightfast_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn pipeline_for(
    project: &TempProject,
    transpiler: Arc<FakeTranspiler>,
) -> CompilePipeline {
    let cache = CompilationCache::new(project.path().join(".lightfast"));
    CompilePipeline::new(
        cache,
        transpiler,
        project.path().join(".lightfast/bundles"),
        "0.0.0-test",
    )
}

fn expect_success(outcome: CompileOutcome) -> lightfast_compiler::engine::CompileReport {
    match outcome {
        CompileOutcome::Success(report) => report,
        CompileOutcome::Error { message, .. } => panic!("expected success, got error: {message}"),
    }
}

#[tokio::test]
async fn second_compile_is_served_from_cache() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config(&agents_source(&["support"]));
    project.write_file("src/util.ts", "export const x = 1;");

    let output = TranspileOutputBuilder::new(&agents_source(&["support"]))
        .input("lightfast.config.ts")
        .input("src/util.ts")
        .build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, Arc::clone(&transpiler));

    let first = expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert!(!first.cached);
    assert_eq!(first.bundles.len(), 1);
    assert_eq!(transpiler.call_count(), 1);

    // Nothing changed: the transpiler must not run again.
    let second = expect_success(
        pipeline
            .compile(&entry, project.path(), first.metafile.as_ref())
            .await,
    );
    assert!(second.cached);
    assert_eq!(transpiler.call_count(), 1);
    assert_eq!(second.bundles.len(), 1);
    assert_eq!(second.bundles[0].filename, first.bundles[0].filename);
    Ok(())
}

#[tokio::test]
async fn dependency_edit_invalidates_the_cache() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config(&agents_source(&["support"]));
    project.write_file("src/util.ts", "export const x = 1;");

    let output = TranspileOutputBuilder::new(&agents_source(&["support"]))
        .input("lightfast.config.ts")
        .input("src/util.ts")
        .build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, Arc::clone(&transpiler));

    let first = expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert_eq!(transpiler.call_count(), 1);

    // The entry point is untouched; only an imported file changes.
    project.write_file("src/util.ts", "export const x = 2;");

    let second = expect_success(
        pipeline
            .compile(&entry, project.path(), first.metafile.as_ref())
            .await,
    );
    assert!(!second.cached);
    assert_eq!(transpiler.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn dependency_edit_between_sessions_invalidates_the_cache() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config(&agents_source(&["support"]));
    project.write_file("src/util.ts", "export const x = 1;");

    let output = TranspileOutputBuilder::new(&agents_source(&["support"]))
        .input("lightfast.config.ts")
        .input("src/util.ts")
        .build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, Arc::clone(&transpiler));

    expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert_eq!(transpiler.call_count(), 1);

    // The dependency changes while no metafile is held in memory, as after a
    // process restart. The stored closure must still catch it.
    project.write_file("src/util.ts", "export const x = 2;");

    let second = expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert!(!second.cached);
    assert_eq!(transpiler.call_count(), 2);

    // With nothing changed, the next metafile-less compile is a hit again.
    let third = expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert!(third.cached);
    assert_eq!(transpiler.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn source_edit_invalidates_the_cache() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config(&agents_source(&["support"]));

    let output = TranspileOutputBuilder::new(&agents_source(&["support"]))
        .input("lightfast.config.ts")
        .build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, Arc::clone(&transpiler));

    let first = expect_success(pipeline.compile(&entry, project.path(), None).await);
    assert_eq!(transpiler.call_count(), 1);

    project.write_config(&agents_source(&["support", "billing"]));

    let second = expect_success(
        pipeline
            .compile(&entry, project.path(), first.metafile.as_ref())
            .await,
    );
    assert!(!second.cached);
    assert_eq!(transpiler.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn transpiler_errors_produce_an_error_outcome_with_partial_code() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config("export const broken = ;");

    let output = TranspileOutputBuilder::new("/* partial */")
        .error("Unexpected token at lightfast.config.ts:1")
        .build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, Arc::clone(&transpiler));

    match pipeline.compile(&entry, project.path(), None).await {
        CompileOutcome::Error {
            entry: failed,
            message,
            partial_code,
        } => {
            assert_eq!(failed, entry);
            assert!(message.contains("Unexpected token"));
            assert_eq!(partial_code.as_deref(), Some("/* partial */"));
        }
        CompileOutcome::Success(_) => panic!("expected an error outcome"),
    }

    // Nothing was cached: the next compile hits the transpiler again.
    let _ = pipeline.compile(&entry, project.path(), None).await;
    assert_eq!(transpiler.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn fan_out_produces_one_bundle_per_agent() -> TestResult {
    init_tracing();

    let project = TempProject::new();
    let entry = project.write_config(&agents_source(&["alpha", "beta", "gamma"]));

    let output = TranspileOutputBuilder::new(&agents_source(&["alpha", "beta", "gamma"])).build();
    let transpiler = Arc::new(FakeTranspiler::new(output));
    let pipeline = pipeline_for(&project, transpiler);

    let report = expect_success(pipeline.compile(&entry, project.path(), None).await);
    let ids: Vec<&str> = report.bundles.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
    for bundle in &report.bundles {
        assert!(bundle.filepath.is_file());
    }
    Ok(())
}
