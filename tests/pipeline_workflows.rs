//! End-to-end pipeline scenarios driven through mock services

mod common;

use common::{
    matted_subject, photo_bytes, solid_png, CountingStore, HeldStore, MockGenerator, MockRemover,
};
use prodapic::{
    compose, BackgroundFamily, CallerContext, ComposeError, ErrorClass, InMemoryCreditLedger,
    InMemoryQuotaStore, PipelineConfig, PipelineController, PipelineStage, QuotaGate,
    QuotaPolicy, QuotaScope, Result,
};
use std::sync::Arc;

fn signed_in() -> CallerContext {
    CallerContext::new("198.51.100.20").with_identity("user_e2e")
}

fn pipeline(remover: Arc<MockRemover>, generator: Arc<MockGenerator>) -> PipelineController {
    PipelineController::builder(PipelineConfig::default())
        .remover(remover)
        .generator(generator)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_upload_to_complete_matches_direct_compose() -> Result<()> {
    let subject = matted_subject(60, [200, 30, 30]);
    let background = solid_png(1024, 768, [240, 235, 220, 255]);
    let generator = MockGenerator::returning(background.clone());
    let pipeline = pipeline(MockRemover::returning(subject.clone()), generator.clone());

    pipeline.upload(photo_bytes()).await?;
    let composite = pipeline
        .generate("studio background", BackgroundFamily::Product, &signed_in())
        .await?;

    let snapshot = pipeline.snapshot()?;
    assert_eq!(snapshot.stage, PipelineStage::Complete);
    assert_eq!(snapshot.subject.as_ref(), Some(&subject));
    assert_eq!(snapshot.background.as_ref(), Some(&background));
    assert_eq!(composite.dimensions(), (1024, 768));

    let direct = compose(&background, &subject, 0.5)?;
    assert_eq!(composite.bytes(), direct.bytes());
    let again = compose(&background, &subject, 0.5)?;
    assert_eq!(direct.bytes(), again.bytes());
    Ok(())
}

#[tokio::test]
async fn test_new_upload_discards_outstanding_generation() -> Result<()> {
    let remover = MockRemover::failing();
    let generator = MockGenerator::gated();
    let pipeline = pipeline(remover.clone(), generator.clone());

    let subject_a = matted_subject(20, [255, 0, 0]);
    let subject_b = matted_subject(20, [0, 0, 255]);

    remover.gate().send(Ok(subject_a)).unwrap();
    let run_a = pipeline.upload(photo_bytes()).await?;

    let background_a = generator.gate();
    let pending = {
        let pipeline = pipeline.clone();
        let caller = signed_in();
        tokio::spawn(async move {
            pipeline
                .generate("run a", BackgroundFamily::Product, &caller)
                .await
        })
    };
    generator.wait_for_requests(1).await;

    remover.gate().send(Ok(subject_b.clone())).unwrap();
    let run_b = pipeline.upload(photo_bytes()).await?;

    background_a
        .send(Ok(solid_png(300, 200, [10, 10, 10, 255])))
        .unwrap();
    let outcome = pending.await.unwrap();
    assert!(matches!(
        outcome,
        Err(ComposeError::Superseded { run, active }) if run == run_a && active == run_b
    ));

    // B can still finish with its own subject.
    let background_b = solid_png(320, 240, [90, 160, 90, 255]);
    generator.gate().send(Ok(background_b.clone())).unwrap();
    let composite = pipeline
        .generate("run b", BackgroundFamily::Product, &signed_in())
        .await?;

    assert_eq!(composite, compose(&background_b, &subject_b, 0.5)?);
    let history = pipeline.history()?;
    assert_eq!(history.len(), 1);
    assert!(history.iter().all(|entry| entry.run_id != run_a));
    Ok(())
}

#[tokio::test]
async fn test_run_superseded_during_quota_check_skips_generator() -> Result<()> {
    let store = HeldStore::new(InMemoryQuotaStore::new());
    let gate = QuotaGate::new(
        QuotaPolicy::default(),
        store.clone(),
        Arc::new(InMemoryCreditLedger::new()),
    );
    let remover = MockRemover::failing();
    let generator = MockGenerator::returning(solid_png(40, 30, [1, 2, 3, 255]));
    let pipeline = PipelineController::builder(PipelineConfig::default())
        .remover(remover.clone())
        .generator(generator.clone())
        .quota_gate(gate)
        .build()?;

    remover.gate().send(Ok(matted_subject(20, [255, 0, 0]))).unwrap();
    let run_a = pipeline.upload(photo_bytes()).await?;

    let pending = {
        let pipeline = pipeline.clone();
        let caller = signed_in();
        tokio::spawn(async move {
            pipeline
                .generate("run a", BackgroundFamily::Product, &caller)
                .await
        })
    };
    store.wait_until_entered().await;

    remover.gate().send(Ok(matted_subject(20, [0, 0, 255]))).unwrap();
    let run_b = pipeline.upload(photo_bytes()).await?;
    store.release();

    let outcome = pending.await.unwrap();
    assert!(matches!(
        outcome,
        Err(ComposeError::Superseded { run, active }) if run == run_a && active == run_b
    ));
    assert_eq!(generator.request_count(), 0);
    assert_eq!(pipeline.stage()?, PipelineStage::AwaitingPrompt);
    // The credit taken before the upload stays spent.
    assert_eq!(pipeline.remaining_credits("user_e2e").await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn test_personal_credential_never_touches_quota() -> Result<()> {
    let store = CountingStore::new(InMemoryQuotaStore::new());
    let gate = QuotaGate::new(
        QuotaPolicy::default(),
        store.clone(),
        Arc::new(InMemoryCreditLedger::new()),
    );
    let generator = MockGenerator::returning(solid_png(40, 30, [1, 2, 3, 255]));
    let pipeline = PipelineController::builder(PipelineConfig::default())
        .remover(MockRemover::returning(matted_subject(10, [9, 9, 9])))
        .generator(generator.clone())
        .quota_gate(gate)
        .build()?;
    pipeline.upload(photo_bytes()).await?;

    // No identity at all: the credential alone is enough.
    let caller = CallerContext::new("203.0.113.99").with_credential("sk-byok");
    for _ in 0..5 {
        pipeline
            .generate("pine forest", BackgroundFamily::Seasonal, &caller)
            .await?;
    }

    assert_eq!(store.call_count(), 0);
    assert_eq!(generator.request_count(), 5);
    assert_eq!(
        generator.last_request().and_then(|r| r.credential).as_deref(),
        Some("sk-byok")
    );
    Ok(())
}

#[tokio::test]
async fn test_credits_run_out_after_three_generations() -> Result<()> {
    let generator = MockGenerator::returning(solid_png(40, 30, [1, 2, 3, 255]));
    let pipeline = pipeline(
        MockRemover::returning(matted_subject(10, [9, 9, 9])),
        generator.clone(),
    );
    pipeline.upload(photo_bytes()).await?;

    for expected in [2, 1, 0] {
        pipeline
            .generate("linen", BackgroundFamily::Lifestyle, &signed_in())
            .await?;
        assert_eq!(pipeline.remaining_credits("user_e2e").await?, Some(expected));
    }

    let err = pipeline
        .generate("linen", BackgroundFamily::Lifestyle, &signed_in())
        .await
        .unwrap_err();
    // Anonymous and identified capacities are equal, so the address runs out first.
    assert!(matches!(
        err,
        ComposeError::QuotaDenied {
            scope: QuotaScope::Anonymous
        }
    ));
    assert_eq!(err.class(), ErrorClass::QuotaExhausted);
    assert_eq!(generator.request_count(), 3);
    assert_eq!(pipeline.stage()?, PipelineStage::Errored);
    Ok(())
}

#[tokio::test]
async fn test_missing_identity_is_rejected_without_generation() -> Result<()> {
    let generator = MockGenerator::returning(solid_png(8, 8, [1, 1, 1, 255]));
    let pipeline = pipeline(
        MockRemover::returning(matted_subject(8, [5, 5, 5])),
        generator.clone(),
    );
    pipeline.upload(photo_bytes()).await?;

    let err = pipeline
        .generate("desk", BackgroundFamily::Product, &CallerContext::new("10.1.1.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::MissingIdentity));
    assert_eq!(generator.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_upstream_errors_are_classified() -> Result<()> {
    let generator = MockGenerator::gated();
    let pipeline = pipeline(
        MockRemover::returning(matted_subject(8, [5, 5, 5])),
        generator.clone(),
    );
    pipeline.upload(photo_bytes()).await?;

    generator
        .gate()
        .send(Err(ComposeError::generation(400, "prompt rejected")))
        .unwrap();
    let err = pipeline
        .generate("something odd", BackgroundFamily::Product, &signed_in())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Input);
    let failure = pipeline.snapshot()?.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::Input);
    assert_eq!(failure.stage, PipelineStage::GeneratingBackground);

    generator
        .gate()
        .send(Err(ComposeError::generation(503, "overloaded")))
        .unwrap();
    let err = pipeline
        .generate("something odd", BackgroundFamily::Product, &signed_in())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    Ok(())
}

#[tokio::test]
async fn test_regenerate_reruns_removal_on_same_source() -> Result<()> {
    let remover = MockRemover::returning(matted_subject(12, [3, 3, 3]));
    let pipeline = pipeline(remover.clone(), MockGenerator::gated());

    let err = pipeline.regenerate().await.unwrap_err();
    assert!(matches!(err, ComposeError::InvalidState(_)));

    let first = pipeline.upload(photo_bytes()).await?;
    let source = pipeline.snapshot()?.source;
    let second = pipeline.regenerate().await?;

    assert!(second > first);
    assert_eq!(remover.call_count(), 2);
    let snapshot = pipeline.snapshot()?;
    assert_eq!(snapshot.source, source);
    assert_eq!(snapshot.stage, PipelineStage::AwaitingPrompt);
    Ok(())
}

#[tokio::test]
async fn test_composite_exports() -> Result<()> {
    let pipeline = pipeline(
        MockRemover::returning(matted_subject(16, [100, 50, 25])),
        MockGenerator::returning(solid_png(64, 64, [255, 255, 255, 255])),
    );
    pipeline.upload(photo_bytes()).await?;
    let composite = pipeline
        .generate("paper", BackgroundFamily::Product, &signed_in())
        .await?;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("composite.{}", composite.file_extension()));
    composite.save(&path)?;
    assert_eq!(std::fs::read(&path)?, composite.bytes());
    assert!(composite.to_data_url().starts_with("data:image/png;base64,"));
    assert_eq!(pipeline.active_composite()?, Some(composite));
    Ok(())
}
