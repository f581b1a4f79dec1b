//! Generation against the SQLite store, across simulated restarts
//!
//! Every test reopens the database file with a fresh generator to check that
//! resumption depends only on what was persisted.

mod common;

use common::{collect_events, open_generator, roman_history, test_config};
use lessonforge::{
    Error, Event, GenerationOptions, ProviderError, RunStatus, ScriptedProvider, Stage,
    StageStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn course_survives_restart_without_regeneration() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&["k1"], &temp_dir);
    let provider = roman_history();

    let generator = open_generator(&config, provider.clone()).await;
    let outcome = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    let first = generator.snapshot("Roman History").await.unwrap();
    drop(generator);

    let restarted = open_generator(&config, provider.clone()).await;
    assert_eq!(restarted.snapshot("Roman History").await.unwrap(), first);
    assert_eq!(
        restarted.active_topic().await.unwrap().as_deref(),
        Some("Roman History")
    );

    let calls = provider.calls().len();
    let outcome = restarted
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.stages_generated, 0);
    assert_eq!(provider.calls().len(), calls);
}

#[tokio::test]
async fn interrupted_run_resumes_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&["k1"], &temp_dir);

    // first process dies on chapter 1's content
    let crashing = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_reply(Stage::ChapterContent, "# Founding\n\nRomulus and Remus.")
            .with_error(Stage::ChapterContent, ProviderError::Unknown("connection reset".into())),
    );
    let generator = open_generator(&config, crashing.clone()).await;
    let err = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "operation_failed");
    drop(generator);

    let provider = roman_history();
    let restarted = open_generator(&config, provider.clone()).await;
    let progress = restarted.progress("Roman History").await.unwrap();
    assert_eq!(progress.next_pending_chapter, Some(1));

    let mut handle = restarted.resume_active().await.unwrap();
    let events = collect_events(&mut handle).await;
    handle.wait().await.unwrap();

    assert!(matches!(
        events.first(),
        Some(Event::RunStarted { resumed: true, .. })
    ));
    assert!(events.contains(&Event::Stage {
        topic: "Roman History".into(),
        stage: Stage::ChapterContent,
        chapter_index: Some(0),
        status: StageStatus::Skipped,
    }));

    // only chapter 1 content was asked of the new provider
    assert_eq!(provider.calls_for(Stage::Outline), 0);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 1);
    assert_eq!(provider.calls_for(Stage::Flashcards), 1);

    let snapshot = restarted.snapshot("Roman History").await.unwrap();
    assert_eq!(
        snapshot.chapters[0].content.as_deref(),
        Some("# Founding\n\nRomulus and Remus.")
    );
    assert_eq!(snapshot.flashcards.len(), 2);
    assert_eq!(snapshot.quiz.len(), 2);
}

#[tokio::test]
async fn rotation_index_is_persisted_in_the_database() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&["k1", "k2", "k3"], &temp_dir);
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding"])
            .reject_credential("k1", ProviderError::Quota("429".into()))
            .reject_credential("k2", ProviderError::InvalidCredential("403".into())),
    );

    let generator = open_generator(&config, provider.clone()).await;
    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    drop(generator);

    let before = provider.calls().len();
    let restarted = open_generator(&config, provider.clone()).await;
    restarted
        .run_generation(
            "Greek History",
            GenerationOptions {
                force_new: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls[before].credential, "k3");
    assert!(calls[before..].iter().all(|c| c.credential == "k3"));
}

#[tokio::test]
async fn cancelled_run_keeps_sqlite_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&["k1"], &temp_dir);
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars", "Empire"])
            .with_latency(Duration::from_millis(20)),
    );

    let generator = open_generator(&config, provider.clone()).await;
    let mut handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();

    while let Some(event) = handle.next_event().await {
        if matches!(
            event,
            Event::Stage {
                stage: Stage::Quiz,
                chapter_index: Some(0),
                status: StageStatus::Completed { .. },
                ..
            }
        ) {
            generator.cancel_generation();
        }
    }
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Cancelled);
    drop(generator);

    let restarted = open_generator(&config, provider.clone()).await;
    let progress = restarted.progress("Roman History").await.unwrap();
    assert_eq!(progress.chapters_with_quiz, 1);
    assert!(!progress.is_complete());

    let outcome = restarted
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 3);
}

#[tokio::test]
async fn enrichment_audio_is_stored_in_the_database() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&["k1"], &temp_dir);
    let provider = roman_history();

    let generator = open_generator(&config, provider.clone()).await;
    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    let chapter = generator
        .generate_enrichment(0, Some("English".into()))
        .await
        .unwrap()
        .unwrap();
    drop(generator);

    let restarted = open_generator(&config, provider.clone()).await;
    let snapshot = restarted.snapshot("Roman History").await.unwrap();
    assert_eq!(snapshot.chapters[0], chapter);
    assert_eq!(chapter.audio_ref.as_deref(), Some("audio/0"));

    // discarding the topic removes the audio too
    restarted.discard_topic("Roman History").await.unwrap();
    assert!(matches!(
        restarted.generate_enrichment_for("Roman History", 0, None).await,
        Err(Error::MissingPrerequisite { .. })
    ));
}
