use super::*;
use crate::config::Config;
use crate::error::{ExhaustionCause, Remediation};
use crate::provider::{ProviderError, ScriptedProvider};
use crate::store::MemoryStore;
use crate::types::{GenerationOptions, RunStatus, Stage, StageStatus};
use futures::StreamExt;
use std::time::Duration;

fn test_config(credentials: &[&str]) -> Config {
    let mut config = Config::default();
    config.provider.credentials = credentials.iter().map(|c| c.to_string()).collect();
    config.generation.chapter_pause = Duration::ZERO;
    config.generation.pause_jitter = false;
    config
}

fn generator_with(
    credentials: &[&str],
    provider: &Arc<ScriptedProvider>,
    store: &MemoryStore,
) -> CourseGenerator {
    CourseGenerator::new(
        test_config(credentials),
        provider.clone(),
        Arc::new(store.clone()),
    )
    .unwrap()
}

fn roman_history() -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::course(&["Founding", "Punic Wars"]))
}

async fn collect_run(handle: &mut GenerationHandle) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

fn skipped_stages(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::Stage {
                    status: StageStatus::Skipped,
                    ..
                }
            )
        })
        .count()
}

#[tokio::test]
async fn generates_a_full_course() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let mut handle = generator
        .start_generation("  Roman History ", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.topic(), "Roman History");

    let events = collect_run(&mut handle).await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    // outline + 2 × (content, flashcards, quiz)
    assert_eq!(outcome.stages_generated, 7);

    assert_eq!(
        events.first(),
        Some(&Event::RunStarted {
            topic: "Roman History".into(),
            resumed: false
        })
    );
    assert_eq!(
        events.last(),
        Some(&Event::Done {
            topic: "Roman History".into()
        })
    );

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    let outline = snapshot.outline.clone().unwrap();
    assert_eq!(outline.titles(), ["Founding", "Punic Wars"]);
    assert!(snapshot.chapters.iter().all(|c| c.has_content()));
    assert_eq!(snapshot.flashcards.len(), 2);
    assert_eq!(snapshot.flashcards[1].source_chapter.index, 1);
    assert_eq!(snapshot.flashcards[1].source_chapter.title, "Punic Wars");
    assert_eq!(snapshot.quiz.len(), 2);
    assert!(GenerationProgress::derive(&snapshot).is_complete());

    assert_eq!(provider.calls_for(Stage::Outline), 1);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 2);
    assert_eq!(provider.calls_for(Stage::PodcastScript), 0);

    assert_eq!(
        generator.active_topic().await.unwrap().as_deref(),
        Some("Roman History")
    );
    assert!(generator.run_state().is_idle());
}

#[tokio::test]
async fn completed_topic_is_not_regenerated() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    let calls_after_first = provider.calls().len();

    let mut handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    let events = collect_run(&mut handle).await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.stages_generated, 0);
    assert_eq!(provider.calls().len(), calls_after_first);
    assert!(matches!(
        events.first(),
        Some(Event::RunStarted { resumed: true, .. })
    ));
    // outline + 2 × (content, flashcards, quiz)
    assert_eq!(skipped_stages(&events), 7);

    // nothing was appended twice
    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert_eq!(snapshot.flashcards.len(), 2);
    assert_eq!(snapshot.quiz.len(), 2);
}

#[tokio::test]
async fn failed_run_resumes_where_it_stopped() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_error(Stage::Quiz, ProviderError::Unknown("backend hiccup".into())),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let err = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::OperationFailed {
            stage: Stage::Quiz,
            ..
        }
    ));

    let progress = generator.progress("Roman History").await.unwrap();
    assert_eq!(progress.chapters_with_content, 1);
    assert_eq!(progress.chapters_with_flashcards, 1);
    assert_eq!(progress.chapters_with_quiz, 0);
    assert_eq!(progress.next_pending_chapter, Some(1));

    let outcome = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    // quiz 0, then content, flashcards and quiz of chapter 1
    assert_eq!(outcome.stages_generated, 4);

    assert_eq!(provider.calls_for(Stage::Outline), 1);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 2);
    assert_eq!(provider.calls_for(Stage::Flashcards), 2);
    assert_eq!(provider.calls_for(Stage::Quiz), 3);

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert_eq!(snapshot.flashcards.len(), 2);
    assert_eq!(snapshot.quiz.len(), 2);
}

#[tokio::test]
async fn force_new_only_touches_its_own_topic() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    generator
        .run_generation("Greek History", GenerationOptions::default())
        .await
        .unwrap();
    let greek_before = generator.snapshot("Greek History").await.unwrap();

    let outcome = generator
        .run_generation(
            "Roman History",
            GenerationOptions {
                force_new: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.stages_generated, 7);
    assert_eq!(provider.calls_for(Stage::Outline), 3);

    let roman = generator.snapshot("Roman History").await.unwrap();
    assert_eq!(roman.flashcards.len(), 2);
    assert_eq!(roman.quiz.len(), 2);
    assert_eq!(generator.snapshot("Greek History").await.unwrap(), greek_before);
}

#[tokio::test]
async fn cancellation_stops_at_next_checkpoint_and_keeps_artifacts() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_latency(Duration::from_millis(20)),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let mut handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = handle.next_event().await {
        if let Event::Stage {
            stage: Stage::ChapterContent,
            chapter_index: Some(0),
            status: StageStatus::Completed { .. },
            ..
        } = &event
        {
            assert!(generator.cancel_generation());
        }
        if event.is_terminal() {
            // lock is released before the terminal event goes out
            assert!(generator.run_state().is_idle());
        }
        last = Some(event);
    }

    assert_eq!(
        last,
        Some(Event::Cancelled {
            topic: "Roman History".into()
        })
    );
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Cancelled);
    assert!(!generator.cancel_generation());

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert!(snapshot.chapters[0].has_content());
    assert!(!snapshot.chapters[1].has_content());
    assert_eq!(provider.calls_for(Stage::Quiz), 0);

    let outcome = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 2);
    assert_eq!(provider.calls_for(Stage::Outline), 1);
}

#[tokio::test]
async fn second_operation_while_busy_is_rejected() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding"]).with_latency(Duration::from_millis(20)),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        generator.run_state(),
        RunState::Running {
            kind: RunKind::Generation,
            ..
        }
    ));

    assert!(matches!(
        generator
            .start_generation("Greek History", GenerationOptions::default())
            .await,
        Err(Error::AlreadyRunning)
    ));
    assert!(matches!(
        generator.generate_enrichment_for("Roman History", 0, None).await,
        Err(Error::AlreadyRunning)
    ));
    assert!(matches!(
        generator.discard_topic("Roman History").await,
        Err(Error::AlreadyRunning)
    ));

    handle.wait().await.unwrap();
    assert!(generator.run_state().is_idle());
    assert!(
        generator
            .start_generation("Greek History", GenerationOptions::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn entry_guards_reject_before_any_call() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&[], &provider, &store);
    let mut events = generator.subscribe();

    assert!(matches!(
        generator
            .start_generation("Roman History", GenerationOptions::default())
            .await,
        Err(Error::CredentialsRequired)
    ));
    // credentials are checked before the topic
    assert!(matches!(
        generator
            .start_generation("   ", GenerationOptions::default())
            .await,
        Err(Error::CredentialsRequired)
    ));

    generator.set_credentials(vec!["k1".into()]).await.unwrap();
    assert_eq!(generator.credential_count().await, 1);
    assert!(matches!(
        generator
            .start_generation("   ", GenerationOptions::default())
            .await,
        Err(Error::InvalidTopic(_))
    ));

    assert!(provider.calls().is_empty());
    assert!(events.try_recv().is_err());
    assert!(generator.run_state().is_idle());
}

#[tokio::test]
async fn blank_credential_cannot_be_set() {
    let generator = generator_with(&["k1"], &roman_history(), &MemoryStore::new());
    assert!(matches!(
        generator.set_credentials(vec!["k2".into(), " ".into()]).await,
        Err(Error::Config { .. })
    ));
    assert_eq!(generator.credential_count().await, 1);
}

#[tokio::test]
async fn exhausted_pool_fails_with_retry_later() {
    let quota = || ProviderError::Quota("429".into());
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding"])
            .reject_credential("k1", quota())
            .reject_credential("k2", quota()),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1", "k2"], &provider, &store);

    let mut handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    let events = collect_run(&mut handle).await;

    match events.last() {
        Some(Event::Failed { topic, error }) => {
            assert_eq!(topic, "Roman History");
            assert_eq!(error.code, "credentials_exhausted");
            assert_eq!(error.remediation, Remediation::RetryLater);
        }
        other => panic!("expected failed event, got {other:?}"),
    }
    assert!(matches!(
        handle.wait().await,
        Err(Error::AllCredentialsExhausted {
            attempts: 2,
            cause: ExhaustionCause::AllQuota,
            ..
        })
    ));
    assert_eq!(provider.calls().len(), 2);

    // nothing was materialized
    assert!(generator.snapshot("Roman History").await.unwrap().outline.is_none());
}

#[tokio::test]
async fn rotation_position_survives_between_runs() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding"])
            .reject_credential("k1", ProviderError::InvalidCredential("401".into())),
    );
    let memory = MemoryStore::new();
    let generator = generator_with(&["k1", "k2"], &provider, &memory);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(store::credential_index(&memory).await.unwrap(), 1);

    let before = provider.calls().len();
    generator
        .run_generation(
            "Roman History",
            GenerationOptions {
                force_new: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // the second run starts on the credential that worked
    let calls = provider.calls();
    assert!(calls[before..].iter().all(|c| c.credential == "k2"));
}

#[tokio::test]
async fn options_override_configured_counts_and_language() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let outcome = generator
        .run_generation(
            "Roman History",
            GenerationOptions {
                language: Some("Italiano".into()),
                flashcards_per_chapter: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // no flashcard calls when none are requested
    assert_eq!(outcome.stages_generated, 5);
    assert_eq!(provider.calls_for(Stage::Flashcards), 0);
    assert!(
        provider
            .calls()
            .iter()
            .all(|c| c.prompt.contains("Italiano"))
    );
}

#[tokio::test]
async fn enrichment_adds_script_and_audio_once() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();

    let chapter = generator
        .generate_enrichment(1, None)
        .await
        .unwrap()
        .unwrap();
    assert!(chapter.podcast_script.is_some());
    assert_eq!(chapter.audio_ref.as_deref(), Some("audio/1"));

    let topic = generator.topic_store("Roman History");
    let clip = topic.audio("audio/1").await.unwrap().unwrap();
    assert_eq!(clip.mime_type, "audio/wav");

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert_eq!(snapshot.chapters[1], chapter);
    assert!(snapshot.chapters[0].podcast_script.is_none());

    // second request finds both artifacts in place
    let mut events = generator.subscribe();
    generator
        .generate_enrichment_for("Roman History", 1, None)
        .await
        .unwrap();
    assert_eq!(provider.calls_for(Stage::PodcastScript), 1);
    assert_eq!(provider.calls_for(Stage::Audio), 1);

    let mut skipped = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            Event::Stage {
                status: StageStatus::Skipped,
                ..
            }
        ) {
            skipped += 1;
        }
    }
    assert_eq!(skipped, 2);
}

#[tokio::test]
async fn enrichment_requires_outline_content_and_valid_index() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_error(Stage::Flashcards, ProviderError::Unknown("down".into())),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    assert!(matches!(
        generator.generate_enrichment(0, None).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        generator.generate_enrichment_for("Roman History", 0, None).await,
        Err(Error::MissingPrerequisite { .. })
    ));

    // chapter 0 gets content, then the run fails
    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        generator.generate_enrichment_for("Roman History", 5, None).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        generator.generate_enrichment_for("Roman History", 1, None).await,
        Err(Error::MissingPrerequisite {
            stage: Stage::PodcastScript,
            ..
        })
    ));
    assert!(
        generator
            .generate_enrichment_for("Roman History", 0, None)
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(provider.calls_for(Stage::PodcastScript), 1);
}

#[tokio::test]
async fn discard_clears_topic_and_active_marker() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    generator.discard_topic(" Roman History ").await.unwrap();

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert!(snapshot.outline.is_none());
    assert!(snapshot.flashcards.is_empty());
    assert_eq!(generator.active_topic().await.unwrap(), None);
    assert!(matches!(
        generator.resume_active().await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn resume_active_continues_the_last_topic() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_error(Stage::ChapterContent, ProviderError::Unknown("down".into())),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap_err();

    let handle = generator.resume_active().await.unwrap();
    assert_eq!(handle.topic(), "Roman History");

    let events: Vec<Event> = handle.into_events().collect().await;
    assert!(matches!(
        events.first(),
        Some(Event::RunStarted { resumed: true, .. })
    ));
    assert!(matches!(events.last(), Some(Event::Done { .. })));
    assert_eq!(provider.calls_for(Stage::Outline), 1);
}

#[tokio::test]
async fn zero_results_are_tolerated_and_retried_on_resume() {
    // chapter 0 gets empty lists, chapter 1 the fallback replies
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding", "Punic Wars"])
            .with_reply(Stage::Flashcards, "[]")
            .with_reply(Stage::Quiz, "[]"),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let outcome = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert!(!snapshot.has_flashcards_for(0));
    assert!(snapshot.has_flashcards_for(1));
    assert!(!snapshot.has_quiz_for(0));
    assert!(snapshot.has_quiz_for(1));
    assert!(snapshot.chapters[1].has_content());

    // an empty chapter looks unattempted, so only its cards and quiz are asked again
    let before = provider.calls().len();
    let outcome = generator
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.stages_generated, 2);

    let calls = provider.calls();
    let again = &calls[before..];
    assert_eq!(again.len(), 2);
    assert!(again.iter().all(|c| c.prompt.contains("\"Founding\"")));
    assert_eq!(provider.calls_for(Stage::Flashcards), 3);
    assert_eq!(provider.calls_for(Stage::Quiz), 3);
    assert_eq!(provider.calls_for(Stage::ChapterContent), 2);

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert!(snapshot.has_flashcards_for(0));
    assert!(snapshot.has_quiz_for(0));
}

#[tokio::test]
async fn handle_ignores_events_of_other_topics() {
    let provider = Arc::new(
        ScriptedProvider::course(&["Founding"]).with_latency(Duration::from_millis(10)),
    );
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);

    let mut handle = generator
        .start_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();

    let first = handle.next_event().await.unwrap();
    assert!(matches!(first, Event::RunStarted { .. }));

    // a late terminal event of an earlier run on the shared channel
    generator.emit(Event::Done {
        topic: "Greek History".into(),
    });

    let events = collect_run(&mut handle).await;
    assert!(events.iter().all(|e| e.topic() == "Roman History"));
    assert_eq!(
        events.last(),
        Some(&Event::Done {
            topic: "Roman History".into()
        })
    );
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Done);
}

#[tokio::test]
async fn failed_enrichment_is_announced_first() {
    let generator = generator_with(&["k1"], &roman_history(), &MemoryStore::new());
    let mut events = generator.subscribe();

    assert!(matches!(
        generator.generate_enrichment_for("Roman History", 0, None).await,
        Err(Error::MissingPrerequisite { .. })
    ));

    assert_eq!(
        events.try_recv().unwrap(),
        Event::RunStarted {
            topic: "Roman History".into(),
            resumed: false
        }
    );
    match events.try_recv().unwrap() {
        Event::Failed { topic, error } => {
            assert_eq!(topic, "Roman History");
            assert_eq!(error.code, "missing_prerequisite");
        }
        other => panic!("expected failed event, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

/// Memory store whose runtime reads take a while
struct SlowStateStore(MemoryStore);

#[async_trait::async_trait]
impl ResumableStore for SlowStateStore {
    async fn get(&self, topic: &str, key: &str) -> Result<Option<serde_json::Value>> {
        self.0.get(topic, key).await
    }

    async fn put(&self, topic: &str, key: &str, value: &serde_json::Value) -> Result<()> {
        self.0.put(topic, key, value).await
    }

    async fn clear(&self, topic: &str) -> Result<()> {
        self.0.clear(topic).await
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.get_state(key).await
    }

    async fn put_state(&self, key: &str, value: &str) -> Result<()> {
        self.0.put_state(key, value).await
    }

    async fn topics(&self) -> Result<Vec<String>> {
        self.0.topics().await
    }
}

#[tokio::test]
async fn enrichment_cancelled_before_script_makes_no_call() {
    let provider = roman_history();
    let memory = MemoryStore::new();
    generator_with(&["k1"], &provider, &memory)
        .run_generation("Roman History", GenerationOptions::default())
        .await
        .unwrap();

    let generator = CourseGenerator::new(
        test_config(&["k1"]),
        provider.clone(),
        Arc::new(SlowStateStore(memory.clone())),
    )
    .unwrap();
    let mut events = generator.subscribe();

    let cancel = async {
        loop {
            if let Ok(Event::RunStarted { .. }) = events.recv().await {
                break;
            }
        }
        // the run is now reading its rotation position
        generator.cancel_generation()
    };
    let (result, cancelled) = tokio::join!(
        generator.generate_enrichment_for("Roman History", 0, None),
        cancel
    );

    assert!(cancelled);
    assert_eq!(result.unwrap(), None);
    assert_eq!(provider.calls_for(Stage::PodcastScript), 0);
    assert_eq!(
        events.recv().await.unwrap(),
        Event::Cancelled {
            topic: "Roman History".into()
        }
    );

    let snapshot = generator.snapshot("Roman History").await.unwrap();
    assert!(snapshot.chapters[0].podcast_script.is_none());
    assert!(generator.run_state().is_idle());
}

#[tokio::test]
async fn topics_lists_what_is_stored() {
    let provider = roman_history();
    let store = MemoryStore::new();
    let generator = generator_with(&["k1"], &provider, &store);
    assert!(generator.topics().await.unwrap().is_empty());

    for topic in ["Roman History", "Greek History"] {
        generator
            .run_generation(topic, GenerationOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(
        generator.topics().await.unwrap(),
        vec!["Greek History", "Roman History"]
    );

    generator.discard_topic("Roman History").await.unwrap();
    assert_eq!(generator.topics().await.unwrap(), vec!["Greek History"]);
}
