use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    config::{DisconnectPolicy, FeedbackConfig},
    error::Result,
    models::user::User,
    repositories::store::DiaryStore,
    services::generation::{FeedbackGenerator, FeedbackPrompt, UpstreamError},
};

/// Events buffered between the relay task and the response body.
const EVENT_BUFFER: usize = 16;

/// What the client sees on the feedback stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEvent {
    /// The next piece of generated text, in upstream order.
    Delta(String),
    /// The stream failed; nothing was persisted.
    Error(String),
    /// Generation finished. Always the last event of a successful stream.
    Done,
}

/// How a relay ended. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    Completed { persisted: bool },
    UpstreamError,
    ClientDisconnected { persisted: bool },
}

/// A running relay: the events for the client and the task's final outcome.
pub struct FeedbackStream {
    pub events: ReceiverStream<FeedbackEvent>,
    pub outcome: JoinHandle<FeedbackOutcome>,
}

/// Per-diary mutual exclusion for concurrent feedback requests.
#[derive(Clone, Default)]
pub struct DiaryLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Held for the lifetime of one relay when serialization is on.
pub struct DiaryLockGuard {
    locks: DiaryLocks,
    diary_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DiaryLocks {
    pub async fn acquire(&self, diary_id: Uuid) -> DiaryLockGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(diary_id).or_default().clone()
        };
        DiaryLockGuard {
            locks: self.clone(),
            diary_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for DiaryLockGuard {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this guard hold the mutex: nobody is waiting.
        if map
            .get(&self.diary_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            map.remove(&self.diary_id);
        }
        self.guard.take();
    }
}

/// Relays upstream feedback to the client and commits it on completion.
#[derive(Clone)]
pub struct FeedbackOrchestrator {
    diaries: Arc<dyn DiaryStore>,
    generator: Arc<dyn FeedbackGenerator>,
    config: FeedbackConfig,
    locks: DiaryLocks,
}

impl FeedbackOrchestrator {
    pub fn new(
        diaries: Arc<dyn DiaryStore>,
        generator: Arc<dyn FeedbackGenerator>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            diaries,
            generator,
            config,
            locks: DiaryLocks::default(),
        }
    }

    /// Resolves the diary and starts relaying.
    ///
    /// Fails with `NotFound` before any stream exists when `diary_id` is not
    /// owned by `owner`. Every later failure is delivered in-band as a
    /// `FeedbackEvent::Error`.
    pub async fn start(&self, owner: &User, diary_id: Uuid) -> Result<FeedbackStream> {
        let diary = self.diaries.get(owner.id, diary_id).await?;
        let prompt = FeedbackPrompt::for_diary(&diary, owner.display_name.as_deref());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let relay = Relay {
            diaries: self.diaries.clone(),
            generator: self.generator.clone(),
            config: self.config.clone(),
            locks: self.locks.clone(),
            owner_id: owner.id,
            diary_id,
            prompt,
            tx,
        };

        tracing::info!("🤖 Feedback requested for diary {}", diary_id);
        Ok(FeedbackStream {
            events: ReceiverStream::new(rx),
            outcome: tokio::spawn(relay.run()),
        })
    }
}

struct Relay {
    diaries: Arc<dyn DiaryStore>,
    generator: Arc<dyn FeedbackGenerator>,
    config: FeedbackConfig,
    locks: DiaryLocks,
    owner_id: Uuid,
    diary_id: Uuid,
    prompt: FeedbackPrompt,
    tx: mpsc::Sender<FeedbackEvent>,
}

impl Relay {
    async fn run(self) -> FeedbackOutcome {
        let _serialized = if self.config.serialize_per_diary {
            Some(self.locks.acquire(self.diary_id).await)
        } else {
            None
        };

        let idle = self.config.idle_timeout;
        let abort_on_disconnect = self.config.on_disconnect == DisconnectPolicy::Abort;

        let opened = match timeout(idle, self.generator.open(&self.prompt)).await {
            Ok(opened) => opened,
            Err(_) => Err(UpstreamError::IdleTimeout(idle)),
        };
        let mut upstream = match opened {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::error!("❌ Feedback stream for diary {} failed to open: {}", self.diary_id, e);
                let _ = self.tx.send(FeedbackEvent::Error(e.to_string())).await;
                return FeedbackOutcome::UpstreamError;
            }
        };

        let mut accumulated = String::new();
        let mut client_connected = true;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.tx.closed(), if client_connected => {
                    client_connected = false;
                    if abort_on_disconnect {
                        tracing::info!("🔌 Client left; dropping feedback stream for diary {}", self.diary_id);
                        return FeedbackOutcome::ClientDisconnected { persisted: false };
                    }
                    tracing::info!("🔌 Client left; draining feedback stream for diary {}", self.diary_id);
                    continue;
                }
                next = timeout(idle, upstream.next()) => {
                    next.unwrap_or(Some(Err(UpstreamError::IdleTimeout(idle))))
                }
            };

            match next {
                Some(Ok(delta)) => {
                    accumulated.push_str(&delta);
                    if client_connected && self.tx.send(FeedbackEvent::Delta(delta)).await.is_err() {
                        client_connected = false;
                        if abort_on_disconnect {
                            tracing::info!("🔌 Client left; dropping feedback stream for diary {}", self.diary_id);
                            return FeedbackOutcome::ClientDisconnected { persisted: false };
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("❌ Feedback stream for diary {} failed: {}", self.diary_id, e);
                    if client_connected {
                        let _ = self.tx.send(FeedbackEvent::Error(e.to_string())).await;
                    }
                    return FeedbackOutcome::UpstreamError;
                }
                None => break,
            }
        }
        drop(upstream);

        let persisted = self.commit(&accumulated).await;
        if client_connected && self.tx.send(FeedbackEvent::Done).await.is_ok() {
            FeedbackOutcome::Completed { persisted }
        } else {
            FeedbackOutcome::ClientDisconnected { persisted }
        }
    }

    /// Best-effort write of the finished text. Blank output is not stored.
    async fn commit(&self, accumulated: &str) -> bool {
        let feedback = accumulated.trim();
        if feedback.is_empty() {
            tracing::warn!("⚠️ Feedback for diary {} was empty; nothing stored", self.diary_id);
            return false;
        }

        match self
            .diaries
            .set_feedback(self.owner_id, self.diary_id, feedback)
            .await
        {
            Ok(_) => {
                tracing::info!("✅ Feedback stored for diary {}", self.diary_id);
                true
            }
            Err(e) => {
                tracing::error!("❌ Failed to store feedback for diary {}: {}", self.diary_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppError,
        models::{
            diary::{Diary, NewDiary},
            user::NewUser,
        },
        repositories::{memory::MemoryStore, store::UserDirectory},
        services::generation::DeltaStream,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    enum Script {
        Units(Vec<std::result::Result<String, UpstreamError>>),
        FailOpen(UpstreamError),
        Stall { after: Vec<String> },
        Slow { units: Vec<String>, gap: Duration },
    }

    struct ScriptedGenerator {
        script: Script,
        opened: AtomicUsize,
        prompts: Mutex<Vec<FeedbackPrompt>>,
    }

    impl ScriptedGenerator {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                opened: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FeedbackGenerator for ScriptedGenerator {
        async fn open(&self, prompt: &FeedbackPrompt) -> std::result::Result<DeltaStream, UpstreamError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            match self.script.clone() {
                Script::Units(units) => Ok(futures::stream::iter(units).boxed()),
                Script::FailOpen(e) => Err(e),
                Script::Stall { after } => Ok(futures::stream::iter(after.into_iter().map(Ok::<_, UpstreamError>))
                    .chain(futures::stream::pending())
                    .boxed()),
                Script::Slow { units, gap } => Ok(futures::stream::iter(units)
                    .then(move |unit| async move {
                        tokio::time::sleep(gap).await;
                        Ok::<_, UpstreamError>(unit)
                    })
                    .boxed()),
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        owner: User,
        diary: Diary,
    }

    async fn fixture(photo_url: Option<&str>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let owner = store
            .get_or_create(NewUser {
                external_subject_id: "S1".into(),
                email: "s1@example.com".into(),
                display_name: Some("Min".into()),
            })
            .await
            .unwrap();
        let diary = store
            .create(
                owner.id,
                NewDiary {
                    content: "Held through the dip".into(),
                    mood: "worried".into(),
                    photo_url: photo_url.map(str::to_string),
                    entry_moment: Utc::now(),
                },
            )
            .await
            .unwrap();
        Fixture { store, owner, diary }
    }

    fn orchestrator(
        fx: &Fixture,
        generator: Arc<ScriptedGenerator>,
        config: FeedbackConfig,
    ) -> FeedbackOrchestrator {
        FeedbackOrchestrator::new(fx.store.clone(), generator, config)
    }

    async fn drain(stream: FeedbackStream) -> (Vec<FeedbackEvent>, FeedbackOutcome) {
        let events: Vec<FeedbackEvent> = stream.events.collect().await;
        (events, stream.outcome.await.unwrap())
    }

    fn units(parts: &[&str]) -> Script {
        Script::Units(parts.iter().map(|p| Ok(p.to_string())).collect())
    }

    #[tokio::test]
    async fn completed_stream_is_relayed_and_stored() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(units(&["Good ", "job!"]));
        let stream = orchestrator(&fx, generator, FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        let (events, outcome) = drain(stream).await;
        assert_eq!(
            events,
            vec![
                FeedbackEvent::Delta("Good ".into()),
                FeedbackEvent::Delta("job!".into()),
                FeedbackEvent::Done,
            ]
        );
        assert_eq!(outcome, FeedbackOutcome::Completed { persisted: true });

        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback.as_deref(), Some("Good job!"));
        assert!(stored.updated_at > fx.diary.updated_at);
    }

    #[tokio::test]
    async fn unknown_diary_fails_before_streaming() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(units(&["x"]));
        let result = orchestrator(&fx, generator.clone(), FeedbackConfig::default())
            .start(&fx.owner, Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(AppError::NotFound)));
        assert_eq!(generator.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_failure_is_a_single_error_event() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::FailOpen(UpstreamError::Unavailable(
            "connection refused".into(),
        )));
        let stream = orchestrator(&fx, generator, FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        let (events, outcome) = drain(stream).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], FeedbackEvent::Error(msg) if msg.contains("connection refused")));
        assert_eq!(outcome, FeedbackOutcome::UpstreamError);

        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored, fx.diary);
    }

    #[tokio::test]
    async fn mid_stream_error_persists_nothing() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::Units(vec![
            Ok("Partial ".into()),
            Err(UpstreamError::Stream("reset by peer".into())),
        ]));
        let stream = orchestrator(&fx, generator, FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        let (events, outcome) = drain(stream).await;
        assert_eq!(events[0], FeedbackEvent::Delta("Partial ".into()));
        assert!(matches!(&events[1], FeedbackEvent::Error(_)));
        assert_eq!(events.len(), 2);
        assert_eq!(outcome, FeedbackOutcome::UpstreamError);

        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback, None);
    }

    #[tokio::test]
    async fn blank_output_sends_done_without_writing() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(units(&["  ", "\n"]));
        let stream = orchestrator(&fx, generator, FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        let (events, outcome) = drain(stream).await;
        assert_eq!(events.last(), Some(&FeedbackEvent::Done));
        assert_eq!(outcome, FeedbackOutcome::Completed { persisted: false });
        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback, None);
    }

    #[tokio::test]
    async fn stored_text_is_trimmed() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(units(&["\n  Nice", " work.  \n"]));
        let stream = orchestrator(&fx, generator, FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();
        drain(stream).await;

        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback.as_deref(), Some("Nice work."));
    }

    #[tokio::test]
    async fn idle_upstream_times_out() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::Stall {
            after: vec!["Thinking".into()],
        });
        let config = FeedbackConfig {
            idle_timeout: Duration::from_millis(50),
            ..FeedbackConfig::default()
        };
        let stream = orchestrator(&fx, generator, config)
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        let (events, outcome) = drain(stream).await;
        assert_eq!(events[0], FeedbackEvent::Delta("Thinking".into()));
        assert!(matches!(&events[1], FeedbackEvent::Error(msg) if msg.contains("stalled")));
        assert_eq!(outcome, FeedbackOutcome::UpstreamError);
        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback, None);
    }

    #[tokio::test]
    async fn drain_policy_stores_after_disconnect() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::Slow {
            units: vec!["Stay ".into(), "the ".into(), "course.".into()],
            gap: Duration::from_millis(20),
        });
        let config = FeedbackConfig {
            on_disconnect: DisconnectPolicy::Drain,
            ..FeedbackConfig::default()
        };
        let mut stream = orchestrator(&fx, generator, config)
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        assert_eq!(
            stream.events.next().await,
            Some(FeedbackEvent::Delta("Stay ".into()))
        );
        drop(stream.events);

        let outcome = stream.outcome.await.unwrap();
        assert_eq!(outcome, FeedbackOutcome::ClientDisconnected { persisted: true });
        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback.as_deref(), Some("Stay the course."));
    }

    #[tokio::test]
    async fn abort_policy_drops_upstream_on_disconnect() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::Slow {
            units: vec!["Stay ".into(), "the ".into(), "course.".into()],
            gap: Duration::from_millis(20),
        });
        let config = FeedbackConfig {
            on_disconnect: DisconnectPolicy::Abort,
            ..FeedbackConfig::default()
        };
        let mut stream = orchestrator(&fx, generator, config)
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();

        stream.events.next().await;
        drop(stream.events);

        let outcome = stream.outcome.await.unwrap();
        assert_eq!(outcome, FeedbackOutcome::ClientDisconnected { persisted: false });
        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback, None);
    }

    #[tokio::test]
    async fn only_http_photos_reach_the_prompt() {
        let fx = fixture(Some("file:///etc/passwd")).await;
        let generator = ScriptedGenerator::new(units(&["ok"]));
        let stream = orchestrator(&fx, generator.clone(), FeedbackConfig::default())
            .start(&fx.owner, fx.diary.id)
            .await
            .unwrap();
        drain(stream).await;

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].image_url, None);
        assert_eq!(prompts[0].display_name.as_deref(), Some("Min"));
        assert_eq!(prompts[0].mood, "worried");
    }

    #[tokio::test]
    async fn concurrent_requests_are_last_writer_wins_by_default() {
        let fx = fixture(None).await;
        let first = orchestrator(&fx, ScriptedGenerator::new(units(&["first"])), FeedbackConfig::default());
        let second = orchestrator(&fx, ScriptedGenerator::new(units(&["second"])), FeedbackConfig::default());

        let a = first.start(&fx.owner, fx.diary.id).await.unwrap();
        let (_, outcome_a) = drain(a).await;
        let b = second.start(&fx.owner, fx.diary.id).await.unwrap();
        let (_, outcome_b) = drain(b).await;

        assert_eq!(outcome_a, FeedbackOutcome::Completed { persisted: true });
        assert_eq!(outcome_b, FeedbackOutcome::Completed { persisted: true });
        let stored = fx.store.get(fx.owner.id, fx.diary.id).await.unwrap();
        assert_eq!(stored.llm_feedback.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn serialized_requests_run_one_at_a_time() {
        let fx = fixture(None).await;
        let generator = ScriptedGenerator::new(Script::Slow {
            units: vec!["a".into(), "b".into()],
            gap: Duration::from_millis(20),
        });
        let config = FeedbackConfig {
            serialize_per_diary: true,
            ..FeedbackConfig::default()
        };
        let orchestrator = orchestrator(&fx, generator.clone(), config);

        let first = orchestrator.start(&fx.owner, fx.diary.id).await.unwrap();
        let second = orchestrator.start(&fx.owner, fx.diary.id).await.unwrap();

        // The second relay waits on the lock, so only one upstream is open.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(generator.opened.load(Ordering::SeqCst), 1);

        let ((_, a), (_, b)) = tokio::join!(drain(first), drain(second));
        assert_eq!(a, FeedbackOutcome::Completed { persisted: true });
        assert_eq!(b, FeedbackOutcome::Completed { persisted: true });
        assert_eq!(generator.opened.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.locks.len(), 0);
    }
}
