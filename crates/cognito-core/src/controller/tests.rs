use super::*;

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream;
use tempfile::TempDir;
use tokio::sync::{oneshot, Notify};

use crate::audio::PlaybackControl;
use crate::gateway::{FragmentStream, Session};
use crate::prompts::FALLBACK_ERRORS;
use crate::state::Role;
use crate::store::{InMemoryChatStore, StoreError, StoreResult};

// ----- mock gateway -----

enum Reply {
    Fragments(Vec<&'static str>),
    FailOpen,
    FailAfter(Vec<&'static str>),
    Live(mpsc::UnboundedReceiver<Result<String>>),
}

#[derive(Default)]
struct GatewayState {
    replies: Mutex<VecDeque<Reply>>,
    sessions: Mutex<Vec<(Vec<Message>, Mode)>>,
    payloads: Mutex<Vec<String>>,
    title: Mutex<Option<String>>,
    title_gate: Mutex<Option<Arc<Notify>>>,
    speech: Mutex<Option<Vec<u8>>>,
    speech_calls: AtomicUsize,
    speech_gate: Mutex<Option<Arc<Notify>>>,
}

#[derive(Clone, Default)]
struct MockGateway(Arc<GatewayState>);

impl MockGateway {
    fn fragments(&self, fragments: &[&'static str]) {
        self.reply(Reply::Fragments(fragments.to_vec()));
    }

    fn reply(&self, reply: Reply) {
        self.0.replies.lock().push_back(reply);
    }

    /// Stream whose fragments the test pushes by hand
    fn live(&self) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.reply(Reply::Live(rx));
        tx
    }

    fn set_title(&self, title: &str) {
        *self.0.title.lock() = Some(title.to_string());
    }

    fn gate_title(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.0.title_gate.lock() = Some(gate.clone());
        gate
    }

    fn set_speech(&self, pcm: &[u8]) {
        *self.0.speech.lock() = Some(pcm.to_vec());
    }

    fn gate_speech(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.0.speech_gate.lock() = Some(gate.clone());
        gate
    }

    fn speech_calls(&self) -> usize {
        self.0.speech_calls.load(Ordering::SeqCst)
    }

    fn last_payload(&self) -> String {
        self.0.payloads.lock().last().cloned().unwrap_or_default()
    }

    fn last_session(&self) -> (Vec<Message>, Mode) {
        self.0.sessions.lock().last().cloned().expect("a session was created")
    }
}

struct MockSession {
    shared: Arc<GatewayState>,
}

#[async_trait]
impl Session for MockSession {
    async fn send_streaming(&mut self, text: &str) -> Result<FragmentStream> {
        self.shared.payloads.lock().push(text.to_string());
        let reply = self
            .shared
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Reply::Fragments(Vec::new()));

        match reply {
            Reply::Fragments(fragments) => Ok(Box::pin(stream::iter(
                fragments.into_iter().map(|f| Ok::<_, anyhow::Error>(f.to_string())),
            ))),
            Reply::FailOpen => Err(anyhow!("connection refused")),
            Reply::FailAfter(fragments) => Ok(Box::pin(stream::iter(
                fragments
                    .into_iter()
                    .map(|f| Ok::<_, anyhow::Error>(f.to_string()))
                    .chain(std::iter::once(Err(anyhow!("stream reset")))),
            ))),
            Reply::Live(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
        }
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn create_session(&self, history: &[Message], mode: Mode) -> Box<dyn Session> {
        self.0.sessions.lock().push((history.to_vec(), mode));
        Box::new(MockSession {
            shared: self.0.clone(),
        })
    }

    async fn summarize_title(&self, _user: &Message, _model: &Message) -> Result<String> {
        let gate = self.0.title_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.0
            .title
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("title unavailable"))
    }

    async fn synthesize_speech(&self, _text: &str) -> Option<Vec<u8>> {
        self.0.speech_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.0.speech_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.0.speech.lock().clone()
    }
}

// ----- mock audio -----

#[derive(Default)]
struct AudioLog {
    plays: Mutex<Vec<Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    finishers: Mutex<Vec<Option<oneshot::Sender<Result<()>>>>>,
    fail: AtomicBool,
}

#[derive(Clone, Default)]
struct MockAudio(Arc<AudioLog>);

impl MockAudio {
    fn plays(&self) -> usize {
        self.0.plays.lock().len()
    }

    fn calls(&self) -> Vec<String> {
        self.0.calls.lock().clone()
    }

    /// Let playback `n` (1-based) play out naturally
    fn finish(&self, n: usize) {
        if let Some(tx) = self.0.finishers.lock()[n - 1].take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Make playback `n` break down part way
    fn break_down(&self, n: usize) {
        if let Some(tx) = self.0.finishers.lock()[n - 1].take() {
            let _ = tx.send(Err(anyhow!("device unplugged")));
        }
    }

    /// Playback `n` goes away without reporting anything
    fn vanish(&self, n: usize) {
        self.0.finishers.lock()[n - 1].take();
    }
}

struct MockControl {
    n: usize,
    log: Arc<AudioLog>,
}

impl PlaybackControl for MockControl {
    fn pause(&mut self) -> Result<()> {
        self.log.calls.lock().push(format!("pause {}", self.n));
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.log.calls.lock().push(format!("resume {}", self.n));
        Ok(())
    }

    fn stop(&mut self) {
        self.log.calls.lock().push(format!("stop {}", self.n));
    }
}

#[async_trait]
impl AudioBackend for MockAudio {
    async fn play(&self, pcm: Vec<u8>) -> Result<Playback> {
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("no audio device"));
        }
        let n = {
            let mut plays = self.0.plays.lock();
            plays.push(pcm);
            plays.len()
        };
        self.0.calls.lock().push(format!("play {}", n));

        let (tx, rx) = oneshot::channel();
        self.0.finishers.lock().push(Some(tx));
        Ok(Playback {
            control: Box::new(MockControl {
                n,
                log: self.0.clone(),
            }),
            finished: rx,
        })
    }
}

// ----- stores -----

struct FailingStore;

#[async_trait]
impl ChatStore for FailingStore {
    async fn load_all(&self) -> StoreResult<Vec<Chat>> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk gone",
        )))
    }

    async fn put(&self, _chat: &Chat) -> StoreResult<()> {
        Ok(())
    }

    async fn delete_one(&self, _id: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountingStore {
    inner: InMemoryChatStore,
    puts: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatStore for CountingStore {
    async fn load_all(&self) -> StoreResult<Vec<Chat>> {
        self.inner.load_all().await
    }

    async fn put(&self, chat: &Chat) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(chat).await
    }

    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_one(id).await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.inner.delete_all().await
    }
}

// ----- harness -----

struct Harness {
    controller: Controller,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    gateway: MockGateway,
    audio: MockAudio,
    store: InMemoryChatStore,
}

impl Harness {
    fn with_store(store: InMemoryChatStore) -> Self {
        let gateway = MockGateway::default();
        let audio = MockAudio::default();
        let (controller, events) = Controller::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(audio.clone()),
            ControllerConfig::default(),
        );
        Self {
            controller,
            events,
            gateway,
            audio,
            store,
        }
    }

    async fn loaded() -> Self {
        Self::seeded(Vec::new()).await
    }

    async fn seeded(chats: Vec<Chat>) -> Self {
        let harness = Self::with_store(InMemoryChatStore::with_chats(chats));
        harness.controller.load().await;
        harness
    }

    fn active(&self) -> Chat {
        self.controller
            .snapshot()
            .active_chat()
            .cloned()
            .expect("an active chat")
    }

    fn speech(&self) -> SpeechState {
        self.controller.snapshot().speech
    }

    fn alerts(&mut self) -> Vec<String> {
        let mut alerts = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let ControllerEvent::Alert(text) = event {
                alerts.push(text);
            }
        }
        alerts
    }
}

/// Let spawned side effects and debounce timers run out
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn chat_with(created_at: i64, turns: &[(Role, &str)]) -> Chat {
    let mut chat = Chat::new();
    chat.created_at = created_at;
    chat.messages = turns.iter().map(|(role, text)| Message::new(*role, *text)).collect();
    chat
}

fn turns(chat: &Chat) -> Vec<(Role, String)> {
    chat.messages.iter().map(|m| (m.role, m.content.clone())).collect()
}

fn encoded(pcm: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm)
}

// ----- sending -----

#[tokio::test(start_paused = true)]
async fn test_streamed_fragments_concatenate_in_order() {
    let h = Harness::loaded().await;
    let cases: Vec<Vec<&'static str>> = vec![
        vec![],
        vec!["Hello world"],
        vec!["a", "b", "c", "d"],
        vec!["", "multi\nline ", "", "end"],
    ];

    for fragments in cases {
        h.controller.new_chat().await;
        h.gateway.fragments(&fragments);
        h.controller.send_message("question", None).await.unwrap();

        let chat = h.active();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].role, Role::Model);
        assert_eq!(chat.messages[1].content, fragments.concat());
    }
    assert!(!h.controller.snapshot().generating);
}

#[tokio::test(start_paused = true)]
async fn test_first_send_creates_chat_and_titles_it() {
    let h = Harness::loaded().await;
    h.gateway.set_title("Friendly Greeting");
    let gate = h.gateway.gate_title();
    h.gateway.fragments(&["Hi", " there!"]);

    h.controller.send_message("Hello", None).await.unwrap();

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.chats.len(), 1);
    let chat = snapshot.active_chat().unwrap();
    assert_eq!(chat.title, PLACEHOLDER_TITLE);
    assert_eq!(
        turns(chat),
        vec![(Role::User, "Hello".to_string()), (Role::Model, "Hi there!".to_string())]
    );
    assert!(h.gateway.last_session().0.is_empty());

    gate.notify_one();
    settle().await;

    assert_eq!(h.active().title, "Friendly Greeting");
    let stored = h.store.get(&chat.id).unwrap();
    assert_eq!(stored.title, "Friendly Greeting");
    assert_eq!(stored.messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_substitutes_fallback() {
    let h = Harness::loaded().await;
    let replies = vec![
        Reply::FailAfter(vec![]),
        Reply::FailOpen,
        Reply::FailAfter(vec!["partial ", "answer"]),
    ];

    for reply in replies {
        h.gateway.reply(reply);
        h.controller.send_message("Hello", None).await.unwrap();

        let chat = h.active();
        let answer = &chat.messages.last().unwrap().content;
        assert!(FALLBACK_ERRORS.contains(&answer.as_str()), "unexpected answer {answer:?}");
        assert!(!h.controller.snapshot().generating);
    }
    settle().await;
    assert_eq!(h.active().title, PLACEHOLDER_TITLE);
    assert_eq!(h.gateway.speech_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_preconditions() {
    let h = Harness::loaded().await;
    assert!(matches!(
        h.controller.send_message("   ", None).await,
        Err(ControllerError::EmptyMessage)
    ));
    assert!(h.controller.snapshot().chats.is_empty());

    let tx = h.gateway.live();
    let c = h.controller.clone();
    let task = tokio::spawn(async move { c.send_message("first", None).await });
    wait_until(|| h.controller.snapshot().generating).await;

    assert!(matches!(
        h.controller.send_message("second", None).await,
        Err(ControllerError::Busy)
    ));
    assert!(matches!(h.controller.regenerate().await, Err(ControllerError::Busy)));

    drop(tx);
    task.await.unwrap().unwrap();
    assert_eq!(h.active().messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_fragments_seen_before_stop() {
    let h = Harness::loaded().await;
    let tx = h.gateway.live();
    let c = h.controller.clone();
    let task = tokio::spawn(async move { c.send_message("Go", None).await });

    tx.send(Ok("one".to_string())).unwrap();
    tx.send(Ok(" two".to_string())).unwrap();
    wait_until(|| {
        h.controller
            .snapshot()
            .active_chat()
            .map(|c| c.messages[1].content == "one two")
            .unwrap_or(false)
    })
    .await;

    h.controller.stop_generation();
    assert!(!h.controller.snapshot().generating);

    tx.send(Ok(" three".to_string())).unwrap();
    task.await.unwrap().unwrap();

    settle().await;
    let chat = h.active();
    assert_eq!(chat.messages[1].content, "one two");
    assert_eq!(chat.title, PLACEHOLDER_TITLE);
    assert_eq!(h.gateway.speech_calls(), 0);
    assert_eq!(h.store.get(&chat.id).unwrap().messages[1].content, "one two");
}

#[tokio::test(start_paused = true)]
async fn test_stopped_generation_cannot_clear_newer_one() {
    let h = Harness::loaded().await;
    let first = h.gateway.live();
    let c = h.controller.clone();
    let first_task = tokio::spawn(async move { c.send_message("one", None).await });
    wait_until(|| h.controller.snapshot().generating).await;
    h.controller.stop_generation();

    let second = h.gateway.live();
    let c = h.controller.clone();
    let second_task = tokio::spawn(async move { c.send_message("two", None).await });
    wait_until(|| h.active().messages.len() == 4).await;

    first.send(Ok("late".to_string())).unwrap();
    first_task.await.unwrap().unwrap();
    assert!(h.controller.snapshot().generating);
    assert_eq!(h.active().messages[1].content, "");

    second.send(Ok("answer".to_string())).unwrap();
    drop(second);
    second_task.await.unwrap().unwrap();
    assert!(!h.controller.snapshot().generating);
    assert_eq!(h.active().messages[3].content, "answer");
}

#[tokio::test(start_paused = true)]
async fn test_coding_side_context_only_reaches_model() {
    let h = Harness::loaded().await;
    h.controller.switch_mode(Mode::Coding).await.unwrap();
    h.gateway.fragments(&["Try this"]);

    let side = SideContext {
        code: Some("print(1)".to_string()),
        console_output: Some("NameError".to_string()),
    };
    h.controller.send_message("Fix it", Some(side)).await.unwrap();

    let payload = h.gateway.last_payload();
    assert!(payload.starts_with("Fix it"));
    assert!(payload.contains("--- CODE BUFFER ---\nprint(1)"));
    assert!(payload.contains("--- CONSOLE OUTPUT ---\nNameError"));
    assert_eq!(h.gateway.last_session().1, Mode::Coding);

    let chat = h.active();
    assert_eq!(chat.messages[0].content, "Fix it");
    assert_eq!(chat.title, CODING_TITLE);
}

#[tokio::test(start_paused = true)]
async fn test_side_context_ignored_in_conversation() {
    let h = Harness::loaded().await;
    let side = SideContext {
        code: Some("print(1)".to_string()),
        console_output: None,
    };
    h.controller.send_message("Hello", Some(side)).await.unwrap();
    assert_eq!(h.gateway.last_payload(), "Hello");
}

// ----- regenerate -----

#[tokio::test(start_paused = true)]
async fn test_regenerate_replaces_last_answer() {
    let seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "Old")]);
    let id = seeded.id.clone();
    let h = Harness::seeded(vec![seeded]).await;
    h.controller.select_chat(&id).unwrap();
    h.gateway.fragments(&["New", " answer"]);

    h.controller.regenerate().await.unwrap();

    let chat = h.active();
    assert_eq!(
        turns(&chat),
        vec![(Role::User, "Q".to_string()), (Role::Model, "New answer".to_string())]
    );
    assert!(h.gateway.last_session().0.is_empty());
    assert_eq!(h.gateway.last_payload(), "Q");
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_matches_truncate_then_send() {
    let long = chat_with(
        2,
        &[
            (Role::User, "Q1"),
            (Role::Model, "A1"),
            (Role::User, "Q2"),
            (Role::Model, "A2"),
        ],
    );
    let short = chat_with(1, &[(Role::User, "Q1"), (Role::Model, "A1")]);
    let (long_id, short_id) = (long.id.clone(), short.id.clone());
    let h = Harness::seeded(vec![long, short]).await;

    h.controller.select_chat(&long_id).unwrap();
    h.gateway.fragments(&["fresh", " A2"]);
    h.controller.regenerate().await.unwrap();
    let regenerated = h.active();
    let regen_history = h.gateway.last_session().0;

    h.controller.select_chat(&short_id).unwrap();
    h.gateway.fragments(&["fresh", " A2"]);
    h.controller.send_message("Q2", None).await.unwrap();
    let sent = h.active();
    let send_history = h.gateway.last_session().0;

    assert_eq!(turns(&regenerated), turns(&sent));
    let contents = |history: &[Message]| history.iter().map(|m| m.content.clone()).collect::<Vec<_>>();
    assert_eq!(contents(&regen_history), contents(&send_history));
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_preconditions() {
    let h = Harness::loaded().await;
    assert!(matches!(h.controller.regenerate().await, Err(ControllerError::NoActiveChat)));

    h.controller.new_chat().await;
    assert!(matches!(
        h.controller.regenerate().await,
        Err(ControllerError::NothingToRegenerate)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_stops_playback_of_removed_answer() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "Old")]);
    seeded.messages[1].audio_content = Some(encoded(&[1, 2]));
    let (chat_id, answer_id) = (seeded.id.clone(), seeded.messages[1].id.clone());
    let h = Harness::seeded(vec![seeded]).await;
    h.controller.select_chat(&chat_id).unwrap();

    h.controller.toggle_speech(&answer_id).await.unwrap();
    assert!(h.speech().is_playing(&answer_id));

    h.gateway.fragments(&["New"]);
    h.controller.regenerate().await.unwrap();
    assert!(h.audio.calls().contains(&"stop 1".to_string()));
    assert_ne!(h.speech().message_id(), Some(answer_id.as_str()));
}

// ----- speech -----

#[tokio::test(start_paused = true)]
async fn test_toggle_same_message_pauses_and_resumes() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    seeded.messages[1].audio_content = Some(encoded(&[1, 2, 3, 4]));
    let id = seeded.messages[1].id.clone();
    let h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.speech(), SpeechState::Playing(id.clone()));
    assert_eq!(h.audio.0.plays.lock()[0], vec![1, 2, 3, 4]);

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.speech(), SpeechState::Paused(id.clone()));

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.speech(), SpeechState::Playing(id.clone()));

    assert_eq!(h.audio.calls(), vec!["play 1", "pause 1", "resume 1"]);
    assert_eq!(h.gateway.speech_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_other_message_stops_first() {
    let mut seeded = chat_with(
        1,
        &[(Role::User, "Q"), (Role::Model, "A"), (Role::User, "Q2"), (Role::Model, "B")],
    );
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    seeded.messages[3].audio_content = Some(encoded(&[2]));
    let (a, b) = (seeded.messages[1].id.clone(), seeded.messages[3].id.clone());
    let h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&a).await.unwrap();
    h.controller.toggle_speech(&a).await.unwrap();
    h.controller.toggle_speech(&b).await.unwrap();

    assert_eq!(h.speech(), SpeechState::Playing(b));
    assert_eq!(h.audio.calls(), vec!["play 1", "pause 1", "stop 1", "play 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_natural_completion_only_ends_active_playback() {
    let mut seeded = chat_with(
        1,
        &[(Role::User, "Q"), (Role::Model, "A"), (Role::User, "Q2"), (Role::Model, "B")],
    );
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    seeded.messages[3].audio_content = Some(encoded(&[2]));
    let (a, b) = (seeded.messages[1].id.clone(), seeded.messages[3].id.clone());
    let h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&a).await.unwrap();
    h.controller.toggle_speech(&b).await.unwrap();
    h.controller.toggle_speech(&a).await.unwrap();

    // first playback of `a` was stopped; its late completion must not end the third
    h.audio.finish(1);
    settle().await;
    assert_eq!(h.speech(), SpeechState::Playing(a.clone()));

    h.audio.finish(3);
    settle().await;
    assert_eq!(h.speech(), SpeechState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_caches_audio_and_plays() {
    let seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "Spoken answer")]);
    let (chat_id, id) = (seeded.id.clone(), seeded.messages[1].id.clone());
    let h = Harness::seeded(vec![seeded]).await;
    h.gateway.set_speech(&[9, 9, 9, 9]);

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.gateway.speech_calls(), 1);
    assert!(h.speech().is_playing(&id));

    settle().await;
    let stored = h.store.get(&chat_id).unwrap();
    assert_eq!(stored.messages[1].audio_content, Some(encoded(&[9, 9, 9, 9])));

    h.audio.finish(1);
    settle().await;
    assert_eq!(h.speech(), SpeechState::Idle);

    // cached audio is reused
    h.controller.toggle_speech(&id).await.unwrap();
    assert!(h.speech().is_playing(&id));
    assert_eq!(h.audio.plays(), 2);
    assert_eq!(h.gateway.speech_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_alerts_and_idles() {
    let seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    let id = seeded.messages[1].id.clone();
    let mut h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.alerts().len(), 1);
    assert!(h.controller.snapshot().synthesizing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_synthesis_deduplicated() {
    let seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    let id = seeded.messages[1].id.clone();
    let h = Harness::seeded(vec![seeded]).await;
    h.gateway.set_speech(&[5, 5]);
    let gate = h.gateway.gate_speech();

    let (c1, id1) = (h.controller.clone(), id.clone());
    let first = tokio::spawn(async move { c1.toggle_speech(&id1).await });
    wait_until(|| h.controller.snapshot().synthesizing.contains(&id)).await;

    h.controller.toggle_speech(&id).await.unwrap();
    gate.notify_one();
    first.await.unwrap().unwrap();

    assert_eq!(h.gateway.speech_calls(), 1);
    assert_eq!(h.audio.plays(), 1);
    assert!(h.speech().is_playing(&id));
}

#[tokio::test(start_paused = true)]
async fn test_playback_start_failure_alerts() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    let id = seeded.messages[1].id.clone();
    let mut h = Harness::seeded(vec![seeded]).await;
    h.audio.0.fail.store(true, Ordering::SeqCst);

    h.controller.toggle_speech(&id).await.unwrap();
    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_playback_breaking_down_alerts_and_idles() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    let id = seeded.messages[1].id.clone();
    let mut h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&id).await.unwrap();
    h.audio.break_down(1);
    settle().await;
    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.alerts().len(), 1);

    // a playback that disappears without a result counts as failed too
    h.controller.toggle_speech(&id).await.unwrap();
    h.controller.toggle_speech(&id).await.unwrap();
    assert!(h.speech().is_paused(&id));
    h.audio.vanish(2);
    settle().await;
    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_playback_does_not_alert() {
    let mut seeded = chat_with(
        1,
        &[(Role::User, "Q"), (Role::Model, "A"), (Role::User, "Q2"), (Role::Model, "B")],
    );
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    seeded.messages[3].audio_content = Some(encoded(&[2]));
    let (a, b) = (seeded.messages[1].id.clone(), seeded.messages[3].id.clone());
    let mut h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&a).await.unwrap();
    h.controller.toggle_speech(&b).await.unwrap();
    h.audio.vanish(1);
    settle().await;

    assert_eq!(h.speech(), SpeechState::Playing(b));
    assert!(h.alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_requested_speech_stops_current_playback_before_starting() {
    let mut seeded = chat_with(
        1,
        &[(Role::User, "Q"), (Role::Model, "A"), (Role::User, "Q2"), (Role::Model, "B")],
    );
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    let (a, b) = (seeded.messages[1].id.clone(), seeded.messages[3].id.clone());
    let h = Harness::seeded(vec![seeded]).await;
    h.gateway.set_speech(&[2, 2]);
    let gate = h.gateway.gate_speech();

    let (c, pending) = (h.controller.clone(), b.clone());
    let synthesis = tokio::spawn(async move { c.toggle_speech(&pending).await });
    wait_until(|| h.controller.snapshot().synthesizing.contains(&b)).await;

    // the user plays another message while synthesis is running
    h.controller.toggle_speech(&a).await.unwrap();
    gate.notify_one();
    synthesis.await.unwrap().unwrap();

    assert_eq!(h.audio.calls(), vec!["play 1", "stop 1", "play 2"]);
    assert_eq!(h.speech(), SpeechState::Playing(b));
}

#[tokio::test(start_paused = true)]
async fn test_finished_answer_caches_speech_without_playing() {
    let h = Harness::loaded().await;
    h.gateway.set_speech(&[7, 7]);
    h.gateway.fragments(&["Spoken"]);

    h.controller.send_message("Talk to me", None).await.unwrap();
    settle().await;

    let answer = h.active().messages[1].clone();
    assert_eq!(answer.audio_content, Some(encoded(&[7, 7])));
    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.audio.plays(), 0);
    assert_eq!(h.gateway.speech_calls(), 1);

    // the cached audio plays on request without another synthesis
    h.controller.toggle_speech(&answer.id).await.unwrap();
    assert!(h.speech().is_playing(&answer.id));
    assert_eq!(h.gateway.speech_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_finished_answer_leaves_current_playback_alone() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    let (chat_id, a) = (seeded.id.clone(), seeded.messages[1].id.clone());
    let h = Harness::seeded(vec![seeded]).await;
    h.gateway.set_speech(&[3, 3]);
    h.gateway.fragments(&["Next answer"]);
    h.controller.select_chat(&chat_id).unwrap();

    h.controller.toggle_speech(&a).await.unwrap();
    h.controller.send_message("next", None).await.unwrap();
    settle().await;

    assert_eq!(h.speech(), SpeechState::Playing(a));
    assert_eq!(h.audio.calls(), vec!["play 1"]);
    assert_eq!(h.active().messages[3].audio_content, Some(encoded(&[3, 3])));
}

#[tokio::test(start_paused = true)]
async fn test_toggle_unknown_message() {
    let h = Harness::loaded().await;
    assert!(matches!(
        h.controller.toggle_speech("missing").await,
        Err(ControllerError::MessageNotFound(_))
    ));
}

// ----- chat list -----

#[tokio::test(start_paused = true)]
async fn test_delete_active_selects_neighbour() {
    let h = Harness::loaded().await;
    let c1 = h.controller.new_chat().await;
    let c2 = h.controller.new_chat().await;
    let c3 = h.controller.new_chat().await;
    // list is newest first: c3, c2, c1

    h.controller.select_chat(&c2).unwrap();
    h.controller.delete_chat(&c2).await.unwrap();
    assert_eq!(h.controller.snapshot().active_chat_id, Some(c3.clone()));

    h.controller.delete_chat(&c3).await.unwrap();
    assert_eq!(h.controller.snapshot().active_chat_id, Some(c1.clone()));

    h.controller.delete_chat(&c1).await.unwrap();
    assert_eq!(h.controller.snapshot().active_chat_id, None);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_inactive_keeps_selection() {
    let h = Harness::loaded().await;
    let c1 = h.controller.new_chat().await;
    let c2 = h.controller.new_chat().await;

    h.controller.delete_chat(&c1).await.unwrap();
    assert_eq!(h.controller.snapshot().active_chat_id, Some(c2));
    assert!(matches!(
        h.controller.delete_chat(&c1).await,
        Err(ControllerError::ChatNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_delete_stops_speaking_chat() {
    let mut seeded = chat_with(1, &[(Role::User, "Q"), (Role::Model, "A")]);
    seeded.messages[1].audio_content = Some(encoded(&[1]));
    let (chat_id, id) = (seeded.id.clone(), seeded.messages[1].id.clone());
    let h = Harness::seeded(vec![seeded]).await;

    h.controller.toggle_speech(&id).await.unwrap();
    h.controller.delete_chat(&chat_id).await.unwrap();

    assert_eq!(h.speech(), SpeechState::Idle);
    assert_eq!(h.audio.calls(), vec!["play 1", "stop 1"]);
}

#[tokio::test(start_paused = true)]
async fn test_delete_cancels_pending_write() {
    let h = Harness::loaded().await;
    let id = h.controller.new_chat().await;
    h.controller.rename_chat(&id, "Doomed").unwrap();
    h.controller.delete_chat(&id).await.unwrap();

    settle().await;
    assert!(h.store.get(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_all() {
    let seeded = vec![
        chat_with(1, &[(Role::User, "a")]),
        chat_with(2, &[(Role::User, "b")]),
    ];
    let h = Harness::seeded(seeded).await;
    h.controller.new_chat().await;

    h.controller.delete_all_chats().await;
    settle().await;

    let snapshot = h.controller.snapshot();
    assert!(snapshot.chats.is_empty());
    assert!(snapshot.active_chat_id.is_none());
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_title_for_deleted_chat_is_dropped() {
    let h = Harness::loaded().await;
    h.gateway.set_title("Too Late");
    let gate = h.gateway.gate_title();
    h.gateway.fragments(&["Hi"]);
    h.controller.send_message("Hello", None).await.unwrap();
    let id = h.active().id;

    h.controller.delete_chat(&id).await.unwrap();
    gate.notify_one();
    settle().await;

    assert!(h.controller.snapshot().chats.is_empty());
    assert!(h.store.get(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rename_persists_and_wins_over_late_title() {
    let h = Harness::loaded().await;
    h.gateway.set_title("Generated");
    let gate = h.gateway.gate_title();
    h.gateway.fragments(&["Hi"]);
    h.controller.send_message("Hello", None).await.unwrap();
    let id = h.active().id;

    h.controller.rename_chat(&id, "  Mine  ").unwrap();
    gate.notify_one();
    settle().await;

    assert_eq!(h.active().title, "Mine");
    assert_eq!(h.store.get(&id).unwrap().title, "Mine");

    h.controller.rename_chat(&id, "   ").unwrap();
    assert_eq!(h.active().title, PLACEHOLDER_TITLE);
    assert!(matches!(
        h.controller.rename_chat("missing", "x"),
        Err(ControllerError::ChatNotFound(_))
    ));
}

// ----- persistence -----

#[tokio::test(start_paused = true)]
async fn test_no_write_before_load() {
    let stored = chat_with(1, &[(Role::User, "old")]);
    let stored_id = stored.id.clone();
    let h = Harness::with_store(InMemoryChatStore::with_chats(vec![stored]));

    let early = h.controller.new_chat().await;
    settle().await;
    assert!(h.store.get(&early).is_none());

    h.controller.load().await;
    let snapshot = h.controller.snapshot();
    assert!(snapshot.loaded);
    let ids: Vec<&str> = snapshot.chats.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![early.as_str(), stored_id.as_str()]);
    assert_eq!(snapshot.active_chat_id, Some(early.clone()));

    settle().await;
    assert!(h.store.get(&early).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_load_failure_starts_empty() {
    let (controller, _events) = Controller::new(
        Arc::new(FailingStore),
        Arc::new(MockGateway::default()),
        Arc::new(MockAudio::default()),
        ControllerConfig::default(),
    );
    controller.load().await;

    let snapshot = controller.snapshot();
    assert!(snapshot.loaded);
    assert!(snapshot.chats.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_streaming_writes_are_coalesced() {
    let store = CountingStore::default();
    let gateway = MockGateway::default();
    gateway.fragments(&["a", "b", "c", "d", "e"]);
    let (controller, _events) = Controller::new(
        Arc::new(store.clone()),
        Arc::new(gateway.clone()),
        Arc::new(MockAudio::default()),
        ControllerConfig::default(),
    );
    controller.load().await;

    controller.send_message("Hello", None).await.unwrap();
    settle().await;

    // one immediate write on creation, one debounced write for the whole turn
    assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    let id = controller.snapshot().active_chat_id.unwrap();
    assert_eq!(store.inner.get(&id).unwrap().messages[1].content, "abcde");
}

// ----- mode -----

#[tokio::test(start_paused = true)]
async fn test_enter_coding_mode_phases() {
    let h = Harness::loaded().await;
    let c = h.controller.clone();
    let task = tokio::spawn(async move { c.switch_mode(Mode::Coding).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.transition, Transition::Entering);
    assert_eq!(snapshot.view, View::Chat);
    assert!(snapshot.active_chat().is_some());
    assert!(matches!(
        h.controller.switch_mode(Mode::Conversational).await,
        Err(ControllerError::TransitionInProgress)
    ));

    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(h.controller.snapshot().mode, Mode::Conversational);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.mode, Mode::Coding);
    assert_eq!(snapshot.view, View::Playground);
    assert_eq!(snapshot.transition, Transition::None);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exit_coding_mode_swaps_under_overlay() {
    let h = Harness::loaded().await;
    h.controller.switch_mode(Mode::Coding).await.unwrap();
    let chats_before = h.controller.snapshot().chats.len();

    let c = h.controller.clone();
    let task = tokio::spawn(async move { c.switch_mode(Mode::Conversational).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.transition, Transition::Exiting);
    assert_eq!(snapshot.view, View::Playground);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.view, View::Chat);
    assert_eq!(snapshot.mode, Mode::Conversational);
    assert_eq!(snapshot.transition, Transition::Exiting);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.controller.snapshot().transition, Transition::None);
    task.await.unwrap().unwrap();
    assert_eq!(h.controller.snapshot().chats.len(), chats_before);
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_current_mode_is_noop() {
    let h = Harness::loaded().await;
    h.controller.switch_mode(Mode::Conversational).await.unwrap();
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.transition, Transition::None);
    assert!(snapshot.chats.is_empty());
}

// ----- export -----

#[tokio::test(start_paused = true)]
async fn test_export_active_chat() {
    let h = Harness::loaded().await;
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        h.controller.export_active_chat(dir.path()),
        Err(ControllerError::NoActiveChat)
    ));

    h.gateway.fragments(&["Hi", " there!"]);
    h.controller.send_message("Hello", None).await.unwrap();
    let id = h.active().id;
    h.controller.rename_chat(&id, "Greetings, friend!").unwrap();

    let path = h.controller.export_active_chat(dir.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), "Greetings_friend.txt");
    let text = std::fs::read_to_string(path).unwrap();
    assert_eq!(text, "user: Hello\n\nmodel: Hi there!");
}
