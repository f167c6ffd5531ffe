//! End-to-end session scenarios with a scripted ASR engine and an
//! in-memory injector.

use dictflow::asr::MockAsrEngine;
use dictflow::audio::capture::MockCapture;
use dictflow::audio::pcm;
use dictflow::clock::SystemClock;
use dictflow::defaults;
use dictflow::format::MockFormatter;
use dictflow::inject::MockInjector;
use dictflow::session::{Session, SessionConfig, SessionEvent, SessionStage};
use std::sync::Arc;

fn loud_chunk(ms: u64) -> Vec<u8> {
    let samples = (defaults::SAMPLE_RATE as u64 * ms / 1000) as usize;
    (0..samples).flat_map(|_| 12_000i16.to_le_bytes()).collect()
}

fn silent_chunk(ms: u64) -> Vec<u8> {
    vec![0u8; pcm::ms_to_bytes(ms)]
}

struct Pipeline {
    session: Arc<Session>,
    engine: Arc<MockAsrEngine>,
    injector: Arc<MockInjector>,
}

fn pipeline(config: SessionConfig, engine: MockAsrEngine, capture: MockCapture) -> Pipeline {
    let engine = Arc::new(engine);
    let injector = Arc::new(MockInjector::new());
    let session = Session::new(
        config,
        engine.clone(),
        injector.clone(),
        Arc::new(MockFormatter::new()),
        Box::new(capture),
        Arc::new(SystemClock),
    )
    .unwrap();
    Pipeline {
        session,
        engine,
        injector,
    }
}

async fn run_session(p: &Pipeline) -> (String, String) {
    let mut events = p.session.subscribe();
    p.session.handle_press().await.unwrap();
    p.session.handle_release().await.unwrap();

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::DictationCompleted { raw, formatted } = event {
            completed = Some((raw, formatted));
        }
    }
    completed.expect("session must emit dictation_completed")
}

#[tokio::test]
async fn trivial_flush_of_silence_produces_nothing() {
    // 100ms of digital silence with the default -52 dBFS gate: the
    // force-flushed slice is gated, ASR is never called.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new().with_push_text("should never appear"),
        MockCapture::new().with_chunk(silent_chunk(100)),
    );

    let (raw, formatted) = run_session(&p).await;
    assert_eq!(p.injector.screen(), "");
    assert_eq!(raw, "");
    assert_eq!(formatted, "");
    assert!(!p.engine.calls().contains(&"stream_push".to_string()));
}

#[tokio::test]
async fn simple_overlap_is_stitched_once() {
    // Two successive windows share the word "world"; the second
    // injection must not repeat it.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .with_push_text("hello world")
            .with_push_text("world today"),
        MockCapture::new()
            .with_chunk(loud_chunk(600))
            .with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(p.injector.screen(), "hello world today ");
    assert_eq!(raw, "hello world today");
}

#[tokio::test]
async fn floating_overlap_drops_restated_context() {
    // The second window restates the previous window's trailing
    // context before continuing.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .with_push_text("the quick brown fox")
            .with_push_text("quick brown fox jumps over"),
        MockCapture::new()
            .with_chunk(loud_chunk(600))
            .with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(p.injector.screen(), "the quick brown fox jumps over ");
    assert_eq!(raw, "the quick brown fox jumps over");
}

#[tokio::test]
async fn spoken_punctuation_is_rewritten_before_injection() {
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new().with_push_text("hello comma world full stop new line next"),
        MockCapture::new().with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(p.injector.screen(), "hello, world.\nnext ");
    assert_eq!(raw, "hello, world.\nnext");
}

#[tokio::test]
async fn backlog_selects_max_window_on_first_take() {
    // Five seconds of audio arrive at once: twice the backlog bound,
    // so the first ASR call must receive a max-window slice.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .with_push_text("part one")
            .with_push_text("part two")
            .with_push_text("part three"),
        MockCapture::new().with_chunk(loud_chunk(5_000)),
    );

    run_session(&p).await;

    let pushed = p.engine.pushed_bytes();
    assert!(!pushed.is_empty());
    assert_eq!(
        pushed[0],
        pcm::ms_to_bytes(defaults::MAX_ASR_WINDOW_MS as u64)
    );
    // Every byte fed eventually reaches ASR, exactly once.
    assert_eq!(pushed.iter().sum::<usize>(), pcm::ms_to_bytes(5_000));
}

#[tokio::test]
async fn final_pass_corrects_live_transcript() {
    // "helo world" streams live; the end-of-session pass hears it
    // properly and replaces the injected text.
    let config = SessionConfig {
        final_pass: true,
        ..Default::default()
    };
    let p = pipeline(
        config,
        MockAsrEngine::new()
            .with_push_text("helo world")
            .with_transcribe_text("hello world"),
        MockCapture::new().with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(
        p.injector.replacements(),
        vec![("helo world".to_string(), "hello world".to_string())]
    );
    assert_eq!(p.injector.screen(), "hello world");
    assert_eq!(raw, "hello world");
    assert!(p.engine.calls().contains(&"transcribe".to_string()));
}

#[tokio::test]
async fn final_pass_skipped_when_live_matches() {
    let config = SessionConfig {
        final_pass: true,
        ..Default::default()
    };
    let p = pipeline(
        config,
        MockAsrEngine::new()
            .with_push_text("hello world")
            .with_transcribe_text("hello world"),
        MockCapture::new().with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    // Same text: no replacement issued.
    assert!(p.injector.replacements().is_empty());
    assert_eq!(p.injector.screen(), "hello world ");
    assert_eq!(raw, "hello world");
}

#[tokio::test]
async fn injections_follow_asr_order() {
    // 1200ms of queued audio splits into a 960ms window and a 240ms
    // force-flushed remainder: two ASR calls, injected in call order.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .with_push_text("alpha bravo")
            .with_push_text("charlie delta"),
        MockCapture::new()
            .with_chunk(loud_chunk(600))
            .with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(p.engine.pushed_bytes().len(), 2);
    assert_eq!(raw, "alpha bravo charlie delta");
    assert_eq!(p.injector.screen(), "alpha bravo charlie delta ");
}

#[tokio::test]
async fn latency_report_tracks_each_injected_slice() {
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .with_push_text("one")
            .with_push_text("two"),
        MockCapture::new()
            .with_chunk(loud_chunk(600))
            .with_chunk(loud_chunk(600)),
    );

    run_session(&p).await;

    let report = p.session.latency_report();
    assert_eq!(report.slices, 2);
    // queue_ms <= end_to_end_ms holds per sample, so it also holds
    // for the maxima.
    assert!(report.queue_ms.max <= report.end_to_end_ms.max);
}

#[tokio::test]
async fn session_returns_to_idle_and_can_run_again() {
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new().with_push_text("first"),
        MockCapture::new().with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(raw, "first");
    assert_eq!(p.session.state().stage, SessionStage::Idle);

    // A second press/release cycle on the same session completes
    // cleanly even with no audio.
    let (raw, formatted) = run_session(&p).await;
    assert_eq!(raw, "");
    assert_eq!(formatted, "");
    assert_eq!(p.session.state().stage, SessionStage::Idle);
}

#[tokio::test]
async fn stateless_engine_sessions_still_complete() {
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new()
            .without_streaming()
            .with_push_text("whisper style"),
        MockCapture::new().with_chunk(loud_chunk(600)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(raw, "whisper style");
    // No stream control for a stateless backend.
    assert!(!p.engine.calls().contains(&"stream_reset".to_string()));
    assert!(!p.engine.calls().contains(&"stream_flush".to_string()));
}

#[tokio::test]
async fn capture_tail_chunk_is_transcribed() {
    // The tail held back by the recorder until stop() still flows
    // through the pipeline during drain.
    let p = pipeline(
        SessionConfig::default(),
        MockAsrEngine::new().with_push_text("tail words"),
        MockCapture::new().with_tail(loud_chunk(100)),
    );

    let (raw, _) = run_session(&p).await;
    assert_eq!(raw, "tail words");
    assert_eq!(p.injector.screen(), "tail words ");
}
