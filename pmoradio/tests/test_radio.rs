#![cfg(unix)]

use bytes::Bytes;
use pmoaudiocache::{TranscodeCache, TranscodeSettings, WarmUpReport};
use pmoplaylist::{Playlist, Rotation};
use pmoradio::{
    ClientRegistry, ClientStream, EngineConfig, EngineState, PlaybackEngine, Pop, Radio,
    RadioError, RadioSettings,
};
use pmoutils::CommandTemplate;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn copy_encoder() -> CommandTemplate {
    CommandTemplate::new("sh", ["-c", r#"cp "$0" "$1""#, "{input}", "{output}"])
}

fn settings(root: &Path, interval_ms: u64) -> RadioSettings {
    RadioSettings {
        music_dir: root.join("music"),
        extensions: vec!["mp3".to_string()],
        rotation: Rotation::Sequential,
        cache_dir: root.join("cache"),
        encoder: copy_encoder(),
        streamer: CommandTemplate::new("cat", ["{input}"]),
        bitrate_kbps: 128,
        chunk_size: 4,
        client_buffer: 100,
        skip_backoff: Duration::from_millis(10),
        chunk_interval: Some(Duration::from_millis(interval_ms)),
        precache: false,
    }
}

fn catalog(files: &[(&str, &str)]) -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let music = root.path().join("music");
    std::fs::create_dir_all(&music).unwrap();
    for (name, content) in files {
        std::fs::write(music.join(name), content).unwrap();
    }
    root
}

async fn next_chunk(listener: &mut ClientStream) -> Bytes {
    match listener.pop(Duration::from_secs(5)).await {
        Pop::Chunk(chunk) => chunk,
        other => panic!("expected a chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tracks_are_streamed_in_order_and_loop() {
    let root = catalog(&[("a.mp3", "AAAAAAAA"), ("b.mp3", "BBBBBBBBBBBB")]);
    let radio = Radio::start(settings(root.path(), 5)).await.unwrap();
    let mut listener = radio.subscribe();

    let mut received = Vec::new();
    for _ in 0..6 {
        received.push(next_chunk(&mut listener).await);
    }

    let expected: Vec<Bytes> = ["AAAA", "AAAA", "BBBB", "BBBB", "BBBB", "AAAA"]
        .iter()
        .map(|s| Bytes::from_static(s.as_bytes()))
        .collect();
    assert_eq!(received, expected);

    radio.shutdown().await;
}

#[tokio::test]
async fn test_current_track_follows_the_stream() {
    let root = catalog(&[("a.mp3", "AAAAAAAA"), ("b.mp3", "BBBBBBBBBBBB")]);
    let radio = Radio::start(settings(root.path(), 20)).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    assert_eq!(radio.current_track().unwrap().name, "a");

    next_chunk(&mut listener).await;
    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"BBBB"));

    let now = radio.now_playing();
    assert_eq!(now.state, EngineState::Streaming);
    assert_eq!(now.track.unwrap().name, "b");
    assert!(now.started_at.is_some());
    assert_eq!(now.chunks_produced, 1);

    radio.shutdown().await;
}

#[tokio::test]
async fn test_failing_track_is_skipped() {
    let root = catalog(&[
        ("a.mp3", "AAAA"),
        ("broken.mp3", "XXXX"),
        ("c.mp3", "CCCC"),
    ]);
    let mut settings = settings(root.path(), 5);
    settings.encoder = CommandTemplate::new(
        "sh",
        [
            "-c",
            r#"case "$0" in *broken*) exit 1;; esac; cp "$0" "$1""#,
            "{input}",
            "{output}",
        ],
    );
    let radio = Radio::start(settings).await.unwrap();
    let mut listener = radio.subscribe();

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_chunk(&mut listener).await);
    }
    assert_eq!(
        received,
        vec![
            Bytes::from_static(b"AAAA"),
            Bytes::from_static(b"CCCC"),
            Bytes::from_static(b"AAAA"),
            Bytes::from_static(b"CCCC"),
        ]
    );

    let broken = Playlist::load(root.path().join("music"), &["mp3".to_string()], Rotation::Sequential)
        .unwrap()
        .tracks()[1]
        .clone();
    assert_eq!(broken.name(), "broken");
    assert!(radio.cache().cached_path(&broken).is_none());

    radio.shutdown().await;
}

#[tokio::test]
async fn test_unplayable_catalog_keeps_running() {
    let root = catalog(&[("a.mp3", "AAAA"), ("b.mp3", "BBBB")]);
    let mut settings = settings(root.path(), 5);
    settings.encoder = CommandTemplate::new("sh", ["-c", "exit 1"]);
    let radio = Radio::start(settings).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(listener.pop(Duration::from_millis(300)).await, Pop::Timeout);
    assert!(listener.is_alive());
    assert!(radio.cache().encoder_runs() >= 2);

    radio.shutdown().await;
    assert_eq!(radio.now_playing().state, EngineState::Stopped);
}

#[tokio::test]
async fn test_partial_chunk_is_sent_on_clean_exit() {
    let root = catalog(&[("a.mp3", "AAAAAA")]);
    let radio = Radio::start(settings(root.path(), 5)).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AA"));
    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));

    radio.shutdown().await;
}

#[tokio::test]
async fn test_partial_chunk_is_dropped_on_crash() {
    let root = catalog(&[("a.mp3", "AAAAAA")]);
    let mut settings = settings(root.path(), 5);
    settings.streamer = CommandTemplate::new("sh", ["-c", r#"cat "$0"; exit 3"#, "{input}"]);
    let radio = Radio::start(settings).await.unwrap();
    let mut listener = radio.subscribe();

    for _ in 0..3 {
        assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    }

    radio.shutdown().await;
}

#[tokio::test]
async fn test_skip_moves_to_next_track() {
    let long = "A".repeat(400);
    let root = catalog(&[("a.mp3", long.as_str()), ("b.mp3", "BBBB")]);
    let radio = Radio::start(settings(root.path(), 20)).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    radio.skip();

    let mut before_b = 0;
    loop {
        let chunk = next_chunk(&mut listener).await;
        if chunk == Bytes::from_static(b"BBBB") {
            break;
        }
        before_b += 1;
        assert!(before_b < 10, "skip did not interrupt the long track");
    }
    assert_eq!(radio.current_track().unwrap().name, "b");

    radio.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_listeners_and_is_idempotent() {
    let root = catalog(&[("a.mp3", "AAAAAAAA")]);
    let radio = Radio::start(settings(root.path(), 5)).await.unwrap();
    let mut listener = radio.subscribe();
    next_chunk(&mut listener).await;

    radio.shutdown().await;
    assert_eq!(listener.pop(Duration::from_millis(50)).await, Pop::Closed);
    assert_eq!(radio.now_playing().state, EngineState::Stopped);
    assert!(radio.current_track().is_none());
    assert_eq!(radio.listeners(), 0);

    radio.shutdown().await;
    let mut late = radio.subscribe();
    assert_eq!(late.pop(Duration::from_millis(50)).await, Pop::Closed);
}

#[tokio::test]
async fn test_empty_catalog_fails_to_start() {
    let root = catalog(&[("notes.txt", "not audio")]);
    let result = Radio::start(settings(root.path(), 5)).await;

    assert!(matches!(
        result,
        Err(RadioError::Playlist(pmoplaylist::Error::EmptyCatalog { .. }))
    ));
}

#[tokio::test]
async fn test_invalid_settings_fail_to_start() {
    let root = catalog(&[("a.mp3", "AAAA")]);
    let mut settings = settings(root.path(), 5);
    settings.chunk_size = 0;

    assert!(matches!(
        Radio::start(settings).await,
        Err(RadioError::InvalidSettings(_))
    ));
}

#[tokio::test]
async fn test_precache_transcodes_whole_catalog() {
    let root = catalog(&[("a.mp3", "AAAA"), ("b.mp3", "BBBB"), ("c.mp3", "CCCC")]);
    let mut settings = settings(root.path(), 5);
    settings.precache = true;
    let radio = Radio::start(settings).await.unwrap();

    // Le préchargement est terminé au retour de `start`
    assert_eq!(radio.warm_up_report(), Some(WarmUpReport { ready: 3, failed: 0 }));
    assert_eq!(radio.cache().encoder_runs(), 3);

    let mut listener = radio.subscribe();
    for _ in 0..4 {
        next_chunk(&mut listener).await;
    }
    assert_eq!(radio.cache().encoder_runs(), 3);

    radio.shutdown().await;
}

#[tokio::test]
async fn test_one_external_process_at_a_time() {
    let root = catalog(&[
        ("a.mp3", "AAAA"),
        ("b.mp3", "BBBB"),
        ("c.mp3", "CCCC"),
        ("d.mp3", "DDDD"),
    ]);
    let markers = root.path().join("markers");
    std::fs::create_dir_all(&markers).unwrap();
    let markers_arg = markers.to_str().unwrap();

    let mut settings = settings(root.path(), 5);
    settings.precache = true;
    settings.encoder = CommandTemplate::new(
        "sh",
        [
            "-c",
            r#"touch "$2/encoding.$$"; sleep 0.1; cp "$0" "$1"; rm "$2/encoding.$$""#,
            "{input}",
            "{output}",
            markers_arg,
        ],
    );
    let check = r#"if ls "$1"/encoding.* >/dev/null 2>&1; then echo overlap >> "$1/overlap.log"; fi"#;
    let script = format!(r#"{check}; cat "$0"; {check}"#);
    settings.streamer =
        CommandTemplate::new("sh", ["-c", script.as_str(), "{input}", markers_arg]);

    let radio = Radio::start(settings).await.unwrap();
    assert_eq!(radio.warm_up_report(), Some(WarmUpReport { ready: 4, failed: 0 }));
    let mut listener = radio.subscribe();
    for _ in 0..5 {
        next_chunk(&mut listener).await;
    }
    radio.shutdown().await;

    assert_eq!(radio.cache().encoder_runs(), 4);
    assert!(
        !markers.join("overlap.log").exists(),
        "a stream process ran while an encoder was running"
    );
}

#[tokio::test]
async fn test_hung_stream_process_is_killed() {
    let root = catalog(&[("a.mp3", "AAAAAA")]);
    let mut settings = settings(root.path(), 5);
    settings.streamer =
        CommandTemplate::new("sh", ["-c", r#"cat "$0"; exec sleep 600 >&-"#, "{input}"]);
    let radio = Radio::start(settings).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    // Tué après le délai de grâce : traité comme un plantage, "AA" est jeté
    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));

    radio.shutdown().await;
}

#[tokio::test]
async fn test_skip_interrupts_a_hung_stream_process() {
    let root = catalog(&[("a.mp3", "AAAAAA")]);
    let mut settings = settings(root.path(), 5);
    settings.streamer =
        CommandTemplate::new("sh", ["-c", r#"cat "$0"; exec sleep 600 >&-"#, "{input}"]);
    let radio = Radio::start(settings).await.unwrap();
    let mut listener = radio.subscribe();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    radio.skip();

    assert_eq!(
        listener.pop(Duration::from_secs(1)).await,
        Pop::Chunk(Bytes::from_static(b"AAAA"))
    );

    radio.shutdown().await;
}

#[tokio::test]
async fn test_trailing_chunk_is_paced() {
    let root = catalog(&[("a.mp3", "AAAAAA")]);
    let radio = Radio::start(settings(root.path(), 150)).await.unwrap();
    let mut listener = radio.subscribe();

    let mut tail = next_chunk(&mut listener).await;
    while tail.len() == 4 {
        tail = next_chunk(&mut listener).await;
    }
    assert_eq!(tail, Bytes::from_static(b"AA"));
    let tail_at = tokio::time::Instant::now();

    assert_eq!(next_chunk(&mut listener).await, Bytes::from_static(b"AAAA"));
    assert!(tail_at.elapsed() >= Duration::from_millis(100));

    radio.shutdown().await;
}

#[tokio::test]
async fn test_now_playing_changes_are_watched() {
    let root = catalog(&[("a.mp3", "AAAAAAAA"), ("b.mp3", "BBBBBBBB")]);
    let radio = Radio::start(settings(root.path(), 20)).await.unwrap();
    let mut status = radio.watch_now_playing();

    let now = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|now| {
            now.state == EngineState::Streaming
                && now.track.as_ref().is_some_and(|t| t.name == "b")
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(now.track.unwrap().source_path, root.path().join("music").join("b.mp3"));

    radio.shutdown().await;
    assert_eq!(status.borrow_and_update().state, EngineState::Stopped);
}

#[tokio::test]
async fn test_engine_stops_on_request() {
    let root = catalog(&[("a.mp3", "AAAAAAAA")]);
    let settings = settings(root.path(), 5);
    let playlist =
        Playlist::load(&settings.music_dir, &settings.extensions, settings.rotation).unwrap();
    let cache = Arc::new(
        TranscodeCache::new(
            settings.cache_dir.to_str().unwrap(),
            TranscodeSettings {
                encoder: copy_encoder(),
                bitrate_kbps: 128,
            },
        )
        .unwrap(),
    );
    let registry = ClientRegistry::new(16);
    let mut listener = registry.register();

    let engine = PlaybackEngine::new(playlist, cache, registry.clone(), EngineConfig::from(&settings));
    let handle = engine.handle();
    assert_eq!(handle.now_playing().state, EngineState::Idle);
    let task = tokio::spawn(engine.run());

    next_chunk(&mut listener).await;
    handle.stop();
    task.await.unwrap();

    assert_eq!(handle.now_playing().state, EngineState::Stopped);
    assert!(registry.is_closed());
    assert_eq!(listener.pop(Duration::from_millis(50)).await, Pop::Closed);
}
