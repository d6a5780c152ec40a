#![cfg(unix)]

use pmoaudiocache::{AudioConfig, TranscodeCache, TranscodeError, TranscodeSettings};
use pmocache::CacheConfig;
use pmoplaylist::Track;
use pmoutils::CommandTemplate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Encodeur de test : copie l'entrée et note chaque invocation
fn copy_encoder(dir: &Path, delay: &str) -> (CommandTemplate, PathBuf) {
    let counter = dir.join("runs.log");
    let script = dir.join("encode.sh");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$3\" >> '{}'\nsleep {}\ncp \"$1\" \"$2\"\n",
            counter.display(),
            delay
        ),
    )
    .unwrap();
    let tpl = CommandTemplate::new(
        "sh",
        [
            script.to_string_lossy().into_owned(),
            "{input}".to_string(),
            "{output}".to_string(),
            "{bitrate}".to_string(),
        ],
    );
    (tpl, counter)
}

fn runs_logged(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

struct Fixture {
    _root: TempDir,
    music: PathBuf,
    cache_dir: PathBuf,
    counter: PathBuf,
    encoder: CommandTemplate,
}

fn fixture(delay: &str) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let music = root.path().join("music");
    let cache_dir = root.path().join("cache");
    let tools = root.path().join("tools");
    for d in [&music, &cache_dir, &tools] {
        std::fs::create_dir_all(d).unwrap();
    }
    let (encoder, counter) = copy_encoder(&tools, delay);
    Fixture {
        _root: root,
        music,
        cache_dir,
        counter,
        encoder,
    }
}

impl Fixture {
    fn track(&self, name: &str, content: &[u8]) -> Track {
        let path = self.music.join(name);
        std::fs::write(&path, content).unwrap();
        Track::from_path(path)
    }

    fn cache(&self, bitrate_kbps: u32) -> TranscodeCache {
        self.cache_with(self.encoder.clone(), bitrate_kbps)
    }

    fn cache_with(&self, encoder: CommandTemplate, bitrate_kbps: u32) -> TranscodeCache {
        TranscodeCache::new(
            self.cache_dir.to_str().unwrap(),
            TranscodeSettings {
                encoder,
                bitrate_kbps,
            },
        )
        .unwrap()
    }

    fn cache_files(&self) -> Vec<String> {
        let mut files: Vec<_> = std::fs::read_dir(&self.cache_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| !n.starts_with("cache.db"))
            .collect();
        files.sort();
        files
    }
}

#[test]
fn test_audio_config() {
    assert_eq!(AudioConfig::file_extension(), "mp3");
    assert_eq!(AudioConfig::cache_name(), "audio");
    assert_eq!(TranscodeSettings::default().qualifier(), "128k");
}

#[tokio::test]
async fn test_ensure_cached_twice_encodes_once() {
    let fx = fixture("0");
    let cache = fx.cache(128);
    let track = fx.track("a.mp3", b"source audio");

    let first = cache.ensure_cached(&track).await.unwrap();
    let second = cache.ensure_cached(&track).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.encoder_runs(), 1);
    assert_eq!(runs_logged(&fx.counter), 1);
    assert_eq!(std::fs::read(&first).unwrap(), b"source audio");
    assert_eq!(
        first.file_name().unwrap().to_str().unwrap(),
        format!("{}.128k.mp3", track.cache_key())
    );
    assert_eq!(cache.cached_path(&track), Some(first));
}

#[tokio::test]
async fn test_bitrate_is_passed_and_selects_variant() {
    let fx = fixture("0");
    let track = fx.track("a.mp3", b"source audio");

    let low = fx.cache(96).ensure_cached(&track).await.unwrap();
    let high = fx.cache(192).ensure_cached(&track).await.unwrap();

    assert_ne!(low, high);
    assert!(low.to_str().unwrap().ends_with(".96k.mp3"));
    let logged = std::fs::read_to_string(&fx.counter).unwrap();
    assert_eq!(logged.lines().collect::<Vec<_>>(), vec!["96", "192"]);
}

#[tokio::test]
async fn test_failing_encoder_leaves_no_entry() {
    let fx = fixture("0");
    let failing = CommandTemplate::new("sh", ["-c", "echo 'bad input' >&2; exit 1"]);
    let cache = fx.cache_with(failing, 128);
    let track = fx.track("broken.mp3", b"garbage");

    for _ in 0..2 {
        match cache.ensure_cached(&track).await {
            Err(TranscodeError::TranscodeFailed { path, reason }) => {
                assert_eq!(path, track.source_path());
                assert!(reason.contains("bad input"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    assert_eq!(cache.encoder_runs(), 2);
    assert!(fx.cache_files().is_empty());
    assert!(cache.cached_path(&track).is_none());
    assert!(cache.cache().entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_output_is_a_failure() {
    let fx = fixture("0");
    let silent = CommandTemplate::new("sh", ["-c", ": > \"$0\"", "{output}"]);
    let cache = fx.cache_with(silent, 128);
    let track = fx.track("silent.mp3", b"audio");

    assert!(matches!(
        cache.ensure_cached(&track).await,
        Err(TranscodeError::TranscodeFailed { .. })
    ));
    assert!(fx.cache_files().is_empty());
}

#[tokio::test]
async fn test_missing_source_does_not_spawn_encoder() {
    let fx = fixture("0");
    let cache = fx.cache(128);
    let track = Track::from_path(fx.music.join("gone.mp3"));

    assert!(matches!(
        cache.ensure_cached(&track).await,
        Err(TranscodeError::SourceUnavailable { .. })
    ));
    assert_eq!(cache.encoder_runs(), 0);
    assert_eq!(runs_logged(&fx.counter), 0);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_encode() {
    let fx = fixture("0.2");
    let cache = Arc::new(fx.cache(128));
    let track = fx.track("a.mp3", b"source audio");

    let (a, b) = tokio::join!(cache.ensure_cached(&track), cache.ensure_cached(&track));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(cache.encoder_runs(), 1);
    assert_eq!(runs_logged(&fx.counter), 1);
}

#[tokio::test]
async fn test_warm_up_counts_failures() {
    let fx = fixture("0");
    let cache = fx.cache(128);
    let tracks = vec![
        fx.track("a.mp3", b"a"),
        Track::from_path(fx.music.join("missing.mp3")),
        fx.track("c.mp3", b"c"),
    ];

    let report = cache.warm_up(&tracks).await;
    assert_eq!(report.ready, 2);
    assert_eq!(report.failed, 1);

    // Second passage : tout est déjà prêt
    let again = cache.warm_up(&tracks[..1]).await;
    assert_eq!(again.ready, 1);
    assert_eq!(cache.encoder_runs(), 2);
}

#[tokio::test]
async fn test_reopened_cache_keeps_entries() {
    let fx = fixture("0");
    let track = fx.track("a.mp3", b"a");
    let path = fx.cache(128).ensure_cached(&track).await.unwrap();

    let reopened = fx.cache(128);
    let report = reopened.consolidate().await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(reopened.ensure_cached(&track).await.unwrap(), path);
    assert_eq!(reopened.encoder_runs(), 0);
}
