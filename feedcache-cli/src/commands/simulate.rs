//! Simulate command - drive a feed manager through a synthetic scrolling session.
//!
//! A synthetic resource factory stands in for the media stack: opens take a
//! jittered latency, and every `fail_every`-th video points at a source that
//! never opens. The session adds the videos, scrolls through them, raises one
//! memory-pressure signal, waits for pending retries to settle, and prints the
//! diagnostics snapshot.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedcache::{
    BoxFuture, FeedConfig, HydrationError, PlaybackResource, ResourceFactory, VideoFeedManager,
    VideoIdentity,
};
use rand::Rng;
use tracing::info;

use super::common::load_config;
use crate::error::CliError;

/// Authors of synthetic videos; the first one is followed.
const AUTHORS: [&str; 3] = ["alice", "bob", "carol"];

/// Every n-th synthetic video is an instantly playable animated image.
const INSTANT_EVERY: usize = 7;

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub videos: usize,
    pub fail_every: usize,
    pub scroll_steps: usize,
    pub latency_ms: u64,
    pub settle_ms: u64,
    pub config: Option<PathBuf>,
    pub json: bool,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    runtime.block_on(simulate(config, args))
}

async fn simulate(config: FeedConfig, args: SimulateArgs) -> Result<(), CliError> {
    let factory = Arc::new(SyntheticFactory::new(Duration::from_millis(args.latency_ms)));
    let shared: Arc<dyn ResourceFactory> = factory.clone();
    let manager = VideoFeedManager::new(config, shared)?;

    let mut events = manager.subscribe();
    let event_counter = tokio::spawn(async move {
        let mut received = 0usize;
        loop {
            match events.recv().await {
                Ok(_) => received += 1,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    received += skipped as usize;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        received
    });

    manager.update_following_set([AUTHORS[0]])?;
    for i in 0..args.videos {
        manager.add_video(synthetic_video(i, args.fail_every))?;
    }
    info!(
        videos = args.videos,
        catalog = manager.flattened_videos().len(),
        "Synthetic videos added"
    );

    let steps = args.scroll_steps.min(manager.flattened_videos().len());
    for step in 0..steps {
        manager.preload_around_index(step as i64, None).await?;
    }

    manager.handle_memory_pressure()?;
    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;

    let diagnostics = manager.diagnostics();
    manager.dispose();
    let events_received = event_counter
        .await
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    if args.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", json);
    } else {
        println!("Simulated {} videos over {} scroll steps", args.videos, steps);
        println!();
        println!("{}", diagnostics);
        println!();
        println!(
            "Factory:     {} opens, {} resources disposed, {} notifications",
            factory.opens(),
            factory.disposed(),
            events_received
        );
    }
    Ok(())
}

fn synthetic_video(i: usize, fail_every: usize) -> VideoIdentity {
    let failing = fail_every > 0 && (i + 1) % fail_every == 0;
    let locator = if failing {
        format!("https://cdn.invalid/broken/{i}.mp4")
    } else {
        format!("https://cdn.example/videos/{i}.mp4")
    };
    let identity = VideoIdentity::new(
        format!("video-{i:04}"),
        locator,
        AUTHORS[i % AUTHORS.len()],
        i as u64,
    );
    if (i + 1) % INSTANT_EVERY == 0 && !failing {
        identity.instantly_playable()
    } else {
        identity
    }
}

/// Resource handed out by [`SyntheticFactory`].
struct SyntheticResource {
    locator: String,
    disposed: Arc<AtomicUsize>,
}

impl PlaybackResource for SyntheticResource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Factory with jittered latency that never opens `cdn.invalid` sources.
struct SyntheticFactory {
    latency: Duration,
    broken_hosts: HashSet<&'static str>,
    opens: AtomicUsize,
    disposed: Arc<AtomicUsize>,
}

impl SyntheticFactory {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            broken_hosts: HashSet::from(["cdn.invalid"]),
            opens: AtomicUsize::new(0),
            disposed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn is_broken(&self, locator: &str) -> bool {
        let host = locator
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default();
        self.broken_hosts.contains(host)
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    fn disposed(&self) -> usize {
        self.disposed.load(Ordering::Relaxed)
    }
}

impl ResourceFactory for SyntheticFactory {
    fn open(
        &self,
        locator: &str,
    ) -> BoxFuture<'static, Result<Arc<dyn PlaybackResource>, HydrationError>> {
        self.opens.fetch_add(1, Ordering::Relaxed);

        let base = self.latency.as_millis() as u64;
        let jitter = if base > 0 {
            rand::rng().random_range(0..=base / 2)
        } else {
            0
        };
        let delay = Duration::from_millis(base + jitter);
        let broken = self.is_broken(locator);
        let locator = locator.to_string();
        let disposed = Arc::clone(&self.disposed);

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if broken {
                return Err(HydrationError::NetworkFailure(format!(
                    "connection refused: {locator}"
                )));
            }
            let resource: Arc<dyn PlaybackResource> =
                Arc::new(SyntheticResource { locator, disposed });
            Ok(resource)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_video_pattern() {
        let ok = synthetic_video(0, 3);
        assert_eq!(ok.id.as_str(), "video-0000");
        assert_eq!(ok.author_id, "alice");
        assert!(ok.source_locator.contains("cdn.example"));

        let failing = synthetic_video(2, 3);
        assert!(failing.source_locator.contains("cdn.invalid"));

        let instant = synthetic_video(6, 0);
        assert!(instant.instantly_playable);
    }

    #[test]
    fn test_broken_host_detection() {
        let factory = SyntheticFactory::new(Duration::ZERO);
        assert!(factory.is_broken("https://cdn.invalid/broken/1.mp4"));
        assert!(!factory.is_broken("https://cdn.example/videos/1.mp4"));
        assert!(!factory.is_broken("not a url"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_fails_broken_sources() {
        let factory = SyntheticFactory::new(Duration::from_millis(10));
        assert!(factory.open("https://cdn.example/videos/1.mp4").await.is_ok());
        assert!(matches!(
            factory.open("https://cdn.invalid/broken/2.mp4").await,
            Err(HydrationError::NetworkFailure(_))
        ));
        assert_eq!(factory.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_runs_to_completion() {
        let config = FeedConfig::default().with_max_controllers(3);
        let args = SimulateArgs {
            videos: 12,
            fail_every: 5,
            scroll_steps: 6,
            latency_ms: 5,
            settle_ms: 5_000,
            config: None,
            json: true,
        };
        simulate(config, args).await.unwrap();
    }
}
