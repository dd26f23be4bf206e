//! PlaybackManager - resume playback after a disruption
//!
//! Tries, in order: the track the remote service still reports, the last
//! remembered position (if recent enough), then the context from the top.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::PlaybackService;
use crate::error::{RecoveryError, Result};
use crate::recovery::ResumeStrategy;
use crate::remote::{PlayOffset, PlayRequest, PlaybackSnapshot, PlayerApi};
use crate::store::{self, KeyValueStore, LAST_PLAYBACK_KEY};

/// Playback step of a recovery cycle
#[async_trait]
pub trait PlaybackResume: Send + Sync {
    async fn resume_playback(
        &self,
        device_id: &str,
        context_uri: Option<&str>,
    ) -> Result<ResumeStrategy>;

    /// Record a healthy snapshot as the resume point
    fn remember(&self, snapshot: &PlaybackSnapshot);

    /// Drop the remembered resume point
    fn forget(&self);
}

/// Last known good playback position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub context_uri: Option<String>,
    pub track_uri: String,
    pub position_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ResumePoint {
    fn is_fresh(&self, staleness: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.recorded_at);
        age.to_std().map(|age| age < staleness).unwrap_or(true)
    }
}

pub struct PlaybackManager {
    api: Arc<dyn PlayerApi>,
    queue: PlaybackService,
    store: Arc<dyn KeyValueStore>,
    staleness: Duration,
    last: Mutex<Option<ResumePoint>>,
}

impl PlaybackManager {
    pub fn new(
        api: Arc<dyn PlayerApi>,
        queue: PlaybackService,
        store: Arc<dyn KeyValueStore>,
        staleness: Duration,
    ) -> Self {
        let last = store::load_json(store.as_ref(), LAST_PLAYBACK_KEY);
        Self {
            api,
            queue,
            store,
            staleness,
            last: Mutex::new(last),
        }
    }

    pub fn last_known(&self) -> Option<ResumePoint> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn play(&self, device_id: &str, request: PlayRequest) -> Result<()> {
        self.queue
            .play(Some(device_id), request)
            .await
            .map_err(|e| RecoveryError::PlaybackResumeFailed(e.to_string()))
    }
}

fn from_track(context_uri: &str, track_uri: &str, position_ms: u64) -> PlayRequest {
    PlayRequest {
        context_uri: Some(context_uri.to_string()),
        offset: Some(PlayOffset::Uri {
            uri: track_uri.to_string(),
        }),
        position_ms: Some(position_ms),
    }
}

#[async_trait]
impl PlaybackResume for PlaybackManager {
    async fn resume_playback(
        &self,
        device_id: &str,
        context_uri: Option<&str>,
    ) -> Result<ResumeStrategy> {
        let snapshot = self.api.playback_state().await?;
        let last = self.last_known();

        let target = context_uri
            .map(str::to_string)
            .or_else(|| last.as_ref().and_then(|p| p.context_uri.clone()))
            .or_else(|| snapshot.as_ref().and_then(|s| s.context_uri.clone()))
            .ok_or_else(|| RecoveryError::PlaybackResumeFailed("no context to resume".into()))?;

        if let Some(snapshot) = &snapshot {
            if let (Some(track), Some(ctx)) = (&snapshot.track_uri, &snapshot.context_uri) {
                if *ctx == target {
                    let position = snapshot.progress_ms.unwrap_or(0);
                    info!(track = %track, position, "Resuming from current remote state");
                    self.play(device_id, from_track(&target, track, position))
                        .await?;
                    return Ok(ResumeStrategy::CurrentState);
                }
            }
        }

        if let Some(point) = last {
            let matches = point.context_uri.as_deref() == Some(target.as_str());
            if matches && point.is_fresh(self.staleness, Utc::now()) {
                info!(
                    track = %point.track_uri,
                    position = point.position_ms,
                    "Resuming from last known position"
                );
                self.play(
                    device_id,
                    from_track(&target, &point.track_uri, point.position_ms),
                )
                .await?;
                return Ok(ResumeStrategy::LastKnown);
            }
            debug!(matches, "Last known position not usable");
        }

        warn!(context = %target, "Starting context from the beginning");
        self.play(
            device_id,
            PlayRequest {
                context_uri: Some(target),
                offset: Some(PlayOffset::Position { position: 0 }),
                position_ms: Some(0),
            },
        )
        .await?;
        Ok(ResumeStrategy::FreshStart)
    }

    fn remember(&self, snapshot: &PlaybackSnapshot) {
        let Some(track_uri) = snapshot.track_uri.clone() else {
            return;
        };
        if !snapshot.is_playing {
            return;
        }
        let point = ResumePoint {
            context_uri: snapshot.context_uri.clone(),
            track_uri,
            position_ms: snapshot.progress_ms.unwrap_or(0),
            recorded_at: Utc::now(),
        };
        store::save_json(self.store.as_ref(), LAST_PLAYBACK_KEY, &point);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    fn forget(&self) {
        self.store.remove(LAST_PLAYBACK_KEY);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::MockPlayerApi;
    use tokio_util::sync::CancellationToken;

    const CONTEXT: &str = "spotify:playlist:jukebox";
    const STALENESS: Duration = Duration::from_secs(300);

    fn manager(api: Arc<MockPlayerApi>, store: Arc<MemoryStore>) -> PlaybackManager {
        let (queue, _worker) = PlaybackService::spawn(api.clone(), CancellationToken::new());
        PlaybackManager::new(api, queue, store, STALENESS)
    }

    fn snapshot(context: &str, track: &str, progress: u64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_uri: Some(track.into()),
            context_uri: Some(context.into()),
            progress_ms: Some(progress),
            duration_ms: Some(200_000),
            is_playing: true,
            ..PlaybackSnapshot::default()
        }
    }

    #[tokio::test]
    async fn test_resume_from_current_state() {
        let api = Arc::new(MockPlayerApi::new());
        api.set_snapshot(Some(snapshot(CONTEXT, "spotify:track:a", 61_000)));
        let manager = manager(api.clone(), Arc::new(MemoryStore::new()));

        let strategy = manager.resume_playback("dev-1", Some(CONTEXT)).await.unwrap();

        assert_eq!(strategy, ResumeStrategy::CurrentState);
        let plays = api.plays.lock().unwrap();
        assert_eq!(plays[0].0.as_deref(), Some("dev-1"));
        assert_eq!(plays[0].1, from_track(CONTEXT, "spotify:track:a", 61_000));
    }

    #[tokio::test]
    async fn test_resume_from_fresh_last_known() {
        let api = Arc::new(MockPlayerApi::new());
        let store = Arc::new(MemoryStore::new());
        let manager = manager(api.clone(), store.clone());
        manager.remember(&snapshot(CONTEXT, "spotify:track:b", 12_000));
        // Remote has moved on to something else
        api.set_snapshot(Some(snapshot("spotify:album:other", "spotify:track:z", 5)));

        let strategy = manager.resume_playback("dev-1", Some(CONTEXT)).await.unwrap();

        assert_eq!(strategy, ResumeStrategy::LastKnown);
        assert_eq!(
            api.plays.lock().unwrap()[0].1,
            from_track(CONTEXT, "spotify:track:b", 12_000)
        );
        // Persisted for the next process
        assert!(store::load_json::<ResumePoint>(store.as_ref(), LAST_PLAYBACK_KEY).is_some());
    }

    #[tokio::test]
    async fn test_stale_last_known_falls_back_to_fresh_start() {
        let api = Arc::new(MockPlayerApi::new());
        let store = Arc::new(MemoryStore::new());
        store::save_json(
            store.as_ref(),
            LAST_PLAYBACK_KEY,
            &ResumePoint {
                context_uri: Some(CONTEXT.into()),
                track_uri: "spotify:track:old".into(),
                position_ms: 90_000,
                recorded_at: Utc::now() - chrono::Duration::minutes(10),
            },
        );
        let manager = manager(api.clone(), store);

        let strategy = manager.resume_playback("dev-1", None).await.unwrap();

        assert_eq!(strategy, ResumeStrategy::FreshStart);
        let request = api.plays.lock().unwrap()[0].1.clone();
        assert_eq!(request.context_uri.as_deref(), Some(CONTEXT));
        assert_eq!(request.position_ms, Some(0));
    }

    #[tokio::test]
    async fn test_resume_without_any_context_fails() {
        let api = Arc::new(MockPlayerApi::new());
        let manager = manager(api.clone(), Arc::new(MemoryStore::new()));

        let err = manager.resume_playback("dev-1", None).await.unwrap_err();

        assert!(matches!(err, RecoveryError::PlaybackResumeFailed(_)));
        assert!(api.plays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_play_failure_surfaces() {
        let api = Arc::new(MockPlayerApi::new());
        api.set_fail_play(true);
        let manager = manager(api.clone(), Arc::new(MemoryStore::new()));

        let err = manager.resume_playback("dev-1", Some(CONTEXT)).await.unwrap_err();
        assert!(matches!(err, RecoveryError::PlaybackResumeFailed(_)));
    }

    #[tokio::test]
    async fn test_forget_drops_persisted_point() {
        let api = Arc::new(MockPlayerApi::new());
        let store = Arc::new(MemoryStore::new());
        let manager = manager(api, store.clone());
        manager.remember(&snapshot(CONTEXT, "spotify:track:b", 1_000));

        manager.forget();

        assert_eq!(manager.last_known(), None);
        assert!(store::load_json::<ResumePoint>(store.as_ref(), LAST_PLAYBACK_KEY).is_none());
    }
}
