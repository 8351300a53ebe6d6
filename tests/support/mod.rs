//! In-process stand-ins for the vendor cloud, ffmpeg and the media server.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_node::config::{CamerasConfig, RestartConfig};
use bridge_node::credentials::{Authenticator, CredentialGate};
use bridge_node::markers::MarkerStore;
use bridge_node::poller::ClipPoller;
use bridge_node::preparer::{Transcoder, VideoPreparer};
use bridge_node::publisher::{ManagedChild, ProcessLauncher, StreamPublisher};
use bridge_node::vendor::ClipSource;
use bridge_node::Orchestrator;
use chrono::{Duration as ChronoDuration, Utc};
use common::{BridgeError, BridgeResult, Camera, Clip, ClipSource as ClipLocation, Credential};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A vendor account whose newest clip per camera can be changed by the test.
pub struct FakeCloud {
    cameras: Vec<Camera>,
    latest: Mutex<HashMap<String, String>>,
    valid_token: Mutex<String>,
    vanished: Mutex<HashSet<String>>,
    pub polled: Mutex<Vec<String>>,
    pub downloads: AtomicU32,
}

impl FakeCloud {
    pub fn new(cameras: &[(&str, &str)], token: &str) -> Arc<Self> {
        Arc::new(Self {
            cameras: cameras
                .iter()
                .map(|(id, name)| Camera::new(*id, *name))
                .collect(),
            latest: Mutex::new(HashMap::new()),
            valid_token: Mutex::new(token.to_string()),
            vanished: Mutex::new(HashSet::new()),
            polled: Mutex::new(Vec::new()),
            downloads: AtomicU32::new(0),
        })
    }

    pub fn set_latest(&self, camera_id: &str, clip_id: &str) {
        self.latest
            .lock()
            .unwrap()
            .insert(camera_id.to_string(), clip_id.to_string());
    }

    pub fn vanish(&self, clip_id: &str) {
        self.vanished.lock().unwrap().insert(clip_id.to_string());
    }

    /// Every session handed out so far stops working.
    pub fn revoke_sessions(&self) {
        *self.valid_token.lock().unwrap() = "revoked".to_string();
    }

    pub fn accept_token(&self, token: &str) {
        *self.valid_token.lock().unwrap() = token.to_string();
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    fn check(&self, credential: &Credential) -> BridgeResult<()> {
        if *self.valid_token.lock().unwrap() == credential.token {
            Ok(())
        } else {
            Err(BridgeError::AuthExpired)
        }
    }
}

#[async_trait]
impl ClipSource for FakeCloud {
    async fn list_cameras(&self, credential: &Credential) -> BridgeResult<Vec<Camera>> {
        self.check(credential)?;
        Ok(self.cameras.clone())
    }

    async fn latest_clip(&self, credential: &Credential, camera: &Camera) -> BridgeResult<Option<Clip>> {
        self.check(credential)?;
        self.polled.lock().unwrap().push(camera.id.clone());
        let latest = self.latest.lock().unwrap().get(&camera.id).cloned();
        Ok(latest.map(|id| {
            Clip::new(
                id.clone(),
                camera.id.clone(),
                Utc::now(),
                ClipLocation::Remote(format!("/media/{id}.mp4")),
            )
        }))
    }

    async fn download_clip(&self, credential: &Credential, clip: &Clip, dest: &Path) -> BridgeResult<PathBuf> {
        self.check(credential)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.vanished.lock().unwrap().contains(&clip.id) {
            return Err(BridgeError::not_found(format!("clip {} expired", clip.id)));
        }
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, format!("clip {}", clip.id)).await?;
        Ok(dest.to_path_buf())
    }
}

/// Logs in by minting `token-N` and teaching the cloud to accept it, or
/// rejects every login while `reject` is set.
pub struct FakeAuth {
    cloud: Arc<FakeCloud>,
    pub logins: AtomicU32,
    pub reject: AtomicBool,
}

impl FakeAuth {
    pub fn new(cloud: Arc<FakeCloud>) -> Arc<Self> {
        Arc::new(Self {
            cloud,
            logins: AtomicU32::new(0),
            reject: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn authenticate(&self) -> BridgeResult<Credential> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.reject.load(Ordering::SeqCst) {
            return Err(BridgeError::AuthExpired);
        }
        let token = format!("token-{n}");
        self.cloud.accept_token(&token);
        Ok(Credential::new(token, Utc::now() + ChronoDuration::hours(1)))
    }

    async fn refresh(&self, _current: &Credential) -> BridgeResult<Credential> {
        Err(BridgeError::AuthExpired)
    }
}

/// Writes the input it was given into the output path, after `delay_ms`.
#[derive(Default)]
pub struct FakeTranscoder {
    pub calls: AtomicU32,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn run(&self, args: &[String]) -> BridgeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::transcode("ffmpeg exited with exit status: 1"));
        }
        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_default();
        let body = tokio::fs::read(&input).await.unwrap_or_default();
        tokio::fs::write(args.last().unwrap(), body).await?;
        Ok(())
    }
}

struct IdleChild;

#[async_trait]
impl ManagedChild for IdleChild {
    fn try_exited(&mut self) -> std::io::Result<Option<String>> {
        Ok(None)
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub launches: AtomicU32,
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self) -> BridgeResult<Box<dyn ManagedChild>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(IdleChild))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub gate: Arc<CredentialGate>,
    pub markers: Arc<MarkerStore>,
    pub transcoder: Arc<FakeTranscoder>,
    pub launcher: Arc<FakeLauncher>,
    pub publisher: Arc<StreamPublisher>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn videos(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    pub fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn markers_file(&self) -> PathBuf {
        self.dir.path().join("markers.json")
    }

    pub fn media_server_config(&self) -> PathBuf {
        self.dir.path().join("mediamtx.yml")
    }
}

/// Wire an orchestrator around `source`. Markers in `seed_markers` are
/// persisted before the store is opened.
pub async fn harness(
    source: Arc<dyn ClipSource>,
    authenticator: Arc<dyn Authenticator>,
    cameras: CamerasConfig,
    seed_markers: &[(&str, &str)],
) -> Harness {
    let dir = TempDir::new().unwrap();
    let markers_file = dir.path().join("markers.json");
    {
        let seed = MarkerStore::open(&markers_file).await.unwrap();
        for (camera, clip) in seed_markers {
            seed.set(camera, clip).await.unwrap();
        }
    }
    let markers = Arc::new(MarkerStore::open(&markers_file).await.unwrap());

    let gate = Arc::new(CredentialGate::new(authenticator, None));
    let transcoder = Arc::new(FakeTranscoder::default());
    let launcher = Arc::new(FakeLauncher::default());
    let publisher = Arc::new(StreamPublisher::new(
        launcher.clone(),
        dir.path().join("mediamtx.yml"),
        "ffmpeg",
        "localhost",
        8554,
        RestartConfig::default(),
    ));
    let orchestrator = Orchestrator::new(
        gate.clone(),
        ClipPoller::new(source, dir.path().join("work")),
        VideoPreparer::new(transcoder.clone(), 0.5, 10),
        publisher.clone(),
        markers.clone(),
        cameras,
        dir.path().join("videos"),
    );

    Harness {
        dir,
        gate,
        markers,
        transcoder,
        launcher,
        publisher,
        orchestrator: Arc::new(orchestrator),
    }
}

pub fn cameras_yaml(raw: &str) -> CamerasConfig {
    let config = bridge_node::Config::from_yaml(raw).unwrap();
    config.cameras
}
