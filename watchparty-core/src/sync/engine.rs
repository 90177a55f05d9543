//! The Synchronizer
//!
//! One actor task per client and room. Media events, store pushes, write
//! completions and timers are handled strictly one at a time, so the
//! coalescer, echo tracking and phase never need locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::OptionFuture;
use parking_lot::ReentrantMutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::echo::{EchoKind, LocalEchoes};
use super::error::SyncError;
use super::protocol::{PlaybackDelta, RoomPlaybackState};
use super::reconcile;
use super::state::{LocalSyncContext, SyncPhase, WriteStage};
use crate::config::SyncConfig;
use crate::player::{LocalSignal, MediaElement, MediaEvent, PlaybackError, PlaybackObserver};
use crate::store::{RoomStore, StoreError, StoreSubscription};

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Channel the host feeds raw media element events into
pub fn media_event_channel() -> (MediaEventSender, MediaEventReceiver) {
    mpsc::unbounded_channel()
}

/// Receives what a synchronizer wants the host to know about
pub trait SyncListener: Send + Sync {
    /// A recoverable or fatal sync failure. Never called after `dispose`.
    fn on_sync_error(&self, error: &SyncError);

    /// A remote state was reconciled into local playback
    fn on_state_applied(&self, _state: &RoomPlaybackState) {}
}

/// Listener that only logs
pub struct LogListener;

impl SyncListener for LogListener {
    fn on_sync_error(&self, error: &SyncError) {
        warn!("Sync error: {}", error);
    }
}

enum SyncCommand {
    SetSource(String),
}

enum WriteOutcome {
    Written(RoomPlaybackState),
    /// The store already matched the delta within tolerance
    Skipped(RoomPlaybackState),
}

type WriteTask = JoinHandle<Result<WriteOutcome, StoreError>>;

/// Held while the actor drives the element or the listener, and by `dispose`
type DisposeGate = Arc<ReentrantMutex<()>>;

/// Keeps one media element in sync with one room
pub struct Synchronizer {
    room: String,
    commands: mpsc::UnboundedSender<SyncCommand>,
    disposed: Arc<AtomicBool>,
    gate: DisposeGate,
    task: Option<JoinHandle<()>>,
}

impl Synchronizer {
    /// Subscribe to `room`, bring the element in line with the current room
    /// state and start synchronizing. The initial state is never written back.
    pub async fn attach<M: MediaElement>(
        store: Arc<dyn RoomStore>,
        observer: PlaybackObserver<M>,
        events: MediaEventReceiver,
        room: impl Into<String>,
        config: SyncConfig,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let room = room.into();

        // Subscribe first so nothing written after the read is missed
        let subscription = store.subscribe(&room).await?;
        let initial = store.read(&room).await?;
        info!(
            "Attached to room {} ({}, playing: {}, at {:.2}s)",
            room, initial.video_url, initial.is_playing, initial.current_time
        );

        let disposed = Arc::new(AtomicBool::new(false));
        let gate = DisposeGate::default();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut actor = SyncActor {
            room: room.clone(),
            store,
            observer: observer.with_progress_interval(config.progress_interval),
            ctx: LocalSyncContext::new(&config),
            echoes: LocalEchoes::new(config.local_echo_window, config.seek_echo_slack),
            config,
            listener,
            disposed: Arc::clone(&disposed),
            gate: Arc::clone(&gate),
            in_flight: None,
            stopped: false,
        };
        actor.on_push(initial, Instant::now());

        let task = tokio::spawn(actor.run(events, commands_rx, subscription));

        Ok(Self {
            room,
            commands: commands_tx,
            disposed,
            gate,
            task: Some(task),
        })
    }

    /// Switch the room to a new source. Written as soon as the write rate
    /// allows, without waiting for the debounce window.
    pub fn set_source(&self, url: impl Into<String>) -> Result<(), SyncError> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        self.commands
            .send(SyncCommand::SetSource(url.into()))
            .map_err(|_| SyncError::Disposed)
    }

    /// Stop synchronizing. Once this returns the element gets no more
    /// commands and no callbacks fire; a write already sent to the store may
    /// still land.
    pub fn dispose(&mut self) {
        let _held = self.gate.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Detached from room {}", self.room);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// False once disposed or stopped by a fatal error
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct SyncActor<M> {
    room: String,
    store: Arc<dyn RoomStore>,
    config: SyncConfig,
    observer: PlaybackObserver<M>,
    ctx: LocalSyncContext,
    echoes: LocalEchoes,
    listener: Arc<dyn SyncListener>,
    disposed: Arc<AtomicBool>,
    gate: DisposeGate,
    in_flight: Option<WriteTask>,
    stopped: bool,
}

impl<M: MediaElement> SyncActor<M> {
    async fn run(
        mut self,
        mut events: MediaEventReceiver,
        mut commands: mpsc::UnboundedReceiver<SyncCommand>,
        mut subscription: StoreSubscription,
    ) {
        let mut events_open = true;

        while !self.stopped && self.live() {
            let deadline = self.ctx.next_deadline(&self.config);

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SyncCommand::SetSource(url)) => self.set_source(url, Instant::now()),
                    None => break,
                },

                Some(joined) = OptionFuture::from(self.in_flight.as_mut()) => {
                    self.in_flight = None;
                    self.on_write_finished(joined, Instant::now());
                }

                pushed = subscription.recv() => match pushed {
                    Some(Ok(state)) => self.on_push(state, Instant::now()),
                    // The feed keeps going; a vanished room is fatal
                    Some(Err(e)) => self.fail(e.into()),
                    None => self.fail(SyncError::SubscriptionClosed),
                },

                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_media_event(event, Instant::now()),
                    None => {
                        debug!("Media events for room {} closed", self.room);
                        events_open = false;
                    }
                },

                Some(()) = OptionFuture::from(deadline.map(sleep_until)) => {
                    self.on_timer(Instant::now());
                }
            }
        }

        debug!("Sync loop for room {} ended", self.room);
    }

    fn live(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    // Outbound

    fn on_media_event(&mut self, event: MediaEvent, now: Instant) {
        let Some(signal) = self.observer.normalize_at(event, now) else {
            return;
        };

        if let LocalSignal::Failed(message) = &signal {
            self.on_playback_failure(PlaybackError::Decode(message.clone()), now);
            return;
        }
        if self.echoes.consume(&signal, now) {
            return;
        }
        let Some(delta) = signal.to_delta() else {
            return;
        };

        let intent = !matches!(signal, LocalSignal::Progress { .. });
        debug!("Local {:?} ({})", signal, self.ctx.phase.name());
        self.ctx.outbound.push(delta, intent);
        self.schedule_flush(now);
    }

    fn set_source(&mut self, url: String, now: Instant) {
        info!("Switching room {} to {:?}", self.room, url);
        {
            let gate = Arc::clone(&self.gate);
            let _held = gate.lock();
            if !self.live() {
                return;
            }
            self.observer.load(&url);
            if !url.is_empty() {
                self.start_playback(now);
            }
        }
        self.ctx.outbound.push_priority(PlaybackDelta::source(url));
        self.schedule_flush(now);
    }

    /// Open a coalescing window, or pull an open one forward for priority changes.
    /// While writing, pending changes wait for the write to settle.
    fn schedule_flush(&mut self, now: Instant) {
        match self.ctx.phase {
            SyncPhase::Idle => {
                self.ctx.phase = SyncPhase::Coalescing {
                    flush_at: self.ctx.outbound.flush_deadline(now),
                };
            }
            SyncPhase::Coalescing { flush_at } if self.ctx.outbound.is_priority() => {
                self.ctx.phase = SyncPhase::Coalescing {
                    flush_at: flush_at.min(self.ctx.outbound.flush_deadline(now)),
                };
            }
            _ => {}
        }
    }

    fn flush(&mut self, now: Instant) {
        let Some(delta) = self.ctx.outbound.take() else {
            self.ctx.phase = SyncPhase::Idle;
            return;
        };
        debug!("Flushing {:?} to room {}", delta, self.room);

        self.ctx.outbound.record_write(now);
        self.ctx.phase = SyncPhase::Writing(WriteStage::InFlight);

        let store = Arc::clone(&self.store);
        let room = self.room.clone();
        let tolerance = self.config.drift_tolerance;
        self.in_flight = Some(tokio::spawn(async move {
            // Someone may have written the same thing meanwhile
            let current = store.read(&room).await?;
            if delta.matches(&current, tolerance) {
                return Ok(WriteOutcome::Skipped(current));
            }
            store.write(&room, &delta).await.map(WriteOutcome::Written)
        }));
    }

    fn on_write_finished(
        &mut self,
        joined: Result<Result<WriteOutcome, StoreError>, JoinError>,
        now: Instant,
    ) {
        match joined {
            Ok(Ok(WriteOutcome::Written(state))) => {
                let revision = state.updated_at;
                debug!("Room {} accepted our write at {}", self.room, revision);
                self.ctx.mark_applied(&state);
                if self.ctx.max_seen_revision >= revision {
                    self.finish_write(now);
                } else {
                    self.ctx.phase = SyncPhase::Writing(WriteStage::AwaitingEcho {
                        revision,
                        deadline: now + self.config.echo_fallback,
                    });
                }
            }
            Ok(Ok(WriteOutcome::Skipped(state))) => {
                debug!("Room {} already at {:?}, write skipped", self.room, state);
                self.finish_write(now);
            }
            Ok(Err(e)) => {
                self.finish_write(now);
                self.fail(e.into());
            }
            Err(e) => {
                self.finish_write(now);
                self.fail(SyncError::Transport(e.to_string()));
            }
        }
    }

    /// Leave `Writing` and catch up on whatever was held back meanwhile
    fn finish_write(&mut self, now: Instant) {
        self.ctx.settle(now);
        self.catch_up_source(now);
        self.drain_deferred(now);
    }

    /// A merge-write keeps fields we did not touch; if another client changed
    /// the source under it, our accepted state carries a source we never loaded.
    fn catch_up_source(&mut self, now: Instant) {
        if !self.ctx.can_reconcile() {
            return;
        }
        let Some(remote) = &self.ctx.remote else {
            return;
        };
        if remote.video_url != self.observer.snapshot().source {
            let remote = remote.clone();
            self.reconcile(remote, now);
        }
    }

    fn on_timer(&mut self, now: Instant) {
        match self.ctx.phase {
            SyncPhase::Coalescing { flush_at } if flush_at <= now => self.flush(now),
            SyncPhase::Writing(WriteStage::AwaitingEcho { revision, deadline }) if deadline <= now => {
                debug!(
                    "No echo of revision {} within {:?}, resuming",
                    revision, self.config.echo_fallback
                );
                self.finish_write(now);
            }
            _ => {}
        }
        self.drain_deferred(now);
    }

    // Inbound

    fn on_push(&mut self, state: RoomPlaybackState, now: Instant) {
        self.ctx.observe_revision(state.updated_at);

        if let SyncPhase::Writing(stage) = self.ctx.phase {
            match stage {
                WriteStage::AwaitingEcho { revision, .. } if state.updated_at >= revision => {
                    debug!("Write {} confirmed by the room", revision);
                    self.finish_write(now);
                    if state.updated_at == revision {
                        return;
                    }
                }
                _ => {
                    debug!("Holding back push {} while writing", state.updated_at);
                    self.ctx.defer(state);
                    return;
                }
            }
        }

        if self.ctx.is_stale(&state) {
            debug!("Ignoring stale push {}", state.updated_at);
            return;
        }

        let rate_limited = self
            .ctx
            .remote_ready_at(&self.config)
            .is_some_and(|ready_at| now < ready_at);
        if !self.ctx.can_reconcile() || rate_limited {
            self.ctx.defer(state);
            return;
        }

        self.reconcile(state, now);
    }

    /// Apply the newest held-back push once nothing stands in its way
    fn drain_deferred(&mut self, now: Instant) {
        if self.ctx.deferred_remote.is_none() || !self.ctx.can_reconcile() {
            return;
        }
        let ready = self
            .ctx
            .remote_ready_at(&self.config)
            .map_or(true, |ready_at| ready_at <= now);
        if !ready {
            return;
        }
        if let Some(state) = self.ctx.deferred_remote.take() {
            self.on_push(state, now);
        }
    }

    fn reconcile(&mut self, state: RoomPlaybackState, now: Instant) {
        if self.ctx.outbound.discard_progress() {
            debug!("Dropped pending progress superseded by push {}", state.updated_at);
            if matches!(self.ctx.phase, SyncPhase::Coalescing { .. }) {
                self.ctx.phase = SyncPhase::Idle;
            }
        }

        let local = self.observer.snapshot();
        let plan = reconcile::plan(&local, &state, self.config.drift_tolerance);
        self.ctx.mark_applied(&state);
        self.ctx.last_remote_apply_at = Some(now);

        let gate = Arc::clone(&self.gate);
        let _held = gate.lock();
        if !self.live() {
            return;
        }
        if plan.is_noop() {
            debug!("In sync with push {}", state.updated_at);
        } else {
            debug!("Applying push {}: {:?} (local {:?})", state.updated_at, plan, local);
        }

        if let Some(url) = &plan.load {
            info!("Loading {:?} from room {}", url, self.room);
            self.observer.load(url);
        }
        if let Some(to) = plan.seek {
            self.echoes.expect(EchoKind::Seek { to }, now);
            self.observer.seek_to(to);
        }
        match plan.play {
            Some(true) => self.start_playback(now),
            Some(false) => {
                self.echoes.expect(EchoKind::Pause, now);
                self.observer.pause();
            }
            None => {}
        }

        self.listener.on_state_applied(&state);
    }

    fn start_playback(&mut self, now: Instant) {
        match self.observer.play() {
            Ok(()) => self.echoes.expect(EchoKind::Play, now),
            Err(e) => self.on_playback_failure(e, now),
        }
    }

    /// Force local playback paused without telling the room
    fn on_playback_failure(&mut self, error: PlaybackError, now: Instant) {
        warn!("Local playback failed in room {}: {}", self.room, error);
        let gate = Arc::clone(&self.gate);
        let _held = gate.lock();
        if !self.live() {
            return;
        }
        if !self.observer.snapshot().is_playing {
            self.report(error.into());
            return;
        }
        self.echoes.expect(EchoKind::Pause, now);
        self.observer.pause();
        self.report(error.into());
    }

    fn fail(&mut self, error: SyncError) {
        if error.is_fatal() {
            self.stopped = true;
        }
        self.report(error);
    }

    fn report(&self, error: SyncError) {
        let _held = self.gate.lock();
        if !self.live() {
            return;
        }
        if error.is_user_visible() {
            warn!("Room {}: {}", self.room, error);
            self.listener.on_sync_error(&error);
        } else {
            debug!("Room {}: {}", self.room, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRoomStore;
    use crate::testing::{FakeElement, RecordingListener, SilentStore};
    use std::time::Duration;

    const ROOM: &str = "ROOM";
    const URL: &str = "https://cdn.example/ep1.mp4";

    async fn room(store: &MemoryRoomStore, playing: bool, at: f64) -> RoomPlaybackState {
        store.create(ROOM).await.unwrap();
        store.seed(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: playing,
                current_time: at,
                updated_at: 0,
            },
        )
    }

    async fn join_with(
        store: &MemoryRoomStore,
        config: SyncConfig,
    ) -> (Synchronizer, FakeElement, Arc<RecordingListener>) {
        let (tx, rx) = media_event_channel();
        let element = FakeElement::new(tx);
        let listener = Arc::new(RecordingListener::default());
        let sync = Synchronizer::attach(
            Arc::new(store.clone()),
            PlaybackObserver::new(element.clone()),
            rx,
            ROOM,
            config,
            listener.clone(),
        )
        .await
        .unwrap();
        (sync, element, listener)
    }

    async fn join(store: &MemoryRoomStore) -> (Synchronizer, FakeElement, Arc<RecordingListener>) {
        join_with(store, SyncConfig::default()).await
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    fn playing_at(at: f64) -> RoomPlaybackState {
        RoomPlaybackState {
            video_url: URL.to_string(),
            is_playing: true,
            current_time: at,
            updated_at: 0,
        }
    }

    fn assert_near(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.01,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_follows_room_without_writing() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;

        let (_sync, b, listener) = join(&store).await;
        assert_eq!(b.source(), URL);
        assert_eq!(b.seeks(), vec![10.0]);
        assert!(b.is_playing());

        settle().await;
        assert_eq!(store.write_count(ROOM), 0);
        assert_eq!(b.plays(), 1);
        assert!(listener.errors().is_empty());
        assert_eq!(listener.applied().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_propagates_once() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;

        let (_a_sync, a, _) = join(&store).await;
        let (_b_sync, b, b_listener) = join(&store).await;

        tokio::time::sleep(Duration::from_millis(5200)).await;
        a.user_pause();
        settle().await;

        let state = store.snapshot(ROOM).unwrap();
        assert!(!state.is_playing);
        assert_near(state.current_time, 15.2);
        assert_eq!(store.write_count(ROOM), 1);

        assert!(!b.is_playing());
        assert_near(b.position(), 15.2);
        assert_near(*b.seeks().last().unwrap(), 15.2);
        assert!(b_listener.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_write_is_not_echoed_back() {
        let store = MemoryRoomStore::new();
        room(&store, false, 0.0).await;

        let (_sync, a, _) = join(&store).await;
        assert!(a.seeks().is_empty());
        a.user_play();
        settle().await;

        assert_eq!(store.write_count(ROOM), 1);
        assert!(store.snapshot(ROOM).unwrap().is_playing);
        // Our own state coming back must not be applied to the element
        assert!(a.seeks().is_empty());
        assert_eq!(a.plays(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_bounded_by_debounce_window() {
        let store = MemoryRoomStore::new();
        room(&store, true, 0.0).await;

        let config = SyncConfig::default()
            .with_drift_tolerance(0.1)
            .with_progress_interval(Duration::from_millis(1));
        let (_sync, a, _) = join_with(&store, config.clone()).await;

        // 20 progress events within one second
        for _ in 0..20 {
            a.tick();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        settle().await;

        let bound = 1000 / config.debounce_window.as_millis() as usize + 1;
        let writes = store.write_count(ROOM);
        assert!(writes >= 1, "progress never reached the room");
        assert!(writes <= bound, "{writes} writes, bound {bound}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_drift_is_idempotent() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (_sync, a, _) = join(&store).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.seed(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: true,
                current_time: 11.0,
                updated_at: 0,
            },
        );
        settle().await;

        assert_eq!(a.seeks(), vec![10.0]);
        assert_eq!(store.write_count(ROOM), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_push_is_ignored() {
        let store = MemoryRoomStore::new();
        let seeded = room(&store, true, 10.0).await;
        let (_sync, a, _) = join(&store).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.replay(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: false,
                current_time: 50.0,
                updated_at: seeded.updated_at - 1,
            },
        );
        settle().await;

        assert_eq!(a.seeks(), vec![10.0]);
        assert_eq!(a.pauses(), 0);
        assert!(a.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_clients_converge() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;

        let (_a_sync, a, _) = join(&store).await;
        let (_b_sync, b, _) = join(&store).await;
        let (_c_sync, c, _) = join(&store).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        a.user_seek(100.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        b.user_pause();
        tokio::time::sleep(Duration::from_millis(120)).await;
        c.user_seek(40.0);
        settle().await;

        let state = store.snapshot(ROOM).unwrap();
        for client in [&a, &b, &c] {
            assert_eq!(client.is_playing(), state.is_playing);
            assert!((client.position() - a.position()).abs() <= 1.0);
        }
        assert!(store.write_count(ROOM) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_playback_is_local_only() {
        let store = MemoryRoomStore::new();
        room(&store, false, 10.0).await;

        let (_sync, b, listener) = join(&store).await;
        b.block_playback(true);

        store.seed(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: true,
                current_time: 10.0,
                updated_at: 0,
            },
        );
        settle().await;

        assert!(!b.is_playing());
        assert_eq!(store.write_count(ROOM), 0);
        assert!(store.snapshot(ROOM).unwrap().is_playing);
        assert!(matches!(
            listener.errors().as_slice(),
            [SyncError::Playback(PlaybackError::Blocked(_))]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_pauses_locally() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (_sync, a, listener) = join(&store).await;

        a.fail("decode error");
        settle().await;

        assert!(!a.is_playing());
        assert_eq!(store.write_count(ROOM), 0);
        assert!(matches!(
            listener.errors().as_slice(),
            [SyncError::Playback(PlaybackError::Decode(_))]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_reported_and_not_retried() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (sync, a, listener) = join(&store).await;

        store.fail_next_writes(1);
        a.user_pause();
        settle().await;

        assert_eq!(store.write_count(ROOM), 0);
        assert!(matches!(listener.errors().as_slice(), [SyncError::Transport(_)]));
        assert!(sync.is_running());

        // Not stuck in the writing phase: both directions still work
        a.user_seek(60.0);
        settle().await;
        assert_eq!(store.write_count(ROOM), 1);

        store.seed(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: true,
                current_time: 120.0,
                updated_at: 0,
            },
        );
        settle().await;
        assert_eq!(*a.seeks().last().unwrap(), 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_error_is_reported_and_sync_continues() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (sync, a, listener) = join(&store).await;

        store.push_error(ROOM, || StoreError::NotReachable);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(listener.errors().as_slice(), [SyncError::Transport(_)]));
        assert!(sync.is_running());

        store.seed(ROOM, playing_at(60.0));
        settle().await;
        assert_eq!(a.seeks(), vec![10.0, 60.0]);
        assert_eq!(listener.applied().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_vanishing_from_feed_is_fatal() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (sync, _a, listener) = join(&store).await;

        store.push_error(ROOM, || StoreError::RoomNotFound(ROOM.to_string()));
        settle().await;

        assert!(matches!(listener.errors().as_slice(), [SyncError::RoomNotFound(_)]));
        assert!(!sync.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_echo_falls_back_after_timeout() {
        let store = SilentStore::default();
        room(&store.rooms, true, 10.0).await;

        let (tx, rx) = media_event_channel();
        let a = FakeElement::new(tx);
        let _sync = Synchronizer::attach(
            Arc::new(store.clone()),
            PlaybackObserver::new(a.clone()),
            rx,
            ROOM,
            SyncConfig::default(),
            Arc::new(LogListener),
        )
        .await
        .unwrap();

        // First write lands at 250ms and its echo never arrives
        a.user_pause();
        tokio::time::sleep(Duration::from_millis(400)).await;
        a.user_seek(30.0);

        // Still waiting for the echo: the seek is held back
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.rooms.write_count(ROOM), 1);

        // The fallback at 1.25s releases it
        settle().await;
        assert_eq!(store.rooms.write_count(ROOM), 2);
        let state = store.rooms.snapshot(ROOM).unwrap();
        assert_near(state.current_time, 30.0);
        assert!(!state.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_burst_is_rate_limited() {
        let store = MemoryRoomStore::new();
        room(&store, true, 0.0).await;
        let (_sync, a, listener) = join(&store).await;
        assert_eq!(a.seeks(), vec![0.0]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        for at in [20.0, 30.0, 40.0, 50.0] {
            store.seed(ROOM, playing_at(at));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        settle().await;

        // 20 applies at once, the rest wait out the interval and only the newest lands
        assert_eq!(a.seeks(), vec![0.0, 20.0, 50.0]);
        assert_eq!(listener.applied().len(), 3);
        assert_eq!(store.write_count(ROOM), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_source_skips_debounce() {
        let store = MemoryRoomStore::new();
        store.create(ROOM).await.unwrap();
        let (sync, a, _) = join(&store).await;
        let (_b_sync, b, _) = join(&store).await;

        sync.set_source(URL).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = store.snapshot(ROOM).unwrap();
        assert_eq!(state.video_url, URL);
        assert!(state.is_playing);
        assert_eq!(store.write_count(ROOM), 1);
        assert!(a.is_playing());

        settle().await;
        assert_eq!(b.source(), URL);
        assert!(b.is_playing());
        assert_eq!(store.write_count(ROOM), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_everything() {
        let store = MemoryRoomStore::new();
        room(&store, true, 10.0).await;
        let (mut sync, a, listener) = join(&store).await;

        sync.dispose();
        assert!(sync.is_disposed());
        assert_eq!(sync.set_source(URL), Err(SyncError::Disposed));

        store.seed(
            ROOM,
            RoomPlaybackState {
                video_url: URL.to_string(),
                is_playing: false,
                current_time: 99.0,
                updated_at: 0,
            },
        );
        a.user_seek(3.0);
        settle().await;

        assert!(!sync.is_running());
        assert_eq!(a.seeks(), vec![10.0, 3.0]);
        assert!(a.is_playing());
        assert_eq!(store.write_count(ROOM), 0);
        assert_eq!(listener.applied().len(), 1);
    }

    /// Signals every seek, then takes a while to finish it
    struct SlowSeekElement {
        inner: FakeElement,
        seeking: std::sync::mpsc::Sender<f64>,
    }

    impl MediaElement for SlowSeekElement {
        fn play(&mut self) -> Result<(), PlaybackError> {
            self.inner.play()
        }
        fn pause(&mut self) {
            self.inner.pause();
        }
        fn seek_to(&mut self, secs: f64) {
            let _ = self.seeking.send(secs);
            std::thread::sleep(Duration::from_millis(50));
            self.inner.seek_to(secs);
        }
        fn load(&mut self, url: &str) {
            self.inner.load(url);
        }
        fn current_time(&self) -> f64 {
            self.inner.current_time()
        }
        fn is_paused(&self) -> bool {
            self.inner.is_paused()
        }
        fn source(&self) -> String {
            self.inner.source()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_waits_for_commands_in_progress() {
        let store = MemoryRoomStore::new();
        room(&store, false, 10.0).await;

        let (tx, rx) = media_event_channel();
        let a = FakeElement::new(tx);
        let (seeking_tx, seeking_rx) = std::sync::mpsc::channel();
        let element = SlowSeekElement {
            inner: a.clone(),
            seeking: seeking_tx,
        };
        let listener = Arc::new(RecordingListener::default());
        let mut sync = Synchronizer::attach(
            Arc::new(store.clone()),
            PlaybackObserver::new(element),
            rx,
            ROOM,
            SyncConfig::default(),
            listener.clone(),
        )
        .await
        .unwrap();
        assert_eq!(seeking_rx.recv_timeout(Duration::from_secs(1)), Ok(10.0));

        store.seed(ROOM, playing_at(40.0));
        assert_eq!(seeking_rx.recv_timeout(Duration::from_secs(1)), Ok(40.0));

        // The actor is mid-seek on another thread
        sync.dispose();
        let seeks = a.seeks();
        let plays = a.plays();
        assert_eq!(seeks, vec![10.0, 40.0]);
        assert_eq!(plays, 1);
        assert_eq!(listener.applied().len(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(a.seeks(), seeks);
        assert_eq!(a.plays(), plays);
        assert_eq!(listener.applied().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_room_fails_attach() {
        let store = MemoryRoomStore::new();
        let (tx, rx) = media_event_channel();
        let result = Synchronizer::attach(
            Arc::new(store),
            PlaybackObserver::new(FakeElement::new(tx)),
            rx,
            "NOPE",
            SyncConfig::default(),
            Arc::new(LogListener),
        )
        .await;

        assert!(matches!(result, Err(SyncError::RoomNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_fails_attach() {
        let store = MemoryRoomStore::new();
        store.create(ROOM).await.unwrap();
        let (tx, rx) = media_event_channel();
        let result = Synchronizer::attach(
            Arc::new(store),
            PlaybackObserver::new(FakeElement::new(tx)),
            rx,
            ROOM,
            SyncConfig::default().with_debounce_window(Duration::ZERO),
            Arc::new(LogListener),
        )
        .await;

        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
