//! Session implementation for FFI

use std::sync::{Arc, Once, OnceLock};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::player::{MediaSource, PlaybackObserver};
use crate::room_code::RoomCode;
use crate::store::{HttpRoomStore, MemoryRoomStore, RoomStore, StoreError};
use crate::sync::{media_event_channel, MediaEventSender, Synchronizer};

use super::handlers::{CallbackListener, ControllerElement, SharedCallback};
use super::types::*;

static TRACING_INIT: Once = Once::new();

/// Store shared by every in-memory session of this process
static MEMORY_STORE: OnceLock<MemoryRoomStore> = OnceLock::new();

/// Fresh codes to try when a generated one is already taken
const CREATE_ATTEMPTS: usize = 3;

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in ["watchparty_core=debug", "hyper_util=off", "hyper=off", "reqwest=off"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        // The host may already have installed a subscriber
        let _ = tracing_subscriber::fmt()
            .with_ansi(false) // Disable colors for Xcode console
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

struct ActiveRoom {
    code: RoomCode,
    sync: Synchronizer,
    events: MediaEventSender,
}

/// Main session interface: one viewer, at most one room at a time
#[derive(uniffi::Object)]
pub struct WatchSession {
    runtime: Runtime,
    store: Arc<dyn RoomStore>,
    config: SyncConfig,
    callback: SharedCallback,
    active: Mutex<Option<ActiveRoom>>,
}

#[uniffi::export]
impl WatchSession {
    /// Create a session against a room store at `store_url`
    #[uniffi::constructor]
    pub fn new(store_url: String, api_token: Option<String>) -> Result<Self, CoreError> {
        init_tracing();
        let mut store = HttpRoomStore::new(store_url)?;
        if let Some(token) = api_token {
            store = store.with_token(token);
        }
        Self::with_store(Arc::new(store))
    }

    /// Create a session against a process-local store (all such sessions share it)
    #[uniffi::constructor]
    pub fn in_memory() -> Result<Self, CoreError> {
        init_tracing();
        let store = MEMORY_STORE.get_or_init(MemoryRoomStore::new).clone();
        Self::with_store(Arc::new(store))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Create a new room with nothing loaded. Returns its code for sharing.
    pub fn create_room(&self) -> Result<String, CoreError> {
        for attempt in 1..=CREATE_ATTEMPTS {
            let code = RoomCode::random();
            match self.runtime.block_on(self.store.create(code.as_str())) {
                Ok(_) => {
                    info!("Created room: {}", code);
                    return Ok(code.to_string());
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!("Room code {} taken ({}/{})", code, attempt, CREATE_ATTEMPTS);
                }
                Err(e) => {
                    warn!("create_room failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Err(CoreError::StoreError("No free room code".to_string()))
    }

    /// Join an existing room and start syncing `controller` with it
    pub fn join_room(
        &self,
        room_code: String,
        controller: Box<dyn MediaController>,
    ) -> Result<(), CoreError> {
        if self.lock_active().is_some() {
            return Err(CoreError::AlreadyInRoom);
        }

        let code = RoomCode::parse(&room_code)
            .ok_or_else(|| CoreError::InvalidRoomCode(room_code.clone()))?;

        let (events, events_rx) = media_event_channel();
        let observer = PlaybackObserver::new(ControllerElement::new(Arc::from(controller)));
        let listener = Arc::new(CallbackListener::new(
            code.to_string(),
            Arc::clone(&self.callback),
        ));

        // Attaching applies the room state, which may call back into this session
        let sync = self.runtime.block_on(Synchronizer::attach(
            Arc::clone(&self.store),
            observer,
            events_rx,
            code.as_str(),
            self.config.clone(),
            listener,
        ))?;

        let mut active = self.lock_active();
        if active.is_some() {
            // Lost a race with a concurrent join; `sync` is disposed on drop
            return Err(CoreError::AlreadyInRoom);
        }
        *active = Some(ActiveRoom { code, sync, events });

        info!("Joined room: {}", room_code);
        Ok(())
    }

    /// Forward a raw event from the native player
    pub fn media_event(&self, event: PlayerEvent) -> Result<(), CoreError> {
        let active = self.lock_active();
        let room = active.as_ref().ok_or(CoreError::NotInRoom)?;
        room.events
            .send(event.into())
            .map_err(|_| CoreError::NotInRoom)
    }

    /// Load a new source for everyone in the room
    pub fn set_source(&self, url: String) -> Result<(), CoreError> {
        let active = self.lock_active();
        let room = active.as_ref().ok_or(CoreError::NotInRoom)?;
        room.sync.set_source(url)?;
        Ok(())
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<(), CoreError> {
        let mut room = self.active.lock().take().ok_or(CoreError::NotInRoom)?;
        room.sync.dispose();
        info!("Left room {}", room.code);
        Ok(())
    }

    /// Read the room's playback state from the store
    pub fn get_room_state(&self) -> Result<RoomPlayback, CoreError> {
        let code = self.current_room().ok_or(CoreError::NotInRoom)?;
        let state = self
            .runtime
            .block_on(self.store.read(code.as_str()))?;
        Ok(RoomPlayback::from(&state))
    }

    /// Display code of the current room
    pub fn room_code(&self) -> Option<String> {
        self.current_room().map(|code| code.to_string())
    }

    /// Check if we are in a room (false once a fatal error ended the session)
    pub fn is_in_room(&self) -> bool {
        self.lock_active().is_some()
    }
}

impl WatchSession {
    fn with_store(store: Arc<dyn RoomStore>) -> Result<Self, CoreError> {
        info!("Initializing watchparty-core session");
        let runtime = Runtime::new().map_err(|e| CoreError::RuntimeError(e.to_string()))?;

        Ok(Self {
            runtime,
            store,
            config: SyncConfig::default(),
            callback: Arc::new(RwLock::new(None)),
            active: Mutex::new(None),
        })
    }

    fn current_room(&self) -> Option<RoomCode> {
        self.lock_active().as_ref().map(|room| room.code.clone())
    }

    /// Lock the active room, first clearing one that a fatal error already ended
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRoom>> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|room| !room.sync.is_running()) {
            if let Some(mut ended) = active.take() {
                // The sync task is gone, so this cannot wait on it
                ended.sync.dispose();
                info!("Room {} ended", ended.code);
            }
        }
        active
    }
}

/// Embed URL for YouTube sources; `None` when the native player can load the URL itself
#[uniffi::export]
pub fn youtube_embed_url(url: String, origin: String, autoplay: bool) -> Option<String> {
    MediaSource::classify(&url).embed_url(&origin, autoplay)
}
