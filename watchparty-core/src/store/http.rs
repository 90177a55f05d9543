//! Room store over a JSON REST API
//!
//! `GET`/`PATCH`/`POST` on `{base}/rooms/{code}`. Subscriptions poll the room
//! and push whenever `updatedAt` advances. The first failed poll of a run is
//! pushed as an error; the poller keeps going until the room disappears.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use super::{RoomStore, StoreError, StoreSubscription, StoreUpdate};
use crate::sync::{PlaybackDelta, RoomPlaybackState};

/// Default connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between subscription polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for a room store REST API
#[derive(Debug, Clone)]
pub struct HttpRoomStore {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    poll_interval: Duration,
}

impl HttpRoomStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the API token for authentication
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn room_url(&self, room: &str) -> String {
        format!("{}/rooms/{}", self.base_url, room)
    }

    /// Build a request with optional authentication
    fn request(&self, method: Method, room: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.room_url(room));

        if let Some(token) = &self.api_token {
            req = req.header("apitoken", token);
        }

        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response, StoreError> {
        req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                warn!("Room store unreachable: {}", e);
                StoreError::NotReachable
            } else {
                StoreError::Http(e)
            }
        })
    }
}

/// Map a response to the room document or a typed error
async fn parse_state(room: &str, resp: Response) -> Result<RoomPlaybackState, StoreError> {
    match resp.status() {
        status if status.is_success() => Ok(resp.json().await?),
        StatusCode::NOT_FOUND => Err(StoreError::RoomNotFound(room.to_string())),
        StatusCode::CONFLICT => Err(StoreError::AlreadyExists(room.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized),
        status => Err(StoreError::Api(format!(
            "Unexpected response (HTTP {})",
            status.as_u16()
        ))),
    }
}

#[async_trait]
impl RoomStore for HttpRoomStore {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn create(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        let resp = self
            .send(self.request(Method::POST, room).json(&RoomPlaybackState::default()))
            .await?;
        parse_state(room, resp).await
    }

    async fn read(&self, room: &str) -> Result<RoomPlaybackState, StoreError> {
        let resp = self.send(self.request(Method::GET, room)).await?;
        parse_state(room, resp).await
    }

    async fn write(
        &self,
        room: &str,
        delta: &PlaybackDelta,
    ) -> Result<RoomPlaybackState, StoreError> {
        let resp = self
            .send(self.request(Method::PATCH, room).json(delta))
            .await?;
        parse_state(room, resp).await
    }

    async fn subscribe(&self, room: &str) -> Result<StoreSubscription, StoreError> {
        // Fail fast on a missing room instead of inside the poll loop
        let initial = self.read(room).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let store = self.clone();
        let room = room.to_string();

        tokio::spawn(async move {
            debug!("Poll subscription for {} started", room);
            let mut tracker = PollTracker::new(initial.updated_at);
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => {}
                }

                let polled = store.read(&room).await;
                let gone = matches!(polled, Err(StoreError::RoomNotFound(_)));
                if let Err(e) = &polled {
                    debug!("Poll for {} failed: {}", room, e);
                }

                if let Some(update) = tracker.observe(polled) {
                    if tx.send(update).is_err() {
                        break;
                    }
                }
                if gone {
                    warn!("Room {} disappeared, closing subscription", room);
                    break;
                }
            }

            debug!("Poll subscription for {} ended", room);
        });

        Ok(StoreSubscription::with_cancel(rx, cancel_tx))
    }
}

/// Decides which poll results become subscription updates
#[derive(Debug)]
struct PollTracker {
    last_seen: u64,
    failing: bool,
}

impl PollTracker {
    fn new(last_seen: u64) -> Self {
        Self {
            last_seen,
            failing: false,
        }
    }

    /// Newer states pass through. Only the first failure of a run is reported.
    fn observe(&mut self, polled: Result<RoomPlaybackState, StoreError>) -> Option<StoreUpdate> {
        match polled {
            Ok(state) => {
                self.failing = false;
                if state.updated_at > self.last_seen {
                    self.last_seen = state.updated_at;
                    Some(Ok(state))
                } else {
                    None
                }
            }
            Err(e) if self.failing && !e.is_room_not_found() => None,
            Err(e) => {
                self.failing = true;
                Some(Err(e))
            }
        }
    }
}
