//! Media source classification
//!
//! Direct files play in a media element; YouTube links are shown through the
//! embed player instead.

use reqwest::Url;

/// Length of a YouTube video id
const YOUTUBE_ID_LENGTH: usize = 11;

/// Kind of media a room's `videoUrl` points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Nothing loaded
    Empty,
    /// A file or stream the media element plays directly (possibly proxied)
    Direct(String),
    YouTube { video_id: String },
}

impl MediaSource {
    pub fn classify(url: &str) -> Self {
        let url = url.trim();
        if url.is_empty() {
            return MediaSource::Empty;
        }

        match Url::parse(url).ok().and_then(|parsed| youtube_video_id(&parsed)) {
            Some(video_id) => MediaSource::YouTube { video_id },
            None => MediaSource::Direct(url.to_string()),
        }
    }

    /// Embed player URL with the JS API enabled, for YouTube sources only
    pub fn embed_url(&self, origin: &str, autoplay: bool) -> Option<String> {
        match self {
            MediaSource::YouTube { video_id } => Some(format!(
                "https://www.youtube.com/embed/{}?enablejsapi=1&origin={}&autoplay={}",
                video_id,
                origin,
                if autoplay { 1 } else { 0 }
            )),
            _ => None,
        }
    }
}

fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(&host);

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("embed" | "v" | "e" | "shorts" | "live") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == YOUTUBE_ID_LENGTH
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
