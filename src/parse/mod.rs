//! Raw entity extraction
//!
//! Fetch bodies are either JSON API responses or server-rendered pages with
//! the state embedded in a `<script>` tag. Both are reduced to a
//! `serde_json::Value` and the entity is located by well-known container
//! keys, reading each field through a list of aliases. A body that does not
//! yield the entity is a [`ScrapeError::ParseFailed`] carrying a payload
//! reference (`<entity>#<xxh3>:<bytes>`); it is never defaulted.

mod embedded;
mod fields;

use serde_json::Value;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{ScrapeError, ScrapeResult};
use crate::models::{RawHashtag, RawProfile, RawSoundTrend, RawVideo, StatsSample, VideoStats};

pub use embedded::extract_state;
use fields::{bool_of, datetime_of, f64_of, field, find, string_of, u64_array_of, u64_of};

/// Stable reference to a payload for logs and errors
#[must_use]
pub fn payload_ref(entity: &str, body: &str) -> String {
    format!("{entity}#{:016x}:{}", xxh3_64(body.as_bytes()), body.len())
}

fn failed(entity: &str, body: &str, message: impl Into<String>) -> ScrapeError {
    let payload_ref = payload_ref(entity, body);
    let message = message.into();
    warn!(%payload_ref, "parse failed: {message}");
    ScrapeError::ParseFailed { payload_ref, message }
}

/// JSON body or page state
fn document(entity: &str, body: &str) -> ScrapeResult<Value> {
    if body.len() > embedded::MAX_DOCUMENT_SIZE {
        return Err(failed(entity, body, format!("body of {} bytes exceeds limit", body.len())));
    }
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| failed(entity, body, format!("invalid JSON: {e}")));
    }
    extract_state(body).ok_or_else(|| failed(entity, body, "no embedded state found"))
}

pub fn parse_profile(body: &str, key: &str) -> ScrapeResult<RawProfile> {
    let entity = format!("user:{key}");
    let doc = document(&entity, body)?;
    let info = find(&doc, &["userInfo", "user_info", "userDetail"]).unwrap_or(&doc);
    let user = field(info, &["user", "author", "profile"])
        .ok_or_else(|| failed(&entity, body, "missing user object"))?;
    let stats = field(info, &["stats", "statsV2", "authorStats"]).unwrap_or(user);

    let id = string_of(user, &["id", "uid", "userId"])
        .ok_or_else(|| failed(&entity, body, "missing user id"))?;
    let handle = string_of(user, &["uniqueId", "unique_id", "handle", "username"]).unwrap_or_else(|| key.to_string());
    let follower_count = u64_of(stats, &["followerCount", "follower_count", "fans"])
        .ok_or_else(|| failed(&entity, body, "missing follower count"))?;

    let recent_videos = field(&doc, &["itemList", "items", "videos"])
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(video_from).collect())
        .unwrap_or_default();

    Ok(RawProfile {
        id,
        handle,
        nickname: string_of(user, &["nickname", "displayName", "nickName"]),
        bio: string_of(user, &["signature", "bio", "description"]),
        region: string_of(user, &["region", "country"]),
        verified: bool_of(user, &["verified", "isVerified"]),
        follower_count,
        following_count: u64_of(stats, &["followingCount", "following_count", "following"]).unwrap_or(0),
        heart_count: u64_of(stats, &["heartCount", "heart", "diggCount", "likes"]).unwrap_or(0),
        video_count: u64_of(stats, &["videoCount", "video_count", "aweme_count"]).unwrap_or(0),
        recent_videos,
    })
}

/// Post list (`itemList`) of a profile
pub fn parse_video_list(body: &str, key: &str) -> ScrapeResult<Vec<RawVideo>> {
    let entity = format!("user-videos:{key}");
    let doc = document(&entity, body)?;
    let items = find(&doc, &["itemList", "items", "aweme_list", "videos"])
        .and_then(Value::as_array)
        .ok_or_else(|| failed(&entity, body, "missing item list"))?;
    Ok(items.iter().filter_map(video_from).collect())
}

pub fn parse_video(body: &str, key: &str) -> ScrapeResult<RawVideo> {
    let entity = format!("video:{key}");
    let doc = document(&entity, body)?;
    let item = find(&doc, &["itemStruct", "aweme_detail", "video_detail"]).unwrap_or(&doc);
    let video = video_from(item).ok_or_else(|| failed(&entity, body, "missing video id or stats"))?;
    if video.id != key {
        return Err(failed(&entity, body, format!("response is for video {}", video.id)));
    }
    Ok(video)
}

fn video_from(item: &Value) -> Option<RawVideo> {
    let id = string_of(item, &["id", "aweme_id", "itemId"])?;
    let stats_obj = field(item, &["stats", "statistics", "statsV2"])?;
    let stats = VideoStats {
        views: u64_of(stats_obj, &["playCount", "play_count", "views"])?,
        likes: u64_of(stats_obj, &["diggCount", "digg_count", "likes"]).unwrap_or(0),
        comments: u64_of(stats_obj, &["commentCount", "comment_count", "comments"]).unwrap_or(0),
        shares: u64_of(stats_obj, &["shareCount", "share_count", "shares"]).unwrap_or(0),
        saves: u64_of(stats_obj, &["collectCount", "collect_count", "saves"]).unwrap_or(0),
    };
    let video_meta = field(item, &["video"]).unwrap_or(item);
    let author = field(item, &["author"]);

    let mut hashtags: Vec<String> = field(item, &["textExtra", "text_extra"])
        .and_then(Value::as_array)
        .map(|extras| {
            extras
                .iter()
                .filter_map(|e| string_of(e, &["hashtagName", "hashtag_name"]))
                .collect()
        })
        .unwrap_or_default();
    if let Some(challenges) = field(item, &["challenges", "cha_list"]).and_then(Value::as_array) {
        hashtags.extend(challenges.iter().filter_map(|c| string_of(c, &["title", "cha_name"])));
    }
    hashtags.sort();
    hashtags.dedup();

    let comments_sample = field(item, &["comments", "commentSample"])
        .and_then(Value::as_array)
        .map(|comments| {
            comments
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string).or_else(|| string_of(c, &["text"])))
                .collect()
        })
        .unwrap_or_default();

    let history = field(item, &["history", "statsHistory"])
        .and_then(Value::as_array)
        .map(|samples| {
            samples
                .iter()
                .filter_map(|s| {
                    Some(StatsSample {
                        at: datetime_of(s, &["at", "time", "timestamp"])?,
                        views: u64_of(s, &["views", "playCount"])?,
                        engagement: u64_of(s, &["engagement"]).unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(RawVideo {
        id,
        author_id: author
            .and_then(|a| string_of(a, &["id", "uid", "uniqueId"]))
            .or_else(|| string_of(item, &["authorId", "author_id"])),
        description: string_of(item, &["desc", "description", "caption"]).unwrap_or_default(),
        created_at: datetime_of(item, &["createTime", "create_time", "createdAt"]),
        duration_secs: f64_of(video_meta, &["duration", "durationSecs"]),
        stats,
        avg_watch_time_secs: f64_of(item, &["avgWatchTime", "avg_watch_time"]),
        cross_platform_shares: u64_of(stats_obj, &["whatsappShareCount", "crossPlatformShares"]).unwrap_or(0),
        hashtags,
        comments_sample,
        history,
    })
}

pub fn parse_sound(body: &str, key: &str) -> ScrapeResult<RawSoundTrend> {
    let entity = format!("trend:{key}");
    let doc = document(&entity, body)?;
    let info = find(&doc, &["musicInfo", "music_info"]).unwrap_or(&doc);
    let music = field(info, &["music", "sound"]).ok_or_else(|| failed(&entity, body, "missing music object"))?;
    let stats = field(info, &["stats"]).unwrap_or(music);

    Ok(RawSoundTrend {
        id: string_of(music, &["id", "musicId"]).ok_or_else(|| failed(&entity, body, "missing music id"))?,
        title: string_of(music, &["title", "name"]).unwrap_or_default(),
        author: string_of(music, &["authorName", "author"]),
        duration_secs: f64_of(music, &["duration"]),
        original: bool_of(music, &["original", "isOriginal"]),
        usage_count: u64_of(stats, &["videoCount", "user_count", "usageCount"])
            .ok_or_else(|| failed(&entity, body, "missing usage count"))?,
        usage_history: u64_array_of(info, &["usageHistory", "history"]),
        top_video_ids: field(&doc, &["itemList", "items"])
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|i| string_of(i, &["id"])).collect())
            .unwrap_or_default(),
    })
}

pub fn parse_hashtag(body: &str, key: &str) -> ScrapeResult<RawHashtag> {
    let entity = format!("hashtag:{key}");
    let doc = document(&entity, body)?;
    let info = find(&doc, &["challengeInfo", "challenge_info", "hashtagInfo"]).unwrap_or(&doc);
    let challenge = field(info, &["challenge", "hashtag"])
        .ok_or_else(|| failed(&entity, body, "missing challenge object"))?;
    let stats = field(info, &["stats", "statsV2"]).unwrap_or(challenge);

    Ok(RawHashtag {
        id: string_of(challenge, &["id", "cid"]).unwrap_or_else(|| key.to_string()),
        name: string_of(challenge, &["title", "name", "cha_name"]).unwrap_or_else(|| key.to_string()),
        description: string_of(challenge, &["desc", "description"]),
        view_count: u64_of(stats, &["viewCount", "view_count", "views"])
            .ok_or_else(|| failed(&entity, body, "missing view count"))?,
        video_count: u64_of(stats, &["videoCount", "video_count"]).unwrap_or(0),
        usage_history: u64_array_of(info, &["usageHistory", "history"]),
    })
}
