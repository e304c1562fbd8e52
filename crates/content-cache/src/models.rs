//! Feed entities held by the entity tiers

use crate::entity::CacheableEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::mem;

/// A user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
            display_name: None,
            avatar_url: None,
            banner_url: None,
        }
    }
}

/// A feed post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub like_count: u32,
    pub reply_count: u32,
}

impl Post {
    pub fn new(id: impl Into<String>, author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            text: text.into(),
            image_urls: Vec::new(),
            created_at: Utc::now(),
            like_count: 0,
            reply_count: 0,
        }
    }
}

fn optional_len(value: &Option<String>) -> usize {
    value.as_ref().map_or(0, String::len)
}

impl CacheableEntity for User {
    fn cache_id(&self) -> &str {
        &self.id
    }

    fn blob_urls(&self) -> Vec<&str> {
        [&self.avatar_url, &self.banner_url]
            .into_iter()
            .filter_map(|url| url.as_deref())
            .collect()
    }

    fn estimated_size(&self) -> usize {
        mem::size_of::<Self>()
            + self.id.len()
            + self.handle.len()
            + optional_len(&self.display_name)
            + optional_len(&self.avatar_url)
            + optional_len(&self.banner_url)
    }
}

impl CacheableEntity for Post {
    fn cache_id(&self) -> &str {
        &self.id
    }

    fn blob_urls(&self) -> Vec<&str> {
        self.image_urls.iter().map(String::as_str).collect()
    }

    fn estimated_size(&self) -> usize {
        mem::size_of::<Self>()
            + self.id.len()
            + self.author_id.len()
            + self.text.len()
            + self
                .image_urls
                .iter()
                .map(|url| mem::size_of::<String>() + url.len())
                .sum::<usize>()
    }
}
