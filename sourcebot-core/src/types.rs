use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::CoreError;

pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Post types served by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Text,
    Quote,
    Link,
    Answer,
    Video,
    Audio,
    Photo,
    Chat,
}

impl PostType {
    pub const ALL: [PostType; 8] = [
        PostType::Text,
        PostType::Quote,
        PostType::Link,
        PostType::Answer,
        PostType::Video,
        PostType::Audio,
        PostType::Photo,
        PostType::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Text => "text",
            PostType::Quote => "quote",
            PostType::Link => "link",
            PostType::Answer => "answer",
            PostType::Video => "video",
            PostType::Audio => "audio",
            PostType::Photo => "photo",
            PostType::Chat => "chat",
        }
    }

    /// Parses a comma separated list such as `"text, photo"`.
    pub fn parse_list(raw: &str) -> Result<Vec<PostType>, CoreError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PostType::from_str)
            .collect()
    }
}

impl FromStr for PostType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::InvalidInput {
                message: format!("unknown post type '{}'", s),
            })
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post returned by the tag search endpoint.
///
/// Identity is the platform id: two `Post` values with the same id compare
/// equal and hash the same regardless of the other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub blog_name: String,
    pub timestamp: i64,
    pub kind: PostType,
    pub tags: Vec<String>,
    pub post_url: Option<String>,
    pub reblog_key: Option<String>,
}

impl Post {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Post {}

impl Hash for Post {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One row of the account listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogInfo {
    pub url: String,
    pub active: bool,
    pub adm_active: bool,
}

impl BlogInfo {
    /// Both the owner and an administrator must have the blog switched on.
    pub fn is_runnable(&self) -> bool {
        self.active && self.adm_active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogSettings {
    pub post_types: Vec<PostType>,
    pub sample_size: usize,
}

impl Default for BlogSettings {
    fn default() -> Self {
        Self {
            post_types: PostType::ALL.to_vec(),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// A persisted search rule for one blog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRule {
    pub id: i64,
    pub term_type: String,
    pub term: String,
    pub post_types: Option<Vec<PostType>>,
    pub sample_size: usize,
    pub required_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRecord {
    pub blog: String,
    pub term_type: String,
    pub term: String,
    pub duration_ms: u64,
    pub searched: usize,
    pub selected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn post(id: u64, blog: &str) -> Post {
        Post {
            id,
            blog_name: blog.to_string(),
            timestamp: 1_460_000_000,
            kind: PostType::Photo,
            tags: vec!["cats".to_string()],
            post_url: None,
            reblog_key: None,
        }
    }

    #[test]
    fn test_post_identity_is_id() {
        let mut set = HashSet::new();
        set.insert(post(1, "a"));
        assert!(!set.insert(post(1, "b")));
        assert!(set.insert(post(2, "a")));
    }

    #[test]
    fn test_post_type_parse_list() {
        let types = PostType::parse_list("text, Photo,quote").unwrap();
        assert_eq!(types, vec![PostType::Text, PostType::Photo, PostType::Quote]);
        assert!(PostType::parse_list("").unwrap().is_empty());
        assert!(PostType::parse_list("text,gif").is_err());
    }

    #[test]
    fn test_blog_needs_both_flags() {
        let mut blog = BlogInfo {
            url: "demo".to_string(),
            active: true,
            adm_active: false,
        };
        assert!(!blog.is_runnable());
        blog.adm_active = true;
        assert!(blog.is_runnable());
    }
}
