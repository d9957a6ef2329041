use sourcebot_core::{Post, PostType, SearchRule};
use std::collections::HashSet;

/// Filter and target configuration for one run of a search term.
///
/// `required_tags` and the caller's tag blacklist are mutually exclusive:
/// when required tags are present the tag blacklist is not consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InclusionRule {
    /// Requested sample size; 0 means the blog default.
    pub sample_size: usize,
    /// Accepted post types; `None` means the blog default.
    pub post_types: Option<Vec<PostType>>,
    pub required_tags: Option<Vec<String>>,
}

impl From<&SearchRule> for InclusionRule {
    fn from(rule: &SearchRule) -> Self {
        Self {
            sample_size: rule.sample_size,
            post_types: rule.post_types.clone(),
            required_tags: rule.required_tags.clone().filter(|tags| !tags.is_empty()),
        }
    }
}

/// Accounts and tags the caller never wants selected.
#[derive(Debug, Clone, Default)]
pub struct Blacklists {
    pub blogs: HashSet<String>,
    pub tags: HashSet<String>,
}

/// Outcome of evaluating one fetched post against a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    WrongType,
    BlacklistedBlog,
    AlreadyPosted,
    MissingTag(String),
    BlacklistedTag(String),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl InclusionRule {
    /// Target count for a run: the previous run's yield when positive,
    /// else the requested size, else the blog default.
    pub fn target(&self, last_count: usize, blog_default: usize) -> usize {
        if last_count > 0 {
            last_count
        } else if self.sample_size > 0 {
            self.sample_size
        } else {
            blog_default
        }
    }

    pub fn accepted_types<'a>(&'a self, blog_default: &'a [PostType]) -> &'a [PostType] {
        self.post_types.as_deref().unwrap_or(blog_default)
    }

    pub fn evaluate(
        &self,
        post: &Post,
        accepted_types: &[PostType],
        blacklists: &Blacklists,
        post_blacklist: &HashSet<u64>,
    ) -> Verdict {
        if !accepted_types.contains(&post.kind) {
            return Verdict::WrongType;
        }
        if blacklists.blogs.contains(&post.blog_name) {
            return Verdict::BlacklistedBlog;
        }
        if post_blacklist.contains(&post.id) {
            return Verdict::AlreadyPosted;
        }

        match &self.required_tags {
            Some(required) => {
                if let Some(missing) = required.iter().find(|tag| !post.has_tag(tag)) {
                    return Verdict::MissingTag(missing.clone());
                }
            }
            None => {
                if let Some(banned) = post.tags.iter().find(|tag| blacklists.tags.contains(*tag)) {
                    return Verdict::BlacklistedTag(banned.clone());
                }
            }
        }

        Verdict::Accepted
    }
}
