//! Tag-driven discovery: the per-term TTL cache, inclusion rules, search
//! terms and the blog context they report into.

pub mod blog;
pub mod cache;
pub mod rule;
pub mod term;

pub use blog::BlogContext;
pub use cache::{PostCache, DEFAULT_TTL};
pub use rule::{Blacklists, InclusionRule, Verdict};
pub use term::{MatchResult, SearchTerm, TagTerm, TermOptions, TAG_TERM_TYPE};
