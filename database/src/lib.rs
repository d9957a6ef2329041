use async_trait::async_trait;
use sourcebot_core::{
    BlogInfo, BlogSettings, BlogStore, CoreError, DatabaseError, PostHistory, PostType,
    SearchRule, StatRecord, StatsSink,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};


pub struct Database {
    connection_string: String,
    max_connections: u32,
    pool: Option<SqlitePool>,
}

/// Values for a new `blogs` row.
#[derive(Debug, Clone)]
pub struct NewBlog<'a> {
    pub url: &'a str,
    pub active: bool,
    pub adm_active: bool,
    pub post_types: Option<&'a str>,
    pub sample_size: usize,
}

/// Values for a new `search_rules` row.
#[derive(Debug, Clone)]
pub struct NewRule<'a> {
    pub term_type: &'a str,
    pub term: &'a str,
    pub post_types: Option<&'a str>,
    pub sample_size: usize,
    pub required_tags: Option<&'a str>,
}

impl<'a> NewRule<'a> {
    pub fn tag(term: &'a str) -> Self {
        Self {
            term_type: "tag",
            term,
            post_types: None,
            sample_size: 0,
            required_tags: None,
        }
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_post_types(raw: Option<String>) -> Result<Option<Vec<PostType>>, CoreError> {
    match raw {
        Some(value) if !value.trim().is_empty() => Ok(Some(PostType::parse_list(&value)?)),
        _ => Ok(None),
    }
}

fn to_size(value: i64) -> usize {
    value.max(0) as usize
}

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            max_connections: 5,
            pool: None,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to database {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool()?)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Database connection closed");
        }
    }

    fn pool(&self) -> Result<&SqlitePool, CoreError> {
        self.pool.as_ref().ok_or_else(|| {
            DatabaseError::ConnectionFailed {
                reason: "database not connected".to_string(),
            }
            .into()
        })
    }

    async fn blog_id(&self, blog: &str) -> Result<i64, CoreError> {
        let row = sqlx::query("SELECT id FROM blogs WHERE url = ?")
            .bind(blog)
            .fetch_optional(self.pool()?)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Err(DatabaseError::UnknownBlog {
                blog: blog.to_string(),
            }
            .into()),
        }
    }

    pub async fn add_blog(&self, blog: NewBlog<'_>) -> Result<i64, CoreError> {
        let result = sqlx::query(
            "INSERT INTO blogs (url, active, adm_active, post_types, sample_size) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(blog.url)
        .bind(blog.active)
        .bind(blog.adm_active)
        .bind(blog.post_types)
        .bind(blog.sample_size as i64)
        .execute(self.pool()?)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_blog_flags(
        &self,
        blog: &str,
        active: bool,
        adm_active: bool,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE blogs SET active = ?, adm_active = ? WHERE url = ?")
            .bind(active)
            .bind(adm_active)
            .bind(blog)
            .execute(self.pool()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::UnknownBlog {
                blog: blog.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn add_rule(&self, blog: &str, rule: NewRule<'_>) -> Result<i64, CoreError> {
        let blog_id = self.blog_id(blog).await?;
        let result = sqlx::query(
            "INSERT INTO search_rules (blog_id, term_type, term, post_types, sample_size, required_tags)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(blog_id)
        .bind(rule.term_type)
        .bind(rule.term)
        .bind(rule.post_types)
        .bind(rule.sample_size as i64)
        .bind(rule.required_tags)
        .execute(self.pool()?)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn add_blog_blacklist(&self, blog: &str, blog_name: &str) -> Result<(), CoreError> {
        let blog_id = self.blog_id(blog).await?;
        sqlx::query("INSERT OR IGNORE INTO blog_blacklist (blog_id, blog_name) VALUES (?, ?)")
            .bind(blog_id)
            .bind(blog_name)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    pub async fn add_tag_blacklist(&self, blog: &str, tag: &str) -> Result<(), CoreError> {
        let blog_id = self.blog_id(blog).await?;
        sqlx::query("INSERT OR IGNORE INTO tag_blacklist (blog_id, tag) VALUES (?, ?)")
            .bind(blog_id)
            .bind(tag)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    pub async fn stats(&self, blog: &str) -> Result<Vec<StatRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT b.url, s.term_type, s.term, s.duration_ms, s.searched, s.selected
             FROM stats s JOIN blogs b ON b.id = s.blog_id
             WHERE b.url = ? ORDER BY s.id",
        )
        .bind(blog)
        .fetch_all(self.pool()?)
        .await?;

        rows.iter().map(stat_from_row).collect()
    }
}

fn stat_from_row(row: &SqliteRow) -> Result<StatRecord, CoreError> {
    Ok(StatRecord {
        blog: row.try_get("url")?,
        term_type: row.try_get("term_type")?,
        term: row.try_get("term")?,
        duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        searched: to_size(row.try_get("searched")?),
        selected: to_size(row.try_get("selected")?),
    })
}

#[async_trait]
impl BlogStore for Database {
    async fn list_blogs(&self) -> Result<Vec<BlogInfo>, CoreError> {
        let rows = sqlx::query("SELECT url, active, adm_active FROM blogs ORDER BY id")
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(|row| -> Result<BlogInfo, CoreError> {
                Ok(BlogInfo {
                    url: row.try_get("url")?,
                    active: row.try_get("active")?,
                    adm_active: row.try_get("adm_active")?,
                })
            })
            .collect()
    }

    async fn blog_settings(&self, blog: &str) -> Result<BlogSettings, CoreError> {
        let row = sqlx::query("SELECT post_types, sample_size FROM blogs WHERE url = ?")
            .bind(blog)
            .fetch_optional(self.pool()?)
            .await?
            .ok_or_else(|| DatabaseError::UnknownBlog {
                blog: blog.to_string(),
            })?;

        let defaults = BlogSettings::default();
        Ok(BlogSettings {
            post_types: parse_post_types(row.try_get("post_types")?)?
                .unwrap_or(defaults.post_types),
            sample_size: to_size(row.try_get("sample_size")?),
        })
    }

    async fn post_blacklist(&self, blog: &str) -> Result<HashSet<u64>, CoreError> {
        let blog_id = self.blog_id(blog).await?;
        let rows = sqlx::query("SELECT post_id FROM posted WHERE blog_id = ?")
            .bind(blog_id)
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(|row| -> Result<u64, CoreError> { Ok(row.try_get::<i64, _>("post_id")? as u64) })
            .collect()
    }

    async fn blog_blacklist(&self, blog: &str) -> Result<HashSet<String>, CoreError> {
        let blog_id = self.blog_id(blog).await?;
        let rows = sqlx::query("SELECT blog_name FROM blog_blacklist WHERE blog_id = ?")
            .bind(blog_id)
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(|row| -> Result<String, CoreError> { Ok(row.try_get("blog_name")?) })
            .collect()
    }

    async fn tag_blacklist(&self, blog: &str) -> Result<HashSet<String>, CoreError> {
        let blog_id = self.blog_id(blog).await?;
        let rows = sqlx::query("SELECT tag FROM tag_blacklist WHERE blog_id = ?")
            .bind(blog_id)
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(|row| -> Result<String, CoreError> { Ok(row.try_get("tag")?) })
            .collect()
    }

    async fn search_rules(&self, blog: &str) -> Result<Vec<SearchRule>, CoreError> {
        let blog_id = self.blog_id(blog).await?;
        let rows = sqlx::query(
            "SELECT id, term_type, term, post_types, sample_size, required_tags
             FROM search_rules WHERE blog_id = ? AND active = 1 ORDER BY id",
        )
        .bind(blog_id)
        .fetch_all(self.pool()?)
        .await?;

        rows.iter()
            .map(|row| -> Result<SearchRule, CoreError> {
                let required_tags = split_list(row.try_get("required_tags")?);
                Ok(SearchRule {
                    id: row.try_get("id")?,
                    term_type: row.try_get("term_type")?,
                    term: row.try_get("term")?,
                    post_types: parse_post_types(row.try_get("post_types")?)?,
                    sample_size: to_size(row.try_get("sample_size")?),
                    required_tags: (!required_tags.is_empty()).then_some(required_tags),
                })
            })
            .collect()
    }
}

#[async_trait]
impl StatsSink for Database {
    async fn record_stat(&self, record: &StatRecord) -> Result<(), CoreError> {
        let blog_id = self.blog_id(&record.blog).await?;
        sqlx::query(
            "INSERT INTO stats (blog_id, term_type, term, duration_ms, searched, selected, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(blog_id)
        .bind(&record.term_type)
        .bind(&record.term)
        .bind(record.duration_ms as i64)
        .bind(record.searched as i64)
        .bind(record.selected as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool()?)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PostHistory for Database {
    async fn mark_posted(&self, blog: &str, post_id: u64) -> Result<(), CoreError> {
        let blog_id = self.blog_id(blog).await?;
        sqlx::query("INSERT OR IGNORE INTO posted (blog_id, post_id, posted_at) VALUES (?, ?, ?)")
            .bind(blog_id)
            .bind(post_id as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool()?)
            .await?;
        Ok(())
    }
}
