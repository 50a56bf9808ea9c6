//! External movie catalog client (TMDB-shaped API)
//!
//! Wraps the three endpoints the engine needs — search, details, credits —
//! behind the [`MovieCatalog`] trait so the matcher, applier, and tests can
//! swap implementations. The production client enforces the retry/backoff
//! policy: linear backoff on HTTP 429 up to a fixed retry budget, immediate
//! failure on any other non-2xx, configurable timeout, and an optional
//! minimum interval between requests so batches stay polite to the API.

use async_trait::async_trait;
use cinetek_common::config::CatalogConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Candidates kept from a search response (catalog order preserved)
pub const SEARCH_CANDIDATE_LIMIT: usize = 10;

/// Crew job name identifying directors in the credits response
const DIRECTOR_JOB: &str = "Director";

/// Catalog client failures, per the engine's error taxonomy
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Retry budget exhausted on HTTP 429
    #[error("catalog rate limited (retry budget exhausted)")]
    RateLimited,

    /// Transport failure, non-2xx response, or unparseable body
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// One search result under consideration for a raw record
#[derive(Debug, Clone, Deserialize)]
pub struct MovieCandidate {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_count: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<MovieCandidate>,
}

/// Genre entry as returned by the details endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Full canonical-entity fields from the details endpoint
///
/// Also serialized back out by the manual-resolution candidates endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    #[serde(default)]
    pub imdb_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<i64>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

impl MovieDetails {
    /// Release year derived from the first four characters of release_date
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
    }
}

#[derive(Debug, Deserialize)]
struct CreditsResponse {
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Deserialize)]
struct CrewMember {
    #[serde(default)]
    name: String,
    #[serde(default)]
    job: String,
}

fn directors_from_crew(crew: Vec<CrewMember>) -> Vec<String> {
    crew.into_iter()
        .filter(|member| member.job == DIRECTOR_JOB)
        .map(|member| member.name)
        .collect()
}

/// The three catalog operations the engine depends on
#[async_trait]
pub trait MovieCatalog: Send + Sync {
    /// Search for movies; results in catalog order, capped to
    /// [`SEARCH_CANDIDATE_LIMIT`].
    async fn search_movies(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<MovieCandidate>, CatalogError>;

    /// Director names for one movie (un-normalized, as returned)
    async fn movie_directors(&self, external_id: i64) -> Result<Vec<String>, CatalogError>;

    /// Full details for one movie
    async fn movie_details(&self, external_id: i64) -> Result<MovieDetails, CatalogError>;
}

/// Production catalog client backed by reqwest
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
    retry_limit: u32,
    backoff_base: Duration,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TmdbClient {
    /// Build a client from catalog configuration plus the resolved API key
    pub fn from_config(config: &CatalogConfig, api_key: String) -> cinetek_common::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| {
                cinetek_common::Error::Internal(format!("failed to build HTTP client: {}", e))
            })?;

        let limiter = Quota::with_period(Duration::from_millis(config.pace_ms))
            .map(RateLimiter::direct);

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            language: config.language.clone(),
            retry_limit: config.retry_limit,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            limiter,
        })
    }

    /// GET a catalog path with the standard query parameters, enforcing
    /// pace and the 429 retry budget.
    async fn get_json<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, CatalogError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..=self.retry_limit {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let response = self
                .http
                .get(&url)
                .query(&[
                    ("api_key", self.api_key.as_str()),
                    ("language", self.language.as_str()),
                ])
                .query(params)
                .send()
                .await
                .map_err(|e| CatalogError::Unavailable(format!("{}: {}", path, e)))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt == self.retry_limit {
                    break;
                }
                // Linear backoff: base delay plus the attempt index
                let delay = self.backoff_base + Duration::from_secs(attempt as u64);
                warn!(
                    path = path,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Catalog rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(CatalogError::Unavailable(format!(
                    "{} returned HTTP {}",
                    path, status
                )));
            }

            return response.json::<T>().await.map_err(|e| {
                CatalogError::Unavailable(format!("{}: invalid response body: {}", path, e))
            });
        }

        Err(CatalogError::RateLimited)
    }
}

#[async_trait]
impl MovieCatalog for TmdbClient {
    async fn search_movies(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<MovieCandidate>, CatalogError> {
        let mut params = vec![
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }

        let mut response: SearchResponse = self.get_json("/search/movie", &params).await?;
        response.results.truncate(SEARCH_CANDIDATE_LIMIT);
        debug!(
            query = query,
            year = ?year,
            candidates = response.results.len(),
            "Catalog search"
        );
        Ok(response.results)
    }

    async fn movie_directors(&self, external_id: i64) -> Result<Vec<String>, CatalogError> {
        let path = format!("/movie/{}/credits", external_id);
        let response: CreditsResponse = self.get_json(&path, &[]).await?;
        Ok(directors_from_crew(response.crew))
    }

    async fn movie_details(&self, external_id: i64) -> Result<MovieDetails, CatalogError> {
        let path = format!("/movie/{}", external_id);
        self.get_json(&path, &[]).await
    }
}
