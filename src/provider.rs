use std::time::Duration;

use color_eyre::eyre::{self, Context};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::openbook::Openbook;

const AUDIBLE_CATALOG_URL: &str = "https://api.audible.com/1.0/catalog/products";
const AUDNEXUS_BOOKS_URL: &str = "https://api.audnex.us/books";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A close match is accepted when the catalog runtime is within this many
/// minutes of the local audio's runtime.
const CLOSE_MATCH_MINUTES: i64 = 2;

lazy_static! {
    // Series positions are sometimes labeled, e.g. "Book 1"; only the number
    // matters.
    static ref SERIES_POSITION_REGEX: Regex = Regex::new(r"\d+(\.\d+)?").unwrap();
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Product {
    #[serde(default)]
    asin: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub asin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: String,
}

/// Catalog metadata for one book, either fetched from the provider or
/// derived locally from the manifest when no catalog match exists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDetails {
    #[serde(default)]
    pub asin: String,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(default)]
    pub narrators: Vec<Person>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub publisher_name: String,
    #[serde(default)]
    pub runtime_length_min: i64,
    #[serde(default)]
    pub series_primary: Option<Series>,
    #[serde(default)]
    pub summary: String,
}

impl BookDetails {
    /// Builds details from the manifest alone. Used when the catalog lookup
    /// finds nothing or is unreachable.
    pub fn from_openbook(book: &Openbook) -> Self {
        Self {
            authors: book
                .primary_author()
                .map(|name| {
                    vec![Person {
                        name: name.to_string(),
                    }]
                })
                .unwrap_or_default(),
            narrators: book
                .primary_narrator()
                .map(|name| {
                    vec![Person {
                        name: name.to_string(),
                    }]
                })
                .unwrap_or_default(),
            title: book.title.main.clone(),
            subtitle: book.title.subtitle.clone(),
            summary: book.description.short.clone(),
            series_primary: (!book.title.collection.is_empty()).then(|| Series {
                name: book.title.collection.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn series_name(&self) -> &str {
        self.series_primary
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("")
    }

    pub fn series_position(&self) -> Option<f64> {
        let series = self.series_primary.as_ref()?;
        SERIES_POSITION_REGEX
            .find(&series.position)
            .and_then(|m| m.as_str().parse().ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterList {
    #[serde(default)]
    pub asin: String,
    #[serde(default)]
    pub chapters: Vec<ProviderChapter>,
    #[serde(default)]
    pub is_accurate: bool,
    #[serde(default)]
    pub runtime_length_ms: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderChapter {
    #[serde(default)]
    pub length_ms: i64,
    #[serde(default)]
    pub start_offset_ms: i64,
    #[serde(default)]
    pub title: String,
}

/// Typed client for the Audible catalog search and the Audnexus metadata
/// API.
pub struct CatalogClient {
    http: reqwest::blocking::Client,
}

impl CatalogClient {
    pub fn new() -> eyre::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .wrap_err("failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// Searches the catalog for the book and returns its ASIN, or `None`
    /// when there is no acceptable match.
    ///
    /// With several candidates, an exact runtime match wins immediately;
    /// otherwise the candidate closest to the local runtime is accepted if
    /// it is within [`CLOSE_MATCH_MINUTES`].
    pub fn lookup_asin(
        &self,
        title: &str,
        author: &str,
        narrator: &str,
        runtime_min: i64,
    ) -> eyre::Result<Option<String>> {
        let response: SearchResponse = self
            .http
            .get(AUDIBLE_CATALOG_URL)
            .query(&[
                ("num_results", "10"),
                ("products_sort_by", "Relevance"),
                ("title", title),
                ("author", author),
                ("narrator", narrator),
            ])
            .send()
            .wrap_err("catalog search request failed")?
            .error_for_status()
            .wrap_err("catalog search returned an error status")?
            .json()
            .wrap_err("failed to decode catalog search response")?;

        match response.products.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.asin.clone())),
            products => {
                let mut candidates = Vec::with_capacity(products.len());
                for product in products {
                    let details = self.fetch_details(&product.asin)?;
                    if details.runtime_length_min == runtime_min {
                        log::info!("exact runtime match: {}", product.asin);
                        return Ok(Some(product.asin.clone()));
                    }
                    candidates.push((product.asin.clone(), details.runtime_length_min));
                }

                let close = pick_close_match(&candidates, runtime_min);
                if let Some(asin) = close {
                    log::info!(
                        "close runtime match (within {} minutes): {}",
                        CLOSE_MATCH_MINUTES,
                        asin
                    );
                }
                Ok(close.map(str::to_string))
            }
        }
    }

    pub fn fetch_details(&self, asin: &str) -> eyre::Result<BookDetails> {
        self.http
            .get(format!("{}/{}", AUDNEXUS_BOOKS_URL, asin))
            .send()
            .wrap_err_with(|| format!("metadata request for {} failed", asin))?
            .error_for_status()
            .wrap_err_with(|| format!("metadata request for {} returned an error status", asin))?
            .json()
            .wrap_err_with(|| format!("failed to decode metadata response for {}", asin))
    }

    pub fn fetch_chapters(&self, asin: &str) -> eyre::Result<ChapterList> {
        self.http
            .get(format!("{}/{}/chapters", AUDNEXUS_BOOKS_URL, asin))
            .send()
            .wrap_err_with(|| format!("chapter request for {} failed", asin))?
            .error_for_status()
            .wrap_err_with(|| format!("chapter request for {} returned an error status", asin))?
            .json()
            .wrap_err_with(|| format!("failed to decode chapter response for {}", asin))
    }
}

/// Picks the candidate whose runtime is closest to the local runtime, ties
/// broken by first-returned order. Returns `None` when even the closest
/// candidate differs by more than [`CLOSE_MATCH_MINUTES`].
fn pick_close_match(candidates: &[(String, i64)], runtime_min: i64) -> Option<&str> {
    let mut best: Option<(&str, i64)> = None;
    for (asin, runtime) in candidates {
        let diff = (runtime - runtime_min).abs();
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((asin, diff));
        }
    }
    best.filter(|(_, diff)| *diff <= CLOSE_MATCH_MINUTES)
        .map(|(asin, _)| asin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_match_prefers_smallest_difference() {
        let candidates = vec![
            ("A".to_string(), 600),
            ("B".to_string(), 601),
            ("C".to_string(), 598),
        ];
        assert_eq!(pick_close_match(&candidates, 601), Some("B"));
    }

    #[test]
    fn close_match_ties_go_to_the_first_candidate() {
        let candidates = vec![("A".to_string(), 599), ("B".to_string(), 601)];
        assert_eq!(pick_close_match(&candidates, 600), Some("A"));
    }

    #[test]
    fn close_match_rejects_everything_beyond_the_threshold() {
        let candidates = vec![("A".to_string(), 500), ("B".to_string(), 700)];
        assert_eq!(pick_close_match(&candidates, 600), None);
    }

    #[test]
    fn series_position_digits_are_extracted() {
        let details = BookDetails {
            series_primary: Some(Series {
                position: "Book 4".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(details.series_position(), Some(4.0));

        let fractional = BookDetails {
            series_primary: Some(Series {
                position: "3.5".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(fractional.series_position(), Some(3.5));
    }

    #[test]
    fn missing_series_position_is_none() {
        let details = BookDetails {
            series_primary: Some(Series::default()),
            ..Default::default()
        };
        assert_eq!(details.series_position(), None);
        assert_eq!(BookDetails::default().series_position(), None);
    }

    #[test]
    fn local_details_carry_manifest_metadata() {
        let book: Openbook = serde_json::from_str(
            r#"{
                "creator": [
                    {"name": "Jane Doe", "role": "author"},
                    {"name": "Mary Major", "role": "narrator"}
                ],
                "description": {"short": "Short."},
                "nav": {"toc": [{"path": "x", "title": "y"}]},
                "title": {"collection": "Some Series", "main": "Some Book"}
            }"#,
        )
        .unwrap();

        let details = BookDetails::from_openbook(&book);
        assert_eq!(details.title, "Some Book");
        assert_eq!(details.authors[0].name, "Jane Doe");
        assert_eq!(details.narrators[0].name, "Mary Major");
        assert_eq!(details.series_name(), "Some Series");
        assert!(details.asin.is_empty());
    }
}
