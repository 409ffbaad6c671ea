//! Paginated locator.
//!
//! Some sub-resources have no "get by identity" endpoint and can only be
//! found by walking a paginated listing. The locator scans pages in the
//! order the remote system returns them and stops at the first match.

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{PollError, Result, TransportError};
use crate::transport::Transport;

/// Continuation state for a listing walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    token: Option<String>,
    page_size: u32,
}

impl PageCursor {
    /// Cursor for the first page.
    pub fn start(page_size: u32) -> Self {
        Self {
            token: None,
            page_size,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Replace the token with the one from the last page. Returns false when
    /// there are no more pages.
    fn advance(&mut self, next: Option<String>) -> bool {
        self.token = next.filter(|t| !t.is_empty());
        self.token.is_some()
    }
}

/// How a listed item's key is compared against the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    Exact(String),
    /// Matches `<name>` itself or anything ending in `/<name>`.
    PathSuffix(String),
}

/// Predicate over listed items.
#[derive(Debug, Clone)]
pub struct ItemMatcher {
    field: String,
    rule: MatchRule,
}

impl ItemMatcher {
    /// `field` may be a dotted path into nested objects (`metadata.name`).
    pub fn new(field: impl Into<String>, rule: MatchRule) -> Self {
        Self {
            field: field.into(),
            rule,
        }
    }

    /// Match items whose `name` ends with `/<name>`.
    pub fn name_suffix(name: impl Into<String>) -> Self {
        Self::new("name", MatchRule::PathSuffix(name.into()))
    }

    /// `None` when the item lacks the key field.
    fn matches(&self, item: &Value) -> Option<bool> {
        let pointer = format!("/{}", self.field.replace('.', "/"));
        let key = item.pointer(&pointer)?.as_str()?;
        Some(match &self.rule {
            MatchRule::Exact(want) => key == want,
            MatchRule::PathSuffix(want) => {
                key == want
                    || key
                        .strip_suffix(want.as_str())
                        .is_some_and(|rest| rest.ends_with('/'))
            }
        })
    }
}

/// A listing endpoint and the field its items are returned under.
#[derive(Debug, Clone)]
pub struct Listing {
    pub url: String,
    pub items_field: String,
}

impl Listing {
    pub fn new(url: impl Into<String>, items_field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            items_field: items_field.into(),
        }
    }
}

/// Walks a listing until an item matches or the pages run out.
pub struct PaginatedLocator<'a> {
    transport: &'a dyn Transport,
    listing: Listing,
    matcher: ItemMatcher,
    page_size: u32,
}

impl<'a> PaginatedLocator<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        listing: Listing,
        matcher: ItemMatcher,
        page_size: u32,
    ) -> Self {
        Self {
            transport,
            listing,
            matcher,
            page_size,
        }
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    /// First matching item, or `None` once every page has been scanned.
    pub async fn locate(&self) -> Result<Option<Value>> {
        let mut cursor = PageCursor::start(self.page_size);
        let mut page = 0u32;

        loop {
            page += 1;
            let url = page_url(&self.listing.url, &cursor)?;
            let doc = self.transport.get(&url).await?;
            let (items, next) = self.split_page(doc)?;
            debug!(
                "Listing {} page {}: {} item(s)",
                self.listing.url,
                page,
                items.len()
            );

            for item in items {
                match self.matcher.matches(&item) {
                    Some(true) => return Ok(Some(item)),
                    Some(false) => {}
                    None => debug!("Skipping listed item without {}", self.matcher.field),
                }
            }

            if !cursor.advance(next) {
                debug!(
                    "Listing {} exhausted after {} page(s)",
                    self.listing.url, page
                );
                return Ok(None);
            }
        }
    }

    /// Like [`locate`](Self::locate), but absence is an error.
    pub async fn locate_required(&self) -> Result<Value> {
        self.locate().await?.ok_or_else(|| {
            PollError::NotFound(format!(
                "no item in {} matching {:?}",
                self.listing.url, self.matcher.rule
            ))
        })
    }

    fn split_page(&self, mut doc: Value) -> Result<(Vec<Value>, Option<String>)> {
        let view = PageView::deserialize(&doc)
            .map_err(|e| PollError::Malformed(format!("listing page: {}", e)))?;
        let items = match doc
            .as_object_mut()
            .and_then(|obj| obj.remove(&self.listing.items_field))
        {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(items)) => items,
            // a lone nested object is a list of one
            Some(item @ Value::Object(_)) => vec![item],
            Some(other) => {
                return Err(PollError::Malformed(format!(
                    "expected list for {}, got {}",
                    self.listing.items_field, other
                )))
            }
        };
        Ok((items, view.next_page_token))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageView {
    next_page_token: Option<String>,
}

/// URL of the page `cursor` points at.
pub(crate) fn page_url(base: &str, cursor: &PageCursor) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| {
        PollError::transport(TransportError::InvalidRequest(format!("{}: {}", base, e)))
    })?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "pageSize" && k != "pageToken")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        pairs.append_pair("pageSize", &cursor.page_size.to_string());
        if let Some(token) = cursor.token() {
            pairs.append_pair("pageToken", token);
        }
    }
    Ok(url.to_string())
}
