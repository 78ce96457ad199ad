//! Blueprint listings, tags and search

use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tera::Context as TeraContext;

use crate::models::{BlueprintCard, BlueprintType, PagedResult};
use crate::services::blueprint::SearchQuery;
use crate::web::common::{search_ue_version_options, type_options, PageQuery};
use crate::web::middleware::AppState;
use crate::web::responses::{PageError, View};

fn list_context(heading: &str, page: &PagedResult<BlueprintCard>) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("heading", heading);
    context.insert("page", page);
    context.insert("total_pages", &page.total_pages());
    context.insert("pager_query", "");
    context
}

/// GET /last-blueprints/
pub async fn last_blueprints(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    view: View,
) -> Result<Response, PageError> {
    let page = state.services.blueprints.list_last(&query.params()).await?;
    view.render("list.html", &list_context("Last blueprints", &page))
}

/// GET /most-discussed-blueprints/
pub async fn most_discussed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    view: View,
) -> Result<Response, PageError> {
    let page = state.services.blueprints.list_most_discussed(&query.params()).await?;
    view.render("list.html", &list_context("Most discussed blueprints", &page))
}

/// GET /type/{type}/
pub async fn by_type(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<PageQuery>,
    view: View,
) -> Result<Response, PageError> {
    let kind = BlueprintType::from_str(&kind).map_err(|_| PageError::NotFound)?;
    let page = state.services.blueprints.list_by_type(kind, &query.params()).await?;
    let heading = format!("{} blueprints", kind.label());
    view.render("list.html", &list_context(&heading, &page))
}

/// GET /tag/{slug}/
pub async fn by_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
    view: View,
) -> Result<Response, PageError> {
    let tag = state.services.tags.get_by_slug(&slug).await?;
    let page = state.services.blueprints.list_by_tag(&tag, &query.params()).await?;
    let heading = format!("Tag: {}", tag.name);
    view.render("list.html", &list_context(&heading, &page))
}

/// GET /tags/
pub async fn tags(State(state): State<AppState>, view: View) -> Result<Response, PageError> {
    let groups = state.services.tags.list_grouped().await?;
    let mut context = TeraContext::new();
    context.insert("groups", &groups);
    view.render("tags.html", &context)
}

/// `/search/` query string, echoed back into the form
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ue_version: String,
    #[serde(default = "first_page", skip_serializing)]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

impl SearchForm {
    fn to_query(&self) -> SearchQuery {
        SearchQuery {
            query: self.query.trim().to_string(),
            kind: BlueprintType::from_str(&self.kind).ok(),
            ue_version: Some(self.ue_version.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        }
    }

    /// Query string prefix for pager links, ends with `&` when non-empty
    fn pager_query(&self) -> String {
        let mut query = String::new();
        for (name, value) in [("query", &self.query), ("type", &self.kind), ("ue_version", &self.ue_version)] {
            if !value.is_empty() {
                query.push_str(&format!("{}={}&", name, urlencoding::encode(value)));
            }
        }
        query
    }
}

/// GET /search/
pub async fn search(
    State(state): State<AppState>,
    Query(form): Query<SearchForm>,
    view: View,
) -> Result<Response, PageError> {
    let params = PageQuery { page: form.page }.params();
    let page = state.services.blueprints.search(&form.to_query(), &params).await?;

    let mut context = list_context("Search", &page);
    context.insert("search", &form);
    context.insert("types", &type_options());
    context.insert("ue_versions", &search_ue_version_options(&state.config));
    context.insert("pager_query", &form.pager_query());
    view.render("list.html", &context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_form_to_query() {
        let form = SearchForm {
            query: "  tick ".to_string(),
            kind: "behavior-tree".to_string(),
            ue_version: String::new(),
            page: 1,
        };
        let query = form.to_query();
        assert_eq!(query.query, "tick");
        assert_eq!(query.kind, Some(BlueprintType::BehaviorTree));
        assert_eq!(query.ue_version, None);
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let form = SearchForm {
            kind: "spaceship".to_string(),
            ..Default::default()
        };
        assert!(form.to_query().kind.is_none());
    }

    #[test]
    fn test_pager_query_encodes_values() {
        let form = SearchForm {
            query: "on tick".to_string(),
            ue_version: "5.4".to_string(),
            ..Default::default()
        };
        assert_eq!(form.pager_query(), "query=on%20tick&ue_version=5.4&");
    }
}
