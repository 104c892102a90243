//! Jira REST client (Server and Cloud)

use crate::core::{Cursor, JobRequest, Provider, SourceErrorKind, SourceFetchError};
use crate::credentials::{Credential, CredentialAuth};
use crate::providers::jira::models::{CommentPage, OptionsPage, SearchPage, TokenSearchPage, ValuesPage};
use crate::source::{
    PageRequest, RateLimitHeader, RawPage, SourceClient, SourceError, SourceFactory,
    SourceResource,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Which Jira deployment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JiraFlavor {
    /// Self-hosted Server / Data Center, REST v2, offset search
    Server,
    /// Atlassian Cloud, REST v3, token search
    Cloud,
}

impl JiraFlavor {
    pub fn for_provider(provider: Provider) -> Option<Self> {
        match provider {
            Provider::JiraServer => Some(JiraFlavor::Server),
            Provider::Jira => Some(JiraFlavor::Cloud),
            _ => None,
        }
    }

    fn api(&self) -> &'static str {
        match self {
            JiraFlavor::Server => "/rest/api/2",
            JiraFlavor::Cloud => "/rest/api/3",
        }
    }
}

pub struct JiraClient {
    client: Client,
    base_url: String,
    flavor: JiraFlavor,
    auth: CredentialAuth,
}

impl JiraClient {
    pub fn new(base_url: &str, flavor: JiraFlavor, auth: CredentialAuth) -> Result<Self, SourceFetchError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceFetchError::malformed(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            flavor,
            auth,
        })
    }

    pub fn flavor(&self) -> JiraFlavor {
        self.flavor
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.flavor.api(), path)
    }

    fn agile_url(&self, path: &str) -> String {
        format!("{}/rest/agile/1.0{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            CredentialAuth::Basic { username, token } => {
                request.basic_auth(username, Some(token.expose()))
            }
            CredentialAuth::Bearer { token } => request.bearer_auth(token.expose()),
            CredentialAuth::OAuth { access_token, .. } => request.bearer_auth(access_token.expose()),
        }
    }

    /// GET `url` and decode the body; 429 becomes [`SourceError::RateLimited`]
    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, SourceError> {
        debug!("GET {}", url);
        let response = self
            .authorized(self.client.get(url).query(query))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceFetchError::transient(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(RateLimitHeader::from_headers(
                response.headers(),
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} {}", status, body.chars().take(200).collect::<String>());
            return Err(SourceFetchError::from_status(status.as_u16(), message).into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceFetchError::malformed(format!("invalid response body: {}", e)).into())
    }

    fn paging(cursor: &Cursor, page_size: u32) -> Vec<(&'static str, String)> {
        vec![
            ("startAt", cursor.offset().to_string()),
            ("maxResults", page_size.to_string()),
        ]
    }

    async fn values_page(
        &self,
        url: &str,
        mut query: Vec<(&'static str, String)>,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, SourceError> {
        query.extend(Self::paging(cursor, page_size));
        let page: ValuesPage = self.get(url, &query).await?;
        let start = cursor.offset();
        let fetched = page.values.len() as u64;
        let has_more = match (page.is_last, page.total) {
            (Some(is_last), _) => !is_last && fetched > 0,
            (None, Some(total)) => start + fetched < total,
            (None, None) => fetched == u64::from(page_size),
        };
        Ok(offset_page(page.values, start, has_more, page.total))
    }

    /// Bare JSON arrays, paginated by `startAt` when the endpoint supports it
    async fn array_page(
        &self,
        url: &str,
        mut query: Vec<(&'static str, String)>,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, SourceError> {
        query.extend(Self::paging(cursor, page_size));
        let records: Vec<Value> = self.get(url, &query).await?;
        let has_more = records.len() as u64 == u64::from(page_size);
        Ok(offset_page(records, cursor.offset(), has_more, None))
    }

    async fn issues(&self, project_key: &str, cursor: &Cursor, page_size: u32) -> Result<RawPage, SourceError> {
        let jql = format!("project = \"{}\" ORDER BY created ASC", project_key);
        let mut query = vec![
            ("jql", jql),
            ("expand", "renderedFields".to_string()),
            ("fields", "*all".to_string()),
        ];

        match cursor {
            Cursor::Token { token } => {
                query.push(("maxResults", page_size.to_string()));
                if let Some(token) = token {
                    query.push(("nextPageToken", token.clone()));
                }
                let page: TokenSearchPage = self.get(&self.api_url("/search/jql"), &query).await?;
                let next = page
                    .next_page_token
                    .filter(|_| !page.is_last.unwrap_or(false));
                Ok(RawPage {
                    records: page.issues,
                    has_more: next.is_some(),
                    next_cursor: next.map(|token| Cursor::Token { token: Some(token) }),
                    total: None,
                })
            }
            _ => {
                query.extend(Self::paging(cursor, page_size));
                let page: SearchPage = self.get(&self.api_url("/search"), &query).await?;
                let fetched = page.issues.len() as u64;
                let has_more = fetched > 0 && page.start_at + fetched < page.total;
                Ok(offset_page(page.issues, page.start_at, has_more, Some(page.total)))
            }
        }
    }

    /// Options of one custom field
    ///
    /// Server lists them per field. Cloud keeps them per field context; the
    /// first context of the field is used.
    async fn field_options(
        &self,
        field_id: &str,
        project_id: &str,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, SourceError> {
        let numeric = field_id.strip_prefix("customfield_").unwrap_or(field_id);
        let mut page = match self.flavor {
            JiraFlavor::Server => {
                let mut query = vec![("projectIds", project_id.to_string())];
                query.extend(Self::paging(cursor, page_size));
                let url = self.api_url(&format!("/customFields/{}/options", numeric));
                let page: OptionsPage = self.get(&url, &query).await?;
                let start = cursor.offset();
                let fetched = page.options.len() as u64;
                let has_more = match page.total {
                    Some(total) => start + fetched < total,
                    None => fetched > 0 && fetched == u64::from(page_size),
                };
                offset_page(page.options, start, has_more, page.total)
            }
            JiraFlavor::Cloud => {
                let contexts: ValuesPage = self
                    .get(&self.api_url(&format!("/field/{}/context", field_id)), &[])
                    .await?;
                let context_id = contexts
                    .values
                    .first()
                    .and_then(|c| c.get("id"))
                    .and_then(|id| match id {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    });
                let Some(context_id) = context_id else {
                    debug!("Field {} has no context, no options to fetch", field_id);
                    return Ok(RawPage::last(Vec::new()));
                };
                let url = self.api_url(&format!("/field/{}/context/{}/option", field_id, context_id));
                self.values_page(&url, Vec::new(), cursor, page_size).await?
            }
        };
        tag_records(&mut page.records, "fieldId", numeric);
        Ok(page)
    }

    async fn comments(&self, issue_id: &str, cursor: &Cursor, page_size: u32) -> Result<RawPage, SourceError> {
        let mut query = vec![("expand", "renderedBody".to_string())];
        query.extend(Self::paging(cursor, page_size));
        let page: CommentPage = self
            .get(&self.api_url(&format!("/issue/{}/comment", issue_id)), &query)
            .await?;
        let fetched = page.comments.len() as u64;
        let has_more = fetched > 0 && page.start_at + fetched < page.total;
        let mut page = offset_page(page.comments, page.start_at, has_more, Some(page.total));
        tag_records(&mut page.records, "issueId", issue_id);
        Ok(page)
    }
}

/// Tag each record with the id of the resource it was fetched under
fn tag_records(records: &mut [Value], key: &str, value: &str) {
    for record in records.iter_mut() {
        if let Some(object) = record.as_object_mut() {
            object.insert(key.to_string(), json!(value));
        }
    }
}

fn offset_page(records: Vec<Value>, start_at: u64, has_more: bool, total: Option<u64>) -> RawPage {
    let next = start_at + records.len() as u64;
    RawPage {
        records,
        has_more,
        next_cursor: has_more.then_some(Cursor::Offset { start_at: next }),
        total,
    }
}

#[async_trait]
impl SourceClient for JiraClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, SourceError> {
        let cursor = &request.cursor;
        let size = request.page_size;

        match &request.resource {
            SourceResource::Users => {
                let (path, query) = match self.flavor {
                    JiraFlavor::Server => (
                        "/user/search",
                        vec![
                            ("username", ".".to_string()),
                            ("includeActive", "true".to_string()),
                            ("expand", "groups".to_string()),
                        ],
                    ),
                    JiraFlavor::Cloud => ("/users/search", Vec::new()),
                };
                self.array_page(&self.api_url(path), query, cursor, size).await
            }
            SourceResource::Labels => {
                let mut page = self.values_page(&self.api_url("/label"), Vec::new(), cursor, size).await?;
                // Labels come back as bare strings
                page.records = page
                    .records
                    .into_iter()
                    .filter(|v| v.is_string())
                    .collect();
                Ok(page)
            }
            SourceResource::IssueTypes { project_id } => match self.flavor {
                JiraFlavor::Server => {
                    let query = vec![("projectIds", project_id.clone())];
                    self.values_page(&self.api_url("/issuetype/page"), query, cursor, size)
                        .await
                }
                JiraFlavor::Cloud => {
                    let query = [("projectId", project_id.clone())];
                    let records: Vec<Value> = self.get(&self.api_url("/issuetype/project"), &query).await?;
                    Ok(RawPage::last(records))
                }
            },
            SourceResource::Components { project_key } => {
                let url = self.api_url(&format!("/project/{}/components", project_key));
                let records: Vec<Value> = self.get(&url, &[]).await?;
                Ok(RawPage::last(records))
            }
            SourceResource::Boards { project_key } => {
                let query = vec![("projectKeyOrId", project_key.clone())];
                self.values_page(&self.agile_url("/board"), query, cursor, size).await
            }
            SourceResource::Sprints { board_id } => {
                let url = self.agile_url(&format!("/board/{}/sprint", board_id));
                match self.values_page(&url, Vec::new(), cursor, size).await {
                    // Boards without sprint support answer 400
                    Err(SourceError::Fetch(e)) if e.kind == SourceErrorKind::Client(400) => {
                        warn!("Board {} does not support sprints, skipping", board_id);
                        Ok(RawPage::last(Vec::new()))
                    }
                    other => other,
                }
            }
            SourceResource::CustomFields => {
                let records: Vec<Value> = self.get(&self.api_url("/field"), &[]).await?;
                Ok(RawPage::last(records))
            }
            SourceResource::FieldOptions { field_id, project_id } => {
                self.field_options(field_id, project_id, cursor, size).await
            }
            SourceResource::Issues { project_key } => self.issues(project_key, cursor, size).await,
            SourceResource::IssueComments { issue_id } => self.comments(issue_id, cursor, size).await,
        }
    }
}

/// Creates [`JiraClient`]s for Jira Server and Jira Cloud jobs
#[derive(Debug, Clone, Copy, Default)]
pub struct JiraSourceFactory;

impl SourceFactory for JiraSourceFactory {
    fn create(
        &self,
        request: &JobRequest,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceClient>, SourceFetchError> {
        let flavor = JiraFlavor::for_provider(request.provider).ok_or_else(|| {
            SourceFetchError::malformed(format!("{} is not a Jira provider", request.provider))
        })?;
        let hostname = request
            .source
            .hostname
            .as_deref()
            .or(credential.hostname.as_deref())
            .ok_or_else(|| SourceFetchError::malformed("no Jira hostname configured"))?;

        Ok(Arc::new(JiraClient::new(hostname, flavor, credential.auth.clone())?))
    }
}
