use futures_util::{Stream, TryStreamExt, stream};
use reqwest::header::{AUTHORIZATION, HeaderMap, LINK};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::catalog::{Course, File, Folder, Module, ModuleItem};

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status} for {url}: {body}")]
    Api {
        status: StatusCode,
        url: Url,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    RateLimit,
    Transient,
    Permanent,
}

/// One page of a paginated listing together with the cursor to the next one.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Url>,
}

#[derive(Clone)]
pub struct CanvasClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CanvasClient {
    /// `base_url` is the API root, e.g. `https://canvas.example.edu/api/v1/`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, CanvasError> {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, CanvasError> {
        // Url::join drops the last segment unless the base ends with a slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_course(&self, course_id: u64) -> Result<Course, CanvasError> {
        let url = self.endpoint(&format!("courses/{course_id}"))?;
        self.get_json(url).await
    }

    /// Fetches a file record from the API url carried by a `File` module item.
    pub async fn get_file(&self, api_url: &str) -> Result<File, CanvasError> {
        let url = Url::parse(api_url)?;
        self.get_json(url).await
    }

    pub fn list_folders(
        &self,
        course_id: u64,
    ) -> Result<impl Stream<Item = Result<Folder, CanvasError>> + '_, CanvasError> {
        let url = self.listing(&format!("courses/{course_id}/folders"))?;
        Ok(self.paginate(url))
    }

    pub fn list_files(
        &self,
        course_id: u64,
    ) -> Result<impl Stream<Item = Result<File, CanvasError>> + '_, CanvasError> {
        let url = self.listing(&format!("courses/{course_id}/files"))?;
        Ok(self.paginate(url))
    }

    pub fn list_modules(
        &self,
        course_id: u64,
    ) -> Result<impl Stream<Item = Result<Module, CanvasError>> + '_, CanvasError> {
        let url = self.listing(&format!("courses/{course_id}/modules"))?;
        Ok(self.paginate(url))
    }

    pub fn list_module_items(
        &self,
        course_id: u64,
        module_id: u64,
    ) -> Result<impl Stream<Item = Result<ModuleItem, CanvasError>> + '_, CanvasError> {
        let url = self.listing(&format!("courses/{course_id}/modules/{module_id}/items"))?;
        Ok(self.paginate(url))
    }

    /// Lazily walks a paginated listing, yielding items in server order.
    /// Pages are requested one at a time, only once the previous page has been
    /// drained, and the walk stops at the first failing page.
    pub fn paginate<T>(&self, start: Url) -> impl Stream<Item = Result<T, CanvasError>> + '_
    where
        T: DeserializeOwned,
    {
        stream::try_unfold(Some(start), move |cursor| async move {
            let Some(url) = cursor else {
                return Ok::<_, CanvasError>(None);
            };
            let page = self.get_page::<T>(url).await?;
            Ok::<_, CanvasError>(Some((
                stream::iter(page.items.into_iter().map(Ok::<T, CanvasError>)),
                page.next,
            )))
        })
        .try_flatten()
    }

    pub async fn get_page<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, CanvasError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        let next = next_link(response.headers());
        let items = Self::handle_response(response).await?;
        Ok(Page { items, next })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CanvasError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CanvasError> {
        Ok(self.base_url.join(path)?)
    }

    fn listing(&self, path: &str) -> Result<Url, CanvasError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string());
        Ok(url)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CanvasError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let url = response.url().clone();
            let body = response.text().await.unwrap_or_default();
            Err(CanvasError::Api { status, url, body })
        }
    }
}

impl CanvasError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CanvasError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Extracts the `rel="next"` target from RFC 8288 `Link` headers.
/// Canvas sends every relation in one comma-separated header value.
fn next_link(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|entry| {
            let mut parts = entry.split(';');
            let target = parts.next()?.trim();
            let target = target.strip_prefix('<')?.strip_suffix('>')?;
            let is_next = parts.any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("rel=")
                    .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                    .unwrap_or(false)
            });
            if is_next { Url::parse(target).ok() } else { None }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with_link(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn finds_next_among_several_relations() {
        let headers = headers_with_link(
            "<https://c.example/api/v1/courses/1/files?page=1>; rel=\"current\",\
             <https://c.example/api/v1/courses/1/files?page=2>; rel=\"next\",\
             <https://c.example/api/v1/courses/1/files?page=1>; rel=\"first\"",
        );
        assert_eq!(
            next_link(&headers).unwrap().as_str(),
            "https://c.example/api/v1/courses/1/files?page=2"
        );
    }

    #[test]
    fn last_page_has_no_next() {
        let headers = headers_with_link(
            "<https://c.example/api/v1/courses/1/files?page=3>; rel=\"current\",\
             <https://c.example/api/v1/courses/1/files?page=1>; rel=\"first\"",
        );
        assert!(next_link(&headers).is_none());
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = CanvasClient::new("https://c.example/api/v1", "t").unwrap();
        assert_eq!(client.base_url().as_str(), "https://c.example/api/v1/");
        assert_eq!(
            client.listing("courses/5/files").unwrap().as_str(),
            "https://c.example/api/v1/courses/5/files?per_page=100"
        );
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::NotFound
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_REQUEST),
            ApiErrorClass::Permanent
        );
    }
}
