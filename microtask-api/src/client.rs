use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use microtask_core::{
    CalendarMonth, CompletionPage, CompletionReceipt, Task, TaskError, TaskId, TaskQuery,
    TaskSource,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;
use crate::wire::{
    CompleteRequest, CompletionData, CompletionsData, Envelope, ErrorBody, LoginData,
    LoginRequest, RandomTaskData,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3004/api";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user_info: Option<serde_json::Value>,
}

/// Task source backed by the Microtask REST service.
#[derive(Debug, Clone)]
pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskSource {
    /// `timeout` bounds every request, including completion reports.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, phone: &str, password: &str) -> Result<LoginSession, ApiError> {
        let req = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { phone, password });
        let data: LoginData = send(req, "login data").await?;

        Ok(LoginSession {
            token: data.token,
            refresh_token: data.refresh_token,
            user_info: data.user_info,
        })
    }

    pub async fn random_task(&self, query: &TaskQuery) -> Result<Task, ApiError> {
        let req = self
            .authed(self.client.get(self.url("/tasks/random")))?
            .query(&random_task_params(query));
        let data: RandomTaskData = send(req, "task").await?;
        Ok(data.task.into())
    }

    pub async fn complete(
        &self,
        task_id: TaskId,
        time_spent_seconds: u64,
    ) -> Result<CompletionReceipt, ApiError> {
        let body = CompleteRequest {
            task_id,
            time_spent: time_spent_seconds,
            completed_at: Utc::now(),
        };
        let req = self
            .authed(self.client.post(self.url("/tasks/complete")))?
            .json(&body);
        let data: CompletionData = send(req, "completion").await?;
        Ok(data.into())
    }

    pub async fn calendar(&self, year: i32, month: u32) -> Result<CalendarMonth, ApiError> {
        let req = self
            .authed(self.client.get(self.url("/calendar")))?
            .query(&[("year", year.to_string()), ("month", month.to_string())]);
        send(req, "calendar").await
    }

    pub async fn completions(&self, page: u32, limit: u32) -> Result<CompletionPage, ApiError> {
        let req = self
            .authed(self.client.get(self.url("/tasks/completions")))?
            .query(&[("page", page.to_string()), ("limit", limit.to_string())]);
        let data: CompletionsData = send(req, "completions").await?;

        Ok(CompletionPage {
            completions: data.completions.into_iter().map(Into::into).collect(),
            stats: data.stats.map(Into::into),
            pagination: data.pagination,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::Unauthenticated)?;
        Ok(req.header(AUTHORIZATION, format!("Bearer {token}")))
    }
}

/// Query string for `GET /tasks/random`.
pub fn random_task_params(query: &TaskQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("isNightTask", query.night.to_string())];
    if !query.exclude_ids.is_empty() {
        let ids: Vec<String> = query.exclude_ids.iter().map(ToString::to_string).collect();
        params.push(("excludeIds", ids.join(",")));
    }
    params
}

async fn send<T: DeserializeOwned>(req: RequestBuilder, what: &'static str) -> Result<T, ApiError> {
    let resp = req.send().await?;
    let status = resp.status();
    debug!(%status, url = %resp.url(), "response");

    if !status.is_success() {
        return Err(status_error(resp).await);
    }

    let envelope: Envelope<T> = resp.json().await?;
    envelope.into_data(what)
}

async fn status_error(resp: Response) -> ApiError {
    let status = resp.status().as_u16();
    let txt = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&txt) {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => txt,
    };
    ApiError::Status { status, message }
}

#[async_trait(?Send)]
impl TaskSource for HttpTaskSource {
    async fn fetch_random_task(&self, query: &TaskQuery) -> Result<Task, TaskError> {
        Ok(self.random_task(query).await?)
    }

    async fn report_completion(
        &self,
        task_id: TaskId,
        time_spent_seconds: u64,
    ) -> Result<CompletionReceipt, TaskError> {
        Ok(self.complete(task_id, time_spent_seconds).await?)
    }

    async fn fetch_calendar(&self, year: i32, month: u32) -> Result<CalendarMonth, TaskError> {
        Ok(self.calendar(year, month).await?)
    }

    async fn fetch_completion_history(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<CompletionPage, TaskError> {
        Ok(self.completions(page, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_task_params_join_excluded_ids() {
        let q = TaskQuery {
            exclude_ids: vec![3, 9, 12],
            night: true,
        };
        assert_eq!(
            random_task_params(&q),
            vec![("isNightTask", "true".to_string()), ("excludeIds", "3,9,12".to_string())]
        );

        let q = TaskQuery::default();
        assert_eq!(random_task_params(&q), vec![("isNightTask", "false".to_string())]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let src = HttpTaskSource::new("http://example.test/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(src.base_url(), "http://example.test/api");
        assert_eq!(src.url("/calendar"), "http://example.test/api/calendar");
    }

    #[tokio::test]
    async fn requests_without_token_fail_before_sending() {
        let src = HttpTaskSource::new(DEFAULT_BASE_URL, Duration::from_secs(1)).unwrap();
        let err = src.random_task(&TaskQuery::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));

        let err: TaskError = src.fetch_calendar(2026, 3).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
