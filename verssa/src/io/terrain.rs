//! Blocking HTTP client for the Terrain analysis API.
//!
//! A bearer token is obtained once in [`TerrainClient::connect`] and held for
//! the process lifetime; there is no refresh.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::io::config::TerrainConfig;
use crate::io::jobs::{AppTemplate, JobClient, SubmitRequest, Submission};

/// The remote session could not be established.
#[derive(Debug, Error)]
#[error("establish terrain session: {reason}")]
pub struct SessionError {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AppListing {
    apps: Vec<AppSummary>,
}

#[derive(Debug, Deserialize)]
struct AppSummary {
    id: String,
    system_id: String,
}

#[derive(Debug, Deserialize)]
struct AppDetail {
    groups: Vec<ParameterGroup>,
}

#[derive(Debug, Deserialize)]
struct ParameterGroup {
    parameters: Vec<Parameter>,
}

#[derive(Debug, Deserialize)]
struct Parameter {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisHistory {
    steps: Vec<HistoryStep>,
}

#[derive(Debug, Deserialize)]
struct HistoryStep {
    status: String,
}

#[derive(Clone)]
pub struct TerrainClient {
    http: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for TerrainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TerrainClient {
    /// Exchange the configured credentials for a bearer token.
    ///
    /// Every failure is reported as a [`SessionError`].
    #[instrument(skip_all, fields(base_url = %cfg.base_url))]
    pub fn connect(cfg: &TerrainConfig) -> Result<Self> {
        Self::connect_inner(cfg).map_err(|err| {
            anyhow::Error::new(SessionError {
                reason: format!("{err:#}"),
            })
        })
    }

    fn connect_inner(cfg: &TerrainConfig) -> Result<Self> {
        if cfg.username.is_empty() || cfg.password.is_empty() {
            bail!("terrain credentials are not configured");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("verssa/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        let base_url = cfg.base_url.trim_end_matches('/').to_string();

        let token: TokenResponse = http
            .get(format!("{base_url}/token"))
            .basic_auth(&cfg.username, Some(&cfg.password))
            .send()
            .context("request token")?
            .error_for_status()
            .context("token exchange rejected")?
            .json()
            .context("parse token response")?;
        info!(user = %cfg.username, "terrain session established");

        Ok(Self {
            http,
            base_url,
            token: token.access_token,
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .with_context(|| format!("parse response from {url}"))
    }
}

impl JobClient for TerrainClient {
    #[instrument(skip(self))]
    fn find_application(&self, search: &str) -> Result<AppTemplate> {
        let listing: AppListing =
            self.get_json(&format!("{}/apps", self.base_url), &[("search", search)])?;
        let summary = listing
            .apps
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no app matches {search:?}"))?;
        debug!(system_id = %summary.system_id, app_id = %summary.id, "app resolved");

        let detail: AppDetail = self.get_json(
            &format!("{}/apps/{}/{}", self.base_url, summary.system_id, summary.id),
            &[],
        )?;
        let parameter_id = first_parameter_id(detail)
            .ok_or_else(|| anyhow!("app {} declares no input parameter", summary.id))?;
        debug!(parameter_id = %parameter_id, "input parameter resolved");

        Ok(AppTemplate {
            system_id: summary.system_id,
            app_id: summary.id,
            parameter_id,
        })
    }

    #[instrument(skip_all, fields(input = %request.input_path))]
    fn submit(&self, request: &SubmitRequest) -> Result<Submission> {
        let url = format!("{}/analyses", self.base_url);
        let response: AnalysisResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&submission_body(request))
            .send()
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?
            .json()
            .with_context(|| format!("parse response from {url}"))?;
        Ok(Submission {
            job_id: response.id,
            status: response.status,
        })
    }

    fn job_status(&self, job_id: &str) -> Result<String> {
        let history: AnalysisHistory = self.get_json(
            &format!("{}/analyses/{}/history", self.base_url, job_id),
            &[],
        )?;
        history
            .steps
            .into_iter()
            .next()
            .map(|step| step.status)
            .ok_or_else(|| anyhow!("analysis {job_id} has no history steps"))
    }
}

fn first_parameter_id(detail: AppDetail) -> Option<String> {
    detail
        .groups
        .into_iter()
        .next()?
        .parameters
        .into_iter()
        .next()
        .map(|parameter| parameter.id)
}

/// JSON payload for `POST /analyses`.
fn submission_body(request: &SubmitRequest) -> Value {
    let mut config = serde_json::Map::new();
    config.insert(
        request.parameter_id.clone(),
        Value::String(request.input_path.clone()),
    );
    json!({
        "config": config,
        "name": request.name,
        "app_id": request.app_id,
        "system_id": request.system_id,
        "debug": request.debug,
        "output_dir": request.output_dir,
        "notify": request.notify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_body_embeds_input_under_parameter_id() {
        let request = SubmitRequest {
            name: "QuaternionClassifierAutomation".to_string(),
            system_id: "de".to_string(),
            app_id: "app-1".to_string(),
            parameter_id: "step_param".to_string(),
            input_path: "/zone/in/sample.qmg".to_string(),
            output_dir: "/zone/analyses".to_string(),
            notify: true,
            debug: false,
        };
        let body = submission_body(&request);
        assert_eq!(body["config"]["step_param"], "/zone/in/sample.qmg");
        assert_eq!(body["name"], "QuaternionClassifierAutomation");
        assert_eq!(body["system_id"], "de");
        assert_eq!(body["notify"], true);
        assert_eq!(body["debug"], false);
    }

    #[test]
    fn first_parameter_comes_from_first_group() {
        let detail: AppDetail = serde_json::from_str(
            r#"{"groups": [{"parameters": [{"id": "p1"}, {"id": "p2"}]}, {"parameters": [{"id": "p3"}]}]}"#,
        )
        .expect("parse");
        assert_eq!(first_parameter_id(detail).as_deref(), Some("p1"));

        let empty: AppDetail = serde_json::from_str(r#"{"groups": []}"#).expect("parse");
        assert_eq!(first_parameter_id(empty), None);
    }

    #[test]
    fn missing_credentials_are_a_session_error() {
        let err = TerrainClient::connect(&TerrainConfig::default()).unwrap_err();
        let session = err.downcast_ref::<SessionError>().expect("session error");
        assert!(session.reason.contains("credentials"));
    }
}
