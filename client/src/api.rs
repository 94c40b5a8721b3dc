use anyhow::{Context, Result, anyhow};
use common::{CreateTeam, CreateTeamError, Stop, Team};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::ClientConfig;

/// The game server's HTTP endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub async fn teams(&self) -> Result<Vec<Team>> {
        self.get_json(self.config.teams_url()?).await
    }

    pub async fn stops(&self) -> Result<Vec<Stop>> {
        self.get_json(self.config.stops_url()?).await
    }

    /// Create a team. Name problems the server reports come back as the inner `Err`.
    pub async fn create_team(&self, team: &CreateTeam) -> Result<Result<Team, CreateTeamError>> {
        let url = self.config.create_team_url()?;
        debug!("POST {} {:?}", url, team);
        let response = self
            .http
            .post(url.clone())
            .json(team)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))?;
        parse_create_team(&body).with_context(|| format!("Unexpected create-team response ({status})"))
    }

    /// Whether the server answers at all.
    pub async fn ping(&self) -> bool {
        let url = match self.config.ping_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build ping URL: {:#}", e);
                return false;
            }
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ping failed: {}", e);
                false
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        self.http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?
            .error_for_status()
            .with_context(|| format!("Request to {} failed", url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

fn parse_create_team(body: &str) -> Result<Result<Team, CreateTeamError>> {
    if let Ok(team) = serde_json::from_str::<Team>(body) {
        info!("Created team {} ({})", team.name, team.id);
        return Ok(Ok(team));
    }
    if let Ok(error) = serde_json::from_str::<CreateTeamError>(body) {
        return Ok(Err(error));
    }
    Err(anyhow!("neither a team nor an error: {}", body))
}
