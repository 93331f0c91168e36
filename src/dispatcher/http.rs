// src/dispatcher/http.rs

use std::time::Duration;

use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::config::model::DispatcherSection;
use crate::errors::{PilotError, Result};
use crate::job::JobDefinition;
use crate::job::definition::decode_response_body;

use super::{Dispatcher, Params, StatusReply, UpdateReply};

/// Pause between two attempts of the same request.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Dispatcher reached over HTTPS with form-encoded POSTs.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    base_url: Url,
    attempts: u32,
}

impl HttpDispatcher {
    pub fn new(config: &DispatcherSection) -> Result<Self> {
        let mut base_url = Url::parse(&config.url).map_err(|e| {
            PilotError::ConfigError(format!("invalid dispatcher url '{}': {e}", config.url))
        })?;
        if base_url.port().is_none() {
            base_url.set_port(Some(config.port)).map_err(|_| {
                PilotError::ConfigError(format!("dispatcher url '{}' cannot take a port", config.url))
            })?;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("jobpilot/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            attempts: config.attempts.max(1),
        })
    }

    fn endpoint(&self, op: &str) -> Result<Url> {
        self.base_url
            .join(&format!("/server/panda/{op}"))
            .map_err(|e| PilotError::ConfigError(format!("cannot build url for {op}: {e}")))
    }

    /// POST `params` to `op`, retrying transport failures up to the
    /// configured number of attempts.
    async fn post(&self, op: &str, params: &Params) -> Result<JobDefinition> {
        let url = self.endpoint(op)?;
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            debug!(%url, attempt, "sending dispatcher request");
            match self.post_once(url.clone(), params).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(op, attempt, attempts = self.attempts, error = %e, "dispatcher request failed");
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PilotError::Dispatcher(format!("{op}: no attempt made"))))
    }

    async fn post_once(&self, url: Url, params: &Params) -> Result<JobDefinition> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PilotError::Dispatcher(format!("HTTP {status}: {body}")));
        }
        decode_response_body(&body)
    }
}

impl Dispatcher for HttpDispatcher {
    fn get_job(&self, params: Params) -> BoxFuture<'_, Result<JobDefinition>> {
        Box::pin(async move { self.post("getJob", &params).await })
    }

    fn update_job(&self, params: Params) -> BoxFuture<'_, Result<UpdateReply>> {
        Box::pin(async move {
            let reply = self.post("updateJob", &params).await?;
            Ok(UpdateReply::from_map(&reply))
        })
    }

    fn get_status<'a>(&'a self, jobid: &'a str) -> BoxFuture<'a, Result<StatusReply>> {
        Box::pin(async move {
            let params = vec![("ids".to_string(), jobid.to_string())];
            let reply = self.post("getStatus", &params).await?;
            Ok(StatusReply::from_map(&reply))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_added_when_missing() {
        let config = DispatcherSection {
            url: "https://dispatcher.example.org".to_string(),
            port: 25443,
            ..DispatcherSection::default()
        };
        let dispatcher = HttpDispatcher::new(&config).unwrap();
        let url = dispatcher.endpoint("getJob").unwrap();
        assert_eq!(url.as_str(), "https://dispatcher.example.org:25443/server/panda/getJob");
    }

    #[test]
    fn explicit_port_wins() {
        let config = DispatcherSection {
            url: "http://localhost:8080".to_string(),
            ..DispatcherSection::default()
        };
        let dispatcher = HttpDispatcher::new(&config).unwrap();
        assert_eq!(dispatcher.endpoint("getStatus").unwrap().port(), Some(8080));
    }
}
