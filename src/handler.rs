//! The inference handler: URL in, label out.
//!
//! A request runs fetch → decode → preprocess → invoke → argmax to
//! completion and either yields a `Prediction` or stops at the first failing
//! stage. Only the fetch is ever retried (see `HttpFetcher`); decoding and
//! invocation are deterministic.

use crate::config::Settings;
use crate::error::{PredictError, Stage};
use crate::fetch::{Fetcher, HttpFetcher, ImageSource};
use crate::manager::Manager;
use crate::prediction::Prediction;
use crate::preprocess::Preprocessor;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct InferenceHandler {
    fetcher: Arc<dyn Fetcher>,
    preprocessor: Preprocessor,
    manager: Arc<Manager>,
    timeout: Duration,
    softmax: bool,
}

impl InferenceHandler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        preprocessor: Preprocessor,
        manager: Arc<Manager>,
        timeout: Duration,
    ) -> Self {
        InferenceHandler {
            fetcher,
            preprocessor,
            manager,
            timeout,
            softmax: true,
        }
    }

    /// Report raw model scores instead of probabilities
    pub fn with_softmax(mut self, softmax: bool) -> Self {
        self.softmax = softmax;
        self
    }

    /// Build the production handler: HTTP fetching and a pool of
    /// TorchScript workers
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&settings.fetch)?);
        let manager = Arc::new(Manager::load(settings)?);
        Ok(Self::new(
            fetcher,
            Preprocessor::new(&settings.preprocess),
            manager,
            settings.fetch.timeout(),
        )
        .with_softmax(settings.model.softmax))
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Classify the image at `url`
    pub async fn predict(&self, url: &str) -> Result<Prediction, PredictError> {
        self.predict_with_timeout(url, None).await
    }

    /// Classify the image at `url`, bounding the fetch by `timeout` instead
    /// of the configured default
    #[tracing::instrument(skip(self, url), fields(url = %truncate(url)))]
    pub async fn predict_with_timeout(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Prediction, PredictError> {
        let result = self.run(url, timeout.unwrap_or(self.timeout)).await;
        match &result {
            Ok(prediction) => info!("predicted {}", prediction.label),
            Err(e) => warn!("request failed while {}: {e}", e.stage()),
        }
        result
    }

    async fn run(&self, url: &str, timeout: Duration) -> Result<Prediction, PredictError> {
        debug!("stage {}", Stage::Fetching);
        let source = ImageSource::parse(url)?;
        let bytes = self.fetcher.fetch(&source, timeout).await?;

        debug!("stage {} ({} bytes)", Stage::Decoding, bytes.len());
        let preprocessor = self.preprocessor.clone();
        let input = tokio::task::spawn_blocking(move || {
            let image = preprocessor.decode(&bytes)?;
            debug!("stage {}", Stage::Preprocessing);
            preprocessor.to_tensor(&image)
        })
        .await
        .map_err(|e| PredictError::Decode(format!("preprocessing task failed: {e}")))??;

        debug!("stage {} with input {:?}", Stage::Invoking, input.shape);
        let output = self.manager.run_inference(input).await?;

        let prediction = Prediction::from_output(&output, self.softmax)?;
        debug!("stage {}", Stage::Done);
        Ok(prediction)
    }
}

/// Keep data URLs from flooding the logs
fn truncate(url: &str) -> &str {
    match url.char_indices().nth(120) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
