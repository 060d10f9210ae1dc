//! Client for a running plot-storage service.

use anyhow::{Context, bail};

use crate::domain::plot_model::UploadPlotInput;
use crate::domain::task::Task;
use crate::error::ErrorResponse;

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/api/v1{path}", base_url.trim_end_matches('/'))
}

async fn rejection(response: reqwest::Response, what: &str) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => anyhow::anyhow!("{what} rejected with code {}: {}", err.code, err.msg),
        Err(_) => anyhow::anyhow!("{what} rejected with status {status}"),
    }
}

/// Submits a plot for transfer. Succeeds once the service has recorded the task.
pub async fn upload_plot(
    client: &reqwest::Client,
    base_url: &str,
    input: &UploadPlotInput,
) -> anyhow::Result<()> {
    let response = client
        .post(endpoint(base_url, "/plot/upload"))
        .json(input)
        .send()
        .await
        .with_context(|| format!("failed to submit {}", input.plot_url))?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(rejection(response, &format!("upload of {}", input.plot_url)).await);
    }
    Ok(())
}

pub async fn plot_status(
    client: &reqwest::Client,
    base_url: &str,
    plot_url: &str,
) -> anyhow::Result<Task> {
    let response = client
        .get(endpoint(base_url, "/plot/status"))
        .query(&[("plot_url", plot_url)])
        .send()
        .await
        .with_context(|| format!("failed to query {plot_url}"))?;
    if !response.status().is_success() {
        return Err(rejection(response, &format!("status query for {plot_url}")).await);
    }
    match response.json::<Task>().await {
        Ok(task) => Ok(task),
        Err(err) => bail!("malformed status for {plot_url}: {err}"),
    }
}
