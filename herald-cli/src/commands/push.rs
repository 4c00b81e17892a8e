use anyhow::{Context, Result};
use colored::Colorize;
use herald::error::ErrorResponse;
use reqwest::StatusCode;

pub async fn execute(message: String, consumer: Option<u64>, url: String) -> Result<()> {
    let client = reqwest::Client::builder()
        // publish only answers once every matching consumer has taken the event
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let form = push_form(message, consumer);
    let response = client
        .post(&url)
        .form(&form)
        .send()
        .await
        .context("Failed to send request")?;

    let status = response.status();
    if status.is_success() {
        let target = match consumer {
            Some(id) => format!("consumer {}", id),
            None => "all consumers".to_string(),
        };
        println!("{} published to {}", "✓".green().bold(), target);
        return Ok(());
    }

    let body = response
        .text()
        .await
        .context("Failed to read response body")?;
    let reason = serde_json::from_str::<ErrorResponse>(&body)
        .map(|error| error.message)
        .unwrap_or(body);

    if status == StatusCode::BAD_REQUEST {
        anyhow::bail!("rejected by server: {}", reason);
    }
    anyhow::bail!("HTTP {}: {}", status.as_u16(), reason)
}

fn push_form(message: String, consumer: Option<u64>) -> Vec<(&'static str, String)> {
    let mut form = vec![("message", message)];
    if let Some(id) = consumer {
        form.push(("consumer_id", id.to_string()));
    }
    form
}
