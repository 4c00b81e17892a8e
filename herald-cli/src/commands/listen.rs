use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use herald::sse::StreamedEvent;
use reqwest::header::ACCEPT;

/// Reassembles SSE frames from arbitrarily split body chunks
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    /// Feed one chunk, returning the data payload of every frame it completes.
    ///
    /// Frames without `data:` lines (keep-alive comments) yield nothing.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = frame_data(&String::from_utf8_lossy(&frame)) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub async fn execute(url: String) -> Result<()> {
    let response = reqwest::Client::new()
        .get(&url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .context("Failed to connect to stream endpoint")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
    }

    println!("{} {}", "Listening on".bold(), url);

    let mut parser = FrameParser::default();
    let mut body = response.bytes_stream();
    let mut connected = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Disconnected".yellow());
                return Ok(());
            }
            chunk = body.next() => {
                let Some(chunk) = chunk else {
                    println!("{}", "Stream closed by server".yellow());
                    return Ok(());
                };
                let chunk = chunk.context("Failed to read stream")?;

                for payload in parser.feed(&chunk) {
                    print_payload(&payload, &mut connected);
                }
            }
        }
    }
}

fn print_payload(payload: &str, connected: &mut bool) {
    let event = match serde_json::from_str::<StreamedEvent>(payload) {
        Ok(event) => event,
        Err(_) => {
            // undecodable events arrive as raw text
            println!("{} {}", "raw".dimmed(), payload);
            return;
        }
    };

    if !*connected && event.message.is_empty() {
        *connected = true;
        println!(
            "{} consumer {}",
            "✓ Connected as".green().bold(),
            event.consumer_id.to_string().bold()
        );
        return;
    }

    println!(
        "[{}] {} {}",
        event.event_id.to_string().dimmed(),
        format!("to {}", event.consumer_id).cyan(),
        event.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut parser = FrameParser::default();

        assert!(parser.feed(b"data: {\"event_id\":1,").is_empty());
        assert!(parser.feed(b"\"message\":\"hi\",\"consumer_id\":2}\n").is_empty());
        let payloads = parser.feed(b"\ndata: second\n\n");

        assert_eq!(
            payloads,
            vec![
                r#"{"event_id":1,"message":"hi","consumer_id":2}"#.to_string(),
                "second".to_string()
            ]
        );
        let event: StreamedEvent = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(event.consumer_id, 2);
    }

    #[test]
    fn test_keep_alive_comments_are_skipped() {
        let mut parser = FrameParser::default();
        assert!(parser.feed(b":\n\n").is_empty());
        assert_eq!(parser.feed(b"data: x\n\n"), vec!["x".to_string()]);
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut parser = FrameParser::default();
        assert_eq!(parser.feed(b"data: a\ndata: b\n\n"), vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut parser = FrameParser::default();
        let bytes = "data: é\n\n".as_bytes();
        assert!(parser.feed(&bytes[..7]).is_empty());
        assert_eq!(parser.feed(&bytes[7..]), vec!["é".to_string()]);
    }
}
