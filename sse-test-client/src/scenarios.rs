use crate::output::{print_chat, print_ok, print_step, TestResult};
use crate::sse_client::Connection;
use anyhow::Result;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct SessionStats {
    broadcaster: String,
    subscribers: usize,
}

/// The key the relay is expected to use for `raw`.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('@')
        .unwrap_or(trimmed)
        .to_lowercase()
}

async fn expect_confirmation(connection: &mut Connection, key: &str, timeout: Duration) -> Result<()> {
    let frame = connection
        .wait_for_frame("confirmation frame", timeout, |frame| frame.is_confirmation())
        .await?;
    if frame.user() != key {
        anyhow::bail!(
            "{} was confirmed for {:?}, expected {:?}",
            connection.label,
            frame.user(),
            key
        );
    }
    print_ok(&format!("{} confirmed for @{}", connection.label, key));
    Ok(())
}

/// One subscriber receives the confirmation frame for the normalized key.
pub async fn test_connection(base_url: &str, broadcaster: &str, timeout: Duration) -> Result<TestResult> {
    let name = "connection";
    let started = Instant::now();
    let key = normalize(broadcaster);

    print_step(&format!("Subscribing to {broadcaster}"));
    let mut connection = Connection::establish(base_url, broadcaster, "Subscriber".to_string()).await?;

    Ok(match expect_confirmation(&mut connection, &key, timeout).await {
        Ok(()) => TestResult::pass(name, started.elapsed()),
        Err(e) => TestResult::fail(name, started.elapsed(), e.to_string()),
    })
}

/// `@Name` and `name` share one pool entry.
pub async fn test_alias(
    http: &reqwest::Client,
    base_url: &str,
    broadcaster: &str,
    timeout: Duration,
) -> Result<TestResult> {
    let name = "alias";
    let started = Instant::now();
    let key = normalize(broadcaster);
    let handle = format!("@{}", key.to_uppercase());

    print_step(&format!("Subscribing to {handle} and {key}"));
    let mut by_handle = Connection::establish(base_url, &handle, "Handle".to_string()).await?;
    let mut by_key = Connection::establish(base_url, &key, "Key".to_string()).await?;

    for connection in [&mut by_handle, &mut by_key] {
        if let Err(e) = expect_confirmation(connection, &key, timeout).await {
            return Ok(TestResult::fail(name, started.elapsed(), e.to_string()));
        }
    }

    let stats: Vec<SessionStats> = http
        .get(format!("{}/stats", base_url.trim_end_matches('/')))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let entries: Vec<_> = stats.iter().filter(|s| s.broadcaster == key).collect();
    Ok(match entries.as_slice() {
        [entry] if entry.subscribers >= 2 => {
            print_ok(&format!("@{} has one pool entry with {} subscribers", key, entry.subscribers));
            TestResult::pass(name, started.elapsed())
        }
        [entry] => TestResult::fail(
            name,
            started.elapsed(),
            format!("expected at least 2 subscribers on @{}, found {}", key, entry.subscribers),
        ),
        _ => TestResult::fail(
            name,
            started.elapsed(),
            format!("expected exactly one pool entry for @{}, found {}", key, entries.len()),
        ),
    })
}

/// Two subscribers receive the same chat message. Needs a live broadcaster.
pub async fn test_fan_out(base_url: &str, broadcaster: &str, timeout: Duration) -> Result<TestResult> {
    let name = "fan-out";
    let started = Instant::now();
    let key = normalize(broadcaster);

    let mut first = Connection::establish(base_url, broadcaster, "Subscriber 1".to_string()).await?;
    let mut second = Connection::establish(base_url, broadcaster, "Subscriber 2".to_string()).await?;
    for connection in [&mut first, &mut second] {
        if let Err(e) = expect_confirmation(connection, &key, timeout).await {
            return Ok(TestResult::fail(name, started.elapsed(), e.to_string()));
        }
    }

    print_step(&format!("Waiting up to {timeout:?} for a chat message on @{key}"));
    let chat = match first.wait_for_frame("chat message", timeout, |f| f.is_chat()).await {
        Ok(chat) => chat,
        Err(e) => return Ok(TestResult::fail(name, started.elapsed(), e.to_string())),
    };
    let copy = match second
        .wait_for_frame("the same chat message", timeout, |f| f.data == chat.data)
        .await
    {
        Ok(copy) => copy,
        Err(e) => return Ok(TestResult::fail(name, started.elapsed(), e.to_string())),
    };

    let skew = copy
        .received_at
        .saturating_duration_since(chat.received_at);
    print_ok(&format!("Both subscribers got {:?} from {} ({:?} apart)", chat.data["message"], chat.user(), skew));
    Ok(TestResult::pass(name, started.elapsed()))
}

/// Prints chat messages until Ctrl+C or the stream ends.
pub async fn watch(base_url: &str, broadcaster: &str) -> Result<()> {
    let mut connection = Connection::establish(base_url, broadcaster, normalize(broadcaster)).await?;
    let label = connection.label.clone();
    print_step(&format!("Watching {broadcaster}, press Ctrl+C to stop"));

    loop {
        tokio::select! {
            frame = connection.next_frame() => match frame {
                Some(frame) if frame.is_confirmation() => print_ok(&format!("Confirmed for @{}", frame.user())),
                Some(frame) => print_chat(
                    &label,
                    frame.user(),
                    frame.data["message"].as_str().unwrap_or_default(),
                ),
                None => {
                    print_step("Stream closed by the relay");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
