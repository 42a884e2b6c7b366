use crate::error::Result;
use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::header::{HeaderName, CONNECTION};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use log::*;
use service::AppState;
use std::convert::Infallible;

/// SSE handler that attaches the caller to a broadcaster's chat feed.
/// The stream starts with the confirmation frame and stays open until the
/// client goes away or the relay shuts down.
pub(crate) async fn sse_handler(
    Path(broadcaster): Path<String>,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse> {
    let mut subscription = app_state.sse_manager.subscribe(&broadcaster).await?;
    let key = subscription.key().clone();
    debug!(
        "Establishing SSE connection {} for @{}",
        subscription.subscriber_id().as_str(),
        key
    );

    // Dropping the subscription with the stream detaches the subscriber
    let stream = stream! {
        while let Some(event) = subscription.recv().await {
            if let Some(event) = event.to_sse_event() {
                yield Ok::<_, Infallible>(event);
            }
        }
        debug!("SSE stream for @{} closed by the relay", key);
    };

    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(app_state.config.keep_alive()));

    Ok((
        [
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    ))
}
