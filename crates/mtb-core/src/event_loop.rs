use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{ChatEvent, EventKind, Post},
    ports::{ChatPlatform, EventStream},
    router::MessageRouter,
    Result,
};

/// Consume `stream` until it ends, fails, or `shutdown` fires.
///
/// Events are handled one at a time, so replies go out in arrival order. Router
/// errors are logged and do not stop the loop. The stream is closed on every exit.
pub async fn run(
    stream: &mut dyn EventStream,
    router: &MessageRouter,
    platform: &dyn ChatPlatform,
    shutdown: &CancellationToken,
) -> Result<()> {
    info!("listening for events");

    let outcome = loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                break Ok(());
            }
            next = stream.next_event() => next,
        };

        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("event stream closed by server");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let Some(post) = dispatchable(router, &event) else {
            continue;
        };

        debug!(channel = %post.channel_id, post = %post.id, "dispatching post");
        if let Err(e) = router.handle_post(post, platform).await {
            error!(channel = %post.channel_id, post = %post.id, error = %e, "failed to answer post");
        }
    };

    if let Err(e) = stream.close().await {
        warn!(error = %e, "closing event stream failed");
    }
    outcome
}

/// The post carried by `event` when the router should see it.
fn dispatchable<'a>(router: &MessageRouter, event: &'a ChatEvent) -> Option<&'a Post> {
    if event.kind != EventKind::Posted {
        return None;
    }
    let post = event.post.as_ref()?;
    let channel = event.channel_id.as_ref().unwrap_or(&post.channel_id);

    if !router.watches(channel) || post.user_id == *router.bot_user() {
        return None;
    }
    Some(post)
}
