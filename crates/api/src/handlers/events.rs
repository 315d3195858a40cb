use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::{auth::Owner, error::ApiResult, routes::AppState};

/// 所有者的实时事件流
///
/// 先订阅再查询活跃任务，两者之间发生的更新不会丢失。
pub async fn stream_events(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = state.hub.subscribe(&owner);
    let active = state.manager.list_active(&owner).await?;
    debug!("所有者 {} 建立事件流，活跃任务 {} 个", owner, active.len());

    let stream = subscription
        .with_snapshot(active)
        .into_stream(state.heartbeat)
        .map(|envelope| {
            let kind = envelope.event.kind();
            let event = Event::default().event(kind).json_data(&envelope).unwrap_or_else(|e| {
                warn!("事件序列化失败: {}", e);
                Event::default().event(kind)
            });
            Ok(event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
