//! HTTP request adapter.
//!
//! - `GET /?red=..&green=..&blue=..` or `GET /?color=r,g,b` renders an HTML page
//! - `POST /` takes a JSON object, a JSON string or raw `r,g,b` text and
//!   answers with a JSON status payload
//! - `GET /status` reports the link state and dispatch counters
//!
//! A failed send maps to `502 Bad Gateway`; input without a recognised
//! color is not an error and is answered with `200` and nothing sent.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use log::{debug, info};
use serde_json::json;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

use crate::color::{parse, RangePolicy, RawInput};
use crate::dispatch::DispatcherHandle;
use crate::logutil::escape_log;

mod page;

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Clone)]
struct WebState {
    dispatcher: DispatcherHandle,
    policy: RangePolicy,
}

/// All routes of the adapter, ready for `warp::serve` or `warp::test`.
pub fn routes(
    dispatcher: DispatcherHandle,
    policy: RangePolicy,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = WebState { dispatcher, policy };
    let with_state = warp::any().map(move || state.clone());

    let status = warp::get()
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(with_state.clone())
        .and_then(handle_status);

    let page = warp::get()
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state.clone())
        .and_then(handle_get);

    let post = warp::post()
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state)
        .and_then(handle_post);

    status.or(page).unify().or(post).unify()
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    addr: SocketAddr,
    dispatcher: DispatcherHandle,
    policy: RangePolicy,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP adapter listening on http://{}", listener.local_addr()?);
    warp::serve(routes(dispatcher, policy).with(warp::log("colorlink::web")))
        .serve_incoming_with_graceful_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            shutdown,
        )
        .await;
    info!("HTTP adapter stopped");
    Ok(())
}

async fn handle_get(
    params: HashMap<String, String>,
    state: WebState,
) -> Result<Response, Infallible> {
    debug!("GET / query parameters: {:?}", params);
    let input = RawInput::from_query(&params);
    let mut view = page::PageView::default();
    match parse(&input, state.policy) {
        Ok(cmd) => {
            view.command = Some(cmd);
            view.result = Some(state.dispatcher.send(cmd).await);
        }
        Err(e) if !params.is_empty() => view.rejected = Some(e.to_string()),
        Err(_) => {}
    }
    let status = match &view.result {
        Some(result) if !result.is_success() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    Ok(warp::reply::with_status(warp::reply::html(page::render(&view)), status).into_response())
}

async fn handle_post(body: Bytes, state: WebState) -> Result<Response, Infallible> {
    let received = String::from_utf8_lossy(&body).into_owned();
    info!("POST / ({} bytes): {}", body.len(), escape_log(&received));

    let mut payload = json!({
        "status": "success",
        "received_data": received,
    });
    let status = match parse(&RawInput::from_body(&body), state.policy) {
        Ok(cmd) => {
            let result = state.dispatcher.send(cmd).await;
            payload["command"] = json!(cmd);
            payload["outcome"] = json!(result.outcome);
            payload["responses"] = json!(result.responses);
            if result.is_success() {
                payload["device_status"] = json!("color_sent");
                StatusCode::OK
            } else {
                payload["status"] = json!("error");
                payload["device_status"] = json!("send_failed");
                StatusCode::BAD_GATEWAY
            }
        }
        Err(e) => {
            payload["device_status"] = json!("no_color_data");
            payload["detail"] = json!(e.to_string());
            StatusCode::OK
        }
    };
    let reply = warp::reply::with_status(warp::reply::json(&payload), status);
    Ok(warp::reply::with_header(reply, "Access-Control-Allow-Origin", "*").into_response())
}

async fn handle_status(state: WebState) -> Result<Response, Infallible> {
    Ok(match state.dispatcher.status().await {
        Some(status) => warp::reply::json(&status).into_response(),
        None => warp::reply::with_status(
            warp::reply::json(&json!({"status": "error", "detail": "dispatcher stopped"})),
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .into_response(),
    })
}
