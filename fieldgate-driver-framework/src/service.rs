//! Zenoh queryables serving driver requests.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use zenoh::Session;
use zenoh::query::Query;

use fieldgate_common::{KeyExprBuilder, RequestOp};

use crate::driver::Driver;
use crate::error::Result;
use crate::handlers::RequestHandler;

/// Declares one queryable per request operation under
/// `<prefix>/<system>/<id>/@/<op>` and answers every query exactly once.
pub struct DriverService {
    session: Arc<Session>,
    keys: KeyExprBuilder,
    handler: Arc<RequestHandler>,
}

impl DriverService {
    pub fn new(session: Arc<Session>, keys: KeyExprBuilder, driver: Arc<dyn Driver>) -> Self {
        Self {
            session,
            keys,
            handler: Arc::new(RequestHandler::new(driver)),
        }
    }

    /// Declare the queryables and spawn their serving loops.
    ///
    /// Loops stop when `shutdown` flips to `true`.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::with_capacity(RequestOp::ALL.len());

        for op in RequestOp::ALL {
            let key = self.keys.request_key(op);
            let queryable = self.session.declare_queryable(key.as_str()).await?;
            tracing::debug!(key = %key, "Serving requests");

            let handler = self.handler.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        query = queryable.recv_async() => match query {
                            Ok(query) => {
                                let handler = handler.clone();
                                tokio::spawn(answer(handler, op, query));
                            }
                            Err(e) => {
                                tracing::debug!(%op, error = %e, "Queryable closed");
                                break;
                            }
                        },
                    }
                }
            }));
        }

        Ok(tasks)
    }
}

async fn answer(handler: Arc<RequestHandler>, op: RequestOp, query: Query) {
    let body = query
        .payload()
        .map(|payload| payload.to_bytes().into_owned())
        .unwrap_or_default();

    let reply = handler.handle(op, &body).await;
    let bytes = match serde_json::to_vec(&reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(%op, error = %e, "Failed to encode reply");
            br#"{"Ok":false,"Error":"reply encoding failed"}"#.to_vec()
        }
    };

    if let Err(e) = query.reply(query.key_expr().clone(), bytes).await {
        tracing::warn!(%op, error = %e, "Failed to send reply");
    }
}
