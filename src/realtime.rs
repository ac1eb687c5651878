use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::REALTIME_ALL_RECORDS;
use crate::error::{AppError, AppResult};
use crate::markers::{MarkerList, MergeOutcome};
use crate::models::{PostPatch, PostRecord, RecordAction, RecordEvent};
use crate::store::RealtimeTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Updated,
    Inserted,
    Removed,
    Ignored,
}

/// Folds one pushed change into the marker list.
pub fn apply_event(markers: &MarkerList, event: RecordEvent, viewer_id: Option<&str>) -> ReconcileOutcome {
    match event.action {
        RecordAction::Update => match serde_json::from_value::<PostPatch>(event.record) {
            Ok(patch) => match markers.merge_remote(patch) {
                MergeOutcome::Updated => ReconcileOutcome::Updated,
                MergeOutcome::Removed => ReconcileOutcome::Removed,
                MergeOutcome::Missing => ReconcileOutcome::Ignored,
            },
            Err(e) => {
                warn!("Ignoring undecodable update event: {}", e);
                ReconcileOutcome::Ignored
            }
        },
        RecordAction::Delete => match event.record_id() {
            Some(id) if markers.remove(id) => ReconcileOutcome::Removed,
            _ => ReconcileOutcome::Ignored,
        },
        RecordAction::Create => {
            let post = serde_json::from_value::<PostRecord>(event.record)
                .map_err(AppError::from)
                .and_then(|record| record.into_post(viewer_id));
            match post {
                Ok(post) => {
                    if markers.insert_remote(post) {
                        ReconcileOutcome::Inserted
                    } else {
                        ReconcileOutcome::Ignored
                    }
                }
                Err(e) => {
                    warn!("Ignoring undecodable create event: {}", e);
                    ReconcileOutcome::Ignored
                }
            }
        }
    }
}

/// Keeps a marker list in step with the server's change feed while mounted.
pub struct RealtimeReconciler {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeReconciler {
    pub async fn start(
        transport: &dyn RealtimeTransport,
        collection: &str,
        markers: MarkerList,
        viewer_id: Option<String>,
    ) -> AppResult<Self> {
        let mut subscription = transport.subscribe(collection, REALTIME_ALL_RECORDS).await?;
        info!("Realtime sync started on {}", subscription.topic());

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = subscription.next_event() => match event {
                        Some(Ok(event)) => {
                            let action = event.action;
                            let outcome = apply_event(&markers, event, viewer_id.as_deref());
                            debug!("Realtime {} event -> {:?}", action, outcome);
                        }
                        Some(Err(e)) => {
                            warn!("Realtime sync stopped: {}", e);
                            break;
                        }
                        None => {
                            debug!("Realtime feed closed by transport");
                            break;
                        }
                    }
                }
            }
            subscription.unsubscribe();
        });

        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Unsubscribes and waits for the delivery task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Realtime task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RealtimeReconciler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
