//! Work-done progress bookkeeping on both sides of the server: validating
//! progress a backend sends through us, and reporting our own.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::notification::Progress;
use tower_lsp::lsp_types::request::WorkDoneProgressCreate;
use tower_lsp::lsp_types::{
    ProgressParams, ProgressParamsValue, ProgressToken, WorkDoneProgress, WorkDoneProgressBegin,
    WorkDoneProgressCreateParams, WorkDoneProgressEnd,
};
use tracing::{debug, warn};

use crate::error::ProgressError;
use crate::rpc::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Created,
    Begun { percentage: Option<u32> },
}

/// Receiver-side view of progress tokens: which were created and where
/// each is in its begin/report/end lifecycle.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    tokens: HashMap<ProgressToken, TokenState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful `window/workDoneProgress/create`.
    pub fn create(&mut self, token: ProgressToken) {
        self.tokens.insert(token, TokenState::Created);
    }

    /// Checks `progress` against the token's lifecycle and advances it. An
    /// end retires the token.
    pub fn record(
        &mut self,
        token: &ProgressToken,
        progress: &WorkDoneProgress,
    ) -> Result<(), ProgressError> {
        let state = self
            .tokens
            .get_mut(token)
            .ok_or_else(|| ProgressError::UnknownToken(token.clone()))?;

        match (progress, *state) {
            (WorkDoneProgress::Begin(begin), TokenState::Created) => {
                *state = TokenState::Begun {
                    percentage: begin.percentage,
                };
            }
            (WorkDoneProgress::Begin(_), TokenState::Begun { .. }) => {
                return Err(ProgressError::AlreadyBegun(token.clone()));
            }
            (_, TokenState::Created) => return Err(ProgressError::NotBegun(token.clone())),
            (WorkDoneProgress::Report(report), TokenState::Begun { percentage }) => {
                if let (Some(previous), Some(current)) = (percentage, report.percentage)
                    && current < previous
                {
                    return Err(ProgressError::PercentageDecreased {
                        token: token.clone(),
                        previous,
                        current,
                    });
                }
                *state = TokenState::Begun {
                    percentage: report.percentage.or(percentage),
                };
            }
            (WorkDoneProgress::End(_), TokenState::Begun { .. }) => {
                self.tokens.remove(token);
            }
        }
        Ok(())
    }

    /// Forgets `token`, e.g. after the client cancelled it.
    pub fn remove(&mut self, token: &ProgressToken) -> bool {
        self.tokens.remove(token).is_some()
    }
}

/// Reports progress for work the server itself runs. Exists only once the
/// client accepted the token; nothing is sent after `cancel` fires.
pub struct ProgressReporter {
    client: Connection,
    token: ProgressToken,
    cancel: CancellationToken,
}

impl ProgressReporter {
    /// Asks the client to create `token`. A refusal yields `None` and no
    /// progress may be sent under the token.
    pub async fn create(
        client: &Connection,
        token: ProgressToken,
        cancel: CancellationToken,
    ) -> Option<Self> {
        let params = WorkDoneProgressCreateParams {
            token: token.clone(),
        };
        match client.call::<WorkDoneProgressCreate>(params, None).await {
            Ok(()) => Some(Self {
                client: client.clone(),
                token,
                cancel,
            }),
            Err(e) => {
                warn!("Client refused progress token {:?}: {}", token, e);
                None
            }
        }
    }

    pub fn begin(&self, title: &str, cancellable: bool) {
        self.send(WorkDoneProgress::Begin(WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: Some(cancellable),
            message: None,
            percentage: None,
        }));
    }

    pub fn end(&self, message: Option<&str>) {
        self.send(WorkDoneProgress::End(WorkDoneProgressEnd {
            message: message.map(str::to_string),
        }));
    }

    fn send(&self, progress: WorkDoneProgress) {
        if self.cancel.is_cancelled() {
            debug!("Progress {:?} was cancelled, not reporting", self.token);
            return;
        }
        self.client.notify_typed::<Progress>(ProgressParams {
            token: self.token.clone(),
            value: ProgressParamsValue::WorkDone(progress),
        });
    }
}
