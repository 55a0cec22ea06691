use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub const CALL_RESULT: &str = "call_result";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundRequest {
    #[serde(rename = "msgId")]
    pub msg_id: i64,
    pub method: String,
    #[serde(default)]
    pub args: Value,
    #[serde(rename = "userAction", default)]
    pub user_action: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallResult {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    #[serde(rename = "msgId")]
    pub msg_id: i64,
    pub payload: Value,
}

impl CallResult {
    pub fn new(msg_id: i64, payload: Value) -> Self {
        Self {
            message_type: CALL_RESULT,
            msg_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(Value),
    // the handler already answered through the push channel, or stays silent
    NoReply,
}

impl Outcome {
    pub fn reply<T: Serialize>(payload: T) -> Result<Self, OperationError> {
        Ok(Self::Reply(serde_json::to_value(payload)?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Upstream(#[from] crate::upstream::UpstreamError),
    #[error(transparent)]
    Image(#[from] crate::images::ImageError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed request envelope: {0}")]
    Malformed(serde_json::Error),
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error("invalid arguments for {operation}: {source}")]
    InvalidArgs {
        operation: String,
        source: serde_json::Error,
    },
    #[error("operation {operation} failed: {source}")]
    Handler {
        operation: String,
        source: OperationError,
    },
    #[error("operation {operation} panicked")]
    Panicked { operation: String },
}

#[async_trait]
pub trait Operation<C>: Send + Sync {
    type Args: DeserializeOwned + Send;

    async fn call(&self, args: Self::Args, ctx: &C) -> Result<Outcome, OperationError>;
}

#[async_trait]
trait Handler<C>: Send + Sync {
    async fn invoke(&self, operation: &str, args: Value, ctx: &C) -> Result<Outcome, DispatchError>;
}

struct Validated<O>(O);

#[async_trait]
impl<C, O> Handler<C> for Validated<O>
where
    C: Send + Sync + 'static,
    O: Operation<C> + 'static,
{
    async fn invoke(&self, operation: &str, args: Value, ctx: &C) -> Result<Outcome, DispatchError> {
        let args = serde_json::from_value::<O::Args>(args).map_err(|source| {
            DispatchError::InvalidArgs {
                operation: operation.to_string(),
                source,
            }
        })?;
        self.0
            .call(args, ctx)
            .await
            .map_err(|source| DispatchError::Handler {
                operation: operation.to_string(),
                source,
            })
    }
}

pub struct Router<C> {
    handlers: HashMap<String, Arc<dyn Handler<C>>>,
}

impl<C: Send + Sync + 'static> Router<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<O>(&mut self, name: &str, operation: O)
    where
        O: Operation<C> + 'static,
    {
        if self
            .handlers
            .insert(name.to_string(), Arc::new(Validated(operation)))
            .is_some()
        {
            tracing::warn!(operation = name, "replacing previously registered operation");
        }
    }

    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, message: Value, ctx: &C) -> Result<Option<CallResult>, DispatchError> {
        let request: InboundRequest =
            serde_json::from_value(message).map_err(DispatchError::Malformed)?;

        let Some(handler) = self.handlers.get(&request.method).cloned() else {
            return Err(DispatchError::UnknownOperation(request.method));
        };

        tracing::debug!(
            operation = %request.method,
            msg_id = request.msg_id,
            user_action = request.user_action,
            "dispatching"
        );

        let outcome = AssertUnwindSafe(handler.invoke(&request.method, request.args, ctx))
            .catch_unwind()
            .await
            .map_err(|_| DispatchError::Panicked {
                operation: request.method.clone(),
            })??;

        Ok(match outcome {
            Outcome::Reply(payload) => Some(CallResult::new(request.msg_id, payload)),
            Outcome::NoReply => None,
        })
    }
}

impl<C: Send + Sync + 'static> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}
