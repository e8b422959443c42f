//! `user.*` procedures: account info and the per-user metadata document.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::{Procedure, ProcedureRouter, RpcServices};
use crate::error::{RpcError, RpcResult};
use crate::identity::{ProtectedContext, RequestContext};
use crate::validation::validate_metadata;

pub fn procedures() -> ProcedureRouter {
    ProcedureRouter::new()
        .register("getInfo", Procedure::PublicRead(get_info))
        .register("getMetadata", Procedure::ProtectedRead(get_metadata))
        .register("editMetadata", Procedure::ProtectedWrite(edit_metadata))
}

/// Account record of the caller, or `null` for anonymous callers.
fn get_info(services: Arc<RpcServices>, ctx: RequestContext, _input: Value) -> BoxFuture<'static, RpcResult<Value>> {
    async move {
        let Some(subject_id) = ctx.subject_id.as_deref() else {
            return Ok(Value::Null);
        };
        let user = services
            .identity
            .get_user(subject_id)
            .await
            .map_err(|e| RpcError::internal_with("Identity store request failed", e))?;
        let Some(user) = user else {
            return Err(RpcError::not_found("User not found"));
        };
        Ok(serde_json::to_value(&user)?)
    }
    .boxed()
}

fn get_metadata(services: Arc<RpcServices>, ctx: ProtectedContext, _input: Value) -> BoxFuture<'static, RpcResult<Value>> {
    async move {
        let reply = services
            .metadata
            .get_metadata(ctx.subject_id.as_str())
            .await
            .map_err(|e| RpcError::internal_with("Metadata store request failed", e))?;
        if !reply.is_ok() {
            return Err(RpcError::internal_with("Status from metadata store was not OK", format!("{:?}", reply.status)));
        }
        Ok(reply.value)
    }
    .boxed()
}

/// Validate and store the whole document; the stored value is returned. Last write wins.
fn edit_metadata(services: Arc<RpcServices>, ctx: ProtectedContext, input: Value) -> BoxFuture<'static, RpcResult<Value>> {
    async move {
        let payload = validate_metadata(&input).map_err(RpcError::validation)?;
        let value = serde_json::to_value(&payload)?;
        let reply = services
            .metadata
            .set_metadata(ctx.subject_id.as_str(), value)
            .await
            .map_err(|e| RpcError::internal_with("Metadata store request failed", e))?;
        if !reply.is_ok() {
            return Err(RpcError::internal_with("Status from metadata store was not OK", format!("{:?}", reply.status)));
        }
        Ok(reply.value)
    }
    .boxed()
}
