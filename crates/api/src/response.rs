//! Response envelope shared by the REST handlers.
//!
//! Every successful REST body is `{ "data": ... }`, mirroring the `{ "error",
//! "code" }` shape that [`AppError`](crate::error::AppError) produces on
//! failure. Handlers return a typed [`DataResponse`] rather than building the
//! envelope with `serde_json::json!`, so the payload type is visible in the
//! handler signature.

use serde::Serialize;

/// The `{ "data": T }` envelope around a successful REST payload.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
