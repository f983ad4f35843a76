use axum::{
    extract::{Extension, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::AuthContext;
use crate::models::Certificate;
use crate::pdf;

/// Public page where anyone can check a certificate code.
pub fn verify_url(base_url: &str, code: &str) -> String {
    format!("{}/certificates/verify/{}", base_url.trim_end_matches('/'), code)
}

pub async fn list_my_certificates(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Certificate>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_certificates_for_user(&conn, ctx.user_id())?))
}

pub async fn download_certificate_pdf(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Response> {
    let certificate = {
        let conn = state.db.get()?;
        queries::get_certificate_by_id(&conn, &id)?.or_not_found(msg::CERTIFICATE_NOT_FOUND)?
    };
    ctx.require_self_or_admin(&certificate.user_id, msg::CERTIFICATE_NOT_FOUND)?;

    let bytes = pdf::render_certificate(
        &certificate,
        &verify_url(&state.base_url, &certificate.verification_code),
    );
    let disposition = format!(
        "attachment; filename=\"certificate-{}.pdf\"",
        certificate.verification_code
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
