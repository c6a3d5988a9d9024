//! Reading a request submission from either encoding the console sends.

use std::collections::HashMap;

use axum::extract::{Form, FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;

/// Fields of a `POST /api/requests` body.
#[derive(Debug, Default)]
pub(crate) struct Submission {
    pub applicant: String,
    pub command: String,
    pub reason: String,
    /// Raw bytes and extension of the attached image, when one was sent.
    pub image: Option<(Vec<u8>, String)>,
}

/// Accepts `multipart/form-data` (needed for the image) and plain
/// url-encoded forms interchangeably.
pub(crate) async fn read_submission(request: Request) -> Result<Submission, String> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        read_multipart(request).await
    } else {
        read_form(request).await
    }
}

async fn read_multipart(request: Request) -> Result<Submission, String> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|err| format!("unreadable multipart body: {err}"))?;

    let mut submission = Submission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("unreadable multipart field: {err}"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "applicant" => submission.applicant = read_text(field).await?,
            "command" => submission.command = read_text(field).await?,
            "reason" => submission.reason = read_text(field).await?,
            "image" => {
                let ext = field
                    .file_name()
                    .and_then(|name| std::path::Path::new(name).extension())
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("png")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| format!("unreadable image field: {err}"))?;
                if !bytes.is_empty() {
                    submission.image = Some((bytes.to_vec(), ext));
                }
            }
            _ => {}
        }
    }
    Ok(submission)
}

async fn read_form(request: Request) -> Result<Submission, String> {
    let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
        .await
        .map_err(|err| format!("unreadable form body: {err}"))?;

    let take = |key: &str| fields.get(key).cloned().unwrap_or_default();
    Ok(Submission {
        applicant: take("applicant"),
        command: take("command"),
        reason: take("reason"),
        image: None,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|err| format!("unreadable form field: {err}"))
}
