use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use maud::Markup;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::error::{internal_error_page, not_found_page, ApiError, AppError, PageError};
use crate::history::list_uploads;
use crate::model::{Classifier, Prediction};
use crate::pages::{self, ResultView};
use crate::upload::{self, InvalidFile, UploadError, UploadRecord, UploadStore};

const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct AppState {
    pub config: AppConfig,
    pub store: UploadStore,
    pub classifier: Arc<dyn Classifier>,
}

impl AppState {
    pub fn new(config: AppConfig, classifier: Arc<dyn Classifier>) -> Self {
        let store = UploadStore::new(config.upload_dir.clone(), &config.allowed_extensions);
        Self {
            config,
            store,
            classifier,
        }
    }
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/", get(index))
        .route("/about", get(about))
        .route("/classify", get(classify_form).post(classify_upload))
        .route("/api/classify", post(api_classify))
        .route("/history", get(history))
        .route("/static/uploads/:filename", get(uploaded_file))
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

/// JSON body returned by `POST /api/classify`.
#[derive(Debug, Serialize, PartialEq)]
pub struct ClassifyResponse {
    pub prediction: String,
    pub confidence: f64,
    pub filename: String,
    pub timestamp: String,
}

impl ClassifyResponse {
    pub fn new(record: &UploadRecord, prediction: &Prediction) -> Self {
        Self {
            prediction: prediction.label.clone(),
            confidence: prediction.confidence,
            filename: record.stored_filename.clone(),
            timestamp: format_api_timestamp(record.created_at),
        }
    }
}

fn format_api_timestamp(at: NaiveDateTime) -> String {
    at.format(API_TIMESTAMP_FORMAT).to_string()
}

struct UploadedFile {
    filename: String,
    data: Bytes,
}

/// Keeps the body-limit case apart so it can be answered with 413.
fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.to_string())
    } else {
        AppError::Multipart(err.to_string())
    }
}

/// Pulls the `file` field out of a multipart body. `Ok(None)` when the body
/// has no such field or is not multipart at all.
async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Option<UploadedFile>, AppError> {
    let Ok(mut multipart) = multipart else {
        return Ok(None);
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(multipart_error)?;
            return Ok(Some(UploadedFile { filename, data }));
        }
    }

    Ok(None)
}

async fn store_and_classify(
    state: &AppState,
    file: UploadedFile,
) -> Result<(UploadRecord, Prediction), AppError> {
    let record = state.store.store(&file.filename, file.data.clone()).await?;
    let prediction = state.classifier.predict(&file.data)?;

    tracing::info!(
        filename = %record.stored_filename,
        classifier = state.classifier.name(),
        prediction = %prediction.label,
        confidence = prediction.confidence,
        "image classified"
    );
    Ok((record, prediction))
}

async fn index() -> Markup {
    pages::home()
}

async fn about() -> Markup {
    pages::about()
}

async fn classify_form(State(state): State<SharedState>) -> Markup {
    pages::classify_form(None, state.store.allowed_extensions())
}

async fn classify_upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, PageError> {
    let outcome = match read_file_field(multipart).await {
        Ok(Some(file)) => store_and_classify(&state, file).await,
        Ok(None) => Err(AppError::MissingFile),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((record, prediction)) => {
            let view = ResultView {
                filename: record.stored_filename,
                prediction: prediction.label,
                confidence: prediction.confidence,
                filepath: record.storage_path.display().to_string(),
            };
            Ok(pages::result(&view).into_response())
        }
        Err(e) if e.is_user_error() => {
            tracing::debug!(error = %e, "upload form rejected");
            let status = if matches!(e, AppError::PayloadTooLarge(_)) {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            let message = form_message(&e, &state.config);
            let page = pages::classify_form(Some(&message), state.store.allowed_extensions());
            Ok((status, page).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

fn form_message(err: &AppError, config: &AppConfig) -> String {
    match err {
        AppError::Upload(UploadError::InvalidFile(InvalidFile::DisallowedType(_))) => format!(
            "Invalid file type. Please upload {} files.",
            pages::describe_extensions(&config.allowed_extensions)
        ),
        AppError::PayloadTooLarge(_) => format!(
            "File too large. The maximum upload size is {} MB.",
            config.body_limit_bytes / (1024 * 1024)
        ),
        AppError::Multipart(_) => "The upload could not be read. Please try again.".to_string(),
        _ => "No file selected".to_string(),
    }
}

async fn api_classify(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let file = read_file_field(multipart)
        .await?
        .ok_or(AppError::MissingFile)?;
    let (record, prediction) = store_and_classify(&state, file).await?;
    Ok(Json(ClassifyResponse::new(&record, &prediction)))
}

async fn history(State(state): State<SharedState>) -> Result<Markup, PageError> {
    let uploads = list_uploads(state.store.dir(), state.store.allowed_extensions()).await?;
    Ok(pages::history(&uploads))
}

/// Serves a stored image. Anything that is not a plain whitelisted file name
/// is treated as missing.
async fn uploaded_file(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Response, PageError> {
    let plain = !filename.starts_with('.')
        && !filename.contains(&['/', '\\'][..])
        && upload::is_allowed(&filename, state.store.allowed_extensions());
    if !plain {
        return Err(AppError::NotFound(filename).into());
    }

    let path = state.store.dir().join(&filename);
    match tokio::fs::read(&path).await {
        Ok(data) => Ok((
            [(header::CONTENT_TYPE, upload::content_type(&filename))],
            data,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::NotFound(filename).into())
        }
        Err(e) => Err(AppError::Internal(format!("read {}: {e}", path.display())).into()),
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

async fn not_found() -> Response {
    not_found_page()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = detail, "handler panicked");
    internal_error_page()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::model::PlaceholderClassifier;

    const BOUNDARY: &str = "----poultry-test-boundary";

    fn test_config(dir: &std::path::Path, vars: &[(&str, &str)]) -> AppConfig {
        let mut config = AppConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        config.upload_dir = dir.to_path_buf();
        config
    }

    fn router_with(dir: &std::path::Path, vars: &[(&str, &str)]) -> Router {
        let state = AppState::new(test_config(dir, vars), Arc::new(PlaceholderClassifier));
        build_router(Arc::new(state))
    }

    fn test_router(dir: &std::path::Path) -> Router {
        router_with(dir, &[])
    }

    fn multipart_request(uri: &str, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn stored_files(dir: &std::path::Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(rd) => rd
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => vec![],
        }
    }

    #[test]
    fn classify_response_matches_api_shape() {
        let record = UploadRecord {
            original_filename: "photo.JPG".into(),
            stored_filename: "20240101_100000_photo.JPG".into(),
            storage_path: "static/uploads/20240101_100000_photo.JPG".into(),
            created_at: NaiveDateTime::parse_from_str("2024-01-01T10:00:00", API_TIMESTAMP_FORMAT)
                .unwrap(),
        };
        let prediction = PlaceholderClassifier.predict(b"").unwrap();

        let body = serde_json::to_value(ClassifyResponse::new(&record, &prediction)).unwrap();
        assert_eq!(
            body,
            json!({
                "prediction": "Healthy",
                "confidence": 87.3,
                "filename": "20240101_100000_photo.JPG",
                "timestamp": "2024-01-01T10:00:00",
            })
        );
    }

    #[tokio::test]
    async fn static_pages_render() {
        let tmp = tempfile::tempdir().unwrap();
        for (uri, needle) in [
            ("/", "Poultry Disease Classification"),
            ("/about", "About"),
            ("/classify", "enctype=\"multipart/form-data\""),
        ] {
            let resp = test_router(tmp.path()).oneshot(get_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            assert!(body_text(resp).await.contains(needle), "{uri}");
        }
    }

    #[tokio::test]
    async fn api_classify_stores_and_returns_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/api/classify", "file", "photo.JPG", b"\xFF\xD8\xFF"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["prediction"], "Healthy");
        assert_eq!(body["confidence"].as_f64(), Some(87.3));

        let filename = body["filename"].as_str().unwrap();
        let timestamp = body["timestamp"].as_str().unwrap();
        let at = NaiveDateTime::parse_from_str(timestamp, API_TIMESTAMP_FORMAT).unwrap();
        assert_eq!(
            filename,
            format!("{}photo.JPG", at.format(upload::TIMESTAMP_PREFIX_FORMAT))
        );

        assert_eq!(stored_files(tmp.path()), vec![filename.to_string()]);
        assert_eq!(std::fs::read(tmp.path().join(filename)).unwrap(), b"\xFF\xD8\xFF");
    }

    #[tokio::test]
    async fn api_classify_rejects_disallowed_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/api/classify", "file", "virus.exe", b"MZ"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "Invalid file" }));
        assert!(stored_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn api_classify_rejects_empty_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/api/classify", "file", "", b"data"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "Invalid file" }));
    }

    #[tokio::test]
    async fn api_classify_without_file_field() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/api/classify", "image", "photo.png", b"data"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "No file provided" }));
    }

    #[tokio::test]
    async fn api_classify_without_multipart_body() {
        let tmp = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/api/classify")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(tmp.path()).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "No file provided" }));
    }

    #[tokio::test]
    async fn classify_form_renders_result_page() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/classify", "file", "hen.png", b"png"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        let stored = stored_files(tmp.path());
        assert_eq!(stored.len(), 1);
        assert!(html.contains(&stored[0]));
        assert!(html.contains("Healthy"));
        assert!(html.contains("87.3%"));
    }

    #[tokio::test]
    async fn api_classify_over_body_limit_is_413() {
        let tmp = tempfile::tempdir().unwrap();
        let big = vec![0u8; 2 * 1024 * 1024];
        let resp = router_with(tmp.path(), &[("BODY_LIMIT_MB", "1")])
            .oneshot(multipart_request("/api/classify", "file", "big.png", &big))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(resp).await, json!({ "error": "File too large" }));
        assert!(stored_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn classify_form_over_body_limit_explains_size() {
        let tmp = tempfile::tempdir().unwrap();
        let big = vec![0u8; 2 * 1024 * 1024];
        let resp = router_with(tmp.path(), &[("BODY_LIMIT_MB", "1")])
            .oneshot(multipart_request("/classify", "file", "big.png", &big))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_text(resp)
            .await
            .contains("File too large. The maximum upload size is 1 MB."));
        assert!(stored_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn classify_form_rerenders_with_message() {
        let tmp = tempfile::tempdir().unwrap();

        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/classify", "file", "notes.txt", b"text"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp)
            .await
            .contains("Invalid file type. Please upload PNG, JPG or JPEG files."));

        let resp = test_router(tmp.path())
            .oneshot(multipart_request("/classify", "other", "hen.png", b"png"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("No file selected"));

        assert!(stored_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn history_on_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(&tmp.path().join("never-created"))
            .oneshot(get_request("/history"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("No uploads yet."));
    }

    #[tokio::test]
    async fn history_lists_only_whitelisted_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("20240101_100000_hen.png"), b"png").unwrap();
        std::fs::write(tmp.path().join("20240101_100000_virus.exe"), b"MZ").unwrap();

        let resp = test_router(tmp.path()).oneshot(get_request("/history")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let html = body_text(resp).await;
        assert!(html.contains("20240101_100000_hen.png"));
        assert!(!html.contains("virus.exe"));
    }

    #[tokio::test]
    async fn uploaded_files_are_served_with_image_content_type() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("20240101_100000_hen.jpg"), b"jpeg").unwrap();

        let resp = test_router(tmp.path())
            .oneshot(get_request("/static/uploads/20240101_100000_hen.jpg"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_text(resp).await, "jpeg");
    }

    #[tokio::test]
    async fn uploaded_file_lookup_refuses_unsafe_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"secret").unwrap();

        for uri in [
            "/static/uploads/notes.txt",
            "/static/uploads/..%2Fsecret.png",
            "/static/uploads/missing.png",
        ] {
            let resp = test_router(tmp.path()).oneshot(get_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_renders_404_page() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path())
            .oneshot(get_request("/does-not-exist"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_text(resp).await.contains("Page not found"));
    }

    async fn boom() -> &'static str {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_render_500_page() {
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(handle_panic));

        let resp = app.oneshot(get_request("/boom")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let html = body_text(resp).await;
        assert!(html.contains("Internal server error"));
        assert!(!html.contains("boom"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = test_router(tmp.path()).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "status": "OK" }));
    }
}
